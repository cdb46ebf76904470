//! Consent lifecycle service.
//!
//! Validates who may do what, applies the state machine from
//! [`crate::consent`], and hands the result to the store, which persists the
//! change and its audit record in one transaction. Every status-sensitive
//! read sweeps overdue consents first.
use crate::audit::{self, AuditEntry, MyLogs, NewAuditRecord, Provenance};
use crate::auth::{self, Caller};
use crate::categories::{self, AcceptPayload, PersonalInfo};
use crate::clock::SharedClock;
use crate::consent::{
    parse_data_types, resolve_expiration, AuditAction, Consent, ConsentStatus, DataType, Transition,
};
use crate::errors::CustodianError;
use crate::mediator::{self, DataRelease};
use crate::settings::Settings;
use crate::storage::{self, NewConsent, NewUser, Party, Role, User};
use crate::sweeper;
use axum::http::HeaderMap;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub personal_info: PersonalInfo,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// A new consent request. `granterEmail` names the data owner being asked.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRequest {
    #[serde(alias = "requesterEmail")]
    pub granter_email: String,
    #[serde(default)]
    pub data_types: Vec<String>,
    #[serde(default)]
    pub purpose: String,
    pub duration: Option<String>,
    pub expiration_date_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataAccessRequest {
    pub granter_id: String,
    pub data_type: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: String,
    pub name: String,
    pub email: String,
    pub is_admin: bool,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.subject.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            is_admin: user.is_admin == 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub expires_at: i64,
    pub user: UserView,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(flatten)]
    pub user: UserView,
    pub personal_info: Value,
    pub location_data: Value,
    pub browser_data: Value,
}

/// A consent together with whoever sits on the other side of it from the
/// caller's point of view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentView {
    #[serde(flatten)]
    pub consent: Consent,
    pub counterparty: Party,
}

#[derive(Clone)]
pub struct ConsentService {
    db: DatabaseConnection,
    clock: SharedClock,
    token_ttl_secs: i64,
    audit_page_size: u64,
}

impl ConsentService {
    pub fn new(db: DatabaseConnection, clock: SharedClock, settings: &Settings) -> Self {
        Self {
            db,
            clock,
            token_ttl_secs: settings.auth.token_ttl_secs,
            audit_page_size: settings.consent.audit_page_size,
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    fn now(&self) -> i64 {
        self.clock.now().timestamp()
    }

    // Identity

    pub async fn register(
        &self,
        req: RegisterRequest,
        provenance: &Provenance,
    ) -> Result<Session, CustodianError> {
        if req.name.trim().is_empty() {
            return Err(CustodianError::InvalidInput("Name is required".to_string()));
        }
        req.personal_info.validate_for_registration()?;

        let now = self.now();
        let new_user = NewUser {
            name: req.name,
            email: req.email,
            password: req.password,
            is_admin: false,
        };
        let audit = NewAuditRecord {
            action: AuditAction::Registered,
            owner: String::new(),
            counterparty: String::new(),
            consent_id: None,
            data_type: None,
            purpose: None,
            provenance: provenance.clone(),
        };
        let user = storage::register_user(&self.db, &new_user, &req.personal_info, &audit, now)
            .await?;
        tracing::info!(subject = %user.subject, "User registered");

        self.open_session(&user, now).await
    }

    pub async fn login(&self, req: LoginRequest) -> Result<Session, CustodianError> {
        let subject = storage::verify_user_password(&self.db, &req.email, &req.password)
            .await?
            .ok_or_else(|| CustodianError::Unauthorized("Invalid credentials".to_string()))?;
        let user = storage::get_user_by_subject(&self.db, &subject)
            .await?
            .ok_or_else(|| CustodianError::Unauthorized("Invalid credentials".to_string()))?;

        self.open_session(&user, self.now()).await
    }

    async fn open_session(&self, user: &User, now: i64) -> Result<Session, CustodianError> {
        let token =
            storage::issue_access_token(&self.db, &user.subject, self.token_ttl_secs, now).await?;
        Ok(Session {
            token: token.token,
            expires_at: token.expires_at,
            user: UserView::from(user),
        })
    }

    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Caller, CustodianError> {
        auth::authenticate(&self.db, headers, self.now()).await
    }

    pub async fn profile(&self, caller: &Caller) -> Result<Profile, CustodianError> {
        let user = storage::get_user_by_subject(&self.db, &caller.subject)
            .await?
            .ok_or_else(|| CustodianError::NotFound("User not found".to_string()))?;

        let mut docs = Vec::with_capacity(DataType::ALL.len());
        for data_type in DataType::ALL {
            let stored = storage::get_attribute(&self.db, &user.subject, data_type).await?;
            docs.push(categories::project(data_type, stored)?);
        }
        let [personal_info, location_data, browser_data]: [Value; 3] = docs
            .try_into()
            .map_err(|_| CustodianError::Other("Profile category count mismatch".to_string()))?;

        Ok(Profile {
            user: UserView::from(&user),
            personal_info,
            location_data,
            browser_data,
        })
    }

    // Lifecycle

    /// Creates a pending consent from the caller (requester) to the user
    /// named by `granter_email`.
    pub async fn request_consent(
        &self,
        caller: &Caller,
        req: ConsentRequest,
        provenance: &Provenance,
    ) -> Result<Consent, CustodianError> {
        let granter = storage::get_user_by_email(&self.db, &req.granter_email)
            .await?
            .ok_or_else(|| CustodianError::NotFound("Granter not found".to_string()))?;
        if granter.subject == caller.subject {
            return Err(CustodianError::InvalidInput(
                "You cannot request data from yourself".to_string(),
            ));
        }

        let data_types = parse_data_types(&req.data_types)?;
        let purpose = req.purpose.trim();
        if purpose.is_empty() {
            return Err(CustodianError::InvalidInput("Purpose is required".to_string()));
        }

        let now_dt = self.clock.now();
        let expires_at = resolve_expiration(
            now_dt,
            req.expiration_date_time.as_deref(),
            req.duration.as_deref(),
        )?;
        let now = now_dt.timestamp();

        let new_consent = NewConsent {
            granter: granter.subject.clone(),
            requester: caller.subject.clone(),
            data_types,
            purpose: purpose.to_string(),
            expires_at: expires_at.timestamp(),
        };
        let labels: Vec<&str> = new_consent.data_types.iter().map(DataType::as_str).collect();
        let audit = NewAuditRecord {
            action: AuditAction::Requested,
            owner: new_consent.granter.clone(),
            counterparty: new_consent.requester.clone(),
            consent_id: None,
            data_type: Some(labels.join(", ")),
            purpose: Some(new_consent.purpose.clone()),
            provenance: provenance.clone(),
        };

        let consent = storage::create_consent(&self.db, &new_consent, &audit, now).await?;
        tracing::info!(
            consent_id = %consent.id,
            granter = %consent.granter,
            requester = %consent.requester,
            data_type = %consent.data_types_label(),
            expires_at = consent.expires_at,
            "Consent requested"
        );
        Ok(consent)
    }

    pub async fn accept(
        &self,
        caller: &Caller,
        consent_id: &str,
        payload: &AcceptPayload,
        provenance: &Provenance,
    ) -> Result<Consent, CustodianError> {
        self.apply(caller, consent_id, Transition::Accept, Some(payload), provenance)
            .await
    }

    pub async fn decline(
        &self,
        caller: &Caller,
        consent_id: &str,
        provenance: &Provenance,
    ) -> Result<Consent, CustodianError> {
        self.apply(caller, consent_id, Transition::Decline, None, provenance)
            .await
    }

    pub async fn revoke(
        &self,
        caller: &Caller,
        consent_id: &str,
        provenance: &Provenance,
    ) -> Result<Consent, CustodianError> {
        self.apply(caller, consent_id, Transition::Revoke, None, provenance)
            .await
    }

    async fn apply(
        &self,
        caller: &Caller,
        consent_id: &str,
        transition: Transition,
        payload: Option<&AcceptPayload>,
        provenance: &Provenance,
    ) -> Result<Consent, CustodianError> {
        let now = self.now();
        sweeper::sweep_expired_consents(&self.db, now).await?;

        let mut consent = storage::get_consent(&self.db, consent_id)
            .await?
            .ok_or_else(|| CustodianError::NotFound("Consent request not found".to_string()))?;

        if consent.granter != caller.subject {
            tracing::warn!(
                consent_id = %consent.id,
                subject = %caller.subject,
                ?transition,
                "Transition refused: caller is not the granter"
            );
            return Err(CustodianError::Forbidden(
                "Only the granter may change this consent".to_string(),
            ));
        }

        let from = consent.status;
        consent.transition(transition, now)?;

        let audit = NewAuditRecord::for_consent(transition.audit_action(), &consent)
            .with_provenance(provenance);
        storage::commit_transition(&self.db, &consent, from, payload, &audit).await?;

        tracing::info!(
            consent_id = %consent.id,
            granter = %consent.granter,
            requester = %consent.requester,
            from = %from,
            to = %consent.status,
            "Consent transitioned"
        );
        Ok(consent)
    }

    // Listings

    /// Requests waiting on the caller's decision.
    pub async fn pending_requests(&self, caller: &Caller) -> Result<Vec<ConsentView>, CustodianError> {
        self.list(caller, Role::Granter, ConsentStatus::Pending).await
    }

    /// Live grants the caller holds as requester.
    pub async fn my_consents(&self, caller: &Caller) -> Result<Vec<ConsentView>, CustodianError> {
        self.list(caller, Role::Requester, ConsentStatus::Active).await
    }

    /// Live grants the caller has given out.
    pub async fn granted_consents(
        &self,
        caller: &Caller,
    ) -> Result<Vec<ConsentView>, CustodianError> {
        self.list(caller, Role::Granter, ConsentStatus::Active).await
    }

    async fn list(
        &self,
        caller: &Caller,
        role: Role,
        status: ConsentStatus,
    ) -> Result<Vec<ConsentView>, CustodianError> {
        sweeper::sweep_expired_consents(&self.db, self.now()).await?;
        let consents = storage::list_consents(&self.db, role, &caller.subject, Some(status)).await?;
        self.with_counterparties(caller, consents).await
    }

    /// A single consent, visible to either party.
    pub async fn get_consent(
        &self,
        caller: &Caller,
        consent_id: &str,
    ) -> Result<ConsentView, CustodianError> {
        sweeper::sweep_expired_consents(&self.db, self.now()).await?;
        let consent = storage::get_consent(&self.db, consent_id)
            .await?
            .ok_or_else(|| CustodianError::NotFound("Consent not found".to_string()))?;
        if !consent.involves(&caller.subject) {
            return Err(CustodianError::Forbidden(
                "Not a party to this consent".to_string(),
            ));
        }

        let mut views = self.with_counterparties(caller, vec![consent]).await?;
        views
            .pop()
            .ok_or_else(|| CustodianError::Other("Consent view missing".to_string()))
    }

    async fn with_counterparties(
        &self,
        caller: &Caller,
        consents: Vec<Consent>,
    ) -> Result<Vec<ConsentView>, CustodianError> {
        let other = |c: &Consent| {
            if c.granter == caller.subject {
                c.requester.clone()
            } else {
                c.granter.clone()
            }
        };
        let subjects: Vec<String> = consents.iter().map(other).collect();
        let users = storage::get_users_by_subjects(&self.db, &subjects).await?;

        Ok(consents
            .into_iter()
            .map(|consent| {
                let subject = other(&consent);
                let counterparty = users
                    .get(&subject)
                    .map(Party::from)
                    .unwrap_or_else(|| Party::unknown(&subject));
                ConsentView {
                    consent,
                    counterparty,
                }
            })
            .collect())
    }

    // Data access and audit

    pub async fn request_data(
        &self,
        caller: &Caller,
        req: &DataAccessRequest,
        provenance: &Provenance,
    ) -> Result<DataRelease, CustodianError> {
        mediator::request_data(
            &self.db,
            caller,
            &req.granter_id,
            &req.data_type,
            provenance,
            self.now(),
        )
        .await
    }

    pub async fn my_logs(&self, caller: &Caller) -> Result<MyLogs, CustodianError> {
        audit::my_logs(&self.db, caller, self.audit_page_size, self.now()).await
    }

    pub async fn all_logs(&self, caller: &Caller) -> Result<Vec<AuditEntry>, CustodianError> {
        audit::all_logs(&self.db, caller, self.audit_page_size).await
    }

    pub async fn sweep(&self) -> Result<u64, CustodianError> {
        sweeper::sweep_expired_consents(&self.db, self.now()).await
    }
}
