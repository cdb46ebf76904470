use crate::audit::NewAuditRecord;
use crate::categories::{self, AcceptPayload, PersonalInfo};
use crate::consent::{AuditAction, Consent, ConsentStatus, DataType};
use crate::entities;
use crate::errors::CustodianError;
use crate::settings::Database as DbCfg;
use base64ct::Encoding;
use migration::MigratorTrait;
use rand::RngCore;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, Database, DatabaseConnection,
    DbErr, EntityTrait, IntoActiveModel, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
    Set, SqlErr, TransactionTrait,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

pub type User = entities::user::Model;
pub type AccessToken = entities::access_token::Model;
pub type AuditLog = entities::audit_log::Model;

/// The public face of a user as shown to the other side of a consent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Party {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

impl Party {
    pub fn unknown(subject: &str) -> Self {
        Self {
            id: subject.to_string(),
            name: None,
            email: None,
        }
    }
}

impl From<&User> for Party {
    fn from(user: &User) -> Self {
        Self {
            id: user.subject.clone(),
            name: Some(user.name.clone()),
            email: Some(user.email.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone)]
pub struct NewConsent {
    pub granter: String,
    pub requester: String,
    pub data_types: BTreeSet<DataType>,
    pub purpose: String,
    pub expires_at: i64,
}

/// Which side of a consent a subject is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Granter,
    Requester,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentStats {
    pub active_consents_as_requester: u64,
    pub revoked_consents_as_requester: u64,
    pub expired_consents_as_requester: u64,
    pub active_consents_as_granter: u64,
    pub revoked_consents_as_granter: u64,
    pub expired_consents_as_granter: u64,
}

pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, CustodianError> {
    let db = Database::connect(&cfg.url).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(db)
}

fn random_id() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64ct::Base64UrlUnpadded::encode_string(&bytes)
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn hash_password(password: &str) -> Result<String, CustodianError> {
    use argon2::password_hash::{rand_core::OsRng, SaltString};
    use argon2::{Argon2, PasswordHasher};

    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| CustodianError::Other(format!("Password hashing failed: {}", e)))?
        .to_string())
}

// User directory

/// Creates a user with its personal-info document and the REGISTERED audit
/// record, all in one transaction.
pub async fn register_user(
    db: &DatabaseConnection,
    input: &NewUser,
    personal_info: &PersonalInfo,
    audit: &NewAuditRecord,
    now: i64,
) -> Result<User, CustodianError> {
    let txn = db.begin().await?;
    let user = insert_user(&txn, input, now).await?;

    let doc = serde_json::to_value(personal_info)?;
    set_attribute(&txn, &user.subject, DataType::PersonalInfo, &doc, now).await?;

    let audit = NewAuditRecord {
        owner: user.subject.clone(),
        counterparty: user.subject.clone(),
        ..audit.clone()
    };
    insert_audit(&txn, &audit, now).await?;
    txn.commit().await?;

    Ok(user)
}

pub async fn create_user(
    db: &DatabaseConnection,
    input: &NewUser,
    now: i64,
) -> Result<User, CustodianError> {
    insert_user(db, input, now).await
}

async fn insert_user<C: ConnectionTrait>(
    conn: &C,
    input: &NewUser,
    now: i64,
) -> Result<User, CustodianError> {
    let email = normalize_email(&input.email);
    if email.is_empty() || !email.contains('@') {
        return Err(CustodianError::InvalidInput(format!(
            "Invalid email address: {}",
            input.email
        )));
    }
    if input.password.is_empty() {
        return Err(CustodianError::InvalidInput("Password is required".to_string()));
    }

    let user = entities::user::ActiveModel {
        subject: Set(random_id()),
        email: Set(email.clone()),
        name: Set(input.name.trim().to_string()),
        password_hash: Set(hash_password(&input.password)?),
        is_admin: Set(if input.is_admin { 1 } else { 0 }),
        created_at: Set(now),
        enabled: Set(1),
    };

    user.insert(conn).await.map_err(|e| {
        if is_unique_violation(&e) {
            CustodianError::Conflict(format!("User already exists: {}", email))
        } else {
            e.into()
        }
    })
}

pub async fn get_user_by_email(
    db: &DatabaseConnection,
    email: &str,
) -> Result<Option<User>, CustodianError> {
    use entities::user::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::Email.eq(normalize_email(email)))
        .one(db)
        .await?)
}

pub async fn get_user_by_subject(
    db: &DatabaseConnection,
    subject: &str,
) -> Result<Option<User>, CustodianError> {
    use entities::user::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::Subject.eq(subject))
        .one(db)
        .await?)
}

pub async fn get_users_by_subjects(
    db: &DatabaseConnection,
    subjects: &[String],
) -> Result<HashMap<String, User>, CustodianError> {
    use entities::user::{Column, Entity};

    if subjects.is_empty() {
        return Ok(HashMap::new());
    }
    let users = Entity::find()
        .filter(Column::Subject.is_in(subjects.iter().cloned()))
        .all(db)
        .await?;
    Ok(users.into_iter().map(|u| (u.subject.clone(), u)).collect())
}

/// Returns the subject on a match. Disabled accounts never match.
pub async fn verify_user_password(
    db: &DatabaseConnection,
    email: &str,
    password: &str,
) -> Result<Option<String>, CustodianError> {
    use argon2::{Argon2, PasswordHash, PasswordVerifier};

    let user = match get_user_by_email(db, email).await? {
        Some(u) if u.enabled == 1 => u,
        _ => return Ok(None),
    };

    let parsed_hash = PasswordHash::new(&user.password_hash)
        .map_err(|e| CustodianError::Other(format!("Invalid password hash: {}", e)))?;

    if Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
    {
        Ok(Some(user.subject))
    } else {
        Ok(None)
    }
}

/// Update name and flags; the password is left alone.
pub async fn update_user(
    db: &DatabaseConnection,
    subject: &str,
    name: &str,
    is_admin: bool,
    enabled: bool,
) -> Result<(), CustodianError> {
    let user = get_user_by_subject(db, subject)
        .await?
        .ok_or_else(|| CustodianError::NotFound(format!("User not found: {}", subject)))?;

    let mut active = user.into_active_model();
    active.name = Set(name.to_string());
    active.is_admin = Set(if is_admin { 1 } else { 0 });
    active.enabled = Set(if enabled { 1 } else { 0 });
    active.update(db).await?;

    Ok(())
}

// Category attributes

pub async fn get_attribute<C: ConnectionTrait>(
    conn: &C,
    owner: &str,
    data_type: DataType,
) -> Result<Option<Value>, CustodianError> {
    use entities::profile_attribute::{Column, Entity};

    if let Some(model) = Entity::find()
        .filter(Column::Owner.eq(owner))
        .filter(Column::Category.eq(data_type.as_str()))
        .one(conn)
        .await?
    {
        let json: Value = serde_json::from_str(&model.document)?;
        Ok(Some(json))
    } else {
        Ok(None)
    }
}

pub async fn set_attribute<C: ConnectionTrait>(
    conn: &C,
    owner: &str,
    data_type: DataType,
    value: &Value,
    now: i64,
) -> Result<(), CustodianError> {
    use entities::profile_attribute::{Column, Entity};

    let attribute = entities::profile_attribute::ActiveModel {
        owner: Set(owner.to_string()),
        category: Set(data_type.as_str().to_string()),
        document: Set(serde_json::to_string(value)?),
        updated_at: Set(now),
    };

    Entity::insert(attribute)
        .on_conflict(
            OnConflict::columns([Column::Owner, Column::Category])
                .update_columns([Column::Document, Column::UpdatedAt])
                .to_owned(),
        )
        .exec(conn)
        .await?;

    Ok(())
}

// Access tokens

pub async fn issue_access_token(
    db: &DatabaseConnection,
    subject: &str,
    ttl_secs: i64,
    now: i64,
) -> Result<AccessToken, CustodianError> {
    let token = entities::access_token::ActiveModel {
        token: Set(random_id()),
        subject: Set(subject.to_string()),
        created_at: Set(now),
        expires_at: Set(now + ttl_secs),
        revoked: Set(0),
    };
    Ok(token.insert(db).await?)
}

/// Only live tokens are returned.
pub async fn get_access_token(
    db: &DatabaseConnection,
    token: &str,
    now: i64,
) -> Result<Option<AccessToken>, CustodianError> {
    use entities::access_token::{Column, Entity};

    let found = Entity::find()
        .filter(Column::Token.eq(token))
        .one(db)
        .await?;
    Ok(found.filter(|t| t.revoked == 0 && now <= t.expires_at))
}

pub async fn cleanup_expired_access_tokens(
    db: &DatabaseConnection,
    now: i64,
) -> Result<u64, CustodianError> {
    use entities::access_token::{Column, Entity};

    let result = Entity::delete_many()
        .filter(Column::ExpiresAt.lt(now))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}

// Consents

/// Inserts a pending consent and its REQUESTED record atomically.
///
/// The partial unique index on `(granter, requester) WHERE status = 'pending'`
/// makes this a compare-and-create: a concurrent duplicate fails the insert
/// and surfaces as `Conflict`.
pub async fn create_consent(
    db: &DatabaseConnection,
    input: &NewConsent,
    audit: &NewAuditRecord,
    now: i64,
) -> Result<Consent, CustodianError> {
    let labels: Vec<&str> = input.data_types.iter().map(DataType::as_str).collect();
    let model = entities::consent::ActiveModel {
        id: Set(random_id()),
        granter: Set(input.granter.clone()),
        requester: Set(input.requester.clone()),
        data_types: Set(serde_json::to_string(&labels)?),
        purpose: Set(input.purpose.clone()),
        status: Set(ConsentStatus::Pending.as_str().to_string()),
        created_at: Set(now),
        granted_at: Set(None),
        expires_at: Set(input.expires_at),
        updated_at: Set(now),
    };

    let txn = db.begin().await?;
    let inserted = model.insert(&txn).await.map_err(|e| {
        if is_unique_violation(&e) {
            CustodianError::Conflict(
                "Pending consent request already exists for this user".to_string(),
            )
        } else {
            e.into()
        }
    })?;

    let audit = NewAuditRecord {
        consent_id: Some(inserted.id.clone()),
        ..audit.clone()
    };
    insert_audit(&txn, &audit, now).await?;
    txn.commit().await?;

    Consent::try_from(inserted)
}

pub async fn get_consent<C: ConnectionTrait>(
    conn: &C,
    consent_id: &str,
) -> Result<Option<Consent>, CustodianError> {
    use entities::consent::{Column, Entity};

    Entity::find()
        .filter(Column::Id.eq(consent_id))
        .one(conn)
        .await?
        .map(Consent::try_from)
        .transpose()
}

/// Persists a transition already applied to `consent` in memory.
///
/// One transaction: compare-and-set on the status (zero rows means someone
/// else moved it first → `Conflict`), the accept-time profile merge, and the
/// audit record. Nothing is visible unless all three succeed.
pub async fn commit_transition(
    db: &DatabaseConnection,
    consent: &Consent,
    from: ConsentStatus,
    payload: Option<&AcceptPayload>,
    audit: &NewAuditRecord,
) -> Result<(), CustodianError> {
    use entities::consent::{Column, Entity};

    let now = consent.updated_at;
    let txn = db.begin().await?;

    let result = Entity::update_many()
        .col_expr(Column::Status, Expr::value(consent.status.as_str()))
        .col_expr(Column::GrantedAt, Expr::value(consent.granted_at))
        .col_expr(Column::UpdatedAt, Expr::value(consent.updated_at))
        .filter(Column::Id.eq(consent.id.as_str()))
        .filter(Column::Status.eq(from.as_str()))
        .exec(&txn)
        .await?;

    if result.rows_affected == 0 {
        return Err(CustodianError::Conflict(format!(
            "Consent {} is no longer {}",
            consent.id, from
        )));
    }

    if let Some(payload) = payload {
        for data_type in &consent.data_types {
            let stored = get_attribute(&txn, &consent.granter, *data_type).await?;
            if let Some(doc) = categories::merge(*data_type, stored, payload)? {
                set_attribute(&txn, &consent.granter, *data_type, &doc, now).await?;
            }
        }
    }

    insert_audit(&txn, audit, now).await?;
    txn.commit().await?;
    Ok(())
}

/// Ids of active consents whose deadline is strictly before `now`.
pub async fn find_overdue_consent_ids(
    db: &DatabaseConnection,
    now: i64,
) -> Result<Vec<String>, CustodianError> {
    use entities::consent::{Column, Entity};

    Ok(Entity::find()
        .select_only()
        .column(Column::Id)
        .filter(Column::Status.eq(ConsentStatus::Active.as_str()))
        .filter(Column::ExpiresAt.lt(now))
        .into_tuple::<String>()
        .all(db)
        .await?)
}

/// Flips one overdue consent to expired and records EXPIRED.
///
/// Returns false when another sweep (or a revoke) got there first; in that
/// case nothing is written.
pub async fn expire_consent(
    db: &DatabaseConnection,
    consent_id: &str,
    now: i64,
) -> Result<bool, CustodianError> {
    use entities::consent::{Column, Entity};

    let txn = db.begin().await?;
    let result = Entity::update_many()
        .col_expr(Column::Status, Expr::value(ConsentStatus::Expired.as_str()))
        .col_expr(Column::UpdatedAt, Expr::value(now))
        .filter(Column::Id.eq(consent_id))
        .filter(Column::Status.eq(ConsentStatus::Active.as_str()))
        .filter(Column::ExpiresAt.lt(now))
        .exec(&txn)
        .await?;

    if result.rows_affected == 0 {
        return Ok(false);
    }

    let consent = get_consent(&txn, consent_id)
        .await?
        .ok_or_else(|| CustodianError::NotFound(format!("Consent not found: {}", consent_id)))?;

    let audit = NewAuditRecord::for_consent(AuditAction::Expired, &consent);
    insert_audit(&txn, &audit, now).await?;
    txn.commit().await?;
    Ok(true)
}

/// Consents where `subject` plays `role`, optionally narrowed to one status,
/// newest first.
pub async fn list_consents(
    db: &DatabaseConnection,
    role: Role,
    subject: &str,
    status: Option<ConsentStatus>,
) -> Result<Vec<Consent>, CustodianError> {
    use entities::consent::{Column, Entity};

    let mut query = Entity::find();
    query = match role {
        Role::Granter => query.filter(Column::Granter.eq(subject)),
        Role::Requester => query.filter(Column::Requester.eq(subject)),
    };
    if let Some(status) = status {
        query = query.filter(Column::Status.eq(status.as_str()));
    }

    query
        .order_by_desc(Column::CreatedAt)
        .order_by_desc(Column::Id)
        .all(db)
        .await?
        .into_iter()
        .map(Consent::try_from)
        .collect()
}

/// An active, unexpired consent from `granter` to `requester` that covers
/// `data_type`, if any.
pub async fn find_live_consent<C: ConnectionTrait>(
    conn: &C,
    granter: &str,
    requester: &str,
    data_type: DataType,
    now: i64,
) -> Result<Option<Consent>, CustodianError> {
    use entities::consent::{Column, Entity};

    let candidates = Entity::find()
        .filter(Column::Granter.eq(granter))
        .filter(Column::Requester.eq(requester))
        .filter(Column::Status.eq(ConsentStatus::Active.as_str()))
        .filter(Column::ExpiresAt.gt(now))
        .order_by_desc(Column::CreatedAt)
        .all(conn)
        .await?;

    for model in candidates {
        let consent = Consent::try_from(model)?;
        if consent.covers(data_type) && consent.is_live(now) {
            return Ok(Some(consent));
        }
    }
    Ok(None)
}

pub async fn consent_stats(
    db: &DatabaseConnection,
    subject: &str,
) -> Result<ConsentStats, CustodianError> {
    use entities::consent::{Column, Entity};

    let count = |column: Column, status: ConsentStatus| {
        Entity::find()
            .filter(column.eq(subject))
            .filter(Column::Status.eq(status.as_str()))
            .count(db)
    };

    Ok(ConsentStats {
        active_consents_as_requester: count(Column::Requester, ConsentStatus::Active).await?,
        revoked_consents_as_requester: count(Column::Requester, ConsentStatus::Revoked).await?,
        expired_consents_as_requester: count(Column::Requester, ConsentStatus::Expired).await?,
        active_consents_as_granter: count(Column::Granter, ConsentStatus::Active).await?,
        revoked_consents_as_granter: count(Column::Granter, ConsentStatus::Revoked).await?,
        expired_consents_as_granter: count(Column::Granter, ConsentStatus::Expired).await?,
    })
}

/// Deadlines of the given consents, keyed by id.
pub async fn get_consent_expirations(
    db: &DatabaseConnection,
    consent_ids: &[String],
) -> Result<HashMap<String, i64>, CustodianError> {
    use entities::consent::{Column, Entity};

    if consent_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = Entity::find()
        .select_only()
        .column(Column::Id)
        .column(Column::ExpiresAt)
        .filter(Column::Id.is_in(consent_ids.iter().cloned()))
        .into_tuple::<(String, i64)>()
        .all(db)
        .await?;
    Ok(rows.into_iter().collect())
}

// Audit trail

/// Appends one audit record. There is deliberately no update or delete
/// counterpart.
pub async fn insert_audit<C: ConnectionTrait>(
    conn: &C,
    record: &NewAuditRecord,
    now: i64,
) -> Result<AuditLog, CustodianError> {
    let model = entities::audit_log::ActiveModel {
        action: Set(record.action.as_str().to_string()),
        owner: Set(record.owner.clone()),
        counterparty: Set(record.counterparty.clone()),
        consent_id: Set(record.consent_id.clone()),
        data_type: Set(record.data_type.clone()),
        purpose: Set(record.purpose.clone()),
        ip_address: Set(record.provenance.ip_address.clone()),
        user_agent: Set(record.provenance.user_agent.clone()),
        created_at: Set(now),
        ..Default::default()
    };
    Ok(model.insert(conn).await?)
}

/// Newest first; ties on the timestamp fall back to insertion order.
pub async fn list_audit_logs(
    db: &DatabaseConnection,
    involving: Option<&str>,
    limit: u64,
) -> Result<Vec<AuditLog>, CustodianError> {
    use entities::audit_log::{Column, Entity};

    let mut query = Entity::find();
    if let Some(subject) = involving {
        query = query.filter(
            Condition::any()
                .add(Column::Owner.eq(subject))
                .add(Column::Counterparty.eq(subject)),
        );
    }

    Ok(query
        .order_by_desc(Column::CreatedAt)
        .order_by_desc(Column::Id)
        .limit(limit)
        .all(db)
        .await?)
}

pub async fn count_audit_logs_for_consent(
    db: &DatabaseConnection,
    consent_id: &str,
) -> Result<u64, CustodianError> {
    use entities::audit_log::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::ConsentId.eq(consent_id))
        .count(db)
        .await?)
}
