//! Append-only audit trail and its two read shapes.
//!
//! Records are written by the store inside the same transaction as the
//! change they describe (see `storage::insert_audit`); this module owns the
//! record types and the caller-facing queries.
use crate::auth::Caller;
use crate::consent::{AuditAction, Consent};
use crate::errors::CustodianError;
use crate::storage::{self, AuditLog, ConsentStats, Party};
use crate::sweeper;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::collections::BTreeSet;

/// Where a request came from, as far as the transport can tell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// An audit record before it is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditRecord {
    pub action: AuditAction,
    /// The data owner
    pub owner: String,
    pub counterparty: String,
    pub consent_id: Option<String>,
    pub data_type: Option<String>,
    pub purpose: Option<String>,
    pub provenance: Provenance,
}

impl NewAuditRecord {
    /// A lifecycle record: owner is the granter, counterparty the requester.
    pub fn for_consent(action: AuditAction, consent: &Consent) -> Self {
        Self {
            action,
            owner: consent.granter.clone(),
            counterparty: consent.requester.clone(),
            consent_id: Some(consent.id.clone()),
            data_type: Some(consent.data_types_label()),
            purpose: Some(consent.purpose.clone()),
            provenance: Provenance::default(),
        }
    }

    pub fn with_provenance(mut self, provenance: &Provenance) -> Self {
        self.provenance = provenance.clone();
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: i64,
    pub action: String,
    pub owner: Party,
    pub counterparty: Party,
    pub consent_id: Option<String>,
    pub data_type: Option<String>,
    pub purpose: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consent_expiration: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MyLogs {
    pub logs: Vec<AuditEntry>,
    pub consent_stats: ConsentStats,
}

/// Records where the caller is owner or counterparty, newest first, plus the
/// caller's consent counts. Overdue consents are swept first so the counts
/// never include stale `active` rows.
pub async fn my_logs(
    db: &DatabaseConnection,
    caller: &Caller,
    page_size: u64,
    now: i64,
) -> Result<MyLogs, CustodianError> {
    sweeper::sweep_expired_consents(db, now).await?;

    let rows = storage::list_audit_logs(db, Some(&caller.subject), page_size).await?;
    let logs = enrich(db, rows).await?;
    let consent_stats = storage::consent_stats(db, &caller.subject).await?;

    Ok(MyLogs {
        logs,
        consent_stats,
    })
}

/// Every record in the system. Administrators only.
pub async fn all_logs(
    db: &DatabaseConnection,
    caller: &Caller,
    page_size: u64,
) -> Result<Vec<AuditEntry>, CustodianError> {
    if !caller.is_admin {
        tracing::warn!(subject = %caller.subject, "Non-admin attempted to list all audit logs");
        return Err(CustodianError::Forbidden(
            "Administrator privileges required".to_string(),
        ));
    }

    let rows = storage::list_audit_logs(db, None, page_size).await?;
    enrich(db, rows).await
}

async fn enrich(
    db: &DatabaseConnection,
    rows: Vec<AuditLog>,
) -> Result<Vec<AuditEntry>, CustodianError> {
    let subjects: BTreeSet<String> = rows
        .iter()
        .flat_map(|r| [r.owner.clone(), r.counterparty.clone()])
        .collect();
    let consent_ids: BTreeSet<String> = rows.iter().filter_map(|r| r.consent_id.clone()).collect();

    let users =
        storage::get_users_by_subjects(db, &subjects.into_iter().collect::<Vec<_>>()).await?;
    let expirations =
        storage::get_consent_expirations(db, &consent_ids.into_iter().collect::<Vec<_>>()).await?;

    let party = |subject: &str| {
        users
            .get(subject)
            .map(Party::from)
            .unwrap_or_else(|| Party::unknown(subject))
    };

    Ok(rows
        .into_iter()
        .map(|row| AuditEntry {
            consent_expiration: row
                .consent_id
                .as_ref()
                .and_then(|id| expirations.get(id).copied()),
            owner: party(&row.owner),
            counterparty: party(&row.counterparty),
            id: row.id,
            action: row.action,
            consent_id: row.consent_id,
            data_type: row.data_type,
            purpose: row.purpose,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            created_at: row.created_at,
        })
        .collect())
}
