//! Releases a granter's data to a requester, but only under a live consent
//! and only once the release itself is on the audit trail.
use crate::audit::{NewAuditRecord, Provenance};
use crate::auth::Caller;
use crate::categories;
use crate::consent::{AuditAction, DataType};
use crate::errors::CustodianError;
use crate::{storage, sweeper};
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRelease {
    pub consent_id: String,
    pub data_type: DataType,
    pub data: Value,
}

/// Returns the filtered projection of `granter`'s `data_type` document.
///
/// Unknown categories fail with `InvalidInput` and no consent without a live
/// match fails with `Forbidden`; neither writes anything. On success the
/// ACCESSED record is committed before the projection is handed back.
pub async fn request_data(
    db: &DatabaseConnection,
    caller: &Caller,
    granter: &str,
    data_type: &str,
    provenance: &Provenance,
    now: i64,
) -> Result<DataRelease, CustodianError> {
    let data_type: DataType = data_type.parse()?;

    sweeper::sweep_expired_consents(db, now).await?;

    let denied = || {
        tracing::warn!(
            granter = %granter,
            requester = %caller.subject,
            data_type = %data_type,
            "Data access denied: no active consent"
        );
        CustodianError::Forbidden("No active consent for this data access".to_string())
    };

    let consent = storage::find_live_consent(db, granter, &caller.subject, data_type, now)
        .await?
        .ok_or_else(denied)?;

    let audit = NewAuditRecord {
        action: AuditAction::Accessed,
        owner: consent.granter.clone(),
        counterparty: consent.requester.clone(),
        consent_id: Some(consent.id.clone()),
        data_type: Some(data_type.as_str().to_string()),
        purpose: Some(consent.purpose.clone()),
        provenance: provenance.clone(),
    };

    // Append first, then re-check under the write lock: a revoke that slipped
    // in after the lookup above rolls the record back and denies.
    let txn = db.begin().await?;
    storage::insert_audit(&txn, &audit, now).await?;

    let still_live = storage::find_live_consent(&txn, granter, &caller.subject, data_type, now)
        .await?
        .is_some_and(|c| c.id == consent.id);
    if !still_live {
        return Err(denied());
    }

    let stored = storage::get_attribute(&txn, granter, data_type).await?;
    let data = categories::project(data_type, stored)?;
    txn.commit().await?;

    tracing::info!(
        consent_id = %consent.id,
        granter = %granter,
        requester = %caller.subject,
        data_type = %data_type,
        "Data released"
    );

    Ok(DataRelease {
        consent_id: consent.id,
        data_type,
        data,
    })
}
