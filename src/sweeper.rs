use crate::errors::CustodianError;
use crate::storage;
use sea_orm::DatabaseConnection;

/// Moves every active consent whose deadline lies strictly before `now` to
/// `expired`, writing one EXPIRED record per consent.
///
/// Each consent is flipped in its own compare-and-set transaction, so two
/// sweeps racing each other (or a sweep racing a revoke) never double-apply.
/// Returns how many consents this call expired.
pub async fn sweep_expired_consents(
    db: &DatabaseConnection,
    now: i64,
) -> Result<u64, CustodianError> {
    let candidates = storage::find_overdue_consent_ids(db, now).await?;
    if candidates.is_empty() {
        return Ok(0);
    }

    let mut expired = 0u64;
    for consent_id in candidates {
        if storage::expire_consent(db, &consent_id, now).await? {
            tracing::info!(consent_id = %consent_id, "Consent expired");
            expired += 1;
        }
    }

    if expired > 0 {
        tracing::info!(expired, "Swept expired consents");
    }
    Ok(expired)
}
