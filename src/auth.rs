use crate::audit::Provenance;
use crate::errors::CustodianError;
use crate::storage;
use axum::http::{header, HeaderMap};
use sea_orm::DatabaseConnection;

/// The authenticated identity behind a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    pub subject: String,
    pub is_admin: bool,
}

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolves the bearer token to a caller. Missing, unknown, revoked and
/// expired tokens all look the same from outside.
pub async fn authenticate(
    db: &DatabaseConnection,
    headers: &HeaderMap,
    now: i64,
) -> Result<Caller, CustodianError> {
    let token = bearer_token(headers)
        .ok_or_else(|| CustodianError::Unauthorized("Bearer token required".to_string()))?;

    let token_row = storage::get_access_token(db, &token, now)
        .await?
        .ok_or_else(|| CustodianError::Unauthorized("Invalid or expired token".to_string()))?;

    let user = storage::get_user_by_subject(db, &token_row.subject)
        .await?
        .filter(|u| u.enabled == 1)
        .ok_or_else(|| CustodianError::Unauthorized("Invalid or expired token".to_string()))?;

    Ok(Caller {
        subject: user.subject,
        is_admin: user.is_admin == 1,
    })
}

/// First hop of `X-Forwarded-For`, else `X-Real-IP`; client string from
/// `User-Agent`.
pub fn provenance(headers: &HeaderMap) -> Provenance {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let ip_address = header_str("x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
        .or_else(|| header_str("x-real-ip"));

    Provenance {
        ip_address,
        user_agent: header_str(header::USER_AGENT.as_str()),
    }
}
