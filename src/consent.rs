//! Consent domain model and its state machine.
//!
//! ```text
//! pending ──accept──▶ active ──revoke──▶ revoked
//!    │                  │
//!    └──decline──▶ declined   └──expire──▶ expired
//! ```
//!
//! Everything here is pure: no storage, no clock. The service layer supplies
//! `now` and persists what these functions return.
use crate::entities;
use crate::errors::CustodianError;
use chrono::{DateTime, Months, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// The fixed set of personal-data categories a consent can cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataType {
    PersonalInfo,
    LocationData,
    BrowserData,
}

impl DataType {
    pub const ALL: [DataType; 3] = [
        DataType::PersonalInfo,
        DataType::LocationData,
        DataType::BrowserData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::PersonalInfo => "personal-info",
            DataType::LocationData => "location-data",
            DataType::BrowserData => "browser-data",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = CustodianError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataType::ALL
            .into_iter()
            .find(|dt| dt.as_str() == s)
            .ok_or_else(|| CustodianError::InvalidInput(format!("Invalid data type: {}", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentStatus {
    Pending,
    Active,
    Revoked,
    Expired,
    Declined,
}

impl ConsentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentStatus::Pending => "pending",
            ConsentStatus::Active => "active",
            ConsentStatus::Revoked => "revoked",
            ConsentStatus::Expired => "expired",
            ConsentStatus::Declined => "declined",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConsentStatus::Revoked | ConsentStatus::Expired | ConsentStatus::Declined
        )
    }
}

impl fmt::Display for ConsentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsentStatus {
    type Err = CustodianError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ConsentStatus::Pending),
            "active" => Ok(ConsentStatus::Active),
            "revoked" => Ok(ConsentStatus::Revoked),
            "expired" => Ok(ConsentStatus::Expired),
            "declined" => Ok(ConsentStatus::Declined),
            other => Err(CustodianError::Other(format!(
                "Unknown consent status in store: {}",
                other
            ))),
        }
    }
}

/// Closed set of audit trail actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Requested,
    Granted,
    Declined,
    Revoked,
    Accessed,
    Expired,
    Registered,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Requested => "REQUESTED",
            AuditAction::Granted => "GRANTED",
            AuditAction::Declined => "DECLINED",
            AuditAction::Revoked => "REVOKED",
            AuditAction::Accessed => "ACCESSED",
            AuditAction::Expired => "EXPIRED",
            AuditAction::Registered => "REGISTERED",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = CustodianError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REQUESTED" => Ok(AuditAction::Requested),
            "GRANTED" => Ok(AuditAction::Granted),
            "DECLINED" => Ok(AuditAction::Declined),
            "REVOKED" => Ok(AuditAction::Revoked),
            "ACCESSED" => Ok(AuditAction::Accessed),
            "EXPIRED" => Ok(AuditAction::Expired),
            "REGISTERED" => Ok(AuditAction::Registered),
            other => Err(CustodianError::Other(format!(
                "Unknown audit action in store: {}",
                other
            ))),
        }
    }
}

/// A status change after creation. Creation itself is not a transition:
/// it is the only way into `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Accept,
    Decline,
    Revoke,
    Expire,
}

impl Transition {
    pub fn from_status(&self) -> ConsentStatus {
        match self {
            Transition::Accept | Transition::Decline => ConsentStatus::Pending,
            Transition::Revoke | Transition::Expire => ConsentStatus::Active,
        }
    }

    pub fn to_status(&self) -> ConsentStatus {
        match self {
            Transition::Accept => ConsentStatus::Active,
            Transition::Decline => ConsentStatus::Declined,
            Transition::Revoke => ConsentStatus::Revoked,
            Transition::Expire => ConsentStatus::Expired,
        }
    }

    pub fn audit_action(&self) -> AuditAction {
        match self {
            Transition::Accept => AuditAction::Granted,
            Transition::Decline => AuditAction::Declined,
            Transition::Revoke => AuditAction::Revoked,
            Transition::Expire => AuditAction::Expired,
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            Transition::Accept => "accept",
            Transition::Decline => "decline",
            Transition::Revoke => "revoke",
            Transition::Expire => "expire",
        }
    }
}

/// Preset lifetimes a requester can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentDuration {
    OneMonth,
    SixMonths,
    OneYear,
    TwoYears,
}

impl ConsentDuration {
    /// Unrecognized or missing codes fall back to one year.
    pub fn from_code(code: Option<&str>) -> Self {
        match code {
            Some("1-month") => ConsentDuration::OneMonth,
            Some("6-months") => ConsentDuration::SixMonths,
            Some("2-years") => ConsentDuration::TwoYears,
            _ => ConsentDuration::OneYear,
        }
    }

    fn months(&self) -> u32 {
        match self {
            ConsentDuration::OneMonth => 1,
            ConsentDuration::SixMonths => 6,
            ConsentDuration::OneYear => 12,
            ConsentDuration::TwoYears => 24,
        }
    }

    /// Calendar arithmetic; day-of-month is clamped (Jan 31 + 1 month = Feb 28/29).
    pub fn after(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        start
            .checked_add_months(Months::new(self.months()))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Computes `expiresAt` for a new request.
///
/// An explicit instant wins over a duration code and must be strictly after
/// `now`. Accepts RFC 3339 or a zone-less `YYYY-MM-DDTHH:MM[:SS]`, which is
/// read as UTC.
pub fn resolve_expiration(
    now: DateTime<Utc>,
    explicit: Option<&str>,
    duration: Option<&str>,
) -> Result<DateTime<Utc>, CustodianError> {
    let explicit = explicit.map(str::trim).filter(|s| !s.is_empty());
    let Some(raw) = explicit else {
        return Ok(ConsentDuration::from_code(duration).after(now));
    };

    let at = parse_instant(raw).ok_or_else(|| {
        CustodianError::InvalidInput(format!("Invalid expiration date/time: {}", raw))
    })?;
    if at <= now {
        return Err(CustodianError::InvalidInput(
            "Expiration must be in the future".to_string(),
        ));
    }
    Ok(at)
}

fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Validates a requested category list: non-empty, every entry known.
/// Duplicates collapse.
pub fn parse_data_types<S: AsRef<str>>(raw: &[S]) -> Result<BTreeSet<DataType>, CustodianError> {
    if raw.is_empty() {
        return Err(CustodianError::InvalidInput(
            "At least one data type is required".to_string(),
        ));
    }
    raw.iter().map(|s| s.as_ref().parse()).collect()
}

/// A consent as the rest of the crate sees it; timestamps are Unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Consent {
    pub id: String,
    pub granter: String,
    pub requester: String,
    pub data_types: Vec<DataType>,
    pub purpose: String,
    pub status: ConsentStatus,
    pub created_at: i64,
    pub granted_at: Option<i64>,
    pub expires_at: i64,
    pub updated_at: i64,
}

impl Consent {
    pub fn covers(&self, data_type: DataType) -> bool {
        self.data_types.contains(&data_type)
    }

    /// Active and still inside its window. Exactly at the deadline the
    /// consent no longer releases data, although the sweep (strict `<`)
    /// only flips it one tick later.
    pub fn is_live(&self, now: i64) -> bool {
        self.status == ConsentStatus::Active && self.expires_at > now
    }

    pub fn is_overdue(&self, now: i64) -> bool {
        self.status == ConsentStatus::Active && self.expires_at < now
    }

    pub fn involves(&self, subject: &str) -> bool {
        self.granter == subject || self.requester == subject
    }

    /// Applies a transition in place and touches the timestamps.
    /// Fails with `Conflict` if the current status does not allow it.
    pub fn transition(&mut self, transition: Transition, now: i64) -> Result<(), CustodianError> {
        if self.status != transition.from_status() {
            return Err(CustodianError::Conflict(format!(
                "Cannot {} a consent that is {}",
                transition.verb(),
                self.status
            )));
        }
        self.status = transition.to_status();
        if transition == Transition::Accept {
            self.granted_at = Some(now);
        }
        self.updated_at = now;
        Ok(())
    }

    /// Comma-joined category list, as carried on lifecycle audit records.
    pub fn data_types_label(&self) -> String {
        self.data_types
            .iter()
            .map(DataType::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl TryFrom<entities::consent::Model> for Consent {
    type Error = CustodianError;

    fn try_from(model: entities::consent::Model) -> Result<Self, Self::Error> {
        let raw: Vec<String> = serde_json::from_str(&model.data_types)?;
        let data_types = raw
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<DataType>, _>>()
            .map_err(|_| {
                CustodianError::Other(format!("Corrupt data types on consent {}", model.id))
            })?;

        Ok(Consent {
            status: model.status.parse()?,
            id: model.id,
            granter: model.granter,
            requester: model.requester,
            data_types,
            purpose: model.purpose,
            created_at: model.created_at,
            granted_at: model.granted_at,
            expires_at: model.expires_at,
            updated_at: model.updated_at,
        })
    }
}
