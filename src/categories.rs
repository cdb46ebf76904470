//! Category-scoped personal data.
//!
//! Each [`DataType`] owns one JSON document per user. The document types
//! below double as the projection released to a requester: every field is
//! serialized, with `null` standing in for "absent", so keys are never
//! omitted. Stored documents may carry extra keys (seeded data, older
//! versions); they are dropped when the typed document is rebuilt.
use crate::consent::DataType;
use crate::errors::CustodianError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How many visited pages are kept and released.
pub const MAX_RECENT_WEBSITES: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersonalInfo {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<String>,
    pub address: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocationData {
    pub current_location: Option<GeoPoint>,
    pub home_address: Option<String>,
    /// Capture time in Unix milliseconds, as reported by the client
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrowserData {
    pub user_agent: Option<String>,
    pub language: Option<String>,
    pub platform: Option<String>,
    pub cookies_enabled: Option<bool>,
    pub screen_size: Option<ScreenSize>,
    pub timezone: Option<String>,
    /// Most recent first
    pub recent_websites: Vec<String>,
}

/// Location captured by the granter's client at accept time.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPayload {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: Option<i64>,
}

/// Browser environment captured by the granter's client at accept time.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrowserPayload {
    pub user_agent: Option<String>,
    pub language: Option<String>,
    pub platform: Option<String>,
    pub cookies_enabled: Option<bool>,
    pub screen_size: Option<ScreenSize>,
    pub timezone: Option<String>,
}

/// Optional data the granter hands over together with an accept.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AcceptPayload {
    pub location_data: Option<LocationPayload>,
    pub browser_data: Option<BrowserPayload>,
    /// Most recent first; only the first five are kept
    pub visited_pages: Option<Vec<String>>,
}

impl PersonalInfo {
    /// Empty names count as missing.
    pub fn validate_for_registration(&self) -> Result<(), CustodianError> {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        if !present(&self.first_name) || !present(&self.last_name) {
            return Err(CustodianError::InvalidInput(
                "First name and last name are required".to_string(),
            ));
        }
        Ok(())
    }
}

impl LocationData {
    fn merge(&mut self, payload: &LocationPayload) {
        self.current_location = Some(GeoPoint {
            latitude: payload.latitude,
            longitude: payload.longitude,
        });
        self.timestamp = payload.timestamp;
    }
}

impl BrowserData {
    fn merge(&mut self, payload: &BrowserPayload, visited: Option<&[String]>) {
        self.user_agent = payload.user_agent.clone();
        self.language = payload.language.clone();
        self.platform = payload.platform.clone();
        self.cookies_enabled = payload.cookies_enabled;
        self.screen_size = payload.screen_size;
        self.timezone = payload.timezone.clone();
        if let Some(pages) = visited {
            self.recent_websites = pages.iter().take(MAX_RECENT_WEBSITES).cloned().collect();
        }
    }
}

/// Rebuilds the typed document for `data_type` from whatever is stored and
/// serializes it back: the filtered projection a requester may see.
pub fn project(data_type: DataType, stored: Option<Value>) -> Result<Value, CustodianError> {
    let stored = stored.unwrap_or(Value::Null);
    let projected = match data_type {
        DataType::PersonalInfo => serde_json::to_value(decode::<PersonalInfo>(stored)?)?,
        DataType::LocationData => serde_json::to_value(decode::<LocationData>(stored)?)?,
        DataType::BrowserData => {
            let mut doc = decode::<BrowserData>(stored)?;
            doc.recent_websites.truncate(MAX_RECENT_WEBSITES);
            serde_json::to_value(doc)?
        }
    };
    Ok(projected)
}

/// Folds accept-time payload into the stored document for `data_type`.
/// Returns `None` when the payload has nothing for that category.
pub fn merge(
    data_type: DataType,
    stored: Option<Value>,
    payload: &AcceptPayload,
) -> Result<Option<Value>, CustodianError> {
    let stored = stored.unwrap_or(Value::Null);
    let merged = match data_type {
        DataType::PersonalInfo => None,
        DataType::LocationData => match &payload.location_data {
            Some(location) => {
                let mut doc = decode::<LocationData>(stored)?;
                doc.merge(location);
                Some(serde_json::to_value(doc)?)
            }
            None => None,
        },
        DataType::BrowserData => match &payload.browser_data {
            Some(browser) => {
                let mut doc = decode::<BrowserData>(stored)?;
                doc.merge(browser, payload.visited_pages.as_deref());
                Some(serde_json::to_value(doc)?)
            }
            None => None,
        },
    };
    Ok(merged)
}

fn decode<T: for<'de> Deserialize<'de> + Default>(value: Value) -> Result<T, CustodianError> {
    if value.is_null() {
        return Ok(T::default());
    }
    Ok(serde_json::from_value(value)?)
}
