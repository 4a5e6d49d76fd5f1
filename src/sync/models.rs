//! Resource shapes exchanged with the MeadTools API.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier assigned by the service. Depending on the endpoint it arrives
/// as a number or as a string, and is echoed back the same way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemoteId {
    Int(i64),
    Text(String),
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteId::Int(id) => write!(f, "{id}"),
            RemoteId::Text(id) => f.write_str(id),
        }
    }
}

impl From<i64> for RemoteId {
    fn from(id: i64) -> Self {
        RemoteId::Int(id)
    }
}

impl From<&str> for RemoteId {
    fn from(id: &str) -> Self {
        RemoteId::Text(id.to_string())
    }
}

/// A registered hydrometer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hydrometer {
    pub id: RemoteId,
    #[serde(default)]
    pub device_name: Option<String>,
}

/// A fermentation batch on the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Brew {
    pub id: RemoteId,
    #[serde(default, alias = "brew_name")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    /// Set once the brew has been ended.
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<RemoteId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe_id: Option<RemoteId>,
}

impl Brew {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    /// A brew is open until the service records an end date.
    pub fn is_open(&self) -> bool {
        self.end_date.as_deref().is_none_or(|d| d.trim().is_empty())
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.start_date.as_deref().and_then(parse_timestamp)
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.end_date.as_deref().and_then(parse_timestamp)
    }
}

/// Pick the open brew named `name` that started most recently.
///
/// Brews without a parseable start date rank lowest; among equals the first
/// one listed wins.
pub fn newest_open_brew<'a>(brews: &'a [Brew], name: &str) -> Option<&'a Brew> {
    let mut best: Option<&Brew> = None;
    for brew in brews.iter().filter(|b| b.name() == name && b.is_open()) {
        if best.is_none_or(|b| brew.started_at() > b.started_at()) {
            best = Some(brew);
        }
    }
    best
}

/// Parse RFC 3339, or a naive date/time taken as UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshRequest<'a> {
    pub email: Option<&'a str>,
    pub refresh_token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeviceTokenResponse {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct RegisterHydrometerRequest<'a> {
    pub token: &'a str,
    pub name: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RegisterHydrometerResponse {
    pub id: RemoteId,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum HydrometerList {
    Wrapped { devices: Vec<Hydrometer> },
    Bare(Vec<Hydrometer>),
}

impl HydrometerList {
    pub fn into_devices(self) -> Vec<Hydrometer> {
        match self {
            HydrometerList::Wrapped { devices } | HydrometerList::Bare(devices) => devices,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct RegisterBrewRequest<'a> {
    pub device_id: &'a RemoteId,
    pub brew_name: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct EndBrewRequest<'a> {
    pub device_id: &'a RemoteId,
    pub brew_id: &'a RemoteId,
}

#[derive(Debug, Serialize)]
pub(crate) struct LinkRecipeRequest {
    pub recipe_id: i64,
}

/// One or many brews; brew creation answers with either.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum BrewResponse {
    Many(Vec<Brew>),
    One(Brew),
}

#[derive(Debug, Serialize)]
pub(crate) struct DataPoint<'a> {
    pub token: Option<&'a str>,
    pub name: &'a str,
    pub gravity: f64,
    pub temperature: f64,
    pub temp_units: &'static str,
    pub battery: i32,
}
