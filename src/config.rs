//! The persisted configuration document.
//!
//! Configuration lives in a single JSON file shared with the desktop UI. Key
//! names follow the UI's `data.json` layout, and keys this crate does not know
//! about are carried through unchanged when the document is rewritten.
//!
//! All writes go through [`ConfigStore`], which serializes them: the document
//! is mutated and saved while one async mutex is held, and the file is
//! replaced atomically (write to a temporary sibling, then rename).

use crate::mac_address::MacAddress;
use crate::reading::TemperatureUnit;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// Poll interval used when a session does not configure one.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 120;

/// File name of the configuration document.
pub const CONFIG_FILE_NAME: &str = "data.json";

/// Errors raised while loading, validating or saving configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {field}: {message}")]
    Validation { field: String, message: String },
    #[error("cannot determine a configuration directory for this platform")]
    NoConfigDir,
}

/// How the account authenticates against MeadTools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LoginType {
    /// Email and password, with token refresh.
    #[default]
    MeadTools,
    /// Browser-delegated login that hands back an access token.
    Google,
    /// Do not log in; sessions only log readings locally.
    None,
}

/// The `MTDetails` block: MeadTools account and device identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    #[serde(rename = "MTEmail", default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "MTPassword", default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(rename = "MTUrl", default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(rename = "AccessToken", default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(rename = "RefreshToken", default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(rename = "LoginType", default)]
    pub login_type: LoginType,
    #[serde(rename = "MTDeviceToken", default, skip_serializing_if = "Option::is_none")]
    pub device_token: Option<String>,
    /// URL that starts a browser-delegated login.
    #[serde(rename = "MTGAuth", default, skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AccountConfig {
    pub fn has_password_credentials(&self) -> bool {
        is_set(&self.email) && is_set(&self.password)
    }

    pub fn has_tokens(&self) -> bool {
        is_set(&self.access_token) && is_set(&self.refresh_token)
    }
}

/// Treat empty strings the same as missing values, as the UI writes both.
pub(crate) fn is_set(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

/// Identity of a session: the Pill it listens to and the brew it feeds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub mac: MacAddress,
    pub brew_name: String,
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.brew_name, self.mac)
    }
}

/// One entry of `Sessions`: a Pill monitored for a brew.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(rename = "BrewName")]
    pub brew_name: String,
    #[serde(rename = "Pill Name", default)]
    pub pill_name: String,
    #[serde(rename = "Mac Address")]
    pub mac_address: MacAddress,
    /// Seconds between reports, also the length of each scan window.
    #[serde(
        rename = "Poll Interval",
        default = "default_poll_interval",
        deserialize_with = "lenient_seconds"
    )]
    pub poll_interval_secs: u64,
    #[serde(rename = "Temp in C", default = "celsius_flag::default", with = "celsius_flag")]
    pub temperature_unit: TemperatureUnit,
    /// MeadTools recipe to link the brew to; negative values mean unset.
    #[serde(rename = "MTRecipeId", default, skip_serializing_if = "Option::is_none")]
    pub recipe_id: Option<i64>,
    /// Starting gravity carried over from an earlier run.
    #[serde(rename = "StartSG", default, skip_serializing_if = "Option::is_none")]
    pub starting_gravity: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionConfig {
    pub fn new(brew_name: impl Into<String>, pill_name: impl Into<String>, mac: MacAddress) -> Self {
        SessionConfig {
            brew_name: brew_name.into(),
            pill_name: pill_name.into(),
            mac_address: mac,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            temperature_unit: TemperatureUnit::Celsius,
            recipe_id: None,
            starting_gravity: None,
            extra: Map::new(),
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey {
            mac: self.mac_address,
            brew_name: self.brew_name.clone(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Name the hydrometer is registered under; falls back to the MAC address.
    pub fn display_name(&self) -> String {
        if self.pill_name.trim().is_empty() {
            self.mac_address.to_string()
        } else {
            self.pill_name.clone()
        }
    }

    /// The configured recipe id, if it refers to a recipe.
    pub fn linked_recipe(&self) -> Option<i64> {
        self.recipe_id.filter(|id| *id >= 0)
    }
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

/// Accept `120` as well as `"120"`; the UI has written both.
fn lenient_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(u64),
        Text(String),
    }

    match Seconds::deserialize(deserializer)? {
        Seconds::Number(n) => Ok(n),
        Seconds::Text(text) if text.trim().is_empty() => Ok(DEFAULT_POLL_INTERVAL_SECS),
        Seconds::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid poll interval: {text:?}"))),
    }
}

/// `Temp in C` is stored as a boolean flag.
mod celsius_flag {
    use crate::reading::TemperatureUnit;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn default() -> TemperatureUnit {
        TemperatureUnit::Celsius
    }

    pub fn serialize<S: Serializer>(unit: &TemperatureUnit, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bool(*unit == TemperatureUnit::Celsius)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<TemperatureUnit, D::Error> {
        Ok(if bool::deserialize(deserializer)? {
            TemperatureUnit::Celsius
        } else {
            TemperatureUnit::Fahrenheit
        })
    }
}

/// The whole configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "MTDetails", default)]
    pub account: AccountConfig,
    #[serde(rename = "Sessions", default)]
    pub sessions: Vec<SessionConfig>,
    /// Release name of the build that last wrote this file.
    #[serde(rename = "VNum", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Config {
    /// Parse and validate a JSON document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot: intervals and session uniqueness.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for (i, session) in self.sessions.iter().enumerate() {
            if session.brew_name.trim().is_empty() {
                return Err(ConfigError::Validation {
                    field: format!("Sessions[{i}].BrewName"),
                    message: "must not be empty".into(),
                });
            }
            if session.poll_interval_secs == 0 {
                return Err(ConfigError::Validation {
                    field: format!("Sessions[{i}].Poll Interval"),
                    message: "must be at least one second".into(),
                });
            }
            if !seen.insert(session.key()) {
                return Err(ConfigError::Validation {
                    field: format!("Sessions[{i}]"),
                    message: format!("duplicate session {}", session.key()),
                });
            }
        }
        Ok(())
    }

    pub fn session(&self, key: &SessionKey) -> Option<&SessionConfig> {
        self.sessions.iter().find(|s| s.key() == *key)
    }

    pub fn session_mut(&mut self, key: &SessionKey) -> Option<&mut SessionConfig> {
        self.sessions.iter_mut().find(|s| s.key() == *key)
    }
}

/// Default location of the configuration document for this platform.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    directories::ProjectDirs::from("", "", "pill-sync")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
        .ok_or(ConfigError::NoConfigDir)
}

/// Shared handle to the configuration document with single-writer saves.
///
/// Cloning the store is cheap; every clone sees the same document.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    path: Option<PathBuf>,
    document: Mutex<Config>,
}

impl ConfigStore {
    /// Load the document at `path`.
    ///
    /// # Errors
    /// Returns [`ConfigError::NotFound`] if the file does not exist, or a read,
    /// parse or validation error.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = Config::from_json(&text)?;
        tracing::debug!(path = %path.display(), sessions = config.sessions.len(), "loaded configuration");

        Ok(Self::with_document(Some(path), config))
    }

    /// A store that is never written to disk.
    pub fn in_memory(config: Config) -> Self {
        Self::with_document(None, config)
    }

    fn with_document(path: Option<PathBuf>, config: Config) -> Self {
        ConfigStore {
            inner: Arc::new(StoreInner {
                path,
                document: Mutex::new(config),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// A copy of the current document.
    pub async fn snapshot(&self) -> Config {
        self.inner.document.lock().await.clone()
    }

    pub async fn account(&self) -> AccountConfig {
        self.inner.document.lock().await.account.clone()
    }

    pub async fn sessions(&self) -> Vec<SessionConfig> {
        self.inner.document.lock().await.sessions.clone()
    }

    /// Mutate the document and persist it before releasing the lock.
    ///
    /// The in-memory document keeps the mutation even if saving fails.
    pub async fn update<F, R>(&self, mutate: F) -> Result<R, ConfigError>
    where
        F: FnOnce(&mut Config) -> R,
    {
        let mut document = self.inner.document.lock().await;
        let result = mutate(&mut document);
        if let Some(path) = &self.inner.path {
            write_document(path, &document).await?;
            tracing::debug!(path = %path.display(), "saved configuration");
        }
        Ok(result)
    }
}

async fn write_document(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let text = serde_json::to_string_pretty(config)?;
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, text).await.map_err(write_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(write_err)?;
    Ok(())
}
