//! Client for the MeadTools brew-tracking REST service.
//!
//! [`SyncClient`] owns the account's runtime state (access token, logged-in
//! flag, device token) and caches of the remote hydrometer and brew lists.
//! Credentials and tokens are persisted through the shared [`ConfigStore`].
//!
//! Recoverable failures (login, list fetches, uploads) are logged and
//! reported as `false`. Failures that leave an operation unable to proceed
//! are returned as [`SyncError`].

mod auth;
pub mod callback;
pub mod models;
mod resources;

pub use auth::AuthMode;
pub use callback::{BrowserAuth, RedirectListener, accept_token};
pub use models::{Brew, Hydrometer, RemoteId};

use crate::config::{ConfigError, ConfigStore};
use crate::observer::Observer;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard, RwLock};

/// Default bound on a single HTTP request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on waiting for a browser login to hand back a token.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const LOGIN_PATH: &str = "/auth/login";
const REFRESH_PATH: &str = "/auth/refresh";
const HYDROMETER_PATH: &str = "/hydrometer";
const DATA_POINT_PATH: &str = "/hydrometer/rapt-pill";
const REGISTER_HYDROMETER_PATH: &str = "/hydrometer/rapt-pill/register";
const DEVICE_TOKEN_PATH: &str = "/hydrometer/token";
const BREW_PATH: &str = "/hydrometer/brew";

/// Failure of a single API call.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("service answered {0}")]
    Status(StatusCode),
    #[error("unexpected response body: {0}")]
    Decode(#[source] reqwest::Error),
    #[error("service answered without the expected {0}")]
    Empty(&'static str),
}

/// Errors returned by sync operations that cannot fall back to `false`.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("no usable MeadTools credentials configured")]
    MissingCredentials,
    #[error("MeadTools base URL is not configured")]
    MissingBaseUrl,
    #[error("invalid MeadTools base URL {url:?}: {source}")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("timed out after {0:?} waiting for browser login")]
    AuthTimeout(Duration),
    #[error("browser login failed: {0}")]
    Callback(String),
    #[error("could not generate a device token: {0}")]
    DeviceToken(#[source] ApiError),
    #[error("could not register {entity}: {source}")]
    Registration {
        entity: String,
        #[source]
        source: ApiError,
    },
    #[error("could not link brew {brew_id} to recipe {recipe_id}: {source}")]
    RecipeLink {
        brew_id: RemoteId,
        recipe_id: i64,
        #[source]
        source: ApiError,
    },
    #[error("{0} is not set")]
    MissingIdentifier(&'static str),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Tunables for [`SyncClient`].
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub request_timeout: Duration,
    pub auth_timeout: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
        }
    }
}

#[derive(Debug, Default)]
struct AuthState {
    access_token: Option<String>,
    logged_in: bool,
    device_token: Option<String>,
}

#[derive(Debug, Default)]
struct RemoteCache {
    hydrometers: Vec<Hydrometer>,
    brews: Vec<Brew>,
}

pub struct SyncClient {
    http: reqwest::Client,
    base_url: String,
    store: ConfigStore,
    observer: Arc<dyn Observer>,
    browser: Option<Arc<dyn BrowserAuth>>,
    options: SyncOptions,
    auth: RwLock<AuthState>,
    cache: RwLock<RemoteCache>,
    registration: Mutex<()>,
}

impl fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncClient")
            .field("base_url", &self.base_url)
            .field("options", &self.options)
            .field("browser", &self.browser.is_some())
            .finish_non_exhaustive()
    }
}

impl SyncClient {
    /// Create a client for the account stored in `store`.
    ///
    /// # Errors
    /// Fails if the account has no usable base URL or the HTTP client cannot
    /// be built.
    pub async fn new(
        store: ConfigStore,
        observer: Arc<dyn Observer>,
        options: SyncOptions,
    ) -> Result<Self, SyncError> {
        let account = store.account().await;
        let base_url = normalize_base_url(account.base_url.as_deref())?;

        let http = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(SyncError::Client)?;

        let auth = AuthState {
            access_token: non_empty(account.access_token),
            logged_in: false,
            device_token: non_empty(account.device_token),
        };

        Ok(SyncClient {
            http,
            base_url,
            store,
            observer,
            browser: None,
            options,
            auth: RwLock::new(auth),
            cache: RwLock::new(RemoteCache::default()),
            registration: Mutex::new(()),
        })
    }

    /// Use `browser` to complete browser-delegated logins.
    pub fn with_browser(mut self, browser: Arc<dyn BrowserAuth>) -> Self {
        self.browser = Some(browser);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn is_logged_in(&self) -> bool {
        self.auth.read().await.logged_in
    }

    pub async fn device_token(&self) -> Option<String> {
        self.auth.read().await.device_token.clone()
    }

    pub async fn hydrometers(&self) -> Vec<Hydrometer> {
        self.cache.read().await.hydrometers.clone()
    }

    pub async fn brews(&self) -> Vec<Brew> {
        self.cache.read().await.brews.clone()
    }

    /// Held by a session for its whole find-or-create sequence.
    pub async fn registration_lock(&self) -> MutexGuard<'_, ()> {
        self.registration.lock().await
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Attach the bearer token, if there is one.
    async fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth.read().await.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request.send().await.map_err(ApiError::Transport)?;
        match response.status() {
            StatusCode::OK => Ok(response),
            status => Err(ApiError::Status(status)),
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(ApiError::Decode)
    }
}

fn normalize_base_url(configured: Option<&str>) -> Result<String, SyncError> {
    let Some(url) = configured.map(str::trim).filter(|u| !u.is_empty()) else {
        return Err(SyncError::MissingBaseUrl);
    };
    url::Url::parse(url).map_err(|source| SyncError::InvalidBaseUrl {
        url: url.to_string(),
        source,
    })?;
    Ok(url.trim_end_matches('/').to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
