use super::models::{LoginRequest, RefreshRequest, TokenResponse};
use super::{LOGIN_PATH, REFRESH_PATH, SyncClient, SyncError, non_empty};
use crate::config::{AccountConfig, LoginType};

/// How [`SyncClient::handle_login`] authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Email and password against `/auth/login`.
    Password,
    /// Stored refresh token against `/auth/refresh`, falling back to password.
    Refresh,
    /// Token handed back by a browser login.
    External,
}

impl AuthMode {
    /// Choose the login path for `account`.
    ///
    /// Returns `Ok(None)` when logins are disabled for the account.
    ///
    /// # Errors
    /// [`SyncError::MissingCredentials`] when a MeadTools login has neither
    /// stored tokens nor an email and password.
    pub fn select(account: &AccountConfig) -> Result<Option<AuthMode>, SyncError> {
        match account.login_type {
            LoginType::None => Ok(None),
            LoginType::Google => Ok(Some(AuthMode::External)),
            LoginType::MeadTools if account.has_tokens() => Ok(Some(AuthMode::Refresh)),
            LoginType::MeadTools if account.has_password_credentials() => Ok(Some(AuthMode::Password)),
            LoginType::MeadTools => Err(SyncError::MissingCredentials),
        }
    }
}

impl SyncClient {
    /// Log in with whatever the account is configured for.
    ///
    /// The observer is told the resulting login state whether or not this
    /// succeeds.
    pub async fn handle_login(&self) -> Result<bool, SyncError> {
        let account = self.store.account().await;
        let result = match AuthMode::select(&account) {
            Ok(None) => {
                tracing::info!("MeadTools login disabled");
                Ok(false)
            }
            Ok(Some(AuthMode::Password)) => Ok(self.login().await),
            Ok(Some(AuthMode::Refresh)) => Ok(self.refresh_login().await),
            Ok(Some(AuthMode::External)) => self.external_login().await,
            Err(e) => Err(e),
        };

        if result.is_err() {
            self.auth.write().await.logged_in = false;
        }
        self.observer.on_login_state_changed(self.is_logged_in().await);
        result
    }

    /// Password login. Stores and persists both tokens on success.
    pub async fn login(&self) -> bool {
        let account = self.store.account().await;
        let (Some(email), Some(password)) = (
            non_empty(account.email),
            non_empty(account.password),
        ) else {
            tracing::warn!("cannot log in: email or password not configured");
            self.auth.write().await.logged_in = false;
            return false;
        };

        tracing::info!("logging into MeadTools");
        let body = LoginRequest {
            email: &email,
            password: &password,
        };
        let request = self.http.post(self.endpoint(LOGIN_PATH)).json(&body);

        match self.send_json::<TokenResponse>(request).await {
            Ok(tokens) => {
                self.accept_tokens(tokens).await;
                tracing::info!("logged into MeadTools");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "MeadTools login failed");
                self.auth.write().await.logged_in = false;
                false
            }
        }
    }

    /// Exchange the stored refresh token for a new access token.
    ///
    /// Falls back to a password login when the refresh is rejected and
    /// credentials are configured.
    pub async fn refresh_login(&self) -> bool {
        let account = self.store.account().await;
        let body = RefreshRequest {
            email: account.email.as_deref(),
            refresh_token: account.refresh_token.as_deref(),
        };
        tracing::info!("refreshing MeadTools login");
        let request = self.http.post(self.endpoint(REFRESH_PATH)).json(&body);

        match self.send_json::<TokenResponse>(request).await {
            Ok(tokens) => {
                self.accept_tokens(tokens).await;
                tracing::info!("refreshed MeadTools login");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "MeadTools token refresh failed");
                self.auth.write().await.logged_in = false;
                if account.has_password_credentials() {
                    tracing::info!("falling back to password login");
                    self.login().await
                } else {
                    false
                }
            }
        }
    }

    async fn external_login(&self) -> Result<bool, SyncError> {
        let account = self.store.account().await;

        let Some(browser) = &self.browser else {
            let token = non_empty(account.access_token).ok_or(SyncError::MissingCredentials)?;
            tracing::info!("using stored access token for browser login");
            let mut auth = self.auth.write().await;
            auth.access_token = Some(token);
            auth.logged_in = true;
            return Ok(true);
        };

        let auth_url = non_empty(account.auth_url).ok_or(SyncError::MissingCredentials)?;
        let timeout = self.options.auth_timeout;
        let token = tokio::time::timeout(timeout, browser.wait_for_token(&auth_url))
            .await
            .map_err(|_| SyncError::AuthTimeout(timeout))??;

        let Some(token) = non_empty(token) else {
            tracing::warn!("browser login returned no token");
            self.auth.write().await.logged_in = false;
            return Ok(false);
        };

        {
            let mut auth = self.auth.write().await;
            auth.access_token = Some(token.clone());
            auth.logged_in = true;
        }
        self.store
            .update(|config| config.account.access_token = Some(token))
            .await?;
        Ok(true)
    }

    /// Take tokens from a login or refresh response.
    async fn accept_tokens(&self, tokens: TokenResponse) {
        let TokenResponse {
            access_token,
            refresh_token,
        } = tokens;

        {
            let mut auth = self.auth.write().await;
            auth.access_token = Some(access_token.clone());
            auth.logged_in = true;
        }

        let saved = self
            .store
            .update(|config| {
                config.account.access_token = Some(access_token);
                if let Some(refresh_token) = refresh_token {
                    config.account.refresh_token = Some(refresh_token);
                }
            })
            .await;
        if let Err(e) = saved {
            tracing::warn!(error = %e, "failed to save MeadTools tokens");
        }
    }
}
