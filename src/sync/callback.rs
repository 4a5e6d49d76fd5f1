//! Browser-delegated login.
//!
//! The service's browser login finishes by redirecting to a local URL with the
//! access token in the `token` query parameter. [`RedirectListener`] serves
//! HTTP on `localhost` until one such redirect arrives.

use super::SyncError;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Port the login redirect points at by default.
pub const DEFAULT_CALLBACK_PORT: u16 = 8080;

/// How long open browser connections get to close once the token arrived.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const COMPLETED_PAGE: &str =
    "<h1>MeadTools login completed<br>You can close this window now.</h1>";

/// Boxed future returned by [`BrowserAuth::wait_for_token`].
pub type TokenFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Option<String>, SyncError>> + Send + 'a>>;

/// Something that can walk the user through a browser login.
pub trait BrowserAuth: Send + Sync {
    /// Send the user to `auth_url` and wait for the redirect.
    ///
    /// Resolves to `None` if the redirect carried no token.
    fn wait_for_token<'a>(&'a self, auth_url: &'a str) -> TokenFuture<'a>;
}

/// Serves the login redirect on `localhost`.
#[derive(Debug, Clone, Copy)]
pub struct RedirectListener {
    port: u16,
}

impl RedirectListener {
    pub fn new(port: u16) -> Self {
        RedirectListener { port }
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Default for RedirectListener {
    fn default() -> Self {
        Self::new(DEFAULT_CALLBACK_PORT)
    }
}

impl BrowserAuth for RedirectListener {
    fn wait_for_token<'a>(&'a self, auth_url: &'a str) -> TokenFuture<'a> {
        Box::pin(async move {
            let listener = TcpListener::bind(("127.0.0.1", self.port))
                .await
                .map_err(|e| SyncError::Callback(format!("cannot listen on port {}: {e}", self.port)))?;

            tracing::info!(url = auth_url, "open this URL in a browser to log into MeadTools");
            tracing::info!(port = self.port, "waiting for login redirect on http://localhost:{}", self.port);
            accept_token(listener).await
        })
    }
}

/// Sender for the first redirect, taken by whichever request gets there first.
type TokenSlot = Arc<Mutex<Option<oneshot::Sender<Option<String>>>>>;

/// Serve HTTP on `listener` until a redirect arrives and return its `token`
/// query parameter.
///
/// Browsers may open spare connections or ask for a favicon first; those
/// never complete the login.
pub async fn accept_token(listener: TcpListener) -> Result<Option<String>, SyncError> {
    let (token_tx, token_rx) = oneshot::channel();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let slot: TokenSlot = Arc::new(Mutex::new(Some(token_tx)));

    let router = Router::new()
        .route("/favicon.ico", get(|| async { StatusCode::NOT_FOUND }))
        .fallback(receive_token)
        .with_state(slot);

    let mut server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = stop_rx.await;
            })
            .await
    });

    let token = token_rx.await;
    let _ = stop_tx.send(());

    match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
        Ok(Ok(Err(e))) => tracing::debug!(error = %e, "login redirect server failed"),
        Ok(_) => {}
        Err(_) => {
            tracing::debug!("login redirect server did not drain in time");
            server.abort();
        }
    }

    token.map_err(|_| SyncError::Callback("login redirect server stopped".into()))
}

async fn receive_token(
    State(slot): State<TokenSlot>,
    Query(params): Query<HashMap<String, String>>,
) -> Html<&'static str> {
    let token = params.get("token").filter(|token| !token.is_empty()).cloned();
    if let Ok(mut slot) = slot.lock()
        && let Some(tx) = slot.take()
    {
        let _ = tx.send(token);
    }
    Html(COMPLETED_PAGE)
}
