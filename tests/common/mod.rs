//! In-process fake of the MeadTools API for integration tests.

#![allow(dead_code)]

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use pill_sync::config::{AccountConfig, Config, ConfigStore, LoginType, SessionConfig};
use pill_sync::decoder::PACKET_LEN;
use pill_sync::observer::Observer;
use pill_sync::session::{SessionContext, SessionSnapshot};
use pill_sync::sync::{SyncClient, SyncOptions};
use pill_sync::MacAddress;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex, MutexGuard};

pub const EMAIL: &str = "brewer@example.com";
pub const PASSWORD: &str = "hunter2";
pub const ACCESS_TOKEN: &str = "access-login";
pub const REFRESHED_TOKEN: &str = "access-refreshed";
pub const REFRESH_TOKEN: &str = "refresh-ok";
pub const DEVICE_TOKEN: &str = "device-1";
pub const PILL_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// What the fake service has seen and stored.
#[derive(Debug, Default)]
pub struct FakeState {
    /// `METHOD /path` of every request, in order.
    pub requests: Vec<String>,
    pub hydrometers: Vec<Value>,
    pub brews: Vec<Value>,
    pub data_points: Vec<Value>,
    /// Authorization header of every data point upload.
    pub data_point_auth: Vec<Option<String>>,
    pub fail_device_token: bool,
    pub fail_hydrometer_list: bool,
    pub fail_data_points: bool,
    next_id: i64,
}

impl FakeState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn record(&mut self, request: &str) {
        self.requests.push(request.to_string());
    }

    pub fn add_brew(&mut self, name: &str, start_date: &str, end_date: Option<&str>) -> i64 {
        let id = self.next_id();
        self.brews.push(json!({
            "id": id,
            "name": name,
            "start_date": start_date,
            "end_date": end_date,
        }));
        id
    }

    pub fn add_hydrometer(&mut self, name: &str) -> i64 {
        let id = self.next_id();
        self.hydrometers.push(json!({ "id": id, "device_name": name }));
        id
    }
}

type Shared = Arc<Mutex<FakeState>>;

pub struct FakeMeadTools {
    pub base_url: String,
    state: Shared,
}

impl FakeMeadTools {
    /// Serve the fake API on an ephemeral localhost port.
    pub async fn start() -> Self {
        let state: Shared = Arc::default();
        let api = Router::new()
            .route("/auth/login", post(login))
            .route("/auth/refresh", post(refresh))
            .route("/hydrometer", get(list_hydrometers))
            .route("/hydrometer/token", post(device_token))
            .route("/hydrometer/rapt-pill", post(data_point))
            .route("/hydrometer/rapt-pill/register", post(register_hydrometer))
            .route(
                "/hydrometer/brew",
                get(list_brews).post(create_brew).patch(end_brew),
            )
            .route("/hydrometer/brew/{id}", patch(link_recipe).delete(delete_brew))
            .with_state(state.clone());
        let router = Router::new().nest("/api", api);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        FakeMeadTools {
            base_url: format!("http://{addr}/api"),
            state,
        }
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn requests(&self) -> Vec<String> {
        self.state().requests.clone()
    }

    /// Password account pointed at this service.
    pub fn account(&self) -> AccountConfig {
        AccountConfig {
            email: Some(EMAIL.into()),
            password: Some(PASSWORD.into()),
            base_url: Some(self.base_url.clone()),
            login_type: LoginType::MeadTools,
            ..Default::default()
        }
    }

    /// A logged-in client over an in-memory store holding `account` and `sessions`.
    pub async fn client(
        &self,
        account: AccountConfig,
        sessions: Vec<SessionConfig>,
    ) -> (Arc<SyncClient>, ConfigStore, Arc<RecordingObserver>) {
        let store = ConfigStore::in_memory(Config {
            account,
            sessions,
            ..Default::default()
        });
        let observer = Arc::new(RecordingObserver::default());
        let client = SyncClient::new(store.clone(), observer.clone(), SyncOptions::default())
            .await
            .unwrap();
        (Arc::new(client), store, observer)
    }

    pub async fn logged_in_context(
        &self,
        sessions: Vec<SessionConfig>,
    ) -> (SessionContext, Arc<RecordingObserver>) {
        let (sync, store, observer) = self.client(self.account(), sessions).await;
        assert!(sync.handle_login().await.unwrap());
        let context = SessionContext {
            sync: Some(sync),
            store,
            observer: observer.clone(),
        };
        (context, observer)
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn is_authorized(headers: &HeaderMap) -> bool {
    bearer(headers).is_some_and(|v| {
        v == format!("Bearer {ACCESS_TOKEN}") || v == format!("Bearer {REFRESHED_TOKEN}")
    })
}

async fn login(State(state): State<Shared>, Json(body): Json<Value>) -> Result<Json<Value>, StatusCode> {
    state.lock().unwrap().record("POST /auth/login");
    if body["email"] == EMAIL && body["password"] == PASSWORD {
        Ok(Json(json!({ "accessToken": ACCESS_TOKEN, "refreshToken": REFRESH_TOKEN })))
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

async fn refresh(State(state): State<Shared>, Json(body): Json<Value>) -> Result<Json<Value>, StatusCode> {
    state.lock().unwrap().record("POST /auth/refresh");
    if body["refreshToken"] == REFRESH_TOKEN {
        Ok(Json(json!({ "accessToken": REFRESHED_TOKEN })))
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

async fn list_hydrometers(
    State(state): State<Shared>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    let mut state = state.lock().unwrap();
    state.record("GET /hydrometer");
    if !is_authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    if state.fail_hydrometer_list {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    Ok(Json(json!({ "devices": state.hydrometers })))
}

async fn device_token(
    State(state): State<Shared>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    let mut state = state.lock().unwrap();
    state.record("POST /hydrometer/token");
    if !is_authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    if state.fail_device_token {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    Ok(Json(json!({ "token": DEVICE_TOKEN })))
}

async fn register_hydrometer(
    State(state): State<Shared>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    let mut state = state.lock().unwrap();
    state.record("POST /hydrometer/rapt-pill/register");
    if body["token"] != DEVICE_TOKEN {
        return Err(StatusCode::FORBIDDEN);
    }
    let name = body["name"].as_str().ok_or(StatusCode::BAD_REQUEST)?;
    let id = state.add_hydrometer(name);
    Ok(Json(json!({ "id": id })))
}

async fn data_point(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    let mut state = state.lock().unwrap();
    state.record("POST /hydrometer/rapt-pill");
    if state.fail_data_points {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    state.data_point_auth.push(bearer(&headers));
    state.data_points.push(body);
    StatusCode::OK
}

async fn list_brews(
    State(state): State<Shared>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    let mut state = state.lock().unwrap();
    state.record("GET /hydrometer/brew");
    if !is_authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(Json(Value::Array(state.brews.clone())))
}

async fn create_brew(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    let mut state = state.lock().unwrap();
    state.record("POST /hydrometer/brew");
    if !is_authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let name = body["brew_name"].as_str().ok_or(StatusCode::BAD_REQUEST)?;
    let id = state.add_brew(name, "2026-10-18T12:00:00Z", None);
    if let Some(brew) = state.brews.iter_mut().find(|b| b["id"] == id) {
        brew["device_id"] = body["device_id"].clone();
    }
    // the service answers with the account's whole brew list
    Ok(Json(Value::Array(state.brews.clone())))
}

async fn end_brew(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    let mut state = state.lock().unwrap();
    state.record("PATCH /hydrometer/brew");
    if !is_authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let brew = state
        .brews
        .iter_mut()
        .find(|b| b["id"] == body["brew_id"])
        .ok_or(StatusCode::NOT_FOUND)?;
    brew["end_date"] = json!("2026-10-20T08:00:00Z");
    Ok(Json(brew.clone()))
}

async fn link_recipe(
    State(state): State<Shared>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    let mut state = state.lock().unwrap();
    state.record(&format!("PATCH /hydrometer/brew/{id}"));
    if !is_authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let brew = state
        .brews
        .iter_mut()
        .find(|b| b["id"] == id)
        .ok_or(StatusCode::NOT_FOUND)?;
    brew["recipe_id"] = body["recipe_id"].clone();
    Ok(Json(brew.clone()))
}

async fn delete_brew(
    State(state): State<Shared>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> StatusCode {
    let mut state = state.lock().unwrap();
    state.record(&format!("DELETE /hydrometer/brew/{id}"));
    if !is_authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    let before = state.brews.len();
    state.brews.retain(|b| b["id"] != id);
    if state.brews.len() < before {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

/// Observer that records every notification.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    logins: Mutex<Vec<bool>>,
    statuses: Mutex<Vec<String>>,
    reports: Mutex<Vec<SessionSnapshot>>,
}

impl RecordingObserver {
    pub fn logins(&self) -> Vec<bool> {
        self.logins.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn reports(&self) -> Vec<SessionSnapshot> {
        self.reports.lock().unwrap().clone()
    }
}

impl Observer for RecordingObserver {
    fn on_login_state_changed(&self, logged_in: bool) {
        self.logins.lock().unwrap().push(logged_in);
    }

    fn on_status(&self, message: &str) {
        self.statuses.lock().unwrap().push(message.to_string());
    }

    fn on_data_point_reported(&self, snapshot: &SessionSnapshot) {
        self.reports.lock().unwrap().push(snapshot.clone());
    }
}

/// Session "Traditional" listening to the Pill named "Pill 1".
pub fn pill_session() -> SessionConfig {
    SessionConfig::new("Traditional", "Pill 1", PILL_MAC)
}

/// Version 1 payload for [`PILL_MAC`] carrying `gravity` (raw, SG x 1000).
pub fn v1_packet(gravity: f32) -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    packet[0..2].copy_from_slice(b"PT");
    packet[2] = 1;
    packet[3..9].copy_from_slice(&PILL_MAC.0);
    packet[9..11].copy_from_slice(&37504u16.to_be_bytes());
    packet[11..15].copy_from_slice(&gravity.to_be_bytes());
    packet[19..21].copy_from_slice(&16i16.to_be_bytes());
    packet[21..23].copy_from_slice(&25600i16.to_be_bytes());
    packet
}
