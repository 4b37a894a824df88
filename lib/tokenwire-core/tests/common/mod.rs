#![allow(dead_code, missing_docs, clippy::expect_used)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::{Form, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use parking_lot::Mutex;
use rstest::fixture;
use serde_json::json;
use tracing::info;

use tokenwire_core::RestClient;

pub const CLIENT_ID: &str = "test-client";
pub const CLIENT_SECRET: &str = "test-secret";
pub const USERNAME: &str = "+16505550100";
pub const PASSWORD: &str = "secret";
pub const EXTENSION_PATH: &str = "/restapi/v1.0/account/~/extension/~";

pub fn init_tracing() {
    // should be run once, fail otherwise, we skip that error
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();

    info!("Tracing initialized");
}

/// Counters and switches of the mock platform.
#[derive(Debug, Default)]
pub struct Platform {
    pub password_grants: AtomicUsize,
    pub refresh_grants: AtomicUsize,
    pub api_calls: AtomicUsize,
    pub revocations: AtomicUsize,
    pub subscription_creates: AtomicUsize,
    pub subscription_renewals: AtomicUsize,
    pub subscription_removals: AtomicUsize,
    /// Answer 401 to every API call, whatever the token.
    pub reject_all: AtomicBool,
    issued: AtomicUsize,
    tokens: Mutex<Tokens>,
}

#[derive(Debug, Default)]
struct Tokens {
    access: HashSet<String>,
    refresh: HashSet<String>,
}

impl Platform {
    /// Makes `access_token` valid, as if issued earlier.
    pub fn accept(&self, access_token: &str) {
        self.tokens.lock().access.insert(access_token.to_string());
    }

    /// Makes `refresh_token` valid, as if issued earlier.
    pub fn accept_refresh(&self, refresh_token: &str) {
        self.tokens.lock().refresh.insert(refresh_token.to_string());
    }

    /// Expires every issued access token, refresh tokens stay valid.
    pub fn expire_access_tokens(&self) {
        self.tokens.lock().access.clear();
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn issue(&self) -> serde_json::Value {
        let id = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let access_token = format!("access-{id}");
        let refresh_token = format!("refresh-{id}");
        let mut tokens = self.tokens.lock();
        tokens.access.insert(access_token.clone());
        tokens.refresh.insert(refresh_token.clone());
        json!({
            "access_token": access_token,
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": refresh_token,
            "refresh_token_expires_in": 604_800,
            "scope": "ReadAccounts",
            "owner_id": "101"
        })
    }

    fn is_authorized(&self, headers: &HeaderMap) -> bool {
        if self.reject_all.load(Ordering::SeqCst) {
            return false;
        }
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .is_some_and(|token| self.tokens.lock().access.contains(token))
    }
}

/// Mock platform listening on a random local port.
#[derive(Debug)]
pub struct TestPlatform {
    pub url: String,
    pub state: Arc<Platform>,
}

impl TestPlatform {
    pub async fn start() -> anyhow::Result<Self> {
        let state = Arc::new(Platform::default());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("http://{}", listener.local_addr()?);
        let app = router(Arc::clone(&state));
        info!(%url, "launching mock platform");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock platform running");
        });
        Ok(Self { url, state })
    }

    pub fn client(&self) -> RestClient {
        RestClient::builder()
            .with_server_url(&self.url)
            .expect("valid url")
            .with_client_credentials(CLIENT_ID, CLIENT_SECRET)
            .with_app("tokenwire-tests", "1.0.0")
            .build()
            .expect("valid client")
    }

    pub async fn authorized_client(&self) -> RestClient {
        let client = self.client();
        client
            .authorize(USERNAME, "", PASSWORD)
            .await
            .expect("authorized");
        client
    }
}

#[fixture]
pub async fn platform() -> TestPlatform {
    init_tracing();
    match TestPlatform::start().await {
        Ok(platform) => platform,
        Err(error) => {
            panic!("fail to start mock platform: {error:?}");
        }
    }
}

fn router(state: Arc<Platform>) -> Router {
    Router::new()
        .route("/restapi/oauth/token", post(token))
        .route("/restapi/oauth/revoke", post(revoke))
        .route(EXTENSION_PATH, get(extension))
        .route("/restapi/v1.0/failure", get(failure))
        .route("/restapi/v1.0/slow", get(slow))
        .route("/restapi/v1.0/subscription", post(create_subscription))
        .route(
            "/restapi/v1.0/subscription/{id}/renew",
            post(renew_subscription),
        )
        .route("/restapi/v1.0/subscription/{id}", delete(remove_subscription))
        .with_state(state)
}

fn error(status: StatusCode, body: serde_json::Value) -> Response {
    (status, Json(body)).into_response()
}

fn unauthorized() -> Response {
    error(
        StatusCode::UNAUTHORIZED,
        json!({ "errorCode": "TokenInvalid", "message": "Token not found" }),
    )
}

fn has_client_credentials(headers: &HeaderMap) -> bool {
    let expected = format!(
        "Basic {}",
        STANDARD.encode(format!("{CLIENT_ID}:{CLIENT_SECRET}"))
    );
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == expected)
}

async fn token(
    State(state): State<Arc<Platform>>,
    headers: HeaderMap,
    Form(params): Form<HashMap<String, String>>,
) -> Response {
    if !has_client_credentials(&headers) {
        return error(
            StatusCode::UNAUTHORIZED,
            json!({ "error": "invalid_client", "error_description": "Invalid client" }),
        );
    }

    match params.get("grant_type").map(String::as_str) {
        Some("password") => {
            state.password_grants.fetch_add(1, Ordering::SeqCst);
            let valid = params.get("username").map(String::as_str) == Some(USERNAME)
                && params.get("password").map(String::as_str) == Some(PASSWORD);
            if !valid {
                return error(
                    StatusCode::BAD_REQUEST,
                    json!({ "error": "invalid_grant", "error_description": "Invalid resource owner credentials" }),
                );
            }
            Json(state.issue()).into_response()
        }
        Some("refresh_token") => {
            state.refresh_grants.fetch_add(1, Ordering::SeqCst);
            // slow enough for concurrent callers to pile up
            tokio::time::sleep(Duration::from_millis(50)).await;
            let refresh_token = params.get("refresh_token").cloned().unwrap_or_default();
            // refresh tokens are single use
            if !state.tokens.lock().refresh.remove(&refresh_token) {
                return error(
                    StatusCode::BAD_REQUEST,
                    json!({ "error": "invalid_grant", "error_description": "Token not found" }),
                );
            }
            Json(state.issue()).into_response()
        }
        _ => error(
            StatusCode::BAD_REQUEST,
            json!({ "error": "unsupported_grant_type" }),
        ),
    }
}

async fn revoke(
    State(state): State<Arc<Platform>>,
    headers: HeaderMap,
    Form(params): Form<HashMap<String, String>>,
) -> Response {
    if !has_client_credentials(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.revocations.fetch_add(1, Ordering::SeqCst);
    if let Some(token) = params.get("token") {
        state.tokens.lock().access.remove(token);
    }
    StatusCode::OK.into_response()
}

async fn extension(State(state): State<Arc<Platform>>, headers: HeaderMap) -> Response {
    state.api_calls.fetch_add(1, Ordering::SeqCst);
    if !state.is_authorized(&headers) {
        return unauthorized();
    }
    Json(json!({ "id": 101, "extensionNumber": "101", "name": "Test User" })).into_response()
}

async fn failure(State(state): State<Arc<Platform>>, headers: HeaderMap) -> Response {
    state.api_calls.fetch_add(1, Ordering::SeqCst);
    if !state.is_authorized(&headers) {
        return unauthorized();
    }
    error(
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "errorCode": "InternalError", "message": "Something went wrong" }),
    )
}

async fn slow(State(state): State<Arc<Platform>>, headers: HeaderMap) -> Response {
    state.api_calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(2)).await;
    if !state.is_authorized(&headers) {
        return unauthorized();
    }
    Json(json!({ "done": true })).into_response()
}

fn subscription_body(id: &str, event_filters: &serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "status": "Active",
        "eventFilters": event_filters,
        "expiresIn": 899,
        "expirationTime": "2025-01-31T10:15:00.000Z",
        "deliveryMode": {
            "transportType": "WebSocket",
            "address": "wss://ws.example.com/ws",
            "subscriberKey": "subscriber-key"
        }
    })
}

async fn create_subscription(
    State(state): State<Arc<Platform>>,
    headers: HeaderMap,
    Json(request): Json<serde_json::Value>,
) -> Response {
    if !state.is_authorized(&headers) {
        return unauthorized();
    }
    let count = state.subscription_creates.fetch_add(1, Ordering::SeqCst) + 1;
    let id = format!("sub-{count}");
    Json(subscription_body(&id, &request["eventFilters"])).into_response()
}

async fn renew_subscription(
    State(state): State<Arc<Platform>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !state.is_authorized(&headers) {
        return unauthorized();
    }
    state.subscription_renewals.fetch_add(1, Ordering::SeqCst);
    let filters = json!(["/restapi/v1.0/account/~/extension/~/presence"]);
    Json(subscription_body(&id, &filters)).into_response()
}

async fn remove_subscription(
    State(state): State<Arc<Platform>>,
    Path(_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !state.is_authorized(&headers) {
        return unauthorized();
    }
    state.subscription_removals.fetch_add(1, Ordering::SeqCst);
    StatusCode::NO_CONTENT.into_response()
}
