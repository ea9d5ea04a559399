use std::sync::{Arc, OnceLock};

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};
use time::{macros::datetime, OffsetDateTime};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::api;
use crate::core::{clock::ManualClock, config::Settings, security, state::AppState};
use crate::db::models::fixtures::sample_exam;
use crate::db::types::UserRole;
use crate::store::{memory::MemoryAttemptStore, AttemptStore};

const TEST_SECRET_KEY: &str = "test-secret";

/// Engine clock start for HTTP tests; inside the sample exam's window.
pub(crate) const TEST_NOW: OffsetDateTime = datetime!(2025-03-01 09:00:00 UTC);

pub(crate) struct TestContext {
    pub(crate) state: AppState,
    pub(crate) app: Router,
    pub(crate) clock: Arc<ManualClock>,
    _guard: OwnedMutexGuard<()>,
}

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    std::env::set_var("ATTEMPTS_ENV", "test");
    std::env::remove_var("ATTEMPTS_STRICT_CONFIG");
    std::env::set_var("ATTEMPT_STORE", "memory");
    std::env::set_var("SECRET_KEY", TEST_SECRET_KEY);
    std::env::set_var("ALGORITHM", "HS256");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    std::env::remove_var("PROJECT_NAME");
    std::env::remove_var("API_V1_STR");
    std::env::remove_var("BACKEND_CORS_ORIGINS");
}

pub(crate) fn memory_state(settings: Settings) -> (AppState, Arc<ManualClock>) {
    let store: Arc<dyn AttemptStore> = Arc::new(MemoryAttemptStore::default());
    let clock = Arc::new(ManualClock::new(TEST_NOW));
    (AppState::new(settings, store, clock.clone()), clock)
}

/// Router over an in-memory store holding `sample_exam("exam-1")`.
pub(crate) async fn setup_test_context() -> TestContext {
    let guard = env_lock().await;
    set_test_env();

    let settings = Settings::load().expect("settings");
    let (state, clock) = memory_state(settings);
    state.store().upsert_exam(&sample_exam("exam-1"), TEST_NOW).await.expect("seed exam");
    let app = api::router::router(state.clone());

    TestContext { state, app, clock, _guard: guard }
}

pub(crate) fn bearer_token(user_id: &str, role: UserRole, settings: &Settings) -> String {
    security::create_access_token(user_id, role, settings, time::Duration::hours(1)).expect("token")
}

pub(crate) fn json_request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    if let Some(body) = body {
        let bytes = serde_json::to_vec(&body).expect("serialize body");
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("request body")
    } else {
        builder.body(Body::empty()).expect("request body")
    }
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}
