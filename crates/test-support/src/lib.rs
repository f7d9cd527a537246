//! In-process mock upstream API for integration tests.
//!
//! [`MockApi::spawn`] serves a small pet store on an ephemeral localhost port and counts every
//! request it receives, including how many were in flight at once.

use anyhow::Context as _;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// API key accepted by the mock's authenticated routes.
pub const API_KEY: &str = "test-key-123";

pub const PETSTORE_V3_YAML: &str = include_str!("../fixtures/petstore_v3.yaml");
pub const PETSTORE_V2_JSON: &str = include_str!("../fixtures/petstore_v2.json");

#[derive(Debug, Default)]
struct Counters {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a Counters);

impl<'a> InFlight<'a> {
    fn enter(c: &'a Counters) -> Self {
        c.calls.fetch_add(1, Ordering::SeqCst);
        let now = c.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        c.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(c)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MockState {
    counters: Counters,
    pet_count: usize,
}

/// A running mock API. Dropping it shuts the server down.
pub struct MockApi {
    base_url: String,
    state: Arc<MockState>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl MockApi {
    /// Serve the mock with the default 100 seeded pets.
    ///
    /// # Errors
    ///
    /// Returns an error if no localhost port can be bound.
    pub async fn spawn() -> anyhow::Result<Self> {
        Self::spawn_with_pets(100).await
    }

    /// Serve the mock with `pet_count` seeded pets.
    ///
    /// # Errors
    ///
    /// Returns an error if no localhost port can be bound.
    pub async fn spawn_with_pets(pet_count: usize) -> anyhow::Result<Self> {
        let state = Arc::new(MockState {
            counters: Counters::default(),
            pet_count,
        });

        let app = Router::new()
            .route("/pets", get(list_pets).post(create_pet))
            .route(
                "/pets/{pet_id}",
                get(get_pet).put(update_pet).patch(update_pet).delete(delete_pet),
            )
            .route("/slow", get(slow))
            .route("/flaky/{n}", get(flaky))
            .route("/echo", get(echo).post(echo))
            .route("/text", get(text))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind mock api")?;
        let addr = listener.local_addr().context("mock api local addr")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
        tokio::spawn(async move { server.await });

        Ok(Self {
            base_url: format!("http://{addr}"),
            state,
            shutdown: Some(shutdown_tx),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Total requests received so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.state.counters.calls.load(Ordering::SeqCst)
    }

    /// Highest number of requests handled at the same time.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.state.counters.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Drop for MockApi {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

fn unauthorized(headers: &HeaderMap) -> Option<Response> {
    let ok = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|k| k == API_KEY);
    if ok {
        None
    } else {
        Some(
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"detail": "Invalid API key"})),
            )
                .into_response(),
        )
    }
}

fn pet(id: usize) -> Value {
    let species = ["dog", "cat", "bird"][id % 3];
    json!({"id": id, "name": format!("pet-{id}"), "species": species, "status": "available"})
}

async fn hold(query: &HashMap<String, String>) {
    if let Some(ms) = query.get("delay_ms").and_then(|v| v.parse::<u64>().ok()) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

async fn list_pets(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let _guard = InFlight::enter(&state.counters);
    if let Some(r) = unauthorized(&headers) {
        return r;
    }
    hold(&query).await;
    let pets: Vec<Value> = (1..=state.pet_count).map(pet).collect();
    Json(Value::Array(pets)).into_response()
}

async fn get_pet(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(pet_id): Path<usize>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let _guard = InFlight::enter(&state.counters);
    if let Some(r) = unauthorized(&headers) {
        return r;
    }
    hold(&query).await;
    if pet_id == 0 || pet_id > state.pet_count {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"detail": "Pet not found"})),
        )
            .into_response();
    }
    Json(pet(pet_id)).into_response()
}

async fn create_pet(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let _guard = InFlight::enter(&state.counters);
    if let Some(r) = unauthorized(&headers) {
        return r;
    }
    let mut created = body;
    if let Value::Object(map) = &mut created {
        map.insert("id".to_string(), json!(state.pet_count + 1));
    }
    (StatusCode::CREATED, Json(created)).into_response()
}

async fn update_pet(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(pet_id): Path<usize>,
    Json(body): Json<Value>,
) -> Response {
    let _guard = InFlight::enter(&state.counters);
    if let Some(r) = unauthorized(&headers) {
        return r;
    }
    let mut updated = pet(pet_id);
    if let (Value::Object(target), Value::Object(patch)) = (&mut updated, body) {
        target.extend(patch);
    }
    Json(updated).into_response()
}

async fn delete_pet(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(_pet_id): Path<usize>,
) -> Response {
    let _guard = InFlight::enter(&state.counters);
    if let Some(r) = unauthorized(&headers) {
        return r;
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn slow(
    State(state): State<Arc<MockState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let _guard = InFlight::enter(&state.counters);
    hold(&query).await;
    Json(json!({"ok": true})).into_response()
}

/// `n` is echoed back; `n == 3` fails with a 500.
async fn flaky(State(state): State<Arc<MockState>>, Path(n): Path<u32>) -> Response {
    let _guard = InFlight::enter(&state.counters);
    if n == 3 {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"message": "item 3 exploded"})),
        )
            .into_response();
    }
    Json(json!({"n": n})).into_response()
}

async fn echo(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let _guard = InFlight::enter(&state.counters);
    let headers: serde_json::Map<String, Value> = headers
        .iter()
        .filter_map(|(k, v)| Some((k.as_str().to_string(), json!(v.to_str().ok()?))))
        .collect();
    Json(json!({
        "path": uri.path(),
        "query": uri.query().unwrap_or(""),
        "headers": headers,
        "body": body,
    }))
    .into_response()
}

async fn text(State(state): State<Arc<MockState>>) -> Response {
    let _guard = InFlight::enter(&state.counters);
    "plain text, not json".into_response()
}
