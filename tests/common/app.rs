use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use serval_exec::config::EngineConfig;
use serval_exec::queue::InMemoryQueue;
use serval_exec::repositories::InMemoryStore;
use serval_exec::services::{ExecutionService, Orchestrator};

pub const TOKEN: &str = "tok-123";

#[derive(Default)]
struct Counters {
    hits: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// HTTP target the engine runs against, bound to an ephemeral local port
pub struct MockTarget {
    pub base_url: String,
    counters: Arc<Counters>,
}

impl MockTarget {
    pub async fn start() -> Self {
        let counters = Arc::new(Counters::default());

        let router = Router::new()
            .route("/users/{id}", get(get_user))
            .route("/login", post(login))
            .route("/me", get(me))
            .route("/slow", get(slow))
            .route("/status/{code}", get(status))
            .route("/echo", post(echo))
            .with_state(counters.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock target");
        let addr = listener.local_addr().expect("Mock target has no address");

        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });

        Self {
            base_url: format!("http://{}", addr),
            counters,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Requests seen for one route key, e.g. `"/status/404"`
    pub fn hits(&self, key: &str) -> usize {
        self.counters
            .hits
            .lock()
            .unwrap()
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of `/slow` requests served at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }
}

fn count(counters: &Counters, key: String) {
    *counters.hits.lock().unwrap().entry(key).or_insert(0) += 1;
}

async fn get_user(State(counters): State<Arc<Counters>>, Path(id): Path<i64>) -> Json<Value> {
    count(&counters, format!("/users/{}", id));
    Json(json!({"id": id, "name": format!("user-{}", id)}))
}

async fn login(State(counters): State<Arc<Counters>>) -> Json<Value> {
    count(&counters, "/login".to_string());
    Json(json!({"token": TOKEN}))
}

async fn me(
    State(counters): State<Arc<Counters>>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    count(&counters, "/me".to_string());
    let expected = format!("Bearer {}", TOKEN);
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some(value) if value == expected => (StatusCode::OK, Json(json!({"name": "alice"}))),
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "missing token"})),
        ),
    }
}

async fn slow(State(counters): State<Arc<Counters>>) -> Json<Value> {
    count(&counters, "/slow".to_string());
    let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    counters.peak.fetch_max(now, Ordering::SeqCst);

    tokio::time::sleep(Duration::from_millis(100)).await;

    counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    Json(json!({"ok": true}))
}

async fn status(
    State(counters): State<Arc<Counters>>,
    Path(code): Path<u16>,
) -> (StatusCode, Json<Value>) {
    count(&counters, format!("/status/{}", code));
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST);
    (status, Json(json!({"code": code})))
}

async fn echo(State(counters): State<Arc<Counters>>, Json(body): Json<Value>) -> Json<Value> {
    count(&counters, "/echo".to_string());
    Json(body)
}

/// Orchestrator and execution service over one in-memory store
pub struct TestEngine {
    pub store: InMemoryStore,
    pub queue: InMemoryQueue,
    pub orchestrator: Arc<Orchestrator>,
    pub service: ExecutionService,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_config(test_engine_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = InMemoryStore::new();
        let queue = InMemoryQueue::new();
        let shared = Arc::new(store.clone());

        let orchestrator = Arc::new(
            Orchestrator::new(shared.clone(), shared.clone(), shared, config)
                .expect("Failed to create orchestrator"),
        );
        let service = ExecutionService::new(Arc::new(queue.clone()), orchestrator.clone());

        Self {
            store,
            queue,
            orchestrator,
            service,
        }
    }
}

/// Engine defaults with short timings so failing paths finish quickly
pub fn test_engine_config() -> EngineConfig {
    EngineConfig {
        default_timeout: Duration::from_secs(5),
        default_retries: 1,
        default_backoff: Duration::from_millis(10),
        ..EngineConfig::default()
    }
}
