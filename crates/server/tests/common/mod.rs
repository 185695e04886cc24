//! In-process server fixture for API tests.
//!
//! Builds the router over real SQLite stores in a temp directory, with the
//! generation service replaced by a `MockGenerationClient`.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use nexus_core::{
    config::{DatabaseConfig, GenerationConfig, ServerConfig},
    create_audit_system, testing::MockGenerationClient, AuditStore, BatchManager, Config,
    GenerationClient, OrchestratorConfig, SqliteAuditStore, SqliteStatusStore, StatusStore,
};
use nexus_server::{api::create_router, state::AppState};

/// Test fixture for API tests with a scripted generation service.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_start_batch() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture.post("/api/v1/batches", batch_body(&["A"], &["front"])).await;
///
///     assert_eq!(response.status, StatusCode::CREATED);
/// }
/// ```
pub struct TestFixture {
    pub router: Router,
    /// Mock generation service - script failures per artifact key
    pub client: Arc<MockGenerationClient>,
    /// Direct access to runs, e.g. to wait for one to finish
    pub batches: BatchManager,
    pub audit_store: Arc<dyn AuditStore>,
    /// Holds the test database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Fixture with millisecond delays so runs settle quickly.
    pub async fn new() -> Self {
        Self::with_orchestrator(OrchestratorConfig {
            max_attempts: 2,
            retry_delay_ms: 10,
            max_retry_delay_ms: 10,
            cooldown_ms: 10,
            status_write_backoff_ms: 0,
            ..OrchestratorConfig::default()
        })
        .await
    }

    pub async fn with_orchestrator(orchestrator: OrchestratorConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let config = Config {
            generation: GenerationConfig {
                endpoint: "http://127.0.0.1:9/webhook/variant".to_string(),
                timeout_secs: 5,
                acceptance: Default::default(),
                auth_token: Some("test-token".to_string()),
            },
            server: ServerConfig {
                host: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
                port: 0, // Not used for in-process testing
            },
            database: DatabaseConfig {
                path: db_path.clone(),
            },
            orchestrator: orchestrator.clone(),
        };

        let audit_store: Arc<dyn AuditStore> = Arc::new(
            SqliteAuditStore::new(&db_path).expect("Failed to create audit store"),
        );
        let status_store: Arc<dyn StatusStore> = Arc::new(
            SqliteStatusStore::new(&db_path).expect("Failed to create status store"),
        );

        let (audit_handle, audit_writer) = create_audit_system(Arc::clone(&audit_store), 100);
        tokio::spawn(audit_writer.run());

        let client = Arc::new(MockGenerationClient::new());
        let batches = BatchManager::new(
            status_store,
            Arc::clone(&client) as Arc<dyn GenerationClient>,
            orchestrator,
            Some(audit_handle),
        );

        let state = Arc::new(AppState::new(
            config,
            Arc::clone(&audit_store),
            batches.clone(),
        ));
        let router = create_router(state);

        Self {
            router,
            client,
            batches,
            audit_store,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a POST request with a raw string body (for malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Block until the batch run finishes, failing the test after `secs`.
    pub async fn wait_finished(&self, batch_id: &str, secs: u64) {
        tokio::time::timeout(Duration::from_secs(secs), self.batches.wait(batch_id))
            .await
            .expect("Batch did not finish in time")
            .expect("Batch summary missing");
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        self.send(request_builder.body(body).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// JSON body for `POST /api/v1/batches`.
pub fn batch_body(ids: &[&str], prompts: &[&str]) -> Value {
    let rows: Vec<Value> = ids
        .iter()
        .map(|id| {
            json!({
                "external_id": id,
                "source_asset_ref": format!("https://cdn.example.com/{}.jpg", id),
            })
        })
        .collect();
    let mut directives = vec![Value::Null; 3];
    for (slot, prompt) in directives.iter_mut().zip(prompts) {
        *slot = json!(prompt);
    }
    json!({ "rows": rows, "directives": directives })
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}

/// Helper to assert a JSON path equals expected value.
#[macro_export]
macro_rules! assert_json_path {
    ($json:expr, $path:expr, $expected:expr) => {
        let actual = &$json[$path];
        assert_eq!(
            actual, &$expected,
            "Path '{}' expected {:?}, got {:?}",
            $path, $expected, actual
        );
    };
}
