//! Mock generation client for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::generation::{GenerationAck, GenerationClient, GenerationError, GenerationRequest};

/// A recorded call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// The request as sent.
    pub request: GenerationRequest,
    /// When the call was made (tokio clock, so paused-time tests can measure gaps).
    pub at: Instant,
}

/// Hook run synchronously on every call, before the outcome is chosen.
type CallHook = Box<dyn Fn(&GenerationRequest) + Send + Sync>;

/// Mock implementation of the GenerationClient trait.
///
/// Calls succeed by default. Outcomes can be scripted per artifact key:
/// - `script` queues outcomes consumed one per call, falling back to success
/// - `fail_always` makes every call for a key fail
///
/// # Example
///
/// ```rust,ignore
/// use nexus_core::testing::MockGenerationClient;
///
/// let client = MockGenerationClient::new();
/// client.script("SKU1-1", vec![Err(GenerationError::Timeout), Ok(())]).await;
///
/// // ... run the batch ...
///
/// assert_eq!(client.calls_for("SKU1-1").await.len(), 2);
/// ```
pub struct MockGenerationClient {
    /// Queued outcomes per artifact key.
    scripted: Arc<RwLock<HashMap<String, VecDeque<Result<(), GenerationError>>>>>,
    /// Keys whose calls always fail.
    failing: Arc<RwLock<HashMap<String, GenerationError>>>,
    /// Recorded calls in order.
    calls: Arc<RwLock<Vec<RecordedCall>>>,
    /// Simulated service latency.
    latency: Arc<RwLock<Option<Duration>>>,
    hook: Arc<RwLock<Option<CallHook>>>,
}

impl std::fmt::Debug for MockGenerationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockGenerationClient")
            .field("scripted", &"<scripted>")
            .field("failing", &"<failing>")
            .field("calls", &"<calls>")
            .field("hook", &"<hook>")
            .finish()
    }
}

impl Default for MockGenerationClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGenerationClient {
    pub fn new() -> Self {
        Self {
            scripted: Arc::new(RwLock::new(HashMap::new())),
            failing: Arc::new(RwLock::new(HashMap::new())),
            calls: Arc::new(RwLock::new(Vec::new())),
            latency: Arc::new(RwLock::new(None)),
            hook: Arc::new(RwLock::new(None)),
        }
    }

    /// Queue outcomes for calls with `artifact_key`.
    pub async fn script(&self, artifact_key: &str, outcomes: Vec<Result<(), GenerationError>>) {
        self.scripted
            .write()
            .await
            .entry(artifact_key.to_string())
            .or_default()
            .extend(outcomes);
    }

    /// Make every call for `artifact_key` fail with `error`.
    pub async fn fail_always(&self, artifact_key: &str, error: GenerationError) {
        self.failing
            .write()
            .await
            .insert(artifact_key.to_string(), error);
    }

    /// Delay every call by `latency`.
    pub async fn set_latency(&self, latency: Duration) {
        *self.latency.write().await = Some(latency);
    }

    /// Run `hook` on every call.
    pub async fn on_call<F>(&self, hook: F)
    where
        F: Fn(&GenerationRequest) + Send + Sync + 'static,
    {
        *self.hook.write().await = Some(Box::new(hook));
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.read().await.clone()
    }

    pub async fn calls_for(&self, artifact_key: &str) -> Vec<RecordedCall> {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.request.artifact_key == artifact_key)
            .cloned()
            .collect()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }

    /// Artifact keys in call order.
    pub async fn call_order(&self) -> Vec<String> {
        self.calls
            .read()
            .await
            .iter()
            .map(|c| c.request.artifact_key.clone())
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.calls.write().await.clear();
    }
}

#[async_trait]
impl GenerationClient for MockGenerationClient {
    async fn invoke(&self, request: &GenerationRequest) -> Result<GenerationAck, GenerationError> {
        self.calls.write().await.push(RecordedCall {
            request: request.clone(),
            at: Instant::now(),
        });

        if let Some(ref hook) = *self.hook.read().await {
            hook(request);
        }

        let latency = *self.latency.read().await;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(error) = self.failing.read().await.get(&request.artifact_key) {
            return Err(error.clone());
        }

        let scripted = self
            .scripted
            .write()
            .await
            .get_mut(&request.artifact_key)
            .and_then(|queue| queue.pop_front());
        match scripted {
            Some(Err(error)) => Err(error),
            Some(Ok(())) | None => Ok(GenerationAck {
                status: 200,
                body: Some(serde_json::json!({ "success": true })),
            }),
        }
    }
}
