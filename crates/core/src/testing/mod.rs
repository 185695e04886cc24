//! Testing utilities and mock implementations.
//!
//! Lets the orchestrator run end to end without a real synthesis service.
//!
//! # Example
//!
//! ```rust,ignore
//! use nexus_core::testing::{fixtures, MockGenerationClient};
//!
//! let client = Arc::new(MockGenerationClient::new());
//! client.fail_always("SKU1-2", GenerationError::Timeout).await;
//!
//! let manager = BatchManager::new(store, client.clone(), fixtures::fast_config(), None);
//! ```

mod flaky_status_store;
mod mock_generation_client;

pub use flaky_status_store::FlakyStatusStore;
pub use mock_generation_client::{MockGenerationClient, RecordedCall};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::batch::{Directives, ManifestRow};
    use crate::orchestrator::{OrchestratorConfig, StartBatchRequest};

    /// Orchestrator settings with short delays: 1 s cool-down and retry delay,
    /// two attempts, no status write backoff.
    pub fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            max_attempts: 2,
            retry_delay_ms: 1_000,
            max_retry_delay_ms: 1_000,
            cooldown_ms: 1_000,
            status_write_backoff_ms: 0,
            ..OrchestratorConfig::default()
        }
    }

    /// Manifest rows with image links derived from the ids.
    pub fn manifest_rows(ids: &[&str]) -> Vec<ManifestRow> {
        ids.iter()
            .map(|id| ManifestRow::new(*id, format!("https://cdn.example.com/{}.jpg", id)))
            .collect()
    }

    /// Directives for the first `prompts.len()` slots.
    pub fn directives(prompts: &[&str]) -> Directives {
        let mut slots: [Option<String>; 3] = Default::default();
        for (slot, prompt) in slots.iter_mut().zip(prompts) {
            *slot = Some(prompt.to_string());
        }
        Directives(slots)
    }

    /// Start request using the configured run profile.
    pub fn start_request(ids: &[&str], prompts: &[&str]) -> StartBatchRequest {
        StartBatchRequest {
            rows: manifest_rows(ids),
            directives: directives(prompts),
            profile: None,
        }
    }
}
