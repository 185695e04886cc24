use super::{types::Config, ConfigError};
use crate::orchestrator::BackoffStrategy;

/// Validate configuration
/// Currently validates:
/// - Generation section exists (enforced by serde)
/// - Server port is not 0
/// - Generation endpoint is an http(s) URL
/// - Orchestrator bounds are usable
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    let endpoint = config.generation.endpoint.trim();
    if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
        return Err(ConfigError::ValidationError(format!(
            "generation.endpoint must be an http(s) URL, got '{}'",
            endpoint
        )));
    }

    if config.generation.timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "generation.timeout_secs cannot be 0".to_string(),
        ));
    }

    let orch = &config.orchestrator;
    if orch.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.max_attempts must be at least 1".to_string(),
        ));
    }
    if orch.chunk_size == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.chunk_size must be at least 1".to_string(),
        ));
    }
    if orch.status_write_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.status_write_attempts must be at least 1".to_string(),
        ));
    }
    if orch.backoff == BackoffStrategy::Exponential && orch.max_retry_delay_ms < orch.retry_delay_ms
    {
        return Err(ConfigError::ValidationError(
            "orchestrator.max_retry_delay_ms cannot be below retry_delay_ms".to_string(),
        ));
    }

    Ok(())
}
