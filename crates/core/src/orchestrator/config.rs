//! Orchestrator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a batch reacts to a variant exhausting its retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunProfile {
    /// Items run in concurrent chunks; one exhaustion skips every remaining chunk.
    FailFast,
    /// Items run one at a time; exhaustion is recorded and the run continues.
    #[default]
    ContinueOnError,
}

impl RunProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FailFast => "fail_fast",
            Self::ContinueOnError => "continue_on_error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fail_fast" => Some(Self::FailFast),
            "continue_on_error" => Some(Self::ContinueOnError),
            _ => None,
        }
    }
}

/// How the variants of one work item are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemPolicy {
    /// Variants 1, 2, 3 strictly in order with a cool-down after each success.
    #[default]
    Sequential,
    /// All variants of the item at once.
    FanOut,
}

/// Growth of the retry delay between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    #[default]
    Fixed,
    Exponential,
}

/// Configuration for the batch orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub run_profile: RunProfile,

    #[serde(default)]
    pub item_policy: ItemPolicy,

    /// Items per concurrent chunk under the fail-fast profile.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Generation attempts per variant before it is marked FAILED.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Wait before retrying a failed attempt (milliseconds).
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    #[serde(default)]
    pub backoff: BackoffStrategy,

    /// Upper bound for exponential retry delays (milliseconds).
    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_ms: u64,

    /// Rate-limit cool-down between variants (milliseconds).
    #[serde(default = "default_cooldown")]
    pub cooldown_ms: u64,

    /// Apply the cool-down after each successful variant in sequential mode.
    #[serde(default = "default_true")]
    pub cooldown_after_success: bool,

    /// Tries per status store write before the variant is force-failed.
    #[serde(default = "default_status_write_attempts")]
    pub status_write_attempts: u32,

    /// Pause between status write tries (milliseconds).
    #[serde(default = "default_status_write_backoff")]
    pub status_write_backoff_ms: u64,

    /// Resume batches left running by a previous process at startup.
    #[serde(default)]
    pub resume_interrupted: bool,
}

fn default_chunk_size() -> usize {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    60_000 // 1 minute, quota windows on the service side
}

fn default_max_retry_delay() -> u64 {
    600_000 // 10 minutes
}

fn default_cooldown() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

fn default_status_write_attempts() -> u32 {
    3
}

fn default_status_write_backoff() -> u64 {
    250
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            run_profile: RunProfile::default(),
            item_policy: ItemPolicy::default(),
            chunk_size: default_chunk_size(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay(),
            backoff: BackoffStrategy::default(),
            max_retry_delay_ms: default_max_retry_delay(),
            cooldown_ms: default_cooldown(),
            cooldown_after_success: true,
            status_write_attempts: default_status_write_attempts(),
            status_write_backoff_ms: default_status_write_backoff(),
            resume_interrupted: false,
        }
    }
}

impl OrchestratorConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn status_write_backoff(&self) -> Duration {
        Duration::from_millis(self.status_write_backoff_ms)
    }
}
