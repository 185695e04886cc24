//! Generation request/response types and errors.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Payload sent to the synthesis service for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    /// Source asset reference (image URL).
    #[serde(rename = "asset")]
    pub source_asset_ref: String,
    /// Stable key naming the output artifact.
    pub artifact_key: String,
    /// Prompt text.
    pub directive: String,
    /// Fresh per attempt, for correlating service-side logs.
    pub correlation_token: String,
}

impl GenerationRequest {
    pub fn new(
        source_asset_ref: impl Into<String>,
        artifact_key: impl Into<String>,
        directive: impl Into<String>,
    ) -> Self {
        Self {
            source_asset_ref: source_asset_ref.into(),
            artifact_key: artifact_key.into(),
            directive: directive.into(),
            correlation_token: Uuid::new_v4().to_string(),
        }
    }
}

/// Accepted response from the service.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationAck {
    pub status: u16,
    pub body: Option<serde_json::Value>,
}

/// How a 2xx response is judged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptancePolicy {
    /// Any 2xx response is a success.
    Status,
    /// A 2xx response must carry a JSON body with `"success": true`.
    #[default]
    SuccessFlag,
}

impl AcceptancePolicy {
    /// Judge a 2xx response body.
    pub fn evaluate(&self, status: u16, body: &[u8]) -> Result<GenerationAck, GenerationError> {
        let parsed: Option<serde_json::Value> = serde_json::from_slice(body).ok();

        match self {
            Self::Status => Ok(GenerationAck {
                status,
                body: parsed,
            }),
            Self::SuccessFlag => {
                let Some(value) = parsed else {
                    return Err(GenerationError::MalformedAck(
                        String::from_utf8_lossy(body).chars().take(200).collect(),
                    ));
                };
                if value.get("success").and_then(|v| v.as_bool()) == Some(true) {
                    Ok(GenerationAck {
                        status,
                        body: Some(value),
                    })
                } else {
                    Err(GenerationError::NotAccepted)
                }
            }
        }
    }
}

/// Category of a failed attempt, consulted by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transport,
    Timeout,
    Rejected,
    RateLimited { retry_after: Option<Duration> },
    NotAccepted,
}

impl FailureKind {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Rejected => "rejected",
            Self::RateLimited { .. } => "rate_limited",
            Self::NotAccepted => "not_accepted",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GenerationError {
    #[error("Generation service connection failed: {0}")]
    Connection(String),

    #[error("Generation request timed out")]
    Timeout,

    #[error("Generation service returned HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Generation service rate limited the request")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API response was not success:true")]
    NotAccepted,

    #[error("Malformed response body: {0}")]
    MalformedAck(String),

    #[error("Client configuration error: {0}")]
    Config(String),
}

impl GenerationError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Connection(_) | Self::Config(_) => FailureKind::Transport,
            Self::Timeout => FailureKind::Timeout,
            Self::Rejected { .. } => FailureKind::Rejected,
            Self::RateLimited { retry_after } => FailureKind::RateLimited {
                retry_after: *retry_after,
            },
            Self::NotAccepted | Self::MalformedAck(_) => FailureKind::NotAccepted,
        }
    }
}
