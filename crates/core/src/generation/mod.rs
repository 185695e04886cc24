//! Client side of the external synthesis service.

mod types;
mod webhook;

pub use types::{
    AcceptancePolicy, FailureKind, GenerationAck, GenerationError, GenerationRequest,
};
pub use webhook::WebhookClient;

use async_trait::async_trait;

/// Invokes one generation call.
///
/// Delivery is at-least-once: the service may see the same artifact key
/// more than once when an acknowledgement is lost.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Submit the request and wait for the service's verdict.
    async fn invoke(&self, request: &GenerationRequest) -> Result<GenerationAck, GenerationError>;
}
