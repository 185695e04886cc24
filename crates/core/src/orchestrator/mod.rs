//! Batch orchestrator for rate-limited variant generation.
//!
//! Layers, innermost first:
//! - **VariantDispatcher**: one task through PENDING -> PROCESSING -> terminal,
//!   with write-ahead, retries and status-write recovery
//! - **ItemScheduler**: the variants of one work item, sequential or fan-out
//! - **BatchOrchestrator**: all items of a run under a run profile
//! - **BatchManager**: spawns, tracks, cancels and resumes runs

mod config;
mod dispatcher;
mod retry;
mod runner;
mod scheduler;
mod service;
mod types;

pub use config::{BackoffStrategy, ItemPolicy, OrchestratorConfig, RunProfile};
pub use dispatcher::{ItemContext, VariantDispatcher, WritePolicy};
pub use retry::{cool_down, RetryDecision, RetryPolicy};
pub use runner::BatchOrchestrator;
pub use scheduler::ItemScheduler;
pub use service::{BatchManager, BatchStatus, StartBatchRequest, StatusCounts};
pub use types::{
    AbortInfo, ExhaustionCause, Exhausted, ItemOutcome, ItemReport, OrchestratorError, RunAbort,
    RunSummary, VariantOutcome,
};
