//! Agents module - track selection via a tool-calling reasoning service.
//!
//! # Components
//! - **SelectionTransport**: one bounded, budget-checked call to the reasoning service
//! - **RelaxationController**: repeats calls, relaxing criteria until the result satisfies
//!
//! # Design Principles
//! - Collaborators are injected through [`AgentContext`], never global
//! - Results are always scored against the original criteria
//! - Cost overruns stop everything; other failures are absorbed as bad attempts

mod context;
pub mod orchestrator;
pub mod parse;
pub mod prompt;
mod transport;
mod types;
pub mod validator;

pub use context::AgentContext;
pub use orchestrator::{PlaylistJob, RelaxationController, RelaxationSettings};
pub use transport::{SelectionTransport, OPERATION_LABEL};
pub use types::{
    AttemptRecord, RelaxationOutcome, SelectedTrack, SelectionError, SelectionRequest,
    SelectionResponse, ToolInvocation, ValidationStatus,
};

use async_trait::async_trait;

/// Something that turns one request into a response.
///
/// # Invariants
/// - `Ok` always carries at least one track
/// - `select()` never panics; all errors are returned as `Err`
#[async_trait]
pub trait SelectionService: Send + Sync {
    async fn select(&self, request: &SelectionRequest)
        -> Result<SelectionResponse, SelectionError>;
}
