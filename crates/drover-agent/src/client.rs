//! Outbound agent client trait.
//!
//! The invocation lifecycle as seen from the server side:
//!
//! ```text
//!   invoke() ──→ (agent queues) ──→ (agent runs) ──→ CompletionListener
//!      │                                                  callback
//!      └─ may fail synchronously: unreachable / rejected / serialization
//! ```
//!
//! ## Design principles
//!
//! - **Fire-and-forget submit**: `invoke()` returns as soon as the agent
//!   has accepted the request; the outcome arrives later through the
//!   inbound [`crate::CompletionListener`].
//! - **Synchronous submit failures are real failures**: an error from
//!   `invoke()` means the operation never started and the caller must
//!   record the failure itself — nothing will call back for it.
//! - **Cancellation is cooperative**: `cancel()` reports what the agent
//!   interrupted, not whether the operation actually stopped.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AgentResult;
use crate::job::{JobRef, ResourceId};

/// What the agent was doing with a job when a cancel request arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterruptedState {
    /// The job had already finished; the normal completion callback is
    /// imminent (or already in flight).
    Finished,
    /// The job was still queued and was discarded before it ever ran.
    Queued,
    /// The job was running; the agent signaled an interrupt, which the
    /// operation implementation may or may not honor.
    Running,
    /// The agent has no memory of the job, most likely because it was
    /// restarted after the submit.
    Unknown,
}

impl std::fmt::Display for InterruptedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterruptedState::Finished => write!(f, "FINISHED"),
            InterruptedState::Queued => write!(f, "QUEUED"),
            InterruptedState::Running => write!(f, "RUNNING"),
            InterruptedState::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Outcome of a cancel request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResults {
    /// State the job was in when the agent processed the cancel.
    pub interrupted_state: InterruptedState,
    /// Optional agent-side detail message.
    pub details: Option<String>,
}

impl CancelResults {
    /// Create cancel results for the given interrupted state.
    pub fn new(interrupted_state: InterruptedState) -> Self {
        Self {
            interrupted_state,
            details: None,
        }
    }

    /// Attach a detail message.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Client interface for the remote agent that executes operations.
///
/// Implementations route each call to the agent responsible for the given
/// resource; the orchestration core holds exactly one client and never
/// needs to know the transport.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Submit an operation invocation to the agent managing `resource`.
    ///
    /// Asynchronous fire-and-forget: a successful return only means the
    /// agent accepted the request. Errors (unreachable agent, rejected or
    /// unserializable payload) mean the operation never started.
    async fn invoke(
        &self,
        job: &JobRef,
        resource: ResourceId,
        operation: &str,
        parameters: &serde_json::Map<String, serde_json::Value>,
    ) -> AgentResult<()>;

    /// Ask the agent to cancel a previously submitted invocation.
    ///
    /// Returns the state the job was in when the agent handled the
    /// request; see [`InterruptedState`] for how callers should interpret
    /// each variant.
    async fn cancel(&self, job: &JobRef, resource: ResourceId) -> AgentResult<CancelResults>;

    /// Lightweight liveness check with an explicit bound.
    ///
    /// Returns `Ok(false)` when the agent answered that it is not ready;
    /// an `Err` means it could not be reached at all within `timeout`.
    async fn ping(&self, resource: ResourceId, timeout: Duration) -> AgentResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupted_state_display() {
        assert_eq!(InterruptedState::Finished.to_string(), "FINISHED");
        assert_eq!(InterruptedState::Queued.to_string(), "QUEUED");
        assert_eq!(InterruptedState::Running.to_string(), "RUNNING");
        assert_eq!(InterruptedState::Unknown.to_string(), "UNKNOWN");
    }

    #[test]
    fn test_cancel_results_builder() {
        let results = CancelResults::new(InterruptedState::Queued).with_details("dequeued");
        assert_eq!(results.interrupted_state, InterruptedState::Queued);
        assert_eq!(results.details.as_deref(), Some("dequeued"));
    }
}
