//! Inbound completion callbacks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::job::JobRef;

/// Inbound interface through which agents report invocation outcomes.
///
/// Implemented by the orchestration core, called by the agent transport.
/// Callbacks are idempotent on the receiving side: a stale or duplicate
/// report for an invocation that already reached a terminal state is
/// logged and ignored, never an error — so these methods do not return
/// results the agent could act on.
#[async_trait]
pub trait CompletionListener: Send + Sync {
    /// The operation completed successfully.
    async fn operation_succeeded(
        &self,
        job: &JobRef,
        results: serde_json::Value,
        invocation_time: DateTime<Utc>,
        completion_time: DateTime<Utc>,
    );

    /// The operation ran and failed.
    async fn operation_failed(
        &self,
        job: &JobRef,
        error: String,
        invocation_time: DateTime<Utc>,
        completion_time: DateTime<Utc>,
    );

    /// The agent gave up on the operation after its own timeout elapsed.
    async fn operation_timed_out(
        &self,
        job: &JobRef,
        invocation_time: DateTime<Utc>,
        timeout_time: DateTime<Utc>,
    );
}
