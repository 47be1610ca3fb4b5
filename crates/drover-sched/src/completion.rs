//! Inbound completion handling and group outcome aggregation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_agent::{CompletionListener, JobRef};

use crate::error::SchedResult;
use crate::history::{HistoryId, OperationHistory, OperationStatus};
use crate::manager::SchedContext;
use crate::persistence::ResourceOutcome;

/// Receives agent completion callbacks and records them.
///
/// The inbound half of the agent boundary. Every callback is resolved to
/// its history row by [`JobRef`]; stale or duplicate reports lose the
/// compare-and-set and are dropped with a log line.
pub struct CompletionService {
    ctx: Arc<SchedContext>,
}

impl CompletionService {
    /// Create a completion service over the given context.
    pub fn new(ctx: Arc<SchedContext>) -> Self {
        Self { ctx }
    }

    async fn apply_outcome(&self, job: &JobRef, outcome: ResourceOutcome) {
        let history = match self.ctx.histories.find_resource_by_job_ref(job).await {
            Ok(Some(history)) => history,
            Ok(None) => {
                tracing::warn!(job = %job, "completion callback for unknown invocation");
                return;
            }
            Err(e) => {
                tracing::error!(job = %job, error = %e, "failed to resolve invocation");
                return;
            }
        };

        match self.ctx.histories.complete_resource(history.id, &outcome).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(
                    history = %history.id,
                    status = %history.status,
                    "stale completion callback ignored"
                );
                return;
            }
            Err(e) => {
                tracing::error!(history = %history.id, error = %e, "failed to record outcome");
                return;
            }
        }

        if let Ok(Some(updated)) = self.ctx.histories.resource(history.id).await {
            self.ctx
                .notifier
                .notify(&OperationHistory::Resource(updated))
                .await;
        }

        if let Some(group) = history.group_history_id {
            if let Err(e) = aggregate_group(&self.ctx, group).await {
                tracing::error!(group = %group, error = %e, "group aggregation failed");
            }
        }
    }
}

#[async_trait]
impl CompletionListener for CompletionService {
    async fn operation_succeeded(
        &self,
        job: &JobRef,
        results: serde_json::Value,
        invocation_time: DateTime<Utc>,
        completion_time: DateTime<Utc>,
    ) {
        let outcome = ResourceOutcome::success(results, completion_time)
            .with_started_time(invocation_time);
        self.apply_outcome(job, outcome).await;
    }

    async fn operation_failed(
        &self,
        job: &JobRef,
        error: String,
        invocation_time: DateTime<Utc>,
        completion_time: DateTime<Utc>,
    ) {
        let outcome =
            ResourceOutcome::failure(error, completion_time).with_started_time(invocation_time);
        self.apply_outcome(job, outcome).await;
    }

    async fn operation_timed_out(
        &self,
        job: &JobRef,
        invocation_time: DateTime<Utc>,
        timeout_time: DateTime<Utc>,
    ) {
        let elapsed = (timeout_time - invocation_time).num_milliseconds();
        let outcome = ResourceOutcome::failure(
            format!("Operation timed out on the agent after {elapsed} ms"),
            timeout_time,
        )
        .with_started_time(invocation_time);
        self.apply_outcome(job, outcome).await;
    }
}

/// Try to finalize a group history from its children's outcomes.
///
/// A no-op unless the group's fan-out has finished, the group is still
/// in progress, and every child is terminal. A group with no children
/// and no dispatch errors completes successfully. Safe to call from any
/// number of racing finishers; the compare-and-set on the group row
/// picks one winner.
pub async fn aggregate_group(ctx: &SchedContext, group_id: HistoryId) -> SchedResult<()> {
    let Some(group) = ctx.histories.group(group_id).await? else {
        return Ok(());
    };
    if group.status.is_terminal() || !group.fanout_complete {
        return Ok(());
    }

    let children = ctx.histories.resource_children(group_id).await?;
    if children.iter().any(|c| !c.status.is_terminal()) {
        return Ok(());
    }

    let unsuccessful: Vec<_> = children
        .iter()
        .filter(|c| !c.status.is_success())
        .collect();

    let (status, message) = if unsuccessful.is_empty() {
        if group.error_message.is_some() {
            // No child failed, but some members never got a history row
            // at all; the accumulated dispatch notes stay as the
            // message.
            (OperationStatus::Failure, None)
        } else {
            (OperationStatus::Success, None)
        }
    } else {
        let summary = unsuccessful
            .iter()
            .map(|c| format!("{} ({})", c.resource_name, c.status))
            .collect::<Vec<_>>()
            .join(", ");
        (
            OperationStatus::Failure,
            Some(format!(
                "The following resource operations did not succeed: {summary}"
            )),
        )
    };

    if ctx
        .histories
        .complete_group(group_id, status, message, Utc::now())
        .await?
    {
        tracing::info!(group = %group_id, status = %status, "group operation completed");
        if let Some(updated) = ctx.histories.group(group_id).await? {
            ctx.notifier
                .notify(&OperationHistory::Group(updated))
                .await;
        }
    }

    Ok(())
}
