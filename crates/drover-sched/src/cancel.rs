//! Cancellation of in-flight operations.

use std::sync::Arc;

use chrono::Utc;
use drover_agent::InterruptedState;

use crate::completion::aggregate_group;
use crate::error::{SchedError, SchedResult};
use crate::history::{
    GroupOperationHistory, HistoryId, OperationHistory, OperationStatus, ResourceOperationHistory,
};
use crate::manager::SchedContext;
use crate::persistence::ResourceOutcome;

/// Outcome of one resource-level cancel attempt.
#[derive(Debug, Clone, Copy)]
struct CancelAttempt {
    /// The history row was moved to CANCELED.
    canceled: bool,
    /// The agent could not be reached or errored during the attempt.
    agent_error: bool,
}

/// Coordinates cancel requests against agents and history rows.
///
/// Cancellation is advisory on the agent side; what this coordinator
/// guarantees is an honest history row. `ignore_agent_errors` decides
/// whether an unreachable agent blocks the CANCELED transition or not —
/// forcing it means a late completion callback from a recovered agent
/// will be dropped as stale.
pub struct CancellationCoordinator {
    ctx: Arc<SchedContext>,
}

impl CancellationCoordinator {
    /// Create a coordinator over the given context.
    pub fn new(ctx: Arc<SchedContext>) -> Self {
        Self { ctx }
    }

    /// Cancel one in-progress resource operation.
    ///
    /// Errors with [`SchedError::InvalidHistoryState`] when the history
    /// is already terminal. Returns the (possibly updated) history row.
    pub async fn cancel_resource(
        &self,
        history_id: HistoryId,
        ignore_agent_errors: bool,
    ) -> SchedResult<ResourceOperationHistory> {
        let history = self
            .ctx
            .histories
            .resource(history_id)
            .await?
            .ok_or_else(|| SchedError::HistoryNotFound(history_id.to_string()))?;

        if history.status.is_terminal() {
            return Err(SchedError::InvalidHistoryState {
                expected: OperationStatus::InProgress.name().to_string(),
                found: history.status.name().to_string(),
            });
        }

        self.try_cancel(&history, ignore_agent_errors, true).await?;

        self.ctx
            .histories
            .resource(history_id)
            .await?
            .ok_or_else(|| SchedError::HistoryNotFound(history_id.to_string()))
    }

    /// Cancel one in-progress group operation and its live children.
    ///
    /// Children already terminal are left alone. The group itself goes
    /// to CANCELED unless an agent error occurred and
    /// `ignore_agent_errors` is false, in which case it stays in
    /// progress so the surviving children can still finish it.
    pub async fn cancel_group(
        &self,
        history_id: HistoryId,
        ignore_agent_errors: bool,
    ) -> SchedResult<GroupOperationHistory> {
        let group = self
            .ctx
            .histories
            .group(history_id)
            .await?
            .ok_or_else(|| SchedError::HistoryNotFound(history_id.to_string()))?;

        if group.status.is_terminal() {
            return Err(SchedError::InvalidHistoryState {
                expected: OperationStatus::InProgress.name().to_string(),
                found: group.status.name().to_string(),
            });
        }

        let children = self.ctx.histories.resource_children(history_id).await?;
        let mut had_agent_error = false;
        let mut canceled_children = 0usize;

        for child in children {
            if child.status.is_terminal() {
                continue;
            }
            // Aggregation is suppressed here: the group's terminal state
            // is decided below, not by whichever child cancels last.
            let attempt = self.try_cancel(&child, ignore_agent_errors, false).await?;
            had_agent_error |= attempt.agent_error;
            canceled_children += usize::from(attempt.canceled);
        }

        tracing::info!(
            history = %history_id,
            canceled_children,
            had_agent_error,
            "processed group cancel"
        );

        if !had_agent_error || ignore_agent_errors {
            if self
                .ctx
                .histories
                .complete_group(
                    history_id,
                    OperationStatus::Canceled,
                    None,
                    Utc::now(),
                )
                .await?
            {
                if let Some(updated) = self.ctx.histories.group(history_id).await? {
                    self.ctx
                        .notifier
                        .notify(&OperationHistory::Group(updated))
                        .await;
                }
            }
        } else {
            tracing::warn!(
                history = %history_id,
                "group left in progress: agent errors during cancel"
            );
        }

        self.ctx
            .histories
            .group(history_id)
            .await?
            .ok_or_else(|| SchedError::HistoryNotFound(history_id.to_string()))
    }

    /// Run the agent-side cancel protocol for one history row and record
    /// the result.
    async fn try_cancel(
        &self,
        history: &ResourceOperationHistory,
        ignore_agent_errors: bool,
        aggregate: bool,
    ) -> SchedResult<CancelAttempt> {
        let mut canceled = false;
        let mut agent_error = false;
        let mut detail: Option<String> = None;

        let reachable = match self
            .ctx
            .agents
            .ping(history.resource_id, self.ctx.config.agent_ping_timeout)
            .await
        {
            Ok(up) => up,
            Err(e) => {
                tracing::warn!(
                    history = %history.id,
                    resource = %history.resource_id,
                    error = %e,
                    "agent unreachable during cancel"
                );
                detail = Some(format!("Agent could not be reached: {e}"));
                agent_error = true;
                false
            }
        };

        if reachable {
            match self
                .ctx
                .agents
                .cancel(&history.job_ref, history.resource_id)
                .await
            {
                Ok(results) => match results.interrupted_state {
                    InterruptedState::Finished => {
                        // Too late; the normal completion callback wins.
                        tracing::info!(
                            history = %history.id,
                            "cancel arrived after the operation finished"
                        );
                    }
                    state @ (InterruptedState::Queued
                    | InterruptedState::Running
                    | InterruptedState::Unknown) => {
                        canceled = true;
                        detail = Some(match results.details {
                            Some(d) => format!("Interrupted while {state}: {d}"),
                            None => format!("Interrupted while {state}"),
                        });
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        history = %history.id,
                        error = %e,
                        "agent errored on cancel request"
                    );
                    detail = Some(format!("Agent failed to process the cancel: {e}"));
                    agent_error = true;
                }
            }
        } else if !agent_error {
            // The agent answered the ping but reported itself not ready.
            detail = Some("Agent is not ready to process requests".to_string());
            agent_error = true;
        }

        if canceled || (agent_error && ignore_agent_errors) {
            let outcome = ResourceOutcome::canceled(detail, Utc::now());
            if self
                .ctx
                .histories
                .complete_resource(history.id, &outcome)
                .await?
            {
                if let Some(updated) = self.ctx.histories.resource(history.id).await? {
                    self.ctx
                        .notifier
                        .notify(&OperationHistory::Resource(updated))
                        .await;
                }
                if aggregate {
                    if let Some(group) = history.group_history_id {
                        aggregate_group(&self.ctx, group).await?;
                    }
                }
            }
        }

        Ok(CancelAttempt {
            canceled,
            agent_error,
        })
    }
}
