//! Group orchestration: fan one trigger fire out across a group.

use std::sync::Arc;

use chrono::Utc;
use drover_agent::{JobRef, ResourceId};

use crate::completion::aggregate_group;
use crate::dispatch::ResourceDispatcher;
use crate::error::SchedResult;
use crate::history::{GroupOperationHistory, OperationHistory, OperationStatus};
use crate::manager::SchedContext;
use crate::schedule::{ScheduleRecord, ScheduleTarget};

/// Error message recorded when an ordered group gives up polling a
/// member that never reached a terminal state.
const ORDERED_WAIT_EXCEEDED: &str =
    "Stopped waiting for a member operation to complete; the group ran past its polling ceiling";

/// Executes one fire of a group schedule.
///
/// The group history is created up front so a crash mid-fan-out leaves a
/// visible in-progress row for the sweeper to reap. Ordered execution
/// dispatches members one at a time and waits for each; unordered
/// execution dispatches everything back to back and lets completion
/// callbacks finish the group.
pub struct GroupOrchestrator {
    ctx: Arc<SchedContext>,
    dispatcher: ResourceDispatcher,
}

impl GroupOrchestrator {
    /// Create an orchestrator over the given context.
    pub fn new(ctx: Arc<SchedContext>) -> Self {
        let dispatcher = ResourceDispatcher::new(ctx.clone());
        Self { ctx, dispatcher }
    }

    /// Execute one fire of `schedule`, which must target a group.
    pub async fn execute(&self, schedule: &ScheduleRecord) -> SchedResult<GroupOperationHistory> {
        let ScheduleTarget::Group {
            group_id,
            ref execution_order,
            halt_on_failure,
        } = schedule.target
        else {
            return Err(crate::SchedError::Internal(format!(
                "group orchestrator fired for non-group schedule {}",
                schedule.id
            )));
        };

        let group = self.ctx.inventory.group(group_id).await?;
        let definition = self
            .ctx
            .inventory
            .operation_definition(&group.resource_type, &schedule.operation_name)
            .await?;

        let history = GroupOperationHistory::new(
            JobRef::new(
                schedule.id.job_name.clone(),
                schedule.id.job_group.clone(),
                Utc::now().timestamp_millis(),
            ),
            schedule.actor.clone(),
            definition,
            group_id,
            group.name.clone(),
            schedule.parameters.clone(),
        );
        let history_id = history.id;

        self.ctx.histories.insert_group(&history).await?;
        self.ctx
            .notifier
            .notify(&OperationHistory::Group(history.clone()))
            .await;

        let members: Vec<ResourceId> = match execution_order {
            Some(order) => order.clone(),
            None => group.members.clone(),
        };

        tracing::info!(
            history = %history_id,
            group = %group_id,
            members = members.len(),
            ordered = execution_order.is_some(),
            "dispatching group operation"
        );

        if execution_order.is_some() {
            self.run_ordered(schedule, &members, history_id, halt_on_failure)
                .await?;
        } else {
            self.run_unordered(schedule, &members, history_id).await?;
        }

        // Fan-out is over; from here on whoever sees the last child
        // finish may finalize the group. Also finalizes memberless
        // groups immediately.
        self.ctx
            .histories
            .mark_group_fanout_complete(history_id)
            .await?;
        aggregate_group(&self.ctx, history_id).await?;

        self.ctx
            .histories
            .group(history_id)
            .await?
            .ok_or_else(|| crate::SchedError::HistoryNotFound(history_id.to_string()))
    }

    /// Dispatch members one at a time, waiting for each to finish.
    async fn run_ordered(
        &self,
        schedule: &ScheduleRecord,
        members: &[ResourceId],
        history_id: crate::history::HistoryId,
        halt_on_failure: bool,
    ) -> SchedResult<()> {
        for &member in members {
            let child = match self.dispatcher.dispatch(schedule, member, Some(history_id)).await {
                Ok(child) => child,
                Err(e) => {
                    // Pre-history validation failure; nothing was sent.
                    self.ctx
                        .histories
                        .record_group_dispatch_error(
                            history_id,
                            &format!("Failed to dispatch to resource {member}: {e}"),
                        )
                        .await?;
                    if halt_on_failure {
                        break;
                    }
                    continue;
                }
            };
            self.ctx.histories.attach_child(history_id, child.id).await?;

            let final_status = if child.status.is_terminal() {
                child.status
            } else {
                match self.wait_for_child(child.id).await? {
                    Some(status) => status,
                    None => {
                        // Ceiling hit; the sweeper owns the child from
                        // here. The member counts as not successful, but
                        // only halt_on_failure may stop the sequence.
                        self.ctx
                            .histories
                            .record_group_dispatch_error(history_id, ORDERED_WAIT_EXCEEDED)
                            .await?;
                        OperationStatus::Failure
                    }
                }
            };

            if !final_status.is_success() && halt_on_failure {
                tracing::info!(
                    history = %history_id,
                    member = %member,
                    status = %final_status,
                    "halting ordered group after member failure"
                );
                break;
            }
        }
        Ok(())
    }

    /// Dispatch all members without waiting between them.
    async fn run_unordered(
        &self,
        schedule: &ScheduleRecord,
        members: &[ResourceId],
        history_id: crate::history::HistoryId,
    ) -> SchedResult<()> {
        for &member in members {
            match self.dispatcher.dispatch(schedule, member, Some(history_id)).await {
                Ok(child) => {
                    self.ctx.histories.attach_child(history_id, child.id).await?;
                }
                Err(e) => {
                    self.ctx
                        .histories
                        .record_group_dispatch_error(
                            history_id,
                            &format!("Failed to dispatch to resource {member}: {e}"),
                        )
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Poll a child history until it reaches a terminal state.
    ///
    /// Returns `None` when the polling ceiling elapsed first; the child
    /// stays in progress and the timeout sweeper owns it from there.
    async fn wait_for_child(
        &self,
        child_id: crate::history::HistoryId,
    ) -> SchedResult<Option<OperationStatus>> {
        let poll = self.ctx.config.ordered_poll_interval;
        let ceiling = self.ctx.config.ordered_poll_ceiling;

        let waited = tokio::time::timeout(ceiling, async {
            loop {
                tokio::time::sleep(poll).await;
                match self.ctx.histories.resource(child_id).await {
                    Ok(Some(child)) if child.status.is_terminal() => return Ok(child.status),
                    Ok(Some(_)) => continue,
                    Ok(None) => {
                        // Row deleted out from under us; stop waiting.
                        return Ok(OperationStatus::Failure);
                    }
                    Err(e) => return Err(e),
                }
            }
        })
        .await;

        match waited {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }
}
