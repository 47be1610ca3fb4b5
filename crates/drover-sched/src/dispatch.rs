//! Per-resource dispatch: turn one trigger fire into one agent call.

use std::sync::Arc;

use chrono::Utc;
use drover_agent::{JobRef, ResourceId};

use crate::error::SchedResult;
use crate::history::{HistoryId, OperationHistory, OperationStatus, ResourceOperationHistory};
use crate::manager::SchedContext;
use crate::persistence::ResourceOutcome;
use crate::schedule::ScheduleRecord;

/// Dispatches a single resource operation to its agent.
///
/// One dispatch creates exactly one history row. Validation failures
/// (unknown resource, unsupported operation, no session) happen before
/// the row exists and surface as plain errors; once the row is created,
/// a failed agent call is recorded on it instead of propagated.
pub struct ResourceDispatcher {
    ctx: Arc<SchedContext>,
}

impl ResourceDispatcher {
    /// Create a dispatcher over the given context.
    pub fn new(ctx: Arc<SchedContext>) -> Self {
        Self { ctx }
    }

    /// Dispatch one fire of `schedule` against `resource_id`.
    ///
    /// Returns the created history row. The row is `InProgress` when the
    /// agent accepted the call and `Failure` when dispatch itself failed;
    /// callers distinguish the two by status, not by `Err`.
    pub async fn dispatch(
        &self,
        schedule: &ScheduleRecord,
        resource_id: ResourceId,
        group_history: Option<HistoryId>,
    ) -> SchedResult<ResourceOperationHistory> {
        // Fires run on a session of their own, never one the actor might
        // be using interactively.
        let session = self.ctx.inventory.open_session(&schedule.actor).await?;

        let resource = self.ctx.inventory.resource(resource_id).await?;
        let definition = self
            .ctx
            .inventory
            .operation_definition(&resource.resource_type, &schedule.operation_name)
            .await?;

        let job_ref = self.job_ref_for(schedule, resource_id, group_history.is_some());

        let mut history = ResourceOperationHistory::new(
            job_ref.clone(),
            session.actor.clone(),
            definition,
            resource_id,
            resource.name.clone(),
            schedule.parameters.clone(),
        );
        if let Some(group) = group_history {
            history = history.with_group(group);
        }

        self.ctx.histories.insert_resource(&history).await?;
        self.ctx
            .notifier
            .notify(&OperationHistory::Resource(history.clone()))
            .await;

        tracing::info!(
            history = %history.id,
            resource = %resource_id,
            operation = %schedule.operation_name,
            "dispatching resource operation"
        );

        match self
            .ctx
            .agents
            .invoke(&job_ref, resource_id, &schedule.operation_name, &history.parameters)
            .await
        {
            Ok(()) => Ok(history),
            Err(e) => {
                tracing::warn!(
                    history = %history.id,
                    resource = %resource_id,
                    error = %e,
                    "agent rejected dispatch"
                );
                let outcome = ResourceOutcome::failure(e.to_string(), Utc::now());
                if self
                    .ctx
                    .histories
                    .complete_resource(history.id, &outcome)
                    .await?
                {
                    history.status = OperationStatus::Failure;
                    history.error_message = outcome.error_message.clone();
                    history.completed_time = Some(outcome.completed_time);
                    self.ctx
                        .notifier
                        .notify(&OperationHistory::Resource(history.clone()))
                        .await;
                }
                Ok(history)
            }
        }
    }

    /// Build a unique invocation reference for this fire.
    ///
    /// Direct fires reuse the schedule's job name; repeated fires differ
    /// by creation time. Group children dispatched in the same
    /// millisecond must still differ, so the member's resource ID is
    /// folded into the name.
    fn job_ref_for(
        &self,
        schedule: &ScheduleRecord,
        resource_id: ResourceId,
        in_group: bool,
    ) -> JobRef {
        let job_name = if in_group {
            format!("{}-{}", schedule.id.job_name, resource_id)
        } else {
            schedule.id.job_name.clone()
        };
        JobRef::new(
            job_name,
            schedule.id.job_group.clone(),
            Utc::now().timestamp_millis(),
        )
    }
}
