//! Operation manager: the public entry point of the scheduling core.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use drover_agent::{AgentClient, CompletionListener, ResourceId};

use crate::cancel::CancellationCoordinator;
use crate::completion::CompletionService;
use crate::definition::{GroupId, Inventory};
use crate::dispatch::ResourceDispatcher;
use crate::error::{SchedError, SchedResult};
use crate::group::GroupOrchestrator;
use crate::history::{
    GroupOperationHistory, HistoryFilter, HistoryId, OperationStatus, ResourceOperationHistory,
};
use crate::notifier::AlertNotifier;
use crate::persistence::{HistoryStore, ScheduleStore};
use crate::schedule::{ScheduleJobId, ScheduleRecord, ScheduleTarget};
use crate::sweeper::{SweepStats, TimeoutSweeper};
use crate::trigger::{JobDetail, Trigger};

/// Configuration for the operation manager.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Default timeout for operations whose parameters and definition
    /// specify none. When unset, a one-hour fallback applies.
    pub default_operation_timeout: Option<Duration>,

    /// How long an unstarted operation may sit before the sweeper gives
    /// up on the agent ever starting it.
    pub never_started_ceiling: Duration,

    /// How often an ordered group fire polls the current member for
    /// completion.
    pub ordered_poll_interval: Duration,

    /// Upper bound on how long an ordered group fire waits for a single
    /// member before giving up on the whole fire.
    pub ordered_poll_ceiling: Duration,

    /// Bound on the liveness ping issued before a cancel request.
    pub agent_ping_timeout: Duration,

    /// Interval between timeout sweeps.
    pub sweep_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_operation_timeout: None,
            never_started_ceiling: Duration::from_secs(86400), // 24 hours
            ordered_poll_interval: Duration::from_secs(5),
            ordered_poll_ceiling: Duration::from_secs(86400),
            agent_ping_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Shared dependencies of every scheduling component.
pub struct SchedContext {
    /// Manager configuration.
    pub config: SchedulerConfig,
    /// External trigger engine.
    pub engine: Arc<dyn crate::trigger::TriggerEngine>,
    /// Inventory and identity systems.
    pub inventory: Arc<dyn Inventory>,
    /// Outbound agent client.
    pub agents: Arc<dyn AgentClient>,
    /// History persistence.
    pub histories: Arc<dyn HistoryStore>,
    /// Schedule record persistence.
    pub schedules: Arc<dyn ScheduleStore>,
    /// Lifecycle notification hook.
    pub notifier: Arc<dyn AlertNotifier>,
}

/// The scheduling and orchestration core.
///
/// Owns the full lifecycle: schedule registration against the trigger
/// engine, trigger fires, completion callbacks, cancellation, history
/// queries, and the timeout sweeper.
pub struct OperationManager {
    ctx: Arc<SchedContext>,
}

impl OperationManager {
    /// Create a manager from its context.
    pub fn new(ctx: SchedContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    /// Shared context, for wiring auxiliary components.
    pub fn context(&self) -> Arc<SchedContext> {
        self.ctx.clone()
    }

    /// The completion listener to hand to the agent transport.
    pub fn completion_listener(&self) -> Arc<dyn CompletionListener> {
        Arc::new(CompletionService::new(self.ctx.clone()))
    }

    /// Spawn the background timeout sweeper.
    pub fn start_sweeper(&self) -> tokio::task::JoinHandle<()> {
        Arc::new(TimeoutSweeper::new(self.ctx.clone())).start()
    }

    /// Run one timeout sweep synchronously.
    pub async fn check_timed_out_operations(&self) -> SchedResult<SweepStats> {
        TimeoutSweeper::new(self.ctx.clone()).run_once().await
    }

    // ---- scheduling ----------------------------------------------------

    /// Schedule an operation against a single resource.
    ///
    /// Validates the target and operation before touching the engine, so
    /// a bad request never leaves a half-registered schedule behind.
    pub async fn schedule_resource_operation(
        &self,
        resource: ResourceId,
        operation: &str,
        parameters: serde_json::Map<String, serde_json::Value>,
        trigger: Trigger,
        actor: &str,
        description: Option<&str>,
    ) -> SchedResult<ScheduleRecord> {
        let target = self.ctx.inventory.resource(resource).await?;
        self.ctx
            .inventory
            .operation_definition(&target.resource_type, operation)
            .await?;

        let mut record =
            ScheduleRecord::for_resource(resource, operation, parameters, actor, trigger);
        if let Some(description) = description {
            record = record.with_description(description);
        }

        self.register(record).await
    }

    /// Schedule an operation against a group.
    ///
    /// `execution_order` selects ordered execution; `halt_on_failure`
    /// only applies when it is set.
    #[allow(clippy::too_many_arguments)]
    pub async fn schedule_group_operation(
        &self,
        group: GroupId,
        execution_order: Option<Vec<ResourceId>>,
        halt_on_failure: bool,
        operation: &str,
        parameters: serde_json::Map<String, serde_json::Value>,
        trigger: Trigger,
        actor: &str,
        description: Option<&str>,
    ) -> SchedResult<ScheduleRecord> {
        let target = self.ctx.inventory.group(group).await?;
        self.ctx
            .inventory
            .operation_definition(&target.resource_type, operation)
            .await?;

        let mut record = ScheduleRecord::for_group(
            group,
            execution_order,
            halt_on_failure,
            operation,
            parameters,
            actor,
            trigger,
        );
        if let Some(description) = description {
            record = record.with_description(description);
        }

        self.register(record).await
    }

    /// Register a validated schedule with the engine and the tracking
    /// store.
    async fn register(&self, mut record: ScheduleRecord) -> SchedResult<ScheduleRecord> {
        let detail = JobDetail {
            id: record.id.clone(),
            kind: record.target.job_kind(),
        };
        self.ctx
            .engine
            .schedule_job(&detail, &record.trigger.to_engine())
            .await?;

        record.next_fire_time = self.engine_next_fire_time(&record.id).await;
        self.ctx.schedules.create_schedule(&record).await?;

        tracing::info!(
            schedule = %record.id,
            operation = %record.operation_name,
            trigger = %record.trigger,
            "registered operation schedule"
        );
        Ok(record)
    }

    /// Remove a schedule from the engine and the tracking store.
    ///
    /// Returns whether anything was actually removed. In-flight
    /// histories are untouched.
    pub async fn unschedule(&self, id: &ScheduleJobId) -> SchedResult<bool> {
        let engine_had_it = self.ctx.engine.delete_job(id).await?;
        let store_had_it = self.ctx.schedules.delete_schedule(id).await?;
        Ok(engine_had_it || store_had_it)
    }

    /// Look up a schedule record.
    pub async fn schedule(&self, id: &ScheduleJobId) -> SchedResult<ScheduleRecord> {
        self.ctx
            .schedules
            .schedule(id)
            .await?
            .ok_or_else(|| SchedError::ScheduleNotFound(id.to_string()))
    }

    /// List all schedule records.
    pub async fn schedules(&self) -> SchedResult<Vec<ScheduleRecord>> {
        self.ctx.schedules.list_schedules().await
    }

    // ---- trigger fires -------------------------------------------------

    /// Entry point for a trigger fire against a resource schedule.
    pub async fn fire_resource_operation(
        &self,
        id: &ScheduleJobId,
    ) -> SchedResult<ResourceOperationHistory> {
        let record = self.schedule(id).await?;
        self.reconcile_schedule(&record).await;

        let ScheduleTarget::Resource(resource) = record.target else {
            return Err(SchedError::Internal(format!(
                "resource fire for group schedule {id}"
            )));
        };

        ResourceDispatcher::new(self.ctx.clone())
            .dispatch(&record, resource, None)
            .await
    }

    /// Entry point for a trigger fire against a group schedule.
    pub async fn fire_group_operation(
        &self,
        id: &ScheduleJobId,
    ) -> SchedResult<GroupOperationHistory> {
        let record = self.schedule(id).await?;
        self.reconcile_schedule(&record).await;

        if !matches!(record.target, ScheduleTarget::Group { .. }) {
            return Err(SchedError::Internal(format!(
                "group fire for resource schedule {id}"
            )));
        }

        GroupOrchestrator::new(self.ctx.clone()).execute(&record).await
    }

    /// Bring the tracking record in line with the engine at fire time:
    /// refresh the mirrored next fire time, or delete the record when
    /// the engine has no further fire. Failures here must not block the
    /// fire itself, so they are logged and swallowed.
    async fn reconcile_schedule(&self, record: &ScheduleRecord) {
        match self.engine_next_fire_time(&record.id).await {
            Some(next) => {
                if let Err(e) = self
                    .ctx
                    .schedules
                    .update_next_fire_time(&record.id, Some(next))
                    .await
                {
                    tracing::warn!(schedule = %record.id, error = %e, "failed to refresh schedule");
                }
            }
            None => {
                tracing::debug!(schedule = %record.id, "final fire; removing schedule record");
                if let Err(e) = self.ctx.schedules.delete_schedule(&record.id).await {
                    tracing::warn!(schedule = %record.id, error = %e, "failed to remove schedule");
                }
            }
        }
    }

    /// Earliest engine-reported next fire time for a job, if any.
    async fn engine_next_fire_time(&self, id: &ScheduleJobId) -> Option<DateTime<Utc>> {
        match self.ctx.engine.triggers_of_job(id).await {
            Ok(triggers) => triggers.iter().filter_map(|t| t.next_fire_time).min(),
            Err(e) => {
                tracing::warn!(schedule = %id, error = %e, "failed to query engine triggers");
                None
            }
        }
    }

    // ---- cancellation --------------------------------------------------

    /// Cancel an in-progress resource operation.
    pub async fn cancel_resource_operation(
        &self,
        history: HistoryId,
        ignore_agent_errors: bool,
    ) -> SchedResult<ResourceOperationHistory> {
        CancellationCoordinator::new(self.ctx.clone())
            .cancel_resource(history, ignore_agent_errors)
            .await
    }

    /// Cancel an in-progress group operation and its live children.
    pub async fn cancel_group_operation(
        &self,
        history: HistoryId,
        ignore_agent_errors: bool,
    ) -> SchedResult<GroupOperationHistory> {
        CancellationCoordinator::new(self.ctx.clone())
            .cancel_group(history, ignore_agent_errors)
            .await
    }

    // ---- history management --------------------------------------------

    /// Look up a resource history.
    pub async fn resource_history(&self, id: HistoryId) -> SchedResult<ResourceOperationHistory> {
        self.ctx
            .histories
            .resource(id)
            .await?
            .ok_or_else(|| SchedError::HistoryNotFound(id.to_string()))
    }

    /// Look up a group history.
    pub async fn group_history(&self, id: HistoryId) -> SchedResult<GroupOperationHistory> {
        self.ctx
            .histories
            .group(id)
            .await?
            .ok_or_else(|| SchedError::HistoryNotFound(id.to_string()))
    }

    /// List resource histories matching a filter.
    pub async fn resource_histories(
        &self,
        filter: &HistoryFilter,
    ) -> SchedResult<Vec<ResourceOperationHistory>> {
        self.ctx.histories.list_resources(filter).await
    }

    /// List group histories matching a filter.
    pub async fn group_histories(
        &self,
        filter: &HistoryFilter,
    ) -> SchedResult<Vec<GroupOperationHistory>> {
        self.ctx.histories.list_groups(filter).await
    }

    /// Delete a resource history.
    ///
    /// In-progress histories are refused unless `purge_in_progress` is
    /// set; purging skips the agent entirely, so an operation that is
    /// actually still running will simply have no row to report into.
    pub async fn delete_resource_history(
        &self,
        id: HistoryId,
        purge_in_progress: bool,
    ) -> SchedResult<()> {
        let history = self.resource_history(id).await?;
        if history.status == OperationStatus::InProgress && !purge_in_progress {
            return Err(SchedError::InvalidHistoryState {
                expected: "a terminal status".to_string(),
                found: history.status.name().to_string(),
            });
        }
        self.ctx.histories.delete_resource(id).await?;
        Ok(())
    }

    /// Delete a group history and all of its children.
    ///
    /// Same in-progress gate as [`Self::delete_resource_history`],
    /// applied to the group row; children go with the group regardless
    /// of their own status.
    pub async fn delete_group_history(
        &self,
        id: HistoryId,
        purge_in_progress: bool,
    ) -> SchedResult<()> {
        let group = self.group_history(id).await?;
        if group.status == OperationStatus::InProgress && !purge_in_progress {
            return Err(SchedError::InvalidHistoryState {
                expected: "a terminal status".to_string(),
                found: group.status.name().to_string(),
            });
        }

        for child in &group.children {
            self.ctx.histories.delete_resource(*child).await?;
        }
        self.ctx.histories.delete_group(id).await?;
        Ok(())
    }
}
