//! Persistence layer for histories and schedule records.
//!
//! Terminal transitions go through the compare-and-set methods
//! ([`HistoryStore::complete_resource`] and friends), which write only
//! while the row is still in progress and report whether the caller won.
//! Losing the race is normal operation, not an error.

mod memory_store;
mod sqlite_store;

pub use memory_store::MemoryStore;
pub use sqlite_store::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_agent::JobRef;

use crate::error::SchedResult;
use crate::history::{
    GroupOperationHistory, HistoryFilter, HistoryId, OperationStatus, ResourceOperationHistory,
};
use crate::schedule::{ScheduleJobId, ScheduleRecord};

/// Terminal outcome of a resource operation, applied atomically.
#[derive(Debug, Clone)]
pub struct ResourceOutcome {
    /// The terminal status to record.
    pub status: OperationStatus,
    /// Error detail for FAILURE/CANCELED outcomes.
    pub error_message: Option<String>,
    /// Results payload for SUCCESS outcomes.
    pub results: Option<serde_json::Value>,
    /// Observed start time, if one arrived with the outcome.
    pub started_time: Option<DateTime<Utc>>,
    /// When the outcome was recorded.
    pub completed_time: DateTime<Utc>,
}

impl ResourceOutcome {
    /// A successful outcome with the given results.
    pub fn success(results: serde_json::Value, completed_time: DateTime<Utc>) -> Self {
        Self {
            status: OperationStatus::Success,
            error_message: None,
            results: Some(results),
            started_time: None,
            completed_time,
        }
    }

    /// A failed outcome with the given error detail.
    pub fn failure(error: impl Into<String>, completed_time: DateTime<Utc>) -> Self {
        Self {
            status: OperationStatus::Failure,
            error_message: Some(error.into()),
            results: None,
            started_time: None,
            completed_time,
        }
    }

    /// A canceled outcome.
    pub fn canceled(error_message: Option<String>, completed_time: DateTime<Utc>) -> Self {
        Self {
            status: OperationStatus::Canceled,
            error_message,
            results: None,
            started_time: None,
            completed_time,
        }
    }

    /// Record the observed start time alongside the outcome.
    pub fn with_started_time(mut self, started_time: DateTime<Utc>) -> Self {
        self.started_time = Some(started_time);
        self
    }
}

/// Trait for persistent operation history storage.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Insert a new resource history row.
    async fn insert_resource(&self, history: &ResourceOperationHistory) -> SchedResult<()>;

    /// Insert a new group history row.
    async fn insert_group(&self, history: &GroupOperationHistory) -> SchedResult<()>;

    /// Load a resource history by ID.
    async fn resource(&self, id: HistoryId) -> SchedResult<Option<ResourceOperationHistory>>;

    /// Load a group history by ID.
    async fn group(&self, id: HistoryId) -> SchedResult<Option<GroupOperationHistory>>;

    /// Find the resource history created for an invocation reference.
    async fn find_resource_by_job_ref(
        &self,
        job_ref: &JobRef,
    ) -> SchedResult<Option<ResourceOperationHistory>>;

    /// Append a child to a group history's ordered child list.
    async fn attach_child(&self, group: HistoryId, child: HistoryId) -> SchedResult<()>;

    /// Load the child histories of a group, in dispatch order.
    async fn resource_children(
        &self,
        group: HistoryId,
    ) -> SchedResult<Vec<ResourceOperationHistory>>;

    /// Record the agent-acknowledged start time of a resource operation.
    /// Writes only while the row is in progress and unstarted; returns
    /// whether the write happened.
    async fn mark_resource_started(
        &self,
        id: HistoryId,
        started_time: DateTime<Utc>,
    ) -> SchedResult<bool>;

    /// Apply a terminal outcome to a resource history. Writes only while
    /// the row is still in progress; returns whether this caller won.
    async fn complete_resource(&self, id: HistoryId, outcome: &ResourceOutcome)
        -> SchedResult<bool>;

    /// Apply a terminal status to a group history, same discipline as
    /// [`Self::complete_resource`]. A `Some` error message replaces any
    /// accumulated dispatch-error notes; `None` keeps them.
    async fn complete_group(
        &self,
        id: HistoryId,
        status: OperationStatus,
        error_message: Option<String>,
        completed_time: DateTime<Utc>,
    ) -> SchedResult<bool>;

    /// Mark a group history as fully fanned out; aggregation only
    /// finalizes groups with this flag set. Returns false when the row
    /// is unknown or already terminal.
    async fn mark_group_fanout_complete(&self, id: HistoryId) -> SchedResult<bool>;

    /// Append a dispatch error note to an in-progress group history
    /// without changing its status. Returns false once the group is
    /// terminal.
    async fn record_group_dispatch_error(
        &self,
        id: HistoryId,
        message: &str,
    ) -> SchedResult<bool>;

    /// All resource histories still in progress.
    async fn in_progress_resources(&self) -> SchedResult<Vec<ResourceOperationHistory>>;

    /// All group histories still in progress.
    async fn in_progress_groups(&self) -> SchedResult<Vec<GroupOperationHistory>>;

    /// List resource histories matching a filter, newest first.
    async fn list_resources(
        &self,
        filter: &HistoryFilter,
    ) -> SchedResult<Vec<ResourceOperationHistory>>;

    /// List group histories matching a filter, newest first.
    async fn list_groups(&self, filter: &HistoryFilter)
        -> SchedResult<Vec<GroupOperationHistory>>;

    /// Delete a resource history. Returns false if unknown.
    async fn delete_resource(&self, id: HistoryId) -> SchedResult<bool>;

    /// Delete a group history. Children are not cascaded here; the
    /// manager decides what happens to them.
    async fn delete_group(&self, id: HistoryId) -> SchedResult<bool>;
}

/// Trait for persistent schedule record storage.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Insert a new schedule record.
    async fn create_schedule(&self, record: &ScheduleRecord) -> SchedResult<()>;

    /// Delete a schedule record. Returns false if unknown.
    async fn delete_schedule(&self, id: &ScheduleJobId) -> SchedResult<bool>;

    /// Refresh the mirrored next fire time. Returns false if unknown.
    async fn update_next_fire_time(
        &self,
        id: &ScheduleJobId,
        next_fire_time: Option<DateTime<Utc>>,
    ) -> SchedResult<bool>;

    /// Load a schedule record.
    async fn schedule(&self, id: &ScheduleJobId) -> SchedResult<Option<ScheduleRecord>>;

    /// List all schedule records, newest first.
    async fn list_schedules(&self) -> SchedResult<Vec<ScheduleRecord>>;
}
