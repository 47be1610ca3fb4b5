//! Operation history types.
//!
//! A history row records one invocation attempt and its terminal outcome.
//! The state machine:
//!
//! ```text
//!   dispatch ──→ InProgress ──→ Success
//!                    │
//!                    ├──→ Failure
//!                    │
//!                    └──→ Canceled
//! ```
//!
//! **Invariants:**
//! - Exactly one history row is created per trigger fire per target.
//! - Transitions are monotonic — once terminal, a history never changes
//!   status again. Every writer goes through the store's compare-and-set
//!   methods, because trigger fires, agent callbacks, the sweeper, and
//!   user cancels all race against the same rows.
//! - Group and child histories are independent rows linked by ID only:
//!   the group owns an ordered list of child IDs, each child carries an
//!   optional back-reference, and deleting either side never cascades
//!   implicitly.

use chrono::{DateTime, Utc};
use drover_agent::{JobRef, ResourceId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::definition::{GroupId, OperationDefinition};

/// Unique identifier for a history row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryId(pub Uuid);

impl HistoryId {
    /// Create a new random history ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a history ID from a string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for HistoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for HistoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of an operation invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    /// The invocation has been dispatched and no outcome is known yet.
    InProgress,
    /// The operation completed successfully.
    Success,
    /// The operation failed, timed out, or could not be dispatched.
    Failure,
    /// The invocation was canceled before a normal outcome arrived.
    Canceled,
}

impl OperationStatus {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::InProgress)
    }

    /// Check if the operation completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, OperationStatus::Success)
    }

    /// Canonical uppercase name, used in messages and storage.
    pub fn name(&self) -> &'static str {
        match self {
            OperationStatus::InProgress => "INPROGRESS",
            OperationStatus::Success => "SUCCESS",
            OperationStatus::Failure => "FAILURE",
            OperationStatus::Canceled => "CANCELED",
        }
    }

    /// Parse a status from its canonical name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INPROGRESS" => Some(OperationStatus::InProgress),
            "SUCCESS" => Some(OperationStatus::Success),
            "FAILURE" => Some(OperationStatus::Failure),
            "CANCELED" => Some(OperationStatus::Canceled),
            _ => None,
        }
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// History of one operation invocation against a single resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceOperationHistory {
    /// Unique row identifier.
    pub id: HistoryId,

    /// Invocation reference shared with the agent.
    pub job_ref: JobRef,

    /// Actor the invocation ran on behalf of.
    pub actor: String,

    /// Definition snapshot taken at dispatch time.
    pub definition: OperationDefinition,

    /// Target resource.
    pub resource_id: ResourceId,

    /// Target resource name, snapshotted for messages.
    pub resource_name: String,

    /// Invocation parameters. Deep-copied at dispatch so repeated fires
    /// of the same schedule never alias each other's parameters.
    pub parameters: serde_json::Map<String, serde_json::Value>,

    /// Current status.
    pub status: OperationStatus,

    /// Error detail for FAILURE (and some CANCELED) outcomes.
    pub error_message: Option<String>,

    /// Results payload, set only on SUCCESS.
    pub results: Option<serde_json::Value>,

    /// When the row was created (dispatch time).
    pub created_time: DateTime<Utc>,

    /// When the agent acknowledged the start; `None` until then.
    pub started_time: Option<DateTime<Utc>>,

    /// When a terminal status was recorded.
    pub completed_time: Option<DateTime<Utc>>,

    /// Owning group history, when this invocation was part of a group
    /// fire. Lookup-only back-reference.
    pub group_history_id: Option<HistoryId>,
}

impl ResourceOperationHistory {
    /// Create a new in-progress history row.
    pub fn new(
        job_ref: JobRef,
        actor: impl Into<String>,
        definition: OperationDefinition,
        resource_id: ResourceId,
        resource_name: impl Into<String>,
        parameters: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: HistoryId::new(),
            job_ref,
            actor: actor.into(),
            definition,
            resource_id,
            resource_name: resource_name.into(),
            parameters,
            status: OperationStatus::InProgress,
            error_message: None,
            results: None,
            created_time: Utc::now(),
            started_time: None,
            completed_time: None,
            group_history_id: None,
        }
    }

    /// Attach the owning group history.
    pub fn with_group(mut self, group_history_id: HistoryId) -> Self {
        self.group_history_id = Some(group_history_id);
        self
    }

    /// Elapsed time in milliseconds: now−created while in progress,
    /// completion−created once terminal.
    pub fn duration_ms(&self, now: DateTime<Utc>) -> i64 {
        let end = self.completed_time.unwrap_or(now);
        (end - self.created_time).num_milliseconds()
    }
}

/// History of one operation invocation fanned out across a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupOperationHistory {
    /// Unique row identifier.
    pub id: HistoryId,

    /// Invocation reference for the group fire.
    pub job_ref: JobRef,

    /// Actor the invocation ran on behalf of.
    pub actor: String,

    /// Definition snapshot taken at dispatch time.
    pub definition: OperationDefinition,

    /// Target group.
    pub group_id: GroupId,

    /// Target group name, snapshotted for messages.
    pub group_name: String,

    /// Invocation parameters snapshot.
    pub parameters: serde_json::Map<String, serde_json::Value>,

    /// Current status.
    pub status: OperationStatus,

    /// Error detail; for groups this enumerates the children that did
    /// not succeed, or explains a dispatch/timeout failure.
    pub error_message: Option<String>,

    /// When the row was created.
    pub created_time: DateTime<Utc>,

    /// When a terminal status was recorded.
    pub completed_time: Option<DateTime<Utc>>,

    /// Ordered child history IDs, in dispatch order. May be empty when
    /// the group had no members at dispatch time.
    pub children: Vec<HistoryId>,

    /// Set once the orchestrator has dispatched every member it will
    /// ever dispatch. Aggregation must not finalize the group before
    /// then, or a fast early member could complete a half-dispatched
    /// group.
    #[serde(default)]
    pub fanout_complete: bool,
}

impl GroupOperationHistory {
    /// Create a new in-progress group history row.
    pub fn new(
        job_ref: JobRef,
        actor: impl Into<String>,
        definition: OperationDefinition,
        group_id: GroupId,
        group_name: impl Into<String>,
        parameters: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: HistoryId::new(),
            job_ref,
            actor: actor.into(),
            definition,
            group_id,
            group_name: group_name.into(),
            parameters,
            status: OperationStatus::InProgress,
            error_message: None,
            created_time: Utc::now(),
            completed_time: None,
            children: Vec::new(),
            fanout_complete: false,
        }
    }

    /// Elapsed time in milliseconds, as for resource histories.
    pub fn duration_ms(&self, now: DateTime<Utc>) -> i64 {
        let end = self.completed_time.unwrap_or(now);
        (end - self.created_time).num_milliseconds()
    }
}

/// Either shape of history, for code paths that handle both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OperationHistory {
    /// Single-resource invocation.
    Resource(ResourceOperationHistory),
    /// Group invocation.
    Group(GroupOperationHistory),
}

impl OperationHistory {
    /// Row identifier.
    pub fn id(&self) -> HistoryId {
        match self {
            OperationHistory::Resource(h) => h.id,
            OperationHistory::Group(h) => h.id,
        }
    }

    /// Current status.
    pub fn status(&self) -> OperationStatus {
        match self {
            OperationHistory::Resource(h) => h.status,
            OperationHistory::Group(h) => h.status,
        }
    }
}

/// Filter for listing histories.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    /// Match any of these statuses.
    pub status: Option<Vec<OperationStatus>>,

    /// Match a specific target resource (resource histories only).
    pub resource_id: Option<ResourceId>,

    /// Match a specific target group (group histories only).
    pub group_id: Option<GroupId>,

    /// Creation time range.
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,

    /// Include only terminal histories.
    pub completed_only: bool,

    /// Include only in-progress histories.
    pub pending_only: bool,

    /// Maximum number of results.
    pub limit: Option<usize>,
}

impl HistoryFilter {
    /// Filter for terminal histories.
    pub fn completed() -> Self {
        Self {
            completed_only: true,
            ..Default::default()
        }
    }

    /// Filter for in-progress histories.
    pub fn pending() -> Self {
        Self {
            pending_only: true,
            ..Default::default()
        }
    }

    /// Restrict to a target resource.
    pub fn for_resource(mut self, resource_id: ResourceId) -> Self {
        self.resource_id = Some(resource_id);
        self
    }

    /// Restrict to a target group.
    pub fn for_group(mut self, group_id: GroupId) -> Self {
        self.group_id = Some(group_id);
        self
    }

    /// Restrict the creation time range.
    pub fn created_between(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.created_after = after;
        self.created_before = before;
        self
    }

    /// Limit results.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches_common(&self, status: OperationStatus, created: DateTime<Utc>) -> bool {
        if let Some(ref statuses) = self.status {
            if !statuses.contains(&status) {
                return false;
            }
        }
        if self.completed_only && !status.is_terminal() {
            return false;
        }
        if self.pending_only && status.is_terminal() {
            return false;
        }
        if let Some(after) = self.created_after {
            if created < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if created > before {
                return false;
            }
        }
        true
    }

    /// Check if a resource history matches this filter.
    pub fn matches_resource(&self, history: &ResourceOperationHistory) -> bool {
        if let Some(id) = self.resource_id {
            if history.resource_id != id {
                return false;
            }
        }
        self.matches_common(history.status, history.created_time)
    }

    /// Check if a group history matches this filter.
    pub fn matches_group(&self, history: &GroupOperationHistory) -> bool {
        if let Some(id) = self.group_id {
            if history.group_id != id {
                return false;
            }
        }
        self.matches_common(history.status, history.created_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn make_resource_history() -> ResourceOperationHistory {
        ResourceOperationHistory::new(
            JobRef::new("job", "group", 0),
            "admin",
            OperationDefinition::new("restart", "web-server"),
            ResourceId(1),
            "web-01",
            serde_json::Map::new(),
        )
    }

    #[test]
    fn test_status_terminal() {
        assert!(!OperationStatus::InProgress.is_terminal());
        assert!(OperationStatus::Success.is_terminal());
        assert!(OperationStatus::Failure.is_terminal());
        assert!(OperationStatus::Canceled.is_terminal());
    }

    #[test]
    fn test_status_name_roundtrip() {
        for status in [
            OperationStatus::InProgress,
            OperationStatus::Success,
            OperationStatus::Failure,
            OperationStatus::Canceled,
        ] {
            assert_eq!(OperationStatus::parse(status.name()), Some(status));
        }
        assert_eq!(OperationStatus::parse("bogus"), None);
    }

    #[test]
    fn test_duration_in_progress_tracks_now() {
        let history = make_resource_history();
        let now = history.created_time + Duration::milliseconds(1500);
        assert_eq!(history.duration_ms(now), 1500);
    }

    #[test]
    fn test_duration_frozen_after_completion() {
        let mut history = make_resource_history();
        history.status = OperationStatus::Success;
        history.completed_time = Some(history.created_time + Duration::milliseconds(250));

        let much_later = history.created_time + Duration::hours(5);
        assert_eq!(history.duration_ms(much_later), 250);
    }

    #[test]
    fn test_filter_by_status_and_resource() {
        let mut history = make_resource_history();
        history.status = OperationStatus::Failure;

        let filter = HistoryFilter::completed().for_resource(ResourceId(1));
        assert!(filter.matches_resource(&history));

        let filter = HistoryFilter::completed().for_resource(ResourceId(2));
        assert!(!filter.matches_resource(&history));

        let filter = HistoryFilter::pending();
        assert!(!filter.matches_resource(&history));
    }

    #[test]
    fn test_filter_time_range() {
        let history = make_resource_history();
        let filter = HistoryFilter::default().created_between(
            Some(history.created_time - Duration::minutes(1)),
            Some(history.created_time + Duration::minutes(1)),
        );
        assert!(filter.matches_resource(&history));

        let filter = HistoryFilter::default()
            .created_between(Some(history.created_time + Duration::minutes(1)), None);
        assert!(!filter.matches_resource(&history));
    }

    #[test]
    fn test_memberless_group_history() {
        let group = GroupOperationHistory::new(
            JobRef::new("job", "group", 0),
            "admin",
            OperationDefinition::new("restart", "web-server"),
            GroupId(9),
            "web-tier",
            serde_json::Map::new(),
        );
        assert!(group.children.is_empty());
        assert_eq!(group.status, OperationStatus::InProgress);
    }
}
