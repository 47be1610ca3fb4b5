//! Schedule records — the persisted intent to fire an operation.
//!
//! A [`ScheduleRecord`] shadows a job registered with the trigger engine.
//! The engine is authoritative for fire-time computation; the record
//! exists so schedules can be listed and joined SQL-style, which the
//! engine itself cannot do. The two are reconciled on every fire and the
//! record is deleted once the engine reports no further fire.

use chrono::{DateTime, Utc};
use drover_agent::ResourceId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::definition::GroupId;
use crate::trigger::Trigger;

/// Identity of a schedule: the (name, group) pair registered with the
/// trigger engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduleJobId {
    /// Job name, unique within its group.
    pub job_name: String,
    /// Job group.
    pub job_group: String,
}

impl ScheduleJobId {
    /// Create a schedule job ID.
    pub fn new(job_name: impl Into<String>, job_group: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            job_group: job_group.into(),
        }
    }

    /// Generate a fresh job ID for an operation on a single resource.
    pub fn for_resource(resource: ResourceId) -> Self {
        Self::new(
            format!("drover-op-{}", Uuid::new_v4()),
            format!("drover-resource-{resource}"),
        )
    }

    /// Generate a fresh job ID for an operation on a group.
    pub fn for_group(group: GroupId) -> Self {
        Self::new(
            format!("drover-op-{}", Uuid::new_v4()),
            format!("drover-group-{group}"),
        )
    }
}

impl std::fmt::Display for ScheduleJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.job_name, self.job_group)
    }
}

/// What a schedule targets: one resource, or a group of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleTarget {
    /// A single managed resource.
    Resource(ResourceId),

    /// A resource group, fanned out by the group orchestrator.
    Group {
        /// The target group.
        group_id: GroupId,
        /// Explicit member order; `Some` selects ordered execution,
        /// `None` selects unordered concurrent dispatch.
        execution_order: Option<Vec<ResourceId>>,
        /// Stop dispatching further ordered members after one member's
        /// operation does not succeed. Ignored for unordered execution.
        halt_on_failure: bool,
    },
}

impl ScheduleTarget {
    /// Which dispatch job this target fires.
    pub fn job_kind(&self) -> crate::trigger::JobKind {
        match self {
            ScheduleTarget::Resource(_) => crate::trigger::JobKind::Resource,
            ScheduleTarget::Group { .. } => crate::trigger::JobKind::Group,
        }
    }
}

/// The persisted intent to fire an operation per a trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRecord {
    /// Schedule identity, unique.
    pub id: ScheduleJobId,

    /// What the schedule targets.
    pub target: ScheduleTarget,

    /// Name of the operation to invoke.
    pub operation_name: String,

    /// Invocation parameters, snapshotted at schedule time.
    pub parameters: serde_json::Map<String, serde_json::Value>,

    /// Identity of the actor who created the schedule.
    pub actor: String,

    /// Optional human-readable description.
    pub description: Option<String>,

    /// The trigger this schedule was registered with.
    pub trigger: Trigger,

    /// Next fire time mirrored from the trigger engine; refreshed on
    /// every fire.
    pub next_fire_time: Option<DateTime<Utc>>,

    /// When the schedule was created.
    pub created_at: DateTime<Utc>,
}

impl ScheduleRecord {
    /// Create a schedule record for a single resource.
    pub fn for_resource(
        resource: ResourceId,
        operation_name: impl Into<String>,
        parameters: serde_json::Map<String, serde_json::Value>,
        actor: impl Into<String>,
        trigger: Trigger,
    ) -> Self {
        Self {
            id: ScheduleJobId::for_resource(resource),
            target: ScheduleTarget::Resource(resource),
            operation_name: operation_name.into(),
            parameters,
            actor: actor.into(),
            description: None,
            trigger,
            next_fire_time: None,
            created_at: Utc::now(),
        }
    }

    /// Create a schedule record for a group.
    pub fn for_group(
        group_id: GroupId,
        execution_order: Option<Vec<ResourceId>>,
        halt_on_failure: bool,
        operation_name: impl Into<String>,
        parameters: serde_json::Map<String, serde_json::Value>,
        actor: impl Into<String>,
        trigger: Trigger,
    ) -> Self {
        Self {
            id: ScheduleJobId::for_group(group_id),
            target: ScheduleTarget::Group {
                group_id,
                execution_order,
                halt_on_failure,
            },
            operation_name: operation_name.into(),
            parameters,
            actor: actor.into(),
            description: None,
            trigger,
            next_fire_time: None,
            created_at: Utc::now(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_generation() {
        let a = ScheduleJobId::for_resource(ResourceId(7));
        let b = ScheduleJobId::for_resource(ResourceId(7));
        assert_ne!(a, b);
        assert_eq!(a.job_group, "drover-resource-7");

        let g = ScheduleJobId::for_group(GroupId(3));
        assert_eq!(g.job_group, "drover-group-3");
    }

    #[test]
    fn test_target_job_kind() {
        let resource = ScheduleTarget::Resource(ResourceId(1));
        assert_eq!(resource.job_kind(), crate::trigger::JobKind::Resource);

        let group = ScheduleTarget::Group {
            group_id: GroupId(1),
            execution_order: None,
            halt_on_failure: false,
        };
        assert_eq!(group.job_kind(), crate::trigger::JobKind::Group);
    }
}
