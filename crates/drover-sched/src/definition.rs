//! Operation definitions and the inventory boundary.
//!
//! Definitions, resources, and groups are owned by the external inventory
//! system; the core only reads them. The [`Inventory`] trait is the
//! capability interface the core consumes by dependency injection.

use async_trait::async_trait;
use drover_agent::ResourceId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SchedResult;

/// Invocation parameter that overrides the operation's timeout, in
/// seconds. Takes precedence over the definition's declared timeout.
pub const TIMEOUT_PARAM_NAME: &str = "timeout";

/// Identifier of a resource group in the inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub u32);

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata describing an operation an agent can execute.
///
/// Read-only from the core's perspective. Histories snapshot the
/// definition at dispatch time so messages keep their display names even
/// if the inventory later changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDefinition {
    /// Machine name of the operation.
    pub name: String,

    /// Human-readable display name.
    pub display_name: String,

    /// Resource type this operation is defined for.
    pub resource_type: String,

    /// Declared parameter schema, if the operation takes parameters.
    pub parameter_schema: Option<serde_json::Value>,

    /// Declared timeout in seconds, if the definition specifies one.
    pub timeout_secs: Option<u32>,
}

impl OperationDefinition {
    /// Create a definition with the display name defaulting to the name.
    pub fn new(name: impl Into<String>, resource_type: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            resource_type: resource_type.into(),
            parameter_schema: None,
            timeout_secs: None,
        }
    }

    /// Set the display name.
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    /// Set the declared timeout in seconds.
    pub fn with_timeout_secs(mut self, timeout_secs: u32) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }
}

/// A managed resource as seen by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Inventory identifier.
    pub id: ResourceId,
    /// Human-readable name, used in group error messages.
    pub name: String,
    /// Resource type, used to validate operation support.
    pub resource_type: String,
}

/// A resource group as seen by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceGroup {
    /// Inventory identifier.
    pub id: GroupId,
    /// Human-readable name.
    pub name: String,
    /// Resource type shared by all members; groups are homogeneous.
    pub resource_type: String,
    /// Current members. May legitimately be empty.
    pub members: Vec<ResourceId>,
}

/// A fresh, short-lived session for a scheduled actor.
///
/// Dispatch jobs run on behalf of the actor who created the schedule, but
/// never on a session the actor might be using interactively — each fire
/// opens its own.
#[derive(Debug, Clone)]
pub struct Session {
    /// The actor the session belongs to.
    pub actor: String,
    /// Session identifier.
    pub session_id: Uuid,
}

/// Read-only view of the inventory and identity systems.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Look up a resource by ID.
    async fn resource(&self, id: ResourceId) -> SchedResult<Resource>;

    /// Look up a group by ID.
    async fn group(&self, id: GroupId) -> SchedResult<ResourceGroup>;

    /// Look up the definition of `operation` for a resource type.
    ///
    /// Errors with [`crate::SchedError::UnsupportedOperation`] when the
    /// type does not define the operation — the gate that aborts a fire
    /// before any history row is created.
    async fn operation_definition(
        &self,
        resource_type: &str,
        operation: &str,
    ) -> SchedResult<OperationDefinition>;

    /// Open a fresh session for the given actor.
    async fn open_session(&self, actor: &str) -> SchedResult<Session>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_builder() {
        let def = OperationDefinition::new("restart", "web-server")
            .with_display_name("Restart Server")
            .with_timeout_secs(120);

        assert_eq!(def.name, "restart");
        assert_eq!(def.display_name, "Restart Server");
        assert_eq!(def.resource_type, "web-server");
        assert_eq!(def.timeout_secs, Some(120));
    }
}
