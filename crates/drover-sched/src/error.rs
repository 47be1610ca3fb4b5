//! Error handling for the operation scheduler.

use thiserror::Error;

/// Result type for scheduler operations.
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors that can occur during scheduler operations.
#[derive(Error, Debug)]
pub enum SchedError {
    /// The operation name is not defined for the resource's type.
    #[error("Operation '{operation}' is not supported by resource type '{resource_type}'")]
    UnsupportedOperation {
        operation: String,
        resource_type: String,
    },

    /// Resource not found in the inventory.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Resource group not found in the inventory.
    #[error("Group not found: {0}")]
    GroupNotFound(String),

    /// The trigger is malformed or was rejected before reaching the engine.
    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),

    /// The underlying trigger engine rejected the schedule.
    #[error("Trigger engine rejected the schedule: {0}")]
    EngineRejected(String),

    /// Schedule record not found.
    #[error("Schedule not found: {0}")]
    ScheduleNotFound(String),

    /// History row not found.
    #[error("Operation history not found: {0}")]
    HistoryNotFound(String),

    /// The history is not in the state the requested action requires.
    #[error("Invalid history state: expected {expected}, found {found}")]
    InvalidHistoryState { expected: String, found: String },

    /// The agent could not be reached or refused the call.
    #[error("Agent error: {0}")]
    AgentError(String),

    /// Actor session could not be established.
    #[error("Session error for actor '{actor}': {message}")]
    SessionError { actor: String, message: String },

    /// Persistence error.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// SQLite database error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Internal scheduler error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<drover_agent::AgentError> for SchedError {
    fn from(e: drover_agent::AgentError) -> Self {
        SchedError::AgentError(e.to_string())
    }
}

impl From<rusqlite::Error> for SchedError {
    fn from(e: rusqlite::Error) -> Self {
        SchedError::DatabaseError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchedError::UnsupportedOperation {
            operation: "restart".to_string(),
            resource_type: "jboss-server".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Operation 'restart' is not supported by resource type 'jboss-server'"
        );

        let err = SchedError::InvalidHistoryState {
            expected: "INPROGRESS".to_string(),
            found: "SUCCESS".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid history state: expected INPROGRESS, found SUCCESS"
        );
    }

    #[test]
    fn test_agent_error_conversion() {
        let agent_err = drover_agent::AgentError::Rejected("bad payload".to_string());
        let err: SchedError = agent_err.into();
        assert!(matches!(err, SchedError::AgentError(_)));
        assert!(err.to_string().contains("bad payload"));
    }
}
