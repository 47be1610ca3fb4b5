//! Error handling for agent interactions.

use thiserror::Error;

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors that can occur when talking to a remote agent.
#[derive(Error, Debug)]
pub enum AgentError {
    /// The agent endpoint could not be reached.
    #[error("Agent unreachable for resource {resource}: {message}")]
    Unreachable { resource: u32, message: String },

    /// The agent rejected the request at submit time.
    #[error("Agent rejected the request: {0}")]
    Rejected(String),

    /// The request or response payload could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The agent did not answer within the allotted time.
    #[error("Agent call timed out after {0} ms")]
    Timeout(u64),

    /// The agent answered with something the client could not interpret.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AgentError::Unreachable {
            resource: 42,
            message: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Agent unreachable for resource 42: connection refused"
        );

        let err = AgentError::Timeout(5000);
        assert_eq!(err.to_string(), "Agent call timed out after 5000 ms");
    }
}
