//! Invocation identity types.

use serde::{Deserialize, Serialize};

/// Identifier of a managed resource in the inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(pub u32);

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to one operation invocation attempt.
///
/// `job_name` and `job_group` identify the schedule that fired; the
/// creation timestamp makes each fire unique. The same reference travels
/// with the outbound [`crate::AgentClient::invoke`] call and comes back on
/// every inbound [`crate::CompletionListener`] callback, so both sides can
/// correlate an invocation without sharing database identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobRef {
    /// Name of the originating schedule job.
    pub job_name: String,
    /// Group of the originating schedule job.
    pub job_group: String,
    /// Millisecond timestamp of the fire that created this invocation.
    pub created_time_ms: i64,
}

impl JobRef {
    /// Create a new job reference.
    pub fn new(
        job_name: impl Into<String>,
        job_group: impl Into<String>,
        created_time_ms: i64,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            job_group: job_group.into(),
            created_time_ms,
        }
    }

    /// Parse a job reference from its wire form `name:group:created_ms`.
    ///
    /// Splits from the right so that job names may contain `:`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.rsplitn(3, ':');
        let created = parts.next()?.parse::<i64>().ok()?;
        let group = parts.next()?;
        let name = parts.next()?;
        Some(Self::new(name, group, created))
    }
}

impl std::fmt::Display for JobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.job_name, self.job_group, self.created_time_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_ref_roundtrip() {
        let job = JobRef::new("restart-web", "drover-resource-17", 1_700_000_000_000);
        let parsed = JobRef::parse(&job.to_string()).unwrap();
        assert_eq!(job, parsed);
    }

    #[test]
    fn test_job_ref_name_with_separator() {
        let job = JobRef::new("op:flush:cache", "drover-group-3", 42);
        let parsed = JobRef::parse(&job.to_string()).unwrap();
        assert_eq!(parsed.job_name, "op:flush:cache");
        assert_eq!(parsed.job_group, "drover-group-3");
        assert_eq!(parsed.created_time_ms, 42);
    }

    #[test]
    fn test_job_ref_parse_garbage() {
        assert!(JobRef::parse("not-a-job-ref").is_none());
        assert!(JobRef::parse("a:b:not-a-number").is_none());
    }
}
