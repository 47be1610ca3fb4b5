//! Trigger model and the trigger-engine boundary.
//!
//! A [`Trigger`] is the strongly-typed description of *when* a schedule
//! fires. The underlying trigger engine speaks a looser vocabulary — a
//! Quartz-shaped bag of optional fields ([`EngineTrigger`]) — and the two
//! conversions at the boundary must round-trip losslessly for every
//! normalized variant. Conversion is pure; nothing here talks to the
//! engine except through the [`TriggerEngine`] capability trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SchedResult;
use crate::schedule::ScheduleJobId;

/// Engine sentinel for "repeat forever".
pub const REPEAT_INDEFINITELY: i32 = -1;

/// How long a repeating trigger keeps firing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepeatBound {
    /// Fire this many times after the first fire, then stop.
    Count(u32),
    /// Keep firing until the given instant.
    Until(DateTime<Utc>),
    /// Keep firing until the schedule is explicitly removed.
    Indefinite,
}

/// When and how often a schedule fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trigger {
    /// Fire once, immediately.
    Now,

    /// Fire once at the given instant.
    At(DateTime<Utc>),

    /// Fire at a fixed interval, optionally starting later than now.
    Repeat {
        /// First fire time; `None` means the first fire is immediate.
        start: Option<DateTime<Utc>>,
        /// Interval between fires in milliseconds.
        interval_ms: u64,
        /// When the repetition stops.
        bound: RepeatBound,
    },

    /// Fire per a cron expression.
    Cron(String),
}

impl Trigger {
    /// Create a repeating trigger, normalizing degenerate inputs.
    ///
    /// Negative intervals clamp to 0 and a `Count(0)` bound collapses to
    /// the equivalent one-shot trigger, so every trigger built through
    /// this constructor round-trips through the engine representation.
    pub fn repeat(start: Option<DateTime<Utc>>, interval_ms: i64, bound: RepeatBound) -> Self {
        if matches!(bound, RepeatBound::Count(0)) {
            return match start {
                Some(t) => Trigger::At(t),
                None => Trigger::Now,
            };
        }
        Trigger::Repeat {
            start,
            interval_ms: interval_ms.max(0) as u64,
            bound,
        }
    }

    /// Whether the trigger fires more than once.
    pub fn is_repeating(&self) -> bool {
        matches!(self, Trigger::Repeat { .. } | Trigger::Cron(_))
    }

    /// Convert to the trigger engine's representation.
    pub fn to_engine(&self) -> EngineTrigger {
        match self {
            Trigger::Now => EngineTrigger::default(),
            Trigger::At(t) => EngineTrigger {
                start_time: Some(*t),
                ..Default::default()
            },
            Trigger::Repeat {
                start,
                interval_ms,
                bound,
            } => {
                let (repeat_count, end_time) = match bound {
                    RepeatBound::Count(n) => (Some(*n as i32), None),
                    RepeatBound::Until(t) => (None, Some(*t)),
                    RepeatBound::Indefinite => (Some(REPEAT_INDEFINITELY), None),
                };
                EngineTrigger {
                    start_time: *start,
                    repeat_interval_ms: Some(*interval_ms as i64),
                    repeat_count,
                    end_time,
                    ..Default::default()
                }
            }
            Trigger::Cron(expr) => EngineTrigger {
                cron_expression: Some(expr.clone()),
                ..Default::default()
            },
        }
    }

    /// Convert from the trigger engine's representation.
    ///
    /// Out-of-range engine values are clamped rather than rejected: a
    /// negative interval becomes 0 and a repeat count of 0 collapses to
    /// the one-shot form.
    pub fn from_engine(engine: &EngineTrigger) -> Self {
        if let Some(expr) = &engine.cron_expression {
            return Trigger::Cron(expr.clone());
        }

        let repeating =
            engine.repeat_interval_ms.is_some() && engine.repeat_count != Some(0);

        if repeating {
            let interval_ms = engine.repeat_interval_ms.unwrap_or(0).max(0);
            let bound = match (engine.repeat_count, engine.end_time) {
                (Some(n), _) if n > 0 => RepeatBound::Count(n as u32),
                (_, Some(t)) => RepeatBound::Until(t),
                _ => RepeatBound::Indefinite,
            };
            return Trigger::Repeat {
                start: engine.start_time,
                interval_ms: interval_ms as u64,
                bound,
            };
        }

        match engine.start_time {
            Some(t) => Trigger::At(t),
            None => Trigger::Now,
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::Now => write!(f, "now"),
            Trigger::At(t) => write!(f, "at {t}"),
            Trigger::Repeat {
                interval_ms, bound, ..
            } => match bound {
                RepeatBound::Count(n) => write!(f, "every {interval_ms} ms, {n} times"),
                RepeatBound::Until(t) => write!(f, "every {interval_ms} ms until {t}"),
                RepeatBound::Indefinite => write!(f, "every {interval_ms} ms"),
            },
            Trigger::Cron(expr) => write!(f, "cron '{expr}'"),
        }
    }
}

/// The trigger engine's own vocabulary for a trigger.
///
/// A loose bag of optional fields; which fields are set determines the
/// trigger kind. `next_fire_time` is engine-reported state mirrored into
/// the schedule tracking store and is ignored by the conversions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineTrigger {
    /// First fire time; `None` means immediately.
    pub start_time: Option<DateTime<Utc>>,
    /// Repeat interval in milliseconds; `None` means non-repeating.
    pub repeat_interval_ms: Option<i64>,
    /// Remaining repeat count; [`REPEAT_INDEFINITELY`] means unbounded.
    pub repeat_count: Option<i32>,
    /// Hard stop time for repeating triggers.
    pub end_time: Option<DateTime<Utc>>,
    /// Cron expression; takes precedence over the interval fields.
    pub cron_expression: Option<String>,
    /// Next fire time as computed by the engine.
    pub next_fire_time: Option<DateTime<Utc>>,
}

/// The kind of dispatch job a schedule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    /// Fires the resource dispatch job for a single resource.
    Resource,
    /// Fires the group orchestrator.
    Group,
}

/// What the trigger engine needs to know to fire a schedule back into the
/// core: the schedule identity and which dispatch path to invoke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDetail {
    /// Identity of the schedule.
    pub id: ScheduleJobId,
    /// Which dispatch job to run on fire.
    pub kind: JobKind,
}

/// Capability interface over the external trigger engine.
///
/// The engine owns fire-time computation and calls back into the core
/// (`fire_resource_operation` / `fire_group_operation`) when a trigger
/// activates; the core only ever schedules, deletes, and inspects.
#[async_trait]
pub trait TriggerEngine: Send + Sync {
    /// Register a job with the engine.
    async fn schedule_job(&self, detail: &JobDetail, trigger: &EngineTrigger) -> SchedResult<()>;

    /// Remove a job and all its triggers. Returns false if unknown.
    async fn delete_job(&self, job_id: &ScheduleJobId) -> SchedResult<bool>;

    /// Current triggers of a job, with engine-computed next fire times.
    /// Empty when the job has no further fire scheduled.
    async fn triggers_of_job(&self, job_id: &ScheduleJobId) -> SchedResult<Vec<EngineTrigger>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_roundtrip_now() {
        let t = Trigger::Now;
        assert_eq!(Trigger::from_engine(&t.to_engine()), t);
    }

    #[test]
    fn test_roundtrip_at() {
        let t = Trigger::At(ts(1_700_000_000));
        assert_eq!(Trigger::from_engine(&t.to_engine()), t);
    }

    #[test]
    fn test_roundtrip_repeat_variants() {
        let triggers = [
            Trigger::repeat(None, 60_000, RepeatBound::Count(5)),
            Trigger::repeat(Some(ts(1_700_000_000)), 1_000, RepeatBound::Indefinite),
            Trigger::repeat(None, 3_600_000, RepeatBound::Until(ts(1_800_000_000))),
        ];
        for t in triggers {
            assert_eq!(Trigger::from_engine(&t.to_engine()), t, "round-trip of {t}");
        }
    }

    #[test]
    fn test_roundtrip_cron() {
        let t = Trigger::Cron("0 0 4 * * ?".to_string());
        assert_eq!(Trigger::from_engine(&t.to_engine()), t);
    }

    #[test]
    fn test_repeat_count_zero_is_one_shot() {
        assert_eq!(Trigger::repeat(None, 60_000, RepeatBound::Count(0)), Trigger::Now);
        assert_eq!(
            Trigger::repeat(Some(ts(7)), 60_000, RepeatBound::Count(0)),
            Trigger::At(ts(7))
        );

        // The same degenerate shape coming back from the engine.
        let engine = EngineTrigger {
            repeat_interval_ms: Some(60_000),
            repeat_count: Some(0),
            ..Default::default()
        };
        assert_eq!(Trigger::from_engine(&engine), Trigger::Now);
    }

    #[test]
    fn test_negative_interval_clamps() {
        let t = Trigger::repeat(None, -500, RepeatBound::Indefinite);
        assert_eq!(
            t,
            Trigger::Repeat {
                start: None,
                interval_ms: 0,
                bound: RepeatBound::Indefinite
            }
        );

        let engine = EngineTrigger {
            repeat_interval_ms: Some(-500),
            repeat_count: Some(REPEAT_INDEFINITELY),
            ..Default::default()
        };
        assert_eq!(
            Trigger::from_engine(&engine),
            Trigger::Repeat {
                start: None,
                interval_ms: 0,
                bound: RepeatBound::Indefinite
            }
        );
    }

    #[test]
    fn test_next_fire_time_does_not_affect_conversion() {
        let mut engine = Trigger::Now.to_engine();
        engine.next_fire_time = Some(ts(123));
        assert_eq!(Trigger::from_engine(&engine), Trigger::Now);
    }
}
