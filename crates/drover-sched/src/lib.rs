//! Drover Operation Scheduling Core
//!
//! This crate implements the server-side engine that schedules, fires,
//! tracks, and reaps administrative operations against a fleet of
//! managed resources.
//!
//! # Overview
//!
//! - [`OperationManager`] — the public API: register schedules, handle
//!   trigger fires, cancel work, query histories.
//! - [`Trigger`] — strongly-typed fire semantics (now, at, repeating,
//!   cron) with lossless conversion to the trigger engine's vocabulary.
//! - [`ResourceOperationHistory`] / [`GroupOperationHistory`] — the
//!   monotonic state machine every invocation attempt moves through.
//! - [`HistoryStore`] / [`ScheduleStore`] — persistence traits with
//!   in-memory ([`MemoryStore`]) and SQLite ([`SqliteStore`]) backends.
//! - [`TimeoutSweeper`] — the periodic reaper that forces honest
//!   terminal states onto operations nothing will ever finish.
//!
//! External systems plug in through capability traits: the trigger
//! engine ([`TriggerEngine`]), the inventory ([`Inventory`]), the agent
//! transport (`drover_agent::AgentClient`), and alerting
//! ([`AlertNotifier`]).
//!
//! # Example: Scheduling a One-Shot Operation
//!
//! ```ignore
//! use drover_sched::{OperationManager, Trigger};
//! use drover_agent::ResourceId;
//!
//! # async fn example(manager: OperationManager) -> drover_sched::SchedResult<()> {
//! let record = manager
//!     .schedule_resource_operation(
//!         ResourceId(42),
//!         "restart",
//!         serde_json::Map::new(),
//!         Trigger::Now,
//!         "admin",
//!         Some("restart after config change"),
//!     )
//!     .await?;
//!
//! // The trigger engine fires the schedule back into the manager:
//! let history = manager.fire_resource_operation(&record.id).await?;
//! println!("dispatched as history {}", history.id);
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod completion;
pub mod definition;
pub mod dispatch;
pub mod error;
pub mod group;
pub mod history;
pub mod manager;
pub mod notifier;
pub mod persistence;
pub mod schedule;
pub mod sweeper;
pub mod trigger;

pub use cancel::CancellationCoordinator;
pub use completion::{aggregate_group, CompletionService};
pub use definition::{
    GroupId, Inventory, OperationDefinition, Resource, ResourceGroup, Session,
    TIMEOUT_PARAM_NAME,
};
pub use dispatch::ResourceDispatcher;
pub use error::{SchedError, SchedResult};
pub use group::GroupOrchestrator;
pub use history::{
    GroupOperationHistory, HistoryFilter, HistoryId, OperationHistory, OperationStatus,
    ResourceOperationHistory,
};
pub use manager::{OperationManager, SchedContext, SchedulerConfig};
pub use notifier::{AlertNotifier, LogNotifier};
pub use persistence::{HistoryStore, MemoryStore, ResourceOutcome, ScheduleStore, SqliteStore};
pub use schedule::{ScheduleJobId, ScheduleRecord, ScheduleTarget};
pub use sweeper::{SweepStats, TimeoutSweeper};
pub use trigger::{
    EngineTrigger, JobDetail, JobKind, RepeatBound, Trigger, TriggerEngine, REPEAT_INDEFINITELY,
};
