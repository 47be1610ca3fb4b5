//! Drover agent contract.
//!
//! This crate defines the boundary between the drover orchestration core
//! and the remote agents that actually execute administrative operations:
//!
//! - [`AgentClient`] — the outbound interface the core uses to submit,
//!   cancel, and ping operation invocations.
//! - [`CompletionListener`] — the inbound interface the core implements;
//!   agents report terminal outcomes through it, asynchronously and out of
//!   band with the original submit.
//! - [`JobRef`] — the composite identifier that ties one invocation
//!   attempt together across both directions.
//!
//! The core never executes an operation itself. Everything here is a
//! contract; transports (JSON-RPC, message bus, in-process test doubles)
//! live behind these traits.

mod client;
mod completion;
mod error;
mod job;

pub use client::{AgentClient, CancelResults, InterruptedState};
pub use completion::CompletionListener;
pub use error::{AgentError, AgentResult};
pub use job::{JobRef, ResourceId};
