//! Reconciliation control loop for opkit controllers.
//!
//! This crate turns an unordered, possibly duplicated stream of resource
//! change notifications into serialized, deduplicated and retried calls to
//! user controller logic:
//!
//! - **Scheduling**: at most one dispatch per resource at a time; bursts
//!   collapse into one follow-up dispatch with the freshest snapshot
//! - **Dispatch**: finalizer lifecycle, generation-aware skipping and
//!   interpretation of the controller's result
//! - **Retry**: exponential backoff bounded by attempts and elapsed time
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use opkit_reconciler::{
//!     DispatcherConfig, EventDispatcher, EventKind, EventScheduler, SchedulerConfig,
//! };
//!
//! let dispatcher = EventDispatcher::new(
//!     Arc::new(MyController),
//!     Arc::new(my_facade),
//!     DispatcherConfig::new("webpages.example.com/finalizer"),
//! );
//! let scheduler = EventScheduler::new(dispatcher, SchedulerConfig::default())?;
//!
//! let mut outcomes = scheduler.subscribe();
//! scheduler.submit(page, EventKind::Upserted);
//! let record = outcomes.recv().await?;
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod facade;
pub mod retry;
pub mod scheduler;
pub mod state;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export main types
pub use controller::{Context, ResourceController, RetryInfo, UpdateControl};
pub use dispatcher::{DispatcherConfig, EventDispatcher};
pub use error::{ControllerError, Error, Result};
pub use facade::ResourceFacade;
pub use retry::RetryConfig;
pub use scheduler::{EventScheduler, SchedulerConfig};
pub use state::{ExecutionScope, PerResourceState, Submission};
pub use types::{
    Completion, CompletionAction, DispatchOutcome, DispatchRecord, EventKind, FinalizerState,
    Trigger, WatchEvent,
};
