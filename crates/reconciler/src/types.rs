//! Core types for the reconciler.

use std::time::Duration;

use opkit_core::{ObjectMeta, ResourceKey};
use serde::Serialize;

/// Kind of watch notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Resource was created or modified.
    Upserted,
    /// Resource was purged from the store.
    Deleted,
}

/// What caused a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// An external watch notification.
    Notification,
    /// A delayed re-submission after a failure.
    Retry,
    /// A delayed re-submission requested by the controller.
    Reschedule,
}

impl Trigger {
    /// Whether this trigger came from outside the control loop.
    #[must_use]
    pub const fn is_external(self) -> bool {
        matches!(self, Self::Notification)
    }
}

/// A change notification delivered by a watch source.
#[derive(Debug, Clone)]
pub struct WatchEvent<R> {
    /// Kind of change.
    pub kind: EventKind,
    /// Snapshot of the resource at notification time.
    pub resource: R,
}

impl<R> WatchEvent<R> {
    /// Create an upsert notification.
    pub const fn upserted(resource: R) -> Self {
        Self {
            kind: EventKind::Upserted,
            resource,
        }
    }

    /// Create a delete notification.
    pub const fn deleted(resource: R) -> Self {
        Self {
            kind: EventKind::Deleted,
            resource,
        }
    }
}

/// Finalizer lifecycle of a resource.
///
/// Transitions only move forward: `Absent -> Present -> RemovalInProgress ->
/// Removed`. A resource never returns to `Present` once removal started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizerState {
    /// No finalizer recorded yet.
    #[default]
    Absent,
    /// Finalizer recorded; controller owns cleanup.
    Present,
    /// Deletion requested, cleanup not yet confirmed.
    RemovalInProgress,
    /// Cleanup confirmed; resource may be purged.
    Removed,
}

impl FinalizerState {
    /// Derive the state from a snapshot's metadata.
    #[must_use]
    pub fn of(meta: &ObjectMeta, finalizer: &str) -> Self {
        match (meta.is_deletion_requested(), meta.has_finalizer(finalizer)) {
            (false, false) => Self::Absent,
            (false, true) => Self::Present,
            (true, true) => Self::RemovalInProgress,
            (true, false) => Self::Removed,
        }
    }

    /// Whether moving to `next` keeps the lifecycle monotonic.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        next >= self
    }

    /// Whether deletion has been observed for the resource.
    #[must_use]
    pub const fn is_terminating(self) -> bool {
        matches!(self, Self::RemovalInProgress | Self::Removed)
    }
}

/// What a successful dispatch did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionAction {
    /// Create/update logic ran.
    Reconciled,
    /// Generation already processed; controller not invoked.
    SkippedGeneration,
    /// Snapshot predates an observed deletion; controller not invoked.
    SkippedStale,
    /// Delete logic confirmed cleanup and the finalizer was removed.
    FinalizerRemoved,
    /// Delete logic reported cleanup still in progress.
    DeletionPending,
    /// Deletion observed but the finalizer was already gone.
    NothingToClean,
}

/// Details of a successful dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Completion {
    /// What the dispatch did.
    pub action: CompletionAction,
    /// Finalizer state after the dispatch.
    pub finalizer: FinalizerState,
    /// Generation to record as processed.
    pub processed_generation: Option<i64>,
    /// Re-submit the key after this delay.
    pub reschedule_after: Option<Duration>,
}

impl Completion {
    /// Create a completion with no generation and no reschedule.
    #[must_use]
    pub const fn new(action: CompletionAction, finalizer: FinalizerState) -> Self {
        Self {
            action,
            finalizer,
            processed_generation: None,
            reschedule_after: None,
        }
    }

    /// Record a processed generation.
    #[must_use]
    pub const fn with_generation(mut self, generation: Option<i64>) -> Self {
        self.processed_generation = generation;
        self
    }

    /// Request a re-submission.
    #[must_use]
    pub const fn with_reschedule(mut self, after: Option<Duration>) -> Self {
        self.reschedule_after = after;
        self
    }
}

/// Result of one unit of dispatch work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum DispatchOutcome {
    /// Dispatch completed.
    Success(Completion),
    /// Dispatch failed and a retry will run after `delay`.
    ///
    /// A notification that arrived while the dispatch was running takes the
    /// retry's place: it is dispatched right away with the attempt counter
    /// reset, and no retry timer is armed for this outcome.
    RetryScheduled {
        /// Failures in the current streak, including this one.
        attempt: u32,
        /// Delay before the retry.
        delay: Duration,
        /// Finalizer state as last durably established.
        finalizer: FinalizerState,
        /// Failure description.
        reason: String,
    },
    /// Dispatch failed and retries are exhausted.
    TerminallyFailed {
        /// Executions in the exhausted streak.
        attempts: u32,
        /// Finalizer state as last durably established.
        finalizer: FinalizerState,
        /// Failure description.
        reason: String,
    },
}

impl DispatchOutcome {
    /// Finalizer state reported by the dispatch.
    #[must_use]
    pub const fn finalizer(&self) -> FinalizerState {
        match self {
            Self::Success(completion) => completion.finalizer,
            Self::RetryScheduled { finalizer, .. } | Self::TerminallyFailed { finalizer, .. } => {
                *finalizer
            }
        }
    }

    /// Whether the dispatch succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Completion action, if the dispatch succeeded.
    #[must_use]
    pub const fn action(&self) -> Option<CompletionAction> {
        match self {
            Self::Success(completion) => Some(completion.action),
            _ => None,
        }
    }
}

/// A dispatch outcome published for observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchRecord {
    /// Resource the dispatch ran for.
    pub key: ResourceKey,
    /// What caused the dispatch.
    pub trigger: Trigger,
    /// Outcome of the dispatch.
    pub outcome: DispatchOutcome,
}
