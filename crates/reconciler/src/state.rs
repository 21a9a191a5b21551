//! Per-resource bookkeeping owned by the scheduler.
//!
//! [`PerResourceState`] is a plain state machine: the scheduler feeds it
//! submissions and dispatch outcomes while holding the map entry, and it
//! answers with the work to start next. Nothing here awaits.

use std::time::Duration;

use opkit_core::{Resource, ResourceKey};
use tokio::time::Instant;

use crate::types::{DispatchOutcome, EventKind, FinalizerState, Trigger};

/// A snapshot offered to the scheduler.
#[derive(Debug, Clone)]
pub struct Submission<R> {
    /// Snapshot of the resource.
    pub resource: R,
    /// Kind of change.
    pub kind: EventKind,
    /// What caused the submission.
    pub trigger: Trigger,
}

impl<R> Submission<R> {
    /// An external watch notification.
    pub const fn notification(resource: R, kind: EventKind) -> Self {
        Self {
            resource,
            kind,
            trigger: Trigger::Notification,
        }
    }
}

/// Everything the dispatcher needs for one unit of work.
///
/// A read-only copy of the bookkeeping taken when the work was handed out.
#[derive(Debug, Clone)]
pub struct ExecutionScope<R> {
    /// Resource identity.
    pub key: ResourceKey,
    /// Snapshot to reconcile.
    pub resource: R,
    /// Kind of change.
    pub kind: EventKind,
    /// What caused the dispatch.
    pub trigger: Trigger,
    /// Generation recorded by the last successful reconcile.
    pub last_processed_generation: Option<i64>,
    /// Failures in the current streak.
    pub retry_attempt: u32,
    /// When the current failure streak started.
    pub first_attempt_at: Option<Instant>,
    /// Last known finalizer state.
    pub finalizer: FinalizerState,
}

impl<R: Resource> ExecutionScope<R> {
    /// Whether this unit of work takes the deletion branch.
    pub fn is_deletion(&self) -> bool {
        self.kind == EventKind::Deleted || self.resource.meta().is_deletion_requested()
    }

    /// Time since the current failure streak started.
    pub fn elapsed_since_first_failure(&self) -> Duration {
        self.first_attempt_at
            .map(|started| started.elapsed())
            .unwrap_or_default()
    }
}

/// A delayed re-submission to arm after a dispatch completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowUp {
    /// Delay before re-submitting.
    pub delay: Duration,
    /// Retry or reschedule.
    pub trigger: Trigger,
    /// Epoch the timer belongs to; stale once a newer notification arrives.
    pub epoch: u64,
}

/// What the scheduler must do after a dispatch completed.
#[derive(Debug)]
pub struct Completed<R> {
    /// Coalesced work to dispatch right away.
    pub next: Option<ExecutionScope<R>>,
    /// Timer to arm.
    pub follow_up: Option<FollowUp>,
    /// The resource was purged and its state can be dropped.
    pub purged: bool,
}

/// Bookkeeping for one resource key.
#[derive(Debug)]
pub struct PerResourceState<R> {
    in_flight: bool,
    pending: Option<Submission<R>>,
    latest: Option<(R, EventKind)>,
    last_processed_generation: Option<i64>,
    retry_attempt: u32,
    first_attempt_at: Option<Instant>,
    epoch: u64,
    finalizer: FinalizerState,
}

impl<R> Default for PerResourceState<R> {
    fn default() -> Self {
        Self {
            in_flight: false,
            pending: None,
            latest: None,
            last_processed_generation: None,
            retry_attempt: 0,
            first_attempt_at: None,
            epoch: 0,
            finalizer: FinalizerState::Absent,
        }
    }
}

impl<R: Resource> PerResourceState<R> {
    /// Create idle state for a newly seen resource.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a dispatch is executing for this key.
    pub const fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Whether a coalesced snapshot is waiting.
    pub const fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Generation recorded by the last successful reconcile.
    pub const fn last_processed_generation(&self) -> Option<i64> {
        self.last_processed_generation
    }

    /// Failures in the current streak.
    pub const fn retry_attempt(&self) -> u32 {
        self.retry_attempt
    }

    /// Last known finalizer state.
    pub const fn finalizer(&self) -> FinalizerState {
        self.finalizer
    }

    /// Current epoch.
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether a timer armed under `epoch` is still relevant.
    pub const fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch
    }

    /// Offer a snapshot. Returns the work to dispatch now, if any.
    ///
    /// While a dispatch is in flight the snapshot is parked as pending,
    /// replacing any older pending one. Synthetic submissions never displace
    /// a pending notification.
    pub fn offer(&mut self, key: &ResourceKey, submission: Submission<R>) -> Option<ExecutionScope<R>> {
        if submission.trigger.is_external() {
            self.epoch = self.epoch.wrapping_add(1);
            self.reset_retry();
            self.latest = Some((submission.resource.clone(), submission.kind));
        }

        if self.in_flight {
            let keep_existing = !submission.trigger.is_external()
                && self
                    .pending
                    .as_ref()
                    .is_some_and(|pending| pending.trigger.is_external());
            if !keep_existing {
                self.pending = Some(submission);
            }
            return None;
        }

        self.in_flight = true;
        Some(self.scope(key, submission))
    }

    /// Build a synthetic submission from the freshest snapshot.
    pub fn resubmit(&mut self, key: &ResourceKey, trigger: Trigger) -> Option<ExecutionScope<R>> {
        let (resource, kind) = self.latest.clone()?;
        self.offer(
            key,
            Submission {
                resource,
                kind,
                trigger,
            },
        )
    }

    /// Record the outcome of the dispatch that ran for `kind`.
    pub fn complete(
        &mut self,
        key: &ResourceKey,
        kind: EventKind,
        outcome: &DispatchOutcome,
    ) -> Completed<R> {
        self.advance_finalizer(outcome.finalizer());
        let superseded = self.pending.is_some();
        let mut follow_up = None;

        match outcome {
            DispatchOutcome::Success(completion) => {
                if let Some(generation) = completion.processed_generation {
                    self.last_processed_generation = Some(generation);
                }
                self.reset_retry();
                if !superseded {
                    follow_up = completion.reschedule_after.map(|delay| FollowUp {
                        delay,
                        trigger: Trigger::Reschedule,
                        epoch: self.epoch,
                    });
                }
            }
            DispatchOutcome::RetryScheduled { attempt, delay, .. } => {
                let pending_is_external = self
                    .pending
                    .as_ref()
                    .is_some_and(|pending| pending.trigger.is_external());
                if !pending_is_external {
                    self.retry_attempt = *attempt;
                    self.first_attempt_at.get_or_insert_with(Instant::now);
                }
                if !superseded {
                    follow_up = Some(FollowUp {
                        delay: *delay,
                        trigger: Trigger::Retry,
                        epoch: self.epoch,
                    });
                }
            }
            DispatchOutcome::TerminallyFailed { .. } => self.reset_retry(),
        }

        if let Some(submission) = self.pending.take() {
            return Completed {
                next: Some(self.scope(key, submission)),
                follow_up,
                purged: false,
            };
        }

        self.in_flight = false;
        // Nothing can notify a purged key again, so a failed cleanup is final.
        let purged = kind == EventKind::Deleted
            && matches!(
                outcome,
                DispatchOutcome::Success(_) | DispatchOutcome::TerminallyFailed { .. }
            );
        Completed {
            next: None,
            follow_up: if purged { None } else { follow_up },
            purged,
        }
    }

    /// Release the key without recording an outcome.
    pub fn abandon(&mut self) {
        self.in_flight = false;
        self.pending = None;
    }

    fn scope(&self, key: &ResourceKey, submission: Submission<R>) -> ExecutionScope<R> {
        ExecutionScope {
            key: key.clone(),
            resource: submission.resource,
            kind: submission.kind,
            trigger: submission.trigger,
            last_processed_generation: self.last_processed_generation,
            retry_attempt: self.retry_attempt,
            first_attempt_at: self.first_attempt_at,
            finalizer: self.finalizer,
        }
    }

    fn advance_finalizer(&mut self, next: FinalizerState) {
        if self.finalizer.can_transition_to(next) {
            self.finalizer = next;
        }
    }

    fn reset_retry(&mut self) {
        self.retry_attempt = 0;
        self.first_attempt_at = None;
    }
}
