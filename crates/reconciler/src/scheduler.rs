//! Per-resource event scheduling.
//!
//! The [`EventScheduler`] turns a bursty stream of notifications into at most
//! one running dispatch per [`ResourceKey`]. Notifications arriving while a
//! key is busy collapse into a single pending snapshot that runs as soon as
//! the current dispatch finishes. Retries and reschedules come back in
//! through delayed timers tagged with the epoch they were armed under.
//!
//! Workers hold a permit from a bounded slot pool while dispatching, so
//! independent keys run concurrently up to `max_concurrent_dispatches`.

use std::sync::Arc;

use dashmap::DashMap;
use opkit_core::{Resource, ResourceKey};
use tokio::sync::{Semaphore, broadcast, watch};
use tracing::{debug, info};

use crate::dispatcher::EventDispatcher;
use crate::error::{Error, Result};
use crate::state::{ExecutionScope, FollowUp, PerResourceState, Submission};
use crate::types::{
    DispatchOutcome, DispatchRecord, EventKind, FinalizerState, Trigger, WatchEvent,
};

/// Default size of the execution-slot pool.
pub const DEFAULT_MAX_CONCURRENT_DISPATCHES: usize = 10;

/// Default capacity of the outcome broadcast channel.
pub const DEFAULT_OUTCOME_BUFFER: usize = 256;

/// Scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Dispatches allowed to run at the same time across all keys.
    pub max_concurrent_dispatches: usize,
    /// Records kept for slow outcome subscribers.
    pub outcome_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_dispatches: DEFAULT_MAX_CONCURRENT_DISPATCHES,
            outcome_buffer: DEFAULT_OUTCOME_BUFFER,
        }
    }
}

impl SchedulerConfig {
    /// Set the execution-slot pool size.
    #[must_use]
    pub const fn with_max_concurrent_dispatches(mut self, slots: usize) -> Self {
        self.max_concurrent_dispatches = slots;
        self
    }

    /// Set the outcome channel capacity.
    #[must_use]
    pub const fn with_outcome_buffer(mut self, capacity: usize) -> Self {
        self.outcome_buffer = capacity;
        self
    }

    /// Validate the settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when either size is zero or the slot
    /// pool exceeds what a semaphore can hold.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_dispatches == 0 {
            return Err(Error::invalid_config(
                "max_concurrent_dispatches must be at least 1",
            ));
        }
        if self.max_concurrent_dispatches > Semaphore::MAX_PERMITS {
            return Err(Error::invalid_config(format!(
                "max_concurrent_dispatches must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.outcome_buffer == 0 {
            return Err(Error::invalid_config("outcome_buffer must be at least 1"));
        }
        Ok(())
    }
}

struct Inner<R: Resource> {
    states: DashMap<ResourceKey, PerResourceState<R>>,
    dispatcher: EventDispatcher<R>,
    slots: Semaphore,
    outcomes: broadcast::Sender<DispatchRecord>,
    stop_tx: watch::Sender<bool>,
}

/// Serializes and coalesces work per resource key.
pub struct EventScheduler<R: Resource> {
    inner: Arc<Inner<R>>,
}

impl<R: Resource> Clone for EventScheduler<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Resource> EventScheduler<R> {
    /// Create a scheduler driving `dispatcher`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` or the dispatcher
    /// settings are invalid.
    pub fn new(dispatcher: EventDispatcher<R>, config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        dispatcher.config().validate()?;

        let (outcomes, _) = broadcast::channel(config.outcome_buffer);
        let (stop_tx, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(Inner {
                states: DashMap::new(),
                dispatcher,
                slots: Semaphore::new(config.max_concurrent_dispatches),
                outcomes,
                stop_tx,
            }),
        })
    }

    /// Offer a watch notification.
    ///
    /// Returns `false` once the scheduler has been shut down.
    pub fn submit(&self, resource: R, kind: EventKind) -> bool {
        if self.is_stopped() {
            debug!(key = %resource.key(), "Scheduler stopped; dropping notification");
            return false;
        }

        let key = resource.key();
        let scope = self
            .inner
            .states
            .entry(key.clone())
            .or_default()
            .offer(&key, Submission::notification(resource, kind));

        match scope {
            Some(scope) => self.spawn_worker(scope),
            None => debug!(key = %key, "Dispatch in flight; notification coalesced"),
        }
        true
    }

    /// Offer a watch event.
    pub fn on_event(&self, event: WatchEvent<R>) -> bool {
        self.submit(event.resource, event.kind)
    }

    /// Re-submit the freshest snapshot of `key` for a synthetic trigger.
    ///
    /// Ignored when `epoch` was superseded by a newer notification or the
    /// key is no longer tracked.
    pub fn resubmit(&self, key: &ResourceKey, trigger: Trigger, epoch: u64) {
        if self.is_stopped() {
            return;
        }

        let scope = match self.inner.states.get_mut(key) {
            Some(mut state) if state.is_current(epoch) => state.resubmit(key, trigger),
            Some(_) => {
                debug!(key = %key, ?trigger, "Superseded by a newer notification");
                None
            }
            None => None,
        };

        if let Some(scope) = scope {
            self.spawn_worker(scope);
        }
    }

    /// Receive a [`DispatchRecord`] for every completed dispatch.
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchRecord> {
        self.inner.outcomes.subscribe()
    }

    /// Stop accepting work and cancel armed timers.
    ///
    /// Dispatches already running finish; pending work is dropped.
    pub fn shutdown(&self) {
        if self.inner.stop_tx.send_replace(true) {
            return;
        }
        self.inner.slots.close();
        info!(
            resource = R::KIND,
            tracked = self.inner.states.len(),
            "Event scheduler stopped"
        );
    }

    /// Whether [`Self::shutdown`] was called.
    pub fn is_stopped(&self) -> bool {
        *self.inner.stop_tx.borrow()
    }

    /// Whether a dispatch is currently executing for `key`.
    pub fn is_in_flight(&self, key: &ResourceKey) -> bool {
        self.inner
            .states
            .get(key)
            .is_some_and(|state| state.is_in_flight())
    }

    /// Failures in the current streak of `key`.
    pub fn retry_attempt(&self, key: &ResourceKey) -> Option<u32> {
        self.inner.states.get(key).map(|state| state.retry_attempt())
    }

    /// Generation last reconciled for `key`.
    pub fn last_processed_generation(&self, key: &ResourceKey) -> Option<i64> {
        self.inner
            .states
            .get(key)
            .and_then(|state| state.last_processed_generation())
    }

    /// Last known finalizer state of `key`.
    pub fn finalizer_state(&self, key: &ResourceKey) -> Option<FinalizerState> {
        self.inner.states.get(key).map(|state| state.finalizer())
    }

    /// Number of keys with live bookkeeping.
    pub fn tracked_resources(&self) -> usize {
        self.inner.states.len()
    }

    fn spawn_worker(&self, scope: ExecutionScope<R>) {
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.run_worker(scope).await });
    }

    async fn run_worker(self, mut scope: ExecutionScope<R>) {
        loop {
            let Ok(permit) = self.inner.slots.acquire().await else {
                debug!(key = %scope.key, "Slot pool closed; abandoning work");
                if let Some(mut state) = self.inner.states.get_mut(&scope.key) {
                    state.abandon();
                }
                return;
            };

            let outcome = self.inner.dispatcher.dispatch(&scope).await;
            drop(permit);

            match self.complete(&scope, outcome) {
                Some(next) => scope = next,
                None => return,
            }
        }
    }

    fn complete(&self, scope: &ExecutionScope<R>, outcome: DispatchOutcome) -> Option<ExecutionScope<R>> {
        let key = &scope.key;
        let completed = match self.inner.states.get_mut(key) {
            Some(mut state) => state.complete(key, scope.kind, &outcome),
            None => return None,
        };

        if completed.purged {
            self.inner
                .states
                .remove_if(key, |_, state| !state.is_in_flight());
            debug!(key = %key, "Resource purged; bookkeeping dropped");
        }

        let _ = self.inner.outcomes.send(DispatchRecord {
            key: key.clone(),
            trigger: scope.trigger,
            outcome,
        });

        if let Some(follow_up) = completed.follow_up {
            self.arm_timer(key.clone(), follow_up);
        }
        completed.next
    }

    fn arm_timer(&self, key: ResourceKey, follow_up: FollowUp) {
        debug!(
            key = %key,
            trigger = ?follow_up.trigger,
            delay_ms = u64::try_from(follow_up.delay.as_millis()).unwrap_or(u64::MAX),
            "Timer armed"
        );

        let scheduler = self.clone();
        let mut stop_rx = self.inner.stop_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(follow_up.delay) => {
                    scheduler.resubmit(&key, follow_up.trigger, follow_up.epoch);
                }
                _ = stop_rx.changed() => {}
            }
        });
    }
}
