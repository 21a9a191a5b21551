//! One reconciliation attempt for one resource.
//!
//! The dispatcher drives the finalizer lifecycle, decides whether the
//! controller needs to run at all, invokes it and turns the result into a
//! [`DispatchOutcome`]. It never touches scheduler state; the scheduler
//! records whatever the outcome says.

use std::any::Any;
use std::borrow::Cow;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use opkit_core::Resource;
use tracing::{debug, error, warn};

use crate::controller::{Context, ResourceController, RetryInfo};
use crate::error::{ControllerError, Error, Result};
use crate::facade::ResourceFacade;
use crate::retry::RetryConfig;
use crate::state::ExecutionScope;
use crate::types::{Completion, CompletionAction, DispatchOutcome, EventKind, FinalizerState};

const CREATE_OR_UPDATE: &str = "create_or_update_resource";
const DELETE: &str = "delete_resource";

/// Per-controller dispatch settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    /// Finalizer token owned by the controller.
    pub finalizer: String,
    /// Skip notifications whose generation was already processed.
    pub generation_aware: bool,
    /// Retry schedule for failed dispatches.
    pub retry: RetryConfig,
    /// Upper bound for one controller invocation.
    pub reconcile_timeout: Option<Duration>,
    /// Re-check a deletion the controller reported as still in progress.
    pub delete_recheck_interval: Option<Duration>,
}

impl DispatcherConfig {
    /// Create a config owning `finalizer` with default behavior.
    pub fn new(finalizer: impl Into<String>) -> Self {
        Self {
            finalizer: finalizer.into(),
            generation_aware: true,
            retry: RetryConfig::default(),
            reconcile_timeout: None,
            delete_recheck_interval: None,
        }
    }

    /// Enable or disable the generation-aware skip.
    #[must_use]
    pub const fn with_generation_aware(mut self, enabled: bool) -> Self {
        self.generation_aware = enabled;
        self
    }

    /// Set the retry schedule.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Bound each controller invocation.
    #[must_use]
    pub const fn with_reconcile_timeout(mut self, timeout: Duration) -> Self {
        self.reconcile_timeout = Some(timeout);
        self
    }

    /// Re-check incomplete deletions after `interval`.
    #[must_use]
    pub const fn with_delete_recheck_interval(mut self, interval: Duration) -> Self {
        self.delete_recheck_interval = Some(interval);
        self
    }

    /// Validate the settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for an empty finalizer, a zero
    /// timeout or an invalid retry schedule.
    pub fn validate(&self) -> Result<()> {
        if self.finalizer.trim().is_empty() {
            return Err(Error::invalid_config("finalizer name must not be empty"));
        }
        if self.reconcile_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::invalid_config("reconcile timeout must be positive"));
        }
        self.retry.validate()
    }
}

struct Failure {
    error: Error,
    finalizer: FinalizerState,
}

impl Failure {
    const fn new(error: Error, finalizer: FinalizerState) -> Self {
        Self { error, finalizer }
    }
}

type Step = std::result::Result<Completion, Failure>;

/// Executes single reconciliation attempts.
pub struct EventDispatcher<R: Resource> {
    controller: Arc<dyn ResourceController<R>>,
    facade: Arc<dyn ResourceFacade<R>>,
    config: DispatcherConfig,
}

impl<R: Resource> EventDispatcher<R> {
    /// Create a new dispatcher.
    pub fn new(
        controller: Arc<dyn ResourceController<R>>,
        facade: Arc<dyn ResourceFacade<R>>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            controller,
            facade,
            config,
        }
    }

    /// Dispatch settings.
    pub const fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Run one attempt for `scope`.
    pub async fn dispatch(&self, scope: &ExecutionScope<R>) -> DispatchOutcome {
        debug!(
            key = %scope.key,
            trigger = ?scope.trigger,
            generation = ?scope.resource.meta().generation,
            attempt = scope.retry_attempt,
            "Dispatching"
        );

        let step = if scope.is_deletion() {
            self.handle_delete(scope).await
        } else {
            self.handle_create_or_update(scope).await
        };

        match step {
            Ok(completion) => {
                debug!(key = %scope.key, action = ?completion.action, "Dispatch succeeded");
                DispatchOutcome::Success(completion)
            }
            Err(failure) => self.handle_failure(scope, failure),
        }
    }

    async fn handle_delete(&self, scope: &ExecutionScope<R>) -> Step {
        let finalizer = self.config.finalizer.as_str();
        if !scope.resource.meta().has_finalizer(finalizer) {
            return Ok(Completion::new(
                CompletionAction::NothingToClean,
                FinalizerState::Removed,
            ));
        }

        let context = self.context(scope);
        let cleaned = self
            .guarded(DELETE, self.controller.delete_resource(&scope.resource, &context))
            .await
            .map_err(|e| Failure::new(e, FinalizerState::RemovalInProgress))?;

        if !cleaned {
            debug!(key = %scope.key, "Cleanup still in progress; keeping finalizer");
            return Ok(Completion::new(
                CompletionAction::DeletionPending,
                FinalizerState::RemovalInProgress,
            )
            .with_reschedule(self.config.delete_recheck_interval));
        }

        // A purged resource has nothing left to write to.
        if scope.kind != EventKind::Deleted {
            self.facade
                .remove_finalizer(&scope.key, finalizer)
                .await
                .map_err(|e| Failure::new(e, FinalizerState::RemovalInProgress))?;
        }
        Ok(Completion::new(
            CompletionAction::FinalizerRemoved,
            FinalizerState::Removed,
        ))
    }

    async fn handle_create_or_update(&self, scope: &ExecutionScope<R>) -> Step {
        if scope.finalizer.is_terminating() {
            debug!(key = %scope.key, "Snapshot predates observed deletion; skipping");
            return Ok(Completion::new(CompletionAction::SkippedStale, scope.finalizer));
        }

        let finalizer = self.config.finalizer.as_str();
        let mut resource = Cow::Borrowed(&scope.resource);
        if !resource.meta().has_finalizer(finalizer) {
            self.facade
                .add_finalizer(&scope.key, finalizer)
                .await
                .map_err(|e| Failure::new(e, scope.finalizer))?;
            resource.to_mut().meta_mut().add_finalizer(finalizer);
        }

        let generation = resource.meta().generation;
        if self.config.generation_aware
            && scope.trigger.is_external()
            && generation.is_some()
            && generation == scope.last_processed_generation
        {
            debug!(key = %scope.key, ?generation, "Generation already processed; skipping");
            return Ok(Completion::new(
                CompletionAction::SkippedGeneration,
                FinalizerState::Present,
            )
            .with_generation(generation));
        }

        let context = self.context(scope);
        let control = self
            .guarded(
                CREATE_OR_UPDATE,
                self.controller.create_or_update_resource(&resource, &context),
            )
            .await
            .map_err(|e| Failure::new(e, FinalizerState::Present))?;

        let (status, reschedule_after) = control.into_parts();
        if let Some(updated) = status {
            self.facade
                .update_status(&scope.key, &updated)
                .await
                .map_err(|e| Failure::new(e, FinalizerState::Present))?;
        }

        Ok(
            Completion::new(CompletionAction::Reconciled, FinalizerState::Present)
                .with_generation(generation)
                .with_reschedule(reschedule_after),
        )
    }

    fn handle_failure(&self, scope: &ExecutionScope<R>, failure: Failure) -> DispatchOutcome {
        let attempt = scope.retry_attempt.saturating_add(1);
        let elapsed = scope.elapsed_since_first_failure();
        let reason = failure.error.to_string();

        match self.config.retry.next_delay(scope.retry_attempt, elapsed) {
            Some(delay) => {
                warn!(
                    key = %scope.key,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %reason,
                    "Dispatch failed; retry scheduled"
                );
                DispatchOutcome::RetryScheduled {
                    attempt,
                    delay,
                    finalizer: failure.finalizer,
                    reason,
                }
            }
            None => {
                error!(
                    key = %scope.key,
                    attempts = attempt,
                    error = %reason,
                    "Dispatch failed; retries exhausted"
                );
                DispatchOutcome::TerminallyFailed {
                    attempts: attempt,
                    finalizer: failure.finalizer,
                    reason,
                }
            }
        }
    }

    fn context(&self, scope: &ExecutionScope<R>) -> Context {
        Context::new(
            RetryInfo {
                attempt: scope.retry_attempt,
                last_attempt: self.config.retry.is_last_attempt(scope.retry_attempt),
            },
            scope.trigger,
        )
    }

    async fn guarded<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, ControllerError>>,
    {
        let call = AssertUnwindSafe(call).catch_unwind();
        let result = match self.config.reconcile_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| Error::timeout(operation, limit))?,
            None => call.await,
        };

        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(Error::controller_failed(operation, err.to_string())),
            Err(panic) => Err(Error::controller_panicked(operation, panic_message(&*panic))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
