//! The controller capability implemented by user code.

use std::time::Duration;

use async_trait::async_trait;
use opkit_core::Resource;

use crate::error::ControllerError;
use crate::types::Trigger;

/// Result of the create/update path.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateControl<R> {
    status: Option<R>,
    reschedule_after: Option<Duration>,
}

impl<R> UpdateControl<R> {
    /// Nothing to persist.
    #[must_use]
    pub const fn no_update() -> Self {
        Self {
            status: None,
            reschedule_after: None,
        }
    }

    /// Persist the status carried by `resource`.
    #[must_use]
    pub const fn update_status(resource: R) -> Self {
        Self {
            status: Some(resource),
            reschedule_after: None,
        }
    }

    /// Reconcile the resource again after `delay`, even without a new
    /// notification.
    #[must_use]
    pub fn reschedule_after(mut self, delay: Duration) -> Self {
        self.reschedule_after = Some(delay);
        self
    }

    /// Resource whose status should be persisted.
    pub const fn status(&self) -> Option<&R> {
        self.status.as_ref()
    }

    /// Requested re-reconcile delay.
    pub const fn rescheduled(&self) -> Option<Duration> {
        self.reschedule_after
    }

    /// Split into status and reschedule delay.
    pub fn into_parts(self) -> (Option<R>, Option<Duration>) {
        (self.status, self.reschedule_after)
    }
}

impl<R> Default for UpdateControl<R> {
    fn default() -> Self {
        Self::no_update()
    }
}

/// Retry position of the current execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryInfo {
    /// Failures that preceded this execution in the current streak.
    pub attempt: u32,
    /// Whether a failure now exhausts the retry budget.
    pub last_attempt: bool,
}

/// Context handed to controller logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    retry: RetryInfo,
    trigger: Trigger,
}

impl Context {
    /// Create a new context.
    #[must_use]
    pub const fn new(retry: RetryInfo, trigger: Trigger) -> Self {
        Self { retry, trigger }
    }

    /// Retry position of this execution.
    #[must_use]
    pub const fn retry(&self) -> RetryInfo {
        self.retry
    }

    /// What caused this execution.
    #[must_use]
    pub const fn trigger(&self) -> Trigger {
        self.trigger
    }
}

/// Domain reconciliation and deletion logic for one resource type.
///
/// Both operations may fail; the dispatcher treats every failure as
/// retryable.
#[async_trait]
pub trait ResourceController<R: Resource>: Send + Sync {
    /// Bring the observed state in line with the desired state.
    async fn create_or_update_resource(
        &self,
        resource: &R,
        context: &Context,
    ) -> Result<UpdateControl<R>, ControllerError>;

    /// Clean up for a resource whose deletion was requested.
    ///
    /// Return `true` once cleanup is complete and the finalizer may be
    /// removed, `false` while cleanup is still in progress.
    async fn delete_resource(&self, resource: &R, context: &Context)
    -> Result<bool, ControllerError>;
}
