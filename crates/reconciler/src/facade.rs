//! Persistence of finalizer and status changes.

use async_trait::async_trait;
use opkit_core::{Resource, ResourceKey};

use crate::error::Result;

/// Writes finalizer and status changes back to the cluster store.
///
/// Implementations report failures as [`crate::Error::FacadeFailed`]; the
/// dispatcher retries them exactly like controller failures.
#[async_trait]
pub trait ResourceFacade<R: Resource>: Send + Sync {
    /// Record `finalizer` on the resource.
    async fn add_finalizer(&self, key: &ResourceKey, finalizer: &str) -> Result<()>;

    /// Drop `finalizer` from the resource.
    async fn remove_finalizer(&self, key: &ResourceKey, finalizer: &str) -> Result<()>;

    /// Persist the status carried by `resource`.
    async fn update_status(&self, key: &ResourceKey, resource: &R) -> Result<()>;
}
