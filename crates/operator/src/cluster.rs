//! In-memory cluster store.
//!
//! [`InMemoryCluster`] holds resources of one type and behaves like a
//! Kubernetes API server where the control loop can observe it:
//!
//! - spec changes bump `generation`; every write bumps `resourceVersion`
//! - deleting a resource with finalizers only marks it for deletion
//! - removing the last finalizer of a marked resource purges it
//!
//! Every change is broadcast to open watches. It serves as watch source,
//! persistence facade and definition lookup for tests and the demo binary.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use opkit_core::{Resource, ResourceKey};
use opkit_reconciler::{ResourceFacade, WatchEvent};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::watch::{DefinitionLookup, ResourceDefinition, WatchEventSource, WatchScope};

/// Namespace the in-memory client is bound to by default.
pub const DEFAULT_CLIENT_NAMESPACE: &str = "default";

const EVENT_BUFFER: usize = 1024;

/// In-process resource store for one resource type.
pub struct InMemoryCluster<R: Resource> {
    objects: RwLock<BTreeMap<ResourceKey, R>>,
    definitions: RwLock<HashMap<String, ResourceDefinition>>,
    events: broadcast::Sender<WatchEvent<R>>,
    client_namespace: String,
}

impl<R: Resource> Default for InMemoryCluster<R> {
    fn default() -> Self {
        Self::new(DEFAULT_CLIENT_NAMESPACE)
    }
}

impl<R: Resource> InMemoryCluster<R> {
    /// Create an empty cluster whose client is bound to `client_namespace`.
    pub fn new(client_namespace: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            objects: RwLock::new(BTreeMap::new()),
            definitions: RwLock::new(HashMap::new()),
            events,
            client_namespace: client_namespace.into(),
        }
    }

    /// Install a resource definition.
    #[must_use]
    pub fn with_definition(mut self, definition: ResourceDefinition) -> Self {
        self.definitions
            .get_mut()
            .insert(definition.name.clone(), definition);
        self
    }

    /// Namespace the client is bound to.
    pub fn client_namespace(&self) -> &str {
        &self.client_namespace
    }

    /// Store a new resource.
    ///
    /// Assigns a uid when missing, starts `generation` at 1 and clears any
    /// deletion marker. Resources without a namespace land in the client
    /// namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata is invalid or the resource exists.
    pub async fn create(&self, mut resource: R) -> Result<R> {
        resource.meta().validate()?;
        let meta = resource.meta_mut();
        if meta.namespace.is_none() {
            meta.namespace = Some(self.client_namespace.clone());
        }
        if meta.uid.is_empty() {
            meta.uid = Ulid::new().to_string();
        }
        meta.generation = Some(1);
        meta.resource_version = Some("1".to_string());
        meta.deletion_timestamp = None;

        let mut objects = self.objects.write().await;
        let key = resource.key();
        if objects.values().any(|existing| same_name(existing, &resource)) {
            return Err(Error::already_exists(key));
        }
        objects.insert(key.clone(), resource.clone());
        self.publish(WatchEvent::upserted(resource.clone()));
        debug!(key = %key, kind = R::KIND, "Resource created");
        Ok(resource)
    }

    /// Change the desired state of a resource, bumping its generation.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource does not exist.
    pub async fn update_spec<F>(&self, key: &ResourceKey, change: F) -> Result<R>
    where
        F: FnOnce(&mut R),
    {
        let mut objects = self.objects.write().await;
        let stored = objects
            .get_mut(key)
            .ok_or_else(|| Error::resource_not_found(key))?;

        let preserved = stored.meta().clone();
        change(stored);
        let meta = stored.meta_mut();
        *meta = preserved;
        meta.generation = Some(meta.generation.unwrap_or_default().saturating_add(1));
        bump_version(stored);

        let snapshot = stored.clone();
        self.publish(WatchEvent::upserted(snapshot.clone()));
        Ok(snapshot)
    }

    /// Request deletion of a resource.
    ///
    /// A resource without finalizers is purged right away; otherwise it is
    /// marked and kept until its last finalizer is removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource does not exist.
    pub async fn request_deletion(&self, key: &ResourceKey) -> Result<()> {
        let mut objects = self.objects.write().await;
        let stored = objects
            .get_mut(key)
            .ok_or_else(|| Error::resource_not_found(key))?;

        if stored.meta().finalizers.is_empty() {
            if let Some(purged) = objects.remove(key) {
                debug!(key = %key, "Resource purged");
                self.publish(WatchEvent::deleted(purged));
            }
            return Ok(());
        }

        if stored.meta().is_deletion_requested() {
            return Ok(());
        }
        stored.meta_mut().deletion_timestamp = Some(Utc::now());
        bump_version(stored);
        debug!(key = %key, finalizers = ?stored.meta().finalizers, "Deletion requested");
        self.publish(WatchEvent::upserted(stored.clone()));
        Ok(())
    }

    /// Current state of a resource.
    pub async fn get(&self, key: &ResourceKey) -> Option<R> {
        self.objects.read().await.get(key).cloned()
    }

    /// Resources inside `scope`.
    pub async fn list(&self, scope: &WatchScope) -> Vec<R> {
        self.objects
            .read()
            .await
            .values()
            .filter(|r| scope.contains(r.meta().namespace.as_deref(), &self.client_namespace))
            .cloned()
            .collect()
    }

    /// Number of stored resources.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// Add a finalizer to a live resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource is missing or already marked for
    /// deletion.
    pub async fn add_finalizer_to(&self, key: &ResourceKey, finalizer: &str) -> Result<()> {
        let mut objects = self.objects.write().await;
        let stored = objects
            .get_mut(key)
            .ok_or_else(|| Error::resource_not_found(key))?;

        if stored.meta().is_deletion_requested() {
            return Err(Error::conflict(
                key,
                "finalizers cannot be added once deletion was requested",
            ));
        }
        if stored.meta_mut().add_finalizer(finalizer) {
            bump_version(stored);
            self.publish(WatchEvent::upserted(stored.clone()));
        }
        Ok(())
    }

    /// Remove a finalizer, purging the resource if it was the last one of a
    /// resource marked for deletion.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource is missing.
    pub async fn remove_finalizer_from(&self, key: &ResourceKey, finalizer: &str) -> Result<()> {
        let mut objects = self.objects.write().await;
        let stored = objects
            .get_mut(key)
            .ok_or_else(|| Error::resource_not_found(key))?;

        if !stored.meta_mut().remove_finalizer(finalizer) {
            return Ok(());
        }
        bump_version(stored);

        if stored.meta().is_deletion_requested() && stored.meta().finalizers.is_empty() {
            if let Some(purged) = objects.remove(key) {
                debug!(key = %key, "Last finalizer removed; resource purged");
                self.publish(WatchEvent::deleted(purged));
            }
            return Ok(());
        }
        self.publish(WatchEvent::upserted(stored.clone()));
        Ok(())
    }

    /// Replace everything but the metadata of a resource.
    ///
    /// Generation is left untouched, like a status subresource write. A
    /// write computed for an older generation is dropped so it cannot roll
    /// back a newer spec.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource is missing.
    pub async fn replace_status(&self, key: &ResourceKey, resource: &R) -> Result<()> {
        let mut objects = self.objects.write().await;
        let stored = objects
            .get_mut(key)
            .ok_or_else(|| Error::resource_not_found(key))?;

        if resource.meta().generation < stored.meta().generation {
            debug!(
                key = %key,
                written = ?resource.meta().generation,
                current = ?stored.meta().generation,
                "Dropping status computed for an older generation"
            );
            return Ok(());
        }
        let meta = stored.meta().clone();
        *stored = resource.clone();
        *stored.meta_mut() = meta;
        bump_version(stored);
        self.publish(WatchEvent::upserted(stored.clone()));
        Ok(())
    }

    fn publish(&self, event: WatchEvent<R>) {
        // No receivers simply means no watch is open yet.
        let _ = self.events.send(event);
    }
}

fn same_name<R: Resource>(a: &R, b: &R) -> bool {
    a.meta().name == b.meta().name && a.meta().namespace == b.meta().namespace
}

fn bump_version<R: Resource>(resource: &mut R) {
    let meta = resource.meta_mut();
    let next = meta
        .resource_version
        .as_deref()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or_default()
        .saturating_add(1);
    meta.resource_version = Some(next.to_string());
}

#[async_trait]
impl<R: Resource> ResourceFacade<R> for InMemoryCluster<R> {
    async fn add_finalizer(&self, key: &ResourceKey, finalizer: &str) -> opkit_reconciler::Result<()> {
        self.add_finalizer_to(key, finalizer)
            .await
            .map_err(|e| opkit_reconciler::Error::facade_failed("add_finalizer", e.to_string()))
    }

    async fn remove_finalizer(&self, key: &ResourceKey, finalizer: &str) -> opkit_reconciler::Result<()> {
        self.remove_finalizer_from(key, finalizer)
            .await
            .map_err(|e| opkit_reconciler::Error::facade_failed("remove_finalizer", e.to_string()))
    }

    async fn update_status(&self, key: &ResourceKey, resource: &R) -> opkit_reconciler::Result<()> {
        self.replace_status(key, resource)
            .await
            .map_err(|e| opkit_reconciler::Error::facade_failed("update_status", e.to_string()))
    }
}

#[async_trait]
impl<R: Resource> WatchEventSource<R> for InMemoryCluster<R> {
    async fn watch(&self, scope: &WatchScope) -> Result<BoxStream<'static, WatchEvent<R>>> {
        // Subscribe before listing so nothing falls between the two.
        let receiver = self.events.subscribe();
        let initial: Vec<WatchEvent<R>> = self
            .list(scope)
            .await
            .into_iter()
            .map(WatchEvent::upserted)
            .collect();
        debug!(%scope, replayed = initial.len(), kind = R::KIND, "Watch opened");

        let scope = scope.clone();
        let client_namespace = self.client_namespace.clone();
        let live = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((event, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Watch lagged behind; notifications dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .filter(move |event| {
            let inside = scope.contains(
                event.resource.meta().namespace.as_deref(),
                &client_namespace,
            );
            async move { inside }
        });

        Ok(stream::iter(initial).chain(live).boxed())
    }
}

#[async_trait]
impl<R: Resource> DefinitionLookup for InMemoryCluster<R> {
    async fn find_definition(&self, crd_name: &str) -> Result<Option<ResourceDefinition>> {
        Ok(self.definitions.read().await.get(crd_name).cloned())
    }
}
