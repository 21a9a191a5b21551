//! Resource identities and metadata.
//!
//! Every resource handled by opkit carries an [`ObjectMeta`] block with the
//! fields the control loop cares about: identity, generation, finalizers and
//! the deletion marker. Typed resources expose it through the [`Resource`]
//! trait.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::result::Result;

/// Stable identity of a resource instance.
///
/// Used as the map key for all per-resource bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    namespace: Option<String>,
    name: String,
    uid: String,
}

impl ResourceKey {
    /// Create a new resource key.
    pub fn new(namespace: Option<String>, name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
            uid: uid.into(),
        }
    }

    /// Derive the key from object metadata.
    pub fn from_meta(meta: &ObjectMeta) -> Self {
        Self {
            namespace: meta.namespace.clone(),
            name: meta.name.clone(),
            uid: meta.uid.clone(),
        }
    }

    /// Namespace of the resource, `None` for cluster-scoped resources.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Name of the resource.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unique identifier assigned by the store.
    pub fn uid(&self) -> &str {
        &self.uid
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => f.pad(&format!("{ns}/{}", self.name)),
            None => f.pad(&self.name),
        }
    }
}

/// Metadata observed on a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Resource name.
    pub name: String,
    /// Namespace, `None` for cluster-scoped resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Unique identifier assigned by the store.
    #[serde(default)]
    pub uid: String,
    /// Bumped by the store whenever desired-state fields change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,
    /// Opaque version bumped on every write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    /// Finalizer tokens recorded on the resource.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    /// Set once deletion has been requested but before the resource is purged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    /// Create metadata for a named resource.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set the unique identifier.
    #[must_use]
    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = uid.into();
        self
    }

    /// Set the generation.
    #[must_use]
    pub const fn with_generation(mut self, generation: i64) -> Self {
        self.generation = Some(generation);
        self
    }

    /// Add a finalizer token.
    #[must_use]
    pub fn with_finalizer(mut self, finalizer: impl Into<String>) -> Self {
        self.add_finalizer(finalizer);
        self
    }

    /// Mark the resource as deletion requested.
    #[must_use]
    pub const fn with_deletion_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.deletion_timestamp = Some(at);
        self
    }

    /// Whether the given finalizer is recorded.
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Record a finalizer. Returns `false` if it was already present.
    pub fn add_finalizer(&mut self, finalizer: impl Into<String>) -> bool {
        let finalizer = finalizer.into();
        if self.has_finalizer(&finalizer) {
            return false;
        }
        self.finalizers.push(finalizer);
        true
    }

    /// Drop a finalizer. Returns `false` if it was not present.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        self.finalizers.len() != before
    }

    /// Whether deletion of the resource has been requested.
    pub const fn is_deletion_requested(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// Check the fields a store needs before accepting the resource.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidResource`] when the name is empty or contains
    /// a path separator.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid_resource("metadata.name must not be empty"));
        }
        if self.name.contains('/') {
            return Err(Error::invalid_resource(format!(
                "metadata.name '{}' must not contain '/'",
                self.name
            )));
        }
        Ok(())
    }
}

/// A typed cluster resource.
///
/// The resource value itself is the snapshot handed to controllers: an
/// immutable copy of the observed state at notification time.
pub trait Resource: Clone + fmt::Debug + Send + Sync + 'static {
    /// Kind name, e.g. `WebPage`.
    const KIND: &'static str;

    /// Object metadata.
    fn meta(&self) -> &ObjectMeta;

    /// Mutable object metadata.
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    /// Identity of this resource.
    fn key(&self) -> ResourceKey {
        ResourceKey::from_meta(self.meta())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display_includes_namespace() {
        let key = ResourceKey::new(Some("prod".to_string()), "web", "uid-1");
        assert_eq!(key.to_string(), "prod/web");

        let cluster_scoped = ResourceKey::new(None, "web", "uid-1");
        assert_eq!(cluster_scoped.to_string(), "web");
    }

    #[test]
    fn test_key_display_honours_width() {
        let key = ResourceKey::new(Some("prod".to_string()), "web", "uid-1");
        assert_eq!(format!("{key:<12}|"), "prod/web    |");
        assert_eq!(format!("{key:>10}"), "  prod/web");
    }

    #[test]
    fn test_key_from_meta() {
        let meta = ObjectMeta::new("web").with_namespace("prod").with_uid("abc");
        let key = ResourceKey::from_meta(&meta);
        assert_eq!(key.namespace(), Some("prod"));
        assert_eq!(key.name(), "web");
        assert_eq!(key.uid(), "abc");
    }

    #[test]
    fn test_finalizer_add_is_idempotent() {
        let mut meta = ObjectMeta::new("web");
        assert!(meta.add_finalizer("webs.example.com/finalizer"));
        assert!(!meta.add_finalizer("webs.example.com/finalizer"));
        assert_eq!(meta.finalizers.len(), 1);
    }

    #[test]
    fn test_finalizer_remove_reports_change() {
        let mut meta = ObjectMeta::new("web").with_finalizer("a/finalizer");
        assert!(meta.remove_finalizer("a/finalizer"));
        assert!(!meta.remove_finalizer("a/finalizer"));
        assert!(!meta.has_finalizer("a/finalizer"));
    }

    #[test]
    fn test_deletion_marker() {
        let meta = ObjectMeta::new("web");
        assert!(!meta.is_deletion_requested());
        let meta = meta.with_deletion_timestamp(Utc::now());
        assert!(meta.is_deletion_requested());
    }

    #[test]
    fn test_validate_rejects_empty_and_slashed_names() {
        assert!(ObjectMeta::new("").validate().is_err());
        assert!(ObjectMeta::new("a/b").validate().is_err());
        assert!(ObjectMeta::new("web").validate().is_ok());
    }

    #[test]
    fn test_meta_serializes_camel_case() {
        let meta = ObjectMeta::new("web").with_generation(3);
        let json = serde_json::to_string(&meta).ok();
        assert!(json.as_deref().is_some_and(|j| j.contains("\"generation\":3")));
        assert!(json.as_deref().is_some_and(|j| !j.contains("deletionTimestamp")));
    }
}
