//! Watch sources and resource definition lookup.

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use opkit_core::Resource;
use opkit_reconciler::WatchEvent;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Which namespaces a watch covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "scope", content = "namespace")]
pub enum WatchScope {
    /// Every namespace.
    AllNamespaces,
    /// The namespace the cluster client is bound to.
    ClientNamespace,
    /// One explicit namespace.
    Namespace(String),
}

impl WatchScope {
    /// Whether a resource in `namespace` falls inside this scope.
    pub fn contains(&self, namespace: Option<&str>, client_namespace: &str) -> bool {
        match self {
            Self::AllNamespaces => true,
            Self::ClientNamespace => namespace == Some(client_namespace),
            Self::Namespace(ns) => namespace == Some(ns.as_str()),
        }
    }
}

impl fmt::Display for WatchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllNamespaces => write!(f, "all namespaces"),
            Self::ClientNamespace => write!(f, "client namespace"),
            Self::Namespace(ns) => write!(f, "namespace '{ns}'"),
        }
    }
}

/// A resource type definition known to the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    /// Full definition name, e.g. `webpages.sample.opkit.dev`.
    pub name: String,
    /// API group.
    pub group: String,
    /// API version.
    pub version: String,
    /// Kind served by the definition.
    pub kind: String,
    /// Whether instances live in namespaces.
    pub namespaced: bool,
}

impl ResourceDefinition {
    /// Create a namespaced definition.
    pub fn new(
        name: impl Into<String>,
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
            namespaced: true,
        }
    }

    /// Mark the definition cluster-scoped.
    #[must_use]
    pub const fn cluster_scoped(mut self) -> Self {
        self.namespaced = false;
        self
    }

    /// `group/version` string.
    pub fn api_version(&self) -> String {
        format!("{}/{}", self.group, self.version)
    }
}

/// Resolves resource definitions by name.
#[async_trait]
pub trait DefinitionLookup: Send + Sync {
    /// Find a definition, `Ok(None)` when it does not exist.
    async fn find_definition(&self, crd_name: &str) -> Result<Option<ResourceDefinition>>;
}

/// Delivers change notifications for one resource type.
///
/// Streams are at-least-once and ordered per resource. A new watch first
/// replays the current state of every matching resource as upserts.
#[async_trait]
pub trait WatchEventSource<R: Resource>: Send + Sync {
    /// Open a watch for `scope`.
    async fn watch(&self, scope: &WatchScope) -> Result<BoxStream<'static, WatchEvent<R>>>;
}
