//! Controller registration for opkit.
//!
//! - **Operator**: registers controllers, checks their resource definition
//!   and connects watches to the reconciliation loop
//! - **Configuration**: per-controller settings with file-based overrides
//!   in TOML or YAML
//! - **In-memory cluster**: a store with generation, finalizer and purge
//!   semantics for tests and local runs
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use opkit_operator::{
//!     ControllerConfiguration, InMemoryCluster, Operator, OperatorConfig, ResourceClient,
//!     ResourceDefinition,
//! };
//!
//! let cluster = Arc::new(InMemoryCluster::default().with_definition(
//!     ResourceDefinition::new("webpages.sample.opkit.dev", "sample.opkit.dev", "v1", "WebPage"),
//! ));
//! let mut operator = Operator::new(cluster.clone(), OperatorConfig::from_path("operator.yaml")?);
//! let scheduler = operator
//!     .register(
//!         WebPageController::default(),
//!         ControllerConfiguration::for_controller::<WebPageController>("webpages.sample.opkit.dev"),
//!         ResourceClient::from_shared(cluster.clone()),
//!     )
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod cluster;
pub mod config;
pub mod error;
pub mod operator;
pub mod settings;
pub mod watch;

pub use cluster::{DEFAULT_CLIENT_NAMESPACE, InMemoryCluster};
pub use config::{
    ControllerConfiguration, FINALIZER_NAME_SUFFIX, Namespaces, default_controller_name,
    default_finalizer_name,
};
pub use error::{Error, Result};
pub use operator::{Operator, RegisteredController, ResourceClient};
pub use settings::{ControllerProperties, OperatorConfig, RetryProperties};
pub use watch::{DefinitionLookup, ResourceDefinition, WatchEventSource, WatchScope};
