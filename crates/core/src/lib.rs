//! Core types for opkit.
//!
//! - **Resource model**: [`ResourceKey`], [`ObjectMeta`] and the [`Resource`]
//!   trait implemented by every typed resource a controller handles
//! - **Errors**: configuration and resource validation errors shared by the
//!   other workspace crates

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod resource;
pub mod result;

pub use error::Error;
pub use resource::{ObjectMeta, Resource, ResourceKey};
pub use result::Result;
