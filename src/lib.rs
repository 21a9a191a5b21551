#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # opkit
//!
//! Typed reconciliation control loop for cluster resource operators.
//!
//! This library re-exports the workspace crates and hosts the command line
//! definitions and the sample controller used by the `opkit` binary.

pub use opkit_core;
pub use opkit_operator;
pub use opkit_reconciler;

pub mod cli;
pub mod sample;
