//! kernelharness runner: configuration, execution coordination and reports.
//!
//! [`ExecutionCoordinator::run`] takes one kernel variant of a
//! [`RunConfig`] through build (or artifact cache hit), argument binding,
//! dispatch on any [`ComputeBackend`](kernelharness_runtime::ComputeBackend)
//! and verification against a golden sample, and returns a [`RunReport`].

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod report;
pub mod verify;

#[cfg(feature = "cli")]
pub use cli::*;
pub use config::*;
pub use coordinator::*;
pub use error::*;
pub use report::*;
pub use verify::*;
