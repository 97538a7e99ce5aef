//! Backend-neutral compute runtime interface.
//!
//! The harness talks to an accelerator only through [`ComputeBackend`]:
//! compile a source into an artifact, create a kernel from an artifact,
//! manage buffers, set positional arguments and run one blocking dispatch.
//! [`DeviceScope`] owns everything allocated for a run and releases it when
//! dropped.

pub mod backend;
pub mod dispatch;
pub mod error;
pub mod options;
pub mod scope;

pub use backend::*;
pub use dispatch::*;
pub use error::*;
pub use options::*;
pub use scope::*;
