//! Host (CPU-emulated) backend for kernelharness.
//!
//! Kernels are Rust implementations registered by entry-point name. The
//! backend still goes through a compile step over the real kernel source so
//! the caching and argument-binding paths behave as they do on a device.

pub mod artifact;
pub mod kernel;
pub mod runtime;

pub use artifact::*;
pub use kernel::*;
pub use runtime::*;
