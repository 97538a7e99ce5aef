//! Image algorithms known to kernelharness.
//!
//! Each [`Algorithm`] pairs a CPU reference, which produces golden samples,
//! with optional host kernels that stand in for device code on the host
//! backend.

pub mod algorithm;
pub mod dilate;
pub mod gaussian;
pub mod image;
pub mod registry;

pub use algorithm::*;
pub use dilate::*;
pub use gaussian::*;
pub use image::*;
pub use registry::*;
