//! GPU backend for kernelharness.
//!
//! Kernel sources are WGSL. `compile` validates them with naga and emits
//! SPIR-V, which is what the artifact cache stores; `create_kernel` loads
//! that SPIR-V into a wgpu compute pipeline. Argument ordinal `N` is
//! `@group(0) @binding(N)`: buffers bind as storage buffers, by-value
//! arguments as small uniform buffers.

pub mod planner;
pub mod runtime;
pub mod shader;

pub use planner::*;
pub use runtime::*;
pub use shader::*;
