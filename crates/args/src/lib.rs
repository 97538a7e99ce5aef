//! Kernel argument binding for kernelharness.
//!
//! A kernel variant declares its positional argument list as an ordered
//! [`DescriptorList`]. At run time the [`ArgumentBinder`] walks that list,
//! asks the [`ParameterResolver`] for each source value and hands the
//! resulting [`BoundArgument`]s to an [`ArgumentSink`] (usually a kernel
//! handle owned by a compute backend).
//!
//! Binding is two-phase: the complete argument list is resolved into a
//! [`BindingPlan`] first and only then applied to the sink, so a resolution
//! failure never leaves a kernel with half of its arguments set.

pub mod binder;
pub mod descriptor;
pub mod error;
pub mod packing;
pub mod params;
pub mod resolver;

pub use binder::*;
pub use descriptor::*;
pub use error::*;
pub use packing::*;
pub use params::*;
pub use resolver::*;
