//! The compute backend trait.

use crate::dispatch::{DispatchPath, WorkDims};
use crate::error::BackendError;
use crate::options::BuildOptions;
use kernelharness_args::{AccessKind, BoundArgument, BufferHandle};
use serde::Serialize;

/// Information about the device a backend drives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub backend: String,
    pub supports_timestamps: bool,
}

/// Timing of one blocking dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DispatchTiming {
    /// Device-side execution time; falls back to `wall_ms` when the device
    /// cannot timestamp.
    pub device_ms: f64,
    /// Host time from submission until completion.
    pub wall_ms: f64,
}

/// Narrow interface the harness uses to drive an accelerator.
///
/// Backends are single-threaded: one dispatch runs to completion before the
/// next call.
pub trait ComputeBackend {
    type Kernel;

    fn device_info(&self) -> DeviceInfo;

    /// Build `source` into an artifact that [`ComputeBackend::create_kernel`]
    /// accepts. A rejected source is [`BackendError::Build`] with the compiler
    /// log.
    fn compile(&mut self, source: &str, options: &BuildOptions) -> Result<Vec<u8>, BackendError>;

    fn create_kernel(&mut self, artifact: &[u8], function: &str) -> Result<Self::Kernel, BackendError>;

    fn release_kernel(&mut self, kernel: Self::Kernel);

    fn create_buffer(
        &mut self,
        label: &str,
        size: usize,
        access: AccessKind,
    ) -> Result<BufferHandle, BackendError>;

    fn write_buffer(&mut self, buffer: BufferHandle, data: &[u8]) -> Result<(), BackendError>;

    fn read_buffer(&mut self, buffer: BufferHandle, len: usize) -> Result<Vec<u8>, BackendError>;

    fn release_buffer(&mut self, buffer: BufferHandle);

    fn set_argument(
        &mut self,
        kernel: &mut Self::Kernel,
        argument: &BoundArgument,
    ) -> Result<(), BackendError>;

    /// Run the kernel once and wait for completion.
    fn dispatch_blocking(
        &mut self,
        kernel: &Self::Kernel,
        work: &WorkDims,
        path: DispatchPath,
    ) -> Result<DispatchTiming, BackendError>;
}
