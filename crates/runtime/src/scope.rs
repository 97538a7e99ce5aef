//! Run-scoped ownership of device resources.

use crate::backend::{ComputeBackend, DispatchTiming};
use crate::dispatch::{DispatchPath, WorkDims};
use crate::error::BackendError;
use crate::options::BuildOptions;
use kernelharness_args::{AccessKind, ArgumentSink, BoundArgument, BufferHandle};
use tracing::debug;

/// Owns the buffers and the kernel created for one run and releases them on
/// drop, whichever way the run ends.
pub struct DeviceScope<'b, B: ComputeBackend> {
    backend: &'b mut B,
    buffers: Vec<BufferHandle>,
    kernel: Option<B::Kernel>,
}

impl<'b, B: ComputeBackend> DeviceScope<'b, B> {
    pub fn new(backend: &'b mut B) -> Self {
        Self {
            backend,
            buffers: Vec::new(),
            kernel: None,
        }
    }

    pub fn compile(&mut self, source: &str, options: &BuildOptions) -> Result<Vec<u8>, BackendError> {
        self.backend.compile(source, options)
    }

    pub fn allocate(
        &mut self,
        label: &str,
        size: usize,
        access: AccessKind,
    ) -> Result<BufferHandle, BackendError> {
        let handle = self.backend.create_buffer(label, size, access)?;
        self.buffers.push(handle);
        Ok(handle)
    }

    /// Allocate a buffer sized to `data` and upload it.
    pub fn allocate_with(
        &mut self,
        label: &str,
        data: &[u8],
        access: AccessKind,
    ) -> Result<BufferHandle, BackendError> {
        let handle = self.allocate(label, data.len(), access)?;
        self.backend.write_buffer(handle, data)?;
        Ok(handle)
    }

    pub fn read(&mut self, buffer: BufferHandle, len: usize) -> Result<Vec<u8>, BackendError> {
        self.backend.read_buffer(buffer, len)
    }

    /// Create the run's kernel, replacing (and releasing) any previous one.
    pub fn load_kernel(&mut self, artifact: &[u8], function: &str) -> Result<(), BackendError> {
        let kernel = self.backend.create_kernel(artifact, function)?;
        if let Some(previous) = self.kernel.replace(kernel) {
            self.backend.release_kernel(previous);
        }
        Ok(())
    }

    pub fn has_kernel(&self) -> bool {
        self.kernel.is_some()
    }

    /// Argument sink for the loaded kernel.
    pub fn kernel_arguments(&mut self) -> Result<KernelArguments<'_, B>, BackendError> {
        let kernel = self.kernel.as_mut().ok_or(BackendError::NoKernel)?;
        Ok(KernelArguments {
            backend: &mut *self.backend,
            kernel,
        })
    }

    pub fn dispatch(&mut self, work: &WorkDims, path: DispatchPath) -> Result<DispatchTiming, BackendError> {
        let kernel = self.kernel.as_ref().ok_or(BackendError::NoKernel)?;
        self.backend.dispatch_blocking(kernel, work, path)
    }

    pub fn live_buffers(&self) -> &[BufferHandle] {
        &self.buffers
    }
}

impl<B: ComputeBackend> Drop for DeviceScope<'_, B> {
    fn drop(&mut self) {
        if let Some(kernel) = self.kernel.take() {
            self.backend.release_kernel(kernel);
        }
        let released = self.buffers.len();
        for handle in self.buffers.drain(..).rev() {
            self.backend.release_buffer(handle);
        }
        debug!(buffers = released, "released run resources");
    }
}

/// Binds arguments straight onto a backend kernel.
pub struct KernelArguments<'s, B: ComputeBackend> {
    backend: &'s mut B,
    kernel: &'s mut B::Kernel,
}

impl<B: ComputeBackend> ArgumentSink for KernelArguments<'_, B> {
    type Error = BackendError;

    fn set_argument(&mut self, argument: &BoundArgument) -> Result<(), BackendError> {
        self.backend.set_argument(self.kernel, argument)
    }
}
