//! Host backend runtime.

use crate::artifact::HostArtifact;
use crate::kernel::{DynHostKernel, HostBuffer, HostInvocation, HostKernelRegistry};
use kernelharness_args::{AccessKind, ArgValue, BoundArgument, BufferHandle};
use kernelharness_runtime::{
    BackendError, BuildOptions, ComputeBackend, DeviceInfo, DispatchPath, DispatchTiming, WorkDims,
};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tracing::{debug, info};

/// Kernel created by [`HostBackend`].
pub struct HostKernelHandle {
    function: String,
    kernel: DynHostKernel,
    arguments: BTreeMap<u32, ArgValue>,
}

impl HostKernelHandle {
    pub fn function(&self) -> &str {
        &self.function
    }
}

/// Executes registered host kernels in place of a device.
pub struct HostBackend {
    kernels: HostKernelRegistry,
    buffers: HashMap<BufferHandle, HostBuffer>,
    next_buffer: u32,
    live_kernels: usize,
}

impl HostBackend {
    pub fn new(kernels: HostKernelRegistry) -> Self {
        Self {
            kernels,
            buffers: HashMap::new(),
            next_buffer: 1,
            live_kernels: 0,
        }
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_kernel_count(&self) -> usize {
        self.live_kernels
    }

    fn buffer(&self, handle: BufferHandle) -> Result<&HostBuffer, BackendError> {
        self.buffers
            .get(&handle)
            .ok_or(BackendError::UnknownBuffer(handle))
    }
}

impl ComputeBackend for HostBackend {
    type Kernel = HostKernelHandle;

    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: "host".to_string(),
            backend: "cpu".to_string(),
            supports_timestamps: false,
        }
    }

    fn compile(&mut self, source: &str, options: &BuildOptions) -> Result<Vec<u8>, BackendError> {
        let artifact = HostArtifact::build(source, options)?;
        info!(
            entry_points = ?artifact.entry_points,
            options = %artifact.options,
            "compiled host kernel source"
        );
        Ok(artifact.to_bytes())
    }

    fn create_kernel(&mut self, artifact: &[u8], function: &str) -> Result<HostKernelHandle, BackendError> {
        let artifact = HostArtifact::from_bytes(artifact)?;
        if !artifact.has_entry_point(function) {
            return Err(BackendError::KernelUnavailable {
                function: function.to_string(),
                reason: format!("artifact exports {:?}", artifact.entry_points),
            });
        }
        let kernel = self
            .kernels
            .find(function)
            .ok_or_else(|| BackendError::KernelUnavailable {
                function: function.to_string(),
                reason: "no host implementation registered".to_string(),
            })?;
        self.live_kernels += 1;
        Ok(HostKernelHandle {
            function: function.to_string(),
            kernel,
            arguments: BTreeMap::new(),
        })
    }

    fn release_kernel(&mut self, kernel: HostKernelHandle) {
        debug!(function = %kernel.function, "released host kernel");
        self.live_kernels = self.live_kernels.saturating_sub(1);
    }

    fn create_buffer(
        &mut self,
        label: &str,
        size: usize,
        _access: AccessKind,
    ) -> Result<BufferHandle, BackendError> {
        let handle = BufferHandle(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(
            handle,
            HostBuffer {
                label: label.to_string(),
                data: vec![0; size],
            },
        );
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, data: &[u8]) -> Result<(), BackendError> {
        let target = self
            .buffers
            .get_mut(&buffer)
            .ok_or(BackendError::UnknownBuffer(buffer))?;
        if data.len() > target.data.len() {
            return Err(BackendError::BufferRange {
                handle: buffer,
                size: target.data.len(),
                requested: data.len(),
            });
        }
        target.data[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferHandle, len: usize) -> Result<Vec<u8>, BackendError> {
        let source = self.buffer(buffer)?;
        source
            .data
            .get(..len)
            .map(<[u8]>::to_vec)
            .ok_or(BackendError::BufferRange {
                handle: buffer,
                size: source.data.len(),
                requested: len,
            })
    }

    fn release_buffer(&mut self, buffer: BufferHandle) {
        if let Some(released) = self.buffers.remove(&buffer) {
            debug!(%buffer, label = %released.label, "released host buffer");
        }
    }

    fn set_argument(
        &mut self,
        kernel: &mut HostKernelHandle,
        argument: &BoundArgument,
    ) -> Result<(), BackendError> {
        if let Some(handle) = argument.value.as_buffer() {
            self.buffer(handle).map_err(|err| BackendError::InvalidArgument {
                ordinal: argument.ordinal,
                reason: err.to_string(),
            })?;
        }
        kernel
            .arguments
            .insert(argument.ordinal, argument.value.clone());
        Ok(())
    }

    fn dispatch_blocking(
        &mut self,
        kernel: &HostKernelHandle,
        work: &WorkDims,
        path: DispatchPath,
    ) -> Result<DispatchTiming, BackendError> {
        if path != DispatchPath::Standard {
            return Err(BackendError::UnsupportedDispatchPath(path));
        }
        let start = Instant::now();
        let mut invocation = HostInvocation::new(&kernel.arguments, &mut self.buffers, work);
        kernel
            .kernel
            .execute(&mut invocation)
            .map_err(|err| BackendError::Dispatch(format!("{}: {err:#}", kernel.function)))?;
        let wall_ms = start.elapsed().as_secs_f64() * 1000.0;
        Ok(DispatchTiming {
            device_ms: wall_ms,
            wall_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::HostKernel;
    use anyhow::Result;
    use kernelharness_args::{
        ArgumentBinder, ArgumentDescriptor, BuiltinParams, DescriptorList, ExecutionParameters,
    };
    use kernelharness_runtime::DeviceScope;

    /// `output[i] = input[i] + bias` for the first `count` bytes.
    struct AddBias;

    impl HostKernel for AddBias {
        fn name(&self) -> &str {
            "add_bias"
        }

        fn execute(&self, invocation: &mut HostInvocation<'_>) -> Result<()> {
            let count = invocation.int(2)? as usize;
            let bias = invocation.int(3)? as u8;
            let input = invocation.buffer(0)?.to_vec();
            let output = invocation.buffer_mut(1)?;
            for (out, value) in output.iter_mut().zip(&input).take(count) {
                *out = value.wrapping_add(bias);
            }
            Ok(())
        }
    }

    const SOURCE: &str = "@compute @workgroup_size(64)\nfn add_bias() {}\n";

    fn backend() -> HostBackend {
        let mut kernels = HostKernelRegistry::new();
        kernels.register(AddBias);
        HostBackend::new(kernels)
    }

    fn params() -> ExecutionParameters {
        ExecutionParameters::new(BuiltinParams {
            src_width: 4,
            ..BuiltinParams::default()
        })
        .with_scalar("bias", kernelharness_args::ScalarValue::Int(10))
    }

    fn descriptors() -> DescriptorList {
        DescriptorList::new(vec![
            ArgumentDescriptor::input(),
            ArgumentDescriptor::output(),
            ArgumentDescriptor::int("src_width"),
            ArgumentDescriptor::int("bias"),
        ])
        .unwrap()
    }

    #[test]
    fn compile_bind_dispatch_read() {
        let mut backend = backend();
        let output = {
            let mut scope = DeviceScope::new(&mut backend);
            let artifact = scope.compile(SOURCE, &BuildOptions::new()).unwrap();
            let input = scope
                .allocate_with("input", &[1, 2, 3, 4], AccessKind::ReadOnly)
                .unwrap();
            let output = scope.allocate("output", 4, AccessKind::WriteOnly).unwrap();
            scope.load_kernel(&artifact, "add_bias").unwrap();
            let mut sink = scope.kernel_arguments().unwrap();
            ArgumentBinder::new()
                .bind(&mut sink, input, output, &params(), &descriptors())
                .unwrap();
            let work = WorkDims::one_dimensional(4).unwrap();
            scope.dispatch(&work, DispatchPath::Standard).unwrap();
            scope.read(output, 4).unwrap()
        };
        assert_eq!(output, vec![11, 12, 13, 14]);
        assert_eq!(backend.live_buffer_count(), 0);
        assert_eq!(backend.live_kernel_count(), 0);
    }

    #[test]
    fn scope_releases_resources_on_early_exit() {
        let mut backend = backend();
        let result: Result<(), BackendError> = (|| {
            let mut scope = DeviceScope::new(&mut backend);
            scope.allocate("a", 16, AccessKind::ReadWrite)?;
            scope.allocate("b", 16, AccessKind::ReadWrite)?;
            let artifact = scope.compile(SOURCE, &BuildOptions::new())?;
            scope.load_kernel(&artifact, "missing_kernel")?;
            Ok(())
        })();
        assert!(matches!(result, Err(BackendError::KernelUnavailable { .. })));
        assert_eq!(backend.live_buffer_count(), 0);
        assert_eq!(backend.live_kernel_count(), 0);
    }

    #[test]
    fn unregistered_entry_point_is_rejected() {
        let mut backend = HostBackend::new(HostKernelRegistry::new());
        let artifact = backend.compile(SOURCE, &BuildOptions::new()).unwrap();
        let err = backend.create_kernel(&artifact, "add_bias").err().unwrap();
        assert!(matches!(err, BackendError::KernelUnavailable { ref reason, .. } if reason.contains("no host")));
    }

    #[test]
    fn extension_path_is_unsupported() {
        let mut backend = backend();
        let artifact = backend.compile(SOURCE, &BuildOptions::new()).unwrap();
        let kernel = backend.create_kernel(&artifact, "add_bias").unwrap();
        let work = WorkDims::one_dimensional(1).unwrap();
        let err = backend
            .dispatch_blocking(&kernel, &work, DispatchPath::Extension)
            .unwrap_err();
        assert_eq!(err, BackendError::UnsupportedDispatchPath(DispatchPath::Extension));
        backend.release_kernel(kernel);
    }

    #[test]
    fn kernel_failures_surface_as_dispatch_errors() {
        let mut backend = backend();
        let artifact = backend.compile(SOURCE, &BuildOptions::new()).unwrap();
        let kernel = backend.create_kernel(&artifact, "add_bias").unwrap();
        let work = WorkDims::one_dimensional(1).unwrap();
        let err = backend
            .dispatch_blocking(&kernel, &work, DispatchPath::Standard)
            .unwrap_err();
        assert!(matches!(err, BackendError::Dispatch(ref msg) if msg.contains("never set")));
        backend.release_kernel(kernel);
    }

    #[test]
    fn buffer_bounds_are_checked() {
        let mut backend = backend();
        let handle = backend.create_buffer("b", 2, AccessKind::ReadWrite).unwrap();
        assert!(matches!(
            backend.write_buffer(handle, &[1, 2, 3]),
            Err(BackendError::BufferRange { requested: 3, .. })
        ));
        assert!(backend.read_buffer(handle, 3).is_err());
        backend.release_buffer(handle);
        assert_eq!(
            backend.read_buffer(handle, 1),
            Err(BackendError::UnknownBuffer(handle))
        );
    }
}
