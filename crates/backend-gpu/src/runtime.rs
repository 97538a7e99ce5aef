//! wgpu runtime.
//!
//! wgpu maps to Metal on macOS and Vulkan/DX12 elsewhere. Device work is
//! submitted and then waited on with `Maintain::Wait`, so every call here is
//! blocking.

use crate::planner::GpuPlanner;
use crate::shader;
use bytemuck::cast_slice;
use kernelharness_args::{AccessKind, ArgValue, BoundArgument, BufferHandle};
use kernelharness_runtime::{
    BackendError, BuildOptions, ComputeBackend, DeviceInfo, DispatchPath, DispatchTiming, WorkDims,
};
use pollster::block_on;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc;
use std::time::Instant;
use tracing::{debug, error, info};
use wgpu::util::DeviceExt;

/// Uniform buffers for by-value arguments are padded to this size.
const UNIFORM_ALIGN: usize = 16;

struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    device_info: DeviceInfo,
    limits: wgpu::Limits,
    timestamp_query_set: Option<wgpu::QuerySet>,
    timestamp_period: f32,
}

impl GpuContext {
    fn new() -> Result<Self, BackendError> {
        let instance = wgpu::Instance::default();
        let adapter = block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| BackendError::Unavailable("no suitable GPU adapter found".into()))?;

        let adapter_info = adapter.get_info();
        let supports_timestamps = adapter.features().contains(wgpu::Features::TIMESTAMP_QUERY);
        let required_features = if supports_timestamps {
            wgpu::Features::TIMESTAMP_QUERY
        } else {
            wgpu::Features::empty()
        };
        let limits = wgpu::Limits::default();

        let (device, queue) = block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("kernelharness device"),
                required_features,
                required_limits: limits.clone(),
            },
            None,
        ))
        .map_err(|err| BackendError::Unavailable(err.to_string()))?;

        // Everything fallible runs inside an error scope; anything that slips
        // through is logged instead of aborting the process.
        device.on_uncaptured_error(Box::new(|err: wgpu::Error| {
            error!(error = %err, "uncaptured wgpu error");
        }));

        let timestamp_query_set = supports_timestamps.then(|| {
            device.create_query_set(&wgpu::QuerySetDescriptor {
                label: Some("timestamp_queries"),
                ty: wgpu::QueryType::Timestamp,
                count: 2,
            })
        });
        let timestamp_period = if supports_timestamps {
            queue.get_timestamp_period()
        } else {
            0.0
        };

        Ok(Self {
            device,
            queue,
            device_info: DeviceInfo {
                name: adapter_info.name.clone(),
                backend: format!("{:?}", adapter_info.backend),
                supports_timestamps,
            },
            limits,
            timestamp_query_set,
            timestamp_period,
        })
    }

    /// Run `f` inside a validation error scope.
    fn validated<T>(&self, f: impl FnOnce(&wgpu::Device) -> T) -> Result<T, String> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device);
        match block_on(self.device.pop_error_scope()) {
            Some(err) => Err(err.to_string()),
            None => Ok(value),
        }
    }

    /// Copy `size` bytes out of `source` through a mappable staging buffer.
    fn read_back(&self, source: &wgpu::Buffer, size: u64) -> Result<Vec<u8>, BackendError> {
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback_staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback_encoder"),
            });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = sender.send(res);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| BackendError::Transfer("failed to receive GPU map signal".into()))?
            .map_err(|err| BackendError::Transfer(err.to_string()))?;
        let data = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(data)
    }

    fn elapsed_timestamps_ms(&self, staging: &wgpu::Buffer) -> Option<f64> {
        let slice = staging.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = sender.send(res);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver.recv().ok()?.ok()?;
        let elapsed = {
            let data = slice.get_mapped_range();
            let timestamps: &[u64] = cast_slice(&data);
            let delta = timestamps[1].saturating_sub(timestamps[0]);
            delta as f64 * f64::from(self.timestamp_period) / 1_000_000.0
        };
        staging.unmap();
        Some(elapsed)
    }
}

struct GpuBuffer {
    label: String,
    buffer: wgpu::Buffer,
    size: usize,
}

/// Pipeline plus the arguments set on it so far.
pub struct GpuKernel {
    function: String,
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    arguments: BTreeMap<u32, ArgValue>,
}

impl GpuKernel {
    pub fn function(&self) -> &str {
        &self.function
    }
}

pub struct GpuBackend {
    context: GpuContext,
    planner: GpuPlanner,
    buffers: HashMap<BufferHandle, GpuBuffer>,
    next_buffer: u32,
}

impl GpuBackend {
    /// Fails with [`BackendError::Unavailable`] when no adapter exists.
    pub fn new() -> Result<Self, BackendError> {
        let context = GpuContext::new()?;
        let planner = GpuPlanner::new(&context.limits);
        info!(
            device = %context.device_info.name,
            backend = %context.device_info.backend,
            timestamps = context.device_info.supports_timestamps,
            "initialized GPU backend"
        );
        Ok(Self {
            context,
            planner,
            buffers: HashMap::new(),
            next_buffer: 1,
        })
    }

    fn buffer(&self, handle: BufferHandle) -> Result<&GpuBuffer, BackendError> {
        self.buffers
            .get(&handle)
            .ok_or(BackendError::UnknownBuffer(handle))
    }
}

fn padded_len(len: usize, align: usize) -> usize {
    len.max(1).div_ceil(align) * align
}

impl ComputeBackend for GpuBackend {
    type Kernel = GpuKernel;

    fn device_info(&self) -> DeviceInfo {
        self.context.device_info.clone()
    }

    fn compile(&mut self, source: &str, options: &BuildOptions) -> Result<Vec<u8>, BackendError> {
        let artifact = shader::compile_wgsl(source, options)?;
        info!(bytes = artifact.len(), options = %options, "compiled WGSL to SPIR-V");
        Ok(artifact)
    }

    fn create_kernel(&mut self, artifact: &[u8], function: &str) -> Result<GpuKernel, BackendError> {
        let words = shader::artifact_words(artifact)?;
        let unavailable = |reason: String| BackendError::KernelUnavailable {
            function: function.to_string(),
            reason,
        };
        let pipeline = self
            .context
            .validated(|device| {
                let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(function),
                    source: wgpu::ShaderSource::SpirV(Cow::Owned(words)),
                });
                device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(function),
                    layout: None,
                    module: &module,
                    entry_point: function,
                })
            })
            .map_err(unavailable)?;
        let layout = self
            .context
            .validated(|_| pipeline.get_bind_group_layout(0))
            .map_err(unavailable)?;
        Ok(GpuKernel {
            function: function.to_string(),
            pipeline,
            layout,
            arguments: BTreeMap::new(),
        })
    }

    fn release_kernel(&mut self, kernel: GpuKernel) {
        debug!(function = %kernel.function, "released GPU kernel");
    }

    fn create_buffer(
        &mut self,
        label: &str,
        size: usize,
        _access: AccessKind,
    ) -> Result<BufferHandle, BackendError> {
        let padded = padded_len(size, wgpu::COPY_BUFFER_ALIGNMENT as usize);
        let buffer = self
            .context
            .validated(|device| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(label),
                    size: padded as u64,
                    usage: wgpu::BufferUsages::STORAGE
                        | wgpu::BufferUsages::COPY_SRC
                        | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
            .map_err(BackendError::Transfer)?;
        let handle = BufferHandle(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(
            handle,
            GpuBuffer {
                label: label.to_string(),
                buffer,
                size,
            },
        );
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, data: &[u8]) -> Result<(), BackendError> {
        let target = self.buffer(buffer)?;
        if data.len() > target.size {
            return Err(BackendError::BufferRange {
                handle: buffer,
                size: target.size,
                requested: data.len(),
            });
        }
        let mut padded = data.to_vec();
        padded.resize(padded_len(data.len(), wgpu::COPY_BUFFER_ALIGNMENT as usize), 0);
        self.context.queue.write_buffer(&target.buffer, 0, &padded);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferHandle, len: usize) -> Result<Vec<u8>, BackendError> {
        let source = self.buffer(buffer)?;
        if len > source.size {
            return Err(BackendError::BufferRange {
                handle: buffer,
                size: source.size,
                requested: len,
            });
        }
        let copy_len = padded_len(len, wgpu::COPY_BUFFER_ALIGNMENT as usize);
        let mut data = self.context.read_back(&source.buffer, copy_len as u64)?;
        data.truncate(len);
        Ok(data)
    }

    fn release_buffer(&mut self, buffer: BufferHandle) {
        if let Some(released) = self.buffers.remove(&buffer) {
            released.buffer.destroy();
            debug!(%buffer, label = %released.label, "released GPU buffer");
        }
    }

    fn set_argument(&mut self, kernel: &mut GpuKernel, argument: &BoundArgument) -> Result<(), BackendError> {
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
        kernel: &GpuKernel,
        work: &WorkDims,
        path: DispatchPath,
    ) -> Result<DispatchTiming, BackendError> {
        if path != DispatchPath::Standard {
            return Err(BackendError::UnsupportedDispatchPath(path));
        }
        let plan = self.planner.plan(work)?;
        let context = &self.context;

        // By-value arguments live in uniform buffers that must outlive the
        // submission.
        let mut uniforms: Vec<(u32, wgpu::Buffer)> = Vec::new();
        for (ordinal, value) in &kernel.arguments {
            if let Some(mut bytes) = value.value_bytes() {
                bytes.resize(padded_len(bytes.len(), UNIFORM_ALIGN), 0);
                let buffer = context
                    .device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("kernel_argument"),
                        contents: &bytes,
                        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::STORAGE,
                    });
                uniforms.push((*ordinal, buffer));
            }
        }

        let mut entries = Vec::with_capacity(kernel.arguments.len());
        for (ordinal, value) in &kernel.arguments {
            if let ArgValue::Buffer(handle) = value {
                let buffer = self.buffers.get(handle).ok_or_else(|| {
                    BackendError::Dispatch(format!("argument {ordinal} refers to released buffer {handle}"))
                })?;
                entries.push(wgpu::BindGroupEntry {
                    binding: *ordinal,
                    resource: buffer.buffer.as_entire_binding(),
                });
            }
        }
        for (ordinal, buffer) in &uniforms {
            entries.push(wgpu::BindGroupEntry {
                binding: *ordinal,
                resource: buffer.as_entire_binding(),
            });
        }

        let bind_group = context
            .validated(|device| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("kernel_arguments"),
                    layout: &kernel.layout,
                    entries: &entries,
                })
            })
            .map_err(|reason| BackendError::Dispatch(format!("{}: {reason}", kernel.function)))?;

        let timestamps = context.timestamp_query_set.as_ref().map(|query_set| {
            let size = 2 * std::mem::size_of::<u64>() as u64;
            let resolve = context.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("timestamp_buffer"),
                size,
                usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            });
            let staging = context.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("timestamp_staging"),
                size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            (query_set, resolve, staging)
        });

        let start = Instant::now();
        let submitted = context.validated(|device| {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("dispatch_encoder"),
            });
            {
                let timestamp_writes =
                    timestamps
                        .as_ref()
                        .map(|(query_set, _, _)| wgpu::ComputePassTimestampWrites {
                            query_set,
                            beginning_of_pass_write_index: Some(0),
                            end_of_pass_write_index: Some(1),
                        });
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("dispatch_pass"),
                    timestamp_writes,
                });
                pass.set_pipeline(&kernel.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                let [x, y, z] = plan.workgroups;
                pass.dispatch_workgroups(x, y, z);
            }
            if let Some((query_set, resolve, staging)) = &timestamps {
                encoder.resolve_query_set(query_set, 0..2, resolve, 0);
                encoder.copy_buffer_to_buffer(resolve, 0, staging, 0, resolve.size());
            }
            context.queue.submit(Some(encoder.finish()));
            device.poll(wgpu::Maintain::Wait);
        });
        submitted.map_err(|reason| BackendError::Dispatch(format!("{}: {reason}", kernel.function)))?;
        let wall_ms = start.elapsed().as_secs_f64() * 1000.0;

        let device_ms = timestamps
            .as_ref()
            .and_then(|(_, _, staging)| context.elapsed_timestamps_ms(staging))
            .unwrap_or(wall_ms);

        Ok(DispatchTiming { device_ms, wall_ms })
    }
}
