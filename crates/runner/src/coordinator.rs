//! Execution coordinator: one `(algorithm, variant)` run from configuration
//! to report.
//!
//! A run walks `ConfigLoaded -> BuffersAllocated -> CacheHit | CompileAndCache
//! -> ArgumentsBound -> Dispatched -> ResultRetrieved -> Verified -> Reported`.
//! Any failure ends it in `Aborted` with the stage that could not complete.
//! Device buffers and the kernel live in a [`DeviceScope`] and are released
//! on every exit path.

use crate::config::{GoldenSource, InputConfig, KernelVariant, OutputConfig, RunConfig};
use crate::error::{ConfigError, HarnessError, RunError};
use crate::report::{CacheOutcome, GoldenSummary, KernelSummary, RunReport, StageRecord, Timings};
use crate::verify::ToleranceVerifier;
use kernelharness_algorithms::{
    image_from_bytes, image_to_bytes, image_to_strided_bytes, synthetic_image, Algorithm,
    AlgorithmRegistry, SYNTHETIC_SEED,
};
use kernelharness_args::{AccessKind, ArgumentBinder, CustomBuffer, ExecutionParameters};
use kernelharness_cache::{
    CacheError, CacheLayout, CacheProbe, CacheStore, ContentHash, MissReason, ReferenceCache,
    StalePolicy,
};
use kernelharness_runtime::{BackendError, BuildOptions, ComputeBackend, DeviceScope, WorkDims};
use ndarray::Array2;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    ConfigLoaded,
    BuffersAllocated,
    CacheHit,
    CompileAndCache,
    ArgumentsBound,
    Dispatched,
    ResultRetrieved,
    Verified,
    Reported,
    Aborted,
}

impl RunStage {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStage::ConfigLoaded => "config_loaded",
            RunStage::BuffersAllocated => "buffers_allocated",
            RunStage::CacheHit => "cache_hit",
            RunStage::CompileAndCache => "compile_and_cache",
            RunStage::ArgumentsBound => "arguments_bound",
            RunStage::Dispatched => "dispatched",
            RunStage::ResultRetrieved => "result_retrieved",
            RunStage::Verified => "verified",
            RunStage::Reported => "reported",
            RunStage::Aborted => "aborted",
        }
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage history of one run.
struct StageLog {
    started: Instant,
    history: Vec<StageRecord>,
}

impl StageLog {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            history: Vec::new(),
        }
    }

    fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    fn enter(&mut self, stage: RunStage) {
        let at_ms = self.elapsed_ms();
        info!(stage = %stage, at_ms, "run stage complete");
        self.history.push(StageRecord { stage, at_ms });
    }

    fn abort(&self, stage: RunStage, cause: impl Into<HarnessError>) -> RunError {
        let error = cause.into();
        error!(stage = %stage, error = %error, "run aborted");
        RunError { stage, error }
    }
}

/// Name under which a kernel's artifact is cached: the source file stem and
/// the backend that produced it, plus a short hash of the build options when
/// there are any. Artifacts are backend specific, so backends sharing a cache
/// root never read each other's entries.
pub fn kernel_cache_name(kernel_file: &Path, backend: &str, options: &BuildOptions) -> String {
    let stem = kernel_file
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "kernel".to_string());
    let backend = backend.to_ascii_lowercase();
    if options.is_empty() {
        format!("{stem}-{backend}")
    } else {
        let digest = ContentHash::of_bytes(options.to_string().as_bytes());
        format!("{stem}-{backend}-{}", digest.short_hex())
    }
}

pub struct ExecutionCoordinator {
    registry: AlgorithmRegistry,
    cache: CacheStore,
    golden: ReferenceCache,
    binder: ArgumentBinder,
}

impl ExecutionCoordinator {
    pub fn new(registry: AlgorithmRegistry, cache_root: impl Into<PathBuf>) -> Self {
        let layout = CacheLayout::new(cache_root);
        Self {
            registry,
            cache: CacheStore::new(layout.clone()),
            golden: ReferenceCache::new(layout),
            binder: ArgumentBinder::new(),
        }
    }

    pub fn with_stale_policy(mut self, policy: StalePolicy) -> Self {
        self.cache = self.cache.with_stale_policy(policy);
        self
    }

    pub fn with_binder(mut self, binder: ArgumentBinder) -> Self {
        self.binder = binder;
        self
    }

    pub fn registry(&self) -> &AlgorithmRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn golden(&self) -> &ReferenceCache {
        &self.golden
    }

    /// Drop every cached artifact of `algorithm`.
    pub fn clear_cache(&self, algorithm: &str) -> Result<usize, CacheError> {
        self.cache.purge(algorithm)
    }

    /// Execute one variant end to end. A failed verification is a verdict
    /// in the report, not an error.
    pub fn run<B: ComputeBackend>(
        &self,
        backend: &mut B,
        config: &RunConfig,
        variant_id: &str,
    ) -> Result<RunReport, RunError> {
        let mut log = StageLog::new();

        let stage = RunStage::ConfigLoaded;
        let algorithm = self
            .registry
            .find(&config.algorithm)
            .ok_or_else(|| log.abort(stage, HarnessError::UnknownAlgorithm(config.algorithm.clone())))?;
        let algorithm_id = algorithm.id();
        let variant = config.variant(variant_id).ok_or_else(|| {
            log.abort(
                stage,
                HarnessError::UnknownVariant {
                    variant: variant_id.to_string(),
                    available: config.variant_ids(),
                },
            )
        })?;
        let work = WorkDims::new(variant.work_dim, &variant.global_work_size, &variant.local_work_size)
            .map_err(|err| log.abort(stage, err))?;
        let mut params = config.execution_parameters(variant).map_err(|err| log.abort(stage, err))?;
        let input_image = load_input(&config.input).map_err(|err| log.abort(stage, err))?;
        let output_len = config.output.packed_len().map_err(|err| log.abort(stage, err))?;
        let build_options = BuildOptions::parse(&variant.build_options)
            .define("HOST_TYPE", variant.dispatch_path.host_type());
        let device = backend.device_info();
        let cache_name = kernel_cache_name(&variant.kernel_file, &device.backend, &build_options);
        info!(
            algorithm = algorithm_id,
            variant = %variant.id,
            kernel = %variant.kernel_function,
            width = config.input.width,
            height = config.input.height,
            backend = %device.backend,
            "starting run"
        );
        log.enter(stage);

        let mut scope = DeviceScope::new(backend);

        let stage = RunStage::BuffersAllocated;
        let input = scope
            .allocate_with("input", &image_to_bytes(&input_image.view()), AccessKind::ReadOnly)
            .map_err(|err| log.abort(stage, err))?;
        let output = scope
            .allocate("output", output_len, AccessKind::WriteOnly)
            .map_err(|err| log.abort(stage, err))?;
        for buffer in &config.buffers {
            let handle = match &buffer.source_file {
                Some(path) => {
                    let data = read_buffer_file(path, buffer.size_bytes).map_err(|err| log.abort(stage, err))?;
                    scope.allocate_with(&buffer.name, &data, buffer.access)
                }
                None => scope.allocate(&buffer.name, buffer.size_bytes, buffer.access),
            }
            .map_err(|err| log.abort(stage, err))?;
            params.push_buffer(CustomBuffer {
                name: buffer.name.clone(),
                size_bytes: buffer.size_bytes,
                handle,
                access: buffer.access,
            });
        }
        log.enter(stage);

        let source = fs::read(&variant.kernel_file).map_err(|err| {
            log.abort(RunStage::CompileAndCache, HarnessError::io(&variant.kernel_file, err))
        })?;
        let source_hash = ContentHash::of_bytes(&source);
        let cache = match self.cache.probe_with_hash(algorithm_id, &cache_name, &source_hash) {
            CacheProbe::Hit(artifact) => match scope.load_kernel(&artifact.bytes, &variant.kernel_function) {
                Ok(()) => CacheOutcome::Hit,
                Err(err) => {
                    warn!(
                        kernel = %cache_name,
                        error = %err,
                        "backend rejected cached artifact; recompiling"
                    );
                    if let Err(err) = self.cache.evict(algorithm_id, &cache_name) {
                        warn!(kernel = %cache_name, error = %err, "failed to evict rejected artifact");
                    }
                    CacheOutcome::Compiled {
                        reason: MissReason::Rejected,
                    }
                }
            },
            CacheProbe::Miss(reason) => CacheOutcome::Compiled { reason },
        };
        match cache {
            CacheOutcome::Hit => log.enter(RunStage::CacheHit),
            CacheOutcome::Compiled { reason } => {
                let stage = RunStage::CompileAndCache;
                info!(kernel = %cache_name, reason = reason.as_str(), "compiling kernel");
                let text = std::str::from_utf8(&source).map_err(|err| {
                    log.abort(
                        stage,
                        HarnessError::Compile {
                            kernel_file: variant.kernel_file.clone(),
                            log: format!("source is not valid UTF-8: {err}"),
                        },
                    )
                })?;
                let artifact = scope
                    .compile(text, &build_options)
                    .map_err(|err| log.abort(stage, compile_error(&variant.kernel_file, err)))?;
                scope
                    .load_kernel(&artifact, &variant.kernel_function)
                    .map_err(|err| log.abort(stage, err))?;
                if let Err(err) = self.cache.store_with_hash(algorithm_id, &cache_name, &artifact, &source_hash) {
                    warn!(kernel = %cache_name, error = %err, "failed to cache kernel artifact");
                }
                log.enter(stage);
            }
        }

        let stage = RunStage::ArgumentsBound;
        let plan = {
            let mut sink = scope.kernel_arguments().map_err(|err| log.abort(stage, err))?;
            self.binder
                .bind(&mut sink, input, output, &params, &variant.descriptors)
                .map_err(|err| log.abort(stage, err))?
        };
        log.enter(stage);

        let stage = RunStage::Dispatched;
        let timing = scope
            .dispatch(&work, variant.dispatch_path)
            .map_err(|err| log.abort(stage, err))?;
        info!(device_ms = timing.device_ms, wall_ms = timing.wall_ms, "dispatch complete");
        log.enter(stage);

        let stage = RunStage::ResultRetrieved;
        let device_output = scope.read(output, output_len).map_err(|err| log.abort(stage, err))?;
        drop(scope);
        if let Some(path) = &config.output.path {
            write_output(path, &config.output, &device_output).map_err(|err| log.abort(stage, err))?;
        }
        log.enter(stage);

        let stage = RunStage::Verified;
        let (expected, reference_ms, golden) = match config.verification.golden_source {
            GoldenSource::CRef => self
                .reference_golden(algorithm.as_ref(), &input_image, &params)
                .map_err(|err| log.abort(stage, err))?,
            GoldenSource::File => {
                let path = config.verification.golden_file.clone().ok_or_else(|| {
                    log.abort(
                        stage,
                        ConfigError::field("verification.golden_file", "required when golden_source is \"file\""),
                    )
                })?;
                let bytes = self
                    .golden
                    .load_from_external_path(&path, output_len)
                    .map_err(|err| log.abort(stage, err))?;
                let summary = GoldenSummary {
                    source: GoldenSource::File,
                    path,
                    created: false,
                    reference_drift: false,
                };
                (bytes, None, summary)
            }
        };
        let tolerance = config
            .verification
            .tolerance
            .unwrap_or_else(|| algorithm.default_tolerance());
        let verdict = ToleranceVerifier::new(tolerance).verify(&expected, &device_output);
        if verdict.passed {
            info!(mode = ?verdict.mode, mismatched = verdict.mismatched_bytes, "verification passed");
        } else {
            warn!(
                mode = ?verdict.mode,
                mismatched = verdict.mismatched_bytes,
                max_error = verdict.max_error,
                error_rate = verdict.error_rate,
                first_mismatch = ?verdict.first_mismatch,
                "verification failed"
            );
        }
        log.enter(stage);

        let timings = Timings {
            reference_ms,
            device_ms: timing.device_ms,
            dispatch_wall_ms: timing.wall_ms,
            total_ms: log.elapsed_ms(),
            speedup: None,
        }
        .with_speedup();
        log.enter(RunStage::Reported);

        Ok(RunReport {
            algorithm: algorithm_id.to_string(),
            variant: variant.id.clone(),
            device,
            dispatch_path: variant.dispatch_path,
            kernel: kernel_summary(variant, cache_name, &source_hash, &build_options, cache),
            golden,
            timings,
            verdict,
            bindings: plan.into_trace(),
            stages: log.history,
            output_path: config.output.path.clone(),
        })
    }

    /// Run the CPU reference and reconcile it with the stored golden sample.
    /// The golden sample wins when the two disagree.
    fn reference_golden(
        &self,
        algorithm: &dyn Algorithm,
        input: &Array2<u8>,
        params: &ExecutionParameters,
    ) -> Result<(Vec<u8>, Option<f64>, GoldenSummary), HarnessError> {
        let id = algorithm.id();
        let started = Instant::now();
        let reference = algorithm
            .reference(input.view(), params)
            .map_err(|err| HarnessError::Reference {
                algorithm: id.to_string(),
                cause: format!("{err:#}"),
            })?;
        let reference_ms = started.elapsed().as_secs_f64() * 1000.0;
        let bytes = image_to_bytes(&reference.view());
        info!(algorithm = id, reference_ms, "CPU reference complete");

        let path = self.golden.path(id, None);
        if !self.golden.exists(id, None) {
            self.golden.save(id, None, &bytes)?;
            let summary = GoldenSummary {
                source: GoldenSource::CRef,
                path,
                created: true,
                reference_drift: false,
            };
            return Ok((bytes, Some(reference_ms), summary));
        }

        let comparison = self.golden.verify(id, None, &bytes)?;
        let expected = if comparison.matched {
            bytes
        } else {
            warn!(
                algorithm = id,
                differing = comparison.differing_byte_count,
                "CPU reference differs from stored golden sample"
            );
            self.golden.load(id, None, bytes.len())?
        };
        let summary = GoldenSummary {
            source: GoldenSource::CRef,
            path,
            created: false,
            reference_drift: !comparison.matched,
        };
        Ok((expected, Some(reference_ms), summary))
    }
}

fn kernel_summary(
    variant: &KernelVariant,
    cache_name: String,
    source_hash: &ContentHash,
    options: &BuildOptions,
    cache: CacheOutcome,
) -> KernelSummary {
    KernelSummary {
        file: variant.kernel_file.clone(),
        function: variant.kernel_function.clone(),
        cache_name,
        source_hash: source_hash.to_string(),
        build_options: options.to_string(),
        cache,
    }
}

fn compile_error(kernel_file: &Path, err: BackendError) -> HarnessError {
    match err {
        BackendError::Build { log } => HarnessError::Compile {
            kernel_file: kernel_file.to_path_buf(),
            log,
        },
        other => HarnessError::Backend(other),
    }
}

fn load_input(input: &InputConfig) -> Result<Array2<u8>, HarnessError> {
    let Some(path) = &input.path else {
        return Ok(synthetic_image(input.width, input.height, SYNTHETIC_SEED));
    };
    let bytes = fs::read(path).map_err(|err| HarnessError::io(path, err))?;
    image_from_bytes(&bytes, input.width, input.height, input.stride).map_err(|err| {
        ConfigError::field("input.path", format!("{}: {err:#}", path.display())).into()
    })
}

fn read_buffer_file(path: &Path, size_bytes: usize) -> Result<Vec<u8>, HarnessError> {
    let mut data = fs::read(path).map_err(|err| HarnessError::io(path, err))?;
    if data.len() < size_bytes {
        return Err(ConfigError::field(
            "buffers.source_file",
            format!("{} holds {} bytes, buffer needs {size_bytes}", path.display(), data.len()),
        )
        .into());
    }
    data.truncate(size_bytes);
    Ok(data)
}

fn write_output(path: &Path, output: &OutputConfig, data: &[u8]) -> Result<(), HarnessError> {
    let bytes = if output.stride == output.width {
        data.to_vec()
    } else {
        let image = image_from_bytes(data, output.width, output.height, output.width).map_err(|err| {
            ConfigError::field("output", format!("{err:#}"))
        })?;
        image_to_strided_bytes(&image.view(), output.stride)
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| HarnessError::io(parent, err))?;
    }
    fs::write(path, bytes).map_err(|err| HarnessError::io(path, err))?;
    info!(path = %path.display(), "wrote device output");
    Ok(())
}
