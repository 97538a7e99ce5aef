//! CLI wiring for kernelharness.

use crate::config::RunConfig;
use crate::coordinator::ExecutionCoordinator;
use crate::report::RunReport;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use kernelharness_algorithms::AlgorithmRegistry;
use kernelharness_backend_cpu::HostBackend;
use kernelharness_backend_gpu::GpuBackend;
use kernelharness_runtime::ComputeBackend;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "kernelharness",
    about = "Run compute kernels against cached builds and verify them with golden references"
)]
pub struct Cli {
    #[arg(long, value_enum, default_value = "host")]
    pub target: TargetArg,

    /// Root of the artifact and golden sample caches.
    #[arg(long, default_value = ".kernelharness-cache")]
    pub cache_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetArg {
    /// Host kernels on the CPU.
    Host,
    /// WGSL kernels through wgpu.
    Gpu,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run kernel variants and verify them against the golden sample.
    Run {
        #[arg(long)]
        config: PathBuf,
        /// Variant id such as `v0`; every variant when omitted.
        #[arg(long)]
        variant: Option<String>,
        /// Write the JSON report here (an array when several variants run).
        #[arg(long)]
        report: Option<PathBuf>,
        /// Drop cached artifacts of the algorithm before running.
        #[arg(long, default_value_t = false)]
        clear_cache: bool,
    },
    /// List registered algorithms, or the variants of one configuration.
    List {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

pub fn run_cli(cli: Cli) -> Result<ExitCode> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let Cli {
        target,
        cache_dir,
        command,
    } = cli;
    let registry = AlgorithmRegistry::with_default_algorithms();

    match command {
        Command::List { config } => {
            list(&registry, config.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            config,
            variant,
            report,
            clear_cache,
        } => {
            let config_path = config;
            let config = RunConfig::load(&config_path)?;
            let coordinator = ExecutionCoordinator::new(registry.clone(), &cache_dir);
            if clear_cache {
                let removed = coordinator.clear_cache(&config.algorithm)?;
                info!(algorithm = %config.algorithm, removed, "cleared artifact cache");
            }
            let variants = match variant {
                Some(id) => vec![id],
                None => config.variant_ids(),
            };

            let reports = match target {
                TargetArg::Host => {
                    let mut backend = HostBackend::new(registry.host_kernels());
                    run_variants(&coordinator, &mut backend, &config, &variants)?
                }
                TargetArg::Gpu => {
                    let mut backend = GpuBackend::new().context("initialising GPU backend")?;
                    run_variants(&coordinator, &mut backend, &config, &variants)?
                }
            };

            for report in &reports {
                println!("{report}");
            }
            if let Some(path) = report {
                match reports.as_slice() {
                    [single] => single.save(&path)?,
                    many => std::fs::write(&path, serde_json::to_string_pretty(many)?)
                        .with_context(|| format!("writing report to {}", path.display()))?,
                }
            }

            let failed = reports.iter().filter(|report| !report.passed()).count();
            if failed > 0 {
                println!("{failed} of {} variant(s) failed verification", reports.len());
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_variants<B: ComputeBackend>(
    coordinator: &ExecutionCoordinator,
    backend: &mut B,
    config: &RunConfig,
    variants: &[String],
) -> Result<Vec<RunReport>> {
    let mut reports = Vec::with_capacity(variants.len());
    for id in variants {
        let report = coordinator
            .run(backend, config, id)
            .with_context(|| format!("{} {id}", config.algorithm))?;
        reports.push(report);
    }
    Ok(reports)
}

fn list(registry: &AlgorithmRegistry, config: Option<&Path>) -> Result<()> {
    let Some(path) = config else {
        for algorithm in registry.algorithms() {
            let tolerance = algorithm.default_tolerance();
            println!(
                "{:<14} {} (tolerance {}, error rate {})",
                algorithm.id(),
                algorithm.name(),
                tolerance.tolerance,
                tolerance.error_rate_threshold
            );
        }
        return Ok(());
    };

    let config = RunConfig::load(path)?;
    if registry.find(&config.algorithm).is_none() {
        bail!("{} names unknown algorithm `{}`", path.display(), config.algorithm);
    }
    println!("{} ({}x{})", config.algorithm, config.input.width, config.input.height);
    for variant in &config.variants {
        println!(
            "  {:<4} {} in {} [{} path, {} args, global {:?}, local {:?}]",
            variant.id,
            variant.kernel_function,
            variant.kernel_file.display(),
            variant.dispatch_path,
            variant.descriptors.len(),
            variant.global_work_size,
            variant.local_work_size
        );
    }
    Ok(())
}
