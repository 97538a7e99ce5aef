//! Run reports.

use crate::config::GoldenSource;
use crate::coordinator::RunStage;
use crate::verify::Verdict;
use anyhow::{Context, Result};
use kernelharness_args::BindTraceEntry;
use kernelharness_cache::MissReason;
use kernelharness_runtime::{DeviceInfo, DispatchPath};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// How the kernel artifact was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CacheOutcome {
    Hit,
    Compiled { reason: MissReason },
}

#[derive(Debug, Clone, Serialize)]
pub struct KernelSummary {
    pub file: PathBuf,
    pub function: String,
    pub cache_name: String,
    pub source_hash: String,
    pub build_options: String,
    pub cache: CacheOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct GoldenSummary {
    pub source: GoldenSource,
    pub path: PathBuf,
    /// A baseline was established by this run.
    pub created: bool,
    /// The CPU reference no longer matches the stored golden sample.
    pub reference_drift: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Timings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_ms: Option<f64>,
    pub device_ms: f64,
    pub dispatch_wall_ms: f64,
    pub total_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speedup: Option<f64>,
}

impl Timings {
    /// Reference time over device time, when both are known.
    pub fn with_speedup(mut self) -> Self {
        self.speedup = self
            .reference_ms
            .filter(|_| self.device_ms > 0.0)
            .map(|reference| reference / self.device_ms);
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StageRecord {
    pub stage: RunStage,
    pub at_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub algorithm: String,
    pub variant: String,
    pub device: DeviceInfo,
    pub dispatch_path: DispatchPath,
    pub kernel: KernelSummary,
    pub golden: GoldenSummary,
    pub timings: Timings,
    pub verdict: Verdict,
    pub bindings: Vec<BindTraceEntry>,
    pub stages: Vec<StageRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.verdict.passed
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing report to {}", path.display()))?;
        Ok(())
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} {} on {} ({}, {} path)",
            self.algorithm, self.variant, self.device.name, self.device.backend, self.dispatch_path
        )?;
        match self.kernel.cache {
            CacheOutcome::Hit => writeln!(f, "  kernel: {} (cache hit)", self.kernel.cache_name)?,
            CacheOutcome::Compiled { reason } => writeln!(
                f,
                "  kernel: {} (compiled, {})",
                self.kernel.cache_name,
                reason.as_str()
            )?,
        }
        if let Some(reference) = self.timings.reference_ms {
            writeln!(f, "  reference: {reference:.3} ms")?;
        }
        writeln!(f, "  device:    {:.3} ms", self.timings.device_ms)?;
        if let Some(speedup) = self.timings.speedup {
            writeln!(f, "  speedup:   {speedup:.2}x")?;
        }
        let verdict = &self.verdict;
        write!(
            f,
            "  verdict:   {} ({} mismatched bytes, max error {}, error rate {:.5})",
            if verdict.passed { "PASS" } else { "FAIL" },
            verdict.mismatched_bytes,
            verdict.max_error,
            verdict.error_rate
        )?;
        if let Some(offset) = verdict.first_mismatch {
            write!(f, ", first mismatch at byte {offset}")?;
        }
        Ok(())
    }
}
