//! The algorithm abstraction.

use anyhow::Result;
use kernelharness_args::ExecutionParameters;
use kernelharness_backend_cpu::DynHostKernel;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Tolerance thresholds for non-exact verification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    /// Largest absolute per-byte difference that still counts as equal.
    pub tolerance: f64,
    /// Largest fraction of bytes allowed to exceed `tolerance`.
    pub error_rate_threshold: f64,
}

impl Tolerance {
    pub const EXACT: Tolerance = Tolerance {
        tolerance: 0.0,
        error_rate_threshold: 0.0,
    };

    pub fn new(tolerance: f64, error_rate_threshold: f64) -> Self {
        Self {
            tolerance,
            error_rate_threshold,
        }
    }

    pub fn is_exact(&self) -> bool {
        self.tolerance == 0.0 && self.error_rate_threshold == 0.0
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self::EXACT
    }
}

/// An image algorithm over 8-bit single-channel images.
pub trait Algorithm: Send + Sync {
    /// Registry key, matched against the configuration's `algorithm` field.
    fn id(&self) -> &'static str;
    fn name(&self) -> &'static str;
    /// CPU reference. `input` has shape `(height, width)`; the output shape
    /// follows the destination dimensions in `params`.
    fn reference(&self, input: ArrayView2<'_, u8>, params: &ExecutionParameters) -> Result<Array2<u8>>;
    /// Used when the configuration does not set thresholds of its own.
    fn default_tolerance(&self) -> Tolerance {
        Tolerance::EXACT
    }
    fn host_kernels(&self) -> Vec<DynHostKernel> {
        Vec::new()
    }
}

pub type DynAlgorithm = Arc<dyn Algorithm>;
