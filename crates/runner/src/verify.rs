//! Tolerance-based verification layered over the exact byte comparison.

use kernelharness_algorithms::Tolerance;
use kernelharness_cache::{compare_exact, ExactComparison};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyMode {
    Exact,
    Tolerance,
}

/// Outcome of comparing device output with the reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub mode: VerifyMode,
    pub passed: bool,
    /// Bytes that differ at all.
    pub mismatched_bytes: usize,
    /// Bytes whose difference exceeds the tolerance.
    pub over_tolerance: usize,
    pub max_error: u8,
    pub error_rate: f64,
    pub first_mismatch: Option<usize>,
}

impl Verdict {
    fn exact(comparison: &ExactComparison, total: usize, max_error: u8) -> Self {
        Self {
            mode: VerifyMode::Exact,
            passed: comparison.matched,
            mismatched_bytes: comparison.differing_byte_count,
            over_tolerance: comparison.differing_byte_count,
            max_error,
            error_rate: rate(comparison.differing_byte_count, total),
            first_mismatch: comparison.first_difference,
        }
    }
}

fn rate(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

fn max_abs_difference(expected: &[u8], actual: &[u8]) -> u8 {
    expected
        .iter()
        .zip(actual)
        .map(|(a, b)| a.abs_diff(*b))
        .max()
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy)]
pub struct ToleranceVerifier {
    tolerance: Tolerance,
}

impl ToleranceVerifier {
    pub fn new(tolerance: Tolerance) -> Self {
        Self { tolerance }
    }

    pub fn tolerance(&self) -> Tolerance {
        self.tolerance
    }

    /// The exact check always runs first; only a failed exact check with
    /// non-zero thresholds falls through to the tolerance rule. Buffers of
    /// different length never pass.
    pub fn verify(&self, expected: &[u8], actual: &[u8]) -> Verdict {
        let comparison = compare_exact(expected, actual);
        let total = expected.len().max(actual.len());
        if comparison.matched {
            return Verdict::exact(&comparison, total, 0);
        }
        let max_error = max_abs_difference(expected, actual);
        if self.tolerance.is_exact() {
            return Verdict::exact(&comparison, total, max_error);
        }

        let length_gap = expected.len().abs_diff(actual.len());
        let over = expected
            .iter()
            .zip(actual)
            .filter(|(a, b)| f64::from(a.abs_diff(**b)) > self.tolerance.tolerance)
            .count()
            + length_gap;
        let error_rate = rate(over, total);
        Verdict {
            mode: VerifyMode::Tolerance,
            passed: length_gap == 0 && error_rate <= self.tolerance.error_rate_threshold,
            mismatched_bytes: comparison.differing_byte_count,
            over_tolerance: over,
            max_error,
            error_rate,
            first_mismatch: comparison.first_difference,
        }
    }
}
