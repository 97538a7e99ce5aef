//! Golden reference samples.

use crate::error::CacheError;
use crate::layout::{remove_if_present, write_atomic, CacheLayout};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of a byte-for-byte comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExactComparison {
    pub matched: bool,
    pub differing_byte_count: usize,
    /// Offset of the first differing byte.
    pub first_difference: Option<usize>,
}

/// Compare two buffers exactly. Bytes past the end of the shorter one count
/// as differing.
pub fn compare_exact(expected: &[u8], actual: &[u8]) -> ExactComparison {
    let mut differing = expected.len().abs_diff(actual.len());
    let mut first = (differing > 0).then(|| expected.len().min(actual.len()));
    for (offset, (a, b)) in expected.iter().zip(actual).enumerate() {
        if a != b {
            differing += 1;
            if first.map_or(true, |f| offset < f) {
                first = Some(offset);
            }
        }
    }
    ExactComparison {
        matched: differing == 0,
        differing_byte_count: differing,
        first_difference: first,
    }
}

/// Store of CPU reference outputs keyed by `(algorithm, variant)`.
///
/// A missing sample is not an error for callers that establish baselines;
/// a length disagreement always is.
#[derive(Debug, Clone)]
pub struct ReferenceCache {
    layout: CacheLayout,
}

impl ReferenceCache {
    pub fn new(layout: CacheLayout) -> Self {
        Self { layout }
    }

    pub fn path(&self, algorithm: &str, variant: Option<&str>) -> PathBuf {
        self.layout.golden_path(algorithm, variant)
    }

    pub fn exists(&self, algorithm: &str, variant: Option<&str>) -> bool {
        self.path(algorithm, variant).is_file()
    }

    /// Persist a new golden sample. Existing samples are reference data and
    /// are never overwritten; call [`ReferenceCache::discard`] first.
    pub fn save(&self, algorithm: &str, variant: Option<&str>, bytes: &[u8]) -> Result<PathBuf, CacheError> {
        let path = self.path(algorithm, variant);
        if path.exists() {
            return Err(CacheError::GoldenExists { path });
        }
        write_atomic(&path, bytes)?;
        info!(algorithm, variant, bytes = bytes.len(), path = %path.display(), "saved golden sample");
        Ok(path)
    }

    pub fn load(&self, algorithm: &str, variant: Option<&str>, expected_size: usize) -> Result<Vec<u8>, CacheError> {
        read_sized(&self.path(algorithm, variant), expected_size)
    }

    /// Load a reference supplied outside the cache, with the same size check.
    pub fn load_from_external_path(&self, path: &Path, expected_size: usize) -> Result<Vec<u8>, CacheError> {
        read_sized(path, expected_size)
    }

    /// Exact comparison of `candidate` against the stored sample.
    pub fn verify(
        &self,
        algorithm: &str,
        variant: Option<&str>,
        candidate: &[u8],
    ) -> Result<ExactComparison, CacheError> {
        let golden = self.load(algorithm, variant, candidate.len())?;
        let comparison = compare_exact(&golden, candidate);
        if comparison.matched {
            debug!(algorithm, variant, bytes = candidate.len(), "golden sample matched");
        } else {
            warn!(
                algorithm,
                variant,
                differing = comparison.differing_byte_count,
                first = ?comparison.first_difference,
                "output differs from golden sample"
            );
        }
        Ok(comparison)
    }

    pub fn discard(&self, algorithm: &str, variant: Option<&str>) -> Result<bool, CacheError> {
        remove_if_present(&self.path(algorithm, variant))
    }
}

fn read_sized(path: &Path, expected_size: usize) -> Result<Vec<u8>, CacheError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(CacheError::GoldenMissing {
                path: path.to_path_buf(),
            })
        }
        Err(err) => return Err(CacheError::io(path, err)),
    };
    if bytes.len() != expected_size {
        return Err(CacheError::SizeMismatch {
            path: path.to_path_buf(),
            expected: expected_size,
            actual: bytes.len(),
        });
    }
    Ok(bytes)
}
