//! On-disk layout of the cache root.
//!
//! ```text
//! <root>/<algorithm>/kernels/<kernel>.bin
//! <root>/<algorithm>/kernels/<kernel>.hash
//! <root>/<algorithm>/golden/<variant or "ref">.golden
//! ```
//!
//! Every key component is escaped with [`escape_component`], so distinct
//! keys always map to distinct paths inside the root.

use crate::error::CacheError;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Golden key used when a sample is not specific to one variant.
pub const REFERENCE_VARIANT: &str = "ref";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn algorithm_dir(&self, algorithm: &str) -> PathBuf {
        self.root.join(escape_component(algorithm))
    }

    pub fn kernels_dir(&self, algorithm: &str) -> PathBuf {
        self.algorithm_dir(algorithm).join("kernels")
    }

    pub fn artifact_path(&self, algorithm: &str, kernel: &str) -> PathBuf {
        self.kernels_dir(algorithm)
            .join(format!("{}.bin", escape_component(kernel)))
    }

    pub fn hash_path(&self, algorithm: &str, kernel: &str) -> PathBuf {
        self.kernels_dir(algorithm)
            .join(format!("{}.hash", escape_component(kernel)))
    }

    pub fn golden_path(&self, algorithm: &str, variant: Option<&str>) -> PathBuf {
        let variant = variant.unwrap_or(REFERENCE_VARIANT);
        self.algorithm_dir(algorithm)
            .join("golden")
            .join(format!("{}.golden", escape_component(variant)))
    }
}

/// Injective, filesystem-safe rendering of one key component.
///
/// ASCII alphanumerics, `_` and `-` pass through; every other byte (and a
/// leading `.`) becomes `%XX`. The empty string becomes a lone `%`, which no
/// other input produces.
pub fn escape_component(component: &str) -> String {
    if component.is_empty() {
        return "%".to_string();
    }
    let mut out = String::with_capacity(component.len());
    for (i, byte) in component.bytes().enumerate() {
        let keep = byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' || (byte == b'.' && i > 0);
        if keep {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Replace `path` with `bytes` via a sibling temporary file and a rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|err| CacheError::io(parent, err))?;
    let mut temp = NamedTempFile::new_in(parent).map_err(|err| CacheError::io(parent, err))?;
    temp.write_all(bytes)
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|err| CacheError::io(temp.path(), err))?;
    temp.persist(path).map_err(|err| CacheError::io(path, err.error))?;
    Ok(())
}

/// Remove a file; a file that is already gone is not an error.
pub(crate) fn remove_if_present(path: &Path) -> Result<bool, CacheError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(CacheError::io(path, err)),
    }
}
