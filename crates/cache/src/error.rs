//! Cache error type.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error on {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Stored golden and candidate differ in length. Signals a stale
    /// configuration and is never corrected automatically.
    #[error("golden sample {} holds {actual} bytes, expected {expected}", .path.display())]
    SizeMismatch {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },
    #[error("no golden sample at {}", .path.display())]
    GoldenMissing { path: PathBuf },
    #[error("golden sample {} already exists", .path.display())]
    GoldenExists { path: PathBuf },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}
