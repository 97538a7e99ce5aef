//! Run-level errors.

use crate::coordinator::RunStage;
use kernelharness_args::{BindError, DescriptorError};
use kernelharness_cache::CacheError;
use kernelharness_runtime::BackendError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A configuration that cannot be run. Always raised before dispatch.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed configuration {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid `{field}`: {reason}")]
    Field { field: String, reason: String },
    #[error("kernel variant `{variant}` has an invalid argument list")]
    Descriptor {
        variant: String,
        #[source]
        source: DescriptorError,
    },
    #[error("configuration declares no kernel variants")]
    NoVariants,
}

impl ConfigError {
    pub(crate) fn field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Field {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("unknown algorithm `{0}`")]
    UnknownAlgorithm(String),
    #[error("unknown kernel variant `{variant}` (available: {})", .available.join(", "))]
    UnknownVariant {
        variant: String,
        available: Vec<String>,
    },
    #[error("I/O error on {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{algorithm} CPU reference failed: {cause}")]
    Reference { algorithm: String, cause: String },
    #[error("failed to build {}:\n{log}", .kernel_file.display())]
    Compile { kernel_file: PathBuf, log: String },
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl HarnessError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        HarnessError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A run that ended in `Aborted`, with the stage that could not complete.
#[derive(Debug, Error)]
#[error("run aborted at stage {stage}")]
pub struct RunError {
    pub stage: RunStage,
    #[source]
    pub error: HarnessError,
}
