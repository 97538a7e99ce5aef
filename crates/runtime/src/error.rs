//! Backend error type.

use crate::dispatch::DispatchPath;
use kernelharness_args::BufferHandle;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("compute device unavailable: {0}")]
    Unavailable(String),
    /// The device compiler rejected the source; `log` is its output verbatim.
    #[error("kernel build failed:\n{log}")]
    Build { log: String },
    #[error("artifact rejected: {0}")]
    InvalidArtifact(String),
    #[error("kernel function `{function}` unavailable: {reason}")]
    KernelUnavailable { function: String, reason: String },
    #[error("no kernel loaded")]
    NoKernel,
    #[error("unknown buffer {0}")]
    UnknownBuffer(BufferHandle),
    #[error("buffer {handle} holds {size} bytes, {requested} requested")]
    BufferRange {
        handle: BufferHandle,
        size: usize,
        requested: usize,
    },
    #[error("invalid argument {ordinal}: {reason}")]
    InvalidArgument { ordinal: u32, reason: String },
    #[error("dispatch path `{0}` is not supported by this backend")]
    UnsupportedDispatchPath(DispatchPath),
    #[error("invalid work size: {0}")]
    WorkSize(String),
    #[error("dispatch failed: {0}")]
    Dispatch(String),
    #[error("buffer transfer failed: {0}")]
    Transfer(String),
}
