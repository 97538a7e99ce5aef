//! Error types for descriptor validation, parameter resolution and binding.

use crate::descriptor::ArgKind;
use thiserror::Error;

/// A malformed descriptor list, detected when the configuration is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("descriptor {index} ({kind}) requires a non-empty source name")]
    MissingSource { index: usize, kind: ArgKind },
    #[error("struct descriptor {index} (`{source_name}`) declares no fields")]
    EmptyStruct { index: usize, source_name: String },
    #[error("struct descriptor {index} (`{source_name}`) has an empty field name at position {position}")]
    EmptyField {
        index: usize,
        source_name: String,
        position: usize,
    },
    #[error("descriptor {index} ({kind}) does not take struct fields")]
    UnexpectedFields { index: usize, kind: ArgKind },
}

/// A source name that no resolution stage could satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no parameter named `{name}`")]
    NotFound { name: String },
    #[error("parameter `{name}` is {found}, expected {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("buffer index {index} is out of range ({count} custom buffers)")]
    BufferIndexOutOfRange { index: usize, count: usize },
    #[error("`{name}` is not a valid buffer index")]
    InvalidBufferIndex { name: String },
}

/// Failure to bind a kernel argument list. Every variant names the offending
/// descriptor index.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BindError {
    #[error("descriptor {index} ({kind}): unresolved source `{source_name}`: {cause}")]
    UnresolvedSource {
        index: usize,
        kind: ArgKind,
        source_name: String,
        cause: ResolveError,
    },
    #[error("descriptor {index} (struct `{source_name}`): packing needs {required} bytes, capacity is {capacity}")]
    BindOverflow {
        index: usize,
        source_name: String,
        required: usize,
        capacity: usize,
    },
    #[error("descriptor {index}: kernel rejected argument {ordinal}: {reason}")]
    Sink {
        index: usize,
        ordinal: u32,
        reason: String,
    },
}

impl BindError {
    pub fn descriptor_index(&self) -> usize {
        match self {
            BindError::UnresolvedSource { index, .. }
            | BindError::BindOverflow { index, .. }
            | BindError::Sink { index, .. } => *index,
        }
    }
}
