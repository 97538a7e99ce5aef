//! Source-name resolution against a parameter set.
//!
//! Resolution order is fixed:
//! 1. the built-in field table,
//! 2. the custom scalar map (exact name),
//! 3. custom buffers: a name starting with a digit is a zero-based index,
//!    anything else is matched by exact name.
//!
//! Size sources of the form `<buffer>.size` are split at the first dot before
//! any of the above and resolve to the byte length of that buffer. A name
//! with more dots, such as `a.b.size`, is not a size reference and resolves
//! as an ordinary name.

use crate::error::ResolveError;
use crate::params::{CustomBuffer, ExecutionParameters, ScalarValue};

const SIZE_SUFFIX: &str = "size";

/// The value a source name resolved to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolved<'p> {
    Scalar(ScalarValue),
    Buffer(&'p CustomBuffer),
}

#[derive(Debug, Clone, Copy)]
pub struct ParameterResolver<'p> {
    params: &'p ExecutionParameters,
}

impl<'p> ParameterResolver<'p> {
    pub fn new(params: &'p ExecutionParameters) -> Self {
        Self { params }
    }

    /// Resolve a source name with no expectation about its type.
    pub fn resolve(&self, name: &str) -> Result<Resolved<'p>, ResolveError> {
        if let Some(prefix) = size_reference(name) {
            return self
                .buffer(prefix)
                .map(|buffer| Resolved::Scalar(ScalarValue::Size(buffer.size_bytes)));
        }
        match self.scalar(name) {
            Ok(value) => Ok(Resolved::Scalar(value)),
            Err(ResolveError::NotFound { .. }) => self.buffer(name).map(Resolved::Buffer),
            Err(err) => Err(err),
        }
    }

    /// Built-in fields first, then custom scalars.
    pub fn scalar(&self, name: &str) -> Result<ScalarValue, ResolveError> {
        if let Some(value) = self.params.builtins.field(name) {
            return Ok(ScalarValue::Int(value));
        }
        self.params
            .scalar(name)
            .ok_or_else(|| ResolveError::NotFound { name: name.to_string() })
    }

    pub fn int(&self, name: &str) -> Result<i32, ResolveError> {
        match self.scalar(name)? {
            ScalarValue::Int(value) => Ok(value),
            other => Err(mismatch(name, "int", other.type_name())),
        }
    }

    pub fn float(&self, name: &str) -> Result<f32, ResolveError> {
        match self.scalar(name)? {
            ScalarValue::Float(value) => Ok(value),
            other => Err(mismatch(name, "float", other.type_name())),
        }
    }

    /// A `<buffer>.size` reference or a custom size scalar.
    pub fn size(&self, name: &str) -> Result<usize, ResolveError> {
        if let Some(prefix) = size_reference(name) {
            return self.buffer(prefix).map(|buffer| buffer.size_bytes);
        }
        match self.scalar(name)? {
            ScalarValue::Size(value) => Ok(value),
            other => Err(mismatch(name, "size_t", other.type_name())),
        }
    }

    /// One struct field: any scalar, including `<buffer>.size`.
    pub fn field(&self, name: &str) -> Result<ScalarValue, ResolveError> {
        match self.resolve(name)? {
            Resolved::Scalar(value) => Ok(value),
            Resolved::Buffer(_) => Err(mismatch(name, "scalar", "buffer")),
        }
    }

    pub fn buffer(&self, name: &str) -> Result<&'p CustomBuffer, ResolveError> {
        let buffers = self.params.buffers();
        if name.starts_with(|c: char| c.is_ascii_digit()) {
            let index: usize = name
                .parse()
                .map_err(|_| ResolveError::InvalidBufferIndex { name: name.to_string() })?;
            return buffers.get(index).ok_or(ResolveError::BufferIndexOutOfRange {
                index,
                count: buffers.len(),
            });
        }
        self.params
            .buffer_named(name)
            .ok_or_else(|| ResolveError::NotFound { name: name.to_string() })
    }
}

fn size_reference(name: &str) -> Option<&str> {
    match name.split_once('.') {
        Some((prefix, SIZE_SUFFIX)) if !prefix.is_empty() => Some(prefix),
        _ => None,
    }
}

fn mismatch(name: &str, expected: &'static str, found: &'static str) -> ResolveError {
    ResolveError::TypeMismatch {
        name: name.to_string(),
        expected,
        found,
    }
}
