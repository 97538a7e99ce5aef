//! Declarative argument descriptors.

use crate::error::DescriptorError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// The kind of value one kernel argument receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgKind {
    #[serde(rename = "input")]
    InputBuffer,
    #[serde(rename = "output")]
    OutputBuffer,
    #[serde(rename = "buffer")]
    CustomBuffer,
    #[serde(rename = "int")]
    ScalarInt,
    #[serde(rename = "float")]
    ScalarFloat,
    #[serde(rename = "size_t", alias = "size")]
    ScalarSize,
    #[serde(rename = "struct")]
    Struct,
}

impl ArgKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArgKind::InputBuffer => "input",
            ArgKind::OutputBuffer => "output",
            ArgKind::CustomBuffer => "buffer",
            ArgKind::ScalarInt => "int",
            ArgKind::ScalarFloat => "float",
            ArgKind::ScalarSize => "size_t",
            ArgKind::Struct => "struct",
        }
    }

    /// Input and output buffers are supplied by the caller; every other kind
    /// names the parameter it is resolved from.
    pub fn requires_source(self) -> bool {
        !matches!(self, ArgKind::InputBuffer | ArgKind::OutputBuffer)
    }
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a kernel's positional argument list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentDescriptor {
    #[serde(rename = "type")]
    pub kind: ArgKind,
    #[serde(default)]
    pub source: String,
    /// Scalar names packed into a struct argument, in declared order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
}

impl ArgumentDescriptor {
    fn with_kind(kind: ArgKind, source: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.into(),
            fields: Vec::new(),
        }
    }

    pub fn input() -> Self {
        Self::with_kind(ArgKind::InputBuffer, "")
    }

    pub fn output() -> Self {
        Self::with_kind(ArgKind::OutputBuffer, "")
    }

    pub fn buffer(source: impl Into<String>) -> Self {
        Self::with_kind(ArgKind::CustomBuffer, source)
    }

    pub fn int(source: impl Into<String>) -> Self {
        Self::with_kind(ArgKind::ScalarInt, source)
    }

    pub fn float(source: impl Into<String>) -> Self {
        Self::with_kind(ArgKind::ScalarFloat, source)
    }

    pub fn size(source: impl Into<String>) -> Self {
        Self::with_kind(ArgKind::ScalarSize, source)
    }

    pub fn packed<I, S>(source: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: ArgKind::Struct,
            source: source.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Check the descriptor's shape. `index` is only used for diagnostics.
    pub fn validate(&self, index: usize) -> Result<(), DescriptorError> {
        if self.kind.requires_source() && self.source.trim().is_empty() {
            return Err(DescriptorError::MissingSource {
                index,
                kind: self.kind,
            });
        }
        match self.kind {
            ArgKind::Struct => {
                if self.fields.is_empty() {
                    return Err(DescriptorError::EmptyStruct {
                        index,
                        source_name: self.source.clone(),
                    });
                }
                if let Some(position) = self.fields.iter().position(|f| f.trim().is_empty()) {
                    return Err(DescriptorError::EmptyField {
                        index,
                        source_name: self.source.clone(),
                        position,
                    });
                }
            }
            kind if !self.fields.is_empty() => {
                return Err(DescriptorError::UnexpectedFields { index, kind });
            }
            _ => {}
        }
        Ok(())
    }
}

/// Validated, immutable argument list for one kernel variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DescriptorList {
    descriptors: Vec<ArgumentDescriptor>,
}

impl DescriptorList {
    pub fn new(descriptors: Vec<ArgumentDescriptor>) -> Result<Self, DescriptorError> {
        for (index, descriptor) in descriptors.iter().enumerate() {
            descriptor.validate(index)?;
        }
        Ok(Self { descriptors })
    }

    /// Layout used by kernels that do not declare their arguments:
    /// `(input, output, int src_width, int src_height)`.
    pub fn default_layout() -> Self {
        Self {
            descriptors: vec![
                ArgumentDescriptor::input(),
                ArgumentDescriptor::output(),
                ArgumentDescriptor::int("src_width"),
                ArgumentDescriptor::int("src_height"),
            ],
        }
    }
}

impl Deref for DescriptorList {
    type Target = [ArgumentDescriptor];

    fn deref(&self) -> &Self::Target {
        &self.descriptors
    }
}

impl<'a> IntoIterator for &'a DescriptorList {
    type Item = &'a ArgumentDescriptor;
    type IntoIter = std::slice::Iter<'a, ArgumentDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.descriptors.iter()
    }
}
