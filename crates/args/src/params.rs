//! Execution parameters visible to argument resolution.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque identifier of a device buffer owned by a compute backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferHandle(pub u32);

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf#{}", self.0)
    }
}

/// How the kernel accesses a custom buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// A typed custom scalar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ScalarValue {
    Int(i32),
    Float(f32),
    Size(usize),
}

impl ScalarValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ScalarValue::Int(_) => "int",
            ScalarValue::Float(_) => "float",
            ScalarValue::Size(_) => "size_t",
        }
    }

    /// Width in bytes of the value's raw representation.
    pub fn byte_width(&self) -> usize {
        match self {
            ScalarValue::Int(_) => std::mem::size_of::<i32>(),
            ScalarValue::Float(_) => std::mem::size_of::<f32>(),
            ScalarValue::Size(_) => std::mem::size_of::<usize>(),
        }
    }

    /// Append the raw native-endian bytes of the value.
    pub fn write_ne_bytes(&self, out: &mut Vec<u8>) {
        match self {
            ScalarValue::Int(v) => out.extend_from_slice(&v.to_ne_bytes()),
            ScalarValue::Float(v) => out.extend_from_slice(&v.to_ne_bytes()),
            ScalarValue::Size(v) => out.extend_from_slice(&v.to_ne_bytes()),
        }
    }
}

/// A named buffer declared by the configuration and allocated for the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomBuffer {
    pub name: String,
    pub size_bytes: usize,
    pub handle: BufferHandle,
    pub access: AccessKind,
}

/// Built-in numeric fields every run carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltinParams {
    pub src_width: i32,
    pub src_height: i32,
    pub src_stride: i32,
    pub dst_width: i32,
    pub dst_height: i32,
    pub dst_stride: i32,
    pub kernel_variant: i32,
}

impl BuiltinParams {
    /// Canonical names of the built-in fields, in table order.
    pub const FIELD_NAMES: [&'static str; 7] = [
        "src_width",
        "src_height",
        "src_stride",
        "dst_width",
        "dst_height",
        "dst_stride",
        "kernel_variant",
    ];

    /// Fixed name table. Both the snake_case and camelCase spellings are
    /// accepted.
    pub fn field(&self, name: &str) -> Option<i32> {
        let value = match name {
            "src_width" | "srcWidth" => self.src_width,
            "src_height" | "srcHeight" => self.src_height,
            "src_stride" | "srcStride" => self.src_stride,
            "dst_width" | "dstWidth" => self.dst_width,
            "dst_height" | "dstHeight" => self.dst_height,
            "dst_stride" | "dstStride" => self.dst_stride,
            "kernel_variant" | "kernelVariant" => self.kernel_variant,
            _ => return None,
        };
        Some(value)
    }
}

/// Everything argument resolution can draw on for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionParameters {
    pub builtins: BuiltinParams,
    scalars: BTreeMap<String, ScalarValue>,
    buffers: Vec<CustomBuffer>,
}

impl ExecutionParameters {
    pub fn new(builtins: BuiltinParams) -> Self {
        Self {
            builtins,
            scalars: BTreeMap::new(),
            buffers: Vec::new(),
        }
    }

    pub fn with_scalar(mut self, name: impl Into<String>, value: ScalarValue) -> Self {
        self.insert_scalar(name, value);
        self
    }

    pub fn with_buffer(mut self, buffer: CustomBuffer) -> Self {
        self.push_buffer(buffer);
        self
    }

    /// Returns the previous value when the name was already present.
    pub fn insert_scalar(&mut self, name: impl Into<String>, value: ScalarValue) -> Option<ScalarValue> {
        self.scalars.insert(name.into(), value)
    }

    /// Buffers keep their insertion order; it defines their indices.
    pub fn push_buffer(&mut self, buffer: CustomBuffer) {
        self.buffers.push(buffer);
    }

    pub fn scalar(&self, name: &str) -> Option<ScalarValue> {
        self.scalars.get(name).copied()
    }

    pub fn scalars(&self) -> impl Iterator<Item = (&str, ScalarValue)> {
        self.scalars.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn buffers(&self) -> &[CustomBuffer] {
        &self.buffers
    }

    /// First buffer with the given name.
    pub fn buffer_named(&self, name: &str) -> Option<&CustomBuffer> {
        self.buffers.iter().find(|buffer| buffer.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_accepts_both_spellings() {
        let builtins = BuiltinParams {
            src_width: 1920,
            dst_stride: 2048,
            kernel_variant: 3,
            ..BuiltinParams::default()
        };
        assert_eq!(builtins.field("src_width"), Some(1920));
        assert_eq!(builtins.field("srcWidth"), Some(1920));
        assert_eq!(builtins.field("dstStride"), Some(2048));
        assert_eq!(builtins.field("kernel_variant"), Some(3));
        assert_eq!(builtins.field("SRC_WIDTH"), None);
        for name in BuiltinParams::FIELD_NAMES {
            assert!(builtins.field(name).is_some(), "{name} missing from table");
        }
    }

    #[test]
    fn scalar_bytes_are_native_endian_and_fixed_width() {
        let mut out = Vec::new();
        ScalarValue::Int(-2).write_ne_bytes(&mut out);
        ScalarValue::Float(1.5).write_ne_bytes(&mut out);
        assert_eq!(out.len(), 8);
        assert_eq!(&out[..4], &(-2i32).to_ne_bytes());
        assert_eq!(&out[4..], &1.5f32.to_ne_bytes());
        assert_eq!(
            ScalarValue::Size(7).byte_width(),
            std::mem::size_of::<usize>()
        );
    }

    #[test]
    fn buffer_lookup_returns_first_match() {
        let params = ExecutionParameters::default()
            .with_buffer(CustomBuffer {
                name: "lut".into(),
                size_bytes: 16,
                handle: BufferHandle(4),
                access: AccessKind::ReadOnly,
            })
            .with_buffer(CustomBuffer {
                name: "lut".into(),
                size_bytes: 32,
                handle: BufferHandle(5),
                access: AccessKind::ReadWrite,
            });
        assert_eq!(params.buffer_named("lut").map(|b| b.handle), Some(BufferHandle(4)));
        assert!(params.buffer_named("missing").is_none());
    }
}
