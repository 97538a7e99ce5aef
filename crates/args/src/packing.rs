//! Struct argument packing.
//!
//! Fields are written back to back in declared order using their native-endian
//! representation, with no alignment padding between or after them. Kernels
//! consuming a packed struct must declare a layout with the same property
//! (for example only 4-byte scalars, or explicit padding fields).

use crate::params::ScalarValue;

/// Capacity of a packed struct argument, in bytes.
pub const DEFAULT_STRUCT_CAPACITY: usize = 256;

/// Attempt to pack more bytes than the packer's capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackOverflow {
    pub required: usize,
    pub capacity: usize,
}

/// Call-scoped scratch buffer for one struct argument.
#[derive(Debug)]
pub struct StructPacker {
    capacity: usize,
    bytes: Vec<u8>,
}

impl StructPacker {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            bytes: Vec::with_capacity(capacity.min(DEFAULT_STRUCT_CAPACITY)),
        }
    }

    pub fn push(&mut self, value: ScalarValue) -> Result<(), PackOverflow> {
        let required = self.bytes.len() + value.byte_width();
        if required > self.capacity {
            return Err(PackOverflow {
                required,
                capacity: self.capacity,
            });
        }
        value.write_ne_bytes(&mut self.bytes);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}
