//! Host kernels and their invocation context.

use anyhow::{anyhow, bail, Context, Result};
use kernelharness_args::{ArgValue, BufferHandle};
use kernelharness_runtime::WorkDims;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A kernel implemented on the host, invoked once per dispatch with the
/// complete positional argument list.
pub trait HostKernel: Send + Sync {
    fn name(&self) -> &str;
    fn execute(&self, invocation: &mut HostInvocation<'_>) -> Result<()>;
}

pub type DynHostKernel = Arc<dyn HostKernel>;

#[derive(Default, Clone)]
pub struct HostKernelRegistry {
    kernels: Vec<DynHostKernel>,
}

impl HostKernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<K>(&mut self, kernel: K)
    where
        K: HostKernel + 'static,
    {
        self.kernels.push(Arc::new(kernel));
    }

    pub fn register_shared(&mut self, kernel: DynHostKernel) {
        self.kernels.push(kernel);
    }

    pub fn find(&self, name: &str) -> Option<DynHostKernel> {
        self.kernels
            .iter()
            .find(|kernel| kernel.name() == name)
            .map(Arc::clone)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.kernels.iter().map(|kernel| kernel.name())
    }
}

/// Host-side storage behind a buffer handle.
#[derive(Debug, Clone)]
pub struct HostBuffer {
    pub label: String,
    pub data: Vec<u8>,
}

/// What a host kernel sees during one dispatch.
pub struct HostInvocation<'a> {
    arguments: &'a BTreeMap<u32, ArgValue>,
    buffers: &'a mut HashMap<BufferHandle, HostBuffer>,
    work: &'a WorkDims,
}

impl<'a> HostInvocation<'a> {
    pub(crate) fn new(
        arguments: &'a BTreeMap<u32, ArgValue>,
        buffers: &'a mut HashMap<BufferHandle, HostBuffer>,
        work: &'a WorkDims,
    ) -> Self {
        Self {
            arguments,
            buffers,
            work,
        }
    }

    pub fn work(&self) -> &WorkDims {
        self.work
    }

    pub fn argument(&self, ordinal: u32) -> Result<&ArgValue> {
        self.arguments
            .get(&ordinal)
            .ok_or_else(|| anyhow!("argument {ordinal} was never set"))
    }

    pub fn int(&self, ordinal: u32) -> Result<i32> {
        match self.argument(ordinal)? {
            ArgValue::Int(value) => Ok(*value),
            other => bail!("argument {ordinal} is {other:?}, expected int"),
        }
    }

    pub fn float(&self, ordinal: u32) -> Result<f32> {
        match self.argument(ordinal)? {
            ArgValue::Float(value) => Ok(*value),
            other => bail!("argument {ordinal} is {other:?}, expected float"),
        }
    }

    pub fn size(&self, ordinal: u32) -> Result<usize> {
        match self.argument(ordinal)? {
            ArgValue::Size(value) => Ok(*value),
            other => bail!("argument {ordinal} is {other:?}, expected size_t"),
        }
    }

    /// Reader over a packed struct argument.
    pub fn packed(&self, ordinal: u32) -> Result<PackedReader<'_>> {
        match self.argument(ordinal)? {
            ArgValue::Bytes(bytes) => Ok(PackedReader::new(bytes)),
            other => bail!("argument {ordinal} is {other:?}, expected struct"),
        }
    }

    fn buffer_handle(&self, ordinal: u32) -> Result<BufferHandle> {
        self.argument(ordinal)?
            .as_buffer()
            .ok_or_else(|| anyhow!("argument {ordinal} is not a buffer"))
    }

    pub fn buffer(&self, ordinal: u32) -> Result<&[u8]> {
        let handle = self.buffer_handle(ordinal)?;
        self.buffers
            .get(&handle)
            .map(|buffer| buffer.data.as_slice())
            .with_context(|| format!("argument {ordinal} refers to released buffer {handle}"))
    }

    pub fn buffer_mut(&mut self, ordinal: u32) -> Result<&mut [u8]> {
        let handle = self.buffer_handle(ordinal)?;
        self.buffers
            .get_mut(&handle)
            .map(|buffer| buffer.data.as_mut_slice())
            .with_context(|| format!("argument {ordinal} refers to released buffer {handle}"))
    }
}

/// Sequential reader over packed struct bytes (native endian, no padding).
pub struct PackedReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> PackedReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.offset + N;
        let chunk = self
            .bytes
            .get(self.offset..end)
            .ok_or_else(|| anyhow!("packed struct ends at {} bytes, field needs {end}", self.bytes.len()))?;
        self.offset = end;
        let mut out = [0u8; N];
        out.copy_from_slice(chunk);
        Ok(out)
    }

    pub fn i32(&mut self) -> Result<i32> {
        self.take::<4>().map(i32::from_ne_bytes)
    }

    pub fn f32(&mut self) -> Result<f32> {
        self.take::<4>().map(f32::from_ne_bytes)
    }

    pub fn usize(&mut self) -> Result<usize> {
        self.take::<{ std::mem::size_of::<usize>() }>()
            .map(usize::from_ne_bytes)
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_reader_walks_fields_in_order() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&7i32.to_ne_bytes());
        bytes.extend_from_slice(&0.25f32.to_ne_bytes());
        bytes.extend_from_slice(&99usize.to_ne_bytes());
        let mut reader = PackedReader::new(&bytes);
        assert_eq!(reader.i32().unwrap(), 7);
        assert_eq!(reader.f32().unwrap(), 0.25);
        assert_eq!(reader.usize().unwrap(), 99);
        assert_eq!(reader.remaining(), 0);
        assert!(reader.i32().is_err());
    }

    struct Named(&'static str);

    impl HostKernel for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn execute(&self, _invocation: &mut HostInvocation<'_>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn registry_finds_by_name() {
        let mut registry = HostKernelRegistry::new();
        registry.register(Named("a"));
        registry.register(Named("b"));
        assert_eq!(registry.find("b").map(|k| k.name().to_string()), Some("b".into()));
        assert!(registry.find("c").is_none());
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
