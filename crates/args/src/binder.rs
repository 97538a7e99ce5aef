//! Turns a descriptor list into positional kernel arguments.

use crate::descriptor::{ArgKind, ArgumentDescriptor, DescriptorList};
use crate::error::{BindError, ResolveError};
use crate::packing::{StructPacker, DEFAULT_STRUCT_CAPACITY};
use crate::params::{BufferHandle, ExecutionParameters, ScalarValue};
use crate::resolver::ParameterResolver;
use serde::Serialize;
use tracing::debug;

/// Value of one kernel argument.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Buffer(BufferHandle),
    Int(i32),
    Float(f32),
    /// Platform-width unsigned integer.
    Size(usize),
    /// Packed struct bytes, sized to the exact packed length.
    Bytes(Vec<u8>),
}

impl ArgValue {
    /// Raw bytes for by-value arguments; `None` for buffers.
    pub fn value_bytes(&self) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            ArgValue::Buffer(_) => return None,
            ArgValue::Int(v) => ScalarValue::Int(*v).write_ne_bytes(&mut out),
            ArgValue::Float(v) => ScalarValue::Float(*v).write_ne_bytes(&mut out),
            ArgValue::Size(v) => ScalarValue::Size(*v).write_ne_bytes(&mut out),
            ArgValue::Bytes(bytes) => out.extend_from_slice(bytes),
        }
        Some(out)
    }

    pub fn as_buffer(&self) -> Option<BufferHandle> {
        match self {
            ArgValue::Buffer(handle) => Some(*handle),
            _ => None,
        }
    }
}

impl From<ScalarValue> for ArgValue {
    fn from(value: ScalarValue) -> Self {
        match value {
            ScalarValue::Int(v) => ArgValue::Int(v),
            ScalarValue::Float(v) => ArgValue::Float(v),
            ScalarValue::Size(v) => ArgValue::Size(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundArgument {
    pub ordinal: u32,
    pub value: ArgValue,
}

/// One trace record per descriptor, in binding order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindTraceEntry {
    pub index: usize,
    pub kind: ArgKind,
    pub source: String,
    pub ordinal: u32,
}

/// Receiver of bound arguments, typically a backend kernel handle.
pub trait ArgumentSink {
    type Error: std::fmt::Display;

    fn set_argument(&mut self, argument: &BoundArgument) -> Result<(), Self::Error>;
}

/// A fully resolved argument list.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingPlan {
    arguments: Vec<BoundArgument>,
    trace: Vec<BindTraceEntry>,
}

impl BindingPlan {
    pub fn arguments(&self) -> &[BoundArgument] {
        &self.arguments
    }

    pub fn trace(&self) -> &[BindTraceEntry] {
        &self.trace
    }

    pub fn len(&self) -> usize {
        self.arguments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arguments.is_empty()
    }

    pub fn into_trace(self) -> Vec<BindTraceEntry> {
        self.trace
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ArgumentBinder {
    struct_capacity: usize,
}

impl Default for ArgumentBinder {
    fn default() -> Self {
        Self::new()
    }
}

impl ArgumentBinder {
    pub fn new() -> Self {
        Self {
            struct_capacity: DEFAULT_STRUCT_CAPACITY,
        }
    }

    pub fn with_struct_capacity(mut self, capacity: usize) -> Self {
        self.struct_capacity = capacity;
        self
    }

    pub fn struct_capacity(&self) -> usize {
        self.struct_capacity
    }

    /// Resolve every descriptor. Ordinals start at 0 and advance by one per
    /// descriptor; the first failure aborts the whole plan.
    pub fn plan(
        &self,
        input: BufferHandle,
        output: BufferHandle,
        params: &ExecutionParameters,
        descriptors: &DescriptorList,
    ) -> Result<BindingPlan, BindError> {
        let resolver = ParameterResolver::new(params);
        let mut arguments = Vec::with_capacity(descriptors.len());
        let mut trace = Vec::with_capacity(descriptors.len());
        let mut ordinal: u32 = 0;

        for (index, descriptor) in descriptors.iter().enumerate() {
            let value = self.resolve_value(index, descriptor, input, output, &resolver)?;
            debug!(
                index,
                kind = %descriptor.kind,
                source = %descriptor.source,
                ordinal,
                "resolved kernel argument"
            );
            trace.push(BindTraceEntry {
                index,
                kind: descriptor.kind,
                source: descriptor.source.clone(),
                ordinal,
            });
            arguments.push(BoundArgument { ordinal, value });
            ordinal += 1;
        }

        Ok(BindingPlan { arguments, trace })
    }

    /// Plan, then hand each argument to `sink`. Nothing reaches the sink
    /// unless the whole list resolved.
    pub fn bind<S: ArgumentSink>(
        &self,
        sink: &mut S,
        input: BufferHandle,
        output: BufferHandle,
        params: &ExecutionParameters,
        descriptors: &DescriptorList,
    ) -> Result<BindingPlan, BindError> {
        let plan = self.plan(input, output, params, descriptors)?;
        for (entry, argument) in plan.trace.iter().zip(&plan.arguments) {
            sink.set_argument(argument).map_err(|err| BindError::Sink {
                index: entry.index,
                ordinal: argument.ordinal,
                reason: err.to_string(),
            })?;
        }
        Ok(plan)
    }

    fn resolve_value(
        &self,
        index: usize,
        descriptor: &ArgumentDescriptor,
        input: BufferHandle,
        output: BufferHandle,
        resolver: &ParameterResolver<'_>,
    ) -> Result<ArgValue, BindError> {
        let source = descriptor.source.as_str();
        let unresolved = |name: &str, cause: ResolveError| BindError::UnresolvedSource {
            index,
            kind: descriptor.kind,
            source_name: name.to_string(),
            cause,
        };

        match descriptor.kind {
            ArgKind::InputBuffer => Ok(ArgValue::Buffer(input)),
            ArgKind::OutputBuffer => Ok(ArgValue::Buffer(output)),
            ArgKind::CustomBuffer => resolver
                .buffer(source)
                .map(|buffer| ArgValue::Buffer(buffer.handle))
                .map_err(|cause| unresolved(source, cause)),
            ArgKind::ScalarInt => resolver
                .int(source)
                .map(ArgValue::Int)
                .map_err(|cause| unresolved(source, cause)),
            ArgKind::ScalarFloat => resolver
                .float(source)
                .map(ArgValue::Float)
                .map_err(|cause| unresolved(source, cause)),
            ArgKind::ScalarSize => resolver
                .size(source)
                .map(ArgValue::Size)
                .map_err(|cause| unresolved(source, cause)),
            ArgKind::Struct => {
                let mut packer = StructPacker::new(self.struct_capacity);
                for field in &descriptor.fields {
                    let value = resolver
                        .field(field)
                        .map_err(|cause| unresolved(field.as_str(), cause))?;
                    packer.push(value).map_err(|overflow| BindError::BindOverflow {
                        index,
                        source_name: source.to_string(),
                        required: overflow.required,
                        capacity: overflow.capacity,
                    })?;
                }
                Ok(ArgValue::Bytes(packer.finish()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{AccessKind, BuiltinParams, CustomBuffer};
    use proptest::prelude::*;

    const INPUT: BufferHandle = BufferHandle(1);
    const OUTPUT: BufferHandle = BufferHandle(2);

    #[derive(Default)]
    struct RecordingSink {
        received: Vec<BoundArgument>,
        reject_ordinal: Option<u32>,
    }

    impl ArgumentSink for RecordingSink {
        type Error = String;

        fn set_argument(&mut self, argument: &BoundArgument) -> Result<(), String> {
            if self.reject_ordinal == Some(argument.ordinal) {
                return Err("invalid arg size".into());
            }
            self.received.push(argument.clone());
            Ok(())
        }
    }

    fn params() -> ExecutionParameters {
        ExecutionParameters::new(BuiltinParams {
            src_width: 1920,
            src_height: 1080,
            ..BuiltinParams::default()
        })
        .with_scalar("intA", ScalarValue::Int(5))
        .with_scalar("floatB", ScalarValue::Float(2.5))
        .with_scalar("sizeC", ScalarValue::Size(10))
        .with_buffer(CustomBuffer {
            name: "weights".into(),
            size_bytes: 100,
            handle: BufferHandle(9),
            access: AccessKind::ReadOnly,
        })
    }

    fn list(descriptors: Vec<ArgumentDescriptor>) -> DescriptorList {
        DescriptorList::new(descriptors).unwrap()
    }

    #[test]
    fn binds_dimensions_after_io_buffers() {
        let descriptors = list(vec![
            ArgumentDescriptor::input(),
            ArgumentDescriptor::output(),
            ArgumentDescriptor::int("srcWidth"),
            ArgumentDescriptor::int("srcHeight"),
        ]);
        let mut sink = RecordingSink::default();
        let plan = ArgumentBinder::new()
            .bind(&mut sink, INPUT, OUTPUT, &params(), &descriptors)
            .unwrap();

        assert_eq!(
            sink.received,
            vec![
                BoundArgument { ordinal: 0, value: ArgValue::Buffer(INPUT) },
                BoundArgument { ordinal: 1, value: ArgValue::Buffer(OUTPUT) },
                BoundArgument { ordinal: 2, value: ArgValue::Int(1920) },
                BoundArgument { ordinal: 3, value: ArgValue::Int(1080) },
            ]
        );
        assert_eq!(plan.trace().len(), 4);
        assert_eq!(
            plan.trace()[2],
            BindTraceEntry {
                index: 2,
                kind: ArgKind::ScalarInt,
                source: "srcWidth".into(),
                ordinal: 2
            }
        );
    }

    #[test]
    fn buffer_size_binds_as_platform_width_unsigned() {
        let descriptors = list(vec![ArgumentDescriptor::size("weights.size")]);
        let plan = ArgumentBinder::new()
            .plan(INPUT, OUTPUT, &params(), &descriptors)
            .unwrap();
        let value = &plan.arguments()[0].value;
        assert_eq!(value, &ArgValue::Size(100));
        assert_eq!(
            value.value_bytes().unwrap().len(),
            std::mem::size_of::<usize>()
        );
    }

    #[test]
    fn struct_fields_pack_in_declared_order() {
        let descriptors = list(vec![ArgumentDescriptor::packed(
            "params",
            ["intA", "floatB", "sizeC"],
        )]);
        let plan = ArgumentBinder::new()
            .plan(INPUT, OUTPUT, &params(), &descriptors)
            .unwrap();
        let ArgValue::Bytes(bytes) = &plan.arguments()[0].value else {
            panic!("expected packed bytes");
        };
        let size_width = std::mem::size_of::<usize>();
        assert_eq!(bytes.len(), 4 + 4 + size_width);
        assert_eq!(i32::from_ne_bytes(bytes[0..4].try_into().unwrap()), 5);
        assert_eq!(f32::from_ne_bytes(bytes[4..8].try_into().unwrap()), 2.5);
        assert_eq!(
            usize::from_ne_bytes(bytes[8..8 + size_width].try_into().unwrap()),
            10
        );
    }

    #[test]
    fn struct_overflow_aborts_before_the_sink_sees_anything() {
        let descriptors = list(vec![
            ArgumentDescriptor::input(),
            ArgumentDescriptor::packed("params", ["intA", "floatB", "sizeC"]),
        ]);
        let mut sink = RecordingSink::default();
        let err = ArgumentBinder::new()
            .with_struct_capacity(8)
            .bind(&mut sink, INPUT, OUTPUT, &params(), &descriptors)
            .unwrap_err();
        assert_eq!(
            err,
            BindError::BindOverflow {
                index: 1,
                source_name: "params".into(),
                required: 8 + std::mem::size_of::<usize>(),
                capacity: 8
            }
        );
        assert!(sink.received.is_empty());
    }

    #[test]
    fn unresolved_source_names_the_descriptor() {
        let descriptors = list(vec![
            ArgumentDescriptor::input(),
            ArgumentDescriptor::output(),
            ArgumentDescriptor::float("gamma"),
        ]);
        let mut sink = RecordingSink::default();
        let err = ArgumentBinder::new()
            .bind(&mut sink, INPUT, OUTPUT, &params(), &descriptors)
            .unwrap_err();
        assert_eq!(err.descriptor_index(), 2);
        assert!(matches!(
            err,
            BindError::UnresolvedSource { ref source_name, cause: ResolveError::NotFound { .. }, .. }
                if source_name == "gamma"
        ));
        assert!(sink.received.is_empty());
    }

    #[test]
    fn unresolved_struct_field_is_reported_by_field_name() {
        let descriptors = list(vec![ArgumentDescriptor::packed("params", ["intA", "nope"])]);
        let err = ArgumentBinder::new()
            .plan(INPUT, OUTPUT, &params(), &descriptors)
            .unwrap_err();
        assert!(matches!(
            err,
            BindError::UnresolvedSource { index: 0, ref source_name, .. } if source_name == "nope"
        ));
    }

    #[test]
    fn sink_rejection_carries_index_and_ordinal() {
        let descriptors = list(vec![
            ArgumentDescriptor::input(),
            ArgumentDescriptor::buffer("weights"),
        ]);
        let mut sink = RecordingSink {
            reject_ordinal: Some(1),
            ..RecordingSink::default()
        };
        let err = ArgumentBinder::new()
            .bind(&mut sink, INPUT, OUTPUT, &params(), &descriptors)
            .unwrap_err();
        assert_eq!(
            err,
            BindError::Sink {
                index: 1,
                ordinal: 1,
                reason: "invalid arg size".into()
            }
        );
    }

    fn resolvable_descriptor() -> impl Strategy<Value = ArgumentDescriptor> {
        prop_oneof![
            Just(ArgumentDescriptor::input()),
            Just(ArgumentDescriptor::output()),
            Just(ArgumentDescriptor::buffer("weights")),
            Just(ArgumentDescriptor::buffer("0")),
            Just(ArgumentDescriptor::int("src_width")),
            Just(ArgumentDescriptor::int("intA")),
            Just(ArgumentDescriptor::float("floatB")),
            Just(ArgumentDescriptor::size("sizeC")),
            Just(ArgumentDescriptor::size("weights.size")),
            Just(ArgumentDescriptor::packed("p", ["intA", "floatB"])),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn ordinals_are_dense_and_start_at_zero(
            descriptors in proptest::collection::vec(resolvable_descriptor(), 0..24)
        ) {
            let count = descriptors.len();
            let descriptors = DescriptorList::new(descriptors).unwrap();
            let mut sink = RecordingSink::default();
            let plan = ArgumentBinder::new()
                .bind(&mut sink, INPUT, OUTPUT, &params(), &descriptors)
                .unwrap();

            let ordinals: Vec<u32> = sink.received.iter().map(|a| a.ordinal).collect();
            let expected: Vec<u32> = (0..count as u32).collect();
            prop_assert_eq!(ordinals, expected);
            let trace_indices: Vec<usize> = plan.trace().iter().map(|t| t.index).collect();
            prop_assert_eq!(trace_indices, (0..count).collect::<Vec<_>>());
        }
    }
}
