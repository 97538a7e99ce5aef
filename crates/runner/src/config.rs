//! Algorithm configuration files.
//!
//! A configuration is a JSON document describing the input image, the
//! expected output, how to verify it, the custom scalars and buffers kernels
//! may reference, and one or more kernel variants (`v0` .. `v99`). Keys that
//! start with `_` inside `scalars`, `buffers` and `kernels` are comments.
//! Relative paths are resolved against the configuration file's directory.

use crate::error::ConfigError;
use kernelharness_algorithms::Tolerance;
use kernelharness_args::{
    AccessKind, ArgumentDescriptor, BuiltinParams, DescriptorList, ExecutionParameters, ScalarValue,
};
use kernelharness_runtime::DispatchPath;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const MAX_VARIANT: u32 = 99;

/// Widths and heights reach kernels as `int` built-ins.
pub const MAX_DIMENSION: usize = i32::MAX as usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputConfig {
    /// Raw 8-bit image; `None` selects deterministic synthetic input.
    pub path: Option<PathBuf>,
    pub width: usize,
    pub height: usize,
    /// Row pitch of the file in bytes.
    pub stride: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    pub width: usize,
    pub height: usize,
    pub stride: usize,
    /// Where to write the device output, if anywhere.
    pub path: Option<PathBuf>,
}

impl OutputConfig {
    /// Byte length of the tightly packed device output.
    pub fn packed_len(&self) -> Result<usize, ConfigError> {
        self.width.checked_mul(self.height).ok_or_else(|| {
            ConfigError::field("output", format!("{} x {} does not fit in memory", self.width, self.height))
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoldenSource {
    /// Run the CPU reference and keep its output as the golden sample.
    #[default]
    CRef,
    /// Use a reference file supplied by the configuration.
    File,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerificationConfig {
    /// `None` defers to the algorithm's default thresholds.
    pub tolerance: Option<Tolerance>,
    pub golden_source: GoldenSource,
    pub golden_file: Option<PathBuf>,
}

/// Element type of a file-backed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Uchar,
    Short,
    Int,
    Float,
}

impl DataType {
    pub fn size_bytes(self) -> usize {
        match self {
            DataType::Uchar => 1,
            DataType::Short => 2,
            DataType::Int | DataType::Float => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferConfig {
    pub name: String,
    pub access: AccessKind,
    pub size_bytes: usize,
    /// Initial contents; the buffer starts zeroed otherwise.
    pub source_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelVariant {
    pub id: String,
    pub number: u32,
    pub kernel_file: PathBuf,
    pub kernel_function: String,
    pub work_dim: u32,
    pub global_work_size: Vec<usize>,
    pub local_work_size: Vec<usize>,
    pub build_options: String,
    pub dispatch_path: DispatchPath,
    pub descriptors: DescriptorList,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub algorithm: String,
    pub input: InputConfig,
    pub output: OutputConfig,
    pub verification: VerificationConfig,
    /// Custom scalars in declaration order.
    pub scalars: Vec<(String, ScalarValue)>,
    /// Custom buffers in declaration order; the order defines buffer indices.
    pub buffers: Vec<BufferConfig>,
    pub variants: Vec<KernelVariant>,
}

impl RunConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawConfig = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let config = raw.validate(base_dir)?;
        debug!(
            path = %path.display(),
            algorithm = %config.algorithm,
            variants = config.variants.len(),
            buffers = config.buffers.len(),
            scalars = config.scalars.len(),
            "parsed configuration"
        );
        Ok(config)
    }

    /// Parse a document whose relative paths are anchored at `base_dir`.
    pub fn from_json_str(text: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: base_dir.to_path_buf(),
            source,
        })?;
        raw.validate(base_dir)
    }

    pub fn variant(&self, id: &str) -> Option<&KernelVariant> {
        self.variants.iter().find(|variant| variant.id == id)
    }

    pub fn variant_ids(&self) -> Vec<String> {
        self.variants.iter().map(|variant| variant.id.clone()).collect()
    }

    /// Built-in fields and custom scalars for `variant`. Custom buffers are
    /// added by the coordinator once they are allocated.
    pub fn execution_parameters(&self, variant: &KernelVariant) -> Result<ExecutionParameters, ConfigError> {
        let builtins = BuiltinParams {
            src_width: dimension("input.width", self.input.width)?,
            src_height: dimension("input.height", self.input.height)?,
            // Device buffers are tightly packed; strides only apply to files.
            src_stride: dimension("input.width", self.input.width)?,
            dst_width: dimension("output.width", self.output.width)?,
            dst_height: dimension("output.height", self.output.height)?,
            dst_stride: dimension("output.width", self.output.width)?,
            kernel_variant: variant.number as i32,
        };
        let mut params = ExecutionParameters::new(builtins);
        for (name, value) in &self.scalars {
            params.insert_scalar(name.clone(), *value);
        }
        Ok(params)
    }
}

fn dimension(field: &str, value: usize) -> Result<i32, ConfigError> {
    i32::try_from(value).map_err(|_| ConfigError::field(field, format!("{value} exceeds {MAX_DIMENSION}")))
}

/// Reject planes whose dimensions cannot be passed to a kernel or whose file
/// size cannot be addressed.
fn check_plane(section: &str, width: usize, height: usize, stride: usize) -> Result<(), ConfigError> {
    dimension(&format!("{section}.width"), width)?;
    dimension(&format!("{section}.height"), height)?;
    stride
        .checked_mul(height)
        .ok_or_else(|| ConfigError::field(section, format!("{stride} x {height} bytes does not fit in memory")))?;
    Ok(())
}

/// Evaluate a size expression left to right: non-negative integers joined
/// by `*`, `x`, `+` or `-`, separated by whitespace.
pub fn eval_size_expr(expr: &str) -> Result<usize, String> {
    let mut tokens = expr.split_whitespace();
    let number = |token: Option<&str>| -> Result<usize, String> {
        let token = token.ok_or_else(|| format!("`{expr}` ends with an operator"))?;
        token
            .parse::<usize>()
            .map_err(|_| format!("`{token}` is not a non-negative integer"))
    };
    let mut value = number(tokens.next())?;
    while let Some(op) = tokens.next() {
        let rhs = number(tokens.next())?;
        value = match op {
            "*" | "x" => value.checked_mul(rhs),
            "+" => value.checked_add(rhs),
            "-" => value.checked_sub(rhs),
            other => return Err(format!("unknown operator `{other}` in `{expr}`")),
        }
        .ok_or_else(|| format!("`{expr}` overflows or goes negative"))?;
    }
    Ok(value)
}

/// `v<N>` with `N` in `0..=99`.
pub fn parse_variant_id(id: &str) -> Option<u32> {
    let digits = id.strip_prefix('v')?;
    if digits.is_empty() || digits.len() > 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|n| *n <= MAX_VARIANT)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawSize {
    Count(u64),
    Expr(String),
}

impl RawSize {
    fn evaluate(&self, field: &str) -> Result<usize, ConfigError> {
        match self {
            RawSize::Count(n) => usize::try_from(*n).map_err(|_| ConfigError::field(field, "too large")),
            RawSize::Expr(expr) => eval_size_expr(expr).map_err(|reason| ConfigError::field(field, reason)),
        }
    }
}

fn optional_size(size: &Option<RawSize>, field: &str) -> Result<Option<usize>, ConfigError> {
    size.as_ref().map(|s| s.evaluate(field)).transpose()
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    algorithm: String,
    input: RawInput,
    #[serde(default)]
    output: RawOutput,
    #[serde(default)]
    verification: RawVerification,
    #[serde(default)]
    scalars: Map<String, Value>,
    #[serde(default)]
    buffers: Map<String, Value>,
    #[serde(default)]
    kernels: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawInput {
    path: Option<PathBuf>,
    width: RawSize,
    height: RawSize,
    stride: Option<RawSize>,
}

#[derive(Debug, Default, Deserialize)]
struct RawOutput {
    width: Option<RawSize>,
    height: Option<RawSize>,
    stride: Option<RawSize>,
    path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct RawVerification {
    tolerance: Option<f64>,
    error_rate_threshold: Option<f64>,
    #[serde(default)]
    golden_source: GoldenSource,
    golden_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawScalar {
    #[serde(rename = "type")]
    kind: String,
    value: Value,
}

#[derive(Debug, Deserialize)]
struct RawBuffer {
    #[serde(rename = "type")]
    access: AccessKind,
    size_bytes: Option<RawSize>,
    source_file: Option<PathBuf>,
    data_type: Option<DataType>,
    num_elements: Option<RawSize>,
}

#[derive(Debug, Deserialize)]
struct RawKernel {
    kernel_file: PathBuf,
    kernel_function: String,
    #[serde(default = "default_work_dim")]
    work_dim: u32,
    global_work_size: Vec<RawSize>,
    #[serde(default)]
    local_work_size: Vec<RawSize>,
    #[serde(default)]
    kernel_option: String,
    #[serde(default)]
    host_type: DispatchPath,
    kernel_args: Option<Vec<ArgumentDescriptor>>,
}

fn default_work_dim() -> u32 {
    1
}

/// Entries of a section object, skipping `_` comment keys, in file order.
fn entries<'a, T: DeserializeOwned>(
    section: &'a str,
    map: &'a Map<String, Value>,
) -> impl Iterator<Item = Result<(&'a str, T), ConfigError>> + 'a {
    map.iter()
        .filter(|(key, _)| !key.starts_with('_'))
        .map(move |(key, value)| {
            T::deserialize(value)
                .map(|parsed| (key.as_str(), parsed))
                .map_err(|err| ConfigError::field(format!("{section}.{key}"), err.to_string()))
        })
}

fn anchored(base_dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}

impl RawConfig {
    fn validate(self, base_dir: &Path) -> Result<RunConfig, ConfigError> {
        if self.algorithm.trim().is_empty() {
            return Err(ConfigError::field("algorithm", "must not be empty"));
        }

        let width = self.input.width.evaluate("input.width")?;
        let height = self.input.height.evaluate("input.height")?;
        if width == 0 || height == 0 {
            return Err(ConfigError::field("input", "width and height must be positive"));
        }
        let stride = optional_size(&self.input.stride, "input.stride")?.unwrap_or(width);
        if stride < width {
            return Err(ConfigError::field("input.stride", format!("{stride} is narrower than width {width}")));
        }
        check_plane("input", width, height, stride)?;
        let input = InputConfig {
            path: self.input.path.map(|p| anchored(base_dir, p)),
            width,
            height,
            stride,
        };

        let out_width = optional_size(&self.output.width, "output.width")?.unwrap_or(width);
        let out_height = optional_size(&self.output.height, "output.height")?.unwrap_or(height);
        let out_stride = optional_size(&self.output.stride, "output.stride")?.unwrap_or(out_width);
        if out_width == 0 || out_height == 0 {
            return Err(ConfigError::field("output", "width and height must be positive"));
        }
        if out_stride < out_width {
            return Err(ConfigError::field(
                "output.stride",
                format!("{out_stride} is narrower than width {out_width}"),
            ));
        }
        check_plane("output", out_width, out_height, out_stride)?;
        let output = OutputConfig {
            width: out_width,
            height: out_height,
            stride: out_stride,
            path: self.output.path.map(|p| anchored(base_dir, p)),
        };

        let verification = validate_verification(self.verification, base_dir)?;
        let scalars = validate_scalars(&self.scalars)?;
        let buffers = validate_buffers(&self.buffers, base_dir)?;

        let mut variants = Vec::new();
        for entry in entries::<RawKernel>("kernels", &self.kernels) {
            let (id, raw) = entry?;
            variants.push(validate_variant(id, raw, base_dir)?);
        }
        if variants.is_empty() {
            return Err(ConfigError::NoVariants);
        }

        Ok(RunConfig {
            algorithm: self.algorithm,
            input,
            output,
            verification,
            scalars,
            buffers,
            variants,
        })
    }
}

fn validate_verification(raw: RawVerification, base_dir: &Path) -> Result<VerificationConfig, ConfigError> {
    let tolerance = match (raw.tolerance, raw.error_rate_threshold) {
        (None, None) => None,
        (tolerance, rate) => {
            let tolerance = Tolerance::new(tolerance.unwrap_or(0.0), rate.unwrap_or(0.0));
            if !(tolerance.tolerance >= 0.0) {
                return Err(ConfigError::field("verification.tolerance", "must be non-negative"));
            }
            if !(0.0..=1.0).contains(&tolerance.error_rate_threshold) {
                return Err(ConfigError::field(
                    "verification.error_rate_threshold",
                    "must lie in [0, 1]",
                ));
            }
            Some(tolerance)
        }
    };
    let golden_file = raw.golden_file.map(|p| anchored(base_dir, p));
    if raw.golden_source == GoldenSource::File && golden_file.is_none() {
        return Err(ConfigError::field(
            "verification.golden_file",
            "required when golden_source is \"file\"",
        ));
    }
    Ok(VerificationConfig {
        tolerance,
        golden_source: raw.golden_source,
        golden_file,
    })
}

fn validate_scalars(section: &Map<String, Value>) -> Result<Vec<(String, ScalarValue)>, ConfigError> {
    let mut scalars = Vec::new();
    for entry in entries::<RawScalar>("scalars", section) {
        let (name, raw) = entry?;
        let field = format!("scalars.{name}");
        let value = match raw.kind.as_str() {
            "int" => raw
                .value
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(ScalarValue::Int),
            "float" => raw.value.as_f64().map(|v| ScalarValue::Float(v as f32)),
            "size_t" | "size" => raw
                .value
                .as_u64()
                .and_then(|v| usize::try_from(v).ok())
                .map(ScalarValue::Size),
            other => return Err(ConfigError::field(field, format!("unknown scalar type `{other}`"))),
        }
        .ok_or_else(|| ConfigError::field(&field, format!("{} is not a valid {}", raw.value, raw.kind)))?;
        scalars.push((name.to_string(), value));
    }
    Ok(scalars)
}

fn validate_buffers(section: &Map<String, Value>, base_dir: &Path) -> Result<Vec<BufferConfig>, ConfigError> {
    let mut buffers = Vec::new();
    for entry in entries::<RawBuffer>("buffers", section) {
        let (name, raw) = entry?;
        let field = format!("buffers.{name}");
        let explicit = optional_size(&raw.size_bytes, &format!("{field}.size_bytes"))?;
        let size_bytes = match &raw.source_file {
            Some(_) => {
                let data_type = raw
                    .data_type
                    .ok_or_else(|| ConfigError::field(&field, "file-backed buffer needs `data_type`"))?;
                let elements = optional_size(&raw.num_elements, &format!("{field}.num_elements"))?
                    .filter(|n| *n > 0)
                    .ok_or_else(|| ConfigError::field(&field, "file-backed buffer needs `num_elements`"))?;
                match explicit {
                    Some(size) => size,
                    None => data_type.size_bytes().checked_mul(elements).ok_or_else(|| {
                        ConfigError::field(
                            format!("{field}.num_elements"),
                            format!("{elements} elements do not fit in memory"),
                        )
                    })?,
                }
            }
            None => explicit
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::field(&field, "empty buffer needs `size_bytes`"))?,
        };
        buffers.push(BufferConfig {
            name: name.to_string(),
            access: raw.access,
            size_bytes,
            source_file: raw.source_file.map(|p| anchored(base_dir, p)),
        });
    }
    Ok(buffers)
}

fn validate_variant(id: &str, raw: RawKernel, base_dir: &Path) -> Result<KernelVariant, ConfigError> {
    let field = format!("kernels.{id}");
    let number =
        parse_variant_id(id).ok_or_else(|| ConfigError::field(&field, "variant ids are v0 to v99"))?;
    if raw.kernel_function.trim().is_empty() {
        return Err(ConfigError::field(format!("{field}.kernel_function"), "must not be empty"));
    }
    if !(1..=3).contains(&raw.work_dim) {
        return Err(ConfigError::field(format!("{field}.work_dim"), "must be 1, 2 or 3"));
    }
    let sizes = |sizes: &[RawSize], name: &str| -> Result<Vec<usize>, ConfigError> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, size)| size.evaluate(&format!("{field}.{name}[{i}]")))
            .collect()
    };
    let global_work_size = sizes(&raw.global_work_size, "global_work_size")?;
    let local_work_size = sizes(&raw.local_work_size, "local_work_size")?;
    if global_work_size.len() < raw.work_dim as usize {
        return Err(ConfigError::field(
            format!("{field}.global_work_size"),
            format!("needs {} entries", raw.work_dim),
        ));
    }

    let descriptors = match raw.kernel_args {
        Some(args) => DescriptorList::new(args).map_err(|source| ConfigError::Descriptor {
            variant: id.to_string(),
            source,
        })?,
        None => DescriptorList::default_layout(),
    };

    Ok(KernelVariant {
        id: id.to_string(),
        number,
        kernel_file: anchored(base_dir, raw.kernel_file),
        kernel_function: raw.kernel_function,
        work_dim: raw.work_dim,
        global_work_size,
        local_work_size,
        build_options: raw.kernel_option,
        dispatch_path: raw.host_type,
        descriptors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernelharness_args::{ArgKind, DescriptorError};

    const CONFIG: &str = r#"{
        "algorithm": "dilate3x3",
        "input": { "path": "data/in.raw", "width": 64, "height": "8 * 4", "stride": 80 },
        "output": { "path": "/tmp/out.raw" },
        "scalars": {
            "_comment": "documentation only",
            "radius": { "type": "int", "value": 3 },
            "gain": { "type": "float", "value": 0.5 },
            "count": { "type": "size_t", "value": 42 }
        },
        "buffers": {
            "zeta": { "type": "read_write", "size_bytes": "64 x 32" },
            "alpha": { "type": "read_only", "source_file": "weights.bin", "data_type": "float", "num_elements": 25 }
        },
        "kernels": {
            "_note": { "anything": true },
            "v0": {
                "kernel_file": "../kernels/dilate3x3.wgsl",
                "kernel_function": "dilate3x3",
                "work_dim": 2,
                "global_work_size": [64, 32],
                "local_work_size": [16, 16]
            },
            "v7": {
                "kernel_file": "k.wgsl",
                "kernel_function": "k",
                "work_dim": 1,
                "global_work_size": ["64 * 32"],
                "kernel_option": "-DTILE=4",
                "host_type": "cl_extension",
                "kernel_args": [
                    { "type": "input" },
                    { "type": "output" },
                    { "type": "buffer", "source": "1" },
                    { "type": "size_t", "source": "zeta.size" },
                    { "type": "struct", "source": "dims", "fields": ["src_width", "radius", "gain"] }
                ]
            }
        }
    }"#;

    fn parsed() -> RunConfig {
        RunConfig::from_json_str(CONFIG, Path::new("/cfg")).unwrap()
    }

    #[test]
    fn parses_a_complete_document() {
        let config = parsed();
        assert_eq!(config.algorithm, "dilate3x3");
        assert_eq!(
            config.input,
            InputConfig {
                path: Some(PathBuf::from("/cfg/data/in.raw")),
                width: 64,
                height: 32,
                stride: 80,
            }
        );
        assert_eq!((config.output.width, config.output.height, config.output.stride), (64, 32, 64));
        assert_eq!(config.output.path, Some(PathBuf::from("/tmp/out.raw")));
        assert_eq!(config.verification.golden_source, GoldenSource::CRef);
        assert_eq!(config.verification.tolerance, None);
        assert_eq!(config.variant_ids(), vec!["v0", "v7"]);
    }

    #[test]
    fn comment_keys_are_skipped_and_order_is_kept() {
        let config = parsed();
        let scalars: Vec<_> = config.scalars.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(scalars, vec!["radius", "gain", "count"]);
        assert_eq!(config.scalars[2].1, ScalarValue::Size(42));
        let buffers: Vec<_> = config.buffers.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(buffers, vec!["zeta", "alpha"]);
        assert_eq!(config.buffers[0].size_bytes, 2048);
        assert_eq!(config.buffers[1].size_bytes, 100);
        assert_eq!(config.buffers[1].source_file, Some(PathBuf::from("/cfg/weights.bin")));
    }

    #[test]
    fn missing_kernel_args_get_the_default_layout() {
        let config = parsed();
        let v0 = config.variant("v0").unwrap();
        assert_eq!(v0.descriptors, DescriptorList::default_layout());
        assert_eq!(v0.dispatch_path, DispatchPath::Standard);
        assert_eq!(v0.kernel_file, PathBuf::from("/cfg/../kernels/dilate3x3.wgsl"));

        let v7 = config.variant("v7").unwrap();
        assert_eq!(v7.number, 7);
        assert_eq!(v7.dispatch_path, DispatchPath::Extension);
        assert_eq!(v7.global_work_size, vec![2048]);
        assert!(v7.local_work_size.is_empty());
        assert_eq!(v7.descriptors.len(), 5);
        assert_eq!(v7.descriptors[4].kind, ArgKind::Struct);
    }

    #[test]
    fn execution_parameters_carry_builtins_and_scalars() {
        let config = parsed();
        let params = config.execution_parameters(config.variant("v7").unwrap()).unwrap();
        assert_eq!(params.builtins.src_width, 64);
        assert_eq!(params.builtins.src_stride, 64);
        assert_eq!(params.builtins.dst_height, 32);
        assert_eq!(params.builtins.kernel_variant, 7);
        assert_eq!(params.scalar("gain"), Some(ScalarValue::Float(0.5)));
        assert!(params.buffers().is_empty());
    }

    #[test]
    fn size_expressions() {
        assert_eq!(eval_size_expr("1920 * 1080 * 4"), Ok(8_294_400));
        assert_eq!(eval_size_expr("10 + 5 x 2"), Ok(30));
        assert_eq!(eval_size_expr(" 7 "), Ok(7));
        assert!(eval_size_expr("3 - 4").is_err());
        assert!(eval_size_expr("3 *").is_err());
        assert!(eval_size_expr("3 / 1").is_err());
        assert!(eval_size_expr("").is_err());
        assert!(eval_size_expr("-1").is_err());
    }

    #[test]
    fn variant_ids() {
        assert_eq!(parse_variant_id("v0"), Some(0));
        assert_eq!(parse_variant_id("v99"), Some(99));
        assert_eq!(parse_variant_id("v100"), None);
        assert_eq!(parse_variant_id("v"), None);
        assert_eq!(parse_variant_id("V1"), None);
        assert_eq!(parse_variant_id("v+1"), None);
    }

    fn with_kernel(kernel: &str) -> Result<RunConfig, ConfigError> {
        let doc = format!(
            r#"{{ "algorithm": "a", "input": {{ "width": 4, "height": 4 }}, "kernels": {{ {kernel} }} }}"#
        );
        RunConfig::from_json_str(&doc, Path::new("."))
    }

    #[test]
    fn invalid_documents_are_config_errors() {
        assert!(matches!(with_kernel(""), Err(ConfigError::NoVariants)));
        assert!(matches!(
            with_kernel(r#""first": { "kernel_file": "k", "kernel_function": "k", "global_work_size": [1] }"#),
            Err(ConfigError::Field { .. })
        ));
        let err = with_kernel(
            r#""v1": { "kernel_file": "k", "kernel_function": "k", "global_work_size": [1],
                       "kernel_args": [ { "type": "input" }, { "type": "struct", "source": "s" } ] }"#,
        )
        .unwrap_err();
        match err {
            ConfigError::Descriptor { variant, source } => {
                assert_eq!(variant, "v1");
                assert!(matches!(source, DescriptorError::EmptyStruct { index: 1, .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            with_kernel(r#""v1": { "kernel_file": "k", "kernel_function": "k", "work_dim": 2, "global_work_size": [1] }"#),
            Err(ConfigError::Field { .. })
        ));
        assert!(matches!(
            RunConfig::from_json_str("{ not json", Path::new(".")),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn buffers_need_a_size_source() {
        let doc = |buffer: &str| {
            format!(
                r#"{{ "algorithm": "a", "input": {{ "width": 4, "height": 4 }},
                     "buffers": {{ "b": {buffer} }},
                     "kernels": {{ "v0": {{ "kernel_file": "k", "kernel_function": "k", "global_work_size": [16] }} }} }}"#
            )
        };
        let parse = |buffer: &str| RunConfig::from_json_str(&doc(buffer), Path::new("."));
        assert!(parse(r#"{ "type": "read_only" }"#).is_err());
        assert!(parse(r#"{ "type": "read_only", "source_file": "f", "num_elements": 4 }"#).is_err());
        assert!(parse(r#"{ "type": "read_only", "source_file": "f", "data_type": "short" }"#).is_err());
        let ok = parse(r#"{ "type": "read_only", "source_file": "f", "data_type": "short", "num_elements": 4 }"#)
            .unwrap();
        assert_eq!(ok.buffers[0].size_bytes, 8);
        assert!(parse(r#"{ "type": "sideways", "size_bytes": 4 }"#).is_err());
    }

    #[test]
    fn element_counts_that_overflow_the_byte_size_are_rejected() {
        let doc = |elements: &str| {
            format!(
                r#"{{ "algorithm": "a", "input": {{ "width": 4, "height": 4 }},
                     "buffers": {{ "w": {{ "type": "read_only", "source_file": "f", "data_type": "float", "num_elements": "{elements}" }} }},
                     "kernels": {{ "v0": {{ "kernel_file": "k", "kernel_function": "k", "global_work_size": [16] }} }} }}"#
            )
        };
        let err = RunConfig::from_json_str(&doc("4611686018427387904 x 2"), Path::new(".")).unwrap_err();
        match err {
            ConfigError::Field { field, .. } => assert_eq!(field, "buffers.w.num_elements"),
            other => panic!("unexpected {other:?}"),
        }
        let fits = RunConfig::from_json_str(&doc("1024 x 2"), Path::new(".")).unwrap();
        assert_eq!(fits.buffers[0].size_bytes, 8192);
    }

    #[test]
    fn dimensions_beyond_int_range_are_rejected() {
        let doc = |input: &str, output: &str| {
            format!(
                r#"{{ "algorithm": "a", "input": {{ {input} }}, "output": {{ {output} }},
                     "kernels": {{ "v0": {{ "kernel_file": "k", "kernel_function": "k", "global_work_size": [16] }} }} }}"#
            )
        };
        let field_of = |input: &str, output: &str| match RunConfig::from_json_str(&doc(input, output), Path::new(".")) {
            Err(ConfigError::Field { field, .. }) => field,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(field_of(r#""width": 3000000000, "height": 1"#, ""), "input.width");
        assert_eq!(field_of(r#""width": 4, "height": 4"#, r#""height": 2147483648"#), "output.height");
        assert_eq!(
            field_of(r#""width": 4, "height": 4"#, r#""stride": "4611686018427387904 x 2""#),
            "output"
        );

        let edge = RunConfig::from_json_str(&doc(r#""width": 2147483647, "height": 1"#, ""), Path::new(".")).unwrap();
        let params = edge.execution_parameters(&edge.variants[0]).unwrap();
        assert_eq!(params.builtins.src_width, i32::MAX);
        assert_eq!(edge.output.packed_len().unwrap(), MAX_DIMENSION);
    }

    #[test]
    fn hand_built_oversized_output_is_an_error_not_a_wrap() {
        let mut config = parsed();
        config.output.width = usize::MAX / 2;
        config.output.height = 3;
        assert!(matches!(config.output.packed_len(), Err(ConfigError::Field { .. })));
        config.output.width = MAX_DIMENSION + 1;
        config.output.height = 1;
        let err = config.execution_parameters(config.variant("v7").unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::Field { ref field, .. } if field == "output.width"));
    }

    #[test]
    fn explicit_thresholds_override_defaults() {
        let doc = r#"{ "algorithm": "a", "input": { "width": 2, "height": 2 },
                       "verification": { "tolerance": 2, "golden_source": "file", "golden_file": "g.raw" },
                       "kernels": { "v0": { "kernel_file": "k", "kernel_function": "k", "global_work_size": [4] } } }"#;
        let config = RunConfig::from_json_str(doc, Path::new("/base")).unwrap();
        assert_eq!(config.verification.tolerance, Some(Tolerance::new(2.0, 0.0)));
        assert_eq!(config.verification.golden_source, GoldenSource::File);
        assert_eq!(config.verification.golden_file, Some(PathBuf::from("/base/g.raw")));

        let missing = doc.replace(r#", "golden_file": "g.raw""#, "");
        assert!(RunConfig::from_json_str(&missing, Path::new(".")).is_err());
    }
}
