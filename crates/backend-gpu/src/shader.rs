//! WGSL front end: define injection, validation and SPIR-V emission.

use kernelharness_runtime::{BackendError, BuildOptions};
use naga::valid::{Capabilities, ValidationFlags, Validator};
use std::fmt::Write as _;
use tracing::debug;

pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Prepend build-option defines as module-scope constants.
/// `-DNAME=VALUE` becomes `const NAME = VALUE;`, a bare `-DNAME` is `1`.
pub fn apply_defines(source: &str, options: &BuildOptions) -> String {
    let mut out = String::with_capacity(source.len() + 64);
    for (name, value) in options.defines() {
        let _ = writeln!(out, "const {name} = {};", value.unwrap_or("1"));
    }
    if !options.passthrough().is_empty() {
        debug!(ignored = ?options.passthrough(), "WGSL build ignores non-define options");
    }
    out.push_str(source);
    out
}

/// Validate WGSL and translate it to SPIR-V. The artifact is the SPIR-V
/// word stream in little-endian byte order.
pub fn compile_wgsl(source: &str, options: &BuildOptions) -> Result<Vec<u8>, BackendError> {
    let full = apply_defines(source, options);
    let module = naga::front::wgsl::parse_str(&full).map_err(|err| BackendError::Build {
        log: err.emit_to_string(&full),
    })?;
    let info = Validator::new(ValidationFlags::all(), Capabilities::empty())
        .validate(&module)
        .map_err(|err| BackendError::Build {
            log: err.emit_to_string(&full),
        })?;
    if !module
        .entry_points
        .iter()
        .any(|entry| entry.stage == naga::ShaderStage::Compute)
    {
        return Err(BackendError::Build {
            log: "error: module has no compute entry point".to_string(),
        });
    }
    let words = naga::back::spv::write_vec(&module, &info, &naga::back::spv::Options::default(), None)
        .map_err(|err| BackendError::Build {
            log: format!("SPIR-V generation failed: {err}"),
        })?;
    Ok(words.iter().flat_map(|word| word.to_le_bytes()).collect())
}

/// Decode an artifact back into SPIR-V words, checking length and magic.
pub fn artifact_words(artifact: &[u8]) -> Result<Vec<u32>, BackendError> {
    if artifact.len() < 20 || artifact.len() % 4 != 0 {
        return Err(BackendError::InvalidArtifact(format!(
            "{} bytes is not a SPIR-V module",
            artifact.len()
        )));
    }
    let words: Vec<u32> = artifact
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    if words[0] != SPIRV_MAGIC {
        return Err(BackendError::InvalidArtifact(format!(
            "bad SPIR-V magic {:#010x}",
            words[0]
        )));
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    const COPY_KERNEL: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<u32>;
@group(0) @binding(1) var<storage, read_write> dst: array<u32>;

@compute @workgroup_size(64)
fn copy_words(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x < arrayLength(&src)) {
        dst[gid.x] = src[gid.x] + u32(SCALE);
    }
}
"#;

    #[test]
    fn defines_become_constants() {
        let options = BuildOptions::parse("-DSCALE=2 -DFAST");
        let full = apply_defines("fn f() {}", &options);
        assert!(full.starts_with("const SCALE = 2;\nconst FAST = 1;\n"));
    }

    #[test]
    fn compiles_to_spirv() {
        let options = BuildOptions::parse("-DSCALE=3");
        let artifact = compile_wgsl(COPY_KERNEL, &options).unwrap();
        let words = artifact_words(&artifact).unwrap();
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn undefined_identifier_is_a_build_error_with_log() {
        let err = compile_wgsl(COPY_KERNEL, &BuildOptions::new()).unwrap_err();
        match err {
            BackendError::Build { log } => assert!(log.contains("SCALE"), "{log}"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn truncated_artifacts_are_rejected() {
        let artifact = compile_wgsl(COPY_KERNEL, &BuildOptions::parse("-DSCALE=1")).unwrap();
        assert!(artifact_words(&artifact[..artifact.len() - 1]).is_err());
        let mut corrupted = artifact.clone();
        corrupted[0] ^= 0xff;
        assert!(artifact_words(&corrupted).is_err());
    }
}
