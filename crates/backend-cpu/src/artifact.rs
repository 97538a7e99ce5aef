//! Host "compilation": entry-point discovery and the artifact format.

use kernelharness_runtime::{BackendError, BuildOptions};

const MAGIC: &str = "KHHOST1";

/// Artifact produced by the host backend's compile step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostArtifact {
    pub options: String,
    pub entry_points: Vec<String>,
}

impl HostArtifact {
    /// Scan `source` for compute entry points (`@compute ... fn name(`).
    pub fn build(source: &str, options: &BuildOptions) -> Result<Self, BackendError> {
        check_braces(source)?;
        let entry_points = compute_entry_points(source);
        if entry_points.is_empty() {
            return Err(BackendError::Build {
                log: "error: no @compute entry point found in source".to_string(),
            });
        }
        Ok(Self {
            options: options.to_string(),
            entry_points,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut text = format!("{MAGIC}\noptions {}\n", self.options);
        for entry in &self.entry_points {
            text.push_str("entry ");
            text.push_str(entry);
            text.push('\n');
        }
        text.into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BackendError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| BackendError::InvalidArtifact("host artifact is not UTF-8".into()))?;
        let mut lines = text.lines();
        if lines.next() != Some(MAGIC) {
            return Err(BackendError::InvalidArtifact("missing host artifact header".into()));
        }
        let mut artifact = Self {
            options: String::new(),
            entry_points: Vec::new(),
        };
        for line in lines {
            match line.split_once(' ') {
                Some(("options", options)) => artifact.options = options.to_string(),
                Some(("entry", name)) if is_identifier(name) => {
                    artifact.entry_points.push(name.to_string())
                }
                _ if line == "options" => {}
                _ => {
                    return Err(BackendError::InvalidArtifact(format!(
                        "unexpected host artifact line `{line}`"
                    )))
                }
            }
        }
        if artifact.entry_points.is_empty() {
            return Err(BackendError::InvalidArtifact("host artifact lists no entry points".into()));
        }
        Ok(artifact)
    }

    pub fn has_entry_point(&self, function: &str) -> bool {
        self.entry_points.iter().any(|entry| entry == function)
    }
}

fn compute_entry_points(source: &str) -> Vec<String> {
    let mut entries = Vec::new();
    let mut rest = source;
    while let Some(at) = rest.find("@compute") {
        rest = &rest[at + "@compute".len()..];
        let Some(fn_at) = find_keyword(rest, "fn") else {
            break;
        };
        let after = rest[fn_at + 2..].trim_start();
        let name: String = after
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if is_identifier(&name) {
            entries.push(name);
        }
        rest = &rest[fn_at + 2..];
    }
    entries
}

fn find_keyword(haystack: &str, keyword: &str) -> Option<usize> {
    let bytes = haystack.as_bytes();
    haystack.match_indices(keyword).map(|(at, _)| at).find(|&at| {
        let before = at.checked_sub(1).map(|i| bytes[i]);
        let after = bytes.get(at + keyword.len()).copied();
        let boundary = |b: Option<u8>| b.map_or(true, |b| !(b.is_ascii_alphanumeric() || b == b'_'));
        boundary(before) && boundary(after)
    })
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn check_braces(source: &str) -> Result<(), BackendError> {
    let mut depth: i64 = 0;
    for (line_no, line) in source.lines().enumerate() {
        let code = line.split("//").next().unwrap_or_default();
        for c in code.chars() {
            match c {
                '{' => depth += 1,
                '}' => depth -= 1,
                _ => {}
            }
            if depth < 0 {
                return Err(BackendError::Build {
                    log: format!("error: unmatched `}}` at line {}", line_no + 1),
                });
            }
        }
    }
    if depth != 0 {
        return Err(BackendError::Build {
            log: format!("error: {depth} unclosed `{{` at end of source"),
        });
    }
    Ok(())
}
