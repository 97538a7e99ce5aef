//! Kernel build options.

use std::fmt;

/// Parsed build-option string.
///
/// `-DNAME`, `-DNAME=VALUE` and `-D NAME=VALUE` become defines; every other
/// token is kept verbatim for backends that understand it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    defines: Vec<(String, Option<String>)>,
    passthrough: Vec<String>,
}

impl BuildOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(options: &str) -> Self {
        let mut parsed = Self::new();
        let mut tokens = options.split_whitespace();
        while let Some(token) = tokens.next() {
            let define = match token.strip_prefix("-D") {
                Some("") => tokens.next(),
                Some(rest) => Some(rest),
                None => {
                    parsed.passthrough.push(token.to_string());
                    continue;
                }
            };
            if let Some(define) = define {
                match define.split_once('=') {
                    Some((name, value)) => parsed.set_define(name, Some(value.to_string())),
                    None => parsed.set_define(define, None),
                }
            }
        }
        parsed
    }

    /// Add or replace a define, keeping first-seen order.
    pub fn define(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.set_define(name, Some(value.to_string()));
        self
    }

    fn set_define(&mut self, name: impl Into<String>, value: Option<String>) {
        let name = name.into();
        match self.defines.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => self.defines.push((name, value)),
        }
    }

    pub fn defines(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.defines
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_deref()))
    }

    pub fn passthrough(&self) -> &[String] {
        &self.passthrough
    }

    pub fn is_empty(&self) -> bool {
        self.defines.is_empty() && self.passthrough.is_empty()
    }
}

/// Canonical rendering, stable across runs for equal options.
impl fmt::Display for BuildOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let defines = self.defines.iter().map(|(name, value)| match value {
            Some(value) => format!("-D{name}={value}"),
            None => format!("-D{name}"),
        });
        let tokens: Vec<String> = defines.chain(self.passthrough.iter().cloned()).collect();
        f.write_str(&tokens.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_defines_and_passthrough() {
        let options = BuildOptions::parse("-DRADIUS=2 -cl-fast-relaxed-math -D USE_LUT -DRADIUS=3");
        let defines: Vec<_> = options.defines().collect();
        assert_eq!(defines, vec![("RADIUS", Some("3")), ("USE_LUT", None)]);
        assert_eq!(options.passthrough(), ["-cl-fast-relaxed-math"]);
        assert_eq!(
            options.to_string(),
            "-DRADIUS=3 -DUSE_LUT -cl-fast-relaxed-math"
        );
    }

    #[test]
    fn empty_string_gives_empty_options() {
        assert!(BuildOptions::parse("   ").is_empty());
        assert_eq!(BuildOptions::new().to_string(), "");
    }

    #[test]
    fn define_overrides_parsed_value() {
        let options = BuildOptions::parse("-DHOST_TYPE=1").define("HOST_TYPE", 0);
        assert_eq!(options.to_string(), "-DHOST_TYPE=0");
    }
}
