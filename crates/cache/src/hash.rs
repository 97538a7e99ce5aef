//! Source content hash.
//!
//! A 128-bit XXH3 digest of the whole input, stored little-endian. This is a
//! change detector, not a cryptographic hash.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use xxhash_rust::xxh3::Xxh3;

pub const DIGEST_LEN: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; DIGEST_LEN]);

impl ContentHash {
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = ContentHasher::new();
        hasher.update(data);
        hasher.finish()
    }

    /// Hash a file in one streaming pass.
    pub fn of_file(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut hasher = ContentHasher::new();
        let mut chunk = [0u8; 64 * 1024];
        loop {
            let read = file.read(&mut chunk)?;
            if read == 0 {
                break;
            }
            hasher.update(&chunk[..read]);
        }
        Ok(hasher.finish())
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// First four digest bytes as hex, for names and log lines.
    pub fn short_hex(&self) -> String {
        self.0[..4].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({self})")
    }
}

/// Incremental form of [`ContentHash`].
#[derive(Clone)]
pub struct ContentHasher {
    state: Xxh3,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self { state: Xxh3::new() }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.state.update(data);
    }

    pub fn finish(&self) -> ContentHash {
        ContentHash(self.state.digest128().to_le_bytes())
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;
    use xxhash_rust::xxh3::xxh3_128;

    #[test]
    fn digest_is_little_endian_xxh3_128() {
        for input in [&b""[..], b"a", b"@compute @workgroup_size(16, 16, 1)\nfn dilate3x3() {}"] {
            let digest = ContentHash::of_bytes(input);
            assert_eq!(digest.as_bytes(), &xxh3_128(input).to_le_bytes());
        }
        assert_ne!(ContentHash::of_bytes(b"a"), ContentHash::of_bytes(b"b"));
    }

    #[test]
    fn streaming_matches_one_shot() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i * 31 % 251) as u8).collect();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        let from_file = ContentHash::of_file(file.path()).unwrap();
        assert_eq!(from_file, ContentHash::of_bytes(&data));

        let mut hasher = ContentHasher::new();
        for piece in data.chunks(7777) {
            hasher.update(piece);
        }
        assert_eq!(hasher.finish(), from_file);
    }

    #[test]
    fn hex_rendering() {
        let digest = ContentHash::of_bytes(b"dilate3x3");
        let hex = digest.to_string();
        assert_eq!(hex.len(), 2 * DIGEST_LEN);
        assert_eq!(digest.short_hex(), &hex[..8]);
        assert_eq!(ContentHash::from_slice(digest.as_bytes()), Some(digest));
        assert_eq!(ContentHash::from_slice(&[0; DIGEST_LEN - 1]), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        #[test]
        fn any_single_byte_change_changes_the_digest(
            data in proptest::collection::vec(any::<u8>(), 1..512),
            position in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let mut mutated = data.clone();
            let at = position.index(data.len());
            mutated[at] ^= flip;
            prop_assert_ne!(ContentHash::of_bytes(&data), ContentHash::of_bytes(&mutated));
        }
    }
}
