//! Compiled-artifact cache keyed by source content hash.

use crate::error::CacheError;
use crate::hash::ContentHash;
use crate::layout::{remove_if_present, write_atomic, CacheLayout};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

/// What to do with an entry found to be invalid during lookup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalePolicy {
    /// Delete the artifact and its hash before reporting the miss.
    #[default]
    Evict,
    /// Leave the files for the next `store` to overwrite.
    Keep,
}

/// A cached artifact together with the hash it was validated against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub source_hash: ContentHash,
}

/// Why a lookup did not produce an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissReason {
    NotCached,
    HashMissing,
    Stale,
    ArtifactUnreadable,
    SourceUnreadable,
    /// The backend refused a cached artifact after a hash match.
    Rejected,
}

impl MissReason {
    pub fn as_str(self) -> &'static str {
        match self {
            MissReason::NotCached => "not_cached",
            MissReason::HashMissing => "hash_missing",
            MissReason::Stale => "stale",
            MissReason::ArtifactUnreadable => "artifact_unreadable",
            MissReason::SourceUnreadable => "source_unreadable",
            MissReason::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheProbe {
    Hit(Artifact),
    Miss(MissReason),
}

impl CacheProbe {
    pub fn into_artifact(self) -> Option<Artifact> {
        match self {
            CacheProbe::Hit(artifact) => Some(artifact),
            CacheProbe::Miss(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    layout: CacheLayout,
    stale_policy: StalePolicy,
}

impl CacheStore {
    pub fn new(layout: CacheLayout) -> Self {
        Self {
            layout,
            stale_policy: StalePolicy::default(),
        }
    }

    pub fn with_stale_policy(mut self, policy: StalePolicy) -> Self {
        self.stale_policy = policy;
        self
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    /// The cached artifact, if and only if both files exist and the stored
    /// hash equals the current hash of `source_path`.
    pub fn lookup(&self, algorithm: &str, kernel: &str, source_path: &Path) -> Option<Artifact> {
        self.probe(algorithm, kernel, source_path).into_artifact()
    }

    /// Like [`CacheStore::lookup`], reporting why a miss happened. Invalid
    /// entries are never errors; they are misses.
    pub fn probe(&self, algorithm: &str, kernel: &str, source_path: &Path) -> CacheProbe {
        match ContentHash::of_file(source_path) {
            Ok(current) => self.probe_with_hash(algorithm, kernel, &current),
            Err(err) => {
                warn!(source = %source_path.display(), error = %err, "cannot hash kernel source");
                CacheProbe::Miss(MissReason::SourceUnreadable)
            }
        }
    }

    /// Probe against an already computed source hash.
    pub fn probe_with_hash(&self, algorithm: &str, kernel: &str, current: &ContentHash) -> CacheProbe {
        let artifact_path = self.layout.artifact_path(algorithm, kernel);
        let hash_path = self.layout.hash_path(algorithm, kernel);

        let bytes = match fs::read(&artifact_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(algorithm, kernel, "artifact not cached");
                return CacheProbe::Miss(MissReason::NotCached);
            }
            Err(err) => {
                warn!(path = %artifact_path.display(), error = %err, "cached artifact unreadable");
                return self.invalid(algorithm, kernel, MissReason::ArtifactUnreadable);
            }
        };

        let stored = match fs::read(&hash_path) {
            Ok(raw) => ContentHash::from_slice(&raw),
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!(path = %hash_path.display(), error = %err, "hash record unreadable");
                }
                None
            }
        };
        let Some(stored) = stored else {
            warn!(algorithm, kernel, "artifact has no valid hash record");
            return self.invalid(algorithm, kernel, MissReason::HashMissing);
        };

        if stored != *current {
            warn!(
                algorithm,
                kernel,
                stored = %stored.short_hex(),
                current = %current.short_hex(),
                "kernel source changed since artifact was cached"
            );
            return self.invalid(algorithm, kernel, MissReason::Stale);
        }

        info!(algorithm, kernel, bytes = bytes.len(), hash = %current.short_hex(), "artifact cache hit");
        CacheProbe::Hit(Artifact {
            bytes,
            source_hash: stored,
        })
    }

    /// Hash `source_path` and store `artifact` under that hash.
    pub fn store(
        &self,
        algorithm: &str,
        kernel: &str,
        artifact: &[u8],
        source_path: &Path,
    ) -> Result<ContentHash, CacheError> {
        let hash = ContentHash::of_file(source_path).map_err(|err| CacheError::io(source_path, err))?;
        self.store_with_hash(algorithm, kernel, artifact, &hash)?;
        Ok(hash)
    }

    /// Store `artifact` built from source that hashes to `hash`.
    ///
    /// The old hash record goes first and the new one is written last, so a
    /// failure part way leaves an entry that reads as a miss.
    pub fn store_with_hash(
        &self,
        algorithm: &str,
        kernel: &str,
        artifact: &[u8],
        hash: &ContentHash,
    ) -> Result<(), CacheError> {
        let artifact_path = self.layout.artifact_path(algorithm, kernel);
        let hash_path = self.layout.hash_path(algorithm, kernel);
        remove_if_present(&hash_path)?;
        write_atomic(&artifact_path, artifact)?;
        write_atomic(&hash_path, hash.as_bytes())?;
        info!(
            algorithm,
            kernel,
            bytes = artifact.len(),
            hash = %hash.short_hex(),
            path = %artifact_path.display(),
            "stored kernel artifact"
        );
        Ok(())
    }

    /// Drop one entry. Returns whether anything was removed.
    pub fn evict(&self, algorithm: &str, kernel: &str) -> Result<bool, CacheError> {
        let hash_removed = remove_if_present(&self.layout.hash_path(algorithm, kernel))?;
        let artifact_removed = remove_if_present(&self.layout.artifact_path(algorithm, kernel))?;
        Ok(hash_removed || artifact_removed)
    }

    /// Remove every cached artifact of one algorithm; golden samples stay.
    pub fn purge(&self, algorithm: &str) -> Result<usize, CacheError> {
        let dir = self.layout.kernels_dir(algorithm);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(CacheError::io(&dir, err)),
        };
        let mut removed = 0;
        for entry in entries {
            let path = entry.map_err(|err| CacheError::io(&dir, err))?.path();
            if path.is_file() && remove_if_present(&path)? {
                removed += 1;
            }
        }
        info!(algorithm, removed, "purged artifact cache");
        Ok(removed)
    }

    fn invalid(&self, algorithm: &str, kernel: &str, reason: MissReason) -> CacheProbe {
        if self.stale_policy == StalePolicy::Evict {
            if let Err(err) = self.evict(algorithm, kernel) {
                warn!(algorithm, kernel, error = %err, "failed to evict invalid cache entry");
            }
        }
        CacheProbe::Miss(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: CacheStore,
        source: std::path::PathBuf,
    }

    fn fixture(policy: StalePolicy) -> Result<Fixture> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("dilate3x3.wgsl");
        fs::write(&source, "@compute @workgroup_size(1) fn dilate3x3() {}")?;
        let store = CacheStore::new(CacheLayout::new(dir.path().join("cache"))).with_stale_policy(policy);
        Ok(Fixture {
            _dir: dir,
            store,
            source,
        })
    }

    #[test]
    fn store_then_lookup_returns_the_same_bytes() -> Result<()> {
        let fx = fixture(StalePolicy::Evict)?;
        assert_eq!(
            fx.store.probe("dilate", "dilate3x3", &fx.source),
            CacheProbe::Miss(MissReason::NotCached)
        );
        let hash = fx.store.store("dilate", "dilate3x3", b"artifact-v1", &fx.source)?;
        let hit = fx.store.lookup("dilate", "dilate3x3", &fx.source).unwrap();
        assert_eq!(hit.bytes, b"artifact-v1");
        assert_eq!(hit.source_hash, hash);
        Ok(())
    }

    #[test]
    fn storing_twice_gives_identical_hits() -> Result<()> {
        let fx = fixture(StalePolicy::Evict)?;
        fx.store.store("dilate", "k", b"same", &fx.source)?;
        let first = fx.store.lookup("dilate", "k", &fx.source);
        fx.store.store("dilate", "k", b"same", &fx.source)?;
        let second = fx.store.lookup("dilate", "k", &fx.source);
        assert!(first.is_some());
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn edited_source_is_a_miss_and_evicts() -> Result<()> {
        let fx = fixture(StalePolicy::Evict)?;
        fx.store.store("dilate", "k", b"old", &fx.source)?;
        fs::write(&fx.source, "@compute @workgroup_size(1) fn dilate3x3() { }")?;
        assert_eq!(
            fx.store.probe("dilate", "k", &fx.source),
            CacheProbe::Miss(MissReason::Stale)
        );
        assert!(!fx.store.layout().artifact_path("dilate", "k").exists());
        assert!(!fx.store.layout().hash_path("dilate", "k").exists());
        Ok(())
    }

    #[test]
    fn one_byte_rewritten_in_place_is_stale() -> Result<()> {
        use std::io::{Seek, SeekFrom, Write};

        let fx = fixture(StalePolicy::Keep)?;
        fx.store.store("dilate", "k", b"artifact", &fx.source)?;
        let before = fs::read(&fx.source)?;
        let at = before.len() / 2;
        let mut file = fs::OpenOptions::new().write(true).open(&fx.source)?;
        file.seek(SeekFrom::Start(at as u64))?;
        file.write_all(&[before[at] ^ 0x01])?;
        drop(file);

        let after = fs::read(&fx.source)?;
        assert_eq!(after.len(), before.len());
        assert_eq!(after.iter().zip(&before).filter(|(a, b)| a != b).count(), 1);
        assert!(fx.store.lookup("dilate", "k", &fx.source).is_none());
        assert_eq!(
            fx.store.probe("dilate", "k", &fx.source),
            CacheProbe::Miss(MissReason::Stale)
        );
        Ok(())
    }

    #[test]
    fn keep_policy_leaves_stale_files_for_overwrite() -> Result<()> {
        let fx = fixture(StalePolicy::Keep)?;
        fx.store.store("dilate", "k", b"old", &fx.source)?;
        fs::write(&fx.source, "changed")?;
        assert!(fx.store.lookup("dilate", "k", &fx.source).is_none());
        assert!(fx.store.layout().artifact_path("dilate", "k").exists());
        fx.store.store("dilate", "k", b"new", &fx.source)?;
        assert_eq!(fx.store.lookup("dilate", "k", &fx.source).unwrap().bytes, b"new");
        Ok(())
    }

    #[test]
    fn missing_or_truncated_hash_is_a_miss() -> Result<()> {
        let fx = fixture(StalePolicy::Keep)?;
        fx.store.store("dilate", "k", b"bytes", &fx.source)?;
        let hash_path = fx.store.layout().hash_path("dilate", "k");
        fs::write(&hash_path, [1, 2, 3])?;
        assert_eq!(
            fx.store.probe("dilate", "k", &fx.source),
            CacheProbe::Miss(MissReason::HashMissing)
        );
        fs::remove_file(&hash_path)?;
        assert_eq!(
            fx.store.probe("dilate", "k", &fx.source),
            CacheProbe::Miss(MissReason::HashMissing)
        );
        Ok(())
    }

    #[test]
    fn missing_source_is_a_miss() -> Result<()> {
        let fx = fixture(StalePolicy::Evict)?;
        fx.store.store("dilate", "k", b"bytes", &fx.source)?;
        fs::remove_file(&fx.source)?;
        assert_eq!(
            fx.store.probe("dilate", "k", &fx.source),
            CacheProbe::Miss(MissReason::SourceUnreadable)
        );
        assert!(fx.store.layout().artifact_path("dilate", "k").exists());
        Ok(())
    }

    #[test]
    fn algorithms_do_not_share_entries() -> Result<()> {
        let fx = fixture(StalePolicy::Evict)?;
        fx.store.store("dilate", "k", b"dilate", &fx.source)?;
        assert!(fx.store.lookup("gaussian", "k", &fx.source).is_none());
        fx.store.store("gaussian", "k", b"gauss", &fx.source)?;
        assert_eq!(fx.store.lookup("dilate", "k", &fx.source).unwrap().bytes, b"dilate");
        Ok(())
    }

    #[test]
    fn purge_clears_one_algorithm() -> Result<()> {
        let fx = fixture(StalePolicy::Evict)?;
        fx.store.store("dilate", "a", b"1", &fx.source)?;
        fx.store.store("dilate", "b", b"2", &fx.source)?;
        fx.store.store("other", "a", b"3", &fx.source)?;
        assert_eq!(fx.store.purge("dilate")?, 4);
        assert!(fx.store.lookup("dilate", "a", &fx.source).is_none());
        assert!(fx.store.lookup("other", "a", &fx.source).is_some());
        assert_eq!(fx.store.purge("never-cached")?, 0);
        Ok(())
    }
}
