//! Per-remote index cache with mtime-based staleness.
//!
//! Each remote owns one slot file under `<cache>/remotes/`. A slot
//! is replaced atomically, so readers never see torn documents, and
//! its file mtime drives the 24 h time-to-live.

use crate::model::{IndexInfo, Remote};
use leaf_core::manifest::PackageInfo;
use leaf_core::{constants, load_json, write_json, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// One normalized package entry in a cached slot. URLs are absolute
/// by the time they land here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedPackage {
    /// Absolute artifact URL.
    pub url: String,
    /// Artifact size in bytes.
    pub size: u64,
    /// Prefixed artifact hash.
    pub hash: String,
    /// Manifest info block.
    pub info: PackageInfo,
}

/// The cached document for one remote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSlot {
    /// Enabled flag at fetch time; a flip invalidates the slot.
    pub enabled: bool,
    /// Repository info.
    pub info: IndexInfo,
    /// Normalized package entries.
    pub packages: Vec<CachedPackage>,
}

/// The on-disk index cache.
#[derive(Debug, Clone)]
pub struct IndexCache {
    dir: PathBuf,
}

impl IndexCache {
    /// Open (or designate) the cache directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The cache directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Slot file for a remote alias.
    #[must_use]
    pub fn slot_path(&self, alias: &str) -> PathBuf {
        self.dir.join(format!("{alias}.json"))
    }

    /// Whether the remote's slot must be refetched: absent slot,
    /// flipped enabled flag, or age at or past the TTL.
    #[must_use]
    pub fn is_stale(&self, remote: &Remote) -> bool {
        let path = self.slot_path(&remote.alias);
        let Ok(meta) = std::fs::metadata(&path) else {
            return true;
        };
        let age = meta
            .modified()
            .ok()
            .and_then(|m| m.elapsed().ok())
            .unwrap_or(Duration::MAX);
        if age_is_stale(age) {
            debug!(alias = %remote.alias, ?age, "cache slot expired");
            return true;
        }
        match self.load(&remote.alias) {
            Ok(slot) => slot.enabled != remote.enabled,
            Err(_) => true,
        }
    }

    /// Load a slot.
    pub fn load(&self, alias: &str) -> Result<CachedSlot> {
        let path = self.slot_path(alias);
        Ok(serde_json::from_value(load_json(&path)?)?)
    }

    /// Atomically replace a slot.
    pub fn store(&self, alias: &str, slot: &CachedSlot) -> Result<()> {
        let path = self.slot_path(alias);
        write_json(&path, &serde_json::to_value(slot)?, false)?;
        debug!(alias, path = %path.display(), "cache slot replaced");
        Ok(())
    }

    /// Drop a slot (used when a remote is removed).
    pub fn invalidate(&self, alias: &str) {
        let _ = std::fs::remove_file(self.slot_path(alias));
    }
}

/// The staleness predicate: a slot exactly as old as the TTL is
/// already stale, one second younger is not.
#[must_use]
pub fn age_is_stale(age: Duration) -> bool {
    age >= Duration::from_secs(constants::REMOTE_CACHE_TTL_SECS)
}
