use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::inventory::LocalAssetRecord;

pub const CACHE_FILE: &str = "local_models_cache.json";

/// On-disk shape of the inventory cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(default)]
    pub directories: BTreeMap<String, Vec<LocalAssetRecord>>,
}

#[derive(Debug, Clone)]
struct CachedDirectory {
    scanned_at: OffsetDateTime,
    records: Vec<LocalAssetRecord>,
}

/// Per-directory scan results with TTL invalidation, optionally mirrored to a
/// JSON snapshot file.
#[derive(Debug)]
pub struct ScanCache {
    ttl: Duration,
    file: Option<PathBuf>,
    entries: BTreeMap<String, CachedDirectory>,
}

impl ScanCache {
    #[must_use]
    pub fn in_memory(ttl: Duration) -> Self {
        Self {
            ttl,
            file: None,
            entries: BTreeMap::new(),
        }
    }

    /// Opens a cache backed by `dir/local_models_cache.json`. An unreadable
    /// snapshot is discarded and the cache starts empty.
    pub fn persistent(dir: &Path, ttl: Duration) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("create cache dir {}", dir.display()))?;
        let file = dir.join(CACHE_FILE);
        let mut cache = Self {
            ttl,
            file: Some(file.clone()),
            entries: BTreeMap::new(),
        };
        match load_snapshot(&file) {
            Ok(Some(snapshot)) => cache.restore(snapshot),
            Ok(None) => {}
            Err(error) => {
                tracing::warn!("Discarding unreadable inventory cache {}: {error:?}", file.display());
            }
        }
        Ok(cache)
    }

    /// Records for `directory` when they were scanned within the TTL.
    #[must_use]
    pub fn fresh(&self, directory: &str) -> Option<&[LocalAssetRecord]> {
        self.fresh_at(directory, OffsetDateTime::now_utc())
    }

    fn fresh_at(&self, directory: &str, now: OffsetDateTime) -> Option<&[LocalAssetRecord]> {
        let entry = self.entries.get(directory)?;
        let age = now - entry.scanned_at;
        if age.is_negative() || age.unsigned_abs() >= self.ttl {
            return None;
        }
        Some(entry.records.as_slice())
    }

    /// Updates the in-memory entry; call [`ScanCache::persist`] to write the snapshot.
    pub fn store(&mut self, directory: &str, records: Vec<LocalAssetRecord>) {
        self.store_at(directory, records, OffsetDateTime::now_utc());
    }

    fn store_at(&mut self, directory: &str, records: Vec<LocalAssetRecord>, at: OffsetDateTime) {
        self.entries.insert(
            directory.to_string(),
            CachedDirectory {
                scanned_at: at,
                records,
            },
        );
    }

    /// Drops every cached directory and removes the snapshot file.
    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        if let Some(file) = &self.file {
            if file.exists() {
                fs::remove_file(file)
                    .with_context(|| format!("remove inventory cache {}", file.display()))?;
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn snapshot(&self) -> Option<CacheSnapshot> {
        // The oldest scan stamps the snapshot so a reload never extends staleness.
        let timestamp = self.entries.values().map(|entry| entry.scanned_at).min()?;
        let directories = self
            .entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.records.clone()))
            .collect();
        Some(CacheSnapshot {
            timestamp,
            directories,
        })
    }

    fn restore(&mut self, snapshot: CacheSnapshot) {
        for (name, records) in snapshot.directories {
            self.store_at(&name, records, snapshot.timestamp);
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, by: Duration) {
        for entry in self.entries.values_mut() {
            entry.scanned_at -= by;
        }
    }

    /// Writes the snapshot file, if this cache has one.
    pub fn persist(&self) -> Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let Some(snapshot) = self.snapshot() else {
            return Ok(());
        };
        let writer = File::create(file)
            .with_context(|| format!("create inventory cache {}", file.display()))?;
        serde_json::to_writer_pretty(writer, &snapshot).context("write inventory cache")?;
        Ok(())
    }
}

fn load_snapshot(file: &Path) -> Result<Option<CacheSnapshot>> {
    if !file.exists() {
        return Ok(None);
    }
    let reader = File::open(file).context("open inventory cache")?;
    let snapshot =
        serde_json::from_reader(BufReader::new(reader)).context("parse inventory cache")?;
    Ok(Some(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AssetCategory;

    fn record(name: &str) -> LocalAssetRecord {
        LocalAssetRecord {
            filename: name.into(),
            directory: "vae".into(),
            category: AssetCategory::Vae,
            absolute_path: PathBuf::from("/models/vae").join(name),
            relative_path: PathBuf::from(name),
            size_bytes: 10,
            modified: None,
            keywords: vec!["c".into()],
        }
    }

    #[test]
    fn entries_expire_after_ttl() {
        let mut cache = ScanCache::in_memory(Duration::from_secs(60));
        let scanned = OffsetDateTime::now_utc();
        cache.store_at("vae", vec![record("c.safetensors")], scanned);

        assert!(cache
            .fresh_at("vae", scanned + time::Duration::seconds(59))
            .is_some());
        assert!(cache
            .fresh_at("vae", scanned + time::Duration::seconds(60))
            .is_none());
        assert!(cache.fresh_at("loras", scanned).is_none());
    }

    #[test]
    fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut cache = ScanCache::persistent(dir.path(), Duration::from_secs(3600)).unwrap();
            cache.store("vae", vec![record("c.safetensors")]);
            cache.persist().unwrap();
        }
        let reopened = ScanCache::persistent(dir.path(), Duration::from_secs(3600)).unwrap();
        let records = reopened.fresh("vae").expect("cached directory");
        assert_eq!(records[0].filename, "c.safetensors");
    }

    #[test]
    fn corrupt_snapshot_starts_empty_and_clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CACHE_FILE), b"{not json").unwrap();
        let mut cache = ScanCache::persistent(dir.path(), Duration::from_secs(3600)).unwrap();
        assert!(cache.fresh("vae").is_none());

        cache.store("vae", vec![record("c.safetensors")]);
        assert!(!dir.path().join(CACHE_FILE).exists());
        cache.persist().unwrap();
        assert!(dir.path().join(CACHE_FILE).exists());
        cache.clear().unwrap();
        assert!(!dir.path().join(CACHE_FILE).exists());
        assert!(cache.fresh("vae").is_none());
    }
}
