use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use walkdir::WalkDir;

use super::cache::ScanCache;
use super::category::{has_model_extension, AssetCategory};
use super::keywords::{match_keywords, KeywordExtractor, KeywordMatch};

/// Pseudo-directory holding model files placed directly in a root.
pub const ROOT_DIRECTORY: &str = ".";

/// Scan results keyed by storage directory name (`checkpoints`, `loras`, ...).
pub type InventoryScan = BTreeMap<String, Vec<LocalAssetRecord>>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalAssetRecord {
    pub filename: String,
    pub directory: String,
    pub category: AssetCategory,
    pub absolute_path: PathBuf,
    pub relative_path: PathBuf,
    pub size_bytes: u64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub modified: Option<OffsetDateTime>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl LocalAssetRecord {
    fn from_file(path: &Path, base: &Path, directory: &str, extractor: &KeywordExtractor) -> Option<Self> {
        let filename = path.file_name()?.to_str()?.to_string();
        let (size_bytes, modified) = match fs::metadata(path) {
            Ok(meta) => (meta.len(), meta.modified().ok().map(OffsetDateTime::from)),
            Err(error) => {
                tracing::debug!("stat {} failed: {error}", path.display());
                (0, None)
            }
        };
        let category = match AssetCategory::from_directory(directory) {
            AssetCategory::Unknown => AssetCategory::infer_from_filename(&filename),
            known => known,
        };
        Some(Self {
            keywords: extractor.extract(&filename),
            relative_path: path.strip_prefix(base).unwrap_or(path).to_path_buf(),
            absolute_path: path.to_path_buf(),
            directory: directory.to_string(),
            category,
            size_bytes,
            modified,
            filename,
        })
    }

    #[must_use]
    pub fn extension(&self) -> String {
        Path::new(&self.filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryStats {
    pub count: usize,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryStats {
    pub total_files: usize,
    pub total_bytes: u64,
    pub by_directory: BTreeMap<String, DirectoryStats>,
    pub by_extension: BTreeMap<String, usize>,
    #[serde(with = "time::serde::rfc3339")]
    pub scanned_at: OffsetDateTime,
}

/// Keyword-annotated catalog of model files under one or more storage roots.
///
/// Each root is expected to hold one subdirectory per storage directory
/// (`<root>/checkpoints`, `<root>/loras`, ...). Records for the same directory
/// name are merged across roots and cached together. Model files sitting
/// directly in a root are listed under [`ROOT_DIRECTORY`].
pub struct InventoryIndex {
    roots: Vec<PathBuf>,
    extractor: KeywordExtractor,
    cache: Mutex<ScanCache>,
}

impl InventoryIndex {
    pub fn new(roots: Vec<PathBuf>, extractor: KeywordExtractor, cache: ScanCache) -> Self {
        Self {
            roots,
            extractor,
            cache: Mutex::new(cache),
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn extractor(&self) -> &KeywordExtractor {
        &self.extractor
    }

    /// Every storage directory present under any root, sorted, plus
    /// [`ROOT_DIRECTORY`] when a root holds model files itself.
    pub fn directories(&self) -> Vec<String> {
        let mut names = Vec::new();
        for entries in self.roots.iter().filter_map(|root| fs::read_dir(root).ok()) {
            for entry in entries.flatten() {
                let path = entry.path();
                let Some(name) = entry.file_name().to_str().map(ToOwned::to_owned) else {
                    continue;
                };
                if path.is_dir() {
                    names.push(name);
                } else if path.is_file() && has_model_extension(&name) {
                    names.push(ROOT_DIRECTORY.to_string());
                }
            }
        }
        names.sort();
        names.dedup();
        names
    }

    /// Scans the named directories (all of them when `None`), serving
    /// directories from the cache while their entries are within the TTL.
    /// Fresh results are written to the cache snapshot once, after the walk.
    pub fn scan(&self, directories: Option<&[String]>, use_cache: bool) -> InventoryScan {
        let directories = match directories {
            Some(list) => list.to_vec(),
            None => self.directories(),
        };
        let mut scan = InventoryScan::new();
        let mut rescanned = false;
        for directory in directories {
            let (records, fresh) = self.scan_directory(&directory, use_cache);
            rescanned |= fresh;
            scan.insert(directory, records);
        }
        if rescanned {
            if let Err(error) = self.cache.lock().persist() {
                tracing::warn!("Failed to persist inventory cache: {error:?}");
            }
        }
        scan
    }

    /// Records for one directory, and whether they came from disk.
    fn scan_directory(&self, directory: &str, use_cache: bool) -> (Vec<LocalAssetRecord>, bool) {
        if use_cache {
            if let Some(records) = self.cache.lock().fresh(directory) {
                tracing::debug!("Inventory cache hit for {directory} ({} files)", records.len());
                return (records.to_vec(), false);
            }
        }

        let at_root = directory == ROOT_DIRECTORY;
        let mut records = Vec::new();
        for root in &self.roots {
            let base = if at_root { root.clone() } else { root.join(directory) };
            if !base.is_dir() {
                continue;
            }
            let walker = WalkDir::new(&base).follow_links(true).sort_by_file_name();
            let walker = if at_root { walker.max_depth(1) } else { walker };
            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(error) => {
                        tracing::debug!("Skipping unreadable entry under {}: {error}", base.display());
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let is_model = entry
                    .file_name()
                    .to_str()
                    .map(has_model_extension)
                    .unwrap_or(false);
                if !is_model {
                    continue;
                }
                if let Some(record) =
                    LocalAssetRecord::from_file(entry.path(), &base, directory, &self.extractor)
                {
                    records.push(record);
                }
            }
        }

        tracing::info!("Scanned {directory}: {} model files", records.len());
        self.cache.lock().store(directory, records.clone());
        (records, true)
    }

    fn scope(&self, category: Option<AssetCategory>) -> InventoryScan {
        match category.filter(|category| category.is_known()) {
            Some(category) => {
                let directories: Vec<String> =
                    category.directories().iter().map(|d| (*d).to_string()).collect();
                self.scan(Some(&directories), true)
            }
            None => self.scan(None, true),
        }
    }

    /// Case-insensitive filename lookup, scoped to the category's directories
    /// when the category is known.
    pub fn find_exact(&self, filename: &str, category: Option<AssetCategory>) -> Vec<LocalAssetRecord> {
        let wanted = filename.to_lowercase();
        self.scope(category)
            .into_values()
            .flatten()
            .filter(|record| record.filename.to_lowercase() == wanted)
            .collect()
    }

    /// Records whose keywords fully or partially match `keywords`, best first.
    ///
    /// Ties are broken by shorter filename, then lexicographically.
    pub fn find_by_keywords(
        &self,
        keywords: &[String],
        category: Option<AssetCategory>,
        threshold: f64,
    ) -> Vec<(LocalAssetRecord, f64)> {
        let mut matches: Vec<(LocalAssetRecord, f64)> = self
            .scope(category)
            .into_values()
            .flatten()
            .filter_map(|record| {
                match match_keywords(keywords, &record.keywords, threshold) {
                    (KeywordMatch::None, _) => None,
                    (_, score) => Some((record, score)),
                }
            })
            .collect();
        matches.sort_by(|(left, left_score), (right, right_score)| {
            right_score
                .partial_cmp(left_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| left.filename.len().cmp(&right.filename.len()))
                .then_with(|| left.filename.cmp(&right.filename))
        });
        matches
    }

    pub fn stats(&self) -> InventoryStats {
        let scan = self.scan(None, true);
        let mut stats = InventoryStats {
            total_files: 0,
            total_bytes: 0,
            by_directory: BTreeMap::new(),
            by_extension: BTreeMap::new(),
            scanned_at: OffsetDateTime::now_utc(),
        };
        for (directory, records) in scan {
            let entry = DirectoryStats {
                count: records.len(),
                size_bytes: records.iter().map(|record| record.size_bytes).sum(),
            };
            for record in &records {
                *stats.by_extension.entry(record.extension()).or_default() += 1;
            }
            stats.total_files += entry.count;
            stats.total_bytes += entry.size_bytes;
            stats.by_directory.insert(directory, entry);
        }
        stats
    }

    pub fn clear_cache(&self) -> Result<()> {
        self.cache.lock().clear()?;
        tracing::info!("Inventory cache cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn touch(root: &Path, relative: &str, bytes: usize) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![0u8; bytes]).unwrap();
    }

    fn library() -> (tempfile::TempDir, InventoryIndex) {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "checkpoints/dreamshaper_8.safetensors", 8);
        touch(dir.path(), "checkpoints/dreamshaper_8_inpainting.safetensors", 9);
        touch(dir.path(), "loras/style/Detail_Tweaker.safetensors", 4);
        touch(dir.path(), "vae/c.safetensors", 3);
        touch(dir.path(), "vae/readme.txt", 100);
        let index = InventoryIndex::new(
            vec![dir.path().to_path_buf()],
            KeywordExtractor::new(),
            ScanCache::in_memory(Duration::from_secs(3600)),
        );
        (dir, index)
    }

    #[test]
    fn scan_records_model_files_per_directory() {
        let (_dir, index) = library();
        let scan = index.scan(None, false);
        assert_eq!(
            scan.keys().cloned().collect::<Vec<_>>(),
            vec!["checkpoints", "loras", "vae"]
        );
        assert_eq!(scan["vae"].len(), 1);
        let lora = &scan["loras"][0];
        assert_eq!(lora.category, AssetCategory::Lora);
        assert_eq!(lora.relative_path, PathBuf::from("style/Detail_Tweaker.safetensors"));
        assert_eq!(lora.keywords, vec!["detail", "tweaker"]);
    }

    #[test]
    fn find_exact_ignores_case_and_respects_category() {
        let (_dir, index) = library();
        let hits = index.find_exact("DETAIL_tweaker.safetensors", None);
        assert_eq!(hits.len(), 1);
        assert!(index
            .find_exact("detail_tweaker.safetensors", Some(AssetCategory::Vae))
            .is_empty());
        assert_eq!(
            index
                .find_exact("c.safetensors", Some(AssetCategory::Unknown))
                .len(),
            1
        );
    }

    #[test]
    fn keyword_matches_rank_shorter_names_first() {
        let (_dir, index) = library();
        let keywords = vec!["dreamshaper".to_string(), "8".to_string()];
        let ranked = index.find_by_keywords(&keywords, Some(AssetCategory::Checkpoint), 0.7);
        let names: Vec<&str> = ranked.iter().map(|(r, _)| r.filename.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "dreamshaper_8.safetensors",
                "dreamshaper_8_inpainting.safetensors"
            ]
        );
        assert!(ranked.iter().all(|(_, score)| *score == 1.0));
    }

    #[test]
    fn cached_scan_hides_new_files_until_bypassed() {
        let (dir, index) = library();
        assert_eq!(index.scan(None, true)["vae"].len(), 1);
        touch(dir.path(), "vae/d.safetensors", 1);
        assert_eq!(index.scan(None, true)["vae"].len(), 1);
        assert_eq!(index.scan(None, false)["vae"].len(), 2);

        touch(dir.path(), "vae/e.safetensors", 1);
        index.clear_cache().unwrap();
        assert_eq!(index.scan(None, true)["vae"].len(), 3);
    }

    #[test]
    fn expired_cache_entries_pick_up_new_files() {
        let (dir, index) = library();
        assert_eq!(index.scan(None, true)["vae"].len(), 1);
        touch(dir.path(), "vae/d.safetensors", 1);
        assert_eq!(index.scan(None, true)["vae"].len(), 1);

        index.cache.lock().backdate(Duration::from_secs(3600));
        let rescanned = index.scan(None, true);
        let names: Vec<&str> = rescanned["vae"].iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, vec!["c.safetensors", "d.safetensors"]);
    }

    #[test]
    fn model_files_directly_in_a_root_are_indexed() {
        let (dir, index) = library();
        touch(dir.path(), "sd_xl_base_1.0.safetensors", 5);
        touch(dir.path(), "notes.txt", 5);

        let scan = index.scan(None, false);
        assert_eq!(
            scan.keys().cloned().collect::<Vec<_>>(),
            vec![".", "checkpoints", "loras", "vae"]
        );
        let names: Vec<&str> = scan["."].iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, vec!["sd_xl_base_1.0.safetensors"]);
        assert_eq!(scan["."][0].relative_path, PathBuf::from("sd_xl_base_1.0.safetensors"));
        assert_eq!(index.find_exact("SD_XL_BASE_1.0.safetensors", None).len(), 1);
    }

    #[test]
    fn a_scan_writes_one_snapshot_covering_every_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "loras/b.safetensors", 2);
        touch(dir.path(), "vae/c.safetensors", 3);
        let ttl = Duration::from_secs(3600);
        let index = InventoryIndex::new(
            vec![dir.path().to_path_buf()],
            KeywordExtractor::new(),
            ScanCache::persistent(cache_dir.path(), ttl).unwrap(),
        );
        index.scan(None, true);

        let reopened = ScanCache::persistent(cache_dir.path(), ttl).unwrap();
        let snapshot = reopened.snapshot().expect("persisted snapshot");
        assert_eq!(
            snapshot.directories.keys().cloned().collect::<Vec<_>>(),
            vec!["loras", "vae"]
        );
    }

    #[test]
    fn stats_totals_by_directory_and_extension() {
        let (_dir, index) = library();
        let stats = index.stats();
        assert_eq!(stats.total_files, 4);
        assert_eq!(stats.total_bytes, 24);
        assert_eq!(stats.by_directory["checkpoints"].count, 2);
        assert_eq!(stats.by_extension[".safetensors"], 4);
    }
}
