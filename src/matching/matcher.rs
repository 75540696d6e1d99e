use std::sync::Arc;

use serde::Serialize;

use crate::models::{InventoryIndex, LocalAssetRecord, DEFAULT_SIMILARITY_THRESHOLD};
use crate::workflow::AssetReference;

const MAX_CANDIDATES: usize = 5;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MatchStatus {
    Found,
    Partial,
    Missing,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
    #[serde(flatten)]
    pub record: LocalAssetRecord,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub required: AssetReference,
    pub status: MatchStatus,
    pub candidates: Vec<MatchCandidate>,
    pub best_candidate: Option<LocalAssetRecord>,
    pub score: f64,
}

impl MatchResult {
    fn missing(required: AssetReference) -> Self {
        Self {
            required,
            status: MatchStatus::Missing,
            candidates: Vec::new(),
            best_candidate: None,
            score: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchSummary {
    pub total: usize,
    pub found: usize,
    pub partial: usize,
    pub missing: usize,
    /// `found / total`, zero for an empty request.
    pub success_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchReport {
    pub found: Vec<MatchResult>,
    pub partial: Vec<MatchResult>,
    pub missing: Vec<MatchResult>,
    pub summary: MatchSummary,
}

/// Classifies required assets against the local inventory.
#[derive(Clone)]
pub struct FuzzyMatcher {
    inventory: Arc<InventoryIndex>,
    threshold: f64,
}

impl FuzzyMatcher {
    pub fn new(inventory: Arc<InventoryIndex>, threshold: f64) -> Self {
        Self {
            inventory,
            threshold,
        }
    }

    pub fn with_default_threshold(inventory: Arc<InventoryIndex>) -> Self {
        Self::new(inventory, DEFAULT_SIMILARITY_THRESHOLD)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn inventory(&self) -> &Arc<InventoryIndex> {
        &self.inventory
    }

    /// Exact filename first (category-scoped, then library-wide), then
    /// keyword similarity within the category.
    pub fn match_one(&self, required: &AssetReference) -> MatchResult {
        let category = Some(required.category).filter(|category| category.is_known());

        let mut exact = self.inventory.find_exact(&required.filename, category);
        if exact.is_empty() && category.is_some() {
            exact = self.inventory.find_exact(&required.filename, None);
        }
        if let Some(best) = exact.first().cloned() {
            tracing::debug!("{} found at {}", required.filename, best.absolute_path.display());
            return MatchResult {
                required: required.clone(),
                status: MatchStatus::Found,
                candidates: exact
                    .into_iter()
                    .take(MAX_CANDIDATES)
                    .map(|record| MatchCandidate { record, score: 1.0 })
                    .collect(),
                best_candidate: Some(best),
                score: 1.0,
            };
        }

        let keywords = self.inventory.extractor().extract(&required.filename);
        let ranked = self
            .inventory
            .find_by_keywords(&keywords, category, self.threshold);
        let Some((best, score)) = ranked.first().cloned() else {
            tracing::debug!("{} missing", required.filename);
            return MatchResult::missing(required.clone());
        };

        tracing::debug!(
            "{} partially matches {} ({score:.2})",
            required.filename,
            best.filename
        );
        MatchResult {
            required: required.clone(),
            status: MatchStatus::Partial,
            candidates: ranked
                .into_iter()
                .take(MAX_CANDIDATES)
                .map(|(record, score)| MatchCandidate { record, score })
                .collect(),
            best_candidate: Some(best),
            score,
        }
    }

    pub fn match_all(&self, references: &[AssetReference]) -> MatchReport {
        let mut report = MatchReport::default();
        for reference in references {
            let result = self.match_one(reference);
            match result.status {
                MatchStatus::Found => report.found.push(result),
                MatchStatus::Partial => report.partial.push(result),
                MatchStatus::Missing => report.missing.push(result),
            }
        }
        let total = references.len();
        report.summary = MatchSummary {
            total,
            found: report.found.len(),
            partial: report.partial.len(),
            missing: report.missing.len(),
            success_rate: if total == 0 {
                0.0
            } else {
                report.found.len() as f64 / total as f64
            },
        };
        tracing::info!(
            "Matched {total} references: {} found, {} partial, {} missing",
            report.summary.found,
            report.summary.partial,
            report.summary.missing
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    use crate::models::{AssetCategory, KeywordExtractor, ScanCache};

    fn inventory_with(files: &[&str]) -> (tempfile::TempDir, Arc<InventoryIndex>) {
        let dir = tempfile::tempdir().unwrap();
        for file in files {
            let path = dir.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, b"weights").unwrap();
        }
        let index = InventoryIndex::new(
            vec![dir.path().to_path_buf()],
            KeywordExtractor::new(),
            ScanCache::in_memory(Duration::from_secs(60)),
        );
        (dir, Arc::new(index))
    }

    fn scenario_references() -> Vec<AssetReference> {
        vec![
            AssetReference::new("a.safetensors", AssetCategory::Checkpoint),
            AssetReference::new("b.safetensors", AssetCategory::Lora),
            AssetReference::new("c.safetensors", AssetCategory::Vae),
        ]
    }

    #[test]
    fn only_the_present_vae_is_found() {
        let (_dir, inventory) = inventory_with(&["vae/c.safetensors"]);
        let report = FuzzyMatcher::with_default_threshold(inventory).match_all(&scenario_references());
        assert_eq!(report.summary.found, 1);
        assert_eq!(report.summary.missing, 2);
        assert_eq!(report.found[0].required.filename, "c.safetensors");
        assert!((report.summary.success_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!(report.missing.iter().all(|m| m.candidates.is_empty()));
    }

    #[test]
    fn exact_match_ignores_case_and_category() {
        let (_dir, inventory) = inventory_with(&["checkpoints/Model_X.safetensors"]);
        let matcher = FuzzyMatcher::with_default_threshold(inventory);
        let result = matcher.match_one(&AssetReference::new("model_x.safetensors", AssetCategory::Lora));
        assert_eq!(result.status, MatchStatus::Found);
        assert_eq!(result.score, 1.0);
        let best = result.best_candidate.unwrap();
        assert!(best.filename.eq_ignore_ascii_case("model_x.safetensors"));
    }

    #[test]
    fn partial_matches_rank_and_cap_candidates() {
        let files: Vec<String> = (0..7)
            .map(|i| format!("checkpoints/dreamshaper_8_variant{i}x.safetensors"))
            .collect();
        let refs: Vec<&str> = files.iter().map(String::as_str).collect();
        let (_dir, inventory) = inventory_with(&refs);
        let result = FuzzyMatcher::with_default_threshold(inventory).match_one(&AssetReference::new(
            "dreamshaper_8.safetensors",
            AssetCategory::Checkpoint,
        ));
        assert_eq!(result.status, MatchStatus::Partial);
        assert_eq!(result.score, 1.0);
        assert_eq!(result.candidates.len(), 5);
        assert_eq!(
            result.best_candidate.unwrap().filename,
            "dreamshaper_8_variant0x.safetensors"
        );
    }

    #[test]
    fn empty_request_has_zero_success_rate() {
        let (_dir, inventory) = inventory_with(&[]);
        let report = FuzzyMatcher::new(inventory, 0.5).match_all(&[]);
        assert_eq!(report.summary, MatchSummary::default());
    }
}
