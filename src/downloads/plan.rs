use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::error::Result;
use crate::matching::{MatchReport, MatchResult, MatchStatus};
use crate::models::AssetCategory;

use super::task::DownloadRequest;

/// Directory used when a requirement's category is unknown.
pub const FALLBACK_DIRECTORY: &str = "misc";

/// One place a file can be fetched from, as reported by a source resolver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceCandidate {
    pub url: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// Looks up download addresses for a filename. Platform specifics stay behind
/// this seam.
pub trait SourceResolver: Send + Sync {
    fn resolve(&self, filename: &str, category: Option<AssetCategory>) -> Result<Vec<SourceCandidate>>;
}

/// Resolver backed by a fixed `filename -> candidates` table, matched
/// case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    sources: BTreeMap<String, Vec<SourceCandidate>>,
}

impl StaticResolver {
    pub fn new(sources: BTreeMap<String, Vec<SourceCandidate>>) -> Self {
        let sources = sources
            .into_iter()
            .map(|(name, candidates)| (name.to_lowercase(), candidates))
            .collect();
        Self { sources }
    }

    /// Reads a JSON object mapping filenames to candidate lists.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let sources: BTreeMap<String, Vec<SourceCandidate>> = serde_json::from_str(&text)?;
        Ok(Self::new(sources))
    }
}

impl SourceResolver for StaticResolver {
    fn resolve(&self, filename: &str, _category: Option<AssetCategory>) -> Result<Vec<SourceCandidate>> {
        Ok(self
            .sources
            .get(&filename.to_lowercase())
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadPlan {
    pub filename: String,
    pub category: AssetCategory,
    pub url: String,
    pub platform: String,
    pub target_path: PathBuf,
    pub size_hint: Option<u64>,
}

impl DownloadPlan {
    pub fn into_request(self) -> DownloadRequest {
        DownloadRequest::new(self.filename, self.url, self.target_path).with_size_hint(self.size_hint)
    }
}

/// Where a file of `category` lands under `models_root`.
pub fn target_path(models_root: &Path, category: AssetCategory, filename: &str) -> PathBuf {
    models_root
        .join(category.canonical_directory().unwrap_or(FALLBACK_DIRECTORY))
        .join(filename)
}

/// Builds a plan from the first candidate. Found results and results without
/// candidates yield nothing.
pub fn plan_for(result: &MatchResult, candidates: &[SourceCandidate], models_root: &Path) -> Option<DownloadPlan> {
    if result.status == MatchStatus::Found {
        return None;
    }
    let source = candidates.first()?;
    let filename = if result.required.filename.trim().is_empty() {
        filename_from_uri(&source.url)?
    } else {
        result.required.filename.clone()
    };
    let category = result.required.category;
    Some(DownloadPlan {
        target_path: target_path(models_root, category, &filename),
        filename,
        category,
        url: source.url.clone(),
        platform: source.platform.clone(),
        size_hint: source.size_bytes,
    })
}

/// Plans every missing (and optionally partial) requirement in `report`.
/// Resolver failures are logged and skipped.
pub fn plan_downloads(
    report: &MatchReport,
    resolver: &dyn SourceResolver,
    models_root: &Path,
    include_partial: bool,
) -> Vec<DownloadPlan> {
    let partial: &[MatchResult] = if include_partial { &report.partial } else { &[] };
    report
        .missing
        .iter()
        .chain(partial)
        .filter_map(|result| {
            let required = &result.required;
            let hint = required.category.is_known().then_some(required.category);
            let candidates = match resolver.resolve(&required.filename, hint) {
                Ok(candidates) => candidates,
                Err(error) => {
                    tracing::warn!("Source lookup for {} failed: {error}", required.filename);
                    return None;
                }
            };
            let plan = plan_for(result, &candidates, models_root);
            if plan.is_none() {
                tracing::info!("No download source for {}", required.filename);
            }
            plan
        })
        .collect()
}

/// Last path segment of a URL, without query or fragment.
pub fn filename_from_uri(uri: &str) -> Option<String> {
    let path = uri.split(['?', '#']).next()?;
    let clean = path.rsplit('/').next()?.trim();
    if clean.is_empty() {
        None
    } else {
        Some(clean.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Error;
    use crate::matching::MatchSummary;
    use crate::workflow::{AssetReference, DetectionSource};

    fn result(filename: &str, category: AssetCategory, status: MatchStatus) -> MatchResult {
        MatchResult {
            required: AssetReference::detected(filename, category, DetectionSource::DirectParameter, "1"),
            status,
            candidates: Vec::new(),
            best_candidate: None,
            score: 0.0,
        }
    }

    fn candidate(url: &str) -> SourceCandidate {
        SourceCandidate {
            url: url.to_string(),
            platform: "huggingface".to_string(),
            size_bytes: Some(1000),
        }
    }

    #[test]
    fn plans_target_the_category_directory() {
        let root = Path::new("/models");
        let missing = result("b.safetensors", AssetCategory::Lora, MatchStatus::Missing);
        let plan = plan_for(&missing, &[candidate("https://h/x/b.safetensors")], root).unwrap();
        assert_eq!(plan.target_path, PathBuf::from("/models/loras/b.safetensors"));
        assert_eq!(plan.size_hint, Some(1000));

        let unknown = result("mystery.bin", AssetCategory::Unknown, MatchStatus::Missing);
        let plan = plan_for(&unknown, &[candidate("https://h/mystery.bin")], root).unwrap();
        assert_eq!(plan.target_path, PathBuf::from("/models/misc/mystery.bin"));

        let request = plan.into_request();
        assert_eq!(request.size_hint, Some(1000));
        assert_eq!(request.filename, "mystery.bin");
    }

    #[test]
    fn found_results_and_empty_candidates_are_not_planned() {
        let root = Path::new("/models");
        let found = result("a.safetensors", AssetCategory::Checkpoint, MatchStatus::Found);
        assert!(plan_for(&found, &[candidate("https://h/a.safetensors")], root).is_none());
        let missing = result("a.safetensors", AssetCategory::Checkpoint, MatchStatus::Missing);
        assert!(plan_for(&missing, &[], root).is_none());
    }

    struct FailingResolver;

    impl SourceResolver for FailingResolver {
        fn resolve(&self, _: &str, _: Option<AssetCategory>) -> Result<Vec<SourceCandidate>> {
            Err(Error::Transport("offline".into()))
        }
    }

    #[test]
    fn report_planning_respects_partial_flag_and_resolver_failures() {
        let report = MatchReport {
            found: vec![],
            partial: vec![result("p.safetensors", AssetCategory::Vae, MatchStatus::Partial)],
            missing: vec![result("M.safetensors", AssetCategory::Lora, MatchStatus::Missing)],
            summary: MatchSummary::default(),
        };
        let mut table = BTreeMap::new();
        table.insert("m.safetensors".to_string(), vec![candidate("https://h/M.safetensors")]);
        table.insert("P.safetensors".to_string(), vec![candidate("https://h/p.safetensors")]);
        let resolver = StaticResolver::new(table);
        let root = Path::new("/models");

        let plans = plan_downloads(&report, &resolver, root, false);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].filename, "M.safetensors");

        let plans = plan_downloads(&report, &resolver, root, true);
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[1].target_path, PathBuf::from("/models/vae/p.safetensors"));

        assert!(plan_downloads(&report, &FailingResolver, root, true).is_empty());
    }

    #[test]
    fn static_resolver_reads_json_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sources.json");
        fs::write(
            &path,
            r#"{"a.safetensors": [{"url": "https://h/a.safetensors", "platform": "civitai", "sizeBytes": 5}]}"#,
        )
        .unwrap();
        let resolver = StaticResolver::from_file(&path).unwrap();
        let found = resolver.resolve("A.safetensors", None).unwrap();
        assert_eq!(found[0].platform, "civitai");
        assert_eq!(found[0].size_bytes, Some(5));

        fs::write(&path, "[").unwrap();
        assert!(matches!(
            StaticResolver::from_file(&path),
            Err(Error::MalformedDocument(_))
        ));
    }

    #[test]
    fn filenames_come_from_the_last_url_segment() {
        assert_eq!(
            filename_from_uri("https://h/x/model.safetensors?download=true#top").as_deref(),
            Some("model.safetensors")
        );
        assert_eq!(filename_from_uri("https://h/x/"), None);
    }
}
