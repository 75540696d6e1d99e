use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::core::error::Result;

use super::document::{DocumentShape, WorkflowDocument};
use super::reference::{AssetReference, DetectionSource};
use super::strategies::{default_strategies, DetectionStrategy};
use super::vocabulary::LoaderVocabulary;

/// Extraction outcome for a single workflow file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowAnalysis {
    pub workflow_file: PathBuf,
    pub shape: DocumentShape,
    pub total_nodes: usize,
    pub references: Vec<AssetReference>,
    pub detection_stats: BTreeMap<DetectionSource, usize>,
}

/// Runs every detection strategy over a document and merges their findings.
pub struct Extractor {
    vocabulary: LoaderVocabulary,
    strategies: Vec<Box<dyn DetectionStrategy>>,
}

impl Extractor {
    #[must_use]
    pub fn new(vocabulary: LoaderVocabulary) -> Self {
        Self::with_strategies(vocabulary, default_strategies())
    }

    /// Strategies are ordered by precedence; the order given is re-sorted by
    /// each strategy's source so merging stays deterministic.
    #[must_use]
    pub fn with_strategies(
        vocabulary: LoaderVocabulary,
        mut strategies: Vec<Box<dyn DetectionStrategy>>,
    ) -> Self {
        strategies.sort_by_key(|strategy| strategy.source());
        Self {
            vocabulary,
            strategies,
        }
    }

    pub fn vocabulary(&self) -> &LoaderVocabulary {
        &self.vocabulary
    }

    /// Parses `text` and extracts its deduplicated model references.
    pub fn extract(&self, text: &str) -> Result<Vec<AssetReference>> {
        let document = WorkflowDocument::parse(text)?;
        Ok(self.extract_document(&document))
    }

    pub fn extract_document(&self, document: &WorkflowDocument) -> Vec<AssetReference> {
        self.run(document).0
    }

    fn run(&self, document: &WorkflowDocument) -> (Vec<AssetReference>, BTreeMap<DetectionSource, usize>) {
        let mut stats = BTreeMap::new();
        let mut merged: Vec<AssetReference> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for strategy in &self.strategies {
            let detections = strategy.detect(document, &self.vocabulary);
            stats.insert(strategy.source(), detections.len());
            for detection in detections {
                match positions.get(&detection.key()) {
                    Some(&index) => merged[index].absorb(detection),
                    None => {
                        positions.insert(detection.key(), merged.len());
                        merged.push(detection);
                    }
                }
            }
        }

        tracing::debug!(
            "Extracted {} references from {} nodes ({:?})",
            merged.len(),
            document.nodes.len(),
            stats
        );
        (merged, stats)
    }

    pub fn extract_file(&self, path: &Path) -> Result<WorkflowAnalysis> {
        let text = fs::read_to_string(path)?;
        let document = WorkflowDocument::parse(&text)?;
        let (references, detection_stats) = self.run(&document);
        tracing::info!(
            "Analyzed {}: {} nodes, {} model references",
            path.display(),
            document.nodes.len(),
            references.len()
        );
        Ok(WorkflowAnalysis {
            workflow_file: path.to_path_buf(),
            shape: document.shape,
            total_nodes: document.nodes.len(),
            references,
            detection_stats,
        })
    }

    /// Analyzes every `*.json` file under `dir`. A failing file does not stop
    /// the batch; its error is returned in its slot.
    pub fn analyze_directory(&self, dir: &Path) -> Vec<(PathBuf, Result<WorkflowAnalysis>)> {
        let mut results = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    tracing::warn!("Skipping unreadable workflow entry: {error}");
                    continue;
                }
            };
            let path = entry.path();
            let is_json = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("json"))
                .unwrap_or(false);
            if !entry.file_type().is_file() || !is_json {
                continue;
            }
            let outcome = self.extract_file(path);
            if let Err(error) = &outcome {
                tracing::warn!("Failed to analyze {}: {error}", path.display());
            }
            results.push((path.to_path_buf(), outcome));
        }
        results
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(LoaderVocabulary::new())
    }
}
