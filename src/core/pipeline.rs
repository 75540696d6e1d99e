use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::core::error::Result;
use crate::matching::{export_missing, render_report, FuzzyMatcher, MatchReport, MissingExport};
use crate::models::InventoryIndex;
use crate::workflow::{Extractor, WorkflowAnalysis};

/// Extraction and matching results for one workflow.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub analysis: Option<WorkflowAnalysis>,
    pub report: MatchReport,
}

impl Resolution {
    pub fn workflow_name(&self) -> Option<String> {
        self.analysis
            .as_ref()
            .and_then(|analysis| analysis.workflow_file.file_name())
            .map(|name| name.to_string_lossy().into_owned())
    }
}

/// Workflow document in, classified requirements out.
pub struct ResolutionPipeline {
    extractor: Extractor,
    matcher: FuzzyMatcher,
}

impl ResolutionPipeline {
    pub fn new(extractor: Extractor, matcher: FuzzyMatcher) -> Self {
        Self { extractor, matcher }
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    pub fn inventory(&self) -> &Arc<InventoryIndex> {
        self.matcher.inventory()
    }

    pub fn analyze(&self, text: &str) -> Result<Resolution> {
        let references = self.extractor.extract(text)?;
        Ok(Resolution {
            analysis: None,
            report: self.matcher.match_all(&references),
        })
    }

    pub fn analyze_file(&self, path: &Path) -> Result<Resolution> {
        let analysis = self.extractor.extract_file(path)?;
        let report = self.matcher.match_all(&analysis.references);
        Ok(Resolution {
            analysis: Some(analysis),
            report,
        })
    }

    pub fn analyze_directory(&self, dir: &Path) -> Vec<(PathBuf, Result<Resolution>)> {
        self.extractor
            .analyze_directory(dir)
            .into_iter()
            .map(|(path, analysis)| {
                let resolution = analysis.map(|analysis| Resolution {
                    report: self.matcher.match_all(&analysis.references),
                    analysis: Some(analysis),
                });
                (path, resolution)
            })
            .collect()
    }

    pub fn render(&self, resolution: &Resolution) -> String {
        render_report(&resolution.report, resolution.workflow_name().as_deref())
    }

    pub fn export(&self, resolution: &Resolution) -> MissingExport {
        export_missing(
            &resolution.report,
            resolution.workflow_name().as_deref(),
            self.inventory().extractor(),
        )
    }
}
