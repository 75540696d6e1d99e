use std::fmt::Write as _;
use std::path::PathBuf;

use serde::Serialize;

use crate::models::{AssetCategory, KeywordExtractor};

use super::matcher::{MatchReport, MatchResult};

const RULE_WIDTH: usize = 60;
const ALTERNATIVES: usize = 3;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalAlternative {
    pub filename: String,
    pub path: PathBuf,
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MissingAsset {
    pub filename: String,
    pub category: AssetCategory,
    pub expected_directory: Option<String>,
    pub keywords: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub local_alternatives: Vec<LocalAlternative>,
}

/// Missing and partial requirements, shaped for handing to a downloader.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MissingExport {
    pub workflow: Option<String>,
    pub missing: Vec<MissingAsset>,
    pub partial: Vec<MissingAsset>,
}

pub fn export_missing(
    report: &MatchReport,
    workflow: Option<&str>,
    extractor: &KeywordExtractor,
) -> MissingExport {
    let describe = |result: &MatchResult, with_alternatives: bool| MissingAsset {
        filename: result.required.filename.clone(),
        category: result.required.category,
        expected_directory: expected_directory(result),
        keywords: extractor.extract(&result.required.filename),
        local_alternatives: if with_alternatives {
            result
                .candidates
                .iter()
                .take(ALTERNATIVES)
                .map(|candidate| LocalAlternative {
                    filename: candidate.record.filename.clone(),
                    path: candidate.record.absolute_path.clone(),
                    similarity: candidate.score,
                })
                .collect()
        } else {
            Vec::new()
        },
    };
    MissingExport {
        workflow: workflow.map(ToOwned::to_owned),
        missing: report.missing.iter().map(|r| describe(r, false)).collect(),
        partial: report.partial.iter().map(|r| describe(r, true)).collect(),
    }
}

/// Plain-text summary of a match run.
pub fn render_report(report: &MatchReport, workflow: Option<&str>) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let thin = "-".repeat(RULE_WIDTH * 2 / 3);
    let mut out = String::new();

    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "Model Dependency Report");
    let _ = writeln!(out, "{rule}");
    if let Some(workflow) = workflow {
        let _ = writeln!(out, "Workflow: {workflow}");
    }
    let summary = &report.summary;
    let _ = writeln!(out, "Total models: {}", summary.total);
    let _ = writeln!(out);
    let _ = writeln!(out, "Summary:");
    let _ = writeln!(out, "  Found: {}", summary.found);
    let _ = writeln!(out, "  Partial matches: {}", summary.partial);
    let _ = writeln!(out, "  Missing: {}", summary.missing);
    let _ = writeln!(out, "  Success rate: {:.1}%", summary.success_rate * 100.0);
    let _ = writeln!(out);

    if !report.found.is_empty() {
        let _ = writeln!(out, "FOUND:");
        let _ = writeln!(out, "{thin}");
        for result in &report.found {
            let _ = writeln!(out, "  {}", result.required.filename);
            let _ = writeln!(out, "    Type: {}", result.required.category);
            if let Some(local) = &result.best_candidate {
                let _ = writeln!(out, "    Location: {}", local.absolute_path.display());
                let _ = writeln!(out, "    Size: {}", format_size(local.size_bytes));
            }
            let _ = writeln!(out);
        }
    }

    if !report.partial.is_empty() {
        let _ = writeln!(out, "PARTIAL MATCHES (verify manually):");
        let _ = writeln!(out, "{thin}");
        for result in &report.partial {
            let _ = writeln!(out, "  {}", result.required.filename);
            let _ = writeln!(out, "    Type: {}", result.required.category);
            let _ = writeln!(out, "    Possible matches:");
            for (rank, candidate) in result.candidates.iter().take(ALTERNATIVES).enumerate() {
                let _ = writeln!(
                    out,
                    "      {}. {} (score: {:.2})",
                    rank + 1,
                    candidate.record.filename,
                    candidate.score
                );
            }
            let _ = writeln!(out);
        }
    }

    if !report.missing.is_empty() {
        let _ = writeln!(out, "MISSING:");
        let _ = writeln!(out, "{thin}");
        for result in &report.missing {
            let _ = writeln!(out, "  {}", result.required.filename);
            let _ = writeln!(out, "    Type: {}", result.required.category);
            let location = expected_directory(result).unwrap_or_else(|| "unknown".into());
            let _ = writeln!(out, "    Expected location: {location}/");
            let _ = writeln!(out);
        }
    }

    let _ = writeln!(out, "{rule}");
    out
}

fn expected_directory(result: &MatchResult) -> Option<String> {
    result
        .required
        .category
        .canonical_directory()
        .map(ToOwned::to_owned)
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}
