mod matcher;
mod report;

pub use matcher::{FuzzyMatcher, MatchCandidate, MatchReport, MatchResult, MatchStatus, MatchSummary};
pub use report::{export_missing, render_report, LocalAlternative, MissingAsset, MissingExport};
