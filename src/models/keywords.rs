use std::collections::{BTreeSet, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.7;

const VERSION_VARIANTS: &[&str] = &[
    "fp16", "fp32", "fp8", "bf16", "int8", "q4", "q5", "q6", "q8", "pruned", "ema", "emaonly",
    "noema", "final", "latest", "v1", "v2", "v3", "fixed",
];

const PRESERVE_KEYWORDS: &[&str] = &[
    "sdxl", "sd15", "sd21", "sd3", "flux", "controlnet", "openpose", "xl", "turbo", "lightning",
];

/// Version, quantization and precision markers such as `v1.5`, `q4`, `fp8`.
static MARKER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(v\d+(\.\d+)*|q\d+|fp\d+|bf\d+|f\d+|int\d+)$").expect("valid marker regex")
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum KeywordMatch {
    Full,
    Partial,
    None,
}

#[derive(Debug, Clone)]
pub struct KeywordExtractor {
    variants: HashSet<String>,
    preserve: HashSet<String>,
}

impl KeywordExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self::with_filters(std::iter::empty::<String>(), std::iter::empty::<String>())
    }

    /// Extends the built-in filter tables with extra variant and preserve entries.
    pub fn with_filters<V, P>(variants: V, preserve: P) -> Self
    where
        V: IntoIterator,
        V::Item: AsRef<str>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        let mut extractor = Self {
            variants: VERSION_VARIANTS.iter().map(|v| (*v).to_string()).collect(),
            preserve: PRESERVE_KEYWORDS.iter().map(|p| (*p).to_string()).collect(),
        };
        extractor
            .variants
            .extend(variants.into_iter().map(|v| v.as_ref().to_ascii_lowercase()));
        extractor
            .preserve
            .extend(preserve.into_iter().map(|p| p.as_ref().to_ascii_lowercase()));
        extractor
    }

    /// Ordered, deduplicated lowercase tokens describing a model filename.
    ///
    /// The extension is stripped, the stem split on `-`, `_`, `.` and
    /// whitespace, and each segment further split at camelCase and digit
    /// boundaries. Marker segments are dropped whole (`fp16`, `v1.5` never
    /// fragment into `fp`/`16`) unless they are on the preserve list.
    #[must_use]
    pub fn extract(&self, filename: &str) -> Vec<String> {
        let stem = strip_extension(filename);
        let mut keywords: Vec<String> = Vec::new();
        let push = |token: String, keywords: &mut Vec<String>| {
            if !keywords.contains(&token) {
                keywords.push(token);
            }
        };

        for segment in split_version_aware(stem) {
            let lower = segment.to_ascii_lowercase();
            if self.preserve.contains(&lower) {
                push(lower, &mut keywords);
                continue;
            }
            if self.is_marker(&lower) {
                continue;
            }
            for token in split_camel_and_digits(segment) {
                let token = token.to_ascii_lowercase();
                if self.preserve.contains(&token) {
                    push(token, &mut keywords);
                } else if self.is_marker(&token) {
                    continue;
                } else if token.len() >= 2 || token.chars().all(|c| c.is_ascii_digit()) {
                    push(token, &mut keywords);
                }
            }
        }
        keywords
    }

    fn is_marker(&self, token: &str) -> bool {
        self.variants.contains(token) || MARKER_PATTERN.is_match(token)
    }
}

impl Default for KeywordExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Jaccard similarity `|A∩B| / |A∪B|`; zero when either side is empty.
#[must_use]
pub fn jaccard_similarity<S: AsRef<str>>(left: &[S], right: &[S]) -> f64 {
    let left: BTreeSet<&str> = left.iter().map(AsRef::as_ref).collect();
    let right: BTreeSet<&str> = right.iter().map(AsRef::as_ref).collect();
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let intersection = left.intersection(&right).count();
    let union = left.union(&right).count();
    intersection as f64 / union as f64
}

/// Classifies a candidate against the required keywords.
///
/// A full match (every required keyword present) scores 1.0; otherwise the
/// Jaccard similarity is reported and counts as partial at or above
/// `threshold`. An empty requirement never matches.
#[must_use]
pub fn match_keywords<S: AsRef<str>>(
    required: &[S],
    candidate: &[S],
    threshold: f64,
) -> (KeywordMatch, f64) {
    if required.is_empty() {
        return (KeywordMatch::None, 0.0);
    }
    let candidate_set: HashSet<&str> = candidate.iter().map(AsRef::as_ref).collect();
    if required
        .iter()
        .all(|keyword| candidate_set.contains(keyword.as_ref()))
    {
        return (KeywordMatch::Full, 1.0);
    }
    let similarity = jaccard_similarity(required, candidate);
    if similarity >= threshold {
        (KeywordMatch::Partial, similarity)
    } else {
        (KeywordMatch::None, similarity)
    }
}

fn strip_extension(filename: &str) -> &str {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);
    match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && is_extension_like(ext) => stem,
        _ => base,
    }
}

fn is_extension_like(ext: &str) -> bool {
    !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Splits on separators, keeping dotted version markers like `v1.5` intact.
fn split_version_aware(stem: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    for part in stem.split(|c: char| c == '-' || c == '_' || c.is_whitespace()) {
        if part.is_empty() {
            continue;
        }
        if MARKER_PATTERN.is_match(&part.to_ascii_lowercase()) {
            segments.push(part);
            continue;
        }
        segments.extend(part.split('.').filter(|piece| !piece.is_empty()));
    }
    segments
}

/// Splits `epicRealismXL10` into `epic`, `Realism`, `XL`, `10`.
fn split_camel_and_digits(segment: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = segment.char_indices().collect();
    let mut tokens = Vec::new();
    let mut start = 0;
    for window in 1..chars.len() {
        let (index, current) = chars[window];
        let (_, previous) = chars[window - 1];
        let next = chars.get(window + 1).map(|(_, c)| *c);
        let boundary = (previous.is_ascii_digit() != current.is_ascii_digit())
            || (previous.is_lowercase() && current.is_uppercase())
            || (previous.is_uppercase()
                && current.is_uppercase()
                && next.map_or(false, char::is_lowercase));
        if boundary {
            tokens.push(&segment[start..index]);
            start = index;
        }
    }
    if start < segment.len() {
        tokens.push(&segment[start..]);
    }
    tokens
        .into_iter()
        .filter(|token| token.chars().any(char::is_alphanumeric))
        .collect()
}
