use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::models::{has_model_extension, AssetCategory, MODEL_EXTENSIONS};

use super::document::{WorkflowDocument, WorkflowNode};
use super::reference::{AssetReference, DetectionSource};
use super::vocabulary::LoaderVocabulary;

/// `[label](target)` links inside string parameters.
static MARKDOWN_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[^\]]*\]\(\s*([^)\s]+)\s*\)").expect("valid link regex"));

/// A model filename embedded in a longer path or URL.
static EMBEDDED_FILE: Lazy<Regex> = Lazy::new(|| {
    let mut extensions: Vec<String> = MODEL_EXTENSIONS
        .iter()
        .map(|ext| regex::escape(ext.trim_start_matches('.')))
        .collect();
    // `pth` must be tried before `pt`.
    extensions.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    let pattern = format!(
        r#"(?i)([^/\\\s"'()\[\]<>|?#]+\.(?:{}))(?:$|[\s"'()\[\]<>|?#,;])"#,
        extensions.join("|")
    );
    Regex::new(&pattern).expect("valid embedded file regex")
});

/// One way of finding model references in a parsed document.
pub trait DetectionStrategy: Send + Sync {
    fn source(&self) -> DetectionSource;

    fn detect(&self, document: &WorkflowDocument, vocabulary: &LoaderVocabulary)
        -> Vec<AssetReference>;
}

/// Scans loader parameters (recursing into nested maps) for model filenames.
pub struct DirectParameterScan;

/// Picks basenames out of path- or URL-shaped strings.
pub struct PathScan;

/// Only markdown link targets are considered; surrounding prose is ignored.
pub struct MarkdownLinkScan;

#[must_use]
pub fn default_strategies() -> Vec<Box<dyn DetectionStrategy>> {
    vec![
        Box::new(DirectParameterScan),
        Box::new(PathScan),
        Box::new(MarkdownLinkScan),
    ]
}

impl DetectionStrategy for DirectParameterScan {
    fn source(&self) -> DetectionSource {
        DetectionSource::DirectParameter
    }

    fn detect(
        &self,
        document: &WorkflowDocument,
        vocabulary: &LoaderVocabulary,
    ) -> Vec<AssetReference> {
        let mut found = Vec::new();
        for_each_loader_string(document, vocabulary, |node, category, text| {
            let text = text.trim();
            if !has_model_extension(text) || is_prose(text) {
                return;
            }
            let filename = basename(text);
            if !is_usable_filename(filename) {
                return;
            }
            let category = category.unwrap_or_else(|| AssetCategory::infer_from_filename(filename));
            found.push(AssetReference::detected(
                filename,
                category,
                DetectionSource::DirectParameter,
                &node.id,
            ));
        });
        found
    }
}

impl DetectionStrategy for PathScan {
    fn source(&self) -> DetectionSource {
        DetectionSource::PathScan
    }

    fn detect(
        &self,
        document: &WorkflowDocument,
        vocabulary: &LoaderVocabulary,
    ) -> Vec<AssetReference> {
        let mut found = Vec::new();
        for_each_loader_string(document, vocabulary, |node, category, text| {
            let text = text.trim();
            if !text.contains(['/', '\\']) || text.contains(char::is_whitespace) || is_prose(text) {
                return;
            }
            for capture in EMBEDDED_FILE.captures_iter(text) {
                let Some(matched) = capture.get(1) else {
                    continue;
                };
                let anchored = matched.start() == 0
                    || matches!(text.as_bytes()[matched.start() - 1], b'/' | b'\\');
                let filename = matched.as_str();
                if !anchored || !is_usable_filename(filename) {
                    continue;
                }
                let category = category
                    .unwrap_or_else(|| AssetCategory::infer_from_path(&text[..matched.end()]));
                found.push(AssetReference::detected(
                    filename,
                    category,
                    DetectionSource::PathScan,
                    &node.id,
                ));
            }
        });
        found
    }
}

impl DetectionStrategy for MarkdownLinkScan {
    fn source(&self) -> DetectionSource {
        DetectionSource::MarkdownLink
    }

    fn detect(
        &self,
        document: &WorkflowDocument,
        vocabulary: &LoaderVocabulary,
    ) -> Vec<AssetReference> {
        let mut found = Vec::new();
        for_each_loader_string(document, vocabulary, |node, category, text| {
            for capture in MARKDOWN_LINK.captures_iter(text) {
                let Some(target) = capture.get(1) else {
                    continue;
                };
                let target = strip_query(target.as_str());
                let filename = basename(target);
                if !has_model_extension(filename) || !is_usable_filename(filename) {
                    continue;
                }
                let category = category.unwrap_or_else(|| AssetCategory::infer_from_path(target));
                found.push(AssetReference::detected(
                    filename,
                    category,
                    DetectionSource::MarkdownLink,
                    &node.id,
                ));
            }
        });
        found
    }
}

/// Category a loader node assigns to its files, `None` when the node is not a
/// loader at all. `Some(Unknown)` loaders leave the category to per-value
/// inference.
fn loader_category(node: &WorkflowNode, vocabulary: &LoaderVocabulary) -> Option<AssetCategory> {
    if LoaderVocabulary::is_documentation(&node.node_type) {
        return None;
    }
    if let Some(category) = vocabulary.loader_category(&node.node_type) {
        return Some(category);
    }
    node.parameters
        .iter()
        .filter_map(|parameter| parameter.key.as_deref())
        .any(|key| LoaderVocabulary::input_key_category(key).is_some())
        .then_some(AssetCategory::Unknown)
}

/// Calls `visit` with every string found in loader parameters, along with the
/// category implied by the node type or input key (`None` when neither
/// decides it).
fn for_each_loader_string<F>(document: &WorkflowDocument, vocabulary: &LoaderVocabulary, mut visit: F)
where
    F: FnMut(&WorkflowNode, Option<AssetCategory>, &str),
{
    for node in &document.nodes {
        let Some(node_category) = loader_category(node, vocabulary) else {
            continue;
        };
        for parameter in &node.parameters {
            let category = if node_category.is_known() {
                Some(node_category)
            } else {
                parameter
                    .key
                    .as_deref()
                    .and_then(LoaderVocabulary::input_key_category)
                    .filter(|category| category.is_known())
            };
            walk_strings(&parameter.value, &mut |text| visit(node, category, text));
        }
    }
}

fn walk_strings(value: &Value, visit: &mut dyn FnMut(&str)) {
    match value {
        Value::String(text) => visit(text),
        Value::Array(items) => items.iter().for_each(|item| walk_strings(item, visit)),
        Value::Object(map) => map.values().for_each(|item| walk_strings(item, visit)),
        _ => {}
    }
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path).trim()
}

fn strip_query(target: &str) -> &str {
    target.split(['?', '#']).next().unwrap_or(target)
}

/// Free text rather than a filename or path. Only link targets are taken from
/// such values.
fn is_prose(text: &str) -> bool {
    text.contains(['[', ']', '<', '>', '\n'])
        || MARKDOWN_LINK.is_match(text)
        || (text.contains("://") && text.contains(char::is_whitespace))
}

fn is_usable_filename(filename: &str) -> bool {
    !filename.is_empty() && !filename.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(json: &str) -> WorkflowDocument {
        WorkflowDocument::parse(json).unwrap()
    }

    fn names(references: &[AssetReference]) -> Vec<&str> {
        references.iter().map(|r| r.filename.as_str()).collect()
    }

    #[test]
    fn direct_scan_recurses_into_nested_widgets() {
        let doc = document(
            r#"{"nodes":[{"id":7,"type":"Power Lora Loader (rgthree)","widgets_values":[
                {}, {"on":true,"lora":"SDXL/detail.safetensors","strength":1}, "", null]}]}"#,
        );
        let found = DirectParameterScan.detect(&doc, &LoaderVocabulary::new());
        assert_eq!(names(&found), vec!["detail.safetensors"]);
        assert_eq!(found[0].category, AssetCategory::Lora);
        assert!(found[0].origin_node_ids.contains("7"));
    }

    #[test]
    fn path_scan_extracts_basenames_from_urls() {
        let doc = document(
            r#"{"nodes":[{"id":1,"type":"UpscaleModelLoader","widgets_values":[
                "https://host/models/4x-UltraSharp.pth?download=true"]}]}"#,
        );
        let found = PathScan.detect(&doc, &LoaderVocabulary::new());
        assert_eq!(names(&found), vec!["4x-UltraSharp.pth"]);
        assert_eq!(found[0].category, AssetCategory::Upscale);
    }

    #[test]
    fn markdown_scan_reads_link_targets_only() {
        let doc = document(
            r#"{"nodes":[
                {"id":1,"type":"Note","widgets_values":["see [x](https://h/a.safetensors)"]},
                {"id":2,"type":"CheckpointLoaderSimple","widgets_values":[
                    "get [the model](https://h/files/b.ckpt) not c.safetensors"]}]}"#,
        );
        let found = MarkdownLinkScan.detect(&doc, &LoaderVocabulary::new());
        assert_eq!(names(&found), vec!["b.ckpt"]);
    }

    #[test]
    fn prose_in_loader_values_only_yields_link_targets() {
        let doc = document(
            r#"{"nodes":[{"id":2,"type":"CheckpointLoaderSimple","widgets_values":[
                "get [the model](https://h/files/b.ckpt) not c.safetensors"]}]}"#,
        );
        let vocabulary = LoaderVocabulary::new();
        assert!(DirectParameterScan.detect(&doc, &vocabulary).is_empty());
        assert!(PathScan.detect(&doc, &vocabulary).is_empty());
        assert_eq!(names(&MarkdownLinkScan.detect(&doc, &vocabulary)), vec!["b.ckpt"]);
    }

    #[test]
    fn plain_filenames_with_spaces_still_count() {
        let doc = document(
            r#"{"nodes":[{"id":1,"type":"LoraLoader","widgets_values":[
                "SDXL styles/my style (v2).safetensors", "models\\loras\\x.pt"]}]}"#,
        );
        let vocabulary = LoaderVocabulary::new();
        assert_eq!(
            names(&DirectParameterScan.detect(&doc, &vocabulary)),
            vec!["my style (v2).safetensors", "x.pt"]
        );
        assert_eq!(names(&PathScan.detect(&doc, &vocabulary)), vec!["x.pt"]);
    }

    #[test]
    fn legacy_input_keys_mark_unknown_nodes_as_loaders() {
        let doc = document(
            r#"{"5":{"class_type":"SomeCustomLoader","inputs":{"vae_name":"x.safetensors","seed":3}},
               "6":{"class_type":"KSampler","inputs":{"model":["5",0]}}}"#,
        );
        let found = DirectParameterScan.detect(&doc, &LoaderVocabulary::new());
        assert_eq!(names(&found), vec!["x.safetensors"]);
        assert_eq!(found[0].category, AssetCategory::Vae);
    }

    #[test]
    fn unknown_loader_falls_back_to_filename_hints() {
        let doc = document(
            r#"{"1":{"class_type":"AnyLoader","inputs":{"model_name":"control_canny.pth"}}}"#,
        );
        let found = DirectParameterScan.detect(&doc, &LoaderVocabulary::new());
        assert_eq!(found[0].category, AssetCategory::ControlNet);
    }
}
