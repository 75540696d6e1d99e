use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::models::AssetCategory;

/// Detection strategies, declared in merge precedence order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionSource {
    DirectParameter,
    PathScan,
    MarkdownLink,
}

/// A model file a workflow requires. Unique by case-insensitive filename.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AssetReference {
    pub filename: String,
    pub category: AssetCategory,
    #[serde(default)]
    pub detection_sources: BTreeSet<DetectionSource>,
    #[serde(default)]
    pub origin_node_ids: BTreeSet<String>,
}

impl AssetReference {
    #[must_use]
    pub fn new(filename: impl Into<String>, category: AssetCategory) -> Self {
        Self {
            filename: filename.into(),
            category,
            detection_sources: BTreeSet::new(),
            origin_node_ids: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn detected(
        filename: impl Into<String>,
        category: AssetCategory,
        source: DetectionSource,
        node_id: &str,
    ) -> Self {
        let mut reference = Self::new(filename, category);
        reference.detection_sources.insert(source);
        reference.origin_node_ids.insert(node_id.to_string());
        reference
    }

    /// Merge key.
    #[must_use]
    pub fn key(&self) -> String {
        self.filename.to_lowercase()
    }

    /// Folds another detection of the same file into this one. The category
    /// is only refined while still unknown.
    pub fn absorb(&mut self, other: AssetReference) {
        if !self.category.is_known() && other.category.is_known() {
            self.category = other.category;
        }
        self.detection_sources.extend(other.detection_sources);
        self.origin_node_ids.extend(other.origin_node_ids);
    }
}
