use std::collections::{BTreeMap, HashMap};

use crate::models::AssetCategory;

const LOADER_TYPES: &[(&str, AssetCategory)] = &[
    ("CheckpointLoaderSimple", AssetCategory::Checkpoint),
    ("CheckpointLoader", AssetCategory::Checkpoint),
    ("CheckpointLoader|pysssss", AssetCategory::Checkpoint),
    ("ImageOnlyCheckpointLoader", AssetCategory::Checkpoint),
    ("unCLIPCheckpointLoader", AssetCategory::Checkpoint),
    ("LoraLoader", AssetCategory::Lora),
    ("LoraLoaderModelOnly", AssetCategory::Lora),
    ("LoraLoader|pysssss", AssetCategory::Lora),
    ("Power Lora Loader (rgthree)", AssetCategory::Lora),
    ("VAELoader", AssetCategory::Vae),
    ("ControlNetLoader", AssetCategory::ControlNet),
    ("DiffControlNetLoader", AssetCategory::ControlNet),
    ("CLIPLoader", AssetCategory::Clip),
    ("DualCLIPLoader", AssetCategory::Clip),
    ("TripleCLIPLoader", AssetCategory::Clip),
    ("CLIPLoaderGGUF", AssetCategory::Clip),
    ("ClipLoaderGGUF", AssetCategory::Clip),
    ("DualCLIPLoaderGGUF", AssetCategory::Clip),
    ("CLIPVisionLoader", AssetCategory::ClipVision),
    ("UNETLoader", AssetCategory::Unet),
    ("UnetLoaderGGUF", AssetCategory::Unet),
    ("LoaderGGUF", AssetCategory::Unet),
    ("UpscaleModelLoader", AssetCategory::Upscale),
    ("IPAdapterModelLoader", AssetCategory::IpAdapter),
    ("AnimateDiffModuleLoader", AssetCategory::AnimateDiff),
    ("ADE_LoadAnimateDiffModel", AssetCategory::AnimateDiff),
    ("InstantIDModelLoader", AssetCategory::InstantId),
    ("StyleModelLoader", AssetCategory::StyleModel),
];

/// Input keys that name a model file in API prompts.
const LEGACY_INPUT_KEYS: &[(&str, AssetCategory)] = &[
    ("ckpt_name", AssetCategory::Checkpoint),
    ("lora_name", AssetCategory::Lora),
    ("vae_name", AssetCategory::Vae),
    ("control_net_name", AssetCategory::ControlNet),
    ("clip_name", AssetCategory::Clip),
    ("clip_name1", AssetCategory::Clip),
    ("clip_name2", AssetCategory::Clip),
    ("unet_name", AssetCategory::Unet),
    ("model_name", AssetCategory::Unknown),
];

const DOCUMENTATION_TYPES: &[&str] = &["Note", "MarkdownNote", "PrimitiveNode"];

/// Node types that load model files, and the category each one loads.
#[derive(Debug, Clone)]
pub struct LoaderVocabulary {
    loaders: HashMap<String, AssetCategory>,
}

impl LoaderVocabulary {
    #[must_use]
    pub fn new() -> Self {
        Self {
            loaders: LOADER_TYPES
                .iter()
                .map(|(name, category)| ((*name).to_string(), *category))
                .collect(),
        }
    }

    /// Built-in table extended (or overridden) by community loader names.
    #[must_use]
    pub fn with_custom(custom: &BTreeMap<String, AssetCategory>) -> Self {
        let mut vocabulary = Self::new();
        for (name, category) in custom {
            vocabulary.loaders.insert(name.clone(), *category);
        }
        vocabulary
    }

    #[must_use]
    pub fn loader_category(&self, node_type: &str) -> Option<AssetCategory> {
        self.loaders.get(node_type).copied()
    }

    #[must_use]
    pub fn is_documentation(node_type: &str) -> bool {
        DOCUMENTATION_TYPES.contains(&node_type)
    }

    #[must_use]
    pub fn input_key_category(key: &str) -> Option<AssetCategory> {
        LEGACY_INPUT_KEYS
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, category)| *category)
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}

impl Default for LoaderVocabulary {
    fn default() -> Self {
        Self::new()
    }
}
