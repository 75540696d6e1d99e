use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum AssetCategory {
    Checkpoint,
    Lora,
    Vae,
    ControlNet,
    Clip,
    ClipVision,
    Unet,
    Upscale,
    Embedding,
    IpAdapter,
    AnimateDiff,
    InstantId,
    StyleModel,
    Unknown,
}

/// File extensions recognized as model weights.
pub const MODEL_EXTENSIONS: &[&str] = &[
    ".safetensors",
    ".ckpt",
    ".pt",
    ".pth",
    ".bin",
    ".gguf",
    ".onnx",
    ".pb",
    ".h5",
    ".pkl",
    ".model",
    ".sft",
];

#[must_use]
pub fn has_model_extension(name: &str) -> bool {
    let lower = name.trim().to_ascii_lowercase();
    MODEL_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Filename fragments that hint at a category, checked in this order.
const FILENAME_HINTS: &[(AssetCategory, &[&str])] = &[
    (AssetCategory::ControlNet, &["controlnet", "control_", "cnet"]),
    (AssetCategory::Lora, &["lora", "locon", "lycoris"]),
    (AssetCategory::Vae, &["vae"]),
    (AssetCategory::IpAdapter, &["ipadapter", "ip-adapter", "ip_adapter"]),
    (AssetCategory::AnimateDiff, &["animatediff", "mm_sd", "motion_module"]),
    (AssetCategory::InstantId, &["instantid", "instant_id"]),
    (AssetCategory::ClipVision, &["clip_vision", "clipvision"]),
    (AssetCategory::Clip, &["clip_", "text_encoder", "t5xxl", "umt5"]),
    (AssetCategory::Upscale, &["upscale", "esrgan", "realesrgan", "4x_", "2x_"]),
    (AssetCategory::Embedding, &["embedding", "textual_inversion"]),
    (AssetCategory::Unet, &["unet", "diffusion_model"]),
    (AssetCategory::Checkpoint, &["checkpoint", "ckpt", "dreambooth"]),
];

impl AssetCategory {
    pub const ALL: [AssetCategory; 13] = [
        AssetCategory::Checkpoint,
        AssetCategory::Lora,
        AssetCategory::Vae,
        AssetCategory::ControlNet,
        AssetCategory::Clip,
        AssetCategory::ClipVision,
        AssetCategory::Unet,
        AssetCategory::Upscale,
        AssetCategory::Embedding,
        AssetCategory::IpAdapter,
        AssetCategory::AnimateDiff,
        AssetCategory::InstantId,
        AssetCategory::StyleModel,
    ];

    #[must_use]
    pub fn is_known(self) -> bool {
        self != AssetCategory::Unknown
    }

    /// Storage directories holding this category, canonical one first.
    #[must_use]
    pub fn directories(self) -> &'static [&'static str] {
        match self {
            AssetCategory::Checkpoint => &["checkpoints"],
            AssetCategory::Lora => &["loras"],
            AssetCategory::Vae => &["vae"],
            AssetCategory::ControlNet => &["controlnet"],
            AssetCategory::Clip => &["clip", "text_encoders"],
            AssetCategory::ClipVision => &["clip_vision"],
            AssetCategory::Unet => &["unet", "diffusion_models"],
            AssetCategory::Upscale => &["upscale_models"],
            AssetCategory::Embedding => &["embeddings"],
            AssetCategory::IpAdapter => &["ipadapter"],
            AssetCategory::AnimateDiff => &["animatediff_models"],
            AssetCategory::InstantId => &["instantid"],
            AssetCategory::StyleModel => &["style_models"],
            AssetCategory::Unknown => &[],
        }
    }

    #[must_use]
    pub fn canonical_directory(self) -> Option<&'static str> {
        self.directories().first().copied()
    }

    /// Category stored under a directory name, `Unknown` for unrecognized ones.
    #[must_use]
    pub fn from_directory(name: &str) -> AssetCategory {
        let lower = name.to_ascii_lowercase();
        AssetCategory::ALL
            .into_iter()
            .find(|category| category.directories().contains(&lower.as_str()))
            .unwrap_or(AssetCategory::Unknown)
    }

    /// Category guessed from filename fragments.
    #[must_use]
    pub fn infer_from_filename(filename: &str) -> AssetCategory {
        let lower = filename.to_ascii_lowercase();
        for (category, hints) in FILENAME_HINTS {
            if hints.iter().any(|hint| lower.contains(hint)) {
                return *category;
            }
        }
        AssetCategory::Unknown
    }

    /// Category from the directory segments of a path, falling back to the
    /// filename hints of its last segment.
    #[must_use]
    pub fn infer_from_path(path: &str) -> AssetCategory {
        let segments: Vec<&str> = path
            .split(['/', '\\'])
            .filter(|segment| !segment.is_empty())
            .collect();
        if let Some((filename, parents)) = segments.split_last() {
            for parent in parents.iter().rev() {
                let category = AssetCategory::from_directory(parent);
                if category.is_known() {
                    return category;
                }
            }
            return AssetCategory::infer_from_filename(filename);
        }
        AssetCategory::Unknown
    }
}

impl Default for AssetCategory {
    fn default() -> Self {
        AssetCategory::Unknown
    }
}

impl fmt::Display for AssetCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AssetCategory::Checkpoint => "checkpoint",
            AssetCategory::Lora => "lora",
            AssetCategory::Vae => "vae",
            AssetCategory::ControlNet => "controlnet",
            AssetCategory::Clip => "clip",
            AssetCategory::ClipVision => "clip-vision",
            AssetCategory::Unet => "unet",
            AssetCategory::Upscale => "upscale",
            AssetCategory::Embedding => "embedding",
            AssetCategory::IpAdapter => "ip-adapter",
            AssetCategory::AnimateDiff => "animate-diff",
            AssetCategory::InstantId => "instant-id",
            AssetCategory::StyleModel => "style-model",
            AssetCategory::Unknown => "unknown",
        };
        f.write_str(label)
    }
}
