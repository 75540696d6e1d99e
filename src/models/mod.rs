mod cache;
mod category;
mod inventory;
mod keywords;

pub use cache::{CacheSnapshot, ScanCache, CACHE_FILE};
pub use category::{has_model_extension, AssetCategory, MODEL_EXTENSIONS};
pub use inventory::{
    DirectoryStats, InventoryIndex, InventoryScan, InventoryStats, LocalAssetRecord,
};
pub use keywords::{
    jaccard_similarity, match_keywords, KeywordExtractor, KeywordMatch,
    DEFAULT_SIMILARITY_THRESHOLD,
};
