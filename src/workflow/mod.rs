mod document;
mod extractor;
mod reference;
mod strategies;
mod vocabulary;

pub use document::{DocumentShape, NodeParameter, WorkflowDocument, WorkflowNode};
pub use extractor::{Extractor, WorkflowAnalysis};
pub use reference::{AssetReference, DetectionSource};
pub use strategies::{
    default_strategies, DetectionStrategy, DirectParameterScan, MarkdownLinkScan, PathScan,
};
pub use vocabulary::LoaderVocabulary;
