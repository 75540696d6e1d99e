//! Resolves the model files a node-graph workflow depends on against a local
//! model library, and fetches whatever is missing.

pub mod core;
pub mod downloads;
pub mod matching;
pub mod models;
pub mod workflow;

pub use crate::core::app_state::AppState;
pub use crate::core::error::{Error, Result};
pub use crate::core::events::{DownloadEvent, EventBus};
pub use crate::core::pipeline::{Resolution, ResolutionPipeline};
pub use crate::core::settings::{ResolverSettings, SettingsManager};
