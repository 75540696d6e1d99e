use std::{
    collections::BTreeMap,
    env,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::downloads::OrchestratorConfig;
use crate::models::{AssetCategory, KeywordExtractor, DEFAULT_SIMILARITY_THRESHOLD};
use crate::workflow::LoaderVocabulary;

const CONFIG_FILE: &str = "config.json";
pub const CONFIG_ENV: &str = "MODEL_RESOLVER_CONFIG";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "ModelResolver", "ModelResolver")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ResolverSettings {
    pub models_root: PathBuf,
    pub extra_model_roots: Vec<PathBuf>,
    /// Where the inventory snapshot lives; the platform cache dir when unset.
    pub cache_dir: Option<PathBuf>,
    pub cache_ttl_hours: u64,
    pub similarity_threshold: f64,
    pub max_concurrent_downloads: usize,
    /// `null` disables the per-read timeout.
    pub read_timeout_secs: Option<u64>,
    pub recent_history: usize,
    pub user_agent: String,
    pub custom_loaders: BTreeMap<String, AssetCategory>,
    pub version_variants: Vec<String>,
    pub preserve_keywords: Vec<String>,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        let models_root = project_dirs()
            .map(|dirs| dirs.data_dir().join("models"))
            .unwrap_or_else(|| PathBuf::from("models"));
        Self {
            models_root,
            extra_model_roots: Vec::new(),
            cache_dir: None,
            cache_ttl_hours: 24,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            max_concurrent_downloads: 3,
            read_timeout_secs: Some(300),
            recent_history: 10,
            user_agent: concat!("model-resolver/", env!("CARGO_PKG_VERSION")).into(),
            custom_loaders: BTreeMap::new(),
            version_variants: Vec::new(),
            preserve_keywords: Vec::new(),
        }
    }
}

impl ResolverSettings {
    /// Primary root first, then the extra roots in configured order.
    pub fn model_roots(&self) -> Vec<PathBuf> {
        std::iter::once(self.models_root.clone())
            .chain(self.extra_model_roots.iter().cloned())
            .collect()
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_hours.saturating_mul(3600))
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_secs.map(Duration::from_secs)
    }

    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            project_dirs()
                .map(|dirs| dirs.cache_dir().to_path_buf())
                .unwrap_or_else(|| self.models_root.join(".cache"))
        })
    }

    pub fn keyword_extractor(&self) -> KeywordExtractor {
        KeywordExtractor::with_filters(&self.version_variants, &self.preserve_keywords)
    }

    pub fn vocabulary(&self) -> LoaderVocabulary {
        LoaderVocabulary::with_custom(&self.custom_loaders)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_concurrent: self.max_concurrent_downloads.max(1),
            recent_history: self.recent_history,
            ..OrchestratorConfig::default()
        }
    }
}

pub struct SettingsManager {
    path: PathBuf,
    inner: RwLock<ResolverSettings>,
}

impl SettingsManager {
    /// Loads from `$MODEL_RESOLVER_CONFIG`, or `config.json` in the platform
    /// config directory.
    pub fn new() -> Result<Self> {
        let path = resolve_config_path(env::var_os(CONFIG_ENV))?;
        Self::at(path)
    }

    /// A missing file yields defaults; an unparseable one is an error.
    pub fn at(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let settings = load_settings(&path)?;
        Ok(Self {
            path,
            inner: RwLock::new(settings),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> ResolverSettings {
        self.inner.read().clone()
    }

    pub fn write(&self, settings: ResolverSettings) -> Result<()> {
        let mut guard = self.inner.write();
        persist_settings(&self.path, &settings)?;
        *guard = settings;
        Ok(())
    }

    pub fn update<F>(&self, apply: F) -> Result<ResolverSettings>
    where
        F: FnOnce(&mut ResolverSettings),
    {
        let mut guard = self.inner.write();
        let mut next = guard.clone();
        apply(&mut next);
        persist_settings(&self.path, &next)?;
        *guard = next.clone();
        Ok(next)
    }
}

fn resolve_config_path(override_path: Option<OsString>) -> Result<PathBuf> {
    if let Some(path) = override_path.filter(|path| !path.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    let dirs = project_dirs().context("missing project directories")?;
    Ok(dirs.config_dir().join(CONFIG_FILE))
}

fn load_settings(path: &Path) -> Result<ResolverSettings> {
    if !path.exists() {
        tracing::debug!("No config at {}; using defaults", path.display());
        return Ok(ResolverSettings::default());
    }
    let bytes = fs::read(path).with_context(|| format!("failed reading {path:?}"))?;
    serde_json::from_slice(&bytes).with_context(|| format!("config json {path:?} could not be parsed"))
}

fn persist_settings(path: &Path, settings: &ResolverSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create dir {parent:?}"))?;
    }
    let serialized = serde_json::to_vec_pretty(settings).context("serialize settings to json failed")?;
    fs::write(path, serialized).with_context(|| format!("write settings to {path:?}"))?;
    Ok(())
}
