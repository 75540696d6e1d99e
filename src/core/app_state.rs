use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;

use crate::downloads::{
    plan_downloads, DownloadOrchestrator, DownloadPlan, HttpTransport, SourceResolver, TaskId,
};
use crate::matching::FuzzyMatcher;
use crate::models::{InventoryIndex, ScanCache};
use crate::workflow::Extractor;

use super::error;
use super::events::EventBus;
use super::pipeline::{Resolution, ResolutionPipeline};
use super::settings::SettingsManager;

/// Process-wide handles built from the current settings. The download
/// orchestrator is started on first use.
pub struct AppState {
    settings: Arc<SettingsManager>,
    events: Arc<EventBus>,
    pipeline: Arc<ResolutionPipeline>,
    downloads: Mutex<Option<Arc<DownloadOrchestrator>>>,
}

impl AppState {
    pub fn new() -> Result<Self> {
        Self::from_settings(Arc::new(SettingsManager::new()?))
    }

    pub fn from_settings(settings: Arc<SettingsManager>) -> Result<Self> {
        let config = settings.read();
        let cache = ScanCache::persistent(&config.resolved_cache_dir(), config.cache_ttl())
            .context("open inventory cache")?;
        let inventory = Arc::new(InventoryIndex::new(
            config.model_roots(),
            config.keyword_extractor(),
            cache,
        ));
        let pipeline = ResolutionPipeline::new(
            Extractor::new(config.vocabulary()),
            FuzzyMatcher::new(inventory, config.similarity_threshold),
        );
        Ok(Self {
            settings,
            events: Arc::new(EventBus::new()),
            pipeline: Arc::new(pipeline),
            downloads: Mutex::new(None),
        })
    }

    pub fn settings_manager(&self) -> Arc<SettingsManager> {
        self.settings.clone()
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    pub fn pipeline(&self) -> Arc<ResolutionPipeline> {
        self.pipeline.clone()
    }

    pub fn inventory(&self) -> Arc<InventoryIndex> {
        self.pipeline.inventory().clone()
    }

    pub fn downloads(&self) -> Result<Arc<DownloadOrchestrator>> {
        let mut guard = self.downloads.lock();
        if let Some(orchestrator) = guard.as_ref() {
            return Ok(orchestrator.clone());
        }
        let config = self.settings.read();
        let transport = HttpTransport::new(&config.user_agent, config.read_timeout())
            .context("create http client")?;
        let orchestrator = Arc::new(DownloadOrchestrator::new(
            Arc::new(transport),
            self.events.clone(),
            config.orchestrator_config(),
        ));
        tracing::info!(
            "Download orchestrator started with {} workers",
            orchestrator.config().max_concurrent
        );
        *guard = Some(orchestrator.clone());
        Ok(orchestrator)
    }

    pub fn plan_downloads(
        &self,
        resolution: &Resolution,
        resolver: &dyn SourceResolver,
        include_partial: bool,
    ) -> Vec<DownloadPlan> {
        let models_root = self.settings.read().models_root;
        plan_downloads(&resolution.report, resolver, &models_root, include_partial)
    }

    pub fn queue_downloads(&self, plans: Vec<DownloadPlan>) -> Result<Vec<error::Result<TaskId>>> {
        let orchestrator = self.downloads()?;
        Ok(orchestrator.enqueue_all(plans.into_iter().map(DownloadPlan::into_request)))
    }

    /// Joins the download workers if they were ever started.
    pub fn shutdown(&self) {
        if let Some(orchestrator) = self.downloads.lock().take() {
            orchestrator.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;
    use std::time::{Duration, Instant};

    use httpmock::prelude::*;

    use crate::downloads::{SourceCandidate, StaticResolver, TaskStatus};

    const WORKFLOW: &str = r#"{
        "nodes": [
            {"id": 1, "type": "LoraLoader", "widgets_values": ["detail.safetensors", 1.0, 1.0]}
        ]
    }"#;

    #[test]
    fn missing_models_are_planned_and_downloaded_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let models = dir.path().join("models");
        let config = dir.path().join("config.json");
        fs::write(
            &config,
            serde_json::json!({
                "modelsRoot": models,
                "cacheDir": dir.path().join("cache"),
                "maxConcurrentDownloads": 1,
            })
            .to_string(),
        )
        .unwrap();
        let state = AppState::from_settings(Arc::new(SettingsManager::at(&config).unwrap())).unwrap();

        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/detail.safetensors");
            then.status(200).body(vec![3u8; 256]);
        });
        let mut sources = BTreeMap::new();
        sources.insert(
            "detail.safetensors".to_string(),
            vec![SourceCandidate {
                url: server.url("/detail.safetensors"),
                platform: "mock".into(),
                size_bytes: Some(256),
            }],
        );

        let resolution = state.pipeline().analyze(WORKFLOW).unwrap();
        assert_eq!(resolution.report.summary.missing, 1);
        let plans = state.plan_downloads(&resolution, &StaticResolver::new(sources), false);
        assert_eq!(plans[0].target_path, models.join("loras").join("detail.safetensors"));

        let queued = state.queue_downloads(plans).unwrap();
        let id = queued[0].as_ref().unwrap().clone();
        let orchestrator = state.downloads().unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        while !orchestrator.task_status(&id).unwrap().status.is_terminal() {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(orchestrator.task_status(&id).unwrap().status, TaskStatus::Completed);

        state.inventory().clear_cache().unwrap();
        let rescanned = state.pipeline().analyze(WORKFLOW).unwrap();
        assert_eq!(rescanned.report.summary.found, 1);
        state.shutdown();
    }
}
