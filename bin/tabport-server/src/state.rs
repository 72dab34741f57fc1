//! Shared application state injected into every Axum handler.

use std::path::Path;
use std::sync::Arc;

use tabport_core::Orchestrator;
use tracing::info;

use crate::config::Config;
use crate::entities::SqliteStore;
use crate::jobs;
use crate::storage::{LocalArtifactSink, UrlSigner};

pub type AppOrchestrator = Orchestrator<SqliteStore, LocalArtifactSink>;

/// State shared across all HTTP handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    pub orchestrator: AppOrchestrator,
}

impl AppState {
    /// Open the task store, prepare artifact storage and templates, and
    /// assemble the orchestrator.
    pub async fn init(config: Config) -> anyhow::Result<Self> {
        let store = SqliteStore::connect(&config.database_url).await?;
        info!(database_url = %config.database_url, "task store ready");

        tokio::fs::create_dir_all(&config.artifact_dir).await?;
        let signer = UrlSigner::new(&config.public_url, &config.url_secret)?;
        let sink = LocalArtifactSink::new(&config.artifact_dir, signer);
        info!(artifact_dir = %config.artifact_dir, "artifact storage ready");

        let registry = jobs::build_registry(Path::new(&config.template_dir)).await?;
        info!(job_kinds = registry.len(), "job registry ready");

        let orchestrator = Orchestrator::new(
            Arc::new(store),
            Arc::new(sink),
            registry,
            config.orchestrator_config(),
        );
        Ok(Self {
            config: Arc::new(config),
            orchestrator,
        })
    }
}
