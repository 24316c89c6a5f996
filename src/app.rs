// Wires configuration into the repository, transport and pipelines

use crate::config::Config;
use crate::error::{Result, RetroError};
use crate::notify::{Notifier, WebhookNotifier};
use crate::pipeline::{Detector, EntityStore, PipelineOptions};
use crate::repository::{Repository, SqliteRepository};
use crate::service::RepositoryService;
use crate::transport::{EntityTransport, FsBlobStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Long-lived components shared by every trigger invocation
pub struct App {
    pub service: Arc<RepositoryService>,
    pub transport: EntityTransport,
    options: PipelineOptions,
    webhook_url: Option<String>,
}

impl App {
    /// Open the SQLite repository and filesystem blob store under `data_dir`
    pub fn from_config(config: &Config) -> Result<Self> {
        let data_dir = expand_tilde(&config.storage.data_dir);
        let db_path = expand_tilde(&config.database_path());

        let repo: Arc<dyn Repository> = Arc::new(SqliteRepository::open(&db_path)?);
        let store = Arc::new(FsBlobStore::new(data_dir)?);

        Self::new(
            repo,
            EntityTransport::new(store).with_options(config.queue_options()),
            config,
        )
    }

    /// Assemble from already-constructed backends
    pub fn new(repo: Arc<dyn Repository>, transport: EntityTransport, config: &Config) -> Result<Self> {
        let service = RepositoryService::new(repo).with_timeout(config.query_timeout()?);

        Ok(Self {
            service: Arc::new(service),
            transport,
            options: config.pipeline_options()?,
            webhook_url: config.webhook_url(),
        })
    }

    pub fn detector(&self) -> Result<Detector> {
        let url = self.webhook_url.clone().ok_or_else(|| {
            RetroError::Config(
                "No webhook URL configured (set notify.webhook_url or the configured env var)"
                    .to_string(),
            )
        })?;
        let notifier: Arc<dyn Notifier> =
            Arc::new(WebhookNotifier::new(url, self.options.notify_timeout)?);
        Ok(self.detector_with(notifier))
    }

    pub fn detector_with(&self, notifier: Arc<dyn Notifier>) -> Detector {
        Detector::new(
            Arc::clone(&self.service),
            self.transport.clone(),
            notifier,
            self.options,
        )
    }

    pub fn entity_store(&self) -> EntityStore {
        EntityStore::new(Arc::clone(&self.service), self.transport.clone(), self.options)
    }
}

/// Expand a leading `~/` to the home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}
