//! Idempotent bring-up of the Catalog Store and Vector Store Gateway, single-flight
//! boot, and wiring of Session Resolver -> Indexer -> Reconciler.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::catalog::{project_id_for_root, CatalogStore};
use crate::config::AppConfig;
use crate::embedder::EmbeddingManager;
use crate::error::AppResult;
use crate::events::ManifestAccumulator;
use crate::indexer::Indexer;
use crate::maintenance::{ArcIndexer, MaintenanceCoordinator};
use crate::progress::{ProgressBus, Status};
use crate::reconciler::Reconciler;
use crate::session::{RootCandidateSource, SessionResolver};
use crate::vector_gateway::VectorGateway;

pub struct Orchestrator {
    pub config: Arc<AppConfig>,
    pub catalog: Arc<CatalogStore>,
    pub vectors: Arc<VectorGateway>,
    pub embedder: Arc<EmbeddingManager>,
    pub progress: Arc<ProgressBus>,
    pub indexer: Arc<Indexer>,
    pub reconciler: Arc<Reconciler>,
    pub sessions: Arc<SessionResolver>,
    pub maintenance: Arc<MaintenanceCoordinator>,
    /// Per-session manifest accumulators, buffering `manifest_batch` payloads between
    /// a `manifest_begin` and `manifest_end`.
    pub manifests: DashMap<String, parking_lot::Mutex<ManifestAccumulator>>,
}

static BOOT: OnceCell<Arc<Orchestrator>> = OnceCell::const_new();

impl Orchestrator {
    /// Memoizes the boot future so repeated calls share one bring-up.
    pub async fn start_once(config: Arc<AppConfig>, candidate_source: Box<dyn RootCandidateSource>) -> AppResult<Arc<Orchestrator>> {
        BOOT.get_or_try_init(|| Self::boot(config, candidate_source)).await.map(Arc::clone)
    }

    async fn boot(config: Arc<AppConfig>, candidate_source: Box<dyn RootCandidateSource>) -> AppResult<Arc<Orchestrator>> {
        let data_dir = std::path::PathBuf::from(&config.data_dir);
        let catalog = Arc::new(CatalogStore::open(&data_dir)?);

        let vectors = Arc::new(VectorGateway::new(
            config.vector_base_url.clone(),
            config.vector_collection.clone(),
            config.embedding_dim,
        ));

        // Timing out here is tolerated: the Indexer degrades gracefully, continuing to
        // update the catalog while vector writes fail per-call.
        if let Err(e) = vectors.wait_ready(Duration::from_millis(config.vector_ready_timeout_ms)).await {
            tracing::warn!("vector backend not ready at boot, continuing without vectors: {}", e);
        } else if let Err(e) = vectors.ensure_collection().await {
            tracing::warn!("failed to ensure vector collection at boot: {}", e);
        }

        let embedder = Arc::new(EmbeddingManager::new(config.embedding_dim));
        let progress = Arc::new(ProgressBus::new(1024));

        let indexer = Arc::new(Indexer::new(
            catalog.clone(),
            vectors.clone(),
            embedder.clone(),
            progress.clone(),
            config.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(catalog.clone(), indexer.clone(), vectors.clone()));
        let sessions = Arc::new(SessionResolver::new(candidate_source));

        let maintenance = Arc::new(MaintenanceCoordinator::new(catalog.clone(), vectors.clone(), config.clone()));
        maintenance.register(Arc::new(ArcIndexer(indexer.clone())));

        Ok(Arc::new(Orchestrator {
            config,
            catalog,
            vectors,
            embedder,
            progress,
            indexer,
            reconciler,
            sessions,
            maintenance,
            manifests: DashMap::new(),
        }))
    }

    /// After resolving a session to `root`, computes the current snapshot and compares
    /// it against the stored `IndexState`. On a match, publishes the verified-complete
    /// status and skips reindexing; otherwise publishes `scanning` and expects a
    /// manifest for reconciliation.
    pub async fn verify_snapshot_on_connect(&self, root: &Path) -> AppResult<bool> {
        let project_id = project_id_for_root(&root.to_string_lossy());
        let (sha, total) = self.catalog.snapshot()?;
        let prior = self.catalog.read_index_state(&project_id)?;

        if let Some(prior) = &prior {
            if prior.snapshot_sha == sha && !sha.is_empty() {
                self.progress.publish(Status::complete(
                    total as usize,
                    prior.qdrant_count,
                    "Fully indexed (verified)",
                ));
                return Ok(true);
            }
        }

        self.progress.publish(Status::scanning("Checking for changes…"));
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StaticRootCandidates;

    #[tokio::test]
    async fn verify_snapshot_on_connect_is_scanning_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::from_env();
        config.data_dir = dir.path().to_string_lossy().to_string();
        config.vector_base_url = "http://127.0.0.1:1".to_string();
        config.vector_ready_timeout_ms = 50;

        let orchestrator = Orchestrator::boot(Arc::new(config), Box::new(StaticRootCandidates(vec![])))
            .await
            .unwrap();

        let root = dir.path().join("Project");
        let verified = orchestrator.verify_snapshot_on_connect(&root).await.unwrap();
        assert!(!verified);
    }
}
