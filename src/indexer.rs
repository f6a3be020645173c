//! Event-driven writer: consumes change events, updates the catalog, and re-embeds
//! changed textual assets. Owns the per-event pipeline and the pause/resume protocol.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex as AsyncMutex};

use crate::catalog::{normalize_guid, normalize_path, AssetRow, CatalogStore, IndexState};
use crate::chunker::{chunk_text, AssetKind, ChunkParams};
use crate::config::{AppConfig, TEXTUAL_KINDS};
use crate::embedder::EmbeddingManager;
use crate::error::{AppError, AppResult};
use crate::progress::{Phase, ProgressBus, Status};
use crate::vector_gateway::{VectorGateway, VectorPayload, VectorPoint};

/// Scripts: `kind` is one of `TEXTUAL_KINDS`, or path ends `.cs`.
pub fn is_textual(kind: Option<&str>, path: &str) -> bool {
    kind.map(|k| TEXTUAL_KINDS.contains(&k)).unwrap_or(false) || path.ends_with(".cs")
}

/// Scenes: path ends `.unity`.
pub fn is_scene(path: &str) -> bool {
    path.ends_with(".unity")
}

struct QueuedEvent {
    ty: String,
    session: Option<String>,
    body: Value,
    project_root: PathBuf,
    reply: oneshot::Sender<AppResult<()>>,
}

/// Per-session heartbeat fencing: while non-zero, the outer transport must not treat
/// the connection as dead even if its normal liveness window elapses.
#[derive(Default)]
pub struct HeartbeatFence {
    suspended_until: parking_lot::Mutex<Option<std::time::Instant>>,
}

impl HeartbeatFence {
    pub fn suspend_for(&self, duration: Duration) {
        let until = std::time::Instant::now() + duration;
        let mut guard = self.suspended_until.lock();
        *guard = Some(match *guard {
            Some(existing) if existing > until => existing,
            _ => until,
        });
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended_until.lock().map(|i| i > std::time::Instant::now()).unwrap_or(false)
    }
}

pub struct Indexer {
    catalog: Arc<CatalogStore>,
    vectors: Arc<VectorGateway>,
    embedder: Arc<EmbeddingManager>,
    progress: Arc<ProgressBus>,
    config: Arc<AppConfig>,
    paused: AtomicBool,
    queue: AsyncMutex<VecDeque<QueuedEvent>>,
    pub heartbeat: HeartbeatFence,
}

impl Indexer {
    pub fn new(
        catalog: Arc<CatalogStore>,
        vectors: Arc<VectorGateway>,
        embedder: Arc<EmbeddingManager>,
        progress: Arc<ProgressBus>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            catalog,
            vectors,
            embedder,
            progress,
            config,
            paused: AtomicBool::new(false),
            queue: AsyncMutex::new(VecDeque::new()),
            heartbeat: HeartbeatFence::default(),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Sets the pause flag; subsequent `handle_event` calls queue instead of applying.
    /// A settling delay lets in-flight work complete before the caller proceeds.
    pub async fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(self.config.pause_settle_ms)).await;
    }

    /// Drains the queue in arrival order; failures reject individual futures but do
    /// not halt the drain.
    pub async fn resume(self: &Arc<Self>) {
        self.paused.store(false, Ordering::SeqCst);
        loop {
            let next = {
                let mut q = self.queue.lock().await;
                q.pop_front()
            };
            let Some(queued) = next else { break };
            let result = self
                .apply_event(&queued.ty, queued.session.clone(), queued.body.clone(), &queued.project_root)
                .await;
            let _ = queued.reply.send(result);
        }
    }

    /// Entry point used by the Session Resolver and Reconciler alike. While paused,
    /// the event is queued and the returned future resolves only after `resume()`
    /// drains it.
    pub async fn handle_event(
        self: &Arc<Self>,
        ty: &str,
        session: Option<String>,
        body: Value,
        project_root: &Path,
    ) -> AppResult<()> {
        if self.paused.load(Ordering::SeqCst) {
            let (tx, rx) = oneshot::channel();
            {
                let mut q = self.queue.lock().await;
                q.push_back(QueuedEvent {
                    ty: ty.to_string(),
                    session,
                    body,
                    project_root: project_root.to_path_buf(),
                    reply: tx,
                });
            }
            return rx.await.unwrap_or_else(|_| Err(AppError::Internal(anyhow::anyhow!("queue dropped"))));
        }
        self.apply_event(ty, session, body, project_root).await
    }

    async fn apply_event(
        &self,
        ty: &str,
        session: Option<String>,
        body: Value,
        project_root: &Path,
    ) -> AppResult<()> {
        let ts = CatalogStore::now_ts();
        self.catalog.log_event(ts, session.as_deref(), ty, &body)?;

        match ty {
            "assets_imported" => self.on_assets_imported(session.as_deref(), &body, project_root, ts).await,
            "assets_moved" => self.on_assets_moved(session.as_deref(), &body, project_root, ts).await,
            "assets_deleted" => self.on_assets_deleted(&body, project_root, ts).await,
            "scene_saved" => self.on_scene_saved(session.as_deref(), &body, project_root, ts).await,
            "hello" | "hb" | "ack" => Ok(()),
            "compile_started" => {
                self.heartbeat.suspend_for(Duration::from_secs(self.config.compile_started_suspend_secs));
                Ok(())
            }
            "compile_finished" => {
                self.heartbeat.suspend_for(Duration::from_secs(self.config.compile_finished_suspend_secs));
                Ok(())
            }
            _ => Ok(()), // already logged above
        }
    }

    fn rows_from_items(items: &[Value]) -> Vec<AssetRow> {
        items.iter().filter_map(AssetRow::from_json).collect()
    }

    async fn on_assets_imported(&self, session: Option<&str>, body: &Value, root: &Path, ts: i64) -> AppResult<()> {
        let items = body.get("items").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        let rows = Self::rows_from_items(&items);
        self.catalog.upsert_assets(&rows, ts)?;

        for row in &rows {
            if is_scene(&row.path) {
                self.catalog.upsert_scene(&row.guid, &row.path, ts)?;
            }
        }

        let textual: Vec<&AssetRow> = rows.iter().filter(|r| is_textual(r.kind.as_deref(), &r.path)).collect();
        let total = textual.len();
        for (done, row) in textual.iter().enumerate() {
            self.progress.publish(Status::progress(Phase::Embedding, done, total, Some(row.path.clone())));
            let kind = if is_scene(&row.path) { AssetKind::Scene } else { AssetKind::Script };
            self.run_pipeline(&row.path, session, root, kind, ts).await?;
        }

        let (sha, count) = self.catalog.snapshot()?;
        let qdrant_count = self.vectors.count_points().await;
        let project_id = crate::catalog::project_id_for_root(&root.to_string_lossy());
        self.catalog.write_index_state(&IndexState {
            project_id,
            snapshot_sha: sha,
            total_items: count,
            qdrant_count,
            completed_at: ts,
        })?;
        self.progress.publish(Status::complete(total, qdrant_count, "Import applied"));
        Ok(())
    }

    async fn on_assets_moved(&self, session: Option<&str>, body: &Value, root: &Path, ts: i64) -> AppResult<()> {
        let items = body.get("items").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        let rows = Self::rows_from_items(&items);
        self.catalog.upsert_assets(&rows, ts)?;
        for row in &rows {
            if is_scene(&row.path) {
                self.catalog.upsert_scene(&row.guid, &row.path, ts)?;
            }
        }

        for item in &items {
            if let Some(from) = item.get("from").and_then(|v| v.as_str()) {
                self.vectors.delete_by_path(from).await?;
            }
        }

        let textual: Vec<&AssetRow> = rows.iter().filter(|r| is_textual(r.kind.as_deref(), &r.path)).collect();
        let total = textual.len();
        for (done, row) in textual.iter().enumerate() {
            self.progress.publish(Status::progress(Phase::Embedding, done, total, Some(row.path.clone())));
            let kind = if is_scene(&row.path) { AssetKind::Scene } else { AssetKind::Script };
            self.run_pipeline(&row.path, session, root, kind, ts).await?;
        }

        let (sha, count) = self.catalog.snapshot()?;
        let qdrant_count = self.vectors.count_points().await;
        let project_id = crate::catalog::project_id_for_root(&root.to_string_lossy());
        self.catalog.write_index_state(&IndexState {
            project_id,
            snapshot_sha: sha,
            total_items: count,
            qdrant_count,
            completed_at: ts,
        })?;
        self.progress.publish(Status::complete(total, qdrant_count, "Move applied"));
        Ok(())
    }

    async fn on_assets_deleted(&self, body: &Value, root: &Path, ts: i64) -> AppResult<()> {
        let items = body.get("items").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        let guids: Vec<String> = items
            .iter()
            .filter_map(|i| i.get("guid").and_then(|v| v.as_str()).map(str::to_string))
            .collect();
        self.catalog.mark_deleted(&guids, ts)?;

        for item in &items {
            if let Some(path) = item.get("path").and_then(|v| v.as_str()) {
                self.vectors.delete_by_path(path).await?;
            }
            if let Some(guid) = item.get("guid").and_then(|v| v.as_str()) {
                self.vectors.delete_by_guid(&normalize_guid(guid)).await?;
            }
        }

        let (sha, count) = self.catalog.snapshot()?;
        let qdrant_count = self.vectors.count_points().await;
        let project_id = crate::catalog::project_id_for_root(&root.to_string_lossy());
        self.catalog.write_index_state(&IndexState {
            project_id,
            snapshot_sha: sha,
            total_items: count,
            qdrant_count,
            completed_at: ts,
        })?;
        self.progress.publish(Status::complete(guids.len(), qdrant_count, "Deletions applied"));
        Ok(())
    }

    async fn on_scene_saved(&self, session: Option<&str>, body: &Value, root: &Path, ts: i64) -> AppResult<()> {
        let row = AssetRow::from_json(body)
            .ok_or_else(|| AppError::InvalidEnvelope("scene_saved missing guid/path".into()))?;
        self.catalog.upsert_assets(&[row.clone()], ts)?;
        self.catalog.upsert_scene(&row.guid, &row.path, ts)?;
        self.progress.publish(Status::progress(Phase::Embedding, 0, 1, Some(row.path.clone())));
        self.run_pipeline(&row.path, session, root, AssetKind::Scene, ts).await?;

        let (sha, count) = self.catalog.snapshot()?;
        let qdrant_count = self.vectors.count_points().await;
        let project_id = crate::catalog::project_id_for_root(&root.to_string_lossy());
        self.catalog.write_index_state(&IndexState {
            project_id,
            snapshot_sha: sha,
            total_items: count,
            qdrant_count,
            completed_at: ts,
        })?;
        self.progress.publish(Status::complete(1, qdrant_count, "Scene saved"));
        Ok(())
    }

    /// `read -> chunk -> embed -> guard -> upsert`. A failure at `read` or `embed`
    /// aborts the event without altering state beyond what step 2 already did.
    pub async fn run_pipeline(
        &self,
        rel_path: &str,
        session: Option<&str>,
        root: &Path,
        kind: AssetKind,
        ts: i64,
    ) -> AppResult<()> {
        let rel_path = normalize_path(rel_path);
        // Step 2: remove stale points before anything else can add new ones.
        self.vectors.delete_by_path(&rel_path).await?;

        let abs_path = root.join(&rel_path);
        let text = self.read_with_retry(&abs_path).await?;

        let params = ChunkParams::for_kind(kind, &self.config);
        let chunks = chunk_text(&text, &abs_path.to_string_lossy(), &params);
        if chunks.is_empty() {
            // Empty file: zero-length chunk suppressed, no embedding call, still succeeds.
            return Ok(());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(texts).await?;

        if vectors.len() != chunks.len() {
            return Err(AppError::EmbeddingInvalid(format!(
                "vector count {} != chunk count {}",
                vectors.len(),
                chunks.len()
            )));
        }

        let kind_label = match kind {
            AssetKind::Script => "Script",
            AssetKind::Scene => "Scene",
        };
        let points: Vec<VectorPoint> = chunks
            .into_iter()
            .zip(vectors.into_iter())
            .map(|(chunk, vector)| VectorPoint {
                id: chunk.point_id.to_string(),
                vector,
                payload: VectorPayload {
                    rel_path: rel_path.clone(),
                    range: format!("{}-{}", chunk.line_start, chunk.line_end),
                    file_hash: chunk.fingerprint_hex,
                    kind: kind_label.to_string(),
                    session: session.map(str::to_string),
                    updated_ts: ts,
                    text: chunk.text,
                },
            })
            .collect();

        self.vectors.upsert_points(&points).await?;
        Ok(())
    }

    /// Up to `config.read_retry_attempts` attempts with exponential backoff starting
    /// at `config.read_retry_base_ms`, retried only on not-found errors. Any other I/O
    /// error is fatal for this event.
    async fn read_with_retry(&self, path: &Path) -> AppResult<String> {
        let mut attempt = 0u32;
        loop {
            match tokio::fs::read_to_string(path).await {
                Ok(text) => return Ok(text),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    attempt += 1;
                    if attempt >= self.config.read_retry_attempts {
                        return Err(AppError::NotFoundTransient(format!(
                            "{} not found after {} attempts",
                            path.display(),
                            attempt
                        )));
                    }
                    let backoff = self.config.read_retry_base_ms * 2u64.pow(attempt - 1);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => return Err(AppError::IoFatal(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn textual_classification() {
        assert!(is_textual(Some("MonoScript"), "Assets/S.cs"));
        assert!(is_textual(Some("TextAsset"), "Assets/readme.txt"));
        assert!(is_textual(None, "Assets/S.cs"));
        assert!(!is_textual(Some("Texture2D"), "Assets/tex.png"));
    }

    #[test]
    fn scene_classification() {
        assert!(is_scene("Assets/Scenes/Main.unity"));
        assert!(!is_scene("Assets/S.cs"));
    }
}
