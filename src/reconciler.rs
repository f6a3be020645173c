//! Diffs a project manifest against the catalog and emits the minimal set of
//! adds/moves/modifies/deletes, delegating re-indexing to the Indexer.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use crate::catalog::{normalize_path, CatalogStore};
use crate::events::ManifestItem;
use crate::indexer::{is_scene, is_textual, Indexer};
use crate::vector_gateway::VectorGateway;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ReconcileStats {
    pub added: usize,
    pub deleted: usize,
    pub moved: usize,
    pub modified: usize,
}

pub struct Reconciler {
    catalog: Arc<CatalogStore>,
    indexer: Arc<Indexer>,
    vectors: Arc<VectorGateway>,
}

impl Reconciler {
    pub fn new(catalog: Arc<CatalogStore>, indexer: Arc<Indexer>, vectors: Arc<VectorGateway>) -> Self {
        Self { catalog, indexer, vectors }
    }

    /// Single pass: load the live snapshot, classify each manifest item, persist all
    /// scheduled upserts in one transaction, then delegate re-indexing as synthetic
    /// `assets_imported`/`scene_saved` events reusing the Indexer's own pipeline.
    pub async fn reconcile(&self, items: &[ManifestItem], root: &Path, session: Option<&str>) -> crate::error::AppResult<ReconcileStats> {
        let ts = CatalogStore::now_ts();
        let live = self.catalog.live_snapshot_map()?;
        let mut seen = std::collections::HashSet::new();

        let mut upsert_rows = Vec::new();
        let mut reindex: Vec<ManifestItem> = Vec::new();
        let mut moves: Vec<(String, String)> = Vec::new(); // (from, to)
        let mut stats = ReconcileStats::default();

        for item in items {
            if item.is_folder.unwrap_or(false) {
                continue;
            }
            let path = normalize_path(&item.path);
            seen.insert(item.guid.clone());

            match live.get(&item.guid) {
                None => {
                    stats.added += 1;
                    upsert_rows.push(item.clone());
                    if Self::is_textual_or_scene(item) {
                        reindex.push(item.clone());
                    }
                }
                Some((old_path, old_hash, old_mtime, _old_size)) => {
                    let old_path_norm = normalize_path(old_path);
                    if old_path_norm != path {
                        stats.moved += 1;
                        upsert_rows.push(item.clone());
                        moves.push((old_path_norm, path.clone()));
                        if Self::is_textual_or_scene(item) {
                            reindex.push(item.clone());
                        }
                    } else {
                        let modified = match (&item.hash, old_hash) {
                            (Some(new_hash), Some(old_hash)) => new_hash != old_hash,
                            (None, None) => item.mtime != *old_mtime,
                            // Open question (preserved for compatibility): a hash on the
                            // incoming side with none stored, or vice versa, classifies as
                            // modified whenever the mtime differs — may over-reindex stable
                            // files on the first post-upgrade reconcile.
                            _ => item.mtime != *old_mtime,
                        };
                        if modified {
                            stats.modified += 1;
                            upsert_rows.push(item.clone());
                            self.vectors.delete_by_path(&path).await?;
                            if Self::is_textual_or_scene(item) {
                                reindex.push(item.clone());
                            }
                        }
                    }
                }
            }
        }

        let deleted_guids: Vec<String> = live
            .keys()
            .filter(|g| !seen.contains(*g))
            .cloned()
            .collect();
        stats.deleted = deleted_guids.len();

        let rows: Vec<crate::catalog::AssetRow> = upsert_rows
            .iter()
            .filter_map(|item| crate::catalog::AssetRow::from_json(&manifest_item_to_json(item)))
            .collect();
        self.catalog.upsert_assets(&rows, ts)?;
        if !deleted_guids.is_empty() {
            self.catalog.mark_deleted(&deleted_guids, ts)?;
        }

        for guid in &deleted_guids {
            if let Some((old_path, _, _, _)) = live.get(guid) {
                self.vectors.delete_by_path(&normalize_path(old_path)).await?;
            }
        }
        for (from, _to) in &moves {
            self.vectors.delete_by_path(from).await?;
        }

        for item in reindex {
            let path = normalize_path(&item.path);
            let body = if is_scene(&path) {
                manifest_item_to_json(&item)
            } else {
                json!({ "items": [manifest_item_to_json(&item)] })
            };
            let ty = if is_scene(&path) { "scene_saved" } else { "assets_imported" };
            self.indexer
                .handle_event(ty, session.map(str::to_string), body, root)
                .await?;
        }

        Ok(stats)
    }

    fn is_textual_or_scene(item: &ManifestItem) -> bool {
        is_textual(item.kind.as_deref(), &item.path) || is_scene(&item.path)
    }
}

fn manifest_item_to_json(item: &ManifestItem) -> serde_json::Value {
    json!({
        "guid": item.guid,
        "path": item.path,
        "kind": item.kind,
        "mtime": item.mtime,
        "size": item.size,
        "hash": item.hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_default_is_all_zero() {
        let stats = ReconcileStats::default();
        assert_eq!(stats, ReconcileStats { added: 0, deleted: 0, moved: 0, modified: 0 });
    }
}
