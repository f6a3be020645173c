//! Embedded relational catalog: events, assets, asset dependencies, scenes,
//! and per-project index-state snapshots.

use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::error::{AppError, AppResult};

const MAX_DEPS_PER_ASSET: usize = 200;

#[derive(Debug, Clone, Default)]
pub struct AssetRow {
    pub guid: String,
    pub path: String,
    pub kind: Option<String>,
    pub mtime: Option<i64>,
    pub size: Option<i64>,
    pub hash: Option<String>,
    pub deps: Vec<String>,
}

impl AssetRow {
    /// Coerces `guid` from `guid`/`objectId`/`assetGuid` and `hash` from `hash`/`sha256`,
    /// matching the legacy field-name tolerance the catalog is required to accept.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        let guid = value
            .get("guid")
            .or_else(|| value.get("objectId"))
            .or_else(|| value.get("assetGuid"))
            .and_then(|v| v.as_str())?
            .to_string();
        let path = value.get("path").and_then(|v| v.as_str())?.to_string();
        let hash = value
            .get("hash")
            .or_else(|| value.get("sha256"))
            .and_then(|v| v.as_str())
            .map(normalize_guid_no_op)
            .map(|s| s.to_string());
        let deps = value
            .get("deps")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|d| d.as_str().map(str::to_string))
                    .take(MAX_DEPS_PER_ASSET)
                    .collect()
            })
            .unwrap_or_default();
        Some(AssetRow {
            guid,
            path: normalize_path(&path),
            kind: value.get("kind").and_then(|v| v.as_str()).map(str::to_string),
            mtime: value.get("mtime").and_then(|v| v.as_i64()),
            size: value.get("size").and_then(|v| v.as_i64()),
            hash,
            deps,
        })
    }
}

fn normalize_guid_no_op(s: &str) -> &str {
    s
}

/// Forward-slash normalized, no leading `./`.
pub fn normalize_path(path: &str) -> String {
    let s = path.replace('\\', "/");
    s.strip_prefix("./").unwrap_or(&s).to_string()
}

pub fn normalize_guid(guid: &str) -> String {
    guid.trim_matches(|c| c == '{' || c == '}').to_lowercase()
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IndexState {
    pub project_id: String,
    pub snapshot_sha: String,
    pub total_items: i64,
    pub qdrant_count: Option<i64>,
    pub completed_at: i64,
}

/// 16-hex-char prefix of SHA-256 over the normalized project root path.
pub fn project_id_for_root(root: &str) -> String {
    let normalized = normalize_path(root);
    let digest = Sha256::digest(normalized.as_bytes());
    hex::encode(&digest[..8])
}

pub struct CatalogStore {
    conn: parking_lot::Mutex<Connection>,
}

impl CatalogStore {
    pub fn open(data_dir: &Path) -> AppResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("catalog.sqlite3");
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::migrate(&conn)?;
        Ok(Self { conn: parking_lot::Mutex::new(conn) })
    }

    fn migrate(conn: &Connection) -> AppResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts INTEGER NOT NULL,
                session TEXT,
                type TEXT NOT NULL,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_ts ON events(ts DESC);

            CREATE TABLE IF NOT EXISTS assets (
                guid TEXT PRIMARY KEY,
                path TEXT NOT NULL,
                kind TEXT,
                mtime INTEGER,
                size INTEGER,
                hash TEXT,
                deleted INTEGER NOT NULL DEFAULT 0,
                updated_ts INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_assets_path ON assets(path);

            CREATE TABLE IF NOT EXISTS asset_deps (
                guid TEXT NOT NULL,
                dep TEXT NOT NULL,
                PRIMARY KEY (guid, dep)
            );

            CREATE TABLE IF NOT EXISTS scenes (
                guid TEXT PRIMARY KEY,
                path TEXT NOT NULL,
                updated_ts INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS index_state (
                project_id TEXT PRIMARY KEY,
                snapshot_sha TEXT NOT NULL,
                total_items INTEGER NOT NULL,
                qdrant_count INTEGER,
                completed_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Single transaction. Overwrites `path` unconditionally; overwrites
    /// `kind`/`mtime`/`size`/`hash` only when the incoming value is non-null.
    /// Rows missing `guid` or `path` are skipped by the caller (`AssetRow::from_json`).
    pub fn upsert_assets(&self, rows: &[AssetRow], ts: i64) -> AppResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for row in rows {
            tx.execute(
                r#"
                INSERT INTO assets (guid, path, kind, mtime, size, hash, deleted, updated_ts)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)
                ON CONFLICT(guid) DO UPDATE SET
                    path = excluded.path,
                    kind = COALESCE(excluded.kind, assets.kind),
                    mtime = COALESCE(excluded.mtime, assets.mtime),
                    size = COALESCE(excluded.size, assets.size),
                    hash = COALESCE(excluded.hash, assets.hash),
                    deleted = 0,
                    updated_ts = excluded.updated_ts
                "#,
                params![row.guid, row.path, row.kind, row.mtime, row.size, row.hash, ts],
            )?;

            for dep in row.deps.iter().take(MAX_DEPS_PER_ASSET) {
                tx.execute(
                    "INSERT OR IGNORE INTO asset_deps (guid, dep) VALUES (?1, ?2)",
                    params![row.guid, dep],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn mark_deleted(&self, guids: &[String], ts: i64) -> AppResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for guid in guids {
            tx.execute(
                "UPDATE assets SET deleted = 1, updated_ts = ?2 WHERE guid = ?1",
                params![guid, ts],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn upsert_scene(&self, guid: &str, path: &str, ts: i64) -> AppResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO scenes (guid, path, updated_ts) VALUES (?1, ?2, ?3)
            ON CONFLICT(guid) DO UPDATE SET path = excluded.path, updated_ts = excluded.updated_ts
            "#,
            params![guid, normalize_path(path), ts],
        )?;
        Ok(())
    }

    /// Live `{guid -> (path, hash, mtime, size)}`, used by the Reconciler's diff pass.
    pub fn live_snapshot_map(&self) -> AppResult<std::collections::HashMap<String, (String, Option<String>, Option<i64>, Option<i64>)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT guid, path, hash, mtime, size FROM assets WHERE deleted = 0",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, Option<i64>>(3)?,
                r.get::<_, Option<i64>>(4)?,
            ))
        })?;
        let mut map = std::collections::HashMap::new();
        for row in rows {
            let (guid, path, hash, mtime, size) = row?;
            map.insert(guid, (path, hash, mtime, size));
        }
        Ok(map)
    }

    /// Deterministic digest over `(guid, version)` pairs for all live assets, sorted by
    /// `guid`, where `version = hash if present else "<mtime>:<size>"`.
    pub fn snapshot(&self) -> AppResult<(String, i64)> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT guid, hash, mtime, size FROM assets WHERE deleted = 0 ORDER BY guid ASC",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, Option<String>>(1)?,
                r.get::<_, Option<i64>>(2)?,
                r.get::<_, Option<i64>>(3)?,
            ))
        })?;

        let mut hasher = Sha256::new();
        let mut total = 0i64;
        for row in rows {
            let (guid, hash, mtime, size) = row?;
            let version = hash.unwrap_or_else(|| {
                format!("{}:{}", mtime.unwrap_or_default(), size.unwrap_or_default())
            });
            hasher.update(guid.as_bytes());
            hasher.update(b"\0");
            hasher.update(version.as_bytes());
            hasher.update(b"\n");
            total += 1;
        }
        if total == 0 {
            return Ok((String::new(), 0));
        }
        Ok((hex::encode(hasher.finalize()), total))
    }

    pub fn write_index_state(&self, state: &IndexState) -> AppResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO index_state (project_id, snapshot_sha, total_items, qdrant_count, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(project_id) DO UPDATE SET
                snapshot_sha = excluded.snapshot_sha,
                total_items = excluded.total_items,
                qdrant_count = excluded.qdrant_count,
                completed_at = excluded.completed_at
            "#,
            params![state.project_id, state.snapshot_sha, state.total_items, state.qdrant_count, state.completed_at],
        )?;
        Ok(())
    }

    pub fn read_index_state(&self, project_id: &str) -> AppResult<Option<IndexState>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT project_id, snapshot_sha, total_items, qdrant_count, completed_at FROM index_state WHERE project_id = ?1",
            params![project_id],
            |r| {
                Ok(IndexState {
                    project_id: r.get(0)?,
                    snapshot_sha: r.get(1)?,
                    total_items: r.get(2)?,
                    qdrant_count: r.get(3)?,
                    completed_at: r.get(4)?,
                })
            },
        )
        .optional()
        .map_err(AppError::from)
    }

    /// Never fails silently — any failure propagates to the caller.
    pub fn log_event(&self, ts: i64, session: Option<&str>, ty: &str, body: &serde_json::Value) -> AppResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO events (ts, session, type, body) VALUES (?1, ?2, ?3, ?4)",
            params![ts, session, ty, body.to_string()],
        )?;
        Ok(())
    }

    /// Row counts across user tables, used by `wipe_all` to report what was zeroed.
    pub fn table_row_counts(&self) -> AppResult<Vec<(String, i64)>> {
        let conn = self.conn.lock();
        let tables = ["events", "assets", "asset_deps", "scenes", "index_state"];
        let mut counts = Vec::with_capacity(tables.len());
        for table in tables {
            let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?;
            counts.push((table.to_string(), count));
        }
        Ok(counts)
    }

    /// Truncates every user table in one exclusive transaction, then checkpoints and
    /// vacuums. Used by the Maintenance Coordinator's `wipe_all`.
    pub fn truncate_all(&self) -> AppResult<Vec<(String, i64)>> {
        let counts = self.table_row_counts()?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for (table, _) in &counts {
            tx.execute(&format!("DELETE FROM {}", table), [])?;
        }
        tx.execute("DELETE FROM sqlite_sequence", []).ok();
        tx.commit()?;
        drop(conn);
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE); VACUUM;")?;
        Ok(counts)
    }

    pub fn now_ts() -> i64 {
        Utc::now().timestamp()
    }
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, CatalogStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn empty_catalog_has_empty_snapshot() {
        let (_dir, store) = open_temp();
        let (sha, total) = store.snapshot().unwrap();
        assert_eq!(sha, "");
        assert_eq!(total, 0);
    }

    #[test]
    fn upsert_then_delete_changes_snapshot() {
        let (_dir, store) = open_temp();
        let row = AssetRow {
            guid: "a".into(),
            path: "Assets/S.cs".into(),
            kind: Some("MonoScript".into()),
            hash: Some("H1".into()),
            ..Default::default()
        };
        store.upsert_assets(&[row], 1).unwrap();
        let (sha1, total1) = store.snapshot().unwrap();
        assert_eq!(total1, 1);
        assert!(!sha1.is_empty());

        store.mark_deleted(&["a".to_string()], 2).unwrap();
        let (sha2, total2) = store.snapshot().unwrap();
        assert_eq!(total2, 0);
        assert_ne!(sha1, sha2);
    }

    #[test]
    fn snapshot_stable_when_live_set_unchanged() {
        let (_dir, store) = open_temp();
        let row = AssetRow {
            guid: "a".into(),
            path: "Assets/S.cs".into(),
            hash: Some("H1".into()),
            ..Default::default()
        };
        store.upsert_assets(&[row.clone()], 1).unwrap();
        let (sha1, _) = store.snapshot().unwrap();
        store.upsert_assets(&[row], 2).unwrap();
        let (sha2, _) = store.snapshot().unwrap();
        assert_eq!(sha1, sha2);
    }

    #[test]
    fn path_normalization_strips_backslashes_and_dot_slash() {
        assert_eq!(normalize_path("./Assets\\S.cs"), "Assets/S.cs");
    }

    #[test]
    fn asset_row_from_json_coerces_legacy_fields() {
        let v = serde_json::json!({"assetGuid": "a", "path": "Assets/S.cs", "sha256": "H1"});
        let row = AssetRow::from_json(&v).unwrap();
        assert_eq!(row.guid, "a");
        assert_eq!(row.hash.as_deref(), Some("H1"));
    }

    #[test]
    fn asset_row_from_json_requires_guid_and_path() {
        let v = serde_json::json!({"path": "Assets/S.cs"});
        assert!(AssetRow::from_json(&v).is_none());
    }
}
