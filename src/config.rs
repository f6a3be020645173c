use serde::{Deserialize, Serialize};

/// Asset-kind discriminants treated as textual by the indexing pipeline.
pub const TEXTUAL_KINDS: &[&str] = &["MonoScript", "TextAsset"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub listen_addr: String,
    pub data_dir: String,

    /// Base URL of the vector backend's REST surface.
    pub vector_base_url: String,
    /// Collection name used on the vector backend.
    pub vector_collection: String,
    /// Declared embedding dimension; must match the embedder's output.
    pub embedding_dim: usize,
    /// Deadline for the vector backend readiness probe at boot.
    pub vector_ready_timeout_ms: u64,

    /// Chunker defaults — scripts.
    pub script_target_tokens: usize,
    pub script_overlap_lines: usize,
    /// Chunker defaults — scenes.
    pub scene_target_tokens: usize,
    pub scene_overlap_lines: usize,

    /// Number of read-retry attempts for `NotFoundTransient` errors.
    pub read_retry_attempts: u32,
    /// Base delay for the read-retry exponential backoff.
    pub read_retry_base_ms: u64,

    /// Settling delay observed by `pause()` before treating in-flight work as drained.
    pub pause_settle_ms: u64,
    /// Minimum fence held by the Maintenance Coordinator during `wipe_all`.
    pub maintenance_fence_ms: u64,

    /// Heartbeat suspension window granted on `compile_started`.
    pub compile_started_suspend_secs: u64,
    /// Additional suspension window granted on `compile_finished`.
    pub compile_finished_suspend_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let port = std::env::var("MOVESIA_PORT").unwrap_or_else(|_| "9721".to_string());

        let data_dir = std::env::var("MOVESIA_DATA_DIR").unwrap_or_else(|_| {
            dirs::data_local_dir()
                .map(|d| d.join("movesia-indexer").to_string_lossy().to_string())
                .unwrap_or_else(|| ".movesia-data".to_string())
        });

        fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
            std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
        }

        Self {
            listen_addr: format!("127.0.0.1:{}", port),
            data_dir,
            vector_base_url: std::env::var("MOVESIA_VECTOR_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:6333".to_string()),
            vector_collection: std::env::var("MOVESIA_VECTOR_COLLECTION")
                .unwrap_or_else(|_| "movesia".to_string()),
            embedding_dim: env_or("MOVESIA_EMBEDDING_DIM", 384),
            vector_ready_timeout_ms: env_or("MOVESIA_VECTOR_READY_TIMEOUT_MS", 15_000),
            script_target_tokens: env_or("MOVESIA_SCRIPT_TARGET_TOKENS", 500),
            script_overlap_lines: env_or("MOVESIA_SCRIPT_OVERLAP_LINES", 20),
            scene_target_tokens: env_or("MOVESIA_SCENE_TARGET_TOKENS", 700),
            scene_overlap_lines: env_or("MOVESIA_SCENE_OVERLAP_LINES", 30),
            read_retry_attempts: env_or("MOVESIA_READ_RETRY_ATTEMPTS", 5),
            read_retry_base_ms: env_or("MOVESIA_READ_RETRY_BASE_MS", 150),
            pause_settle_ms: env_or("MOVESIA_PAUSE_SETTLE_MS", 100),
            maintenance_fence_ms: env_or("MOVESIA_MAINTENANCE_FENCE_MS", 200),
            compile_started_suspend_secs: env_or("MOVESIA_COMPILE_STARTED_SUSPEND_SECS", 120),
            compile_finished_suspend_secs: env_or("MOVESIA_COMPILE_FINISHED_SUSPEND_SECS", 30),
        }
    }
}
