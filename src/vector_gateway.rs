//! Thin HTTP client over a Qdrant-compatible REST surface.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::catalog::normalize_guid;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: VectorPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPayload {
    pub rel_path: String,
    pub range: String,
    pub file_hash: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    pub updated_ts: i64,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoredPoint {
    pub id: Value,
    pub score: f32,
    pub payload: Value,
}

pub struct VectorGateway {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    dim: usize,
}

impl VectorGateway {
    pub fn new(base_url: String, collection: String, dim: usize) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self { client, base_url, collection, dim }
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, suffix)
    }

    /// Polls the readiness probe until success or `timeout` elapses.
    pub async fn wait_ready(&self, timeout: Duration) -> AppResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let probe = self.client.get(format!("{}/readyz", self.base_url)).send().await;
            if let Ok(resp) = probe {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AppError::VectorBackendUnavailable(
                    "readiness probe timed out".to_string(),
                ));
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    /// Idempotent: creates the collection on first use with cosine distance and the
    /// declared vector size; a 409 is accepted as success. Ensures keyword payload
    /// indices on `rel_path` and `guid` afterward.
    pub async fn ensure_collection(&self) -> AppResult<()> {
        let body = json!({
            "vectors": { "size": self.dim, "distance": "Cosine" },
            "on_disk_payload": false,
        });
        let resp = self.client.put(self.url("")).json(&body).send().await?;
        if !resp.status().is_success() && resp.status().as_u16() != 409 {
            let text = resp.text().await.unwrap_or_default();
            return Err(AppError::VectorBackendUnavailable(text));
        }

        for field in ["rel_path", "guid"] {
            let index_body = json!({ "field_name": field, "field_schema": "keyword" });
            let resp = self
                .client
                .put(self.url("/index"))
                .json(&index_body)
                .send()
                .await?;
            if !resp.status().is_success() && resp.status().as_u16() != 409 {
                let text = resp.text().await.unwrap_or_default();
                return Err(AppError::VectorBackendUnavailable(text));
            }
        }
        Ok(())
    }

    /// Current point count reported by the collection info endpoint, used to
    /// populate `qdrant_count` on `complete` statuses and `IndexState` snapshots.
    /// Tolerant of backend failure: returns `None` rather than aborting the event.
    pub async fn count_points(&self) -> Option<i64> {
        let resp = self.client.get(self.url("")).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let parsed: Value = resp.json().await.ok()?;
        parsed["result"]["points_count"].as_i64()
    }

    /// One request per batch; atomic from the caller's perspective.
    pub async fn upsert_points(&self, points: &[VectorPoint]) -> AppResult<()> {
        if points.is_empty() {
            return Ok(());
        }
        let body = json!({ "points": points });
        let resp = self
            .client
            .put(format!("{}?wait=true", self.url("/points")))
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AppError::VectorBackendUnavailable(text));
        }
        Ok(())
    }

    /// Scrolls the collection for every point ID whose payload `rel_path` matches
    /// exactly, then deletes by explicit IDs with `wait=true`.
    pub async fn delete_by_path(&self, rel_path: &str) -> AppResult<()> {
        let rel_path = normalize_rel_path(rel_path);
        let ids = self.scroll_ids_by_filter(json!({
            "must": [{ "key": "rel_path", "match": { "value": rel_path } }]
        }))
        .await?;
        self.delete_by_ids(&ids).await
    }

    /// Filter-based delete with `wait=true`; `guid` lowercased and brace-stripped.
    pub async fn delete_by_guid(&self, guid: &str) -> AppResult<()> {
        let guid = normalize_guid(guid);
        let body = json!({
            "filter": { "must": [{ "key": "guid", "match": { "value": guid } }] }
        });
        let resp = self
            .client
            .post(format!("{}?wait=true", self.url("/points/delete")))
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AppError::VectorBackendUnavailable(text));
        }
        Ok(())
    }

    pub async fn delete_by_ids(&self, ids: &[Value]) -> AppResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let body = json!({ "points": ids });
        let resp = self
            .client
            .post(format!("{}?wait=true", self.url("/points/delete")))
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AppError::VectorBackendUnavailable(text));
        }
        Ok(())
    }

    async fn scroll_ids_by_filter(&self, filter: Value) -> AppResult<Vec<Value>> {
        let mut ids = Vec::new();
        let mut offset: Option<Value> = None;
        loop {
            let mut body = json!({
                "filter": filter,
                "limit": 256,
                "with_payload": false,
                "with_vector": false,
            });
            if let Some(off) = offset.clone() {
                body["offset"] = off;
            }
            let resp = self.client.post(self.url("/points/scroll")).json(&body).send().await?;
            if !resp.status().is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(AppError::VectorBackendUnavailable(text));
            }
            let parsed: Value = resp.json().await?;
            let points = parsed["result"]["points"].as_array().cloned().unwrap_or_default();
            if points.is_empty() {
                break;
            }
            for p in &points {
                if let Some(id) = p.get("id") {
                    ids.push(id.clone());
                }
            }
            let next = parsed["result"]["next_page_offset"].clone();
            if next.is_null() {
                break;
            }
            offset = Some(next);
        }
        Ok(ids)
    }

    pub async fn search_top_k(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<Value>,
        threshold: Option<f32>,
    ) -> AppResult<Vec<ScoredPoint>> {
        let mut body = json!({
            "vector": vector,
            "limit": k,
            "with_payload": true,
        });
        if let Some(f) = filter {
            body["filter"] = f;
        }
        if let Some(t) = threshold {
            body["score_threshold"] = json!(t);
        }
        let resp = self.client.post(self.url("/points/search")).json(&body).send().await?;
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AppError::VectorBackendUnavailable(text));
        }
        let parsed: Value = resp.json().await?;
        let result = parsed["result"].as_array().cloned().unwrap_or_default();
        let points = result
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect();
        Ok(points)
    }
}

/// Backslashes -> slashes, strip leading `./`.
pub fn normalize_rel_path(rel_path: &str) -> String {
    crate::catalog::normalize_path(rel_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_rel_path_strips_backslashes_and_dot_slash() {
        assert_eq!(normalize_rel_path("./Assets\\S.cs"), "Assets/S.cs");
    }
}
