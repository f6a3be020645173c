//! Wire-level event envelope and manifest protocol types.

use serde::{Deserialize, Serialize};

/// Bit-exact on the transport. `source` is expected to be `"unity"`; envelopes from
/// any other source, or with an unrecognized `type`, are logged and ignored.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Envelope {
    pub v: i64,
    pub source: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub ts: i64,
    pub id: String,
    pub body: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

/// Types the transport layer is expected to ACK.
pub const ACKNOWLEDGED_TYPES: &[&str] = &[
    "assets_imported",
    "assets_deleted",
    "assets_moved",
    "scene_saved",
    "project_changed",
    "compile_started",
    "compile_finished",
    "will_save_assets",
    "hello",
];

pub fn is_acknowledged(ty: &str) -> bool {
    ACKNOWLEDGED_TYPES.contains(&ty)
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelloBody {
    #[serde(rename = "productGUID")]
    pub product_guid: Option<String>,
    #[serde(rename = "cloudProjectId")]
    pub cloud_project_id: Option<String>,
    #[serde(rename = "unityVersion")]
    pub unity_version: Option<String>,
    #[serde(rename = "dataPath")]
    pub data_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestItem {
    pub guid: String,
    pub path: String,
    pub kind: Option<String>,
    #[serde(rename = "isFolder")]
    pub is_folder: Option<bool>,
    pub mtime: Option<i64>,
    pub size: Option<i64>,
    pub hash: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestBeginBody {
    pub total: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestBatchBody {
    pub items: Vec<ManifestItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEndBody {
    pub total: usize,
}

/// Buffers `manifest_batch` payloads between a `manifest_begin` and `manifest_end`,
/// then hands the whole set to the Reconciler in one pass.
#[derive(Debug, Default)]
pub struct ManifestAccumulator {
    expected_total: Option<usize>,
    items: Vec<ManifestItem>,
}

impl ManifestAccumulator {
    pub fn begin(&mut self, total: usize) {
        self.expected_total = Some(total);
        self.items.clear();
    }

    pub fn batch(&mut self, mut items: Vec<ManifestItem>) {
        self.items.append(&mut items);
    }

    /// Returns the accumulated items and resets the accumulator.
    pub fn end(&mut self, _total: usize) -> Vec<ManifestItem> {
        self.expected_total = None;
        std::mem::take(&mut self.items)
    }

    pub fn is_collecting(&self) -> bool {
        self.expected_total.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_collects_across_batches_until_end() {
        let mut acc = ManifestAccumulator::default();
        acc.begin(3);
        acc.batch(vec![ManifestItem { guid: "a".into(), path: "A".into(), kind: None, is_folder: None, mtime: None, size: None, hash: None }]);
        acc.batch(vec![ManifestItem { guid: "b".into(), path: "B".into(), kind: None, is_folder: None, mtime: None, size: None, hash: None }]);
        assert!(acc.is_collecting());
        let items = acc.end(3);
        assert_eq!(items.len(), 2);
        assert!(!acc.is_collecting());
    }

    #[test]
    fn acknowledged_types_exclude_heartbeat_and_ack() {
        assert!(is_acknowledged("hello"));
        assert!(!is_acknowledged("hb"));
        assert!(!is_acknowledged("ack"));
    }
}
