//! Pure functions: stable point identity and overlapping line-window chunking.

use uuid::Uuid;

/// Fixed repository-wide namespace for point-ID derivation. Never regenerate this —
/// doing so would change every previously-issued point ID.
pub const POINT_NAMESPACE: Uuid = Uuid::from_u128(0x6f70_6f69_6e74_5f6e_616d_6573_7061_6365);

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;
const TOKENS_PER_LINE: usize = 4;
const MIN_CHUNK_LINES: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Script,
    Scene,
}

#[derive(Debug, Clone)]
pub struct ChunkParams {
    pub target_tokens: usize,
    pub overlap_lines: usize,
}

impl ChunkParams {
    pub fn for_kind(kind: AssetKind, cfg: &crate::config::AppConfig) -> Self {
        match kind {
            AssetKind::Script => ChunkParams {
                target_tokens: cfg.script_target_tokens,
                overlap_lines: cfg.script_overlap_lines,
            },
            AssetKind::Scene => ChunkParams {
                target_tokens: cfg.scene_target_tokens,
                overlap_lines: cfg.scene_overlap_lines,
            },
        }
    }

    fn lines_per_chunk(&self) -> usize {
        (self.target_tokens / TOKENS_PER_LINE).max(MIN_CHUNK_LINES)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 1-based, inclusive.
    pub line_start: usize,
    /// 1-based, inclusive.
    pub line_end: usize,
    pub text: String,
    pub fingerprint_hex: String,
    pub chunk_key: String,
    pub point_id: Uuid,
}

/// FNV-1a 32-bit fingerprint of `text`, rendered as lowercase hex.
pub fn fnv1a_hex(text: &str) -> String {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in text.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    format!("{:08x}", hash)
}

/// Builds the stable chunk key `"<absPath>#<lineStart>-<lineEnd>#<fnv32hex>"`.
pub fn chunk_key(abs_path: &str, line_start: usize, line_end: usize, fingerprint_hex: &str) -> String {
    format!("{}#{}-{}#{}", abs_path, line_start, line_end, fingerprint_hex)
}

/// UUID v5 point ID derived from a chunk key under the fixed repository namespace.
pub fn point_id(chunk_key: &str) -> Uuid {
    Uuid::new_v5(&POINT_NAMESPACE, chunk_key.as_bytes())
}

/// Splits `text` into overlapping line-window chunks. Returns an empty vec for an
/// empty file (a zero-length chunk is suppressed, never embedded).
pub fn chunk_text(text: &str, abs_path: &str, params: &ChunkParams) -> Vec<Chunk> {
    if text.is_empty() {
        return Vec::new();
    }

    let normalized = text.replace("\r\n", "\n");
    let lines: Vec<&str> = normalized.split('\n').collect();
    let n = lines.len();
    let lines_per_chunk = params.lines_per_chunk();
    let advance = lines_per_chunk.saturating_sub(params.overlap_lines).max(1);

    let mut chunks = Vec::new();
    let mut i = 0usize;
    loop {
        let end = (i + lines_per_chunk).min(n);
        let window = &lines[i..end];
        let chunk_text = window.join("\n");
        let line_start = i + 1;
        let line_end = end;
        let fingerprint_hex = fnv1a_hex(&chunk_text);
        let key = chunk_key(abs_path, line_start, line_end, &fingerprint_hex);
        let id = point_id(&key);
        chunks.push(Chunk {
            line_start,
            line_end,
            text: chunk_text,
            fingerprint_hex,
            chunk_key: key,
            point_id: id,
        });

        if end >= n {
            break;
        }
        i += advance;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(target_tokens: usize, overlap_lines: usize) -> ChunkParams {
        ChunkParams { target_tokens, overlap_lines }
    }

    #[test]
    fn empty_file_yields_no_chunks() {
        let chunks = chunk_text("", "/abs/S.cs", &params(500, 20));
        assert!(chunks.is_empty());
    }

    #[test]
    fn file_shorter_than_minimum_window_is_one_chunk() {
        let text = (1..=10).map(|i| format!("line{}", i)).collect::<Vec<_>>().join("\n");
        let chunks = chunk_text(&text, "/abs/S.cs", &params(500, 20));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].line_start, 1);
        assert_eq!(chunks[0].line_end, 10);
    }

    #[test]
    fn cold_ingest_80_lines_is_one_chunk() {
        let text = (1..=80).map(|i| format!("line{}", i)).collect::<Vec<_>>().join("\n");
        let chunks = chunk_text(&text, "/abs/S.cs", &params(500, 20));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].line_end, 80);
    }

    #[test]
    fn edit_to_200_lines_is_two_chunks_with_overlap() {
        let text = (1..=200).map(|i| format!("line{}", i)).collect::<Vec<_>>().join("\n");
        let chunks = chunk_text(&text, "/abs/S.cs", &params(500, 20));
        assert_eq!(chunks.len(), 2);
        assert_eq!((chunks[0].line_start, chunks[0].line_end), (1, 125));
        assert_eq!((chunks[1].line_start, chunks[1].line_end), (106, 200));
    }

    #[test]
    fn determinism() {
        let text = "a\nb\nc\nd\ne\n".repeat(10);
        let a = chunk_text(&text, "/abs/X.cs", &params(500, 20));
        let b = chunk_text(&text, "/abs/X.cs", &params(500, 20));
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_paths_with_identical_content_get_distinct_ids() {
        let text = "same content\nacross files\n";
        let a = chunk_text(text, "/abs/A.cs", &params(500, 20));
        let b = chunk_text(text, "/abs/B.cs", &params(500, 20));
        assert_ne!(a[0].point_id, b[0].point_id);
        assert_eq!(a[0].fingerprint_hex, b[0].fingerprint_hex);
    }

    #[test]
    fn fnv1a_known_vector() {
        // FNV-1a 32-bit of the empty string is the offset basis itself.
        assert_eq!(fnv1a_hex(""), format!("{:08x}", FNV_OFFSET_BASIS));
    }
}
