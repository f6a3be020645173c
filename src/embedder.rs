//! Stateless batch embedding with a declared dimension and normalization contract.

use fastembed::{InitOptions, TextEmbedding};
use parking_lot::Mutex;

use crate::error::{AppError, AppResult};

const ZERO_VECTOR_L1_THRESHOLD: f32 = 1e-8;

pub struct EmbeddingManager {
    model: Mutex<Option<TextEmbedding>>,
    dim: usize,
}

impl EmbeddingManager {
    pub fn new(dim: usize) -> Self {
        Self { model: Mutex::new(None), dim }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    fn ensure_model(model: &mut Option<TextEmbedding>) -> AppResult<&TextEmbedding> {
        if model.is_none() {
            let loaded = TextEmbedding::try_new(InitOptions::default())
                .map_err(|e| AppError::EmbeddingInvalid(format!("model init failed: {}", e)))?;
            *model = Some(loaded);
        }
        Ok(model.as_ref().expect("just initialized"))
    }

    /// `embed(texts) -> vectors`, `len(vectors) == len(texts)`, each vector L2-normalized
    /// and of length `dim`. Fails with `EmbeddingInvalid` if any vector is effectively zero.
    /// Safe to call concurrently; the model warms lazily on first call.
    pub async fn embed(&self, texts: Vec<String>) -> AppResult<Vec<Vec<f32>>> {
        let dim = self.dim;
        let vectors = tokio::task::block_in_place(|| {
            let mut guard = self.model.lock();
            let embedder = Self::ensure_model(&mut guard)?;
            embedder
                .embed(texts.clone(), None)
                .map_err(|e| AppError::EmbeddingInvalid(e.to_string()))
        })?;

        if vectors.len() != texts.len() {
            return Err(AppError::EmbeddingInvalid(format!(
                "vector count {} != text count {}",
                vectors.len(),
                texts.len()
            )));
        }

        let mut normalized = Vec::with_capacity(vectors.len());
        for v in vectors {
            if v.len() != dim {
                return Err(AppError::EmbeddingInvalid(format!(
                    "vector length {} != declared dimension {}",
                    v.len(),
                    dim
                )));
            }
            let norm = l2_normalize(v);
            let l1: f32 = norm.iter().map(|x| x.abs()).sum();
            if l1 < ZERO_VECTOR_L1_THRESHOLD {
                return Err(AppError::EmbeddingInvalid("effectively zero vector".to_string()));
            }
            normalized.push(norm);
        }
        Ok(normalized)
    }
}

fn l2_normalize(v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return v;
    }
    v.into_iter().map(|x| x / norm).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_normalize_unit_length() {
        let v = l2_normalize(vec![3.0, 4.0]);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn l2_normalize_zero_vector_stays_zero() {
        let v = l2_normalize(vec![0.0, 0.0]);
        assert_eq!(v, vec![0.0, 0.0]);
    }
}
