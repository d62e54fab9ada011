//! Pluggable embedding capability
//!
//! The embedder is injected as a trait object with a single essential
//! method: a deterministic `text -> fixed-length vector` function that may
//! fail. Its absence degrades recall to lexical-only; it never fails
//! startup.

mod hash;

pub use hash::HashEmbedder;

use std::sync::Arc;

use crate::error::{ChronicleError, Result};
use crate::types::EmbeddingConfig;

/// Trait for embedding generators
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embedding vector length
    fn dimensions(&self) -> usize;

    /// Model name, persisted next to each index entry
    fn model_name(&self) -> &str;
}

/// Create an embedder from configuration
///
/// Returns `Ok(None)` for `"none"`: the caller operates lexical-only.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Option<Arc<dyn Embedder>>> {
    match config.model.as_str() {
        "hash" => Ok(Some(Arc::new(HashEmbedder::new(config.dimensions)))),
        "none" => Ok(None),
        other => Err(ChronicleError::Config(format!(
            "Unknown embedding model: '{}'. Use 'hash' or 'none'",
            other
        ))),
    }
}

/// Cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_basics() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &[1.0, 0.0, 0.0]) - 1.0).abs() < 0.001);
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).abs() < 0.001);
        assert!((cosine_similarity(&a, &[-1.0, 0.0, 0.0]) + 1.0).abs() < 0.001);
    }

    #[test]
    fn cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn factory_none_means_lexical_only() {
        let embedder = create_embedder(&EmbeddingConfig::none()).unwrap();
        assert!(embedder.is_none());
    }

    #[test]
    fn factory_rejects_unknown_model() {
        let config = EmbeddingConfig {
            model: "bert-large".to_string(),
            dimensions: 1024,
        };
        assert!(matches!(
            create_embedder(&config),
            Err(ChronicleError::Config(_))
        ));
    }
}
