//! Hashing TF-IDF embedder
//!
//! Default capability: fast, deterministic, no network or model files.
//! Uses the feature-hashing trick with signed buckets so token collisions
//! tend to cancel rather than pile up.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::embedding::Embedder;
use crate::error::Result;

pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| s.len() > 1)
            .map(String::from)
            .collect()
    }

    /// Bucket index and sign for a token
    fn hash_feature(token: &str, dimensions: usize) -> (usize, f32) {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        token.hash(&mut hasher);
        let h = hasher.finish();
        let idx = (h as usize) % dimensions;
        let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
        (idx, sign)
    }

    fn accumulate(vector: &mut [f32], token: &str, weight: f32) {
        let (idx, sign) = Self::hash_feature(token, vector.len());
        vector[idx] += weight * sign;
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = Self::tokenize(text);
        let mut vector = vec![0.0_f32; self.dimensions];

        if tokens.is_empty() {
            return Ok(vector);
        }

        let doc_len = tokens.len() as f32;
        let mut counts: HashMap<&str, f32> = HashMap::new();
        for token in &tokens {
            *counts.entry(token.as_str()).or_insert(0.0) += 1.0;
        }

        for (token, count) in counts {
            // log-damped term frequency; token length stands in for rarity
            let tf = (1.0 + count / doc_len).ln();
            let idf = 1.0 + token.len() as f32 * 0.1;
            Self::accumulate(&mut vector, token, tf * idf);
        }

        // Bigrams capture a little word order, at half weight
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            Self::accumulate(&mut vector, &bigram, 0.5);
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }

        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "hash"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn deterministic_for_same_text() {
        let embedder = HashEmbedder::new(384);
        let a = embedder.embed("hello world").unwrap();
        let b = embedder.embed("hello world").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn related_text_scores_higher() {
        let embedder = HashEmbedder::new(384);
        let fox = embedder
            .embed("the quick brown fox jumps over the lazy dog")
            .unwrap();
        let fox2 = embedder
            .embed("a fast brown fox leaps over a sleepy dog")
            .unwrap();
        let physics = embedder.embed("quantum physics and thermodynamics").unwrap();

        assert!(cosine_similarity(&fox, &fox2) > cosine_similarity(&fox, &physics));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let embedder = HashEmbedder::new(128);
        let v = embedder.embed("").unwrap();
        assert_eq!(v.len(), 128);
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn output_is_l2_normalized() {
        let embedder = HashEmbedder::new(384);
        let v = embedder
            .embed("this is a test sentence with several words")
            .unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.001);
    }
}
