/// Deterministic lexical embedder.
///
/// Hashes lowercase character trigrams into a fixed number of buckets and
/// L2-normalizes the result. Texts sharing vocabulary land close together
/// under cosine distance, which is all the local pipeline and its tests
/// need; a real model plugs in behind the same trait.
use std::hash::{DefaultHasher, Hash, Hasher};

use super::{Embedder, EmbedderError};

pub struct LexicalEmbedder {
    dimensions: usize,
}

impl LexicalEmbedder {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn bucket(&self, gram: &[char]) -> usize {
        let mut hasher = DefaultHasher::new();
        gram.hash(&mut hasher);
        (hasher.finish() % self.dimensions as u64) as usize
    }
}

impl Default for LexicalEmbedder {
    fn default() -> Self {
        Self { dimensions: 384 }
    }
}

impl Embedder for LexicalEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut embedding = vec![0.0f32; self.dimensions];

        let lower = text.to_lowercase();
        let chars: Vec<char> = lower.chars().collect();

        if chars.len() < 3 {
            // Too short for trigrams: hash the whole text into one bucket
            // so even tiny inputs produce a usable unit vector.
            embedding[self.bucket(&chars)] = 1.0;
            return Ok(embedding);
        }

        for gram in chars.windows(3) {
            embedding[self.bucket(gram)] += 1.0;
        }

        // L2 normalize
        let norm_sq: f32 = embedding.iter().map(|v| v * v).sum();
        if norm_sq > 0.0 {
            let inv = 1.0 / norm_sq.sqrt();
            for v in &mut embedding {
                *v *= inv;
            }
        }

        Ok(embedding)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
