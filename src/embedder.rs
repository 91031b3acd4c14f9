//! Embedding provider abstraction.
//!
//! The engine does not prescribe an embedding algorithm — any producer of
//! fixed-dimension vectors works. Callers inject an [`Embedder`]
//! implementation (typically backed by a local model server); the crate
//! ships [`HashingEmbedder`], a deterministic token-hashing fallback used
//! in tests and offline setups.

use sha2::{Digest, Sha256};

/// Produces fixed-dimension embedding vectors from text.
///
/// Implementations must be deterministic for identical input within a
/// single index lifetime; the dimension reported by [`Embedder::dimension`]
/// must match the length of every vector returned by [`Embedder::embed`].
pub trait Embedder: Send + Sync {
    /// Dimension of the vectors this embedder produces
    fn dimension(&self) -> usize;

    /// Compute an embedding vector for the given text
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Deterministic bag-of-tokens embedder.
///
/// Each whitespace-separated token is hashed into one of `dimension`
/// buckets and the resulting count vector is L2-normalized. This is not a
/// semantic model — it captures token overlap only — but it is fast,
/// dependency-free, and produces stable vectors for tests and offline use.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    /// A zero dimension is clamped to 1: `bucket` reduces modulo the
    /// dimension, which must never be zero.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn bucket(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(prefix) % self.dimension as u64) as usize
    }
}

impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text.split_whitespace() {
            vector[self.bucket(&token.to_lowercase())] += 1.0;
        }

        let magnitude: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }
        vector
    }
}
