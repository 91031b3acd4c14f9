//! Embedding store and similarity index.
//!
//! Holds the full set of (file, vector) pairs and a rebuildable in-memory
//! index over them. The index is derived state: it is reconstructed in
//! full from the persisted embeddings whenever the embedding set changes
//! and is never authoritative.
//!
//! ## Consistency model
//!
//! Every successful [`EmbeddingIndex::put`] rebuilds the index
//! synchronously before returning, so a caller that stores an embedding
//! observes it in the very next query. There is no incremental update
//! path — full rebuild on every write is an accepted O(n) cost at
//! moderate file-set sizes, traded for read-after-write consistency.
//! Writers are serialized among themselves; readers take a cheap shared
//! lock and may observe the previous index while a rebuild is in flight.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::embedder::Embedder;
use crate::store::types::{EmbeddingRecord, StoreError};
use crate::store::FileStore;

/// Errors that can occur during index operations
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type IndexResult<T> = Result<T, IndexError>;

/// One dense index slot: a file identity and its embedding vector
#[derive(Debug, Clone)]
pub struct IndexSlot {
    pub file_id: i64,
    pub path: String,
    pub vector: Vec<f32>,
}

/// Outcome of a full index rebuild
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RebuildSummary {
    /// Number of valid embeddings loaded into the index
    pub loaded: usize,
    /// Number of rows skipped because their vector dimension was wrong
    pub skipped: usize,
}

/// In-memory similarity index over the stored embeddings.
pub struct EmbeddingIndex {
    store: Arc<FileStore>,
    embedder: Arc<dyn Embedder>,
    dimension: usize,
    slots: RwLock<Vec<IndexSlot>>,
    /// Serializes writers: one `put` (including its rebuild) completes
    /// before the next begins
    write_lock: Mutex<()>,
}

impl EmbeddingIndex {
    pub fn new(store: Arc<FileStore>, embedder: Arc<dyn Embedder>, dimension: usize) -> Self {
        Self {
            store,
            embedder,
            dimension,
            slots: RwLock::new(Vec::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Configured embedding dimension D
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Compute and store the embedding for a file's text, then rebuild.
    ///
    /// Returns `Ok(false)` — with nothing stored — when the text is
    /// empty/whitespace, the embedder yields a vector of the wrong
    /// dimension, or the file id is unknown. Storage failures beyond
    /// validation propagate as errors.
    pub async fn put(&self, file_id: i64, text: &str) -> IndexResult<bool> {
        let _writer = self.write_lock.lock().await;

        if text.trim().is_empty() {
            log::warn!("empty text for file id {}, skipping embedding", file_id);
            return Ok(false);
        }

        let vector = self.embedder.embed(text);
        if vector.len() != self.dimension {
            log::error!(
                "invalid embedding dimension for file id {}: got {}, expected {}",
                file_id,
                vector.len(),
                self.dimension
            );
            return Ok(false);
        }

        let preview = EmbeddingRecord::preview_of(text);
        match self.store.set_embedding(file_id, preview, vector).await {
            Ok(()) => {}
            Err(StoreError::UnknownFile { file_id }) => {
                log::warn!("no file record for id {}, skipping embedding", file_id);
                return Ok(false);
            }
            Err(other) => return Err(other.into()),
        }

        self.rebuild_slots().await;
        log::debug!("stored and indexed embedding for file id {}", file_id);
        Ok(true)
    }

    /// Rebuild the index in full from the persisted embeddings.
    ///
    /// Rows whose vector dimension does not match the configured D are
    /// logged and skipped; they never abort the rebuild. An empty valid
    /// set yields an empty, queryable index.
    pub async fn rebuild(&self) -> IndexResult<RebuildSummary> {
        let _writer = self.write_lock.lock().await;
        Ok(self.rebuild_slots().await)
    }

    async fn rebuild_slots(&self) -> RebuildSummary {
        let rows = self.store.all_embeddings().await;
        let mut slots = Vec::with_capacity(rows.len());
        let mut skipped = 0usize;

        for (file_id, path, vector) in rows {
            if vector.len() != self.dimension {
                log::warn!(
                    "skipping embedding for {}: dimension {} != {}",
                    path,
                    vector.len(),
                    self.dimension
                );
                skipped += 1;
                continue;
            }
            slots.push(IndexSlot {
                file_id,
                path,
                vector,
            });
        }

        let loaded = slots.len();
        *self.slots.write().await = slots;

        if loaded == 0 {
            log::warn!("no valid embeddings loaded into index");
        } else {
            log::info!("index rebuilt: {} entries loaded, {} skipped", loaded, skipped);
        }
        RebuildSummary { loaded, skipped }
    }

    /// Similarity between two vectors: `1 - L2_norm(query - candidate)`.
    ///
    /// Deliberately not bounded to [0, 1] — highly dissimilar vectors
    /// yield large negative values, and downstream ranking depends on
    /// this exact formula. Never treat it as a probability.
    pub fn similarity(query: &[f32], candidate: &[f32]) -> f32 {
        let sum_sq: f32 = query
            .iter()
            .zip(candidate.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        1.0 - sum_sq.sqrt()
    }

    /// Every indexed embedding except the excluded file's own.
    pub async fn candidates(&self, exclude_file_id: i64) -> Vec<IndexSlot> {
        self.slots
            .read()
            .await
            .iter()
            .filter(|slot| slot.file_id != exclude_file_id)
            .cloned()
            .collect()
    }

    /// Number of entries currently in the index
    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }
}
