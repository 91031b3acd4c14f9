//! High-level recommendation engine facade.
//!
//! Wires the persistence layer, embedding index, activity tracker, and
//! ranking engine together and exposes the three call contracts consumed
//! by collaborators (API layer, scanner, planner):
//!
//! - [`RecommenderEngine::store_embedding`] — boolean success signal
//! - [`RecommenderEngine::record_access`] — boolean success signal
//! - [`RecommenderEngine::recommend`] — ranked, explainable top-K list
//!
//! Validation failures (empty text, wrong dimension, unknown file) are
//! reported as boolean/empty outcomes to the immediate caller and never
//! raised as process-level faults; storage failures beyond the retry
//! budget are logged and mapped to the same failure signals.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Duration;

use crate::activity::{ActivityTracker, RecentAccess};
use crate::embedder::Embedder;
use crate::embedding_index::{EmbeddingIndex, IndexError, RebuildSummary};
use crate::ranking::{RankingEngine, RankingWeights, ScoredCandidate};
use crate::store::retry::RetryPolicy;
use crate::store::types::StoreResult;
use crate::store::FileStore;

/// Engine configuration, provided externally and read-only.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Embedding dimension D; vectors of any other length are rejected
    pub dimension: usize,
    /// Default ranking weights (semantic, recency, co-occurrence)
    pub weights: RankingWeights,
    /// Trailing co-occurrence window in seconds
    pub cooccurrence_window_secs: i64,
    /// Retry policy for contended store writes
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            weights: RankingWeights::default(),
            cooccurrence_window_secs: 300,
            retry: RetryPolicy::default(),
        }
    }
}

/// The recommendation and activity engine.
pub struct RecommenderEngine {
    store: Arc<FileStore>,
    index: Arc<EmbeddingIndex>,
    tracker: ActivityTracker,
    ranking: RankingEngine,
    config: EngineConfig,
}

impl RecommenderEngine {
    /// Open the engine over a store directory, loading any persisted
    /// state and building the index from it.
    pub async fn open(
        config: EngineConfig,
        embedder: Arc<dyn Embedder>,
        store_dir: impl Into<PathBuf>,
    ) -> StoreResult<Self> {
        let store = Arc::new(FileStore::open(store_dir, config.retry.clone()).await?);
        let index = Arc::new(EmbeddingIndex::new(
            store.clone(),
            embedder.clone(),
            config.dimension,
        ));
        index
            .rebuild()
            .await
            .map_err(|e| match e {
                IndexError::Store(store_err) => store_err,
            })?;

        let tracker = ActivityTracker::new(
            store.clone(),
            Duration::seconds(config.cooccurrence_window_secs),
        );
        let ranking = RankingEngine::new(store.clone(), index.clone(), embedder);

        Ok(Self {
            store,
            index,
            tracker,
            ranking,
            config,
        })
    }

    /// Register (or refresh) a file record. Returns the file id, or
    /// `None` when the store rejects the write after exhausting retries.
    pub async fn register_file(
        &self,
        path: &str,
        hash: &str,
        file_type: &str,
        last_modified: &str,
    ) -> Option<i64> {
        match self
            .store
            .upsert_file(path, hash, file_type, last_modified)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                log::error!("failed to register file {}: {}", path, e);
                None
            }
        }
    }

    /// Store an embedding for a file's text.
    ///
    /// `true` on success; `false` on rejection (empty text, dimension
    /// mismatch, unknown file) or unrecoverable storage failure.
    pub async fn store_embedding(&self, file_id: i64, text: &str) -> bool {
        match self.index.put(file_id, text).await {
            Ok(stored) => stored,
            Err(e) => {
                log::error!("failed to store embedding for file id {}: {}", file_id, e);
                false
            }
        }
    }

    /// Record a file access. `true` if the file is known and activity
    /// was recorded.
    pub async fn record_access(&self, path: &str) -> bool {
        self.tracker.record_access(path).await
    }

    /// Rank candidate files against the given file.
    ///
    /// When `text_hint` is absent or blank, the stored content preview
    /// for the file is used as the fallback text source; if neither
    /// yields text the result is empty (not an error).
    pub async fn recommend(
        &self,
        path: &str,
        text_hint: Option<&str>,
        limit: i64,
    ) -> Vec<ScoredCandidate> {
        let text = match text_hint {
            Some(hint) if !hint.trim().is_empty() => hint.to_string(),
            _ => match self.stored_preview(path).await {
                Some(preview) => preview,
                None => {
                    log::warn!("no text content available for {}", path);
                    return Vec::new();
                }
            },
        };

        let results = self
            .ranking
            .recommend(path, &text, limit, self.config.weights)
            .await;
        log::info!("found {} recommendations for {}", results.len(), path);
        results
    }

    /// Recently accessed files, most recent first.
    pub async fn recent_activity(&self, limit: usize) -> Vec<RecentAccess> {
        self.tracker.recent(limit).await
    }

    /// Rebuild the similarity index from the persisted embeddings.
    pub async fn rebuild_index(&self) -> StoreResult<RebuildSummary> {
        self.index.rebuild().await.map_err(|e| match e {
            IndexError::Store(store_err) => store_err,
        })
    }

    /// The underlying store, for collaborators that scan or prune files.
    pub fn store(&self) -> &Arc<FileStore> {
        &self.store
    }

    /// The active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn stored_preview(&self, path: &str) -> Option<String> {
        let file = self.store.file_by_path(path).await?;
        let embedding = self.store.embedding(file.id).await?;
        if embedding.content_preview.trim().is_empty() {
            None
        } else {
            Some(embedding.content_preview)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashingEmbedder;
    use tempfile::TempDir;

    async fn open_engine(dimension: usize) -> (RecommenderEngine, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = EngineConfig {
            dimension,
            ..EngineConfig::default()
        };
        let engine = RecommenderEngine::open(
            config,
            Arc::new(HashingEmbedder::new(dimension)),
            temp_dir.path(),
        )
        .await
        .unwrap();
        (engine, temp_dir)
    }

    #[tokio::test]
    async fn test_store_embedding_contract() {
        let (engine, _tmp) = open_engine(64).await;
        let id = engine
            .register_file("/vault/a.md", "hash", "text/markdown", "2026-08-01T00:00:00Z")
            .await
            .unwrap();

        assert!(engine.store_embedding(id, "alpha beta gamma").await);
        assert!(!engine.store_embedding(id, "   ").await);
        assert!(!engine.store_embedding(9999, "text for nobody").await);
    }

    #[tokio::test]
    async fn test_recommend_uses_stored_preview_fallback() {
        let (engine, _tmp) = open_engine(64).await;
        let a = engine
            .register_file("/vault/a.md", "h1", "text/markdown", "2026-08-01T00:00:00Z")
            .await
            .unwrap();
        let b = engine
            .register_file("/vault/b.md", "h2", "text/markdown", "2026-08-01T00:00:00Z")
            .await
            .unwrap();
        engine.store_embedding(a, "shared words here").await;
        engine.store_embedding(b, "shared words here too").await;

        // No hint: falls back to a's stored preview
        let results = engine.recommend("/vault/a.md", None, 5).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].path, "/vault/b.md");

        // Unknown file with no hint: no text obtainable, empty result
        assert!(engine.recommend("/vault/missing.md", None, 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_engine_reopens_with_persisted_index() {
        let temp_dir = TempDir::new().unwrap();
        let config = EngineConfig {
            dimension: 32,
            ..EngineConfig::default()
        };
        {
            let engine = RecommenderEngine::open(
                config.clone(),
                Arc::new(HashingEmbedder::new(32)),
                temp_dir.path(),
            )
            .await
            .unwrap();
            let id = engine
                .register_file("/vault/a.md", "h", "text/markdown", "2026-08-01T00:00:00Z")
                .await
                .unwrap();
            assert!(engine.store_embedding(id, "persisted content").await);
        }

        let reopened = RecommenderEngine::open(
            config,
            Arc::new(HashingEmbedder::new(32)),
            temp_dir.path(),
        )
        .await
        .unwrap();
        let summary = reopened.rebuild_index().await.unwrap();
        assert_eq!(summary.loaded, 1);
    }
}
