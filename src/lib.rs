//! filerec — recommendation and activity engine for local files.
//!
//! Recommends files related to a given file by combining three signals:
//! semantic content similarity over per-file embeddings, recency of
//! modification and use, and historical co-occurrence of accesses within
//! a sliding time window.
//!
//! ## Architecture
//!
//! - [`store`] — durable persistence for file records, embedded content,
//!   activity counters, and co-occurrence edges, with bounded
//!   retry-with-backoff on write contention
//! - [`embedding_index`] — the embedding set plus a rebuildable
//!   similarity index over it
//! - [`activity`] — access tracking and co-occurrence derivation
//! - [`ranking`] — the weighted multi-factor relevance score
//! - [`engine`] — the facade wiring it all together
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use filerec::{EngineConfig, HashingEmbedder, RecommenderEngine};
//!
//! # async fn example() -> Result<(), filerec::StoreError> {
//! let config = EngineConfig::default();
//! let embedder = Arc::new(HashingEmbedder::new(config.dimension));
//! let engine = RecommenderEngine::open(config, embedder, "./filerec_data").await?;
//!
//! if let Some(id) = engine
//!     .register_file("/vault/note.md", "sha256...", "text/markdown", "2026-08-01T00:00:00Z")
//!     .await
//! {
//!     engine.store_embedding(id, "the note's extracted text").await;
//! }
//! engine.record_access("/vault/note.md").await;
//!
//! for candidate in engine.recommend("/vault/note.md", None, 5).await {
//!     println!("{} ({:.3})", candidate.path, candidate.final_score);
//! }
//! # Ok(())
//! # }
//! ```

// Module declarations
pub mod activity;
pub mod embedder;
pub mod embedding_index;
pub mod engine;
pub mod ranking;
pub mod store;

// Re-exports for commonly used types
pub use activity::{ActivityTracker, RecentAccess};
pub use embedder::{Embedder, HashingEmbedder};
pub use embedding_index::{EmbeddingIndex, IndexError, IndexResult, IndexSlot, RebuildSummary};
pub use engine::{EngineConfig, RecommenderEngine};
pub use ranking::{RankingEngine, RankingWeights, ScoreFactors, ScoredCandidate};
pub use store::retry::RetryPolicy;
pub use store::types::{
    ActivityRecord, CooccurrenceEdge, EmbeddingRecord, FileRecord, StoreError, StoreResult,
};
pub use store::FileStore;
