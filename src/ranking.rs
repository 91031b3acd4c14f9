//! Weighted multi-factor ranking.
//!
//! Combines three signals for each candidate file against a query file:
//!
//! - **semantic**: `1 - L2_norm(query - candidate)` from the embedding
//!   index (unbounded below — see [`crate::embedding_index::EmbeddingIndex::similarity`])
//! - **recency**: a blend of modification-based and access-based
//!   exponential decay, each clamped to [0, 1]
//! - **cooccurrence**: a sigmoid over the observed co-occurrence count,
//!   with a `-1.0` sentinel when no data exists for the pair
//!
//! The weight triple is normalized by its sum, so `(2, 0, 0)` and
//! `(1, 0, 0)` rank identically. Missing signals degrade to their
//! sentinel or zero value rather than failing the recommendation: the
//! engine always produces a best-effort answer.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::embedder::Embedder;
use crate::embedding_index::EmbeddingIndex;
use crate::store::FileStore;

/// Decay horizon for the modification signal, in days
const MODIFIED_DECAY_DAYS: f64 = 30.0;
/// Decay horizon for the access signal, in days
const ACCESS_DECAY_DAYS: f64 = 15.0;
/// Blend weight of the modification signal inside the recency score
const MODIFIED_BLEND: f64 = 0.4;
/// Blend weight of the access signal inside the recency score
const ACCESS_BLEND: f64 = 0.6;
/// Sentinel for pairs with no co-occurrence data at all.
///
/// Distinct from a measured zero-count edge, which scores
/// `2/(1+exp(0)) - 1 = 0.0` — untested pairs are penalized relative to
/// pairs with zero-but-known history. This asymmetry is a documented
/// contract, not something to normalize away.
pub const COOCCURRENCE_SENTINEL: f64 = -1.0;

/// Ranking weight triple: semantic, recency, co-occurrence
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RankingWeights {
    /// Weight of the semantic similarity factor
    pub alpha: f64,
    /// Weight of the recency factor
    pub beta: f64,
    /// Weight of the co-occurrence factor
    pub gamma: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 0.0,
            gamma: 0.0,
        }
    }
}

impl RankingWeights {
    pub fn new(alpha: f64, beta: f64, gamma: f64) -> Self {
        Self { alpha, beta, gamma }
    }

    /// Normalize by the sum of the weights. A zero sum yields all-zero
    /// weights (scores collapse to zero, the call still succeeds).
    pub fn normalized(&self) -> RankingWeights {
        let sum = self.alpha + self.beta + self.gamma;
        if sum == 0.0 {
            RankingWeights {
                alpha: 0.0,
                beta: 0.0,
                gamma: 0.0,
            }
        } else {
            RankingWeights {
                alpha: self.alpha / sum,
                beta: self.beta / sum,
                gamma: self.gamma / sum,
            }
        }
    }
}

/// Raw factor values for one candidate, kept for explainability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreFactors {
    pub semantic: f64,
    pub recency: f64,
    pub cooccurrence: f64,
}

/// One ranked recommendation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub path: String,
    pub final_score: f64,
    /// Raw factor values that produced the score
    pub factors: ScoreFactors,
    /// Normalized weights that were applied
    pub weights: RankingWeights,
    /// Human-readable description of the semantic factor
    pub reason: String,
}

/// Sigmoid normalization of a co-occurrence count into (-1, 1).
pub fn cooccurrence_signal(count: u64) -> f64 {
    2.0 / (1.0 + (-(count as f64) / 5.0).exp()) - 1.0
}

/// Exponential decay of an age in days over the given horizon, clamped
/// to [0, 1].
fn decay(days: f64, horizon_days: f64) -> f64 {
    (-days / horizon_days).exp().clamp(0.0, 1.0)
}

/// Computes final relevance scores for candidate files.
pub struct RankingEngine {
    store: Arc<FileStore>,
    index: Arc<EmbeddingIndex>,
    embedder: Arc<dyn Embedder>,
}

impl RankingEngine {
    pub fn new(
        store: Arc<FileStore>,
        index: Arc<EmbeddingIndex>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
        }
    }

    /// Rank every stored embedding (except the query file's own) against
    /// the query text under the given weights.
    ///
    /// `limit <= 0` or empty query text yields an empty list without
    /// error; candidates with missing signals are still scored using
    /// sentinel/zero values. Ties keep the candidates' enumeration order
    /// (stable sort).
    pub async fn recommend(
        &self,
        query_path: &str,
        query_text: &str,
        limit: i64,
        weights: RankingWeights,
    ) -> Vec<ScoredCandidate> {
        if limit <= 0 {
            return Vec::new();
        }
        if query_text.trim().is_empty() {
            log::warn!("no text content available for {}", query_path);
            return Vec::new();
        }

        let weights = weights.normalized();
        log::info!(
            "ranking with weights: semantic={:.2}, recency={:.2}, cooccurrence={:.2}",
            weights.alpha,
            weights.beta,
            weights.gamma
        );

        let query_vector = self.embedder.embed(query_text);
        let query_file = self.store.file_by_path(query_path).await;
        let query_id = query_file.as_ref().map(|f| f.id);

        let candidates = self.index.candidates(query_id.unwrap_or(-1)).await;
        let now = Utc::now();

        let mut scored = Vec::with_capacity(candidates.len());
        for slot in candidates {
            let semantic = EmbeddingIndex::similarity(&query_vector, &slot.vector) as f64;
            let recency = self.recency_score(slot.file_id, now).await;
            let cooccurrence = self.cooccurrence_score(query_id, slot.file_id).await;

            let final_score = weights.alpha * semantic
                + weights.beta * recency
                + weights.gamma * cooccurrence;

            scored.push(ScoredCandidate {
                path: slot.path,
                final_score,
                factors: ScoreFactors {
                    semantic,
                    recency,
                    cooccurrence,
                },
                weights,
                reason: similarity_reason(semantic).to_string(),
            });
        }

        // Stable sort: ties keep enumeration order
        scored.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(Ordering::Equal)
        });
        scored.truncate(limit as usize);
        scored
    }

    /// Blend of modification-based and access-based exponential decay.
    ///
    /// An unparseable modification timestamp contributes 0; a file with
    /// no access history contributes 0 on the access side. Absence of
    /// data is degradation, not an error.
    async fn recency_score(&self, file_id: i64, now: DateTime<Utc>) -> f64 {
        let modification = match self.store.file_by_id(file_id).await {
            Some(file) => match DateTime::parse_from_rfc3339(&file.last_modified) {
                Ok(modified) => {
                    let days = (now - modified.with_timezone(&Utc)).num_days() as f64;
                    decay(days, MODIFIED_DECAY_DAYS)
                }
                Err(e) => {
                    log::debug!(
                        "unparseable last_modified for file id {}: {}",
                        file_id,
                        e
                    );
                    0.0
                }
            },
            None => 0.0,
        };

        let access = match self.store.activity(file_id).await {
            Some(record) => {
                let days = (now - record.last_accessed).num_days() as f64;
                decay(days, ACCESS_DECAY_DAYS)
            }
            None => 0.0,
        };

        MODIFIED_BLEND * modification + ACCESS_BLEND * access
    }

    /// Co-occurrence signal for the (query, candidate) pair, or the
    /// [`COOCCURRENCE_SENTINEL`] when the query file is unknown or no
    /// edge exists.
    async fn cooccurrence_score(&self, query_id: Option<i64>, candidate_id: i64) -> f64 {
        let Some(query_id) = query_id else {
            return COOCCURRENCE_SENTINEL;
        };
        match self.store.edge_count(query_id, candidate_id).await {
            Some(count) => cooccurrence_signal(count),
            None => COOCCURRENCE_SENTINEL,
        }
    }
}

/// Human-readable description of a semantic similarity value
fn similarity_reason(semantic: f64) -> &'static str {
    if semantic > 0.8 {
        "Very similar content"
    } else if semantic > 0.6 {
        "Moderately similar content"
    } else {
        "Somewhat related content"
    }
}
