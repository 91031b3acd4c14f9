//! Access activity tracking and co-occurrence derivation.
//!
//! Records file accesses, keeps per-file access counts and last-access
//! timestamps, and derives co-occurrence edges between files accessed
//! within a sliding time window (default 5 minutes).
//!
//! ## Concurrency
//!
//! [`ActivityTracker::record_access`] holds a subsystem-scoped exclusive
//! lock for its whole increment-then-scan-then-bump sequence, so
//! concurrent access recordings never double-count or lose updates.
//! Reads ([`ActivityTracker::recent`]) bypass the lock and tolerate
//! slightly stale data.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::store::types::StoreResult;
use crate::store::FileStore;

/// A recently accessed file, most recent first in [`ActivityTracker::recent`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentAccess {
    pub path: String,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
}

/// Tracks file access activity and pairwise co-occurrence.
pub struct ActivityTracker {
    store: Arc<FileStore>,
    /// Trailing window within which two accesses count as co-occurring
    window: Duration,
    /// Makes the record-access sequence single-writer
    write_lock: Mutex<()>,
}

impl ActivityTracker {
    pub fn new(store: Arc<FileStore>, window: Duration) -> Self {
        Self {
            store,
            window,
            write_lock: Mutex::new(()),
        }
    }

    /// Record a file access and derive co-occurrences.
    ///
    /// Returns `false` when the path has no file record — activity cannot
    /// be logged for unknown files — or when the activity upsert fails
    /// hard (retries exhausted). Co-occurrence bump failures are logged
    /// but do not fail the access itself.
    pub async fn record_access(&self, path: &str) -> bool {
        let _writer = self.write_lock.lock().await;

        let Some(file) = self.store.file_by_path(path).await else {
            log::warn!("no file record found for {}", path);
            return false;
        };

        let now = Utc::now();
        if let Err(e) = self.store.record_activity(file.id, now).await {
            log::error!("error recording file access for {}: {}", path, e);
            return false;
        }

        // Everything else touched inside the trailing window co-occurred
        // with this access.
        let cutoff = now - self.window;
        for other in self.store.accessed_within(cutoff, file.id).await {
            if let Err(e) = self.bump_cooccurrence(file.id, other).await {
                log::error!(
                    "error recording co-occurrence ({}, {}): {}",
                    file.id,
                    other,
                    e
                );
            }
        }

        true
    }

    /// Increment the canonical co-occurrence edge for a pair.
    ///
    /// Self-pairs are a no-op; `(a, b)` and `(b, a)` always mutate the
    /// same stored edge. Returns whether an edge was touched.
    pub async fn bump_cooccurrence(&self, a: i64, b: i64) -> StoreResult<bool> {
        self.store.bump_edge(a, b).await
    }

    /// Recently accessed files, ordered by last access descending.
    pub async fn recent(&self, limit: usize) -> Vec<RecentAccess> {
        self.store
            .recent_activity(limit)
            .await
            .into_iter()
            .map(|(path, last_accessed, access_count)| RecentAccess {
                path,
                last_accessed,
                access_count,
            })
            .collect()
    }

    /// Configured co-occurrence window
    pub fn window(&self) -> Duration {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::retry::RetryPolicy;
    use tempfile::TempDir;

    async fn setup() -> (Arc<FileStore>, ActivityTracker, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(
            FileStore::open(temp_dir.path(), RetryPolicy::default())
                .await
                .unwrap(),
        );
        let tracker = ActivityTracker::new(store.clone(), Duration::seconds(300));
        (store, tracker, temp_dir)
    }

    async fn add_file(store: &FileStore, path: &str) -> i64 {
        store
            .upsert_file(path, "hash", "text/markdown", "2026-08-01T12:00:00+00:00")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_record_access_unknown_path_fails() {
        let (_store, tracker, _tmp) = setup().await;
        assert!(!tracker.record_access("/vault/nowhere.md").await);
    }

    #[tokio::test]
    async fn test_cooccurrence_counting_within_window() {
        let (store, tracker, _tmp) = setup().await;
        let a = add_file(&store, "/vault/a.md").await;
        let b = add_file(&store, "/vault/b.md").await;

        // A then B inside the window: one co-occurrence event
        assert!(tracker.record_access("/vault/a.md").await);
        assert!(tracker.record_access("/vault/b.md").await);
        assert_eq!(store.edge_count(a, b).await, Some(1));

        // A third access of A sees B still in the window: count moves to 2
        assert!(tracker.record_access("/vault/a.md").await);
        assert_eq!(store.edge_count(a, b).await, Some(2));
        assert_eq!(store.edge_count(b, a).await, Some(2));
    }

    #[tokio::test]
    async fn test_stale_accesses_do_not_cooccur() {
        let (store, tracker, _tmp) = setup().await;
        let a = add_file(&store, "/vault/a.md").await;
        let b = add_file(&store, "/vault/b.md").await;

        // Plant an access for A well outside the window
        store
            .record_activity(a, Utc::now() - Duration::minutes(30))
            .await
            .unwrap();

        assert!(tracker.record_access("/vault/b.md").await);
        assert_eq!(store.edge_count(a, b).await, None);
    }

    #[tokio::test]
    async fn test_access_counts_accumulate() {
        let (store, tracker, _tmp) = setup().await;
        let a = add_file(&store, "/vault/a.md").await;

        for _ in 0..3 {
            assert!(tracker.record_access("/vault/a.md").await);
        }

        let record = store.activity(a).await.unwrap();
        assert_eq!(record.access_count, 3);
        // Self-pairs never appear
        assert_eq!(store.edge_count(a, a).await, None);
    }

    #[tokio::test]
    async fn test_recent_orders_by_last_access() {
        let (store, tracker, _tmp) = setup().await;
        add_file(&store, "/vault/a.md").await;
        add_file(&store, "/vault/b.md").await;

        tracker.record_access("/vault/a.md").await;
        tracker.record_access("/vault/b.md").await;

        let recent = tracker.recent(10).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].path, "/vault/b.md");
        assert_eq!(recent[1].path, "/vault/a.md");

        let limited = tracker.recent(1).await;
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_accesses_lose_no_updates() {
        let (store, tracker, _tmp) = setup().await;
        let a = add_file(&store, "/vault/a.md").await;
        let b = add_file(&store, "/vault/b.md").await;

        let tracker = Arc::new(tracker);
        let mut handles = Vec::new();
        for i in 0..5 {
            let tracker = tracker.clone();
            let path = if i % 2 == 0 {
                "/vault/a.md"
            } else {
                "/vault/b.md"
            };
            handles.push(tokio::spawn(async move {
                tracker.record_access(path).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        // 3 accesses targeted a, 2 targeted b — exactly, no lost updates
        assert_eq!(store.activity(a).await.unwrap().access_count, 3);
        assert_eq!(store.activity(b).await.unwrap().access_count, 2);
    }
}
