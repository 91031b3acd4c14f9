//! Persistence layer for the recommendation engine.
//!
//! All tables (files, embedded content, activity, co-occurrence edges) live
//! in memory behind a `tokio::sync::RwLock` and are flushed to a single
//! gzip JSON snapshot after every mutation. The layer consists of three
//! parts:
//!
//! 1. **Types** (`types.rs`): record structs, snapshot format, `StoreError`
//! 2. **Storage** (`storage.rs`): snapshot I/O, atomic replace, write-lock
//!    registry
//! 3. **Store** (this file): [`FileStore`], the point read/write and range
//!    scan API used by the index, activity tracker, and ranking engine
//!
//! ## Concurrency
//!
//! Reads take the shared lock and may run concurrently with writers,
//! tolerating slightly stale data. Mutations acquire the snapshot write
//! lock first; a concurrent writer observes [`StoreError::Contended`] and
//! the mutation is retried with linear backoff (see `retry.rs`). After the
//! retry budget is exhausted the failure propagates to the caller — there
//! is no silent data loss and no partial write.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

pub mod retry;
pub mod storage;
pub mod types;

use retry::{with_retry, RetryPolicy};
use storage::StoreLockGuard;
use types::{
    ActivityRecord, CooccurrenceEdge, EdgeKey, EmbeddingRecord, FileRecord, SnapshotTables,
    StoreError, StoreResult,
};

/// Snapshot file name inside the store directory
const SNAPSHOT_FILE: &str = "filerec_store.json.gz";

/// In-memory table state, keyed for point access
#[derive(Debug, Default)]
struct Tables {
    files: HashMap<i64, FileRecord>,
    paths: HashMap<String, i64>,
    embeddings: HashMap<i64, EmbeddingRecord>,
    activity: HashMap<i64, ActivityRecord>,
    edges: HashMap<EdgeKey, u64>,
    next_file_id: i64,
}

impl Tables {
    fn from_snapshot(snapshot: SnapshotTables) -> Self {
        let mut tables = Tables {
            next_file_id: snapshot.next_file_id.max(1),
            ..Tables::default()
        };
        for file in snapshot.files {
            tables.paths.insert(file.path.clone(), file.id);
            tables.files.insert(file.id, file);
        }
        for embedding in snapshot.embeddings {
            tables.embeddings.insert(embedding.file_id, embedding);
        }
        for record in snapshot.activity {
            tables.activity.insert(record.file_id, record);
        }
        for edge in snapshot.edges {
            if let Some(key) = edge.key() {
                tables.edges.insert(key, edge.count);
            }
        }
        tables
    }

    /// Deterministic (id-sorted) snapshot view of the tables
    fn to_snapshot(&self) -> SnapshotTables {
        let mut files: Vec<FileRecord> = self.files.values().cloned().collect();
        files.sort_by_key(|f| f.id);
        let mut embeddings: Vec<EmbeddingRecord> = self.embeddings.values().cloned().collect();
        embeddings.sort_by_key(|e| e.file_id);
        let mut activity: Vec<ActivityRecord> = self.activity.values().cloned().collect();
        activity.sort_by_key(|a| a.file_id);
        let mut edges: Vec<CooccurrenceEdge> = self
            .edges
            .iter()
            .map(|(key, &count)| CooccurrenceEdge {
                file_lo: key.lo,
                file_hi: key.hi,
                count,
            })
            .collect();
        edges.sort_by_key(|e| (e.file_lo, e.file_hi));

        SnapshotTables {
            files,
            embeddings,
            activity,
            edges,
            next_file_id: self.next_file_id,
        }
    }
}

/// Durable store for file records, embedded content, activity counters,
/// and co-occurrence edges.
///
/// The store is process-scoped state with an explicit open lifecycle and
/// is dependency-injected into each subsystem — there is no ambient
/// singleton.
pub struct FileStore {
    snapshot_path: PathBuf,
    retry: RetryPolicy,
    state: RwLock<Tables>,
}

impl FileStore {
    /// Open (or create) a store rooted at the given directory.
    pub async fn open(dir: impl Into<PathBuf>, retry: RetryPolicy) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StoreError::Storage {
            message: format!("failed to create store directory: {}", e),
        })?;

        let snapshot_path = dir.join(SNAPSHOT_FILE);
        let tables = match storage::read_snapshot(&snapshot_path)? {
            Some(snapshot) => Tables::from_snapshot(snapshot),
            None => Tables {
                next_file_id: 1,
                ..Tables::default()
            },
        };

        log::info!(
            "opened store at {} ({} files, {} embeddings)",
            snapshot_path.display(),
            tables.files.len(),
            tables.embeddings.len()
        );

        Ok(Self {
            snapshot_path,
            retry,
            state: RwLock::new(tables),
        })
    }

    /// Path of the backing snapshot file
    pub fn snapshot_path(&self) -> &PathBuf {
        &self.snapshot_path
    }

    /// Run a mutation under the snapshot write lock and flush the result.
    ///
    /// The write lock is acquired before the table lock so that a second
    /// concurrent writer fails fast with `Contended` and enters the retry
    /// loop instead of queueing behind the `RwLock`.
    async fn mutate<T>(&self, apply: impl Fn(&mut Tables) -> StoreResult<T>) -> StoreResult<T> {
        let apply = &apply;
        with_retry(&self.retry, || async move {
            let _guard = StoreLockGuard::acquire(&self.snapshot_path)?;
            let mut tables = self.state.write().await;
            let outcome = apply(&mut tables)?;
            storage::write_snapshot(&self.snapshot_path, &tables.to_snapshot())?;
            Ok(outcome)
        })
        .await
    }

    // ------------------------------------------------------------------
    // File records
    // ------------------------------------------------------------------

    /// Insert a file record, or replace an existing record for the same
    /// path in place (same id, new hash and timestamps). Returns the id.
    pub async fn upsert_file(
        &self,
        path: &str,
        hash: &str,
        file_type: &str,
        last_modified: &str,
    ) -> StoreResult<i64> {
        self.mutate(|tables| {
            let now = Utc::now();
            if let Some(&id) = tables.paths.get(path) {
                if let Some(record) = tables.files.get_mut(&id) {
                    record.hash = hash.to_string();
                    record.file_type = file_type.to_string();
                    record.last_modified = last_modified.to_string();
                    record.last_scanned = now;
                }
                return Ok(id);
            }

            let id = tables.next_file_id;
            tables.next_file_id += 1;
            tables.paths.insert(path.to_string(), id);
            tables.files.insert(
                id,
                FileRecord {
                    id,
                    path: path.to_string(),
                    hash: hash.to_string(),
                    file_type: file_type.to_string(),
                    last_modified: last_modified.to_string(),
                    last_scanned: now,
                    created_at: now,
                },
            );
            Ok(id)
        })
        .await
    }

    pub async fn file_by_path(&self, path: &str) -> Option<FileRecord> {
        let tables = self.state.read().await;
        tables
            .paths
            .get(path)
            .and_then(|id| tables.files.get(id))
            .cloned()
    }

    pub async fn file_by_id(&self, file_id: i64) -> Option<FileRecord> {
        self.state.read().await.files.get(&file_id).cloned()
    }

    pub async fn file_count(&self) -> usize {
        self.state.read().await.files.len()
    }

    /// Remove a file record and its dependents.
    ///
    /// The embedding and activity rows owned by the file are cascaded;
    /// co-occurrence edges touching the file are dropped as well so the
    /// store never holds edges that reference a missing id. Returns
    /// whether a record was removed.
    pub async fn remove_file(&self, file_id: i64) -> StoreResult<bool> {
        self.mutate(|tables| {
            let Some(record) = tables.files.remove(&file_id) else {
                return Ok(false);
            };
            tables.paths.remove(&record.path);
            tables.embeddings.remove(&file_id);
            tables.activity.remove(&file_id);
            tables
                .edges
                .retain(|key, _| key.lo != file_id && key.hi != file_id);
            Ok(true)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Embedded content
    // ------------------------------------------------------------------

    /// Store (or replace) the embedded content for a file.
    pub async fn set_embedding(
        &self,
        file_id: i64,
        content_preview: String,
        vector: Vec<f32>,
    ) -> StoreResult<()> {
        self.mutate(|tables| {
            if !tables.files.contains_key(&file_id) {
                return Err(StoreError::UnknownFile { file_id });
            }
            tables.embeddings.insert(
                file_id,
                EmbeddingRecord {
                    file_id,
                    content_preview: content_preview.clone(),
                    vector: Some(vector.clone()),
                },
            );
            Ok(())
        })
        .await
    }

    pub async fn embedding(&self, file_id: i64) -> Option<EmbeddingRecord> {
        self.state.read().await.embeddings.get(&file_id).cloned()
    }

    pub async fn embedding_count(&self) -> usize {
        self.state.read().await.embeddings.len()
    }

    /// All rows with a non-null vector, as `(file_id, path, vector)`,
    /// ordered by file id so enumeration order is stable across calls.
    pub async fn all_embeddings(&self) -> Vec<(i64, String, Vec<f32>)> {
        let tables = self.state.read().await;
        let mut rows: Vec<(i64, String, Vec<f32>)> = tables
            .embeddings
            .values()
            .filter_map(|embedding| {
                let vector = embedding.vector.clone()?;
                let path = tables.files.get(&embedding.file_id)?.path.clone();
                Some((embedding.file_id, path, vector))
            })
            .collect();
        rows.sort_by_key(|(id, _, _)| *id);
        rows
    }

    // ------------------------------------------------------------------
    // Activity
    // ------------------------------------------------------------------

    /// Record an access: insert with count 1 if absent, otherwise increment
    /// the count and move `last_accessed` forward. Fails for unknown files.
    pub async fn record_activity(
        &self,
        file_id: i64,
        accessed_at: DateTime<Utc>,
    ) -> StoreResult<ActivityRecord> {
        self.mutate(|tables| {
            if !tables.files.contains_key(&file_id) {
                return Err(StoreError::UnknownFile { file_id });
            }
            let record = tables
                .activity
                .entry(file_id)
                .and_modify(|record| {
                    record.access_count += 1;
                    record.last_accessed = accessed_at;
                })
                .or_insert(ActivityRecord {
                    file_id,
                    access_count: 1,
                    last_accessed: accessed_at,
                });
            Ok(record.clone())
        })
        .await
    }

    pub async fn activity(&self, file_id: i64) -> Option<ActivityRecord> {
        self.state.read().await.activity.get(&file_id).cloned()
    }

    /// File ids (other than `exclude`) whose last access is at or after
    /// `cutoff` — the co-occurrence neighborhood scan.
    pub async fn accessed_within(&self, cutoff: DateTime<Utc>, exclude: i64) -> Vec<i64> {
        let tables = self.state.read().await;
        let mut ids: Vec<i64> = tables
            .activity
            .values()
            .filter(|record| record.file_id != exclude && record.last_accessed >= cutoff)
            .map(|record| record.file_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Recently accessed files as `(path, last_accessed, access_count)`,
    /// most recent first.
    pub async fn recent_activity(&self, limit: usize) -> Vec<(String, DateTime<Utc>, u64)> {
        let tables = self.state.read().await;
        let mut rows: Vec<(String, DateTime<Utc>, u64)> = tables
            .activity
            .values()
            .filter_map(|record| {
                let path = tables.files.get(&record.file_id)?.path.clone();
                Some((path, record.last_accessed, record.access_count))
            })
            .collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1));
        rows.truncate(limit);
        rows
    }

    /// Most accessed files as `(path, access_count)`, highest count first.
    pub async fn most_accessed(&self, limit: usize) -> Vec<(String, u64)> {
        let tables = self.state.read().await;
        let mut rows: Vec<(String, u64)> = tables
            .activity
            .values()
            .filter_map(|record| {
                let path = tables.files.get(&record.file_id)?.path.clone();
                Some((path, record.access_count))
            })
            .collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1));
        rows.truncate(limit);
        rows
    }

    // ------------------------------------------------------------------
    // Co-occurrence edges
    // ------------------------------------------------------------------

    /// Increment the canonical edge for an unordered pair, starting at 1
    /// if absent. Self-pairs are a no-op; returns whether an edge was
    /// touched.
    pub async fn bump_edge(&self, a: i64, b: i64) -> StoreResult<bool> {
        let Some(key) = EdgeKey::new(a, b) else {
            return Ok(false);
        };
        self.mutate(|tables| {
            *tables.edges.entry(key).or_insert(0) += 1;
            Ok(true)
        })
        .await
    }

    /// Observed co-occurrence count for an unordered pair. `None` when no
    /// edge exists or the pair is a self-pair — distinct from a stored
    /// count of zero.
    pub async fn edge_count(&self, a: i64, b: i64) -> Option<u64> {
        let key = EdgeKey::new(a, b)?;
        self.state.read().await.edges.get(&key).copied()
    }

    /// Top co-occurring pairs, highest count first.
    pub async fn top_edges(&self, limit: usize) -> Vec<CooccurrenceEdge> {
        let tables = self.state.read().await;
        let mut edges: Vec<CooccurrenceEdge> = tables
            .edges
            .iter()
            .map(|(key, &count)| CooccurrenceEdge {
                file_lo: key.lo,
                file_hi: key.hi,
                count,
            })
            .collect();
        edges.sort_by(|a, b| b.count.cmp(&a.count));
        edges.truncate(limit);
        edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_temp_store() -> (FileStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path(), RetryPolicy::default())
            .await
            .unwrap();
        (store, temp_dir)
    }

    async fn add_file(store: &FileStore, path: &str) -> i64 {
        store
            .upsert_file(path, "hash", "text/markdown", "2026-08-01T12:00:00+00:00")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_upsert_replaces_in_place() {
        let (store, _tmp) = open_temp_store().await;

        let first = store
            .upsert_file("/vault/a.md", "hash1", "text/markdown", "2026-01-01T00:00:00Z")
            .await
            .unwrap();
        let second = store
            .upsert_file("/vault/a.md", "hash2", "text/markdown", "2026-02-01T00:00:00Z")
            .await
            .unwrap();

        // Same logical identity, new hash
        assert_eq!(first, second);
        assert_eq!(store.file_count().await, 1);
        let record = store.file_by_id(first).await.unwrap();
        assert_eq!(record.hash, "hash2");
        assert_eq!(record.last_modified, "2026-02-01T00:00:00Z");
    }

    #[tokio::test]
    async fn test_remove_file_cascades_dependents() {
        let (store, _tmp) = open_temp_store().await;
        let a = add_file(&store, "/vault/a.md").await;
        let b = add_file(&store, "/vault/b.md").await;

        store
            .set_embedding(a, "preview".to_string(), vec![1.0, 0.0])
            .await
            .unwrap();
        store.record_activity(a, Utc::now()).await.unwrap();
        store.bump_edge(a, b).await.unwrap();

        assert!(store.remove_file(a).await.unwrap());

        assert!(store.file_by_id(a).await.is_none());
        assert!(store.embedding(a).await.is_none());
        assert!(store.activity(a).await.is_none());
        assert!(store.edge_count(a, b).await.is_none());
        // Unrelated records survive
        assert!(store.file_by_id(b).await.is_some());
    }

    #[tokio::test]
    async fn test_set_embedding_requires_known_file() {
        let (store, _tmp) = open_temp_store().await;

        let result = store
            .set_embedding(99, "preview".to_string(), vec![0.5])
            .await;

        assert!(matches!(
            result,
            Err(StoreError::UnknownFile { file_id: 99 })
        ));
        assert_eq!(store.embedding_count().await, 0);
    }

    #[tokio::test]
    async fn test_record_activity_upserts() {
        let (store, _tmp) = open_temp_store().await;
        let id = add_file(&store, "/vault/a.md").await;

        let first = store.record_activity(id, Utc::now()).await.unwrap();
        assert_eq!(first.access_count, 1);

        let second = store.record_activity(id, Utc::now()).await.unwrap();
        assert_eq!(second.access_count, 2);

        assert!(matches!(
            store.record_activity(42, Utc::now()).await,
            Err(StoreError::UnknownFile { .. })
        ));
    }

    #[tokio::test]
    async fn test_accessed_within_excludes_self_and_stale() {
        let (store, _tmp) = open_temp_store().await;
        let a = add_file(&store, "/vault/a.md").await;
        let b = add_file(&store, "/vault/b.md").await;
        let c = add_file(&store, "/vault/c.md").await;

        let now = Utc::now();
        store.record_activity(a, now).await.unwrap();
        store.record_activity(b, now).await.unwrap();
        store
            .record_activity(c, now - chrono::Duration::minutes(10))
            .await
            .unwrap();

        let cutoff = now - chrono::Duration::minutes(5);
        let neighbors = store.accessed_within(cutoff, a).await;

        // b is inside the window; c is stale; a itself is excluded
        assert_eq!(neighbors, vec![b]);
    }

    #[tokio::test]
    async fn test_bump_edge_is_canonical() {
        let (store, _tmp) = open_temp_store().await;
        let a = add_file(&store, "/vault/a.md").await;
        let b = add_file(&store, "/vault/b.md").await;

        assert!(store.bump_edge(a, b).await.unwrap());
        assert!(store.bump_edge(b, a).await.unwrap());

        // Both orderings mutate the same stored edge
        assert_eq!(store.edge_count(a, b).await, Some(2));
        assert_eq!(store.edge_count(b, a).await, Some(2));

        // Self-pairs never create an edge
        assert!(!store.bump_edge(a, a).await.unwrap());
        assert_eq!(store.edge_count(a, a).await, None);
    }

    #[tokio::test]
    async fn test_all_embeddings_ordered_and_filtered() {
        let (store, _tmp) = open_temp_store().await;
        let a = add_file(&store, "/vault/a.md").await;
        let b = add_file(&store, "/vault/b.md").await;

        store
            .set_embedding(b, "b".to_string(), vec![0.0, 1.0])
            .await
            .unwrap();
        store
            .set_embedding(a, "a".to_string(), vec![1.0, 0.0])
            .await
            .unwrap();

        let rows = store.all_embeddings().await;
        assert_eq!(rows.len(), 2);
        // Ordered by file id regardless of insertion order
        assert_eq!(rows[0].0, a);
        assert_eq!(rows[1].0, b);
    }

    #[tokio::test]
    async fn test_recent_and_most_accessed_ordering() {
        let (store, _tmp) = open_temp_store().await;
        let a = add_file(&store, "/vault/a.md").await;
        let b = add_file(&store, "/vault/b.md").await;

        let earlier = Utc::now() - chrono::Duration::seconds(30);
        store.record_activity(a, earlier).await.unwrap();
        store.record_activity(a, earlier).await.unwrap();
        store.record_activity(b, Utc::now()).await.unwrap();

        let recent = store.recent_activity(10).await;
        assert_eq!(recent[0].0, "/vault/b.md");
        assert_eq!(recent[1].0, "/vault/a.md");
        assert_eq!(recent[1].2, 2);

        let most = store.most_accessed(1).await;
        assert_eq!(most, vec![("/vault/a.md".to_string(), 2)]);
    }

    #[tokio::test]
    async fn test_top_edges_ordered_and_limited() {
        let (store, _tmp) = open_temp_store().await;
        let a = add_file(&store, "/vault/a.md").await;
        let b = add_file(&store, "/vault/b.md").await;
        let c = add_file(&store, "/vault/c.md").await;

        // (a,b) bumped three times, (a,c) twice, (b,c) once
        for _ in 0..3 {
            store.bump_edge(a, b).await.unwrap();
        }
        store.bump_edge(a, c).await.unwrap();
        store.bump_edge(c, a).await.unwrap();
        store.bump_edge(b, c).await.unwrap();

        let top = store.top_edges(10).await;
        assert_eq!(top.len(), 3);
        assert_eq!((top[0].file_lo, top[0].file_hi, top[0].count), (a, b, 3));
        assert_eq!((top[1].file_lo, top[1].file_hi, top[1].count), (a, c, 2));
        assert_eq!((top[2].file_lo, top[2].file_hi, top[2].count), (b, c, 1));

        let limited = store.top_edges(2).await;
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].count, 3);
        assert_eq!(limited[1].count, 2);
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let id;
        {
            let store = FileStore::open(temp_dir.path(), RetryPolicy::default())
                .await
                .unwrap();
            id = add_file(&store, "/vault/a.md").await;
            store
                .set_embedding(id, "preview".to_string(), vec![1.0, 2.0])
                .await
                .unwrap();
            store.record_activity(id, Utc::now()).await.unwrap();
        }

        let reopened = FileStore::open(temp_dir.path(), RetryPolicy::default())
            .await
            .unwrap();
        let record = reopened.file_by_path("/vault/a.md").await.unwrap();
        assert_eq!(record.id, id);
        assert_eq!(
            reopened.embedding(id).await.unwrap().vector,
            Some(vec![1.0, 2.0])
        );
        assert_eq!(reopened.activity(id).await.unwrap().access_count, 1);

        // New ids keep counting up instead of colliding
        let next = add_file(&reopened, "/vault/b.md").await;
        assert!(next > id);
    }
}
