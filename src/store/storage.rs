//! Snapshot persistence for the file store.
//!
//! The whole store state is persisted as a single gzip-compressed JSON
//! snapshot with a versioned header and a SHA-256 payload checksum.
//! Writes go through a temp-file-then-rename replace so a crash mid-write
//! never leaves a torn snapshot behind.
//!
//! A process-wide lock registry guards each snapshot path: a writer that
//! finds the path locked fails fast with [`StoreError::Contended`] and is
//! expected to retry through the policy in [`super::retry`].

use std::collections::HashSet;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};

use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;

use super::types::{
    compute_checksum, DataVersion, Snapshot, SnapshotHeader, SnapshotTables, StoreError,
    StoreResult,
};

/// Registry of snapshot paths currently held by a writer
static STORE_LOCKS: LazyLock<Mutex<HashSet<PathBuf>>> =
    LazyLock::new(|| Mutex::new(HashSet::new()));

/// Write lock on a snapshot path, released on drop
#[derive(Debug)]
pub struct StoreLockGuard {
    path: PathBuf,
}

impl StoreLockGuard {
    /// Acquire the write lock for a snapshot path.
    ///
    /// Fails with [`StoreError::Contended`] if another writer currently
    /// holds the lock; callers retry through [`super::retry::with_retry`].
    pub fn acquire(path: &Path) -> StoreResult<Self> {
        let mut locks = STORE_LOCKS.lock().map_err(|_| StoreError::Storage {
            message: "store lock registry poisoned".to_string(),
        })?;

        if locks.contains(path) {
            return Err(StoreError::Contended);
        }

        locks.insert(path.to_path_buf());
        Ok(StoreLockGuard {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for StoreLockGuard {
    fn drop(&mut self) {
        if let Ok(mut locks) = STORE_LOCKS.lock() {
            locks.remove(&self.path);
        }
    }
}

/// Serialization view of a snapshot, borrowing the tables
#[derive(Serialize)]
struct SnapshotRef<'a> {
    header: SnapshotHeader,
    tables: &'a SnapshotTables,
}

/// Write a snapshot atomically: serialize, compress, write to a temp file,
/// then rename over the target path.
pub fn write_snapshot(path: &Path, tables: &SnapshotTables) -> StoreResult<()> {
    let payload = serde_json::to_vec(tables)?;
    let header = SnapshotHeader {
        version: DataVersion::CURRENT,
        created_at: Utc::now(),
        file_count: tables.files.len(),
        embedding_count: tables.embeddings.len(),
        checksum: Some(compute_checksum(&payload)),
    };

    let serialized = serde_json::to_vec(&SnapshotRef { header, tables })?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&serialized)
        .map_err(|e| StoreError::Storage {
            message: format!("failed to compress snapshot: {}", e),
        })?;
    let compressed = encoder.finish().map_err(|e| StoreError::Storage {
        message: format!("failed to finish snapshot compression: {}", e),
    })?;

    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, &compressed).map_err(|e| StoreError::Storage {
        message: format!("failed to write snapshot temp file: {}", e),
    })?;
    fs::rename(&temp_path, path).map_err(|e| StoreError::Storage {
        message: format!("failed to replace snapshot file: {}", e),
    })?;

    Ok(())
}

/// Read a snapshot from disk.
///
/// Returns `Ok(None)` when no snapshot exists yet (a fresh store). A
/// snapshot that fails decompression, version compatibility, or checksum
/// verification is an error, not an empty store.
pub fn read_snapshot(path: &Path) -> StoreResult<Option<SnapshotTables>> {
    if !path.exists() {
        return Ok(None);
    }

    let compressed = fs::read(path).map_err(|e| StoreError::Storage {
        message: format!("failed to read snapshot file: {}", e),
    })?;

    let mut decoder = GzDecoder::new(compressed.as_slice());
    let mut serialized = Vec::new();
    decoder
        .read_to_end(&mut serialized)
        .map_err(|e| StoreError::Storage {
            message: format!("failed to decompress snapshot: {}", e),
        })?;

    let snapshot: Snapshot = serde_json::from_slice(&serialized)?;
    snapshot.header.validate_compatibility()?;

    if let Some(expected) = &snapshot.header.checksum {
        let payload = serde_json::to_vec(&snapshot.tables)?;
        if &compute_checksum(&payload) != expected {
            return Err(StoreError::ChecksumMismatch);
        }
    }

    Ok(Some(snapshot.tables))
}
