use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Maximum number of characters kept in a stored content preview.
pub const PREVIEW_MAX_CHARS: usize = 1000;

/// Errors that can occur during store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Data integrity error: checksum mismatch")]
    ChecksumMismatch,

    #[error("Version compatibility error: expected {expected}, found {found}")]
    VersionIncompatible { expected: String, found: String },

    #[error("Store is locked by another writer")]
    Contended,

    #[error("Retry budget exhausted after {attempts} attempts")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<StoreError>,
    },

    #[error("Unknown file id: {file_id}")]
    UnknownFile { file_id: i64 },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Version information for snapshot format compatibility
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataVersion {
    /// Major version (breaking changes)
    pub major: u32,
    /// Minor version (backward compatible features)
    pub minor: u32,
    /// Patch version (bug fixes)
    pub patch: u32,
}

impl DataVersion {
    /// Current snapshot format version
    pub const CURRENT: DataVersion = DataVersion {
        major: 1,
        minor: 0,
        patch: 0,
    };

    /// Check if this version can read data written by `other`
    pub fn is_compatible(&self, other: &DataVersion) -> bool {
        self.major == other.major && self.minor >= other.minor
    }

    pub fn version_string(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Default for DataVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

/// A scanned file known to the store.
///
/// The path is the logical identity: re-scanning the same path replaces the
/// hash and timestamps in place while keeping the same `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// Stable numeric identifier, assigned on first insert
    pub id: i64,
    /// Absolute path to the file (unique)
    pub path: String,
    /// Content hash at scan time
    pub hash: String,
    /// Declared content type (e.g. "text/markdown")
    pub file_type: String,
    /// Last-modified timestamp as reported by the scanner, RFC 3339.
    /// Kept as a string so an unparseable value degrades to a zero
    /// modification score instead of failing the record.
    pub last_modified: String,
    /// When the file was last scanned
    pub last_scanned: DateTime<Utc>,
    /// When the record was first created
    pub created_at: DateTime<Utc>,
}

/// Embedded content owned by exactly one [`FileRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Owning file id
    pub file_id: i64,
    /// Bounded preview of the embedded text (first [`PREVIEW_MAX_CHARS`] chars)
    pub content_preview: String,
    /// The embedding vector. `None` means content was stored without a
    /// usable vector; such rows never enter the index.
    pub vector: Option<Vec<f32>>,
}

impl EmbeddingRecord {
    /// Create a bounded content preview from the original text
    pub fn preview_of(text: &str) -> String {
        text.chars().take(PREVIEW_MAX_CHARS).collect()
    }
}

/// Access history owned by exactly one [`FileRecord`].
///
/// Created on first recorded access, updated in place afterwards. The
/// access count never decreases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Owning file id
    pub file_id: i64,
    /// Number of recorded accesses
    pub access_count: u64,
    /// Timestamp of the most recent access
    pub last_accessed: DateTime<Utc>,
}

/// Canonical identity of an unordered file pair.
///
/// Construction enforces `lo < hi`, so `(a, b)` and `(b, a)` always map to
/// the same key and self-pairs are unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    pub lo: i64,
    pub hi: i64,
}

impl EdgeKey {
    /// Canonicalize an unordered pair. Returns `None` for self-pairs.
    pub fn new(a: i64, b: i64) -> Option<Self> {
        if a == b {
            None
        } else {
            Some(Self {
                lo: a.min(b),
                hi: a.max(b),
            })
        }
    }
}

/// A co-occurrence edge as persisted in the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooccurrenceEdge {
    /// Lower file id of the canonical pair
    pub file_lo: i64,
    /// Higher file id of the canonical pair
    pub file_hi: i64,
    /// Number of co-occurrence events observed for the pair
    pub count: u64,
}

impl CooccurrenceEdge {
    pub fn key(&self) -> Option<EdgeKey> {
        EdgeKey::new(self.file_lo, self.file_hi)
    }
}

/// Header for a persisted store snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Snapshot format version
    pub version: DataVersion,
    /// When the snapshot was written
    pub created_at: DateTime<Utc>,
    /// Number of file records in the snapshot
    pub file_count: usize,
    /// Number of embedding records in the snapshot
    pub embedding_count: usize,
    /// SHA-256 checksum of the serialized tables payload
    pub checksum: Option<String>,
}

impl SnapshotHeader {
    pub fn validate_compatibility(&self) -> StoreResult<()> {
        if !DataVersion::CURRENT.is_compatible(&self.version) {
            return Err(StoreError::VersionIncompatible {
                expected: DataVersion::CURRENT.version_string(),
                found: self.version.version_string(),
            });
        }
        Ok(())
    }
}

/// All persisted tables, in a deterministic (id-sorted) vector form.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SnapshotTables {
    pub files: Vec<FileRecord>,
    pub embeddings: Vec<EmbeddingRecord>,
    pub activity: Vec<ActivityRecord>,
    pub edges: Vec<CooccurrenceEdge>,
    /// Next file id to assign
    pub next_file_id: i64,
}

/// A complete snapshot file as read from disk
#[derive(Debug, Deserialize)]
pub struct Snapshot {
    pub header: SnapshotHeader,
    pub tables: SnapshotTables,
}

/// Compute a SHA-256 checksum over raw bytes, hex encoded
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
