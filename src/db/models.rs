use chrono::{DateTime, Utc};

/// A document row as stored.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub id: i64,
    /// Root the document was found under.
    pub repo: String,
    /// Unique, forward-slash-normalized path. The stable identifier.
    pub path: String,
    pub title: String,
    /// Full document text, kept for fetch operations.
    pub content: String,
    /// SHA-256 hex digest of the raw bytes.
    pub fingerprint: String,
    /// Size in bytes.
    pub size: i64,
    pub modified_at: DateTime<Utc>,
    pub indexed_at: DateTime<Utc>,
}

/// A chunk row as stored.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: i64,
    pub document_id: i64,
    /// 0-based ordinal, contiguous within one indexing generation.
    pub position: usize,
    pub content: String,
    /// Character offsets into the owning document's text.
    pub start_char: usize,
    pub end_char: usize,
}

/// An image-reference row as stored.
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub id: i64,
    pub document_id: i64,
    pub original_path: String,
    pub absolute_path: String,
    pub alt_text: String,
}

/// Document fields for an upsert.
#[derive(Debug, Clone)]
pub struct NewDocument<'a> {
    pub repo: &'a str,
    pub path: &'a str,
    pub title: &'a str,
    pub content: &'a str,
    pub fingerprint: &'a str,
    pub size: i64,
    pub modified_at: DateTime<Utc>,
}

/// Chunk fields for insertion during a replace.
#[derive(Debug, Clone)]
pub struct NewChunk<'a> {
    pub position: usize,
    pub content: &'a str,
    pub start_char: usize,
    pub end_char: usize,
}

/// Image fields for insertion during a replace.
#[derive(Debug, Clone)]
pub struct NewImage<'a> {
    pub original_path: &'a str,
    pub absolute_path: &'a str,
    pub alt_text: &'a str,
}

/// Row counts reported by the status operation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Stats {
    pub documents: u64,
    pub chunks: u64,
    pub images: u64,
    pub vectors: u64,
    pub repos: Vec<String>,
}

/// Result of the store/index consistency check.
///
/// Orphaned vectors indicate corruption (remediation: full rebuild).
/// Chunks without vectors are merely not yet searchable.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IntegrityReport {
    pub orphaned_vectors: u64,
    pub unsearchable_chunks: u64,
}

impl IntegrityReport {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.orphaned_vectors == 0
    }
}
