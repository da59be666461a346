//! Document Store over SQLite.
//!
//! Owns the documents/chunks/images schema and the transactional access
//! layer. Vector rows live in backend-specific tables managed through the
//! [`crate::vector::VectorIndex`] trait, but participate in this store's
//! transactions so a document's metadata, chunks, and vectors change
//! together or not at all.
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Once;
use tracing::info;

use crate::error::Result;

pub mod chunks;
pub mod documents;
pub mod models;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo TEXT NOT NULL,
    path TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL DEFAULT '',
    content TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    size INTEGER NOT NULL,
    modified_at DATETIME NOT NULL,
    indexed_at DATETIME NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_repo ON documents(repo);
CREATE INDEX IF NOT EXISTS idx_documents_fingerprint ON documents(fingerprint);

CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    content TEXT NOT NULL,
    start_char INTEGER NOT NULL,
    end_char INTEGER NOT NULL,
    UNIQUE(document_id, position)
);

CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);

CREATE TABLE IF NOT EXISTS images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    original_path TEXT NOT NULL,
    absolute_path TEXT NOT NULL,
    alt_text TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_images_document ON images(document_id);
"#;

static INIT_VEC: Once = Once::new();

/// Register the sqlite-vec extension for all future connections. Safe to
/// call multiple times.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

/// Compute the content fingerprint (SHA-256 hex) of a document's raw bytes.
#[must_use]
pub fn fingerprint(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// A wrapper around a SQLite connection initialized with sqlite-vec and the
/// document-store schema.
pub struct Db {
    pub(crate) conn: Connection,
}

impl Db {
    /// Open a database connection at the given path and initialize the
    /// document-store schema. Vector tables are created separately by the
    /// configured backend's `ensure_schema`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening database: {}", path.display());

        init_sqlite_vec();

        let conn = Connection::open(path)?;
        // journal_mode returns the resulting mode as a row.
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self { conn })
    }

    /// Open an in-memory database connection (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        init_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    /// Initialize the configured vector backend's schema on this
    /// connection. Fatal on backend/dimension mismatch with a prior index.
    pub fn ensure_vector_schema(&self, index: &dyn crate::vector::VectorIndex) -> Result<()> {
        index.ensure_schema(&self.conn)
    }
}
