//! Vector index abstraction.
//!
//! A uniform contract over interchangeable similarity-search backends. The
//! backend is chosen once, at construction time, from configuration; nothing
//! outside the factory branches on backend identity. Vector storage formats
//! are not portable between backends, so switching requires a full rebuild
//! ([`reset_storage`]).
use rusqlite::{Connection, OptionalExtension};

use crate::config::VectorBackendKind;
use crate::error::{Error, Result};

mod scan_index;
mod vec_index;

pub use scan_index::ScanIndex;
pub use vec_index::SqliteVecIndex;

/// One nearest-neighbor match.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub chunk_id: i64,
    /// Cosine distance, ascending = more relevant.
    pub distance: f64,
}

/// Storage and nearest-neighbor search over embedding vectors keyed by
/// chunk id.
///
/// Implementations are stateless SQL strategies over the store's
/// connection, so vector writes can join the store's per-document
/// transactions.
pub trait VectorIndex: Send + Sync {
    fn kind(&self) -> VectorBackendKind;

    /// Fixed dimensionality, set at construction.
    fn dimension(&self) -> usize;

    /// Create backend tables and validate recorded backend/dimension
    /// against the configuration. Fatal on mismatch.
    fn ensure_schema(&self, conn: &Connection) -> Result<()>;

    /// Insert or replace the vector for a chunk id.
    fn upsert(&self, conn: &Connection, chunk_id: i64, vector: &[f32]) -> Result<()>;

    /// Remove the vector for a chunk id (a no-op if absent).
    fn delete(&self, conn: &Connection, chunk_id: i64) -> Result<()>;

    /// Remove every vector. Used by full rebuilds.
    fn delete_all(&self, conn: &Connection) -> Result<()>;

    /// The `k` nearest vectors, ascending by distance.
    fn query(&self, conn: &Connection, vector: &[f32], k: usize) -> Result<Vec<VectorHit>>;

    fn count(&self, conn: &Connection) -> Result<u64>;

    /// Every stored chunk id, for integrity checking.
    fn list_ids(&self, conn: &Connection) -> Result<Vec<i64>>;
}

/// Construct the configured backend. The only place backend identity is
/// inspected.
#[must_use]
pub fn create(kind: VectorBackendKind, dimension: usize) -> Box<dyn VectorIndex> {
    match kind {
        VectorBackendKind::Vec => Box::new(SqliteVecIndex::new(dimension)),
        VectorBackendKind::Scan => Box::new(ScanIndex::new(dimension)),
    }
}

/// Drop all backend storage and recorded metadata, regardless of which
/// backend wrote it. The first step of a full rebuild, and the only
/// supported way to change backend or dimension.
pub fn reset_storage(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "DROP TABLE IF EXISTS vec_chunks;
         DROP TABLE IF EXISTS flat_vectors;
         DROP TABLE IF EXISTS index_meta;",
    )?;
    Ok(())
}

/// Record or validate `(backend, dimension)` for the index instance.
/// Called from each backend's `ensure_schema`.
fn check_meta(conn: &Connection, kind: VectorBackendKind, dimension: usize) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS index_meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )?;

    let stored_backend: Option<String> = conn
        .query_row(
            "SELECT value FROM index_meta WHERE key = 'backend'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    match stored_backend {
        None => {
            conn.execute(
                "INSERT INTO index_meta (key, value) VALUES ('backend', ?), ('dimension', ?)",
                rusqlite::params![kind.as_str(), dimension.to_string()],
            )?;
            Ok(())
        }
        Some(stored) if stored != kind.as_str() => Err(Error::BackendUnavailable(format!(
            "index was built with backend '{stored}' but '{}' is configured; \
             a full rebuild is required to switch backends",
            kind.as_str()
        ))),
        Some(_) => {
            let stored_dim: Option<String> = conn
                .query_row(
                    "SELECT value FROM index_meta WHERE key = 'dimension'",
                    [],
                    |row| row.get(0),
                )
                .optional()?;
            let stored_dim: usize = stored_dim
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| Error::StorageCorruption("index_meta dimension unreadable".into()))?;
            if stored_dim != dimension {
                return Err(Error::DimensionMismatch {
                    expected: stored_dim,
                    actual: dimension,
                });
            }
            Ok(())
        }
    }
}

/// Reject a vector whose length differs from the index dimensionality.
/// Vectors are never truncated or padded.
fn ensure_dimension(expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(Error::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Serialize a float32 vector into the blob layout both backends store.
fn vector_to_blob(vector: &[f32]) -> &[u8] {
    bytemuck::cast_slice(vector)
}

/// Deserialize a stored blob back into a float32 vector.
fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    bytemuck::pod_collect_to_vec(blob)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    #[test]
    fn test_factory_dispatch() {
        let vec_index = create(VectorBackendKind::Vec, 8);
        assert_eq!(vec_index.kind(), VectorBackendKind::Vec);
        assert_eq!(vec_index.dimension(), 8);

        let scan_index = create(VectorBackendKind::Scan, 16);
        assert_eq!(scan_index.kind(), VectorBackendKind::Scan);
        assert_eq!(scan_index.dimension(), 16);
    }

    #[test]
    fn test_dimension_change_is_rejected() {
        let db = Db::open_in_memory().unwrap();
        let index = create(VectorBackendKind::Scan, 4);
        index.ensure_schema(&db.conn).unwrap();

        let wider = create(VectorBackendKind::Scan, 8);
        let err = wider.ensure_schema(&db.conn).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch { expected: 4, actual: 8 }
        ));
    }

    #[test]
    fn test_backend_switch_requires_rebuild() {
        let db = Db::open_in_memory().unwrap();
        let scan = create(VectorBackendKind::Scan, 4);
        scan.ensure_schema(&db.conn).unwrap();

        let vec = create(VectorBackendKind::Vec, 4);
        let err = vec.ensure_schema(&db.conn).unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(_)));

        // After a storage reset the new backend initializes cleanly.
        reset_storage(&db.conn).unwrap();
        vec.ensure_schema(&db.conn).unwrap();
    }

    #[test]
    fn test_blob_roundtrip() {
        let vector = vec![1.0f32, -2.5, 0.0, 3.25];
        let blob = vector_to_blob(&vector).to_vec();
        assert_eq!(blob.len(), 16);
        assert_eq!(blob_to_vector(&blob), vector);
    }
}
