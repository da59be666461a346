/// Vector backend on the sqlite-vec extension.
///
/// Stores embeddings in a `vec0` virtual table declared with a cosine
/// distance metric, so KNN queries come back ascending by cosine distance
/// on the same scale the scan backend reports.
use rusqlite::{Connection, params};

use super::{VectorHit, VectorIndex, check_meta, ensure_dimension, vector_to_blob};
use crate::config::VectorBackendKind;
use crate::error::{Error, Result};

pub struct SqliteVecIndex {
    dimension: usize,
}

impl SqliteVecIndex {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl VectorIndex for SqliteVecIndex {
    fn kind(&self) -> VectorBackendKind {
        VectorBackendKind::Vec
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn ensure_schema(&self, conn: &Connection) -> Result<()> {
        // Probe the extension before anything else; a missing or broken
        // extension is fatal for the run, not a per-document failure.
        conn.query_row("SELECT vec_version()", [], |row| row.get::<_, String>(0))
            .map_err(|e| Error::BackendUnavailable(format!("sqlite-vec probe failed: {e}")))?;

        check_meta(conn, self.kind(), self.dimension)?;

        conn.execute(
            &format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS vec_chunks USING vec0(
                    chunk_id INTEGER PRIMARY KEY,
                    embedding FLOAT[{}] distance_metric=cosine
                )",
                self.dimension
            ),
            [],
        )?;
        Ok(())
    }

    fn upsert(&self, conn: &Connection, chunk_id: i64, vector: &[f32]) -> Result<()> {
        ensure_dimension(self.dimension, vector)?;
        conn.execute(
            "INSERT OR REPLACE INTO vec_chunks (chunk_id, embedding) VALUES (?, ?)",
            params![chunk_id, vector_to_blob(vector)],
        )?;
        Ok(())
    }

    fn delete(&self, conn: &Connection, chunk_id: i64) -> Result<()> {
        conn.execute("DELETE FROM vec_chunks WHERE chunk_id = ?", params![chunk_id])?;
        Ok(())
    }

    fn delete_all(&self, conn: &Connection) -> Result<()> {
        conn.execute("DELETE FROM vec_chunks", [])?;
        Ok(())
    }

    fn query(&self, conn: &Connection, vector: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        ensure_dimension(self.dimension, vector)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut stmt = conn.prepare(
            "SELECT chunk_id, distance
             FROM vec_chunks
             WHERE embedding MATCH ?
             ORDER BY distance
             LIMIT ?",
        )?;
        let rows = stmt.query_map(params![vector_to_blob(vector), k as i64], |row| {
            Ok(VectorHit {
                chunk_id: row.get(0)?,
                distance: row.get(1)?,
            })
        })?;

        let mut hits = Vec::new();
        for row in rows {
            hits.push(row?);
        }
        Ok(hits)
    }

    fn count(&self, conn: &Connection) -> Result<u64> {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM vec_chunks", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn list_ids(&self, conn: &Connection) -> Result<Vec<i64>> {
        let mut stmt = conn.prepare("SELECT chunk_id FROM vec_chunks")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }
}
