/// Full-scan fallback vector backend.
///
/// Embeddings live in a plain BLOB table and queries rank every row by
/// cosine distance computed in process. Linear in the number of chunks,
/// which is fine at local knowledge-base scale, and it works wherever
/// plain SQLite does.
use rusqlite::{Connection, params};

use super::{VectorHit, VectorIndex, blob_to_vector, check_meta, ensure_dimension, vector_to_blob};
use crate::config::VectorBackendKind;
use crate::error::{Error, Result};

pub struct ScanIndex {
    dimension: usize,
}

impl ScanIndex {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

impl VectorIndex for ScanIndex {
    fn kind(&self) -> VectorBackendKind {
        VectorBackendKind::Scan
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn ensure_schema(&self, conn: &Connection) -> Result<()> {
        check_meta(conn, self.kind(), self.dimension)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS flat_vectors (
                chunk_id INTEGER PRIMARY KEY,
                embedding BLOB NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn upsert(&self, conn: &Connection, chunk_id: i64, vector: &[f32]) -> Result<()> {
        ensure_dimension(self.dimension, vector)?;
        conn.execute(
            "INSERT OR REPLACE INTO flat_vectors (chunk_id, embedding) VALUES (?, ?)",
            params![chunk_id, vector_to_blob(vector)],
        )?;
        Ok(())
    }

    fn delete(&self, conn: &Connection, chunk_id: i64) -> Result<()> {
        conn.execute(
            "DELETE FROM flat_vectors WHERE chunk_id = ?",
            params![chunk_id],
        )?;
        Ok(())
    }

    fn delete_all(&self, conn: &Connection) -> Result<()> {
        conn.execute("DELETE FROM flat_vectors", [])?;
        Ok(())
    }

    fn query(&self, conn: &Connection, vector: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        ensure_dimension(self.dimension, vector)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut stmt = conn.prepare("SELECT chunk_id, embedding FROM flat_vectors")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut hits = Vec::new();
        for row in rows {
            let (chunk_id, blob) = row?;
            if blob.len() != self.dimension * 4 {
                return Err(Error::StorageCorruption(format!(
                    "vector blob for chunk {chunk_id} is {} bytes, index expects {}",
                    blob.len(),
                    self.dimension * 4
                )));
            }
            let stored = blob_to_vector(&blob);
            hits.push(VectorHit {
                chunk_id,
                distance: cosine_distance(vector, &stored),
            });
        }

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }

    fn count(&self, conn: &Connection) -> Result<u64> {
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM flat_vectors", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn list_ids(&self, conn: &Connection) -> Result<Vec<i64>> {
        let mut stmt = conn.prepare("SELECT chunk_id FROM flat_vectors")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }
}
