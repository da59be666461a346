use rusqlite::{OptionalExtension, Row, params};

use super::Db;
use super::documents::{delete_vectors_for_document, upsert_document_tx};
use super::models::{ChunkRecord, DocumentRecord, ImageRecord, NewChunk, NewDocument, NewImage};
use crate::error::{Error, Result};
use crate::vector::VectorIndex;

fn map_chunk(row: &Row<'_>) -> rusqlite::Result<ChunkRecord> {
    Ok(ChunkRecord {
        id: row.get(0)?,
        document_id: row.get(1)?,
        position: row.get::<_, i64>(2)? as usize,
        content: row.get(3)?,
        start_char: row.get::<_, i64>(4)? as usize,
        end_char: row.get::<_, i64>(5)? as usize,
    })
}

impl Db {
    /// Atomically replace a document's chunk set: delete existing chunks,
    /// images, and vector rows, insert the new set, and upsert one vector
    /// per fresh chunk id. Returns the new chunk ids in position order.
    pub fn replace_chunks(
        &mut self,
        index: &dyn VectorIndex,
        document_id: i64,
        chunks: &[NewChunk<'_>],
        embeddings: &[Vec<f32>],
        images: &[NewImage<'_>],
    ) -> Result<Vec<i64>> {
        let tx = self.conn.transaction()?;
        let ids = replace_chunks_tx(&tx, index, document_id, chunks, embeddings, images)?;
        tx.commit()?;
        Ok(ids)
    }

    /// The per-document commit: upsert the document row and replace its
    /// chunks, images, and vectors in a single transaction. A failure at
    /// any point leaves the prior indexed state intact.
    pub fn index_document(
        &mut self,
        index: &dyn VectorIndex,
        doc: &NewDocument<'_>,
        chunks: &[NewChunk<'_>],
        embeddings: &[Vec<f32>],
        images: &[NewImage<'_>],
    ) -> Result<i64> {
        let tx = self.conn.transaction()?;
        let doc_id = upsert_document_tx(&tx, doc)?;
        replace_chunks_tx(&tx, index, doc_id, chunks, embeddings, images)?;
        tx.commit()?;
        Ok(doc_id)
    }

    /// Fetch a single chunk by id.
    pub fn get_chunk(&self, chunk_id: i64) -> Result<ChunkRecord> {
        self.conn
            .query_row(
                "SELECT id, document_id, position, content, start_char, end_char
                 FROM chunks WHERE id = ?",
                params![chunk_id],
                map_chunk,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("chunk id {chunk_id}")))
    }

    /// All chunks of a document in position order.
    pub fn get_chunks(&self, document_id: i64) -> Result<Vec<ChunkRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, document_id, position, content, start_char, end_char
             FROM chunks WHERE document_id = ? ORDER BY position",
        )?;
        let rows = stmt.query_map(params![document_id], map_chunk)?;

        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(row?);
        }
        Ok(chunks)
    }

    /// Resolve a chunk id to its owning document.
    pub fn get_document_for_chunk(&self, chunk_id: i64) -> Result<DocumentRecord> {
        let chunk = self.get_chunk(chunk_id)?;
        self.get_document(chunk.document_id)
    }

    /// All image references of a document.
    pub fn get_images(&self, document_id: i64) -> Result<Vec<ImageRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, document_id, original_path, absolute_path, alt_text
             FROM images WHERE document_id = ? ORDER BY id",
        )?;
        let rows = stmt.query_map(params![document_id], |row| {
            Ok(ImageRecord {
                id: row.get(0)?,
                document_id: row.get(1)?,
                original_path: row.get(2)?,
                absolute_path: row.get(3)?,
                alt_text: row.get(4)?,
            })
        })?;

        let mut images = Vec::new();
        for row in rows {
            images.push(row?);
        }
        Ok(images)
    }
}

fn replace_chunks_tx(
    conn: &rusqlite::Connection,
    index: &dyn VectorIndex,
    document_id: i64,
    chunks: &[NewChunk<'_>],
    embeddings: &[Vec<f32>],
    images: &[NewImage<'_>],
) -> Result<Vec<i64>> {
    assert_eq!(
        chunks.len(),
        embeddings.len(),
        "chunks and embeddings length mismatch"
    );

    delete_vectors_for_document(conn, index, document_id)?;
    conn.execute("DELETE FROM chunks WHERE document_id = ?", params![document_id])?;
    conn.execute("DELETE FROM images WHERE document_id = ?", params![document_id])?;

    let mut chunk_ids = Vec::with_capacity(chunks.len());
    for (chunk, embedding) in chunks.iter().zip(embeddings) {
        conn.execute(
            "INSERT INTO chunks (document_id, position, content, start_char, end_char)
             VALUES (?, ?, ?, ?, ?)",
            params![
                document_id,
                chunk.position as i64,
                chunk.content,
                chunk.start_char as i64,
                chunk.end_char as i64,
            ],
        )?;
        let chunk_id = conn.last_insert_rowid();
        index.upsert(conn, chunk_id, embedding)?;
        chunk_ids.push(chunk_id);
    }

    for image in images {
        conn.execute(
            "INSERT INTO images (document_id, original_path, absolute_path, alt_text)
             VALUES (?, ?, ?, ?)",
            params![document_id, image.original_path, image.absolute_path, image.alt_text],
        )?;
    }

    Ok(chunk_ids)
}
