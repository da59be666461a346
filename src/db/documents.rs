use std::collections::{HashMap, HashSet};

use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};

use super::Db;
use super::models::{DocumentRecord, IntegrityReport, NewDocument, Stats};
use crate::error::{Error, Result};
use crate::vector::VectorIndex;

fn map_document(row: &Row<'_>) -> rusqlite::Result<DocumentRecord> {
    Ok(DocumentRecord {
        id: row.get(0)?,
        repo: row.get(1)?,
        path: row.get(2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        fingerprint: row.get(5)?,
        size: row.get(6)?,
        modified_at: row.get(7)?,
        indexed_at: row.get(8)?,
    })
}

const DOCUMENT_COLUMNS: &str =
    "id, repo, path, title, content, fingerprint, size, modified_at, indexed_at";

impl Db {
    /// Insert or update a document's metadata by path. Returns the stable
    /// document id.
    pub fn upsert_document(&mut self, doc: &NewDocument<'_>) -> Result<i64> {
        let tx = self.conn.transaction()?;
        let id = upsert_document_tx(&tx, doc)?;
        tx.commit()?;
        Ok(id)
    }

    /// Fetch a document by id.
    pub fn get_document(&self, id: i64) -> Result<DocumentRecord> {
        self.conn
            .query_row(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?"),
                params![id],
                map_document,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("document id {id}")))
    }

    /// Fetch a document by its path.
    pub fn get_document_by_path(&self, path: &str) -> Result<DocumentRecord> {
        self.conn
            .query_row(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE path = ?"),
                params![path],
                map_document,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("document {path}")))
    }

    /// List all documents ordered by path.
    pub fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY path"))?;
        let rows = stmt.query_map([], map_document)?;

        let mut docs = Vec::new();
        for row in rows {
            docs.push(row?);
        }
        Ok(docs)
    }

    /// Map of path → stored content fingerprint, the incremental-diff input.
    pub fn list_fingerprints(&self) -> Result<HashMap<String, String>> {
        let mut stmt = self.conn.prepare("SELECT path, fingerprint FROM documents")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut fingerprints = HashMap::new();
        for row in rows {
            let (path, fp) = row?;
            fingerprints.insert(path, fp);
        }
        Ok(fingerprints)
    }

    /// Delete a document by path, cascading to its chunks, images, and
    /// vector rows in one transaction.
    pub fn delete_document(&mut self, index: &dyn VectorIndex, path: &str) -> Result<()> {
        let tx = self.conn.transaction()?;

        let doc_id: Option<i64> = tx
            .query_row(
                "SELECT id FROM documents WHERE path = ?",
                params![path],
                |row| row.get(0),
            )
            .optional()?;
        let Some(doc_id) = doc_id else {
            return Err(Error::NotFound(format!("document {path}")));
        };

        // Backend vector tables don't participate in SQL cascades, so their
        // rows go first.
        delete_vectors_for_document(&tx, index, doc_id)?;
        tx.execute("DELETE FROM documents WHERE id = ?", params![doc_id])?;

        tx.commit()?;
        Ok(())
    }

    /// Drop every document (cascading chunks and images) and all vector
    /// rows. Used by full rebuilds.
    pub fn clear_all(&mut self, index: &dyn VectorIndex) -> Result<()> {
        let tx = self.conn.transaction()?;
        index.delete_all(&tx)?;
        tx.execute("DELETE FROM documents", [])?;
        tx.commit()?;
        Ok(())
    }

    /// Row counts for the status operation.
    pub fn stats(&self, index: &dyn VectorIndex) -> Result<Stats> {
        let count = |sql: &str| -> Result<u64> {
            Ok(self.conn.query_row(sql, [], |row| row.get::<_, i64>(0))? as u64)
        };

        let mut stmt = self.conn.prepare("SELECT DISTINCT repo FROM documents ORDER BY repo")?;
        let repo_rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut repos = Vec::new();
        for row in repo_rows {
            repos.push(row?);
        }

        Ok(Stats {
            documents: count("SELECT COUNT(*) FROM documents")?,
            chunks: count("SELECT COUNT(*) FROM chunks")?,
            images: count("SELECT COUNT(*) FROM images")?,
            vectors: index.count(&self.conn)?,
            repos,
        })
    }

    /// Cross-check chunk rows against vector rows.
    ///
    /// Vectors with no owning chunk are a corruption finding (remediation:
    /// full rebuild). Chunks with no vector are merely not yet searchable.
    pub fn check_integrity(&self, index: &dyn VectorIndex) -> Result<IntegrityReport> {
        let mut stmt = self.conn.prepare("SELECT id FROM chunks")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        let mut chunk_ids = HashSet::new();
        for row in rows {
            chunk_ids.insert(row?);
        }

        let vector_ids: HashSet<i64> = index.list_ids(&self.conn)?.into_iter().collect();

        let orphaned_vectors = vector_ids.difference(&chunk_ids).count() as u64;
        let unsearchable_chunks = chunk_ids.difference(&vector_ids).count() as u64;

        Ok(IntegrityReport {
            orphaned_vectors,
            unsearchable_chunks,
        })
    }
}

/// Upsert the document row inside an open transaction.
pub(super) fn upsert_document_tx(
    conn: &rusqlite::Connection,
    doc: &NewDocument<'_>,
) -> Result<i64> {
    let id = conn.query_row(
        r#"
        INSERT INTO documents (repo, path, title, content, fingerprint, size, modified_at, indexed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(path) DO UPDATE SET
            repo = excluded.repo,
            title = excluded.title,
            content = excluded.content,
            fingerprint = excluded.fingerprint,
            size = excluded.size,
            modified_at = excluded.modified_at,
            indexed_at = excluded.indexed_at
        RETURNING id
        "#,
        params![
            doc.repo,
            doc.path,
            doc.title,
            doc.content,
            doc.fingerprint,
            doc.size,
            doc.modified_at,
            Utc::now(),
        ],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Delete the backend vector rows for every chunk of a document, inside an
/// open transaction.
pub(super) fn delete_vectors_for_document(
    conn: &rusqlite::Connection,
    index: &dyn VectorIndex,
    document_id: i64,
) -> Result<()> {
    let mut stmt = conn.prepare("SELECT id FROM chunks WHERE document_id = ?")?;
    let rows = stmt.query_map(params![document_id], |row| row.get::<_, i64>(0))?;
    for row in rows {
        index.delete(conn, row?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector;

    fn new_doc<'a>(path: &'a str, content: &'a str, fp: &'a str) -> NewDocument<'a> {
        NewDocument {
            repo: "/repo",
            path,
            title: "Title",
            content,
            fingerprint: fp,
            size: content.len() as i64,
            modified_at: Utc::now(),
        }
    }

    fn open_with_index() -> (Db, Box<dyn VectorIndex>) {
        let db = Db::open_in_memory().unwrap();
        let index = vector::create(crate::config::VectorBackendKind::Scan, 4);
        index.ensure_schema(&db.conn).unwrap();
        (db, index)
    }

    #[test]
    fn test_upsert_is_stable_by_path() {
        let (mut db, _index) = open_with_index();

        let id1 = db.upsert_document(&new_doc("a.md", "one", "fp1")).unwrap();
        let id2 = db.upsert_document(&new_doc("a.md", "two", "fp2")).unwrap();
        assert_eq!(id1, id2, "upsert must keep the document id stable");

        let doc = db.get_document_by_path("a.md").unwrap();
        assert_eq!(doc.content, "two");
        assert_eq!(doc.fingerprint, "fp2");
    }

    #[test]
    fn test_duplicate_path_outside_upsert_is_constraint_violation() {
        let (mut db, _index) = open_with_index();
        db.upsert_document(&new_doc("a.md", "one", "fp1")).unwrap();

        let err = db
            .conn
            .execute(
                "INSERT INTO documents (repo, path, title, content, fingerprint, size, modified_at, indexed_at)
                 VALUES ('/repo', 'a.md', '', '', 'fp', 0, ?, ?)",
                params![Utc::now(), Utc::now()],
            )
            .map_err(Error::from)
            .unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation(_)));
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let (db, index) = open_with_index();
        assert!(matches!(
            db.get_document_by_path("nope.md"),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(db.get_document(99), Err(Error::NotFound(_))));

        let mut db = db;
        assert!(matches!(
            db.delete_document(index.as_ref(), "nope.md"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_list_fingerprints() {
        let (mut db, _index) = open_with_index();
        db.upsert_document(&new_doc("a.md", "one", "fp-a")).unwrap();
        db.upsert_document(&new_doc("b.md", "two", "fp-b")).unwrap();

        let fps = db.list_fingerprints().unwrap();
        assert_eq!(fps.len(), 2);
        assert_eq!(fps["a.md"], "fp-a");
        assert_eq!(fps["b.md"], "fp-b");
    }

    #[test]
    fn test_stats_and_integrity_on_empty_store() {
        let (db, index) = open_with_index();
        let stats = db.stats(index.as_ref()).unwrap();
        assert_eq!(stats.documents, 0);
        assert_eq!(stats.vectors, 0);

        let report = db.check_integrity(index.as_ref()).unwrap();
        assert!(report.is_healthy());
        assert_eq!(report.unsearchable_chunks, 0);
    }
}
