//! Semantic search over the indexed knowledge base.
//!
//! Read-only: embeds the query, asks the vector index for nearest chunks,
//! filters by distance threshold, and hydrates hits from the document
//! store. Also hosts the fetch lookups used by the tool layer.
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex as TokioMutex;
use tracing::debug;

use crate::config::Config;
use crate::db::Db;
use crate::db::models::{ChunkRecord, DocumentRecord, ImageRecord};
use crate::embedder::Embedder;
use crate::error::{Error, Result};
use crate::vector::VectorIndex;

/// A single search result, closest first.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk_id: i64,
    pub document_id: i64,
    pub path: String,
    pub title: String,
    pub repo: String,
    pub content: String,
    pub position: usize,
    pub distance: f64,
}

/// A fetched document with its image references.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub document: DocumentRecord,
    pub images: Vec<ImageRecord>,
}

/// A fetched document resolved from a search hit's chunk id.
#[derive(Debug, Clone)]
pub struct HitDocument {
    pub document: DocumentRecord,
    pub hit_chunk: ChunkRecord,
    pub images: Vec<ImageRecord>,
}

pub struct SearchEngine {
    db: Arc<TokioMutex<Db>>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    default_threshold: f64,
}

impl SearchEngine {
    pub fn new(
        db: Arc<TokioMutex<Db>>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        config: &Config,
    ) -> Self {
        Self {
            db,
            index,
            embedder,
            default_threshold: config.distance_threshold,
        }
    }

    /// Search for the `limit` nearest chunks within the distance threshold,
    /// ascending by distance. An empty result is valid. An embedding
    /// failure surfaces directly; no partial results are fabricated.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        threshold: Option<f64>,
    ) -> Result<Vec<SearchHit>> {
        let threshold = threshold.unwrap_or(self.default_threshold);
        let query_vector = self.embedder.embed(query)?;

        let db = self.db.lock().await;
        let hits = self.index.query(&db.conn, &query_vector, limit)?;

        let mut results = Vec::new();
        for hit in hits {
            if hit.distance > threshold {
                continue;
            }
            // A dangling vector id means its chunk is mid-transition or the
            // index is stale; it is simply not a result.
            let chunk = match db.get_chunk(hit.chunk_id) {
                Ok(chunk) => chunk,
                Err(Error::NotFound(_)) => {
                    debug!("Vector {} has no chunk; skipping hit", hit.chunk_id);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let document = db.get_document(chunk.document_id)?;

            results.push(SearchHit {
                chunk_id: chunk.id,
                document_id: document.id,
                path: document.path,
                title: document.title,
                repo: document.repo,
                content: chunk.content,
                position: chunk.position,
                distance: hit.distance,
            });
        }

        Ok(results)
    }

    /// Fetch a full document by path. Pure lookup.
    pub async fn fetch_document(&self, path: &str) -> Result<FetchedDocument> {
        let db = self.db.lock().await;
        let document = db.get_document_by_path(path)?;
        let images = db.get_images(document.id)?;
        Ok(FetchedDocument { document, images })
    }

    /// Resolve a search hit's chunk id to its owning document's full text.
    /// Pure lookup, no re-ranking.
    pub async fn fetch_by_hit(&self, chunk_id: i64) -> Result<HitDocument> {
        let db = self.db.lock().await;
        let hit_chunk = db.get_chunk(chunk_id)?;
        let document = db.get_document(hit_chunk.document_id)?;
        let images = db.get_images(document.id)?;
        Ok(HitDocument {
            document,
            hit_chunk,
            images,
        })
    }
}
