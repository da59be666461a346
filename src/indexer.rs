//! Indexing orchestration: full rebuilds and incremental updates.
//!
//! Runs are serialized (single writer); each document is committed in its
//! own transaction with embedding done strictly beforehand, so a failure
//! anywhere leaves that document's prior indexed state intact and the run
//! moves on to the next document.
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex as TokioMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::Db;
use crate::db::models::{NewChunk, NewDocument, NewImage};
use crate::embedder::Embedder;
use crate::error::{Error, Result};
use crate::markdown;
use crate::source::{DocumentSource, SourceDocument};
use crate::vector::{self, VectorIndex};

/// Outcome of one rebuild or update run.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Documents present in the source snapshot.
    pub total: usize,
    pub added: usize,
    pub modified: usize,
    pub removed: usize,
    pub skipped: usize,
    /// Documents successfully (re-)indexed.
    pub indexed: usize,
    pub failed: usize,
    pub failures: Vec<DocumentFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentFailure {
    pub path: String,
    pub reason: String,
}

pub struct Indexer {
    db: Arc<TokioMutex<Db>>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    chunk_size: usize,
    chunk_overlap: usize,
    run_lock: TokioMutex<()>,
    cancel: CancellationToken,
}

impl Indexer {
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
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            run_lock: TokioMutex::new(()),
            cancel: CancellationToken::new(),
        }
    }

    /// Handle for cooperative cancellation: cancelling stops the run before
    /// the next document; the in-flight document transaction completes.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Full rebuild: drop all documents, chunks, and vectors, then re-index
    /// every document in the snapshot unconditionally.
    pub async fn rebuild(&self, source: &dyn DocumentSource) -> Result<RunSummary> {
        let _guard = self.run_lock.try_lock().map_err(|_| Error::RunInProgress)?;
        info!("Starting full rebuild");

        let snapshot = source.snapshot()?;
        let mut summary = RunSummary {
            total: snapshot.len(),
            ..RunSummary::default()
        };

        {
            let mut db = self.db.lock().await;
            vector::reset_storage(&db.conn)?;
            self.index.ensure_schema(&db.conn)?;
            db.clear_all(self.index.as_ref())?;
        }

        for doc in &snapshot {
            if self.cancel.is_cancelled() {
                warn!("Rebuild cancelled; stopping before the next document");
                break;
            }
            summary.added += 1;
            match self.index_one(doc).await {
                Ok(()) => summary.indexed += 1,
                Err(e) => note_failure(&mut summary, &doc.path, e)?,
            }
        }

        info!(
            "Rebuild finished: {} indexed, {} failed of {} files",
            summary.indexed, summary.failed, summary.total
        );
        Ok(summary)
    }

    /// Incremental update: re-index added and modified documents, delete
    /// removed ones, leave unchanged documents untouched.
    pub async fn update(&self, source: &dyn DocumentSource) -> Result<RunSummary> {
        let _guard = self.run_lock.try_lock().map_err(|_| Error::RunInProgress)?;
        info!("Starting incremental update");

        let snapshot = source.snapshot()?;
        let stored = {
            let db = self.db.lock().await;
            db.list_fingerprints()?
        };

        let mut summary = RunSummary {
            total: snapshot.len(),
            ..RunSummary::default()
        };
        let current_paths: HashSet<&str> = snapshot.iter().map(|d| d.path.as_str()).collect();

        for doc in &snapshot {
            if self.cancel.is_cancelled() {
                warn!("Update cancelled; stopping before the next document");
                break;
            }
            match stored.get(&doc.path) {
                Some(fingerprint) if *fingerprint == doc.fingerprint => {
                    summary.skipped += 1;
                    continue;
                }
                Some(_) => summary.modified += 1,
                None => summary.added += 1,
            }
            match self.index_one(doc).await {
                Ok(()) => summary.indexed += 1,
                Err(e) => note_failure(&mut summary, &doc.path, e)?,
            }
        }

        for path in stored.keys() {
            if current_paths.contains(path.as_str()) {
                continue;
            }
            if self.cancel.is_cancelled() {
                break;
            }
            let mut db = self.db.lock().await;
            match db.delete_document(self.index.as_ref(), path) {
                Ok(()) => {
                    summary.removed += 1;
                    info!("Removed deleted document: {path}");
                }
                Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        info!(
            "Update finished: {} indexed, {} skipped, {} removed, {} failed",
            summary.indexed, summary.skipped, summary.removed, summary.failed
        );
        Ok(summary)
    }

    /// Chunk, embed, and commit one document. Embedding happens strictly
    /// before the write transaction.
    async fn index_one(&self, doc: &SourceDocument) -> Result<()> {
        let text = std::str::from_utf8(&doc.bytes).map_err(|e| Error::ParseFailure {
            path: doc.path.clone(),
            reason: e.to_string(),
        })?;

        let title = markdown::extract_title(text);
        let images = markdown::extract_images(text, Path::new(&doc.path), Path::new(&doc.repo));
        let spans = markdown::chunk_text(text, self.chunk_size, self.chunk_overlap);

        let texts: Vec<&str> = spans.iter().map(|s| s.content.as_str()).collect();
        let embeddings = self.embedder.embed_batch(&texts)?;

        let chunks: Vec<NewChunk<'_>> = spans
            .iter()
            .enumerate()
            .map(|(position, span)| NewChunk {
                position,
                content: &span.content,
                start_char: span.start,
                end_char: span.end,
            })
            .collect();
        let image_rows: Vec<NewImage<'_>> = images
            .iter()
            .map(|img| NewImage {
                original_path: &img.original_path,
                absolute_path: &img.absolute_path,
                alt_text: &img.alt_text,
            })
            .collect();
        let record = NewDocument {
            repo: &doc.repo,
            path: &doc.path,
            title: &title,
            content: text,
            fingerprint: &doc.fingerprint,
            size: doc.bytes.len() as i64,
            modified_at: doc.modified_at,
        };

        let mut db = self.db.lock().await;
        db.index_document(
            self.index.as_ref(),
            &record,
            &chunks,
            &embeddings,
            &image_rows,
        )?;
        debug!(
            "Indexed {} ({} chunks, {} images)",
            doc.path,
            chunks.len(),
            image_rows.len()
        );
        Ok(())
    }
}

/// Record a per-document failure and keep going; structural backend errors
/// abort the whole run instead.
fn note_failure(summary: &mut RunSummary, path: &str, err: Error) -> Result<()> {
    if matches!(err, Error::BackendUnavailable(_)) {
        return Err(err);
    }
    warn!("Failed to index {path}: {err}");
    summary.failed += 1;
    summary.failures.push(DocumentFailure {
        path: path.to_string(),
        reason: err.to_string(),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VectorBackendKind;
    use crate::embedder::EmbedderError;
    use crate::embedder::lexical::LexicalEmbedder;
    use crate::source::FsTreeSource;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{TempDir, tempdir};

    const DIM: usize = 64;

    /// Counts embedding calls, to prove unchanged documents trigger none.
    struct CountingEmbedder {
        inner: LexicalEmbedder,
        calls: AtomicUsize,
    }

    impl CountingEmbedder {
        fn new() -> Self {
            Self {
                inner: LexicalEmbedder::new(DIM),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Embedder for CountingEmbedder {
        fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbedderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(text)
        }

        fn embed_batch(&self, texts: &[&str]) -> std::result::Result<Vec<Vec<f32>>, EmbedderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed_batch(texts)
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }
    }

    /// Fails on any text containing a marker, to exercise per-document
    /// failure tolerance.
    struct FailingEmbedder {
        inner: LexicalEmbedder,
        marker: &'static str,
    }

    impl Embedder for FailingEmbedder {
        fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbedderError> {
            if text.contains(self.marker) {
                return Err(EmbedderError::InferenceFailed("provider timeout".into()));
            }
            self.inner.embed(text)
        }

        fn embed_batch(&self, texts: &[&str]) -> std::result::Result<Vec<Vec<f32>>, EmbedderError> {
            texts.iter().map(|t| self.embed(t)).collect()
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }
    }

    fn test_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.repos = vec![dir.path().to_string_lossy().to_string()];
        config.chunk_size = 200;
        config.chunk_overlap = 40;
        config.model.dimensions = DIM;
        config
    }

    fn build_indexer(config: &Config, embedder: Arc<dyn Embedder>) -> (Indexer, Arc<TokioMutex<Db>>) {
        let db = Db::open_in_memory().unwrap();
        let index: Arc<dyn VectorIndex> =
            vector::create(VectorBackendKind::Scan, DIM).into();
        index.ensure_schema(&db.conn).unwrap();
        let db = Arc::new(TokioMutex::new(db));
        let indexer = Indexer::new(db.clone(), index, embedder, config);
        (indexer, db)
    }

    #[tokio::test]
    async fn test_rebuild_then_noop_update() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "# Alpha\n\nFirst document body.").unwrap();
        fs::write(dir.path().join("b.md"), "# Beta\n\nSecond document body.").unwrap();

        let config = test_config(&dir);
        let embedder = Arc::new(CountingEmbedder::new());
        let (indexer, _db) = build_indexer(&config, embedder.clone());
        let source = FsTreeSource::new(config.repos.clone());

        let rebuild = indexer.rebuild(&source).await.unwrap();
        assert_eq!(rebuild.total, 2);
        assert_eq!(rebuild.indexed, 2);
        assert_eq!(rebuild.failed, 0);

        let calls_after_rebuild = embedder.calls();
        assert!(calls_after_rebuild > 0);

        // No file changed: zero re-chunking, zero embedding calls.
        let update = indexer.update(&source).await.unwrap();
        assert_eq!(update.skipped, 2);
        assert_eq!(update.added, 0);
        assert_eq!(update.modified, 0);
        assert_eq!(update.removed, 0);
        assert_eq!(update.indexed, 0);
        assert_eq!(embedder.calls(), calls_after_rebuild);
    }

    #[tokio::test]
    async fn test_update_reindexes_exactly_the_changed_document() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "# Alpha\n\nOriginal body.").unwrap();
        fs::write(dir.path().join("b.md"), "# Beta\n\nStable body.").unwrap();

        let config = test_config(&dir);
        let embedder: Arc<dyn Embedder> = Arc::new(LexicalEmbedder::new(DIM));
        let (indexer, db) = build_indexer(&config, embedder);
        let source = FsTreeSource::new(config.repos.clone());

        indexer.rebuild(&source).await.unwrap();

        let stable_chunks_before = {
            let db = db.lock().await;
            let doc = db
                .list_documents()
                .unwrap()
                .into_iter()
                .find(|d| d.path.ends_with("b.md"))
                .unwrap();
            db.get_chunks(doc.id).unwrap()
        };

        fs::write(dir.path().join("a.md"), "# Alpha\n\nCompletely rewritten body.").unwrap();

        let update = indexer.update(&source).await.unwrap();
        assert_eq!(update.modified, 1);
        assert_eq!(update.indexed, 1);
        assert_eq!(update.skipped, 1);

        let db = db.lock().await;
        let changed = db
            .list_documents()
            .unwrap()
            .into_iter()
            .find(|d| d.path.ends_with("a.md"))
            .unwrap();
        assert!(changed.content.contains("Completely rewritten"));

        // Untouched document keeps byte-identical chunk rows.
        let stable = db
            .list_documents()
            .unwrap()
            .into_iter()
            .find(|d| d.path.ends_with("b.md"))
            .unwrap();
        let stable_chunks_after = db.get_chunks(stable.id).unwrap();
        assert_eq!(stable_chunks_before.len(), stable_chunks_after.len());
        for (before, after) in stable_chunks_before.iter().zip(&stable_chunks_after) {
            assert_eq!(before.id, after.id);
            assert_eq!(before.content, after.content);
            assert_eq!(before.start_char, after.start_char);
        }
    }

    #[tokio::test]
    async fn test_update_removes_deleted_documents() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("keep.md"), "# Keep\n\nStays.").unwrap();
        fs::write(dir.path().join("gone.md"), "# Gone\n\nDisappears.").unwrap();

        let config = test_config(&dir);
        let embedder: Arc<dyn Embedder> = Arc::new(LexicalEmbedder::new(DIM));
        let (indexer, db) = build_indexer(&config, embedder);
        let source = FsTreeSource::new(config.repos.clone());

        indexer.rebuild(&source).await.unwrap();
        fs::remove_file(dir.path().join("gone.md")).unwrap();

        let update = indexer.update(&source).await.unwrap();
        assert_eq!(update.removed, 1);
        assert_eq!(update.skipped, 1);

        let db = db.lock().await;
        let docs = db.list_documents().unwrap();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].path.ends_with("keep.md"));
    }

    #[tokio::test]
    async fn test_per_document_failure_keeps_run_going() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("good.md"), "# Good\n\nIndexes fine.").unwrap();
        fs::write(dir.path().join("bad.md"), "# Bad\n\nPOISON inside.").unwrap();

        let config = test_config(&dir);
        let embedder: Arc<dyn Embedder> = Arc::new(FailingEmbedder {
            inner: LexicalEmbedder::new(DIM),
            marker: "POISON",
        });
        let (indexer, db) = build_indexer(&config, embedder);
        let source = FsTreeSource::new(config.repos.clone());

        let summary = indexer.rebuild(&source).await.unwrap();
        assert_eq!(summary.indexed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures.len(), 1);
        assert!(summary.failures[0].path.ends_with("bad.md"));

        let db = db.lock().await;
        let docs = db.list_documents().unwrap();
        assert_eq!(docs.len(), 1, "failed document must not be committed");
        assert!(docs[0].path.ends_with("good.md"));
    }

    #[tokio::test]
    async fn test_embedding_failure_preserves_prior_indexed_state() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("doc.md"), "# Doc\n\nHealthy first version.").unwrap();

        let config = test_config(&dir);
        let embedder: Arc<dyn Embedder> = Arc::new(FailingEmbedder {
            inner: LexicalEmbedder::new(DIM),
            marker: "POISON",
        });
        let (indexer, db) = build_indexer(&config, embedder);
        let source = FsTreeSource::new(config.repos.clone());

        indexer.rebuild(&source).await.unwrap();

        // The new revision fails to embed; the prior version must survive.
        fs::write(dir.path().join("doc.md"), "# Doc\n\nPOISON second version.").unwrap();
        let update = indexer.update(&source).await.unwrap();
        assert_eq!(update.failed, 1);
        assert_eq!(update.indexed, 0);

        let db = db.lock().await;
        let doc = db.list_documents().unwrap().pop().unwrap();
        assert!(doc.content.contains("Healthy first version"));
        assert_eq!(db.get_chunks(doc.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_a_parse_failure() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("bin.md"), [0xff, 0xfe, 0x00, 0x80]).unwrap();
        fs::write(dir.path().join("ok.md"), "# Fine").unwrap();

        let config = test_config(&dir);
        let embedder: Arc<dyn Embedder> = Arc::new(LexicalEmbedder::new(DIM));
        let (indexer, _db) = build_indexer(&config, embedder);
        let source = FsTreeSource::new(config.repos.clone());

        let summary = indexer.rebuild(&source).await.unwrap();
        assert_eq!(summary.indexed, 1);
        assert_eq!(summary.failed, 1);
        assert!(summary.failures[0].reason.contains("utf-8"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_run_is_rejected() {
        use std::sync::mpsc;

        /// Blocks inside snapshot() until released, holding the run lock.
        struct BlockingSource {
            entered: std::sync::Mutex<Option<mpsc::Sender<()>>>,
            release: std::sync::Mutex<Option<mpsc::Receiver<()>>>,
        }

        impl DocumentSource for BlockingSource {
            fn snapshot(&self) -> Result<Vec<SourceDocument>> {
                if let Some(tx) = self.entered.lock().unwrap().take() {
                    let _ = tx.send(());
                }
                if let Some(rx) = self.release.lock().unwrap().take() {
                    let _ = rx.recv();
                }
                Ok(Vec::new())
            }
        }

        let dir = tempdir().unwrap();
        let config = test_config(&dir);
        let embedder: Arc<dyn Embedder> = Arc::new(LexicalEmbedder::new(DIM));
        let (indexer, _db) = build_indexer(&config, embedder);
        let indexer = Arc::new(indexer);

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let blocking = Arc::new(BlockingSource {
            entered: std::sync::Mutex::new(Some(entered_tx)),
            release: std::sync::Mutex::new(Some(release_rx)),
        });

        let first = {
            let indexer = indexer.clone();
            let blocking = blocking.clone();
            tokio::spawn(async move { indexer.rebuild(blocking.as_ref()).await })
        };

        // Wait until the first run holds the lock, then try a second.
        entered_rx.recv().unwrap();
        let second = indexer.update(&FsTreeSource::new(config.repos.clone())).await;
        assert!(matches!(second, Err(Error::RunInProgress)));

        release_tx.send(()).unwrap();
        first.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_next_document() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "# A").unwrap();
        fs::write(dir.path().join("b.md"), "# B").unwrap();

        let config = test_config(&dir);
        let embedder: Arc<dyn Embedder> = Arc::new(LexicalEmbedder::new(DIM));
        let (indexer, _db) = build_indexer(&config, embedder);
        let source = FsTreeSource::new(config.repos.clone());

        indexer.cancellation_token().cancel();
        let summary = indexer.rebuild(&source).await.unwrap();
        assert_eq!(summary.indexed, 0);
        assert_eq!(summary.total, 2);
    }
}
