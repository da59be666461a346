/// Document source collaborator.
///
/// The indexer never touches the filesystem or version control directly; it
/// consumes a snapshot of (repo, path, fingerprint, bytes, mtime) tuples
/// from a [`DocumentSource`].
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use tracing::{debug, warn};

use crate::db;
use crate::error::Result;

/// One markdown file as seen by the source at snapshot time.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// The configured root this file was found under.
    pub repo: String,
    /// Forward-slash-normalized path, the document's stable identifier.
    pub path: String,
    /// SHA-256 hex digest of `bytes`.
    pub fingerprint: String,
    pub bytes: Vec<u8>,
    pub modified_at: DateTime<Utc>,
}

/// Produces point-in-time snapshots of the document trees.
pub trait DocumentSource: Send + Sync {
    fn snapshot(&self) -> Result<Vec<SourceDocument>>;
}

/// Filesystem source: walks the configured roots for `.md` files,
/// respecting ignore rules, and fingerprints their contents.
pub struct FsTreeSource {
    roots: Vec<PathBuf>,
}

impl FsTreeSource {
    #[must_use]
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
        }
    }
}

impl DocumentSource for FsTreeSource {
    fn snapshot(&self) -> Result<Vec<SourceDocument>> {
        let mut documents = Vec::new();

        for root in &self.roots {
            if !root.exists() {
                warn!("Repository root does not exist: {}", root.display());
                continue;
            }
            let repo = root.to_string_lossy().replace('\\', "/");

            let walker = WalkBuilder::new(root).hidden(false).build();
            for entry in walker.into_iter().filter_map(|e| e.ok()) {
                let path = entry.path();
                if path.is_dir() || path.extension().and_then(|s| s.to_str()) != Some("md") {
                    continue;
                }

                let bytes = match std::fs::read(path) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("Failed to read {}: {e}", path.display());
                        continue;
                    }
                };
                let modified_at: DateTime<Utc> = match entry.metadata().map(|m| m.modified()) {
                    Ok(Ok(mtime)) => mtime.into(),
                    _ => {
                        warn!("Failed to stat {}", path.display());
                        continue;
                    }
                };

                documents.push(SourceDocument {
                    repo: repo.clone(),
                    path: path.to_string_lossy().replace('\\', "/"),
                    fingerprint: db::fingerprint(&bytes),
                    bytes,
                    modified_at,
                });
            }
            debug!("Scanned {repo}");
        }

        documents.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(documents)
    }
}
