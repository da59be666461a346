/// MCP tool handlers.
///
/// Six tools over the knowledge base:
/// 1. index_rebuild     – full rebuild of the search index
/// 2. index_update      – incremental update (changed/new/deleted files)
/// 3. search_semantic   – vector similarity search with distance threshold
/// 4. docs_fetch        – fetch a full document by path
/// 5. docs_fetch_by_hit – resolve a search hit's chunk id to its document
/// 6. system_status     – counts, config summary, backend health
use rmcp::handler::server::ServerHandler;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{ErrorData as McpError, handler::server::tool::ToolRouter, model::*, tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;

use crate::error::Error;
use crate::mcp::server::McpContext;
use crate::search::FetchedDocument;
use crate::source::FsTreeSource;

const MAX_SEARCH_LIMIT: usize = 100;

// ── Parameter structs ────────────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
struct SearchParams {
    /// Search query (natural language)
    query: String,
    /// Max results (default from config)
    limit: Option<usize>,
    /// Max cosine distance for a hit; lower = stricter (default from config)
    distance_threshold: Option<f64>,
}

#[derive(Deserialize, JsonSchema)]
struct PathParam {
    /// Document path as returned by search results
    path: String,
}

#[derive(Deserialize, JsonSchema)]
struct ChunkIdParam {
    /// The chunk_id from a search result
    chunk_id: i64,
}

// ── Response helpers ─────────────────────────────────────────────────

fn json_result(value: serde_json::Value) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(&value).unwrap_or_default(),
    )]))
}

fn error_result(msg: &str) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(msg.to_string())]))
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn document_json(fetched: &FetchedDocument) -> serde_json::Value {
    serde_json::json!({
        "id": fetched.document.id,
        "path": fetched.document.path,
        "title": fetched.document.title,
        "repo": fetched.document.repo,
        "content": fetched.document.content,
        "images": fetched.images.iter().map(|img| serde_json::json!({
            "original": img.original_path,
            "absolute": img.absolute_path,
            "alt": img.alt_text,
        })).collect::<Vec<_>>(),
    })
}

// ── Tool implementations ─────────────────────────────────────────────

#[derive(Clone)]
pub struct AppTools {
    pub ctx: McpContext,
    pub tool_router: ToolRouter<Self>,
}

impl ServerHandler for AppTools {}

#[tool_router]
impl AppTools {
    pub fn new(ctx: McpContext) -> Self {
        Self {
            ctx,
            tool_router: Self::tool_router(),
        }
    }

    fn source(&self) -> FsTreeSource {
        FsTreeSource::new(self.ctx.config.repos.clone())
    }

    // ── Tool 1: index_rebuild ───────────────────────────────────────

    #[tool(
        description = "Full rebuild of the search index. Drops everything and re-indexes all documents from scratch."
    )]
    async fn index_rebuild(&self) -> Result<CallToolResult, McpError> {
        match self.ctx.indexer.rebuild(&self.source()).await {
            Ok(summary) => json_result(
                serde_json::to_value(&summary)
                    .map_err(|e| McpError::internal_error(e.to_string(), None))?,
            ),
            Err(e) => error_result(&format!("rebuild failed: {e}")),
        }
    }

    // ── Tool 2: index_update ────────────────────────────────────────

    #[tool(
        description = "Incremental index update. Only processes changed or new files and removes deleted ones."
    )]
    async fn index_update(&self) -> Result<CallToolResult, McpError> {
        match self.ctx.indexer.update(&self.source()).await {
            Ok(summary) => json_result(
                serde_json::to_value(&summary)
                    .map_err(|e| McpError::internal_error(e.to_string(), None))?,
            ),
            Err(e) => error_result(&format!("update failed: {e}")),
        }
    }

    // ── Tool 3: search_semantic ─────────────────────────────────────

    #[tool(
        description = "Semantic search over indexed documentation. Returns chunks ordered by ascending cosine distance; results beyond the distance threshold are excluded."
    )]
    async fn search_semantic(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.query.is_empty() {
            return error_result("query is required");
        }
        let limit = p
            .limit
            .unwrap_or(self.ctx.config.search_limit)
            .min(MAX_SEARCH_LIMIT);

        let hits = self
            .ctx
            .search
            .search(&p.query, limit, p.distance_threshold)
            .await
            .map_err(|e| McpError::internal_error(format!("search failed: {e}"), None))?;

        if hits.is_empty() {
            return json_result(serde_json::json!({
                "results": [],
                "message": "No results found within the distance threshold. \
                            Try rephrasing or use a higher distance_threshold.",
            }));
        }

        let results: Vec<serde_json::Value> = hits
            .iter()
            .map(|hit| {
                serde_json::json!({
                    "chunk_id": hit.chunk_id,
                    "document_id": hit.document_id,
                    "path": hit.path,
                    "title": hit.title,
                    "repo": hit.repo,
                    "content": hit.content,
                    "position": hit.position,
                    "distance": round4(hit.distance),
                })
            })
            .collect();

        json_result(serde_json::json!({ "results": results }))
    }

    // ── Tool 4: docs_fetch ──────────────────────────────────────────

    #[tool(description = "Fetch full document content by path.")]
    async fn docs_fetch(&self, params: Parameters<PathParam>) -> Result<CallToolResult, McpError> {
        let path = &params.0.path;
        if path.is_empty() {
            return error_result("path is required");
        }

        match self.ctx.search.fetch_document(path).await {
            Ok(fetched) => json_result(document_json(&fetched)),
            Err(Error::NotFound(_)) => error_result("Document not found."),
            Err(e) => Err(McpError::internal_error(format!("fetch failed: {e}"), None)),
        }
    }

    // ── Tool 5: docs_fetch_by_hit ───────────────────────────────────

    #[tool(description = "Fetch a full document from a search hit's chunk id.")]
    async fn docs_fetch_by_hit(
        &self,
        params: Parameters<ChunkIdParam>,
    ) -> Result<CallToolResult, McpError> {
        match self.ctx.search.fetch_by_hit(params.0.chunk_id).await {
            Ok(hit) => {
                let mut value = document_json(&FetchedDocument {
                    document: hit.document,
                    images: hit.images,
                });
                value["hit_chunk"] = serde_json::json!({
                    "chunk_id": hit.hit_chunk.id,
                    "position": hit.hit_chunk.position,
                    "content": hit.hit_chunk.content,
                });
                json_result(value)
            }
            Err(Error::NotFound(_)) => error_result("Chunk not found."),
            Err(e) => Err(McpError::internal_error(format!("fetch failed: {e}"), None)),
        }
    }

    // ── Tool 6: system_status ───────────────────────────────────────

    #[tool(
        description = "System status: document/chunk/vector counts, configuration summary, and vector backend health."
    )]
    async fn system_status(&self) -> Result<CallToolResult, McpError> {
        let db = self.ctx.db.lock().await;

        let stats = db
            .stats(self.ctx.index.as_ref())
            .map_err(|e| McpError::internal_error(format!("stats failed: {e}"), None))?;
        let integrity = db
            .check_integrity(self.ctx.index.as_ref())
            .map_err(|e| McpError::internal_error(format!("integrity check failed: {e}"), None))?;

        json_result(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "config": {
                "db_path": self.ctx.config.db_path,
                "vector_backend": self.ctx.config.vector_backend.as_str(),
                "embedding_model": self.ctx.config.model.name,
                "dimensions": self.ctx.config.model.dimensions,
                "chunk_size": self.ctx.config.chunk_size,
                "chunk_overlap": self.ctx.config.chunk_overlap,
                "repos": self.ctx.config.repos,
            },
            "database": stats,
            "integrity": {
                "healthy": integrity.is_healthy(),
                "orphaned_vectors": integrity.orphaned_vectors,
                "unsearchable_chunks": integrity.unsearchable_chunks,
                "remediation": if integrity.is_healthy() {
                    serde_json::Value::Null
                } else {
                    serde_json::json!("run index_rebuild to restore consistency")
                },
            },
        }))
    }
}
