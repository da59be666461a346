//! # lorebase — Local Markdown Knowledge Base
//!
//! Incrementally indexes markdown document trees into a searchable local
//! knowledge base and serves semantic retrieval to AI assistants via the
//! Model Context Protocol (MCP).
//!
//! ## Architecture
//!
//! - **[`config`]** — Explicit immutable configuration (JSON + defaults)
//! - **[`db`]** — Document store: SQLite schema, transactions, cascades
//! - **[`markdown`]** — Overlap chunking, title and image extraction
//! - **[`vector`]** — Pluggable vector index (sqlite-vec / full-scan)
//! - **[`embedder`]** — Embedding provider trait + local lexical model
//! - **[`source`]** — Document tree snapshots (path, fingerprint, bytes)
//! - **[`indexer`]** — Full rebuild and incremental update orchestration
//! - **[`search`]** — Threshold-filtered nearest-chunk retrieval
//! - **[`mcp`]** — MCP server with 6 tool handlers (stdio via rmcp)
pub mod config;
pub mod db;
pub mod embedder;
pub mod error;
pub mod indexer;
pub mod markdown;
pub mod mcp;
pub mod search;
pub mod source;
pub mod vector;
