//! MCP (stdio) adapter.
//!
//! A thin façade: tools translate protocol calls into `Indexer`,
//! `SearchEngine`, and `Db` operations and contain no indexing or search
//! logic of their own.
pub mod server;
pub mod tools;
