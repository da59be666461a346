/// Configuration for lorebase.
///
/// An explicit, immutable value constructed once at process start and passed
/// by reference into the indexer, search engine, and vector index
/// constructors. Loaded from a JSON file with per-field defaults.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ── Default value functions ──────────────────────────────────────────

fn default_repos() -> Vec<String> {
    vec!["./docs".to_string()]
}

fn default_db_path() -> String {
    dirs::data_local_dir()
        .map(|d| d.join("lorebase").join("lorebase.db"))
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_else(|| "./lorebase.db".to_string())
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_search_limit() -> usize {
    10
}

fn default_distance_threshold() -> f64 {
    0.85
}

fn default_model_name() -> String {
    "lexical-trigram".to_string()
}

fn default_dimensions() -> usize {
    384
}

// ── Config structs ───────────────────────────────────────────────────

/// Which similarity-search backend stores the vectors. A configuration-time
/// decision: vectors are not portable between backend storage formats, so
/// switching requires a full rebuild.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackendKind {
    /// sqlite-vec `vec0` virtual table (dedicated extension).
    #[default]
    Vec,
    /// Plain BLOB table with full-scan cosine ranking (fallback).
    Scan,
}

impl VectorBackendKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            VectorBackendKind::Vec => "vec",
            VectorBackendKind::Scan => "scan",
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Document tree roots to index (markdown files only).
    #[serde(default = "default_repos")]
    pub repos: Vec<String>,

    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Maximum characters per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters shared between consecutive chunks. Must be smaller than
    /// `chunk_size`.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    #[serde(default)]
    pub vector_backend: VectorBackendKind,

    /// Default maximum number of search hits.
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,

    /// Default maximum cosine distance for a hit to count as relevant.
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: f64,

    #[serde(default)]
    pub model: ModelConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            repos: default_repos(),
            db_path: default_db_path(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            vector_backend: VectorBackendKind::default(),
            search_limit: default_search_limit(),
            distance_threshold: default_distance_threshold(),
            model: ModelConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            dimensions: default_dimensions(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to `"lorebase.json"`. If the file
    /// does not exist, returns a default config and generates a template for
    /// the default path.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            "lorebase.json"
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            if path == "lorebase.json" {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        let cfg: Config = serde_json::from_str(&data)
            .with_context(|| format!("invalid JSON in {path}"))?;

        info!("Loaded configuration from {path}");
        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.chunk_size > 0, "chunk_size must be positive");
        anyhow::ensure!(
            self.chunk_overlap < self.chunk_size,
            "chunk_overlap ({}) must be smaller than chunk_size ({})",
            self.chunk_overlap,
            self.chunk_size
        );
        anyhow::ensure!(self.search_limit > 0, "search_limit must be positive");
        anyhow::ensure!(
            self.distance_threshold > 0.0,
            "distance_threshold must be positive"
        );
        anyhow::ensure!(
            self.model.dimensions > 0,
            "model.dimensions must be positive"
        );
        anyhow::ensure!(
            !self.repos.is_empty(),
            "at least one repository root must be configured"
        );
        Ok(())
    }

    /// Create the database directory if it doesn't exist.
    pub fn ensure_db_dir(&self) -> Result<()> {
        if let Some(parent) = PathBuf::from(&self.db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(config.search_limit, 10);
        assert_eq!(config.vector_backend, VectorBackendKind::Vec);
        assert_eq!(config.model.dimensions, 384);
        assert_eq!(config.model.name, "lexical-trigram");
        assert!((config.distance_threshold - 0.85).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"{"chunk_size": 800, "db_path": "./test.db", "vector_backend": "scan"}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.chunk_size, 800);
        assert_eq!(config.db_path, "./test.db");
        assert_eq!(config.vector_backend, VectorBackendKind::Scan);
        // Other fields keep defaults
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(config.model.dimensions, 384);
    }

    #[test]
    fn test_validate_bad_chunk_size() {
        let mut config = Config::default();
        config.chunk_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_overlap_must_be_smaller_than_chunk_size() {
        let mut config = Config::default();
        config.chunk_overlap = config.chunk_size;
        assert!(config.validate().is_err());

        config.chunk_overlap = config.chunk_size + 1;
        assert!(config.validate().is_err());

        config.chunk_overlap = config.chunk_size - 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_repos() {
        let mut config = Config::default();
        config.repos = vec![];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backend_kind_roundtrip() {
        let json = serde_json::to_string(&VectorBackendKind::Scan).unwrap();
        assert_eq!(json, r#""scan""#);
        let kind: VectorBackendKind = serde_json::from_str(r#""vec""#).unwrap();
        assert_eq!(kind, VectorBackendKind::Vec);
        assert_eq!(kind.as_str(), "vec");
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.chunk_size, config.chunk_size);
        assert_eq!(parsed.db_path, config.db_path);
        assert_eq!(parsed.model.name, config.model.name);
        assert_eq!(parsed.vector_backend, config.vector_backend);
    }
}
