//! Process-wide configuration.
//!
//! Load order: defaults → YAML file (if present) → environment variables, last writer
//! wins — the same order the daemon config in this codebase family has always used.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;

/// Transport for the MCP tool surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum McpTransport {
    #[default]
    Stdio,
    Sse,
}

/// Everything the pipeline needs to run, resolved once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The managed root directory.
    #[serde(default = "default_root_path")]
    pub root_path: PathBuf,

    /// Optional remote vector store host/port. `None` means the embedded arroy/heed
    /// store is used in-process (the default and only path this crate implements).
    #[serde(default)]
    pub vector_host: Option<String>,
    #[serde(default)]
    pub vector_port: Option<u16>,

    /// Embedding model identifier, passed through to the `Embedder` capability.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// How often (seconds) the sync scheduler polls folders with a bound sync source.
    #[serde(default = "default_indexing_poll_interval")]
    pub indexing_poll_interval_secs: u64,

    #[serde(default = "default_mcp_port")]
    pub mcp_port: u16,
    #[serde(default)]
    pub mcp_transport: McpTransport,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default = "default_indexer_workers")]
    pub indexer_workers: usize,

    #[serde(default = "default_fsw_debounce_ms")]
    pub fsw_debounce_ms: u64,

    #[serde(default = "default_alpha")]
    pub hybrid_alpha: f32,

    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,

    #[serde(default = "default_lmdb_map_size_mb")]
    pub lmdb_map_size_mb: usize,

    #[serde(default = "default_cache_max_memory_mb")]
    pub cache_max_memory_mb: u64,

    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_root_path() -> PathBuf {
    PathBuf::from(".")
}
fn default_embedding_model() -> String {
    "bge-small-en-v1.5".to_string()
}
fn default_chunk_size() -> usize {
    constants::DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    constants::DEFAULT_CHUNK_OVERLAP
}
fn default_indexing_poll_interval() -> u64 {
    300
}
fn default_mcp_port() -> u16 {
    4445
}
fn default_http_port() -> u16 {
    4444
}
fn default_indexer_workers() -> usize {
    constants::DEFAULT_INDEXER_WORKERS
}
fn default_fsw_debounce_ms() -> u64 {
    constants::DEFAULT_FSW_DEBOUNCE_MS
}
fn default_alpha() -> f32 {
    constants::DEFAULT_ALPHA
}
fn default_embed_batch_size() -> usize {
    constants::DEFAULT_EMBED_BATCH_SIZE
}
fn default_lmdb_map_size_mb() -> usize {
    constants::DEFAULT_LMDB_MAP_SIZE_MB
}
fn default_cache_max_memory_mb() -> u64 {
    constants::DEFAULT_CACHE_MAX_MEMORY_MB
}
fn default_event_buffer() -> usize {
    constants::DEFAULT_EVENT_BUFFER
}

impl Default for Config {
    fn default() -> Self {
        // Deserializing an empty mapping exercises every #[serde(default = ...)] above,
        // which is also the config a user gets with zero configuration.
        serde_yaml_ng::from_str("{}").expect("Config defaults must deserialize")
    }
}

impl Config {
    /// Load from an optional YAML file, then apply environment variable overrides.
    pub fn load(yaml_path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match yaml_path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path)?;
                serde_yaml_ng::from_str(&content)?
            }
            _ => Self::default(),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ROOT_PATH") {
            self.root_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("VECTOR_HOST") {
            self.vector_host = Some(v);
        }
        if let Ok(v) = std::env::var("VECTOR_PORT") {
            if let Ok(p) = v.parse() {
                self.vector_port = Some(p);
            }
        }
        if let Ok(v) = std::env::var("EMBEDDING_MODEL") {
            self.embedding_model = v;
        }
        if let Ok(v) = std::env::var("CHUNK_SIZE") {
            if let Ok(n) = v.parse() {
                self.chunk_size = n;
            }
        }
        if let Ok(v) = std::env::var("CHUNK_OVERLAP") {
            if let Ok(n) = v.parse() {
                self.chunk_overlap = n;
            }
        }
        if let Ok(v) = std::env::var("INDEXING_POLL_INTERVAL") {
            if let Ok(n) = v.parse() {
                self.indexing_poll_interval_secs = n;
            }
        }
        if let Ok(v) = std::env::var("MCP_PORT") {
            if let Ok(n) = v.parse() {
                self.mcp_port = n;
            }
        }
        if let Ok(v) = std::env::var("MCP_TRANSPORT") {
            self.mcp_transport = match v.to_lowercase().as_str() {
                "sse" => McpTransport::Sse,
                _ => McpTransport::Stdio,
            };
        }
        if let Ok(v) = std::env::var("KBASE_LMDB_MAP_SIZE_MB") {
            if let Ok(n) = v.parse() {
                self.lmdb_map_size_mb = n;
            }
        }
        if let Ok(v) = std::env::var("KBASE_CACHE_MAX_MEMORY_MB") {
            if let Ok(n) = v.parse() {
                self.cache_max_memory_mb = n;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let config = Config::default();
        assert_eq!(config.chunk_size, constants::DEFAULT_CHUNK_SIZE);
        assert_eq!(config.chunk_overlap, constants::DEFAULT_CHUNK_OVERLAP);
        assert_eq!(config.hybrid_alpha, constants::DEFAULT_ALPHA);
        assert_eq!(config.indexer_workers, constants::DEFAULT_INDEXER_WORKERS);
    }

    #[test]
    fn test_load_missing_file_falls_back_to_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/kbase.yaml"))).unwrap();
        assert_eq!(config.mcp_port, 4445);
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("CHUNK_SIZE", "1024");
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.chunk_size, 1024);
        std::env::remove_var("CHUNK_SIZE");
    }
}
