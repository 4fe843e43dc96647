//! Thin wrapper over `fastembed`'s local ONNX embedding runtime (§4.6: embeddings are
//! computed in-process, no external embedding service).

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use crate::constants;

/// Embedding models this crate knows how to load. Identified in config/state by
/// `short_name()` so a folder's `embedding_version` stays meaningful across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    MiniLmL6V2,
    BgeSmallEnV15,
    BgeBaseEnV15,
}

impl ModelType {
    pub fn dimensions(&self) -> usize {
        match self {
            ModelType::MiniLmL6V2 => 384,
            ModelType::BgeSmallEnV15 => 384,
            ModelType::BgeBaseEnV15 => 768,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModelType::MiniLmL6V2 => "sentence-transformers/all-MiniLM-L6-v2",
            ModelType::BgeSmallEnV15 => "BAAI/bge-small-en-v1.5",
            ModelType::BgeBaseEnV15 => "BAAI/bge-base-en-v1.5",
        }
    }

    pub fn short_name(&self) -> &'static str {
        match self {
            ModelType::MiniLmL6V2 => "all-minilm-l6-v2",
            ModelType::BgeSmallEnV15 => "bge-small-en-v1.5",
            ModelType::BgeBaseEnV15 => "bge-base-en-v1.5",
        }
    }

    pub fn from_short_name(name: &str) -> Option<Self> {
        match name {
            "all-minilm-l6-v2" => Some(ModelType::MiniLmL6V2),
            "bge-small-en-v1.5" => Some(ModelType::BgeSmallEnV15),
            "bge-base-en-v1.5" => Some(ModelType::BgeBaseEnV15),
            _ => None,
        }
    }

    fn to_fastembed(self) -> EmbeddingModel {
        match self {
            ModelType::MiniLmL6V2 => EmbeddingModel::AllMiniLML6V2,
            ModelType::BgeSmallEnV15 => EmbeddingModel::BGESmallENV15,
            ModelType::BgeBaseEnV15 => EmbeddingModel::BGEBaseENV15,
        }
    }
}

impl Default for ModelType {
    fn default() -> Self {
        ModelType::BgeSmallEnV15
    }
}

/// Local ONNX embedder. Not `Send`-free-for-all: callers share one instance behind a
/// `Mutex` (see `BatchEmbedder`), matching the single-writer-at-a-time discipline the
/// rest of the pipeline uses for its embedded stores.
pub struct FastEmbedder {
    model: TextEmbedding,
    model_type: ModelType,
    cache_dir: Option<PathBuf>,
    embedded_since_reset: usize,
}

impl FastEmbedder {
    pub fn new() -> Result<Self> {
        Self::with_model(ModelType::default())
    }

    pub fn with_model(model_type: ModelType) -> Result<Self> {
        Self::with_cache_dir(model_type, None)
    }

    pub fn with_cache_dir(model_type: ModelType, cache_dir: Option<&Path>) -> Result<Self> {
        let model = Self::build_model(model_type, cache_dir)?;
        Ok(Self {
            model,
            model_type,
            cache_dir: cache_dir.map(Path::to_path_buf),
            embedded_since_reset: 0,
        })
    }

    fn build_model(model_type: ModelType, cache_dir: Option<&Path>) -> Result<TextEmbedding> {
        let mut options =
            InitOptions::new(model_type.to_fastembed()).with_show_download_progress(false);
        if let Some(dir) = cache_dir {
            options = options.with_cache_dir(dir.to_path_buf());
        }
        TextEmbedding::try_new(options)
            .map_err(|e| anyhow!("failed to initialize embedding model {}: {e}", model_type.name()))
    }

    /// Recreate the ONNX session every `DEFAULT_ARENA_RESET_INTERVAL` chunks — `ort`'s
    /// arena only grows, so a long-running daemon indexing many files needs this to
    /// avoid unbounded RSS growth.
    fn maybe_reset_session(&mut self) -> Result<()> {
        if self.embedded_since_reset < constants::DEFAULT_ARENA_RESET_INTERVAL {
            return Ok(());
        }
        self.model = Self::build_model(self.model_type, self.cache_dir.as_deref())?;
        self.embedded_since_reset = 0;
        Ok(())
    }

    pub fn embed_batch(&mut self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.maybe_reset_session()?;
        let embeddings = self
            .model
            .embed(texts.clone(), None)
            .map_err(|e| anyhow!("embedding failed: {e}"))?;
        self.embedded_since_reset += texts.len();
        Ok(embeddings)
    }

    pub fn embed_one(&mut self, text: &str) -> Result<Vec<f32>> {
        let mut result = self.embed_batch(vec![text.to_string()])?;
        result
            .pop()
            .ok_or_else(|| anyhow!("embedding model returned no vector"))
    }

    pub fn dimensions(&self) -> usize {
        self.model_type.dimensions()
    }

    pub fn model_name(&self) -> &str {
        self.model_type.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_type_round_trips_by_short_name() {
        for model in [
            ModelType::MiniLmL6V2,
            ModelType::BgeSmallEnV15,
            ModelType::BgeBaseEnV15,
        ] {
            assert_eq!(ModelType::from_short_name(model.short_name()), Some(model));
        }
    }

    #[test]
    fn test_default_model_is_bge_small() {
        assert_eq!(ModelType::default(), ModelType::BgeSmallEnV15);
        assert_eq!(ModelType::default().dimensions(), 384);
    }
}
