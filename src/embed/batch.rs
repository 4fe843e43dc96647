use super::embedder::FastEmbedder;
use crate::chunker::Chunk;
use anyhow::Result;
use std::sync::{Arc, Mutex};

/// Statistics for embedding operations
#[derive(Debug, Clone, Default)]
#[allow(dead_code)] // Used in tests
pub struct EmbeddingStats {
    pub total_chunks: usize,
    pub embedded_chunks: usize,
    pub cached_chunks: usize,
    pub failed_chunks: usize,
    pub total_time_ms: u128,
}

impl EmbeddingStats {
    /// Calculate cache hit rate (0.0 to 1.0)
    #[allow(dead_code)]
    pub fn cache_hit_rate(&self) -> f64 {
        if self.total_chunks == 0 {
            return 0.0;
        }
        self.cached_chunks as f64 / self.total_chunks as f64
    }

    /// Calculate success rate (0.0 to 1.0)
    #[allow(dead_code)]
    pub fn success_rate(&self) -> f64 {
        if self.total_chunks == 0 {
            return 0.0;
        }
        self.embedded_chunks as f64 / self.total_chunks as f64
    }

    /// Calculate chunks per second
    #[allow(dead_code)]
    pub fn chunks_per_second(&self) -> f64 {
        if self.total_time_ms == 0 {
            return 0.0;
        }
        (self.embedded_chunks as f64 / self.total_time_ms as f64) * 1000.0
    }
}

/// Chunk with its embedding
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

impl EmbeddedChunk {
    pub fn new(chunk: Chunk, embedding: Vec<f32>) -> Self {
        Self { chunk, embedding }
    }
}

/// Batch processor for embedding chunks efficiently
pub struct BatchEmbedder {
    pub embedder: Arc<Mutex<FastEmbedder>>,
    batch_size: usize,
}

impl BatchEmbedder {
    /// Create a new batch embedder
    pub fn new(embedder: Arc<Mutex<FastEmbedder>>) -> Self {
        Self {
            embedder,
            batch_size: crate::constants::DEFAULT_EMBED_BATCH_SIZE,
        }
    }

    /// Create with custom batch size
    #[allow(dead_code)] // Reserved for custom batch configuration
    pub fn with_batch_size(embedder: Arc<Mutex<FastEmbedder>>, batch_size: usize) -> Self {
        Self {
            embedder,
            batch_size,
        }
    }

    /// Embed a batch of chunks, bounded to `batch_size` per model call (§4.6 contract
    /// 4: "embed in batches, batch size bounded, default 32").
    pub fn embed_chunks(&mut self, chunks: Vec<Chunk>) -> Result<Vec<EmbeddedChunk>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let total = chunks.len();
        let mut embedded_chunks = Vec::with_capacity(total);

        for chunk_batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = chunk_batch.iter().map(|c| c.text.clone()).collect();

            let embeddings = self
                .embedder
                .lock()
                .map_err(|e| anyhow::anyhow!("embedder mutex poisoned: {e}"))?
                .embed_batch(texts)?;

            for (chunk, embedding) in chunk_batch.iter().zip(embeddings.into_iter()) {
                embedded_chunks.push(EmbeddedChunk::new(chunk.clone(), embedding));
            }
        }

        Ok(embedded_chunks)
    }

    /// Embed a single chunk
    #[allow(dead_code)] // Reserved for single-chunk embedding
    pub fn embed_chunk(&mut self, chunk: Chunk) -> Result<EmbeddedChunk> {
        let embedding = self
            .embedder
            .lock()
            .map_err(|e| anyhow::anyhow!("embedder mutex poisoned: {e}"))?
            .embed_one(&chunk.text)?;
        Ok(EmbeddedChunk::new(chunk, embedding))
    }

    /// Get embedding dimensions
    pub fn dimensions(&self) -> usize {
        self.embedder.lock().unwrap().dimensions()
    }

    /// Get embedder (locks mutex and returns copy of embedder for reading)
    #[allow(dead_code)] // Reserved for diagnostics
    pub fn embedder_info(&self) -> (String, usize) {
        let embedder = self.embedder.lock().unwrap();
        (embedder.model_name().to_string(), embedder.dimensions())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ExtractedText;

    fn make_chunk(text: &str, ordinal: u32) -> Chunk {
        let extracted = ExtractedText {
            text: text.to_string(),
            soft_breaks: vec![],
        };
        crate::chunker::chunk_text(
            &extracted,
            &crate::chunker::WhitespaceTokenizer,
            crate::constants::DEFAULT_CHUNK_SIZE,
            crate::constants::DEFAULT_CHUNK_OVERLAP,
        )
        .into_iter()
        .nth(ordinal as usize)
        .unwrap()
    }

    #[test]
    fn test_embedding_stats() {
        let stats = EmbeddingStats {
            total_chunks: 100,
            embedded_chunks: 80,
            cached_chunks: 20,
            failed_chunks: 0,
            total_time_ms: 1000,
        };

        assert_eq!(stats.cache_hit_rate(), 0.2);
        assert_eq!(stats.success_rate(), 0.8);
        assert_eq!(stats.chunks_per_second(), 80.0);
    }

    #[test]
    fn test_make_chunk_helper_produces_single_chunk() {
        let chunk = make_chunk("alpha beta gamma", 0);
        assert_eq!(chunk.text, "alpha beta gamma");
        assert_eq!(chunk.ordinal, 0);
    }
}
