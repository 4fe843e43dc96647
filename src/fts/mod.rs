//! Sparse/keyword side of hybrid search: Tantivy BM25 over chunk text.
//!
//! This is not a standalone full-text store — it's the sparse half of the fusion in
//! `search::SearchEngine`, joined against the dense half by the same chunk id
//! (`vectordb::chunk_vector_id`) so a single id resolves both scores for a chunk.

mod tantivy_store;

pub use tantivy_store::{FtsStats, FtsStore, SparseHit};
