//! Hybrid search (§4.8): dense cosine similarity from the `arroy`/LMDB vector store
//! combined with sparse BM25 from the `tantivy` full-text store via the weighted-sum
//! formula `s = α·cosine_dense + (1−α)·bm25_sparse`. No RRF, no identifier/structural
//! boosting — those belong to a source-code-search ancestor and don't apply to
//! general documents.
//!
//! `SearchEngine` is a plain library surface: it returns structured hits, never prints
//! or formats for a terminal. The HTTP/WS server and the MCP tool surface both sit on
//! top of it.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::RwLock;

use crate::constants;
use crate::embed::Embedder;
use crate::error::Result;
use crate::fts::FtsStore;
use crate::state::{ChunkRow, IndexStatus, StateStore};
use crate::vectordb::VectorStore;

/// A search request. `limit` is clamped to `constants::MAX_SEARCH_RESULTS`; `alpha`
/// falls back to `constants::DEFAULT_ALPHA` when unset.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub query_text: String,
    pub limit: usize,
    pub include_folders: Option<Vec<String>>,
    pub exclude_folders: Option<Vec<String>>,
    pub user_identity: Option<String>,
    pub alpha: Option<f32>,
}

impl SearchQuery {
    pub fn new(query_text: impl Into<String>, limit: usize) -> Self {
        Self {
            query_text: query_text.into(),
            limit,
            include_folders: None,
            exclude_folders: None,
            user_identity: None,
            alpha: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub score: f32,
    pub file_path: String,
    pub file_name: String,
    pub folder_path: String,
    pub chunk_text: String,
    pub chunk_ordinal: u32,
    pub token_count: u32,
}

#[derive(Debug, Clone)]
pub struct IndexedFolder {
    pub path: String,
    pub index_status: IndexStatus,
    pub file_count: u64,
    pub chunk_count: u64,
}

pub struct SearchEngine {
    state: Arc<StateStore>,
    vector_store: Arc<RwLock<VectorStore>>,
    fts_store: Arc<RwLock<FtsStore>>,
    embedder: Arc<StdMutex<dyn Embedder>>,
}

impl SearchEngine {
    pub fn new(
        state: Arc<StateStore>,
        vector_store: Arc<RwLock<VectorStore>>,
        fts_store: Arc<RwLock<FtsStore>>,
        embedder: Arc<StdMutex<dyn Embedder>>,
    ) -> Self {
        Self {
            state,
            vector_store,
            fts_store,
            embedder,
        }
    }

    /// Run a hybrid search and return ranked, deduplicated hits (§4.8).
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        let limit = query.limit.clamp(1, constants::MAX_SEARCH_RESULTS);
        let alpha = query.alpha.unwrap_or(constants::DEFAULT_ALPHA).clamp(0.0, 1.0);
        let visible = self.visible_folder_set(
            query.user_identity.as_deref(),
            query.include_folders.as_deref(),
            query.exclude_folders.as_deref(),
        )?;
        if visible.is_empty() {
            return Ok(Vec::new());
        }

        let candidates = limit * constants::SEARCH_CANDIDATE_MULTIPLIER;

        let query_embedding = {
            let mut embedder = self
                .embedder
                .lock()
                .map_err(|e| crate::error::KbError::embed_failed(e.to_string()))?;
            embedder.embed_query(&query.query_text)?
        };

        let dense_hits = self.vector_store.read().await.search(&query_embedding, candidates)?;
        let sparse_hits = self.fts_store.read().await.search(&query.query_text, candidates)?;

        let max_sparse = sparse_hits.iter().map(|h| h.score).fold(0.0_f32, f32::max);

        // vector_id -> (dense similarity, normalized sparse score)
        let mut combined: std::collections::HashMap<u32, (Option<f32>, Option<f32>)> =
            std::collections::HashMap::new();
        for hit in &dense_hits {
            let similarity = (1.0 - hit.distance).clamp(0.0, 1.0);
            combined.entry(hit.id).or_insert((None, None)).0 = Some(similarity);
        }
        for hit in &sparse_hits {
            let normalized = if max_sparse > 0.0 { hit.score / max_sparse } else { 0.0 };
            combined.entry(hit.chunk_id).or_insert((None, None)).1 = Some(normalized);
        }

        let mut best_per_file: std::collections::HashMap<String, (f32, ChunkRow)> =
            std::collections::HashMap::new();
        for (vector_id, (dense, sparse)) in combined {
            let Some((chunk, folder_path)) = self.state.get_chunk_by_vector_id(vector_id)? else {
                continue;
            };
            if !visible.contains(&folder_path) {
                continue;
            }
            let score = combine_score(dense, sparse, alpha);
            best_per_file
                .entry(chunk.file_path.clone())
                .and_modify(|(best_score, best_chunk)| {
                    if score > *best_score {
                        *best_score = score;
                        *best_chunk = chunk.clone();
                    }
                })
                .or_insert((score, chunk));
        }

        let mut hits: Vec<SearchHit> = best_per_file
            .into_iter()
            .map(|(file_path, (score, chunk))| {
                let folder_path = self
                    .state
                    .get_file(&file_path)
                    .ok()
                    .flatten()
                    .map(|f| f.folder_path)
                    .unwrap_or_default();
                SearchHit {
                    score,
                    file_name: file_name_of(&file_path),
                    file_path,
                    folder_path,
                    chunk_text: chunk.text,
                    chunk_ordinal: chunk.ordinal,
                    token_count: chunk.token_count,
                }
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    /// Full text of a file, chunks joined in order with overlap regions deduplicated.
    pub fn get_file(&self, path: &str) -> Result<Option<String>> {
        let chunks = self.state.list_chunks(path)?;
        if chunks.is_empty() {
            return Ok(None);
        }
        Ok(Some(join_chunks(&chunks)))
    }

    /// Same as `get_file` but over chunk ordinals `[start, end]` inclusive.
    pub fn get_chunk_range(&self, path: &str, start: u32, end: u32) -> Result<Option<String>> {
        let chunks: Vec<ChunkRow> = self
            .state
            .list_chunks(path)?
            .into_iter()
            .filter(|c| c.ordinal >= start && c.ordinal <= end)
            .collect();
        if chunks.is_empty() {
            return Ok(None);
        }
        Ok(Some(join_chunks(&chunks)))
    }

    pub fn list_indexed_folders(&self) -> Result<Vec<IndexedFolder>> {
        let folders = self.state.list_folders()?;
        let mut out = Vec::with_capacity(folders.len());
        for folder in folders {
            let files = self.state.list_files_under(&folder.path)?;
            let file_count = files.len() as u64;
            let chunk_count = files.iter().map(|f| f.chunk_count).sum();
            out.push(IndexedFolder {
                path: folder.path,
                index_status: folder.index_status,
                file_count,
                chunk_count,
            });
        }
        Ok(out)
    }

    /// Folders indexed and search-active for `user`, intersected with `include`,
    /// subtracted by `exclude` (§4.8).
    fn visible_folder_set(
        &self,
        user: Option<&str>,
        include: Option<&[String]>,
        exclude: Option<&[String]>,
    ) -> Result<HashSet<String>> {
        let user = user.unwrap_or(constants::DEFAULT_USER_IDENTITY);
        let mut set: HashSet<String> = self.state.visible_folders(user)?.into_iter().collect();
        if let Some(include) = include {
            let include: HashSet<&str> = include.iter().map(String::as_str).collect();
            set.retain(|f| include.contains(f.as_str()));
        }
        if let Some(exclude) = exclude {
            for folder in exclude {
                set.remove(folder);
            }
        }
        Ok(set)
    }
}

/// Hybrid fusion formula (§4.8). A side with no hit for a given chunk contributes 0 to
/// its term rather than being dropped from the sum, so a chunk found by only one store
/// still scores strictly between 0 and that store's full weight.
fn combine_score(dense: Option<f32>, sparse: Option<f32>, alpha: f32) -> f32 {
    alpha * dense.unwrap_or(0.0) + (1.0 - alpha) * sparse.unwrap_or(0.0)
}

fn file_name_of(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Join ordered chunks into one string, deduplicating overlap at each boundary by
/// finding the longest suffix of the accumulated text that is also a prefix of the
/// next chunk (greedy longest-suffix/prefix match, §4.8).
fn join_chunks(chunks: &[ChunkRow]) -> String {
    let mut out = String::new();
    for chunk in chunks {
        if out.is_empty() {
            out.push_str(&chunk.text);
            continue;
        }
        let overlap = longest_suffix_prefix_overlap(&out, &chunk.text);
        out.push_str(&chunk.text[overlap..]);
    }
    out
}

/// Length, in bytes, of the longest suffix of `a` that is also a prefix of `b`. Capped
/// at `b.len()` and `a.len()` since an overlap can't exceed either side.
fn longest_suffix_prefix_overlap(a: &str, b: &str) -> usize {
    let max_len = a.len().min(b.len());
    for len in (1..=max_len).rev() {
        if a.ends_with(&b[..len]) {
            return len;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::NewChunk;
    use tempfile::tempdir;

    const DIMS: usize = 8;

    struct FixedEmbedder {
        vector: Vec<f32>,
    }

    impl Embedder for FixedEmbedder {
        fn embed_chunks(
            &mut self,
            chunks: Vec<crate::chunker::Chunk>,
        ) -> anyhow::Result<Vec<crate::embed::EmbeddedChunk>> {
            Ok(chunks
                .into_iter()
                .map(|c| crate::embed::EmbeddedChunk::new(c, self.vector.clone()))
                .collect())
        }

        fn embed_query(&mut self, _query: &str) -> anyhow::Result<Vec<f32>> {
            Ok(self.vector.clone())
        }

        fn dimensions(&self) -> usize {
            DIMS
        }
    }

    fn unit_vec(axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; DIMS];
        v[axis] = 1.0;
        v
    }

    /// Build a store with two indexed files: `a.txt` (vector on axis 0, text "apple
    /// banana") under folder `docs`, and `b.txt` (vector on axis 1, unrelated text)
    /// under folder `other`. Both folders are indexed and visible to `default`.
    fn build_engine() -> (
        SearchEngine,
        Arc<StateStore>,
        Arc<RwLock<VectorStore>>,
        Arc<RwLock<FtsStore>>,
    ) {
        let state = Arc::new(StateStore::open_in_memory().unwrap());
        let vector_dir = tempdir().unwrap().into_path();
        let mut vector_store = VectorStore::new(&vector_dir.join("vectors"), DIMS, 64).unwrap();
        let fts_dir = tempdir().unwrap().into_path();
        let mut fts_store = FtsStore::new_with_writer(&fts_dir).unwrap();

        for (folder, file, axis, text) in [
            ("docs", "docs/a.txt", 0usize, "apple banana"),
            ("other", "other/b.txt", 1usize, "completely unrelated content"),
        ] {
            state.ensure_folder(folder).unwrap();
            state.set_folder_indexing_enabled(folder, true).unwrap();
            state
                .upsert_file(file, folder, text.len() as u64, 0, "hash", "text/plain")
                .unwrap();
            let vector_id = crate::vectordb::chunk_vector_id(file, 0, 1);
            vector_store
                .upsert(&[(vector_id, unit_vec(axis))])
                .unwrap();
            fts_store.add_chunk(vector_id, text, file).unwrap();
            state
                .swap_chunks_atomically(
                    file,
                    "hash",
                    &[NewChunk {
                        ordinal: 0,
                        text: text.to_string(),
                        token_count: 2,
                        char_start: 0,
                        char_end: text.len() as u64,
                        embedding_version: 1,
                        dense_vector_id: vector_id as u64,
                        sparse_vector_id: Some(vector_id as u64),
                    }],
                )
                .unwrap();
            state.set_folder_index_status(folder, IndexStatus::Indexed).unwrap();
        }
        vector_store.build_index().unwrap();
        fts_store.commit().unwrap();

        let vector_store = Arc::new(RwLock::new(vector_store));
        let fts_store = Arc::new(RwLock::new(fts_store));
        let embedder: Arc<StdMutex<dyn Embedder>> =
            Arc::new(StdMutex::new(FixedEmbedder { vector: unit_vec(0) }));
        let engine = SearchEngine::new(
            state.clone(),
            vector_store.clone(),
            fts_store.clone(),
            embedder,
        );
        (engine, state, vector_store, fts_store)
    }

    #[tokio::test]
    async fn test_hybrid_search_ranks_matching_file_first() {
        let (engine, _state, _v, _f) = build_engine();
        let hits = engine.search(&SearchQuery::new("apple", 10)).await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].file_path, "docs/a.txt");
        assert!(hits[0].score > 0.0);
    }

    #[tokio::test]
    async fn test_include_folders_restricts_results() {
        let (engine, _state, _v, _f) = build_engine();
        let mut query = SearchQuery::new("apple", 10);
        query.include_folders = Some(vec!["other".to_string()]);
        let hits = engine.search(&query).await.unwrap();
        assert!(hits.iter().all(|h| h.folder_path == "other"));
    }

    #[tokio::test]
    async fn test_exclude_folders_removes_results() {
        let (engine, _state, _v, _f) = build_engine();
        let mut query = SearchQuery::new("apple", 10);
        query.exclude_folders = Some(vec!["docs".to_string()]);
        let hits = engine.search(&query).await.unwrap();
        assert!(hits.iter().all(|h| h.file_path != "docs/a.txt"));
    }

    #[tokio::test]
    async fn test_user_visibility_hides_inactive_folder() {
        let (engine, state, _v, _f) = build_engine();
        state.set_user_visibility("alice", "docs", false).unwrap();
        let mut query = SearchQuery::new("apple", 10);
        query.user_identity = Some("alice".to_string());
        let hits = engine.search(&query).await.unwrap();
        assert!(hits.iter().all(|h| h.file_path != "docs/a.txt"));
    }

    #[test]
    fn test_combine_score_monotonic_in_alpha_dense_only() {
        let low = combine_score(Some(0.8), None, 0.2);
        let high = combine_score(Some(0.8), None, 0.9);
        assert!(high > low);
    }

    #[test]
    fn test_combine_score_monotonic_in_alpha_sparse_only() {
        let low = combine_score(None, Some(0.8), 0.2);
        let high = combine_score(None, Some(0.8), 0.9);
        assert!(high < low);
    }

    #[test]
    fn test_join_chunks_dedups_overlap() {
        let chunks = vec![
            ChunkRow {
                file_path: "f".into(),
                ordinal: 0,
                text: "the quick brown".into(),
                token_count: 3,
                char_start: 0,
                char_end: 15,
                embedding_version: 1,
                dense_vector_id: 1,
                sparse_vector_id: Some(1),
            },
            ChunkRow {
                file_path: "f".into(),
                ordinal: 1,
                text: "brown fox jumps".into(),
                token_count: 3,
                char_start: 10,
                char_end: 25,
                embedding_version: 1,
                dense_vector_id: 2,
                sparse_vector_id: Some(2),
            },
        ];
        assert_eq!(join_chunks(&chunks), "the quick brown fox jumps");
    }

    #[test]
    fn test_join_chunks_no_overlap_concatenates() {
        let chunks = vec![
            ChunkRow {
                file_path: "f".into(),
                ordinal: 0,
                text: "abc".into(),
                token_count: 1,
                char_start: 0,
                char_end: 3,
                embedding_version: 1,
                dense_vector_id: 1,
                sparse_vector_id: Some(1),
            },
            ChunkRow {
                file_path: "f".into(),
                ordinal: 1,
                text: "xyz".into(),
                token_count: 1,
                char_start: 3,
                char_end: 6,
                embedding_version: 1,
                dense_vector_id: 2,
                sparse_vector_id: Some(2),
            },
        ];
        assert_eq!(join_chunks(&chunks), "abcxyz");
    }

    #[test]
    fn test_get_chunk_range_matches_sub_range_of_get_file() {
        let (engine, state, _v, _f) = build_engine();
        state
            .swap_chunks_atomically(
                "docs/a.txt",
                "hash",
                &[
                    NewChunk {
                        ordinal: 0,
                        text: "the quick".into(),
                        token_count: 2,
                        char_start: 0,
                        char_end: 9,
                        embedding_version: 1,
                        dense_vector_id: 10,
                        sparse_vector_id: Some(10),
                    },
                    NewChunk {
                        ordinal: 1,
                        text: "quick brown".into(),
                        token_count: 2,
                        char_start: 4,
                        char_end: 15,
                        embedding_version: 1,
                        dense_vector_id: 11,
                        sparse_vector_id: Some(11),
                    },
                    NewChunk {
                        ordinal: 2,
                        text: "brown fox".into(),
                        token_count: 2,
                        char_start: 10,
                        char_end: 19,
                        embedding_version: 1,
                        dense_vector_id: 12,
                        sparse_vector_id: Some(12),
                    },
                ],
            )
            .unwrap();

        let full = engine.get_file("docs/a.txt").unwrap().unwrap();
        let range = engine.get_chunk_range("docs/a.txt", 0, 1).unwrap().unwrap();
        assert_eq!(full, "the quick brown fox");
        assert!(full.starts_with(&range));
    }

    #[test]
    fn test_list_indexed_folders_reports_counts() {
        let (engine, _state, _v, _f) = build_engine();
        let folders = engine.list_indexed_folders().unwrap();
        let docs = folders.iter().find(|f| f.path == "docs").unwrap();
        assert_eq!(docs.file_count, 1);
        assert_eq!(docs.chunk_count, 1);
        assert_eq!(docs.index_status, IndexStatus::Indexed);
    }
}
