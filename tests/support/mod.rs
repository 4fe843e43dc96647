//! Shared harness for the end-to-end scenarios in `tests/scenarios.rs` (§8.1): an
//! in-process set of services over a `tempfile::TempDir` managed root, with a
//! deterministic embedder standing in for the real ONNX model so these tests need
//! no network and no downloaded weights. Every scenario relies on `alpha: Some(0.0)`
//! to search purely off the tantivy BM25 side, since the fake embedder carries no
//! real semantic signal.

use std::sync::{Arc, Mutex as StdMutex};

use kbase::embed::{Embedder, EmbeddedChunk};
use kbase::fts::FtsStore;
use kbase::index::{EventSink, Indexer, IndexEvent};
use kbase::state::StateStore;
use kbase::vectordb::VectorStore;
use kbase::{SearchEngine, SearchQuery};
use tempfile::TempDir;
use tokio::sync::RwLock;

pub const DIMENSIONS: usize = 8;

pub struct FakeEmbedder;

impl Embedder for FakeEmbedder {
    fn embed_chunks(&mut self, chunks: Vec<kbase::chunker::Chunk>) -> anyhow::Result<Vec<EmbeddedChunk>> {
        Ok(chunks
            .into_iter()
            .map(|c| EmbeddedChunk::new(c, vec![0.0; DIMENSIONS]))
            .collect())
    }

    fn embed_query(&mut self, _query: &str) -> anyhow::Result<Vec<f32>> {
        Ok(vec![0.0; DIMENSIONS])
    }

    fn dimensions(&self) -> usize {
        DIMENSIONS
    }
}

/// Collects `IndexEvent`s emitted during a scan so scenarios can assert on lifecycle
/// transitions without racing a background worker pool.
#[derive(Default)]
pub struct RecordingEventSink {
    pub events: StdMutex<Vec<IndexEvent>>,
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: IndexEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct Harness {
    pub _root_dir: TempDir,
    pub root: std::path::PathBuf,
    pub state: Arc<StateStore>,
    pub indexer: Arc<Indexer>,
    pub search: Arc<SearchEngine>,
    pub events: Arc<RecordingEventSink>,
}

impl Harness {
    pub fn new() -> Self {
        let root_dir = tempfile::tempdir().unwrap();
        let root = root_dir.path().to_path_buf();

        let state = Arc::new(StateStore::open_in_memory().unwrap());

        let vector_dir = tempfile::tempdir().unwrap();
        let vector_store = Arc::new(RwLock::new(
            VectorStore::new(vector_dir.path(), DIMENSIONS, 64).unwrap(),
        ));
        // Leak the temp dir's lifetime into the harness's root tempdir list isn't
        // necessary — LMDB/tantivy keep their own file handles open, so it's enough
        // to keep these directories alive for the harness's lifetime via `into_path`.
        std::mem::forget(vector_dir);

        let fts_dir = tempfile::tempdir().unwrap();
        let fts_store = Arc::new(RwLock::new(FtsStore::new_with_writer(fts_dir.path()).unwrap()));
        std::mem::forget(fts_dir);

        let embedder: Arc<StdMutex<dyn Embedder>> = Arc::new(StdMutex::new(FakeEmbedder));
        let events = Arc::new(RecordingEventSink::default());

        let (indexer, _receiver) = Indexer::new(
            root.clone(),
            state.clone(),
            vector_store.clone(),
            fts_store.clone(),
            embedder.clone(),
            events.clone(),
            kbase::constants::DEFAULT_CHUNK_SIZE,
            kbase::constants::DEFAULT_CHUNK_OVERLAP,
        );

        let search = Arc::new(SearchEngine::new(state.clone(), vector_store, fts_store, embedder));

        Self {
            _root_dir: root_dir,
            root,
            state,
            indexer,
            search,
            events,
        }
    }

    /// Create a folder directory on disk and register it in the state store with
    /// indexing enabled (folders are created disabled by default).
    pub fn make_folder(&self, folder_path: &str) {
        std::fs::create_dir_all(self.root.join(folder_path)).unwrap();
        self.state.ensure_folder(folder_path).unwrap();
        self.state.set_folder_indexing_enabled(folder_path, true).unwrap();
    }

    pub fn write_file(&self, logical_path: &str, content: &str) {
        let full = self.root.join(logical_path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, content).unwrap();
    }

    pub async fn scan(&self, folder_path: &str) {
        let cancel = tokio_util::sync::CancellationToken::new();
        self.indexer.scan_folder_now(folder_path, &cancel).await.unwrap();
    }

    pub async fn search_bm25(&self, query: &str, limit: usize) -> Vec<kbase::SearchHit> {
        let mut q = SearchQuery::new(query, limit);
        q.alpha = Some(0.0);
        self.search.search(&q).await.unwrap()
    }
}
