//! The indexer proper: a bounded worker pool draining a per-folder queue, and the
//! per-file pipeline each worker runs (§4.6, §4.6.1).
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, Mutex as TokioMutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::chunker::{chunk_text, WhitespaceTokenizer};
use crate::constants;
use crate::embed::Embedder;
use crate::error::{KbError, Result};
use crate::extract;
use crate::file::{DiscoveredFile, FileWalker};
use crate::fts::FtsStore;
use crate::state::{FileRow, IndexStatus, NewChunk, StateStore};
use crate::vectordb::{chunk_vector_id, VectorStore};

use super::{to_logical, IndexEvent};

/// Sink for status events an indexing run emits (§4.6 contract 6). The event bus
/// implements this to fan events out over its subscriber channels and the HTTP/WS
/// surface; `NoopEventSink` is the default until one is wired in.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: IndexEvent);
}

/// Default sink: logs and drops. Used by the CLI's one-shot commands and tests where
/// nothing is listening for status events.
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, event: IndexEvent) {
        debug!(?event, "index event");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingState {
    Idle,
    Running,
    RunningWithPending,
}

/// Owns the stores and drives folder scans, either one-shot (`scan_folder_now`) or via
/// the queued worker pool (`spawn`).
pub struct Indexer {
    root: std::path::PathBuf,
    state: Arc<StateStore>,
    vector_store: Arc<RwLock<VectorStore>>,
    fts_store: Arc<RwLock<FtsStore>>,
    embedder: Arc<StdMutex<dyn Embedder>>,
    events: Arc<dyn EventSink>,
    chunk_size: usize,
    chunk_overlap: usize,
    pending: DashMap<String, PendingState>,
    sender: mpsc::UnboundedSender<String>,
}

impl Indexer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        root: std::path::PathBuf,
        state: Arc<StateStore>,
        vector_store: Arc<RwLock<VectorStore>>,
        fts_store: Arc<RwLock<FtsStore>>,
        embedder: Arc<StdMutex<dyn Embedder>>,
        events: Arc<dyn EventSink>,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let indexer = Arc::new(Self {
            root,
            state,
            vector_store,
            fts_store,
            embedder,
            events,
            chunk_size,
            chunk_overlap,
            pending: DashMap::new(),
            sender,
        });
        (indexer, receiver)
    }

    /// Queue a folder for scanning. A folder already queued or running collapses the
    /// new request into a single pending flag instead of a second queue entry
    /// (§4.6.1) — at most one extra scan runs after the in-flight one completes, no
    /// matter how many times `enqueue` is called while it's running.
    pub fn enqueue(&self, folder_path: &str) {
        match self.pending.entry(folder_path.to_string()) {
            Entry::Vacant(e) => {
                e.insert(PendingState::Idle);
                let _ = self.sender.send(folder_path.to_string());
            }
            Entry::Occupied(mut e) => {
                if *e.get() == PendingState::Running {
                    *e.get_mut() = PendingState::RunningWithPending;
                }
            }
        }
    }

    /// Start `workers` tasks draining the queue, returning their join handles so a
    /// caller can await them on shutdown.
    pub fn spawn(
        self: Arc<Self>,
        receiver: mpsc::UnboundedReceiver<String>,
        workers: usize,
        cancel: CancellationToken,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        let receiver = Arc::new(TokioMutex::new(receiver));
        (0..workers.max(1))
            .map(|_| {
                let indexer = self.clone();
                let receiver = receiver.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { indexer.worker_loop(receiver, cancel).await })
            })
            .collect()
    }

    async fn worker_loop(
        self: Arc<Self>,
        receiver: Arc<TokioMutex<mpsc::UnboundedReceiver<String>>>,
        cancel: CancellationToken,
    ) {
        loop {
            let folder = {
                let mut rx = receiver.lock().await;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    item = rx.recv() => match item {
                        Some(f) => f,
                        None => break,
                    },
                }
            };

            self.pending.insert(folder.clone(), PendingState::Running);
            if let Err(e) = self.scan_folder_with_retry(&folder, &cancel).await {
                if !e.is_cancelled() {
                    error!(folder = %folder, error = %e, "folder scan failed permanently, left in error");
                }
            }
            let rerun = matches!(
                self.pending.get(&folder).map(|v| *v),
                Some(PendingState::RunningWithPending)
            );
            self.pending.remove(&folder);
            if rerun {
                self.enqueue(&folder);
            }
        }
    }

    /// Scan a folder synchronously, bypassing the queue — the CLI's one-shot `index`
    /// command and tests drive scans this way.
    pub async fn scan_folder_now(&self, folder_path: &str, cancel: &CancellationToken) -> Result<()> {
        self.scan_folder_with_retry(folder_path, cancel).await
    }

    /// Retries only on fatal (store-connectivity) failures from `scan_folder`, never
    /// on isolated per-file errors, which `scan_folder` already swallows and records
    /// per file (§4.6 contract 7).
    async fn scan_folder_with_retry(&self, folder_path: &str, cancel: &CancellationToken) -> Result<()> {
        let mut attempt = 0usize;
        loop {
            match self.scan_folder(folder_path, cancel).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    if attempt >= constants::FOLDER_MAX_RETRIES {
                        let _ = self.state.set_folder_index_status(folder_path, IndexStatus::Error);
                        self.events.emit(IndexEvent::FolderError {
                            folder_path: folder_path.to_string(),
                            message: e.to_string(),
                        });
                        return Err(e);
                    }
                    let backoff = constants::FOLDER_RETRY_BACKOFF_SECS
                        [attempt.min(constants::FOLDER_RETRY_BACKOFF_SECS.len() - 1)];
                    warn!(folder = %folder_path, attempt, backoff, error = %e, "folder scan failed, retrying with backoff");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(backoff)) => {}
                        _ = cancel.cancelled() => return Err(KbError::Cancelled),
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// One pass over a folder: reconcile on-disk files against the state store into
    /// an add/update/delete plan, process each file in turn, then rebuild the dense
    /// index and commit the sparse one once for the whole folder (§4.6 contracts 1-6).
    async fn scan_folder(&self, folder_path: &str, cancel: &CancellationToken) -> Result<()> {
        let folder = self
            .state
            .get_folder(folder_path)?
            .ok_or_else(|| KbError::not_found(folder_path))?;

        if !folder.indexing_enabled {
            self.purge_folder(folder_path).await?;
            self.state.set_folder_index_status(folder_path, IndexStatus::None)?;
            return Ok(());
        }

        self.state
            .set_folder_index_status(folder_path, IndexStatus::Indexing)?;
        self.events.emit(IndexEvent::FolderIndexing {
            folder_path: folder_path.to_string(),
        });

        let physical_root = self.root.join(folder_path);
        let (discovered, _stats) = FileWalker::new(&physical_root).walk()?;
        let existing = self.state.list_files_under(folder_path)?;

        let discovered_by_logical: HashMap<String, DiscoveredFile> = discovered
            .into_iter()
            .map(|f| (to_logical(&self.root, &f.path), f))
            .collect();

        for row in &existing {
            if !discovered_by_logical.contains_key(&row.path) {
                self.delete_file_and_vectors(row).await?;
            }
        }

        let mut files_indexed = 0usize;
        let mut total_chunks = 0usize;
        let mut had_error = false;

        for (logical, file) in &discovered_by_logical {
            if cancel.is_cancelled() {
                return Err(KbError::Cancelled);
            }
            match self.process_file(folder_path, logical, file).await {
                Ok(Some(chunk_count)) => {
                    files_indexed += 1;
                    total_chunks += chunk_count;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(file = %logical, error = %e, "file indexing failed, isolating and continuing");
                    let _ = self.state.mark_file_error(logical, &e.to_string());
                    had_error = true;
                }
            }
        }

        {
            let mut vs = self.vector_store.write().await;
            vs.build_index()?;
        }
        {
            let mut fts = self.fts_store.write().await;
            fts.commit()?;
        }

        let final_status = if had_error {
            IndexStatus::Error
        } else {
            IndexStatus::Indexed
        };
        self.state.set_folder_index_status(folder_path, final_status)?;
        if had_error {
            self.events.emit(IndexEvent::FolderError {
                folder_path: folder_path.to_string(),
                message: "one or more files failed to index".to_string(),
            });
        } else {
            self.events.emit(IndexEvent::FolderIndexed {
                folder_path: folder_path.to_string(),
            });
        }
        self.events.emit(IndexEvent::IndexComplete {
            folder_path: folder_path.to_string(),
            files_indexed,
            total_chunks,
        });

        Ok(())
    }

    /// Process one on-disk file: read, hash, extract, chunk, embed, then commit state
    /// before vectors (§4.6 contract 4). `Ok(None)` means the file was unchanged and
    /// skipped; `Ok(Some(n))` means it was (re)indexed into `n` chunks.
    async fn process_file(
        &self,
        folder_path: &str,
        logical: &str,
        file: &DiscoveredFile,
    ) -> Result<Option<usize>> {
        let bytes = std::fs::read(&file.path)?;
        let content_hash = hash_bytes(&bytes);
        let mtime = file_mtime_secs(&file.path)?;
        let mime = extract::detect_mime(&file.path);

        self.state
            .upsert_file(logical, folder_path, file.size, mtime, &content_hash, mime)?;

        let row = self
            .state
            .get_file(logical)?
            .ok_or_else(|| KbError::not_found(logical))?;

        if !self.needs_reindex(logical, &row)? {
            return Ok(None);
        }

        let extracted = extract::extract(&bytes, mime, &file.path)?;
        let chunks = chunk_text(
            &extracted,
            &WhitespaceTokenizer,
            self.chunk_size,
            self.chunk_overlap,
        );

        if chunks.is_empty() {
            self.state.swap_chunks_atomically(logical, &content_hash, &[])?;
            return Ok(Some(0));
        }

        let embedded = {
            let mut embedder = self
                .embedder
                .lock()
                .map_err(|e| KbError::embed_failed(e.to_string()))?;
            embedder.embed_chunks(chunks)?
        };

        let mut new_chunks = Vec::with_capacity(embedded.len());
        let mut vector_items = Vec::with_capacity(embedded.len());
        for ec in &embedded {
            let id = chunk_vector_id(logical, ec.chunk.ordinal, constants::EMBEDDING_VERSION);
            new_chunks.push(NewChunk {
                ordinal: ec.chunk.ordinal,
                text: ec.chunk.text.clone(),
                token_count: ec.chunk.token_count,
                char_start: ec.chunk.char_start,
                char_end: ec.chunk.char_end,
                embedding_version: constants::EMBEDDING_VERSION,
                dense_vector_id: id as u64,
                sparse_vector_id: Some(id as u64),
            });
            vector_items.push((id, ec.embedding.clone()));
        }

        // State store commits first: if the vector upsert below fails, these chunk
        // rows stay as the authoritative record pending the next retry, rather than
        // leaving search looking at vectors with no matching rows.
        self.state
            .swap_chunks_atomically(logical, &content_hash, &new_chunks)?;

        let upsert_result = {
            let mut vs = self.vector_store.write().await;
            vs.upsert(&vector_items)
        };
        if let Err(e) = upsert_result {
            self.state
                .mark_file_error(logical, &format!("vector upsert failed: {e}"))?;
            return Err(e);
        }

        {
            let mut fts = self.fts_store.write().await;
            for (ec, (id, _)) in embedded.iter().zip(vector_items.iter()) {
                fts.add_chunk(*id, &ec.chunk.text, logical)?;
            }
        }

        Ok(Some(new_chunks.len()))
    }

    /// §4.6 contract 3: re-index iff the content hash changed, the file has never
    /// been indexed, or the embedding schema has moved on since its chunks were
    /// written — checked lazily against the first stored chunk rather than swept
    /// proactively (§9 Open Question).
    fn needs_reindex(&self, logical: &str, row: &FileRow) -> Result<bool> {
        if row.needs_reindex() {
            return Ok(true);
        }
        let stale_embedding = self
            .state
            .list_chunks(logical)?
            .first()
            .map(|c| c.embedding_version != constants::EMBEDDING_VERSION)
            .unwrap_or(true);
        Ok(stale_embedding)
    }

    /// §4.6 contract 5: vectors first (dense, then sparse), state row last, so a
    /// concurrent search never sees a file half-deleted.
    async fn delete_file_and_vectors(&self, row: &FileRow) -> Result<()> {
        let chunks = self.state.list_chunks(&row.path)?;
        let dense_ids: Vec<u32> = chunks.iter().map(|c| c.dense_vector_id as u32).collect();
        if !dense_ids.is_empty() {
            let mut vs = self.vector_store.write().await;
            vs.delete(&dense_ids)?;
        }
        {
            let mut fts = self.fts_store.write().await;
            for c in &chunks {
                if let Some(id) = c.sparse_vector_id {
                    fts.delete_chunk(id as u32)?;
                }
            }
            fts.commit()?;
        }
        self.state.delete_file(&row.path)?;
        Ok(())
    }

    /// Disabling a folder mid-run purges it back to `none` instead of leaving stale
    /// vectors for a folder that's no longer indexed. Also used by the HTTP layer to
    /// clear a folder's chunks/vectors ahead of a recursive delete.
    pub async fn purge_folder(&self, folder_path: &str) -> Result<()> {
        let files = self.state.list_files_under(folder_path)?;
        for file in &files {
            self.delete_file_and_vectors(file).await?;
        }
        let mut vs = self.vector_store.write().await;
        vs.build_index()?;
        Ok(())
    }
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn file_mtime_secs(path: &Path) -> Result<i64> {
    let meta = std::fs::metadata(path)?;
    let mtime = meta
        .modified()?
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    Ok(mtime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::EmbeddedChunk;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdSyncMutex;
    use tempfile::tempdir;

    /// Deterministic stand-in for the real ONNX embedder: returns a fixed-size zero
    /// vector per chunk so the indexing pipeline can be exercised without a model.
    struct FakeEmbedder {
        dims: usize,
        calls: AtomicUsize,
    }

    impl FakeEmbedder {
        fn new(dims: usize) -> Self {
            Self {
                dims,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Embedder for FakeEmbedder {
        fn embed_chunks(&mut self, chunks: Vec<crate::chunker::Chunk>) -> anyhow::Result<Vec<EmbeddedChunk>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(chunks
                .into_iter()
                .map(|c| EmbeddedChunk::new(c, vec![0.0; self.dims]))
                .collect())
        }

        fn embed_query(&mut self, _query: &str) -> anyhow::Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0.0; self.dims])
        }

        fn dimensions(&self) -> usize {
            self.dims
        }
    }

    fn build_indexer(root: &Path) -> (Arc<Indexer>, mpsc::UnboundedReceiver<String>) {
        let state = Arc::new(StateStore::open_in_memory().unwrap());
        // Leaked rather than kept alive in a binding: these stores outlive the
        // `TempDir` guard's scope inside the returned `Indexer`.
        let vector_dir = tempdir().unwrap().into_path();
        let vector_store = VectorStore::new(&vector_dir.join("vectors"), 8, 64).unwrap();
        let fts_dir = tempdir().unwrap().into_path();
        let fts_store = FtsStore::new(&fts_dir).unwrap();
        let embedder: Arc<StdMutex<dyn Embedder>> = Arc::new(StdSyncMutex::new(FakeEmbedder::new(8)));
        Indexer::new(
            root.to_path_buf(),
            state,
            Arc::new(RwLock::new(vector_store)),
            Arc::new(RwLock::new(fts_store)),
            embedder,
            Arc::new(NoopEventSink),
            constants::DEFAULT_CHUNK_SIZE,
            constants::DEFAULT_CHUNK_OVERLAP,
        )
    }

    #[tokio::test]
    async fn test_scan_indexes_new_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("note.txt"), "alpha beta gamma delta").unwrap();
        let (indexer, _rx) = build_indexer(dir.path());
        indexer.state.ensure_folder("").unwrap();

        let cancel = CancellationToken::new();
        indexer.scan_folder_now("", &cancel).await.unwrap();

        let row = indexer.state.get_file("note.txt").unwrap().unwrap();
        assert_eq!(row.index_status, IndexStatus::Indexed);
        assert!(row.chunk_count > 0);
        assert!(row.indexed_hash.is_some());
    }

    #[tokio::test]
    async fn test_rescan_skips_unchanged_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("note.txt"), "alpha beta gamma delta").unwrap();
        let (indexer, _rx) = build_indexer(dir.path());
        indexer.state.ensure_folder("").unwrap();
        let cancel = CancellationToken::new();
        indexer.scan_folder_now("", &cancel).await.unwrap();
        let first = indexer.state.get_file("note.txt").unwrap().unwrap();

        indexer.scan_folder_now("", &cancel).await.unwrap();
        let second = indexer.state.get_file("note.txt").unwrap().unwrap();

        assert_eq!(first.indexed_hash, second.indexed_hash);
        assert_eq!(first.chunk_count, second.chunk_count);
        assert_eq!(first.indexed_at, second.indexed_at);
    }

    #[tokio::test]
    async fn test_deleted_file_removed_from_state() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("note.txt");
        std::fs::write(&file_path, "alpha beta gamma delta").unwrap();
        let (indexer, _rx) = build_indexer(dir.path());
        indexer.state.ensure_folder("").unwrap();
        let cancel = CancellationToken::new();
        indexer.scan_folder_now("", &cancel).await.unwrap();
        assert!(indexer.state.get_file("note.txt").unwrap().is_some());

        std::fs::remove_file(&file_path).unwrap();
        indexer.scan_folder_now("", &cancel).await.unwrap();
        assert!(indexer.state.get_file("note.txt").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disabling_folder_purges_and_sets_none() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("note.txt"), "alpha beta gamma delta").unwrap();
        let (indexer, _rx) = build_indexer(dir.path());
        indexer.state.ensure_folder("").unwrap();
        let cancel = CancellationToken::new();
        indexer.scan_folder_now("", &cancel).await.unwrap();

        indexer.state.set_folder_indexing_enabled("", false).unwrap();
        indexer.scan_folder_now("", &cancel).await.unwrap();

        assert!(indexer.state.get_file("note.txt").unwrap().is_none());
        let folder = indexer.state.get_folder("").unwrap().unwrap();
        assert_eq!(folder.index_status, IndexStatus::None);
    }

    #[test]
    fn test_enqueue_collapses_while_running() {
        let dir = tempdir().unwrap();
        let (indexer, mut rx) = build_indexer(dir.path());

        // First enqueue while idle goes straight onto the queue.
        indexer.enqueue("docs");
        assert_eq!(rx.try_recv().unwrap(), "docs");

        // A worker would now mark it Running; further enqueues while running collapse
        // into a single pending flag rather than a second queue entry.
        indexer.pending.insert("docs".to_string(), PendingState::Running);
        indexer.enqueue("docs");
        indexer.enqueue("docs");
        assert!(rx.try_recv().is_err());
        assert_eq!(
            *indexer.pending.get("docs").unwrap(),
            PendingState::RunningWithPending
        );
    }
}
