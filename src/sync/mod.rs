//! Remote-sync engine (§4.7): pulls content from a bound remote source down into a
//! folder's managed physical path, in three phases — authenticate, plan, apply —
//! driven by a worker pool that mirrors the indexer's single-flight-per-folder shape
//! (`index::manager`) almost exactly, just queuing sync runs instead of folder scans.

mod github;
pub mod oauth;
mod provider;
mod rest;
mod providers;

pub use provider::{ApplyOutcome, AuthToken, Provider, RemoteChange, RemoteOp, SyncPlan};

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::constants;
use crate::error::{KbError, Result};
use crate::index::Indexer;
use crate::state::{StateStore, SyncSourceConfig, SyncStatus};

/// Status events a sync run emits (§4.7 phases 1-3), mirroring `index::IndexEvent`.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    FolderSyncing { folder_path: String },
    FolderSynced { folder_path: String, written: usize, deleted: usize },
    FolderError { folder_path: String, message: String },
    ReconnectRequired { folder_path: String, provider: String },
}

pub trait SyncEventSink: Send + Sync {
    fn emit(&self, event: SyncEvent);
}

pub struct NoopSyncEventSink;

impl SyncEventSink for NoopSyncEventSink {
    fn emit(&self, event: SyncEvent) {
        debug!(?event, "sync event");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingState {
    Idle,
    Running,
    RunningWithPending,
}

/// Resolve the `Provider` that handles a given bound source (§4.7.1). `github` gets
/// the coarse-grained clone/pull implementation; the other six share `RestProvider`
/// over a provider-specific `DocumentApi`.
fn provider_for(source: &SyncSourceConfig, http: &reqwest::Client) -> Box<dyn Provider> {
    match source {
        SyncSourceConfig::Github(_) => Box::new(github::GitHubProvider::new(http.clone())),
        SyncSourceConfig::Sharepoint(_) => Box::new(rest::RestProvider::new(providers::SharepointApi {
            http: http.clone(),
        })),
        SyncSourceConfig::GoogleDrive(_) => Box::new(rest::RestProvider::new(providers::GoogleDriveApi {
            http: http.clone(),
        })),
        SyncSourceConfig::AzureDevops(_) => Box::new(rest::RestProvider::new(providers::AzureDevopsApi {
            http: http.clone(),
        })),
        SyncSourceConfig::Jira(_) => Box::new(rest::RestProvider::new(providers::JiraApi { http: http.clone() })),
        SyncSourceConfig::Confluence(_) => Box::new(rest::RestProvider::new(providers::ConfluenceApi {
            http: http.clone(),
        })),
        SyncSourceConfig::Box(_) => Box::new(rest::RestProvider::new(providers::BoxApi { http: http.clone() })),
    }
}

fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(constants::DEFAULT_PROVIDER_REQUEST_TIMEOUT_SECS))
        .user_agent("kbase-sync")
        .build()
        .expect("static reqwest client config is always valid")
}

/// Drives sync runs for bound folders. After a successful apply it enqueues the
/// folder on the indexer so newly-synced content gets picked up without waiting for
/// the filesystem observer to notice the writes.
pub struct SyncEngine {
    state: Arc<StateStore>,
    root: std::path::PathBuf,
    indexer: Arc<Indexer>,
    events: Arc<dyn SyncEventSink>,
    http: reqwest::Client,
    pending: DashMap<String, PendingState>,
    sender: mpsc::UnboundedSender<String>,
}

impl SyncEngine {
    pub fn new(
        root: std::path::PathBuf,
        state: Arc<StateStore>,
        indexer: Arc<Indexer>,
        events: Arc<dyn SyncEventSink>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let engine = Arc::new(Self {
            state,
            root,
            indexer,
            events,
            http: build_http_client(),
            pending: DashMap::new(),
            sender,
        });
        (engine, receiver)
    }

    /// Queue a folder for a sync run, collapsing concurrent requests the same way
    /// the indexer's `enqueue` does (§4.6.1's idiom, reused here for sync triggers).
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

    pub fn spawn(
        self: Arc<Self>,
        receiver: mpsc::UnboundedReceiver<String>,
        workers: usize,
        cancel: CancellationToken,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        let receiver = Arc::new(TokioMutex::new(receiver));
        (0..workers.max(1))
            .map(|_| {
                let engine = self.clone();
                let receiver = receiver.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { engine.worker_loop(receiver, cancel).await })
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
            if let Err(e) = self.sync_folder_now(&folder, &cancel).await {
                if !e.is_cancelled() {
                    error!(folder = %folder, error = %e, "folder sync failed");
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

    /// Run the three phases for one folder, bypassing the queue. Used by the CLI's
    /// one-shot `sync` command and by tests.
    pub async fn sync_folder_now(&self, folder_path: &str, cancel: &CancellationToken) -> Result<()> {
        let source = self
            .state
            .get_sync_source(folder_path)?
            .ok_or_else(|| KbError::not_found(folder_path))?;
        let provider_name = source.provider_name();

        let deadline = Duration::from_secs(constants::DEFAULT_SYNC_DEADLINE_SECS);
        match tokio::time::timeout(deadline, self.run_phases(folder_path, &source, cancel)).await {
            Ok(Ok(outcome)) => {
                self.state.set_sync_status(folder_path, SyncStatus::Synced, None)?;
                self.events.emit(SyncEvent::FolderSynced {
                    folder_path: folder_path.to_string(),
                    written: outcome.written,
                    deleted: outcome.deleted,
                });
                self.indexer.enqueue(folder_path);
                Ok(())
            }
            Ok(Err(e)) if e.is_cancelled() => Err(e),
            Ok(Err(e)) => {
                self.handle_sync_error(folder_path, provider_name, &e)?;
                Err(e)
            }
            Err(_elapsed) => {
                let e = KbError::provider_transient(provider_name, "sync deadline exceeded");
                self.handle_sync_error(folder_path, provider_name, &e)?;
                Err(e)
            }
        }
    }

    fn handle_sync_error(&self, folder_path: &str, provider_name: &str, e: &KbError) -> Result<()> {
        self.state
            .set_sync_status(folder_path, SyncStatus::Error, Some(&e.to_string()))?;
        if matches!(e, KbError::ProviderAuthRequired { .. }) {
            self.events.emit(SyncEvent::ReconnectRequired {
                folder_path: folder_path.to_string(),
                provider: provider_name.to_string(),
            });
        } else {
            self.events.emit(SyncEvent::FolderError {
                folder_path: folder_path.to_string(),
                message: e.to_string(),
            });
        }
        Ok(())
    }

    /// Authenticate, plan, apply (§4.7 phases 1-3), persisting the cursor only once
    /// apply has actually succeeded — a cancelled or failed apply leaves the old
    /// cursor in place so the next attempt re-plans from the same point.
    async fn run_phases(
        &self,
        folder_path: &str,
        source: &SyncSourceConfig,
        cancel: &CancellationToken,
    ) -> Result<ApplyOutcome> {
        self.state.set_sync_status(folder_path, SyncStatus::Running, None)?;
        self.events.emit(SyncEvent::FolderSyncing {
            folder_path: folder_path.to_string(),
        });

        let provider = provider_for(source, &self.http);
        let token = provider.authorize(source).await?;

        let cursor = self.state.get_sync_cursor(folder_path)?;
        let plan = provider.plan(source, &token, cursor.as_deref()).await?;

        let folder_root = self.root.join(folder_path);
        std::fs::create_dir_all(&folder_root)?;
        let outcome = provider
            .apply(source, &token, &plan, &folder_root, cancel)
            .await?;

        self.state.set_sync_cursor(folder_path, &plan.next_cursor)?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::{EmbeddedChunk, Embedder};
    use crate::fts::FtsStore;
    use crate::index::{Indexer, NoopEventSink};
    use crate::state::sync_source::GitHubSyncConfig;
    use crate::vectordb::VectorStore;
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;
    use tokio::sync::RwLock;

    struct FakeEmbedder;
    impl Embedder for FakeEmbedder {
        fn embed_chunks(&mut self, chunks: Vec<crate::chunker::Chunk>) -> anyhow::Result<Vec<EmbeddedChunk>> {
            Ok(chunks.into_iter().map(|c| EmbeddedChunk::new(c, vec![0.0; 8])).collect())
        }
        fn embed_query(&mut self, _query: &str) -> anyhow::Result<Vec<f32>> {
            Ok(vec![0.0; 8])
        }

        fn dimensions(&self) -> usize {
            8
        }
    }

    fn build_engine(root: &std::path::Path) -> (Arc<SyncEngine>, mpsc::UnboundedReceiver<String>) {
        let state = Arc::new(StateStore::open_in_memory().unwrap());
        let vector_dir = tempdir().unwrap().into_path();
        let vector_store = VectorStore::new(&vector_dir.join("vectors"), 8, 64).unwrap();
        let fts_dir = tempdir().unwrap().into_path();
        let fts_store = FtsStore::new(&fts_dir).unwrap();
        let embedder: Arc<StdMutex<dyn Embedder>> = Arc::new(StdMutex::new(FakeEmbedder));
        let (indexer, _rx) = Indexer::new(
            root.to_path_buf(),
            state.clone(),
            Arc::new(RwLock::new(vector_store)),
            Arc::new(RwLock::new(fts_store)),
            embedder,
            Arc::new(NoopEventSink),
            constants::DEFAULT_CHUNK_SIZE,
            constants::DEFAULT_CHUNK_OVERLAP,
        );
        SyncEngine::new(root.to_path_buf(), state, indexer, Arc::new(NoopSyncEventSink))
    }

    #[tokio::test]
    async fn test_sync_without_bound_source_errors() {
        let dir = tempdir().unwrap();
        let (engine, _rx) = build_engine(dir.path());
        engine.state.ensure_folder("docs").unwrap();
        let cancel = CancellationToken::new();
        let result = engine.sync_folder_now("docs", &cancel).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_missing_token_env_sets_reconnect_required() {
        let dir = tempdir().unwrap();
        let (engine, _rx) = build_engine(dir.path());
        engine.state.ensure_folder("repo").unwrap();
        let source = SyncSourceConfig::Github(GitHubSyncConfig {
            owner: "acme".to_string(),
            repo: "widgets".to_string(),
            branch: "main".to_string(),
            path_prefix: None,
            token_env: "KBASE_TEST_MISSING_TOKEN".to_string(),
        });
        engine.state.set_sync_source("repo", &source, false).unwrap();

        let cancel = CancellationToken::new();
        let result = engine.sync_folder_now("repo", &cancel).await;
        assert!(result.is_err());

        let folder = engine.state.get_folder("repo").unwrap().unwrap();
        assert_eq!(folder.sync_status, SyncStatus::Error);
        assert!(folder.last_sync_error.is_some());
    }

    #[test]
    fn test_enqueue_collapses_while_running() {
        let dir = tempdir().unwrap();
        let (engine, mut rx) = build_engine(dir.path());

        engine.enqueue("repo");
        assert_eq!(rx.try_recv().unwrap(), "repo");

        engine.pending.insert("repo".to_string(), PendingState::Running);
        engine.enqueue("repo");
        engine.enqueue("repo");
        assert!(rx.try_recv().is_err());
        assert_eq!(
            *engine.pending.get("repo").unwrap(),
            PendingState::RunningWithPending
        );
    }
}
