//! HTTP surface (§6): folder CRUD, file upload, metadata/settings, sync CRUD +
//! trigger + provider helpers, and a WebSocket event stream bridged off the event bus.
//!
//! One process manages a single directory tree (the "managed root"). `serve` bootstraps
//! every long-lived capability — state store, dense + sparse indexes, indexer, sync
//! engine, event bus, filesystem observer — behind one shared `AppState` and then blocks
//! serving HTTP until the cancellation token fires, mirroring the daemon's bootstrap
//! shape (`daemon::run_daemon`) collapsed down to a single managed root instead of a
//! list of independently-indexed repos.

use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, Path as AxPath, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bus::Event;
use crate::bus::EventBus;
use crate::config::Config;
use crate::constants;
use crate::embed::{Embedder, EmbeddingService, ModelType};
use crate::error::KbError;
use crate::fts::FtsStore;
use crate::index::Indexer;
use crate::search::SearchEngine;
use crate::state::{Folder, StateStore, SyncSourceConfig};
use crate::sync::SyncEngine;
use crate::vectordb::VectorStore;
use crate::watch::{FsEvent, PathInfo};

/// Shared state behind every HTTP handler and the background tasks. Also reused by
/// the MCP tool surface, which needs the same `SearchEngine`/`StateStore` handles.
pub struct AppState {
    pub state: Arc<StateStore>,
    pub search: Arc<SearchEngine>,
    pub indexer: Arc<Indexer>,
    pub sync_engine: Arc<SyncEngine>,
    pub bus: Arc<EventBus>,
    pub root: PathBuf,
    pub http: reqwest::Client,
    pub http_port: u16,
    /// Token → logical path, for `get_file_uri`'s ephemeral download links. Entries
    /// expire on their own via the cache's TTL rather than needing explicit cleanup.
    download_tokens: moka::sync::Cache<String, String>,
    /// Held for the process lifetime; releases (and the advisory lock drops) on exit.
    _writer_lock: File,
}

/// Take an advisory exclusive lock on the managed root so a second `serve`/`mcp`
/// process against the same root fails fast instead of corrupting the state store.
fn acquire_writer_lock(root: &std::path::Path) -> anyhow::Result<File> {
    use fs2::FileExt;

    let lock_path = root.join(constants::DB_DIR_NAME).join(constants::WRITER_LOCK_FILE);
    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(&lock_path)?;
    file.try_lock_exclusive().map_err(|_| {
        KbError::conflict(format!(
            "another process already holds the writer lock at {}",
            lock_path.display()
        ))
    })?;
    Ok(file)
}

impl AppState {
    /// Mint a short-lived download token for `path`, returning the URI an MCP client
    /// can fetch it from (§6 `get_file_uri`).
    pub fn issue_download_uri(&self, path: &str) -> String {
        let token = uuid::Uuid::new_v4().to_string();
        self.download_tokens.insert(token.clone(), path.to_string());
        format!("http://127.0.0.1:{}/api/files/content?token={token}", self.http_port)
    }
}

/// Build every long-lived capability for a managed root, wired together but not yet
/// serving — used by `serve` and by the MCP entry point, which shares the same state.
pub async fn build_app_state(config: &Config, cancel: CancellationToken) -> anyhow::Result<Arc<AppState>> {
    let root = config
        .root_path
        .canonicalize()
        .unwrap_or_else(|_| config.root_path.clone());
    std::fs::create_dir_all(&root)?;

    let db_dir = root.join(constants::DB_DIR_NAME);
    std::fs::create_dir_all(&db_dir)?;

    let writer_lock = acquire_writer_lock(&root)?;

    let state = Arc::new(StateStore::open(&db_dir.join(constants::STATE_DB_NAME))?);

    let cache_dir = constants::get_global_models_cache_dir()?;
    let model_type = ModelType::from_short_name(&config.embedding_model).unwrap_or_default();
    let embedding_service = EmbeddingService::with_cache_dir(model_type, Some(&cache_dir))?;
    let dimensions = embedding_service.dimensions();
    let embedder: Arc<StdMutex<dyn Embedder>> = Arc::new(StdMutex::new(embedding_service));

    let vector_store = Arc::new(RwLock::new(VectorStore::new(
        &db_dir.join("vectors"),
        dimensions,
        config.lmdb_map_size_mb,
    )?));
    let fts_store = Arc::new(RwLock::new(FtsStore::new_with_writer(&db_dir.join("fts"))?));

    let bus = Arc::new(EventBus::with_capacity(config.event_buffer));

    let (indexer, index_receiver) = Indexer::new(
        root.clone(),
        state.clone(),
        vector_store.clone(),
        fts_store.clone(),
        embedder.clone(),
        bus.clone(),
        config.chunk_size,
        config.chunk_overlap,
    );
    indexer
        .clone()
        .spawn(index_receiver, config.indexer_workers, cancel.clone());

    let (sync_engine, sync_receiver) =
        SyncEngine::new(root.clone(), state.clone(), indexer.clone(), bus.clone());
    sync_engine
        .clone()
        .spawn(sync_receiver, config.indexer_workers.max(1), cancel.clone());

    let search = Arc::new(SearchEngine::new(
        state.clone(),
        vector_store.clone(),
        fts_store.clone(),
        embedder,
    ));

    Ok(Arc::new(AppState {
        state,
        search,
        indexer,
        sync_engine,
        bus,
        root,
        http: reqwest::Client::builder()
            .timeout(Duration::from_secs(constants::DEFAULT_PROVIDER_REQUEST_TIMEOUT_SECS))
            .build()?,
        http_port: config.http_port,
        download_tokens: moka::sync::Cache::builder()
            .max_capacity(1024)
            .time_to_live(Duration::from_secs(300))
            .build(),
        _writer_lock: writer_lock,
    }))
}

/// Entry point: bootstrap state, start the filesystem observer and the sync poll
/// loop, then serve HTTP until `cancel` fires.
pub async fn serve(config: Config, cancel: CancellationToken) -> anyhow::Result<()> {
    let app_state = build_app_state(&config, cancel.clone()).await?;
    info!(root = %app_state.root.display(), port = config.http_port, "starting server");

    for folder in app_state.state.list_folders()? {
        if folder.indexing_enabled {
            app_state.indexer.enqueue(&folder.path);
        }
    }

    spawn_filesystem_observer(app_state.clone(), config.fsw_debounce_ms, cancel.clone());
    spawn_sync_poll(app_state.clone(), config.indexing_poll_interval_secs, cancel.clone());

    let app = build_router(app_state);
    let addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
            info!("server shutting down");
        })
        .await?;

    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/folders/{*path}", get(get_folder_handler).delete(delete_folder_handler))
        .route("/api/folders", post(create_folder_handler))
        .route("/api/files/upload", post(upload_file_handler))
        .route("/api/files/content", get(download_file_handler))
        .route("/api/details/{*path}", get(details_handler))
        .route("/api/metadata/{*path}", put(put_metadata_handler))
        .route("/api/settings/folders/{*path}", put(put_folder_enabled_handler))
        .route(
            "/api/settings/folders/{*path}/search-active",
            put(put_folder_search_active_handler),
        )
        .route(
            "/api/settings/folders/{*path}/reindex",
            post(reindex_folder_handler),
        )
        .route(
            "/api/sync/{*path}",
            get(get_sync_handler).put(put_sync_handler).delete(delete_sync_handler),
        )
        .route("/api/sync/{*path}/trigger", post(trigger_sync_handler))
        .route("/api/sync/oauth/auth", get(oauth_auth_handler))
        .route("/api/sync/git/branches", get(git_branches_handler))
        .route("/api/sync/google-drive/folders", get(google_drive_folders_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

// ---- folders ------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct FolderResponse {
    path: String,
    indexing_enabled: bool,
    index_status: &'static str,
    sync_status: &'static str,
    last_synced_at: Option<i64>,
    last_sync_error: Option<String>,
    metadata_text: Option<String>,
    file_count: usize,
}

impl FolderResponse {
    fn from_folder(state: &StateStore, folder: Folder) -> Self {
        let file_count = state.list_files_under(&folder.path).map(|f| f.len()).unwrap_or(0);
        Self {
            path: folder.path.clone(),
            indexing_enabled: folder.indexing_enabled,
            index_status: folder.index_status.as_str(),
            sync_status: folder.sync_status.as_str(),
            last_synced_at: folder.last_synced_at,
            last_sync_error: folder.last_sync_error,
            metadata_text: folder.metadata_text,
            file_count,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateFolderRequest {
    name: String,
    path: String,
}

async fn create_folder_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateFolderRequest>,
) -> Result<Json<FolderResponse>, ApiError> {
    let physical = state.root.join(&req.path);
    std::fs::create_dir_all(&physical).map_err(KbError::from)?;
    state.state.ensure_folder(&req.path)?;
    state.state.set_folder_indexing_enabled(&req.path, true)?;
    info!(path = %req.path, name = %req.name, "folder created");
    let folder = state
        .state
        .get_folder(&req.path)?
        .ok_or_else(|| KbError::not_found(&req.path))?;
    Ok(Json(FolderResponse::from_folder(&state.state, folder)))
}

async fn get_folder_handler(
    State(state): State<Arc<AppState>>,
    AxPath(path): AxPath<String>,
) -> Result<Json<FolderResponse>, ApiError> {
    let folder = state
        .state
        .get_folder(&path)?
        .ok_or_else(|| KbError::not_found(&path))?;
    Ok(Json(FolderResponse::from_folder(&state.state, folder)))
}

async fn delete_folder_handler(
    State(state): State<Arc<AppState>>,
    AxPath(path): AxPath<String>,
) -> Result<StatusCode, ApiError> {
    state
        .state
        .get_folder(&path)?
        .ok_or_else(|| KbError::not_found(&path))?;

    state.indexer.purge_folder(&path).await?;
    state.state.delete_folder_recursive(&path)?;

    let physical = state.root.join(&path);
    if physical.exists() {
        std::fs::remove_dir_all(&physical).map_err(KbError::from)?;
    }
    info!(path = %path, "folder removed recursively");
    Ok(StatusCode::NO_CONTENT)
}

async fn upload_file_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut target_path: Option<String> = None;
    let mut bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| KbError::invalid_path("upload", e.to_string()))?
    {
        match field.name().unwrap_or("") {
            "path" => {
                target_path = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| KbError::invalid_path("upload", e.to_string()))?,
                );
            }
            "file" => {
                bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| KbError::invalid_path("upload", e.to_string()))?
                        .to_vec(),
                );
            }
            _ => {}
        }
    }

    let target_path = target_path.ok_or_else(|| KbError::invalid_path("upload", "missing path field"))?;
    let bytes = bytes.ok_or_else(|| KbError::invalid_path("upload", "missing file field"))?;

    let physical = state.root.join(&target_path);
    if let Some(parent) = physical.parent() {
        std::fs::create_dir_all(parent).map_err(KbError::from)?;
    }
    std::fs::write(&physical, &bytes).map_err(KbError::from)?;

    let folder_path = owning_folder(&target_path);
    state.state.ensure_folder(&folder_path)?;
    state.indexer.enqueue(&folder_path);

    info!(path = %target_path, bytes = bytes.len(), "file uploaded");
    Ok(Json(json!({ "path": target_path, "bytes": bytes.len() })))
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    token: String,
}

async fn download_file_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<DownloadQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let path = state
        .download_tokens
        .get(&q.token)
        .ok_or_else(|| KbError::not_found("download token"))?;
    let physical = state.root.join(&path);
    let bytes = std::fs::read(&physical).map_err(KbError::from)?;
    let mime = crate::extract::detect_mime(&physical);
    Ok(([(axum::http::header::CONTENT_TYPE, mime)], bytes))
}

/// First path segment owns a file directly under the managed root; nested paths keep
/// their immediate parent directory as the owning folder.
fn owning_folder(logical_path: &str) -> String {
    match logical_path.rsplit_once('/') {
        Some((parent, _)) => parent.to_string(),
        None => String::new(),
    }
}

#[derive(Debug, Serialize)]
struct DetailsResponse {
    path: String,
    kind: &'static str,
    folder: Option<FolderResponse>,
    file: Option<FileDetails>,
}

#[derive(Debug, Serialize)]
struct FileDetails {
    size: u64,
    mime: String,
    index_status: &'static str,
    chunk_count: u64,
    error_message: Option<String>,
}

async fn details_handler(
    State(state): State<Arc<AppState>>,
    AxPath(path): AxPath<String>,
) -> Result<Json<DetailsResponse>, ApiError> {
    if let Some(file) = state.state.get_file(&path)? {
        return Ok(Json(DetailsResponse {
            path: path.clone(),
            kind: "file",
            folder: None,
            file: Some(FileDetails {
                size: file.size,
                mime: file.mime,
                index_status: file.index_status.as_str(),
                chunk_count: file.chunk_count,
                error_message: file.error_message,
            }),
        }));
    }
    if let Some(folder) = state.state.get_folder(&path)? {
        return Ok(Json(DetailsResponse {
            path: path.clone(),
            kind: "folder",
            folder: Some(FolderResponse::from_folder(&state.state, folder)),
            file: None,
        }));
    }
    Err(KbError::not_found(&path).into())
}

#[derive(Debug, Deserialize)]
struct MetadataRequest {
    metadata_text: String,
    #[serde(default = "default_user_identity")]
    updated_by: String,
}

fn default_user_identity() -> String {
    constants::DEFAULT_USER_IDENTITY.to_string()
}

async fn put_metadata_handler(
    State(state): State<Arc<AppState>>,
    AxPath(path): AxPath<String>,
    Json(req): Json<MetadataRequest>,
) -> Result<StatusCode, ApiError> {
    state.state.set_folder_metadata(&path, &req.metadata_text, &req.updated_by)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct EnabledRequest {
    enabled: bool,
}

async fn put_folder_enabled_handler(
    State(state): State<Arc<AppState>>,
    AxPath(path): AxPath<String>,
    Json(req): Json<EnabledRequest>,
) -> Result<StatusCode, ApiError> {
    state.state.ensure_folder(&path)?;
    state.state.set_folder_indexing_enabled(&path, req.enabled)?;
    if req.enabled {
        state.indexer.enqueue(&path);
    } else {
        state.indexer.purge_folder(&path).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct SearchActiveRequest {
    search_active: bool,
    #[serde(default = "default_user_identity")]
    user_identity: String,
}

async fn put_folder_search_active_handler(
    State(state): State<Arc<AppState>>,
    AxPath(path): AxPath<String>,
    Json(req): Json<SearchActiveRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .state
        .set_user_visibility(&req.user_identity, &path, req.search_active)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reindex_folder_handler(
    State(state): State<Arc<AppState>>,
    AxPath(path): AxPath<String>,
) -> Result<StatusCode, ApiError> {
    state
        .state
        .get_folder(&path)?
        .ok_or_else(|| KbError::not_found(&path))?;
    state.indexer.enqueue(&path);
    Ok(StatusCode::ACCEPTED)
}

// ---- sync ---------------------------------------------------------------------------

async fn get_sync_handler(
    State(state): State<Arc<AppState>>,
    AxPath(path): AxPath<String>,
) -> Result<Json<SyncSourceConfig>, ApiError> {
    let source = state
        .state
        .get_sync_source(&path)?
        .ok_or_else(|| KbError::not_found(&path))?;
    Ok(Json(source))
}

async fn put_sync_handler(
    State(state): State<Arc<AppState>>,
    AxPath(path): AxPath<String>,
    Json(source): Json<SyncSourceConfig>,
) -> Result<StatusCode, ApiError> {
    state.state.ensure_folder(&path)?;
    state.state.set_sync_source(&path, &source, true)?;
    info!(path = %path, provider = source.provider_name(), "sync source bound");
    state.sync_engine.enqueue(&path);
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_sync_handler(
    State(state): State<Arc<AppState>>,
    AxPath(path): AxPath<String>,
) -> Result<StatusCode, ApiError> {
    state.state.delete_sync_source(&path)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn trigger_sync_handler(
    State(state): State<Arc<AppState>>,
    AxPath(path): AxPath<String>,
) -> Result<StatusCode, ApiError> {
    state
        .state
        .get_sync_source(&path)?
        .ok_or_else(|| KbError::not_found(&path))?;
    state.sync_engine.enqueue(&path);
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
struct OauthAuthQuery {
    folder_path: String,
}

/// Reports whether the bound provider's refresh-token environment variable is
/// present — the UI's cue for whether it needs to walk the user through the
/// provider's consent screen to populate it (§1 Non-goal: this crate doesn't host
/// that consent flow itself).
async fn oauth_auth_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<OauthAuthQuery>,
) -> Result<Json<Value>, ApiError> {
    let source = state
        .state
        .get_sync_source(&q.folder_path)?
        .ok_or_else(|| KbError::not_found(&q.folder_path))?;
    let env_var = match &source {
        SyncSourceConfig::Sharepoint(c) => Some(c.oauth_refresh_token_env.clone()),
        SyncSourceConfig::GoogleDrive(c) => Some(c.oauth_refresh_token_env.clone()),
        SyncSourceConfig::Box(c) => Some(c.oauth_refresh_token_env.clone()),
        _ => None,
    };
    let Some(env_var) = env_var else {
        return Ok(Json(json!({ "requires_oauth": false })));
    };
    let connected = std::env::var(&env_var).is_ok();
    Ok(Json(json!({
        "requires_oauth": true,
        "connected": connected,
        "env_var": env_var,
    })))
}

#[derive(Debug, Deserialize)]
struct GitBranchesQuery {
    owner: String,
    repo: String,
    token_env: String,
}

#[derive(Debug, Deserialize)]
struct GitHubBranch {
    name: String,
}

async fn git_branches_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<GitBranchesQuery>,
) -> Result<Json<Vec<String>>, ApiError> {
    let token = std::env::var(&q.token_env).map_err(|_| KbError::provider_auth_required("github"))?;
    let url = format!("https://api.github.com/repos/{}/{}/branches", q.owner, q.repo);
    let resp = state
        .http
        .get(&url)
        .bearer_auth(&token)
        .header("X-GitHub-Api-Version", "2022-11-28")
        .header("Accept", "application/vnd.github+json")
        .header("User-Agent", "kbase-sync")
        .send()
        .await
        .map_err(|e| KbError::provider_transient("github", e.to_string()))?;
    if !resp.status().is_success() {
        return Err(KbError::provider_fatal("github", format!("branch list returned {}", resp.status())).into());
    }
    let branches: Vec<GitHubBranch> = resp
        .json()
        .await
        .map_err(|e| KbError::provider_transient("github", e.to_string()))?;
    Ok(Json(branches.into_iter().map(|b| b.name).collect()))
}

#[derive(Debug, Deserialize)]
struct GoogleDriveFoldersQuery {
    oauth_refresh_token_env: String,
    #[serde(default)]
    parent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct DriveFilesResponse {
    files: Vec<DriveFile>,
}

async fn google_drive_folders_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<GoogleDriveFoldersQuery>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let refresh_token = crate::sync::oauth::resolve_refresh_token(&q.oauth_refresh_token_env)?;
    let access_token = crate::sync::oauth::refresh_access_token(
        &state.http,
        "https://oauth2.googleapis.com/token",
        &refresh_token,
        "GOOGLE_DRIVE_CLIENT_ID",
        "GOOGLE_DRIVE_CLIENT_SECRET",
    )
    .await?;

    let parent = q.parent_id.unwrap_or_else(|| "root".to_string());
    let query = format!(
        "'{parent}' in parents and mimeType = 'application/vnd.google-apps.folder' and trashed = false"
    );
    let resp = state
        .http
        .get("https://www.googleapis.com/drive/v3/files")
        .bearer_auth(&access_token)
        .query(&[("q", query.as_str()), ("fields", "files(id,name)")])
        .send()
        .await
        .map_err(|e| KbError::provider_transient("google_drive", e.to_string()))?;
    if !resp.status().is_success() {
        return Err(
            KbError::provider_fatal("google_drive", format!("folder list returned {}", resp.status())).into(),
        );
    }
    let parsed: DriveFilesResponse = resp
        .json()
        .await
        .map_err(|e| KbError::provider_transient("google_drive", e.to_string()))?;
    Ok(Json(
        parsed
            .files
            .into_iter()
            .map(|f| json!({ "id": f.id, "name": f.name }))
            .collect(),
    ))
}

// ---- websocket ------------------------------------------------------------------------

async fn ws_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let mut sub = state.bus.subscribe();
    let mut ping_interval = tokio::time::interval(Duration::from_secs(30));
    ping_interval.tick().await;

    loop {
        tokio::select! {
            received = sub.recv() => {
                let Some(received) = received else { break };
                let payload = event_to_json(&received.event);
                if socket.send(Message::Text(payload.to_string())).await.is_err() {
                    break;
                }
            }
            _ = ping_interval.tick() => {
                if socket.send(Message::Text(json!({"type": "ping"}).to_string())).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}

/// Convert an internal event into the JSON wire shape (§4.9): `type` selects the
/// schema, every variant carries `path` plus whatever else its schema needs.
fn event_to_json(event: &Event) -> Value {
    match event {
        Event::Fs(FsEvent::Created(info)) => {
            json!({ "type": "created", "path": info.logical, "is_dir": info.is_dir })
        }
        Event::Fs(FsEvent::Modified(info)) => {
            json!({ "type": "modified", "path": info.logical, "is_dir": info.is_dir })
        }
        Event::Fs(FsEvent::Deleted(info)) => {
            json!({ "type": "deleted", "path": info.logical, "is_dir": info.is_dir })
        }
        Event::Fs(FsEvent::Moved { from, to }) => {
            json!({ "type": "moved", "path": to.logical, "from": from.logical })
        }
        Event::Index(crate::index::IndexEvent::FolderIndexing { folder_path }) => {
            json!({ "type": "index_status", "path": folder_path, "folder_path": folder_path, "status": "indexing" })
        }
        Event::Index(crate::index::IndexEvent::FolderIndexed { folder_path }) => {
            json!({ "type": "index_status", "path": folder_path, "folder_path": folder_path, "status": "indexed" })
        }
        Event::Index(crate::index::IndexEvent::FolderError { folder_path, message }) => {
            json!({ "type": "index_status", "path": folder_path, "folder_path": folder_path, "status": "error", "message": message })
        }
        Event::Index(crate::index::IndexEvent::IndexComplete {
            folder_path,
            files_indexed,
            total_chunks,
        }) => {
            json!({
                "type": "index_complete",
                "path": folder_path,
                "folder_path": folder_path,
                "files_indexed": files_indexed,
                "total_chunks": total_chunks,
            })
        }
        Event::Sync(crate::sync::SyncEvent::FolderSyncing { folder_path }) => {
            json!({ "type": "sync_status", "path": folder_path, "folder_path": folder_path, "status": "running" })
        }
        Event::Sync(crate::sync::SyncEvent::FolderSynced {
            folder_path,
            written,
            deleted,
        }) => {
            json!({
                "type": "sync_status",
                "path": folder_path,
                "folder_path": folder_path,
                "status": "synced",
                "written": written,
                "deleted": deleted,
            })
        }
        Event::Sync(crate::sync::SyncEvent::FolderError { folder_path, message }) => {
            json!({ "type": "sync_status", "path": folder_path, "folder_path": folder_path, "status": "error", "message": message })
        }
        Event::Sync(crate::sync::SyncEvent::ReconnectRequired { folder_path, provider }) => {
            json!({
                "type": "sync_status",
                "path": folder_path,
                "folder_path": folder_path,
                "status": "reconnect_required",
                "provider": provider,
            })
        }
        Event::ProviderConnected { provider, folder_path } => {
            json!({ "type": format!("{provider}_connected"), "path": folder_path, "folder_path": folder_path })
        }
        Event::Ping => json!({ "type": "ping" }),
    }
}

// ---- background tasks ----------------------------------------------------------------

/// Bridges the synchronous `FileObserver` into the async world on a blocking thread,
/// publishing every batch to the event bus and enqueueing the owning folder on the
/// indexer — the same bridge pattern the old single-project server used
/// (`run_file_watcher`), generalized from one project root to per-folder enqueue.
fn spawn_filesystem_observer(state: Arc<AppState>, debounce_ms: u64, cancel: CancellationToken) {
    tokio::task::spawn_blocking(move || {
        let mut observer = crate::watch::FileObserver::new(state.root.clone());
        observer.prime();
        if let Err(e) = observer.start(debounce_ms) {
            error!(error = %e, "failed to start filesystem observer");
            return;
        }

        while !cancel.is_cancelled() {
            let events = observer.wait_for_events(Duration::from_secs(1));
            for event in events {
                let folder_path = owning_folder(&event.primary_path().logical);
                if state.state.ensure_folder(&folder_path).is_ok() {
                    state.indexer.enqueue(&folder_path);
                }
                state.bus.publish(Event::Fs(event));
            }
        }
    });
}

/// Polls every folder with a bound sync source on a fixed interval (§4.7 "scheduled
/// pull"), collapsing into the sync engine's existing per-folder queue exactly like a
/// manual trigger would.
fn spawn_sync_poll(state: Arc<AppState>, interval_secs: u64, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        timer.tick().await;
        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match state.state.list_folders() {
                        Ok(folders) => {
                            for folder in folders {
                                if state.state.get_sync_source(&folder.path).ok().flatten().is_some() {
                                    state.sync_engine.enqueue(&folder.path);
                                }
                            }
                        }
                        Err(e) => warn!(error = %e, "failed to list folders for sync poll"),
                    }
                }
                _ = cancel.cancelled() => return,
            }
        }
    });
}

// ---- error mapping --------------------------------------------------------------------

struct ApiError(KbError);

impl From<KbError> for ApiError {
    fn from(err: KbError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn path_info(logical: &str) -> PathInfo {
        PathInfo {
            absolute: PathBuf::from(logical),
            logical: logical.to_string(),
            is_dir: false,
        }
    }

    #[test]
    fn test_owning_folder_nested_path() {
        assert_eq!(owning_folder("docs/sub/a.txt"), "docs/sub");
    }

    #[test]
    fn test_owning_folder_root_level_file() {
        assert_eq!(owning_folder("a.txt"), "");
    }

    #[test]
    fn test_event_to_json_created_carries_path() {
        let json = event_to_json(&Event::Fs(FsEvent::Created(path_info("docs/a.txt"))));
        assert_eq!(json["type"], "created");
        assert_eq!(json["path"], "docs/a.txt");
    }

    #[test]
    fn test_event_to_json_ping() {
        let json = event_to_json(&Event::Ping);
        assert_eq!(json["type"], "ping");
    }

    #[test]
    fn test_event_to_json_provider_connected_tags_type_by_provider() {
        let json = event_to_json(&Event::ProviderConnected {
            provider: "github".to_string(),
            folder_path: "docs".to_string(),
        });
        assert_eq!(json["type"], "github_connected");
        assert_eq!(json["folder_path"], "docs");
    }

    #[test]
    fn test_event_to_json_index_complete_carries_counts() {
        let json = event_to_json(&Event::Index(crate::index::IndexEvent::IndexComplete {
            folder_path: "docs".to_string(),
            files_indexed: 3,
            total_chunks: 12,
        }));
        assert_eq!(json["files_indexed"], 3);
        assert_eq!(json["total_chunks"], 12);
    }
}
