//! Central constants for pipeline configuration.
//!
//! All string literals for paths, filenames, and tuning defaults live here to avoid
//! duplication and keep defaults consistent across the codebase.

use std::sync::atomic::AtomicBool;

/// Name of the state-store + vector-store directory under the managed root.
pub const DB_DIR_NAME: &str = ".kbase";

/// Name of the global config directory in the user's home.
pub const CONFIG_DIR_NAME: &str = ".kbase";

/// Name of the relational state store file (SQLite) inside `DB_DIR_NAME`.
pub const STATE_DB_NAME: &str = "state.db";

/// Name of the fastembed model cache directory (inside `DB_DIR_NAME`).
pub const FASTEMBED_CACHE_DIR: &str = "fastembed_cache";

/// Name of the daemon's YAML config file.
pub const DAEMON_CONFIG_FILE: &str = "kbase.yaml";

/// Filesystem observer debounce window in milliseconds (§4.3).
pub const DEFAULT_FSW_DEBOUNCE_MS: u64 = 500;

/// Lock file name indicating an active writer instance — prevents a second process
/// from opening the same managed root for writing (the Non-goal about concurrent
/// writers from multiple processes).
pub const WRITER_LOCK_FILE: &str = ".writer.lock";

/// Default token-window chunk size (§4.5).
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// Default token-window overlap (§4.5).
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// Default hybrid fusion weight for the dense score (§4.8). `1 - α` weights sparse.
pub const DEFAULT_ALPHA: f32 = 0.6;

/// Identity used for visibility checks when a caller supplies none. `user_identity` is
/// an opaque token from the HTTP/MCP layer; this is not a real account.
pub const DEFAULT_USER_IDENTITY: &str = "default";

/// Upper bound on `limit` a search request may request (§4.8).
pub const MAX_SEARCH_RESULTS: usize = 100;

/// Candidate multiplier: how many raw hits to pull from each store per requested
/// result before per-file dedup, since several chunks from the same file commonly
/// outrank chunks from distinct files.
pub const SEARCH_CANDIDATE_MULTIPLIER: usize = 4;

/// Default embed batch size bound during indexing (§4.6 contract 4).
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 32;

/// Default number of indexer worker tasks (§5).
pub const DEFAULT_INDEXER_WORKERS: usize = 2;

/// Embedding schema version. Bumped when the embedding model (or its dimensionality)
/// changes in a way that invalidates previously stored vectors. Invalidation is lazy:
/// a chunk row's stored version is compared against this constant the next time its
/// file's folder is scanned, rather than swept proactively (§9 Open Question).
pub const EMBEDDING_VERSION: u32 = 1;

/// Default per-subscriber event-bus buffer capacity (§4.9).
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Provider HTTP request timeout, seconds (§5).
pub const DEFAULT_PROVIDER_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Overall per-sync deadline, seconds (§5).
pub const DEFAULT_SYNC_DEADLINE_SECS: u64 = 15 * 60;

/// Folder-scan retry backoff schedule, seconds, capped at 60s with a max of 6 retries
/// before a folder is left in `error` (§4.6 contract 7).
pub const FOLDER_RETRY_BACKOFF_SECS: &[u64] = &[1, 2, 4, 8, 16, 32];
pub const FOLDER_MAX_RETRIES: usize = 6;

/// LMDB map size for the dense vector store, megabytes. Overridable via
/// `KBASE_LMDB_MAP_SIZE_MB`.
pub const DEFAULT_LMDB_MAP_SIZE_MB: usize = 2048;

/// In-memory embedding cache limit, megabytes. Overridable via
/// `KBASE_CACHE_MAX_MEMORY_MB`.
pub const DEFAULT_CACHE_MAX_MEMORY_MB: u64 = 512;

/// Number of files processed before the ONNX inference session is recreated, to
/// reclaim the arena's monotonically growing memory.
pub const DEFAULT_ARENA_RESET_INTERVAL: usize = 500;

/// Flips true on the first Ctrl-C; a second Ctrl-C while this is set force-exits.
pub static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

pub fn is_shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(std::sync::atomic::Ordering::Relaxed)
}

/// Resolve (and create) the global, cross-project embedding model cache directory.
pub fn get_global_models_cache_dir() -> anyhow::Result<std::path::PathBuf> {
    let dir = dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("no home directory"))?
        .join(CONFIG_DIR_NAME)
        .join(FASTEMBED_CACHE_DIR);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Subdirectory (under the state-store dir) holding rotated log files.
pub const LOG_DIR_NAME: &str = "logs";

/// Base name of the active log file; rotated files get a `.N` suffix.
pub const LOG_FILE_NAME: &str = "kbase.log";

pub const DEFAULT_LOG_MAX_SIZE_MB: usize = 50;
pub const DEFAULT_LOG_MAX_FILES: usize = 5;
pub const DEFAULT_LOG_RETENTION_DAYS: u64 = 14;

/// Path components that are always excluded from the folder walk and the filesystem
/// observer, regardless of `.gitignore`/`.kbaseignore` contents.
pub const ALWAYS_EXCLUDED: &[&str] = &[
    ".kbase",
    ".kbase.dbs",
    "fastembed_cache",
    ".git",
    ".svn",
    ".hg",
    "node_modules",
    "target",
    "dist",
    "build",
    "out",
    "__pycache__",
    ".pytest_cache",
    ".tox",
    "venv",
    ".venv",
    "vendor",
    ".bundle",
    ".gradle",
    ".m2",
    ".idea",
    ".vscode",
    ".vs",
    "coverage",
    ".nyc_output",
    ".cache",
];
