//! Row types for the state store tables (§3).

use rusqlite::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    None,
    Pending,
    Indexing,
    Indexed,
    Error,
}

impl IndexStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pending => "pending",
            Self::Indexing => "indexing",
            Self::Indexed => "indexed",
            Self::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "indexing" => Self::Indexing,
            "indexed" => Self::Indexed,
            "error" => Self::Error,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Running,
    Synced,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "synced" => Self::Synced,
            "error" => Self::Error,
            _ => Self::Idle,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Folder {
    pub path: String,
    pub indexing_enabled: bool,
    pub sync_status: SyncStatus,
    pub last_synced_at: Option<i64>,
    pub last_sync_error: Option<String>,
    pub index_status: IndexStatus,
    pub metadata_text: Option<String>,
    pub metadata_updated_by: Option<String>,
}

impl Folder {
    pub(super) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            path: row.get(0)?,
            indexing_enabled: row.get(1)?,
            sync_status: SyncStatus::from_str(&row.get::<_, String>(2)?),
            last_synced_at: row.get(3)?,
            last_sync_error: row.get(4)?,
            index_status: IndexStatus::from_str(&row.get::<_, String>(5)?),
            metadata_text: row.get(6)?,
            metadata_updated_by: row.get(7)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FileRow {
    pub path: String,
    pub folder_path: String,
    pub size: u64,
    pub mtime: i64,
    pub content_hash: String,
    pub mime: String,
    pub index_status: IndexStatus,
    pub indexed_at: Option<i64>,
    pub indexed_hash: Option<String>,
    pub chunk_count: u64,
    pub error_message: Option<String>,
}

impl FileRow {
    pub(super) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            path: row.get(0)?,
            folder_path: row.get(1)?,
            size: row.get::<_, i64>(2)? as u64,
            mtime: row.get(3)?,
            content_hash: row.get(4)?,
            mime: row.get(5)?,
            index_status: IndexStatus::from_str(&row.get::<_, String>(6)?),
            indexed_at: row.get(7)?,
            indexed_hash: row.get(8)?,
            chunk_count: row.get::<_, i64>(9)? as u64,
            error_message: row.get(10)?,
        })
    }

    /// A file is stale (needs re-indexing) when its current content hash diverges
    /// from the hash it was last indexed under (§4.6 contract 3).
    pub fn needs_reindex(&self) -> bool {
        self.indexed_hash.as_deref() != Some(self.content_hash.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ChunkRow {
    pub file_path: String,
    pub ordinal: u32,
    pub text: String,
    pub token_count: u32,
    pub char_start: u64,
    pub char_end: u64,
    pub embedding_version: u32,
    pub dense_vector_id: u64,
    pub sparse_vector_id: Option<u64>,
}

impl ChunkRow {
    pub(super) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            file_path: row.get(0)?,
            ordinal: row.get::<_, i64>(1)? as u32,
            text: row.get(2)?,
            token_count: row.get::<_, i64>(3)? as u32,
            char_start: row.get::<_, i64>(4)? as u64,
            char_end: row.get::<_, i64>(5)? as u64,
            embedding_version: row.get::<_, i64>(6)? as u32,
            dense_vector_id: row.get::<_, i64>(7)? as u64,
            sparse_vector_id: row.get::<_, Option<i64>>(8)?.map(|v| v as u64),
        })
    }
}

/// A chunk awaiting insertion, built by the indexer before it has a row identity.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub ordinal: u32,
    pub text: String,
    pub token_count: u32,
    pub char_start: u64,
    pub char_end: u64,
    pub embedding_version: u32,
    pub dense_vector_id: u64,
    pub sparse_vector_id: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct UserFolderVisibility {
    pub user_identity: String,
    pub folder_path: String,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct ExtensionStats {
    pub extension: String,
    pub file_count: u64,
    pub chunk_count: u64,
}
