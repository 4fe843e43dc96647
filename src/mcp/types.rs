//! MCP request/response shapes (§6 tool surface).

use rmcp::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

fn default_user_identity() -> String {
    crate::constants::DEFAULT_USER_IDENTITY.to_string()
}

/// Hybrid search over every folder visible to `user_identity`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchRequest {
    /// Natural-language or keyword query.
    pub query: String,
    /// Maximum number of hits to return (default 25, capped at the server's limit).
    pub limit: Option<usize>,
    /// Restrict to these folder paths, if given.
    pub include_folders: Option<Vec<String>>,
    /// Drop these folder paths from the result set, if given.
    pub exclude_folders: Option<Vec<String>>,
    /// Identity the caller is acting as, for per-user folder visibility.
    #[serde(default = "default_user_identity")]
    pub user_identity: String,
}

#[derive(Debug, Serialize)]
pub struct SearchResultItem {
    pub file_path: String,
    pub file_name: String,
    pub folder_path: String,
    pub chunk_text: String,
    pub chunk_ordinal: u32,
    pub score: f32,
}

/// Path to a single file, relative to the managed root.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct FilePathRequest {
    pub file_path: String,
}

#[derive(Debug, Serialize)]
pub struct IndexedFolderItem {
    pub path: String,
    pub index_status: String,
    pub file_count: u64,
    pub chunk_count: u64,
}

/// Inclusive ordinal range of chunks to merge into one string.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ChunkRangeRequest {
    pub file_path: String,
    pub start: u32,
    pub end: u32,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SetFolderActiveRequest {
    pub folder_path: String,
    pub active: bool,
    /// Identity performing the change; required since visibility is per-user.
    pub user_identity: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FolderActiveStatesRequest {
    pub user_identity: String,
}
