//! MCP tool surface (§6): the same capabilities the HTTP/WS layer exposes to the UI,
//! reachable from a tool-calling agent instead — `search`, folder listing, raw file
//! and chunk-range reads, ephemeral download links, and per-user folder visibility.
//!
//! Wire framing is an external concern (§1); this module only has to get the tool
//! surface right. It shares one `AppState` with the HTTP server (`server::build_app_state`)
//! so a `search` call here sees exactly the same index the UI does.

pub mod types;

use std::sync::Arc;

use rmcp::{
    handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler,
};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, McpTransport};
use crate::search::SearchQuery;
use crate::server::{build_app_state, AppState};

pub use types::*;

fn error_result(message: impl std::fmt::Display) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(message.to_string())]))
}

fn json_result<T: serde::Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string(value).unwrap_or_else(|_| "null".to_string());
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

/// Knowledge-base MCP service. Holds the same `AppState` the HTTP server uses, so it
/// never opens its own copy of the state store, vector store, or fts index.
pub struct KbaseMcpService {
    tool_router: ToolRouter<KbaseMcpService>,
    state: Arc<AppState>,
}

impl std::fmt::Debug for KbaseMcpService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KbaseMcpService")
            .field("root", &self.state.root)
            .finish()
    }
}

#[tool_router]
impl KbaseMcpService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            state,
        }
    }

    #[tool(
        description = "Hybrid semantic + keyword search over every indexed folder visible to the caller. Returns ranked chunks with their source file and folder."
    )]
    async fn search(
        &self,
        Parameters(request): Parameters<SearchRequest>,
    ) -> Result<CallToolResult, McpError> {
        let mut query = SearchQuery::new(request.query, request.limit.unwrap_or(25));
        query.include_folders = request.include_folders;
        query.exclude_folders = request.exclude_folders;
        query.user_identity = Some(request.user_identity);

        let hits = match self.state.search.search(&query).await {
            Ok(h) => h,
            Err(e) => return error_result(format!("search failed: {e}")),
        };

        let items: Vec<SearchResultItem> = hits
            .into_iter()
            .map(|h| SearchResultItem {
                file_path: h.file_path,
                file_name: h.file_name,
                folder_path: h.folder_path,
                chunk_text: h.chunk_text,
                chunk_ordinal: h.chunk_ordinal,
                score: h.score,
            })
            .collect();

        json_result(&items)
    }

    #[tool(description = "List every indexed folder with its index status and file/chunk counts.")]
    async fn list_indexed_folders(&self) -> Result<CallToolResult, McpError> {
        let folders = match self.state.search.list_indexed_folders() {
            Ok(f) => f,
            Err(e) => return error_result(format!("failed to list folders: {e}")),
        };
        let items: Vec<IndexedFolderItem> = folders
            .into_iter()
            .map(|f| IndexedFolderItem {
                path: f.path,
                index_status: f.index_status.as_str().to_string(),
                file_count: f.file_count,
                chunk_count: f.chunk_count,
            })
            .collect();
        json_result(&items)
    }

    #[tool(description = "Get the full indexed text of a file, chunks rejoined in order.")]
    async fn get_file(
        &self,
        Parameters(request): Parameters<FilePathRequest>,
    ) -> Result<CallToolResult, McpError> {
        match self.state.search.get_file(&request.file_path) {
            Ok(Some(text)) => Ok(CallToolResult::success(vec![Content::text(text)])),
            Ok(None) => error_result(format!("no indexed content for '{}'", request.file_path)),
            Err(e) => error_result(format!("failed to read file: {e}")),
        }
    }

    #[tool(
        description = "Get the merged text of a file's chunks between two ordinals (inclusive), for reading a slice of a large file without pulling the whole thing."
    )]
    async fn get_chunk_range(
        &self,
        Parameters(request): Parameters<ChunkRangeRequest>,
    ) -> Result<CallToolResult, McpError> {
        match self
            .state
            .search
            .get_chunk_range(&request.file_path, request.start, request.end)
        {
            Ok(Some(text)) => Ok(CallToolResult::success(vec![Content::text(text)])),
            Ok(None) => error_result(format!(
                "no chunks in range [{}, {}] for '{}'",
                request.start, request.end, request.file_path
            )),
            Err(e) => error_result(format!("failed to read chunk range: {e}")),
        }
    }

    #[tool(
        description = "Get a short-lived download URI for a file's raw bytes. The URI expires after a few minutes."
    )]
    async fn get_file_uri(
        &self,
        Parameters(request): Parameters<FilePathRequest>,
    ) -> Result<CallToolResult, McpError> {
        let physical = self.state.root.join(&request.file_path);
        if !physical.is_file() {
            return error_result(format!("no such file: {}", request.file_path));
        }
        let uri = self.state.issue_download_uri(&request.file_path);
        json_result(&serde_json::json!({ "uri": uri }))
    }

    #[tool(
        description = "Set whether a folder is included in search results for a given user identity. Does not affect indexing."
    )]
    async fn set_folder_active(
        &self,
        Parameters(request): Parameters<SetFolderActiveRequest>,
    ) -> Result<CallToolResult, McpError> {
        match self
            .state
            .state
            .set_user_visibility(&request.user_identity, &request.folder_path, request.active)
        {
            Ok(()) => json_result(&serde_json::json!({ "ok": true })),
            Err(e) => error_result(format!("failed to set folder visibility: {e}")),
        }
    }

    #[tool(description = "Get the current user's folder-active map: which folders are included in their search results.")]
    async fn get_folder_active_states(
        &self,
        Parameters(request): Parameters<FolderActiveStatesRequest>,
    ) -> Result<CallToolResult, McpError> {
        match self.state.state.list_user_visibility(&request.user_identity) {
            Ok(map) => json_result(&map),
            Err(e) => error_result(format!("failed to read folder visibility: {e}")),
        }
    }
}

#[tool_handler]
impl ServerHandler for KbaseMcpService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: rmcp::model::Implementation {
                name: "kbase".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(format!(
                "kbase exposes the same indexed knowledge base the web UI searches. \
                 Start with list_indexed_folders() to see what's available, then \
                 search(query) for hybrid semantic + keyword results. Use get_file or \
                 get_chunk_range to pull full content for a hit, and get_file_uri for a \
                 downloadable link. set_folder_active/get_folder_active_states control \
                 which folders a given user_identity sees in search results.\n\nManaged root: {}",
                self.state.root.display()
            )),
            ..Default::default()
        }
    }
}

/// Run the MCP server until `cancel` fires. `stdio` is the only transport actually
/// wired up; `sse` is accepted in config but falls back to stdio with a warning,
/// since the HTTP crate stack this binary carries doesn't include an SSE transport.
pub async fn run_mcp_server(config: Config, cancel: CancellationToken) -> anyhow::Result<()> {
    use rmcp::{transport::stdio, ServiceExt};

    if matches!(config.mcp_transport, McpTransport::Sse) {
        tracing::warn!("MCP_TRANSPORT=sse requested but unsupported by this build, using stdio");
    }

    let state = build_app_state(&config, cancel.clone()).await?;
    tracing::info!(root = %state.root.display(), "starting mcp server");

    let service = KbaseMcpService::new(state);
    let server = service.serve(stdio()).await?;

    tokio::select! {
        result = server.waiting() => {
            result?;
        }
        _ = cancel.cancelled() => {
            tracing::info!("mcp shutdown signal received");
        }
    }

    Ok(())
}
