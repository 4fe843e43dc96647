//! Relational state store: durable metadata for folders, files, chunks, sync sources,
//! and per-user folder visibility (§3, §4.1).
//!
//! Backed by a single embedded SQLite database (`rusqlite`, bundled) in WAL mode, guarded
//! by the same advisory single-writer file lock the vector store already uses — this is
//! the concrete answer to the spec's state-store redesign away from a flat JSON blob.
//! One long-lived connection behind a mutex serializes writes from this process; the
//! Non-goal around concurrent writers *across* processes is handled by the writer lock,
//! not by SQLite itself.

mod sync_source;
mod types;

pub use sync_source::SyncSourceConfig;
pub use types::{
    ChunkRow, ExtensionStats, FileRow, Folder, IndexStatus, NewChunk, SyncStatus,
    UserFolderVisibility,
};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{KbError, Result};

pub struct StateStore {
    conn: Mutex<Connection>,
}

impl StateStore {
    /// Open (creating if absent) the state store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory store — used by tests and by short-lived CLI commands that
    /// don't need persistence across invocations.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS folders (
                path                 TEXT PRIMARY KEY,
                indexing_enabled     INTEGER NOT NULL DEFAULT 0,
                sync_status          TEXT NOT NULL DEFAULT 'idle',
                last_synced_at       INTEGER,
                last_sync_error      TEXT,
                index_status         TEXT NOT NULL DEFAULT 'none',
                metadata_text        TEXT,
                metadata_updated_by  TEXT
            );

            CREATE TABLE IF NOT EXISTS sync_sources (
                folder_path  TEXT PRIMARY KEY REFERENCES folders(path) ON DELETE CASCADE,
                provider     TEXT NOT NULL,
                config_json  TEXT NOT NULL,
                cursor_json  TEXT
            );

            CREATE TABLE IF NOT EXISTS user_folder_visibility (
                user_identity  TEXT NOT NULL,
                folder_path    TEXT NOT NULL,
                active         INTEGER NOT NULL DEFAULT 1,
                PRIMARY KEY (user_identity, folder_path)
            );

            CREATE TABLE IF NOT EXISTS files (
                path          TEXT PRIMARY KEY,
                folder_path   TEXT NOT NULL,
                size          INTEGER NOT NULL,
                mtime         INTEGER NOT NULL,
                content_hash  TEXT NOT NULL,
                mime          TEXT NOT NULL,
                index_status  TEXT NOT NULL DEFAULT 'none',
                indexed_at    INTEGER,
                indexed_hash  TEXT,
                chunk_count   INTEGER NOT NULL DEFAULT 0,
                error_message TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_files_folder ON files(folder_path);

            CREATE TABLE IF NOT EXISTS chunks (
                file_path          TEXT NOT NULL,
                ordinal            INTEGER NOT NULL,
                text               TEXT NOT NULL,
                token_count        INTEGER NOT NULL,
                char_start         INTEGER NOT NULL,
                char_end           INTEGER NOT NULL,
                embedding_version  INTEGER NOT NULL,
                dense_vector_id    INTEGER NOT NULL,
                sparse_vector_id   INTEGER,
                PRIMARY KEY (file_path, ordinal)
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_dense_vector ON chunks(dense_vector_id);
            "#,
        )?;
        Ok(())
    }

    // ---- folders --------------------------------------------------------------------

    pub fn get_folder(&self, path: &str) -> Result<Option<Folder>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT path, indexing_enabled, sync_status, last_synced_at, last_sync_error,
                    index_status, metadata_text, metadata_updated_by
             FROM folders WHERE path = ?1",
            params![path],
            Folder::from_row,
        )
        .optional()
        .map_err(KbError::from)
    }

    pub fn list_folders(&self) -> Result<Vec<Folder>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT path, indexing_enabled, sync_status, last_synced_at, last_sync_error,
                    index_status, metadata_text, metadata_updated_by
             FROM folders ORDER BY path",
        )?;
        let rows = stmt
            .query_map([], Folder::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Create a folder row if absent (idempotent); used by upload/sync/observer paths
    /// that need a folder to exist before attaching files to it.
    pub fn ensure_folder(&self, path: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO folders (path) VALUES (?1)",
            params![path],
        )?;
        Ok(())
    }

    /// Remove a folder and every descendant folder row, plus their per-user
    /// visibility rows (§6 "recursive removal"). `sync_sources` cascades via its FK.
    /// File/chunk/vector rows are expected to already be gone via
    /// `Indexer::purge_folder`, run before this by the caller.
    pub fn delete_folder_recursive(&self, path: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let prefix = format!("{path}/%");
        conn.execute(
            "DELETE FROM user_folder_visibility WHERE folder_path = ?1 OR folder_path LIKE ?2",
            params![path, prefix],
        )?;
        conn.execute(
            "DELETE FROM folders WHERE path = ?1 OR path LIKE ?2",
            params![path, prefix],
        )?;
        Ok(())
    }

    pub fn set_folder_indexing_enabled(&self, path: &str, enabled: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE folders SET indexing_enabled = ?2 WHERE path = ?1",
            params![path, enabled],
        )?;
        Ok(())
    }

    pub fn set_folder_index_status(&self, path: &str, status: IndexStatus) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE folders SET index_status = ?2 WHERE path = ?1",
            params![path, status.as_str()],
        )?;
        Ok(())
    }

    pub fn set_folder_metadata(
        &self,
        path: &str,
        metadata_text: &str,
        updated_by: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE folders SET metadata_text = ?2, metadata_updated_by = ?3 WHERE path = ?1",
            params![path, metadata_text, updated_by],
        )?;
        Ok(())
    }

    pub fn set_sync_status(
        &self,
        path: &str,
        status: SyncStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = if status == SyncStatus::Synced {
            Some(Utc::now().timestamp())
        } else {
            None
        };
        conn.execute(
            "UPDATE folders SET sync_status = ?2, last_sync_error = ?3,
                last_synced_at = COALESCE(?4, last_synced_at) WHERE path = ?1",
            params![path, status.as_str(), error, now],
        )?;
        Ok(())
    }

    /// Get a folder's bound sync source, if any.
    pub fn get_sync_source(&self, folder_path: &str) -> Result<Option<SyncSourceConfig>> {
        let conn = self.conn.lock().unwrap();
        let json: Option<String> = conn
            .query_row(
                "SELECT config_json FROM sync_sources WHERE folder_path = ?1",
                params![folder_path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match json {
            Some(j) => Some(serde_json::from_str(&j).map_err(|e| KbError::InvalidPath {
                path: folder_path.to_string(),
                message: format!("corrupt sync source config: {e}"),
            })?),
            None => None,
        })
    }

    /// Bind a sync source to a folder. Per invariant 5, replacement of an existing
    /// source (not field-by-field edit) is only refused if the folder already has
    /// synced content and the caller isn't explicitly replacing it.
    pub fn set_sync_source(
        &self,
        folder_path: &str,
        source: &SyncSourceConfig,
        replace: bool,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let has_existing: bool = conn
            .query_row(
                "SELECT 1 FROM sync_sources WHERE folder_path = ?1",
                params![folder_path],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        if has_existing && !replace {
            return Err(KbError::conflict(format!(
                "folder {folder_path} already has a sync source; pass replace=true to rebind"
            )));
        }

        let has_content: i64 = conn.query_row(
            "SELECT COUNT(*) FROM files WHERE folder_path = ?1",
            params![folder_path],
            |row| row.get(0),
        )?;
        if has_existing && has_content > 0 && !replace {
            return Err(KbError::conflict(
                "cannot edit a sync source field-by-field once the folder holds synced content",
            ));
        }

        let json = serde_json::to_string(source)
            .map_err(|e| KbError::invalid_path(folder_path, e.to_string()))?;
        conn.execute(
            "INSERT INTO sync_sources (folder_path, provider, config_json)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(folder_path) DO UPDATE SET provider = excluded.provider,
                config_json = excluded.config_json, cursor_json = NULL",
            params![folder_path, source.provider_name(), json],
        )?;
        Ok(())
    }

    /// Opaque per-folder sync cursor (remote etags/commit shas/paging tokens), read
    /// back by a provider's `plan` step to compute a minimal diff (§4.7 phase 2).
    pub fn get_sync_cursor(&self, folder_path: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT cursor_json FROM sync_sources WHERE folder_path = ?1",
                params![folder_path],
                |row| row.get(0),
            )
            .optional()?
            .flatten())
    }

    pub fn set_sync_cursor(&self, folder_path: &str, cursor: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE sync_sources SET cursor_json = ?2 WHERE folder_path = ?1",
            params![folder_path, cursor],
        )?;
        Ok(())
    }

    /// Unbind a folder's sync source entirely, leaving its already-synced content in
    /// place (a plain local folder from this point on).
    pub fn delete_sync_source(&self, folder_path: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM sync_sources WHERE folder_path = ?1",
            params![folder_path],
        )?;
        Ok(())
    }

    // ---- user visibility --------------------------------------------------------------

    pub fn set_user_visibility(&self, user: &str, folder_path: &str, active: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO user_folder_visibility (user_identity, folder_path, active)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_identity, folder_path) DO UPDATE SET active = excluded.active",
            params![user, folder_path, active],
        )?;
        Ok(())
    }

    pub fn get_user_visibility(&self, user: &str, folder_path: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let active: Option<bool> = conn
            .query_row(
                "SELECT active FROM user_folder_visibility
                 WHERE user_identity = ?1 AND folder_path = ?2",
                params![user, folder_path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(active.unwrap_or(true)) // defaults true per §3
    }

    pub fn list_user_visibility(&self, user: &str) -> Result<HashMap<String, bool>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT folder_path, active FROM user_folder_visibility WHERE user_identity = ?1",
        )?;
        let rows = stmt
            .query_map(params![user], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows.into_iter().collect())
    }

    /// Folders visible to `user` per invariant 4: indexing enabled, indexed, visible,
    /// and no disabled ancestor.
    pub fn visible_folders(&self, user: &str) -> Result<Vec<String>> {
        let all = self.list_folders()?;
        let by_path: HashMap<&str, &Folder> =
            all.iter().map(|f| (f.path.as_str(), f)).collect();

        let mut visible = Vec::new();
        'outer: for folder in &all {
            if !folder.indexing_enabled || folder.index_status != IndexStatus::Indexed {
                continue;
            }
            if !self.get_user_visibility(user, &folder.path)? {
                continue;
            }
            for ancestor in ancestors(&folder.path) {
                if let Some(a) = by_path.get(ancestor.as_str()) {
                    if !a.indexing_enabled {
                        continue 'outer;
                    }
                }
            }
            visible.push(folder.path.clone());
        }
        Ok(visible)
    }

    // ---- files --------------------------------------------------------------------

    pub fn get_file(&self, path: &str) -> Result<Option<FileRow>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT path, folder_path, size, mtime, content_hash, mime, index_status,
                    indexed_at, indexed_hash, chunk_count, error_message
             FROM files WHERE path = ?1",
            params![path],
            FileRow::from_row,
        )
        .optional()
        .map_err(KbError::from)
    }

    pub fn list_files_under(&self, folder_path: &str) -> Result<Vec<FileRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT path, folder_path, size, mtime, content_hash, mime, index_status,
                    indexed_at, indexed_hash, chunk_count, error_message
             FROM files WHERE folder_path = ?1 ORDER BY path",
        )?;
        let rows = stmt
            .query_map(params![folder_path], FileRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Upsert a file row by its current on-disk stats, leaving `index_status`/
    /// `indexed_hash`/`chunk_count` untouched (those only change via
    /// `swap_chunks_atomically` / `mark_file_error`).
    pub fn upsert_file(
        &self,
        path: &str,
        folder_path: &str,
        size: u64,
        mtime: i64,
        content_hash: &str,
        mime: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO files (path, folder_path, size, mtime, content_hash, mime, index_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending')
             ON CONFLICT(path) DO UPDATE SET
                size = excluded.size, mtime = excluded.mtime,
                content_hash = excluded.content_hash, mime = excluded.mime",
            params![path, folder_path, size as i64, mtime, content_hash, mime],
        )?;
        Ok(())
    }

    pub fn mark_file_index_status(&self, path: &str, status: IndexStatus) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE files SET index_status = ?2 WHERE path = ?1",
            params![path, status.as_str()],
        )?;
        Ok(())
    }

    pub fn mark_file_error(&self, path: &str, message: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE files SET index_status = 'error', error_message = ?2 WHERE path = ?1",
            params![path, message],
        )?;
        Ok(())
    }

    pub fn delete_file(&self, path: &str) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM chunks WHERE file_path = ?1", params![path])?;
        tx.execute("DELETE FROM files WHERE path = ?1", params![path])?;
        tx.commit()?;
        Ok(())
    }

    // ---- chunks ---------------------------------------------------------------------

    pub fn list_chunks(&self, file_path: &str) -> Result<Vec<ChunkRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT file_path, ordinal, text, token_count, char_start, char_end,
                    embedding_version, dense_vector_id, sparse_vector_id
             FROM chunks WHERE file_path = ?1 ORDER BY ordinal",
        )?;
        let rows = stmt
            .query_map(params![file_path], ChunkRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Resolve a dense or sparse vector id (the two share an id space, see
    /// `chunk_vector_id`) back to its chunk and the folder the owning file lives
    /// under, for search result hydration. `None` if the id has no matching chunk,
    /// which happens when a chunk was deleted after a search reader's snapshot.
    pub fn get_chunk_by_vector_id(&self, id: u32) -> Result<Option<(ChunkRow, String)>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT c.file_path, c.ordinal, c.text, c.token_count, c.char_start, c.char_end,
                    c.embedding_version, c.dense_vector_id, c.sparse_vector_id, f.folder_path
             FROM chunks c JOIN files f ON f.path = c.file_path
             WHERE c.dense_vector_id = ?1",
            params![id as i64],
            |row| Ok((ChunkRow::from_row(row)?, row.get::<_, String>(9)?)),
        )
        .optional()
        .map_err(KbError::from)
    }

    /// Delete the file's existing chunks and insert a fresh set, committing the
    /// `index_status → indexed`/`indexed_hash`/`chunk_count` transition in the same
    /// transaction — the atomic guarantee in §4.1.
    pub fn swap_chunks_atomically(
        &self,
        file_path: &str,
        indexed_hash: &str,
        chunks: &[NewChunk],
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM chunks WHERE file_path = ?1",
            params![file_path],
        )?;
        for c in chunks {
            tx.execute(
                "INSERT INTO chunks (file_path, ordinal, text, token_count, char_start,
                    char_end, embedding_version, dense_vector_id, sparse_vector_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    file_path,
                    c.ordinal as i64,
                    c.text,
                    c.token_count as i64,
                    c.char_start as i64,
                    c.char_end as i64,
                    c.embedding_version as i64,
                    c.dense_vector_id as i64,
                    c.sparse_vector_id.map(|v| v as i64),
                ],
            )?;
        }
        tx.execute(
            "UPDATE files SET index_status = 'indexed', indexed_hash = ?2,
                chunk_count = ?3, indexed_at = ?4, error_message = NULL
             WHERE path = ?1",
            params![file_path, indexed_hash, chunks.len() as i64, Utc::now().timestamp()],
        )?;
        tx.commit()?;
        Ok(())
    }

    // ---- stats ------------------------------------------------------------------------

    pub fn stats_per_extension(&self, folder_path: &str) -> Result<Vec<ExtensionStats>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT
                COALESCE(NULLIF(SUBSTR(path, -(LENGTH(path) - LENGTH(RTRIM(path, REPLACE(path, '.', ''))) - 1)), ''), '') AS ext,
                COUNT(*), SUM(chunk_count)
             FROM files WHERE folder_path LIKE ?1 || '%'
             GROUP BY ext ORDER BY ext",
        )?;
        let rows = stmt
            .query_map(params![folder_path], |row| {
                Ok(ExtensionStats {
                    extension: row.get(0)?,
                    file_count: row.get(1)?,
                    chunk_count: row.get::<_, Option<i64>>(2)?.unwrap_or(0) as u64,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// Yield every logical ancestor of `path` (shallowest first), e.g. `"a/b/c"` yields
/// `["a", "a/b"]`.
fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let parts: Vec<&str> = path.split('/').collect();
    for i in 1..parts.len() {
        out.push(parts[..i].join("/"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> StateStore {
        StateStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_folder_lifecycle() {
        let s = store();
        s.ensure_folder("docs").unwrap();
        s.set_folder_indexing_enabled("docs", true).unwrap();
        s.set_folder_index_status("docs", IndexStatus::Indexed)
            .unwrap();

        let f = s.get_folder("docs").unwrap().unwrap();
        assert!(f.indexing_enabled);
        assert_eq!(f.index_status, IndexStatus::Indexed);
    }

    #[test]
    fn test_visibility_respects_ancestor_disabled() {
        let s = store();
        s.ensure_folder("a").unwrap();
        s.ensure_folder("a/b").unwrap();
        s.set_folder_indexing_enabled("a", false).unwrap();
        s.set_folder_indexing_enabled("a/b", true).unwrap();
        s.set_folder_index_status("a/b", IndexStatus::Indexed)
            .unwrap();

        let visible = s.visible_folders("alice").unwrap();
        assert!(!visible.contains(&"a/b".to_string()));
    }

    #[test]
    fn test_visibility_default_true() {
        let s = store();
        s.ensure_folder("docs").unwrap();
        s.set_folder_indexing_enabled("docs", true).unwrap();
        s.set_folder_index_status("docs", IndexStatus::Indexed)
            .unwrap();

        let visible = s.visible_folders("alice").unwrap();
        assert_eq!(visible, vec!["docs".to_string()]);

        s.set_user_visibility("alice", "docs", false).unwrap();
        let visible = s.visible_folders("alice").unwrap();
        assert!(visible.is_empty());
    }

    #[test]
    fn test_swap_chunks_atomically() {
        let s = store();
        s.ensure_folder("docs").unwrap();
        s.upsert_file("docs/hello.txt", "docs", 4, 0, "hash1", "text/plain")
            .unwrap();

        let chunks = vec![NewChunk {
            ordinal: 0,
            text: "the quick brown fox".to_string(),
            token_count: 4,
            char_start: 0,
            char_end: 20,
            embedding_version: 1,
            dense_vector_id: 42,
            sparse_vector_id: None,
        }];
        s.swap_chunks_atomically("docs/hello.txt", "hash1", &chunks)
            .unwrap();

        let file = s.get_file("docs/hello.txt").unwrap().unwrap();
        assert_eq!(file.index_status, IndexStatus::Indexed);
        assert_eq!(file.chunk_count, 1);
        assert_eq!(file.indexed_hash.as_deref(), Some("hash1"));

        let stored = s.list_chunks("docs/hello.txt").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].text, "the quick brown fox");
    }

    #[test]
    fn test_sync_source_replace_requires_flag() {
        let s = store();
        s.ensure_folder("repo").unwrap();
        let source = SyncSourceConfig::Github(sync_source::GitHubSyncConfig {
            owner: "acme".to_string(),
            repo: "widgets".to_string(),
            branch: "main".to_string(),
            path_prefix: None,
            token_env: "GITHUB_TOKEN".to_string(),
        });
        s.set_sync_source("repo", &source, false).unwrap();
        let err = s.set_sync_source("repo", &source, false).unwrap_err();
        assert!(matches!(err, KbError::Conflict { .. }));
        s.set_sync_source("repo", &source, true).unwrap();
    }
}
