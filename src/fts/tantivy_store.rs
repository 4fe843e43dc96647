//! Tantivy-based BM25 store.
//!
//! # Architecture Note
//! Always use `FtsStore::new()` which opens in R/W mode. This ensures only one
//! connection type exists, avoiding Windows file locking issues between readers
//! and writers. The writer is lazy-initialized on first write operation.

use std::path::Path;

use tantivy::{
    collector::TopDocs,
    directory::MmapDirectory,
    merge_policy::NoMergePolicy,
    query::QueryParser,
    schema::{Field, NumericOptions, Schema, Value, STORED, STRING, TEXT},
    Index, IndexReader, IndexSettings, IndexWriter, TantivyDocument, Term,
};

use crate::error::{KbError, Result};

#[derive(Debug, Clone)]
pub struct SparseHit {
    pub chunk_id: u32,
    pub score: f32,
}

/// Single connection type that supports both read and write operations. Writer is
/// lazy-initialized on first write to avoid unnecessary locks.
pub struct FtsStore {
    index: Index,
    reader: IndexReader,
    writer: Option<IndexWriter>,
    #[allow(dead_code)]
    schema: Schema,
    chunk_id_field: Field,
    content_field: Field,
    path_field: Field,
}

impl FtsStore {
    /// Create or open an FTS index at the given path. Writer is lazy-initialized on
    /// first write operation.
    pub fn new(db_path: &Path) -> Result<Self> {
        let fts_path = db_path.join("fts");
        std::fs::create_dir_all(&fts_path)?;

        let mut schema_builder = Schema::builder();
        let chunk_id_field = schema_builder.add_u64_field(
            "chunk_id",
            NumericOptions::default().set_indexed().set_stored(),
        );
        let content_field = schema_builder.add_text_field("content", TEXT);
        let path_field = schema_builder.add_text_field("path", STRING | STORED);
        let schema = schema_builder.build();

        let index = Self::open_or_create_index_with_retry(&fts_path, &schema)?;
        let reader = index
            .reader()
            .map_err(|e| KbError::store_unavailable(e.to_string()))?;

        Ok(Self {
            index,
            reader,
            writer: None,
            schema,
            chunk_id_field,
            content_field,
            path_field,
        })
    }

    pub fn new_with_writer(db_path: &Path) -> Result<Self> {
        let mut store = Self::new(db_path)?;
        store.ensure_writer()?;
        Ok(store)
    }

    fn open_or_create_index_with_retry(fts_path: &Path, schema: &Schema) -> Result<Index> {
        let max_retries = 3;
        let mut last_error: Option<String> = None;

        for attempt in 0..max_retries {
            if attempt > 0 {
                std::thread::sleep(std::time::Duration::from_millis(100 * (1 << attempt)));
            }

            let result: std::result::Result<Index, String> = if fts_path.join("meta.json").exists()
            {
                Index::open_in_dir(fts_path).map_err(|e| e.to_string())
            } else {
                MmapDirectory::open(fts_path)
                    .map_err(|e| e.to_string())
                    .and_then(|dir| {
                        Index::create(dir, schema.clone(), IndexSettings::default())
                            .map_err(|e| e.to_string())
                    })
            };

            match result {
                Ok(index) => return Ok(index),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < max_retries - 1 {
                        Self::try_clear_lock_files(fts_path);
                    }
                }
            }
        }

        Err(KbError::store_unavailable(format!(
            "failed to open FTS index after {} retries: {}",
            max_retries,
            last_error.unwrap_or_default()
        )))
    }

    fn create_writer_with_retry(index: &Index) -> Result<IndexWriter> {
        let max_retries = 3;
        let mut last_error: Option<String> = None;

        for attempt in 0..max_retries {
            if attempt > 0 {
                std::thread::sleep(std::time::Duration::from_millis(100 * (1 << attempt)));
            }

            // NoMergePolicy: background merge threads have been observed to panic on
            // I/O errors (antivirus interference, locked mmap segments on Windows) and
            // take the whole IndexWriter down with them. Explicit, merge-free segment
            // management trades more segments for a writer that can't be killed.
            match index.writer(50_000_000) {
                Ok(writer) => {
                    writer.set_merge_policy(Box::new(NoMergePolicy));
                    return Ok(writer);
                }
                Err(e) => last_error = Some(e.to_string()),
            }
        }

        Err(KbError::store_unavailable(format!(
            "failed to create FTS writer after {} retries: {}",
            max_retries,
            last_error.unwrap_or_default()
        )))
    }

    fn try_clear_lock_files(fts_path: &Path) {
        for lock_file in [".tantivy-writer.lock", ".tantivy-meta.lock"] {
            let lock_path = fts_path.join(lock_file);
            if lock_path.exists() {
                let _ = std::fs::remove_file(&lock_path);
            }
        }
    }

    fn ensure_writer(&mut self) -> Result<()> {
        if self.writer.is_none() {
            self.writer = Some(Self::create_writer_with_retry(&self.index)?);
        }
        Ok(())
    }

    fn build_doc(&self, chunk_id: u32, content: &str, path: &str) -> TantivyDocument {
        let mut doc = TantivyDocument::new();
        doc.add_u64(self.chunk_id_field, chunk_id as u64);
        doc.add_text(self.content_field, content);
        doc.add_text(self.path_field, path);
        doc
    }

    /// Add a chunk's text to the sparse index, keyed by the same id its dense vector
    /// uses. Recovers once if the writer was killed by a background panic.
    pub fn add_chunk(&mut self, chunk_id: u32, content: &str, path: &str) -> Result<()> {
        self.ensure_writer()?;
        let doc = self.build_doc(chunk_id, content, path);
        let writer = self.writer.as_mut().unwrap();

        match writer.add_document(doc) {
            Ok(_) => Ok(()),
            Err(e) if is_killed_writer(&e.to_string()) => {
                tracing::debug!("FTS writer was killed, recreating and retrying add_chunk");
                self.writer = None;
                self.ensure_writer()?;
                let retry_doc = self.build_doc(chunk_id, content, path);
                self.writer
                    .as_mut()
                    .unwrap()
                    .add_document(retry_doc)
                    .map_err(|e| {
                        KbError::store_unavailable(format!(
                            "FTS add_document failed after writer recovery: {e}"
                        ))
                    })?;
                Ok(())
            }
            Err(e) => Err(KbError::store_unavailable(format!(
                "FTS add_document failed: {e}"
            ))),
        }
    }

    pub fn delete_chunk(&mut self, chunk_id: u32) -> Result<()> {
        self.ensure_writer()?;
        let term = Term::from_field_u64(self.chunk_id_field, chunk_id as u64);
        self.writer.as_mut().unwrap().delete_term(term);
        Ok(())
    }

    pub fn delete_by_path(&mut self, path: &str) -> Result<()> {
        self.ensure_writer()?;
        let term = Term::from_field_text(self.path_field, path);
        self.writer.as_mut().unwrap().delete_term(term);
        Ok(())
    }

    /// Commit pending changes. If the writer was killed by a background merge panic
    /// it's recreated; uncommitted data since the last successful commit is lost in
    /// that case but indexing continues rather than aborting.
    pub fn commit(&mut self) -> Result<()> {
        if self.writer.is_none() {
            return Ok(());
        }

        let max_retries = 5;
        let mut last_error: Option<String> = None;

        for attempt in 0..max_retries {
            if attempt > 0 {
                std::thread::sleep(std::time::Duration::from_millis(100 * (1 << attempt)));
            }

            let writer = self.writer.as_mut().unwrap();
            match writer.commit() {
                Ok(_) => {
                    if let Err(e) = self.reader.reload() {
                        tracing::debug!("FTS reader reload warning: {e}");
                    }
                    return Ok(());
                }
                Err(e) => {
                    let error_str = e.to_string();
                    last_error = Some(error_str.clone());

                    if is_killed_writer(&error_str) {
                        tracing::debug!(
                            "FTS writer killed during commit (attempt {}/{max_retries})",
                            attempt + 1
                        );
                        self.writer = None;
                        self.ensure_writer()?;
                        if let Some(ref mut w) = self.writer {
                            w.commit().map_err(|e| {
                                KbError::store_unavailable(format!(
                                    "FTS commit after recovery failed: {e}"
                                ))
                            })?;
                        }
                        let _ = self.reader.reload();
                        return Ok(());
                    }

                    if error_str.contains("Access is denied")
                        || error_str.contains("PermissionDenied")
                        || error_str.contains("IoError")
                    {
                        continue;
                    }
                    return Err(KbError::store_unavailable(format!(
                        "FTS commit failed: {error_str}"
                    )));
                }
            }
        }

        Err(KbError::store_unavailable(format!(
            "FTS commit failed after {max_retries} retries: {}",
            last_error.unwrap_or_default()
        )))
    }

    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SparseHit>> {
        let searcher = self.reader.searcher();
        let query_parser = QueryParser::for_index(&self.index, vec![self.content_field]);

        let parsed_query = match query_parser.parse_query(query) {
            Ok(q) => q,
            Err(_) => {
                let escaped = query.replace(
                    [
                        ':', '(', ')', '[', ']', '{', '}', '^', '"', '~', '*', '?', '\\', '/',
                    ],
                    " ",
                );
                query_parser
                    .parse_query(&escaped)
                    .map_err(|e| KbError::invalid_path(query, e.to_string()))?
            }
        };

        let top_docs = searcher
            .search(&parsed_query, &TopDocs::with_limit(limit))
            .map_err(|e| KbError::store_unavailable(e.to_string()))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| KbError::store_unavailable(e.to_string()))?;
            if let Some(id) = doc
                .get_first(self.chunk_id_field)
                .and_then(|v| v.as_u64())
            {
                results.push(SparseHit {
                    chunk_id: id as u32,
                    score,
                });
            }
        }
        Ok(results)
    }

    pub fn stats(&self) -> Result<FtsStats> {
        let searcher = self.reader.searcher();
        Ok(FtsStats {
            num_documents: searcher.num_docs() as usize,
        })
    }

    pub fn clear(&mut self) -> Result<()> {
        self.ensure_writer()?;
        let writer = self.writer.as_mut().unwrap();
        writer
            .delete_all_documents()
            .map_err(|e| KbError::store_unavailable(e.to_string()))?;
        writer
            .commit()
            .map_err(|e| KbError::store_unavailable(e.to_string()))?;
        self.reader
            .reload()
            .map_err(|e| KbError::store_unavailable(e.to_string()))?;
        Ok(())
    }
}

fn is_killed_writer(message: &str) -> bool {
    message.contains("writer was killed") || message.contains("index writer was killed")
}

#[derive(Debug, Clone)]
pub struct FtsStats {
    pub num_documents: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fts_basic() {
        let dir = tempdir().unwrap();
        let mut store = FtsStore::new(dir.path()).unwrap();

        store
            .add_chunk(1, "the quarterly revenue report for Q3", "q3.txt")
            .unwrap();
        store
            .add_chunk(2, "onboarding checklist for new hires", "onboarding.txt")
            .unwrap();
        store.commit().unwrap();

        let results = store.search("revenue", 10).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].chunk_id, 1);
    }

    #[test]
    fn test_fts_delete() {
        let dir = tempdir().unwrap();
        let mut store = FtsStore::new(dir.path()).unwrap();

        store.add_chunk(1, "test content one", "file1.txt").unwrap();
        store.add_chunk(2, "test content two", "file2.txt").unwrap();
        store.commit().unwrap();

        assert_eq!(store.search("test content", 10).unwrap().len(), 2);

        store.delete_chunk(1).unwrap();
        store.commit().unwrap();

        let results = store.search("test content", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, 2);
    }
}
