//! Dense vector store: arroy (ANN via random-projection trees, Cosine distance) over
//! heed (LMDB). Holds only `id -> embedding`; chunk text and file association live in
//! the relational state store, keyed back to this store via `chunks.dense_vector_id`.
//!
//! Ids are deterministic, not sequential: `chunk_vector_id(file_path, ordinal,
//! embedding_version)` hashes the chunk's identity so re-embedding an unchanged chunk
//! reuses its existing vector slot (idempotent upsert, §4.2 invariant 2) instead of
//! accumulating orphaned rows on every reindex.

use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;

use arroy::distances::Cosine;
use arroy::{Database as ArroyDatabase, ItemId, Reader, Writer};
use heed::{Env, EnvFlags, EnvOpenOptions};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sha2::{Digest, Sha256};

use crate::error::{KbError, Result};

/// Derive a stable dense-vector id from a chunk's logical identity.
pub fn chunk_vector_id(file_path: &str, ordinal: u32, embedding_version: u32) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    hasher.update(b"\0");
    hasher.update(ordinal.to_be_bytes());
    hasher.update(b"\0");
    hasher.update(embedding_version.to_be_bytes());
    let digest = hasher.finalize();
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

pub struct DenseHit {
    pub id: ItemId,
    pub distance: f32,
}

pub struct VectorStore {
    env: Env,
    vectors: ArroyDatabase<Cosine>,
    dimensions: usize,
    indexed: bool,
}

impl VectorStore {
    pub fn new(db_path: &Path, dimensions: usize, map_size_mb: usize) -> Result<Self> {
        fs::create_dir_all(db_path)?;
        cleanup_stale_del_files(db_path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size_mb * 1024 * 1024)
                .max_dbs(4)
                .open(db_path)
                .map_err(|e| KbError::store_unavailable(e.to_string()))?
        };

        let mut wtxn = env
            .write_txn()
            .map_err(|e| KbError::store_unavailable(e.to_string()))?;
        let vectors: ArroyDatabase<Cosine> = env
            .create_database(&mut wtxn, Some("vectors"))
            .map_err(|e| KbError::store_unavailable(e.to_string()))?;
        wtxn.commit()
            .map_err(|e| KbError::store_unavailable(e.to_string()))?;

        let indexed = {
            let rtxn = env
                .read_txn()
                .map_err(|e| KbError::store_unavailable(e.to_string()))?;
            Reader::open(&rtxn, 0, vectors).is_ok()
        };

        Ok(Self {
            env,
            vectors,
            dimensions,
            indexed,
        })
    }

    pub fn open_readonly(db_path: &Path, dimensions: usize, map_size_mb: usize) -> Result<Self> {
        if !db_path.exists() {
            return Err(KbError::not_found(db_path.display().to_string()));
        }
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size_mb * 1024 * 1024)
                .max_dbs(4)
                .flags(EnvFlags::READ_ONLY)
                .open(db_path)
                .map_err(|e| KbError::store_unavailable(e.to_string()))?
        };
        let rtxn = env
            .read_txn()
            .map_err(|e| KbError::store_unavailable(e.to_string()))?;
        let vectors: ArroyDatabase<Cosine> = env
            .open_database(&rtxn, Some("vectors"))
            .map_err(|e| KbError::store_unavailable(e.to_string()))?
            .ok_or_else(|| KbError::store_unavailable("vectors database not found"))?;
        let indexed = Reader::open(&rtxn, 0, vectors).is_ok();
        drop(rtxn);

        Ok(Self {
            env,
            vectors,
            dimensions,
            indexed,
        })
    }

    /// Insert or overwrite a batch of (id, embedding) pairs. Overwriting an id that
    /// already held a different vector is exactly how re-embedding an unchanged chunk
    /// stays a no-op and a changed chunk's vector gets replaced in place.
    pub fn upsert(&mut self, items: &[(u32, Vec<f32>)]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| KbError::store_unavailable(e.to_string()))?;
        let writer = Writer::new(self.vectors, 0, self.dimensions);

        for (id, embedding) in items {
            if embedding.len() != self.dimensions {
                return Err(KbError::embed_failed(format!(
                    "embedding dimension mismatch: expected {}, got {}",
                    self.dimensions,
                    embedding.len()
                )));
            }
            writer
                .add_item(&mut wtxn, *id, embedding)
                .map_err(|e| KbError::store_unavailable(e.to_string()))?;
        }
        wtxn.commit()
            .map_err(|e| KbError::store_unavailable(e.to_string()))?;
        self.indexed = false;
        Ok(())
    }

    pub fn delete(&mut self, ids: &[u32]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| KbError::store_unavailable(e.to_string()))?;
        let writer = Writer::new(self.vectors, 0, self.dimensions);
        let mut deleted = 0;
        for &id in ids {
            if writer.del_item(&mut wtxn, id).unwrap_or(false) {
                deleted += 1;
            }
        }
        wtxn.commit()
            .map_err(|e| KbError::store_unavailable(e.to_string()))?;
        if deleted > 0 {
            self.indexed = false;
        }
        Ok(deleted)
    }

    /// Rebuild the ANN index. Called once per folder scan rather than per file, since
    /// arroy's tree build is a bulk operation and rebuilding after every single chunk
    /// would dominate indexing cost (§4.2.1).
    pub fn build_index(&mut self) -> Result<()> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| KbError::store_unavailable(e.to_string()))?;
        let writer = Writer::new(self.vectors, 0, self.dimensions);
        let mut rng = StdRng::seed_from_u64(rand::random());
        writer
            .builder(&mut rng)
            .build(&mut wtxn)
            .map_err(|e| KbError::store_unavailable(e.to_string()))?;
        wtxn.commit()
            .map_err(|e| KbError::store_unavailable(e.to_string()))?;
        self.indexed = true;
        Ok(())
    }

    pub fn search(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<DenseHit>> {
        if query_embedding.len() != self.dimensions {
            return Err(KbError::embed_failed(format!(
                "query embedding dimension mismatch: expected {}, got {}",
                self.dimensions,
                query_embedding.len()
            )));
        }
        if !self.indexed {
            return Ok(Vec::new());
        }

        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| KbError::store_unavailable(e.to_string()))?;
        let reader = Reader::open(&rtxn, 0, self.vectors)
            .map_err(|e| KbError::store_unavailable(e.to_string()))?;

        let mut query = reader.nns(limit);
        if let Some(n_trees) = NonZeroUsize::new(reader.n_trees()) {
            if let Some(search_k) = NonZeroUsize::new(limit * n_trees.get() * 15) {
                query.search_k(search_k);
            }
        }

        let results = query
            .by_vector(&rtxn, query_embedding)
            .map_err(|e| KbError::store_unavailable(e.to_string()))?;

        Ok(results
            .into_iter()
            .map(|(id, distance)| DenseHit { id, distance })
            .collect())
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| KbError::store_unavailable(e.to_string()))?;
        let total_vectors = if self.indexed {
            Reader::open(&rtxn, 0, self.vectors)
                .map(|r| r.n_items())
                .unwrap_or(0)
        } else {
            0
        };
        Ok(StoreStats {
            total_vectors: total_vectors as usize,
            indexed: self.indexed,
            dimensions: self.dimensions,
        })
    }
}

#[derive(Debug, Clone)]
pub struct StoreStats {
    pub total_vectors: usize,
    pub indexed: bool,
    pub dimensions: usize,
}

/// LMDB leaves `.del` files behind after a crash mid-delete; clear them before opening.
fn cleanup_stale_del_files(db_path: &Path) -> Result<()> {
    if !db_path.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(db_path)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("del") {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_deterministic_ids_are_stable() {
        let a = chunk_vector_id("docs/hello.txt", 0, 1);
        let b = chunk_vector_id("docs/hello.txt", 0, 1);
        let c = chunk_vector_id("docs/hello.txt", 1, 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_upsert_and_search() {
        let dir = tempdir().unwrap();
        let mut store = VectorStore::new(&dir.path().join("vectors"), 4, 64).unwrap();

        let id_a = chunk_vector_id("a.txt", 0, 1);
        let id_b = chunk_vector_id("b.txt", 0, 1);
        store
            .upsert(&[
                (id_a, vec![1.0, 0.0, 0.0, 0.0]),
                (id_b, vec![0.0, 1.0, 0.0, 0.0]),
            ])
            .unwrap();
        store.build_index().unwrap();

        let hits = store.search(&[0.9, 0.1, 0.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, id_a);
    }

    #[test]
    fn test_upsert_same_id_overwrites() {
        let dir = tempdir().unwrap();
        let mut store = VectorStore::new(&dir.path().join("vectors"), 2, 64).unwrap();
        let id = chunk_vector_id("a.txt", 0, 1);

        store.upsert(&[(id, vec![1.0, 0.0])]).unwrap();
        store.build_index().unwrap();
        assert_eq!(store.stats().unwrap().total_vectors, 1);

        store.upsert(&[(id, vec![0.0, 1.0])]).unwrap();
        store.build_index().unwrap();
        assert_eq!(store.stats().unwrap().total_vectors, 1);
    }

    #[test]
    fn test_delete() {
        let dir = tempdir().unwrap();
        let mut store = VectorStore::new(&dir.path().join("vectors"), 2, 64).unwrap();
        let id = chunk_vector_id("a.txt", 0, 1);
        store.upsert(&[(id, vec![1.0, 0.0])]).unwrap();
        store.build_index().unwrap();

        let deleted = store.delete(&[id]).unwrap();
        assert_eq!(deleted, 1);
    }
}
