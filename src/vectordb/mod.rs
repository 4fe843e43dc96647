mod store;

pub use store::{chunk_vector_id, DenseHit, StoreStats, VectorStore};
