pub mod bus;
pub mod cache;
pub mod chunker;
pub mod cli;
pub mod config;
pub mod constants;
pub mod embed;
pub mod error;
pub mod extract;
pub mod file;
pub mod fts;
pub mod index;
pub mod logger;
pub mod mcp;
pub mod output;
pub mod search;
pub mod server;
pub mod state;
pub mod sync;
pub mod vectordb;
pub mod watch;

// Re-export commonly used types
pub use bus::{Event, EventBus};
pub use embed::{CacheStats, EmbeddedChunk, EmbeddingService, ModelType};
pub use error::{KbError, Result as KbResult};
pub use search::{IndexedFolder, SearchEngine, SearchHit, SearchQuery};
pub use state::StateStore;
pub use vectordb::{chunk_vector_id, DenseHit, StoreStats, VectorStore};
