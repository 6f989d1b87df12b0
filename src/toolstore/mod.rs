pub mod embeddings;
pub mod error;
pub mod hybrid;
pub mod query;
pub mod schema;
pub mod similarity;
pub mod store;
pub mod types;

pub use embeddings::{EmbeddingClient, FakeEmbeddingClient, HttpEmbeddingClient};
pub use error::{EmbeddingError, Result, ToolStoreError};
pub use store::SqliteToolStore;
pub use types::{MatchSource, ToolDefinition, ToolMatch, ToolStore};
