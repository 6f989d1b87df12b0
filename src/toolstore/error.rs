use thiserror::Error;

/// Failures talking to an embedding provider.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// The provider was configured without an endpoint.
    #[error("embedding service endpoint is empty")]
    MissingEndpoint,

    #[error("failed to build embedding HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("embedding request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("embedding service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode embedding response: {0}")]
    Decode(#[source] reqwest::Error),

    #[error("embedding service returned {actual} vectors for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },

    #[error("embedding service returned no vectors")]
    EmptyResponse,

    /// Provider-specific failure (test doubles, future backends).
    #[error("{0}")]
    Other(String),
}

/// Errors surfaced by the tool store.
#[derive(Error, Debug)]
pub enum ToolStoreError {
    #[error("invalid configuration: {0}")]
    Config(String),

    /// `context` names the sub-operation ("generate embeddings", "embed query").
    #[error("failed to {context}: {source}")]
    Embedding {
        context: &'static str,
        #[source]
        source: EmbeddingError,
    },

    /// Storage failures keep the engine error as `source` only, so the
    /// display string never includes SQL.
    #[error("storage operation failed: {context}")]
    Storage {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to serialize {0}")]
    Serialization(&'static str, #[source] serde_json::Error),

    #[error("tool store is closed")]
    Closed,

    #[error("search cancelled")]
    Cancelled,

    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ToolStoreError {
    pub(crate) fn storage(context: impl Into<String>) -> impl FnOnce(rusqlite::Error) -> Self {
        let context = context.into();
        move |source| Self::Storage { context, source }
    }

    pub(crate) fn embedding(context: &'static str) -> impl FnOnce(EmbeddingError) -> Self {
        move |source| Self::Embedding { context, source }
    }
}

pub type Result<T> = std::result::Result<T, ToolStoreError>;
