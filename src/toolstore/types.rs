use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::Result;

/// A tool as advertised by a backend MCP server.
///
/// Only `name` and `description` are indexed; `input_schema` rides along for
/// callers that hand full definitions back to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inputSchema", skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: None,
        }
    }

    pub fn with_input_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = Some(schema);
        self
    }
}

/// Which search path produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Text,
    Semantic,
}

/// A single search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMatch {
    pub name: String,
    pub description: String,
    /// FTS5 rank calibrated onto (0, 1] as `1 / (1 - rank)`. Lower is a
    /// stronger match, and the value only compares with other text hits.
    /// Semantic hits carry no score: cosine distance and BM25 rank are not
    /// comparable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub source: MatchSource,
}

impl ToolMatch {
    pub fn text(name: impl Into<String>, description: impl Into<String>, score: f64) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            score: Some(score),
            source: MatchSource::Text,
        }
    }

    pub fn semantic(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            score: None,
            source: MatchSource::Semantic,
        }
    }
}

/// The contract the gateway consumes: index tools, search them within an
/// allow-list, and release resources.
#[async_trait]
pub trait ToolStore: Send + Sync {
    /// Insert or fully replace tools by name, atomically for the batch.
    async fn upsert_tools(&self, tools: &[ToolDefinition]) -> Result<()>;

    /// Find tools relevant to `query` among `allowed_tools`. An empty
    /// allow-list means nothing is visible and always yields no results.
    async fn search(&self, query: &str, allowed_tools: &[String]) -> Result<Vec<ToolMatch>>;

    /// Release the storage connection and embedding client. Safe to call
    /// more than once.
    fn close(&self) -> Result<()>;
}
