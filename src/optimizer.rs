//! Per-session tool discovery on top of a shared [`ToolStore`].
//!
//! A gateway creates one [`ToolOptimizer`] per client session. The session's
//! tools are indexed into the shared store on creation; `find_tool` then only
//! ever searches within that session's tool names, and `call_tool` dispatches
//! to the handler registered with the session's tool.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ValidatedConfig;
use crate::toolstore::{SqliteToolStore, ToolDefinition, ToolMatch, ToolStore};

/// Estimates how many model tokens a tool definition costs.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, tool: &ToolDefinition) -> usize;
}

/// Roughly four bytes of serialized JSON per token.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonByteCounter;

impl TokenCounter for JsonByteCounter {
    fn count_tokens(&self, tool: &ToolDefinition) -> usize {
        match serde_json::to_vec(tool) {
            Ok(bytes) => bytes.len().div_ceil(4),
            Err(e) => {
                tracing::warn!(tool = %tool.name, error = %e, "failed to serialize tool for token count");
                0
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindToolInput {
    pub tool_description: String,
    #[serde(default)]
    pub tool_keywords: String,
}

/// Token cost of all session tools versus only the returned ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenMetrics {
    pub baseline_tokens: usize,
    pub returned_tokens: usize,
    pub savings_percent: f64,
}

impl TokenMetrics {
    fn new(baseline_tokens: usize, returned_tokens: usize) -> Self {
        let savings_percent = if baseline_tokens == 0 {
            0.0
        } else {
            baseline_tokens.saturating_sub(returned_tokens) as f64 / baseline_tokens as f64 * 100.0
        };
        Self {
            baseline_tokens,
            returned_tokens,
            savings_percent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindToolOutput {
    pub tools: Vec<ToolMatch>,
    pub token_metrics: TokenMetrics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallToolInput {
    pub tool_name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

/// Outcome of a tool call. `is_error` marks failures reported to the model
/// as tool output rather than as a transport error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    pub text: String,
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

/// Executes one backend tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, parameters: &Map<String, Value>) -> Result<CallToolResult>;
}

#[async_trait]
impl<F> ToolHandler for F
where
    F: Fn(&Map<String, Value>) -> Result<CallToolResult> + Send + Sync,
{
    async fn call(&self, parameters: &Map<String, Value>) -> Result<CallToolResult> {
        self(parameters)
    }
}

/// A tool definition plus the handler that runs it. Definitions without a
/// handler can be found but not called.
#[derive(Clone)]
pub struct SessionTool {
    pub definition: ToolDefinition,
    pub handler: Option<Arc<dyn ToolHandler>>,
}

impl SessionTool {
    pub fn new(definition: ToolDefinition, handler: Arc<dyn ToolHandler>) -> Self {
        Self {
            definition,
            handler: Some(handler),
        }
    }
}

impl From<ToolDefinition> for SessionTool {
    fn from(definition: ToolDefinition) -> Self {
        Self {
            definition,
            handler: None,
        }
    }
}

pub struct ToolOptimizer {
    store: Arc<dyn ToolStore>,
    counter: Arc<dyn TokenCounter>,
    session_id: String,
    tools: HashMap<String, SessionTool>,
    allowed: Vec<String>,
    baseline_tokens: usize,
}

impl ToolOptimizer {
    /// Index `tools` into `store` and scope this session to their names.
    pub async fn new<I, T>(
        store: Arc<dyn ToolStore>,
        counter: Arc<dyn TokenCounter>,
        session_id: String,
        tools: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<SessionTool>,
    {
        let tools: Vec<SessionTool> = tools.into_iter().map(Into::into).collect();
        let definitions: Vec<ToolDefinition> =
            tools.iter().map(|t| t.definition.clone()).collect();
        store
            .upsert_tools(&definitions)
            .await
            .context("failed to upsert tools into store")?;

        let baseline_tokens = definitions.iter().map(|t| counter.count_tokens(t)).sum();
        let allowed: Vec<String> = definitions.iter().map(|t| t.name.clone()).collect();
        let tools = tools
            .into_iter()
            .map(|t| (t.definition.name.clone(), t))
            .collect();

        tracing::debug!(session = %session_id, tools = allowed.len(), baseline_tokens, "optimizer session created");

        Ok(Self {
            store,
            counter,
            session_id,
            tools,
            allowed,
            baseline_tokens,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Search the session's tools for `input.tool_description`, optionally
    /// widened with `input.tool_keywords`.
    pub async fn find_tool(&self, input: &FindToolInput) -> Result<FindToolOutput> {
        let description = input.tool_description.trim();
        if description.is_empty() {
            bail!("tool_description is required");
        }

        let keywords = input.tool_keywords.trim();
        let query = if keywords.is_empty() {
            description.to_string()
        } else {
            format!("{description} {keywords}")
        };

        let matches = self
            .store
            .search(&query, &self.allowed)
            .await
            .context("tool search failed")?;

        let returned_tokens = matches
            .iter()
            .filter_map(|m| self.tools.get(&m.name))
            .map(|t| self.counter.count_tokens(&t.definition))
            .sum();
        let token_metrics = TokenMetrics::new(self.baseline_tokens, returned_tokens);

        tracing::debug!(
            session = %self.session_id,
            query = %query,
            results = matches.len(),
            savings = token_metrics.savings_percent,
            "find_tool"
        );

        Ok(FindToolOutput {
            tools: matches,
            token_metrics,
        })
    }

    /// Run one of the session's tools. A missing or handler-less tool is a
    /// tool error result; handler failures are errors.
    pub async fn call_tool(&self, input: &CallToolInput) -> Result<CallToolResult> {
        let name = input.tool_name.trim();
        if name.is_empty() {
            bail!("tool_name is required");
        }

        let Some(tool) = self.tools.get(name) else {
            tracing::debug!(session = %self.session_id, tool = %name, "call_tool: unknown tool");
            return Ok(CallToolResult::error(format!("tool not found: {name}")));
        };
        let Some(handler) = &tool.handler else {
            return Ok(CallToolResult::error(format!("tool has no handler: {name}")));
        };

        tracing::debug!(session = %self.session_id, tool = %name, "call_tool");
        handler
            .call(&input.parameters)
            .await
            .with_context(|| format!("tool call failed: {name}"))
    }
}

/// Creates optimizer sessions that share one store.
pub struct OptimizerFactory {
    store: Arc<dyn ToolStore>,
    counter: Arc<dyn TokenCounter>,
    next_session: AtomicU64,
}

impl OptimizerFactory {
    pub fn new(store: Arc<dyn ToolStore>, counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            store,
            counter,
            next_session: AtomicU64::new(0),
        }
    }

    /// Factory over a store built from validated settings.
    pub fn from_config(config: &ValidatedConfig, db_path: Option<&Path>) -> Result<Self> {
        let store = SqliteToolStore::from_config(config, db_path).context("opening tool store")?;
        Ok(Self::new(Arc::new(store), Arc::new(JsonByteCounter)))
    }

    pub async fn create<I, T>(&self, tools: I) -> Result<ToolOptimizer>
    where
        I: IntoIterator<Item = T>,
        T: Into<SessionTool>,
    {
        let n = self.next_session.fetch_add(1, Ordering::Relaxed);
        ToolOptimizer::new(
            Arc::clone(&self.store),
            Arc::clone(&self.counter),
            format!("session-{n}"),
            tools,
        )
        .await
    }

    pub fn close(&self) -> Result<()> {
        self.store.close().context("closing tool store")
    }
}
