//! Configuration for the tool store.
//!
//! [`OptimizerConfig`] mirrors the optimizer block of a virtual MCP server
//! resource: numbers that Kubernetes CRDs cannot carry as floats arrive as
//! strings, and zero/empty means "unset". [`OptimizerConfig::validate`] turns
//! it into a [`ValidatedConfig`] whose unset fields fall back to defaults
//! independently when converted to [`SearchSettings`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of results returned to the caller.
pub const DEFAULT_MAX_TOOLS_TO_RETURN: usize = 8;

/// Share of the result budget given to semantic search (0 = all FTS5,
/// 1 = all semantic).
pub const DEFAULT_HYBRID_SEMANTIC_RATIO: f64 = 0.5;

/// Maximum cosine distance for semantic hits. Cosine distance runs from 0
/// (identical) to 2 (opposite).
pub const DEFAULT_SEMANTIC_DISTANCE_THRESHOLD: f64 = 1.0;

const MAX_TOOLS_UPPER_BOUND: i64 = 50;

pub const ENV_EMBEDDING_SERVICE: &str = "TOOLSTORE_EMBEDDING_SERVICE";
pub const ENV_EMBEDDING_TIMEOUT_SECONDS: &str = "TOOLSTORE_EMBEDDING_TIMEOUT_SECONDS";
pub const ENV_MAX_TOOLS: &str = "TOOLSTORE_MAX_TOOLS";
pub const ENV_HYBRID_RATIO: &str = "TOOLSTORE_HYBRID_RATIO";
pub const ENV_DISTANCE_THRESHOLD: &str = "TOOLSTORE_DISTANCE_THRESHOLD";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("optimizer.maxToolsToReturn must be between 1 and 50, got {0}")]
    MaxToolsOutOfRange(i64),

    #[error("optimizer.hybridSearchSemanticRatio must be a valid number, got {0:?}")]
    RatioNotANumber(String),

    #[error("optimizer.hybridSearchSemanticRatio must be between 0.0 and 1.0, got {0}")]
    RatioOutOfRange(f64),

    #[error("optimizer.semanticDistanceThreshold must be a valid number, got {0:?}")]
    ThresholdNotANumber(String),

    #[error("optimizer.semanticDistanceThreshold must be between 0.0 and 2.0, got {0}")]
    ThresholdOutOfRange(f64),

    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidEnv { key: &'static str, value: String },
}

/// Raw optimizer settings as they arrive from a resource spec or file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct OptimizerConfig {
    /// Base URL of the embedding service. Empty disables semantic search.
    pub embedding_service: String,

    /// Per-request timeout for the embedding service, in seconds. 0 uses the
    /// 30 second default.
    pub embedding_service_timeout_seconds: u64,

    /// Result cap, 1 to 50. 0 means unset.
    pub max_tools_to_return: i64,

    /// Semantic share of the result budget, "0.0" to "1.0". Empty means unset.
    pub hybrid_search_semantic_ratio: String,

    /// Maximum cosine distance for semantic hits, "0.0" to "2.0". Empty means
    /// unset.
    pub semantic_distance_threshold: String,
}

/// Optimizer settings after range checks. `None` fields take defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedConfig {
    pub embedding_service: Option<String>,
    pub embedding_timeout: Option<Duration>,
    pub max_tools_to_return: Option<usize>,
    pub hybrid_semantic_ratio: Option<f64>,
    pub semantic_distance_threshold: Option<f64>,
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        let embedding_service = Some(self.embedding_service.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let embedding_timeout = (self.embedding_service_timeout_seconds > 0)
            .then(|| Duration::from_secs(self.embedding_service_timeout_seconds));

        let max_tools_to_return = match self.max_tools_to_return {
            0 => None,
            n if (1..=MAX_TOOLS_UPPER_BOUND).contains(&n) => Some(n as usize),
            n => return Err(ConfigError::MaxToolsOutOfRange(n)),
        };

        let hybrid_semantic_ratio = parse_bounded(
            &self.hybrid_search_semantic_ratio,
            0.0,
            1.0,
            ConfigError::RatioNotANumber,
            ConfigError::RatioOutOfRange,
        )?;

        let semantic_distance_threshold = parse_bounded(
            &self.semantic_distance_threshold,
            0.0,
            2.0,
            ConfigError::ThresholdNotANumber,
            ConfigError::ThresholdOutOfRange,
        )?;

        Ok(ValidatedConfig {
            embedding_service,
            embedding_timeout,
            max_tools_to_return,
            hybrid_semantic_ratio,
            semantic_distance_threshold,
        })
    }

    /// Overlay values from the environment. `lookup` is `std::env::var` in
    /// production and a map in tests.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_EMBEDDING_SERVICE) {
            self.embedding_service = v;
        }
        if let Some(v) = lookup(ENV_EMBEDDING_TIMEOUT_SECONDS) {
            self.embedding_service_timeout_seconds =
                v.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    key: ENV_EMBEDDING_TIMEOUT_SECONDS,
                    value: v.clone(),
                })?;
        }
        if let Some(v) = lookup(ENV_MAX_TOOLS) {
            self.max_tools_to_return = v.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: ENV_MAX_TOOLS,
                value: v.clone(),
            })?;
        }
        if let Some(v) = lookup(ENV_HYBRID_RATIO) {
            self.hybrid_search_semantic_ratio = v;
        }
        if let Some(v) = lookup(ENV_DISTANCE_THRESHOLD) {
            self.semantic_distance_threshold = v;
        }
        Ok(())
    }
}

fn parse_bounded(
    raw: &str,
    min: f64,
    max: f64,
    not_a_number: fn(String) -> ConfigError,
    out_of_range: fn(f64) -> ConfigError,
) -> Result<Option<f64>, ConfigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let value: f64 = raw.parse().map_err(|_| not_a_number(raw.to_string()))?;
    if !(min..=max).contains(&value) {
        return Err(out_of_range(value));
    }
    Ok(Some(value))
}

/// Effective search parameters used by the store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchSettings {
    pub max_tools_to_return: usize,
    pub hybrid_semantic_ratio: f64,
    pub semantic_distance_threshold: f64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            max_tools_to_return: DEFAULT_MAX_TOOLS_TO_RETURN,
            hybrid_semantic_ratio: DEFAULT_HYBRID_SEMANTIC_RATIO,
            semantic_distance_threshold: DEFAULT_SEMANTIC_DISTANCE_THRESHOLD,
        }
    }
}

impl From<&ValidatedConfig> for SearchSettings {
    fn from(cfg: &ValidatedConfig) -> Self {
        let defaults = Self::default();
        Self {
            max_tools_to_return: cfg
                .max_tools_to_return
                .unwrap_or(defaults.max_tools_to_return),
            hybrid_semantic_ratio: cfg
                .hybrid_semantic_ratio
                .unwrap_or(defaults.hybrid_semantic_ratio),
            semantic_distance_threshold: cfg
                .semantic_distance_threshold
                .unwrap_or(defaults.semantic_distance_threshold),
        }
    }
}

/// Where the capability index lives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreConfig {
    /// SQLite file path (`~` and `$VARS` expanded). Unset keeps the index in
    /// memory.
    pub db_path: Option<String>,
}

impl StoreConfig {
    pub fn resolved_db_path(&self) -> Result<Option<PathBuf>> {
        let Some(raw) = self.db_path.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(None);
        };
        let expanded = shellexpand::full(raw)
            .with_context(|| format!("expanding store.dbPath: {raw}"))?;
        Ok(Some(PathBuf::from(expanded.as_ref())))
    }
}

/// Top-level file layout:
///
/// ```toml
/// [optimizer]
/// embeddingService = "http://embeddings:8080"
/// maxToolsToReturn = 8
/// hybridSearchSemanticRatio = "0.5"
///
/// [store]
/// dbPath = "~/.local/share/toolstore/tools.db"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AppConfig {
    pub optimizer: OptimizerConfig,
    pub store: StoreConfig,
}

impl AppConfig {
    /// Platform default config file, e.g. `~/.config/toolstore/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "mcp", "toolstore")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("parsing toolstore config")
    }

    /// Load `path` if given (it must exist), else the default path if it
    /// exists, else defaults. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    pub fn load_with_env<F>(path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = match path {
            Some(p) => Self::read(p)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(p) => Self::read(&p)?,
                None => Self::default(),
            },
        };
        cfg.optimizer.apply_overrides(lookup)?;
        Ok(cfg)
    }

    fn read(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Self::from_toml(&raw)
    }
}
