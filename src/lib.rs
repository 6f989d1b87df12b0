//! Hybrid full-text and semantic search over MCP tool definitions.
//!
//! [`toolstore`] holds the capability index and search engine, [`optimizer`]
//! layers per-session tool discovery on top, and [`config`] carries the
//! gateway-facing settings.

pub mod config;
pub mod optimizer;
pub mod toolstore;
