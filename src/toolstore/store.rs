use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tokio_util::sync::CancellationToken;

use super::embeddings::{EmbeddingClient, HttpEmbeddingClient};
use super::error::{Result, ToolStoreError};
use super::hybrid::{hybrid_search_limits, merge_results};
use super::query::{normalize_bm25, sanitize_fts5_query};
use super::schema;
use super::similarity::cosine_distance;
use super::types::{ToolDefinition, ToolMatch, ToolStore};
use crate::config::{SearchSettings, ValidatedConfig};

/// The text embedded for a tool. Queries are embedded raw, so a query equal
/// to this string sits at distance 0 from the tool.
pub fn embedding_text(tool: &ToolDefinition) -> String {
    format!("name: {} description: {}", tool.name, tool.description)
}

/// SQLite-backed capability index with optional semantic search.
///
/// Cloning is cheap; clones share one connection and one embedding client.
/// The connection sits behind a mutex and is only touched from blocking
/// tasks, so the store can be driven from any number of async callers.
#[derive(Clone)]
pub struct SqliteToolStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    conn: Mutex<Option<Connection>>,
    embedding_client: Option<Arc<dyn EmbeddingClient>>,
    settings: SearchSettings,
    closed: AtomicBool,
}

impl std::fmt::Debug for SqliteToolStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteToolStore")
            .field("semantic", &self.inner.embedding_client.is_some())
            .field("settings", &self.inner.settings)
            .field("closed", &self.inner.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl SqliteToolStore {
    /// In-memory index. `embedding_client` of `None` means FTS-only search.
    pub fn open_in_memory(
        embedding_client: Option<Arc<dyn EmbeddingClient>>,
        settings: SearchSettings,
    ) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(ToolStoreError::storage("open in-memory database"))?;
        Self::from_connection(conn, false, embedding_client, settings)
    }

    /// File-backed index at `path`, created if missing.
    pub fn open(
        path: &Path,
        embedding_client: Option<Arc<dyn EmbeddingClient>>,
        settings: SearchSettings,
    ) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                ToolStoreError::Config(format!("creating {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(ToolStoreError::storage(format!("open {}", path.display())))?;
        Self::from_connection(conn, true, embedding_client, settings)
    }

    /// Build a store from validated optimizer settings. An embedding client is
    /// attached only when an endpoint is configured.
    pub fn from_config(config: &ValidatedConfig, path: Option<&Path>) -> Result<Self> {
        let embedding_client = match config.embedding_service.as_deref() {
            Some(endpoint) => {
                let client = HttpEmbeddingClient::new(endpoint, config.embedding_timeout)
                    .map_err(ToolStoreError::embedding("create embedding client"))?;
                Some(Arc::new(client) as Arc<dyn EmbeddingClient>)
            }
            None => None,
        };
        let settings = SearchSettings::from(config);
        match path {
            Some(p) => Self::open(p, embedding_client, settings),
            None => Self::open_in_memory(embedding_client, settings),
        }
    }

    fn from_connection(
        conn: Connection,
        file_backed: bool,
        embedding_client: Option<Arc<dyn EmbeddingClient>>,
        settings: SearchSettings,
    ) -> Result<Self> {
        conn.execute_batch(schema::PRAGMAS)
            .map_err(ToolStoreError::storage("pragma setup"))?;
        if file_backed {
            conn.execute_batch(schema::FILE_PRAGMAS)
                .map_err(ToolStoreError::storage("file pragma setup"))?;
        }
        conn.execute_batch(schema::CAPABILITIES_DDL)
            .map_err(ToolStoreError::storage("create capabilities table"))?;
        conn.execute_batch(schema::CAPABILITIES_FTS_DDL)
            .map_err(ToolStoreError::storage("create capabilities index"))?;
        conn.execute_batch(schema::CAPABILITIES_FTS_TRIGGERS_DDL)
            .map_err(ToolStoreError::storage("create capabilities index triggers"))?;

        tracing::info!(
            semantic = embedding_client.is_some(),
            max_results = settings.max_tools_to_return,
            ratio = settings.hybrid_semantic_ratio,
            threshold = settings.semantic_distance_threshold,
            "tool store opened"
        );

        Ok(Self {
            inner: Arc::new(StoreInner {
                conn: Mutex::new(Some(conn)),
                embedding_client,
                settings,
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.inner.settings
    }

    pub fn semantic_enabled(&self) -> bool {
        self.inner.embedding_client.is_some()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(ToolStoreError::Closed);
        }
        Ok(())
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut guard = inner.conn.lock();
            let conn = guard.as_mut().ok_or(ToolStoreError::Closed)?;
            f(conn)
        })
        .await?
    }

    /// Insert or replace `tools` by name. Embeddings for the whole batch are
    /// generated before the transaction opens; any failure leaves the index
    /// untouched.
    pub async fn upsert_tools(&self, tools: &[ToolDefinition]) -> Result<()> {
        self.ensure_open()?;
        if tools.is_empty() {
            return Ok(());
        }

        let embeddings = self.generate_embeddings(tools).await?;
        let rows: Vec<(String, String, Option<Vec<u8>>)> = tools
            .iter()
            .zip(embeddings)
            .map(|(t, e)| (t.name.clone(), t.description.clone(), e))
            .collect();
        let count = rows.len();

        self.with_conn(move |conn| {
            let tx = conn
                .transaction()
                .map_err(ToolStoreError::storage("begin upsert transaction"))?;
            {
                let mut stmt = tx
                    .prepare_cached(schema::UPSERT_CAPABILITY)
                    .map_err(ToolStoreError::storage("prepare upsert"))?;
                let now = chrono::Utc::now().to_rfc3339();
                for (name, description, embedding) in &rows {
                    stmt.execute(params![name, description, embedding, now])
                        .map_err(ToolStoreError::storage(format!("upsert tool {name}")))?;
                }
            }
            tx.commit()
                .map_err(ToolStoreError::storage("commit upsert transaction"))
        })
        .await?;

        tracing::debug!(count, "upserted tools");
        Ok(())
    }

    /// One embedding per tool, or all `None` without a client.
    async fn generate_embeddings(&self, tools: &[ToolDefinition]) -> Result<Vec<Option<Vec<u8>>>> {
        let Some(client) = &self.inner.embedding_client else {
            return Ok(vec![None; tools.len()]);
        };

        let texts: Vec<String> = tools.iter().map(embedding_text).collect();
        let vectors = client
            .embed_batch(&texts)
            .await
            .map_err(ToolStoreError::embedding("generate embeddings"))?;
        if vectors.len() != tools.len() {
            return Err(ToolStoreError::Embedding {
                context: "generate embeddings",
                source: super::error::EmbeddingError::CountMismatch {
                    expected: tools.len(),
                    actual: vectors.len(),
                },
            });
        }

        Ok(vectors.iter().map(|v| Some(encode_embedding(v))).collect())
    }

    /// Full-text search for an already sanitized `expr` within `allowed`,
    /// best rank first.
    pub async fn search_fts(
        &self,
        expr: &str,
        allowed: &[String],
        limit: usize,
    ) -> Result<Vec<ToolMatch>> {
        self.ensure_open()?;
        if allowed.is_empty() || expr.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let allowed_json = allowed_json(allowed)?;
        let expr = expr.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare_cached(schema::SEARCH_FTS)
                .map_err(ToolStoreError::storage("prepare text search"))?;
            let rows = stmt
                .query_map(params![expr, allowed_json, limit as i64], |row| {
                    Ok(ToolMatch::text(
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        normalize_bm25(row.get::<_, f64>(2)?),
                    ))
                })
                .map_err(ToolStoreError::storage("run text search"))?;
            let matches: Vec<ToolMatch> = rows
                .collect::<rusqlite::Result<_>>()
                .map_err(ToolStoreError::storage("read text search results"))?;
            Ok(matches)
        })
        .await
    }

    /// Vector search within `allowed`, closest first, dropping anything
    /// farther than the configured distance threshold. Empty when no
    /// embedding client is attached.
    pub async fn search_semantic(
        &self,
        query: &str,
        allowed: &[String],
        limit: usize,
    ) -> Result<Vec<ToolMatch>> {
        self.ensure_open()?;
        let Some(client) = &self.inner.embedding_client else {
            return Ok(Vec::new());
        };
        if allowed.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let query_vec = client
            .embed(query)
            .await
            .map_err(ToolStoreError::embedding("embed query"))?;
        let allowed_json = allowed_json(allowed)?;
        let threshold = self.inner.settings.semantic_distance_threshold;

        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare_cached(schema::SEARCH_EMBEDDINGS)
                .map_err(ToolStoreError::storage("prepare vector search"))?;
            let rows = stmt
                .query_map(params![allowed_json], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                })
                .map_err(ToolStoreError::storage("run vector search"))?;

            let mut scored = Vec::new();
            for row in rows {
                let (name, description, blob) =
                    row.map_err(ToolStoreError::storage("read vector search results"))?;
                let embedding = decode_embedding(&blob);
                if embedding.len() != query_vec.len() {
                    tracing::warn!(
                        tool = %name,
                        stored = embedding.len(),
                        query = query_vec.len(),
                        "skipping embedding with mismatched dimension"
                    );
                    continue;
                }
                let distance = cosine_distance(&query_vec, &embedding);
                if distance > threshold {
                    continue;
                }
                scored.push((distance, ToolMatch::semantic(name, description)));
            }

            scored.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.name.cmp(&b.1.name)));
            scored.truncate(limit);
            Ok(scored.into_iter().map(|(_, m)| m).collect())
        })
        .await
    }

    /// Hybrid search under the configured result budget.
    ///
    /// A failure on either path fails the call; there is no fallback to the
    /// other path's results.
    pub async fn search(&self, query: &str, allowed: &[String]) -> Result<Vec<ToolMatch>> {
        self.ensure_open()?;
        if allowed.is_empty() {
            return Ok(Vec::new());
        }

        let total = self.inner.settings.max_tools_to_return;
        let expr = sanitize_fts5_query(query);

        if self.inner.embedding_client.is_none() {
            return self.search_fts(&expr, allowed, total).await;
        }
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let (fts_limit, semantic_limit) =
            hybrid_search_limits(total, self.inner.settings.hybrid_semantic_ratio);

        let (fts, semantic) = tokio::try_join!(
            self.search_fts(&expr, allowed, fts_limit),
            self.search_semantic(query, allowed, semantic_limit),
        )?;

        tracing::debug!(
            fts = fts.len(),
            semantic = semantic.len(),
            fts_limit,
            semantic_limit,
            "hybrid search"
        );
        Ok(merge_results(fts, semantic, total))
    }

    /// [`search`](Self::search) that stops early with
    /// [`ToolStoreError::Cancelled`] once `cancel` fires. Any in-flight
    /// embedding request is dropped with it.
    pub async fn search_with_cancellation(
        &self,
        query: &str,
        allowed: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<ToolMatch>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ToolStoreError::Cancelled),
            res = self.search(query, allowed) => res,
        }
    }

    /// Remove tools by name. Unknown names are ignored. Returns the number
    /// of rows removed.
    pub async fn delete_tools(&self, names: &[String]) -> Result<usize> {
        self.ensure_open()?;
        if names.is_empty() {
            return Ok(0);
        }
        let names_json = allowed_json(names)?;
        self.with_conn(move |conn| {
            conn.execute(schema::DELETE_CAPABILITIES, params![names_json])
                .map_err(ToolStoreError::storage("delete tools"))
        })
        .await
    }

    /// Every indexed tool, ordered by name.
    pub async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        self.ensure_open()?;
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached(schema::LIST_CAPABILITIES)
                .map_err(ToolStoreError::storage("prepare list tools"))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(ToolDefinition::new(
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                    ))
                })
                .map_err(ToolStoreError::storage("list tools"))?;
            let tools: Vec<ToolDefinition> = rows
                .collect::<rusqlite::Result<_>>()
                .map_err(ToolStoreError::storage("read tool rows"))?;
            Ok(tools)
        })
        .await
    }

    /// [`close`](Self::close) on the blocking pool, for async callers that
    /// must not stall a runtime worker while a query holds the connection.
    pub async fn shutdown(&self) -> Result<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.close()).await?
    }

    /// Release the connection and the embedding client. Later calls are
    /// no-ops; later searches fail with [`ToolStoreError::Closed`].
    ///
    /// Blocks until any in-flight query releases the connection; from async
    /// code prefer [`shutdown`](Self::shutdown).
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let client_result = match &self.inner.embedding_client {
            Some(client) => client
                .close()
                .map_err(ToolStoreError::embedding("close embedding client")),
            None => Ok(()),
        };

        let conn_result = match self.inner.conn.lock().take() {
            Some(conn) => conn
                .close()
                .map_err(|(_, e)| ToolStoreError::storage("close database")(e)),
            None => Ok(()),
        };

        match (client_result, conn_result) {
            (Err(client_err), Err(conn_err)) => {
                tracing::warn!(error = %conn_err, "database close failed after client close failure");
                Err(client_err)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => {
                tracing::info!("tool store closed");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl ToolStore for SqliteToolStore {
    async fn upsert_tools(&self, tools: &[ToolDefinition]) -> Result<()> {
        SqliteToolStore::upsert_tools(self, tools).await
    }

    async fn search(&self, query: &str, allowed_tools: &[String]) -> Result<Vec<ToolMatch>> {
        SqliteToolStore::search(self, query, allowed_tools).await
    }

    fn close(&self) -> Result<()> {
        SqliteToolStore::close(self)
    }
}

fn allowed_json(names: &[String]) -> Result<String> {
    serde_json::to_string(names)
        .map_err(|e| ToolStoreError::Serialization("tool name list", e))
}

/// Little-endian f32 array.
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of [`encode_embedding`]. Trailing bytes that do not form a whole
/// f32 are ignored.
pub fn decode_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolstore::embeddings::FakeEmbeddingClient;
    use crate::toolstore::error::EmbeddingError;
    use crate::toolstore::types::MatchSource;
    use std::collections::HashMap;
    use std::time::Duration;

    fn sample_tools() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new("github_create_issue", "Create a new issue in a GitHub repository"),
            ToolDefinition::new("github_list_pull_requests", "List open pull requests for a repository"),
            ToolDefinition::new("slack_send_message", "Send a message to a Slack channel"),
            ToolDefinition::new("read_file", "Read the contents of a file from disk"),
            ToolDefinition::new("write_file", "Write contents to a file on disk"),
        ]
    }

    fn all_names(tools: &[ToolDefinition]) -> Vec<String> {
        tools.iter().map(|t| t.name.clone()).collect()
    }

    fn names(matches: &[ToolMatch]) -> Vec<&str> {
        matches.iter().map(|m| m.name.as_str()).collect()
    }

    fn fts_store() -> SqliteToolStore {
        SqliteToolStore::open_in_memory(None, SearchSettings::default()).unwrap()
    }

    fn fake_store(settings: SearchSettings) -> SqliteToolStore {
        let client: Arc<dyn EmbeddingClient> = Arc::new(FakeEmbeddingClient::new(64));
        SqliteToolStore::open_in_memory(Some(client), settings).unwrap()
    }

    /// Returns fixed vectors keyed by exact text; anything else maps to a
    /// vector orthogonal to every key.
    struct MapEmbeddingClient {
        vectors: HashMap<String, Vec<f32>>,
        fallback: Vec<f32>,
    }

    #[async_trait]
    impl EmbeddingClient for MapEmbeddingClient {
        async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            Ok(self.vectors.get(text).cloned().unwrap_or_else(|| self.fallback.clone()))
        }

        async fn embed_batch(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            let mut out = Vec::with_capacity(texts.len());
            for t in texts {
                out.push(self.embed(t).await?);
            }
            Ok(out)
        }

        fn close(&self) -> std::result::Result<(), EmbeddingError> {
            Ok(())
        }
    }

    struct FailingEmbeddingClient;

    #[async_trait]
    impl EmbeddingClient for FailingEmbeddingClient {
        async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::Other("service unavailable".into()))
        }

        async fn embed_batch(
            &self,
            _texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::Other("service unavailable".into()))
        }

        fn close(&self) -> std::result::Result<(), EmbeddingError> {
            Ok(())
        }
    }

    /// Indexes normally but fails every query embedding.
    struct QueryFailingClient(FakeEmbeddingClient);

    #[async_trait]
    impl EmbeddingClient for QueryFailingClient {
        async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::Other("query embedding failed".into()))
        }

        async fn embed_batch(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            self.0.embed_batch(texts).await
        }

        fn close(&self) -> std::result::Result<(), EmbeddingError> {
            Ok(())
        }
    }

    /// Embeds queries slowly so cancellation can win the race.
    struct SlowQueryClient(FakeEmbeddingClient);

    #[async_trait]
    impl EmbeddingClient for SlowQueryClient {
        async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            self.0.embed(text).await
        }

        async fn embed_batch(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            self.0.embed_batch(texts).await
        }

        fn close(&self) -> std::result::Result<(), EmbeddingError> {
            Ok(())
        }
    }

    struct CloseFailingClient;

    #[async_trait]
    impl EmbeddingClient for CloseFailingClient {
        async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0])
        }

        async fn embed_batch(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(vec![vec![1.0]; texts.len()])
        }

        fn close(&self) -> std::result::Result<(), EmbeddingError> {
            Err(EmbeddingError::Other("close failed".into()))
        }
    }

    #[tokio::test]
    async fn open_with_and_without_client() {
        assert!(!fts_store().semantic_enabled());
        assert!(fake_store(SearchSettings::default()).semantic_enabled());
    }

    #[tokio::test]
    async fn upsert_overwrites_by_name() {
        let store = fts_store();
        store
            .upsert_tools(&[ToolDefinition::new("read_file", "Read a file")])
            .await
            .unwrap();
        store
            .upsert_tools(&[ToolDefinition::new("read_file", "Fetch a document")])
            .await
            .unwrap();

        let tools = store.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].description, "Fetch a document");

        let allowed = vec!["read_file".to_string()];
        assert_eq!(store.search("document", &allowed).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn upsert_empty_batch_is_noop() {
        let store = fts_store();
        store.upsert_tools(&[]).await.unwrap();
        assert!(store.list_tools().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_stores_embeddings_when_client_present() {
        let store = fake_store(SearchSettings::default());
        store.upsert_tools(&sample_tools()).await.unwrap();

        let count: i64 = store
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM llm_capabilities WHERE length(embedding) = 256",
                    [],
                    |r| r.get(0),
                )
                .map_err(ToolStoreError::storage("count"))
            })
            .await
            .unwrap();
        assert_eq!(count, 5);
    }

    #[tokio::test]
    async fn fts_search_table() {
        let store = fts_store();
        let tools = sample_tools();
        store.upsert_tools(&tools).await.unwrap();
        let all = all_names(&tools);

        struct Case {
            query: &'static str,
            allowed: Vec<String>,
            expect_contains: Vec<&'static str>,
            expect_empty: bool,
        }

        let cases = vec![
            Case {
                query: "github",
                allowed: all.clone(),
                expect_contains: vec!["github_create_issue", "github_list_pull_requests"],
                expect_empty: false,
            },
            Case {
                query: "pull requests",
                allowed: all.clone(),
                expect_contains: vec!["github_list_pull_requests"],
                expect_empty: false,
            },
            Case {
                query: "Slack channel",
                allowed: all.clone(),
                expect_contains: vec!["slack_send_message"],
                expect_empty: false,
            },
            Case {
                query: "github",
                allowed: vec!["github_create_issue".to_string()],
                expect_contains: vec!["github_create_issue"],
                expect_empty: false,
            },
            Case {
                query: "github",
                allowed: vec![],
                expect_contains: vec![],
                expect_empty: true,
            },
            Case {
                query: "kubernetes",
                allowed: all.clone(),
                expect_contains: vec![],
                expect_empty: true,
            },
            Case {
                query: "",
                allowed: all.clone(),
                expect_contains: vec![],
                expect_empty: true,
            },
            Case {
                query: "   ",
                allowed: all.clone(),
                expect_contains: vec![],
                expect_empty: true,
            },
        ];

        for case in cases {
            let results = store.search(case.query, &case.allowed).await.unwrap();
            if case.expect_empty {
                assert!(results.is_empty(), "query {:?}: {:?}", case.query, names(&results));
                continue;
            }
            let got = names(&results);
            for want in &case.expect_contains {
                assert!(got.contains(want), "query {:?}: missing {want} in {got:?}", case.query);
            }
            for r in &results {
                assert!(case.allowed.contains(&r.name), "{} not in allow-list", r.name);
                assert_eq!(r.source, MatchSource::Text);
                let score = r.score.unwrap();
                assert!(score > 0.0 && score <= 1.0, "score {score}");
            }
        }
    }

    #[tokio::test]
    async fn fts_only_github_query_returns_only_github_tools() {
        let store = fts_store();
        let tools = vec![
            ToolDefinition::new("github_create_issue", "Create a new issue in a GitHub repository"),
            ToolDefinition::new("github_list_repos", "List repositories for a GitHub user"),
            ToolDefinition::new("slack_send_message", "Send a message to a Slack channel"),
        ];
        store.upsert_tools(&tools).await.unwrap();

        let results = store.search("github", &all_names(&tools)).await.unwrap();
        let mut got = names(&results);
        got.sort();
        assert_eq!(got, ["github_create_issue", "github_list_repos"]);
    }

    #[tokio::test]
    async fn blank_query_with_provider_skips_embedding() {
        let client: Arc<dyn EmbeddingClient> =
            Arc::new(QueryFailingClient(FakeEmbeddingClient::new(16)));
        let store = SqliteToolStore::open_in_memory(Some(client), SearchSettings::default()).unwrap();
        let tools = sample_tools();
        store.upsert_tools(&tools).await.unwrap();

        for query in ["", "   ", "\t\n"] {
            let results = store.search(query, &all_names(&tools)).await.unwrap();
            assert!(results.is_empty(), "query {query:?}");
        }
    }

    #[tokio::test]
    async fn fts_operators_in_query_are_literal() {
        let store = fts_store();
        store.upsert_tools(&sample_tools()).await.unwrap();
        let all = all_names(&sample_tools());
        for query in ["NOT github", "name: read", "file*", "\"unbalanced", "a AND (b OR"] {
            store.search(query, &all).await.unwrap();
        }
    }

    #[tokio::test]
    async fn fts_scores_are_in_rank_order() {
        let store = fts_store();
        store.upsert_tools(&sample_tools()).await.unwrap();
        let results = store
            .search("file disk", &all_names(&sample_tools()))
            .await
            .unwrap();
        assert!(results.len() >= 2);
        // Rank order, strongest first; the calibrated score rises with rank.
        for pair in results.windows(2) {
            assert!(pair[0].score.unwrap() <= pair[1].score.unwrap());
        }
    }

    #[tokio::test]
    async fn results_are_capped_at_max_tools() {
        let settings = SearchSettings {
            max_tools_to_return: 3,
            ..SearchSettings::default()
        };
        let store = SqliteToolStore::open_in_memory(None, settings).unwrap();
        let tools: Vec<ToolDefinition> = (0..10)
            .map(|i| ToolDefinition::new(format!("deploy_{i}"), "Deploy a service"))
            .collect();
        store.upsert_tools(&tools).await.unwrap();

        let results = store.search("deploy", &all_names(&tools)).await.unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn semantic_exact_text_is_closest() {
        let store = fake_store(SearchSettings {
            hybrid_semantic_ratio: 1.0,
            ..SearchSettings::default()
        });
        let tools = sample_tools();
        store.upsert_tools(&tools).await.unwrap();

        let query = embedding_text(&tools[2]);
        let results = store.search(&query, &all_names(&tools)).await.unwrap();
        assert_eq!(results[0].name, "slack_send_message");
        assert_eq!(results[0].source, MatchSource::Semantic);
        assert!(results[0].score.is_none());
    }

    #[tokio::test]
    async fn hybrid_search_returns_results() {
        let store = fake_store(SearchSettings::default());
        let tools = sample_tools();
        store.upsert_tools(&tools).await.unwrap();
        let results = store.search("github", &all_names(&tools)).await.unwrap();
        assert!(!results.is_empty());
        assert!(results.len() <= crate::config::DEFAULT_MAX_TOOLS_TO_RETURN);
    }

    #[tokio::test]
    async fn hybrid_merge_puts_semantic_first() {
        let tools = vec![
            ToolDefinition::new("list_repos", "List repositories"),
            ToolDefinition::new("send_email", "Send an email message"),
            ToolDefinition::new("read_file", "Read a file"),
        ];
        let mut vectors = HashMap::new();
        vectors.insert(embedding_text(&tools[0]), vec![1.0, 0.0, 0.0]);
        vectors.insert(embedding_text(&tools[1]), vec![0.0, 1.0, 0.0]);
        vectors.insert(embedding_text(&tools[2]), vec![0.0, 1.0, 0.0]);
        // "message" embeds right next to list_repos and far from the rest.
        vectors.insert("message".to_string(), vec![1.0, 0.0, 0.0]);
        let client: Arc<dyn EmbeddingClient> = Arc::new(MapEmbeddingClient {
            vectors,
            fallback: vec![0.0, 0.0, 1.0],
        });

        let store = SqliteToolStore::open_in_memory(
            Some(client),
            SearchSettings {
                max_tools_to_return: 3,
                hybrid_semantic_ratio: 0.5,
                semantic_distance_threshold: 0.5,
            },
        )
        .unwrap();
        store.upsert_tools(&tools).await.unwrap();

        let results = store.search("message", &all_names(&tools)).await.unwrap();
        assert_eq!(names(&results), ["list_repos", "send_email"]);
        assert_eq!(results[0].source, MatchSource::Semantic);
        assert_eq!(results[1].source, MatchSource::Text);
    }

    #[tokio::test]
    async fn tight_threshold_filters_semantic_hits() {
        let store = fake_store(SearchSettings {
            hybrid_semantic_ratio: 1.0,
            semantic_distance_threshold: 0.001,
            ..SearchSettings::default()
        });
        let tools = sample_tools();
        store.upsert_tools(&tools).await.unwrap();
        let results = store
            .search("something unrelated entirely", &all_names(&tools))
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn semantic_failure_fails_whole_search() {
        let client: Arc<dyn EmbeddingClient> =
            Arc::new(QueryFailingClient(FakeEmbeddingClient::new(16)));
        let store = SqliteToolStore::open_in_memory(Some(client), SearchSettings::default()).unwrap();
        let tools = sample_tools();
        store.upsert_tools(&tools).await.unwrap();

        let err = store.search("github", &all_names(&tools)).await.unwrap_err();
        assert!(matches!(err, ToolStoreError::Embedding { context: "embed query", .. }));
    }

    #[tokio::test]
    async fn failed_batch_embedding_stores_nothing() {
        let client: Arc<dyn EmbeddingClient> = Arc::new(FailingEmbeddingClient);
        let store = SqliteToolStore::open_in_memory(Some(client), SearchSettings::default()).unwrap();
        let err = store.upsert_tools(&sample_tools()).await.unwrap_err();
        assert!(err.to_string().contains("generate embeddings"));
        assert!(store.list_tools().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_allow_list_skips_embedding_provider() {
        let client: Arc<dyn EmbeddingClient> =
            Arc::new(QueryFailingClient(FakeEmbeddingClient::new(16)));
        let store = SqliteToolStore::open_in_memory(Some(client), SearchSettings::default()).unwrap();
        store.upsert_tools(&sample_tools()).await.unwrap();
        assert!(store.search("github", &[]).await.unwrap().is_empty());
        assert!(store.search_semantic("github", &[], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancellation_stops_search() {
        let client: Arc<dyn EmbeddingClient> =
            Arc::new(SlowQueryClient(FakeEmbeddingClient::new(16)));
        let store = SqliteToolStore::open_in_memory(Some(client), SearchSettings::default()).unwrap();
        let tools = sample_tools();
        store.upsert_tools(&tools).await.unwrap();

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = store
            .search_with_cancellation("github", &all_names(&tools), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolStoreError::Cancelled));
    }

    #[tokio::test]
    async fn delete_removes_from_search() {
        let store = fts_store();
        let tools = sample_tools();
        store.upsert_tools(&tools).await.unwrap();

        let removed = store
            .delete_tools(&["slack_send_message".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.search("slack", &all_names(&tools)).await.unwrap().is_empty());
        assert_eq!(store.list_tools().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_further_use() {
        let store = fake_store(SearchSettings::default());
        store.upsert_tools(&sample_tools()).await.unwrap();
        store.close().unwrap();
        store.close().unwrap();

        let err = store
            .search("github", &["github_create_issue".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ToolStoreError::Closed));
        assert!(matches!(
            store.upsert_tools(&sample_tools()).await.unwrap_err(),
            ToolStoreError::Closed
        ));
    }

    #[tokio::test]
    async fn close_surfaces_client_error_once() {
        let client: Arc<dyn EmbeddingClient> = Arc::new(CloseFailingClient);
        let store = SqliteToolStore::open_in_memory(Some(client), SearchSettings::default()).unwrap();
        assert!(store.close().is_err());
        assert!(store.close().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_upserts_and_searches() {
        let store = fake_store(SearchSettings::default());
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let tool = ToolDefinition::new(format!("worker_{i}"), format!("Worker task number {i}"));
                store.upsert_tools(&[tool]).await.unwrap();
                let allowed: Vec<String> = (0..8).map(|j| format!("worker_{j}")).collect();
                store.search("worker task", &allowed).await.unwrap()
            }));
        }
        for h in handles {
            let results = h.await.unwrap();
            assert!(!results.is_empty());
        }
        assert_eq!(store.list_tools().await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn file_backed_store_persists() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("tools.db");

        let store = SqliteToolStore::open(&path, None, SearchSettings::default()).unwrap();
        store.upsert_tools(&sample_tools()).await.unwrap();
        store.close().unwrap();

        let reopened = SqliteToolStore::open(&path, None, SearchSettings::default()).unwrap();
        let results = reopened
            .search("slack", &all_names(&sample_tools()))
            .await
            .unwrap();
        assert_eq!(names(&results), ["slack_send_message"]);
    }

    #[tokio::test]
    async fn shutdown_closes_from_async_context() {
        let store = fake_store(SearchSettings::default());
        let tools = sample_tools();
        store.upsert_tools(&tools).await.unwrap();

        let searcher = store.clone();
        let allowed = all_names(&tools);
        let pending = tokio::spawn(async move { searcher.search("github", &allowed).await });
        store.shutdown().await.unwrap();
        store.shutdown().await.unwrap();

        // The racing search either finished first or saw the store closed.
        match pending.await.unwrap() {
            Ok(_) | Err(ToolStoreError::Closed) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            store.search("github", &all_names(&tools)).await.unwrap_err(),
            ToolStoreError::Closed
        ));
    }

    #[test]
    fn from_config_keeps_embedding_client_error_source() {
        let config = ValidatedConfig {
            embedding_service: Some("   ".into()),
            ..ValidatedConfig::default()
        };
        let err = SqliteToolStore::from_config(&config, None).unwrap_err();
        assert!(matches!(
            err,
            ToolStoreError::Embedding {
                context: "create embedding client",
                source: EmbeddingError::MissingEndpoint,
            }
        ));
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), EmbeddingError::MissingEndpoint.to_string());
    }

    #[tokio::test]
    async fn from_config_without_endpoint_is_fts_only() {
        let store = SqliteToolStore::from_config(&ValidatedConfig::default(), None).unwrap();
        assert!(!store.semantic_enabled());
        assert_eq!(*store.settings(), SearchSettings::default());
    }

    #[test]
    fn embedding_blob_round_trip() {
        let v = vec![0.1f32, -0.2, 0.3, 0.0, -1.0, 1.0];
        let blob = encode_embedding(&v);
        assert_eq!(blob.len(), 24);
        assert_eq!(decode_embedding(&blob), v);
    }

    #[test]
    fn embedding_text_format() {
        let tool = ToolDefinition::new("read_file", "Read a file");
        assert_eq!(embedding_text(&tool), "name: read_file description: Read a file");
    }
}
