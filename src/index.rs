//! Vector index abstraction.
//!
//! Defines the [`VectorIndex`] trait and two implementations:
//! - **[`PineconeIndex`]**: the hosted Pinecone REST API (control plane
//!   for listing/describing indexes, data plane for upsert/query).
//! - **[`InMemoryIndex`]**: brute-force cosine search behind an `RwLock`,
//!   for tests and embedding the library without a hosted index.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::{require_env, IndexConfig};
use crate::embedding::cosine_similarity;
use crate::error::PipelineError;
use crate::http;
use crate::models::{Record, RecordMetadata, ScoredPassage};

/// What the control plane reports about one index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDescription {
    pub name: String,
    pub dimension: Option<usize>,
    pub ready: bool,
    pub host: Option<String>,
}

/// A similarity-searchable store of [`Record`]s.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite `records` by id. Returns the number stored.
    async fn upsert(&self, records: &[Record], namespace: Option<&str>) -> Result<usize>;

    /// The `top_k` nearest records to `vector`, most similar first.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: Option<&str>,
    ) -> Result<Vec<ScoredPassage>>;

    async fn list_indexes(&self) -> Result<Vec<String>>;

    async fn describe_index(&self, name: &str) -> Result<IndexDescription>;
}

/// Fail unless `name` is listed, ready, and (when reported) has `dims`
/// dimensions.
pub async fn verify_index(
    index: &dyn VectorIndex,
    name: &str,
    dims: usize,
) -> std::result::Result<IndexDescription, PipelineError> {
    let available = index.list_indexes().await?;
    if !available.iter().any(|n| n == name) {
        return Err(PipelineError::IndexNotFound {
            name: name.to_string(),
            available,
        });
    }

    let desc = index.describe_index(name).await?;
    if !desc.ready {
        return Err(PipelineError::IndexNotReady(name.to_string()));
    }
    if let Some(actual) = desc.dimension {
        if actual != dims {
            return Err(PipelineError::DimensionMismatch {
                expected: dims,
                actual,
            });
        }
    }
    Ok(desc)
}

// ============ Pinecone ============

const PINECONE_API_VERSION: &str = "2024-07";
const PINECONE_MAX_RETRIES: u32 = 3;

/// Client for one Pinecone index.
///
/// The data-plane host is taken from `index.host` when configured,
/// otherwise resolved once through `describe_index`.
pub struct PineconeIndex {
    client: reqwest::Client,
    api_key: String,
    name: String,
    control_url: String,
    host: OnceCell<String>,
}

impl PineconeIndex {
    /// Create a client from configuration, reading `PINECONE_API_KEY` from
    /// the environment.
    pub fn new(config: &IndexConfig) -> std::result::Result<Self, PipelineError> {
        let api_key = require_env("PINECONE_API_KEY")?;
        Ok(Self::with_api_key(config, api_key)?)
    }

    pub fn with_api_key(config: &IndexConfig, api_key: String) -> Result<Self> {
        let host = match &config.host {
            Some(h) => OnceCell::new_with(Some(data_plane_url(h))),
            None => OnceCell::new(),
        };
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            api_key,
            name: config.name.clone(),
            control_url: config.control_url.trim_end_matches('/').to_string(),
            host,
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", PINECONE_API_VERSION)
    }

    fn post(&self, url: &str, body: &serde_json::Value) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", PINECONE_API_VERSION)
            .json(body)
    }

    async fn data_plane(&self) -> Result<&str> {
        let host = self
            .host
            .get_or_try_init(|| async {
                let desc = self.describe_index(&self.name).await?;
                let host = desc
                    .host
                    .ok_or_else(|| anyhow::anyhow!("index '{}' has no host", self.name))?;
                debug!(index = %self.name, %host, "resolved index host");
                Ok::<_, anyhow::Error>(data_plane_url(&host))
            })
            .await?;
        Ok(host.as_str())
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn upsert(&self, records: &[Record], namespace: Option<&str>) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let url = format!("{}/vectors/upsert", self.data_plane().await?);
        let mut body = serde_json::json!({ "vectors": records });
        if let Some(ns) = namespace {
            body["namespace"] = serde_json::json!(ns);
        }

        let json = http::send_json_with_retry("Pinecone upsert", PINECONE_MAX_RETRIES, || {
            self.post(&url, &body)
        })
        .await?;

        Ok(json
            .get("upsertedCount")
            .and_then(|c| c.as_u64())
            .map(|c| c as usize)
            .unwrap_or(records.len()))
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: Option<&str>,
    ) -> Result<Vec<ScoredPassage>> {
        let url = format!("{}/query", self.data_plane().await?);
        let mut body = serde_json::json!({
            "vector": vector,
            "topK": top_k,
            "includeMetadata": true,
            "includeValues": false,
        });
        if let Some(ns) = namespace {
            body["namespace"] = serde_json::json!(ns);
        }

        let json = http::send_json_with_retry("Pinecone query", PINECONE_MAX_RETRIES, || {
            self.post(&url, &body)
        })
        .await?;

        parse_query_response(json)
    }

    async fn list_indexes(&self) -> Result<Vec<String>> {
        let url = format!("{}/indexes", self.control_url);
        let json = http::send_json_with_retry("Pinecone list indexes", PINECONE_MAX_RETRIES, || {
            self.get(&url)
        })
        .await?;
        let list: IndexList =
            serde_json::from_value(json).context("Invalid Pinecone index list")?;
        Ok(list.indexes.into_iter().map(|i| i.name).collect())
    }

    async fn describe_index(&self, name: &str) -> Result<IndexDescription> {
        let url = format!("{}/indexes/{}", self.control_url, name);
        let json = http::send_json_with_retry("Pinecone describe index", PINECONE_MAX_RETRIES, || {
            self.get(&url)
        })
        .await?;
        let model: IndexModel =
            serde_json::from_value(json).context("Invalid Pinecone index description")?;
        Ok(model.into())
    }
}

#[derive(Debug, Deserialize)]
struct IndexList {
    #[serde(default)]
    indexes: Vec<IndexModel>,
}

#[derive(Debug, Deserialize)]
struct IndexModel {
    name: String,
    #[serde(default)]
    dimension: Option<usize>,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    status: IndexStatus,
}

#[derive(Debug, Default, Deserialize)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
}

impl From<IndexModel> for IndexDescription {
    fn from(m: IndexModel) -> Self {
        Self {
            name: m.name,
            dimension: m.dimension,
            ready: m.status.ready,
            host: m.host,
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<RecordMetadata>,
}

fn parse_query_response(json: serde_json::Value) -> Result<Vec<ScoredPassage>> {
    let resp: QueryResponse =
        serde_json::from_value(json).context("Invalid Pinecone query response")?;
    Ok(resp
        .matches
        .into_iter()
        .map(|m| ScoredPassage {
            id: m.id,
            score: m.score,
            metadata: m.metadata.unwrap_or_default(),
        })
        .collect())
}

/// Hosts come back without a scheme; local emulators use plain http.
fn data_plane_url(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

// ============ In-memory ============

/// In-memory index, namespaced, with upsert-by-id semantics.
pub struct InMemoryIndex {
    name: String,
    dims: Option<usize>,
    namespaces: RwLock<HashMap<String, HashMap<String, Record>>>,
}

impl InMemoryIndex {
    pub fn new(name: &str, dims: Option<usize>) -> Self {
        Self {
            name: name.to_string(),
            dims,
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    /// Number of records stored in `namespace`.
    pub fn len(&self, namespace: Option<&str>) -> usize {
        self.namespaces
            .read()
            .map(|ns| ns.get(namespace.unwrap_or_default()).map_or(0, HashMap::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, namespace: Option<&str>) -> bool {
        self.len(namespace) == 0
    }

    /// Stored record with `id`, if any.
    pub fn get(&self, id: &str, namespace: Option<&str>) -> Option<Record> {
        self.namespaces
            .read()
            .ok()?
            .get(namespace.unwrap_or_default())?
            .get(id)
            .cloned()
    }
}

impl InMemoryIndex {
    /// Vector length of any stored record, for indexes created without a
    /// fixed dimension.
    fn stored_dimension(&self) -> Option<usize> {
        let namespaces = self.namespaces.read().ok()?;
        namespaces
            .values()
            .flat_map(|ns| ns.values())
            .map(|r| r.vector.len())
            .next()
    }
}

fn lock_poisoned<T>(_: T) -> anyhow::Error {
    anyhow::anyhow!("in-memory index lock poisoned")
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(&self, records: &[Record], namespace: Option<&str>) -> Result<usize> {
        let mut namespaces = self.namespaces.write().map_err(lock_poisoned)?;
        let ns = namespaces
            .entry(namespace.unwrap_or_default().to_string())
            .or_default();
        for r in records {
            ns.insert(r.id.clone(), r.clone());
        }
        Ok(records.len())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: Option<&str>,
    ) -> Result<Vec<ScoredPassage>> {
        let namespaces = self.namespaces.read().map_err(lock_poisoned)?;
        let Some(ns) = namespaces.get(namespace.unwrap_or_default()) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<ScoredPassage> = ns
            .values()
            .map(|r| ScoredPassage {
                id: r.id.clone(),
                score: cosine_similarity(vector, &r.vector),
                metadata: r.metadata.clone(),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn list_indexes(&self) -> Result<Vec<String>> {
        Ok(vec![self.name.clone()])
    }

    async fn describe_index(&self, name: &str) -> Result<IndexDescription> {
        if name != self.name {
            anyhow::bail!("index '{}' not found", name);
        }
        Ok(IndexDescription {
            name: self.name.clone(),
            dimension: self.dims.or_else(|| self.stored_dimension()),
            ready: true,
            host: None,
        })
    }
}
