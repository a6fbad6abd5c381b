//! Embedding service abstraction and batching.
//!
//! Defines the [`EmbeddingService`] trait, the OpenAI-compatible
//! [`OpenAiEmbeddings`] implementation, and [`embed_all`], which embeds a
//! list of texts in batches bounded by item count and by estimated tokens
//! (hosted APIs cap the tokens of one request). A failed batch does not abort the
//! run: each of its items comes back as [`EmbedOutcome::Failed`] so the
//! results stay aligned with the input.
//!
//! Also provides [`cosine_similarity`] for the in-memory index.

use std::ops::Range;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{require_env, EmbeddingConfig};
use crate::error::PipelineError;
use crate::http;
use crate::tokens::TokenCounter;

/// A text embedding backend.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(service: &dyn EmbeddingService, text: &str) -> Result<Vec<f32>> {
    let results = service.embed_batch(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

/// Per-item embedding result.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbedOutcome {
    Embedded(Vec<f32>),
    Failed(String),
}

impl EmbedOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, EmbedOutcome::Failed(_))
    }
}

/// Size limits for one embedding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_items: usize,
    pub max_tokens: usize,
}

impl BatchLimits {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            max_items: config.batch_size,
            max_tokens: config.max_batch_tokens,
        }
    }
}

/// Group consecutive items into batches that respect `limits`.
///
/// An item larger than `max_tokens` on its own gets a batch to itself.
pub fn plan_batches(token_counts: &[usize], limits: BatchLimits) -> Vec<Range<usize>> {
    let max_items = limits.max_items.max(1);
    let mut batches = Vec::new();
    let mut start = 0;
    let mut tokens = 0usize;

    for (i, &count) in token_counts.iter().enumerate() {
        let items = i - start;
        if items > 0 && (items == max_items || tokens.saturating_add(count) > limits.max_tokens) {
            batches.push(start..i);
            start = i;
            tokens = 0;
        }
        tokens = tokens.saturating_add(count);
    }
    if start < token_counts.len() {
        batches.push(start..token_counts.len());
    }
    batches
}

/// Embed `texts` in batches planned by [`plan_batches`], estimating each
/// text's size with `counter`.
///
/// The result has exactly one outcome per input. A batch that errors, or
/// returns the wrong number of vectors, marks every item in it as failed.
/// A vector of the wrong dimension is fatal.
pub async fn embed_all(
    service: &dyn EmbeddingService,
    texts: &[String],
    limits: BatchLimits,
    counter: &TokenCounter,
) -> std::result::Result<Vec<EmbedOutcome>, PipelineError> {
    let token_counts: Vec<usize> = texts.iter().map(|t| counter.count(t)).collect();
    let batches = plan_batches(&token_counts, limits);
    let total_batches = batches.len();
    let mut outcomes = Vec::with_capacity(texts.len());

    for (batch_no, range) in batches.into_iter().enumerate() {
        let batch = &texts[range];
        debug!(
            batch = batch_no + 1,
            total_batches,
            items = batch.len(),
            "embedding batch"
        );

        match service.embed_batch(batch).await {
            Ok(vectors) if vectors.len() == batch.len() => {
                for v in vectors {
                    if v.len() != service.dims() {
                        return Err(PipelineError::DimensionMismatch {
                            expected: service.dims(),
                            actual: v.len(),
                        });
                    }
                    outcomes.push(EmbedOutcome::Embedded(v));
                }
            }
            Ok(vectors) => {
                let reason = format!(
                    "expected {} embeddings, service returned {}",
                    batch.len(),
                    vectors.len()
                );
                warn!(batch = batch_no + 1, %reason, "embedding batch failed");
                outcomes.extend(batch.iter().map(|_| EmbedOutcome::Failed(reason.clone())));
            }
            Err(e) => {
                warn!(batch = batch_no + 1, error = %e, "embedding batch failed");
                let reason = format!("{:#}", e);
                outcomes.extend(batch.iter().map(|_| EmbedOutcome::Failed(reason.clone())));
            }
        }
    }

    Ok(outcomes)
}

// ============ OpenAI ============

/// Embedding service using the OpenAI API (or any compatible endpoint).
///
/// Calls `POST {url}/embeddings` with batching and retry/backoff. Requires
/// the `OPENAI_API_KEY` environment variable.
pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
}

impl OpenAiEmbeddings {
    /// Create a client from configuration, reading the key from the
    /// environment.
    pub fn new(config: &EmbeddingConfig) -> std::result::Result<Self, PipelineError> {
        let api_key = require_env("OPENAI_API_KEY")?;
        Ok(Self::with_api_key(config, api_key)?)
    }

    pub fn with_api_key(config: &EmbeddingConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            api_key,
            model: config.model.clone(),
            dims: config.dims,
            url: config.url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
        })
    }

    fn request_body(&self, texts: &[String]) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        // Only the v3 models accept a target dimension.
        if self.model.starts_with("text-embedding-3") {
            body["dimensions"] = serde_json::json!(self.dims);
        }
        body
    }
}

#[async_trait]
impl EmbeddingService for OpenAiEmbeddings {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = self.request_body(texts);
        let endpoint = format!("{}/embeddings", self.url);
        let json = http::send_json_with_retry("OpenAI embeddings", self.max_retries, || {
            self.client
                .post(&endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;

        parse_openai_response(&json).context("Invalid OpenAI embeddings response")
    }
}

/// Extract the `data[].embedding` arrays, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());

    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("missing embedding"))?;

        let mut vec = Vec::with_capacity(embedding.len());
        for v in embedding {
            match v.as_f64() {
                Some(f) => vec.push(f as f32),
                None => bail!("non-numeric embedding value: {}", v),
            }
        }

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors or vectors
/// of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns `[len, 1.0]` per text; fails the batches listed in `fail_on`.
    struct ScriptedEmbedder {
        calls: AtomicUsize,
        fail_on: Vec<usize>,
        dims: usize,
    }

    impl ScriptedEmbedder {
        fn new(fail_on: Vec<usize>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on,
                dims: 2,
            }
        }
    }

    #[async_trait]
    impl EmbeddingService for ScriptedEmbedder {
        fn model_name(&self) -> &str {
            "scripted"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on.contains(&call) {
                bail!("simulated outage on batch {}", call);
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| "x".repeat(i + 1)).collect()
    }

    fn items(max_items: usize) -> BatchLimits {
        BatchLimits {
            max_items,
            max_tokens: usize::MAX,
        }
    }

    #[test]
    fn test_plan_batches_by_items() {
        assert_eq!(plan_batches(&[1, 1, 1, 1, 1], items(2)), vec![0..2, 2..4, 4..5]);
        assert!(plan_batches(&[], items(2)).is_empty());
    }

    #[test]
    fn test_plan_batches_by_tokens() {
        let limits = BatchLimits {
            max_items: 100,
            max_tokens: 10,
        };
        // 4+4 fits, a third 4 would not; 12 exceeds the cap alone and still gets sent.
        assert_eq!(
            plan_batches(&[4, 4, 4, 12, 3, 3], limits),
            vec![0..2, 2..3, 3..4, 4..6]
        );
    }

    #[tokio::test]
    async fn test_embed_all_splits_on_token_budget() {
        let svc = ScriptedEmbedder::new(vec![]);
        let long: Vec<String> = (0..4).map(|_| vec!["word"; 100].join(" ")).collect();
        let limits = BatchLimits {
            max_items: 100,
            max_tokens: 300,
        };
        // 130 tokens each under the heuristic: two per request.
        let out = embed_all(&svc, &long, limits, &TokenCounter::heuristic())
            .await
            .unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(svc.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_embed_all_batches_in_order() {
        let svc = ScriptedEmbedder::new(vec![]);
        let out = embed_all(&svc, &texts(5), items(2), &TokenCounter::heuristic()).await.unwrap();
        assert_eq!(svc.calls.load(Ordering::SeqCst), 3);
        assert_eq!(out.len(), 5);
        for (i, o) in out.iter().enumerate() {
            assert_eq!(o, &EmbedOutcome::Embedded(vec![(i + 1) as f32, 1.0]));
        }
    }

    #[tokio::test]
    async fn test_failed_batch_marks_only_its_items() {
        let svc = ScriptedEmbedder::new(vec![2]);
        let out = embed_all(&svc, &texts(6), items(2), &TokenCounter::heuristic()).await.unwrap();
        let failed: Vec<bool> = out.iter().map(EmbedOutcome::is_failed).collect();
        assert_eq!(failed, vec![false, false, true, true, false, false]);
        match &out[2] {
            EmbedOutcome::Failed(reason) => assert!(reason.contains("simulated outage")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_fatal() {
        let mut svc = ScriptedEmbedder::new(vec![]);
        svc.dims = 3;
        let err = embed_all(&svc, &texts(1), items(10), &TokenCounter::heuristic()).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_embed_all_empty() {
        let svc = ScriptedEmbedder::new(vec![]);
        assert!(embed_all(&svc, &[], items(10), &TokenCounter::heuristic()).await.unwrap().is_empty());
        assert_eq!(svc.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_embed_query() {
        let svc = ScriptedEmbedder::new(vec![]);
        assert_eq!(embed_query(&svc, "abc").await.unwrap(), vec![3.0, 1.0]);
    }

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.5, 0.5]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vecs = parse_openai_response(&json).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0], vec![0.5, 0.5]]);
    }

    #[test]
    fn test_parse_openai_response_rejects_garbage() {
        assert!(parse_openai_response(&serde_json::json!({"error": "nope"})).is_err());
        assert!(parse_openai_response(&serde_json::json!({
            "data": [{"index": 0, "embedding": ["a"]}]
        }))
        .is_err());
    }

    #[test]
    fn test_request_body_dimensions() {
        let mut config = EmbeddingConfig::default();
        let svc = OpenAiEmbeddings::with_api_key(&config, "k".into()).unwrap();
        let body = svc.request_body(&["a".to_string()]);
        assert_eq!(body["dimensions"], 1536);

        config.model = "text-embedding-ada-002".into();
        let svc = OpenAiEmbeddings::with_api_key(&config, "k".into()).unwrap();
        assert!(svc.request_body(&["a".to_string()]).get("dimensions").is_none());
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }
}
