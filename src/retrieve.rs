//! Query-time retrieval: embed the question, search the index.

use std::sync::Arc;

use tracing::debug;

use crate::embedding::{embed_query, EmbeddingService};
use crate::error::{PipelineError, Result};
use crate::index::{verify_index, VectorIndex};
use crate::models::ScoredPassage;

pub struct Retriever {
    embedder: Arc<dyn EmbeddingService>,
    index: Arc<dyn VectorIndex>,
    dims: usize,
    namespace: Option<String>,
}

impl Retriever {
    /// `dims` is the index dimension; query vectors must match it.
    pub fn new(
        embedder: Arc<dyn EmbeddingService>,
        index: Arc<dyn VectorIndex>,
        dims: usize,
        namespace: Option<String>,
    ) -> Self {
        Self {
            embedder,
            index,
            dims,
            namespace,
        }
    }

    /// Verify `index_name` and build a retriever for it.
    ///
    /// A missing or unready index, or one whose dimension differs from the
    /// embedder's, is a fatal error here rather than a failed question later.
    pub async fn connect(
        embedder: Arc<dyn EmbeddingService>,
        index: Arc<dyn VectorIndex>,
        index_name: &str,
        namespace: Option<String>,
    ) -> Result<Self> {
        let desc = verify_index(index.as_ref(), index_name, embedder.dims()).await?;
        let dims = desc.dimension.unwrap_or_else(|| embedder.dims());
        debug!(index = index_name, dims, "index verified");
        Ok(Self::new(embedder, index, dims, namespace))
    }

    /// The `top_k` passages most similar to `query`, highest score first.
    ///
    /// An index with no matching vectors yields an empty list. Embedding or
    /// search failures are [`PipelineError::Service`]; a query vector of
    /// the wrong dimension is fatal.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredPassage>> {
        if top_k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let vector = embed_query(self.embedder.as_ref(), query).await?;
        if vector.len() != self.dims {
            return Err(PipelineError::DimensionMismatch {
                expected: self.dims,
                actual: vector.len(),
            });
        }

        let mut hits = self
            .index
            .query(&vector, top_k, self.namespace.as_deref())
            .await?;

        // Callers rely on descending order; don't trust the service for it.
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);

        debug!(hits = hits.len(), top_k, "retrieved passages");
        Ok(hits)
    }
}
