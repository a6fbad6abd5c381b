//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow: discovery → extraction → chunking →
//! embedding → record building → upload. Extraction and embedding
//! failures are counted and skipped; a missing index, a dimension mismatch
//! or an invalid identifier stops the run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, info_span, warn, Instrument};

use crate::chunk::Chunker;
use crate::config::Config;
use crate::embedding::{embed_all, BatchLimits, EmbedOutcome, EmbeddingService};
use crate::error::Result;
use crate::extract::{read_document, Extractor, FsExtractor};
use crate::index::{verify_index, IndexDescription, VectorIndex};
use crate::models::{Chunk, Document, Record};
use crate::payload::PayloadBuilder;
use crate::upload::{upload, BatchFailure};

/// Number of example identifiers kept in the summary.
const SAMPLE_IDS: usize = 3;

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestSummary {
    pub files_found: usize,
    pub files_processed: usize,
    pub files_skipped: usize,
    pub chunks_created: usize,
    pub chunks_embedded: usize,
    pub chunks_uploaded: usize,
    pub chunks_truncated: usize,
    pub chunks_failed: usize,
    pub sample_ids: Vec<String>,
    pub upload_failures: Vec<BatchFailure>,
}

impl IngestSummary {
    /// Whether every upload batch was accepted by the index.
    pub fn upload_complete(&self) -> bool {
        self.upload_failures.is_empty()
    }
}

/// The local half of ingestion: extraction, chunking and record shaping.
/// Needs no network access.
pub struct DocumentPipeline {
    chunker: Chunker,
    payload: PayloadBuilder,
    extractor: Box<dyn Extractor>,
}

impl DocumentPipeline {
    pub fn new(chunker: Chunker, payload: PayloadBuilder) -> Self {
        Self {
            chunker,
            payload,
            extractor: Box::new(FsExtractor),
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self::new(
            Chunker::from_config(&config.chunking)?,
            PayloadBuilder::new(
                config.embedding.dims,
                config.payload.metadata_cap_bytes,
                config.payload.slugifier(),
            ),
        ))
    }

    pub fn with_extractor(mut self, extractor: Box<dyn Extractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    pub fn payload(&self) -> &PayloadBuilder {
        &self.payload
    }

    /// Extract one file. Unreadable or empty files are logged and skipped.
    pub fn load(&self, path: &Path) -> Option<Arc<Document>> {
        match read_document(self.extractor.as_ref(), path) {
            Ok(Some(doc)) => {
                info!(
                    file = %doc.display_name,
                    source_type = %doc.source_type,
                    words = doc.raw_text.split_whitespace().count(),
                    chars = doc.raw_text.chars().count(),
                    tokens = self.chunker.counter().count(&doc.raw_text),
                    "extracted document"
                );
                Some(Arc::new(doc))
            }
            Ok(None) => {
                warn!(file = %path.display(), "no content extracted; skipping");
                None
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "extraction failed; skipping");
                None
            }
        }
    }

    /// Extract and chunk every file.
    pub fn chunk_files(&self, paths: &[PathBuf], summary: &mut IngestSummary) -> Vec<Chunk> {
        summary.files_found += paths.len();
        let mut chunks = Vec::new();

        for path in paths {
            let Some(doc) = self.load(path) else {
                summary.files_skipped += 1;
                continue;
            };

            let doc_chunks = self.chunker.chunk_document(doc);
            if doc_chunks.is_empty() {
                warn!(file = %path.display(), "document produced no chunks; skipping");
                summary.files_skipped += 1;
                continue;
            }

            info!(file = %path.display(), chunks = doc_chunks.len(), "chunked document");
            summary.files_processed += 1;
            summary.chunks_created += doc_chunks.len();
            chunks.extend(doc_chunks);
        }

        chunks
    }

    /// Chunk everything and report what an upload would do, without
    /// embedding or uploading anything.
    pub fn plan(&self, paths: &[PathBuf]) -> IngestSummary {
        let mut summary = IngestSummary::default();
        let chunks = self.chunk_files(paths, &mut summary);

        summary.chunks_truncated = chunks
            .iter()
            .filter(|c| self.payload.would_truncate(&c.text))
            .count();
        summary.sample_ids = chunks
            .iter()
            .take(SAMPLE_IDS)
            .map(|c| self.payload.record_id(c))
            .collect();
        summary
    }
}

/// Runs ingestion against live embedding and index services.
pub struct Ingestor {
    documents: DocumentPipeline,
    embedder: Arc<dyn EmbeddingService>,
    index: Arc<dyn VectorIndex>,
    index_name: String,
    namespace: Option<String>,
    embed_limits: BatchLimits,
    upload_batch_size: usize,
}

impl Ingestor {
    pub fn new(
        config: &Config,
        documents: DocumentPipeline,
        embedder: Arc<dyn EmbeddingService>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            documents,
            embedder,
            index,
            index_name: config.index.name.clone(),
            namespace: config.index.namespace.clone(),
            embed_limits: BatchLimits::from_config(&config.embedding),
            upload_batch_size: config.upload.batch_size,
        }
    }

    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    /// Check the index exists, is ready, and has the embedding dimension.
    pub async fn verify_index(&self) -> Result<IndexDescription> {
        verify_index(
            self.index.as_ref(),
            &self.index_name,
            self.embedder.dims(),
        )
        .await
    }

    /// Ingest `paths` into the index.
    pub async fn run(&self, paths: &[PathBuf]) -> Result<IngestSummary> {
        let span = info_span!("ingest", index = %self.index_name, files = paths.len());
        self.run_inner(paths).instrument(span).await
    }

    async fn run_inner(&self, paths: &[PathBuf]) -> Result<IngestSummary> {
        self.verify_index().await?;

        let mut summary = IngestSummary::default();
        let chunks = self.documents.chunk_files(paths, &mut summary);
        if chunks.is_empty() {
            warn!("nothing to embed");
            return Ok(summary);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        info!(chunks = texts.len(), model = self.embedder.model_name(), "embedding chunks");
        let outcomes = embed_all(
            self.embedder.as_ref(),
            &texts,
            self.embed_limits,
            self.documents.chunker().counter(),
        )
        .await?;

        let mut records: Vec<Record> = Vec::with_capacity(chunks.len());
        for (chunk, outcome) in chunks.iter().zip(outcomes) {
            match outcome {
                EmbedOutcome::Embedded(vector) => {
                    let record = self.documents.payload().build(chunk, vector)?;
                    if record.metadata.content_truncated {
                        summary.chunks_truncated += 1;
                    }
                    records.push(record);
                }
                EmbedOutcome::Failed(reason) => {
                    warn!(
                        file = %chunk.document.display_name,
                        chunk = chunk.index,
                        %reason,
                        "chunk not embedded"
                    );
                    summary.chunks_failed += 1;
                }
            }
        }
        summary.chunks_embedded = records.len();
        summary.sample_ids = records
            .iter()
            .take(SAMPLE_IDS)
            .map(|r| r.id.clone())
            .collect();

        let report = upload(
            self.index.as_ref(),
            &records,
            self.upload_batch_size,
            self.namespace.as_deref(),
        )
        .await?;

        summary.chunks_uploaded = report.uploaded;
        summary.chunks_failed += report.failed_records();
        summary.upload_failures = report.failures;

        info!(
            processed = summary.files_processed,
            uploaded = summary.chunks_uploaded,
            failed = summary.chunks_failed,
            "ingest finished"
        );
        Ok(summary)
    }
}
