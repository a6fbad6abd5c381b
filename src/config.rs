//! TOML configuration.
//!
//! Everything the pipeline needs (index name, models, thresholds) lives in
//! one [`Config`] value that is loaded once and passed into the
//! constructors. Every section has defaults, so only `[index].name` is
//! required.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::chunk::ChunkStrategy;
use crate::error::PipelineError;
use crate::ids::Slugifier;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub payload: PayloadConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub answer: AnswerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    /// Data-plane host. Resolved through `describe_index` when absent.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_control_url")]
    pub control_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_control_url() -> String {
    "https://api.pinecone.io".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Estimated token ceiling for one embedding request. Batches close
    /// early when the next text would exceed it.
    #[serde(default = "default_max_batch_tokens")]
    pub max_batch_tokens: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_openai_url")]
    pub url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_batch_tokens: default_max_batch_tokens(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: default_openai_url(),
        }
    }
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_batch_size() -> usize {
    100
}
fn default_max_batch_tokens() -> usize {
    300_000
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_openai_url() -> String {
    "https://api.openai.com/v1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// `"recursive"` (character budget) or `"token"` (paragraph/sentence).
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap_words")]
    pub overlap_words: usize,
    /// Tokenizer used by the token strategy.
    #[serde(default = "default_embedding_model")]
    pub token_model: String,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_tokens: default_max_tokens(),
            overlap_words: default_overlap_words(),
            token_model: default_embedding_model(),
        }
    }
}

fn default_strategy() -> String {
    "recursive".to_string()
}
fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_max_tokens() -> usize {
    8000
}
fn default_overlap_words() -> usize {
    200
}

impl ChunkingConfig {
    pub fn strategy(&self) -> Result<ChunkStrategy> {
        match self.strategy.as_str() {
            "recursive" => Ok(ChunkStrategy::Recursive {
                chunk_size: self.chunk_size,
                chunk_overlap: self.chunk_overlap,
            }),
            "token" => Ok(ChunkStrategy::Token {
                max_tokens: self.max_tokens,
                overlap_words: self.overlap_words,
            }),
            other => bail!(
                "Unknown chunking strategy: '{}'. Must be recursive or token.",
                other
            ),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PayloadConfig {
    #[serde(default = "default_metadata_cap")]
    pub metadata_cap_bytes: usize,
    #[serde(default = "default_transliterate")]
    pub transliterate: bool,
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            metadata_cap_bytes: default_metadata_cap(),
            transliterate: default_transliterate(),
        }
    }
}

fn default_metadata_cap() -> usize {
    38_000
}
fn default_transliterate() -> bool {
    true
}

impl PayloadConfig {
    /// Picks the slug variant once, at startup.
    pub fn slugifier(&self) -> Slugifier {
        if self.transliterate {
            Slugifier::detect()
        } else {
            Slugifier::AsciiStripOnly
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_context_tokens: default_max_context_tokens(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_max_context_tokens() -> usize {
    8000
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnswerConfig {
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_answer_max_tokens")]
    pub max_tokens: u32,
    /// What the knowledge base is about; woven into the prompts.
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default = "default_openai_url")]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            model: default_chat_model(),
            temperature: default_temperature(),
            max_tokens: default_answer_max_tokens(),
            subject: default_subject(),
            url: default_openai_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_answer_max_tokens() -> u32 {
    1000
}
fn default_subject() -> String {
    "your documents".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_folder")]
    pub folder: PathBuf,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            folder: default_folder(),
            extensions: default_extensions(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_folder() -> PathBuf {
    PathBuf::from("./docs")
}

fn default_extensions() -> Vec<String> {
    ["pdf", "docx", "doc", "txt", "md", "rtf"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Config {
    /// Config with defaults everywhere; used by commands that never touch
    /// the remote services (`chunk`, `ingest --dry-run`).
    pub fn minimal(index_name: &str) -> Self {
        Self {
            index: IndexConfig {
                name: index_name.to_string(),
                namespace: None,
                host: None,
                control_url: default_control_url(),
                timeout_secs: default_timeout_secs(),
            },
            embedding: EmbeddingConfig::default(),
            chunking: ChunkingConfig::default(),
            payload: PayloadConfig::default(),
            upload: UploadConfig::default(),
            retrieval: RetrievalConfig::default(),
            answer: AnswerConfig::default(),
            ingest: IngestConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.index.name.trim().is_empty() {
            bail!("index.name must not be empty");
        }
        if let Some(ns) = &self.index.namespace {
            if !ns.is_ascii() {
                bail!("index.namespace must be ASCII: {:?}", ns);
            }
        }

        if self.embedding.dims == 0 {
            bail!("embedding.dims must be > 0");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        if self.embedding.max_batch_tokens == 0 {
            bail!("embedding.max_batch_tokens must be > 0");
        }
        if self.upload.batch_size == 0 {
            bail!("upload.batch_size must be > 0");
        }

        self.chunking.strategy()?;
        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            bail!(
                "chunking.chunk_overlap ({}) must be less than chunking.chunk_size ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }
        if self.chunking.max_tokens == 0 {
            bail!("chunking.max_tokens must be > 0");
        }

        if self.payload.metadata_cap_bytes < 256 {
            bail!("payload.metadata_cap_bytes must be >= 256");
        }

        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be > 0");
        }
        if self.retrieval.max_context_tokens == 0 {
            bail!("retrieval.max_context_tokens must be > 0");
        }

        if !(0.0..=2.0).contains(&self.answer.temperature) {
            bail!("answer.temperature must be in [0.0, 2.0]");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

/// Read a credential from the environment.
pub fn require_env(var: &'static str) -> std::result::Result<String, PipelineError> {
    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(PipelineError::MissingCredential(var)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_minimal_file_gets_defaults() {
        let config = parse("[index]\nname = \"notes\"\n").unwrap();
        assert_eq!(config.index.name, "notes");
        assert_eq!(config.embedding.model, "text-embedding-3-small");
        assert_eq!(config.embedding.dims, 1536);
        assert_eq!(config.upload.batch_size, 100);
        assert_eq!(config.embedding.max_batch_tokens, 300_000);
        assert_eq!(config.payload.metadata_cap_bytes, 38_000);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.max_context_tokens, 8000);
        assert_eq!(config.answer.model, "gpt-4o-mini");
        assert!(config.ingest.extensions.contains(&"pdf".to_string()));
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let err = parse(
            "[index]\nname = \"notes\"\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn test_zero_batch_token_cap_rejected() {
        let err = parse("[index]\nname = \"notes\"\n[embedding]\nmax_batch_tokens = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_batch_tokens"));
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let err =
            parse("[index]\nname = \"notes\"\n[chunking]\nstrategy = \"semantic\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown chunking strategy"));
    }

    #[test]
    fn test_non_ascii_namespace_rejected() {
        let err = parse("[index]\nname = \"notes\"\nnamespace = \"会议\"\n").unwrap_err();
        assert!(err.to_string().contains("namespace"));
    }

    #[test]
    fn test_token_strategy_selected() {
        let config = parse(
            "[index]\nname = \"notes\"\n[chunking]\nstrategy = \"token\"\nmax_tokens = 500\noverlap_words = 20\n",
        )
        .unwrap();
        assert_eq!(
            config.chunking.strategy().unwrap(),
            ChunkStrategy::Token {
                max_tokens: 500,
                overlap_words: 20
            }
        );
    }

    #[test]
    fn test_ascii_only_slugifier_when_disabled() {
        let config = parse("[index]\nname = \"notes\"\n[payload]\ntransliterate = false\n").unwrap();
        assert_eq!(config.payload.slugifier(), Slugifier::AsciiStripOnly);
    }

    #[test]
    fn test_require_env_missing() {
        let err = require_env("DOCVEC_TEST_SURELY_UNSET_VAR").unwrap_err();
        assert!(matches!(err, PipelineError::MissingCredential(_)));
    }
}
