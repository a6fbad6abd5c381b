//! Error taxonomy for the ingestion and query pipelines.
//!
//! Most plumbing code uses `anyhow`, but the pipeline has to tell a
//! *fatal* condition (one that would silently corrupt the index if the run
//! continued) from a *recoverable* one (a single batch or question failed).
//! [`PipelineError`] carries that distinction so callers can branch on it
//! instead of string-matching messages.

use thiserror::Error;

/// Errors surfaced by the core pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// An embedding's length disagrees with the configured index dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// An identifier that must be ASCII contained a non-ASCII codepoint.
    #[error("invalid identifier (must be ASCII): {0:?}")]
    InvalidIdentifier(String),

    /// The configured index does not exist.
    #[error("index '{name}' not found (available: {})", display_names(.available))]
    IndexNotFound { name: String, available: Vec<String> },

    /// The index exists but is not ready to serve requests.
    #[error("index '{0}' is not ready")]
    IndexNotReady(String),

    /// A required credential is missing from the environment.
    #[error("{0} environment variable not set")]
    MissingCredential(&'static str),

    /// The configuration is internally inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// A remote call (embedding, search, upsert, completion) failed.
    #[error(transparent)]
    Service(#[from] anyhow::Error),
}

impl PipelineError {
    /// Whether the run must stop immediately.
    ///
    /// Service failures are scoped to a batch or a question; everything else
    /// indicates a misconfigured pipeline.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PipelineError::Service(_))
    }
}

fn display_names(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
