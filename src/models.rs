//! Core data models used throughout docvec.
//!
//! These types represent the documents, chunks, index records, and retrieved
//! passages that flow through the ingestion and question-answering pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Extraction family a document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Pdf,
    Word,
    Text,
}

impl SourceType {
    /// Classify by file extension (case-insensitive, without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(SourceType::Pdf),
            "docx" | "doc" => Some(SourceType::Word),
            "txt" | "md" | "rtf" => Some(SourceType::Text),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Pdf => "pdf",
            SourceType::Word => "word",
            SourceType::Text => "text",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An extracted document, produced once and consumed by the chunker.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: PathBuf,
    pub display_name: String,
    pub raw_text: String,
    pub source_type: SourceType,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
}

/// A positional slice of a document's text.
///
/// Text of adjacent chunks may overlap; identity never does.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub document: Arc<Document>,
    pub index: usize,
    pub text: String,
    pub total_chunks: usize,
}

/// Metadata persisted alongside each vector.
///
/// Field names are the wire schema shared with every reader of the index,
/// so they must not change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordMetadata {
    pub filename: String,
    pub filepath: String,
    pub file_type: String,
    #[serde(deserialize_with = "lenient_count")]
    pub file_size: u64,
    /// ISO-8601.
    pub file_modified: String,
    #[serde(deserialize_with = "lenient_count")]
    pub chunk_index: usize,
    #[serde(deserialize_with = "lenient_count")]
    pub total_chunks: usize,
    pub content: String,
    pub content_truncated: bool,
    #[serde(deserialize_with = "lenient_count")]
    pub word_count: usize,
    #[serde(deserialize_with = "lenient_count")]
    pub char_count: usize,
    /// ISO-8601.
    pub processed_at: String,
}

/// Index services store every number as a float, so counts may come back
/// as `3.0`.
fn lenient_count<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: TryFrom<u64>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let n = match &value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64)),
        serde_json::Value::Null => Some(0),
        _ => None,
    };
    n.and_then(|n| T::try_from(n).ok())
        .ok_or_else(|| serde::de::Error::custom(format!("expected a count, got {}", value)))
}

/// One vector plus its metadata, ready for upsert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub id: String,
    #[serde(rename = "values")]
    pub vector: Vec<f32>,
    pub metadata: RecordMetadata,
}

/// A similarity-search hit. Callers receive these most-similar first.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPassage {
    pub id: String,
    pub score: f32,
    pub metadata: RecordMetadata,
}

impl ScoredPassage {
    /// Provenance label, e.g. `"notes.pdf (chunk 3)"`.
    pub fn source_label(&self) -> String {
        let filename = if self.metadata.filename.is_empty() {
            "Unknown"
        } else {
            self.metadata.filename.as_str()
        };
        format!("{} (chunk {})", filename, self.metadata.chunk_index)
    }
}

/// Retrieved text assembled for a single question. Never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextWindow {
    pub text: String,
    pub sources: Vec<String>,
    pub token_count: usize,
}

impl ContextWindow {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
