//! Record construction.
//!
//! Turns a chunk and its embedding into a [`Record`]. The index limits the
//! size of per-vector metadata, so the stored copy of the chunk text is
//! capped at `metadata_cap_bytes`; the vector is always computed from the
//! full text.

use chrono::Utc;

use crate::error::{PipelineError, Result};
use crate::ids::Slugifier;
use crate::models::{Chunk, Record, RecordMetadata};

/// Appended to stored text that was cut short.
pub const TRUNCATION_MARKER: &str = "... [truncated]";

/// A whitespace cut is only used if it keeps at least this share of the budget.
const MIN_KEEP_FRACTION: f64 = 0.8;

/// Builds records for one index.
#[derive(Debug, Clone)]
pub struct PayloadBuilder {
    dims: usize,
    metadata_cap_bytes: usize,
    slugifier: Slugifier,
}

impl PayloadBuilder {
    pub fn new(dims: usize, metadata_cap_bytes: usize, slugifier: Slugifier) -> Self {
        Self {
            dims,
            metadata_cap_bytes,
            slugifier,
        }
    }

    pub fn would_truncate(&self, text: &str) -> bool {
        text.len() > self.metadata_cap_bytes
    }

    /// Identifier this builder assigns to `chunk`.
    pub fn record_id(&self, chunk: &Chunk) -> String {
        self.slugifier
            .generate_id(&chunk.text, &chunk.document.path, chunk.index)
    }

    /// Build the record for `chunk`.
    ///
    /// Fails with [`PipelineError::DimensionMismatch`] when the vector does
    /// not have the index dimension.
    pub fn build(&self, chunk: &Chunk, vector: Vec<f32>) -> Result<Record> {
        if vector.len() != self.dims {
            return Err(PipelineError::DimensionMismatch {
                expected: self.dims,
                actual: vector.len(),
            });
        }

        let doc = &chunk.document;
        let (content, content_truncated) = cap_text(&chunk.text, self.metadata_cap_bytes);

        Ok(Record {
            id: self.record_id(chunk),
            vector,
            metadata: RecordMetadata {
                filename: doc.display_name.clone(),
                filepath: doc.path.display().to_string(),
                file_type: doc.source_type.as_str().to_string(),
                file_size: doc.size_bytes,
                file_modified: doc.modified_at.to_rfc3339(),
                chunk_index: chunk.index,
                total_chunks: chunk.total_chunks,
                content,
                content_truncated,
                word_count: chunk.text.split_whitespace().count(),
                char_count: chunk.text.chars().count(),
                processed_at: Utc::now().to_rfc3339(),
            },
        })
    }
}

/// Fit `text` into `cap` UTF-8 bytes, marker included.
///
/// Cuts at the last whitespace before the limit when that keeps at least
/// 80% of the budget, otherwise at the last character boundary.
pub fn cap_text(text: &str, cap: usize) -> (String, bool) {
    if text.len() <= cap {
        return (text.to_string(), false);
    }

    let budget = cap.saturating_sub(TRUNCATION_MARKER.len());
    let mut cut = budget.min(text.len());
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }

    let min_keep = (budget as f64 * MIN_KEEP_FRACTION) as usize;
    if let Some(ws) = text[..cut].rfind(char::is_whitespace) {
        if ws >= min_keep {
            cut = ws;
        }
    }

    let mut stored = text[..cut].trim_end().to_string();
    stored.push_str(TRUNCATION_MARKER);
    (stored, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Document, SourceType};
    use chrono::TimeZone;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn chunk(text: &str) -> Chunk {
        Chunk {
            document: Arc::new(Document {
                path: PathBuf::from("/docs/Team Sync.pdf"),
                display_name: "Team Sync.pdf".into(),
                raw_text: text.to_string(),
                source_type: SourceType::Pdf,
                size_bytes: 2048,
                modified_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            }),
            index: 2,
            text: text.to_string(),
            total_chunks: 5,
        }
    }

    #[test]
    fn test_build_record_metadata() {
        let builder = PayloadBuilder::new(3, 38_000, Slugifier::AsciiStripOnly);
        let record = builder.build(&chunk("alpha beta gamma"), vec![0.1, 0.2, 0.3]).unwrap();

        assert!(record.id.starts_with("Team-Sync_2_"));
        assert_eq!(record.vector, vec![0.1, 0.2, 0.3]);
        let m = &record.metadata;
        assert_eq!(m.filename, "Team Sync.pdf");
        assert_eq!(m.filepath, "/docs/Team Sync.pdf");
        assert_eq!(m.file_type, "pdf");
        assert_eq!(m.file_size, 2048);
        assert!(m.file_modified.starts_with("2024-05-01T12:00:00"));
        assert_eq!(m.chunk_index, 2);
        assert_eq!(m.total_chunks, 5);
        assert_eq!(m.content, "alpha beta gamma");
        assert!(!m.content_truncated);
        assert_eq!(m.word_count, 3);
        assert_eq!(m.char_count, 16);
        assert!(!m.processed_at.is_empty());
    }

    #[test]
    fn test_dimension_mismatch_is_fatal() {
        let builder = PayloadBuilder::new(4, 38_000, Slugifier::AsciiStripOnly);
        let err = builder.build(&chunk("x"), vec![0.0; 3]).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DimensionMismatch {
                expected: 4,
                actual: 3
            }
        ));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_truncation_at_whitespace() {
        let text = "word ".repeat(100);
        let (stored, truncated) = cap_text(&text, 100);
        assert!(truncated);
        assert!(stored.len() <= 100);
        assert!(stored.ends_with(TRUNCATION_MARKER));
        assert!(stored.trim_end_matches(TRUNCATION_MARKER).ends_with("word"));
    }

    #[test]
    fn test_truncation_without_nearby_whitespace() {
        let text = format!("short {}", "x".repeat(500));
        let (stored, truncated) = cap_text(&text, 100);
        assert!(truncated);
        assert_eq!(stored.len(), 100);
        assert!(stored.starts_with("short x"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let text = "é".repeat(300);
        let (stored, truncated) = cap_text(&text, 101);
        assert!(truncated);
        assert!(stored.len() <= 101);
        assert!(stored.starts_with('é'));
    }

    #[test]
    fn test_vector_unaffected_by_truncation() {
        let builder = PayloadBuilder::new(2, 256, Slugifier::AsciiStripOnly);
        let text = "lorem ipsum ".repeat(100);
        let record = builder.build(&chunk(&text), vec![1.0, 2.0]).unwrap();
        assert!(record.metadata.content_truncated);
        assert!(record.metadata.content.len() <= 256);
        assert_eq!(record.metadata.char_count, text.chars().count());
        assert_eq!(record.vector, vec![1.0, 2.0]);
    }

    #[test]
    fn test_text_at_cap_not_truncated() {
        let text = "a".repeat(256);
        let (stored, truncated) = cap_text(&text, 256);
        assert!(!truncated);
        assert_eq!(stored, text);
    }
}
