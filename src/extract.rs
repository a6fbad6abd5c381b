//! Document discovery and text extraction.
//!
//! [`discover_files`] walks the ingest folder and returns the files whose
//! extension is configured. An [`Extractor`] turns one file into plain
//! text; [`FsExtractor`] handles PDF, Word (OOXML) and text formats.
//! Extraction never panics: failures come back as [`ExtractError`] and the
//! ingest loop skips the file.

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use walkdir::WalkDir;

use crate::config::IngestConfig;
use crate::models::{Document, SourceType};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("Word extraction failed: {0}")]
    Ooxml(String),
}

/// Text pulled out of one file.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub text: String,
    pub source_type: SourceType,
}

/// Turns a file into text. Empty text means "no content".
pub trait Extractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<Extracted, ExtractError>;
}

/// Extractor for local files, dispatching on the file extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsExtractor;

impl Extractor for FsExtractor {
    fn extract(&self, path: &Path) -> Result<Extracted, ExtractError> {
        let ext = extension_of(path);
        let source_type = SourceType::from_extension(&ext)
            .ok_or_else(|| ExtractError::Unsupported(format!(".{}", ext)))?;
        let bytes = std::fs::read(path)?;

        let text = match source_type {
            SourceType::Pdf => extract_pdf(&bytes)?,
            SourceType::Word => extract_docx(&bytes)?,
            SourceType::Text => decode_text(&bytes),
        };

        Ok(Extracted { text, source_type })
    }
}

/// Extract `path` into a [`Document`].
///
/// Returns `Ok(None)` when the file has no text content.
pub fn read_document(
    extractor: &dyn Extractor,
    path: &Path,
) -> Result<Option<Document>, ExtractError> {
    let extracted = extractor.extract(path)?;
    if extracted.text.trim().is_empty() {
        return Ok(None);
    }

    let meta = std::fs::metadata(path)?;
    let modified_at: DateTime<Utc> = meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let display_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    Ok(Some(Document {
        path: path.to_path_buf(),
        display_name,
        raw_text: extracted.text,
        source_type: extracted.source_type,
        size_bytes: meta.len(),
        modified_at,
    }))
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

// ============ Discovery ============

/// Every file under `config.folder` with a configured extension, sorted
/// and deduplicated.
pub fn discover_files(config: &IngestConfig) -> anyhow::Result<Vec<PathBuf>> {
    let root = &config.folder;
    if !root.is_dir() {
        anyhow::bail!("Folder does not exist: {}", root.display());
    }

    let extensions: BTreeSet<String> = config
        .extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
        .collect();

    let mut excludes = vec!["**/.git/**".to_string()];
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut files = BTreeSet::new();

    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable path");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if exclude_set.is_match(relative) {
            continue;
        }
        if !extensions.contains(&extension_of(path)) {
            continue;
        }

        // Symlinked directories can reach the same file twice.
        let resolved = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        files.insert(resolved);
    }

    Ok(files.into_iter().collect())
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

// ============ Formats ============

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    paragraphs_from_document_xml(&doc_xml)
}

/// Concatenate `<w:t>` runs, one line per `<w:p>` paragraph.
fn paragraphs_from_document_xml(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text = true;
                }
            }
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" => out.push('\n'),
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

/// Decode text as UTF-8, then UTF-16 (when a BOM says so), then Latin-1.
pub fn decode_text(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_string();
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return decode_utf16(rest, u16::from_le_bytes);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return decode_utf16(rest, u16::from_be_bytes);
    }
    bytes.iter().map(|&b| b as char).collect()
}

fn decode_utf16(bytes: &[u8], to_unit: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| to_unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn docx_bytes(document_xml: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file(
                "word/document.xml",
                zip::write::SimpleFileOptions::default(),
            )
            .unwrap();
        writer.write_all(document_xml.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_decode_utf8() {
        assert_eq!(decode_text("héllo".as_bytes()), "héllo");
        assert_eq!(decode_text(b"\xEF\xBB\xBFhi"), "hi");
    }

    #[test]
    fn test_decode_utf16_bom() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "会议".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(decode_text(&bytes), "会议");
    }

    #[test]
    fn test_decode_latin1_fallback() {
        assert_eq!(decode_text(b"caf\xE9"), "café");
    }

    #[test]
    fn test_docx_paragraphs() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
<w:body>
<w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t xml:space="preserve"> world &amp; co</w:t></w:r></w:p>
<w:p><w:r><w:t>Second</w:t><w:tab/><w:t>line</w:t></w:r></w:p>
</w:body>
</w:document>"#;
        let text = extract_docx(&docx_bytes(xml)).unwrap();
        assert_eq!(text, "Hello world & co\nSecond\tline\n");
    }

    #[test]
    fn test_invalid_binaries_return_errors() {
        assert!(matches!(extract_pdf(b"not a pdf"), Err(ExtractError::Pdf(_))));
        assert!(matches!(extract_docx(b"not a zip"), Err(ExtractError::Ooxml(_))));
    }

    #[test]
    fn test_fs_extractor_text_and_unsupported() {
        let dir = TempDir::new().unwrap();
        let note = dir.path().join("note.MD");
        std::fs::write(&note, "# Title\n\nBody").unwrap();
        let out = FsExtractor.extract(&note).unwrap();
        assert_eq!(out.source_type, SourceType::Text);
        assert_eq!(out.text, "# Title\n\nBody");

        let sheet = dir.path().join("data.xlsx");
        std::fs::write(&sheet, "x").unwrap();
        assert!(matches!(
            FsExtractor.extract(&sheet),
            Err(ExtractError::Unsupported(_))
        ));
    }

    #[test]
    fn test_read_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("minutes.txt");
        std::fs::write(&path, "Agreed to ship on Friday.").unwrap();
        let doc = read_document(&FsExtractor, &path).unwrap().unwrap();
        assert_eq!(doc.display_name, "minutes.txt");
        assert_eq!(doc.size_bytes, 25);
        assert_eq!(doc.source_type, SourceType::Text);

        let empty = dir.path().join("empty.txt");
        std::fs::write(&empty, "  \n ").unwrap();
        assert!(read_document(&FsExtractor, &empty).unwrap().is_none());
    }

    #[test]
    fn test_discover_files_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::create_dir_all(root.join("drafts")).unwrap();
        std::fs::write(root.join("b.txt"), "b").unwrap();
        std::fs::write(root.join("A.PDF"), "a").unwrap();
        std::fs::write(root.join("sub/c.docx"), "c").unwrap();
        std::fs::write(root.join("skip.xlsx"), "x").unwrap();
        std::fs::write(root.join("drafts/d.md"), "d").unwrap();

        let config = IngestConfig {
            folder: root.to_path_buf(),
            exclude_globs: vec!["drafts/**".to_string()],
            ..IngestConfig::default()
        };
        let files = discover_files(&config).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 3);
        assert!(names.contains(&"A.PDF".to_string()));
        assert!(names.contains(&"b.txt".to_string()));
        assert!(names.contains(&"c.docx".to_string()));
        let mut sorted = files.clone();
        sorted.sort();
        assert_eq!(files, sorted);
    }

    #[test]
    fn test_discover_missing_folder() {
        let config = IngestConfig {
            folder: PathBuf::from("/definitely/not/here"),
            ..IngestConfig::default()
        };
        assert!(discover_files(&config).is_err());
    }
}
