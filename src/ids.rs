//! Record identifiers.
//!
//! Every chunk is stored under `"{slug}_{index}_{hash}"`, where `slug` is an
//! ASCII-safe form of the source file stem and `hash` is the first 12 hex
//! characters of the SHA-256 of the chunk text. Identical inputs always give
//! identical identifiers, so re-ingesting a document overwrites its records
//! instead of duplicating them.

use sha2::{Digest, Sha256};
use std::path::Path;

/// Longest slug kept in an identifier.
pub const MAX_SLUG_LEN: usize = 64;

/// Slug used when nothing ASCII survives.
pub const PLACEHOLDER_SLUG: &str = "file";

const HASH_LEN: usize = 12;

/// How non-ASCII file names are turned into slugs. Chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slugifier {
    /// Transliterate to ASCII first (`"会议记录"` → `"Hui-Yi-Ji-Lu"`).
    WithTransliteration,
    /// Replace every non-ASCII character with a separator.
    AsciiStripOnly,
}

impl Slugifier {
    /// The best variant this build supports.
    pub fn detect() -> Self {
        if cfg!(feature = "transliterate") {
            Slugifier::WithTransliteration
        } else {
            Slugifier::AsciiStripOnly
        }
    }

    pub fn slug(&self, stem: &str) -> String {
        let ascii = match self {
            Slugifier::WithTransliteration => transliterate(stem),
            Slugifier::AsciiStripOnly => stem.to_string(),
        };
        sanitize(&ascii)
    }

    /// Identifier for chunk `chunk_index` of `source_path`.
    pub fn generate_id(&self, chunk_text: &str, source_path: &Path, chunk_index: usize) -> String {
        let stem = source_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!(
            "{}_{}_{}",
            self.slug(&stem),
            chunk_index,
            content_hash(chunk_text)
        )
    }
}

#[cfg(feature = "transliterate")]
fn transliterate(s: &str) -> String {
    deunicode::deunicode(s)
}

#[cfg(not(feature = "transliterate"))]
fn transliterate(s: &str) -> String {
    s.to_string()
}

fn is_slug_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-')
}

fn is_edge_separator(c: char) -> bool {
    matches!(c, '.' | '_' | ':' | '-')
}

/// Map disallowed characters to `-`, collapse runs, trim edges, cap length.
fn sanitize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        let c = if is_slug_char(c) { c } else { '-' };
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }

    let trimmed = out.trim_matches(is_edge_separator);
    // Only ASCII remains, so byte slicing is safe.
    let capped = &trimmed[..trimmed.len().min(MAX_SLUG_LEN)];
    let capped = capped.trim_end_matches(is_edge_separator);

    if capped.is_empty() {
        PLACEHOLDER_SLUG.to_string()
    } else {
        capped.to_string()
    }
}

/// First 12 hex characters of the SHA-256 of `text`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())[..HASH_LEN].to_string()
}

/// Whether `id` can be persisted as a record identifier.
pub fn is_valid_identifier(id: &str) -> bool {
    !id.is_empty() && id.chars().all(is_slug_char)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_id_format() {
        let id = Slugifier::AsciiStripOnly.generate_id(
            "hello world",
            &PathBuf::from("/docs/Quarterly Report.pdf"),
            3,
        );
        assert!(id.starts_with("Quarterly-Report_3_"));
        assert_eq!(id.len(), "Quarterly-Report_3_".len() + 12);
        assert!(is_valid_identifier(&id));
    }

    #[test]
    fn test_id_deterministic() {
        let path = PathBuf::from("notes/meeting.md");
        let a = Slugifier::detect().generate_id("same text", &path, 0);
        let b = Slugifier::detect().generate_id("same text", &path, 0);
        assert_eq!(a, b);
        let c = Slugifier::detect().generate_id("other text", &path, 0);
        assert_ne!(a, c);
    }

    #[test]
    fn test_content_hash_is_sha256_prefix() {
        // sha256("abc") = ba7816bf8f01cfea...
        assert_eq!(content_hash("abc"), "ba7816bf8f01");
    }

    #[test]
    fn test_non_ascii_without_transliteration_uses_placeholder() {
        assert_eq!(Slugifier::AsciiStripOnly.slug("会议记录"), "file");
        assert_eq!(Slugifier::AsciiStripOnly.slug("résumé 2024"), "r-sum-2024");
    }

    #[cfg(feature = "transliterate")]
    #[test]
    fn test_transliteration() {
        let slug = Slugifier::WithTransliteration.slug("会议记录");
        assert!(slug.is_ascii());
        assert_ne!(slug, PLACEHOLDER_SLUG);
        assert!(slug.contains("Hui"), "unexpected slug {}", slug);
        assert!(slug.chars().all(is_slug_char));
        assert_eq!(Slugifier::WithTransliteration.slug("résumé"), "resume");
    }

    #[test]
    fn test_slug_collapses_and_trims() {
        let s = Slugifier::AsciiStripOnly;
        assert_eq!(s.slug("  a   b  "), "a-b");
        assert_eq!(s.slug("--x--"), "x");
        assert_eq!(s.slug("v1.2:final"), "v1.2:final");
        assert_eq!(s.slug(""), "file");
        assert_eq!(s.slug("!!!"), "file");
    }

    #[test]
    fn test_slug_truncated() {
        let long = "a".repeat(200);
        assert_eq!(Slugifier::AsciiStripOnly.slug(&long).len(), MAX_SLUG_LEN);
    }

    #[test]
    fn test_every_id_char_allowed() {
        for name in ["a b.pdf", "Ünïcödé.txt", "файл.docx", "😀.md", "x/y\\z.txt", ".hidden"] {
            for slugifier in [Slugifier::AsciiStripOnly, Slugifier::detect()] {
                let id = slugifier.generate_id("text", &PathBuf::from(name), 7);
                assert!(is_valid_identifier(&id), "{} -> {}", name, id);
            }
        }
    }

    #[test]
    fn test_is_valid_identifier() {
        assert!(is_valid_identifier("a-b_1_abc"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("a b"));
        assert!(!is_valid_identifier("ü"));
    }
}
