//! Text chunking.
//!
//! Splits document text into retrieval-sized passages. Two strategies are
//! available, selected by [`ChunkStrategy`]:
//!
//! - **Recursive**: character-budgeted. Splits on a prioritised list of
//!   separators (paragraph, line, space, punctuation, CJK punctuation,
//!   then single characters), keeps each separator attached to the piece
//!   that follows it, and merges pieces back into chunks of at most
//!   `chunk_size` characters with `chunk_overlap` characters repeated at
//!   every boundary. If the splitter rejects its input, the chunker falls
//!   back to [`split_fixed_width`].
//! - **Token**: token-budgeted. Accumulates blank-line paragraphs while
//!   the running chunk fits `max_tokens`, seeding each new chunk with the
//!   last `overlap_words` words of the previous one. A paragraph that is
//!   too large on its own is split on sentence boundaries with the same
//!   logic, and a sentence still over budget is cut into word windows.
//!
//! Every chunk returned has non-whitespace content. Text that already fits
//! the budget is returned unchanged as a single chunk.

use regex::Regex;
use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::warn;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, Document};
use crate::tokens::TokenCounter;

/// Separators tried in order by the recursive splitter. The empty string
/// means "split into characters".
pub const DEFAULT_SEPARATORS: &[&str] = &[
    "\n\n", "\n", " ", ".", ",", "\u{200b}", "\u{ff0c}", "\u{3001}", "\u{ff0e}", "\u{3002}", "",
];

/// Fraction of a fixed-width window searched for a natural break.
const BREAK_SEARCH_FRACTION: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStrategy {
    /// Character budget with separator-aware recursive splitting.
    Recursive {
        chunk_size: usize,
        chunk_overlap: usize,
    },
    /// Token budget with paragraph/sentence accumulation.
    Token {
        max_tokens: usize,
        overlap_words: usize,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("chunk size must be greater than zero")]
    ZeroSize,
    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({size})")]
    OverlapTooLarge { overlap: usize, size: usize },
    #[error("splitter produced no chunks from non-empty text")]
    NoOutput,
}

/// Splits documents into [`Chunk`]s using one strategy.
#[derive(Debug)]
pub struct Chunker {
    strategy: ChunkStrategy,
    counter: TokenCounter,
}

impl Chunker {
    pub fn new(strategy: ChunkStrategy, counter: TokenCounter) -> Self {
        Self { strategy, counter }
    }

    pub fn from_config(config: &ChunkingConfig) -> anyhow::Result<Self> {
        Ok(Self::new(
            config.strategy()?,
            TokenCounter::for_model(&config.token_model),
        ))
    }

    pub fn counter(&self) -> &TokenCounter {
        &self.counter
    }

    /// Split `text` into passages. Never fails; a rejected recursive split
    /// degrades to fixed-width windows.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        match self.strategy {
            ChunkStrategy::Token {
                max_tokens,
                overlap_words,
            } => split_by_tokens(text, max_tokens, overlap_words, &self.counter),
            ChunkStrategy::Recursive {
                chunk_size,
                chunk_overlap,
            } => match RecursiveSplitter::new(chunk_size, chunk_overlap)
                .and_then(|splitter| splitter.split(text))
            {
                Ok(chunks) => chunks,
                Err(e) => {
                    warn!(error = %e, "recursive split failed; using fixed-width fallback");
                    split_fixed_width(text, chunk_size, chunk_overlap)
                }
            },
        }
    }

    /// Chunk a document, numbering passages from 0.
    pub fn chunk_document(&self, document: Arc<Document>) -> Vec<Chunk> {
        let texts = self.chunk(&document.raw_text);
        let total = texts.len();
        texts
            .into_iter()
            .enumerate()
            .map(|(index, text)| Chunk {
                document: Arc::clone(&document),
                index,
                text,
                total_chunks: total,
            })
            .collect()
    }
}

// ============ Token strategy ============

/// Token-budgeted paragraph/sentence splitter with word-level overlap.
pub fn split_by_tokens(
    text: &str,
    max_tokens: usize,
    overlap_words: usize,
    counter: &TokenCounter,
) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    if counter.count(text) <= max_tokens {
        return vec![text.to_string()];
    }

    let mut acc = Accumulator::new(max_tokens, overlap_words, counter);

    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        if counter.count(paragraph) <= max_tokens {
            acc.push(paragraph, "\n\n");
            continue;
        }

        // Too large on its own: continue at sentence granularity.
        for (i, sentence) in split_sentences(paragraph).into_iter().enumerate() {
            let joiner = if i == 0 { "\n\n" } else { " " };
            if counter.count(sentence) <= max_tokens {
                acc.push(sentence, joiner);
                continue;
            }
            for (j, piece) in split_words_to_budget(sentence, max_tokens, counter)
                .iter()
                .enumerate()
            {
                acc.push(piece, if j == 0 { joiner } else { " " });
            }
        }
    }

    acc.finish()
}

/// Running-chunk state shared by paragraph and sentence accumulation.
struct Accumulator<'a> {
    max_tokens: usize,
    overlap_words: usize,
    counter: &'a TokenCounter,
    running: String,
    chunks: Vec<String>,
}

impl<'a> Accumulator<'a> {
    fn new(max_tokens: usize, overlap_words: usize, counter: &'a TokenCounter) -> Self {
        Self {
            max_tokens,
            overlap_words,
            counter,
            running: String::new(),
            chunks: Vec::new(),
        }
    }

    fn push(&mut self, piece: &str, joiner: &str) {
        if self.running.is_empty() {
            self.running = piece.to_string();
            return;
        }

        let candidate = format!("{}{}{}", self.running, joiner, piece);
        if self.counter.count(&candidate) <= self.max_tokens {
            self.running = candidate;
            return;
        }

        let emitted = std::mem::take(&mut self.running);
        let seed = tail_words(&emitted, self.overlap_words);
        self.emit(emitted);

        let seeded = if seed.is_empty() {
            piece.to_string()
        } else {
            format!("{}{}{}", seed, joiner, piece)
        };
        // Drop the overlap rather than start a chunk that is already over budget.
        self.running = if self.counter.count(&seeded) <= self.max_tokens {
            seeded
        } else {
            piece.to_string()
        };
    }

    fn emit(&mut self, text: String) {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            self.chunks.push(trimmed.to_string());
        }
    }

    fn finish(mut self) -> Vec<String> {
        let last = std::mem::take(&mut self.running);
        self.emit(last);
        self.chunks
    }
}

/// The last `n` whitespace-separated words of `text`, space-joined.
fn tail_words(text: &str, n: usize) -> String {
    if n == 0 {
        return String::new();
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    let start = words.len().saturating_sub(n);
    words[start..].join(" ")
}

/// Cut `text` into consecutive word windows of at most `max_tokens` each.
/// A word that is over budget by itself is cut between characters.
fn split_words_to_budget(text: &str, max_tokens: usize, counter: &TokenCounter) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut pieces = Vec::new();
    let mut start = 0;

    while start < words.len() {
        let (mut lo, mut hi) = (0usize, words.len() - start);
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            if counter.count(&words[start..start + mid].join(" ")) <= max_tokens {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }

        if lo == 0 {
            pieces.extend(split_chars_to_budget(words[start], max_tokens, counter));
            start += 1;
        } else {
            pieces.push(words[start..start + lo].join(" "));
            start += lo;
        }
    }
    pieces
}

/// Cut `word` into character runs of at most `max_tokens` each. Every run
/// holds at least one character.
fn split_chars_to_budget(word: &str, max_tokens: usize, counter: &TokenCounter) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest = word;

    while !rest.is_empty() {
        let ends: Vec<usize> = rest
            .char_indices()
            .map(|(i, _)| i)
            .skip(1)
            .chain(std::iter::once(rest.len()))
            .collect();

        let (mut lo, mut hi) = (1usize, ends.len());
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            if counter.count(&rest[..ends[mid - 1]]) <= max_tokens {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }

        let cut = ends[lo - 1];
        pieces.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }
    pieces
}

fn sentence_boundary() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]\s+").expect("sentence boundary regex is valid"))
}

/// Split after `.`, `!` or `?` followed by whitespace, keeping the punctuation.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in sentence_boundary().find_iter(text) {
        // The punctuation is a single ASCII byte.
        let end = m.start() + 1;
        sentences.push(&text[start..end]);
        start = m.end();
    }
    if start < text.len() {
        sentences.push(&text[start..]);
    }
    sentences
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

// ============ Recursive strategy ============

/// Character-budgeted splitter over a prioritised separator list.
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ChunkError> {
        Self::with_separators(chunk_size, chunk_overlap, DEFAULT_SEPARATORS)
    }

    pub fn with_separators(
        chunk_size: usize,
        chunk_overlap: usize,
        separators: &[&str],
    ) -> Result<Self, ChunkError> {
        if chunk_size == 0 {
            return Err(ChunkError::ZeroSize);
        }
        if chunk_overlap >= chunk_size {
            return Err(ChunkError::OverlapTooLarge {
                overlap: chunk_overlap,
                size: chunk_size,
            });
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: separators.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn split(&self, text: &str) -> Result<Vec<String>, ChunkError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        if char_len(text) <= self.chunk_size {
            return Ok(vec![text.to_string()]);
        }

        let chunks: Vec<String> = self
            .split_recursive(text, &self.separators)
            .into_iter()
            .filter(|c| !c.trim().is_empty())
            .collect();

        if chunks.is_empty() {
            return Err(ChunkError::NoOutput);
        }
        Ok(chunks)
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut remaining: &[String] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = "";
                break;
            }
            if text.contains(sep.as_str()) {
                separator = sep;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let mut out = Vec::new();
        let mut small: Vec<&str> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                small.push(piece);
                continue;
            }
            if !small.is_empty() {
                out.extend(self.merge(&small));
                small.clear();
            }
            if remaining.is_empty() {
                out.push(piece.to_string());
            } else {
                out.extend(self.split_recursive(piece, remaining));
            }
        }

        if !small.is_empty() {
            out.extend(self.merge(&small));
        }
        out
    }

    /// Greedily pack pieces into chunks, carrying up to `chunk_overlap`
    /// characters of trailing pieces into the next chunk.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !current.is_empty() {
                if total > self.chunk_size {
                    warn!(
                        size = total,
                        limit = self.chunk_size,
                        "created a chunk longer than the configured size"
                    );
                }
                if let Some(chunk) = join_trimmed(&current) {
                    chunks.push(chunk);
                }
                while total > self.chunk_overlap
                    || (total + len > self.chunk_size && total > 0)
                {
                    match current.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }
            current.push_back(piece);
            total += len;
        }

        if let Some(chunk) = join_trimmed(&current) {
            chunks.push(chunk);
        }
        chunks
    }
}

/// Split so each separator starts the piece that follows it. Empty pieces
/// are dropped; an empty separator splits into characters.
fn split_keeping_separator<'t>(text: &'t str, separator: &str) -> Vec<&'t str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > start {
            pieces.push(&text[start..idx]);
        }
        start = idx;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

fn join_trimmed(pieces: &VecDeque<&str>) -> Option<String> {
    let joined: String = pieces.iter().copied().collect();
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

// ============ Fixed-width fallback ============

/// Slide a `chunk_size`-character window across the text.
///
/// Each window tries to end just after the last space, newline or period in
/// its trailing 20%, so words are not cut in half. The next window starts
/// `chunk_overlap` characters before the previous one ended.
pub fn split_fixed_width(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let size = chunk_size.max(1);
    let overlap = chunk_overlap.min(size - 1);

    let offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    let byte_at = |i: usize| if i < n { offsets[i] } else { text.len() };

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < n {
        let mut end = (start + size).min(n);

        if end < n {
            let search_from = start + size - (size as f64 * BREAK_SEARCH_FRACTION) as usize;
            if let Some(pos) =
                (search_from..end).rev().find(|&i| matches!(chars[i], ' ' | '\n' | '.'))
            {
                end = pos + 1;
            }
        }

        let piece = text[byte_at(start)..byte_at(end)].trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }

        if end >= n {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }

    chunks
}
