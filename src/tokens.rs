//! Token-count estimation.
//!
//! Uses the model's BPE encoding via `tiktoken-rs` when the model is
//! recognised and falls back to `round(words × 1.3)` otherwise. Counts are
//! only used for budgeting, so callers must tolerate estimation error.

use tiktoken_rs::CoreBPE;
use tracing::debug;

/// Words-to-tokens ratio used when no exact tokenizer is available.
const TOKENS_PER_WORD: f64 = 1.3;

/// Token counter bound to a single model.
///
/// Loading a BPE table is expensive, so construct one counter per model and
/// reuse it.
pub struct TokenCounter {
    bpe: Option<CoreBPE>,
}

impl TokenCounter {
    /// Exact counter for `model`, or the word heuristic if the model is
    /// unknown to the tokenizer.
    pub fn for_model(model: &str) -> Self {
        match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => Self { bpe: Some(bpe) },
            Err(e) => {
                debug!(model, error = %e, "no exact tokenizer; using word heuristic");
                Self::heuristic()
            }
        }
    }

    /// Counter that always uses the word heuristic.
    pub fn heuristic() -> Self {
        Self { bpe: None }
    }

    pub fn is_exact(&self) -> bool {
        self.bpe.is_some()
    }

    /// Estimated token count of `text`. Never fails.
    pub fn count(&self, text: &str) -> usize {
        match &self.bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => estimate_from_words(text),
        }
    }
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter")
            .field("exact", &self.is_exact())
            .finish()
    }
}

/// One-shot token count for `model`.
///
/// Prefer [`TokenCounter`] when counting many strings.
pub fn count_tokens(text: &str, model: &str) -> usize {
    TokenCounter::for_model(model).count(text)
}

fn estimate_from_words(text: &str) -> usize {
    let words = text.split_whitespace().count();
    (words as f64 * TOKENS_PER_WORD).round() as usize
}
