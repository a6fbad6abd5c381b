//! Context assembly for answer generation.
//!
//! Greedily packs ranked passages into one labelled context string under a
//! token budget. Packing stops at the first passage that does not fit. The
//! top passage is always included, cut down to the budget if necessary, so
//! a non-empty retrieval never yields an empty context.

use crate::models::{ContextWindow, ScoredPassage};
use crate::tokens::TokenCounter;

/// Labelled block for the passage at 1-based `position`.
pub fn format_entry(position: usize, passage: &ScoredPassage) -> String {
    format!(
        "\n--- Source {}: {} ---\n{}\n",
        position,
        passage.source_label(),
        passage.metadata.content
    )
}

/// Assemble `passages` (already ranked, best first) into a context of at
/// most `budget` tokens.
pub fn assemble(passages: &[ScoredPassage], budget: usize, counter: &TokenCounter) -> ContextWindow {
    let mut window = ContextWindow::default();

    for (i, passage) in passages.iter().enumerate() {
        let entry = format_entry(i + 1, passage);
        let cost = counter.count(&entry);

        if window.token_count + cost > budget {
            if i == 0 {
                let (prefix, prefix_cost) = truncate_to_budget(&entry, budget, counter);
                window.text.push_str(prefix);
                window.token_count = prefix_cost;
                window.sources.push(passage.source_label());
            }
            break;
        }

        window.text.push_str(&entry);
        window.token_count += cost;
        window.sources.push(passage.source_label());
    }

    window
}

/// Longest character prefix of `text` costing at most `budget` tokens.
fn truncate_to_budget<'t>(
    text: &'t str,
    budget: usize,
    counter: &TokenCounter,
) -> (&'t str, usize) {
    let mut ends: Vec<usize> = text.char_indices().map(|(i, _)| i).skip(1).collect();
    ends.push(text.len());

    // Number of leading chars kept, found by binary search on the cost.
    let (mut lo, mut hi) = (0usize, ends.len());
    while lo < hi {
        let mid = (lo + hi + 1) / 2;
        if counter.count(&text[..ends[mid - 1]]) <= budget {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }

    // BPE counts are not strictly monotonic in prefix length.
    let mut keep = lo;
    loop {
        let prefix = if keep == 0 { "" } else { &text[..ends[keep - 1]] };
        let cost = counter.count(prefix);
        if cost <= budget || keep == 0 {
            return (prefix, cost);
        }
        keep -= 1;
    }
}
