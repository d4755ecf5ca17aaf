//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token. The
//! approximation is accurate within ~10% for BPE tokenizers on English
//! text, which is plenty for budget packing decisions.

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

/// Truncate text to roughly `max_tokens`, keeping the start.
pub fn truncate_head(text: &str, max_tokens: usize) -> String {
    let max_chars = max_tokens * 4;
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

/// Truncate text to roughly `max_tokens`, keeping the end. Used for
/// append-only content where the newest material matters most.
pub fn truncate_tail(text: &str, max_tokens: usize) -> String {
    let max_chars = max_tokens * 4;
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    text.chars().skip(total - max_chars).collect()
}
