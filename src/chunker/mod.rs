//! Token-window chunker (§4.5). Splits extracted text into overlapping windows of
//! roughly `chunk_size` tokens, preferring the extractor's soft-break offsets as split
//! points within a ±10% window. Pure function of its inputs: no AST, no language
//! awareness, no hidden state — the same text and settings always yield the same
//! chunk boundaries and ordinals.

use sha2::{Digest, Sha256};

use crate::extract::ExtractedText;

/// A contiguous slice of a file's extracted text, identified by `(file_path, ordinal)`
/// once the caller attaches a path. `ordinal` is dense and stable across re-chunking of
/// unchanged text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub ordinal: u32,
    pub text: String,
    pub token_count: u32,
    pub char_start: u64,
    pub char_end: u64,
    /// SHA-256 of `text`, used as the embedding cache key so re-chunking unchanged
    /// content reuses a cached embedding instead of re-running inference.
    pub hash: String,
}

impl Chunk {
    fn new(ordinal: u32, text: String, token_count: u32, char_start: u64, char_end: u64) -> Self {
        let hash = Self::compute_hash(&text);
        Self {
            ordinal,
            text,
            token_count,
            char_start,
            char_end,
            hash,
        }
    }

    pub fn compute_hash(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Token boundary source. The embedder wires in the real model tokenizer at indexing
/// time so `token_count`/chunk boundaries agree with what will actually be truncated at
/// embed time; tests and any caller without a loaded model fall back to
/// [`WhitespaceTokenizer`].
pub trait Tokenizer: Send + Sync {
    /// Byte offsets in `text`, one past the end of each token, in order. The gap
    /// between consecutive offsets (and before the first / after the last) is
    /// inter-token whitespace/punctuation.
    fn token_boundaries(&self, text: &str) -> Vec<usize>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    fn token_boundaries(&self, text: &str) -> Vec<usize> {
        let mut bounds = Vec::new();
        let mut in_token = false;
        for (i, ch) in text.char_indices() {
            if ch.is_whitespace() {
                if in_token {
                    bounds.push(i);
                    in_token = false;
                }
            } else if !in_token {
                in_token = true;
            }
        }
        if in_token {
            bounds.push(text.len());
        }
        bounds
    }
}

/// Split `extracted.text` into token-window chunks of `chunk_size` tokens with
/// `overlap` tokens of overlap between consecutive chunks. Soft-break offsets in
/// `extracted.soft_breaks` are preferred as the end of a chunk when one falls within a
/// ±10% token window around the target boundary. Returns an empty vector for empty
/// text (the empty-file edge case: `indexed`, `chunk_count = 0`, no vectors).
pub fn chunk_text(
    extracted: &ExtractedText,
    tokenizer: &dyn Tokenizer,
    chunk_size: usize,
    overlap: usize,
) -> Vec<Chunk> {
    let text = &extracted.text;
    let boundaries = tokenizer.token_boundaries(text);
    let total_tokens = boundaries.len();
    if total_tokens == 0 {
        return Vec::new();
    }

    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size.saturating_sub(1));
    let window = (chunk_size / 10).max(1);

    let mut chunks = Vec::new();
    let mut start_token = 0usize;
    let mut ordinal = 0u32;

    while start_token < total_tokens {
        let target = (start_token + chunk_size).min(total_tokens);
        let end_token = if target < total_tokens {
            best_soft_break(&boundaries, extracted, start_token, target, total_tokens, window)
                .unwrap_or(target)
        } else {
            target
        };

        let char_start = if start_token == 0 {
            0
        } else {
            boundaries[start_token - 1]
        };
        let char_end = boundaries[end_token - 1];

        chunks.push(Chunk::new(
            ordinal,
            text[char_start..char_end].to_string(),
            (end_token - start_token) as u32,
            char_start as u64,
            char_end as u64,
        ));
        ordinal += 1;

        if end_token >= total_tokens {
            break;
        }

        let mut next_start = end_token.saturating_sub(overlap);
        if next_start <= start_token {
            next_start = start_token + 1;
        }
        start_token = next_start;
    }

    chunks
}

/// Look for a soft break in the inter-token gap around `target`, within `window`
/// tokens either side, and return the token index whose boundary should end the chunk.
/// Ties broken by proximity to `target` in token space.
fn best_soft_break(
    boundaries: &[usize],
    extracted: &ExtractedText,
    start_token: usize,
    target: usize,
    total_tokens: usize,
    window: usize,
) -> Option<usize> {
    if extracted.soft_breaks.is_empty() {
        return None;
    }

    let lo = target.saturating_sub(window).max(start_token + 1);
    let hi = (target + window).min(total_tokens);

    let mut best: Option<(usize, usize)> = None;
    for idx in lo..=hi {
        let gap_start = boundaries[idx - 1];
        let gap_end = if idx < total_tokens {
            boundaries[idx]
        } else {
            boundaries[idx - 1]
        };
        let hits = extracted
            .soft_breaks
            .iter()
            .any(|&b| b >= gap_start && b <= gap_end);
        if hits {
            let distance = idx.abs_diff(target);
            if best.is_none_or(|(_, d)| distance < d) {
                best = Some((idx, distance));
            }
        }
    }

    best.map(|(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extracted(text: &str, soft_breaks: Vec<usize>) -> ExtractedText {
        ExtractedText {
            text: text.to_string(),
            soft_breaks,
        }
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        let chunks = chunk_text(&extracted("", vec![]), &WhitespaceTokenizer, 512, 50);
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_exact_chunk_size_is_one_chunk() {
        let words: Vec<String> = (0..512).map(|i| format!("w{i}")).collect();
        let text = words.join(" ");
        let chunks = chunk_text(&extracted(&text, vec![]), &WhitespaceTokenizer, 512, 50);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].token_count, 512);
        assert_eq!(chunks[0].char_start, 0);
        assert_eq!(chunks[0].char_end, text.len() as u64);
    }

    #[test]
    fn test_ordinals_are_dense_and_contiguous() {
        let words: Vec<String> = (0..1500).map(|i| format!("w{i}")).collect();
        let text = words.join(" ");
        let chunks = chunk_text(&extracted(&text, vec![]), &WhitespaceTokenizer, 512, 50);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.ordinal, i as u32);
        }
        assert_eq!(chunks.last().unwrap().char_end, text.len() as u64);
    }

    #[test]
    fn test_overlap_reuses_trailing_tokens() {
        let words: Vec<String> = (0..1200).map(|i| format!("w{i}")).collect();
        let text = words.join(" ");
        let chunks = chunk_text(&extracted(&text, vec![]), &WhitespaceTokenizer, 512, 50);
        assert!(chunks[0].char_end > chunks[1].char_start);
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let words: Vec<String> = (0..900).map(|i| format!("word{i}")).collect();
        let text = words.join(" ");
        let a = chunk_text(&extracted(&text, vec![]), &WhitespaceTokenizer, 512, 50);
        let b = chunk_text(&extracted(&text, vec![]), &WhitespaceTokenizer, 512, 50);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.char_start, y.char_start);
            assert_eq!(x.char_end, y.char_end);
            assert_eq!(x.hash, y.hash);
        }
    }

    #[test]
    fn test_soft_break_preferred_within_window() {
        // A paragraph break sits just inside the window before the raw token target.
        let before: Vec<String> = (0..480).map(|i| format!("a{i}")).collect();
        let after: Vec<String> = (0..200).map(|i| format!("b{i}")).collect();
        let text = format!("{}\n\n{}", before.join(" "), after.join(" "));
        let break_offset = before.join(" ").len() + 1;
        let extracted = extracted(&text, vec![break_offset]);

        let chunks = chunk_text(&extracted, &WhitespaceTokenizer, 512, 50);
        assert_eq!(chunks[0].char_end, break_offset as u64 + 1);
    }

    #[test]
    fn test_whitespace_tokenizer_counts_words() {
        let bounds = WhitespaceTokenizer.token_boundaries("alpha beta  gamma");
        assert_eq!(bounds.len(), 3);
    }
}
