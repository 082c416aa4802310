use crate::models::Chunk;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;

/// Upper bound on windows produced for one document.
pub const MAX_CHUNK_ITERATIONS: usize = 10_000;

const SENTENCE_DELIMITERS: [&str; 4] = [". ", "!\n", "? ", "\n\n"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size_tokens: usize,
    pub overlap_tokens: usize,
    pub max_chunks: Option<usize>,
    pub chars_per_token: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size_tokens: 500,
            overlap_tokens: 50,
            max_chunks: None,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }
}

impl ChunkingConfig {
    pub fn chunk_chars(&self) -> usize {
        self.chunk_size_tokens.saturating_mul(self.chars_per_token)
    }

    pub fn overlap_chars(&self) -> usize {
        self.overlap_tokens.saturating_mul(self.chars_per_token)
    }
}

/// Splits `text` into overlapping chunks of roughly `chunk_size_tokens` tokens.
///
/// Windows prefer to end right after a sentence delimiter found in their last
/// half. Empty input yields no chunks.
pub fn chunk_text(
    text: &str,
    chunk_size_tokens: usize,
    overlap_tokens: usize,
    max_chunks: Option<usize>,
) -> Vec<Chunk> {
    chunk_document(
        text,
        &ChunkingConfig {
            chunk_size_tokens,
            overlap_tokens,
            max_chunks,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        },
    )
}

pub fn chunk_document(text: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    let chunk_chars = config.chunk_chars();
    if text.is_empty() || chunk_chars == 0 {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let spans = sliding_windows(&chars, chunk_chars, config.overlap_chars(), config.max_chunks);
    let total_chunks = spans.len();

    spans
        .into_iter()
        .enumerate()
        .map(|(chunk_index, (start, end))| Chunk {
            content: chars[start..end].iter().collect(),
            start,
            end,
            chunk_index,
            total_chunks,
        })
        .collect()
}

fn sliding_windows(
    chars: &[char],
    chunk_chars: usize,
    overlap_chars: usize,
    max_chunks: Option<usize>,
) -> Vec<(usize, usize)> {
    let len = chars.len();
    let mut spans = Vec::new();
    let mut start = 0usize;

    while start < len {
        if max_chunks.is_some_and(|max| spans.len() >= max) {
            break;
        }
        if spans.len() >= MAX_CHUNK_ITERATIONS {
            warn!(
                limit = MAX_CHUNK_ITERATIONS,
                covered_chars = start,
                total_chars = len,
                "chunking stopped at iteration cap, remaining text is not indexed"
            );
            break;
        }

        let mut end = start.saturating_add(chunk_chars).min(len);
        if end < len {
            if let Some(boundary) = find_sentence_boundary(chars, start, end) {
                end = boundary;
            }
        }

        spans.push((start, end));
        if end >= len {
            break;
        }

        let next = end.saturating_sub(overlap_chars);
        start = if next > start { next } else { end };
    }

    spans
}

/// Position just past the last delimiter that sits in the second half of `start..end`.
fn find_sentence_boundary(chars: &[char], start: usize, end: usize) -> Option<usize> {
    let floor = start + (end - start) / 2;

    SENTENCE_DELIMITERS
        .iter()
        .filter_map(|delimiter| {
            let pattern: Vec<char> = delimiter.chars().collect();
            let last_start = end.checked_sub(pattern.len())?;
            (floor..=last_start)
                .rev()
                .find(|&at| chars[at..at + pattern.len()] == pattern[..])
                .map(|at| at + pattern.len())
        })
        .max()
        .filter(|&boundary| boundary > start)
}

/// Rough token count used for context budgeting.
pub fn estimate_tokens(text: &str) -> usize {
    estimate_tokens_for_chars(text.chars().count())
}

pub fn estimate_tokens_for_chars(chars: usize) -> usize {
    chars.div_ceil(DEFAULT_CHARS_PER_TOKEN)
}
