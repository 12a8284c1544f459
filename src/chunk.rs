//! Overlapping passage splitter.
//!
//! Cuts a source's text into fixed-size character windows that advance by
//! `chunk_size - chunk_overlap`, so every pair of consecutive passages
//! shares exactly `chunk_overlap` characters and no context is lost at a
//! passage boundary. Sizes are counted in Unicode scalar values, never
//! bytes, so multi-byte text is never split inside a character.
//!
//! For a text of `L` characters with size `S` and overlap `O`:
//!
//! ```text
//! passages = 1                        if 0 < L <= S
//!          = ceil((L - O) / (S - O))  if L > S
//! ```
//!
//! Each passage receives a deterministic UUID derived from its source's
//! content hash and its position, plus a SHA-256 of its own text.
//!
//! # Example
//!
//! ```rust
//! use context_chat::chunk::split_windows;
//!
//! let windows = split_windows("abcdefghij", 4, 2);
//! assert_eq!(windows, vec!["abcd", "cdef", "efgh", "ghij"]);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Passage;

/// Split `text` into overlapping windows of `size` characters.
///
/// Returns an empty vector for blank text. An `overlap` not smaller than
/// `size` is clamped to `size - 1`.
pub fn split_windows(text: &str, size: usize, overlap: usize) -> Vec<&str> {
    if text.trim().is_empty() || size == 0 {
        return Vec::new();
    }
    let overlap = overlap.min(size - 1);
    let stride = size - overlap;

    // Byte offset of every char start, plus the end of the string.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let len = bounds.len() - 1;

    let mut windows = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + size).min(len);
        windows.push(&text[bounds[start]..bounds[end]]);
        if end == len {
            break;
        }
        start += stride;
    }
    windows
}

/// Split a source's text into [`Passage`]s with empty embeddings.
///
/// Positions are contiguous starting at 0.
pub fn chunk_source(
    source: &str,
    content_hash: &str,
    text: &str,
    size: usize,
    overlap: usize,
) -> Vec<Passage> {
    split_windows(text, size, overlap)
        .into_iter()
        .enumerate()
        .map(|(i, window)| make_passage(source, content_hash, i as i64, window))
        .collect()
}

/// Number of passages [`split_windows`] yields for `char_len` characters.
pub fn expected_passages(char_len: usize, size: usize, overlap: usize) -> usize {
    if char_len == 0 {
        return 0;
    }
    if char_len <= size {
        return 1;
    }
    let stride = size - overlap;
    (char_len - overlap).div_ceil(stride)
}

fn make_passage(source: &str, content_hash: &str, position: i64, text: &str) -> Passage {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let name = format!("{}:{}", content_hash, position);
    let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string();

    Passage {
        id,
        source: source.to_string(),
        position,
        text: text.to_string(),
        hash,
        embedding: Vec::new(),
    }
}
