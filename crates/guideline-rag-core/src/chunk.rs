//! Recursive character chunker with exact overlap.
//!
//! Splits each extracted unit (page, slide, or file) into [`Chunk`]s of at
//! most `chunk_size` characters of new text, each prefixed by the last
//! `overlap` characters of the previous chunk from the same unit so facts
//! that straddle a boundary survive in at least one chunk.
//!
//! # Algorithm
//!
//! 1. Try to cut the unit on paragraph breaks (`\n\n`). Any piece still
//!    longer than `chunk_size` is cut on line breaks, then on sentence ends
//!    (`. `), then on spaces, and finally hard-cut every `chunk_size`
//!    characters.
//! 2. Adjacent pieces are merged greedily while the merged span fits in
//!    `chunk_size` characters.
//! 3. Each span is widened backwards by `overlap` characters.
//!
//! Spans are byte ranges into the original text, so every chunk is a
//! verbatim substring of the extracted text. Lengths are counted in
//! characters, not bytes.
//!
//! # Example
//!
//! ```rust
//! use guideline_rag_core::chunk::chunk_pages;
//! use guideline_rag_core::models::PageText;
//!
//! let pages = vec![PageText::new("Wash hands often.\n\nBoil water.", Some(1))];
//! let chunks = chunk_pages("hygiene.pdf", &pages, 900, 150);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].page, Some(1));
//! ```

use std::ops::Range;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Chunk, PageText};

/// Separators tried in order: paragraph, line, sentence, word.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " "];

/// Namespace for deterministic chunk ids.
const CHUNK_NAMESPACE: Uuid = Uuid::from_u128(0x6a1f_3c2e_9b7d_4e55_8f0a_1c2d_3e4f_5a6b);

/// Chunk every unit of a document.
///
/// `chunk_index` runs across all pages of the document, so it is a stable
/// position within the source. Chunks whose text is blank after trimming
/// are dropped.
pub fn chunk_pages(
    source: &str,
    pages: &[PageText],
    chunk_size: usize,
    overlap: usize,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for page in pages {
        for text in split_with_overlap(&page.text, chunk_size, overlap) {
            if text.trim().is_empty() {
                continue;
            }
            let index = chunks.len();
            chunks.push(make_chunk(source, page.page, index, text));
        }
    }
    chunks
}

/// Split one unit of text into overlapping slices of the input.
///
/// Each slice holds at most `chunk_size + overlap` characters. `overlap`
/// is clamped below `chunk_size` so the splitter always makes progress.
pub fn split_with_overlap(text: &str, chunk_size: usize, overlap: usize) -> Vec<&str> {
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size - 1);

    if text.is_empty() {
        return Vec::new();
    }

    split_range(text, 0..text.len(), chunk_size, 0)
        .into_iter()
        .map(|span| {
            let start = back_chars(text, span.start, overlap);
            &text[start..span.end]
        })
        .collect()
}

fn split_range(text: &str, range: Range<usize>, limit: usize, level: usize) -> Vec<Range<usize>> {
    if char_len(text, &range) <= limit {
        return vec![range];
    }
    let Some(sep) = SEPARATORS.get(level) else {
        return hard_cut(text, range, limit);
    };

    let mut pieces = Vec::new();
    let mut offset = range.start;
    for piece in text[range.clone()].split_inclusive(sep) {
        let piece_range = offset..offset + piece.len();
        offset = piece_range.end;
        pieces.extend(split_range(text, piece_range, limit, level + 1));
    }
    merge(text, pieces, limit)
}

/// Greedily join contiguous pieces while they fit.
fn merge(text: &str, pieces: Vec<Range<usize>>, limit: usize) -> Vec<Range<usize>> {
    let mut merged: Vec<Range<usize>> = Vec::with_capacity(pieces.len());
    for piece in pieces {
        match merged.last_mut() {
            Some(last) if char_len(text, &(last.start..piece.end)) <= limit => {
                last.end = piece.end;
            }
            _ => merged.push(piece),
        }
    }
    merged
}

fn hard_cut(text: &str, range: Range<usize>, limit: usize) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut start = range.start;
    let mut count = 0;
    for (i, _) in text[range.clone()].char_indices() {
        if count == limit {
            let cut = range.start + i;
            out.push(start..cut);
            start = cut;
            count = 0;
        }
        count += 1;
    }
    if start < range.end {
        out.push(start..range.end);
    }
    out
}

/// Byte index `n` characters before `pos`, or 0 if the text is shorter.
fn back_chars(text: &str, pos: usize, n: usize) -> usize {
    if n == 0 {
        return pos;
    }
    text[..pos]
        .char_indices()
        .rev()
        .nth(n - 1)
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn char_len(text: &str, range: &Range<usize>) -> usize {
    text[range.clone()].chars().count()
}

fn make_chunk(source: &str, page: Option<u32>, index: usize, text: &str) -> Chunk {
    let hash = format!("{:x}", Sha256::digest(text.as_bytes()));
    let key = match page {
        Some(p) => format!("{}#{}#{}", source, p, index),
        None => format!("{}##{}", source, index),
    };

    Chunk {
        id: Uuid::new_v5(&CHUNK_NAMESPACE, key.as_bytes()).to_string(),
        source: source.to_string(),
        page,
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
