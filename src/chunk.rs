//! Recursive separator-based text chunker with overlap.
//!
//! Page text is first cut into pieces using the separator priority list
//! ([`SEPARATORS`]): a span longer than `chunk_size` characters is split on
//! the highest-priority separator it contains, and oversized pieces are split
//! again with the next separator. Separators stay attached to the piece they
//! end, so pieces tile the page exactly.
//!
//! Pieces are then merged greedily into chunks of at most `chunk_size`
//! characters. When a chunk is emitted, its trailing pieces (at most
//! `chunk_overlap` characters) are carried into the next chunk. A piece with
//! no separator that is still longer than `chunk_size` becomes its own
//! oversized chunk rather than being truncated.
//!
//! Every chunk is an exact byte span (`start..end`) of its page, and
//! consecutive chunks of a page either touch or overlap, so trimming each
//! chunk by the overlap with its predecessor and concatenating restores the
//! page text.

use std::collections::VecDeque;

use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;
use crate::models::{Chunk, SourceDocument};

/// Separator priority: paragraph, line, sentence-ish punctuation, whitespace.
pub const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", "; ", " "];

/// Split documents into chunks, in document order then page order.
///
/// Pages are ordered by page number within each source (stable), so chunk
/// order follows the physical document even if pages arrived shuffled.
/// Blank pages and whitespace-only spans are skipped. Chunk `index` counts
/// the kept chunks across all pages of one source.
pub fn split_documents(documents: &[SourceDocument], config: &ChunkingConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for doc in documents {
        let mut pages: Vec<_> = doc.pages.iter().collect();
        pages.sort_by_key(|p| p.page);

        let mut index: u32 = 0;
        for page in pages {
            if page.text.trim().is_empty() {
                continue;
            }
            for (start, end) in split_spans(&page.text, config.chunk_size, config.chunk_overlap) {
                if page.text[start..end].trim().is_empty() {
                    continue;
                }
                chunks.push(make_chunk(
                    &doc.source,
                    page.page,
                    index,
                    &page.text,
                    start,
                    end,
                ));
                index += 1;
            }
        }
    }

    chunks
}

/// Split `text` into overlapping byte spans.
///
/// `chunk_size` and `chunk_overlap` are measured in characters.
pub fn split_spans(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<(usize, usize)> {
    if text.is_empty() {
        return Vec::new();
    }
    let chunk_size = chunk_size.max(1);

    let mut pieces = Vec::new();
    collect_pieces(text, 0, text.len(), 0, chunk_size, &mut pieces);

    let mut spans = Vec::new();
    let mut window: VecDeque<(usize, usize, usize)> = VecDeque::new();
    let mut window_chars = 0usize;

    for (start, end) in pieces {
        let len = char_len(&text[start..end]);

        if let (Some(first), Some(last)) = (window.front().copied(), window.back().copied()) {
            if window_chars + len > chunk_size {
                spans.push((first.0, last.1));
                // Keep a tail of at most `chunk_overlap` chars that still
                // leaves room for the incoming piece.
                while window_chars > chunk_overlap || window_chars + len > chunk_size {
                    match window.pop_front() {
                        Some((_, _, dropped)) => window_chars -= dropped,
                        None => break,
                    }
                }
            }
        }

        window.push_back((start, end, len));
        window_chars += len;
    }

    if let (Some(first), Some(last)) = (window.front(), window.back()) {
        spans.push((first.0, last.1));
    }

    spans
}

fn collect_pieces(
    text: &str,
    start: usize,
    end: usize,
    level: usize,
    max_chars: usize,
    out: &mut Vec<(usize, usize)>,
) {
    let span = &text[start..end];
    if level >= SEPARATORS.len() || char_len(span) <= max_chars {
        out.push((start, end));
        return;
    }

    let sep = SEPARATORS[level];
    let mut piece_start = start;
    for (offset, _) in span.match_indices(sep) {
        let piece_end = start + offset + sep.len();
        collect_pieces(text, piece_start, piece_end, level + 1, max_chars, out);
        piece_start = piece_end;
    }
    if piece_start < end {
        collect_pieces(text, piece_start, end, level + 1, max_chars, out);
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn make_chunk(source: &str, page: u32, index: u32, page_text: &str, start: usize, end: usize) -> Chunk {
    let text = &page_text[start..end];
    let hash = text_hash(text);

    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update([0u8]);
    hasher.update(page.to_le_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(hash.as_bytes());
    let id = hex::encode(&hasher.finalize()[..16]);

    Chunk {
        id,
        source: source.to_string(),
        page,
        index,
        text: text.to_string(),
        start,
        end,
        hash,
    }
}

/// SHA-256 hex of chunk text, checked again when an index is loaded.
pub fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
