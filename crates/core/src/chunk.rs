//! Chunk type and the recursive character chunker

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CoreError, Result};

/// Split priority, coarsest first. Hard byte slicing is the implicit
/// final level and guarantees termination.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", " "];

/// A bounded segment of one document's extracted text.
///
/// Consecutive chunks overlap: every chunk after the first shares its
/// leading bytes with the tail of the previous chunk, up to the
/// configured overlap (shorter when the window snapped to a natural
/// split boundary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Path of the document this chunk was cut from (back-reference,
    /// not ownership)
    pub source_path: String,

    /// Chunk text, at most `size` bytes
    pub text: String,

    /// 0-based position within the document's chunk sequence
    pub sequence_index: usize,

    /// When this chunk was cut
    pub created_at: DateTime<Utc>,
}

/// Split `text` into overlapping chunks of at most `size` bytes.
///
/// The text is first split recursively on a prioritized separator list
/// (paragraph break, line break, sentence punctuation, space); a segment
/// that still exceeds `size` after the finest separator is sliced at the
/// byte limit. Adjacent segments are then merged greedily up to `size`,
/// and a sliding window starts each subsequent chunk `overlap` bytes
/// before the previous chunk's end, snapped to a split boundary when one
/// falls inside the overlap tail. Cuts never land inside a UTF-8 code
/// point, so sizes are byte counts but boundaries are always valid.
///
/// Empty (or whitespace-only) input yields an empty sequence, and no
/// chunk is ever produced from whitespace alone.
pub fn chunk_text(
    source_path: &str,
    text: &str,
    size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>> {
    if size == 0 {
        return Err(CoreError::InvalidParameter(
            "chunk size must be positive".into(),
        ));
    }
    if overlap >= size {
        return Err(CoreError::InvalidParameter(format!(
            "overlap ({}) must be smaller than chunk size ({})",
            overlap, size
        )));
    }

    let work = text.trim_end();
    if work.trim().is_empty() {
        return Ok(Vec::new());
    }

    // Absolute end offsets of the recursive split; every segment between
    // consecutive offsets is at most `size` bytes.
    let mut bounds = Vec::new();
    split_recursive(work, 0, size, 0, &mut bounds);

    let now = Utc::now();
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut start = 0usize;
    let mut prev_end = 0usize;

    loop {
        let limit = start.saturating_add(size).min(work.len());

        // Greedy merge: extend to the furthest split boundary inside the
        // window.
        let mut end = bounds
            .iter()
            .copied()
            .filter(|&b| b > start && b <= limit)
            .max()
            .unwrap_or(0);
        if end <= prev_end {
            // No usable boundary past the previous chunk: cut at the
            // exact byte offset instead.
            let hard = floor_char_boundary(work, limit);
            end = if hard > prev_end && hard > start {
                hard
            } else {
                next_char_boundary(work, prev_end.max(start))
            };
        }

        let piece = &work[start..end];
        if !piece.trim().is_empty() {
            chunks.push(Chunk {
                source_path: source_path.to_string(),
                text: piece.to_string(),
                sequence_index: chunks.len(),
                created_at: now,
            });
        }

        if end >= work.len() {
            break;
        }

        // Slide back `overlap` bytes, preferring a split boundary inside
        // the overlap tail (which may shorten the actual overlap).
        start = if overlap == 0 {
            end
        } else {
            let desired = end.saturating_sub(overlap);
            bounds
                .iter()
                .copied()
                .filter(|&b| b >= desired && b < end)
                .min()
                .unwrap_or_else(|| ceil_char_boundary(work, desired))
        };
        prev_end = end;
    }

    Ok(chunks)
}

/// Record the end offsets of a recursive separator split of `text`,
/// relative to `base`. Segments longer than `size` are re-split with the
/// next finer separator; past the finest separator they are sliced at
/// the byte limit.
fn split_recursive(text: &str, base: usize, size: usize, level: usize, out: &mut Vec<usize>) {
    if text.len() <= size {
        out.push(base + text.len());
        return;
    }

    if level >= SEPARATORS.len() {
        let mut cut = floor_char_boundary(text, size);
        if cut == 0 {
            cut = next_char_boundary(text, 0);
        }
        out.push(base + cut);
        split_recursive(&text[cut..], base + cut, size, level, out);
        return;
    }

    // Split keeping each separator attached to the segment it ends, so
    // concatenating segments reproduces the text byte for byte.
    let sep = SEPARATORS[level];
    let mut pieces: Vec<(usize, &str)> = Vec::new();
    let mut last = 0;
    for (pos, m) in text.match_indices(sep) {
        let end = pos + m.len();
        pieces.push((last, &text[last..end]));
        last = end;
    }
    if last < text.len() {
        pieces.push((last, &text[last..]));
    }

    if pieces.len() <= 1 {
        split_recursive(text, base, size, level + 1, out);
        return;
    }

    for (offset, piece) in pieces {
        split_recursive(piece, base + offset, size, level + 1, out);
    }
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn next_char_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    i += 1;
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

fn ceil_char_boundary(s: &str, i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    if s.is_char_boundary(i) {
        i
    } else {
        next_char_boundary(s, i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Rebuild the source text from chunk 0 plus the non-overlapping
    /// tail of each subsequent chunk.
    fn reconstruct(chunks: &[Chunk], overlap: usize) -> String {
        let mut acc = chunks[0].text.clone();
        for chunk in &chunks[1..] {
            let max_k = overlap.min(acc.len()).min(chunk.text.len());
            let shared = (0..=max_k)
                .rev()
                .find(|&k| acc.ends_with(&chunk.text[..k]))
                .unwrap_or(0);
            acc.push_str(&chunk.text[shared..]);
        }
        acc
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let chunks = chunk_text("doc.pdf", "", 500, 100).unwrap();
        assert!(chunks.is_empty());

        let chunks = chunk_text("doc.pdf", "   \n\n  ", 500, 100).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn short_text_yields_single_chunk() {
        let chunks = chunk_text("doc.pdf", "Hello, world!", 500, 100).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].sequence_index, 0);
        assert_eq!(chunks[0].source_path, "doc.pdf");
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        let err = chunk_text("doc.pdf", "some text", 100, 100).unwrap_err();
        assert!(matches!(err, CoreError::InvalidParameter(_)));

        let err = chunk_text("doc.pdf", "some text", 100, 250).unwrap_err();
        assert!(matches!(err, CoreError::InvalidParameter(_)));

        let err = chunk_text("doc.pdf", "some text", 0, 0).unwrap_err();
        assert!(matches!(err, CoreError::InvalidParameter(_)));
    }

    #[test]
    fn twelve_hundred_chars_size_500_overlap_100() {
        // No separators anywhere, so every cut lands at the exact offset.
        let text: String = "abcdefghij".repeat(120);
        assert_eq!(text.len(), 1200);

        let chunks = chunk_text("doc.pdf", &text, 500, 100).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, &text[0..500]);
        assert_eq!(chunks[1].text, &text[400..900]);
        assert_eq!(chunks[2].text, &text[800..1200]);
        // chunk[1] starts exactly `overlap` bytes before chunk[0]'s end
        assert_eq!(&chunks[0].text[400..], &chunks[1].text[..100]);
    }

    #[test]
    fn chunks_never_exceed_size() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(40);
        for (size, overlap) in [(50, 10), (80, 25), (200, 0), (37, 36)] {
            let chunks = chunk_text("doc.pdf", text.trim_end(), size, overlap).unwrap();
            assert!(!chunks.is_empty());
            for chunk in &chunks {
                assert!(
                    chunk.text.len() <= size,
                    "chunk of {} bytes exceeds size {}",
                    chunk.text.len(),
                    size
                );
                assert!(!chunk.text.trim().is_empty());
            }
        }
    }

    #[test]
    fn overlap_is_shared_with_previous_chunk() {
        let text = "Revenue grew strongly. Costs were flat. Margins improved again. \
                    Net income rose. Dividends were declared. Guidance was raised."
            .to_string();
        let overlap = 20;
        let chunks = chunk_text("doc.pdf", &text, 60, overlap).unwrap();
        assert!(chunks.len() > 1);

        for pair in chunks.windows(2) {
            let (prev, cur) = (&pair[0], &pair[1]);
            let shared = (0..=overlap.min(prev.text.len()).min(cur.text.len()))
                .rev()
                .find(|&k| prev.text.ends_with(&cur.text[..k]))
                .unwrap_or(0);
            // Up to `overlap` bytes shared; the window never overshoots.
            assert!(shared <= overlap);
        }
    }

    #[test]
    fn concatenation_reconstructs_source_text() {
        let text = "First paragraph of the annual report.\n\n\
                    Second paragraph with more detail on revenue and margins.\n\
                    A third line follows here. Then another sentence. And one more \
                    sentence that pushes this paragraph well past the chunk size \
                    so the splitter has to recurse into finer separators.";
        for (size, overlap) in [(60, 15), (90, 30), (200, 50), (1000, 10)] {
            let chunks = chunk_text("doc.pdf", text, size, overlap).unwrap();
            assert_eq!(
                reconstruct(&chunks, overlap),
                text,
                "reconstruction failed for size={} overlap={}",
                size,
                overlap
            );
        }
    }

    #[test]
    fn sequence_indices_are_contiguous() {
        let text = "Sentence one is here. Sentence two is here. Sentence three. \
                    Sentence four follows. Sentence five ends it.";
        let chunks = chunk_text("doc.pdf", text, 40, 10).unwrap();
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.sequence_index, i);
        }
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let text = format!("{}\n\n{}", "a".repeat(80), "b".repeat(80));
        let chunks = chunk_text("doc.pdf", &text, 100, 0).unwrap();
        // The window stops at the paragraph break rather than slicing
        // into the second paragraph.
        assert_eq!(chunks[0].text, format!("{}\n\n", "a".repeat(80)));
        assert_eq!(chunks[1].text, "b".repeat(80));
    }

    #[test]
    fn multibyte_text_is_never_split_inside_a_code_point() {
        let text = "é".repeat(300); // 2 bytes each
        let chunks = chunk_text("doc.pdf", &text, 101, 20).unwrap();
        for chunk in &chunks {
            assert!(chunk.text.len() <= 101);
            assert!(chunk.text.chars().all(|c| c == 'é'));
        }
    }

    #[test]
    fn zero_overlap_partitions_the_text() {
        let text = "word ".repeat(100);
        let text = text.trim_end();
        let chunks = chunk_text("doc.pdf", text, 48, 0).unwrap();
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, text);
    }
}
