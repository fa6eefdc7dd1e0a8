//! Document chunking
//!
//! Splits a document into ordered, bounded-size chunks. Sizes are measured
//! in characters or words; every chunk is an exact slice of the document
//! text, so offsets trace extracted triplets back to their source.

use kgraph_core::{Chunk, ChunkConfig, ChunkUnit, Document};

/// Splits documents into chunks. A pure function of input and config.
#[derive(Debug, Clone)]
pub struct Chunker {
    size: usize,
    overlap: usize,
    unit: ChunkUnit,
    respect_sentences: bool,
}

impl Chunker {
    /// Create a chunker; size is at least 1 and overlap below size
    pub fn new(config: &ChunkConfig) -> Self {
        let size = config.chunk_size.max(1);
        Self {
            size,
            overlap: config.chunk_overlap.min(size - 1),
            unit: config.unit,
            respect_sentences: config.respect_sentences,
        }
    }

    /// Split a document into chunks.
    ///
    /// Empty or whitespace-only input yields no chunks.
    pub fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let text = document.text();
        if text.trim().is_empty() {
            return Vec::new();
        }

        let bounds = unit_bounds(text, self.unit);
        let units = bounds.len() - 1;
        let mut chunks = Vec::new();
        let mut start = 0usize;

        loop {
            let limit = (start + self.size).min(units);
            let end = if limit < units && self.respect_sentences {
                self.find_break_point(text, &bounds, start, limit)
            } else {
                limit
            };

            let (from, to) = (bounds[start], bounds[end]);
            chunks.push(Chunk::new(
                document.id(),
                chunks.len() as u32,
                &text[from..to],
                from,
                to,
            ));

            if end >= units {
                break;
            }

            // Move start with overlap, always making progress
            start = end.saturating_sub(self.overlap).max(start + 1);
        }

        tracing::debug!(
            document_id = %document.id(),
            chunks = chunks.len(),
            "Chunked document"
        );

        chunks
    }

    /// Find a good break point in `(start, limit]`, searching the back half
    /// of the window: paragraph break, then sentence end, then whitespace.
    fn find_break_point(&self, text: &str, bounds: &[usize], start: usize, limit: usize) -> usize {
        let floor = start + ((limit - start) / 2).max(1);
        if floor > limit {
            return limit;
        }

        let window_start = bounds[start];
        let preceding = |b: usize| &text[window_start..bounds[b]];

        if let Some(b) = (floor..=limit).rev().find(|&b| preceding(b).ends_with("\n\n")) {
            return b;
        }

        if let Some(b) = (floor..=limit).rev().find(|&b| {
            let before = preceding(b);
            before.ends_with(char::is_whitespace)
                && before.trim_end().ends_with(&['.', '?', '!', '。'][..])
        }) {
            return b;
        }

        if let Some(b) = (floor..=limit)
            .rev()
            .find(|&b| preceding(b).ends_with(char::is_whitespace))
        {
            return b;
        }

        limit
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(&ChunkConfig::default())
    }
}

/// Byte offsets where each unit starts, terminated by `text.len()`.
///
/// Word units carry their trailing whitespace; leading whitespace joins
/// the first word.
fn unit_bounds(text: &str, unit: ChunkUnit) -> Vec<usize> {
    let mut bounds = vec![0];

    match unit {
        ChunkUnit::Chars => {
            bounds.extend(text.char_indices().skip(1).map(|(i, _)| i));
        }
        ChunkUnit::Words => {
            let mut prev_ws = false;
            let mut seen_word = false;
            for (i, c) in text.char_indices() {
                let ws = c.is_whitespace();
                if !ws && prev_ws && seen_word {
                    bounds.push(i);
                }
                if !ws {
                    seen_word = true;
                }
                prev_ws = ws;
            }
        }
    }

    bounds.push(text.len());
    bounds
}

/// Reassemble the original text from ordered chunks, dropping overlap
pub fn merge_chunks(chunks: &[Chunk]) -> String {
    let mut text = String::new();
    let mut covered = 0usize;

    for chunk in chunks {
        if chunk.end <= covered {
            continue;
        }
        let skip = covered.saturating_sub(chunk.start);
        text.push_str(&chunk.text[skip..]);
        covered = chunk.end;
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chunker(size: usize, overlap: usize, unit: ChunkUnit, sentences: bool) -> Chunker {
        Chunker::new(&ChunkConfig {
            chunk_size: size,
            chunk_overlap: overlap,
            unit,
            respect_sentences: sentences,
        })
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        let c = Chunker::default();
        assert!(c.chunk(&Document::new("")).is_empty());
        assert!(c.chunk(&Document::new("   \n\t ")).is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let doc = Document::new("Thank you for calling AT&T.");
        let chunks = Chunker::default().chunk(&doc);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, doc.text());
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks[0].end, doc.text().len());
    }

    #[test]
    fn test_char_chunks_respect_size_and_overlap() {
        let doc = Document::new("abcdefghij");
        let chunks = chunker(4, 1, ChunkUnit::Chars, false).chunk(&doc);
        let texts: Vec<_> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["abcd", "defg", "ghij"]);
    }

    #[test]
    fn test_word_chunks_no_overlap() {
        let doc = Document::new("a b c d e f");
        let chunks = chunker(2, 0, ChunkUnit::Words, false).chunk(&doc);
        let texts: Vec<_> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["a b ", "c d ", "e f"]);
    }

    #[test]
    fn test_sentence_aware_break() {
        let doc = Document::new("Josh called. He wants a Blackberry Torch today.");
        let chunks = chunker(20, 0, ChunkUnit::Chars, true).chunk(&doc);
        assert_eq!(chunks[0].text, "Josh called. ");
        assert_eq!(merge_chunks(&chunks), doc.text());
    }

    #[test]
    fn test_chunk_ids_are_stable_and_ordered() {
        let doc = Document::new("one two three four five six seven");
        let c = chunker(3, 1, ChunkUnit::Words, false);
        let first = c.chunk(&doc);
        let second = c.chunk(&doc);
        assert_eq!(first, second);
        for (i, chunk) in first.iter().enumerate() {
            assert_eq!(chunk.index as usize, i);
        }
    }

    #[test]
    fn test_multibyte_text_stays_on_char_boundaries() {
        let doc = Document::new("연차휴가는 최대 15일까지 사용할 수 있습니다.");
        let chunks = chunker(5, 2, ChunkUnit::Chars, true).chunk(&doc);
        for chunk in &chunks {
            assert_eq!(&doc.text()[chunk.start..chunk.end], chunk.text);
            assert!(chunk.text.chars().count() <= 5);
        }
        assert_eq!(merge_chunks(&chunks), doc.text());
    }

    #[test]
    fn test_overlap_clamped_below_size() {
        let doc = Document::new("a b c d e f g");
        let chunks = chunker(3, 10, ChunkUnit::Words, false).chunk(&doc);
        assert!(chunks.len() > 1);
        assert_eq!(merge_chunks(&chunks), doc.text());
    }

    proptest! {
        #[test]
        fn prop_chunks_reconstruct_document(
            text in "[a-zA-Z .!?\n]{0,400}",
            size in 1usize..64,
            overlap in 0usize..16,
            words in any::<bool>(),
            sentences in any::<bool>(),
        ) {
            let unit = if words { ChunkUnit::Words } else { ChunkUnit::Chars };
            let doc = Document::new(text.clone());
            let chunks = chunker(size, overlap, unit, sentences).chunk(&doc);

            if text.trim().is_empty() {
                prop_assert!(chunks.is_empty());
            } else {
                prop_assert_eq!(merge_chunks(&chunks), text.clone());
                prop_assert_eq!(chunks[0].start, 0);
                prop_assert_eq!(chunks.last().unwrap().end, text.len());
                for pair in chunks.windows(2) {
                    prop_assert!(pair[1].start <= pair[0].end);
                    prop_assert!(pair[1].start > pair[0].start);
                }
            }
        }

        #[test]
        fn prop_chunks_never_exceed_size(
            text in "[a-z ]{1,300}",
            size in 1usize..40,
            overlap in 0usize..8,
            sentences in any::<bool>(),
        ) {
            let doc = Document::new(text.clone());
            let chunks = chunker(size, overlap, ChunkUnit::Chars, sentences).chunk(&doc);
            for chunk in &chunks {
                prop_assert!(chunk.text.chars().count() <= size);
                prop_assert_eq!(&text[chunk.start..chunk.end], chunk.text.as_str());
            }

            let chunks = chunker(size, overlap, ChunkUnit::Words, sentences).chunk(&doc);
            for chunk in &chunks {
                prop_assert!(chunk.text.split_whitespace().count() <= size);
            }
        }
    }
}
