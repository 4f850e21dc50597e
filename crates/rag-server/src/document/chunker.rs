use tracing::debug;

use super::parser::Section;
use crate::config::ChunkingConfig;
use crate::database::ChunkMetadata;
use crate::utils::token_estimator::estimate_tokens;

/// A chunk of normalized text with char offsets back into the source.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub index: usize,
    pub content: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub token_count: usize,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Copy)]
struct Word {
    char_start: usize,
    char_end: usize,
    byte_start: usize,
    byte_end: usize,
}

pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    min_chunk_size: usize,
}

impl TextChunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap.min(config.chunk_size.saturating_sub(1)),
            min_chunk_size: config.min_chunk_size,
        }
    }

    /// Split text into chunks of at most `chunk_size` estimated tokens with
    /// up to `chunk_overlap` tokens of overlap. Chunk indexes are contiguous
    /// from 0; the final chunk may fall below `min_chunk_size` only when it
    /// is the whole document.
    pub fn chunk(&self, text: &str, sections: &[Section]) -> Vec<TextChunk> {
        let words = Self::words_of(text);
        if words.is_empty() {
            return Vec::new();
        }

        let mut spans: Vec<(usize, usize)> = Vec::new(); // word index ranges, inclusive
        let mut start = 0usize;

        while start < words.len() {
            let mut end = start;
            while end + 1 < words.len() {
                let candidate_tokens =
                    Self::span_tokens(&words, start, end + 1);
                if candidate_tokens > self.chunk_size {
                    break;
                }
                end += 1;
            }

            spans.push((start, end));
            if end + 1 >= words.len() {
                break;
            }

            // Next chunk starts inside the tail of this one, covering at
            // most `chunk_overlap` tokens.
            let mut next = end + 1;
            while next > start + 1 {
                let tokens = Self::span_tokens(&words, next - 1, end);
                if tokens <= self.chunk_overlap {
                    next -= 1;
                } else {
                    break;
                }
            }
            start = next;
        }

        // A trailing fragment below the minimum merges into its predecessor.
        if spans.len() > 1 {
            let (last_start, last_end) = *spans.last().unwrap();
            if Self::span_tokens(&words, last_start, last_end) < self.min_chunk_size {
                spans.pop();
                let (_prev_start, prev_end) = spans.last_mut().map(|s| (s.0, &mut s.1)).unwrap();
                *prev_end = last_end;
            }
        }

        let chunks: Vec<TextChunk> = spans
            .into_iter()
            .enumerate()
            .map(|(index, (first, last))| {
                let start_word = words[first];
                let end_word = words[last];
                let content = text[start_word.byte_start..end_word.byte_end].to_string();
                let token_count = estimate_tokens(&content);
                let metadata = Self::metadata_for(sections, start_word.char_start);

                TextChunk {
                    index,
                    content,
                    start_offset: start_word.char_start,
                    end_offset: end_word.char_end,
                    token_count,
                    metadata,
                }
            })
            .collect();

        debug!("Created {} chunks from {} chars", chunks.len(), text.len());
        chunks
    }

    fn words_of(text: &str) -> Vec<Word> {
        let mut words = Vec::new();
        let mut current: Option<Word> = None;
        let mut char_idx = 0usize;

        for (byte_idx, c) in text.char_indices() {
            if c.is_whitespace() {
                if let Some(word) = current.take() {
                    words.push(word);
                }
            } else {
                match &mut current {
                    Some(word) => {
                        word.char_end = char_idx + 1;
                        word.byte_end = byte_idx + c.len_utf8();
                    }
                    None => {
                        current = Some(Word {
                            char_start: char_idx,
                            char_end: char_idx + 1,
                            byte_start: byte_idx,
                            byte_end: byte_idx + c.len_utf8(),
                        });
                    }
                }
            }
            char_idx += 1;
        }
        if let Some(word) = current.take() {
            words.push(word);
        }
        words
    }

    /// Estimated tokens of the span covering words[first..=last].
    fn span_tokens(words: &[Word], first: usize, last: usize) -> usize {
        let chars = words[last].char_end - words[first].char_start;
        chars.div_ceil(4)
    }

    /// The section containing the chunk start supplies its metadata.
    fn metadata_for(sections: &[Section], char_start: usize) -> ChunkMetadata {
        let section = sections
            .iter()
            .rev()
            .find(|s| s.start_offset <= char_start);

        match section {
            Some(section) => ChunkMetadata {
                section_title: section.title.clone(),
                page_number: section.page_number,
                slide_number: section.slide_number,
                sheet_name: section.sheet_name.clone(),
                headings: section.title.clone().map(|t| vec![t]),
            },
            None => ChunkMetadata::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(chunk_size: usize, overlap: usize, min: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size,
            chunk_overlap: overlap,
            min_chunk_size: min,
        }
    }

    fn word_text(words: usize) -> String {
        (0..words)
            .map(|i| format!("word{:04}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_empty_text_no_chunks() {
        let chunker = TextChunker::new(&config(512, 50, 100));
        assert!(chunker.chunk("", &[]).is_empty());
        assert!(chunker.chunk("   \n  ", &[]).is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunker = TextChunker::new(&config(512, 50, 100));
        let chunks = chunker.chunk("RAG combines retrieval with generation.", &[]);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].content, "RAG combines retrieval with generation.");
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(
            chunks[0].end_offset,
            "RAG combines retrieval with generation.".chars().count()
        );
    }

    #[test]
    fn test_indexes_contiguous_and_offsets_ordered() {
        let chunker = TextChunker::new(&config(50, 10, 10));
        let text = word_text(400);
        let chunks = chunker.chunk(&text, &[]);

        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(chunk.start_offset < chunk.end_offset);
            assert!(!chunk.content.is_empty());
        }
        // Successive chunks move forward
        for pair in chunks.windows(2) {
            assert!(pair[1].start_offset > pair[0].start_offset);
            // ...and overlap, if any, stays bounded
            assert!(pair[1].start_offset <= pair[0].end_offset + 1);
        }
    }

    #[test]
    fn test_chunks_respect_size_budget() {
        let chunker = TextChunker::new(&config(50, 10, 10));
        let text = word_text(400);
        let chunks = chunker.chunk(&text, &[]);

        for chunk in &chunks {
            // Budget applies to every chunk that was split (a lone oversized
            // word is the only exception)
            assert!(chunk.token_count <= 50 + 2, "chunk too big: {}", chunk.token_count);
        }
    }

    #[test]
    fn test_overlap_bounded() {
        let chunker = TextChunker::new(&config(50, 10, 10));
        let text = word_text(300);
        let chunks = chunker.chunk(&text, &[]);

        for pair in chunks.windows(2) {
            let overlap_chars = pair[0].end_offset.saturating_sub(pair[1].start_offset);
            let overlap_tokens = overlap_chars.div_ceil(4);
            assert!(overlap_tokens <= 10, "overlap {} tokens", overlap_tokens);
        }
    }

    #[test]
    fn test_offsets_map_back_to_source() {
        let chunker = TextChunker::new(&config(40, 5, 10));
        let text = word_text(200);
        let chunks = chunker.chunk(&text, &[]);

        let chars: Vec<char> = text.chars().collect();
        for chunk in &chunks {
            let slice: String = chars[chunk.start_offset..chunk.end_offset].iter().collect();
            assert_eq!(slice, chunk.content);
        }
    }

    #[test]
    fn test_small_tail_merged() {
        // 52 words of 8 chars+space: ~13 tokens per 6 words. chunk_size 100
        // tokens ~ 44 words; the remainder would be tiny with min 40.
        let chunker = TextChunker::new(&config(100, 0, 40));
        let text = word_text(52);
        let chunks = chunker.chunk(&text, &[]);

        // Tail merged into the previous chunk rather than standing alone
        let last = chunks.last().unwrap();
        assert_eq!(last.end_offset, text.chars().count());
        if chunks.len() > 1 {
            for chunk in &chunks[..chunks.len() - 1] {
                assert!(chunk.token_count >= 40);
            }
        }
    }

    #[test]
    fn test_whole_document_may_be_small() {
        let chunker = TextChunker::new(&config(512, 50, 100));
        let chunks = chunker.chunk("tiny doc", &[]);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].token_count < 100);
    }

    #[test]
    fn test_section_metadata_inherited() {
        let text = "Intro words here\nBODY SECTION\nmore words follow after the heading line";
        let sections = vec![
            Section {
                title: None,
                start_offset: 0,
                end_offset: 17,
                ..Section::default()
            },
            Section {
                title: Some("BODY SECTION".to_string()),
                start_offset: 17,
                end_offset: text.chars().count(),
                page_number: Some(2),
                ..Section::default()
            },
        ];

        let chunker = TextChunker::new(&config(512, 0, 10));
        let chunks = chunker.chunk(text, &sections);
        assert_eq!(chunks.len(), 1);
        // Chunk starts at offset 0 -> first section (no title)
        assert_eq!(chunks[0].metadata.section_title, None);

        // A chunk starting inside the second section inherits its metadata
        let meta = TextChunker::metadata_for(&sections, 20);
        assert_eq!(meta.section_title.as_deref(), Some("BODY SECTION"));
        assert_eq!(meta.page_number, Some(2));
    }
}
