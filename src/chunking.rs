//! Chunking utilities for splitting documents into passages.
//!
//! Text is split on semantic boundaries first: blank lines separate
//! paragraphs and a markdown heading always opens a new passage. Consecutive
//! paragraphs are packed together while they fit in the configured maximum;
//! a single paragraph longer than the maximum is split into windows at word
//! boundaries.
//!
//! Lengths are measured in characters, not bytes, so multi-byte text is
//! never cut inside a code point.

/// Default maximum passage length in characters (~300 tokens).
pub const DEFAULT_MAX_PASSAGE_CHARS: usize = 1200;

/// How far back (as a fraction of the window) to look for a word boundary
/// before giving up and cutting mid-word.
const BOUNDARY_SEARCH_DIVISOR: usize = 2;

/// Chunking configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Maximum passage size in characters.
    pub max_passage_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_passage_chars: DEFAULT_MAX_PASSAGE_CHARS,
        }
    }
}

/// A chunk of text from a larger document.
///
/// Produced by [`split_passages`]. Each chunk represents a window of the
/// original text, with an index and byte offset for mapping back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The chunk text content, trimmed.
    pub text: String,
    /// Zero-based chunk index within the document.
    pub index: usize,
    /// Byte offset where this chunk starts in the original document.
    pub start_offset: usize,
}

/// A run of non-blank lines, as byte offsets into the source text.
#[derive(Debug, Clone, Copy)]
struct Block {
    start: usize,
    end: usize,
    opens_section: bool,
}

/// Split text into passages of at most `max_chars` characters.
///
/// Whitespace-only input yields no passages.
///
/// # Examples
///
/// ```
/// use docscope::chunking::split_passages;
///
/// let text = "# Setup\n\nInstall the toolchain.\n\n# Usage\n\nRun it.";
/// let chunks = split_passages(text, 1000);
/// assert_eq!(chunks.len(), 2);
/// assert!(chunks[0].text.starts_with("# Setup"));
/// assert!(chunks[1].text.starts_with("# Usage"));
/// ```
pub fn split_passages(text: &str, max_chars: usize) -> Vec<Chunk> {
    let max_chars = max_chars.max(1);
    let mut spans: Vec<(usize, usize)> = Vec::new();
    let mut current: Option<(usize, usize)> = None;

    for block in blocks(text) {
        if block.opens_section
            && let Some(span) = current.take()
        {
            spans.push(span);
        }

        if char_len(&text[block.start..block.end]) > max_chars {
            if let Some(span) = current.take() {
                spans.push(span);
            }
            spans.extend(windows(text, block.start, block.end, max_chars));
            continue;
        }

        current = match current {
            None => Some((block.start, block.end)),
            Some((start, _))
                if char_len(&text[start..block.end]) <= max_chars =>
            {
                Some((start, block.end))
            }
            Some(span) => {
                spans.push(span);
                Some((block.start, block.end))
            }
        };
    }
    if let Some(span) = current {
        spans.push(span);
    }

    spans
        .into_iter()
        .filter_map(|(start, end)| {
            let raw = &text[start..end];
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return None;
            }
            let lead = raw.len() - raw.trim_start().len();
            Some((start + lead, trimmed.to_string()))
        })
        .enumerate()
        .map(|(index, (start_offset, text))| Chunk {
            text,
            index,
            start_offset,
        })
        .collect()
}

fn blocks(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut current: Option<Block> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        if line.trim().is_empty() {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            continue;
        }

        if is_heading(line) {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            current = Some(Block {
                start: line_start,
                end: offset,
                opens_section: true,
            });
            continue;
        }

        match current.as_mut() {
            Some(block) => block.end = offset,
            None => {
                current = Some(Block {
                    start: line_start,
                    end: offset,
                    opens_section: false,
                })
            }
        }
    }
    if let Some(block) = current {
        blocks.push(block);
    }

    blocks
}

fn is_heading(line: &str) -> bool {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|&c| c == '#').count();
    (1..=6).contains(&hashes)
        && trimmed[hashes..]
            .chars()
            .next()
            .is_none_or(char::is_whitespace)
}

/// Split `text[start..end]` into windows of at most `max_chars` characters,
/// preferring to break at whitespace.
fn windows(
    text: &str,
    start: usize,
    end: usize,
    max_chars: usize,
) -> Vec<(usize, usize)> {
    let segment = &text[start..end];

    // Char index -> byte index, with a sentinel for the end.
    let char_to_byte: Vec<usize> = segment
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(segment.len()))
        .collect();
    let char_count = char_to_byte.len() - 1;

    let mut spans = Vec::new();
    let mut start_char = 0;

    while start_char < char_count {
        let limit = (start_char + max_chars).min(char_count);
        let end_char = if limit < char_count {
            find_word_boundary_char(segment, &char_to_byte, start_char, limit)
        } else {
            limit
        };

        spans.push((
            start + char_to_byte[start_char],
            start + char_to_byte[end_char],
        ));
        start_char = end_char;
    }

    spans
}

/// Find a break point in `(from, pos]`, preferring just after the last
/// whitespace in the back half of the window. Falls back to `pos`.
fn find_word_boundary_char(
    text: &str,
    char_to_byte: &[usize],
    from: usize,
    pos: usize,
) -> usize {
    let window = pos - from;
    let search_start = pos - window / BOUNDARY_SEARCH_DIVISOR;

    let region = &text[char_to_byte[search_start]..char_to_byte[pos]];
    if let Some((byte_offset, ws)) = region
        .char_indices()
        .filter(|(_, c)| c.is_whitespace())
        .last()
    {
        let boundary_byte =
            char_to_byte[search_start] + byte_offset + ws.len_utf8();
        if let Ok(idx) = char_to_byte.binary_search(&boundary_byte)
            && idx > from
        {
            return idx;
        }
    }

    pos
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
