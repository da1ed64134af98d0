//! KGX Segmenter - Splits oversized text into overlapping chunks
//!
//! Text is split along paragraph boundaries first; paragraphs that are
//! themselves too long are subdivided at sentence terminators. Each chunk
//! after the first is seeded with a short tail of the previous chunk so the
//! oracle sees statements that straddle a boundary.
//!
//! Every unit of text lands in exactly one chunk body, so concatenating the
//! bodies (content minus the carried-over prefix) reproduces the input.
//!
//! All sizes are measured in characters, not bytes.

use kgx_core::ChunkingConfig;
use thiserror::Error;
use tracing::debug;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while configuring the segmenter
#[derive(Error, Debug)]
pub enum SegmenterError {
    /// Configuration values are inconsistent
    #[error("Invalid segmenter configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, SegmenterError>;

impl From<SegmenterError> for kgx_core::KgxError {
    fn from(err: SegmenterError) -> Self {
        kgx_core::KgxError::ConfigError(err.to_string())
    }
}

/// Characters that end a sentence
pub const SENTENCE_TERMINATORS: &[char] = &['。', '！', '？', '；', '.', '!', '?', ';'];

/// Overlap tails are only trimmed to a sentence boundary found this far
/// before their end
const OVERLAP_TRIM_MARGIN: usize = 50;

// ============================================================================
// Chunks
// ============================================================================

/// Configuration for segmentation
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Texts at or under this size are returned as a single chunk
    pub max_chunk_size: usize,

    /// A chunk is only closed once it exceeds this size
    pub min_chunk_size: usize,

    /// Maximum characters carried over into the next chunk
    pub overlap_size: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self::from(&ChunkingConfig::default())
    }
}

impl From<&ChunkingConfig> for SegmenterConfig {
    fn from(config: &ChunkingConfig) -> Self {
        Self {
            max_chunk_size: config.max_chunk_size,
            min_chunk_size: config.min_chunk_size,
            overlap_size: config.overlap_size,
        }
    }
}

/// A chunk of a larger document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Chunk index within the document
    pub index: u32,

    /// Overlap prefix followed by the chunk body
    pub content: String,

    /// Content starts with text copied from the previous chunk
    pub is_overlap_carry_over: bool,

    /// Length of the overlap prefix in characters
    pub overlap_len: usize,

    /// Character offset of the body in the source text
    pub start_offset: usize,

    /// Character offset just past the body
    pub end_offset: usize,
}

impl Chunk {
    /// Text carried over from the previous chunk
    pub fn overlap(&self) -> &str {
        &self.content[..self.body_byte_start()]
    }

    /// Text owned by this chunk alone
    pub fn body(&self) -> &str {
        &self.content[self.body_byte_start()..]
    }

    /// Length of the content in characters
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }

    fn body_byte_start(&self) -> usize {
        self.content
            .char_indices()
            .nth(self.overlap_len)
            .map(|(i, _)| i)
            .unwrap_or(self.content.len())
    }
}

// ============================================================================
// Segmenter
// ============================================================================

/// Splits text into overlapping chunks
#[derive(Debug, Clone)]
pub struct Segmenter {
    config: SegmenterConfig,
}

impl Segmenter {
    /// Create a segmenter, validating the configuration
    pub fn new(config: SegmenterConfig) -> Result<Self> {
        if config.max_chunk_size == 0 {
            return Err(SegmenterError::InvalidConfig(
                "max_chunk_size must be positive".to_string(),
            ));
        }
        if config.overlap_size >= config.max_chunk_size {
            return Err(SegmenterError::InvalidConfig(format!(
                "overlap_size {} must be smaller than max_chunk_size {}",
                config.overlap_size, config.max_chunk_size
            )));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// True when `text` is too long for a single chunk
    pub fn needs_chunking(&self, text: &str) -> bool {
        text.chars().count() > self.config.max_chunk_size
    }

    /// Split `text` into ordered chunks covering all of it
    pub fn segment(&self, text: &str) -> Vec<Chunk> {
        if text.is_empty() {
            return Vec::new();
        }

        let total = text.chars().count();
        if total <= self.config.max_chunk_size {
            return vec![Chunk {
                index: 0,
                content: text.to_string(),
                is_overlap_carry_over: false,
                overlap_len: 0,
                start_offset: 0,
                end_offset: total,
            }];
        }

        let chunks = self.accumulate(&paragraph_units(text, self.config.max_chunk_size));
        if chunks.len() > 1 {
            return chunks;
        }

        debug!(
            chars = total,
            "Paragraph split produced a single chunk, falling back to sentences"
        );
        self.accumulate(&sentence_units(text))
    }

    fn accumulate(&self, units: &[&str]) -> Vec<Chunk> {
        let mut builder = ChunkBuilder::new(&self.config);

        for unit in units {
            let unit_len = unit.chars().count();
            if builder.has_body() {
                let buffered = builder.buffered_len();
                let oversized = unit_len > self.config.max_chunk_size;
                let would_overflow = buffered + unit_len > self.config.max_chunk_size;
                if oversized || (would_overflow && buffered > self.config.min_chunk_size) {
                    builder.close();
                }
            }
            builder.push(unit, unit_len);
        }

        builder.finish()
    }
}

impl Default for Segmenter {
    fn default() -> Self {
        Self {
            config: SegmenterConfig::default(),
        }
    }
}

/// Running state of one segmentation pass
struct ChunkBuilder<'a> {
    config: &'a SegmenterConfig,
    chunks: Vec<Chunk>,
    overlap: String,
    overlap_len: usize,
    body: String,
    body_len: usize,
    body_start: usize,
    offset: usize,
}

impl<'a> ChunkBuilder<'a> {
    fn new(config: &'a SegmenterConfig) -> Self {
        Self {
            config,
            chunks: Vec::new(),
            overlap: String::new(),
            overlap_len: 0,
            body: String::new(),
            body_len: 0,
            body_start: 0,
            offset: 0,
        }
    }

    fn has_body(&self) -> bool {
        self.body_len > 0
    }

    fn buffered_len(&self) -> usize {
        self.overlap_len + self.body_len
    }

    fn push(&mut self, unit: &str, unit_len: usize) {
        if self.body_len == 0 {
            self.body_start = self.offset;
        }
        self.body.push_str(unit);
        self.body_len += unit_len;
        self.offset += unit_len;
    }

    fn close(&mut self) {
        let mut content = std::mem::take(&mut self.overlap);
        content.push_str(&self.body);

        let next_overlap = overlap_tail(&content, self.config.overlap_size).to_string();

        self.chunks.push(Chunk {
            index: self.chunks.len() as u32,
            content,
            is_overlap_carry_over: self.overlap_len > 0,
            overlap_len: self.overlap_len,
            start_offset: self.body_start,
            end_offset: self.body_start + self.body_len,
        });

        self.overlap_len = next_overlap.chars().count();
        self.overlap = next_overlap;
        self.body.clear();
        self.body_len = 0;
    }

    fn finish(mut self) -> Vec<Chunk> {
        if self.has_body() {
            self.close();
        }
        self.chunks
    }
}

// ============================================================================
// Boundaries
// ============================================================================

/// Tail of `content` carried into the next chunk.
///
/// Takes the final `overlap_size` characters and, when a sentence ends near
/// the start of that window, drops the partial sentence before it.
fn overlap_tail(content: &str, overlap_size: usize) -> &str {
    if overlap_size == 0 {
        return "";
    }

    let total = content.chars().count();
    let skip = total.saturating_sub(overlap_size);
    let start = content
        .char_indices()
        .nth(skip)
        .map(|(i, _)| i)
        .unwrap_or(content.len());
    let mut tail = &content[start..];

    if let Some((pos, ch)) = tail
        .char_indices()
        .find(|(_, c)| SENTENCE_TERMINATORS.contains(c))
    {
        let char_pos = tail[..pos].chars().count();
        if char_pos > 0 && char_pos < overlap_size.saturating_sub(OVERLAP_TRIM_MARGIN) {
            tail = &tail[pos + ch.len_utf8()..];
        }
    }

    tail.trim_start()
}

/// Paragraph units, with oversized paragraphs broken into sentences
fn paragraph_units(text: &str, max_chunk_size: usize) -> Vec<&str> {
    split_after(text, |c, _| c == '\n', char::is_whitespace)
        .into_iter()
        .flat_map(|paragraph| {
            if paragraph.chars().count() > max_chunk_size {
                sentence_units(paragraph)
            } else {
                vec![paragraph]
            }
        })
        .collect()
}

/// Sentence units; an ASCII terminator only counts before whitespace or the end
fn sentence_units(text: &str) -> Vec<&str> {
    split_after(
        text,
        |c, next| match c {
            '\n' | '。' | '！' | '？' | '；' => true,
            '.' | '!' | '?' | ';' => next.map_or(true, char::is_whitespace),
            _ => false,
        },
        |c| c.is_whitespace() || SENTENCE_TERMINATORS.contains(&c),
    )
}

/// Split after every break character, keeping trailing continuation
/// characters (whitespace, repeated terminators) with the preceding unit.
/// The returned slices tile `text` exactly.
fn split_after(
    text: &str,
    is_break: impl Fn(char, Option<char>) -> bool,
    continues: impl Fn(char) -> bool,
) -> Vec<&str> {
    let mut units = Vec::new();
    let mut start = 0;
    let mut iter = text.char_indices().peekable();

    while let Some((i, c)) = iter.next() {
        if !is_break(c, iter.peek().map(|&(_, n)| n)) {
            continue;
        }

        let mut end = i + c.len_utf8();
        while let Some(&(j, n)) = iter.peek() {
            if !continues(n) {
                break;
            }
            end = j + n.len_utf8();
            iter.next();
        }

        units.push(&text[start..end]);
        start = end;
    }

    if start < text.len() {
        units.push(&text[start..]);
    }

    units
}

// ============================================================================
// Tests
// ============================================================================
