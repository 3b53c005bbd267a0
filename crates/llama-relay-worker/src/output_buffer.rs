//! Incremental output buffering.
//!
//! The engine emits tiny units (usually one token's bytes). Relaying each one
//! separately floods the coordinator and makes the client's display jitter,
//! so units are collected until one ends on a boundary character and the
//! whole run is flushed as one chunk. Whatever is left when the job ends is
//! flushed unconditionally.

/// CJK punctuation that ends a chunk in addition to ASCII punctuation.
const CJK_PUNCTUATION: &[char] = &['。', '，', '、', '！', '？', '；', '：', '…', '」', '』'];

/// Which characters end a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BoundaryRule {
    /// Whitespace, ASCII punctuation and common CJK punctuation.
    #[default]
    Default,
    /// Exactly these characters.
    Chars(Vec<char>),
}

impl BoundaryRule {
    /// Build a rule from a configured character list; `None` or an empty
    /// string selects the default classes.
    pub fn from_config(chars: Option<&str>) -> Self {
        match chars {
            Some(s) if !s.is_empty() => Self::Chars(s.chars().collect()),
            _ => Self::Default,
        }
    }

    pub fn is_boundary_char(&self, c: char) -> bool {
        match self {
            Self::Default => {
                c.is_whitespace() || c.is_ascii_punctuation() || CJK_PUNCTUATION.contains(&c)
            }
            Self::Chars(set) => set.contains(&c),
        }
    }

    /// A unit is a boundary unit when it is complete UTF-8 and its last
    /// character is a boundary character. Partial multi-byte sequences never
    /// end a chunk.
    pub fn is_boundary_unit(&self, unit: &[u8]) -> bool {
        std::str::from_utf8(unit)
            .ok()
            .and_then(|s| s.chars().last())
            .is_some_and(|c| self.is_boundary_char(c))
    }
}

/// Per-job accumulator. Create one at job start, call [`finish`] at job end.
///
/// [`finish`]: OutputChunkBuffer::finish
#[derive(Debug, Default)]
pub struct OutputChunkBuffer {
    units: Vec<u8>,
    boundary: BoundaryRule,
}

impl OutputChunkBuffer {
    pub fn new(boundary: BoundaryRule) -> Self {
        Self {
            units: Vec::new(),
            boundary,
        }
    }

    /// Append a unit; returns the flushed chunk when the unit is a boundary.
    pub fn push(&mut self, unit: &[u8]) -> Option<Vec<u8>> {
        self.units.extend_from_slice(unit);
        if self.boundary.is_boundary_unit(unit) {
            self.take()
        } else {
            None
        }
    }

    /// Flush whatever remains. Consumes the buffer: it has no cross-job memory.
    pub fn finish(mut self) -> Option<Vec<u8>> {
        self.take()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    fn take(&mut self) -> Option<Vec<u8>> {
        if self.units.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.units))
        }
    }
}

/// Text form of a chunk for the wire. Invalid UTF-8 is replaced rather than
/// dropped.
pub fn chunk_text(chunk: &[u8]) -> String {
    String::from_utf8_lossy(chunk).into_owned()
}
