//! The public text buffer surface.
//!
//! `TextBuffer` wraps the piece tree behind the operation set an editor
//! works with and fixes the indexing conventions: positions and ranges are
//! 1-based line/column pairs, byte offsets are 0-based, and the line-index
//! accessors (`get_line_content`, `get_line_length`, `get_line_char_code`)
//! take 0-based line indexes validated against the document.

use crate::builder::{DefaultEol, TextBufferBuilder};
use crate::common::{LineEnding, Position, Range};
use crate::error::{BufferError, Result};
use crate::piece_tree::PieceTree;
use crate::snapshot::Snapshot;

/// A text buffer over a piece-tree storage engine.
///
/// The buffer owns a UTF-8 document, answers positional queries, and applies
/// edits in time proportional to the number of pieces rather than the
/// document size. It is single-owner and synchronous; concurrent access must
/// be serialized by the caller.
pub struct TextBuffer {
    buffer: PieceTree,
    bom: String,
}

impl TextBuffer {
    /// Create an empty buffer using `eol` as its line ending.
    pub fn new(eol: DefaultEol) -> Self {
        let factory = TextBufferBuilder::new().finish(false);
        let bom = factory.bom().to_string();
        TextBuffer {
            buffer: factory.create(eol),
            bom,
        }
    }

    /// Create a buffer holding `content`, detecting its line ending with
    /// `eol` as the fallback.
    pub fn from_string(content: &str, eol: DefaultEol) -> Self {
        let mut builder = TextBufferBuilder::new();
        builder.accept_chunk(content);
        let factory = builder.finish(false);
        let bom = factory.bom().to_string();
        TextBuffer {
            buffer: factory.create(eol),
            bom,
        }
    }

    /// Wrap an already built piece tree, keeping the BOM captured at build
    /// time.
    pub fn from_piece_tree(buffer: PieceTree, bom: String) -> Self {
        TextBuffer { buffer, bom }
    }

    /// The BOM captured when the buffer was built; empty if none.
    pub fn bom(&self) -> &str {
        &self.bom
    }

    /// Document length in bytes.
    pub fn get_length(&self) -> usize {
        self.buffer.get_length()
    }

    /// Number of lines; at least 1 (the implicit last line).
    pub fn get_line_count(&self) -> usize {
        self.buffer.get_line_count()
    }

    /// The document's line ending, `"\n"` or `"\r\n"`.
    pub fn get_eol(&self) -> &'static str {
        self.buffer.get_eol().as_str()
    }

    /// Switch the document to `eol`, rewriting every line ending in place.
    pub fn set_eol(&mut self, eol: &str) -> Result<()> {
        let eol = LineEnding::try_from_str(eol)?;
        self.buffer.set_eol(eol);
        Ok(())
    }

    fn check_line_index(&self, line_index: usize) -> Result<()> {
        if line_index >= self.get_line_count() {
            return Err(BufferError::InvalidArgument(format!(
                "line index {line_index} out of range (document has {} lines)",
                self.get_line_count()
            )));
        }
        Ok(())
    }

    /// Content of the 0-based `line_index`, without its trailing break.
    pub fn get_line_content(&self, line_index: usize) -> Result<String> {
        self.check_line_index(line_index)?;
        Ok(self.buffer.get_line_content(line_index + 1))
    }

    /// Byte length of the 0-based `line_index`, excluding its trailing
    /// break.
    pub fn get_line_length(&self, line_index: usize) -> Result<usize> {
        self.check_line_index(line_index)?;
        Ok(self.buffer.get_line_length(line_index + 1))
    }

    /// Byte value at 0-based `index` within the 0-based `line_index`.
    pub fn get_line_char_code(&self, line_index: usize, index: usize) -> Result<u8> {
        self.check_line_index(line_index)?;
        let line_length = self.buffer.get_line_length(line_index + 1);
        if index >= line_length {
            return Err(BufferError::InvalidArgument(format!(
                "byte index {index} out of range (line {line_index} has {line_length} bytes)"
            )));
        }
        self.buffer
            .get_line_char_code(line_index + 1, index)
            .ok_or_else(|| {
                BufferError::Internal(format!(
                    "no node resolves line {line_index} byte {index}"
                ))
            })
    }

    /// The full document.
    pub fn get_value(&self) -> String {
        self.buffer.get_value()
    }

    /// All lines, without trailing breaks.
    pub fn get_lines_content(&self) -> Vec<String> {
        self.buffer.get_lines_content()
    }

    /// Text covered by `range` (1-based, end-exclusive), optionally
    /// rewriting its line endings to `eol`.
    pub fn get_value_in_range(&self, range: Range, eol: Option<&str>) -> Result<String> {
        let line_count = self.get_line_count();
        if range.start_line_number == 0
            || range.end_line_number == 0
            || range.start_column == 0
            || range.end_column == 0
            || range.start_line_number > line_count
            || range.end_line_number > line_count
        {
            return Err(BufferError::InvalidArgument(format!(
                "range {range:?} out of document bounds"
            )));
        }
        if range.start() > range.end() {
            return Err(BufferError::InvalidArgument(format!(
                "range {range:?} has its start after its end"
            )));
        }
        Ok(self.buffer.get_value_in_range(range, eol))
    }

    /// Position of a byte offset; offsets are clamped to the document.
    pub fn get_position_at(&self, offset: usize) -> Position {
        self.buffer.get_position_at(offset)
    }

    /// Byte offset of a 1-based line/column position.
    pub fn get_offset_at(&self, line_number: usize, column: usize) -> usize {
        self.buffer.get_offset_at(line_number, column)
    }

    /// Insert `text` at byte `offset`. Empty text is a no-op; offsets past
    /// the end append. `eol_normalized` declares the text uses only the
    /// document's line ending.
    pub fn insert(&mut self, offset: usize, text: &str, eol_normalized: bool) {
        self.buffer.insert(offset, text, eol_normalized);
    }

    /// Delete `count` bytes starting at `offset`; the count is clamped to
    /// the document end and zero counts are a no-op.
    pub fn delete(&mut self, offset: usize, count: usize) {
        self.buffer.delete(offset, count);
    }

    /// Capture a consistent stream over the current content, prepending
    /// `bom` (pass the captured [`TextBuffer::bom`] to preserve it).
    pub fn create_snapshot(&self, bom: &str) -> Snapshot {
        self.buffer.create_snapshot(bom)
    }

    /// Content equality with another buffer, compared piece-wise.
    pub fn equal(&self, other: &TextBuffer) -> bool {
        self.buffer.equal(&other.buffer)
    }
}

impl std::fmt::Debug for TextBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextBuffer")
            .field("length", &self.get_length())
            .field("line_count", &self.get_line_count())
            .field("eol", &self.buffer.get_eol().display_name())
            .finish()
    }
}
