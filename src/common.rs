//! Editor-facing coordinate types shared across the crate.
//!
//! Positions and ranges use editor conventions: 1-based line numbers and
//! 1-based byte columns. Byte offsets elsewhere in the crate are 0-based.

use crate::error::{BufferError, Result};

/// A position in the document: 1-based line number and 1-based byte column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Position {
    pub line_number: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line_number: usize, column: usize) -> Self {
        Position {
            line_number,
            column,
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.line_number, self.column)
    }
}

/// A range in the document, from a start position (inclusive) to an end
/// position (exclusive), both in 1-based editor coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start_line_number: usize,
    pub start_column: usize,
    pub end_line_number: usize,
    pub end_column: usize,
}

impl Range {
    pub fn new(
        start_line_number: usize,
        start_column: usize,
        end_line_number: usize,
        end_column: usize,
    ) -> Self {
        Range {
            start_line_number,
            start_column,
            end_line_number,
            end_column,
        }
    }

    pub fn from_positions(start: Position, end: Position) -> Self {
        Range::new(start.line_number, start.column, end.line_number, end.column)
    }

    pub fn start(&self) -> Position {
        Position::new(self.start_line_number, self.start_column)
    }

    pub fn end(&self) -> Position {
        Position::new(self.end_line_number, self.end_column)
    }

    pub fn is_empty(&self) -> bool {
        self.start_line_number == self.end_line_number && self.start_column == self.end_column
    }
}

/// Line ending used by the document. Only LF and CRLF are valid document-wide
/// endings; lone `\r` breaks are recognized on input and folded by the
/// builder's statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    /// Unix format (`\n`)
    Lf,
    /// Windows format (`\r\n`)
    Crlf,
}

impl Default for LineEnding {
    fn default() -> Self {
        Self::Lf
    }
}

impl LineEnding {
    /// Get the string representation of this line ending
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::Crlf => "\r\n",
        }
    }

    /// Get the display name for status surfaces
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Lf => "LF",
            Self::Crlf => "CRLF",
        }
    }

    /// Byte length of the ending
    pub fn len(&self) -> usize {
        match self {
            Self::Lf => 1,
            Self::Crlf => 2,
        }
    }

    /// Parse an ending from its literal form. Anything other than `"\n"` or
    /// `"\r\n"` is rejected.
    pub fn try_from_str(s: &str) -> Result<Self> {
        match s {
            "\n" => Ok(Self::Lf),
            "\r\n" => Ok(Self::Crlf),
            other => Err(BufferError::InvalidArgument(format!(
                "invalid end-of-line sequence: {:?}",
                other
            ))),
        }
    }
}
