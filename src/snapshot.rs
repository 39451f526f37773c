//! Point-in-time reader over the piece tree.
//!
//! A snapshot captures the ordered piece list by value together with shared
//! handles to the character buffers. Pieces are never mutated once captured
//! and the buffers it holds are frozen (change-buffer appends copy on write
//! when a snapshot is alive), so the bytes a snapshot emits stay stable while
//! the live tree keeps editing. Reader and writer must still be serialized by
//! the caller; the stability guarantee is data-structural, not a lock.

use std::sync::Arc;

use crate::buffer::{Piece, StringBuffer};

/// Streaming view of the document as it was when the snapshot was created.
///
/// `read` yields the optional BOM followed by one piece's text per call, then
/// empty strings; the concatenation of all chunks is byte-identical to the
/// captured document (BOM included).
#[derive(Debug, Clone)]
pub struct Snapshot {
    pieces: Vec<Piece>,
    buffers: Vec<Arc<StringBuffer>>,
    bom: String,
    index: usize,
}

impl Snapshot {
    pub(crate) fn new(pieces: Vec<Piece>, buffers: Vec<Arc<StringBuffer>>, bom: String) -> Self {
        Snapshot {
            pieces,
            buffers,
            bom,
            index: 0,
        }
    }

    fn piece_content(&self, piece: &Piece) -> Vec<u8> {
        let buffer = &self.buffers[piece.buffer_index];
        let start = buffer.line_starts[piece.start.line] + piece.start.column;
        let end = buffer.line_starts[piece.end.line] + piece.end.column;
        buffer.bytes[start..end].to_vec()
    }

    /// Next chunk of the captured document; empty once exhausted. The first
    /// call carries the BOM, even for an empty document.
    pub fn read(&mut self) -> String {
        if self.pieces.is_empty() {
            if self.index == 0 {
                self.index += 1;
                return self.bom.clone();
            }
            return String::new();
        }

        if self.index > self.pieces.len() - 1 {
            return String::new();
        }

        let piece = self.pieces[self.index];
        let content = String::from_utf8_lossy(&self.piece_content(&piece)).into_owned();
        let chunk = if self.index == 0 {
            format!("{}{}", self.bom, content)
        } else {
            content
        };
        self.index += 1;
        chunk
    }

    /// Drain the remaining chunks into one string.
    pub fn read_to_string(&mut self) -> String {
        let mut out = String::new();
        loop {
            let chunk = self.read();
            if chunk.is_empty() {
                break;
            }
            out.push_str(&chunk);
        }
        out
    }
}

impl Iterator for Snapshot {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = self.read();
        if chunk.is_empty() {
            None
        } else {
            Some(chunk)
        }
    }
}
