//! The piece tree: the storage engine behind the text buffer.
//!
//! # Overview
//! The document is the in-order concatenation of *pieces*, each describing a
//! slice of one character buffer (see `buffer`). Pieces hang off a red-black
//! tree (see `tree`) whose nodes carry left-subtree byte and line-feed
//! totals, so both byte offsets and line numbers resolve in O(log n).
//! Inserted text is appended to the change buffer (index 0) and spliced in as
//! new pieces; deletions trim or remove pieces. Buffer bytes are never
//! rewritten in place.
//!
//! # Line breaks
//! `\r`, `\n` and `\r\n` are all recognized as breaks, with `\r\n` counting
//! once. Because pieces can be split anywhere, a `\r\n` pair can end up
//! straddling two pieces; the CRLF repair path re-joins such seams into a
//! fresh two-byte piece so line counts never drift. Documents known to be
//! EOL-normalized skip those checks entirely.
//!
//! # Sharing
//! Buffers are `Arc`-shared with snapshots. Appending to the change buffer
//! goes through `Arc::make_mut`, so a live snapshot keeps the bytes it
//! captured while the tree moves on.

use std::cell::RefCell;
use std::sync::Arc;

use crate::buffer::{
    create_line_starts_fast, BufferCursor, Piece, StringBuffer,
};
use crate::common::{LineEnding, Position, Range};
use crate::snapshot::Snapshot;
use crate::tree::{NodeIdx, Tree, SENTINEL};

/// Target size for freshly created buffers; inserts larger than this are cut
/// into one buffer per slice.
pub const AVERAGE_BUFFER_SIZE: usize = 65535;

/// A located document position: the node whose piece covers it, the byte
/// offset of the position within that piece, and the document offset at which
/// the piece starts.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct NodePosition {
    pub node: NodeIdx,
    pub remainder: usize,
    pub node_start_offset: usize,
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    node: NodeIdx,
    node_start_offset: usize,
    node_start_line_number: Option<usize>,
}

/// Bounded cache of recently located nodes. Editor access patterns cluster
/// around the caret, so even a single entry saves most descents.
#[derive(Debug)]
struct SearchCache {
    limit: usize,
    cache: Vec<CacheEntry>,
}

impl SearchCache {
    fn new(limit: usize) -> Self {
        SearchCache {
            limit,
            cache: Vec::new(),
        }
    }

    fn get(&self, tree: &Tree, offset: usize) -> Option<CacheEntry> {
        self.cache
            .iter()
            .find(|entry| {
                entry.node_start_offset <= offset
                    && entry.node_start_offset + tree[entry.node].piece.length >= offset
            })
            .copied()
    }

    fn get_by_line(&self, tree: &Tree, line_number: usize) -> Option<CacheEntry> {
        self.cache
            .iter()
            .find(|entry| match entry.node_start_line_number {
                Some(start_line) => {
                    start_line < line_number
                        && start_line + tree[entry.node].piece.line_feed_cnt >= line_number
                }
                None => false,
            })
            .copied()
    }

    fn set(&mut self, entry: CacheEntry) {
        if self.cache.len() >= self.limit {
            self.cache.remove(0);
        }
        self.cache.push(entry);
    }

    /// Conservative invalidation: an edit at `offset` drops every entry whose
    /// covered range reaches `offset`. Entries strictly before the edit keep
    /// both their offsets and their line numbers.
    fn validate(&mut self, tree: &Tree, offset: usize) {
        self.cache
            .retain(|entry| entry.node_start_offset + tree[entry.node].piece.length < offset);
    }

    fn remove_node(&mut self, node: NodeIdx) {
        self.cache.retain(|entry| entry.node != node);
    }
}

fn starts_with_lf(bytes: &[u8]) -> bool {
    bytes.first() == Some(&b'\n')
}

fn ends_with_cr(bytes: &[u8]) -> bool {
    bytes.last() == Some(&b'\r')
}

fn newline_regex() -> regex::bytes::Regex {
    regex::bytes::Regex::new(r"\r\n|\r|\n").expect("newline pattern is valid")
}

/// The piece-tree text buffer core.
///
/// Line numbers on this type are 1-based and columns are 1-based byte
/// columns, matching `Position`; offsets are 0-based bytes. The outer
/// `TextBuffer` adapts the line-index accessors to their 0-based surface.
pub struct PieceTree {
    tree: Tree,
    /// Buffer 0 is the change buffer; the rest are frozen original chunks.
    buffers: Vec<Arc<StringBuffer>>,
    line_cnt: usize,
    length: usize,
    eol: LineEnding,
    eol_normalized: bool,
    last_change_buffer_pos: BufferCursor,
    search_cache: RefCell<SearchCache>,
    /// Cache of the last line served by `get_line_content`; 0 means empty.
    last_visited_line: RefCell<(usize, String)>,
}

impl PieceTree {
    /// Build a tree over the given chunks. Chunks become buffers 1..; empty
    /// chunks are skipped.
    pub(crate) fn create(chunks: Vec<StringBuffer>, eol: LineEnding, eol_normalized: bool) -> Self {
        let mut pt = PieceTree {
            tree: Tree::new(),
            buffers: vec![Arc::new(StringBuffer::empty())],
            line_cnt: 1,
            length: 0,
            eol,
            eol_normalized,
            last_change_buffer_pos: BufferCursor::default(),
            search_cache: RefCell::new(SearchCache::new(1)),
            last_visited_line: RefCell::new((0, String::new())),
        };

        let mut last_node = SENTINEL;
        for chunk in chunks {
            if chunk.bytes.is_empty() {
                continue;
            }
            let last_line = chunk.line_starts.len() - 1;
            let piece = Piece {
                buffer_index: pt.buffers.len(),
                start: BufferCursor::new(0, 0),
                end: BufferCursor::new(last_line, chunk.bytes.len() - chunk.line_starts[last_line]),
                line_feed_cnt: last_line,
                length: chunk.bytes.len(),
            };
            pt.buffers.push(Arc::new(chunk));
            last_node = pt.tree.rb_insert_right(last_node, piece);
        }

        pt.compute_buffer_metadata();
        pt
    }

    /// An empty document with the given EOL.
    pub fn new(eol: LineEnding) -> Self {
        Self::create(Vec::new(), eol, true)
    }

    // ---------- EOL ----------

    pub fn get_eol(&self) -> LineEnding {
        self.eol
    }

    pub fn set_eol(&mut self, eol: LineEnding) {
        self.eol = eol;
        self.normalize_eol(eol);
    }

    fn should_check_crlf(&self) -> bool {
        !self.eol_normalized
    }

    /// Rewrite the whole document to use `eol` uniformly, re-chunked around
    /// the average buffer size.
    fn normalize_eol(&mut self, eol: LineEnding) {
        let min = AVERAGE_BUFFER_SIZE - AVERAGE_BUFFER_SIZE / 3;
        let max = min * 2;
        let pattern = newline_regex();
        let replacement = eol.as_str().as_bytes();

        tracing::debug!(eol = eol.display_name(), "normalizing line endings");

        let mut chunks: Vec<StringBuffer> = Vec::new();
        let mut temp: Vec<u8> = Vec::new();

        let mut x = self.tree.first();
        while x != SENTINEL {
            let content = self.get_node_content(x);
            if temp.len() <= min || temp.len() + content.len() < max {
                temp.extend_from_slice(&content);
            } else {
                let text = pattern.replace_all(&temp, replacement).into_owned();
                chunks.push(StringBuffer::new(text));
                temp = content;
            }
            x = self.tree.next(x);
        }
        if !temp.is_empty() {
            let text = pattern.replace_all(&temp, replacement).into_owned();
            chunks.push(StringBuffer::new(text));
        }

        *self = PieceTree::create(chunks, eol, true);
    }

    // ---------- metadata ----------

    pub fn get_length(&self) -> usize {
        self.length
    }

    pub fn get_line_count(&self) -> usize {
        self.line_cnt
    }

    /// Recompute document length and line count with one in-order walk. Runs
    /// after every public edit.
    fn compute_buffer_metadata(&mut self) {
        let mut line_cnt = 1;
        let mut length = 0;
        let mut x = self.tree.first();
        while x != SENTINEL {
            let piece = &self.tree[x].piece;
            length += piece.length;
            line_cnt += piece.line_feed_cnt;
            x = self.tree.next(x);
        }
        self.line_cnt = line_cnt;
        self.length = length;
    }

    // ---------- buffer arithmetic ----------

    fn offset_in_buffer(&self, buffer_index: usize, cursor: BufferCursor) -> usize {
        self.buffers[buffer_index].line_starts[cursor.line] + cursor.column
    }

    /// Resolve a byte offset within a node's piece to a cursor in the owning
    /// buffer, by binary search over the buffer's line starts.
    fn position_in_buffer(&self, node: NodeIdx, remainder: usize) -> BufferCursor {
        let piece = self.tree[node].piece;
        let line_starts = &self.buffers[piece.buffer_index].line_starts;

        let start_offset = line_starts[piece.start.line] + piece.start.column;
        let offset = start_offset + remainder;

        let mut low = piece.start.line;
        let mut high = piece.end.line;
        let mut mid = low;

        while low <= high {
            mid = low + (high - low) / 2;
            if mid == high {
                break;
            }
            let mid_start = line_starts[mid];
            let mid_stop = line_starts[mid + 1];
            if offset < mid_start {
                high = mid - 1;
            } else if offset >= mid_stop {
                low = mid + 1;
            } else {
                break;
            }
        }

        BufferCursor::new(mid, offset - line_starts[mid])
    }

    /// Number of line breaks in the buffer slice `[start, end)`.
    ///
    /// When `end` sits right after a `\r` whose partner `\n` is the next byte
    /// of the buffer, the cursor arithmetic alone would miss that the break
    /// belongs to this slice; the final probe corrects for it.
    fn line_feed_count(&self, buffer_index: usize, start: BufferCursor, end: BufferCursor) -> usize {
        if end.column == 0 {
            return end.line - start.line;
        }

        let line_starts = &self.buffers[buffer_index].line_starts;
        if end.line == line_starts.len() - 1 {
            // no line break to the right of end
            return end.line - start.line;
        }

        let next_line_start = line_starts[end.line + 1];
        let end_offset = line_starts[end.line] + end.column;
        if next_line_start > end_offset + 1 {
            // the break after end is more than one byte away
            return end.line - start.line;
        }

        let bytes = &self.buffers[buffer_index].bytes;
        if bytes[end_offset - 1] == b'\r' {
            end.line - start.line + 1
        } else {
            end.line - start.line
        }
    }

    /// Cumulative byte offset, relative to the piece's start, of the end of
    /// the `index`-th line inside the piece. A negative index is 0.
    fn get_accumulated_value(&self, node: NodeIdx, index: isize) -> usize {
        if index < 0 {
            return 0;
        }
        let piece = self.tree[node].piece;
        let line_starts = &self.buffers[piece.buffer_index].line_starts;
        let expected_line_start_index = piece.start.line + index as usize + 1;
        if expected_line_start_index > piece.end.line {
            line_starts[piece.end.line] + piece.end.column
                - line_starts[piece.start.line]
                - piece.start.column
        } else {
            line_starts[expected_line_start_index] - line_starts[piece.start.line] - piece.start.column
        }
    }

    /// Map a byte offset within a node's piece to (line index within the
    /// piece, column). If the offset lands exactly at the piece's end behind
    /// a dangling `\r`, the cursor line arithmetic and the true break count
    /// disagree; the corrected count wins and the position snaps to the start
    /// of the following line.
    fn get_index_of(&self, node: NodeIdx, accumulated_value: usize) -> (usize, usize) {
        let piece = self.tree[node].piece;
        let pos = self.position_in_buffer(node, accumulated_value);
        let line_cnt = pos.line - piece.start.line;

        if self.offset_in_buffer(piece.buffer_index, piece.end)
            - self.offset_in_buffer(piece.buffer_index, piece.start)
            == accumulated_value
        {
            let real_line_cnt = self.line_feed_count(piece.buffer_index, piece.start, pos);
            if real_line_cnt != line_cnt {
                return (real_line_cnt, 0);
            }
        }

        (line_cnt, pos.column)
    }

    // ---------- node location ----------

    /// Locate the node covering the document byte `offset`.
    fn node_at(&self, mut offset: usize) -> NodePosition {
        if let Some(entry) = self.search_cache.borrow().get(&self.tree, offset) {
            return NodePosition {
                node: entry.node,
                remainder: offset - entry.node_start_offset,
                node_start_offset: entry.node_start_offset,
            };
        }

        let mut x = self.tree.root;
        let mut node_start_offset = 0;

        while x != SENTINEL {
            let n = &self.tree[x];
            if n.size_left > offset {
                x = n.left;
            } else if n.size_left + n.piece.length >= offset {
                node_start_offset += n.size_left;
                let position = NodePosition {
                    node: x,
                    remainder: offset - n.size_left,
                    node_start_offset,
                };
                self.search_cache.borrow_mut().set(CacheEntry {
                    node: x,
                    node_start_offset,
                    node_start_line_number: None,
                });
                return position;
            } else {
                offset -= n.size_left + n.piece.length;
                node_start_offset += n.size_left + n.piece.length;
                x = n.right;
            }
        }

        NodePosition::default()
    }

    /// Locate the node covering 1-based `line_number` / `column`; zero
    /// coordinates clamp to 1.
    fn node_at_position(&self, line_number: usize, column: usize) -> Option<NodePosition> {
        let mut line_number = line_number.max(1);
        let mut column = column.max(1);
        let mut x = self.tree.root;
        let mut node_start_offset = 0;

        while x != SENTINEL {
            let n = &self.tree[x];
            if n.left != SENTINEL && n.lf_left >= line_number - 1 {
                x = n.left;
            } else if n.lf_left + n.piece.line_feed_cnt > line_number - 1 {
                let prev_accumulated = self.get_accumulated_value(
                    x,
                    line_number as isize - n.lf_left as isize - 2,
                );
                let accumulated =
                    self.get_accumulated_value(x, line_number as isize - n.lf_left as isize - 1);
                node_start_offset += n.size_left;
                return Some(NodePosition {
                    node: x,
                    remainder: (prev_accumulated + column - 1).min(accumulated),
                    node_start_offset,
                });
            } else if n.lf_left + n.piece.line_feed_cnt == line_number - 1 {
                let prev_accumulated = self.get_accumulated_value(
                    x,
                    line_number as isize - n.lf_left as isize - 2,
                );
                if prev_accumulated + column - 1 <= n.piece.length {
                    node_start_offset += n.size_left;
                    return Some(NodePosition {
                        node: x,
                        remainder: prev_accumulated + column - 1,
                        node_start_offset,
                    });
                }
                // the line continues in the next node
                column -= n.piece.length - prev_accumulated;
                break;
            } else {
                line_number -= n.lf_left + n.piece.line_feed_cnt;
                node_start_offset += n.size_left + n.piece.length;
                x = n.right;
            }
        }

        // the position is in a successor; walk forward to the node holding
        // the column
        let mut x = self.tree.next(x);
        while x != SENTINEL {
            let piece = self.tree[x].piece;
            if piece.line_feed_cnt > 0 {
                let accumulated = self.get_accumulated_value(x, 0);
                let node_start_offset = self.offset_of_node(x);
                return Some(NodePosition {
                    node: x,
                    remainder: (column - 1).min(accumulated),
                    node_start_offset,
                });
            }
            if piece.length >= column - 1 {
                let node_start_offset = self.offset_of_node(x);
                return Some(NodePosition {
                    node: x,
                    remainder: column - 1,
                    node_start_offset,
                });
            }
            column -= piece.length;
            x = self.tree.next(x);
        }

        None
    }

    /// Byte at `offset` within a node's piece. Pieces without any line feed
    /// never participate in CRLF checks, so they read as nothing here.
    fn node_char_code_at(&self, node: NodeIdx, offset: usize) -> Option<u8> {
        let piece = self.tree[node].piece;
        if piece.line_feed_cnt < 1 {
            return None;
        }
        let buffer = &self.buffers[piece.buffer_index];
        let at = self.offset_in_buffer(piece.buffer_index, piece.start) + offset;
        buffer.bytes.get(at).copied()
    }

    /// Document offset at which `node`'s piece starts.
    fn offset_of_node(&self, node: NodeIdx) -> usize {
        let mut pos = self.tree[node].size_left;
        let mut node = node;
        while node != self.tree.root {
            let parent = self.tree[node].parent;
            if self.tree[parent].right == node {
                pos += self.tree[parent].size_left + self.tree[parent].piece.length;
            }
            node = parent;
        }
        pos
    }

    // ---------- positional queries ----------

    /// Byte offset of 1-based `line_number` / `column`; zero coordinates
    /// clamp to 1.
    pub fn get_offset_at(&self, line_number: usize, column: usize) -> usize {
        let mut left_len = 0;
        let mut line_number = line_number.max(1);
        let column = column.max(1);
        let mut x = self.tree.root;

        while x != SENTINEL {
            let n = &self.tree[x];
            if n.left != SENTINEL && n.lf_left + 1 >= line_number {
                x = n.left;
            } else if n.lf_left + n.piece.line_feed_cnt + 1 >= line_number {
                left_len += n.size_left;
                let accumulated = self.get_accumulated_value(
                    x,
                    line_number as isize - n.lf_left as isize - 2,
                );
                return left_len + accumulated + column - 1;
            } else {
                line_number -= n.lf_left + n.piece.line_feed_cnt;
                left_len += n.size_left + n.piece.length;
                x = n.right;
            }
        }

        left_len
    }

    /// Position of a byte offset; offsets past the end resolve to the last
    /// position.
    pub fn get_position_at(&self, offset: usize) -> Position {
        let original_offset = offset;
        let mut offset = offset;
        let mut x = self.tree.root;
        let mut lf_cnt = 0;

        while x != SENTINEL {
            let n = &self.tree[x];
            if n.size_left != 0 && n.size_left >= offset {
                x = n.left;
            } else if n.size_left + n.piece.length >= offset {
                let (index, remainder) = self.get_index_of(x, offset - n.size_left);
                lf_cnt += n.lf_left + index;

                if index == 0 {
                    let line_start_offset = self.get_offset_at(lf_cnt + 1, 1);
                    let column = original_offset - line_start_offset;
                    return Position::new(lf_cnt + 1, column + 1);
                }

                return Position::new(lf_cnt + 1, remainder + 1);
            } else {
                offset -= n.size_left + n.piece.length;
                lf_cnt += n.lf_left + n.piece.line_feed_cnt;

                if n.right == SENTINEL {
                    // past the last node; land at the end
                    let line_start_offset = self.get_offset_at(lf_cnt + 1, 1);
                    let column = original_offset - offset - line_start_offset;
                    return Position::new(lf_cnt + 1, column + 1);
                }
                x = n.right;
            }
        }

        Position::new(1, 1)
    }

    // ---------- content extraction ----------

    fn get_node_content(&self, node: NodeIdx) -> Vec<u8> {
        if node == SENTINEL {
            return Vec::new();
        }
        let piece = self.tree[node].piece;
        let buffer = &self.buffers[piece.buffer_index];
        let start = self.offset_in_buffer(piece.buffer_index, piece.start);
        let end = self.offset_in_buffer(piece.buffer_index, piece.end);
        buffer.bytes[start..end].to_vec()
    }

    /// Full document bytes, in piece order.
    pub fn get_value_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.length);
        let mut x = self.tree.first();
        while x != SENTINEL {
            out.extend_from_slice(&self.get_node_content(x));
            x = self.tree.next(x);
        }
        out
    }

    /// Full document text.
    pub fn get_value(&self) -> String {
        String::from_utf8_lossy(&self.get_value_bytes()).into_owned()
    }

    fn get_value_in_range_nodes(&self, start: NodePosition, end: NodePosition) -> Vec<u8> {
        if start.node == end.node {
            let piece = self.tree[start.node].piece;
            let buffer = &self.buffers[piece.buffer_index];
            let start_offset = self.offset_in_buffer(piece.buffer_index, piece.start);
            return buffer.bytes[start_offset + start.remainder..start_offset + end.remainder]
                .to_vec();
        }

        let mut x = start.node;
        let piece = self.tree[x].piece;
        let buffer = &self.buffers[piece.buffer_index];
        let start_offset = self.offset_in_buffer(piece.buffer_index, piece.start);
        let mut ret =
            buffer.bytes[start_offset + start.remainder..start_offset + piece.length].to_vec();

        x = self.tree.next(x);
        while x != SENTINEL {
            let piece = self.tree[x].piece;
            let buffer = &self.buffers[piece.buffer_index];
            let start_offset = self.offset_in_buffer(piece.buffer_index, piece.start);

            if x == end.node {
                ret.extend_from_slice(&buffer.bytes[start_offset..start_offset + end.remainder]);
                break;
            }
            ret.extend_from_slice(&buffer.bytes[start_offset..start_offset + piece.length]);
            x = self.tree.next(x);
        }

        ret
    }

    /// Text covered by `range`, optionally rewriting its line endings to
    /// `eol`.
    pub fn get_value_in_range(&self, range: Range, eol: Option<&str>) -> String {
        if range.is_empty() {
            return String::new();
        }

        let start = self.node_at_position(range.start_line_number, range.start_column);
        let end = self.node_at_position(range.end_line_number, range.end_column);
        let value = match (start, end) {
            (Some(start), Some(end)) => self.get_value_in_range_nodes(start, end),
            _ => Vec::new(),
        };

        match eol {
            Some(eol) if eol != self.eol.as_str() || !self.eol_normalized => {
                let replaced = newline_regex().replace_all(&value, eol.as_bytes()).into_owned();
                String::from_utf8_lossy(&replaced).into_owned()
            }
            _ => String::from_utf8_lossy(&value).into_owned(),
        }
    }

    /// All lines of the document, without their trailing breaks.
    pub fn get_lines_content(&self) -> Vec<String> {
        let content = self.get_value_bytes();
        let mut lines = Vec::new();
        let mut start = 0;
        let mut i = 0;
        while i < content.len() {
            match content[i] {
                b'\r' => {
                    lines.push(String::from_utf8_lossy(&content[start..i]).into_owned());
                    if i + 1 < content.len() && content[i + 1] == b'\n' {
                        i += 1;
                    }
                    start = i + 1;
                }
                b'\n' => {
                    lines.push(String::from_utf8_lossy(&content[start..i]).into_owned());
                    start = i + 1;
                }
                _ => {}
            }
            i += 1;
        }
        lines.push(String::from_utf8_lossy(&content[start..]).into_owned());
        lines
    }

    /// Raw bytes of 1-based `line_number`, with `end_offset` bytes of its
    /// trailing break cut off.
    fn get_line_raw_content(&self, mut line_number: usize, end_offset: usize) -> Vec<u8> {
        let mut x = self.tree.root;
        let mut ret: Vec<u8> = Vec::new();

        let cache = self
            .search_cache
            .borrow()
            .get_by_line(&self.tree, line_number);

        if let Some(entry) = cache {
            x = entry.node;
            let node_start_line = entry
                .node_start_line_number
                .unwrap_or(1);
            let prev_accumulated = self.get_accumulated_value(
                x,
                line_number as isize - node_start_line as isize - 1,
            );
            let piece = self.tree[x].piece;
            let buffer = &self.buffers[piece.buffer_index];
            let start_offset = self.offset_in_buffer(piece.buffer_index, piece.start);

            if node_start_line + piece.line_feed_cnt == line_number {
                // line runs to the end of this piece and continues in the next
                ret.extend_from_slice(
                    &buffer.bytes[start_offset + prev_accumulated..start_offset + piece.length],
                );
            } else {
                let accumulated = self.get_accumulated_value(
                    x,
                    line_number as isize - node_start_line as isize,
                );
                return buffer.bytes
                    [start_offset + prev_accumulated..start_offset + accumulated - end_offset]
                    .to_vec();
            }
        } else {
            let mut node_start_offset = 0;
            let original_line_number = line_number;

            while x != SENTINEL {
                let n = &self.tree[x];
                if n.left != SENTINEL && n.lf_left >= line_number - 1 {
                    x = n.left;
                } else if n.lf_left + n.piece.line_feed_cnt > line_number - 1 {
                    let prev_accumulated = self.get_accumulated_value(
                        x,
                        line_number as isize - n.lf_left as isize - 2,
                    );
                    let accumulated = self.get_accumulated_value(
                        x,
                        line_number as isize - n.lf_left as isize - 1,
                    );
                    let piece = n.piece;
                    node_start_offset += n.size_left;
                    let lf_left = n.lf_left;

                    self.search_cache.borrow_mut().set(CacheEntry {
                        node: x,
                        node_start_offset,
                        node_start_line_number: Some(
                            original_line_number - (line_number - 1 - lf_left),
                        ),
                    });

                    let buffer = &self.buffers[piece.buffer_index];
                    let start_offset = self.offset_in_buffer(piece.buffer_index, piece.start);
                    return buffer.bytes
                        [start_offset + prev_accumulated..start_offset + accumulated - end_offset]
                        .to_vec();
                } else if n.lf_left + n.piece.line_feed_cnt == line_number - 1 {
                    // line starts at the tail of this piece
                    let prev_accumulated = self.get_accumulated_value(
                        x,
                        line_number as isize - n.lf_left as isize - 2,
                    );
                    let piece = n.piece;
                    let buffer = &self.buffers[piece.buffer_index];
                    let start_offset = self.offset_in_buffer(piece.buffer_index, piece.start);
                    ret.extend_from_slice(
                        &buffer.bytes
                            [start_offset + prev_accumulated..start_offset + piece.length],
                    );
                    break;
                } else {
                    line_number -= n.lf_left + n.piece.line_feed_cnt;
                    node_start_offset += n.size_left + n.piece.length;
                    x = n.right;
                }
            }
        }

        // collect the rest of the line from successor nodes
        let mut x = self.tree.next(x);
        while x != SENTINEL {
            let piece = self.tree[x].piece;
            let buffer = &self.buffers[piece.buffer_index];
            let start_offset = self.offset_in_buffer(piece.buffer_index, piece.start);

            if piece.line_feed_cnt > 0 {
                let accumulated = self.get_accumulated_value(x, 0);
                ret.extend_from_slice(
                    &buffer.bytes[start_offset..start_offset + accumulated - end_offset],
                );
                return ret;
            }
            ret.extend_from_slice(&buffer.bytes[start_offset..start_offset + piece.length]);
            x = self.tree.next(x);
        }

        ret
    }

    /// Content of 1-based `line_number`, without its trailing break.
    pub fn get_line_content(&self, line_number: usize) -> String {
        {
            let cached = self.last_visited_line.borrow();
            if cached.0 == line_number {
                return cached.1.clone();
            }
        }

        let value = if line_number == self.line_cnt {
            // last line has no trailing break
            String::from_utf8_lossy(&self.get_line_raw_content(line_number, 0)).into_owned()
        } else if self.eol_normalized {
            String::from_utf8_lossy(&self.get_line_raw_content(line_number, self.eol.len()))
                .into_owned()
        } else {
            let mut raw = self.get_line_raw_content(line_number, 0);
            if raw.ends_with(b"\r\n") {
                raw.truncate(raw.len() - 2);
            } else if matches!(raw.last(), Some(b'\n') | Some(b'\r')) {
                raw.truncate(raw.len() - 1);
            }
            String::from_utf8_lossy(&raw).into_owned()
        };

        *self.last_visited_line.borrow_mut() = (line_number, value.clone());
        value
    }

    /// Byte length of 1-based `line_number`, excluding its trailing break.
    pub fn get_line_length(&self, line_number: usize) -> usize {
        if line_number == self.line_cnt {
            let start_offset = self.get_offset_at(line_number, 1);
            return self.length - start_offset;
        }
        if self.eol_normalized {
            self.get_offset_at(line_number + 1, 1) - self.get_offset_at(line_number, 1)
                - self.eol.len()
        } else {
            // mixed endings: the break length varies per line
            self.get_line_content(line_number).len()
        }
    }

    /// Byte at 0-based `index` within 1-based `line_number`.
    pub fn get_line_char_code(&self, line_number: usize, index: usize) -> Option<u8> {
        let node_pos = self.node_at_position(line_number, index + 1)?;
        if node_pos.remainder == self.tree[node_pos.node].piece.length {
            // the byte sits at the head of the next node
            let matching = self.tree.next(node_pos.node);
            if matching == SENTINEL {
                return None;
            }
            let piece = self.tree[matching].piece;
            let buffer = &self.buffers[piece.buffer_index];
            let start_offset = self.offset_in_buffer(piece.buffer_index, piece.start);
            buffer.bytes.get(start_offset).copied()
        } else {
            let piece = self.tree[node_pos.node].piece;
            let buffer = &self.buffers[piece.buffer_index];
            let at = self.offset_in_buffer(piece.buffer_index, piece.start) + node_pos.remainder;
            buffer.bytes.get(at).copied()
        }
    }

    // ---------- comparison & snapshots ----------

    /// Structural equality of content, without materializing either document.
    pub fn equal(&self, other: &PieceTree) -> bool {
        if self.length != other.length || self.line_cnt != other.line_cnt {
            return false;
        }

        let mut offset = 0;
        let mut x = self.tree.first();
        while x != SENTINEL {
            let content = self.get_node_content(x);
            if !content.is_empty() {
                let start = other.node_at(offset);
                let end = other.node_at(offset + content.len());
                let theirs = other.get_value_in_range_nodes(start, end);
                if content != theirs {
                    return false;
                }
            }
            offset += content.len();
            x = self.tree.next(x);
        }
        true
    }

    /// Capture the current piece list for stable out-of-band reading.
    pub fn create_snapshot(&self, bom: &str) -> Snapshot {
        let mut pieces = Vec::new();
        let mut x = self.tree.first();
        while x != SENTINEL {
            pieces.push(self.tree[x].piece);
            x = self.tree.next(x);
        }
        Snapshot::new(pieces, self.buffers.clone(), bom.to_string())
    }

    // ---------- CRLF helpers ----------

    fn start_with_lf_node(&self, node: NodeIdx) -> bool {
        if node == SENTINEL {
            return false;
        }
        let piece = self.tree[node].piece;
        if piece.line_feed_cnt < 1 {
            return false;
        }
        let buffer = &self.buffers[piece.buffer_index];
        if piece.start.line >= buffer.line_starts.len() {
            return false;
        }
        let pos = buffer.line_starts[piece.start.line] + piece.start.column;
        buffer.bytes.get(pos) == Some(&b'\n')
    }

    fn end_with_cr_node(&self, node: NodeIdx) -> bool {
        if node == SENTINEL {
            return false;
        }
        let piece = self.tree[node].piece;
        let buffer = &self.buffers[piece.buffer_index];
        if piece.end.line >= buffer.line_starts.len() {
            return false;
        }
        let pos = buffer.line_starts[piece.end.line] + piece.end.column;
        pos > 0 && buffer.bytes.get(pos - 1) == Some(&b'\r')
    }

    fn validate_crlf_with_prev_node(&mut self, node: NodeIdx) {
        if node == SENTINEL || !self.should_check_crlf() {
            return;
        }
        let prev = self.tree.prev(node);
        if prev != SENTINEL && self.end_with_cr_node(prev) && self.start_with_lf_node(node) {
            self.fix_crlf(prev, node);
        }
    }

    fn validate_crlf_with_next_node(&mut self, node: NodeIdx) {
        if node == SENTINEL || !self.should_check_crlf() {
            return;
        }
        let next = self.tree.next(node);
        if next != SENTINEL && self.end_with_cr_node(node) && self.start_with_lf_node(next) {
            self.fix_crlf(node, next);
        }
    }

    /// Re-join a `\r` | `\n` seam: carve the two bytes out of their pieces
    /// and splice in a fresh change-buffer piece holding the literal pair.
    fn fix_crlf(&mut self, prev: NodeIdx, next: NodeIdx) {
        let mut nodes_to_del = Vec::new();

        // shrink prev by its trailing \r
        let prev_piece = self.tree[prev].piece;
        let new_end = if prev_piece.end.column == 0 {
            // the \r sits at the end of the previous line
            let line_starts = &self.buffers[prev_piece.buffer_index].line_starts;
            BufferCursor::new(
                prev_piece.end.line - 1,
                line_starts[prev_piece.end.line] - line_starts[prev_piece.end.line - 1] - 1,
            )
        } else {
            BufferCursor::new(prev_piece.end.line, prev_piece.end.column - 1)
        };
        self.tree[prev].piece = Piece {
            end: new_end,
            length: prev_piece.length - 1,
            line_feed_cnt: prev_piece.line_feed_cnt - 1,
            ..prev_piece
        };
        self.tree.update_metadata_path(prev, -1, -1);
        if self.tree[prev].piece.length == 0 {
            nodes_to_del.push(prev);
        }

        // shrink next by its leading \n
        let next_piece = self.tree[next].piece;
        let new_start = BufferCursor::new(next_piece.start.line + 1, 0);
        let new_lf = self.line_feed_count(next_piece.buffer_index, new_start, next_piece.end);
        self.tree[next].piece = Piece {
            start: new_start,
            length: next_piece.length - 1,
            line_feed_cnt: new_lf,
            ..next_piece
        };
        self.tree.update_metadata_path(next, -1, -1);
        if self.tree[next].piece.length == 0 {
            nodes_to_del.push(next);
        }

        let pieces = self.create_new_pieces(b"\r\n");
        self.tree.rb_insert_right(prev, pieces[0]);

        for node in nodes_to_del {
            self.remove_node(node);
        }
    }

    /// When `value` ends with `\r` and the next node starts with `\n`, steal
    /// that `\n` (shrinking or deleting the next node) so the caller can keep
    /// the pair together. Returns whether the `\n` was taken.
    fn adjust_carriage_return_from_next(&mut self, value: &[u8], node: NodeIdx) -> bool {
        if !(self.should_check_crlf() && ends_with_cr(value)) {
            return false;
        }
        let next = self.tree.next(node);
        if !self.start_with_lf_node(next) {
            return false;
        }

        if self.tree[next].piece.length == 1 {
            self.remove_node(next);
        } else {
            let piece = self.tree[next].piece;
            let new_start = BufferCursor::new(piece.start.line + 1, 0);
            let new_lf = self.line_feed_count(piece.buffer_index, new_start, piece.end);
            self.tree[next].piece = Piece {
                start: new_start,
                length: piece.length - 1,
                line_feed_cnt: new_lf,
                ..piece
            };
            self.tree.update_metadata_path(next, -1, -1);
        }
        true
    }

    // ---------- piece creation ----------

    fn piece_for_fresh_buffer(&mut self, text: &[u8]) -> Piece {
        let buffer = StringBuffer::new(text.to_vec());
        let last_line = buffer.line_starts.len() - 1;
        let piece = Piece {
            buffer_index: self.buffers.len(),
            start: BufferCursor::new(0, 0),
            end: BufferCursor::new(last_line, buffer.bytes.len() - buffer.line_starts[last_line]),
            line_feed_cnt: last_line,
            length: buffer.bytes.len(),
        };
        self.buffers.push(Arc::new(buffer));
        piece
    }

    /// Turn `text` into one or more pieces. Small texts are appended to the
    /// change buffer; texts above `AVERAGE_BUFFER_SIZE` are cut into fresh
    /// buffers at boundaries that keep UTF-8 sequences and `\r\n` pairs
    /// intact.
    fn create_new_pieces(&mut self, text: &[u8]) -> Vec<Piece> {
        if text.len() > AVERAGE_BUFFER_SIZE {
            let mut pieces = Vec::new();
            let mut rest = text;
            while rest.len() > AVERAGE_BUFFER_SIZE {
                let mut split = AVERAGE_BUFFER_SIZE;
                while split > 0 && rest[split] & 0xC0 == 0x80 {
                    split -= 1;
                }
                if split > 0 && rest[split - 1] == b'\r' && rest[split] == b'\n' {
                    split -= 1;
                }
                if split == 0 {
                    // not valid UTF-8 anyway; cut at the raw boundary
                    split = AVERAGE_BUFFER_SIZE;
                }
                let (chunk, tail) = rest.split_at(split);
                pieces.push(self.piece_for_fresh_buffer(chunk));
                rest = tail;
            }
            if !rest.is_empty() {
                pieces.push(self.piece_for_fresh_buffer(rest));
            }
            return pieces;
        }

        let start_offset = self.buffers[0].bytes.len();
        if start_offset != 0 && starts_with_lf(text) && ends_with_cr(&self.buffers[0].bytes) {
            // Appending would fuse the buffer's trailing \r with the new
            // leading \n and desynchronize the change buffer's line-start
            // table. Route the text into a fresh buffer instead.
            return vec![self.piece_for_fresh_buffer(text)];
        }

        let line_starts = create_line_starts_fast(text);
        let start = self.last_change_buffer_pos;
        {
            let buf = Arc::make_mut(&mut self.buffers[0]);
            buf.bytes.extend_from_slice(text);
            for &ls in &line_starts[1..] {
                buf.line_starts.push(ls + start_offset);
            }
        }
        let buf = &self.buffers[0];
        let end_index = buf.line_starts.len() - 1;
        let end = BufferCursor::new(end_index, buf.bytes.len() - buf.line_starts[end_index]);
        let length = buf.bytes.len() - start_offset;
        self.last_change_buffer_pos = end;

        vec![Piece {
            buffer_index: 0,
            start,
            end,
            line_feed_cnt: end.line - start.line,
            length,
        }]
    }

    // ---------- node removal ----------

    fn remove_node(&mut self, node: NodeIdx) {
        self.search_cache.borrow_mut().remove_node(node);
        self.tree.rb_delete(node);
    }

    fn delete_nodes(&mut self, nodes: Vec<NodeIdx>) {
        for node in nodes {
            self.remove_node(node);
        }
    }

    // ---------- piece trimming ----------

    /// Trim the piece's tail so it ends at `pos`.
    fn delete_node_tail(&mut self, node: NodeIdx, pos: BufferCursor) {
        let piece = self.tree[node].piece;
        let original_lf_cnt = piece.line_feed_cnt;
        let original_end_offset = self.offset_in_buffer(piece.buffer_index, piece.end);

        let new_end = pos;
        let new_end_offset = self.offset_in_buffer(piece.buffer_index, new_end);
        let new_line_feed_cnt = self.line_feed_count(piece.buffer_index, piece.start, new_end);

        let lf_delta = new_line_feed_cnt as isize - original_lf_cnt as isize;
        let size_delta = new_end_offset as isize - original_end_offset as isize;
        let new_length = (piece.length as isize + size_delta) as usize;

        self.tree[node].piece = Piece {
            end: new_end,
            line_feed_cnt: new_line_feed_cnt,
            length: new_length,
            ..piece
        };
        self.tree.update_metadata_path(node, size_delta, lf_delta);
    }

    /// Trim the piece's head so it starts at `pos`.
    fn delete_node_head(&mut self, node: NodeIdx, pos: BufferCursor) {
        let piece = self.tree[node].piece;
        let original_lf_cnt = piece.line_feed_cnt;
        let original_start_offset = self.offset_in_buffer(piece.buffer_index, piece.start);

        let new_start = pos;
        let new_line_feed_cnt = self.line_feed_count(piece.buffer_index, new_start, piece.end);
        let new_start_offset = self.offset_in_buffer(piece.buffer_index, new_start);

        let lf_delta = new_line_feed_cnt as isize - original_lf_cnt as isize;
        let size_delta = original_start_offset as isize - new_start_offset as isize;
        let new_length = (piece.length as isize + size_delta) as usize;

        self.tree[node].piece = Piece {
            start: new_start,
            line_feed_cnt: new_line_feed_cnt,
            length: new_length,
            ..piece
        };
        self.tree.update_metadata_path(node, size_delta, lf_delta);
    }

    /// Cut `[start, end)` out of the middle of the piece: the node keeps the
    /// left part, a new right-part node is spliced in after it.
    fn shrink_node(&mut self, node: NodeIdx, start: BufferCursor, end: BufferCursor) {
        let piece = self.tree[node].piece;
        let original_start_pos = piece.start;
        let original_end_pos = piece.end;

        let old_length = piece.length;
        let old_lf_cnt = piece.line_feed_cnt;
        let new_end = start;
        let new_line_feed_cnt = self.line_feed_count(piece.buffer_index, piece.start, new_end);
        let new_length = self.offset_in_buffer(piece.buffer_index, start)
            - self.offset_in_buffer(piece.buffer_index, original_start_pos);

        self.tree[node].piece = Piece {
            end: new_end,
            line_feed_cnt: new_line_feed_cnt,
            length: new_length,
            ..piece
        };
        self.tree.update_metadata_path(
            node,
            new_length as isize - old_length as isize,
            new_line_feed_cnt as isize - old_lf_cnt as isize,
        );

        let right_piece = Piece {
            buffer_index: piece.buffer_index,
            start: end,
            end: original_end_pos,
            line_feed_cnt: self.line_feed_count(piece.buffer_index, end, original_end_pos),
            length: self.offset_in_buffer(piece.buffer_index, original_end_pos)
                - self.offset_in_buffer(piece.buffer_index, end),
        };
        let new_node = self.tree.rb_insert_right(node, right_piece);
        self.validate_crlf_with_prev_node(new_node);
    }

    // ---------- change-buffer append ----------

    /// Fast path: extend the node's piece in place by appending to the change
    /// buffer. Only valid for the unique piece ending at the buffer's tail.
    fn append_to_node(&mut self, node: NodeIdx, value: &[u8]) {
        let mut value = value.to_vec();
        if self.adjust_carriage_return_from_next(&value, node) {
            value.push(b'\n');
        }

        let hit_crlf =
            self.should_check_crlf() && starts_with_lf(&value) && self.end_with_cr_node(node);
        let start_offset = self.buffers[0].bytes.len();
        let line_starts = create_line_starts_fast(&value);

        {
            let buf = Arc::make_mut(&mut self.buffers[0]);
            buf.bytes.extend_from_slice(&value);
            if hit_crlf {
                // the line start recorded after the trailing \r is no longer
                // a boundary once the \n joins it
                let prev_start_offset = buf.line_starts[buf.line_starts.len() - 2];
                buf.line_starts.pop();
                self.last_change_buffer_pos = BufferCursor::new(
                    self.last_change_buffer_pos.line - 1,
                    start_offset - prev_start_offset,
                );
            }
            for &ls in &line_starts[1..] {
                buf.line_starts.push(ls + start_offset);
            }
        }

        let buf = &self.buffers[0];
        let end_index = buf.line_starts.len() - 1;
        let new_end = BufferCursor::new(end_index, buf.bytes.len() - buf.line_starts[end_index]);

        let piece = self.tree[node].piece;
        let new_length = piece.length + value.len();
        let old_lf = piece.line_feed_cnt;
        let new_lf = self.line_feed_count(0, piece.start, new_end);
        let lf_delta = new_lf as isize - old_lf as isize;

        self.tree[node].piece = Piece {
            end: new_end,
            line_feed_cnt: new_lf,
            length: new_length,
            ..piece
        };
        self.last_change_buffer_pos = new_end;
        self.tree
            .update_metadata_path(node, value.len() as isize, lf_delta);
    }

    // ---------- insert ----------

    fn insert_content_to_node_left(&mut self, value: &[u8], node: NodeIdx) {
        let mut nodes_to_del = Vec::new();
        let mut value = value.to_vec();

        if self.should_check_crlf() && ends_with_cr(&value) && self.start_with_lf_node(node) {
            // move the node's leading \n over to the inserted text
            let piece = self.tree[node].piece;
            let new_start = BufferCursor::new(piece.start.line + 1, 0);
            let new_lf = self.line_feed_count(piece.buffer_index, new_start, piece.end);
            self.tree[node].piece = Piece {
                start: new_start,
                line_feed_cnt: new_lf,
                length: piece.length - 1,
                ..piece
            };
            value.push(b'\n');
            self.tree.update_metadata_path(node, -1, -1);
            if self.tree[node].piece.length == 0 {
                nodes_to_del.push(node);
            }
        }

        let new_pieces = self.create_new_pieces(&value);
        let mut new_node = self.tree.rb_insert_left(node, new_pieces[new_pieces.len() - 1]);
        for piece in new_pieces[..new_pieces.len() - 1].iter().rev() {
            new_node = self.tree.rb_insert_left(new_node, *piece);
        }
        self.validate_crlf_with_prev_node(new_node);
        self.delete_nodes(nodes_to_del);
    }

    fn insert_content_to_node_right(&mut self, value: &[u8], node: NodeIdx) {
        let mut value = value.to_vec();
        if self.adjust_carriage_return_from_next(&value, node) {
            value.push(b'\n');
        }

        let new_pieces = self.create_new_pieces(&value);
        let new_node = self.tree.rb_insert_right(node, new_pieces[0]);
        let mut tmp_node = new_node;
        for piece in &new_pieces[1..] {
            tmp_node = self.tree.rb_insert_right(tmp_node, *piece);
        }
        self.validate_crlf_with_prev_node(new_node);
    }

    /// Insert `value` at byte `offset`. Empty text is a no-op; the offset is
    /// clamped to the document. `eol_normalized` declares that the text only
    /// uses the document's EOL, which keeps the CRLF fast path alive.
    pub fn insert(&mut self, offset: usize, value: &str, eol_normalized: bool) {
        if value.is_empty() {
            return;
        }
        self.eol_normalized = self.eol_normalized && eol_normalized;
        *self.last_visited_line.borrow_mut() = (0, String::new());
        let offset = offset.min(self.length);

        tracing::trace!(offset, len = value.len(), "insert");

        if self.tree.root != SENTINEL {
            let NodePosition {
                node,
                remainder,
                node_start_offset,
            } = self.node_at(offset);
            let piece = self.tree[node].piece;
            let insert_pos_in_buffer = self.position_in_buffer(node, remainder);

            if piece.buffer_index == 0
                && piece.end == self.last_change_buffer_pos
                && node_start_offset + piece.length == offset
                && value.len() < AVERAGE_BUFFER_SIZE
            {
                // the insertion continues the piece that owns the change
                // buffer's tail; extend it in place
                self.append_to_node(node, value.as_bytes());
                self.compute_buffer_metadata();
                #[cfg(debug_assertions)]
                self.assert_buffer_invariants();
                return;
            }

            if node_start_offset == offset {
                self.insert_content_to_node_left(value.as_bytes(), node);
                self.search_cache.borrow_mut().validate(&self.tree, offset);
            } else if node_start_offset + piece.length > offset {
                // inserting into the middle of the node
                let mut nodes_to_del = Vec::new();
                let mut value_buf = value.as_bytes().to_vec();

                let mut new_right_piece = Piece {
                    buffer_index: piece.buffer_index,
                    start: insert_pos_in_buffer,
                    end: piece.end,
                    line_feed_cnt: self.line_feed_count(
                        piece.buffer_index,
                        insert_pos_in_buffer,
                        piece.end,
                    ),
                    length: self.offset_in_buffer(piece.buffer_index, piece.end)
                        - self.offset_in_buffer(piece.buffer_index, insert_pos_in_buffer),
                };

                if self.should_check_crlf()
                    && ends_with_cr(&value_buf)
                    && self.node_char_code_at(node, remainder) == Some(b'\n')
                {
                    // keep the pair together inside the inserted text
                    let new_start =
                        BufferCursor::new(new_right_piece.start.line + 1, 0);
                    new_right_piece = Piece {
                        start: new_start,
                        line_feed_cnt: self.line_feed_count(
                            piece.buffer_index,
                            new_start,
                            piece.end,
                        ),
                        length: self.offset_in_buffer(piece.buffer_index, piece.end)
                            - self.offset_in_buffer(piece.buffer_index, new_start),
                        ..new_right_piece
                    };
                    value_buf.push(b'\n');
                }

                if self.should_check_crlf()
                    && starts_with_lf(&value_buf)
                    && self.node_char_code_at(node, remainder - 1) == Some(b'\r')
                {
                    let previous_pos = self.position_in_buffer(node, remainder - 1);
                    self.delete_node_tail(node, previous_pos);
                    value_buf.insert(0, b'\r');
                    if self.tree[node].piece.length == 0 {
                        nodes_to_del.push(node);
                    }
                } else {
                    self.delete_node_tail(node, insert_pos_in_buffer);
                }

                let new_pieces = self.create_new_pieces(&value_buf);
                let mut tmp_node = node;
                for piece in new_pieces {
                    tmp_node = self.tree.rb_insert_right(tmp_node, piece);
                }
                if new_right_piece.length > 0 {
                    self.tree.rb_insert_right(tmp_node, new_right_piece);
                }
                self.delete_nodes(nodes_to_del);
            } else {
                self.insert_content_to_node_right(value.as_bytes(), node);
            }
        } else {
            // empty document
            let mut pieces = self.create_new_pieces(value.as_bytes()).into_iter();
            if let Some(first) = pieces.next() {
                let mut node = self.tree.rb_insert_left(SENTINEL, first);
                for piece in pieces {
                    node = self.tree.rb_insert_right(node, piece);
                }
            }
        }

        self.compute_buffer_metadata();
        #[cfg(debug_assertions)]
        self.assert_buffer_invariants();
    }

    // ---------- delete ----------

    /// Delete `count` bytes starting at `offset`. Counts are clamped to the
    /// document end; a non-positive count is a no-op.
    pub fn delete(&mut self, offset: usize, count: usize) {
        *self.last_visited_line.borrow_mut() = (0, String::new());

        if count == 0 || self.tree.root == SENTINEL || offset >= self.length {
            return;
        }
        let count = count.min(self.length - offset);

        tracing::trace!(offset, count, "delete");

        let start_position = self.node_at(offset);
        let end_position = self.node_at(offset + count);
        let start_node = start_position.node;
        let end_node = end_position.node;

        if start_node == end_node {
            let start_split = self.position_in_buffer(start_node, start_position.remainder);
            let end_split = self.position_in_buffer(start_node, end_position.remainder);

            if start_position.node_start_offset == offset {
                if count == self.tree[start_node].piece.length {
                    // the whole piece goes away
                    let next = self.tree.next(start_node);
                    self.remove_node(start_node);
                    self.validate_crlf_with_prev_node(next);
                    self.compute_buffer_metadata();
                    #[cfg(debug_assertions)]
                    self.assert_buffer_invariants();
                    return;
                }
                self.delete_node_head(start_node, end_split);
                self.search_cache.borrow_mut().validate(&self.tree, offset);
                self.validate_crlf_with_prev_node(start_node);
                self.compute_buffer_metadata();
                #[cfg(debug_assertions)]
                self.assert_buffer_invariants();
                return;
            }

            if start_position.node_start_offset + self.tree[start_node].piece.length
                == offset + count
            {
                self.delete_node_tail(start_node, start_split);
                self.validate_crlf_with_next_node(start_node);
                self.compute_buffer_metadata();
                #[cfg(debug_assertions)]
                self.assert_buffer_invariants();
                return;
            }

            // delete from the middle; the node splits in two
            self.shrink_node(start_node, start_split, end_split);
            self.compute_buffer_metadata();
            #[cfg(debug_assertions)]
            self.assert_buffer_invariants();
            return;
        }

        let mut nodes_to_del = Vec::new();

        let start_split = self.position_in_buffer(start_node, start_position.remainder);
        self.delete_node_tail(start_node, start_split);
        self.search_cache.borrow_mut().validate(&self.tree, offset);
        if self.tree[start_node].piece.length == 0 {
            nodes_to_del.push(start_node);
        }

        let end_split = self.position_in_buffer(end_node, end_position.remainder);
        self.delete_node_head(end_node, end_split);
        if self.tree[end_node].piece.length == 0 {
            nodes_to_del.push(end_node);
        }

        let mut node = self.tree.next(start_node);
        while node != SENTINEL && node != end_node {
            nodes_to_del.push(node);
            node = self.tree.next(node);
        }

        let prev = if self.tree[start_node].piece.length == 0 {
            self.tree.prev(start_node)
        } else {
            start_node
        };
        self.delete_nodes(nodes_to_del);
        self.validate_crlf_with_next_node(prev);

        self.compute_buffer_metadata();
        #[cfg(debug_assertions)]
        self.assert_buffer_invariants();
    }

    // ---------- invariant audit ----------

    /// Full consistency audit: red-black and aggregate invariants, per-piece
    /// line-feed counts, and the cached document totals. Debug/test only.
    #[cfg(any(test, debug_assertions))]
    pub(crate) fn assert_buffer_invariants(&self) {
        self.tree.assert_invariants();

        let mut length = 0;
        let mut lf = 0;
        let mut x = self.tree.first();
        while x != SENTINEL {
            let piece = self.tree[x].piece;
            assert_eq!(
                piece.line_feed_cnt,
                self.line_feed_count(piece.buffer_index, piece.start, piece.end),
                "piece line feed count out of sync"
            );
            assert_eq!(
                piece.length,
                self.offset_in_buffer(piece.buffer_index, piece.end)
                    - self.offset_in_buffer(piece.buffer_index, piece.start),
                "piece length out of sync with its cursors"
            );
            length += piece.length;
            lf += piece.line_feed_cnt;
            x = self.tree.next(x);
        }
        assert_eq!(self.length, length, "document length out of sync");
        assert_eq!(self.line_cnt, lf + 1, "document line count out of sync");
    }
}

impl std::fmt::Debug for PieceTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PieceTree")
            .field("length", &self.length)
            .field("line_cnt", &self.line_cnt)
            .field("eol", &self.eol)
            .field("eol_normalized", &self.eol_normalized)
            .field("buffers", &self.buffers.len())
            .finish()
    }
}
