//! Chunked construction of text buffers.
//!
//! The builder ingests an ordered sequence of byte chunks (typically file
//! reads), scanning each for line starts and break statistics as it arrives.
//! A UTF-8 BOM on the first chunk is captured separately and excluded from
//! document content. A chunk ending in `\r` holds that byte back so a `\r\n`
//! split across two chunks is still counted as a single break; the final
//! flush commits a still-held `\r` as a lone carriage return.
//!
//! `finish` produces a factory that decides the document EOL by majority
//! vote and can optionally normalize all endings before building the tree.

use crate::buffer::{create_line_starts, create_line_starts_fast, StringBuffer};
use crate::common::LineEnding;
use crate::piece_tree::PieceTree;

/// UTF-8 byte-order mark.
pub const UTF8_BOM: &str = "\u{feff}";

/// Fallback EOL for documents whose content does not decide one (empty files
/// or files with a single line).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultEol {
    Lf,
    Crlf,
}

/// Accepts incoming chunks and accumulates the data the factory needs.
#[derive(Debug, Default)]
pub struct TextBufferBuilder {
    chunks: Vec<StringBuffer>,
    bom: String,
    has_previous_char: bool,
    previous_char: u8,
    cr: usize,
    lf: usize,
    crlf: usize,
}

impl TextBufferBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept_chunk(&mut self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }

        let mut bytes = chunk.as_bytes();
        if self.chunks.is_empty() && !self.has_previous_char {
            if let Some(stripped) = chunk.strip_prefix(UTF8_BOM) {
                self.bom = UTF8_BOM.to_string();
                bytes = stripped.as_bytes();
            }
        }
        if bytes.is_empty() {
            return;
        }

        let last = bytes[bytes.len() - 1];
        if last == b'\r' {
            // hold the trailing \r back in case the next chunk starts with \n
            self.accept_chunk_1(&bytes[..bytes.len() - 1], false);
            self.has_previous_char = true;
            self.previous_char = last;
        } else {
            self.accept_chunk_1(bytes, false);
            self.has_previous_char = false;
            self.previous_char = last;
        }
    }

    fn accept_chunk_1(&mut self, chunk: &[u8], allow_empty: bool) {
        if !allow_empty && chunk.is_empty() && !self.has_previous_char {
            return;
        }

        if self.has_previous_char {
            // the held byte from the previous chunk rejoins the stream here
            self.has_previous_char = false;
            let mut combined = Vec::with_capacity(chunk.len() + 1);
            combined.push(self.previous_char);
            combined.extend_from_slice(chunk);
            self.accept_chunk_2(combined);
        } else {
            self.accept_chunk_2(chunk.to_vec());
        }
    }

    fn accept_chunk_2(&mut self, chunk: Vec<u8>) {
        let scan = create_line_starts(&chunk);
        self.cr += scan.cr;
        self.lf += scan.lf;
        self.crlf += scan.crlf;
        self.chunks.push(StringBuffer::from_scan(chunk, scan));
    }

    pub fn finish(mut self, normalize_eol: bool) -> TextBufferFactory {
        self.finish_chunks();
        tracing::debug!(
            chunks = self.chunks.len(),
            cr = self.cr,
            lf = self.lf,
            crlf = self.crlf,
            "builder finished"
        );
        TextBufferFactory {
            chunks: self.chunks,
            bom: self.bom,
            cr: self.cr,
            lf: self.lf,
            crlf: self.crlf,
            normalize_eol,
        }
    }

    fn finish_chunks(&mut self) {
        if self.chunks.is_empty() {
            self.accept_chunk_1(b"", true);
        }

        if self.has_previous_char {
            self.has_previous_char = false;
            // commit the held byte as a lone \r on the last chunk
            if let Some(last_chunk) = self.chunks.last_mut() {
                last_chunk.bytes.push(self.previous_char);
                last_chunk.line_starts = create_line_starts_fast(&last_chunk.bytes);
            }
            if self.previous_char == b'\r' {
                self.cr += 1;
            }
        }
    }
}

/// Finished ingestion state: owns the scanned chunks and the global break
/// statistics, and builds the tree on demand.
#[derive(Debug)]
pub struct TextBufferFactory {
    chunks: Vec<StringBuffer>,
    bom: String,
    cr: usize,
    lf: usize,
    crlf: usize,
    normalize_eol: bool,
}

impl TextBufferFactory {
    /// Majority vote over the scanned line endings: `\r\n` wins only when
    /// more than half of all breaks are `\r\n`. Break-free documents fall
    /// back to `default`.
    pub fn detected_eol(&self, default: DefaultEol) -> LineEnding {
        let total = self.cr + self.lf + self.crlf;
        if total == 0 {
            return match default {
                DefaultEol::Lf => LineEnding::Lf,
                DefaultEol::Crlf => LineEnding::Crlf,
            };
        }
        if self.crlf > total / 2 {
            LineEnding::Crlf
        } else {
            LineEnding::Lf
        }
    }

    pub fn bom(&self) -> &str {
        &self.bom
    }

    /// Prefix of the first line, at most `length_limit` bytes.
    pub fn first_line_text(&self, length_limit: usize) -> String {
        let first = match self.chunks.first() {
            Some(chunk) if !chunk.bytes.is_empty() => chunk,
            _ => return String::new(),
        };
        let slice = &first.bytes[..length_limit.min(first.bytes.len())];
        let line = match slice.iter().position(|&b| b == b'\r' || b == b'\n') {
            Some(end) => &slice[..end],
            None => slice,
        };
        String::from_utf8_lossy(line).into_owned()
    }

    /// Build the piece tree, normalizing line endings first when requested
    /// and the content is not already uniform.
    pub fn create(self, default: DefaultEol) -> PieceTree {
        let eol = self.detected_eol(default);
        let mut chunks = self.chunks;

        let needs_rewrite = match eol {
            LineEnding::Crlf => self.cr > 0 || self.lf > 0,
            LineEnding::Lf => self.cr > 0 || self.crlf > 0,
        };

        if self.normalize_eol && needs_rewrite {
            let pattern =
                regex::bytes::Regex::new(r"\r\n|\r|\n").expect("newline pattern is valid");
            for chunk in &mut chunks {
                let replaced = pattern
                    .replace_all(&chunk.bytes, eol.as_str().as_bytes())
                    .into_owned();
                *chunk = StringBuffer::new(replaced);
            }
        }

        PieceTree::create(chunks, eol, self.normalize_eol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(chunks: &[&str], normalize: bool, default: DefaultEol) -> PieceTree {
        let mut builder = TextBufferBuilder::new();
        for chunk in chunks {
            builder.accept_chunk(chunk);
        }
        builder.finish(normalize).create(default)
    }

    #[test]
    fn test_empty_build_uses_default_eol() {
        let pt = build(&[], false, DefaultEol::Lf);
        assert_eq!(pt.get_value(), "");
        assert_eq!(pt.get_line_count(), 1);
        assert_eq!(pt.get_eol(), LineEnding::Lf);

        let pt = build(&[], false, DefaultEol::Crlf);
        assert_eq!(pt.get_eol(), LineEnding::Crlf);
    }

    #[test]
    fn test_multi_chunk_content() {
        let pt = build(&["Line1\nLi", "ne2\nLine3"], false, DefaultEol::Lf);
        assert_eq!(pt.get_value(), "Line1\nLine2\nLine3");
        assert_eq!(pt.get_line_count(), 3);
    }

    #[test]
    fn test_bom_captured_and_stripped() {
        let mut builder = TextBufferBuilder::new();
        builder.accept_chunk("\u{feff}hello");
        builder.accept_chunk("\u{feff}world");
        let factory = builder.finish(false);
        assert_eq!(factory.bom(), "\u{feff}");
        let pt = factory.create(DefaultEol::Lf);
        // only the leading BOM is stripped
        assert_eq!(pt.get_value(), "hello\u{feff}world");
    }

    #[test]
    fn test_crlf_split_across_chunks_counts_once() {
        let pt = build(&["a\r", "\nb"], false, DefaultEol::Lf);
        assert_eq!(pt.get_value(), "a\r\nb");
        assert_eq!(pt.get_line_count(), 2);
        // the vote saw one crlf, no lone breaks
        assert_eq!(pt.get_eol(), LineEnding::Crlf);
    }

    #[test]
    fn test_trailing_cr_committed_on_finish() {
        let pt = build(&["ab", "cd\r"], false, DefaultEol::Lf);
        assert_eq!(pt.get_value(), "abcd\r");
        assert_eq!(pt.get_line_count(), 2);
    }

    #[test]
    fn test_lone_cr_document() {
        // the only byte is held back and committed exactly once at finish
        let pt = build(&["\r"], false, DefaultEol::Lf);
        assert_eq!(pt.get_value(), "\r");
        assert_eq!(pt.get_line_count(), 2);
    }

    #[test]
    fn test_consecutive_cr_only_chunks() {
        // each held \r must be committed, not overwritten by the next hold
        let pt = build(&["a\r", "\r"], false, DefaultEol::Lf);
        assert_eq!(pt.get_value(), "a\r\r");
        assert_eq!(pt.get_line_count(), 3);
    }

    #[test]
    fn test_eol_majority_vote() {
        let mut builder = TextBufferBuilder::new();
        builder.accept_chunk("a\r\nb\r\nc\nd");
        let factory = builder.finish(false);
        assert_eq!(factory.detected_eol(DefaultEol::Lf), LineEnding::Crlf);

        let mut builder = TextBufferBuilder::new();
        builder.accept_chunk("a\nb\nc\r\nd");
        let factory = builder.finish(false);
        assert_eq!(factory.detected_eol(DefaultEol::Lf), LineEnding::Lf);
    }

    #[test]
    fn test_normalization_rewrites_mixed_endings() {
        let pt = build(
            &["Line1\r\nLine2\rLine3\nLine4"],
            true,
            DefaultEol::Lf,
        );
        assert_eq!(pt.get_value(), "Line1\nLine2\nLine3\nLine4");
        assert_eq!(pt.get_line_count(), 4);
    }

    #[test]
    fn test_normalization_to_crlf() {
        let pt = build(&["a\r\nb\r\nc\nd"], true, DefaultEol::Lf);
        assert_eq!(pt.get_eol(), LineEnding::Crlf);
        assert_eq!(pt.get_value(), "a\r\nb\r\nc\r\nd");
    }

    #[test]
    fn test_uniform_content_skips_rewrite() {
        let pt = build(&["a\nb\nc"], true, DefaultEol::Lf);
        assert_eq!(pt.get_value(), "a\nb\nc");
    }

    #[test]
    fn test_first_line_text() {
        let mut builder = TextBufferBuilder::new();
        builder.accept_chunk("#!/usr/bin/env bash\necho hi");
        let factory = builder.finish(false);
        assert_eq!(factory.first_line_text(100), "#!/usr/bin/env bash");
        assert_eq!(factory.first_line_text(5), "#!/us");
    }
}
