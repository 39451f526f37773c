//! A piece-tree text buffer for editors.
//!
//! # Overview
//! `weft` stores a UTF-8 document as an append-only pool of immutable
//! character buffers overlaid with a red-black tree of *pieces*, each piece
//! describing a slice of one buffer. Nodes carry the byte length and
//! line-feed count of their left subtree, so offset↔(line,column) queries,
//! line extraction, and edits all run in O(log pieces) instead of scanning
//! the document.
//!
//! # Examples
//! ```
//! use weft::{DefaultEol, TextBuffer};
//!
//! let mut buffer = TextBuffer::from_string("Line1\nLine2", DefaultEol::Lf);
//! buffer.insert(5, "!", false);
//! assert_eq!(buffer.get_value(), "Line1!\nLine2");
//! assert_eq!(buffer.get_line_content(0).unwrap(), "Line1!");
//!
//! let pos = buffer.get_position_at(8);
//! assert_eq!((pos.line_number, pos.column), (2, 2));
//! ```
//!
//! Streaming construction and snapshots:
//! ```
//! use weft::{DefaultEol, TextBufferBuilder, TextBuffer};
//!
//! let mut builder = TextBufferBuilder::new();
//! builder.accept_chunk("chunk one\nchu");
//! builder.accept_chunk("nk two");
//! let factory = builder.finish(true);
//! let bom = factory.bom().to_string();
//! let mut buffer = TextBuffer::from_piece_tree(factory.create(DefaultEol::Lf), bom);
//!
//! let mut snapshot = buffer.create_snapshot("");
//! buffer.insert(0, "edited: ", false);
//! // the snapshot still reads the content it captured
//! assert_eq!(snapshot.read_to_string(), "chunk one\nchunk two");
//! ```
//!
//! # Concurrency
//! The buffer is single-owner and synchronous: operations run to completion
//! and never block. Snapshots are the one read-sharing affordance; they stay
//! byte-stable under later edits because pieces are immutable and buffers
//! only grow.

pub mod buffer;
pub mod builder;
pub mod common;
pub mod error;
pub mod piece_tree;
pub mod snapshot;
pub mod text_buffer;
mod tree;

pub use builder::{DefaultEol, TextBufferBuilder, TextBufferFactory, UTF8_BOM};
pub use common::{LineEnding, Position, Range};
pub use error::{BufferError, Result};
pub use piece_tree::PieceTree;
pub use snapshot::Snapshot;
pub use text_buffer::TextBuffer;
