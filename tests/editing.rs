//! End-to-end editing scenarios over the public buffer surface, plus a
//! randomized edit-sequence test against a naive byte-vector model.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use weft::{DefaultEol, TextBuffer};

/// Split bytes into lines the slow way, recognizing \r, \n and \r\n (one
/// break). Mirror of what the buffer's line bookkeeping must arrive at.
fn naive_lines(bytes: &[u8]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\r' => {
                lines.push(String::from_utf8_lossy(&bytes[start..i]).into_owned());
                if i + 1 < bytes.len() && bytes[i + 1] == b'\n' {
                    i += 1;
                }
                start = i + 1;
            }
            b'\n' => {
                lines.push(String::from_utf8_lossy(&bytes[start..i]).into_owned());
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    lines.push(String::from_utf8_lossy(&bytes[start..]).into_owned());
    lines
}

fn assert_consistent(buffer: &TextBuffer, expected: &[u8]) {
    assert_eq!(buffer.get_value().as_bytes(), expected, "content mismatch");
    assert_eq!(buffer.get_length(), expected.len(), "length mismatch");

    let lines = naive_lines(expected);
    assert_eq!(buffer.get_line_count(), lines.len(), "line count mismatch");
    for (i, line) in lines.iter().enumerate() {
        assert_eq!(
            &buffer.get_line_content(i).unwrap(),
            line,
            "line {i} mismatch"
        );
    }

    // offset -> position -> offset is the identity over the whole document
    for offset in 0..=expected.len() {
        let pos = buffer.get_position_at(offset);
        assert_eq!(
            buffer.get_offset_at(pos.line_number, pos.column),
            offset,
            "round trip failed at offset {offset}"
        );
    }
}

#[test]
fn basic_insert_sequence() {
    let mut buffer = TextBuffer::new(DefaultEol::Lf);
    buffer.insert(0, "Hello", false);
    assert_eq!(buffer.get_value(), "Hello");
    assert_eq!(buffer.get_length(), 5);
    assert_eq!(buffer.get_line_count(), 1);

    buffer.insert(5, " World", false);
    assert_eq!(buffer.get_value(), "Hello World");

    buffer.insert(5, ",", false);
    assert_eq!(buffer.get_value(), "Hello, World");
    assert_consistent(&buffer, b"Hello, World");
}

#[test]
fn cross_line_delete() {
    let mut buffer = TextBuffer::from_string("Line1\nLine2\nLine3", DefaultEol::Lf);
    buffer.delete(5, 1);
    assert_eq!(buffer.get_value(), "Line1Line2\nLine3");
    assert_eq!(buffer.get_line_count(), 2);
    assert_consistent(&buffer, b"Line1Line2\nLine3");
}

#[test]
fn crlf_repair_on_insert() {
    let mut buffer = TextBuffer::from_string("A\r", DefaultEol::Lf);
    buffer.insert(2, "\nB", false);
    assert_eq!(buffer.get_value(), "A\r\nB");
    assert_eq!(buffer.get_line_count(), 2, "joined \\r\\n must count once");

    let mut buffer = TextBuffer::from_string("B", DefaultEol::Lf);
    buffer.insert(0, "A\r\n", false);
    assert_eq!(buffer.get_value(), "A\r\nB");
    buffer.delete(1, 1);
    assert_eq!(buffer.get_value(), "A\nB");
    assert_eq!(buffer.get_line_count(), 2);
}

#[test]
fn crlf_assembled_backwards() {
    // inserting \r immediately before an existing \n
    let mut buffer = TextBuffer::from_string("A\nB", DefaultEol::Lf);
    assert_eq!(buffer.get_line_count(), 2);
    buffer.insert(1, "\r", false);
    assert_eq!(buffer.get_value(), "A\r\nB");
    assert_eq!(buffer.get_line_count(), 2);
    assert_consistent(&buffer, b"A\r\nB");
}

#[test]
fn snapshot_independence() {
    let mut buffer = TextBuffer::from_string("Initial", DefaultEol::Lf);
    let mut snapshot = buffer.create_snapshot("");
    buffer.insert(0, "X", false);
    buffer.delete(3, 2);
    assert_eq!(buffer.get_value(), "XIniial");
    assert_eq!(snapshot.read_to_string(), "Initial");
}

#[test]
fn round_trip_offsets() {
    let buffer = TextBuffer::from_string("Line1\nLine2\nLine3", DefaultEol::Lf);
    for offset in 0..=17 {
        let pos = buffer.get_position_at(offset);
        assert_eq!(buffer.get_offset_at(pos.line_number, pos.column), offset);
    }
}

#[test]
fn eol_normalization_on_build() {
    let mut builder = weft::TextBufferBuilder::new();
    builder.accept_chunk("Line1\r\nLine2\rLine3\nLine4");
    let factory = builder.finish(true);
    let buffer = TextBuffer::from_piece_tree(factory.create(DefaultEol::Lf), String::new());
    assert_eq!(buffer.get_value(), "Line1\nLine2\nLine3\nLine4");
    assert_eq!(buffer.get_line_count(), 4);
    assert_eq!(buffer.get_eol(), "\n");
}

#[test]
fn no_op_edits_change_nothing() {
    let mut buffer = TextBuffer::from_string("stable\ncontent", DefaultEol::Lf);
    let before = buffer.get_value();
    let line_count = buffer.get_line_count();

    buffer.insert(3, "", false);
    buffer.delete(3, 0);
    buffer.delete(1000, 5);

    assert_eq!(buffer.get_value(), before);
    assert_eq!(buffer.get_line_count(), line_count);
}

#[test]
fn value_decomposes_into_lines() {
    let content = "alpha\nbeta\r\ngamma\rdelta\n";
    let buffer = TextBuffer::from_string(content, DefaultEol::Lf);
    let lines = naive_lines(content.as_bytes());
    assert_eq!(buffer.get_line_count(), lines.len());
    for (i, line) in lines.iter().enumerate() {
        assert_eq!(&buffer.get_line_content(i).unwrap(), line);
    }
    assert_eq!(buffer.get_lines_content(), lines);
}

#[test]
fn multi_byte_content_round_trips() {
    let content = "caf\u{e9}\n\u{1f600} emoji line\nplain";
    let mut buffer = TextBuffer::from_string(content, DefaultEol::Lf);
    assert_consistent(&buffer, content.as_bytes());

    // edit right after the emoji (4 bytes) on line 2
    let line2_start = buffer.get_offset_at(2, 1);
    buffer.insert(line2_start + 4, "!", false);
    assert_eq!(
        buffer.get_line_content(1).unwrap(),
        "\u{1f600}! emoji line"
    );
}

#[test]
fn scattered_edits_on_loaded_document() {
    let mut content: Vec<u8> = Vec::new();
    for i in 0..200 {
        content.extend_from_slice(format!("line number {i}\n").as_bytes());
    }
    let text = String::from_utf8(content.clone()).unwrap();
    let mut buffer = TextBuffer::from_string(&text, DefaultEol::Lf);

    // touch the document at scattered offsets, front to back
    let mut expected = content;
    for i in 0..40 {
        let offset = (i * 97) % expected.len();
        buffer.insert(offset, "<>", false);
        expected.splice(offset..offset, "<>".bytes());
    }
    assert_eq!(buffer.get_value().as_bytes(), &expected[..]);

    for i in 0..40 {
        let offset = (i * 131) % (expected.len() - 3);
        buffer.delete(offset, 3);
        expected.drain(offset..offset + 3);
    }
    assert_consistent(&buffer, &expected);
}

#[test]
fn randomized_edits_match_naive_model() {
    let mut rng = StdRng::seed_from_u64(0xB0F5);
    let fragments = [
        "a", "bc", "def", " ", "\n", "\r", "\r\n", "word", "\nline\n", "x\ry", "tail\r",
    ];

    for round in 0..8 {
        let mut buffer = TextBuffer::new(DefaultEol::Lf);
        let mut model: Vec<u8> = Vec::new();

        for step in 0..120 {
            if model.is_empty() || rng.gen_bool(0.6) {
                let fragment = fragments[rng.gen_range(0..fragments.len())];
                let offset = rng.gen_range(0..=model.len());
                buffer.insert(offset, fragment, false);
                model.splice(offset..offset, fragment.bytes());
            } else {
                let offset = rng.gen_range(0..model.len());
                let count = rng.gen_range(1..=(model.len() - offset).min(7));
                buffer.delete(offset, count);
                model.drain(offset..offset + count);
            }

            assert_eq!(
                buffer.get_value().as_bytes(),
                &model[..],
                "round {round} step {step}: content diverged"
            );
            assert_eq!(
                buffer.get_line_count(),
                naive_lines(&model).len(),
                "round {round} step {step}: line count diverged"
            );
        }

        assert_consistent(&buffer, &model);
    }
}

#[test]
fn randomized_edits_with_snapshot_stability() {
    let mut rng = StdRng::seed_from_u64(42);
    let mut buffer = TextBuffer::from_string("seed\ncontent\r\nhere", DefaultEol::Lf);
    let mut model: Vec<u8> = b"seed\ncontent\r\nhere".to_vec();

    let frozen = buffer.get_value();
    let mut snapshot = buffer.create_snapshot("");

    for _ in 0..60 {
        if model.is_empty() || rng.gen_bool(0.5) {
            let offset = rng.gen_range(0..=model.len());
            buffer.insert(offset, "\r\nnew", false);
            model.splice(offset..offset, "\r\nnew".bytes());
        } else {
            let offset = rng.gen_range(0..model.len());
            let count = rng.gen_range(1..=(model.len() - offset).min(5));
            buffer.delete(offset, count);
            model.drain(offset..offset + count);
        }
    }

    assert_eq!(buffer.get_value().as_bytes(), &model[..]);
    assert_eq!(snapshot.read_to_string(), frozen);
}

#[test]
fn equal_ignores_piece_layout() {
    let mut a = TextBuffer::new(DefaultEol::Lf);
    for word in ["piece", " by", " piece", "\nand", " lines"] {
        let end = a.get_length();
        a.insert(end, word, false);
    }
    let b = TextBuffer::from_string("piece by piece\nand lines", DefaultEol::Lf);
    assert!(a.equal(&b));
    assert!(b.equal(&a));
}

#[test]
fn set_eol_round_trip() {
    let mut buffer = TextBuffer::from_string("one\ntwo\nthree", DefaultEol::Lf);
    buffer.set_eol("\r\n").unwrap();
    assert_eq!(buffer.get_value(), "one\r\ntwo\r\nthree");
    assert_consistent(&buffer, b"one\r\ntwo\r\nthree");

    buffer.set_eol("\n").unwrap();
    assert_eq!(buffer.get_value(), "one\ntwo\nthree");
    assert_consistent(&buffer, b"one\ntwo\nthree");
}
