//! Chunk decoder vector tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use flowlink_core::protocol::decoder::ChunkDecoder;
use flowlink_core::protocol::frame::FrameKind;

use vector_loader::load_vector;

fn kind_str(kind: FrameKind) -> &'static str {
    match kind {
        FrameKind::Chunk => "chunk",
        FrameKind::Complete => "complete",
        FrameKind::Error => "error",
    }
}

#[test]
fn decoder_vectors() {
    let files = [
        "stream_basic.json",
        "stream_split_mid_json.json",
        "stream_malformed_skipped.json",
        "stream_multi_frame_single_feed.json",
        "stream_incomplete_tail.json",
        "stream_comment_lines.json",
    ];

    for f in files {
        let v = load_vector(f);
        let mut dec = ChunkDecoder::new();

        let mut got = Vec::new();
        for frag in &v.fragments {
            got.extend(dec.feed(frag.as_bytes()));
        }
        let skipped = dec.skipped();
        dec.close();

        assert_eq!(got.len(), v.expect.len(), "vector={}", v.description);
        for (frame, ex) in got.iter().zip(&v.expect) {
            assert_eq!(kind_str(frame.kind), ex.kind, "vector={}", v.description);
            assert_eq!(frame.content, ex.content, "vector={}", v.description);
        }
        assert_eq!(skipped, v.expect_skipped, "vector={}", v.description);
    }
}

#[test]
fn frame_not_emitted_before_terminator() {
    let mut dec = ChunkDecoder::new();
    // Complete line, but the blank-line terminator has not arrived yet.
    assert!(dec
        .feed(b"data: {\"type\":\"chunk\",\"content\":\"Hel\"}\n")
        .is_empty());
    let frames = dec.feed(b"\n");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].content, "Hel");
}
