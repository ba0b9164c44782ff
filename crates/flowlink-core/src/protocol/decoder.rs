//! Incremental chunked-stream decoder (panic-free).
//!
//! Turns an append-only sequence of byte fragments into decoded
//! [`StreamFrame`]s, given the `data: <json>\n\n` framing. Fragment
//! boundaries carry no meaning: a fragment may split a frame mid-JSON,
//! mid-separator, or mid-UTF-8 sequence, and the output is identical for
//! any chunking of the same byte stream.
//!
//! Parsing rules:
//! - A frame is complete only once its blank-line terminator arrived.
//! - A malformed frame is skipped with a `warn`; the stream continues.
//! - Never index raw buffers; never `unwrap()`/`expect()`/`panic!()`.

use bytes::BytesMut;

use super::frame::StreamFrame;

const SEPARATOR: &[u8] = b"\n\n";
const DATA_PREFIX: &str = "data:";

/// Stateful incremental decoder. One instance per streaming session.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    buf: BytesMut,
    /// Frames skipped due to parse failures (visible for diagnostics).
    skipped: u64,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment and drain every frame completed by it, in order.
    pub fn feed(&mut self, fragment: &[u8]) -> Vec<StreamFrame> {
        // Resume the separator scan one byte back so a "\n" + "\n" split
        // across two feeds is still found.
        let scan_from = self.buf.len().saturating_sub(1);
        self.buf.extend_from_slice(fragment);

        let mut out = Vec::new();
        let mut from = scan_from;
        while let Some(rel) = find(&self.buf[from..], SEPARATOR) {
            let end = from + rel;
            let block = self.buf.split_to(end + SEPARATOR.len());
            self.parse_block(&block[..end], &mut out);
            from = 0;
        }
        out
    }

    /// Signal end of input. Any buffered tail that never completed a frame
    /// is discarded; a well-terminated stream leaves nothing behind.
    pub fn close(self) {
        if !self.buf.is_empty() {
            tracing::debug!(
                tail_bytes = self.buf.len(),
                skipped = self.skipped,
                "discarding incomplete frame tail at stream end"
            );
        }
    }

    /// Frames skipped so far due to malformed payloads.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    fn parse_block(&mut self, block: &[u8], out: &mut Vec<StreamFrame>) {
        // Blocks end at a blank line, so a valid stream yields whole UTF-8
        // sequences here even when feeds split one.
        let text = match std::str::from_utf8(block) {
            Ok(t) => t,
            Err(e) => {
                self.skipped += 1;
                tracing::warn!(%e, "skipping non-utf8 frame block");
                return;
            }
        };

        for line in text.lines() {
            let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
                // Comment or foreign field line; not an error.
                tracing::trace!(line, "ignoring non-data line");
                continue;
            };
            match serde_json::from_str::<StreamFrame>(payload.trim_start()) {
                Ok(frame) => out.push(frame),
                Err(e) => {
                    self.skipped += 1;
                    tracing::warn!(%e, "skipping malformed frame");
                }
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
}
