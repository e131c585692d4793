//! Incremental stream decoders.
//!
//! Network reads do not line up with frame boundaries: a JSON frame or a
//! multi-byte UTF-8 sequence may be split across any number of reads. Both
//! decoders here keep the incomplete tail between calls and only emit
//! complete units.
//!
//! Malformed frames are skipped (logged at debug level) and never abort
//! the stream.

use tracing::debug;

use crate::format::WireFormat;
use crate::message::StreamMessage;

/// Upper bound on buffered bytes of a single incomplete frame.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

// ============================================================================
// FrameDecoder
// ============================================================================

/// Streaming decoder for concatenated JSON [`StreamMessage`] frames.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_frame_bytes: usize,
    skipped: u64,
}

impl FrameDecoder {
    /// Create a decoder with the default frame size limit.
    pub fn new() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }

    /// Create a decoder that drops incomplete frames larger than `max_frame_bytes`.
    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame_bytes,
            skipped: 0,
        }
    }

    /// Number of frames skipped as malformed or oversized so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }

    /// Feed bytes from the network and return every frame they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamMessage> {
        self.buf.extend_from_slice(bytes);

        let mut messages = Vec::new();
        let mut consumed = 0;

        loop {
            let rest = &self.buf[consumed..];
            let Some(start) = rest.iter().position(|b| !b.is_ascii_whitespace()) else {
                consumed = self.buf.len();
                break;
            };
            let rest = &rest[start..];

            let mut values =
                serde_json::Deserializer::from_slice(rest).into_iter::<serde_json::Value>();
            match values.next() {
                Some(Ok(value)) => {
                    consumed += start + values.byte_offset();
                    match serde_json::from_value::<StreamMessage>(value) {
                        Ok(message) => messages.push(message),
                        Err(err) => {
                            self.skipped += 1;
                            debug!(error = %err, "skipping frame with unexpected shape");
                        }
                    }
                }
                Some(Err(err)) if err.is_eof() => {
                    consumed += start;
                    break;
                }
                Some(Err(err)) => {
                    self.skipped += 1;
                    debug!(error = %err, "skipping malformed frame");
                    // Resynchronise on the next object start.
                    let skip = rest[1..]
                        .iter()
                        .position(|&b| b == b'{')
                        .map_or(rest.len(), |pos| pos + 1);
                    consumed += start + skip;
                }
                None => {
                    consumed += start;
                    break;
                }
            }
        }

        self.buf.drain(..consumed);

        if self.buf.len() > self.max_frame_bytes {
            self.skipped += 1;
            debug!(
                pending = self.buf.len(),
                limit = self.max_frame_bytes,
                "dropping oversized incomplete frame"
            );
            self.buf.clear();
        }

        messages
    }

    /// Finish decoding; returns the number of trailing bytes that never
    /// formed a complete frame.
    pub fn finish(&mut self) -> usize {
        let dropped = self.buf.len();
        if dropped > 0 {
            debug!(bytes = dropped, "discarding incomplete trailing frame");
        }
        self.buf.clear();
        dropped
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TextDecoder
// ============================================================================

/// Streaming UTF-8 decoder that reassembles characters split across reads.
///
/// Invalid sequences are replaced with U+FFFD.
#[derive(Debug, Default)]
pub struct TextDecoder {
    pending: Vec<u8>,
}

impl TextDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return all text that is complete so far.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    match err.error_len() {
                        // Incomplete sequence at the end: keep it for the next read.
                        None => {
                            out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(len) => {
                            out.push_str(&String::from_utf8_lossy(&self.pending[..valid + len]));
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    /// Flush whatever is left, replacing an incomplete sequence with U+FFFD.
    pub fn finish(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        out
    }
}

// ============================================================================
// StreamDecoder
// ============================================================================

/// Decoder for either wire format, yielding messages.
///
/// Plain-text bodies have no framing, so every decoded fragment becomes a
/// chunk message.
#[derive(Debug)]
pub enum StreamDecoder {
    Framed(FrameDecoder),
    Text(TextDecoder),
}

impl StreamDecoder {
    /// Create the decoder matching a wire format.
    pub fn new(format: WireFormat) -> Self {
        match format {
            WireFormat::Json => StreamDecoder::Framed(FrameDecoder::new()),
            WireFormat::PlainText => StreamDecoder::Text(TextDecoder::new()),
        }
    }

    /// Feed bytes and return the messages they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamMessage> {
        match self {
            StreamDecoder::Framed(decoder) => decoder.push(bytes),
            StreamDecoder::Text(decoder) => text_message(decoder.push(bytes)),
        }
    }

    /// Flush at end of body.
    pub fn finish(&mut self) -> Vec<StreamMessage> {
        match self {
            StreamDecoder::Framed(decoder) => {
                decoder.finish();
                Vec::new()
            }
            StreamDecoder::Text(decoder) => text_message(decoder.finish()),
        }
    }
}

fn text_message(text: String) -> Vec<StreamMessage> {
    if text.is_empty() {
        Vec::new()
    } else {
        vec![StreamMessage::chunk(text)]
    }
}
