//! Wire format selection.

use crate::error::ProtocolError;
use crate::message::StreamMessage;

/// Body encoding of a log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// One JSON [`StreamMessage`] per chunk.
    Json,
    /// Raw log text with no framing (legacy endpoint).
    PlainText,
}

impl WireFormat {
    /// Content type announced for this format.
    pub fn content_type(&self) -> &'static str {
        match self {
            WireFormat::Json => "text/json; charset=utf-8",
            WireFormat::PlainText => "text/plain; charset=utf-8",
        }
    }

    /// Infer the format from a response `Content-Type` header.
    ///
    /// Anything mentioning `json` is framed; everything else is plain text.
    pub fn from_content_type(content_type: &str) -> Self {
        if content_type.to_ascii_lowercase().contains("json") {
            WireFormat::Json
        } else {
            WireFormat::PlainText
        }
    }

    /// Encode one chunk of log text for the wire.
    pub fn encode_chunk(&self, text: &str) -> Result<Vec<u8>, ProtocolError> {
        match self {
            WireFormat::Json => StreamMessage::chunk(text).encode(),
            WireFormat::PlainText => Ok(text.as_bytes().to_vec()),
        }
    }

    /// Encode the trailing error frame, if this format has one.
    pub fn encode_error(&self, msg: &str, status_code: u16) -> Result<Option<Vec<u8>>, ProtocolError> {
        match self {
            WireFormat::Json => StreamMessage::error(msg, status_code).encode().map(Some),
            WireFormat::PlainText => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_roundtrip() {
        for format in [WireFormat::Json, WireFormat::PlainText] {
            assert_eq!(WireFormat::from_content_type(format.content_type()), format);
        }
    }

    #[test]
    fn test_application_json_is_framed() {
        assert_eq!(
            WireFormat::from_content_type("application/json"),
            WireFormat::Json
        );
        assert_eq!(
            WireFormat::from_content_type("application/octet-stream"),
            WireFormat::PlainText
        );
    }

    #[test]
    fn test_plain_text_has_no_error_frame() {
        assert!(WireFormat::PlainText.encode_error("boom", 500).unwrap().is_none());
        assert!(WireFormat::Json.encode_error("boom", 500).unwrap().is_some());
    }

    #[test]
    fn test_plain_text_chunk_is_raw() {
        assert_eq!(
            WireFormat::PlainText.encode_chunk("a\u{e9}").unwrap(),
            "a\u{e9}".as_bytes()
        );
    }
}
