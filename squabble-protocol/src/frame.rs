//! NUL-delimited framing.
//!
//! Each frame is one UTF-8 command string followed by a single `0x00`
//! byte. The codec escapes NUL inside parameters, so the delimiter never
//! appears in a well-formed command.

use crate::error::ProtocolError;
use crate::MAX_FRAME_SIZE;
use bytes::{BufMut, BytesMut};

/// Byte terminating every frame.
pub const FRAME_DELIMITER: u8 = 0x00;

/// Encodes a command string as a frame.
pub fn encode_frame(command: &str) -> Result<BytesMut, ProtocolError> {
    if command.len() + 1 > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: command.len() + 1,
            max: MAX_FRAME_SIZE,
        });
    }
    if command.as_bytes().contains(&FRAME_DELIMITER) {
        return Err(ProtocolError::EmbeddedDelimiter);
    }

    let mut buf = BytesMut::with_capacity(command.len() + 1);
    buf.put_slice(command.as_bytes());
    buf.put_u8(FRAME_DELIMITER);
    Ok(buf)
}

/// Splits a byte stream into frames.
///
/// Complete frames are returned in arrival order; a trailing partial
/// frame stays buffered until more bytes arrive.
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_size: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            max_frame_size,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    ///
    /// A frame that is not valid UTF-8 is consumed before the error is
    /// returned, so decoding can continue with the following frame.
    pub fn decode_frame(&mut self) -> Result<Option<String>, ProtocolError> {
        match self.buffer.iter().position(|&b| b == FRAME_DELIMITER) {
            Some(pos) => {
                let frame = self.buffer.split_to(pos + 1);
                let payload = &frame[..pos];
                let text = std::str::from_utf8(payload).map_err(|_| ProtocolError::InvalidUtf8)?;
                Ok(Some(text.to_string()))
            }
            None if self.buffer.len() > self.max_frame_size => {
                Err(ProtocolError::FrameTooLarge {
                    size: self.buffer.len(),
                    max: self.max_frame_size,
                })
            }
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_frame() {
        let frame = encode_frame("V01 <app> <1>").unwrap();
        assert_eq!(&frame[..], b"V01 <app> <1>\0");
    }

    #[test]
    fn test_encode_rejects_delimiter() {
        assert!(matches!(
            encode_frame("M00 <a\0b>"),
            Err(ProtocolError::EmbeddedDelimiter)
        ));
    }

    #[test]
    fn test_multiple_frames_in_one_chunk() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"X00\0V01 <a> <1>\0");

        assert_eq!(decoder.decode_frame().unwrap().as_deref(), Some("X00"));
        assert_eq!(
            decoder.decode_frame().unwrap().as_deref(),
            Some("V01 <a> <1>")
        );
        assert!(decoder.decode_frame().unwrap().is_none());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_partial_frame_decoding() {
        let encoded = encode_frame("M00 <#general> <hello>").unwrap();
        let mut decoder = FrameDecoder::new();

        // Feed partial data
        decoder.extend(&encoded[..10]);
        assert!(decoder.decode_frame().unwrap().is_none());
        assert_eq!(decoder.buffered(), 10);

        // Feed the rest
        decoder.extend(&encoded[10..]);
        assert_eq!(
            decoder.decode_frame().unwrap().as_deref(),
            Some("M00 <#general> <hello>")
        );
    }

    #[test]
    fn test_trailing_partial_is_retained() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"X00\0X0");
        assert_eq!(decoder.decode_frame().unwrap().as_deref(), Some("X00"));
        assert!(decoder.decode_frame().unwrap().is_none());

        decoder.extend(b"1 <quitting>\0");
        assert_eq!(
            decoder.decode_frame().unwrap().as_deref(),
            Some("X01 <quitting>")
        );
    }

    #[test]
    fn test_empty_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"\0");
        assert_eq!(decoder.decode_frame().unwrap().as_deref(), Some(""));
    }

    #[test]
    fn test_invalid_utf8_is_skipped() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"\xff\xfe\0X00\0");

        assert!(matches!(
            decoder.decode_frame(),
            Err(ProtocolError::InvalidUtf8)
        ));
        assert_eq!(decoder.decode_frame().unwrap().as_deref(), Some("X00"));
    }

    #[test]
    fn test_oversized_partial_frame() {
        let mut decoder = FrameDecoder::with_max_frame_size(8);
        decoder.extend(b"0123456789");
        assert!(matches!(
            decoder.decode_frame(),
            Err(ProtocolError::FrameTooLarge { size: 10, max: 8 })
        ));

        decoder.clear();
        assert_eq!(decoder.buffered(), 0);
    }
}
