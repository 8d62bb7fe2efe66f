//! Length-prefixed framing and little-endian integer primitives.
//!
//! Every unit on the wire is a frame:
//!
//! ```text
//! ┌──────────────────┬──────────────────────────┐
//! │ Length (4B LE)   │ Payload (Length bytes)   │
//! └──────────────────┴──────────────────────────┘
//! ```
//!
//! The length describes the payload only, never the 4-byte header. Payload
//! fields (message tags, ids, nested lengths) use the same `u32` encoding.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the length prefix in front of every payload.
pub const HEADER_SIZE: usize = 4;

/// Default cap on a declared payload length: 16 MiB.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Largest payload cap a relay accepts. Relayed payloads gain at most a
/// sender id on the way out and must still fit the `u32` length prefix.
pub const MAX_FRAME_LEN_LIMIT: usize = u32::MAX as usize - 8;

/// Errors raised while parsing frames or message bodies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// A field claimed more bytes than the payload holds.
    #[error("truncated payload: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// A text field was not valid UTF-8.
    #[error("invalid utf-8 in text field")]
    InvalidUtf8,

    /// The message tag does not name a known variant.
    #[error("unknown message tag {0}")]
    UnknownTag(u32),

    /// A frame header declared a payload larger than the configured maximum.
    #[error("frame of {len} bytes exceeds maximum of {max}")]
    FrameTooLarge { len: usize, max: usize },
}

/// Decodes a little-endian `u32` from the first four bytes of `buf`.
pub fn read_u32_le(buf: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = buf.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

/// Appends `value` to `dst` as four little-endian bytes.
pub fn write_u32_le(dst: &mut BytesMut, value: u32) {
    dst.put_u32_le(value);
}

/// Wraps `payload` in a length-prefixed frame.
///
/// No limit is applied here; outbound sizes are bounded by the relay's
/// frame cap, which never exceeds [`MAX_FRAME_LEN_LIMIT`].
pub fn encode_frame(payload: &[u8]) -> Bytes {
    debug_assert!(payload.len() <= u32::MAX as usize);
    let mut dst = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    write_u32_le(&mut dst, payload.len() as u32);
    dst.put_slice(payload);
    dst.freeze()
}

/// Peeks at the payload length declared by a buffered frame header.
pub fn frame_len(buf: &[u8]) -> Option<usize> {
    read_u32_le(buf).map(|len| len as usize)
}

/// Returns the payload of the first complete frame in `buf` together with
/// the number of bytes (header included) to drop from the front.
///
/// Yields `None` until the header and the whole declared payload are
/// buffered, so it can be called repeatedly to drain queued frames.
pub fn try_extract_frame(buf: &[u8]) -> Option<(&[u8], usize)> {
    let len = frame_len(buf)?;
    let end = HEADER_SIZE.checked_add(len)?;
    let payload = buf.get(HEADER_SIZE..end)?;
    Some((payload, end))
}

/// Zero-copy cursor over a frame payload.
///
/// Reads never panic: running off the end yields [`CodecError::Truncated`].
#[derive(Debug, Clone, Copy)]
pub struct PayloadReader<'a> {
    buf: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.read_bytes(4)?;
        read_u32_le(bytes).ok_or(CodecError::Truncated {
            needed: 4,
            available: bytes.len(),
        })
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if n > self.buf.len() {
            return Err(CodecError::Truncated {
                needed: n,
                available: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn read_str(&mut self, n: usize) -> Result<&'a str, CodecError> {
        let bytes = self.read_bytes(n)?;
        std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)
    }

    /// Consumes and returns everything left.
    pub fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }

    pub fn rest_str(&mut self) -> Result<&'a str, CodecError> {
        std::str::from_utf8(self.rest()).map_err(|_| CodecError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_returns_encoded_payload() {
        for payload in [&b""[..], b"x", b"hello relay"] {
            let frame = encode_frame(payload);
            let (extracted, consumed) = try_extract_frame(&frame).expect("complete frame");
            assert_eq!(extracted, payload);
            assert_eq!(consumed, HEADER_SIZE + payload.len());
        }
    }

    #[test]
    fn partial_frame_is_not_extracted() {
        let frame = encode_frame(b"partial");
        for cut in 0..frame.len() {
            assert!(
                try_extract_frame(&frame[..cut]).is_none(),
                "frame extracted after only {cut} bytes"
            );
        }
        assert!(try_extract_frame(&frame).is_some());
    }

    #[test]
    fn trailing_bytes_stay_buffered() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_frame(b"first"));
        buf.extend_from_slice(&[7, 0]);

        let (payload, consumed) = try_extract_frame(&buf).expect("first frame");
        assert_eq!(payload, b"first");
        assert_eq!(&buf[consumed..], &[7, 0]);
    }

    #[test]
    fn drains_multiple_frames_in_order() {
        let mut buf = BytesMut::new();
        for payload in [&b"one"[..], b"", b"three"] {
            buf.extend_from_slice(&encode_frame(payload));
        }

        let mut drained = Vec::new();
        let mut offset = 0;
        while let Some((payload, consumed)) = try_extract_frame(&buf[offset..]) {
            drained.push(payload.to_vec());
            offset += consumed;
        }

        assert_eq!(drained, vec![b"one".to_vec(), Vec::new(), b"three".to_vec()]);
        assert_eq!(offset, buf.len());
    }

    #[test]
    fn u32_is_little_endian() {
        let mut buf = BytesMut::new();
        write_u32_le(&mut buf, 0x0102_0304);
        assert_eq!(&buf[..], &[4, 3, 2, 1]);
        assert_eq!(read_u32_le(&buf), Some(0x0102_0304));
        assert_eq!(read_u32_le(&buf[..3]), None);
    }

    #[test]
    fn reader_reports_truncation_instead_of_panicking() {
        let mut reader = PayloadReader::new(&[1, 0, 0]);
        assert_eq!(
            reader.read_u32(),
            Err(CodecError::Truncated {
                needed: 4,
                available: 3
            })
        );

        let mut reader = PayloadReader::new(b"abc");
        assert!(reader.read_str(10).is_err());
        assert_eq!(reader.read_str(2), Ok("ab"));
        assert_eq!(reader.rest(), b"c");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn reader_rejects_invalid_utf8() {
        let mut reader = PayloadReader::new(&[0xff, 0xfe]);
        assert_eq!(reader.rest_str(), Err(CodecError::InvalidUtf8));
    }
}
