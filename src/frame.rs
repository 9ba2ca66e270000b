//! Combo frame codec (§4.1): a push-parser that delimits transport packets
//! on the byte-oriented RFCOMM stream.

use crate::error::{Error, Result};

/// Marks the start of a frame on the wire.
const SYNC: u8 = 0xCC;

/// Frame header size: one sync byte plus a 2-byte little-endian payload
/// length.
const HDR_LEN: usize = 3;

/// Push-parser for Combo frames. Callers feed arbitrary byte slices as
/// they arrive from the RFCOMM socket; complete packet payloads are
/// returned as they become available.
#[derive(Clone, Debug, Default)]
pub struct FrameCodec {
    buf: Vec<u8>,
}

impl FrameCodec {
    /// Creates an empty codec.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Discards any partially buffered frame.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Feeds newly received bytes and returns every complete packet
    /// payload that can now be extracted, in arrival order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Framing`] as soon as a malformed sync byte is
    /// seen. Callers must treat this as session-fatal; any bytes after
    /// the corruption point are discarded.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();
        loop {
            if self.buf.len() < HDR_LEN {
                return Ok(out);
            }
            if self.buf[0] != SYNC {
                self.buf.clear();
                return Err(Error::Framing);
            }
            let len = usize::from(u16::from_le_bytes([self.buf[1], self.buf[2]]));
            let total = HDR_LEN + len;
            if self.buf.len() < total {
                return Ok(out);
            }
            out.push(self.buf[HDR_LEN..total].to_vec());
            self.buf.drain(..total);
        }
    }

    /// Frames `payload` for transmission.
    #[must_use]
    pub fn encode(payload: &[u8]) -> Vec<u8> {
        let len = u16::try_from(payload.len()).expect("payload exceeds frame length limit");
        let mut out = Vec::with_capacity(HDR_LEN + payload.len());
        out.push(SYNC);
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(payload);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_feed_round_trips() {
        let mut codec = FrameCodec::new();
        let framed = FrameCodec::encode(b"hello");
        let frames = codec.feed(&framed).unwrap();
        assert_eq!(frames, vec![b"hello".to_vec()]);
    }

    #[test]
    fn frames_split_across_multiple_feeds() {
        let mut codec = FrameCodec::new();
        let framed = FrameCodec::encode(b"hello world");
        assert!(codec.feed(&framed[..4]).unwrap().is_empty());
        let frames = codec.feed(&framed[4..]).unwrap();
        assert_eq!(frames, vec![b"hello world".to_vec()]);
    }

    #[test]
    fn two_frames_in_one_feed() {
        let mut codec = FrameCodec::new();
        let mut bytes = FrameCodec::encode(b"a");
        bytes.extend(FrameCodec::encode(b"bc"));
        let frames = codec.feed(&bytes).unwrap();
        assert_eq!(frames, vec![b"a".to_vec(), b"bc".to_vec()]);
    }

    #[test]
    fn bad_sync_byte_is_framing_error() {
        let mut codec = FrameCodec::new();
        let err = codec.feed(&[0x00, 0x01, 0x02, 0x03]).unwrap_err();
        assert!(matches!(err, Error::Framing));
    }

    #[test]
    fn reset_discards_partial_buffer() {
        let mut codec = FrameCodec::new();
        let framed = FrameCodec::encode(b"hello");
        codec.feed(&framed[..2]).unwrap();
        codec.reset();
        let frames = codec.feed(&framed).unwrap();
        assert_eq!(frames, vec![b"hello".to_vec()]);
    }
}
