//! Frame delimiting and checksumming
//!
//! Wire layout, all integers little-endian:
//!
//! ```text
//! MAGIC "PF" (2) | CMD (1) | LEN (4) | PAYLOAD (LEN) | CRC-32 over CMD+LEN+PAYLOAD (4)
//! ```

use alloc::vec::Vec;

use crate::error::FrameError;
use crate::integrity::Crc32;

/// Frame start marker
pub const MAGIC: [u8; 2] = *b"PF";
/// Bytes before the payload
pub const HEADER_LEN: usize = 7;
/// Bytes after the payload
pub const TRAILER_LEN: usize = 4;
/// Largest payload a decoder accepts by default
pub const MAX_PAYLOAD: usize = 64 * 1024;

/// One decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command or response code
    pub command: u8,
    /// Payload bytes
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a frame
    pub fn new(command: u8, payload: Vec<u8>) -> Self {
        Self { command, payload }
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> Vec<u8> {
        encode_frame(self.command, &self.payload)
    }
}

/// Append the wire encoding of a frame to `out`
pub fn encode_frame_into(command: u8, payload: &[u8], out: &mut Vec<u8>) {
    out.reserve(HEADER_LEN + payload.len() + TRAILER_LEN);
    out.extend_from_slice(&MAGIC);
    let body_start = out.len();
    out.push(command);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    let mut crc = Crc32::new();
    crc.update(&out[body_start..]);
    out.extend_from_slice(&crc.finish().to_le_bytes());
}

/// Encode a frame into a fresh buffer
pub fn encode_frame(command: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_frame_into(command, payload, &mut out);
    out
}

/// Streaming frame decoder
///
/// Bytes may arrive in arbitrary pieces. Garbage before a magic marker is
/// skipped. A candidate frame that fails its checksum is dropped whole and
/// the search for the next marker continues after it.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_payload: usize,
    dropped: u32,
}

impl FrameDecoder {
    /// Create a decoder bounded by [`MAX_PAYLOAD`]
    pub fn new() -> Self {
        Self::with_max_payload(MAX_PAYLOAD)
    }

    /// Create a decoder with a custom payload bound
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_payload,
            dropped: 0,
        }
    }

    /// Feed received bytes
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet consumed
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Number of candidate frames discarded so far
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Discard everything buffered
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    fn sync(&mut self) {
        match self.buf.windows(2).position(|w| w == MAGIC) {
            Some(0) => {}
            Some(pos) => {
                self.buf.drain(..pos);
            }
            None => {
                // a trailing 'P' may be the first half of the next marker
                let keep = usize::from(self.buf.last() == Some(&MAGIC[0]));
                let cut = self.buf.len() - keep;
                self.buf.drain(..cut);
            }
        }
    }

    /// Try to take one complete frame out of the buffer
    ///
    /// Returns `Ok(None)` when more bytes are needed. An error means one
    /// candidate was discarded; call again to keep decoding.
    pub fn decode(&mut self) -> Result<Option<Frame>, FrameError> {
        self.sync();
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = u32::from_le_bytes([self.buf[3], self.buf[4], self.buf[5], self.buf[6]]);
        if len as usize > self.max_payload {
            self.buf.drain(..MAGIC.len());
            self.dropped += 1;
            return Err(FrameError::PayloadTooLarge(len));
        }

        let total = HEADER_LEN + len as usize + TRAILER_LEN;
        if self.buf.len() < total {
            return Ok(None);
        }

        let crc_at = total - TRAILER_LEN;
        let expected = u32::from_le_bytes([
            self.buf[crc_at],
            self.buf[crc_at + 1],
            self.buf[crc_at + 2],
            self.buf[crc_at + 3],
        ]);
        let mut crc = Crc32::new();
        crc.update(&self.buf[MAGIC.len()..crc_at]);
        if crc.finish() != expected {
            self.buf.drain(..total);
            self.dropped += 1;
            return Err(FrameError::BadChecksum);
        }

        let frame = Frame {
            command: self.buf[2],
            payload: self.buf[HEADER_LEN..crc_at].to_vec(),
        };
        self.buf.drain(..total);
        Ok(Some(frame))
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
    use alloc::vec;

    fn drain(dec: &mut FrameDecoder) -> (Vec<Frame>, u32) {
        let mut frames = Vec::new();
        let mut errors = 0;
        loop {
            match dec.decode() {
                Ok(Some(f)) => frames.push(f),
                Ok(None) => break,
                Err(_) => errors += 1,
            }
        }
        (frames, errors)
    }

    #[test]
    fn test_encode_layout() {
        let bytes = encode_frame(0x01, &[]);
        assert_eq!(&bytes[..7], &[b'P', b'F', 0x01, 0, 0, 0, 0]);
        let crc = crate::integrity::crc32(&[0x01, 0, 0, 0, 0]);
        assert_eq!(&bytes[7..], &crc.to_le_bytes());
    }

    #[test]
    fn test_round_trip_byte_by_byte() {
        let frames = [
            Frame::new(0x02, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]),
            Frame::new(0x05, vec![]),
            Frame::new(0x17, (0..3000u32).map(|i| (i % 251) as u8).collect()),
        ];
        let mut stream = Vec::new();
        for f in &frames {
            stream.extend_from_slice(&f.encode());
        }

        let mut dec = FrameDecoder::new();
        let mut out = Vec::new();
        for b in stream {
            dec.push(&[b]);
            let (got, errors) = drain(&mut dec);
            assert_eq!(errors, 0);
            out.extend(got);
        }
        assert_eq!(out, frames);
        assert_eq!(dec.pending(), 0);
    }

    #[test]
    fn test_single_byte_flip_rejected() {
        let payload: Vec<u8> = (0..64u8).map(|i| i.wrapping_mul(3)).collect();
        let good = encode_frame(0x03, &payload);
        for i in 0..good.len() {
            for mask in [0x01u8, 0x80] {
                let mut bad = good.clone();
                bad[i] ^= mask;
                let mut dec = FrameDecoder::new();
                dec.push(&bad);
                let (frames, _) = drain(&mut dec);
                assert!(frames.is_empty(), "flip at byte {} accepted", i);
            }
        }
    }

    #[test]
    fn test_resync_after_garbage_and_bad_frame() {
        let mut bad = encode_frame(0x04, &[9, 9, 9]);
        bad[8] ^= 0xFF;
        let good = encode_frame(0x01, &[]);

        let mut dec = FrameDecoder::new();
        dec.push(&[0x00, b'P', 0x13, 0xFF]);
        dec.push(&bad);
        dec.push(&good);
        let (frames, errors) = drain(&mut dec);
        assert_eq!(errors, 1);
        assert_eq!(frames, vec![Frame::new(0x01, vec![])]);
        assert_eq!(dec.dropped(), 1);
    }

    #[test]
    fn test_oversized_length_is_error() {
        let mut dec = FrameDecoder::with_max_payload(16);
        let mut bytes = vec![b'P', b'F', 0x17];
        bytes.extend_from_slice(&17u32.to_le_bytes());
        dec.push(&bytes);
        assert_eq!(dec.decode(), Err(FrameError::PayloadTooLarge(17)));
        assert_eq!(dec.decode(), Ok(None));

        dec.push(&encode_frame(0x01, &[0xAA; 16]));
        assert_eq!(dec.decode(), Ok(Some(Frame::new(0x01, vec![0xAA; 16]))));
    }

    #[test]
    fn test_split_magic_is_kept() {
        let frame = encode_frame(0x0B, &[]);
        let mut dec = FrameDecoder::new();
        dec.push(&[0x42, frame[0]]);
        assert_eq!(dec.decode(), Ok(None));
        dec.push(&frame[1..]);
        assert_eq!(dec.decode(), Ok(Some(Frame::new(0x0B, vec![]))));
    }
}
