//! Page stream codec: blank-page elision and run-length encoding
//!
//! Every page travels as one self-describing unit whose first byte says
//! how the rest is encoded:
//!
//! | Tag    | Body                     | Meaning                         |
//! |--------|--------------------------|---------------------------------|
//! | `0x00` | `len u32 LE`             | `len` bytes of 0xFF             |
//! | `0x01` | raw bytes                | stored as is                    |
//! | `0x02` | run-length token stream  | see below                       |
//!
//! The token stream copies ordinary bytes verbatim. A run is written as
//! `MARKER, count, value` with `count` in `1..=255`; a literal `MARKER`
//! byte is written as a run of one. Only runs of [`MIN_RUN`] or more bytes
//! are folded into tokens.

use alloc::vec::Vec;

use crate::chip::ERASED;
use crate::error::{Error, Result};

/// Tag of an elided blank page
pub const TAG_BLANK: u8 = 0x00;
/// Tag of a raw page
pub const TAG_RAW: u8 = 0x01;
/// Tag of a run-length encoded page
pub const TAG_RLE: u8 = 0x02;

/// Escape byte that introduces a run token
pub const MARKER: u8 = 0x00;
/// Shortest run folded into a token
pub const MIN_RUN: usize = 4;
/// Longest run a single token can carry
pub const MAX_RUN: usize = 255;
/// Largest page [`StreamCodec::decode`] will produce
pub const MAX_UNIT_LEN: usize = crate::protocol::MAX_PAYLOAD;

/// Which transforms the encoder may apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecOptions {
    /// Run-length encode pages when it makes them smaller
    pub compress: bool,
    /// Replace all-0xFF pages with a blank marker
    pub skip_blank: bool,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            compress: true,
            skip_blank: true,
        }
    }
}

/// How a page ended up encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Blank marker
    Blank,
    /// Raw bytes
    Raw,
    /// Run-length tokens
    Rle,
}

/// Encoder/decoder for page units
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamCodec {
    options: CodecOptions,
}

impl StreamCodec {
    /// Create a codec with the given options
    pub fn new(options: CodecOptions) -> Self {
        Self { options }
    }

    /// Options in effect
    pub fn options(&self) -> CodecOptions {
        self.options
    }

    /// Encode one page, appending to `out`
    pub fn encode_into(&self, page: &[u8], out: &mut Vec<u8>) -> Encoding {
        if self.options.skip_blank && !page.is_empty() && page.iter().all(|&b| b == ERASED) {
            out.push(TAG_BLANK);
            out.extend_from_slice(&(page.len() as u32).to_le_bytes());
            return Encoding::Blank;
        }

        if self.options.compress {
            let start = out.len();
            out.push(TAG_RLE);
            rle_encode(page, out);
            if out.len() - start <= page.len() {
                return Encoding::Rle;
            }
            out.truncate(start);
        }

        out.push(TAG_RAW);
        out.extend_from_slice(page);
        Encoding::Raw
    }

    /// Encode one page into a fresh buffer
    pub fn encode(&self, page: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(page.len() + 1);
        self.encode_into(page, &mut out);
        out
    }

    /// Decode one page unit, appending at most `limit` bytes to `out`
    ///
    /// Decoding honours whatever the sender chose; the local options do
    /// not restrict it. A unit that would expand past `limit` is rejected
    /// before anything is allocated for it.
    pub fn decode_into(&self, unit: &[u8], out: &mut Vec<u8>, limit: usize) -> Result<()> {
        let (&tag, body) = unit.split_first().ok_or(Error::Decode)?;
        match tag {
            TAG_BLANK => {
                let len: [u8; 4] = body.try_into().map_err(|_| Error::Decode)?;
                let len = u32::from_le_bytes(len) as usize;
                if len > limit {
                    return Err(Error::Decode);
                }
                out.resize(out.len() + len, ERASED);
                Ok(())
            }
            TAG_RAW => {
                if body.len() > limit {
                    return Err(Error::Decode);
                }
                out.extend_from_slice(body);
                Ok(())
            }
            TAG_RLE => rle_decode(body, out, limit),
            _ => Err(Error::Decode),
        }
    }

    /// Decode one page unit into a fresh buffer
    pub fn decode(&self, unit: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.decode_into(unit, &mut out, MAX_UNIT_LEN)?;
        Ok(out)
    }

    /// Decode one page unit and check it has the expected length
    pub fn decode_page(&self, unit: &[u8], page_len: usize) -> Result<Vec<u8>> {
        let mut page = Vec::with_capacity(page_len);
        self.decode_into(unit, &mut page, page_len)?;
        if page.len() != page_len {
            return Err(Error::Decode);
        }
        Ok(page)
    }
}

fn rle_encode(data: &[u8], out: &mut Vec<u8>) {
    let mut i = 0;
    while i < data.len() {
        let value = data[i];
        let run = data[i..]
            .iter()
            .take(MAX_RUN)
            .take_while(|&&b| b == value)
            .count();

        if run >= MIN_RUN {
            out.extend_from_slice(&[MARKER, run as u8, value]);
            i += run;
        } else if value == MARKER {
            out.extend_from_slice(&[MARKER, 1, MARKER]);
            i += 1;
        } else {
            out.push(value);
            i += 1;
        }
    }
}

fn rle_decode(mut body: &[u8], out: &mut Vec<u8>, limit: usize) -> Result<()> {
    let end = out.len() + limit;
    while let Some((&b, rest)) = body.split_first() {
        if b != MARKER {
            if out.len() == end {
                return Err(Error::Decode);
            }
            out.push(b);
            body = rest;
            continue;
        }
        match rest {
            [count, value, tail @ ..] if *count > 0 => {
                if out.len() + *count as usize > end {
                    return Err(Error::Decode);
                }
                out.resize(out.len() + *count as usize, *value);
                body = tail;
            }
            _ => return Err(Error::Decode),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn xorshift(seed: &mut u32) -> u32 {
        *seed ^= *seed << 13;
        *seed ^= *seed >> 17;
        *seed ^= *seed << 5;
        *seed
    }

    fn samples() -> Vec<Vec<u8>> {
        let mut seed = 0x1234_5678;
        let random: Vec<u8> = (0..2112).map(|_| xorshift(&mut seed) as u8).collect();
        let mut mixed = vec![0xFFu8; 2112];
        mixed[100..140].fill(0x00);
        mixed[500] = 0x00;
        mixed[501] = 0x42;
        vec![
            Vec::new(),
            vec![0x00],
            vec![0xFF; 2112],
            vec![0x00; 2112],
            vec![0x00; 1000],
            vec![0xAB; 256],
            random,
            mixed,
            vec![0x00, 0x00, 0x00, 0x01, 0x00],
        ]
    }

    #[test]
    fn test_round_trip_all_option_combinations() {
        for compress in [false, true] {
            for skip_blank in [false, true] {
                let codec = StreamCodec::new(CodecOptions { compress, skip_blank });
                for sample in samples() {
                    let encoded = codec.encode(&sample);
                    assert_eq!(codec.decode(&encoded).unwrap(), sample);
                }
            }
        }
    }

    #[test]
    fn test_blank_page_marker() {
        let codec = StreamCodec::default();
        let encoded = codec.encode(&[0xFF; 2112]);
        assert_eq!(encoded, vec![TAG_BLANK, 0x40, 0x08, 0x00, 0x00]);
    }

    #[test]
    fn test_blank_without_skip_is_compressed() {
        let codec = StreamCodec::new(CodecOptions {
            compress: true,
            skip_blank: false,
        });
        let mut out = Vec::new();
        assert_eq!(codec.encode_into(&[0xFF; 600], &mut out), Encoding::Rle);
        assert_eq!(out, vec![TAG_RLE, MARKER, 255, 0xFF, MARKER, 255, 0xFF, MARKER, 90, 0xFF]);
    }

    #[test]
    fn test_incompressible_falls_back_to_raw() {
        let mut seed = 99;
        let random: Vec<u8> = (0..512).map(|_| (xorshift(&mut seed) as u8) | 1).collect();
        let mut out = Vec::new();
        assert_eq!(StreamCodec::default().encode_into(&random, &mut out), Encoding::Raw);
        assert_eq!(out.len(), 513);
    }

    #[test]
    fn test_malformed_units_rejected() {
        let codec = StreamCodec::default();
        assert_eq!(codec.decode(&[]), Err(Error::Decode));
        assert_eq!(codec.decode(&[0x07, 1, 2]), Err(Error::Decode));
        assert_eq!(codec.decode(&[TAG_BLANK, 1, 2]), Err(Error::Decode));
        assert_eq!(codec.decode(&[TAG_RLE, MARKER, 5]), Err(Error::Decode));
        assert_eq!(codec.decode(&[TAG_RLE, MARKER, 0, 1]), Err(Error::Decode));
        assert_eq!(codec.decode_page(&[TAG_RAW, 1, 2], 3), Err(Error::Decode));
    }

    #[test]
    fn test_oversized_units_rejected_before_expanding() {
        let codec = StreamCodec::default();
        // a blank marker claiming 3 GiB
        assert_eq!(codec.decode_page(&[TAG_BLANK, 0, 0, 0, 0xC0], 80), Err(Error::Decode));
        assert_eq!(codec.decode(&[TAG_BLANK, 0, 0, 0, 0xC0]), Err(Error::Decode));
        assert_eq!(codec.decode_page(&[TAG_BLANK, 81, 0, 0, 0], 80), Err(Error::Decode));
        assert_eq!(codec.decode_page(&[TAG_BLANK, 80, 0, 0, 0], 80).unwrap(), vec![0xFF; 80]);

        let mut runs = vec![TAG_RLE];
        for _ in 0..1000 {
            runs.extend_from_slice(&[MARKER, 255, 0xAA]);
        }
        assert_eq!(codec.decode_page(&runs, 80), Err(Error::Decode));
        assert_eq!(codec.decode(&runs), Err(Error::Decode));
        assert_eq!(codec.decode_page(&[TAG_RLE, MARKER, 80, 0xAA, 0x01], 80), Err(Error::Decode));
        assert_eq!(codec.decode_page(&[TAG_RAW, 1, 2, 3, 4], 3), Err(Error::Decode));

        let mut out = vec![1, 2];
        assert_eq!(codec.decode_into(&[TAG_RLE, MARKER, 4, 0x55], &mut out, 4), Ok(()));
        assert_eq!(out, vec![1, 2, 0x55, 0x55, 0x55, 0x55]);
    }
}
