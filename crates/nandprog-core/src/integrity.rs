//! Per-chunk hashing for verification and resume safety
//!
//! The tracker hashes every chunk (normally one page) it is fed and keeps
//! a rolling digest over the whole operation. The chunk hash is pluggable:
//! CRC-32 is the default, an XOR fold is available for very slow targets.

use crc::{Crc, Digest, CRC_32_ISO_HDLC};

/// CRC-32 (IEEE 802.3, reflected 0xEDB88320)
static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Incremental CRC-32
#[derive(Clone)]
pub struct Crc32 {
    digest: Digest<'static, u32>,
}

impl Crc32 {
    /// Start a new checksum
    pub fn new() -> Self {
        Self { digest: CRC32.digest() }
    }

    /// Feed bytes
    pub fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    /// Final value
    pub fn finish(&self) -> u32 {
        self.digest.clone().finalize()
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Crc32 {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("Crc32").field(&self.finish()).finish()
    }
}

/// One-shot CRC-32
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Order-sensitive 32-bit XOR fold
///
/// Each little-endian word is XORed in after rotating the accumulator,
/// then the accumulator is multiplied by the FNV prime so complementary
/// inputs do not cancel out.
pub fn xor_fold(data: &[u8]) -> u32 {
    let mut acc = data.len() as u32;
    for word in data.chunks(4) {
        let mut w = [0u8; 4];
        w[..word.len()].copy_from_slice(word);
        acc = (acc.rotate_left(5) ^ u32::from_le_bytes(w)).wrapping_mul(0x0100_0193);
    }
    acc
}

/// Chunk hash function
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HashKind {
    /// CRC-32 (IEEE)
    #[default]
    Crc32,
    /// Rotating XOR fold
    XorFold,
}

impl HashKind {
    /// Hash one chunk
    pub fn hash(self, chunk: &[u8]) -> u32 {
        match self {
            Self::Crc32 => crc32(chunk),
            Self::XorFold => xor_fold(chunk),
        }
    }
}

/// Rolling per-chunk hash state for one operation
#[derive(Debug, Clone)]
pub struct IntegrityTracker {
    kind: HashKind,
    chunks: u32,
    last: Option<u32>,
    digest: Crc32,
}

impl IntegrityTracker {
    /// Create a tracker using `kind` for chunk hashes
    pub fn new(kind: HashKind) -> Self {
        Self {
            kind,
            chunks: 0,
            last: None,
            digest: Crc32::new(),
        }
    }

    /// Hash a chunk and fold it into the running digest
    pub fn update(&mut self, chunk: &[u8]) -> u32 {
        let hash = self.kind.hash(chunk);
        self.digest.update(&hash.to_le_bytes());
        self.chunks += 1;
        self.last = Some(hash);
        hash
    }

    /// Hash a chunk without recording it
    pub fn peek(&self, chunk: &[u8]) -> u32 {
        self.kind.hash(chunk)
    }

    /// Hash of the most recent chunk
    pub fn last_hash(&self) -> Option<u32> {
        self.last
    }

    /// Number of chunks seen
    pub fn chunks(&self) -> u32 {
        self.chunks
    }

    /// Digest over all chunk hashes so far, in order
    pub fn digest(&self) -> u32 {
        self.digest.finish()
    }

    /// Forget everything
    pub fn reset(&mut self) {
        *self = Self::new(self.kind);
    }
}

impl Default for IntegrityTracker {
    fn default() -> Self {
        Self::new(HashKind::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_crc32_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn test_crc32_incremental() {
        let mut crc = Crc32::new();
        crc.update(b"1234");
        crc.update(b"56789");
        assert_eq!(crc.finish(), 0xCBF4_3926);
    }

    #[test]
    fn test_xor_fold_is_order_sensitive() {
        let a = xor_fold(&[1, 0, 0, 0, 2, 0, 0, 0]);
        let b = xor_fold(&[2, 0, 0, 0, 1, 0, 0, 0]);
        assert_ne!(a, b);
        assert_eq!(a, xor_fold(&[1, 0, 0, 0, 2, 0, 0, 0]));
    }

    #[test]
    fn test_tracker_reproducible() {
        let pages = [vec![0xAAu8; 2112], vec![0x55u8; 2112]];
        let run = |kind| {
            let mut t = IntegrityTracker::new(kind);
            let hashes: alloc::vec::Vec<u32> = pages.iter().map(|p| t.update(p)).collect();
            (hashes, t.digest(), t.chunks())
        };
        for kind in [HashKind::Crc32, HashKind::XorFold] {
            let (h1, d1, n1) = run(kind);
            let (h2, d2, n2) = run(kind);
            assert_eq!(h1, h2);
            assert_eq!(d1, d2);
            assert_eq!(n1, 2);
            assert_eq!(n2, 2);
            assert_ne!(h1[0], h1[1]);
        }
    }

    #[test]
    fn test_tracker_last_and_reset() {
        let mut t = IntegrityTracker::default();
        assert_eq!(t.last_hash(), None);
        let h = t.update(b"abc");
        assert_eq!(t.last_hash(), Some(h));
        assert_eq!(t.peek(b"abc"), h);
        t.reset();
        assert_eq!(t.chunks(), 0);
        assert_eq!(t.last_hash(), None);
    }
}
