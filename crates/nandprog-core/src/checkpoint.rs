//! Resume checkpoints
//!
//! A checkpoint records the last block an operation fully completed and
//! the hash of its last chunk. It is written after every completed block
//! as a small fixed-size record with its own CRC, so a record torn by a
//! power cut is detected and ignored instead of trusted.

use core::mem::size_of;

use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::Result;
use crate::integrity::crc32;
use crate::protocol::{OperationKind, ResumeOffer};

const RECORD_MAGIC: [u8; 4] = *b"PFCK";
const RECORD_VERSION: u8 = 1;

/// Persisted resume position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// Interrupted operation
    pub kind: OperationKind,
    /// Last fully completed block
    pub block: u32,
    /// Last page of that block (absolute page index)
    pub page: u32,
    /// Chunk hash of `page` (or of the block index for erase)
    pub chunk_hash: u32,
    /// Session that wrote the checkpoint
    pub token: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct Record {
    magic: [u8; 4],
    version: u8,
    kind: u8,
    reserved: [u8; 2],
    block: U32,
    page: U32,
    chunk_hash: U32,
    token: U32,
    crc: U32,
}

/// Size of the on-storage record
pub const RECORD_LEN: usize = size_of::<Record>();

impl Checkpoint {
    /// First block still to do
    pub fn next_block(&self) -> u32 {
        self.block + 1
    }

    /// What the host is told about this checkpoint
    pub fn offer(&self) -> ResumeOffer {
        ResumeOffer {
            kind: self.kind,
            next_block: self.next_block(),
            chunk_hash: self.chunk_hash,
        }
    }

    /// Serialize to the storage record
    pub fn to_record(&self) -> [u8; RECORD_LEN] {
        let mut record = Record {
            magic: RECORD_MAGIC,
            version: RECORD_VERSION,
            kind: self.kind as u8,
            reserved: [0; 2],
            block: U32::new(self.block),
            page: U32::new(self.page),
            chunk_hash: U32::new(self.chunk_hash),
            token: U32::new(self.token),
            crc: U32::new(0),
        };
        record.crc = U32::new(crc32(&record.as_bytes()[..RECORD_LEN - 4]));
        let mut out = [0u8; RECORD_LEN];
        out.copy_from_slice(record.as_bytes());
        out
    }

    /// Parse a storage record, `None` if it is torn or foreign
    pub fn from_record(bytes: &[u8]) -> Option<Self> {
        let record = Record::read_from_bytes(bytes).ok()?;
        if record.magic != RECORD_MAGIC || record.version != RECORD_VERSION {
            return None;
        }
        if crc32(&bytes[..RECORD_LEN - 4]) != record.crc.get() {
            return None;
        }
        Some(Self {
            kind: OperationKind::from_u8(record.kind)?,
            block: record.block.get(),
            page: record.page.get(),
            chunk_hash: record.chunk_hash.get(),
            token: record.token.get(),
        })
    }
}

/// Durable storage for at most one checkpoint
pub trait CheckpointStore {
    /// Read the stored checkpoint; a torn record reads as `None`
    fn load(&mut self) -> Result<Option<Checkpoint>>;

    /// Replace the stored checkpoint
    fn save(&mut self, checkpoint: &Checkpoint) -> Result<()>;

    /// Remove the stored checkpoint
    fn clear(&mut self) -> Result<()>;
}

impl<S: CheckpointStore + ?Sized> CheckpointStore for &mut S {
    fn load(&mut self) -> Result<Option<Checkpoint>> {
        (**self).load()
    }

    fn save(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        (**self).save(checkpoint)
    }

    fn clear(&mut self) -> Result<()> {
        (**self).clear()
    }
}

/// Checkpoint store in RAM (or in a retained/backup RAM region)
#[derive(Debug, Default, Clone)]
pub struct MemoryCheckpointStore {
    record: Option<[u8; RECORD_LEN]>,
    saves: u32,
}

impl MemoryCheckpointStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw record, if any
    pub fn record(&self) -> Option<&[u8; RECORD_LEN]> {
        self.record.as_ref()
    }

    /// Overwrite the raw record (power-cut simulation)
    pub fn set_record(&mut self, record: Option<[u8; RECORD_LEN]>) {
        self.record = record;
    }

    /// Number of saves performed
    pub fn saves(&self) -> u32 {
        self.saves
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&mut self) -> Result<Option<Checkpoint>> {
        Ok(self.record.as_ref().and_then(|r| {
            let cp = Checkpoint::from_record(r);
            if cp.is_none() {
                log::warn!("checkpoint: stored record is corrupt, ignoring it");
            }
            cp
        }))
    }

    fn save(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        self.record = Some(checkpoint.to_record());
        self.saves += 1;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.record = None;
        Ok(())
    }
}

#[cfg(feature = "std")]
pub use file::FileCheckpointStore;

#[cfg(feature = "std")]
mod file {
    use std::fs;
    use std::io::ErrorKind;
    use std::path::{Path, PathBuf};

    use super::{Checkpoint, CheckpointStore};
    use crate::error::{Error, Result};

    /// Checkpoint store backed by a small file
    ///
    /// Saves go to a sibling temporary file that is then renamed over the
    /// record, so the record on disk is always either the old or the new one.
    #[derive(Debug, Clone)]
    pub struct FileCheckpointStore {
        path: PathBuf,
    }

    impl FileCheckpointStore {
        /// Use `path` for the record
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self { path: path.into() }
        }

        /// Record location
        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    impl CheckpointStore for FileCheckpointStore {
        fn load(&mut self) -> Result<Option<Checkpoint>> {
            match fs::read(&self.path) {
                Ok(bytes) => {
                    let cp = Checkpoint::from_record(&bytes);
                    if cp.is_none() {
                        log::warn!("checkpoint: {} is corrupt, ignoring it", self.path.display());
                    }
                    Ok(cp)
                }
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => {
                    log::error!("checkpoint: cannot read {}: {}", self.path.display(), e);
                    Err(Error::Storage)
                }
            }
        }

        fn save(&mut self, checkpoint: &Checkpoint) -> Result<()> {
            let tmp = self.path.with_extension("tmp");
            fs::write(&tmp, checkpoint.to_record())
                .and_then(|_| fs::rename(&tmp, &self.path))
                .map_err(|e| {
                    log::error!("checkpoint: cannot write {}: {}", self.path.display(), e);
                    Error::Storage
                })
        }

        fn clear(&mut self) -> Result<()> {
            match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => {
                    log::error!("checkpoint: cannot remove {}: {}", self.path.display(), e);
                    Err(Error::Storage)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Checkpoint {
        Checkpoint {
            kind: OperationKind::Write,
            block: 7,
            page: 7 * 64 + 63,
            chunk_hash: 0xA5A5_1234,
            token: 42,
        }
    }

    #[test]
    fn test_record_layout() {
        assert_eq!(RECORD_LEN, 28);
        let rec = sample().to_record();
        assert_eq!(&rec[..4], b"PFCK");
        assert_eq!(rec[5], OperationKind::Write as u8);
        assert_eq!(Checkpoint::from_record(&rec), Some(sample()));
    }

    #[test]
    fn test_torn_record_is_ignored() {
        let rec = sample().to_record();
        for i in 0..RECORD_LEN {
            let mut torn = rec;
            torn[i] ^= 0x10;
            assert_eq!(Checkpoint::from_record(&torn), None, "byte {}", i);
        }
        assert_eq!(Checkpoint::from_record(&rec[..20]), None);
    }

    #[test]
    fn test_memory_store() {
        let mut store = MemoryCheckpointStore::new();
        assert_eq!(store.load(), Ok(None));
        store.save(&sample()).unwrap();
        assert_eq!(store.load(), Ok(Some(sample())));
        assert_eq!(store.saves(), 1);

        let mut torn = *store.record().unwrap();
        torn[10] ^= 1;
        store.set_record(Some(torn));
        assert_eq!(store.load(), Ok(None));

        store.clear().unwrap();
        assert!(store.record().is_none());
    }

    #[test]
    fn test_offer() {
        let offer = sample().offer();
        assert_eq!(offer.next_block, 8);
        assert_eq!(offer.kind, OperationKind::Write);
    }

    #[cfg(feature = "std")]
    #[test]
    fn test_file_store() {
        let path = std::env::temp_dir().join(std::format!("nandprog-cp-{}.bin", std::process::id()));
        let mut store = FileCheckpointStore::new(&path);
        store.clear().unwrap();
        assert_eq!(store.load(), Ok(None));
        store.save(&sample()).unwrap();
        assert_eq!(FileCheckpointStore::new(&path).load(), Ok(Some(sample())));
        store.clear().unwrap();
        assert_eq!(store.load(), Ok(None));
    }
}
