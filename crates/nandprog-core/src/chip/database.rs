//! Chip database files for runtime loading
//!
//! Extra parts can be described in RON files and appended to the built-in
//! table:
//!
//! ```ron
//! (
//!     vendor: "Samsung",
//!     chips: [
//!         (name: "K9F1G08U0D", id: [0xEC, 0xF1, 0x00, 0x15], page_size: KiB(2), pages_per_block: 64, blocks: 1024),
//!     ],
//! )
//! ```

use alloc::{string::String, vec::Vec};
use std::fs;
use std::io;
use std::path::Path;

use super::registry::ChipRegistry;
use super::types::{default_oob_size, ChipProfile};

/// Error type for chip database operations
#[derive(Debug)]
pub enum ChipDbError {
    /// I/O error reading files
    Io(io::Error),
    /// RON parsing error
    Parse(ron::error::SpannedError),
    /// Validation error
    Validation(String),
}

impl From<io::Error> for ChipDbError {
    fn from(e: io::Error) -> Self {
        ChipDbError::Io(e)
    }
}

impl From<ron::error::SpannedError> for ChipDbError {
    fn from(e: ron::error::SpannedError) -> Self {
        ChipDbError::Parse(e)
    }
}

impl std::fmt::Display for ChipDbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChipDbError::Io(e) => write!(f, "I/O error: {}", e),
            ChipDbError::Parse(e) => write!(f, "Parse error: {}", e),
            ChipDbError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ChipDbError {}

/// Size specification with human-readable units (for RON parsing)
#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub enum Size {
    /// Size in bytes
    B(u32),
    /// Size in kibibytes (1024 bytes)
    KiB(u32),
}

impl Size {
    /// Convert to bytes
    pub fn to_bytes(self) -> u32 {
        match self {
            Size::B(n) => n,
            Size::KiB(n) => n * 1024,
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct ChipDef {
    name: String,
    id: Vec<u8>,
    page_size: Size,
    #[serde(default)]
    oob_size: Option<u32>,
    pages_per_block: u32,
    blocks: u32,
}

#[derive(Debug, serde::Deserialize)]
struct VendorDef {
    vendor: String,
    chips: Vec<ChipDef>,
}

impl ChipRegistry {
    /// Load chip definitions from a single RON file
    pub fn load_file(&mut self, path: &Path) -> Result<usize, ChipDbError> {
        let content = fs::read_to_string(path)?;
        self.load_ron(&content)
    }

    /// Load chip definitions from a RON string
    pub fn load_ron(&mut self, content: &str) -> Result<usize, ChipDbError> {
        let vendor_def: VendorDef = ron::from_str(content)?;
        let mut profiles = Vec::with_capacity(vendor_def.chips.len());

        for def in vendor_def.chips {
            let page_size = def.page_size.to_bytes();
            let profile = ChipProfile {
                vendor: vendor_def.vendor.clone(),
                name: def.name,
                id: def.id,
                page_size,
                oob_size: def.oob_size.unwrap_or_else(|| default_oob_size(page_size)),
                pages_per_block: def.pages_per_block,
                block_count: def.blocks,
            };
            if profile.id.is_empty() || !profile.is_valid() {
                return Err(ChipDbError::Validation(profile.full_name()));
            }
            profiles.push(profile);
        }

        let count = profiles.len();
        self.extend(profiles);
        Ok(count)
    }

    /// Load all RON files from a directory
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, ChipDbError> {
        let mut total = 0;

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().is_some_and(|ext| ext == "ron") {
                total += self.load_file(&path)?;
            }
        }

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"(
        vendor: "Kioxia",
        chips: [
            (name: "TC58NVG0S3H", id: [0x98, 0xF1, 0x80, 0x15], page_size: KiB(2), pages_per_block: 64, blocks: 1024),
            (name: "TH58NVG2S3H", id: [0x98, 0xDC, 0x91], page_size: B(2048), oob_size: Some(128), pages_per_block: 64, blocks: 4096),
        ],
    )"#;

    #[test]
    fn test_load_ron() {
        let mut reg = ChipRegistry::new();
        assert_eq!(reg.load_ron(SAMPLE).unwrap(), 2);
        let p = reg.select("TC58NVG0S3H").unwrap();
        assert_eq!(p.page_size, 2048);
        assert_eq!(p.oob_size, 64);
        let q = reg.detect(&[0x98, 0xDC, 0x91, 0x15, 0x72]).unwrap();
        assert_eq!(q.oob_size, 128);
    }

    #[test]
    fn test_load_ron_rejects_empty_geometry() {
        let bad = r#"(vendor: "X", chips: [(name: "Y", id: [0x01], page_size: B(0), pages_per_block: 64, blocks: 8)])"#;
        let mut reg = ChipRegistry::new();
        assert!(matches!(reg.load_ron(bad), Err(ChipDbError::Validation(_))));
    }
}
