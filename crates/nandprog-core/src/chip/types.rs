//! NAND chip type definitions

use alloc::{format, string::String, vec::Vec};

/// Erased byte value of NAND cells
pub const ERASED: u8 = 0xFF;

/// Default spare-area size for a given main-area page size
///
/// 512-byte small-page parts carry 16 spare bytes, large-page parts up to
/// 2 KiB carry 64, bigger pages carry 128.
pub const fn default_oob_size(page_size: u32) -> u32 {
    if page_size <= 512 {
        16
    } else if page_size <= 2048 {
        64
    } else {
        128
    }
}

/// Geometry of one NAND part
///
/// Immutable once resolved. A session holds at most one selected profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipProfile {
    /// Manufacturer name
    pub vendor: String,
    /// Part name
    pub name: String,
    /// READ ID byte sequence that identifies this part
    pub id: Vec<u8>,
    /// Main-area page size in bytes
    pub page_size: u32,
    /// Spare (OOB) bytes per page
    pub oob_size: u32,
    /// Pages per erase block
    pub pages_per_block: u32,
    /// Number of erase blocks
    pub block_count: u32,
}

impl ChipProfile {
    /// Create a profile, deriving the OOB size from the page size
    pub fn new(
        vendor: &str,
        name: &str,
        id: &[u8],
        page_size: u32,
        pages_per_block: u32,
        block_count: u32,
    ) -> Self {
        Self {
            vendor: String::from(vendor),
            name: String::from(name),
            id: id.to_vec(),
            page_size,
            oob_size: default_oob_size(page_size),
            pages_per_block,
            block_count,
        }
    }

    /// "Vendor Name" as shown to the host
    pub fn full_name(&self) -> String {
        format!("{} {}", self.vendor, self.name)
    }

    /// Bytes per page including the spare area
    pub fn page_total_size(&self) -> u32 {
        self.page_size + self.oob_size
    }

    /// Total number of pages on the die
    pub fn total_pages(&self) -> u32 {
        self.pages_per_block * self.block_count
    }

    /// Main-area capacity in bytes
    pub fn total_size(&self) -> u64 {
        self.page_size as u64 * self.total_pages() as u64
    }

    /// Raw image size including spare areas
    pub fn raw_size(&self) -> u64 {
        self.page_total_size() as u64 * self.total_pages() as u64
    }

    /// Number of row address cycles (2 or 3)
    pub fn row_cycles(&self) -> u8 {
        if self.total_pages() > 0x1_0000 {
            3
        } else {
            2
        }
    }

    /// First page of a block
    pub fn block_first_page(&self, block: u32) -> u32 {
        block * self.pages_per_block
    }

    /// Block containing a page
    pub fn page_block(&self, page: u32) -> u32 {
        page / self.pages_per_block
    }

    /// Check that the profile describes a usable geometry
    pub fn is_valid(&self) -> bool {
        self.page_size > 0
            && self.pages_per_block > 0
            && self.block_count > 0
            && self.total_pages() <= 1 << 24
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_oob_size() {
        assert_eq!(default_oob_size(512), 16);
        assert_eq!(default_oob_size(2048), 64);
        assert_eq!(default_oob_size(4096), 128);
    }

    #[test]
    fn test_geometry() {
        let p = ChipProfile::new("Samsung", "K9F1G08U0A", &[0xEC, 0xF1], 2048, 64, 1024);
        assert_eq!(p.page_total_size(), 2112);
        assert_eq!(p.total_pages(), 65536);
        assert_eq!(p.row_cycles(), 2);
        assert_eq!(p.total_size(), 128 * 1024 * 1024);
        assert_eq!(p.block_first_page(3), 192);
        assert_eq!(p.page_block(193), 3);
        assert_eq!(p.full_name(), "Samsung K9F1G08U0A");

        let big = ChipProfile::new("Hynix", "H27UBG8T2A", &[0xAD, 0xD3], 4096, 256, 8192);
        assert_eq!(big.row_cycles(), 3);
    }
}
