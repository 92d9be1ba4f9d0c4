//! Column/row address cycle encoding

use heapless::Vec;

use crate::chip::ChipProfile;

/// Largest number of address cycles (2 column + 3 row)
pub const MAX_ADDRESS_CYCLES: usize = 5;

/// Address cycles for one transaction, least significant byte first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    cycles: Vec<u8, MAX_ADDRESS_CYCLES>,
}

impl Address {
    /// Column + row cycles for page read/program
    pub fn page(profile: &ChipProfile, page: u32, column: u16) -> Self {
        let mut cycles = Vec::new();
        // capacity is MAX_ADDRESS_CYCLES, at most 5 pushes happen
        let _ = cycles.push(column as u8);
        let _ = cycles.push((column >> 8) as u8);
        for i in 0..profile.row_cycles() {
            let _ = cycles.push((page >> (8 * i)) as u8);
        }
        Self { cycles }
    }

    /// Row-only cycles for block erase
    pub fn block(profile: &ChipProfile, block: u32) -> Self {
        let row = profile.block_first_page(block);
        let mut cycles = Vec::new();
        for i in 0..profile.row_cycles() {
            let _ = cycles.push((row >> (8 * i)) as u8);
        }
        Self { cycles }
    }

    /// Single 0x00 cycle used by READ ID
    pub fn id() -> Self {
        let mut cycles = Vec::new();
        let _ = cycles.push(0x00);
        Self { cycles }
    }

    /// The cycles in bus order
    pub fn as_bytes(&self) -> &[u8] {
        &self.cycles
    }
}
