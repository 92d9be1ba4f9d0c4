//! NAND status register

use bitflags::bitflags;

bitflags! {
    /// Status register as returned by READ STATUS (0x70)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u8 {
        /// Last program/erase failed
        const FAIL = 1 << 0;
        /// Previous cached operation failed
        const FAIL_PREVIOUS = 1 << 1;
        /// Array ready (no internal operation running)
        const ARRAY_READY = 1 << 5;
        /// Device ready for a new command
        const READY = 1 << 6;
        /// Not write protected
        const WRITE_ENABLED = 1 << 7;
    }
}

impl Status {
    /// Check if the last program/erase reported failure
    pub fn failed(self) -> bool {
        self.contains(Self::FAIL)
    }

    /// Check if the device reports ready
    pub fn is_ready(self) -> bool {
        self.contains(Self::READY)
    }
}
