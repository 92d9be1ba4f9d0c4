//! Standard NAND opcodes
//!
//! Two-cycle commands latch their first opcode, then the address cycles,
//! then the confirm opcode.

// ============================================================================
// Page read
// ============================================================================

/// Read - first cycle
pub const READ_1ST: u8 = 0x00;
/// Read - confirm, starts the array-to-register transfer
pub const READ_2ND: u8 = 0x30;

// ============================================================================
// Page program
// ============================================================================

/// Page Program - first cycle, followed by address and data
pub const PROGRAM_1ST: u8 = 0x80;
/// Page Program - confirm, starts the register-to-array transfer
pub const PROGRAM_2ND: u8 = 0x10;

// ============================================================================
// Block erase
// ============================================================================

/// Block Erase - first cycle, followed by row address
pub const ERASE_1ST: u8 = 0x60;
/// Block Erase - confirm
pub const ERASE_2ND: u8 = 0xD0;

// ============================================================================
// Identification and control
// ============================================================================

/// Read Status register
pub const READ_STATUS: u8 = 0x70;
/// Read ID (one address cycle of 0x00)
pub const READ_ID: u8 = 0x90;
/// Reset
pub const RESET: u8 = 0xFF;
