//! NAND command set and address encoding
//!
//! This module provides the ONFI-style opcodes of the 8-bit asynchronous
//! interface, the status register layout and the column/row address cycle
//! encoding used by every page and block transaction.

mod address;
pub mod opcodes;
mod status;

pub use address::{Address, MAX_ADDRESS_CYCLES};
pub use opcodes::*;
pub use status::Status;

/// Number of bytes returned by READ ID
pub const ID_LEN: usize = 5;
