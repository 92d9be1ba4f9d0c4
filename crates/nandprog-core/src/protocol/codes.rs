//! Command and response codes of the framed protocol

// Host -> device
/// Report the selected chip (and any stored checkpoint)
pub const CMD_STATUS: u8 = 0x01;
/// Start a read operation
pub const CMD_READ: u8 = 0x02;
/// Start a write operation
pub const CMD_WRITE: u8 = 0x03;
/// Start an erase operation
pub const CMD_ERASE: u8 = 0x04;
/// Cancel the running operation at the next boundary
pub const CMD_CANCEL: u8 = 0x05;
/// Pause the running operation at the next boundary
pub const CMD_PAUSE: u8 = 0x06;
/// Resume a paused operation
pub const CMD_RESUME_OP: u8 = 0x07;
/// Set the block the next operation resumes from
pub const CMD_SET_RESUME: u8 = 0x08;
/// Sample the supply voltage now
pub const CMD_POWER_CHECK: u8 = 0x09;
/// Select a chip by 1-based listing index
pub const CMD_SELECT: u8 = 0x0A;
/// Reset the die and run detection again
pub const CMD_REDETECT: u8 = 0x0B;
/// End the session
pub const CMD_EXIT: u8 = 0x0C;
/// Request the manual-selection listing
pub const CMD_LIST: u8 = 0x0D;
/// Drop the stored checkpoint
pub const CMD_CLEAR_RESUME: u8 = 0x0E;
/// One encoded page of write data
pub const CMD_DATA: u8 = 0x17;

// Device -> host
/// Progress: percent u16, completed u32, total u32
pub const RSP_PROGRESS: u8 = 0x10;
/// Device is ready for write data, starting at block u32
pub const RSP_READY_FOR_DATA: u8 = 0x11;
/// Operation completed: digest u32
pub const RSP_COMPLETE: u8 = 0x12;
/// Operation failed: cause u8
pub const RSP_ERROR: u8 = 0x13;
/// Selected chip name (empty when none)
pub const RSP_MODEL: u8 = 0x14;
/// Supply voltage below threshold: millivolts u32
pub const RSP_POWER_WARNING: u8 = 0x15;
/// Chunk hash of a read page: page u32, crc u32
pub const RSP_PAGE_CRC: u8 = 0x16;
/// One encoded page of read data
pub const RSP_DATA: u8 = 0x17;
/// Operation paused at a boundary
pub const RSP_PAUSED: u8 = 0x18;
/// Operation cancelled at a boundary
pub const RSP_CANCELLED: u8 = 0x19;
/// Supply voltage: millivolts u32
pub const RSP_POWER: u8 = 0x1A;
/// Start of the manual-selection listing
pub const RSP_SELECT_START: u8 = 0x1B;
/// One listing entry: index u16, name
pub const RSP_SELECT_ENTRY: u8 = 0x1C;
/// End of the manual-selection listing
pub const RSP_SELECT_END: u8 = 0x1D;
/// Stored checkpoint: kind u8, next block u32, chunk hash u32
pub const RSP_RESUME_OFFER: u8 = 0x1E;
/// Command accepted: command u8
pub const RSP_ACK: u8 = 0x1F;
/// Command refused: command u8, cause u8
pub const RSP_REJECTED: u8 = 0x20;
