//! Host link protocol
//!
//! This module provides the framed binary protocol (the normal transport),
//! the message types shared by host and device, and the legacy text line
//! protocol kept for old host tools. The transport is chosen once per
//! session by the first two bytes the host sends.

pub mod codes;
mod frame;
pub mod legacy;
mod message;

pub use frame::{encode_frame, encode_frame_into, Frame, FrameDecoder, HEADER_LEN, MAGIC, MAX_PAYLOAD, TRAILER_LEN};
pub use message::*;

/// Wire transport in use for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolMode {
    /// Checksummed binary frames
    Framed,
    /// Newline-terminated text commands
    Legacy,
    /// Decide from the first bytes the host sends
    Negotiate,
}

impl ProtocolMode {
    /// Pick the transport from the first two bytes received
    pub fn detect(first: [u8; 2]) -> Self {
        if first == MAGIC {
            Self::Framed
        } else {
            Self::Legacy
        }
    }
}
