//! Error types for nandprog-core
//!
//! This module provides a no_std compatible error type shared by every
//! layer of the engine, plus the wire-stable failure cause codes reported
//! to the host when an operation ends in `Failed`.

use core::fmt;

/// Problems found while delimiting or checking a wire frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Checksum over CMD+LEN+PAYLOAD did not match
    BadChecksum,
    /// Length field exceeds the maximum payload size
    PayloadTooLarge(u32),
    /// Frame ended before its declared length
    Truncated,
}

/// Requests that are well-framed but make no sense right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Command code (or keyword) is not known
    UnknownCommand(u8),
    /// Command is not valid in the current state
    OutOfSequence(u8),
    /// Payload does not have the layout the command requires
    BadPayload(u8),
}

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Wire errors
    /// Frame could not be decoded
    Frame(FrameError),
    /// Request rejected by the protocol layer
    Protocol(ProtocolError),
    /// Encoded page stream is malformed
    Decode,
    /// Host link failed or went silent past the inactivity timeout
    Link,

    // Bus errors
    /// Ready/busy line did not report ready within the bound
    BusTimeout,
    /// Bus strategy could not be brought up
    BusUnavailable,

    // NAND errors
    /// No identifier match; manual selection required
    ChipNotDetected,
    /// NAND reported a failed page program
    ProgramFailed {
        /// Absolute page index
        page: u32,
    },
    /// NAND reported a failed block erase
    EraseFailed {
        /// Block index
        block: u32,
    },
    /// Read-back after write or erase did not match
    Verify {
        /// Absolute page index of the mismatch
        page: u32,
    },
    /// Page or block is outside the selected chip
    AddressOutOfBounds,

    // Session errors
    /// Supply voltage stayed below the threshold (millivolts of the last sample)
    Power(u32),
    /// Checkpoint hash did not match a re-read of the device
    Integrity,
    /// An operation is already running
    Busy,
    /// Checkpoint storage failed
    Storage,
}

/// Machine-readable cause carried by the failure reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FailureCause {
    /// Bus retries exhausted waiting for ready
    BusTimeout = 1,
    /// Read-back mismatch after retries
    VerifyFailed = 2,
    /// NAND status reported program failure
    ProgramFailed = 3,
    /// NAND status reported erase failure
    EraseFailed = 4,
    /// Page read could not be completed
    ReadFailed = 5,
    /// Persistent low supply voltage
    PowerLow = 6,
    /// Host link lost or inactive
    Link = 7,
    /// No chip detected or selected
    NoChip = 8,
    /// Checkpoint storage failed
    Storage = 9,
    /// Request malformed or out of range
    InvalidRequest = 10,
}

impl FailureCause {
    /// Decode a wire cause code
    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::BusTimeout,
            2 => Self::VerifyFailed,
            3 => Self::ProgramFailed,
            4 => Self::EraseFailed,
            5 => Self::ReadFailed,
            6 => Self::PowerLow,
            7 => Self::Link,
            8 => Self::NoChip,
            9 => Self::Storage,
            10 => Self::InvalidRequest,
            _ => return None,
        })
    }

    /// Wire code
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl Error {
    /// Cause code reported to the host when this error ends an operation
    pub fn cause(&self) -> FailureCause {
        match self {
            Self::BusTimeout => FailureCause::BusTimeout,
            Self::BusUnavailable => FailureCause::ReadFailed,
            Self::Verify { .. } => FailureCause::VerifyFailed,
            Self::ProgramFailed { .. } => FailureCause::ProgramFailed,
            Self::EraseFailed { .. } => FailureCause::EraseFailed,
            Self::Power(_) => FailureCause::PowerLow,
            Self::Link => FailureCause::Link,
            Self::ChipNotDetected => FailureCause::NoChip,
            Self::Storage => FailureCause::Storage,
            Self::Frame(_)
            | Self::Protocol(_)
            | Self::Decode
            | Self::AddressOutOfBounds
            | Self::Integrity
            | Self::Busy => FailureCause::InvalidRequest,
        }
    }
}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        Self::Frame(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadChecksum => write!(f, "frame checksum mismatch"),
            Self::PayloadTooLarge(len) => write!(f, "frame payload too large ({} bytes)", len),
            Self::Truncated => write!(f, "frame truncated"),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCommand(cmd) => write!(f, "unknown command 0x{:02X}", cmd),
            Self::OutOfSequence(cmd) => write!(f, "command 0x{:02X} not valid now", cmd),
            Self::BadPayload(cmd) => write!(f, "malformed payload for command 0x{:02X}", cmd),
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::BusTimeout => "bus timeout",
            Self::VerifyFailed => "verify failed",
            Self::ProgramFailed => "program failed",
            Self::EraseFailed => "erase failed",
            Self::ReadFailed => "read failed",
            Self::PowerLow => "supply voltage low",
            Self::Link => "host link lost",
            Self::NoChip => "no NAND chip",
            Self::Storage => "checkpoint storage failed",
            Self::InvalidRequest => "invalid request",
        };
        f.write_str(text)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frame(e) => write!(f, "{}", e),
            Self::Protocol(e) => write!(f, "{}", e),
            Self::Decode => write!(f, "malformed page stream"),
            Self::Link => write!(f, "host link error"),
            Self::BusTimeout => write!(f, "NAND did not become ready in time"),
            Self::BusUnavailable => write!(f, "bus strategy unavailable"),
            Self::ChipNotDetected => write!(f, "NAND chip not detected"),
            Self::ProgramFailed { page } => write!(f, "program failed at page {}", page),
            Self::EraseFailed { block } => write!(f, "erase failed at block {}", block),
            Self::Verify { page } => write!(f, "verify failed at page {}", page),
            Self::AddressOutOfBounds => write!(f, "address out of bounds"),
            Self::Power(mv) => write!(f, "supply voltage low ({} mV)", mv),
            Self::Integrity => write!(f, "checkpoint integrity mismatch"),
            Self::Busy => write!(f, "operation already running"),
            Self::Storage => write!(f, "checkpoint storage error"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
