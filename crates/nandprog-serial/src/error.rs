//! Error types for the host driver

use nandprog_core::error::FailureCause;
use thiserror::Error;

/// Host driver errors
#[derive(Debug, Error)]
pub enum SerialError {
    /// Failed to connect to the device
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// I/O error during communication
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No reply within the configured timeout
    #[error("Communication timeout")]
    Timeout,

    /// Engine-level error (decoding, framing)
    #[error("{0}")]
    Core(#[from] nandprog_core::Error),

    /// Device ended the operation with a failure
    #[error("Device reported failure: {0:?}")]
    Failed(FailureCause),

    /// Device refused a request
    #[error("Device rejected command 0x{command:02X}: {cause:?}")]
    Rejected {
        /// Refused command code
        command: u8,
        /// Why
        cause: FailureCause,
    },

    /// Operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// No chip is selected on the device
    #[error("No NAND chip detected")]
    NoChip,

    /// A page or the final digest did not match the local hash
    #[error("Integrity check failed at page {0}")]
    Integrity(u32),

    /// Device digest differs from the one computed over the transferred pages
    #[error("Digest mismatch: device {device:#010x}, host {host:#010x}")]
    DigestMismatch {
        /// Reported by the device
        device: u32,
        /// Computed locally
        host: u32,
    },

    /// Reply did not fit the exchange in progress
    #[error("Unexpected reply: {0}")]
    Unexpected(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Configuration file could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for host driver operations
pub type Result<T> = std::result::Result<T, SerialError>;
