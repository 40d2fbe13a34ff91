//! Error types for ephlink.

use std::io;
use thiserror::Error;

use crate::protocol::command::BootloaderStatus;

/// Result type for ephlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for ephlink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (device nodes, image files).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The physical link failed a write or read.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A transfer exceeded the link's fixed buffer ceiling.
    #[error("Message of {length} bytes exceeds link limit of {limit} bytes")]
    MessageTooLarge {
        /// Requested transfer length.
        length: usize,
        /// Link ceiling for this direction.
        limit: usize,
    },

    /// The device kept answering with a null or reserved message.
    #[error("Device data not ready (type 0x{type_byte:02X})")]
    DataNotReady {
        /// Type byte of the last message seen.
        type_byte: u8,
    },

    /// A message of an unexpected type was received.
    #[error("Unexpected message type 0x{actual:02X}, expected one of {expected:02X?}")]
    TypeMismatch {
        /// Accepted type bytes.
        expected: Vec<u8>,
        /// Type byte received.
        actual: u8,
    },

    /// A checksum did not match.
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// No expected response arrived within the retry budget.
    #[error("No expected response after {cycles} read cycles")]
    RetryBudgetExhausted {
        /// Number of read cycles performed.
        cycles: usize,
    },

    /// A report did not fit the report slot.
    #[error("Report of {length} bytes exceeds slot capacity of {capacity} bytes")]
    CapacityExceeded {
        /// Decoded report length.
        length: usize,
        /// Slot capacity.
        capacity: usize,
    },

    /// The bootloader reported a state other than the one required.
    #[error("Bootloader state error: expected {expected}, got {actual}")]
    ProtocolState {
        /// Required state.
        expected: BootloaderStatus,
        /// Reported state.
        actual: BootloaderStatus,
    },

    /// Firmware image is malformed.
    #[error("Invalid firmware image: {0}")]
    InvalidImage(String),

    /// Device settings file is malformed or rejected.
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// A bounded wait expired.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The embedding application requested cancellation.
    #[error("Operation interrupted")]
    Interrupted,

    /// Unsupported operation or argument.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
