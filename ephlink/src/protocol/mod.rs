//! Protocol implementations.

pub mod command;
pub mod crc;
pub mod tlv;

// Re-export common types
pub use command::{BootloaderStatus, DeviceInfo, DeviceStatus, WriteAck};
pub use tlv::{HEADER_SIZE, TlvHeader, TlvType, decode_header, encode_header};
