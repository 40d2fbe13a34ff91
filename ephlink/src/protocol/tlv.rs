//! TLV framing.
//!
//! Every command and report on the link is a Type-Length-Value message:
//!
//! ```text
//! +------+------------+------------+----------------------+
//! | Type | Length LSB | Length MSB |       Payload        |
//! +------+------------+------------+----------------------+
//! |  1   |     1      |     1      |  length field bytes  |
//! +------+------------+------------+----------------------+
//! ```
//!
//! The length field on the wire counts payload bytes only. Decoded lengths
//! always include the 3-byte header and saturate at `0xFFFF`.

use std::fmt;

use crate::protocol::crc::crc8;

/// Size of the TLV header (type byte + little-endian length).
pub const HEADER_SIZE: usize = 3;

/// Largest decoded message length.
pub const MAX_MESSAGE_LENGTH: usize = 0xFFFF;

/// The null report the device returns when it has nothing queued.
pub const NULL_MESSAGE: [u8; HEADER_SIZE] = [0, 0, 0];

/// TLV message types.
///
/// Request and response share a type byte for reads, so one variant covers
/// both directions (for example [`TlvType::DeviceInfo`] is both the read
/// command and the data response).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TlvType {
    /// Null message / generic read (0x00).
    Null,
    /// Device information read and data (0x01).
    DeviceInfo,
    /// Extended information read and data (0x02).
    ExtendedInfo,
    /// Control data write and its acknowledgement (0x08).
    ControlWrite,
    /// Control data read and data (0x09).
    ControlRead,
    /// Config data write and its acknowledgement (0x0A).
    ConfigWrite,
    /// Config data read and data (0x0B).
    ConfigRead,
    /// Generic container (0x10).
    Container,
    /// Packetised data (0x21).
    PacketisedData,
    /// Device status report (0x22).
    DeviceStatus,
    /// Touch event container report (0x23).
    TouchReport,
    /// AQFE report (0x24).
    AqfeReport,
    /// Screen-off report (0x25).
    ScreenOffReport,
    /// Bootloader status report (0x50).
    BootloaderStatus,
    /// Bootloader information read and data (0x51).
    BootloaderInfo,
    /// Engineering debug data write and its acknowledgement (0x80).
    EngineeringWrite,
    /// Engineering debug data (0x81).
    EngineeringData,
    /// Algorithm-in-the-loop enable (0x82).
    AlgInLoopEnable,
    /// Device rejected the command (0xFE).
    InvalidCommand,
    /// Reserved sentinel, never a valid message (0xFF).
    Reserved,
    /// Any other type byte.
    Unknown(u8),
}

impl TlvType {
    /// Decode a type byte.
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Self::Null,
            0x01 => Self::DeviceInfo,
            0x02 => Self::ExtendedInfo,
            0x08 => Self::ControlWrite,
            0x09 => Self::ControlRead,
            0x0A => Self::ConfigWrite,
            0x0B => Self::ConfigRead,
            0x10 => Self::Container,
            0x21 => Self::PacketisedData,
            0x22 => Self::DeviceStatus,
            0x23 => Self::TouchReport,
            0x24 => Self::AqfeReport,
            0x25 => Self::ScreenOffReport,
            0x50 => Self::BootloaderStatus,
            0x51 => Self::BootloaderInfo,
            0x80 => Self::EngineeringWrite,
            0x81 => Self::EngineeringData,
            0x82 => Self::AlgInLoopEnable,
            0xFE => Self::InvalidCommand,
            0xFF => Self::Reserved,
            other => Self::Unknown(other),
        }
    }

    /// Encode as a type byte.
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Null => 0x00,
            Self::DeviceInfo => 0x01,
            Self::ExtendedInfo => 0x02,
            Self::ControlWrite => 0x08,
            Self::ControlRead => 0x09,
            Self::ConfigWrite => 0x0A,
            Self::ConfigRead => 0x0B,
            Self::Container => 0x10,
            Self::PacketisedData => 0x21,
            Self::DeviceStatus => 0x22,
            Self::TouchReport => 0x23,
            Self::AqfeReport => 0x24,
            Self::ScreenOffReport => 0x25,
            Self::BootloaderStatus => 0x50,
            Self::BootloaderInfo => 0x51,
            Self::EngineeringWrite => 0x80,
            Self::EngineeringData => 0x81,
            Self::AlgInLoopEnable => 0x82,
            Self::InvalidCommand => 0xFE,
            Self::Reserved => 0xFF,
            Self::Unknown(byte) => byte,
        }
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::DeviceInfo => "device-info",
            Self::ExtendedInfo => "extended-info",
            Self::ControlWrite => "control-write",
            Self::ControlRead => "control-read",
            Self::ConfigWrite => "config-write",
            Self::ConfigRead => "config-read",
            Self::Container => "container",
            Self::PacketisedData => "packetised-data",
            Self::DeviceStatus => "device-status",
            Self::TouchReport => "touch-report",
            Self::AqfeReport => "aqfe-report",
            Self::ScreenOffReport => "screen-off-report",
            Self::BootloaderStatus => "bootloader-status",
            Self::BootloaderInfo => "bootloader-info",
            Self::EngineeringWrite => "engineering-write",
            Self::EngineeringData => "engineering-data",
            Self::AlgInLoopEnable => "alg-in-loop-enable",
            Self::InvalidCommand => "invalid-command",
            Self::Reserved => "reserved",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl From<u8> for TlvType {
    fn from(byte: u8) -> Self {
        Self::from_byte(byte)
    }
}

impl From<TlvType> for u8 {
    fn from(tlv_type: TlvType) -> Self {
        tlv_type.as_byte()
    }
}

impl fmt::Display for TlvType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.as_byte())
    }
}

/// Decoded TLV header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlvHeader {
    /// Message type.
    pub tlv_type: TlvType,
    /// Total message length including the header, saturated at `0xFFFF`.
    pub length: u16,
}

impl TlvHeader {
    /// Total message length in bytes.
    pub fn len(&self) -> usize {
        usize::from(self.length)
    }

    /// Whether the message has no payload.
    pub fn is_empty(&self) -> bool {
        self.len() <= HEADER_SIZE
    }

    /// Number of payload bytes announced by the header.
    pub fn payload_len(&self) -> usize {
        self.len().saturating_sub(HEADER_SIZE)
    }
}

/// Decode a TLV header from the first three bytes of `bytes`.
///
/// Returns `None` if fewer than [`HEADER_SIZE`] bytes are given.
pub fn decode_header(bytes: &[u8]) -> Option<TlvHeader> {
    let header = bytes.get(..HEADER_SIZE)?;
    let raw_length = u16::from_le_bytes([header[1], header[2]]);
    #[allow(clippy::cast_possible_truncation)]
    let length = raw_length.saturating_add(HEADER_SIZE as u16);
    Some(TlvHeader {
        tlv_type: TlvType::from_byte(header[0]),
        length,
    })
}

/// Encode a TLV header announcing `payload_len` payload bytes.
pub fn encode_header(tlv_type: TlvType, payload_len: u16) -> [u8; HEADER_SIZE] {
    let [lsb, msb] = payload_len.to_le_bytes();
    [tlv_type.as_byte(), lsb, msb]
}

/// Whether the start of `bytes` is a null report or the reserved sentinel.
///
/// Either means the device had nothing ready when the read was clocked.
pub fn is_not_ready(bytes: &[u8]) -> bool {
    match bytes.first() {
        Some(&0xFF) => true,
        Some(_) => bytes.get(..HEADER_SIZE) == Some(&NULL_MESSAGE[..]),
        None => true,
    }
}

/// Append a trailing CRC8 to an encoded command.
///
/// The length field is bumped by one first so the CRC covers the final
/// header; the CRC byte is then computed over the whole buffer and pushed.
pub fn append_crc(command: &mut Vec<u8>) {
    if command.len() < HEADER_SIZE {
        return;
    }
    let raw_length = u16::from_le_bytes([command[1], command[2]]).saturating_add(1);
    command[1..HEADER_SIZE].copy_from_slice(&raw_length.to_le_bytes());
    let crc = crc8(command);
    command.push(crc);
}

/// An owned TLV message.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    bytes: Vec<u8>,
}

impl Message {
    /// Wrap raw message bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// The null message `[0, 0, 0]`.
    pub fn null() -> Self {
        Self {
            bytes: NULL_MESSAGE.to_vec(),
        }
    }

    /// Build a message from a type and payload.
    ///
    /// Returns `None` if the payload does not fit the 16-bit length field.
    pub fn new(tlv_type: TlvType, payload: &[u8]) -> Option<Self> {
        let payload_len = u16::try_from(payload.len()).ok()?;
        let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
        bytes.extend_from_slice(&encode_header(tlv_type, payload_len));
        bytes.extend_from_slice(payload);
        Some(Self { bytes })
    }

    /// Decoded header, if at least a header is present.
    pub fn header(&self) -> Option<TlvHeader> {
        decode_header(&self.bytes)
    }

    /// Message type.
    pub fn tlv_type(&self) -> TlvType {
        self.bytes
            .first()
            .map_or(TlvType::Null, |&byte| TlvType::from_byte(byte))
    }

    /// Payload bytes (everything after the header).
    pub fn payload(&self) -> &[u8] {
        self.bytes.get(HEADER_SIZE..).unwrap_or(&[])
    }

    /// Whether this is the null message.
    pub fn is_null(&self) -> bool {
        self.bytes.get(..HEADER_SIZE).is_none_or(|h| h == NULL_MESSAGE)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume into raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Message length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("type", &self.tlv_type())
            .field("bytes", &format_args!("{:02X?}", self.bytes))
            .finish()
    }
}

impl AsRef<[u8]> for Message {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}
