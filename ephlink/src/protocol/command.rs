//! Command builders and response decoders.
//!
//! ## Command layouts
//!
//! ```text
//! device info read     [0x01][0x00 0x00]
//! control/config write [0x08|0x0A][len:2][component:2][offset:2][value..]
//! control/config read  [0x09|0x0B][len:2][component:2][offset:2][length:2]
//! engineering write    [0x80][len:2][component:2][data id:1][crc:1][data..]
//! ```
//!
//! All multi-byte fields are little-endian. Builders return the command
//! without the trailing TLV CRC; the executor appends it when the device's
//! protocol version asks for one.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::error::{Error, Result};
use crate::protocol::crc::crc8;
use crate::protocol::tlv::{HEADER_SIZE, TlvType, decode_header, encode_header};

/// Component id reserved for the bootloader.
pub const BOOTLOADER_COMPONENT_ID: u16 = 0xFEFE;

/// Payload of the bootloader unlock command.
pub const BOOTLOADER_START_SEQUENCE: [u8; 2] = [0xDC, 0xAA];

/// Component id + offset prefix of a control/config write.
pub const WRITE_HEADER_SIZE: usize = 4;

/// Component id + data id + crc prefix of an engineering write.
pub const ENGINEERING_HEADER_SIZE: usize = 4;

/// Payload of a control/config read command (component, offset, length).
pub const READ_COMMAND_PAYLOAD: usize = 6;

/// Size of a device info record on the wire, header included.
pub const DEVICE_INFO_SIZE: usize = 12;

/// Data id flag marking the final bootloader frame.
pub const LAST_FRAME_DATA_ID: u8 = 0x01;

/// Highest protocol version that does not use command CRCs.
pub const LAST_PROTOCOL_WITHOUT_CRC: u8 = 2;

/// The two addressable data spaces of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Space {
    /// Control data (volatile runtime controls).
    Control,
    /// Configuration data (persisted with a NVM backup).
    Config,
}

impl Space {
    /// Type byte of a write into this space.
    pub const fn write_type(self) -> TlvType {
        match self {
            Self::Control => TlvType::ControlWrite,
            Self::Config => TlvType::ConfigWrite,
        }
    }

    /// Type byte of a read from this space.
    pub const fn read_type(self) -> TlvType {
        match self {
            Self::Control => TlvType::ControlRead,
            Self::Config => TlvType::ConfigRead,
        }
    }

    /// Space addressed by a write command type.
    pub const fn from_write_type(tlv_type: TlvType) -> Option<Self> {
        match tlv_type {
            TlvType::ControlWrite => Some(Self::Control),
            TlvType::ConfigWrite => Some(Self::Config),
            _ => None,
        }
    }
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Control => write!(f, "control"),
            Self::Config => write!(f, "config"),
        }
    }
}

fn payload_field(len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| Error::MessageTooLarge {
        length: len + HEADER_SIZE,
        limit: usize::from(u16::MAX),
    })
}

/// Build the header-only device info read.
pub fn device_info_request() -> Vec<u8> {
    encode_header(TlvType::DeviceInfo, 0).to_vec()
}

/// Build a control/config write.
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
pub fn control_write(space: Space, component: u16, offset: u16, value: &[u8]) -> Result<Vec<u8>> {
    let payload_len = payload_field(WRITE_HEADER_SIZE + value.len())?;
    let mut buf = Vec::with_capacity(HEADER_SIZE + usize::from(payload_len) + 1);
    buf.extend_from_slice(&encode_header(space.write_type(), payload_len));
    buf.write_u16::<LittleEndian>(component).unwrap();
    buf.write_u16::<LittleEndian>(offset).unwrap();
    buf.extend_from_slice(value);
    Ok(buf)
}

/// Build a control/config read command.
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
#[allow(clippy::cast_possible_truncation)]
pub fn read_command(space: Space, component: u16, offset: u16, length: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + READ_COMMAND_PAYLOAD + 1);
    buf.extend_from_slice(&encode_header(
        space.read_type(),
        READ_COMMAND_PAYLOAD as u16,
    ));
    buf.write_u16::<LittleEndian>(component).unwrap();
    buf.write_u16::<LittleEndian>(offset).unwrap();
    buf.write_u16::<LittleEndian>(length).unwrap();
    buf
}

/// Build an engineering data write.
///
/// The embedded CRC byte is left at zero; payloads carry their own
/// integrity check.
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
pub fn engineering_write(component: u16, data_id: u8, data: &[u8]) -> Result<Vec<u8>> {
    let payload_len = payload_field(ENGINEERING_HEADER_SIZE + data.len())?;
    let mut buf = Vec::with_capacity(HEADER_SIZE + usize::from(payload_len));
    buf.extend_from_slice(&encode_header(TlvType::EngineeringWrite, payload_len));
    buf.write_u16::<LittleEndian>(component).unwrap();
    buf.push(data_id);
    buf.push(0);
    buf.extend_from_slice(data);
    Ok(buf)
}

/// Build the bootloader unlock command.
pub fn bootloader_unlock() -> Result<Vec<u8>> {
    control_write(
        Space::Control,
        BOOTLOADER_COMPONENT_ID,
        0,
        &BOOTLOADER_START_SEQUENCE,
    )
}

/// Number of value bytes a write command carries.
///
/// Must be computed before a CRC is appended.
pub fn expected_bytes_written(command: &[u8]) -> u16 {
    let written = command
        .len()
        .saturating_sub(HEADER_SIZE + WRITE_HEADER_SIZE);
    u16::try_from(written).unwrap_or(u16::MAX)
}

/// Device identification record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceInfo {
    /// Product id.
    pub product_id: u8,
    /// Product variant id.
    pub variant_id: u8,
    /// Application major version.
    pub application_version_major: u8,
    /// Application minor version.
    pub application_version_minor: u16,
    /// Bootloader version.
    pub bootloader_version: u16,
    /// TLV protocol version.
    pub protocol_version: u8,
    /// CRC8 over the record fields.
    pub crc: u8,
}

impl DeviceInfo {
    /// Parse and verify a device info message.
    pub fn parse(message: &[u8]) -> Result<Self> {
        let header = decode_header(message)
            .ok_or_else(|| Error::Integrity("device info message too short".into()))?;
        if header.tlv_type != TlvType::DeviceInfo {
            return Err(Error::TypeMismatch {
                expected: vec![TlvType::DeviceInfo.as_byte()],
                actual: header.tlv_type.as_byte(),
            });
        }
        if message.len() < DEVICE_INFO_SIZE {
            return Err(Error::Integrity(format!(
                "device info record is {} bytes, expected {DEVICE_INFO_SIZE}",
                message.len()
            )));
        }

        let fields = &message[HEADER_SIZE..DEVICE_INFO_SIZE - 1];
        let crc = message[DEVICE_INFO_SIZE - 1];
        let calculated = crc8(fields);
        if calculated != crc {
            return Err(Error::Integrity(format!(
                "device info crc 0x{crc:02X}, calculated 0x{calculated:02X}"
            )));
        }

        Ok(Self {
            product_id: fields[0],
            variant_id: fields[1],
            application_version_major: fields[2],
            application_version_minor: LittleEndian::read_u16(&fields[3..5]),
            bootloader_version: LittleEndian::read_u16(&fields[5..7]),
            protocol_version: fields[7],
            crc,
        })
    }

    /// Whether control/config commands to this device carry a trailing CRC.
    pub fn requires_command_crc(&self) -> bool {
        self.protocol_version > LAST_PROTOCOL_WITHOUT_CRC
    }

    /// Application version as `major.minor`.
    pub fn application_version(&self) -> String {
        format!(
            "{}.{}",
            self.application_version_major, self.application_version_minor
        )
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "product {:#04x} variant {:#04x} app {} bootloader {} protocol {}",
            self.product_id,
            self.variant_id,
            self.application_version(),
            self.bootloader_version,
            self.protocol_version
        )
    }
}

/// Acknowledgement of a write command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteAck {
    /// Acknowledged command type.
    pub tlv_type: TlvType,
    /// Number of bytes the device accepted.
    pub bytes_written: u16,
}

impl WriteAck {
    /// Parse a write acknowledgement.
    pub fn parse(message: &[u8]) -> Option<Self> {
        let header = decode_header(message)?;
        let field = message.get(HEADER_SIZE..HEADER_SIZE + 2)?;
        Some(Self {
            tlv_type: header.tlv_type,
            bytes_written: LittleEndian::read_u16(field),
        })
    }
}

/// Bootloader state as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BootloaderStatus {
    /// No valid status (also used for unrecognised reports).
    Invalid,
    /// The application CRC check failed at boot.
    AppCrcFailed,
    /// Waiting for the unlock command.
    WaitingStartCommand,
    /// Waiting for the next frame.
    WaitingFrameData,
    /// Processing the last frame.
    ProcessingFrame,
}

impl BootloaderStatus {
    /// Decode a status byte.
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Self::AppCrcFailed,
            2 => Self::WaitingStartCommand,
            3 => Self::WaitingFrameData,
            4 => Self::ProcessingFrame,
            _ => Self::Invalid,
        }
    }

    /// Encode as a status byte.
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Invalid => 0,
            Self::AppCrcFailed => 1,
            Self::WaitingStartCommand => 2,
            Self::WaitingFrameData => 3,
            Self::ProcessingFrame => 4,
        }
    }

    /// Decode a bootloader status report.
    ///
    /// Anything that is not a status report is [`BootloaderStatus::Invalid`].
    pub fn from_report(message: &[u8]) -> Self {
        match (decode_header(message), message.get(HEADER_SIZE)) {
            (Some(header), Some(&status)) if header.tlv_type == TlvType::BootloaderStatus => {
                Self::from_byte(status)
            },
            _ => Self::Invalid,
        }
    }
}

impl fmt::Display for BootloaderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Invalid => "invalid",
            Self::AppCrcFailed => "app CRC failed",
            Self::WaitingStartCommand => "waiting for start command",
            Self::WaitingFrameData => "waiting for frame data",
            Self::ProcessingFrame => "processing frame",
        };
        f.write_str(name)
    }
}

/// Device status report contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatus {
    /// Status flags.
    pub flags: u8,
    /// Component the status refers to.
    pub component: u16,
}

impl DeviceStatus {
    /// The device completed a reset.
    pub const RESET: u8 = 0x01;
    /// Control data changed.
    pub const CONTROL: u8 = 0x02;
    /// Config data changed.
    pub const CONFIG: u8 = 0x04;

    /// Decode the payload of a device status report.
    pub fn parse(message: &[u8]) -> Option<Self> {
        let payload = message.get(HEADER_SIZE..HEADER_SIZE + 3)?;
        Some(Self {
            flags: payload[0],
            component: LittleEndian::read_u16(&payload[1..3]),
        })
    }

    /// Whether the reset bit is set.
    pub fn is_reset(&self) -> bool {
        self.flags & Self::RESET != 0
    }
}
