//! Device settings files.
//!
//! A settings file is a plain sequence of control (0x08) and config (0x0A)
//! write records, exactly as they go on the wire. Parsing stops at the
//! first record of any other type.

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::error::{Error, Result};
use crate::protocol::command::{Space, WRITE_HEADER_SIZE};
use crate::protocol::tlv::{HEADER_SIZE, decode_header};

/// One write record of a settings file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsEntry {
    /// Target space.
    pub space: Space,
    /// Component id.
    pub component: u16,
    /// Offset within the component.
    pub offset: u16,
    /// The complete record, header included.
    pub raw: Vec<u8>,
}

impl SettingsEntry {
    /// Value bytes written by this record.
    pub fn value(&self) -> &[u8] {
        &self.raw[HEADER_SIZE + WRITE_HEADER_SIZE..]
    }
}

/// A parsed device settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsFile {
    entries: Vec<SettingsEntry>,
}

impl SettingsFile {
    /// Parse a settings file.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut entries = Vec::new();
        let mut pos = 0;
        while pos < bytes.len() {
            let Some(header) = decode_header(&bytes[pos..]) else {
                break;
            };
            let Some(space) = Space::from_write_type(header.tlv_type) else {
                debug!("Settings end at offset {pos} ({})", header.tlv_type);
                break;
            };
            let end = pos + header.len();
            if end > bytes.len() {
                return Err(Error::InvalidSettings(format!(
                    "record {} at offset {pos} runs {} bytes past the end of the file",
                    entries.len() + 1,
                    end - bytes.len()
                )));
            }
            if header.len() < HEADER_SIZE + WRITE_HEADER_SIZE {
                return Err(Error::InvalidSettings(format!(
                    "record {} at offset {pos} is too short ({} bytes)",
                    entries.len() + 1,
                    header.len()
                )));
            }
            let raw = &bytes[pos..end];
            entries.push(SettingsEntry {
                space,
                component: LittleEndian::read_u16(&raw[HEADER_SIZE..HEADER_SIZE + 2]),
                offset: LittleEndian::read_u16(&raw[HEADER_SIZE + 2..HEADER_SIZE + 4]),
                raw: raw.to_vec(),
            });
            pos = end;
        }
        Ok(Self { entries })
    }

    /// Parsed records in file order.
    pub fn entries(&self) -> &[SettingsEntry] {
        &self.entries
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.entries
            .len()
    }

    /// Whether the file has no records.
    pub fn is_empty(&self) -> bool {
        self.entries
            .is_empty()
    }
}
