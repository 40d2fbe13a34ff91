//! Bootloader firmware images.
//!
//! ## Layout
//!
//! ```text
//! [info header: 8, optional]
//! [len:2 BE][frame body .. len bytes, CRC trailer included]
//! [len:2 BE][frame body ..]
//! ...
//! ```
//!
//! A frame spans `len + 2` bytes starting at its length prefix. The whole
//! span is sent as the payload of one engineering write. The image is
//! consumed until fewer than three bytes remain.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::command::DeviceInfo;
use crate::protocol::crc::crc8;

/// Size of the optional firmware info header.
pub const FIRMWARE_INFO_SIZE: usize = 8;

/// Size of a frame's length prefix (and of its CRC trailer).
pub const FRAME_CRC_SIZE: usize = 2;

/// Firmware info header prepended to update-detecting images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FirmwareInfo {
    /// Target product id.
    pub product_id: u8,
    /// Target variant id.
    pub variant_id: u8,
    /// Application major version.
    pub application_version_major: u8,
    /// Application minor version.
    pub application_version_minor: u16,
    /// Bootloader version the image was built for.
    pub bootloader_version: u16,
    /// CRC8 over the first seven bytes.
    pub crc: u8,
}

impl FirmwareInfo {
    /// Parse the header from the start of `data`. The CRC is not checked.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = data.get(..FIRMWARE_INFO_SIZE).ok_or_else(|| {
            Error::InvalidImage(format!(
                "image of {} bytes has no {FIRMWARE_INFO_SIZE}-byte info header",
                data.len()
            ))
        })?;
        Ok(Self {
            product_id: header[0],
            variant_id: header[1],
            application_version_major: header[2],
            application_version_minor: LittleEndian::read_u16(&header[3..5]),
            bootloader_version: LittleEndian::read_u16(&header[5..7]),
            crc: header[7],
        })
    }

    /// Encoded header without the CRC byte.
    fn fields(&self) -> [u8; FIRMWARE_INFO_SIZE - 1] {
        let [minor_lo, minor_hi] = self.application_version_minor.to_le_bytes();
        let [boot_lo, boot_hi] = self.bootloader_version.to_le_bytes();
        [
            self.product_id,
            self.variant_id,
            self.application_version_major,
            minor_lo,
            minor_hi,
            boot_lo,
            boot_hi,
        ]
    }

    /// Whether the header CRC is valid.
    pub fn crc_valid(&self) -> bool {
        crc8(&self.fields()) == self.crc
    }

    /// Application version as `major.minor`.
    pub fn application_version(&self) -> String {
        format!(
            "{}.{}",
            self.application_version_major, self.application_version_minor
        )
    }

    /// Whether flashing this image would change the device's application.
    ///
    /// Images for another product or variant never apply. A corrupt header
    /// is an error.
    pub fn needs_update(&self, device: &DeviceInfo) -> Result<bool> {
        if self.product_id != device.product_id || self.variant_id != device.variant_id {
            info!(
                "Image targets product {:#04x} variant {:#04x}, device is {:#04x}/{:#04x}",
                self.product_id, self.variant_id, device.product_id, device.variant_id
            );
            return Ok(false);
        }
        if !self.crc_valid() {
            return Err(Error::Integrity(format!(
                "firmware info crc 0x{:02X}, calculated 0x{:02X}",
                self.crc,
                crc8(&self.fields())
            )));
        }
        if self.bootloader_version != device.bootloader_version {
            warn!(
                "Image built for bootloader {}, device has {}",
                self.bootloader_version, device.bootloader_version
            );
        }
        let differs = self.application_version_major != device.application_version_major
            || self.application_version_minor != device.application_version_minor;
        info!(
            "Device application {}, image {}",
            device.application_version(),
            self.application_version()
        );
        Ok(differs)
    }
}

/// One frame of a firmware image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// 1-based frame number.
    pub index: usize,
    /// Offset of the frame's length prefix in the image.
    pub offset: usize,
    /// Frame bytes, length prefix and CRC trailer included.
    pub data: &'a [u8],
    /// Whether this is the final frame.
    pub is_last: bool,
}

#[derive(Debug, Clone, Copy)]
struct Span {
    offset: usize,
    len: usize,
    is_last: bool,
}

/// A validated in-memory firmware image.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    data: Vec<u8>,
    info: Option<FirmwareInfo>,
    spans: Vec<Span>,
}

impl FirmwareImage {
    /// Validate an image whose frames start at offset zero.
    pub fn new(data: Vec<u8>) -> Result<Self> {
        Self::parse(data, false)
    }

    /// Validate an image carrying the 8-byte firmware info header.
    pub fn with_info_header(data: Vec<u8>) -> Result<Self> {
        Self::parse(data, true)
    }

    fn parse(data: Vec<u8>, info_header: bool) -> Result<Self> {
        check_binary(&data)?;

        let (info, start) = if info_header {
            (Some(FirmwareInfo::parse(&data)?), FIRMWARE_INFO_SIZE)
        } else {
            (None, 0)
        };

        let spans = frame_spans(&data, start)?;
        debug!(
            "Firmware image: {} bytes, {} frames",
            data.len(),
            spans.len()
        );
        Ok(Self { data, info, spans })
    }

    /// The info header, if the image carries one.
    pub fn info(&self) -> Option<&FirmwareInfo> {
        self.info
            .as_ref()
    }

    /// Raw image bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Image size in bytes.
    pub fn len(&self) -> usize {
        self.data
            .len()
    }

    /// Whether the image is empty (never true for a validated image).
    pub fn is_empty(&self) -> bool {
        self.data
            .is_empty()
    }

    /// Number of frames.
    pub fn frame_count(&self) -> usize {
        self.spans
            .len()
    }

    /// Total bytes carried by all frames.
    pub fn payload_len(&self) -> usize {
        self.spans
            .iter()
            .map(|span| span.len)
            .sum()
    }

    /// Iterate over the frames in order.
    pub fn frames(&self) -> impl Iterator<Item = Frame<'_>> + '_ {
        self.spans
            .iter()
            .enumerate()
            .map(|(i, span)| Frame {
                index: i + 1,
                offset: span.offset,
                data: &self.data[span.offset..span.offset + span.len],
                is_last: span.is_last,
            })
    }
}

/// Reject images that are still hex text rather than binary.
fn check_binary(data: &[u8]) -> Result<()> {
    if data.is_empty() {
        return Err(Error::InvalidImage("image is empty".into()));
    }
    if data
        .iter()
        .all(|b| matches!(b, b'0'..=b'9' | b'A'..=b'F'))
    {
        return Err(Error::InvalidImage(
            "image is hex text; convert it to binary first (xxd -r -p)".into(),
        ));
    }
    Ok(())
}

fn frame_spans(data: &[u8], start: usize) -> Result<Vec<Span>> {
    let len = data.len();
    let mut spans = Vec::new();
    let mut pos = start;
    while pos + FRAME_CRC_SIZE < len {
        let size = usize::from(BigEndian::read_u16(&data[pos..pos + FRAME_CRC_SIZE])) + FRAME_CRC_SIZE;
        if pos + size > len {
            return Err(Error::InvalidImage(format!(
                "frame {} at offset {pos} spans {size} bytes, only {} left",
                spans.len() + 1,
                len - pos
            )));
        }
        spans.push(Span {
            offset: pos,
            len: size,
            is_last: pos + FRAME_CRC_SIZE + size >= len,
        });
        pos += size;
    }
    if spans.is_empty() {
        return Err(Error::InvalidImage("image contains no frames".into()));
    }
    Ok(spans)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Two frames: 6 bytes then 5 bytes.
    pub(crate) const TWO_FRAMES: [u8; 11] = [0x00, 0x04, 1, 2, 3, 4, 0x00, 0x03, 5, 6, 7];

    /// Valid info header: product 0x20, variant 0x03, app 2.261, bootloader 0x0201.
    pub(crate) const INFO_HEADER: [u8; 8] = [0x20, 0x03, 0x02, 0x05, 0x01, 0x01, 0x02, 0x67];

    fn device_info() -> DeviceInfo {
        DeviceInfo {
            product_id: 0x20,
            variant_id: 0x03,
            application_version_major: 2,
            application_version_minor: 0x0105,
            bootloader_version: 0x0201,
            protocol_version: 3,
            crc: 0,
        }
    }

    #[test]
    fn test_frames_and_last_flag() {
        let image = FirmwareImage::new(TWO_FRAMES.to_vec()).unwrap();
        let frames: Vec<_> = image.frames().collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, &TWO_FRAMES[..6]);
        assert!(!frames[0].is_last);
        assert_eq!(frames[1].offset, 6);
        assert_eq!(frames[1].data, &TWO_FRAMES[6..]);
        assert!(frames[1].is_last);
        assert_eq!(image.payload_len(), 11);
    }

    #[test]
    fn test_trailing_bytes_below_threshold_ignored() {
        let mut data = TWO_FRAMES.to_vec();
        data.extend_from_slice(&[0xEE, 0xEE]);
        let image = FirmwareImage::new(data).unwrap();
        assert_eq!(image.frame_count(), 2);
        // The last-frame test counts the trailing bytes.
        assert!(image.frames().last().unwrap().is_last);
    }

    #[test]
    fn test_overrunning_frame_rejected() {
        let data = vec![0x00, 0x04, 1, 2, 3, 4, 0x00, 0x10, 5, 6];
        assert!(matches!(
            FirmwareImage::new(data),
            Err(Error::InvalidImage(msg)) if msg.contains("frame 2")
        ));
    }

    #[test]
    fn test_hex_text_and_empty_rejected() {
        assert!(matches!(FirmwareImage::new(Vec::new()), Err(Error::InvalidImage(_))));
        assert!(matches!(
            FirmwareImage::new(b"0004DEADBEEF".to_vec()),
            Err(Error::InvalidImage(msg)) if msg.contains("hex")
        ));
    }

    #[test]
    fn test_info_header_skipped() {
        let mut data = INFO_HEADER.to_vec();
        data.extend_from_slice(&TWO_FRAMES);
        let image = FirmwareImage::with_info_header(data).unwrap();
        let info = image.info().unwrap();
        assert!(info.crc_valid());
        assert_eq!(info.application_version(), "2.261");
        assert_eq!(image.frames().next().unwrap().offset, 8);
        assert_eq!(image.frame_count(), 2);
    }

    #[test]
    fn test_needs_update() {
        let info = FirmwareInfo::parse(&INFO_HEADER).unwrap();
        assert!(!info.needs_update(&device_info()).unwrap());

        let mut newer = INFO_HEADER;
        newer[2] = 0x03;
        newer[7] = 0xAA;
        let newer = FirmwareInfo::parse(&newer).unwrap();
        assert!(newer.crc_valid());
        assert!(newer.needs_update(&device_info()).unwrap());

        let other_product = DeviceInfo {
            product_id: 0x21,
            ..device_info()
        };
        assert!(!newer.needs_update(&other_product).unwrap());
    }

    #[test]
    fn test_needs_update_bad_crc() {
        let mut corrupt = INFO_HEADER;
        corrupt[7] ^= 0x01;
        let info = FirmwareInfo::parse(&corrupt).unwrap();
        assert!(matches!(
            info.needs_update(&device_info()),
            Err(Error::Integrity(_))
        ));
    }
}
