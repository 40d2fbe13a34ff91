//! CRC8 checksum used by the TLV link.
//!
//! Bit-serial, LSB-first, polynomial `0x8C` (the reflected form of `0x31`),
//! seeded at zero with no final XOR. Device info records, firmware info
//! headers and command trailers all use it.

/// Feedback polynomial, applied after each right shift.
const POLYNOMIAL: u8 = 0x8C;

/// Fold one byte into a running CRC8.
pub fn crc8_update(mut crc: u8, mut data: u8) -> u8 {
    for _ in 0..8 {
        let feedback = (crc ^ data) & 0x01;
        data >>= 1;
        crc >>= 1;
        if feedback != 0 {
            crc ^= POLYNOMIAL;
        }
    }
    crc
}

/// Calculate the CRC8 of a byte slice.
pub fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0, |crc, &byte| crc8_update(crc, byte))
}
