//! SAM4000 link-level protocol: control codes, checksum, and frame
//! splitting.
//!
//! A device-to-host frame on the wire looks like:
//!
//! ```text
//! STX payload ETB checksum '$'
//! ```
//!
//! where `payload` is CR-separated ASCII fields and `checksum` is the XOR
//! of every byte from STX through ETB inclusive. The functions here are
//! pure; all port I/O lives in [crate::link].

use crate::{Error, Result};

/// Control codes exchanged with the device. Byte values must match the
/// device firmware exactly.
pub mod code {
    /// Frame start.
    pub const STX: u8 = 0x02;
    /// Host poll for new data.
    pub const ENQ: u8 = 0x05;
    /// Acknowledge, completing a communication cycle.
    pub const ACK: u8 = 0x06;
    /// Intra-frame field separator.
    pub const CR: u8 = 0x0D;
    /// Device: no new data. Host: request retransmission.
    pub const NAK: u8 = 0x15;
    /// End-of-data trailer, precedes the checksum byte.
    pub const ETB: u8 = 0x17;
    /// Deactivate the device.
    pub const EXIT: u8 = 0xB0;
    /// Activate in barcode mode.
    pub const BAR: u8 = 0xB1;
    /// Activate in no-barcode mode.
    pub const NOBAR: u8 = 0xB2;
    /// End-of-frame sentinel (`$`).
    pub const EOF: u8 = 0x24;
}

/// XOR-reduce every byte in `data`.
///
/// Order-independent and associative, so any permutation of the same byte
/// multiset yields the same value.
#[must_use]
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, &b| acc ^ b)
}

/// The checksum the device transmits for `payload`.
///
/// Coverage is STX through ETB inclusive even though neither byte is part
/// of the extracted payload.
#[must_use]
pub fn frame_checksum(payload: &[u8]) -> u8 {
    code::STX ^ checksum(payload) ^ code::ETB
}

/// Split a raw frame body (the bytes between STX and the `$` sentinel)
/// into its payload and the trailing checksum byte.
///
/// The first ETB is the trailer. The payload is ASCII text and can never
/// contain one, but the checksum byte may collide with any control code,
/// so scanning from the back would misparse such frames.
///
/// # Errors
/// [Error::FrameMalformed] if the ETB trailer is absent or is not
/// followed by exactly one checksum byte.
pub fn extract_frame(raw: &[u8]) -> Result<(&[u8], u8)> {
    let Some(at) = raw.iter().position(|&b| b == code::ETB) else {
        return Err(Error::FrameMalformed("missing ETB trailer"));
    };
    match raw.len() - at {
        2 => Ok((&raw[..at], raw[at + 1])),
        1 => Err(Error::FrameMalformed("missing checksum byte")),
        _ => Err(Error::FrameMalformed("data after checksum byte")),
    }
}
