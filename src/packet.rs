//! Command packet framing.
//!
//! ```text
//! [len][command][payload ...][crc32 (le)]
//! ```
//!
//! `len` counts every byte after itself, so a packet occupies `len + 1` bytes
//! and the CRC covers all of them except the trailing four.

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::Read;

use crate::crc;
use crate::{Error, Options};

/// Receive buffer capacity, including the length byte
pub const PACKET_CAPACITY: usize = 200;

/// Bytes occupied by the trailing checksum
pub const CRC_LEN: usize = 4;

/// Smallest valid length field (command code plus checksum)
pub const MIN_LENGTH: u8 = 1 + CRC_LEN as u8;

/// Largest payload that fits in a packet
pub const MAX_PAYLOAD: usize = PACKET_CAPACITY - 2 - CRC_LEN;

#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum FramingError {
    /// Length field below [`MIN_LENGTH`]
    #[cfg_attr(feature = "std", error("length {0} is shorter than the minimum packet"))]
    TooShort(u8),

    /// Length field would overrun the receive buffer
    #[cfg_attr(feature = "std", error("length {0} exceeds the receive buffer"))]
    Oversized(u8),

    /// Byte count disagrees with the length field
    #[cfg_attr(feature = "std", error("packet size does not match its length field"))]
    LengthMismatch,

    /// Payload of this many bytes does not fit in a packet
    #[cfg_attr(feature = "std", error("payload of {0} bytes does not fit in a packet"))]
    PayloadTooLarge(usize),
}

/// A single received (or built) command packet.
///
/// Each packet owns a fresh zeroed buffer, nothing is carried between
/// read cycles.
#[derive(Clone)]
pub struct Packet {
    buff: [u8; PACKET_CAPACITY],
}

impl core::fmt::Debug for Packet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Packet")
            .field("length", &self.length())
            .field("command", &self.command_code())
            .field("payload", &self.payload())
            .field("checksum", &self.host_checksum())
            .finish()
    }
}

impl PartialEq for Packet {
    fn eq(&self, o: &Self) -> bool {
        self.as_bytes() == o.as_bytes()
    }
}

fn check_length(length: u8) -> Result<(), FramingError> {
    if length < MIN_LENGTH {
        return Err(FramingError::TooShort(length));
    }
    if length as usize + 1 > PACKET_CAPACITY {
        return Err(FramingError::Oversized(length));
    }
    Ok(())
}

impl Packet {
    /// Build a packet for `command`, appending the checksum
    pub fn build(command: u8, payload: &[u8]) -> Result<Self, FramingError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(FramingError::PayloadTooLarge(payload.len()));
        }

        let length = (1 + payload.len() + CRC_LEN) as u8;
        check_length(length)?;

        let mut buff = [0u8; PACKET_CAPACITY];
        buff[0] = length;
        buff[1] = command;
        buff[2..2 + payload.len()].copy_from_slice(payload);

        let covered = 2 + payload.len();
        let crc = crc::checksum(&buff[..covered]);
        buff[covered..covered + CRC_LEN].copy_from_slice(&crc.to_le_bytes());

        Ok(Self { buff })
    }

    /// Parse a packet from its wire bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, FramingError> {
        let length = *data.first().ok_or(FramingError::LengthMismatch)?;
        check_length(length)?;

        if data.len() != length as usize + 1 {
            return Err(FramingError::LengthMismatch);
        }

        let mut buff = [0u8; PACKET_CAPACITY];
        buff[..data.len()].copy_from_slice(data);

        Ok(Self { buff })
    }

    /// Value of the length field
    pub fn length(&self) -> u8 {
        self.buff[0]
    }

    /// Total packet size, including the length byte
    pub fn total_len(&self) -> usize {
        self.length() as usize + 1
    }

    pub fn command_code(&self) -> u8 {
        self.buff[1]
    }

    /// Bytes between the command code and the checksum
    pub fn payload(&self) -> &[u8] {
        &self.buff[2..self.covered_len()]
    }

    /// Number of leading bytes covered by the checksum
    pub fn covered_len(&self) -> usize {
        self.total_len() - CRC_LEN
    }

    /// Bytes covered by the checksum
    pub fn covered(&self) -> &[u8] {
        &self.buff[..self.covered_len()]
    }

    /// Checksum supplied by the host
    pub fn host_checksum(&self) -> u32 {
        let n = self.covered_len();
        let mut crc = [0u8; CRC_LEN];
        crc.copy_from_slice(&self.buff[n..n + CRC_LEN]);
        u32::from_le_bytes(crc)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buff[..self.total_len()]
    }
}

/// Read one packet from the serial port.
///
/// The length byte is awaited indefinitely, each following byte is bounded
/// by `packet_timeout_ms`. A timeout drops the partial packet. Bad length
/// fields are rejected before anything is stored, with the declared bytes
/// drained so the next read starts on a fresh length byte.
pub fn read_packet<P, D, E>(
    port: &mut P,
    delay: &mut D,
    options: &Options,
) -> Result<Packet, Error<E>>
where
    P: Read<u8, Error = E>,
    D: DelayMs<u32>,
{
    let length = block!(port.read())?;

    if let Err(e) = check_length(length) {
        debug!("Rejecting packet length {}, draining", length);
        for _ in 0..length {
            crate::read_timeout(port, delay, options)?;
        }
        return Err(Error::Framing(e));
    }

    let mut buff = [0u8; PACKET_CAPACITY];
    buff[0] = length;

    for b in buff[1..=length as usize].iter_mut() {
        *b = crate::read_timeout(port, delay, options)?;
    }

    Ok(Packet { buff })
}
