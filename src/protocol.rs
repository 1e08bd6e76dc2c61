use core::convert::TryFrom;

use embedded_hal::serial::Write;
use heapless::Vec;

/// Positive acknowledgement marker, followed by a reply length and reply
pub const BL_ACK: u8 = 0xA5;

/// Negative acknowledgement marker, sent alone
pub const BL_NACK: u8 = 0x7F;

/// Version reported by [`Command::GetVersion`]
pub const BL_VERSION: u8 = 0x10;

/// Largest reply payload produced by any handler
pub const MAX_REPLY: usize = 16;

/// Largest encoded response (marker, length, payload)
pub const MAX_RESPONSE: usize = MAX_REPLY + 2;

#[derive(Debug, PartialEq, Clone, Copy)]
#[repr(u8)]
pub enum Command {
    /// Fetch the bootloader version
    GetVersion = 0x51,

    /// Fetch the list of supported command codes
    GetHelp = 0x52,

    /// Gets the chip ID
    GetChipId = 0x53,

    /// Gets the flash Read Protection level
    GetRdpStatus = 0x54,

    /// Jumps to an address specified by the host
    GoToAddress = 0x55,

    /// Erases flash sectors, or the whole flash
    FlashErase = 0x56,

    /// Writes to memory starting from an address specified by the host
    MemWrite = 0x57,

    /// Enables read/write protection for some sectors
    EnableRwProtect = 0x58,

    /// Reads memory starting from an address specified by the host
    MemRead = 0x59,

    /// Reads the protection status of all flash sectors
    ReadSectorProtectStatus = 0x5A,

    /// Reads the one-time-programmable area
    OtpRead = 0x5B,

    /// Disables read/write protection for all sectors
    DisableRwProtect = 0x5C,
}

/// Commands advertised to the host by [`Command::GetHelp`], in reply order
pub const SUPPORTED_COMMANDS: [Command; 8] = [
    Command::GetVersion,
    Command::GetHelp,
    Command::GetChipId,
    Command::GetRdpStatus,
    Command::GoToAddress,
    Command::FlashErase,
    Command::MemWrite,
    Command::ReadSectorProtectStatus,
];

impl Command {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        let c = match v {
            0x51 => Command::GetVersion,
            0x52 => Command::GetHelp,
            0x53 => Command::GetChipId,
            0x54 => Command::GetRdpStatus,
            0x55 => Command::GoToAddress,
            0x56 => Command::FlashErase,
            0x57 => Command::MemWrite,
            0x58 => Command::EnableRwProtect,
            0x59 => Command::MemRead,
            0x5A => Command::ReadSectorProtectStatus,
            0x5B => Command::OtpRead,
            0x5C => Command::DisableRwProtect,
            _ => return Err(v),
        };
        Ok(c)
    }
}

/// Response to a single command packet
#[derive(Debug, PartialEq, Clone)]
pub enum Response {
    /// `[BL_ACK][len][payload...]`
    Ack(Vec<u8, MAX_REPLY>),
    /// `[BL_NACK]`
    Nack,
}

impl Response {
    /// Build an acknowledgement, returning `None` if `reply` exceeds [`MAX_REPLY`]
    pub fn ack(reply: &[u8]) -> Option<Self> {
        Vec::from_slice(reply).ok().map(Response::Ack)
    }

    /// Encode the response into wire bytes
    pub fn encode(&self) -> Vec<u8, MAX_RESPONSE> {
        let mut out = Vec::new();

        // MAX_RESPONSE holds the marker, length and a full MAX_REPLY payload
        let fits = match self {
            Response::Ack(reply) => out
                .push(BL_ACK)
                .and_then(|_| out.push(reply.len() as u8))
                .is_ok()
                && out.extend_from_slice(reply).is_ok(),
            Response::Nack => out.push(BL_NACK).is_ok(),
        };
        debug_assert!(fits, "response exceeds MAX_RESPONSE");

        out
    }

    /// Write the encoded response to the serial port
    pub fn send<P, E>(&self, port: &mut P) -> Result<(), E>
    where
        P: Write<u8, Error = E>,
    {
        crate::write_all(port, &self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_codes_round_trip() {
        for code in 0x51..=0x5C {
            let c = Command::try_from(code).unwrap();
            assert_eq!(c.code(), code);
        }
        assert_eq!(Command::try_from(0x50), Err(0x50));
        assert_eq!(Command::try_from(0x5D), Err(0x5D));
    }

    #[test]
    fn encode_ack() {
        let r = Response::ack(&[0x10]).unwrap();
        assert_eq!(&r.encode()[..], &[BL_ACK, 0x01, 0x10]);

        let r = Response::ack(&[]).unwrap();
        assert_eq!(&r.encode()[..], &[BL_ACK, 0x00]);
    }

    #[test]
    fn encode_nack() {
        assert_eq!(&Response::Nack.encode()[..], &[BL_NACK]);
    }

    #[test]
    fn oversized_reply_is_refused() {
        assert!(Response::ack(&[0u8; MAX_REPLY + 1]).is_none());
        assert!(Response::ack(&[0u8; MAX_REPLY]).is_some());
    }

    #[test]
    fn largest_reply_encodes_in_full() {
        let reply = [0x5Au8; MAX_REPLY];
        let out = Response::ack(&reply).unwrap().encode();
        assert_eq!(out.len(), MAX_RESPONSE);
        assert_eq!(&out[..2], &[BL_ACK, MAX_REPLY as u8]);
        assert_eq!(&out[2..], &reply[..]);
    }
}
