//! Command dispatch and handlers.

use core::convert::TryFrom;

use crate::crc::{CrcUnit, Verifier};
use crate::memory::{Memory, MemoryError};
use crate::packet::Packet;
use crate::protocol::{Command, Response, BL_VERSION, SUPPORTED_COMMANDS};
use crate::Layout;

/// Mask for the device id field of DBGMCU_IDCODE
const DEV_ID_MASK: u32 = 0x0FFF;

/// Routes checksum-verified packets to their handlers
#[derive(Debug)]
pub struct Dispatcher<C> {
    verifier: Verifier<C>,
    layout: Layout,
    nack_unknown: bool,
}

impl<C: CrcUnit> Dispatcher<C> {
    pub fn new(crc: C, layout: Layout, nack_unknown: bool) -> Self {
        Self {
            verifier: Verifier::new(crc),
            layout,
            nack_unknown,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Verify and execute a packet.
    ///
    /// Returns `None` when the packet is deliberately left unanswered.
    pub fn dispatch<M: Memory>(&mut self, packet: &Packet, memory: &M) -> Option<Response> {
        if !self.verifier.verify(packet.covered(), packet.host_checksum()) {
            debug!("Checksum fail for command 0x{:02x}", packet.command_code());
            return Some(Response::Nack);
        }

        let command = match Command::try_from(packet.command_code()) {
            Ok(c) => c,
            Err(code) => {
                warn!("Invalid command code received from host: 0x{:02x}", code);
                return if self.nack_unknown {
                    Some(Response::Nack)
                } else {
                    None
                };
            }
        };

        debug!("Checksum success, handling {:?}", command);

        match handle(command, memory, &self.layout) {
            Ok(r) => Some(r),
            Err(e) => {
                error!("Handler for {:?} failed: {:?}", command, e);
                Some(Response::Nack)
            }
        }
    }
}

/// Execute a verified command
pub fn handle<M: Memory>(
    command: Command,
    memory: &M,
    layout: &Layout,
) -> Result<Response, MemoryError> {
    let r = match command {
        Command::GetVersion => {
            debug!("BL_VER: 0x{:02x}", BL_VERSION);
            ack(&[BL_VERSION])
        }
        Command::GetHelp => {
            let mut codes = [0u8; SUPPORTED_COMMANDS.len()];
            for (c, s) in codes.iter_mut().zip(SUPPORTED_COMMANDS.iter()) {
                *c = s.code();
            }
            ack(&codes)
        }
        Command::GetChipId => {
            let id = chip_id(memory, layout)?;
            debug!("MCU id: 0x{:03x}", id);
            ack(&id.to_le_bytes())
        }
        Command::GetRdpStatus => {
            let level = rdp_level(memory, layout)?;
            debug!("RDP level: 0x{:02x}", level);
            ack(&[level])
        }
        _ => {
            warn!("Command {:?} is reserved and not implemented", command);
            Response::Nack
        }
    };

    Ok(r)
}

/// Device identifier from DBGMCU_IDCODE
pub fn chip_id<M: Memory>(memory: &M, layout: &Layout) -> Result<u16, MemoryError> {
    let idcode = memory.read_word(layout.idcode)?;
    Ok((idcode & DEV_ID_MASK) as u16)
}

/// Read protection level, the second byte of the option byte word
pub fn rdp_level<M: Memory>(memory: &M, layout: &Layout) -> Result<u8, MemoryError> {
    let ob = memory.read_word(layout.option_bytes)?;
    Ok((ob >> 8) as u8)
}

// Handler replies are all within MAX_REPLY
fn ack(reply: &[u8]) -> Response {
    Response::ack(reply).unwrap_or(Response::Nack)
}
