//! Host side of the bootloader protocol.

use core::marker::PhantomData;

use embedded_hal::blocking::delay::DelayMs;
use heapless::Vec;

use crate::packet::Packet;
use crate::protocol::{Command, BL_ACK, BL_NACK, MAX_REPLY};
use crate::{read_timeout, write_all, Error, Options, Transport};

pub struct Programmer<P, D, E> {
    options: Options,
    port: P,
    delay: D,
    _err: PhantomData<E>,
}

impl<P, D, E> Programmer<P, D, E>
where
    P: Transport<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Create a new programmer instance
    pub fn new(port: P, delay: D, options: Options) -> Self {
        Self {
            options,
            port,
            delay,
            _err: PhantomData,
        }
    }

    /// Borrow the serial port
    pub fn port(&mut self) -> &mut P {
        &mut self.port
    }

    /// Fetch the bootloader version
    pub fn get_version(&mut self) -> Result<u8, Error<E>> {
        let mut data = [0u8; 1];
        self.command_exact(Command::GetVersion, &mut data)?;
        Ok(data[0])
    }

    /// Fetch the command codes supported by the bootloader
    pub fn get_help(&mut self) -> Result<Vec<u8, MAX_REPLY>, Error<E>> {
        let mut data = [0u8; MAX_REPLY];
        let n = self.command(Command::GetHelp.code(), &[], &mut data)?;
        Ok(Vec::from_slice(&data[..n.min(MAX_REPLY)]).unwrap_or_default())
    }

    /// Fetch the chip ID
    pub fn get_chip_id(&mut self) -> Result<u16, Error<E>> {
        let mut data = [0u8; 2];
        self.command_exact(Command::GetChipId, &mut data)?;
        Ok(u16::from_le_bytes(data))
    }

    /// Fetch the flash read protection level
    pub fn get_rdp_level(&mut self) -> Result<u8, Error<E>> {
        let mut data = [0u8; 1];
        self.command_exact(Command::GetRdpStatus, &mut data)?;
        Ok(data[0])
    }

    fn command_exact(&mut self, command: Command, data: &mut [u8]) -> Result<(), Error<E>> {
        let n = self.command(command.code(), &[], data)?;
        if n != data.len() {
            error!("{:?} reply length {} (expected {})", command, n, data.len());
            return Err(Error::InvalidResponse(n as u8));
        }
        Ok(())
    }

    /// Send a command packet and read the reply into `data`.
    ///
    /// Returns the reply length reported by the bootloader. Replies longer
    /// than `data` are read in full but only the leading bytes are kept.
    pub fn command(&mut self, code: u8, payload: &[u8], data: &mut [u8]) -> Result<usize, Error<E>> {
        let packet = Packet::build(code, payload).map_err(Error::Framing)?;

        debug!(
            "Sending command 0x{:02x} ({} bytes, crc 0x{:08x})",
            code,
            packet.total_len(),
            packet.host_checksum()
        );
        write_all(&mut self.port, packet.as_bytes())?;

        // Await ack and reply length
        self.await_ack()?;
        let len = read_timeout(&mut self.port, &mut self.delay, &self.options)? as usize;

        // Read reply
        for i in 0..len {
            let b = read_timeout(&mut self.port, &mut self.delay, &self.options)?;
            if let Some(d) = data.get_mut(i) {
                *d = b;
            }
        }

        if len > data.len() {
            warn!("Reply of {} bytes truncated to {}", len, data.len());
        }

        Ok(len)
    }

    fn await_ack(&mut self) -> Result<(), Error<E>> {
        match read_timeout(&mut self.port, &mut self.delay, &self.options) {
            Ok(v) if v == BL_ACK => {
                debug!("Received bootloader ack");
                Ok(())
            }
            Ok(v) if v == BL_NACK => {
                debug!("Received bootloader nack");
                Err(Error::Nack)
            }
            Ok(v) => {
                debug!("Received unexpected value: 0x{:x}", v);
                Err(Error::InvalidResponse(v))
            }
            Err(Error::Timeout) => {
                error!("Receive timeout");
                Err(Error::Timeout)
            }
            Err(e) => Err(e),
        }
    }
}
