//! STM32 second stage UART bootloader.
//!
//! On reset the bootloader samples a boot-select input once. When it is
//! asserted the device serves length-prefixed, CRC protected command packets
//! from a host over a serial link, otherwise control is handed to the
//! application image resident in flash.
//!
//! The protocol core is `no_std` and built on the `embedded-hal` serial,
//! delay and digital traits. The host half of the protocol lives in
//! [`Programmer`], and the `linux` feature provides backends for running
//! either side against a Linux serial port.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[macro_use]
extern crate log;

#[macro_use(block)]
extern crate nb;

extern crate embedded_hal;
use embedded_hal::serial::{Read, Write};

#[cfg(feature = "structopt")]
extern crate structopt;

#[cfg(feature = "linux")]
extern crate linux_embedded_hal;

pub mod boot;
pub mod crc;
pub mod dispatch;
pub mod handoff;
pub mod memory;
pub mod packet;
pub mod programmer;
pub mod protocol;

#[cfg(feature = "linux")]
pub mod linux;

#[cfg(test)]
mod mock;

pub use boot::{BootMode, Bootloader};
pub use handoff::{AppVector, HandOffError, Jumper};
pub use memory::{Memory, MemoryError};
pub use packet::{FramingError, Packet};
pub use programmer::Programmer;
pub use protocol::{Command, Response};

/// Byte-oriented serial link shared by the bootloader and the programmer
pub trait Transport<E>: Write<u8, Error = E> + Read<u8, Error = E> {}

impl<T, E> Transport<E> for T where T: Write<u8, Error = E> + Read<u8, Error = E> {}

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum Error<SerialError> {
    #[cfg_attr(feature = "std", error("serial error: {0:?}"))]
    Serial(SerialError),

    #[cfg_attr(feature = "std", error("framing error: {0}"))]
    Framing(FramingError),

    #[cfg_attr(feature = "std", error("timeout awaiting serial data"))]
    Timeout,

    #[cfg_attr(feature = "std", error("bootloader responded with nack"))]
    Nack,

    #[cfg_attr(feature = "std", error("invalid response: 0x{0:02x}"))]
    InvalidResponse(u8),

    #[cfg_attr(feature = "std", error("memory access error: {0}"))]
    Memory(MemoryError),
}

impl<SerialError> From<SerialError> for Error<SerialError> {
    fn from(e: SerialError) -> Self {
        Self::Serial(e)
    }
}

/// Runtime options shared by the command loop and the programmer
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Timeout for each byte following a packet length (or a response marker)
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "1000"))]
    pub packet_timeout_ms: u32,

    /// Period to poll the serial port while awaiting data
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "1"))]
    pub poll_delay_ms: u32,

    /// Respond to unrecognised command codes with a nack instead of ignoring them
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub nack_unknown: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            packet_timeout_ms: 1000,
            poll_delay_ms: 1,
            nack_unknown: false,
        }
    }
}

/// Device memory map used by the command handlers and the hand-off
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Layout {
    /// Base of the application image (vector table)
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "0x08008000", parse(try_from_str = parse_hex)))]
    pub app_base: u32,

    /// Option byte word holding the read protection level in bits 8..16
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "0x1FFF0000", parse(try_from_str = parse_hex)))]
    pub option_bytes: u32,

    /// Chip id register (DBGMCU_IDCODE)
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "0xE0042000", parse(try_from_str = parse_hex)))]
    pub idcode: u32,

    /// Lowest acceptable initial stack pointer
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "0x20000000", parse(try_from_str = parse_hex)))]
    pub sram_start: u32,

    /// Highest acceptable initial stack pointer (top of SRAM)
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "0x20080000", parse(try_from_str = parse_hex)))]
    pub sram_end: u32,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            app_base: 0x0800_8000,
            option_bytes: 0x1FFF_0000,
            idcode: 0xE004_2000,
            sram_start: 0x2000_0000,
            sram_end: 0x2008_0000,
        }
    }
}

/// Parse a hex address, with or without a `0x` prefix
pub fn parse_hex(s: &str) -> Result<u32, core::num::ParseIntError> {
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(s, 16)
}

/// Read a single byte, polling until `packet_timeout_ms` elapses
pub(crate) fn read_timeout<P, D, E>(
    port: &mut P,
    delay: &mut D,
    options: &Options,
) -> Result<u8, Error<E>>
where
    P: Read<u8, Error = E>,
    D: embedded_hal::blocking::delay::DelayMs<u32>,
{
    let mut t: u32 = 0;

    loop {
        match port.read() {
            Err(nb::Error::WouldBlock) => (),
            Err(nb::Error::Other(e)) => return Err(e.into()),
            Ok(v) => return Ok(v),
        };

        // Wait for delay period
        delay.delay_ms(options.poll_delay_ms);

        t = match t.checked_add(options.poll_delay_ms.max(1)) {
            Some(n) if n <= options.packet_timeout_ms => n,
            _ => return Err(Error::Timeout),
        };
    }
}

/// Write a buffer, blocking on each byte
pub(crate) fn write_all<P, E>(port: &mut P, data: &[u8]) -> Result<(), E>
where
    P: Write<u8, Error = E>,
{
    for b in data {
        block!(port.write(*b))?;
    }
    block!(port.flush())
}
