use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use std::process;

use embedded_hal::digital::v2::InputPin;
use linux_embedded_hal::serial_core::{
    BaudRate, CharSize, FlowControl, Parity, SerialDevice as _, SerialPortSettings as _, StopBits,
};
use linux_embedded_hal::sysfs_gpio::{Direction, Error as GpioError};
use linux_embedded_hal::{Delay, Pin, Serial};

use crate::crc::SoftCrc;
use crate::handoff::{AppVector, Jumper};
use crate::memory::ImageMemory;
use crate::{Bootloader, Layout, Options, Programmer};

pub use linux_embedded_hal::serial_core::Error as SerialError;

/// Open a serial port, 8N1 without flow control
pub fn open_serial<P: AsRef<Path>>(port: P, baud: usize) -> Result<Serial, SerialError> {
    // Open port
    let mut port = Serial::open(port.as_ref())?;

    // Apply settings
    let mut settings = port.0.read_settings()?;

    settings.set_char_size(CharSize::Bits8);
    settings.set_stop_bits(StopBits::Stop1);
    settings.set_baud_rate(BaudRate::from_speed(baud))?;
    settings.set_flow_control(FlowControl::FlowNone);
    settings.set_parity(Parity::ParityNone);

    port.0.write_settings(&settings)?;

    Ok(port)
}

impl Programmer<Serial, Delay, IoErrorKind> {
    /// Create a new linux serial port programmer instance
    pub fn linux<P: AsRef<Path>>(
        port: P,
        baud: usize,
        options: Options,
    ) -> Result<Self, SerialError> {
        let port = open_serial(port, baud)?;

        Ok(Self::new(port, Delay {}, options))
    }
}

/// Bootloader serving a linux serial port, with an in-memory device image
pub type LinuxBootloader = Bootloader<Serial, Delay, ImageMemory, SoftCrc, IoErrorKind>;

impl Bootloader<Serial, Delay, ImageMemory, SoftCrc, IoErrorKind> {
    /// Create a new linux serial port bootloader instance
    pub fn linux<P: AsRef<Path>>(
        port: P,
        baud: usize,
        memory: ImageMemory,
        layout: Layout,
        options: Options,
    ) -> Result<Self, SerialError> {
        let port = open_serial(port, baud)?;

        Ok(Self::new(port, Delay {}, memory, SoftCrc::new(), layout, options))
    }
}

/// Load a file as a memory segment at `base`
pub fn load_image<P: AsRef<Path>>(
    memory: ImageMemory,
    path: P,
    base: u32,
) -> Result<ImageMemory, std::io::Error> {
    let data = fs::read(path)?;
    Ok(memory.with_segment(base, data))
}

/// Boot select input, either a sysfs GPIO or a fixed level
pub enum BootInput {
    Gpio(Pin),
    Fixed(bool),
}

impl BootInput {
    /// Export and configure a sysfs GPIO as an input
    pub fn gpio(number: u64) -> Result<Self, GpioError> {
        let pin = Pin::new(number);
        pin.export()?;
        pin.set_direction(Direction::In)?;
        Ok(BootInput::Gpio(pin))
    }
}

impl InputPin for BootInput {
    type Error = GpioError;

    fn is_high(&self) -> Result<bool, GpioError> {
        match self {
            BootInput::Gpio(p) => p.is_high(),
            BootInput::Fixed(level) => Ok(*level),
        }
    }

    fn is_low(&self) -> Result<bool, GpioError> {
        self.is_high().map(|h| !h)
    }
}

/// Stands in for the hand-off on a host, reporting the vector and exiting
#[derive(Debug, Default)]
pub struct ExitJumper;

impl Jumper for ExitJumper {
    unsafe fn jump(&self, vector: &AppVector) -> ! {
        info!(
            "Hand-off: MSP 0x{:08x}, reset handler 0x{:08x} (vector table 0x{:08x})",
            vector.stack_pointer, vector.entry, vector.base
        );
        process::exit(0)
    }
}
