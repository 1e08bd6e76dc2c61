//! Boot decision and the command loop.

use core::fmt::Debug;
use core::marker::PhantomData;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::digital::v2::InputPin;

use crate::crc::CrcUnit;
use crate::dispatch::Dispatcher;
use crate::handoff::{self, HandOffError, Jumper};
use crate::memory::Memory;
use crate::packet::read_packet;
use crate::protocol::Response;
use crate::{Error, Layout, Options, Transport};

/// Path selected by the boot input at reset
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum BootMode {
    /// Serve host commands over the serial link
    Command,
    /// Hand off to the resident application
    Application,
}

impl BootMode {
    /// Sample the boot input, asserted (high) selects command mode
    pub fn sample<B: InputPin>(pin: &B) -> Result<Self, B::Error> {
        if pin.is_high()? {
            Ok(BootMode::Command)
        } else {
            Ok(BootMode::Application)
        }
    }
}

pub struct Bootloader<P, D, M, C, E> {
    options: Options,
    port: P,
    delay: D,
    memory: M,
    dispatcher: Dispatcher<C>,
    _err: PhantomData<E>,
}

impl<P, D, M, C, E> Bootloader<P, D, M, C, E>
where
    P: Transport<E>,
    D: DelayMs<u32>,
    M: Memory,
    C: CrcUnit,
    E: Debug,
{
    /// Create a new bootloader instance
    pub fn new(port: P, delay: D, memory: M, crc: C, layout: Layout, options: Options) -> Self {
        let dispatcher = Dispatcher::new(crc, layout, options.nack_unknown);
        Self {
            options,
            port,
            delay,
            memory,
            dispatcher,
            _err: PhantomData,
        }
    }

    /// Borrow the serial port
    pub fn port(&mut self) -> &mut P {
        &mut self.port
    }

    /// Sample the boot input once and act on it.
    ///
    /// This only returns if the application vector fails validation, in which
    /// case the caller should halt. A failed input read stays in command
    /// mode rather than running an unverified path.
    ///
    /// On a device, with `serial`, `delay` and `boot_pin` from the board HAL:
    ///
    /// ```ignore
    /// use stm32_uart_bootloader::crc::SoftCrc;
    /// use stm32_uart_bootloader::handoff::{halt, CortexMJumper};
    /// use stm32_uart_bootloader::memory::{MappedMemory, Region};
    /// use stm32_uart_bootloader::{Bootloader, Layout, Options};
    ///
    /// static REGIONS: [Region; 3] = [
    ///     Region::new(0x0800_8000, 0x8),  // application vector table
    ///     Region::new(0x1FFF_0000, 0x4),  // option bytes
    ///     Region::new(0xE004_2000, 0x4),  // DBGMCU_IDCODE
    /// ];
    ///
    /// #[entry]
    /// fn main() -> ! {
    ///     let memory = unsafe { MappedMemory::new(&REGIONS) };
    ///     let bl = Bootloader::new(
    ///         serial,
    ///         delay,
    ///         memory,
    ///         SoftCrc::new(),
    ///         Layout::default(),
    ///         Options::default(),
    ///     );
    ///
    ///     let _refused = bl.start(&boot_pin, &CortexMJumper);
    ///     halt()
    /// }
    /// ```
    pub fn start<B, J>(self, pin: &B, jumper: &J) -> HandOffError
    where
        B: InputPin,
        B::Error: Debug,
        J: Jumper,
    {
        let mode = match BootMode::sample(pin) {
            Ok(m) => m,
            Err(e) => {
                error!("Boot input read failed: {:?}", e);
                BootMode::Command
            }
        };

        self.boot(mode, jumper)
    }

    /// Run the selected boot path
    pub fn boot<J: Jumper>(mut self, mode: BootMode, jumper: &J) -> HandOffError {
        match mode {
            BootMode::Command => {
                info!("Boot input asserted, entering command mode");
                self.serve()
            }
            BootMode::Application => {
                info!("Boot input not asserted, executing user application");
                self.hand_off(jumper)
            }
        }
    }

    fn hand_off<J: Jumper>(self, jumper: &J) -> HandOffError {
        let vector = match handoff::prepare(&self.memory, self.dispatcher.layout()) {
            Ok(v) => v,
            Err(e) => {
                error!("Refusing to jump to application: {:?}", e);
                return e;
            }
        };

        info!("Jumping to application reset handler 0x{:08x}", vector.entry);

        // Safety: the vector table was read fresh and validated above
        unsafe { jumper.jump(&vector) }
    }

    /// Serve commands forever
    pub fn serve(&mut self) -> ! {
        loop {
            match self.poll() {
                Ok(_) => (),
                Err(Error::Timeout) => debug!("Packet timeout, dropping partial packet"),
                Err(e) => error!("Command loop error: {:?}", e),
            }
        }
    }

    /// Receive, execute and answer a single packet.
    ///
    /// Returns the response sent, if any.
    pub fn poll(&mut self) -> Result<Option<Response>, Error<E>> {
        let response = match read_packet(&mut self.port, &mut self.delay, &self.options) {
            Ok(p) => {
                trace!("Received packet: {:02x?}", p.as_bytes());
                self.dispatcher.dispatch(&p, &self.memory)
            }
            Err(Error::Framing(e)) => {
                warn!("Malformed packet: {:?}", e);
                Some(Response::Nack)
            }
            Err(e) => return Err(e),
        };

        if let Some(r) = &response {
            trace!("Sending response: {:02x?}", &r.encode()[..]);
            r.send(&mut self.port)?;
        }

        Ok(response)
    }
}
