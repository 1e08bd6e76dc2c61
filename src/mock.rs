//! Test doubles for the embedded-hal collaborators.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::digital::v2::InputPin;
use embedded_hal::serial::{Read, Write};

use crate::handoff::{AppVector, Jumper};

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum MockError {
    Disconnected,
}

/// Serial port with a scripted receive queue that records transmitted bytes.
///
/// Reads return `WouldBlock` once the queue is empty.
#[derive(Debug, Default)]
pub struct MockSerial {
    rx: VecDeque<u8>,
    pub tx: Vec<u8>,
    pub fail_reads: bool,
}

impl MockSerial {
    pub fn new(rx: &[u8]) -> Self {
        Self {
            rx: rx.iter().cloned().collect(),
            ..Self::default()
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.rx.extend(data.iter());
    }

    pub fn remaining(&self) -> usize {
        self.rx.len()
    }
}

impl Read<u8> for MockSerial {
    type Error = MockError;

    fn read(&mut self) -> nb::Result<u8, MockError> {
        if self.fail_reads {
            return Err(nb::Error::Other(MockError::Disconnected));
        }
        self.rx.pop_front().ok_or(nb::Error::WouldBlock)
    }
}

impl Write<u8> for MockSerial {
    type Error = MockError;

    fn write(&mut self, word: u8) -> nb::Result<(), MockError> {
        self.tx.push(word);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), MockError> {
        Ok(())
    }
}

/// Delay that only counts the time requested
#[derive(Debug, Default)]
pub struct MockDelay {
    pub elapsed_ms: u32,
}

impl DelayMs<u32> for MockDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.elapsed_ms = self.elapsed_ms.saturating_add(ms);
    }
}

/// Boot select input at a fixed level, counting samples
#[derive(Debug, Default)]
pub struct MockPin {
    pub high: bool,
    pub samples: RefCell<usize>,
}

impl MockPin {
    pub fn new(high: bool) -> Self {
        Self {
            high,
            samples: RefCell::new(0),
        }
    }
}

impl InputPin for MockPin {
    type Error = MockError;

    fn is_high(&self) -> Result<bool, MockError> {
        *self.samples.borrow_mut() += 1;
        Ok(self.high)
    }

    fn is_low(&self) -> Result<bool, MockError> {
        self.is_high().map(|h| !h)
    }
}

/// Records the hand-off vector then unwinds in place of jumping
#[derive(Debug, Default, Clone)]
pub struct MockJumper {
    pub taken: Rc<RefCell<Option<AppVector>>>,
}

impl Jumper for MockJumper {
    unsafe fn jump(&self, vector: &AppVector) -> ! {
        *self.taken.borrow_mut() = Some(*vector);
        panic!("jump to 0x{:08x}", vector.entry);
    }
}
