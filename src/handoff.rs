//! One-way transfer of control to the resident application.
//!
//! The application image starts with a Cortex-M vector table: word 0 is the
//! initial main stack pointer and word 1 the reset handler. Both are read
//! fresh from flash, validated, then handed to a [`Jumper`]. Nothing in the
//! bootloader runs after a jump.

use crate::memory::{Memory, MemoryError};
use crate::Layout;

/// Value of erased flash
const ERASED: u32 = 0xFFFF_FFFF;

#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum HandOffError {
    /// Initial stack pointer is unaligned or outside SRAM
    #[cfg_attr(feature = "std", error("invalid initial stack pointer 0x{0:08x}"))]
    InvalidStackPointer(u32),

    /// Reset handler is erased, null or not a thumb address
    #[cfg_attr(feature = "std", error("invalid application entry 0x{0:08x}"))]
    InvalidEntry(u32),

    #[cfg_attr(feature = "std", error("vector table unreadable: {0}"))]
    Memory(MemoryError),
}

impl From<MemoryError> for HandOffError {
    fn from(e: MemoryError) -> Self {
        Self::Memory(e)
    }
}

/// The first two words of an application vector table
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct AppVector {
    /// Address of the vector table
    pub base: u32,
    /// Initial main stack pointer
    pub stack_pointer: u32,
    /// Reset handler address
    pub entry: u32,
}

impl AppVector {
    /// Read the vector table at `layout.app_base`
    pub fn read<M: Memory>(memory: &M, layout: &Layout) -> Result<Self, HandOffError> {
        let base = layout.app_base;
        let stack_pointer = memory.read_word(base)?;
        let entry = memory.read_word(base.wrapping_add(4))?;

        debug!("Application MSP: 0x{:08x} reset handler: 0x{:08x}", stack_pointer, entry);

        Ok(Self {
            base,
            stack_pointer,
            entry,
        })
    }

    /// Check the vector plausibly belongs to a flashed application
    pub fn validate(&self, layout: &Layout) -> Result<(), HandOffError> {
        let sp = self.stack_pointer;
        if sp % 4 != 0 || sp < layout.sram_start || sp > layout.sram_end {
            return Err(HandOffError::InvalidStackPointer(sp));
        }

        let entry = self.entry;
        if entry == ERASED || entry & !1 == 0 || entry & 1 == 0 {
            return Err(HandOffError::InvalidEntry(entry));
        }

        Ok(())
    }
}

/// Read and validate the application vector, ready for [`Jumper::jump`]
pub fn prepare<M: Memory>(memory: &M, layout: &Layout) -> Result<AppVector, HandOffError> {
    let vector = AppVector::read(memory, layout)?;
    vector.validate(layout)?;
    Ok(vector)
}

/// Transfers execution to an application
pub trait Jumper {
    /// Install the application stack pointer and branch to its entry.
    ///
    /// # Safety
    ///
    /// `vector` must describe a valid application image. The caller's stack
    /// and all bootloader state are abandoned.
    unsafe fn jump(&self, vector: &AppVector) -> !;
}

/// Hand-off for Cortex-M targets
#[cfg(all(feature = "cortex-m", target_arch = "arm"))]
#[derive(Debug, Default)]
pub struct CortexMJumper;

#[cfg(all(feature = "cortex-m", target_arch = "arm"))]
impl Jumper for CortexMJumper {
    unsafe fn jump(&self, vector: &AppVector) -> ! {
        // Point exceptions at the application vector table
        (*cortex_m::peripheral::SCB::PTR).vtor.write(vector.base);

        cortex_m::asm::dsb();
        cortex_m::asm::isb();

        cortex_m::asm::bootstrap(
            vector.stack_pointer as *const u32,
            vector.entry as *const u32,
        )
    }
}

/// Park the core after a failed hand-off
#[cfg(all(feature = "cortex-m", target_arch = "arm"))]
pub fn halt() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::memory::ImageMemory;

    fn image(sp: u32, entry: u32) -> ImageMemory {
        let mut data = sp.to_le_bytes().to_vec();
        data.extend_from_slice(&entry.to_le_bytes());
        ImageMemory::new().with_segment(Layout::default().app_base, data)
    }

    #[test]
    fn reads_vector_table_words() {
        let layout = Layout::default();
        let v = prepare(&image(0x2008_0000, 0x0800_8199), &layout).unwrap();
        assert_eq!(
            v,
            AppVector {
                base: 0x0800_8000,
                stack_pointer: 0x2008_0000,
                entry: 0x0800_8199
            }
        );
    }

    #[test]
    fn rejects_bad_stack_pointer() {
        let layout = Layout::default();
        for sp in [0xFFFF_FFFF, 0x0000_0000, 0x2008_0004, 0x1FFF_FFFC, 0x2000_0002].iter() {
            assert_eq!(
                prepare(&image(*sp, 0x0800_8199), &layout),
                Err(HandOffError::InvalidStackPointer(*sp))
            );
        }
    }

    #[test]
    fn rejects_bad_entry() {
        let layout = Layout::default();
        for entry in [0xFFFF_FFFF, 0x0000_0000, 0x0000_0001, 0x0800_8198].iter() {
            assert_eq!(
                prepare(&image(0x2000_4000, *entry), &layout),
                Err(HandOffError::InvalidEntry(*entry))
            );
        }
    }

    #[test]
    fn missing_image_is_a_memory_error() {
        let layout = Layout::default();
        assert_eq!(
            prepare(&ImageMemory::new(), &layout),
            Err(HandOffError::Memory(MemoryError::OutOfRange(0x0800_8000)))
        );
    }
}
