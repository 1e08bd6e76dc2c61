//! Word reads from the device memory map.
//!
//! Every fixed-address access made by the bootloader (application vector
//! table, option bytes, chip id register) goes through [`Memory`], so raw
//! pointer reads are confined to [`MappedMemory`].

#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum MemoryError {
    /// Address lies outside every readable region
    #[cfg_attr(feature = "std", error("address 0x{0:08x} is not readable"))]
    OutOfRange(u32),

    /// Address is not word aligned
    #[cfg_attr(feature = "std", error("address 0x{0:08x} is not word aligned"))]
    Unaligned(u32),
}

/// Read-only word access to the memory map
pub trait Memory {
    fn read_word(&self, address: u32) -> Result<u32, MemoryError>;
}

impl<M: Memory + ?Sized> Memory for &M {
    fn read_word(&self, address: u32) -> Result<u32, MemoryError> {
        (**self).read_word(address)
    }
}

/// A readable address range
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Region {
    pub start: u32,
    pub len: u32,
}

impl Region {
    pub const fn new(start: u32, len: u32) -> Self {
        Self { start, len }
    }

    /// Whether the word at `address` lies entirely within the region
    pub fn contains_word(&self, address: u32) -> bool {
        let offset = match address.checked_sub(self.start) {
            Some(o) => o,
            None => return false,
        };
        offset.checked_add(4).map_or(false, |end| end <= self.len)
    }
}

fn check_aligned(address: u32) -> Result<(), MemoryError> {
    if address % 4 != 0 {
        return Err(MemoryError::Unaligned(address));
    }
    Ok(())
}

/// Volatile reads from the live memory map, limited to a set of regions
#[derive(Debug)]
pub struct MappedMemory<'a> {
    regions: &'a [Region],
}

impl<'a> MappedMemory<'a> {
    /// # Safety
    ///
    /// Every region must be mapped and readable with word accesses, without
    /// side effects, for as long as this instance exists.
    pub unsafe fn new(regions: &'a [Region]) -> Self {
        Self { regions }
    }
}

impl<'a> Memory for MappedMemory<'a> {
    fn read_word(&self, address: u32) -> Result<u32, MemoryError> {
        check_aligned(address)?;

        if !self.regions.iter().any(|r| r.contains_word(address)) {
            return Err(MemoryError::OutOfRange(address));
        }

        // Safety: the address is aligned and inside a region guaranteed readable by `new`
        Ok(unsafe { core::ptr::read_volatile(address as usize as *const u32) })
    }
}

/// Memory map backed by byte images, for simulation and testing
#[cfg(feature = "std")]
#[derive(Clone, Debug, Default)]
pub struct ImageMemory {
    segments: std::vec::Vec<(u32, std::vec::Vec<u8>)>,
}

#[cfg(feature = "std")]
impl ImageMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `data` at `base`, words are little-endian
    pub fn with_segment(mut self, base: u32, data: std::vec::Vec<u8>) -> Self {
        self.segments.push((base, data));
        self
    }

    /// Map a single word at `address`
    pub fn with_word(self, address: u32, value: u32) -> Self {
        self.with_segment(address, value.to_le_bytes().to_vec())
    }

    pub fn segments(&self) -> impl Iterator<Item = Region> + '_ {
        self.segments
            .iter()
            .map(|(base, data)| Region::new(*base, data.len() as u32))
    }
}

#[cfg(feature = "std")]
impl Memory for ImageMemory {
    fn read_word(&self, address: u32) -> Result<u32, MemoryError> {
        check_aligned(address)?;

        // Later segments shadow earlier ones
        for (base, data) in self.segments.iter().rev() {
            if Region::new(*base, data.len() as u32).contains_word(address) {
                let o = (address - base) as usize;
                let mut w = [0u8; 4];
                w.copy_from_slice(&data[o..o + 4]);
                return Ok(u32::from_le_bytes(w));
            }
        }

        Err(MemoryError::OutOfRange(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_bounds() {
        let r = Region::new(0x0800_0000, 0x10);
        assert!(r.contains_word(0x0800_0000));
        assert!(r.contains_word(0x0800_000C));
        assert!(!r.contains_word(0x0800_000D));
        assert!(!r.contains_word(0x0800_0010));
        assert!(!r.contains_word(0x07FF_FFFC));

        let top = Region::new(0xFFFF_FFF0, 0x10);
        assert!(top.contains_word(0xFFFF_FFFC));
    }

    #[test]
    fn mapped_memory_reads_within_regions() {
        let words: [u32; 2] = [0xDEAD_BEEF, 0x0800_0199];
        let base = words.as_ptr() as usize as u32;

        // Only meaningful where host addresses fit in 32 bits
        if base as usize != words.as_ptr() as usize {
            return;
        }

        let regions = [Region::new(base, 8)];
        let m = unsafe { MappedMemory::new(&regions) };

        assert_eq!(m.read_word(base), Ok(0xDEAD_BEEF));
        assert_eq!(m.read_word(base + 4), Ok(0x0800_0199));
        assert_eq!(m.read_word(base + 8), Err(MemoryError::OutOfRange(base + 8)));
    }

    #[test]
    fn mapped_memory_rejects_before_access() {
        let regions = [Region::new(0x1FFF_0000, 0x20)];
        let m = unsafe { MappedMemory::new(&regions) };

        assert_eq!(m.read_word(0x1FFF_0002), Err(MemoryError::Unaligned(0x1FFF_0002)));
        assert_eq!(m.read_word(0x0800_0000), Err(MemoryError::OutOfRange(0x0800_0000)));
    }

    #[cfg(feature = "std")]
    #[test]
    fn image_memory_little_endian() {
        let m = ImageMemory::new()
            .with_segment(0x0800_8000, std::vec![0x00, 0x00, 0x08, 0x20, 0x99, 0x81, 0x00, 0x08])
            .with_word(0x1FFF_0000, 0xAAAA_55AA);

        assert_eq!(m.read_word(0x0800_8000), Ok(0x2008_0000));
        assert_eq!(m.read_word(0x0800_8004), Ok(0x0800_8199));
        assert_eq!(m.read_word(0x1FFF_0000), Ok(0xAAAA_55AA));
        assert_eq!(m.read_word(0x0800_8008), Err(MemoryError::OutOfRange(0x0800_8008)));
        assert_eq!(m.read_word(0x0800_8001), Err(MemoryError::Unaligned(0x0800_8001)));
    }
}
