//! Packet integrity checking.
//!
//! Packets are protected with the CRC computed by the STM32 hardware CRC
//! unit in its reset configuration: polynomial `0x04C11DB7`, initial value
//! `0xFFFFFFFF`, no input or output reflection and no final XOR. The unit
//! consumes 32-bit words, and each packet byte is fed as a zero-extended word.

/// CRC-32 polynomial used by the STM32 CRC unit
pub const CRC_POLY: u32 = 0x04C1_1DB7;

/// Value of the CRC data register after reset
pub const CRC_INIT: u32 = 0xFFFF_FFFF;

/// Word oriented CRC accumulator, matching the STM32 CRC peripheral
pub trait CrcUnit {
    /// Restore the accumulator to its initial value
    fn reset(&mut self);

    /// Feed a word into the accumulator, returning the running value
    fn accumulate(&mut self, word: u32) -> u32;

    /// Current accumulator value
    fn value(&self) -> u32;
}

/// Software model of the CRC peripheral
#[derive(Clone, Debug, PartialEq)]
pub struct SoftCrc {
    value: u32,
}

impl SoftCrc {
    pub const fn new() -> Self {
        Self { value: CRC_INIT }
    }
}

impl Default for SoftCrc {
    fn default() -> Self {
        Self::new()
    }
}

impl CrcUnit for SoftCrc {
    fn reset(&mut self) {
        self.value = CRC_INIT;
    }

    fn accumulate(&mut self, word: u32) -> u32 {
        let mut crc = self.value ^ word;
        for _ in 0..32 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ CRC_POLY
            } else {
                crc << 1
            };
        }
        self.value = crc;
        crc
    }

    fn value(&self) -> u32 {
        self.value
    }
}

/// Compute the packet CRC over `data` in one shot
pub fn checksum(data: &[u8]) -> u32 {
    let mut unit = SoftCrc::new();
    data.iter().fold(unit.value(), |_, b| unit.accumulate(*b as u32))
}

/// Checks host supplied CRCs using an owned [`CrcUnit`]
#[derive(Debug)]
pub struct Verifier<C> {
    unit: C,
}

impl<C: CrcUnit> Verifier<C> {
    pub fn new(mut unit: C) -> Self {
        unit.reset();
        Self { unit }
    }

    /// Compute the CRC over `data` and compare it with `expected`.
    ///
    /// The unit is reset once the comparison is made, so no accumulator state
    /// carries over to the next packet.
    pub fn verify(&mut self, data: &[u8], expected: u32) -> bool {
        let mut value = self.unit.value();
        for b in data {
            value = self.unit.accumulate(*b as u32);
        }

        self.unit.reset();

        trace!("crc computed: 0x{:08x} host: 0x{:08x}", value, expected);

        value == expected
    }

    pub fn into_inner(self) -> C {
        self.unit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_word_matches_hardware_reference() {
        // CRC->DR after writing 0x00000000 from reset
        assert_eq!(checksum(&[0x00]), 0xC704_DD7B);
    }

    #[test]
    fn known_packets() {
        assert_eq!(checksum(&[0x05, 0x51]), 0x7CAB_E9E7);
        assert_eq!(checksum(&[0x05, 0x52]), 0x71E8_CF3E);
        assert_eq!(checksum(&[0x09, 0x51, 0, 0, 0, 0]), 0x8475_93B5);
        assert_eq!(checksum(b"123456789"), 0x1556_F485);
    }

    #[test]
    fn empty_input_is_initial_value() {
        assert_eq!(checksum(&[]), CRC_INIT);
    }

    #[test]
    fn verify_accepts_matching_crc() {
        let mut v = Verifier::new(SoftCrc::new());
        assert!(v.verify(&[0x05, 0x51], 0x7CAB_E9E7));
    }

    #[test]
    fn single_bit_flips_are_detected() {
        let data = [0x09u8, 0x51, 0xde, 0xad, 0xbe, 0xef];
        let crc = checksum(&data);
        let mut v = Verifier::new(SoftCrc::new());

        for i in 0..data.len() {
            for bit in 0..8 {
                let mut corrupted = data;
                corrupted[i] ^= 1 << bit;
                assert!(!v.verify(&corrupted, crc), "byte {} bit {}", i, bit);
            }
        }

        for bit in 0..32 {
            assert!(!v.verify(&data, crc ^ (1 << bit)), "crc bit {}", bit);
        }

        assert!(v.verify(&data, crc));
    }

    #[test]
    fn verifications_are_independent() {
        let mut v = Verifier::new(SoftCrc::new());

        // A failing check must not leave state behind for the next one
        assert!(!v.verify(&[0x05, 0x52], 0));
        assert!(v.verify(&[0x05, 0x51], 0x7CAB_E9E7));
        assert!(v.verify(&[0x05, 0x52], 0x71E8_CF3E));
        assert_eq!(v.into_inner().value(), CRC_INIT);
    }

    #[test]
    fn verifier_resets_a_dirty_unit() {
        let mut unit = SoftCrc::new();
        unit.accumulate(0x1234_5678);

        let mut v = Verifier::new(unit);
        assert!(v.verify(&[0x00], 0xC704_DD7B));
    }
}
