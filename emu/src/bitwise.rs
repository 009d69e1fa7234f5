use std::ops::RangeInclusive;

/// Bit and byte helpers for register values.
/// Bit indexes go from lsb to msb (right to left).
pub trait Bits: Copy {
    fn get_bit(self, bit_idx: u8) -> bool;

    #[must_use]
    fn set_bit(self, bit_idx: u8, value: bool) -> Self;

    /// Returns the bits in `bits_range` shifted down to position 0.
    fn get_bits(self, bits_range: RangeInclusive<u8>) -> Self;

    fn get_byte(self, byte_nth: u8) -> u8;

    #[must_use]
    fn set_byte(self, byte_nth: u8, value: u8) -> Self;
}

macro_rules! impl_bits {
    ($($t:ty),*) => {$(
        impl Bits for $t {
            fn get_bit(self, bit_idx: u8) -> bool {
                debug_assert!(u32::from(bit_idx) < <$t>::BITS);
                (self >> bit_idx) & 1 == 1
            }

            fn set_bit(self, bit_idx: u8, value: bool) -> Self {
                debug_assert!(u32::from(bit_idx) < <$t>::BITS);
                let mask: $t = 1 << bit_idx;
                if value { self | mask } else { self & !mask }
            }

            fn get_bits(self, bits_range: RangeInclusive<u8>) -> Self {
                let start = *bits_range.start();
                let length = u32::from(*bits_range.end() - start) + 1;
                debug_assert!(u32::from(start) + length <= <$t>::BITS);

                let shifted = self >> start;
                if length == <$t>::BITS {
                    shifted
                } else {
                    shifted & ((1 << length) - 1)
                }
            }

            #[allow(clippy::cast_possible_truncation)]
            fn get_byte(self, byte_nth: u8) -> u8 {
                debug_assert!(u32::from(byte_nth) * 8 < <$t>::BITS);
                (self >> (u32::from(byte_nth) * 8)) as u8
            }

            fn set_byte(self, byte_nth: u8, value: u8) -> Self {
                debug_assert!(u32::from(byte_nth) * 8 < <$t>::BITS);
                let shift = u32::from(byte_nth) * 8;
                let mask: $t = !(0xFF << shift);
                (self & mask) | (<$t>::from(value) << shift)
            }
        }
    )*};
}

impl_bits!(u8, u16, u32);

/// Reads a little-endian value of `width` bytes (1, 2 or 4) from `bytes` at `offset`.
pub fn read_le(bytes: &[u8], offset: usize, width: usize) -> u32 {
    bytes[offset..offset + width]
        .iter()
        .rev()
        .fold(0, |acc, &b| (acc << 8) | u32::from(b))
}

/// Writes the `width` low bytes of `value` into `bytes` at `offset`, little-endian.
pub fn write_le(bytes: &mut [u8], offset: usize, width: usize, value: u32) {
    for (i, byte) in bytes[offset..offset + width].iter_mut().enumerate() {
        *byte = value.get_byte(i as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::Rng;

    #[test]
    fn get_and_set_bit() {
        let value: u16 = 0b1000_0000_0000_0001;
        assert!(value.get_bit(0));
        assert!(value.get_bit(15));
        assert!(!value.get_bit(7));

        assert_eq!(value.set_bit(15, false), 1);
        assert_eq!(0_u32.set_bit(31, true), 0x8000_0000);
    }

    #[test]
    fn get_bits() {
        let control: u16 = 0b1011_0110_0100_0000;
        assert_eq!(control.get_bits(12..=13), 0b11);
        assert_eq!(control.get_bits(5..=6), 0b10);
        assert_eq!(control.get_bits(0..=15), control);
        assert_eq!(0xDEAD_BEEF_u32.get_bits(0..=31), 0xDEAD_BEEF);
        assert_eq!(0xDEAD_BEEF_u32.get_bits(16..=31), 0xDEAD);
    }

    #[test]
    fn bytes() {
        let value = 0x1122_3344_u32;
        assert_eq!(value.get_byte(0), 0x44);
        assert_eq!(value.get_byte(3), 0x11);
        assert_eq!(value.set_byte(2, 0xAB), 0x11AB_3344);
        assert_eq!(0xFF00_u16.set_byte(0, 0x12), 0xFF12);
    }

    #[test]
    fn little_endian_helpers() {
        let mut block = [0_u8; 12];
        let value = rand::thread_rng().gen_range(1..=u32::MAX);

        write_le(&mut block, 4, 4, value);
        assert_eq!(read_le(&block, 4, 4), value);

        write_le(&mut block, 10, 2, 0xBEEF_CAFE);
        assert_eq!(block[10..12], [0xFE, 0xCA]);
        assert_eq!(read_le(&block, 10, 2), 0xCAFE);
    }
}
