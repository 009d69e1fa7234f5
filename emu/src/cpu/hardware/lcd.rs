//! LCD status registers.
//!
//! Rendering is not emulated. What stays is the part of the LCD other
//! hardware depends on: the blanking flags DMA start timing polls and the
//! interrupt requests raised when a flag rises.
//!
//! # DISPSTAT (`0x0400_0004`)
//!
//! ```text
//! Bit   Expl.
//! 0     V-Blank flag   (Read only) (1=VBlank) (set in line 160..226; not 227)
//! 1     H-Blank flag   (Read only) (1=HBlank) (toggled in all lines, 0..227)
//! 2     V-Counter flag (Read only) (1=Match)  (set in selected line)
//! 3     V-Blank IRQ Enable         (1=Enable)
//! 4     H-Blank IRQ Enable         (1=Enable)
//! 5     V-Counter IRQ Enable       (1=Enable)
//! 6-7   Not used
//! 8-15  V-Count Setting (LYC)      (0..227)
//! ```
//!
//! VCOUNT (`0x0400_0006`) holds the current scanline and is read-only.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::memory::io_bus::{IoDevice, Visibility};

const READ_ONLY_FLAGS: u16 = 0b111;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayStatus {
    pub dispstat: u16,
    pub vcount: u16,
}

impl DisplayStatus {
    #[must_use]
    pub fn vblank(self) -> bool {
        self.dispstat.get_bit(0)
    }

    #[must_use]
    pub fn hblank(self) -> bool {
        self.dispstat.get_bit(1)
    }

    #[must_use]
    pub fn vblank_irq_enabled(self) -> bool {
        self.dispstat.get_bit(3)
    }

    #[must_use]
    pub fn hblank_irq_enabled(self) -> bool {
        self.dispstat.get_bit(4)
    }

    #[must_use]
    pub fn vcount_irq_enabled(self) -> bool {
        self.dispstat.get_bit(5)
    }

    #[must_use]
    pub fn vcount_setting(self) -> u16 {
        self.dispstat.get_bits(8..=15)
    }
}

impl IoDevice for DisplayStatus {
    fn read_at(&self, offset: u32, _visibility: Visibility) -> u8 {
        match offset {
            0 => self.dispstat.get_byte(0),
            1 => self.dispstat.get_byte(1),
            2 => self.vcount.get_byte(0),
            3 => self.vcount.get_byte(1),
            _ => 0,
        }
    }

    fn write_at(&mut self, offset: u32, value: u8, visibility: Visibility) {
        match (offset, visibility) {
            (0, Visibility::External) => {
                let kept = self.dispstat & READ_ONLY_FLAGS;
                let written = u16::from(value) & !READ_ONLY_FLAGS & 0x00FF;
                self.dispstat = (self.dispstat & 0xFF00) | kept | written;
            }
            (0, Visibility::Internal) => self.dispstat = self.dispstat.set_byte(0, value),
            (1, _) => self.dispstat = self.dispstat.set_byte(1, value),
            (2, _) => self.vcount = self.vcount.set_byte(0, value),
            (3, _) => self.vcount = self.vcount.set_byte(1, value),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn flags_are_read_only_for_cpu() {
        let mut status = DisplayStatus::default();
        status.write_at(0, 0b0000_0001, Visibility::Internal);
        status.write_at(0, 0b0011_1110, Visibility::External);

        assert!(status.vblank());
        assert!(!status.hblank());
        assert!(status.vblank_irq_enabled());
        assert!(status.hblank_irq_enabled());
        assert!(status.vcount_irq_enabled());
        assert_eq!(status.dispstat, 0b0011_1001);
    }

    #[test]
    fn vcount_setting() {
        let mut status = DisplayStatus::default();
        status.write_at(1, 160, Visibility::External);
        assert_eq!(status.vcount_setting(), 160);
        assert_eq!(status.read_at(1, Visibility::External), 160);
    }
}
