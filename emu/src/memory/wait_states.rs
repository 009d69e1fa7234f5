//! # Memory access timings
//!
//! | Region      | 8/16 bit | 32 bit |
//! |-------------|----------|--------|
//! | BIOS        | 1        | 1      |
//! | EWRAM       | 3        | 6      |
//! | IWRAM       | 1        | 1      |
//! | I/O         | 1        | 1      |
//! | Palette     | 1        | 2      |
//! | VRAM        | 1        | 2      |
//! | OAM         | 1        | 1      |
//! | ROM         | 1+N/1+S  | N+S    |
//! | SRAM        | 1+W      | 1+W    |
//!
//! Cartridge waits come from WAITCNT (`0x0400_0204`):
//!
//! ```text
//! Bit   Expl.
//! 0-1   SRAM Wait Control          (0..3 = 4,3,2,8 cycles)
//! 2-3   Wait State 0 First Access  (0..3 = 4,3,2,8 cycles)
//! 4     Wait State 0 Second Access (0..1 = 2,1 cycles)
//! 5-6   Wait State 1 First Access  (0..3 = 4,3,2,8 cycles)
//! 7     Wait State 1 Second Access (0..1 = 4,1 cycles)
//! 8-9   Wait State 2 First Access  (0..3 = 4,3,2,8 cycles)
//! 10    Wait State 2 Second Access (0..1 = 8,1 cycles)
//! ```

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::memory::region::{BusWidth, Region, WaitState};

/// Whether an access continues the previous one at the next address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    NonSequential,
    Sequential,
}

/// Bus cycles spent by the accesses performed on behalf of one requester.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessCycles(pub u32);

impl AccessCycles {
    pub const fn add(&mut self, cycles: u32) {
        self.0 = self.0.saturating_add(cycles);
    }
}

/// Size of a single bus transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferSize {
    Byte,
    HalfWord,
    Word,
}

const FIRST_ACCESS: [u32; 4] = [4, 3, 2, 8];

/// Decoded WAITCNT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitControl(pub u16);

impl WaitControl {
    const fn first_access(self, shift: u8) -> u32 {
        FIRST_ACCESS[((self.0 >> shift) & 0b11) as usize]
    }

    #[must_use]
    pub const fn sram_wait(self) -> u32 {
        self.first_access(0)
    }

    #[must_use]
    pub const fn rom_non_sequential_wait(self, wait_state: WaitState) -> u32 {
        match wait_state {
            WaitState::Ws0 => self.first_access(2),
            WaitState::Ws1 => self.first_access(5),
            WaitState::Ws2 => self.first_access(8),
        }
    }

    #[must_use]
    pub fn rom_sequential_wait(self, wait_state: WaitState) -> u32 {
        let (bit, slow) = match wait_state {
            WaitState::Ws0 => (4, 2),
            WaitState::Ws1 => (7, 4),
            WaitState::Ws2 => (10, 8),
        };

        if self.0.get_bit(bit) { 1 } else { slow }
    }

    /// Cycles of one bus transaction on `region`.
    fn single_access(self, region: Region, access: Access) -> u32 {
        match region {
            Region::Bios
            | Region::WorkRamFast
            | Region::Io
            | Region::Palette
            | Region::Vram
            | Region::Oam
            | Region::Unmapped => 1,
            Region::WorkRamSlow => 3,
            Region::Backup => 1 + self.sram_wait(),
            Region::Rom(wait_state) => match access {
                Access::NonSequential => 1 + self.rom_non_sequential_wait(wait_state),
                Access::Sequential => 1 + self.rom_sequential_wait(wait_state),
            },
        }
    }

    /// Total cycles of one access of `size` to `region`.
    #[must_use]
    pub fn cycles(self, region: Region, size: TransferSize, access: Access) -> u32 {
        let first = self.single_access(region, access);

        // A 16 bit bus splits a word into two halves, the second one is
        // always sequential. The 8 bit backup bus only moves one byte.
        if size == TransferSize::Word && region.bus_width() == BusWidth::Bits16 {
            first + self.single_access(region, Access::Sequential)
        } else {
            first
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reset_timings() {
        let control = WaitControl(0);
        let rom = Region::Rom(WaitState::Ws0);

        assert_eq!(control.cycles(rom, TransferSize::HalfWord, Access::NonSequential), 5);
        assert_eq!(control.cycles(rom, TransferSize::HalfWord, Access::Sequential), 3);
        assert_eq!(control.cycles(rom, TransferSize::Word, Access::NonSequential), 8);
        assert_eq!(control.cycles(Region::Backup, TransferSize::Byte, Access::NonSequential), 5);
        assert_eq!(control.cycles(Region::WorkRamSlow, TransferSize::Word, Access::Sequential), 6);
        assert_eq!(control.cycles(Region::Vram, TransferSize::Word, Access::Sequential), 2);
        assert_eq!(control.cycles(Region::WorkRamFast, TransferSize::Word, Access::Sequential), 1);
    }

    #[test]
    fn commercial_rom_timings() {
        // Value most games write: WS0 3/1, SRAM 8.
        let control = WaitControl(0x4317);

        assert_eq!(control.sram_wait(), 8);
        assert_eq!(control.rom_non_sequential_wait(WaitState::Ws0), 3);
        assert_eq!(control.rom_sequential_wait(WaitState::Ws0), 1);
        assert_eq!(control.rom_non_sequential_wait(WaitState::Ws2), 8);
        assert_eq!(control.rom_sequential_wait(WaitState::Ws2), 8);
        assert_eq!(
            control.cycles(Region::Rom(WaitState::Ws0), TransferSize::Word, Access::NonSequential),
            6
        );
    }

    #[test]
    fn words_cost_double_on_half_word_buses() {
        let control = WaitControl(0);
        for region in [Region::WorkRamSlow, Region::Palette, Region::Vram] {
            assert_eq!(region.bus_width(), BusWidth::Bits16);
            assert_eq!(
                control.cycles(region, TransferSize::Word, Access::NonSequential),
                2 * control.cycles(region, TransferSize::HalfWord, Access::NonSequential)
            );
        }

        for region in [Region::Bios, Region::WorkRamFast, Region::Io, Region::Oam] {
            assert_eq!(region.bus_width(), BusWidth::Bits32);
            assert_eq!(control.cycles(region, TransferSize::Word, Access::NonSequential), 1);
        }

        assert_eq!(Region::Backup.bus_width(), BusWidth::Bits8);
        assert_eq!(
            control.cycles(Region::Backup, TransferSize::Word, Access::NonSequential),
            control.cycles(Region::Backup, TransferSize::Byte, Access::NonSequential)
        );
    }
}
