//! # Address Space Regions
//!
//! | Region        | Address range             | Size    | Bus    | Mirroring          |
//! |---------------|---------------------------|---------|--------|--------------------|
//! | BIOS          | `0x0000_0000-0x0000_3FFF` | 16 KB   | 32 bit | -                  |
//! | EWRAM         | `0x0200_0000-0x0203_FFFF` | 256 KB  | 16 bit | every 256 KB       |
//! | IWRAM         | `0x0300_0000-0x0300_7FFF` | 32 KB   | 32 bit | every 32 KB        |
//! | I/O           | `0x0400_0000-0x0400_03FE` |         | 32 bit | -                  |
//! | Palette RAM   | `0x0500_0000-0x0500_03FF` | 1 KB    | 16 bit | every 1 KB         |
//! | VRAM          | `0x0600_0000-0x0601_7FFF` | 96 KB   | 16 bit | every 128 KB       |
//! | OAM           | `0x0700_0000-0x0700_03FF` | 1 KB    | 32 bit | every 1 KB         |
//! | ROM WS0/1/2   | `0x0800_0000-0x0DFF_FFFF` | 32 MB×3 | 16 bit | one per wait state |
//! | Backup        | `0x0E00_0000-0x0FFF_FFFF` | 64 KB   | 8 bit  | every 64 KB        |
//!
//! Everything else is unmapped and reads as open bus.

use serde::{Deserialize, Serialize};

pub const BIOS_SIZE: usize = 0x4000;
pub const EWRAM_SIZE: usize = 0x4_0000;
pub const IWRAM_SIZE: usize = 0x8000;
pub const PALETTE_SIZE: usize = 0x400;
pub const VRAM_SIZE: usize = 0x1_8000;
pub const OAM_SIZE: usize = 0x400;

/// Largest ROM image a cartridge window can address.
pub const ROM_MAX_SIZE: usize = 0x0200_0000;

/// The three ROM windows differ only by the wait states configured in WAITCNT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitState {
    Ws0,
    Ws1,
    Ws2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Region {
    Bios,
    WorkRamSlow,
    WorkRamFast,
    Io,
    Palette,
    Vram,
    Oam,
    Rom(WaitState),
    Backup,
    Unmapped,
}

/// Width of the data bus wired to a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusWidth {
    Bits8,
    Bits16,
    Bits32,
}

impl Region {
    /// Decodes the region from the high byte of `address`.
    #[must_use]
    pub const fn from_address(address: u32) -> Self {
        match address >> 24 {
            0x00 if address < BIOS_SIZE as u32 => Self::Bios,
            0x02 => Self::WorkRamSlow,
            0x03 => Self::WorkRamFast,
            0x04 => Self::Io,
            0x05 => Self::Palette,
            0x06 => Self::Vram,
            0x07 => Self::Oam,
            0x08 | 0x09 => Self::Rom(WaitState::Ws0),
            0x0A | 0x0B => Self::Rom(WaitState::Ws1),
            0x0C | 0x0D => Self::Rom(WaitState::Ws2),
            0x0E | 0x0F => Self::Backup,
            _ => Self::Unmapped,
        }
    }

    #[must_use]
    pub const fn bus_width(self) -> BusWidth {
        match self {
            Self::Backup => BusWidth::Bits8,
            Self::WorkRamSlow | Self::Palette | Self::Vram | Self::Rom(_) => BusWidth::Bits16,
            Self::Bios | Self::WorkRamFast | Self::Io | Self::Oam | Self::Unmapped => {
                BusWidth::Bits32
            }
        }
    }

    /// Offset of `address` inside the region buffer once mirroring is applied.
    ///
    /// I/O and unmapped addresses are returned unchanged.
    #[must_use]
    pub const fn offset(self, address: u32) -> usize {
        let offset = match self {
            Self::Bios => address,
            Self::WorkRamSlow => address & (EWRAM_SIZE as u32 - 1),
            Self::WorkRamFast => address & (IWRAM_SIZE as u32 - 1),
            Self::Palette => address & (PALETTE_SIZE as u32 - 1),
            Self::Oam => address & (OAM_SIZE as u32 - 1),
            Self::Vram => vram_offset(address),
            Self::Rom(_) => address & (ROM_MAX_SIZE as u32 - 1),
            Self::Backup => address & 0xFFFF,
            Self::Io | Self::Unmapped => address,
        };

        offset as usize
    }
}

/// VRAM repeats every 128 KB. Only 96 KB exist, so the last 32 KB block of
/// each mirror reads the 32 KB block at `0x0_8000`.
const fn vram_offset(address: u32) -> u32 {
    let offset = address & 0x1_FFFF;
    if offset >= VRAM_SIZE as u32 {
        offset - 0x1_0000
    } else {
        offset
    }
}

/// Value floating on the bus when nothing drives it.
///
/// The cartridge bus multiplexes the low 16 address bits with data: when no
/// device answers, the halfword-addressed low address is read back.
#[must_use]
pub const fn open_bus_half_word(address: u32) -> u16 {
    ((address >> 1) & 0xFFFF) as u16
}

#[must_use]
pub const fn open_bus_byte(address: u32) -> u8 {
    let half = open_bus_half_word(address);
    if address & 1 == 0 {
        half as u8
    } else {
        (half >> 8) as u8
    }
}
