//! On-board memories: BIOS, work RAMs and the video memories.
//!
//! Buffers are indexed by region offset, so mirroring must already be
//! applied (see [`Region::offset`](super::region::Region::offset)).

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::memory::region::{
    BIOS_SIZE, EWRAM_SIZE, IWRAM_SIZE, OAM_SIZE, PALETTE_SIZE, Region, VRAM_SIZE,
};

/// Backing arrays are boxed to keep ~400KB off the stack.
#[serde_as]
#[derive(Clone, Serialize, Deserialize)]
pub struct InternalMemory {
    /// From 0x00000000 to 0x00003FFF (16 KBytes)
    #[serde_as(as = "Box<[_; 16384]>")]
    pub bios: Box<[u8; BIOS_SIZE]>,

    /// From 0x02000000 to 0x0203FFFF (256 KBytes)
    #[serde_as(as = "Box<[_; 262144]>")]
    pub working_ram: Box<[u8; EWRAM_SIZE]>,

    /// From 0x03000000 to 0x03007FFF (32 KBytes)
    #[serde_as(as = "Box<[_; 32768]>")]
    pub working_iram: Box<[u8; IWRAM_SIZE]>,

    /// From 0x05000000 to 0x050003FF, BG palette then OBJ palette.
    #[serde_as(as = "Box<[_; 1024]>")]
    pub palette_ram: Box<[u8; PALETTE_SIZE]>,

    /// From 0x06000000 to 0x06017FFF (96 KBytes)
    #[serde_as(as = "Box<[_; 98304]>")]
    pub video_ram: Box<[u8; VRAM_SIZE]>,

    /// From 0x07000000 to 0x070003FF (1 KByte)
    #[serde_as(as = "Box<[_; 1024]>")]
    pub obj_attributes: Box<[u8; OAM_SIZE]>,
}

impl Default for InternalMemory {
    #[allow(clippy::large_stack_arrays)]
    fn default() -> Self {
        Self {
            bios: Box::new([0; BIOS_SIZE]),
            working_ram: Box::new([0; EWRAM_SIZE]),
            working_iram: Box::new([0; IWRAM_SIZE]),
            palette_ram: Box::new([0; PALETTE_SIZE]),
            video_ram: Box::new([0; VRAM_SIZE]),
            obj_attributes: Box::new([0; OAM_SIZE]),
        }
    }
}

impl InternalMemory {
    /// Copies `bios` into the BIOS area, truncating anything past 16 KB.
    pub fn load_bios(&mut self, bios: &[u8]) {
        let len = bios.len().min(BIOS_SIZE);
        if len < bios.len() {
            let size = bios.len();
            tracing::warn!("BIOS image is {size} bytes, only the first {BIOS_SIZE} are used");
        }
        self.bios.fill(0);
        self.bios[..len].copy_from_slice(&bios[..len]);
    }

    /// Backing buffer of a memory-backed region.
    #[must_use]
    pub fn buffer(&self, region: Region) -> Option<&[u8]> {
        match region {
            Region::Bios => Some(&self.bios[..]),
            Region::WorkRamSlow => Some(&self.working_ram[..]),
            Region::WorkRamFast => Some(&self.working_iram[..]),
            Region::Palette => Some(&self.palette_ram[..]),
            Region::Vram => Some(&self.video_ram[..]),
            Region::Oam => Some(&self.obj_attributes[..]),
            Region::Io | Region::Rom(_) | Region::Backup | Region::Unmapped => None,
        }
    }

    /// Writable buffer of a RAM region. BIOS is read-only.
    pub fn buffer_mut(&mut self, region: Region) -> Option<&mut [u8]> {
        match region {
            Region::WorkRamSlow => Some(&mut self.working_ram[..]),
            Region::WorkRamFast => Some(&mut self.working_iram[..]),
            Region::Palette => Some(&mut self.palette_ram[..]),
            Region::Vram => Some(&mut self.video_ram[..]),
            Region::Oam => Some(&mut self.obj_attributes[..]),
            Region::Bios | Region::Io | Region::Rom(_) | Region::Backup | Region::Unmapped => None,
        }
    }
}
