//! Address decoder shared by the CPU and the DMA.
//!
//! Every access goes through [`Region::from_address`], is forced to its
//! natural alignment and adds the cost configured in WAITCNT to the
//! caller's [`AccessCycles`]. Bus operations never fail: devices report
//! their errors in the log and unmapped addresses read as open bus.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::bitwise::{Bits, read_le, write_le};
use crate::cartridge::{Cartridge, CartridgeInfo};
use crate::cpu::hardware::interrupt_control::{Interrupt, WAITCNT_ADDRESS};
use crate::memory::internal_memory::InternalMemory;
use crate::memory::io_bus::{IoBus, Visibility};
use crate::memory::region::{Region, open_bus_byte, open_bus_half_word};
use crate::memory::wait_states::{Access, AccessCycles, TransferSize, WaitControl};

const DISPCNT_ADDRESS: u32 = 0x0400_0000;

/// Last opcode fetched by the BIOS after the post-boot jump to the cartridge.
const BIOS_AFTER_BOOT: u32 = 0xE129_F000;

/// BIOS data can only be read while the CPU executes from it. Any other
/// read returns the last opcode fetched from the BIOS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum BiosReadState {
    Executing,
    Latched,
}

#[derive(Serialize, Deserialize)]
pub struct Bus {
    internal_memory: InternalMemory,
    io: IoBus,
    cartridge: Cartridge,
    bios_state: BiosReadState,
    bios_latch: u32,
}

impl Default for Bus {
    fn default() -> Self {
        Self {
            internal_memory: InternalMemory::default(),
            io: IoBus::default(),
            cartridge: Cartridge::default(),
            bios_state: BiosReadState::Executing,
            bios_latch: 0,
        }
    }
}

impl Bus {
    #[must_use]
    pub const fn io(&self) -> &IoBus {
        &self.io
    }

    pub const fn io_mut(&mut self) -> &mut IoBus {
        &mut self.io
    }

    #[must_use]
    pub const fn cartridge(&self) -> &Cartridge {
        &self.cartridge
    }

    #[must_use]
    pub const fn internal_memory(&self) -> &InternalMemory {
        &self.internal_memory
    }

    pub fn load_bios(&mut self, bios: &[u8]) {
        self.internal_memory.load_bios(bios);
    }

    /// Replaces the cartridge, the save chip persisting to `save_path`.
    pub fn load_rom(&mut self, save_path: Option<&Path>, rom: Vec<u8>) -> CartridgeInfo {
        let (cartridge, info) = Cartridge::load(rom, save_path);
        tracing::info!(
            "{} byte ROM, backup {:?}{}",
            cartridge.rom().len(),
            info.backup,
            if info.backup_available { "" } else { " (not persisted)" }
        );
        self.cartridge = cartridge;
        info
    }

    /// Bus state found after the BIOS boot sequence hands over to the cartridge.
    pub const fn skip_bios(&mut self) {
        self.bios_state = BiosReadState::Latched;
        self.bios_latch = BIOS_AFTER_BOOT;
    }

    /// The CPU jumped to an exception vector.
    pub const fn enter_bios(&mut self) {
        self.bios_state = BiosReadState::Executing;
    }

    fn wait_control(&self) -> WaitControl {
        WaitControl(self.io.read_half_word(WAITCNT_ADDRESS, Visibility::Internal))
    }

    fn add_cycles(
        &self,
        region: Region,
        size: TransferSize,
        cycles: &mut AccessCycles,
        access: Access,
    ) {
        cycles.add(self.wait_control().cycles(region, size, access));
    }

    /// Opcode fetch. Updates the BIOS read state.
    pub fn fetch_word(&mut self, address: u32, cycles: &mut AccessCycles, access: Access) -> u32 {
        self.track_bios_fetch(address);
        self.read_word(address, cycles, access)
    }

    pub fn fetch_half_word(
        &mut self,
        address: u32,
        cycles: &mut AccessCycles,
        access: Access,
    ) -> u16 {
        self.track_bios_fetch(address);
        self.read_half_word(address, cycles, access)
    }

    fn track_bios_fetch(&mut self, address: u32) {
        if Region::from_address(address) == Region::Bios {
            self.bios_state = BiosReadState::Executing;
            // The BIOS is prefetched a word at a time.
            self.bios_latch = read_le(&self.internal_memory.bios[..], (address & !3) as usize, 4);
        } else {
            self.bios_state = BiosReadState::Latched;
        }
    }

    fn read_bios(&self, address: u32, width: usize) -> u32 {
        match self.bios_state {
            BiosReadState::Executing => {
                read_le(&self.internal_memory.bios[..], address as usize, width)
            }
            BiosReadState::Latched => {
                let shifted = self.bios_latch >> (8 * (address & 3));
                match width {
                    1 => shifted & 0xFF,
                    2 => shifted & 0xFFFF,
                    _ => shifted,
                }
            }
        }
    }

    fn rom_half_word(&self, region: Region, address: u32) -> u16 {
        let offset = region.offset(address);
        match (self.cartridge.rom_byte(offset), self.cartridge.rom_byte(offset + 1)) {
            (Some(low), Some(high)) => u16::from_le_bytes([low, high]),
            (Some(low), None) => u16::from(low) | (open_bus_half_word(address) & 0xFF00),
            _ => open_bus_half_word(address),
        }
    }

    fn read_memory(&self, region: Region, address: u32, width: usize) -> u32 {
        let offset = region.offset(address);
        self.internal_memory
            .buffer(region)
            .map_or(0, |buffer| read_le(buffer, offset, width))
    }

    pub fn read_byte(&mut self, address: u32, cycles: &mut AccessCycles, access: Access) -> u8 {
        let region = Region::from_address(address);
        self.add_cycles(region, TransferSize::Byte, cycles, access);

        match region {
            Region::Bios => self.read_bios(address, 1) as u8,
            Region::Io => self.io.read_byte(address, Visibility::External),
            Region::Rom(_) if self.cartridge.is_eeprom_address(address) => {
                self.cartridge.read_eeprom() as u8
            }
            Region::Rom(_) => self
                .cartridge
                .rom_byte(region.offset(address))
                .unwrap_or_else(|| open_bus_byte(address)),
            Region::Backup => self.cartridge.read_backup(region.offset(address) as u16),
            Region::Unmapped => open_bus_byte(address),
            Region::WorkRamSlow
            | Region::WorkRamFast
            | Region::Palette
            | Region::Vram
            | Region::Oam => self.read_memory(region, address, 1) as u8,
        }
    }

    pub fn read_half_word(
        &mut self,
        address: u32,
        cycles: &mut AccessCycles,
        access: Access,
    ) -> u16 {
        let region = Region::from_address(address);
        self.add_cycles(region, TransferSize::HalfWord, cycles, access);
        let aligned = address & !1;

        match region {
            Region::Bios => self.read_bios(aligned, 2) as u16,
            Region::Io => self.io.read_half_word(aligned, Visibility::External),
            Region::Rom(_) if self.cartridge.is_eeprom_address(aligned) => {
                self.cartridge.read_eeprom()
            }
            Region::Rom(_) => self.rom_half_word(region, aligned),
            // The 8 bit bus repeats the addressed byte on every lane.
            Region::Backup => {
                u16::from(self.cartridge.read_backup(region.offset(address) as u16)) * 0x0101
            }
            Region::Unmapped => open_bus_half_word(aligned),
            Region::WorkRamSlow
            | Region::WorkRamFast
            | Region::Palette
            | Region::Vram
            | Region::Oam => self.read_memory(region, aligned, 2) as u16,
        }
    }

    pub fn read_word(&mut self, address: u32, cycles: &mut AccessCycles, access: Access) -> u32 {
        let region = Region::from_address(address);
        self.add_cycles(region, TransferSize::Word, cycles, access);
        let aligned = address & !3;

        match region {
            Region::Bios => self.read_bios(aligned, 4),
            Region::Io => self.io.read_word(aligned, Visibility::External),
            Region::Rom(_) if self.cartridge.is_eeprom_address(aligned) => {
                let low = self.cartridge.read_eeprom();
                let high = self.cartridge.read_eeprom();
                u32::from(low) | (u32::from(high) << 16)
            }
            Region::Rom(_) => {
                u32::from(self.rom_half_word(region, aligned))
                    | (u32::from(self.rom_half_word(region, aligned + 2)) << 16)
            }
            Region::Backup => {
                u32::from(self.cartridge.read_backup(region.offset(address) as u16)) * 0x0101_0101
            }
            Region::Unmapped => {
                u32::from(open_bus_half_word(aligned))
                    | (u32::from(open_bus_half_word(aligned + 2)) << 16)
            }
            Region::WorkRamSlow
            | Region::WorkRamFast
            | Region::Palette
            | Region::Vram
            | Region::Oam => self.read_memory(region, aligned, 4),
        }
    }

    fn write_memory(&mut self, region: Region, address: u32, width: usize, value: u32) {
        let offset = region.offset(address);
        if let Some(buffer) = self.internal_memory.buffer_mut(region) {
            write_le(buffer, offset, width, value);
        }
    }

    /// VRAM offsets below this belong to backgrounds and accept byte writes.
    fn vram_background_limit(&self) -> usize {
        let display_control = self.io.read_half_word(DISPCNT_ADDRESS, Visibility::Internal);
        // Bitmap modes extend the background area.
        if display_control.get_bits(0..=2) >= 3 {
            0x1_4000
        } else {
            0x1_0000
        }
    }

    /// Byte writes to video memories go through a 16 bit bus: palette and
    /// background VRAM store the byte in both halves, object VRAM and OAM
    /// ignore it.
    pub fn write_byte(
        &mut self,
        address: u32,
        value: u8,
        cycles: &mut AccessCycles,
        access: Access,
    ) {
        let region = Region::from_address(address);
        self.add_cycles(region, TransferSize::Byte, cycles, access);

        match region {
            Region::Io => self.io.write_byte(address, value, Visibility::External),
            Region::Rom(_) if self.cartridge.is_eeprom_address(address) => {
                self.cartridge.write_eeprom(u16::from(value));
            }
            Region::Backup => self
                .cartridge
                .write_backup(region.offset(address) as u16, value),
            Region::WorkRamSlow | Region::WorkRamFast => {
                self.write_memory(region, address, 1, u32::from(value));
            }
            Region::Palette => {
                self.write_memory(region, address & !1, 2, u32::from(value) * 0x0101);
            }
            Region::Vram if region.offset(address) < self.vram_background_limit() => {
                self.write_memory(region, address & !1, 2, u32::from(value) * 0x0101);
            }
            Region::Vram | Region::Oam => {
                tracing::debug!("byte write of 0x{value:02X} to 0x{address:08X} ignored");
            }
            Region::Bios | Region::Rom(_) | Region::Unmapped => {
                tracing::debug!("write of 0x{value:02X} to read-only or unmapped 0x{address:08X}");
            }
        }
    }

    pub fn write_half_word(
        &mut self,
        address: u32,
        value: u16,
        cycles: &mut AccessCycles,
        access: Access,
    ) {
        let region = Region::from_address(address);
        self.add_cycles(region, TransferSize::HalfWord, cycles, access);
        let aligned = address & !1;

        match region {
            Region::Io => self.io.write_half_word(aligned, value, Visibility::External),
            Region::Rom(_) if self.cartridge.is_eeprom_address(aligned) => {
                self.cartridge.write_eeprom(value);
            }
            // Only the lane selected by the address reaches the 8 bit bus.
            Region::Backup => {
                let byte = (value >> (8 * (address & 1))) as u8;
                self.cartridge.write_backup(region.offset(address) as u16, byte);
            }
            Region::WorkRamSlow
            | Region::WorkRamFast
            | Region::Palette
            | Region::Vram
            | Region::Oam => self.write_memory(region, aligned, 2, u32::from(value)),
            Region::Bios | Region::Rom(_) | Region::Unmapped => {
                tracing::debug!("write of 0x{value:04X} to read-only or unmapped 0x{address:08X}");
            }
        }
    }

    pub fn write_word(
        &mut self,
        address: u32,
        value: u32,
        cycles: &mut AccessCycles,
        access: Access,
    ) {
        let region = Region::from_address(address);
        self.add_cycles(region, TransferSize::Word, cycles, access);
        let aligned = address & !3;

        match region {
            Region::Io => self.io.write_word(aligned, value, Visibility::External),
            Region::Rom(_) if self.cartridge.is_eeprom_address(aligned) => {
                self.cartridge.write_eeprom(value as u16);
                self.cartridge.write_eeprom((value >> 16) as u16);
            }
            Region::Backup => {
                let byte = (value >> (8 * (address & 3))) as u8;
                self.cartridge.write_backup(region.offset(address) as u16, byte);
            }
            Region::WorkRamSlow
            | Region::WorkRamFast
            | Region::Palette
            | Region::Vram
            | Region::Oam => self.write_memory(region, aligned, 4, value),
            Region::Bios | Region::Rom(_) | Region::Unmapped => {
                tracing::debug!("write of 0x{value:08X} to read-only or unmapped 0x{address:08X}");
            }
        }
    }

    /// Updates the blanking flags of DISPSTAT, requesting the matching
    /// interrupt when a flag rises and its IRQ is enabled.
    pub fn set_display_status(&mut self, vblank: bool, hblank: bool) {
        let previous = self.io.display;
        self.io.display.dispstat = previous.dispstat.set_bit(0, vblank).set_bit(1, hblank);

        if vblank && !previous.vblank() && previous.vblank_irq_enabled() {
            self.request_interrupt(Interrupt::VBlank);
        }
        if hblank && !previous.hblank() && previous.hblank_irq_enabled() {
            self.request_interrupt(Interrupt::HBlank);
        }
    }

    /// A DMA is about to move `count` units to `destination`.
    pub fn notify_dma_transfer(&mut self, destination: u32, count: u32) {
        if self.cartridge.is_eeprom_address(destination) {
            self.cartridge.observe_eeprom_dma(count);
        }
    }
}
