//! Game Pak: the ROM image and the save chip next to it.

pub mod backup_id;
pub mod eeprom;
pub mod flash;
pub mod header;
pub mod sram;
pub mod storage;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cartridge::backup_id::BackupKind;
use crate::cartridge::eeprom::{AddressWidth, Eeprom};
use crate::cartridge::flash::{Flash, FlashChip, FlashError};
use crate::cartridge::header::CartridgeHeader;
use crate::cartridge::sram::{SRAM_SIZE, Sram};
use crate::cartridge::storage::{BackupStorage, ERASED};
use crate::memory::region::ROM_MAX_SIZE;

/// ROMs bigger than this leave only the last 256 bytes of the top window
/// to the EEPROM.
const LARGE_ROM_SIZE: usize = 0x0100_0000;

#[derive(Debug, Default, Serialize, Deserialize)]
pub enum Backup {
    #[default]
    None,
    Sram(Sram),
    Eeprom(Eeprom),
    Flash(Flash),
}

/// What the caller learns from loading a ROM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartridgeInfo {
    pub header: Option<CartridgeHeader>,
    pub backup: BackupKind,
    /// False when the save file could not be opened: the game runs but
    /// nothing it saves is kept.
    pub backup_available: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Cartridge {
    #[serde(skip)]
    rom: Vec<u8>,
    backup: Backup,
}

fn open_storage(save_path: Option<&Path>, capacity: usize) -> (BackupStorage, bool) {
    let Some(path) = save_path else {
        return (BackupStorage::volatile(capacity), true);
    };

    match BackupStorage::open(path, capacity) {
        Ok(storage) => (storage, true),
        Err((storage, e)) => {
            tracing::error!("{e}, saving is disabled");
            (storage, false)
        }
    }
}

impl Cartridge {
    /// Builds the cartridge for `rom`, detecting the save chip and opening
    /// its storage at `save_path` (in memory only if `None`).
    pub fn load(mut rom: Vec<u8>, save_path: Option<&Path>) -> (Self, CartridgeInfo) {
        if rom.len() > ROM_MAX_SIZE {
            tracing::warn!("ROM is {} bytes, truncating to 32 MB", rom.len());
            rom.truncate(ROM_MAX_SIZE);
        }

        let header = match CartridgeHeader::new(&rom) {
            Ok(header) => {
                tracing::info!(
                    "loaded \"{}\" ({}, maker {}, version {})",
                    header.game_title(),
                    header.game_code(),
                    header.maker_code(),
                    header.software_version()
                );
                Some(header)
            }
            Err(e) => {
                tracing::warn!("invalid cartridge header: {e}");
                None
            }
        };

        let kind = backup_id::detect(&rom);
        let (backup, backup_available) = match kind {
            BackupKind::None => (Backup::None, true),
            BackupKind::Sram => {
                let (storage, ok) = open_storage(save_path, SRAM_SIZE);
                (Backup::Sram(Sram::new(storage)), ok)
            }
            BackupKind::Eeprom => {
                let width = save_path
                    .and_then(BackupStorage::existing_size)
                    .map_or(AddressWidth::Bits6, AddressWidth::from_save_size);
                let (storage, ok) = open_storage(save_path, width.capacity());
                (Backup::Eeprom(Eeprom::new(storage, width)), ok)
            }
            BackupKind::Flash | BackupKind::Flash512 | BackupKind::Flash1M => {
                let chip = match kind {
                    BackupKind::Flash => FlashChip::Atmel,
                    BackupKind::Flash512 => FlashChip::Panasonic,
                    _ => FlashChip::Sanyo,
                };
                let (storage, ok) = open_storage(save_path, chip.capacity());
                (Backup::Flash(Flash::new(storage, chip)), ok)
            }
        };

        let info = CartridgeInfo {
            header,
            backup: kind,
            backup_available,
        };

        (Self { rom, backup }, info)
    }

    #[must_use]
    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    #[must_use]
    pub const fn backup(&self) -> &Backup {
        &self.backup
    }

    /// Byte at `offset` of the ROM image, `None` past its end.
    #[must_use]
    pub fn rom_byte(&self, offset: usize) -> Option<u8> {
        self.rom.get(offset).copied()
    }

    /// Whether `address` in the ROM area reaches the EEPROM instead.
    #[must_use]
    pub fn is_eeprom_address(&self, address: u32) -> bool {
        if !matches!(self.backup, Backup::Eeprom(_)) || address >> 24 != 0x0D {
            return false;
        }

        self.rom.len() <= LARGE_ROM_SIZE || address >= 0x0DFF_FF00
    }

    /// Byte of the save chip mapped in `0x0E00_0000-0x0E00_FFFF`.
    pub fn read_backup(&self, offset: u16) -> u8 {
        match &self.backup {
            Backup::Sram(sram) => sram.read(offset),
            Backup::Flash(flash) => flash.read(offset),
            Backup::None | Backup::Eeprom(_) => ERASED,
        }
    }

    pub fn write_backup(&mut self, offset: u16, value: u8) {
        match &mut self.backup {
            Backup::Sram(sram) => {
                if let Err(e) = sram.write(offset, value) {
                    tracing::error!("{e}");
                }
            }
            // Protocol errors are logged by the chip.
            Backup::Flash(flash) => {
                if let Err(e @ FlashError::Storage(_)) = flash.write(offset, value) {
                    tracing::error!("{e}");
                }
            }
            Backup::None | Backup::Eeprom(_) => {
                tracing::debug!("backup write 0x{value:02X} at 0x{offset:04X} dropped");
            }
        }
    }

    pub fn read_eeprom(&mut self) -> u16 {
        match &mut self.backup {
            Backup::Eeprom(eeprom) => u16::from(eeprom.read_bit()),
            _ => 1,
        }
    }

    pub fn write_eeprom(&mut self, value: u16) {
        if let Backup::Eeprom(eeprom) = &mut self.backup {
            if let Err(e) = eeprom.write_bit(value & 1 == 1) {
                tracing::warn!("{e}");
            }
        }
    }

    /// Lets the EEPROM infer its address width from a DMA of `count` units.
    pub fn observe_eeprom_dma(&mut self, count: u32) {
        if let Backup::Eeprom(eeprom) = &mut self.backup {
            if let Err(e) = eeprom.observe_dma_length(count) {
                tracing::error!("{e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::storage::tests::TempSave;
    use pretty_assertions::assert_eq;

    fn rom_with_marker(marker: &[u8], size: usize) -> Vec<u8> {
        let mut rom = vec![0; size];
        rom[0x400..0x400 + marker.len()].copy_from_slice(marker);
        rom
    }

    #[test]
    fn flash512_marker_builds_panasonic_chip() {
        let save = TempSave::new("cart-flash512");
        let (cartridge, info) =
            Cartridge::load(rom_with_marker(b"FLASH512_V131", 0x1000), Some(save.0.as_path()));

        assert_eq!(info.backup, BackupKind::Flash512);
        assert!(info.backup_available);
        assert!(info.header.is_none());
        let Backup::Flash(flash) = cartridge.backup() else {
            panic!("expected a FLASH chip");
        };
        assert_eq!(flash.chip(), FlashChip::Panasonic);
        assert_eq!(std::fs::metadata(&save.0).unwrap().len(), 0x1_0000);
    }

    #[test]
    fn flash1m_is_128k() {
        let (cartridge, _) = Cartridge::load(rom_with_marker(b"FLASH1M_V103", 0x1000), None);
        let Backup::Flash(flash) = cartridge.backup() else {
            panic!("expected a FLASH chip");
        };
        assert_eq!(flash.chip(), FlashChip::Sanyo);
        assert_eq!(flash.storage().len(), 0x2_0000);
    }

    #[test]
    fn eeprom_width_from_existing_save() {
        let save = TempSave::new("cart-eeprom");
        std::fs::write(&save.0, vec![0xFF; 0x2000]).unwrap();
        let rom = rom_with_marker(b"EEPROM_V124", 0x1000);
        let (cartridge, _) = Cartridge::load(rom, Some(save.0.as_path()));

        let Backup::Eeprom(eeprom) = cartridge.backup() else {
            panic!("expected an EEPROM");
        };
        assert_eq!(eeprom.width(), AddressWidth::Bits14);
    }

    #[test]
    fn eeprom_window_depends_on_rom_size() {
        let (small, _) = Cartridge::load(rom_with_marker(b"EEPROM_V124", 0x1000), None);
        assert!(small.is_eeprom_address(0x0D00_0000));
        assert!(!small.is_eeprom_address(0x0C00_0000));

        let (large, _) =
            Cartridge::load(rom_with_marker(b"EEPROM_V124", LARGE_ROM_SIZE + 0x100), None);
        assert!(!large.is_eeprom_address(0x0D00_0000));
        assert!(large.is_eeprom_address(0x0DFF_FF00));
    }

    #[test]
    fn unopenable_save_is_reported() {
        let dir = TempSave::new("cart-dir");
        std::fs::create_dir_all(&dir.0).unwrap();

        let rom = rom_with_marker(b"SRAM_V113", 0x1000);
        let (mut cartridge, info) = Cartridge::load(rom, Some(dir.0.as_path()));
        assert!(!info.backup_available);

        cartridge.write_backup(0, 0x12);
        assert_eq!(cartridge.read_backup(0), 0xFF);

        std::fs::remove_dir(&dir.0).unwrap();
    }

    #[test]
    fn no_backup_reads_erased() {
        let (mut cartridge, info) = Cartridge::load(vec![0; 0x100], None);
        assert_eq!(info.backup, BackupKind::None);

        cartridge.write_backup(0x10, 0);
        assert_eq!(cartridge.read_backup(0x10), 0xFF);
        assert_eq!(cartridge.read_eeprom(), 1);
    }
}
