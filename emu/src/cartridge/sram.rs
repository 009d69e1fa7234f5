use serde::{Deserialize, Serialize};

use crate::cartridge::storage::{BackupError, BackupStorage};

/// 32 KB battery-backed SRAM, mirrored over the 64 KB backup window.
pub const SRAM_SIZE: usize = 0x8000;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Sram {
    storage: BackupStorage,
}

impl Sram {
    #[must_use]
    pub const fn new(storage: BackupStorage) -> Self {
        Self { storage }
    }

    #[must_use]
    pub fn read(&self, offset: u16) -> u8 {
        self.storage.read_byte(usize::from(offset) & (SRAM_SIZE - 1))
    }

    pub fn write(&mut self, offset: u16, value: u8) -> Result<(), BackupError> {
        self.storage
            .write_byte(usize::from(offset) & (SRAM_SIZE - 1), value)
    }

    #[must_use]
    pub const fn storage(&self) -> &BackupStorage {
        &self.storage
    }
}
