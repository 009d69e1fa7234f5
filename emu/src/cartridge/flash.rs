//! # FLASH backup
//!
//! Commands are written as byte sequences to magic offsets of the 64 KB
//! backup window:
//!
//! ```text
//! 5555=AA, 2AAA=55, 5555=cmd
//!
//! 90  Enter ID mode   (offsets 0/1 read manufacturer/device)
//! F0  Exit ID mode    (also accepted alone, at any offset)
//! 80  Erase, followed by 5555=AA, 2AAA=55 and
//!       5555=10  Erase entire chip
//!       n000=30  Erase 4 KB sector n
//! A0  Write one byte  (next write is the data)
//! B0  Bank switch     (next write to 0000 selects the bank, 128 KB only)
//! ```
//!
//! Atmel chips have no single byte write: after `A0` they take a 128 byte
//! page in one burst.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cartridge::storage::{BackupError, BackupStorage};

pub const BANK_SIZE: usize = 0x1_0000;
const SECTOR_SIZE: usize = 0x1000;
const ATMEL_PAGE_SIZE: u16 = 128;

const COMMAND_ADDRESS_1: u16 = 0x5555;
const COMMAND_ADDRESS_2: u16 = 0x2AAA;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlashChip {
    /// Atmel AT29LV512, 64 KB.
    Atmel,
    /// Panasonic MN63F805MNP, 64 KB.
    Panasonic,
    /// Sanyo LE26FV10N1TS, 128 KB.
    Sanyo,
}

impl FlashChip {
    /// Manufacturer and device ID.
    #[must_use]
    pub const fn id(self) -> (u8, u8) {
        match self {
            Self::Atmel => (0x1F, 0x3D),
            Self::Panasonic => (0x32, 0x1B),
            Self::Sanyo => (0x62, 0x13),
        }
    }

    #[must_use]
    pub const fn capacity(self) -> usize {
        match self {
            Self::Atmel | Self::Panasonic => BANK_SIZE,
            Self::Sanyo => 2 * BANK_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlashState {
    Idle,
    /// `AA` received at 5555.
    RecvInit,
    /// `55` received at 2AAA, next byte is the command.
    RecvCmd,
    /// `80` received, expecting `AA` at 5555.
    Erase1,
    /// Expecting `55` at 2AAA.
    Erase2,
    /// Expecting the erase kind.
    Erase3,
    /// ID mode, expecting `AA` at 5555 of the exit sequence.
    ReadId,
    /// ID mode, expecting `55` at 2AAA.
    ReadIdExit1,
    /// ID mode, expecting `F0` at 5555.
    ReadIdExit2,
    /// Next write is the data byte.
    Write,
    /// One byte written on an Atmel chip: a write to the next offset starts
    /// the rest of the page.
    IsWriteAtmel,
    WriteAtmel,
    /// Next write to 0000 selects the bank.
    BankSwitch,
}

#[derive(Debug)]
pub enum FlashError {
    UnexpectedWrite {
        state: FlashState,
        offset: u16,
        value: u8,
    },
    Storage(BackupError),
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedWrite {
                state,
                offset,
                value,
            } => write!(f, "FLASH: unexpected write 0x{value:02X} at 0x{offset:04X} in {state:?}"),
            Self::Storage(e) => write!(f, "FLASH: {e}"),
        }
    }
}

impl std::error::Error for FlashError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::UnexpectedWrite { .. } => None,
        }
    }
}

impl From<BackupError> for FlashError {
    fn from(e: BackupError) -> Self {
        Self::Storage(e)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Flash {
    storage: BackupStorage,
    chip: FlashChip,
    state: FlashState,
    id_mode: bool,
    bank: usize,
    /// Next offset of an Atmel page burst.
    atmel_offset: u16,
    atmel_remaining: u16,
}

impl Flash {
    #[must_use]
    pub const fn new(storage: BackupStorage, chip: FlashChip) -> Self {
        Self {
            storage,
            chip,
            state: FlashState::Idle,
            id_mode: false,
            bank: 0,
            atmel_offset: 0,
            atmel_remaining: 0,
        }
    }

    #[must_use]
    pub const fn chip(&self) -> FlashChip {
        self.chip
    }

    #[must_use]
    pub const fn state(&self) -> FlashState {
        self.state
    }

    #[must_use]
    pub const fn bank(&self) -> usize {
        self.bank
    }

    #[must_use]
    pub const fn storage(&self) -> &BackupStorage {
        &self.storage
    }

    const fn storage_offset(&self, offset: u16) -> usize {
        self.bank * BANK_SIZE + offset as usize
    }

    #[must_use]
    pub fn read(&self, offset: u16) -> u8 {
        if self.id_mode && offset < 2 {
            let (manufacturer, device) = self.chip.id();
            return if offset == 0 { manufacturer } else { device };
        }

        self.storage.read_byte(self.storage_offset(offset))
    }

    fn write_data(&mut self, offset: u16, value: u8) -> Result<(), BackupError> {
        let offset = self.storage_offset(offset);
        self.storage.write_byte(offset, value)
    }

    /// Feeds one write of the command protocol.
    ///
    /// A write that fits no sequence is reported and leaves the state as it
    /// was, so the game can still complete the sequence it started.
    pub fn write(&mut self, offset: u16, value: u8) -> Result<(), FlashError> {
        let unexpected = FlashError::UnexpectedWrite {
            state: self.state,
            offset,
            value,
        };

        // F0 resets from any command sequence.
        if value == 0xF0
            && !matches!(
                self.state,
                FlashState::Write | FlashState::WriteAtmel | FlashState::IsWriteAtmel
            )
        {
            self.id_mode = false;
            self.state = FlashState::Idle;
            return Ok(());
        }

        match (self.state, offset, value) {
            (FlashState::Idle | FlashState::RecvInit, COMMAND_ADDRESS_1, 0xAA) => {
                self.state = FlashState::RecvInit;
            }
            (FlashState::RecvInit, COMMAND_ADDRESS_2, 0x55) => self.state = FlashState::RecvCmd,
            (FlashState::RecvCmd, COMMAND_ADDRESS_1, command) => self.command(command, unexpected)?,

            (FlashState::Erase1, COMMAND_ADDRESS_1, 0xAA) => self.state = FlashState::Erase2,
            (FlashState::Erase2, COMMAND_ADDRESS_2, 0x55) => self.state = FlashState::Erase3,
            (FlashState::Erase3, COMMAND_ADDRESS_1, 0x10) => {
                self.state = FlashState::Idle;
                self.storage.erase_all()?;
                tracing::debug!("FLASH chip erased");
            }
            (FlashState::Erase3, sector, 0x30) => {
                self.state = FlashState::Idle;
                let start = self.storage_offset(sector & 0xF000);
                self.storage.erase(start, SECTOR_SIZE)?;
                tracing::trace!("FLASH sector 0x{start:05X} erased");
            }

            (FlashState::ReadId, COMMAND_ADDRESS_1, 0xAA) => self.state = FlashState::ReadIdExit1,
            (FlashState::ReadIdExit1, COMMAND_ADDRESS_2, 0x55) => {
                self.state = FlashState::ReadIdExit2;
            }

            (FlashState::Write, offset, value) => {
                self.write_data(offset, value)?;
                if self.chip == FlashChip::Atmel {
                    self.atmel_offset = offset.wrapping_add(1);
                    self.state = FlashState::IsWriteAtmel;
                } else {
                    self.state = FlashState::Idle;
                }
            }
            (FlashState::IsWriteAtmel, offset, value) if offset == self.atmel_offset => {
                self.write_data(offset, value)?;
                self.atmel_offset = offset.wrapping_add(1);
                self.atmel_remaining = ATMEL_PAGE_SIZE - 2;
                self.state = FlashState::WriteAtmel;
            }
            (FlashState::IsWriteAtmel, COMMAND_ADDRESS_1, 0xAA) => {
                // It was a single byte write after all.
                self.state = FlashState::RecvInit;
            }
            (FlashState::WriteAtmel, offset, value) => {
                self.write_data(offset, value)?;
                self.atmel_remaining -= 1;
                if self.atmel_remaining == 0 {
                    self.state = FlashState::Idle;
                }
            }

            (FlashState::BankSwitch, 0x0000, bank) if self.chip == FlashChip::Sanyo => {
                self.bank = usize::from(bank & 1);
                self.state = FlashState::Idle;
                tracing::trace!("FLASH bank {}", self.bank);
            }

            _ => {
                tracing::warn!("{unexpected}");
                return Err(unexpected);
            }
        }

        Ok(())
    }

    fn command(&mut self, command: u8, unexpected: FlashError) -> Result<(), FlashError> {
        self.state = match command {
            0x80 => FlashState::Erase1,
            0x90 => {
                self.id_mode = true;
                FlashState::ReadId
            }
            0xA0 => FlashState::Write,
            0xB0 if self.chip == FlashChip::Sanyo => FlashState::BankSwitch,
            _ => {
                tracing::warn!("{unexpected}");
                return Err(unexpected);
            }
        };

        Ok(())
    }
}
