//! # Serial EEPROM
//!
//! The EEPROM sits on bit 0 of the cartridge bus at the top of the ROM area
//! and is driven one bit per halfword access, normally by DMA3.
//!
//! ```text
//! Read request:   1 1 <address, MSB first> 0
//! Read reply:     4 ignored bits, then 64 data bits MSB first
//! Write request:  1 0 <address, MSB first> <64 data bits> 0
//! ```
//!
//! Addresses are 6 bits wide on 512 byte chips and 14 bits wide on 8 KB
//! chips, of which only the low 10 select a row. The width is not visible in
//! the ROM, it is inferred from the length of the DMA that sends a request.
//! While idle, reads return 1 to report the chip as ready.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cartridge::storage::{BackupError, BackupStorage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressWidth {
    /// 512 bytes, 64 rows.
    Bits6,
    /// 8 KB, 1024 rows.
    Bits14,
}

impl AddressWidth {
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::Bits6 => 6,
            Self::Bits14 => 14,
        }
    }

    #[must_use]
    pub const fn capacity(self) -> usize {
        match self {
            Self::Bits6 => 0x200,
            Self::Bits14 => 0x2000,
        }
    }

    const fn row_mask(self) -> u16 {
        match self {
            Self::Bits6 => 0x3F,
            Self::Bits14 => 0x3FF,
        }
    }

    /// Width implied by a DMA of `count` halfwords into the chip: read
    /// requests are 2+N+1 bits, write requests 2+N+64+1 bits.
    #[must_use]
    pub const fn from_dma_length(count: u32) -> Option<Self> {
        match count {
            9 | 73 => Some(Self::Bits6),
            17 | 81 => Some(Self::Bits14),
            _ => None,
        }
    }

    /// Width of a chip whose save file is `size` bytes long.
    #[must_use]
    pub const fn from_save_size(size: u64) -> Self {
        if size > 0x200 { Self::Bits14 } else { Self::Bits6 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EepromState {
    Idle,
    /// First bit received, the second one selects read or write.
    ReceiveRequest,
    ReadRecvAddr,
    /// Waiting for the stop bit closing a read request.
    ReadRecvAddrAck,
    /// Four dummy bits preceding the data.
    ReadWaste,
    Read,
    WriteRecvAddr,
    Write,
    /// Waiting for the stop bit closing a write request.
    WriteAck,
}

#[derive(Debug)]
pub enum EepromError {
    UnexpectedBit { state: EepromState, bit: bool },
    Storage(BackupError),
}

impl fmt::Display for EepromError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedBit { state, bit } => {
                write!(f, "EEPROM: unexpected bit {} in {state:?}", u8::from(*bit))
            }
            Self::Storage(e) => write!(f, "EEPROM: {e}"),
        }
    }
}

impl std::error::Error for EepromError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::UnexpectedBit { .. } => None,
        }
    }
}

impl From<BackupError> for EepromError {
    fn from(e: BackupError) -> Self {
        Self::Storage(e)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Eeprom {
    storage: BackupStorage,
    width: AddressWidth,
    state: EepromState,
    /// Bits shifted in or out in the current state.
    bits: u32,
    address: u16,
    buffer: u64,
}

impl Eeprom {
    #[must_use]
    pub const fn new(storage: BackupStorage, width: AddressWidth) -> Self {
        Self {
            storage,
            width,
            state: EepromState::Idle,
            bits: 0,
            address: 0,
            buffer: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> EepromState {
        self.state
    }

    #[must_use]
    pub const fn width(&self) -> AddressWidth {
        self.width
    }

    #[must_use]
    pub const fn storage(&self) -> &BackupStorage {
        &self.storage
    }

    /// Adopts the width implied by a DMA of `count` units into the chip.
    pub fn observe_dma_length(&mut self, count: u32) -> Result<(), BackupError> {
        let Some(width) = AddressWidth::from_dma_length(count) else {
            return Ok(());
        };

        if width != self.width {
            tracing::info!("EEPROM address width set to {} bits", width.bits());
            self.width = width;
        }
        self.storage.resize(width.capacity())
    }

    fn row_offset(&self) -> usize {
        usize::from(self.address & self.width.row_mask()) * 8
    }

    /// Next bit sent by the chip.
    pub fn read_bit(&mut self) -> bool {
        match self.state {
            EepromState::ReadWaste => {
                self.bits += 1;
                if self.bits == 4 {
                    self.bits = 0;
                    self.state = EepromState::Read;
                }
                false
            }
            EepromState::Read => {
                let bit = (self.buffer >> (63 - self.bits)) & 1 == 1;
                self.bits += 1;
                if self.bits == 64 {
                    self.state = EepromState::Idle;
                }
                bit
            }
            _ => true,
        }
    }

    /// Shifts one bit into the chip.
    ///
    /// A bit the protocol does not allow is reported and leaves the state
    /// unchanged, except for a bad stop bit which cancels the request.
    pub fn write_bit(&mut self, bit: bool) -> Result<(), EepromError> {
        let unexpected = EepromError::UnexpectedBit {
            state: self.state,
            bit,
        };

        match self.state {
            EepromState::Idle => {
                if !bit {
                    return Err(unexpected);
                }
                self.state = EepromState::ReceiveRequest;
            }
            EepromState::ReceiveRequest => {
                self.address = 0;
                self.bits = 0;
                self.state = if bit {
                    EepromState::ReadRecvAddr
                } else {
                    EepromState::WriteRecvAddr
                };
            }
            EepromState::ReadRecvAddr | EepromState::WriteRecvAddr => {
                self.address = (self.address << 1) | u16::from(bit);
                self.bits += 1;
                if self.bits == self.width.bits() {
                    self.bits = 0;
                    if self.state == EepromState::ReadRecvAddr {
                        self.state = EepromState::ReadRecvAddrAck;
                    } else {
                        self.buffer = 0;
                        self.state = EepromState::Write;
                    }
                }
            }
            EepromState::ReadRecvAddrAck => {
                self.state = EepromState::Idle;
                if bit {
                    return Err(unexpected);
                }

                let mut row = [0; 8];
                self.storage.read(self.row_offset(), &mut row);
                self.buffer = u64::from_be_bytes(row);
                self.bits = 0;
                self.state = EepromState::ReadWaste;
            }
            EepromState::Write => {
                self.buffer = (self.buffer << 1) | u64::from(bit);
                self.bits += 1;
                if self.bits == 64 {
                    self.state = EepromState::WriteAck;
                }
            }
            EepromState::WriteAck => {
                self.state = EepromState::Idle;
                if bit {
                    return Err(unexpected);
                }

                let offset = self.row_offset();
                self.storage.write(offset, &self.buffer.to_be_bytes())?;
                tracing::trace!("EEPROM row {} written", offset / 8);
            }
            EepromState::ReadWaste | EepromState::Read => return Err(unexpected),
        }

        Ok(())
    }
}
