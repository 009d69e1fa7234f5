//! # I/O register bus
//!
//! Routes accesses in `0x0400_0000-0x0400_03FF` to the device owning the
//! register. Every registered range carries two access policies: one for
//! the CPU and DMA ([`Visibility::External`]) and one for the emulated
//! hardware itself ([`Visibility::Internal`]). Hardware uses the internal
//! side to update read-only status bits or raise interrupt flags without
//! going through the clear-on-write semantics the CPU sees.
//!
//! Wide accesses are decomposed into byte accesses, low byte first.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cpu::hardware::dma::DmaRegisters;
use crate::cpu::hardware::interrupt_control::InterruptRegisters;
use crate::cpu::hardware::lcd::DisplayStatus;

/// Which side of the bus performs an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    /// CPU or DMA.
    External,
    /// The hardware owning the register.
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessControl {
    None,
    Read,
    Write,
    ReadWrite,
}

impl AccessControl {
    #[must_use]
    pub const fn can_read(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    #[must_use]
    pub const fn can_write(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

/// Peripherals this crate only stores registers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Peripheral {
    LcdControl,
    Sound,
    Timers,
    Serial,
    Keypad,
}

impl Peripheral {
    const ALL: [Self; 5] = [
        Self::LcdControl,
        Self::Sound,
        Self::Timers,
        Self::Serial,
        Self::Keypad,
    ];

    /// First address and size of the register block.
    const fn block(self) -> (u32, usize) {
        match self {
            Self::LcdControl => (0x0400_0000, 0x58),
            Self::Sound => (0x0400_0060, 0x50),
            Self::Timers => (0x0400_0100, 0x10),
            Self::Serial => (0x0400_0120, 0x40),
            Self::Keypad => (0x0400_0130, 0x04),
        }
    }
}

/// Device answering a registered address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceId {
    DisplayStatus,
    Dma(usize),
    InterruptControl,
    Peripheral(Peripheral),
}

/// A device mapped on the I/O bus. Offsets are relative to the device's
/// first register.
pub trait IoDevice {
    fn read_at(&self, offset: u32, visibility: Visibility) -> u8;

    fn write_at(&mut self, offset: u32, value: u8, visibility: Visibility);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Registration {
    low: u32,
    high: u32,
    device: DeviceId,
    /// Device offset that `low` maps to.
    device_offset: u32,
    external: AccessControl,
    internal: AccessControl,
}

impl Registration {
    const fn access(&self, visibility: Visibility) -> AccessControl {
        match visibility {
            Visibility::External => self.external,
            Visibility::Internal => self.internal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoBusError {
    Overlap { low: u32, high: u32 },
    EmptyRange { low: u32, high: u32 },
}

impl fmt::Display for IoBusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overlap { low, high } => {
                write!(f, "I/O range 0x{low:08X}-0x{high:08X} overlaps an existing registration")
            }
            Self::EmptyRange { low, high } => {
                write!(f, "I/O range 0x{low:08X}-0x{high:08X} is empty")
            }
        }
    }
}

impl std::error::Error for IoBusError {}

/// Plain storage for registers whose behaviour is not emulated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterFile(Vec<u8>);

impl RegisterFile {
    fn new(size: usize) -> Self {
        Self(vec![0; size])
    }
}

impl IoDevice for RegisterFile {
    fn read_at(&self, offset: u32, _visibility: Visibility) -> u8 {
        self.0.get(offset as usize).copied().unwrap_or(0)
    }

    fn write_at(&mut self, offset: u32, value: u8, _visibility: Visibility) {
        if let Some(byte) = self.0.get_mut(offset as usize) {
            *byte = value;
        }
    }
}

const DMA_BASE: u32 = 0x0400_00B0;
const DMA_STRIDE: u32 = 0xC;

/// Interrupt, wait state and power registers share one device, POSTFLG and
/// HALTCNT sit 0x100 bytes after IE.
const INTERRUPT_BASE: u32 = 0x0400_0200;

#[derive(Serialize, Deserialize)]
pub struct IoBus {
    registrations: Vec<Registration>,
    pub display: DisplayStatus,
    pub dma: [DmaRegisters; 4],
    pub interrupts: InterruptRegisters,
    peripherals: Vec<RegisterFile>,
}

impl Default for IoBus {
    fn default() -> Self {
        Self::new()
    }
}

impl IoBus {
    #[must_use]
    pub fn new() -> Self {
        use AccessControl::{Read, ReadWrite, Write};

        let mut bus = Self {
            registrations: Vec::new(),
            display: DisplayStatus::default(),
            dma: Default::default(),
            interrupts: InterruptRegisters::default(),
            peripherals: Peripheral::ALL
                .iter()
                .map(|p| RegisterFile::new(p.block().1))
                .collect(),
        };

        // KEYINPUT idles with every button released.
        bus.peripherals[Peripheral::Keypad as usize].0[..2].copy_from_slice(&[0xFF, 0x03]);

        let lcd = DeviceId::Peripheral(Peripheral::LcdControl);
        let sound = DeviceId::Peripheral(Peripheral::Sound);
        let timers = DeviceId::Peripheral(Peripheral::Timers);
        let serial = DeviceId::Peripheral(Peripheral::Serial);
        let keypad = DeviceId::Peripheral(Peripheral::Keypad);

        let mut map = vec![
            // DISPCNT, green swap.
            (lcd, 0x0400_0000, 0x0400_0003, 0, ReadWrite, ReadWrite),
            // DISPSTAT, then VCOUNT which only the LCD writes.
            (DeviceId::DisplayStatus, 0x0400_0004, 0x0400_0005, 0, ReadWrite, ReadWrite),
            (DeviceId::DisplayStatus, 0x0400_0006, 0x0400_0007, 2, Read, ReadWrite),
            (lcd, 0x0400_0008, 0x0400_0057, 8, ReadWrite, ReadWrite),
            (sound, 0x0400_0060, 0x0400_00AF, 0, ReadWrite, ReadWrite),
            (timers, 0x0400_0100, 0x0400_010F, 0, ReadWrite, ReadWrite),
            (serial, 0x0400_0120, 0x0400_012F, 0, ReadWrite, ReadWrite),
            (keypad, 0x0400_0130, 0x0400_0131, 0, Read, ReadWrite),
            (keypad, 0x0400_0132, 0x0400_0133, 2, ReadWrite, ReadWrite),
            (serial, 0x0400_0134, 0x0400_015F, 0x14, ReadWrite, ReadWrite),
            // IE, IF, WAITCNT.
            (DeviceId::InterruptControl, 0x0400_0200, 0x0400_0205, 0, ReadWrite, ReadWrite),
            (DeviceId::InterruptControl, 0x0400_0208, 0x0400_020B, 8, ReadWrite, ReadWrite),
            // POSTFLG, HALTCNT.
            (DeviceId::InterruptControl, 0x0400_0300, 0x0400_0300, 0x100, ReadWrite, ReadWrite),
            (DeviceId::InterruptControl, 0x0400_0301, 0x0400_0301, 0x101, Write, ReadWrite),
        ];

        for channel in 0..4 {
            let base = DMA_BASE + DMA_STRIDE * channel as u32;
            // SAD, DAD and word count are write-only for the CPU.
            map.push((DeviceId::Dma(channel), base, base + 9, 0, Write, ReadWrite));
            map.push((DeviceId::Dma(channel), base + 10, base + 11, 10, ReadWrite, ReadWrite));
        }

        for (device, low, high, offset, external, internal) in map {
            if let Err(e) = bus.register_device(device, low, high, offset, external, internal) {
                tracing::error!("{e}");
            }
        }

        bus
    }

    /// Maps `low..=high` to `device`, `low` being `device_offset` inside it.
    pub fn register_device(
        &mut self,
        device: DeviceId,
        low: u32,
        high: u32,
        device_offset: u32,
        external: AccessControl,
        internal: AccessControl,
    ) -> Result<(), IoBusError> {
        if high < low {
            return Err(IoBusError::EmptyRange { low, high });
        }

        let index = self.registrations.partition_point(|r| r.high < low);
        if self.registrations.get(index).is_some_and(|r| r.low <= high) {
            return Err(IoBusError::Overlap { low, high });
        }

        self.registrations.insert(
            index,
            Registration {
                low,
                high,
                device,
                device_offset,
                external,
                internal,
            },
        );

        Ok(())
    }

    fn lookup(&self, address: u32) -> Option<&Registration> {
        let index = self.registrations.partition_point(|r| r.high < address);
        self.registrations.get(index).filter(|r| r.low <= address)
    }

    fn device(&self, device: DeviceId) -> &dyn IoDevice {
        match device {
            DeviceId::DisplayStatus => &self.display,
            DeviceId::Dma(channel) => &self.dma[channel],
            DeviceId::InterruptControl => &self.interrupts,
            DeviceId::Peripheral(p) => &self.peripherals[p as usize],
        }
    }

    fn device_mut(&mut self, device: DeviceId) -> &mut dyn IoDevice {
        match device {
            DeviceId::DisplayStatus => &mut self.display,
            DeviceId::Dma(channel) => &mut self.dma[channel],
            DeviceId::InterruptControl => &mut self.interrupts,
            DeviceId::Peripheral(p) => &mut self.peripherals[p as usize],
        }
    }

    /// Unregistered or unreadable registers read as zero.
    #[must_use]
    pub fn read_byte(&self, address: u32, visibility: Visibility) -> u8 {
        let Some(registration) = self.lookup(address) else {
            tracing::debug!("read from unmapped I/O address 0x{address:08X}");
            return 0;
        };

        if !registration.access(visibility).can_read() {
            return 0;
        }

        let offset = address - registration.low + registration.device_offset;
        self.device(registration.device).read_at(offset, visibility)
    }

    /// Writes to unregistered or read-only registers are dropped.
    pub fn write_byte(&mut self, address: u32, value: u8, visibility: Visibility) {
        let Some(registration) = self.lookup(address).copied() else {
            tracing::debug!("write of 0x{value:02X} to unmapped I/O address 0x{address:08X}");
            return;
        };

        if !registration.access(visibility).can_write() {
            return;
        }

        let offset = address - registration.low + registration.device_offset;
        self.device_mut(registration.device).write_at(offset, value, visibility);
    }

    #[must_use]
    pub fn read_half_word(&self, address: u32, visibility: Visibility) -> u16 {
        u16::from_le_bytes([
            self.read_byte(address, visibility),
            self.read_byte(address.wrapping_add(1), visibility),
        ])
    }

    #[must_use]
    pub fn read_word(&self, address: u32, visibility: Visibility) -> u32 {
        u32::from(self.read_half_word(address, visibility))
            | (u32::from(self.read_half_word(address.wrapping_add(2), visibility)) << 16)
    }

    pub fn write_half_word(&mut self, address: u32, value: u16, visibility: Visibility) {
        let [low, high] = value.to_le_bytes();
        self.write_byte(address, low, visibility);
        self.write_byte(address.wrapping_add(1), high, visibility);
    }

    pub fn write_word(&mut self, address: u32, value: u32, visibility: Visibility) {
        self.write_half_word(address, value as u16, visibility);
        self.write_half_word(address.wrapping_add(2), (value >> 16) as u16, visibility);
    }
}

#[must_use]
pub const fn dma_register_address(channel: usize, offset: u32) -> u32 {
    DMA_BASE + DMA_STRIDE * channel as u32 + offset
}

#[must_use]
pub const fn interrupt_register_address(offset: u32) -> u32 {
    INTERRUPT_BASE + offset
}
