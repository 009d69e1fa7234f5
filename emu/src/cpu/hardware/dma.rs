//! # DMA channels
//!
//! Four channels copy halfwords or words between bus addresses without the
//! CPU. Each one owns a 12 byte register block:
//!
//! ```text
//! 0x040000B0 + 0xC*n  4  W    DMAnSAD    Source Address
//! 0x040000B4 + 0xC*n  4  W    DMAnDAD    Destination Address
//! 0x040000B8 + 0xC*n  2  W    DMAnCNT_L  Word Count
//! 0x040000BA + 0xC*n  2  R/W  DMAnCNT_H  Control
//! ```
//!
//! Control (`CNT_H`):
//!
//! ```text
//! Bit   Expl.
//! 5-6   Dest Addr Control  (0=Increment,1=Decrement,2=Fixed,3=Increment/Reload)
//! 7-8   Source Adr Control (0=Increment,1=Decrement,2=Fixed,3=Prohibited)
//! 9     DMA Repeat                   (0=Off, 1=On)
//! 10    DMA Transfer Type            (0=16bit, 1=32bit)
//! 11    Game Pak DRQ  - DMA3 only -  (0=Normal, 1=DRQ <from> Game Pak, DMA3)
//! 12-13 DMA Start Timing  (0=Immediately, 1=VBlank, 2=HBlank, 3=Special)
//! 14    IRQ upon end of Word Count   (0=Disable, 1=Enable)
//! 15    DMA Enable                   (0=Off, 1=On)
//! ```
//!
//! A channel is a state machine stepped once per CPU instruction, moving one
//! unit per step while copying. Its running addresses and count live in the
//! channel, the registers are only read when the channel is armed or
//! repeats, so the CPU rewriting them mid-transfer has no effect until then.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bitwise::{Bits, read_le};
use crate::bus::Bus;
use crate::cpu::hardware::interrupt_control::Interrupt;
use crate::cpu::hardware::lcd::DisplayStatus;
use crate::memory::io_bus::{IoDevice, Visibility, dma_register_address};
use crate::memory::region::Region;
use crate::memory::wait_states::{Access, AccessCycles};

const SOURCE_OFFSET: u32 = 0x0;
const DESTINATION_OFFSET: u32 = 0x4;
const WORD_COUNT_OFFSET: u32 = 0x8;
const CONTROL_OFFSET: u32 = 0xA;

const DISPSTAT_ADDRESS: u32 = 0x0400_0004;

/// Register block of one channel, stored as the bytes the CPU sees.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmaRegisters([u8; 12]);

impl DmaRegisters {
    #[must_use]
    pub fn source_address(&self) -> u32 {
        read_le(&self.0, SOURCE_OFFSET as usize, 4)
    }

    #[must_use]
    pub fn destination_address(&self) -> u32 {
        read_le(&self.0, DESTINATION_OFFSET as usize, 4)
    }

    #[must_use]
    pub fn word_count(&self) -> u16 {
        read_le(&self.0, WORD_COUNT_OFFSET as usize, 2) as u16
    }

    #[must_use]
    pub fn control(&self) -> DmaControl {
        DmaControl(read_le(&self.0, CONTROL_OFFSET as usize, 2) as u16)
    }
}

impl IoDevice for DmaRegisters {
    fn read_at(&self, offset: u32, _visibility: Visibility) -> u8 {
        self.0.get(offset as usize).copied().unwrap_or(0)
    }

    fn write_at(&mut self, offset: u32, value: u8, _visibility: Visibility) {
        if let Some(byte) = self.0.get_mut(offset as usize) {
            *byte = value;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressControl {
    Increment,
    Decrement,
    Fixed,
    IncrementReload,
}

impl From<u16> for AddressControl {
    fn from(value: u16) -> Self {
        match value & 0b11 {
            0 => Self::Increment,
            1 => Self::Decrement,
            2 => Self::Fixed,
            _ => Self::IncrementReload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartTiming {
    Immediate,
    VBlank,
    HBlank,
    /// Sound FIFO for channels 1-2, video capture for channel 3.
    Special,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferWidth {
    HalfWord,
    Word,
}

impl TransferWidth {
    #[must_use]
    pub const fn bytes(self) -> u32 {
        match self {
            Self::HalfWord => 2,
            Self::Word => 4,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DmaControl(pub u16);

impl DmaControl {
    #[must_use]
    pub fn destination_control(self) -> AddressControl {
        self.0.get_bits(5..=6).into()
    }

    #[must_use]
    pub fn source_control(self) -> AddressControl {
        self.0.get_bits(7..=8).into()
    }

    #[must_use]
    pub fn repeat(self) -> bool {
        self.0.get_bit(9)
    }

    #[must_use]
    pub fn transfer_width(self) -> TransferWidth {
        if self.0.get_bit(10) {
            TransferWidth::Word
        } else {
            TransferWidth::HalfWord
        }
    }

    #[must_use]
    pub fn start_timing(self) -> StartTiming {
        match self.0.get_bits(12..=13) {
            0 => StartTiming::Immediate,
            1 => StartTiming::VBlank,
            2 => StartTiming::HBlank,
            _ => StartTiming::Special,
        }
    }

    #[must_use]
    pub fn irq_on_end(self) -> bool {
        self.0.get_bit(14)
    }

    #[must_use]
    pub fn enabled(self) -> bool {
        self.0.get_bit(15)
    }
}

/// Configurations a channel refuses to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DmaFault {
    /// Source address control 3 is prohibited.
    SourceReload { channel: usize },
    /// Sound FIFO and video capture transfers are not emulated.
    SpecialTiming { channel: usize },
}

impl fmt::Display for DmaFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceReload { channel } => {
                write!(f, "DMA{channel}: increment/reload source address control is prohibited")
            }
            Self::SpecialTiming { channel } => {
                write!(f, "DMA{channel}: special start timing is not supported")
            }
        }
    }
}

impl std::error::Error for DmaFault {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DmaState {
    Idle,
    /// Armed, waiting for the start condition.
    WaitingPaused,
    /// First unit of the transfer.
    Started,
    /// Remaining units.
    SeqCopy,
    Done,
    /// Reloading registers before waiting again.
    Repeat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmaChannel {
    index: usize,
    pub state: DmaState,
    source: u32,
    destination: u32,
    remaining: u32,
    /// Last value read, returned for reads the bus does not serve to DMA.
    latch: u32,
    /// Blanking flag seen on the previous step. Blanking starts need a
    /// rising edge.
    condition_seen: bool,
    pub cycles: u64,
}

const fn source_mask(channel: usize) -> u32 {
    if channel == 0 { 0x07FF_FFFF } else { 0x0FFF_FFFF }
}

const fn destination_mask(channel: usize) -> u32 {
    if channel == 3 { 0x0FFF_FFFF } else { 0x07FF_FFFF }
}

/// A zero word count means the maximum.
const fn decode_count(channel: usize, word_count: u16) -> u32 {
    let (mask, max) = if channel == 3 { (0xFFFF, 0x1_0000) } else { (0x3FFF, 0x4000) };
    match word_count as u32 & mask {
        0 => max,
        count => count,
    }
}

const fn step_address(address: u32, control: AddressControl, bytes: u32) -> u32 {
    match control {
        AddressControl::Increment | AddressControl::IncrementReload => address.wrapping_add(bytes),
        AddressControl::Decrement => address.wrapping_sub(bytes),
        AddressControl::Fixed => address,
    }
}

impl DmaChannel {
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self {
            index,
            state: DmaState::Idle,
            source: 0,
            destination: 0,
            remaining: 0,
            latch: 0,
            condition_seen: false,
            cycles: 0,
        }
    }

    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Units left in the current transfer.
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.remaining
    }

    #[must_use]
    pub const fn source(&self) -> u32 {
        self.source
    }

    #[must_use]
    pub const fn destination(&self) -> u32 {
        self.destination
    }

    fn control(&self, bus: &Bus) -> DmaControl {
        let address = dma_register_address(self.index, CONTROL_OFFSET);
        DmaControl(bus.io().read_half_word(address, Visibility::Internal))
    }

    fn load_count(&mut self, bus: &Bus) {
        let address = dma_register_address(self.index, WORD_COUNT_OFFSET);
        let word_count = bus.io().read_half_word(address, Visibility::Internal);
        self.remaining = decode_count(self.index, word_count);
    }

    fn load_destination(&mut self, bus: &Bus) {
        let address = dma_register_address(self.index, DESTINATION_OFFSET);
        let destination = bus.io().read_word(address, Visibility::Internal);
        self.destination = destination & destination_mask(self.index);
    }

    fn start_condition(&self, bus: &Bus, control: DmaControl) -> Result<bool, DmaFault> {
        let status = DisplayStatus {
            dispstat: bus.io().read_half_word(DISPSTAT_ADDRESS, Visibility::Internal),
            vcount: 0,
        };

        match control.start_timing() {
            StartTiming::Immediate => Ok(true),
            StartTiming::VBlank => Ok(status.vblank()),
            StartTiming::HBlank => Ok(status.hblank()),
            StartTiming::Special => Err(DmaFault::SpecialTiming { channel: self.index }),
        }
    }

    /// Advances the channel by one step.
    ///
    /// A fault leaves the channel where it was so the same configuration
    /// keeps being reported until the CPU changes it.
    pub fn step(&mut self, bus: &mut Bus) -> Result<(), DmaFault> {
        let control = self.control(bus);

        if self.state != DmaState::Idle && !control.enabled() {
            tracing::debug!("DMA{} aborted in {:?}", self.index, self.state);
            self.state = DmaState::Idle;
            return Ok(());
        }

        match self.state {
            DmaState::Idle => {
                if control.enabled() {
                    self.arm(bus, control)?;
                }
            }
            DmaState::WaitingPaused => {
                let condition = self.start_condition(bus, control)?;
                let rising =
                    control.start_timing() == StartTiming::Immediate || !self.condition_seen;
                if condition && rising {
                    self.state = DmaState::Started;
                }
                self.condition_seen = condition;
            }
            DmaState::Started => {
                if self.remaining == 0 {
                    self.state = DmaState::Done;
                } else {
                    self.transfer(bus, control, Access::NonSequential);
                    self.state = DmaState::SeqCopy;
                }
            }
            DmaState::SeqCopy => {
                if self.remaining == 0 {
                    self.state = DmaState::Done;
                } else {
                    self.transfer(bus, control, Access::Sequential);
                }
            }
            DmaState::Done => {
                if control.irq_on_end() {
                    bus.request_interrupt(Interrupt::dma(self.index));
                }

                if control.repeat() {
                    self.state = DmaState::Repeat;
                } else {
                    let address = dma_register_address(self.index, CONTROL_OFFSET);
                    let disabled = control.0.set_bit(15, false);
                    bus.io_mut().write_half_word(address, disabled, Visibility::Internal);
                    self.state = DmaState::Idle;
                }
            }
            DmaState::Repeat => {
                self.load_count(bus);
                if control.destination_control() == AddressControl::IncrementReload {
                    self.load_destination(bus);
                }
                // A blanking transfer waits for the next period, not the
                // current one. Immediate ones restart on the next step.
                self.condition_seen = true;
                self.state = DmaState::WaitingPaused;
            }
        }

        Ok(())
    }

    fn arm(&mut self, bus: &mut Bus, control: DmaControl) -> Result<(), DmaFault> {
        if control.source_control() == AddressControl::IncrementReload {
            return Err(DmaFault::SourceReload { channel: self.index });
        }

        // Faults leave the channel idle so it re-arms from the registers
        // once the CPU fixes the control word.
        let condition = self.start_condition(bus, control)?;

        let source = bus
            .io()
            .read_word(dma_register_address(self.index, SOURCE_OFFSET), Visibility::Internal);
        self.source = source & source_mask(self.index);
        self.load_destination(bus);
        self.load_count(bus);

        bus.notify_dma_transfer(self.destination, self.remaining);

        tracing::trace!(
            "DMA{} armed: 0x{:08X} -> 0x{:08X}, {} units of {:?}, {:?}",
            self.index,
            self.source,
            self.destination,
            self.remaining,
            control.transfer_width(),
            control.start_timing(),
        );

        self.condition_seen = false;
        self.state = if condition {
            DmaState::Started
        } else {
            DmaState::WaitingPaused
        };

        Ok(())
    }

    fn transfer(&mut self, bus: &mut Bus, control: DmaControl, access: Access) {
        let width = control.transfer_width();
        let mut cycles = AccessCycles::default();
        // BIOS and the unmapped space below EWRAM are not readable by DMA.
        let open_source = self.source < 0x0200_0000;

        match width {
            TransferWidth::HalfWord => {
                let value = if open_source {
                    (self.latch >> (8 * (self.source & 2))) as u16
                } else {
                    let value = bus.read_half_word(self.source & !1, &mut cycles, access);
                    self.latch = u32::from(value) * 0x0001_0001;
                    value
                };
                bus.write_half_word(self.destination & !1, value, &mut cycles, access);
            }
            TransferWidth::Word => {
                let value = if open_source {
                    self.latch
                } else {
                    let value = bus.read_word(self.source & !3, &mut cycles, access);
                    self.latch = value;
                    value
                };
                bus.write_word(self.destination & !3, value, &mut cycles, access);
            }
        }

        self.cycles += u64::from(cycles.0);
        self.remaining = self.remaining.saturating_sub(1);

        let bytes = width.bytes();
        self.source = if matches!(Region::from_address(self.source), Region::Rom(_)) {
            self.source.wrapping_add(bytes)
        } else {
            step_address(self.source, control.source_control(), bytes)
        };
        self.destination = step_address(self.destination, control.destination_control(), bytes);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dma {
    pub channels: [DmaChannel; 4],
}

impl Default for Dma {
    fn default() -> Self {
        Self {
            channels: std::array::from_fn(DmaChannel::new),
        }
    }
}

impl Dma {
    /// Steps every channel, lowest index first. Returns the faults raised.
    pub fn step(&mut self, bus: &mut Bus) -> Vec<DmaFault> {
        self.channels
            .iter_mut()
            .filter_map(|channel| channel.step(bus).err())
            .collect()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.channels.iter().any(|c| c.state != DmaState::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::Rng;

    use crate::cartridge::Backup;
    use crate::cartridge::eeprom::AddressWidth;
    use crate::cpu::hardware::interrupt_control::IF_ADDRESS;

    const ENABLE: u16 = 1 << 15;
    const IRQ: u16 = 1 << 14;
    const WORD: u16 = 1 << 10;
    const REPEAT: u16 = 1 << 9;

    fn setup(
        bus: &mut Bus,
        channel: usize,
        source: u32,
        destination: u32,
        count: u16,
        control: u16,
    ) {
        let io = bus.io_mut();
        io.write_word(dma_register_address(channel, 0x0), source, Visibility::External);
        io.write_word(dma_register_address(channel, 0x4), destination, Visibility::External);
        io.write_half_word(dma_register_address(channel, 0x8), count, Visibility::External);
        set_control(bus, channel, control);
    }

    fn set_control(bus: &mut Bus, channel: usize, control: u16) {
        bus.io_mut()
            .write_half_word(dma_register_address(channel, 0xA), control, Visibility::External);
    }

    fn write_word(bus: &mut Bus, address: u32, value: u32) {
        bus.write_word(address, value, &mut AccessCycles::default(), Access::NonSequential);
    }

    fn read_word(bus: &mut Bus, address: u32) -> u32 {
        bus.read_word(address, &mut AccessCycles::default(), Access::NonSequential)
    }

    fn control_register(bus: &Bus, channel: usize) -> u16 {
        bus.io()
            .read_half_word(dma_register_address(channel, 0xA), Visibility::External)
    }

    fn run_until_idle(dma: &mut Dma, bus: &mut Bus, channel: usize) -> usize {
        let mut steps = 0;
        loop {
            assert_eq!(dma.channels[channel].step(bus), Ok(()));
            steps += 1;
            if dma.channels[channel].state == DmaState::Idle {
                return steps;
            }
            assert!(steps < 0x2_0000, "DMA{channel} never finished");
        }
    }

    #[test]
    fn immediate_transfer_on_every_channel() {
        let mut rng = rand::thread_rng();

        for channel in 0..4 {
            let mut bus = Bus::default();
            let mut dma = Dma::default();
            let count: u16 = rng.gen_range(1..=32);
            let source = 0x0200_0000;
            let destination = 0x0300_1000;

            for i in 0..u32::from(count) {
                write_word(&mut bus, source + 4 * i, 0xA5A5_0000 | i);
            }

            setup(&mut bus, channel, source, destination, count, ENABLE | WORD | IRQ);
            let steps = run_until_idle(&mut dma, &mut bus, channel);

            // Arm, one step per unit, notice the end, complete.
            assert_eq!(steps, usize::from(count) + 3);
            for i in 0..u32::from(count) {
                assert_eq!(read_word(&mut bus, destination + 4 * i), 0xA5A5_0000 | i);
            }
            assert_eq!(read_word(&mut bus, destination + 4 * u32::from(count)), 0);
            assert_eq!(control_register(&bus, channel) & ENABLE, 0);
            assert_eq!(
                bus.io().read_half_word(IF_ADDRESS, Visibility::External),
                Interrupt::dma(channel).mask()
            );
        }
    }

    #[test]
    fn no_interrupt_unless_requested() {
        let mut bus = Bus::default();
        let mut dma = Dma::default();
        setup(&mut bus, 1, 0x0200_0000, 0x0200_0100, 4, ENABLE);
        run_until_idle(&mut dma, &mut bus, 1);

        assert_eq!(bus.io().read_half_word(IF_ADDRESS, Visibility::External), 0);
    }

    #[test]
    fn clearing_enable_aborts() {
        let mut bus = Bus::default();
        let mut dma = Dma::default();
        for i in 0..8 {
            write_word(&mut bus, 0x0200_0000 + 4 * i, 0xFFFF_FFFF);
        }
        setup(&mut bus, 2, 0x0200_0000, 0x0300_0000, 8, ENABLE | WORD | IRQ);

        let channel = &mut dma.channels[2];
        for _ in 0..4 {
            channel.step(&mut bus).unwrap();
        }
        assert_eq!(channel.state, DmaState::SeqCopy);

        bus.io_mut()
            .write_half_word(dma_register_address(2, 0xA), WORD, Visibility::External);
        channel.step(&mut bus).unwrap();

        assert_eq!(channel.state, DmaState::Idle);
        assert_eq!(read_word(&mut bus, 0x0300_0008), 0xFFFF_FFFF);
        assert_eq!(read_word(&mut bus, 0x0300_000C), 0);
        assert_eq!(bus.io().read_half_word(IF_ADDRESS, Visibility::External), 0);
    }

    #[test]
    fn zero_count_means_maximum() {
        let mut bus = Bus::default();
        let mut dma = Dma::default();
        setup(&mut bus, 0, 0x0200_0000, 0x0300_0000, 0, ENABLE);
        setup(&mut bus, 3, 0x0200_0000, 0x0300_0000, 0, ENABLE);
        dma.step(&mut bus);

        assert_eq!(dma.channels[0].remaining(), 0x4000);
        assert_eq!(dma.channels[3].remaining(), 0x1_0000);
    }

    #[test]
    fn addresses_are_masked_per_channel() {
        let mut bus = Bus::default();
        let mut dma = Dma::default();
        setup(&mut bus, 0, 0xFFFF_FFFF, 0xFFFF_FFFF, 1, ENABLE);
        setup(&mut bus, 3, 0xFFFF_FFFF, 0xFFFF_FFFF, 1, ENABLE);
        dma.step(&mut bus);

        assert_eq!(dma.channels[0].source(), 0x07FF_FFFF);
        assert_eq!(dma.channels[0].destination(), 0x07FF_FFFF);
        assert_eq!(dma.channels[3].source(), 0x0FFF_FFFF);
        assert_eq!(dma.channels[3].destination(), 0x0FFF_FFFF);
    }

    #[test]
    fn decrementing_source_into_fixed_destination() {
        let mut bus = Bus::default();
        let mut dma = Dma::default();
        let control = ENABLE | (1 << 7) | (2 << 5);
        let mut cycles = AccessCycles::default();
        bus.write_half_word(0x0200_0010, 0x1111, &mut cycles, Access::NonSequential);
        bus.write_half_word(0x0200_000E, 0x2222, &mut cycles, Access::NonSequential);
        setup(&mut bus, 1, 0x0200_0010, 0x0300_0000, 2, control);
        run_until_idle(&mut dma, &mut bus, 1);

        let last = bus.read_half_word(0x0300_0000, &mut cycles, Access::NonSequential);
        assert_eq!(last, 0x2222);
        assert_eq!(dma.channels[1].source(), 0x0200_000C);
        assert_eq!(dma.channels[1].destination(), 0x0300_0000);
    }

    #[test]
    fn vblank_transfer_waits_for_blanking() {
        let mut bus = Bus::default();
        let mut dma = Dma::default();
        setup(&mut bus, 1, 0x0200_0000, 0x0300_0000, 1, ENABLE | (1 << 12));

        dma.step(&mut bus);
        dma.step(&mut bus);
        assert_eq!(dma.channels[1].state, DmaState::WaitingPaused);

        bus.set_display_status(true, false);
        dma.step(&mut bus);
        assert_eq!(dma.channels[1].state, DmaState::Started);
    }

    #[test]
    fn repeat_reloads_count_and_waits_again() {
        let mut bus = Bus::default();
        let mut dma = Dma::default();
        let control = ENABLE | REPEAT | (2 << 12) | (3 << 5);
        setup(&mut bus, 2, 0x0200_0000, 0x0300_0000, 2, control);
        bus.set_display_status(false, true);

        let channel = &mut dma.channels[2];
        // Arm straight into Started, two units, Done, Repeat.
        for _ in 0..5 {
            channel.step(&mut bus).unwrap();
        }
        assert_eq!(channel.state, DmaState::Repeat);
        assert_eq!(channel.destination(), 0x0300_0004);

        channel.step(&mut bus).unwrap();
        assert_eq!(channel.state, DmaState::WaitingPaused);
        assert_eq!(channel.remaining(), 2);
        assert_eq!(channel.destination(), 0x0300_0000);

        // Still in the same HBlank.
        channel.step(&mut bus).unwrap();
        assert_eq!(channel.state, DmaState::WaitingPaused);

        bus.set_display_status(false, false);
        channel.step(&mut bus).unwrap();
        bus.set_display_status(false, true);
        channel.step(&mut bus).unwrap();
        assert_eq!(channel.state, DmaState::Started);
        assert_ne!(control_register(&bus, 2) & ENABLE, 0);
    }

    #[test]
    fn prohibited_source_control_is_reported() {
        let mut bus = Bus::default();
        let mut dma = Dma::default();
        setup(&mut bus, 0, 0x0200_0000, 0x0300_0000, 4, ENABLE | (3 << 7));

        assert_eq!(dma.step(&mut bus), vec![DmaFault::SourceReload { channel: 0 }]);
        assert_eq!(dma.channels[0].state, DmaState::Idle);
    }

    #[test]
    fn special_timing_is_reported() {
        let mut bus = Bus::default();
        let mut dma = Dma::default();
        setup(&mut bus, 1, 0x0200_0000, 0x0400_00A0, 4, ENABLE | (3 << 12));

        assert_eq!(dma.step(&mut bus), vec![DmaFault::SpecialTiming { channel: 1 }]);
        assert_eq!(dma.step(&mut bus), vec![DmaFault::SpecialTiming { channel: 1 }]);
        assert_eq!(dma.channels[1].state, DmaState::Idle);
    }

    #[test]
    fn rejected_channel_arms_from_the_registers_once_fixed() {
        let mut bus = Bus::default();
        let mut dma = Dma::default();
        write_word(&mut bus, 0x0200_0000, 0x0123_4567);
        write_word(&mut bus, 0x0200_0004, 0x89AB_CDEF);
        setup(&mut bus, 1, 0x0200_0000, 0x0300_0000, 2, ENABLE | (3 << 12));
        assert_eq!(dma.step(&mut bus), vec![DmaFault::SpecialTiming { channel: 1 }]);

        // Immediate timing, enable bit left set.
        set_control(&mut bus, 1, ENABLE | WORD);
        let steps = run_until_idle(&mut dma, &mut bus, 1);

        assert_eq!(steps, 2 + 3);
        assert_eq!(read_word(&mut bus, 0x0300_0000), 0x0123_4567);
        assert_eq!(read_word(&mut bus, 0x0300_0004), 0x89AB_CDEF);
        assert_eq!(read_word(&mut bus, 0x0300_0008), 0);
        assert_eq!(dma.channels[1].remaining(), 0);
    }

    #[test]
    fn immediate_repeat_restarts_until_disabled() {
        let mut bus = Bus::default();
        let mut dma = Dma::default();
        for i in 0..8 {
            write_word(&mut bus, 0x0200_0000 + 4 * i, i + 1);
        }
        setup(&mut bus, 0, 0x0200_0000, 0x0300_0000, 1, ENABLE | WORD | REPEAT);

        let channel = &mut dma.channels[0];
        let mut starts = 0;
        for _ in 0..20 {
            channel.step(&mut bus).unwrap();
            if channel.state == DmaState::Started {
                starts += 1;
            }
        }

        // Started, SeqCopy, Done, Repeat, WaitingPaused for every unit.
        assert_eq!(starts, 4);
        for i in 0..4 {
            assert_eq!(read_word(&mut bus, 0x0300_0000 + 4 * i), i + 1);
        }
        assert_ne!(control_register(&bus, 0) & ENABLE, 0);
        assert!(dma.is_active());

        set_control(&mut bus, 0, WORD | REPEAT);
        dma.step(&mut bus);
        assert!(!dma.is_active());
    }

    #[test]
    fn bios_source_reads_latched_value() {
        let mut bus = Bus::default();
        let mut dma = Dma::default();
        write_word(&mut bus, 0x0200_0000, 0x1234_5678);
        setup(&mut bus, 0, 0x0200_0000, 0x0300_0000, 1, ENABLE | WORD);
        run_until_idle(&mut dma, &mut bus, 0);

        setup(&mut bus, 0, 0x0000_0000, 0x0300_0010, 1, ENABLE | WORD);
        run_until_idle(&mut dma, &mut bus, 0);

        assert_eq!(read_word(&mut bus, 0x0300_0010), 0x1234_5678);
    }

    #[test]
    fn rom_source_always_increments() {
        let mut bus = Bus::default();
        let mut dma = Dma::default();
        let rom: Vec<u8> = (0..16).collect();
        bus.load_rom(None, rom);

        // Fixed source control.
        setup(&mut bus, 3, 0x0800_0000, 0x0300_0000, 2, ENABLE | WORD | (2 << 7));
        run_until_idle(&mut dma, &mut bus, 3);

        assert_eq!(read_word(&mut bus, 0x0300_0004), 0x0706_0504);
    }

    /// Copies `bits` to EWRAM as halfwords and sends them to the EEPROM
    /// window through DMA3.
    fn send_eeprom_bits(bus: &mut Bus, dma: &mut Dma, bits: &[u16]) {
        let mut cycles = AccessCycles::default();
        for (i, &bit) in (0u32..).zip(bits) {
            bus.write_half_word(0x0200_0000 + 2 * i, bit, &mut cycles, Access::NonSequential);
        }
        setup(bus, 3, 0x0200_0000, 0x0D00_0000, bits.len() as u16, ENABLE);
        run_until_idle(dma, bus, 3);
    }

    fn msb_first(value: u64, bits: u32) -> impl Iterator<Item = u16> {
        (0..bits).rev().map(move |i| ((value >> i) & 1) as u16)
    }

    #[test]
    fn eeprom_width_follows_dma3_length() {
        let mut bus = Bus::default();
        let mut dma = Dma::default();
        let mut rom = vec![0; 0x1000];
        rom[0x400..0x40B].copy_from_slice(b"EEPROM_V126");
        bus.load_rom(None, rom);

        let row = 0x0123_4567_89AB_CDEF_u64;
        let address = 0x2A5;

        let mut write: Vec<u16> = vec![1, 0];
        write.extend(msb_first(address, 14));
        write.extend(msb_first(row, 64));
        write.push(0);
        assert_eq!(write.len(), 81);
        send_eeprom_bits(&mut bus, &mut dma, &write);

        let Backup::Eeprom(eeprom) = bus.cartridge().backup() else {
            panic!("EEPROM not detected");
        };
        assert_eq!(eeprom.width(), AddressWidth::Bits14);
        assert_eq!(eeprom.storage().len(), AddressWidth::Bits14.capacity());

        let mut read: Vec<u16> = vec![1, 1];
        read.extend(msb_first(address, 14));
        read.push(0);
        assert_eq!(read.len(), 17);
        send_eeprom_bits(&mut bus, &mut dma, &read);

        setup(&mut bus, 3, 0x0D00_0000, 0x0200_1000, 68, ENABLE);
        run_until_idle(&mut dma, &mut bus, 3);

        let mut cycles = AccessCycles::default();
        let received: Vec<u16> = (0..68)
            .map(|i| bus.read_half_word(0x0200_1000 + 2 * i, &mut cycles, Access::NonSequential))
            .collect();
        assert_eq!(&received[..4], &[0, 0, 0, 0]);
        let value = received[4..].iter().fold(0u64, |acc, &b| (acc << 1) | u64::from(b));
        assert_eq!(value, row);
    }
}
