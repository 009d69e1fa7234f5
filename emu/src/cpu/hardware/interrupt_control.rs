//! # Interrupt control
//!
//! ```text
//! 0x04000200  2    R/W  IE        Interrupt Enable Register
//! 0x04000202  2    R/W  IF        Interrupt Request Flags / IRQ Acknowledge
//! 0x04000204  2    R/W  WAITCNT   Game Pak Waitstate Control
//! 0x04000208  2    R/W  IME       Interrupt Master Enable Register
//! 0x04000300  1    R/W  POSTFLG   Undocumented - Post Boot Flag
//! 0x04000301  1    W    HALTCNT   Undocumented - Power Down Control
//! ```
//!
//! IE and IF share the bit layout of [`Interrupt`]. The CPU acknowledges a
//! request by writing 1 to its IF bit; hardware raising a request goes
//! through the internal side of the bus, which stores bits as written.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::bus::Bus;
use crate::cpu::Cpu;
use crate::cpu::cpu_modes::Mode;
use crate::cpu::psr::CpuState;
use crate::cpu::registers::REG_LR;
use crate::memory::io_bus::{IoDevice, Visibility, interrupt_register_address};

const INTERRUPT_MASK: u16 = 0x3FFF;

pub const IE_ADDRESS: u32 = interrupt_register_address(0x0);
pub const IF_ADDRESS: u32 = interrupt_register_address(0x2);
pub const WAITCNT_ADDRESS: u32 = interrupt_register_address(0x4);
pub const IME_ADDRESS: u32 = interrupt_register_address(0x8);

/// Exception vector of IRQs.
const IRQ_VECTOR: u32 = 0x18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interrupt {
    VBlank = 0,
    HBlank = 1,
    VCount = 2,
    Timer0 = 3,
    Timer1 = 4,
    Timer2 = 5,
    Timer3 = 6,
    Serial = 7,
    Dma0 = 8,
    Dma1 = 9,
    Dma2 = 10,
    Dma3 = 11,
    Keypad = 12,
    GamePak = 13,
}

impl Interrupt {
    #[must_use]
    pub const fn mask(self) -> u16 {
        1 << self as u16
    }

    /// Completion interrupt of DMA `channel`.
    #[must_use]
    pub const fn dma(channel: usize) -> Self {
        match channel {
            0 => Self::Dma0,
            1 => Self::Dma1,
            2 => Self::Dma2,
            _ => Self::Dma3,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct InterruptRegisters {
    pub interrupt_enable: u16,
    /// Interrupt Request Flags (IF), bits are set when interrupts are requested,
    /// cleared by writing 1 to the corresponding bit
    pub interrupt_request: u16,
    pub wait_state_control: u16,
    pub interrupt_master_enable: u16,
    pub post_boot_flag: u8,
    pub power_down_control: u8,
}

impl IoDevice for InterruptRegisters {
    fn read_at(&self, offset: u32, _visibility: Visibility) -> u8 {
        match offset {
            0x0 => self.interrupt_enable.get_byte(0),
            0x1 => self.interrupt_enable.get_byte(1),
            0x2 => self.interrupt_request.get_byte(0),
            0x3 => self.interrupt_request.get_byte(1),
            0x4 => self.wait_state_control.get_byte(0),
            0x5 => self.wait_state_control.get_byte(1),
            0x8 => self.interrupt_master_enable.get_byte(0),
            0x100 => self.post_boot_flag,
            0x101 => self.power_down_control,
            _ => 0,
        }
    }

    fn write_at(&mut self, offset: u32, value: u8, visibility: Visibility) {
        match (offset, visibility) {
            (0x0, _) => self.interrupt_enable = self.interrupt_enable.set_byte(0, value),
            (0x1, _) => {
                self.interrupt_enable = self.interrupt_enable.set_byte(1, value) & INTERRUPT_MASK;
            }
            (0x2 | 0x3, Visibility::External) => {
                let acknowledged = u16::from(value) << (8 * (offset - 0x2));
                self.interrupt_request &= !acknowledged;
            }
            (0x2, Visibility::Internal) => {
                self.interrupt_request = self.interrupt_request.set_byte(0, value);
            }
            (0x3, Visibility::Internal) => {
                self.interrupt_request =
                    self.interrupt_request.set_byte(1, value) & INTERRUPT_MASK;
            }
            (0x4, _) => self.wait_state_control = self.wait_state_control.set_byte(0, value),
            (0x5, Visibility::External) => {
                // Bit 15, the cartridge type flag, is read-only.
                let kept = self.wait_state_control & 0x8000;
                self.wait_state_control =
                    kept | (self.wait_state_control.set_byte(1, value) & 0x7FFF);
            }
            (0x5, Visibility::Internal) => {
                self.wait_state_control = self.wait_state_control.set_byte(1, value);
            }
            (0x8, _) => self.interrupt_master_enable = u16::from(value & 1),
            (0x100, _) => self.post_boot_flag = value & 1,
            (0x101, _) => {
                tracing::debug!("HALTCNT 0x{value:02X} ignored, low power modes are not emulated");
                self.power_down_control = value;
            }
            _ => {}
        }
    }
}

impl Bus {
    /// Raises the request flag of `interrupt` in IF.
    pub fn request_interrupt(&mut self, interrupt: Interrupt) {
        let requests = self.io().read_half_word(IF_ADDRESS, Visibility::Internal);
        self.io_mut()
            .write_half_word(IF_ADDRESS, requests | interrupt.mask(), Visibility::Internal);
    }
}

/// Dispatches pending interrupts to the CPU.
///
/// At most one dispatch happens per executed instruction: after entering
/// the handler the controller waits for the CPU to step before checking
/// again, otherwise the same request would re-enter before the handler runs.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct InterruptController {
    waiting_for_instruction: bool,
}

impl InterruptController {
    /// Called after every CPU step.
    pub const fn instruction_executed(&mut self) {
        self.waiting_for_instruction = false;
    }

    /// True when IME is on and a requested interrupt is enabled.
    #[must_use]
    pub fn pending(bus: &Bus) -> bool {
        let io = bus.io();
        let master_enable = io.read_half_word(IME_ADDRESS, Visibility::Internal).get_bit(0);
        let enabled = io.read_half_word(IE_ADDRESS, Visibility::Internal);
        let requested = io.read_half_word(IF_ADDRESS, Visibility::Internal);

        master_enable && enabled & requested & INTERRUPT_MASK != 0
    }

    /// Enters the IRQ handler if an interrupt is pending and the CPU accepts
    /// it. Returns whether the CPU was interrupted.
    pub fn step<C: Cpu + ?Sized>(&mut self, cpu: &mut C, bus: &mut Bus) -> bool {
        if self.waiting_for_instruction || cpu.irq_disabled() || !Self::pending(bus) {
            return false;
        }

        let old_cpsr = cpu.cpsr();
        let return_address = cpu.program_counter().wrapping_add(4);

        let mut new_cpsr = old_cpsr;
        new_cpsr.set_mode(Mode::Irq);
        new_cpsr.set_cpu_state(CpuState::Arm);
        new_cpsr.clear_condition_flags();
        new_cpsr.set_irq_disable(true);

        cpu.set_cpsr(new_cpsr);
        cpu.set_spsr(Mode::Irq, old_cpsr);
        cpu.set_register(REG_LR, return_address);
        cpu.set_program_counter(IRQ_VECTOR);
        cpu.flush_pipeline();

        bus.enter_bios();
        self.waiting_for_instruction = true;

        tracing::trace!("IRQ entry, returning to 0x{return_address:08X}");
        true
    }
}
