//! The CPU seen from the hardware around it.
//!
//! Instruction decoding is outside this crate. What the bus, DMA and the
//! interrupt controller need from a CPU is captured by [`Cpu`]: stepping
//! through the bus and the register-level operations performed on IRQ entry.

#[allow(clippy::module_name_repetitions)]
pub mod arm7tdmi;
pub mod cpu_modes;

#[allow(clippy::cast_possible_truncation)]
pub mod hardware;
pub mod psr;
pub mod register_bank;
pub mod registers;

use crate::bus::Bus;
use crate::cpu::cpu_modes::Mode;
use crate::cpu::psr::Psr;

pub trait Cpu {
    /// Executes one instruction, accessing memory through `bus`.
    fn step(&mut self, bus: &mut Bus);

    fn cpsr(&self) -> Psr;

    /// Replaces the CPSR, swapping banked registers when the mode changes.
    fn set_cpsr(&mut self, psr: Psr);

    /// SPSR of `mode`, `None` for User and System.
    fn spsr(&self, mode: Mode) -> Option<Psr>;

    /// Writes the SPSR of `mode`. Ignored for User and System.
    fn set_spsr(&mut self, mode: Mode, psr: Psr);

    /// Register `index` as seen in the current mode.
    fn register(&self, index: usize) -> u32;

    fn set_register(&mut self, index: usize, value: u32);

    /// Address of the next instruction to fetch.
    fn program_counter(&self) -> u32;

    fn set_program_counter(&mut self, value: u32);

    /// Discards prefetched instructions after a jump.
    fn flush_pipeline(&mut self);

    fn irq_disabled(&self) -> bool {
        self.cpsr().irq_disable()
    }
}
