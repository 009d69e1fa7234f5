use serde::{Deserialize, Serialize};

use crate::bus::Bus;
use crate::cpu::Cpu;
use crate::cpu::cpu_modes::Mode;
use crate::cpu::psr::{CpuState, Psr};
use crate::cpu::register_bank::RegisterBank;
use crate::cpu::registers::{REG_LR, REG_SP, Registers};
use crate::memory::wait_states::{Access, AccessCycles};

/// ARM7TDMI register file with mode banking.
///
/// `step` fetches the next opcode and advances the program counter without
/// executing it. That exercises the bus exactly as a real fetch does (BIOS
/// read protection, wait states, sequential bursts) and lets the rest of the
/// hardware run against a CPU whose registers behave like the real ones.
#[derive(Serialize, Deserialize)]
pub struct Arm7tdmi {
    pub cpsr: Psr,
    pub registers: Registers,
    pub register_bank: RegisterBank,

    /// Last fetched opcode, Thumb opcodes are zero-extended.
    pub last_opcode: u32,
    pub executed_instructions: u64,
    pub cycles: u64,

    /// False right after a flush: the next fetch is non-sequential.
    sequential_fetch: bool,
}

impl Default for Arm7tdmi {
    fn default() -> Self {
        let mut cpsr = Psr::from(Mode::Supervisor);
        cpsr.set_irq_disable(true);
        cpsr.set_fiq_disable(true);
        cpsr.set_cpu_state(CpuState::Arm);

        Self {
            cpsr,
            registers: Registers::default(),
            register_bank: RegisterBank::default(),
            last_opcode: 0,
            executed_instructions: 0,
            cycles: 0,
            sequential_fetch: false,
        }
    }
}

/// User and System see the same registers.
const fn shares_bank(a: Mode, b: Mode) -> bool {
    matches!(
        (a, b),
        (Mode::User | Mode::System, Mode::User | Mode::System)
    ) || a as u32 == b as u32
}

impl Arm7tdmi {
    /// State after the BIOS hands control to the cartridge.
    #[must_use]
    pub fn skip_bios() -> Self {
        let mut cpu = Self::default();
        cpu.switch_mode(Mode::Irq);
        cpu.registers.set_register_at(REG_SP, 0x0300_7FA0);
        cpu.switch_mode(Mode::Supervisor);
        cpu.registers.set_register_at(REG_SP, 0x0300_7FE0);
        cpu.switch_mode(Mode::System);
        cpu.registers.set_register_at(REG_SP, 0x0300_7F00);
        cpu.cpsr.set_irq_disable(false);
        cpu.cpsr.set_fiq_disable(false);
        cpu.registers.set_program_counter(0x0800_0000);
        cpu
    }

    /// Stores the banked registers of the current mode to the register bank.
    fn store_registers_in_bank(&mut self) {
        let mode = self.cpsr.mode();
        let r13 = self.registers.register_at(REG_SP);
        let r14 = self.registers.register_at(REG_LR);

        if mode == Mode::Fiq {
            for (i, reg) in self.register_bank.fiq_r8_r12.iter_mut().enumerate() {
                *reg = self.registers.register_at(8 + i);
            }
        }

        if let Some(bank) = self.register_bank.bank_mut(mode) {
            bank.r13 = r13;
            bank.r14 = r14;
        } else {
            self.register_bank.user_r13 = r13;
            self.register_bank.user_r14 = r14;
        }
    }

    /// Restores the banked registers of `mode` from the register bank.
    fn restore_registers_from_bank(&mut self, mode: Mode) {
        if mode == Mode::Fiq {
            for (i, reg) in self.register_bank.fiq_r8_r12.into_iter().enumerate() {
                self.registers.set_register_at(8 + i, reg);
            }
        }

        let (r13, r14) = self.register_bank.bank(mode).map_or(
            (self.register_bank.user_r13, self.register_bank.user_r14),
            |bank| (bank.r13, bank.r14),
        );
        self.registers.set_register_at(REG_SP, r13);
        self.registers.set_register_at(REG_LR, r14);
    }

    /// Changes mode keeping the rest of the CPSR.
    pub fn switch_mode(&mut self, new_mode: Mode) {
        let old_mode = self.cpsr.mode();
        if !shares_bank(old_mode, new_mode) {
            self.store_registers_in_bank();

            if old_mode == Mode::Fiq {
                for (i, reg) in self.register_bank.user_r8_r12.into_iter().enumerate() {
                    self.registers.set_register_at(8 + i, reg);
                }
            } else if new_mode == Mode::Fiq {
                for (i, reg) in self.register_bank.user_r8_r12.iter_mut().enumerate() {
                    *reg = self.registers.register_at(8 + i);
                }
            }

            self.restore_registers_from_bank(new_mode);
        }

        self.cpsr.set_mode(new_mode);
    }

    fn fetch(&mut self, bus: &mut Bus) {
        let pc = self.registers.program_counter();
        let state = self.cpsr.cpu_state();
        let access = if self.sequential_fetch {
            Access::Sequential
        } else {
            Access::NonSequential
        };

        let mut cycles = AccessCycles::default();
        self.last_opcode = match state {
            CpuState::Arm => bus.fetch_word(pc, &mut cycles, access),
            CpuState::Thumb => u32::from(bus.fetch_half_word(pc, &mut cycles, access)),
        };

        self.registers.advance_program_counter(state.instruction_size());
        self.sequential_fetch = true;
        self.cycles += u64::from(cycles.0);
    }
}

impl Cpu for Arm7tdmi {
    fn step(&mut self, bus: &mut Bus) {
        self.fetch(bus);
        self.executed_instructions += 1;
    }

    fn cpsr(&self) -> Psr {
        self.cpsr
    }

    fn set_cpsr(&mut self, psr: Psr) {
        self.switch_mode(psr.mode());
        self.cpsr = psr;
    }

    fn spsr(&self, mode: Mode) -> Option<Psr> {
        self.register_bank.bank(mode).map(|bank| bank.spsr)
    }

    fn set_spsr(&mut self, mode: Mode, psr: Psr) {
        match self.register_bank.bank_mut(mode) {
            Some(bank) => bank.spsr = psr,
            None => tracing::debug!("ignoring SPSR write in {mode:?} mode"),
        }
    }

    fn register(&self, index: usize) -> u32 {
        self.registers.register_at(index)
    }

    fn set_register(&mut self, index: usize, value: u32) {
        self.registers.set_register_at(index, value);
    }

    fn program_counter(&self) -> u32 {
        self.registers.program_counter()
    }

    fn set_program_counter(&mut self, value: u32) {
        self.registers.set_program_counter(value);
    }

    fn flush_pipeline(&mut self) {
        self.sequential_fetch = false;
    }
}
