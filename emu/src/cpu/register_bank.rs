//! Storage for registers swapped out on mode changes.
//!
//! Each exception mode owns its R13, R14 and SPSR; FIQ also banks R8-R12.
//! The registers of the mode being left are saved here and the ones of the
//! mode being entered are loaded into the visible register file.

use serde::{Deserialize, Serialize};

use crate::cpu::cpu_modes::Mode;
use crate::cpu::psr::Psr;

/// R13/R14 pair plus SPSR of one exception mode.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
pub struct ModeBank {
    pub r13: u32,
    pub r14: u32,
    pub spsr: Psr,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RegisterBank {
    /// R8-R14 of User/System, saved while in FIQ mode.
    pub user_r8_r12: [u32; 5],
    pub user_r13: u32,
    pub user_r14: u32,

    /// R8-R12 of FIQ mode.
    pub fiq_r8_r12: [u32; 5],

    pub fiq: ModeBank,
    pub svc: ModeBank,
    pub abt: ModeBank,
    pub irq: ModeBank,
    pub und: ModeBank,
}

impl RegisterBank {
    /// The exception bank of `mode`, `None` for User and System.
    #[must_use]
    pub const fn bank(&self, mode: Mode) -> Option<&ModeBank> {
        match mode {
            Mode::User | Mode::System => None,
            Mode::Fiq => Some(&self.fiq),
            Mode::Irq => Some(&self.irq),
            Mode::Supervisor => Some(&self.svc),
            Mode::Abort => Some(&self.abt),
            Mode::Undefined => Some(&self.und),
        }
    }

    pub const fn bank_mut(&mut self, mode: Mode) -> Option<&mut ModeBank> {
        match mode {
            Mode::User | Mode::System => None,
            Mode::Fiq => Some(&mut self.fiq),
            Mode::Irq => Some(&mut self.irq),
            Mode::Supervisor => Some(&mut self.svc),
            Mode::Abort => Some(&mut self.abt),
            Mode::Undefined => Some(&mut self.und),
        }
    }
}
