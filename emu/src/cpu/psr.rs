//! # Program Status Registers (CPSR and SPSR)
//!
//! ```text
//! 31 30 29 28 27 26      8 7 6 5 4   0
//! ┌──┬──┬──┬──┬──┬────────┬─┬─┬─┬─────┐
//! │N │Z │C │V │Q │Reserved│I│F│T│Mode │
//! └──┴──┴──┴──┴──┴────────┴─┴─┴─┴─────┘
//! ```
//!
//! The interrupt controller reads the I bit to gate dispatch and, on IRQ
//! entry, saves the CPSR into `SPSR_irq` before rewriting mode, state and
//! flags.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::cpu::cpu_modes::Mode;

/// Program Status Register (CPSR or SPSR).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Psr(u32);

impl Psr {
    /// N, Z, C and V as the low nibble, N being bit 3.
    #[must_use]
    pub const fn condition_flags(self) -> u8 {
        (self.0 >> 28) as u8
    }

    /// I => Bit 7, (0=Enable, 1=Disable)
    #[must_use]
    pub fn irq_disable(self) -> bool {
        self.0.get_bit(7)
    }

    /// F => Bit 6, (0=Enable, 1=Disable)
    #[must_use]
    pub fn fiq_disable(self) -> bool {
        self.0.get_bit(6)
    }

    /// T => Bit 5, (0=ARM, 1=THUMB)
    #[must_use]
    pub fn state_bit(self) -> bool {
        self.0.get_bit(5)
    }

    /// M4-M0 => Bits 4-0
    ///
    /// The BIOS sometimes writes invalid mode values to an SPSR, those read
    /// back as Supervisor.
    #[must_use]
    pub fn mode(self) -> Mode {
        let mode_bits = self.0 & 0b11111;
        Mode::try_from(mode_bits).unwrap_or_else(|e| {
            tracing::debug!("{e} in PSR=0x{:08X}, defaulting to Supervisor", self.0);
            Mode::Supervisor
        })
    }

    pub const fn set_condition_flags(&mut self, nzcv: u8) {
        self.0 = (self.0 & 0x0FFF_FFFF) | ((nzcv as u32 & 0xF) << 28);
    }

    /// Clears N, Z, C and V.
    pub const fn clear_condition_flags(&mut self) {
        self.set_condition_flags(0);
    }

    pub fn set_irq_disable(&mut self, value: bool) {
        self.0 = self.0.set_bit(7, value);
    }

    pub fn set_fiq_disable(&mut self, value: bool) {
        self.0 = self.0.set_bit(6, value);
    }

    pub fn set_state_bit(&mut self, value: bool) {
        self.0 = self.0.set_bit(5, value);
    }

    /// The Mode Bits M4-M0 contain the current operating mode.
    pub const fn set_mode(&mut self, m: Mode) {
        self.0 &= !0b1_1111;
        self.0 |= m as u32;
    }

    #[must_use]
    pub fn cpu_state(self) -> CpuState {
        self.state_bit().into()
    }

    pub fn set_cpu_state(&mut self, state: CpuState) {
        self.set_state_bit(state.into());
    }
}

impl From<Mode> for Psr {
    fn from(m: Mode) -> Self {
        let mut s = Self(0);
        s.set_mode(m);
        s
    }
}

impl From<u32> for Psr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Psr> for u32 {
    fn from(p: Psr) -> Self {
        p.0
    }
}

/// The CPU execution state, controlled by the T bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    /// 16-bit instructions.
    Thumb,
    /// 32-bit instructions.
    Arm,
}

impl CpuState {
    #[must_use]
    pub const fn instruction_size(self) -> u32 {
        match self {
            Self::Arm => 4,
            Self::Thumb => 2,
        }
    }
}

impl From<CpuState> for bool {
    fn from(state: CpuState) -> Self {
        match state {
            CpuState::Arm => false,
            CpuState::Thumb => true,
        }
    }
}

impl From<bool> for CpuState {
    fn from(state: bool) -> Self {
        if state { Self::Thumb } else { Self::Arm }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn condition_flags_live_in_the_top_nibble() {
        let mut cpsr = Psr::from(Mode::System);
        cpsr.set_condition_flags(0b1010);
        assert_eq!(u32::from(cpsr), 0xA000_001F);
        assert_eq!(cpsr.condition_flags(), 0b1010);

        cpsr.clear_condition_flags();
        assert_eq!(u32::from(cpsr), 0x0000_001F);
    }

    #[test]
    fn check_irq_disable() {
        let mut cpsr = Psr::from(Mode::User);
        cpsr.set_irq_disable(true);
        assert!(cpsr.irq_disable());
        assert!(!cpsr.fiq_disable());
        assert_eq!(cpsr.mode(), Mode::User);
    }

    #[test]
    fn check_mode_switch_keeps_other_bits() {
        let mut cpsr = Psr::from(0x6000_00BF);
        cpsr.set_mode(Mode::Irq);
        assert_eq!(u32::from(cpsr), 0x6000_00B2);
        assert_eq!(cpsr.mode(), Mode::Irq);
        assert_eq!(cpsr.cpu_state(), CpuState::Thumb);
    }

    #[test]
    fn invalid_mode_reads_as_supervisor() {
        assert_eq!(Psr::from(0).mode(), Mode::Supervisor);
    }
}
