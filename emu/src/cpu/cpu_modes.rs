//! # ARM7TDMI Operating Modes
//!
//! | Mode       | Bits    | Banked registers     |
//! |------------|---------|----------------------|
//! | User       | `10000` | -                    |
//! | FIQ        | `10001` | R8-R14, SPSR_fiq     |
//! | IRQ        | `10010` | R13-R14, SPSR_irq    |
//! | Supervisor | `10011` | R13-R14, SPSR_svc    |
//! | Abort      | `10111` | R13-R14, SPSR_abt    |
//! | Undefined  | `11011` | R13-R14, SPSR_und    |
//! | System     | `11111` | - (shares User bank) |

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// The normal ARM program execution state.
    User = 0b10000,

    /// Designed to support a data transfer or channel process.
    Fiq = 0b10001,

    /// Used for general-purpose interrupt handling.
    Irq = 0b10010,

    /// Protected mode for the operating system
    Supervisor = 0b10011,

    /// Entered after a data or instruction prefetch abort.
    Abort = 0b10111,

    /// Entered when an undefined instruction is executed
    Undefined = 0b11011,

    /// A privileged user mode for the operating system.
    System = 0b11111,
}

impl Mode {
    /// User and System share one register bank and have no SPSR.
    #[must_use]
    pub const fn has_spsr(self) -> bool {
        !matches!(self, Self::User | Self::System)
    }
}

impl From<Mode> for u32 {
    fn from(m: Mode) -> Self {
        m as Self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidMode(pub u32);

impl fmt::Display for InvalidMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unexpected mode bits 0b{:05b}", self.0)
    }
}

impl std::error::Error for InvalidMode {}

impl TryFrom<u32> for Mode {
    type Error = InvalidMode;

    fn try_from(n: u32) -> Result<Self, Self::Error> {
        match n {
            0b10000 => Ok(Self::User),
            0b10001 => Ok(Self::Fiq),
            0b10010 => Ok(Self::Irq),
            0b10011 => Ok(Self::Supervisor),
            0b10111 => Ok(Self::Abort),
            0b11011 => Ok(Self::Undefined),
            0b11111 => Ok(Self::System),
            _ => Err(InvalidMode(n)),
        }
    }
}
