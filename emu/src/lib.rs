#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::cast_possible_wrap)]
pub mod bitwise;

#[allow(clippy::missing_panics_doc)]
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::large_stack_frames)]
#[allow(clippy::unreadable_literal)]
pub mod bus;

#[allow(clippy::cast_possible_truncation)]
pub mod cartridge;
pub mod cpu;
pub mod gba;

#[allow(clippy::cast_possible_truncation)]
pub mod memory;
