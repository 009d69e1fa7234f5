pub mod dma;
pub mod interrupt_control;
pub mod lcd;
