use std::path::Path;

use crate::bus::Bus;
use crate::cartridge::CartridgeInfo;
use crate::cpu::Cpu;
use crate::cpu::arm7tdmi::Arm7tdmi;
use crate::cpu::hardware::dma::{Dma, DmaFault};
use crate::cpu::hardware::interrupt_control::InterruptController;

/// What happened during one [`Gba::tick`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StepReport {
    /// Unsupported DMA configurations met this tick. The channels stay
    /// armed and report again on the next tick.
    pub dma_faults: Vec<DmaFault>,
    pub interrupt_dispatched: bool,
}

/// The CPU and the hardware sharing its bus.
pub struct Gba<C: Cpu = Arm7tdmi> {
    pub cpu: C,
    pub bus: Bus,
    pub dma: Dma,
    pub interrupts: InterruptController,
}

impl Gba<Arm7tdmi> {
    /// Boots through `bios` when one is given. Without it the machine starts
    /// in the state the BIOS leaves when jumping to the cartridge.
    #[must_use]
    pub fn new(bios: Option<&[u8]>) -> Self {
        let mut bus = Bus::default();
        let cpu = match bios {
            Some(bios) => {
                bus.load_bios(bios);
                Arm7tdmi::default()
            }
            None => {
                bus.skip_bios();
                Arm7tdmi::skip_bios()
            }
        };

        Self::from_parts(cpu, bus)
    }
}

impl<C: Cpu> Gba<C> {
    pub fn from_parts(cpu: C, bus: Bus) -> Self {
        Self {
            cpu,
            bus,
            dma: Dma::default(),
            interrupts: InterruptController::default(),
        }
    }

    pub fn load_rom(&mut self, save_path: Option<&Path>, rom: Vec<u8>) -> CartridgeInfo {
        self.bus.load_rom(save_path, rom)
    }

    /// One instruction, then one step of every DMA channel, then the
    /// interrupt check.
    pub fn tick(&mut self) -> StepReport {
        self.cpu.step(&mut self.bus);
        self.interrupts.instruction_executed();

        let dma_faults = self.dma.step(&mut self.bus);
        for fault in &dma_faults {
            tracing::warn!("{fault}");
        }

        let interrupt_dispatched = self.interrupts.step(&mut self.cpu, &mut self.bus);

        StepReport {
            dma_faults,
            interrupt_dispatched,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::cpu_modes::Mode;
    use crate::cpu::hardware::interrupt_control::{IE_ADDRESS, IF_ADDRESS, IME_ADDRESS, Interrupt};
    use crate::memory::io_bus::{Visibility, dma_register_address};
    use crate::memory::wait_states::{Access, AccessCycles};
    use pretty_assertions::assert_eq;

    fn setup_dma(
        gba: &mut Gba,
        channel: usize,
        source: u32,
        destination: u32,
        count: u16,
        control: u16,
    ) {
        let io = gba.bus.io_mut();
        io.write_word(dma_register_address(channel, 0), source, Visibility::External);
        io.write_word(dma_register_address(channel, 4), destination, Visibility::External);
        io.write_half_word(dma_register_address(channel, 8), count, Visibility::External);
        io.write_half_word(dma_register_address(channel, 10), control, Visibility::External);
    }

    fn enable_interrupts(gba: &mut Gba, mask: u16) {
        let io = gba.bus.io_mut();
        io.write_half_word(IE_ADDRESS, mask, Visibility::External);
        io.write_half_word(IME_ADDRESS, 1, Visibility::External);
    }

    #[test]
    fn starts_after_bios_without_image() {
        let mut gba = Gba::new(None);
        gba.load_rom(None, vec![0x11, 0x22, 0x33, 0x44]);

        assert_eq!(gba.cpu.program_counter(), 0x0800_0000);
        assert_eq!(gba.cpu.cpsr().mode(), Mode::System);

        let report = gba.tick();
        assert_eq!(report, StepReport::default());
        assert_eq!(gba.cpu.last_opcode, 0x4433_2211);
        assert_eq!(gba.cpu.program_counter(), 0x0800_0004);
    }

    #[test]
    fn boots_from_bios_image() {
        let mut gba = Gba::new(Some(&[0x78, 0x56, 0x34, 0x12]));
        assert_eq!(gba.cpu.program_counter(), 0);

        gba.tick();
        assert_eq!(gba.cpu.last_opcode, 0x1234_5678);
        assert_eq!(
            gba.bus.read_word(0, &mut AccessCycles::default(), Access::NonSequential),
            0x1234_5678
        );
    }

    #[test]
    fn dma_completion_interrupts_the_cpu_once() {
        let mut gba = Gba::new(None);
        gba.load_rom(None, vec![0; 0x100]);
        enable_interrupts(&mut gba, Interrupt::Dma3.mask());

        let mut cycles = AccessCycles::default();
        gba.bus.write_word(0x0200_0000, 0xCAFE_BABE, &mut cycles, Access::NonSequential);
        gba.bus.write_word(0x0200_0004, 0x0BAD_F00D, &mut cycles, Access::NonSequential);
        // Enable, IRQ on end, 32 bit.
        setup_dma(&mut gba, 3, 0x0200_0000, 0x0300_0000, 2, 0x8000 | 0x4000 | 0x0400);

        let dispatches: Vec<bool> = (0..8).map(|_| gba.tick().interrupt_dispatched).collect();
        assert_eq!(dispatches.iter().filter(|&&d| d).count(), 1);

        assert_eq!(gba.cpu.cpsr().mode(), Mode::Irq);
        assert!(gba.cpu.cpsr().irq_disable());
        assert_eq!(
            gba.bus.io().read_half_word(IF_ADDRESS, Visibility::External),
            Interrupt::Dma3.mask()
        );
        assert_eq!(
            gba.bus.read_word(0x0300_0004, &mut cycles, Access::NonSequential),
            0x0BAD_F00D
        );
        assert!(!gba.dma.is_active());
    }

    #[test]
    fn masked_cpu_is_not_interrupted() {
        let mut gba = Gba::new(None);
        gba.load_rom(None, vec![0; 0x100]);
        enable_interrupts(&mut gba, Interrupt::VBlank.mask());

        let mut cpsr = gba.cpu.cpsr();
        cpsr.set_irq_disable(true);
        gba.cpu.set_cpsr(cpsr);
        gba.bus.request_interrupt(Interrupt::VBlank);

        assert!(!gba.tick().interrupt_dispatched);
        assert_eq!(gba.cpu.cpsr().mode(), Mode::System);
    }

    #[test]
    fn unsupported_dma_is_reported_every_tick() {
        let mut gba = Gba::new(None);
        gba.load_rom(None, vec![0; 0x100]);
        // Special start timing on channel 1.
        setup_dma(&mut gba, 1, 0x0200_0000, 0x0400_00A0, 4, 0x8000 | (3 << 12));

        for _ in 0..3 {
            assert_eq!(gba.tick().dma_faults, vec![DmaFault::SpecialTiming { channel: 1 }]);
        }

        gba.bus
            .io_mut()
            .write_half_word(dma_register_address(1, 10), 0, Visibility::External);
        assert!(gba.tick().dma_faults.is_empty());
    }
}
