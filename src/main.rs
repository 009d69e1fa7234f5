use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::Parser;
use emu::cpu::Cpu;
use emu::gba::Gba;
use tracing::info;
use tracing_subscriber::{EnvFilter, Layer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Runs a cartridge headless against the GBA memory bus, DMA and
/// interrupt hardware.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Cartridge ROM image.
    rom: PathBuf,

    /// BIOS image. Without it the machine starts at the cartridge entry point.
    #[arg(long)]
    bios: Option<PathBuf>,

    /// Save file of the cartridge backup chip [default: ROM path with .sav]
    #[arg(long)]
    save: Option<PathBuf>,

    /// Number of instructions to run.
    #[arg(long, default_value_t = 1_000_000)]
    ticks: u64,

    /// Also write logs to a daily rotated file in this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl Args {
    fn save_path(&self) -> PathBuf {
        self.save.clone().unwrap_or_else(|| self.rom.with_extension("sav"))
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let env_filter =
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter()));

    // Keeps the file writer alive until the end of main.
    let _guard = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "clementine-hw.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer)
                        .with_filter(env_filter()),
                )
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    };

    let rom = fs::read(&args.rom)?;
    let bios = args.bios.as_ref().map(fs::read).transpose()?;
    let save = args.save_path();

    let mut gba = Gba::new(bios.as_deref());
    let cartridge = gba.load_rom(Some(save.as_path()), rom);

    match &cartridge.header {
        Some(header) => info!("{} [{}]", header.game_title(), header.game_code()),
        None => info!("{} has no valid header", args.rom.display()),
    }
    info!("backup: {:?}, save file {}", cartridge.backup, save.display());
    if !cartridge.backup_available {
        tracing::warn!("the save file is unavailable, progress will not be kept");
    }

    let mut dma_faults = 0_u64;
    let mut interrupts = 0_u64;
    for _ in 0..args.ticks {
        let report = gba.tick();
        dma_faults += report.dma_faults.len() as u64;
        interrupts += u64::from(report.interrupt_dispatched);
    }

    info!(
        "ran {} instructions in {} cycles, PC 0x{:08X}",
        gba.cpu.executed_instructions,
        gba.cpu.cycles,
        gba.cpu.program_counter()
    );
    info!("{interrupts} interrupts dispatched, {dma_faults} DMA faults");

    Ok(())
}
