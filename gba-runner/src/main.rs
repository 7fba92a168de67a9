use std::fs::{self, File};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::Parser;

use gba_core::{calculate_frame_checksum, Backup, Cartridge, Gba};

#[derive(Debug, Parser)]
struct Args {
    /// Cartridge ROM image
    rom: String,

    /// Optional 16 KiB BIOS image; without one the core boots straight to
    /// the cartridge
    #[clap(long)]
    bios: Option<String>,

    /// Stop after this many frames (runs forever otherwise)
    #[clap(short, long)]
    frames: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let save_file_name = format!("{}.sav", args.rom);

    let rom_data = fs::read(&args.rom)
        .map_err(|_| anyhow!("failed to open ROM file \"{}\"", args.rom))?;

    let save_data: Option<Backup> = File::open(&save_file_name)
        .ok()
        .map(serde_cbor::from_reader)
        .transpose()
        .with_context(|| format!("failed to parse save file {save_file_name}"))?;

    match &save_data {
        Some(_) => log::info!("restored save data from {save_file_name}"),
        None => log::info!("no usable save data at {save_file_name}"),
    }

    let cartridge = Cartridge::with_backup(&rom_data, save_data)?;
    let mut gba = Gba::new(cartridge);

    if let Some(bios_path) = &args.bios {
        let bios_data = fs::read(bios_path)
            .map_err(|_| anyhow!("failed to open BIOS file \"{}\"", bios_path))?;
        gba.load_bios(&bios_data)?;
        log::info!("BIOS loaded from {bios_path}");
    }

    let start = Instant::now();

    match args.frames {
        Some(frames) => {
            for _ in 0..frames {
                gba.run_frame();
                // Audio is produced regardless of a sink; drop it.
                gba.take_audio_samples();
            }

            let elapsed = start.elapsed();
            println!(
                "{} frames in {:.2?} ({:.1} fps)",
                gba.frame_count(),
                elapsed,
                gba.frame_count() as f64 / elapsed.as_secs_f64()
            );
            println!("frame checksum: {:016X}", calculate_frame_checksum(&gba));

            log::info!("writing save data to {save_file_name}");
            let save_file = File::create(&save_file_name)
                .with_context(|| format!("failed to create {save_file_name}"))?;
            serde_cbor::to_writer(save_file, gba.bus().cartridge.backup())
                .map_err(|error| anyhow!("failed to write save data: {error}"))?;
        }
        None => loop {
            gba.run_frame();
            gba.take_audio_samples();
        },
    }

    Ok(())
}
