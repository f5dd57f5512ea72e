use std::fs::File;
use std::path::PathBuf;

use clap::Parser;
use spg293_core::system::System;

mod audio;
mod camera_host;
mod config;
mod emulator;
mod image;
mod input;
mod overlay;
mod signals;
mod storage;
mod video;

/// SPG293 SoC emulator front end.
#[derive(Parser)]
struct Cli {
    /// Path to the boot image (ELF or raw NOR dump).
    boot_image: PathBuf,

    /// Optional SD card backing image.
    #[arg(long)]
    sd_image: Option<PathBuf>,

    /// Display scale factor.
    #[arg(long)]
    scale: Option<u32>,

    /// Directory to read/write save-state slots.
    #[arg(long)]
    save_dir: Option<PathBuf>,

    /// V4L2 camera device path (e.g. /dev/video0). Omit for a synthetic
    /// test-pattern source.
    #[arg(long)]
    camera_device: Option<String>,

    /// Request VGA (640x480) camera frames instead of QCIF (176x144).
    #[arg(long)]
    camera_vga: bool,
}

fn main() {
    let cli = Cli::parse();
    let config = config::Config::load();

    let scale = cli.scale.unwrap_or(config.scale);
    let save_dir = cli.save_dir.unwrap_or_else(|| config.save_dir());
    let camera_device = cli.camera_device.or(config.camera_device);

    let mut system = System::<File>::new();
    if let Err(e) = image::load_boot_image(&mut system, &cli.boot_image) {
        eprintln!("Failed to load boot image: {e}");
        std::process::exit(1);
    }

    if let Some(sd_path) = &cli.sd_image {
        match storage::open_sd_image(sd_path) {
            Ok(card) => system.sd.insert_card(card),
            Err(e) => {
                eprintln!("Warning: failed to open SD image {}: {e}", sd_path.display());
            }
        }
    }

    emulator::run(&mut system, save_dir, camera_device.as_deref(), cli.camera_vga, scale);
}
