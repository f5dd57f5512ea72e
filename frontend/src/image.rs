//! Boot image loading: reads a file from disk and hands it to `System`'s
//! ELF or NOR loader depending on the magic bytes at its head, keeping
//! `std::fs` out of the core crate per §4.12's loader boundary.

use spg293_core::error::LoaderError;
use spg293_core::system::System;
use std::io::{Read, Seek, Write};
use std::path::Path;

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

pub fn load_boot_image<S: Read + Write + Seek>(system: &mut System<S>, path: &Path) -> Result<(), String> {
    let bytes = std::fs::read(path).map_err(|e| format!("failed to read {}: {e}", path.display()))?;

    let result = if bytes.get(0..4) == Some(&ELF_MAGIC) {
        system.load_elf(&bytes)
    } else {
        system.load_nor(&bytes)
    };

    result.map_err(|e| describe_loader_error(&e))
}

fn describe_loader_error(e: &LoaderError) -> String {
    match e {
        LoaderError::BadElfMagic => "not a valid ELF image".to_string(),
        LoaderError::NoLoadSegment => "ELF image has no LOAD segment".to_string(),
        LoaderError::ImageTooShort => "image is too short to contain a valid header".to_string(),
        LoaderError::NorOutOfRamWindow { load_addr, entry } => {
            format!("image load address 0x{load_addr:08x} or entry 0x{entry:08x} falls outside the RAM window")
        }
    }
}
