//! Owns the `std::fs` calls the core crate deliberately stays free of:
//! opening the SD card backing image and the save-state slot files.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use spg293_core::sdcard::SdCard;

/// Sector size the SD card model pads its backing file to.
const FILE_ALIGNMENT: u64 = 512;

/// Opens `path` read/write and wraps it as an `SdCard<File>`, padding the
/// file up to a 512-byte boundary first if needed.
pub fn open_sd_image(path: &Path) -> io::Result<SdCard<File>> {
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    let len = file.metadata()?.len();
    let padded = len.div_ceil(FILE_ALIGNMENT) * FILE_ALIGNMENT;
    if padded != len {
        file.set_len(padded)?;
    }
    Ok(SdCard::new(file, padded))
}

pub fn save_slot_path(save_dir: &Path, slot: u8) -> PathBuf {
    save_dir.join(format!("slot_{slot}.sav"))
}
