//! Hand-rolled error enums per failure domain. No `thiserror`/`anyhow`,
//! matching the teacher's own crates.

use std::fmt;

#[derive(Debug)]
pub enum LoaderError {
    BadElfMagic,
    NoLoadSegment,
    NorOutOfRamWindow { load_addr: u32, entry: u32 },
    ImageTooShort,
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoaderError::BadElfMagic => write!(f, "not a valid little-endian 32-bit ELF image"),
            LoaderError::NoLoadSegment => write!(f, "ELF image has no PT_LOAD segment"),
            LoaderError::NorOutOfRamWindow { load_addr, entry } => write!(
                f,
                "NOR header load address 0x{load_addr:08x} or entry 0x{entry:08x} falls outside the RAM window"
            ),
            LoaderError::ImageTooShort => write!(f, "firmware image is too short to contain a valid header"),
        }
    }
}

impl std::error::Error for LoaderError {}

#[derive(Debug)]
pub enum SaveStateError {
    TagMismatch { expected: &'static str, found: String },
    UnexpectedEof,
}

impl fmt::Display for SaveStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveStateError::TagMismatch { expected, found } => {
                write!(f, "savestate tag mismatch: expected \"{expected}\", found \"{found}\"")
            }
            SaveStateError::UnexpectedEof => write!(f, "savestate stream ended unexpectedly"),
        }
    }
}

impl std::error::Error for SaveStateError {}

/// Print a `"never fatal"` diagnostic for an out-of-bounds or otherwise
/// recoverable peripheral fault, in the style of the original device's own
/// `printf` diagnostics.
pub fn diagnostic(component: &str, msg: fmt::Arguments) {
    eprintln!("[{component}] {msg}");
}

#[macro_export]
macro_rules! diag {
    ($component:expr, $($arg:tt)*) => {
        $crate::error::diagnostic($component, format_args!($($arg)*))
    };
}
