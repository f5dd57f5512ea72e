//! Firmware image loaders: a minimal 32-bit little-endian ELF reader for the
//! stock firmware's `LOAD` segment plus symbol table, and the 32-byte raw
//! NOR header format. Both operate on in-memory byte slices only — no
//! `std::fs`, matching the host-I/O boundary the SD card module already
//! established.

use crate::error::LoaderError;
use std::collections::HashMap;

const ELF_MAGIC: [u8; 8] = [0x7F, b'E', b'L', b'F', 0x01, 0x01, 0x01, 0x00];
const PT_LOAD: u32 = 1;
const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;

/// Where execution should begin and what RAM state it begins in.
pub struct LoadedImage {
    pub entry: u32,
    pub load_addr: u32,
    pub stack: Option<u32>,
    pub data: Vec<u8>,
    /// name -> address and address -> name, built from the ELF symbol table.
    /// Empty for NOR images, which carry no symbols.
    pub symbols_by_name: HashMap<String, u32>,
    pub symbols_by_addr: HashMap<u32, String>,
}

fn read_u16le(b: &[u8], off: usize) -> Option<u16> {
    b.get(off..off + 2).map(|s| u16::from_le_bytes([s[0], s[1]]))
}

fn read_u32le(b: &[u8], off: usize) -> Option<u32> {
    b.get(off..off + 4).map(|s| u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
}

/// Parses a little-endian 32-bit ELF image, extracting its single `LOAD`
/// segment and (if present) the symbol/string table pair.
pub fn load_elf(image: &[u8]) -> Result<LoadedImage, LoaderError> {
    if image.len() < 52 {
        return Err(LoaderError::ImageTooShort);
    }
    if image[0..8] != ELF_MAGIC {
        return Err(LoaderError::BadElfMagic);
    }

    let entry = read_u32le(image, 0x18).ok_or(LoaderError::ImageTooShort)?;
    let phoff = read_u32le(image, 0x1C).ok_or(LoaderError::ImageTooShort)? as usize;
    let shoff = read_u32le(image, 0x20).ok_or(LoaderError::ImageTooShort)? as usize;
    let phentsize = read_u16le(image, 0x2A).ok_or(LoaderError::ImageTooShort)? as usize;
    let phnum = read_u16le(image, 0x2C).ok_or(LoaderError::ImageTooShort)? as usize;
    let shentsize = read_u16le(image, 0x2E).ok_or(LoaderError::ImageTooShort)? as usize;
    let shnum = read_u16le(image, 0x30).ok_or(LoaderError::ImageTooShort)? as usize;
    let shstrndx = read_u16le(image, 0x32).ok_or(LoaderError::ImageTooShort)? as usize;

    let mut load_addr = None;
    let mut data = Vec::new();
    for i in 0..phnum {
        let base = phoff + i * phentsize;
        let p_type = read_u32le(image, base).ok_or(LoaderError::ImageTooShort)?;
        if p_type != PT_LOAD {
            continue;
        }
        let p_offset = read_u32le(image, base + 0x04).ok_or(LoaderError::ImageTooShort)? as usize;
        let p_vaddr = read_u32le(image, base + 0x08).ok_or(LoaderError::ImageTooShort)?;
        let p_filesz = read_u32le(image, base + 0x10).ok_or(LoaderError::ImageTooShort)? as usize;
        let p_memsz = read_u32le(image, base + 0x14).ok_or(LoaderError::ImageTooShort)? as usize;

        let file_bytes = image.get(p_offset..p_offset + p_filesz).ok_or(LoaderError::ImageTooShort)?;
        let mut seg = vec![0u8; p_memsz];
        seg[..p_filesz].copy_from_slice(file_bytes);
        load_addr = Some(p_vaddr);
        data = seg;
        break;
    }
    let load_addr = load_addr.ok_or(LoaderError::NoLoadSegment)?;

    let _ = shstrndx; // section-name string table, irrelevant to symbol lookup
    let (symbols_by_name, symbols_by_addr) = read_symbols(image, shoff, shentsize, shnum).unwrap_or_default();

    Ok(LoadedImage {
        entry,
        load_addr,
        stack: None,
        data,
        symbols_by_name,
        symbols_by_addr,
    })
}

fn read_symbols(
    image: &[u8],
    shoff: usize,
    shentsize: usize,
    shnum: usize,
) -> Option<(HashMap<String, u32>, HashMap<u32, String>)> {
    if shentsize == 0 || shnum == 0 {
        return None;
    }
    let mut symtab: Option<(usize, usize, u32)> = None; // (offset, size, link = strtab section index)
    let mut strtab_sections: HashMap<usize, (usize, usize)> = HashMap::new();

    for i in 0..shnum {
        let base = shoff + i * shentsize;
        let sh_type = read_u32le(image, base + 0x04)?;
        let sh_offset = read_u32le(image, base + 0x10)? as usize;
        let sh_size = read_u32le(image, base + 0x14)? as usize;
        let sh_link = read_u32le(image, base + 0x18)?;
        match sh_type {
            SHT_SYMTAB => symtab = Some((sh_offset, sh_size, sh_link)),
            SHT_STRTAB => {
                strtab_sections.insert(i, (sh_offset, sh_size));
            }
            _ => {}
        }
    }
    let (sym_off, sym_size, link) = symtab?;
    let (str_off, str_size) = strtab_sections.get(&(link as usize)).copied()?;
    let strtab = image.get(str_off..str_off + str_size)?;

    const SYM_ENTSIZE: usize = 16;
    let mut by_name = HashMap::new();
    let mut by_addr = HashMap::new();
    let mut off = sym_off;
    while off + SYM_ENTSIZE <= sym_off + sym_size {
        let st_name = read_u32le(image, off)? as usize;
        let st_value = read_u32le(image, off + 0x04)?;
        if let Some(name) = c_str_at(strtab, st_name) {
            if !name.is_empty() {
                by_name.insert(name.clone(), st_value);
                by_addr.insert(st_value, name);
            }
        }
        off += SYM_ENTSIZE;
    }
    Some((by_name, by_addr))
}

fn c_str_at(strtab: &[u8], offset: usize) -> Option<String> {
    let rest = strtab.get(offset..)?;
    let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
    Some(String::from_utf8_lossy(&rest[..end]).into_owned())
}

/// Raw 32-byte NOR header: load address at 0x0C, initial stack at 0x10,
/// entry point at 0x14. The remainder of the image is copied verbatim
/// starting at `load_addr`.
pub fn load_nor(image: &[u8]) -> Result<LoadedImage, LoaderError> {
    if image.len() < 32 {
        return Err(LoaderError::ImageTooShort);
    }
    let load_addr = read_u32le(image, 0x0C).ok_or(LoaderError::ImageTooShort)?;
    let stack = read_u32le(image, 0x10).ok_or(LoaderError::ImageTooShort)?;
    let entry = read_u32le(image, 0x14).ok_or(LoaderError::ImageTooShort)?;

    Ok(LoadedImage {
        entry,
        load_addr,
        stack: Some(stack),
        data: image.to_vec(),
        symbols_by_name: HashMap::new(),
        symbols_by_addr: HashMap::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_elf(entry: u32, vaddr: u32, payload: &[u8]) -> Vec<u8> {
        let mut img = vec![0u8; 52];
        img[0..8].copy_from_slice(&ELF_MAGIC);
        img[0x18..0x1C].copy_from_slice(&entry.to_le_bytes());
        img[0x1C..0x20].copy_from_slice(&52u32.to_le_bytes()); // phoff
        img[0x2A..0x2C].copy_from_slice(&32u16.to_le_bytes()); // phentsize
        img[0x2C..0x2E].copy_from_slice(&1u16.to_le_bytes()); // phnum

        let mut ph = vec![0u8; 32];
        ph[0x00..0x04].copy_from_slice(&PT_LOAD.to_le_bytes());
        let p_offset = (img.len() + ph.len()) as u32;
        ph[0x04..0x08].copy_from_slice(&p_offset.to_le_bytes());
        ph[0x08..0x0C].copy_from_slice(&vaddr.to_le_bytes());
        ph[0x10..0x14].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        ph[0x14..0x18].copy_from_slice(&(payload.len() as u32).to_le_bytes());

        img.extend_from_slice(&ph);
        img.extend_from_slice(payload);
        img
    }

    #[test]
    fn rejects_bad_magic() {
        let img = vec![0u8; 64];
        assert!(matches!(load_elf(&img), Err(LoaderError::BadElfMagic)));
    }

    #[test]
    fn loads_single_load_segment() {
        let img = minimal_elf(0xA000_1000, 0xA000_0000, &[0xDE, 0xAD, 0xBE, 0xEF]);
        let loaded = load_elf(&img).unwrap();
        assert_eq!(loaded.entry, 0xA000_1000);
        assert_eq!(loaded.load_addr, 0xA000_0000);
        assert_eq!(&loaded.data, &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn nor_header_fields_are_read_at_fixed_offsets() {
        let mut img = vec![0u8; 64];
        img[0x0C..0x10].copy_from_slice(&0xA000_0000u32.to_le_bytes());
        img[0x10..0x14].copy_from_slice(&0xA01F_FFF0u32.to_le_bytes());
        img[0x14..0x18].copy_from_slice(&0xA000_0100u32.to_le_bytes());
        let loaded = load_nor(&img).unwrap();
        assert_eq!(loaded.load_addr, 0xA000_0000);
        assert_eq!(loaded.stack, Some(0xA01F_FFF0));
        assert_eq!(loaded.entry, 0xA000_0100);
        assert_eq!(loaded.data.len(), img.len());
    }

    #[test]
    fn nor_header_too_short_is_rejected() {
        let img = vec![0u8; 10];
        assert!(matches!(load_nor(&img), Err(LoaderError::ImageTooShort)));
    }
}
