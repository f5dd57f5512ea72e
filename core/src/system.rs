//! The `System`: owns RAM/NOR storage and every peripheral, and is itself
//! the `Bus` the CPU and DMA engines run against. Grounded on the teacher's
//! System-as-Bus pattern (`machines/src/simple6809.rs`: a concrete struct
//! holding every device, implementing the bus trait by matching on address
//! range), generalised from that single-peripheral 6809 board to this SoC's
//! 256-slot peripheral window.
//!
//! Peripheral slot assignments for the seven devices grounded in the
//! original device's `system-d99plus.cpp` (`registerPeripheral` calls) are
//! copied verbatim: PPU=0x01, APB-DMA=0x08, IRQ=0x0A, BLN-DMA=0x0D,
//! TIMER=0x16, SD=0x18, GPIO=0x20. The SPU and camera interface were never
//! registered in that particular board file (their `Peripheral` structs
//! exist but no slot number for them survived in the retrieval pack), so
//! SPU=0x09 and CAMERA=0x05 here are this crate's own inferred placements,
//! chosen to sit next to the existing DMA/PPU clusters rather than collide
//! with a grounded slot.

use crate::bus::{self, Bus};
use crate::camera::{Camera, CameraSource};
use crate::cpu::Cpu;
use crate::dma::apb::ApbDma;
use crate::dma::bln::BlnDma;
use crate::error::{LoaderError, SaveStateError};
use crate::gpio::Gpio;
use crate::irq::IrqController;
use crate::loader::{self, LoadedImage};
use crate::ppu::Ppu;
use crate::sdcard::host::SdHostController;
use crate::spu::Spu;
use crate::timer::Timers;
use std::io::{Read, Seek, Write};

const SLOT_PPU: u8 = 0x01;
const SLOT_CAMERA: u8 = 0x05;
const SLOT_APBDMA: u8 = 0x08;
const SLOT_SPU: u8 = 0x09;
const SLOT_IRQ: u8 = 0x0A;
const SLOT_BLNDMA: u8 = 0x0D;
const SLOT_TIMER: u8 = 0x16;
const SLOT_SD: u8 = 0x18;
const SLOT_GPIO: u8 = 0x20;

/// Where a boot image was placed, for the scheduler's soft-reset path.
pub struct BootImage {
    pub load_addr: u32,
    pub entry: u32,
    pub stack: Option<u32>,
    pub data: Vec<u8>,
    pub is_nor: bool,
}

pub struct System<S> {
    pub ram: Vec<u8>,
    pub nor: Vec<u8>,
    pub cpu: Cpu,
    pub irq: IrqController,
    pub gpio: Gpio,
    pub timers: Timers,
    pub apb_dma: ApbDma,
    pub bln_dma: BlnDma,
    pub ppu: Ppu,
    pub spu: Spu,
    pub camera: Camera,
    pub sd: SdHostController<S>,
    boot_image: Option<BootImage>,
}

impl<S: Read + Write + Seek> System<S> {
    pub fn new() -> Self {
        Self {
            ram: vec![0; bus::RAM_SIZE as usize],
            nor: vec![0; bus::NOR_SIZE as usize],
            cpu: Cpu::new(),
            irq: IrqController::new(),
            gpio: Gpio::new(),
            timers: Timers::new(),
            apb_dma: ApbDma::new(),
            bln_dma: BlnDma::new(),
            ppu: Ppu::new(),
            spu: Spu::new(),
            camera: Camera::new(),
            sd: SdHostController::new(),
            boot_image: None,
        }
    }

    /// Resets the CPU and every peripheral, preserving RAM/NOR contents and
    /// the inserted SD card. Matches the scheduler's "soft reset": the boot
    /// image is reloaded separately by the caller via `reload_boot_image`.
    pub fn reset_peripherals(&mut self) {
        self.cpu.reset();
        self.irq.reset();
        self.gpio.reset();
        self.timers.reset();
        self.apb_dma.reset();
        self.bln_dma.reset();
        self.ppu.reset();
        self.spu.reset();
        self.camera.reset();
        self.sd.reset();
    }

    fn place_image(&mut self, loaded: LoadedImage, is_nor: bool) -> Result<(), LoaderError> {
        if !bus::in_ram(loaded.load_addr) {
            return Err(LoaderError::NorOutOfRamWindow {
                load_addr: loaded.load_addr,
                entry: loaded.entry,
            });
        }
        let start = (loaded.load_addr - bus::RAM_BASE) as usize;
        let end = start + loaded.data.len();
        if end > self.ram.len() {
            return Err(LoaderError::NorOutOfRamWindow {
                load_addr: loaded.load_addr,
                entry: loaded.entry,
            });
        }
        self.ram[start..end].copy_from_slice(&loaded.data);
        self.boot_image = Some(BootImage {
            load_addr: loaded.load_addr,
            entry: loaded.entry,
            stack: loaded.stack,
            data: loaded.data,
            is_nor,
        });
        Ok(())
    }

    /// Parses and places an ELF image, then points the CPU at its entry.
    pub fn load_elf(&mut self, image: &[u8]) -> Result<(), LoaderError> {
        let loaded = loader::load_elf(image)?;
        let entry = loaded.entry;
        self.place_image(loaded, false)?;
        self.cpu.pc = entry;
        Ok(())
    }

    /// Parses and places a raw NOR image, seeding the stack pointer (`r0`,
    /// the S+core 7 stack-pointer alias) when the header supplies one.
    pub fn load_nor(&mut self, image: &[u8]) -> Result<(), LoaderError> {
        let loaded = loader::load_nor(image)?;
        if !bus::in_ram(loaded.entry) {
            return Err(LoaderError::NorOutOfRamWindow {
                load_addr: loaded.load_addr,
                entry: loaded.entry,
            });
        }
        let entry = loaded.entry;
        let stack = loaded.stack;
        self.place_image(loaded, true)?;
        self.cpu.pc = entry;
        if let Some(sp) = stack {
            self.cpu.gpr[0] = sp;
        }
        Ok(())
    }

    /// Soft reset: reload the last-loaded boot image over RAM, then reset
    /// the CPU and every peripheral.
    pub fn soft_reset(&mut self) {
        if let Some(img) = self.boot_image.take() {
            let start = (img.load_addr - bus::RAM_BASE) as usize;
            let end = start + img.data.len();
            if end <= self.ram.len() {
                self.ram[start..end].copy_from_slice(&img.data);
            }
            self.reset_peripherals();
            self.cpu.pc = img.entry;
            if img.is_nor {
                if let Some(sp) = img.stack {
                    self.cpu.gpr[0] = sp;
                }
            }
            self.boot_image = Some(img);
        } else {
            self.reset_peripherals();
        }
    }

    /// Advances every timer whose clock-select bit matches `is_32khz`.
    pub fn tick_timers(&mut self, is_32khz: bool) {
        self.timers.tick(is_32khz, &mut self.irq);
    }

    pub fn tick_camera(&mut self, source: &mut impl CameraSource) {
        let mut ram = RamNorWindow { ram: &mut self.ram, nor: &mut self.nor };
        self.camera.tick(source, &mut ram, &mut self.irq);
    }

    /// Drains the SPU's envelope/phase state at the 281.25 kHz engine rate;
    /// call as many times as the host-rate accumulator (owned by the
    /// scheduler) allows per scheduler tick.
    pub fn tick_spu_engine(&mut self) {
        let mut ram = RamNorWindow { ram: &mut self.ram, nor: &mut self.nor };
        self.spu.tick(&mut ram, &mut self.irq);
    }

    pub fn mix_spu_sample(&mut self) -> (i16, i16) {
        self.spu.mix()
    }

    pub fn tick_ppu(&mut self) {
        let mut ram = RamNorWindow { ram: &mut self.ram, nor: &mut self.nor };
        self.ppu.tick(&mut ram, &mut self.irq);
    }

    pub fn framebuffer(&self) -> &[u16] {
        self.ppu.framebuffer()
    }

    /// Runs every APB-DMA channel whose enable bit is currently set, to
    /// completion. `run_channel` clears the enable bit itself, so calling
    /// this unconditionally after every APB-DMA register write (see
    /// `Bus::write32`) reproduces "the write that starts a transfer returns
    /// only once it has completed" without a separate scheduler poll.
    fn run_pending_apb_dma(&mut self) {
        let pending: Vec<usize> = self.apb_dma.pending_channels().collect();
        if pending.is_empty() {
            return;
        }
        let mut apb_dma = std::mem::take(&mut self.apb_dma);
        let mut irq = std::mem::take(&mut self.irq);
        for ch in pending {
            apb_dma.run_channel(ch, self, &mut irq);
        }
        self.apb_dma = apb_dma;
        self.irq = irq;
    }

    /// Runs the blend-DMA engine if its start bit is set; a no-op otherwise.
    /// Called unconditionally after every BLN-DMA register write, matching
    /// the same run-to-completion-on-write model as APB-DMA.
    fn run_bln_dma(&mut self) {
        let mut ram = RamNorWindow { ram: &mut self.ram, nor: &mut self.nor };
        self.bln_dma.execute(&mut ram, &mut self.irq);
    }

    /// One CPU instruction, forwarding the interrupt controller's dispatched
    /// line (if any) and the GPIO controller's shared IRQ-28 request before
    /// fetch/decode/execute. Kept out of `Cpu::step` itself so neither
    /// controller ever holds a handle back to the CPU.
    pub fn step_cpu(&mut self) {
        if let Some(line) = self.irq.dispatch() {
            self.cpu.raise_interrupt(line);
        }
        if self.gpio.take_irq_request() {
            self.irq.set_line(28, true);
        }
        let mut cpu = std::mem::take(&mut self.cpu);
        cpu.step(self);
        self.cpu = cpu;
    }

    pub fn save_state(&self, w: &mut crate::savestate::SaveWriter<impl Write>) -> std::io::Result<()> {
        self.cpu.save_state(w)?;
        self.ppu.save_state(w)?;
        self.spu.save_state(w)?;
        self.sd.save_state(w)?;
        self.apb_dma.save_state(w)?;
        self.bln_dma.save_state(w)?;
        self.gpio.save_state(w)?;
        self.timers.save_state(w)?;
        self.irq.save_state(w)?;
        w.tag("RAM")?;
        w.bytes(&self.ram)?;
        Ok(())
    }

    pub fn load_state(&mut self, r: &mut crate::savestate::SaveReader<impl Read>) -> Result<(), SaveStateError> {
        self.cpu.load_state(r)?;
        self.ppu.load_state(r)?;
        self.spu.load_state(r)?;
        self.sd.load_state(r)?;
        self.apb_dma.load_state(r)?;
        self.bln_dma.load_state(r)?;
        self.gpio.load_state(r)?;
        self.timers.load_state(r)?;
        self.irq.load_state(r)?;
        r.tag("RAM")?;
        r.bytes(&mut self.ram).map_err(|_| SaveStateError::UnexpectedEof)?;
        Ok(())
    }
}

impl<S: Read + Write + Seek> Bus for System<S> {
    fn read8(&mut self, addr: u32) -> u8 {
        if bus::in_ram(addr) {
            crate::util::read_u8(&self.ram, (addr - bus::RAM_BASE) as usize)
        } else if bus::in_nor(addr) {
            crate::util::read_u8(&self.nor, nor_offset(addr))
        } else if bus::in_periph(addr) {
            crate::diag!("SYSTEM", "8-bit peripheral read ignored: 0x{addr:08x}");
            0
        } else {
            crate::diag!("SYSTEM", "read8 from unmapped address 0x{addr:08x}");
            0
        }
    }

    fn read16(&mut self, addr: u32) -> u16 {
        if bus::in_ram(addr) {
            crate::util::read_u16le(&self.ram, (addr - bus::RAM_BASE) as usize)
        } else if bus::in_nor(addr) {
            crate::util::read_u16le(&self.nor, nor_offset(addr))
        } else if bus::in_periph(addr) {
            crate::diag!("SYSTEM", "16-bit peripheral read ignored: 0x{addr:08x}");
            0
        } else {
            crate::diag!("SYSTEM", "read16 from unmapped address 0x{addr:08x}");
            0
        }
    }

    fn read32(&mut self, addr: u32) -> u32 {
        if bus::in_ram(addr) {
            crate::util::read_u32le(&self.ram, (addr - bus::RAM_BASE) as usize)
        } else if bus::in_nor(addr) {
            crate::util::read_u32le(&self.nor, nor_offset(addr))
        } else if bus::in_periph(addr) {
            self.read_periph32(addr)
        } else {
            crate::diag!("SYSTEM", "read32 from unmapped address 0x{addr:08x}");
            0
        }
    }

    fn write8(&mut self, addr: u32, val: u8) {
        if bus::in_ram(addr) {
            crate::util::write_u8(&mut self.ram, (addr - bus::RAM_BASE) as usize, val);
        } else if bus::in_nor(addr) {
            crate::diag!("SYSTEM", "write8 to read-only NOR ignored: 0x{addr:08x}");
        } else if bus::in_periph(addr) {
            crate::diag!("SYSTEM", "8-bit peripheral write ignored: 0x{addr:08x}");
        } else {
            crate::diag!("SYSTEM", "write8 to unmapped address 0x{addr:08x}");
        }
    }

    fn write16(&mut self, addr: u32, val: u16) {
        if bus::in_ram(addr) {
            crate::util::write_u16le(&mut self.ram, (addr - bus::RAM_BASE) as usize, val);
        } else if bus::in_nor(addr) {
            crate::diag!("SYSTEM", "write16 to read-only NOR ignored: 0x{addr:08x}");
        } else if bus::in_periph(addr) {
            crate::diag!("SYSTEM", "16-bit peripheral write ignored: 0x{addr:08x}");
        } else {
            crate::diag!("SYSTEM", "write16 to unmapped address 0x{addr:08x}");
        }
    }

    fn write32(&mut self, addr: u32, val: u32) {
        if bus::in_ram(addr) {
            crate::util::write_u32le(&mut self.ram, (addr - bus::RAM_BASE) as usize, val);
        } else if bus::in_nor(addr) {
            crate::diag!("SYSTEM", "write32 to read-only NOR ignored: 0x{addr:08x}");
        } else if bus::in_periph(addr) {
            self.write_periph32(addr, val);
        } else {
            crate::diag!("SYSTEM", "write32 to unmapped address 0x{addr:08x}");
        }
    }
}

impl<S: Read + Write + Seek> System<S> {
    fn read_periph32(&mut self, addr: u32) -> u32 {
        let slot = bus::slot_of(addr);
        let off = bus::periph_offset(addr);
        match slot {
            SLOT_PPU => self.ppu.read(off),
            SLOT_CAMERA => self.camera.read(off),
            SLOT_APBDMA => self.apb_dma.read(off),
            SLOT_SPU => self.spu.read(off),
            SLOT_IRQ => self.irq.read(off),
            SLOT_BLNDMA => self.bln_dma.read(off),
            SLOT_TIMER => {
                if off < CKG_BASE_OFFSET {
                    self.timers.read(off)
                } else {
                    self.timers.read_ckg(off - CKG_BASE_OFFSET)
                }
            }
            SLOT_SD => self.sd.read(off),
            SLOT_GPIO => self.gpio.read(off),
            _ => {
                crate::diag!("SYSTEM", "read from unregistered peripheral slot 0x{slot:02x}");
                0
            }
        }
    }

    fn write_periph32(&mut self, addr: u32, val: u32) {
        let slot = bus::slot_of(addr);
        let off = bus::periph_offset(addr);
        match slot {
            SLOT_PPU => {
                let mut ram = RamNorWindow { ram: &mut self.ram, nor: &mut self.nor };
                self.ppu.write(off, val, &mut ram, &mut self.irq);
            }
            SLOT_CAMERA => self.camera.write(off, val, &mut self.irq),
            SLOT_APBDMA => {
                self.apb_dma.write(off, val, &mut self.irq);
                self.run_pending_apb_dma();
            }
            SLOT_SPU => self.spu.write(off, val, &mut self.irq),
            SLOT_IRQ => self.irq.write(off, val),
            SLOT_BLNDMA => {
                self.bln_dma.write(off, val);
                self.run_bln_dma();
            }
            SLOT_TIMER => {
                if off < CKG_BASE_OFFSET {
                    self.timers.write(off, val, &mut self.irq);
                } else {
                    self.timers.write_ckg(off - CKG_BASE_OFFSET, val);
                }
            }
            SLOT_SD => self.sd.write(off, val, &mut self.irq),
            SLOT_GPIO => self.gpio.write(off, val),
            _ => crate::diag!("SYSTEM", "write to unregistered peripheral slot 0x{slot:02x}"),
        }
    }
}

/// Byte offset, within the timer peripheral's slot, where the shared
/// clock-gating register file starts. Each of the 6 timers decodes its own
/// registers from a 0x1000-aligned sub-block (`Timers::read`/`write`
/// extract the timer index from bits 12..15 of the offset); CKG is placed
/// in the next sub-block, inferred (no surviving hardware offset for it).
const CKG_BASE_OFFSET: u16 = 0x6000;

#[inline]
fn nor_offset(addr: u32) -> usize {
    if addr.wrapping_sub(bus::NOR_MIRROR) < bus::NOR_SIZE {
        (addr - bus::NOR_MIRROR) as usize
    } else {
        (addr - bus::NOR_BASE) as usize
    }
}

/// A narrow view of just the RAM/NOR windows, for peripherals (PPU-DMA,
/// BLN-DMA, SPU sample fetch, camera framebuffer writeback) whose own DMA
/// never legitimately targets the peripheral window.
struct RamNorWindow<'a> {
    ram: &'a mut Vec<u8>,
    nor: &'a mut Vec<u8>,
}

impl<'a> Bus for RamNorWindow<'a> {
    fn read8(&mut self, addr: u32) -> u8 {
        if bus::in_ram(addr) {
            crate::util::read_u8(self.ram, (addr - bus::RAM_BASE) as usize)
        } else if bus::in_nor(addr) {
            crate::util::read_u8(self.nor, nor_offset(addr))
        } else {
            crate::diag!("SYSTEM", "RAM/NOR-window read8 outside range: 0x{addr:08x}");
            0
        }
    }

    fn read16(&mut self, addr: u32) -> u16 {
        if bus::in_ram(addr) {
            crate::util::read_u16le(self.ram, (addr - bus::RAM_BASE) as usize)
        } else if bus::in_nor(addr) {
            crate::util::read_u16le(self.nor, nor_offset(addr))
        } else {
            crate::diag!("SYSTEM", "RAM/NOR-window read16 outside range: 0x{addr:08x}");
            0
        }
    }

    fn read32(&mut self, addr: u32) -> u32 {
        if bus::in_ram(addr) {
            crate::util::read_u32le(self.ram, (addr - bus::RAM_BASE) as usize)
        } else if bus::in_nor(addr) {
            crate::util::read_u32le(self.nor, nor_offset(addr))
        } else {
            crate::diag!("SYSTEM", "RAM/NOR-window read32 outside range: 0x{addr:08x}");
            0
        }
    }

    fn write8(&mut self, addr: u32, val: u8) {
        if bus::in_ram(addr) {
            crate::util::write_u8(self.ram, (addr - bus::RAM_BASE) as usize, val);
        } else {
            crate::diag!("SYSTEM", "RAM/NOR-window write8 outside RAM: 0x{addr:08x}");
        }
    }

    fn write16(&mut self, addr: u32, val: u16) {
        if bus::in_ram(addr) {
            crate::util::write_u16le(self.ram, (addr - bus::RAM_BASE) as usize, val);
        } else {
            crate::diag!("SYSTEM", "RAM/NOR-window write16 outside RAM: 0x{addr:08x}");
        }
    }

    fn write32(&mut self, addr: u32, val: u32) {
        if bus::in_ram(addr) {
            crate::util::write_u32le(self.ram, (addr - bus::RAM_BASE) as usize, val);
        } else {
            crate::diag!("SYSTEM", "RAM/NOR-window write32 outside RAM: 0x{addr:08x}");
        }
    }
}
