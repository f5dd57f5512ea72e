//! 4-channel APB-DMA controller. Grounded verbatim in `apbdma.cpp`/`apbdma.h`:
//! global registers at words 0x00/0x01/0x1F, per-channel registers at the
//! exact word strides the original hardware uses, and the fixed per-channel
//! IRQ line table.
//!
//! # Global registers (words)
//! - `0x00` busy status (bit per channel, read-only)
//! - `0x01` IRQ status (bit per channel, write-1-to-clear)
//! - `0x1F` soft reset (write-only, any value resets all channels)
//!
//! # Per-channel registers (word offset from channel base, stride 0x34)
//! - `0x02` AHB start A, `0x06` AHB end A, `0x0A` APB start,
//!   `0x13` AHB start B, `0x17` AHB end B, `0x1B` setting, `0x21` align
//!
//! # Setting-word bits
//! `dir`=0 (0=read-from-APB,1=write-to-APB), `addr_mode`=1, `mem`=3,
//! `trans`=4..6 (2-bit transfer size), `irq_msk`=6, `en`=7.
//!
//! IRQ lines per channel: `{37, 36, 33, 32}` for channels 0..3.

use crate::bus::Bus;
use crate::irq::IrqController;
use crate::util::check_bit;

const NCHAN: usize = 4;
const CHAN_STRIDE: usize = 0x34;

const REG_BUSY: usize = 0x00;
const REG_IRQ_STS: usize = 0x01;
const REG_SOFT_RST: usize = 0x1F;

const OFF_AHB_START_A: usize = 0x02;
const OFF_AHB_END_A: usize = 0x06;
const OFF_APB_START: usize = 0x0A;
const OFF_AHB_START_B: usize = 0x13;
const OFF_AHB_END_B: usize = 0x17;
const OFF_SETTING: usize = 0x1B;
const OFF_ALIGN: usize = 0x21;

const SET_DIR: u32 = 0;
const SET_ADDR_MODE: u32 = 1;
const SET_MEM: u32 = 3;
const SET_TRANS_SHIFT: u32 = 4;
const SET_IRQ_MSK: u32 = 6;
const SET_EN: u32 = 7;

const CHAN_IRQS: [u8; NCHAN] = [37, 36, 33, 32];

#[derive(Default)]
struct Channel {
    ahb_start_a: u32,
    ahb_end_a: u32,
    apb_start: u32,
    ahb_start_b: u32,
    ahb_end_b: u32,
    setting: u32,
    align: u32,
}

impl Channel {
    fn transfer_size(&self) -> u8 {
        ((self.setting >> SET_TRANS_SHIFT) & 0b11) as u8
    }

    fn write_to_apb(&self) -> bool {
        check_bit(self.setting, SET_DIR)
    }

    fn enabled(&self) -> bool {
        check_bit(self.setting, SET_EN)
    }

    fn irq_masked(&self) -> bool {
        check_bit(self.setting, SET_IRQ_MSK)
    }

    fn continuous_addr(&self) -> bool {
        !check_bit(self.setting, SET_ADDR_MODE)
    }
}

pub struct ApbDma {
    chans: [Channel; NCHAN],
    busy: u32,
    irq_sts: u32,
}

impl ApbDma {
    pub fn new() -> Self {
        Self {
            chans: Default::default(),
            busy: 0,
            irq_sts: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Execute one channel's transfer synchronously against `bus`, matching
    /// the reference implementation's "DMA runs to completion when enabled"
    /// behaviour rather than modelling per-beat bus arbitration.
    pub fn run_channel(&mut self, ch: usize, bus: &mut impl Bus, irq: &mut IrqController) {
        if ch >= NCHAN || !self.chans[ch].enabled() {
            return;
        }
        self.busy |= 1 << ch;

        let c = &self.chans[ch];
        let size = c.transfer_size();
        let write_apb = c.write_to_apb();
        let continuous = c.continuous_addr();
        let mut ahb_addr = c.ahb_start_a;
        let ahb_end = c.ahb_end_a;
        let apb_addr = c.apb_start;

        let mut offset = 0u32;
        while ahb_addr.wrapping_add(offset) <= ahb_end {
            let ahb = if continuous {
                ahb_addr.wrapping_add(offset)
            } else {
                ahb_addr
            };
            match size {
                0 => {
                    if write_apb {
                        let v = bus.read8(ahb);
                        bus.write8(apb_addr, v);
                    } else {
                        let v = bus.read8(apb_addr);
                        bus.write8(ahb, v);
                    }
                    offset += 1;
                }
                1 => {
                    if write_apb {
                        let v = bus.read16(ahb);
                        bus.write16(apb_addr, v);
                    } else {
                        let v = bus.read16(apb_addr);
                        bus.write16(ahb, v);
                    }
                    offset += 2;
                }
                _ => {
                    if write_apb {
                        let v = bus.read32(ahb);
                        bus.write32(apb_addr, v);
                    } else {
                        let v = bus.read32(apb_addr);
                        bus.write32(ahb, v);
                    }
                    offset += 4;
                }
            }
            if !continuous {
                ahb_addr = ahb_addr.wrapping_add(offset);
                offset = 0;
                if ahb_addr > ahb_end {
                    break;
                }
            }
        }

        self.chans[ch].setting &= !(1 << SET_EN);
        self.busy &= !(1 << ch);
        self.irq_sts |= 1 << ch;
        if !self.chans[ch].irq_masked() {
            irq.set_line(CHAN_IRQS[ch], true);
        }
    }

    pub fn read(&self, addr: u16) -> u32 {
        let word = (addr / 4) as usize;
        if word == REG_BUSY {
            return self.busy;
        }
        if word == REG_IRQ_STS {
            return self.irq_sts;
        }
        let ch = word / CHAN_STRIDE;
        let off = word % CHAN_STRIDE;
        let Some(c) = self.chans.get(ch) else {
            return 0;
        };
        match off {
            OFF_AHB_START_A => c.ahb_start_a,
            OFF_AHB_END_A => c.ahb_end_a,
            OFF_APB_START => c.apb_start,
            OFF_AHB_START_B => c.ahb_start_b,
            OFF_AHB_END_B => c.ahb_end_b,
            OFF_SETTING => c.setting,
            OFF_ALIGN => c.align,
            _ => 0,
        }
    }

    pub fn write(&mut self, addr: u16, val: u32, irq: &mut IrqController) {
        let word = (addr / 4) as usize;
        if word == REG_SOFT_RST {
            self.reset();
            return;
        }
        if word == REG_IRQ_STS {
            for ch in 0..NCHAN {
                if check_bit(val, ch as u32) {
                    self.irq_sts &= !(1 << ch);
                    irq.set_line(CHAN_IRQS[ch], false);
                }
            }
            return;
        }
        let ch = word / CHAN_STRIDE;
        let off = word % CHAN_STRIDE;
        let Some(c) = self.chans.get_mut(ch) else {
            crate::diag!("APBDMA", "write out of range: 0x{addr:04x}");
            return;
        };
        match off {
            OFF_AHB_START_A => c.ahb_start_a = val,
            OFF_AHB_END_A => c.ahb_end_a = val,
            OFF_APB_START => c.apb_start = val,
            OFF_AHB_START_B => c.ahb_start_b = val,
            OFF_AHB_END_B => c.ahb_end_b = val,
            OFF_SETTING => c.setting = val,
            OFF_ALIGN => c.align = val,
            _ => crate::diag!("APBDMA", "write to unknown offset in channel {ch}: 0x{addr:04x}"),
        }
    }

    /// Channels whose enable bit is set and have not yet been run this tick.
    pub fn pending_channels(&self) -> impl Iterator<Item = usize> + '_ {
        (0..NCHAN).filter(|&ch| self.chans[ch].enabled())
    }

    pub fn save_state(&self, w: &mut crate::savestate::SaveWriter<impl std::io::Write>) -> std::io::Result<()> {
        w.tag("APBDMA")?;
        w.u32(self.busy)?;
        w.u32(self.irq_sts)?;
        for c in &self.chans {
            w.array_u32(&[
                c.ahb_start_a,
                c.ahb_end_a,
                c.apb_start,
                c.ahb_start_b,
                c.ahb_end_b,
                c.setting,
                c.align,
            ])?;
        }
        Ok(())
    }

    pub fn load_state(
        &mut self,
        r: &mut crate::savestate::SaveReader<impl std::io::Read>,
    ) -> Result<(), crate::error::SaveStateError> {
        r.tag("APBDMA")?;
        self.busy = r.u32().map_err(|_| crate::error::SaveStateError::UnexpectedEof)?;
        self.irq_sts = r.u32().map_err(|_| crate::error::SaveStateError::UnexpectedEof)?;
        for c in &mut self.chans {
            let mut vals = [0u32; 7];
            r.array_u32(&mut vals).map_err(|_| crate::error::SaveStateError::UnexpectedEof)?;
            c.ahb_start_a = vals[0];
            c.ahb_end_a = vals[1];
            c.apb_start = vals[2];
            c.ahb_start_b = vals[3];
            c.ahb_end_b = vals[4];
            c.setting = vals[5];
            c.align = vals[6];
        }
        Ok(())
    }
}

impl Default for ApbDma {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use support::FlatBus;

    mod support {
        use crate::bus::Bus;

        pub struct FlatBus {
            pub mem: Vec<u8>,
        }

        impl FlatBus {
            pub fn new(size: usize) -> Self {
                Self { mem: vec![0; size] }
            }
        }

        impl Bus for FlatBus {
            fn read8(&mut self, addr: u32) -> u8 {
                self.mem.get(addr as usize).copied().unwrap_or(0)
            }
            fn read16(&mut self, addr: u32) -> u16 {
                u16::from_le_bytes([self.read8(addr), self.read8(addr + 1)])
            }
            fn read32(&mut self, addr: u32) -> u32 {
                u32::from_le_bytes([
                    self.read8(addr),
                    self.read8(addr + 1),
                    self.read8(addr + 2),
                    self.read8(addr + 3),
                ])
            }
            fn write8(&mut self, addr: u32, val: u8) {
                if let Some(slot) = self.mem.get_mut(addr as usize) {
                    *slot = val;
                }
            }
            fn write16(&mut self, addr: u32, val: u16) {
                for (i, b) in val.to_le_bytes().into_iter().enumerate() {
                    self.write8(addr + i as u32, b);
                }
            }
            fn write32(&mut self, addr: u32, val: u32) {
                for (i, b) in val.to_le_bytes().into_iter().enumerate() {
                    self.write8(addr + i as u32, b);
                }
            }
        }
    }

    #[test]
    fn byte_copy_transfers_range_and_raises_irq() {
        let mut dma = ApbDma::new();
        let mut irq = IrqController::new();
        let mut bus = FlatBus::new(64);
        bus.mem[0..4].copy_from_slice(&[1, 2, 3, 4]);

        dma.write(OFF_AHB_START_A as u16 * 4, 0, &mut irq);
        dma.write(OFF_AHB_END_A as u16 * 4, 3, &mut irq);
        dma.write(OFF_APB_START as u16 * 4, 32, &mut irq);
        dma.write(OFF_SETTING as u16 * 4, 1 << SET_EN, &mut irq);

        dma.run_channel(0, &mut bus, &mut irq);

        assert_eq!(&bus.mem[32..36], &[1, 2, 3, 0]);
        assert_eq!(irq.dispatch(), Some(CHAN_IRQS[0]));
        assert_eq!(dma.read(REG_BUSY as u16 * 4), 0);
    }

    #[test]
    fn masked_irq_does_not_assert_line() {
        let mut dma = ApbDma::new();
        let mut irq = IrqController::new();
        let mut bus = FlatBus::new(16);
        dma.write(OFF_AHB_START_A as u16 * 4, 0, &mut irq);
        dma.write(OFF_AHB_END_A as u16 * 4, 0, &mut irq);
        dma.write(
            OFF_SETTING as u16 * 4,
            1 << SET_EN | 1 << SET_IRQ_MSK,
            &mut irq,
        );
        dma.run_channel(0, &mut bus, &mut irq);
        assert_eq!(irq.dispatch(), None);
    }

    #[test]
    fn soft_reset_clears_all_channels() {
        let mut dma = ApbDma::new();
        let mut irq = IrqController::new();
        dma.write(OFF_SETTING as u16 * 4, 1 << SET_EN, &mut irq);
        dma.write(REG_SOFT_RST as u16 * 4, 1, &mut irq);
        assert_eq!(dma.read(OFF_SETTING as u16 * 4), 0);
    }
}
