//! Camera interface: enable/mode/framebuffer registers plus the scheduler
//! hook that drives a host-owned capture worker through a small collaborator
//! trait. Register shape follows `SPEC_FULL.md` §4.11; the `CameraSource`
//! boundary generalises the teacher's `Machine` input trait (itself read in
//! `core/src/core/machine.rs` before this module replaced it) from
//! keyboard/joystick sampling to frame capture.

use crate::irq::IrqController;

pub const CAMERA_IRQ_LINE: u8 = 51;

const REG_CONTROL: u16 = 0x00;
const REG_FB0: u16 = 0x04;
const REG_FB1: u16 = 0x08;
const REG_FB2: u16 = 0x0C;
const REG_IRQ_EN: u16 = 0x10;
const REG_IRQ_STATUS: u16 = 0x14;

const CTRL_ENABLE: u32 = 0;
const CTRL_MODE_VGA: u32 = 1;
const CTRL_CLOCK_GATE: u32 = 2;

const IRQ_FRAME_END: u32 = 2;

/// Host-provided frame source. The frontend implements this over a real
/// webcam (or a synthetic pattern generator in headless test configurations)
/// and is polled from the scheduler tick, never from the CPU thread.
pub trait CameraSource {
    /// Returns true and begins an async capture if none is outstanding.
    fn request_frame(&mut self) -> bool;
    /// Returns a completed RGB565 frame (176x144 or 640x480) if ready.
    fn poll_frame(&mut self) -> Option<Vec<u16>>;
}

pub struct Camera {
    control: u32,
    fb: [u32; 3],
    irq_en: u32,
    irq_status: u32,
    capture_pending: bool,
    last_frame: Vec<u16>,
}

impl Camera {
    pub fn new() -> Self {
        Self {
            control: 0,
            fb: [0; 3],
            irq_en: 0,
            irq_status: 0,
            capture_pending: false,
            last_frame: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn enabled(&self) -> bool {
        self.control & (1 << CTRL_ENABLE) != 0 && self.control & (1 << CTRL_CLOCK_GATE) == 0
    }

    /// True for VGA (640x480), false for QVGA (176x144). The frontend reads
    /// this to size the buffer it hands back from `CameraSource::poll_frame`.
    pub fn is_vga_mode(&self) -> bool {
        self.control & (1 << CTRL_MODE_VGA) != 0
    }

    /// Called once per scheduler tick targeting the camera.
    pub fn tick(&mut self, source: &mut impl CameraSource, bus: &mut impl crate::bus::Bus, irq: &mut IrqController) {
        if !self.enabled() {
            return;
        }
        if !self.capture_pending {
            self.capture_pending = source.request_frame();
            return;
        }
        if let Some(frame) = source.poll_frame() {
            self.capture_pending = false;
            self.last_frame = frame;
            let base = self.fb[0];
            for (i, &px) in self.last_frame.iter().enumerate() {
                bus.write16(base.wrapping_add(i as u32 * 2), px);
            }
            if self.irq_en & (1 << IRQ_FRAME_END) != 0 {
                self.irq_status |= 1 << IRQ_FRAME_END;
                irq.set_line(CAMERA_IRQ_LINE, true);
            }
        }
    }

    pub fn read(&self, offset: u16) -> u32 {
        match offset {
            REG_CONTROL => self.control,
            REG_FB0 => self.fb[0],
            REG_FB1 => self.fb[1],
            REG_FB2 => self.fb[2],
            REG_IRQ_EN => self.irq_en,
            REG_IRQ_STATUS => self.irq_status,
            _ => 0,
        }
    }

    pub fn write(&mut self, offset: u16, val: u32, irq: &mut IrqController) {
        match offset {
            REG_CONTROL => self.control = val,
            REG_FB0 => self.fb[0] = val,
            REG_FB1 => self.fb[1] = val,
            REG_FB2 => self.fb[2] = val,
            REG_IRQ_EN => self.irq_en = val,
            REG_IRQ_STATUS => {
                self.irq_status &= !val;
                if self.irq_status == 0 {
                    irq.set_line(CAMERA_IRQ_LINE, false);
                }
            }
            _ => crate::diag!("CAMERA", "write out of range: 0x{offset:04x}"),
        }
    }

    pub fn save_state(&self, w: &mut crate::savestate::SaveWriter<impl std::io::Write>) -> std::io::Result<()> {
        w.tag("CAM")?;
        w.u32(self.control)?;
        w.array_u32(&self.fb)?;
        w.u32(self.irq_en)?;
        w.u32(self.irq_status)?;
        Ok(())
    }

    pub fn load_state(
        &mut self,
        r: &mut crate::savestate::SaveReader<impl std::io::Read>,
    ) -> Result<(), crate::error::SaveStateError> {
        use crate::error::SaveStateError::UnexpectedEof;
        r.tag("CAM")?;
        self.control = r.u32().map_err(|_| UnexpectedEof)?;
        r.array_u32(&mut self.fb).map_err(|_| UnexpectedEof)?;
        self.irq_en = r.u32().map_err(|_| UnexpectedEof)?;
        self.irq_status = r.u32().map_err(|_| UnexpectedEof)?;
        self.capture_pending = false;
        Ok(())
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;

    struct FlatBus {
        mem: Vec<u8>,
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
            if let Some(s) = self.mem.get_mut(addr as usize) {
                *s = val;
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

    struct OneShotSource {
        frame: Option<Vec<u16>>,
    }
    impl CameraSource for OneShotSource {
        fn request_frame(&mut self) -> bool {
            true
        }
        fn poll_frame(&mut self) -> Option<Vec<u16>> {
            self.frame.take()
        }
    }

    #[test]
    fn completed_capture_writes_framebuffer_and_raises_irq() {
        let mut cam = Camera::new();
        let mut irq = IrqController::new();
        let mut bus = FlatBus { mem: vec![0; 16] };
        let mut src = OneShotSource { frame: Some(vec![0x1234, 0x5678]) };
        cam.write(REG_CONTROL, 1 << CTRL_ENABLE, &mut irq);
        cam.write(REG_FB0, 0, &mut irq);
        cam.write(REG_IRQ_EN, 1 << IRQ_FRAME_END, &mut irq);
        cam.tick(&mut src, &mut bus, &mut irq);
        assert_eq!(bus.read16(0), 0x1234);
        assert_eq!(bus.read16(2), 0x5678);
        assert_eq!(irq.dispatch(), Some(CAMERA_IRQ_LINE));
    }

    #[test]
    fn clock_gated_camera_ignores_ticks() {
        let mut cam = Camera::new();
        let mut irq = IrqController::new();
        let mut bus = FlatBus { mem: vec![0; 16] };
        let mut src = OneShotSource { frame: Some(vec![0xFFFF]) };
        cam.write(REG_CONTROL, 1 << CTRL_ENABLE | 1 << CTRL_CLOCK_GATE, &mut irq);
        cam.tick(&mut src, &mut bus, &mut irq);
        assert_eq!(bus.read16(0), 0);
    }
}
