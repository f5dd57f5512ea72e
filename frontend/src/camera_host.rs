//! Webcam capture worker. Grounded on the teacher's `audio.rs` shared-buffer
//! + background-thread shape, retargeted from an SDL audio callback to a
//! `v4l`-backed capture thread implementing `CameraSource`.

use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::thread::JoinHandle;

use spg293_core::camera::CameraSource;
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

enum WorkerMsg {
    Capture,
    Stop,
}

/// Drives a V4L2 device on a background thread so the emulator thread never
/// blocks on a frame grab. `None` device path runs a synthetic test-pattern
/// source instead, for headless / no-webcam configurations.
pub struct HostCamera {
    tx: Sender<WorkerMsg>,
    rx: Receiver<Vec<u16>>,
    handle: Option<JoinHandle<()>>,
    pending: bool,
}

impl HostCamera {
    pub fn open(device_path: Option<&str>, vga: bool) -> Self {
        let (req_tx, req_rx) = channel::<WorkerMsg>();
        let (frame_tx, frame_rx) = channel::<Vec<u16>>();
        let device_path = device_path.map(str::to_owned);

        let handle = std::thread::spawn(move || worker_loop(device_path, vga, req_rx, frame_tx));

        Self {
            tx: req_tx,
            rx: frame_rx,
            handle: Some(handle),
            pending: false,
        }
    }

    pub fn stop(&mut self) {
        let _ = self.tx.send(WorkerMsg::Stop);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for HostCamera {
    fn drop(&mut self) {
        self.stop();
    }
}

impl CameraSource for HostCamera {
    fn request_frame(&mut self) -> bool {
        if self.pending {
            return true;
        }
        if self.tx.send(WorkerMsg::Capture).is_ok() {
            self.pending = true;
            true
        } else {
            false
        }
    }

    fn poll_frame(&mut self) -> Option<Vec<u16>> {
        match self.rx.try_recv() {
            Ok(frame) => {
                self.pending = false;
                Some(frame)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.pending = false;
                None
            }
        }
    }
}

fn worker_loop(
    device_path: Option<String>,
    vga: bool,
    req_rx: Receiver<WorkerMsg>,
    frame_tx: Sender<Vec<u16>>,
) {
    let (width, height) = if vga { (640, 480) } else { (176, 144) };
    let mut device = device_path.as_deref().and_then(|path| open_device(path, width, height));

    while let Ok(msg) = req_rx.recv() {
        match msg {
            WorkerMsg::Stop => return,
            WorkerMsg::Capture => {
                let frame = match &mut device {
                    Some(dev) => capture_frame(dev, width, height).unwrap_or_else(|| synthetic_frame(width, height)),
                    None => synthetic_frame(width, height),
                };
                if frame_tx.send(frame).is_err() {
                    return;
                }
            }
        }
    }
}

fn open_device(path: &str, width: u32, height: u32) -> Option<Device> {
    let dev = Device::with_path(path).ok()?;
    let mut fmt = dev.format().ok()?;
    fmt.width = width;
    fmt.height = height;
    fmt.fourcc = v4l::FourCC::new(b"RGB3");
    dev.set_format(&fmt).ok()?;
    Some(dev)
}

/// Opens a fresh mmap stream per capture rather than keeping one alive
/// across calls, trading a little throughput for not having to carry a
/// `MmapStream<'_>` borrowing `dev` across worker-loop iterations.
fn capture_frame(dev: &mut Device, width: u32, height: u32) -> Option<Vec<u16>> {
    let mut stream = MmapStream::with_buffers(dev, Type::VideoCapture, 4).ok()?;
    let (buf, _meta) = stream.next().ok()?;
    let pixel_count = (width * height) as usize;
    if buf.len() < pixel_count * 3 {
        return None;
    }
    let mut out = Vec::with_capacity(pixel_count);
    for px in buf.chunks_exact(3).take(pixel_count) {
        out.push(rgb24_to_565(px[0], px[1], px[2]));
    }
    Some(out)
}

fn synthetic_frame(width: u32, height: u32) -> Vec<u16> {
    let mut out = Vec::with_capacity((width * height) as usize);
    for y in 0..height {
        for x in 0..width {
            let r = (x * 31 / width.max(1)) as u8;
            let g = (y * 63 / height.max(1)) as u8;
            out.push(rgb24_to_565(r << 3, g << 2, r << 3));
        }
    }
    out
}

fn rgb24_to_565(r: u8, g: u8, b: u8) -> u16 {
    let r5 = (r >> 3) as u16;
    let g6 = (g >> 2) as u16;
    let b5 = (b >> 3) as u16;
    (r5 << 11) | (g6 << 5) | b5
}
