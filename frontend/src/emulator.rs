//! SDL event loop. Grounded on the teacher's `emulator.rs` shape (poll
//! events, advance emulation, present, repeat) with the single
//! `Machine::run_frame` swapped for `Scheduler::advance` driven by a
//! measured wall-clock slice, per §4.13.

use std::io::{Read, Seek, Write as IoWrite};
use std::path::PathBuf;
use std::time::Instant;

use sdl2::event::Event;
use sdl2::keyboard::Scancode;

use spg293_core::savestate::{SaveReader, SaveWriter};
use spg293_core::scheduler::{Scheduler, SchedulerEvent};
use spg293_core::system::System;

use crate::audio;
use crate::camera_host::HostCamera;
use crate::input::{GamepadState, KeyMap};
use crate::overlay;
use crate::signals::Hotkeys;
use crate::storage;
use crate::video::Video;

const NATIVE_WIDTH: u32 = 640;
const NATIVE_HEIGHT: u32 = 480;

pub fn run<S: Read + IoWrite + Seek>(
    system: &mut System<S>,
    save_dir: PathBuf,
    camera_device: Option<&str>,
    camera_vga: bool,
    scale: u32,
) {
    let sdl_context = sdl2::init().expect("Failed to initialize SDL2");
    let sdl_video = sdl_context.video().expect("Failed to init SDL video");
    let sdl_audio = sdl_context.audio().expect("Failed to init SDL audio");
    let mut event_pump = sdl_context.event_pump().expect("Failed to get event pump");

    let mut video = Video::new(&sdl_video, "SPG293", NATIVE_WIDTH, NATIVE_HEIGHT, scale);
    let (audio_device, mut audio_queue, fade_out) = audio::init(&sdl_audio);
    audio_device.resume();

    let key_map = KeyMap::default_bindings();
    let gamepad = GamepadState::new();
    let mut camera = HostCamera::open(camera_device, camera_vga);
    let mut hotkeys = Hotkeys::new();
    let mut scheduler = Scheduler::new();
    let mut gamepad_src = gamepad.clone();

    let mut rgb24 = vec![0u8; (NATIVE_WIDTH * NATIVE_HEIGHT * 3) as usize];
    let mut last_tick = Instant::now();
    let mut frame_count: u32 = 0;
    let mut fps_accum = std::time::Duration::ZERO;
    let mut fps_text = String::from("0.0");

    'main: loop {
        for event in event_pump.poll_iter() {
            match event {
                Event::Quit { .. } => break 'main,
                Event::KeyDown { scancode: Some(Scancode::Escape), .. } => break 'main,
                Event::KeyDown { scancode: Some(Scancode::F2), repeat: false, .. } => {
                    hotkeys.request_soft_reset();
                }
                Event::KeyDown { scancode: Some(Scancode::F5), repeat: false, .. } => {
                    hotkeys.request_save(0);
                }
                Event::KeyDown { scancode: Some(Scancode::F9), repeat: false, .. } => {
                    hotkeys.request_load(0);
                }
                Event::KeyDown { scancode: Some(sc), repeat: false, .. } => {
                    if let Some(bit) = key_map.bit_for(sc) {
                        gamepad.set(bit, true);
                    }
                }
                Event::KeyUp { scancode: Some(sc), .. } => {
                    if let Some(bit) = key_map.bit_for(sc) {
                        gamepad.set(bit, false);
                    }
                }
                _ => {}
            }
        }

        let now = Instant::now();
        let dt = now.duration_since(last_tick);
        last_tick = now;

        let event = scheduler.advance(system, &mut gamepad_src, &mut camera, &mut audio_queue, &mut hotkeys, dt);

        match event {
            SchedulerEvent::None => {}
            SchedulerEvent::Shutdown => {
                fade_out.store(true, std::sync::atomic::Ordering::Relaxed);
                std::thread::sleep(audio::fade_out_duration());
                break 'main;
            }
            SchedulerEvent::SaveRequested(slot) => {
                if let Err(e) = save_slot(system, &save_dir, slot) {
                    eprintln!("Warning: save to slot {slot} failed: {e}");
                }
            }
            SchedulerEvent::LoadRequested(slot) => {
                if let Err(e) = load_slot(system, &save_dir, slot) {
                    eprintln!("Warning: load from slot {slot} failed: {e}");
                }
            }
        }

        rgb565_to_rgb24(system.framebuffer(), &mut rgb24);
        overlay::draw_fps(&mut rgb24, NATIVE_WIDTH as usize, &fps_text);
        video.present(&rgb24);

        frame_count += 1;
        fps_accum += dt;
        if fps_accum >= std::time::Duration::from_secs(1) {
            fps_text = format!("{:.1}", frame_count as f64 / fps_accum.as_secs_f64());
            frame_count = 0;
            fps_accum = std::time::Duration::ZERO;
        }
    }
}

fn rgb565_to_rgb24(src: &[u16], dst: &mut [u8]) {
    for (px, out) in src.iter().zip(dst.chunks_exact_mut(3)) {
        let r5 = (px >> 11) & 0x1F;
        let g6 = (px >> 5) & 0x3F;
        let b5 = px & 0x1F;
        out[0] = ((r5 << 3) | (r5 >> 2)) as u8;
        out[1] = ((g6 << 2) | (g6 >> 4)) as u8;
        out[2] = ((b5 << 3) | (b5 >> 2)) as u8;
    }
}

fn save_slot<S: Read + IoWrite + Seek>(system: &System<S>, save_dir: &std::path::Path, slot: u8) -> std::io::Result<()> {
    std::fs::create_dir_all(save_dir)?;
    let path = storage::save_slot_path(save_dir, slot);
    let file = std::fs::File::create(&path)?;
    let mut writer = SaveWriter::new(file);
    system.save_state(&mut writer)?;
    writer.finalise()?;
    Ok(())
}

fn load_slot<S: Read + IoWrite + Seek>(system: &mut System<S>, save_dir: &std::path::Path, slot: u8) -> std::io::Result<()> {
    let path = storage::save_slot_path(save_dir, slot);
    let file = std::fs::File::open(&path)?;
    let mut reader = SaveReader::new(file);
    system
        .load_state(&mut reader)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
}
