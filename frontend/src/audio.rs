//! SDL2 stereo audio output. Grounded on the teacher's `audio.rs` ring-buffer
//! + fade-in/out callback, widened from a mono machine-speaker stream to the
//! SPU's interleaved stereo 48 kHz output.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use sdl2::audio::{AudioCallback, AudioDevice, AudioSpecDesired};
use spg293_core::scheduler::AudioSink;

/// Number of interleaved samples (i.e. half that many frames) over which to
/// fade in/out.
const FADE_SAMPLES: u32 = 512;

const SPU_HOST_RATE: i32 = 48_000;

pub(crate) struct AudioPlayer {
    buffer: Arc<Mutex<VecDeque<i16>>>,
    fade_in_pos: u32,
    fading_out: Arc<AtomicBool>,
    fade_out_pos: u32,
}

impl AudioCallback for AudioPlayer {
    type Channel = i16;
    fn callback(&mut self, out: &mut [i16]) {
        let mut buf = self.buffer.lock().unwrap();
        for sample in out.iter_mut() {
            let raw = buf.pop_front().unwrap_or(0);

            if self.fade_in_pos < FADE_SAMPLES {
                let gain = self.fade_in_pos as f32 / FADE_SAMPLES as f32;
                *sample = (raw as f32 * gain) as i16;
                self.fade_in_pos += 1;
            } else if self.fading_out.load(Ordering::Relaxed) {
                if self.fade_out_pos < FADE_SAMPLES {
                    let gain = 1.0 - (self.fade_out_pos as f32 / FADE_SAMPLES as f32);
                    *sample = (raw as f32 * gain) as i16;
                    self.fade_out_pos += 1;
                } else {
                    *sample = 0;
                }
            } else {
                *sample = raw;
            }
        }
    }
}

pub type FadeOut = Arc<AtomicBool>;

/// Feeds interleaved (left, right) pairs into the ring buffer SDL drains
/// from. Caps queued depth at 4096 frames (§4.12's audio output spec) to
/// avoid unbounded growth if the device stalls.
pub struct AudioQueue {
    buffer: Arc<Mutex<VecDeque<i16>>>,
}

impl AudioSink for AudioQueue {
    fn push_sample(&mut self, left: i16, right: i16) {
        let mut buf = self.buffer.lock().unwrap();
        if buf.len() < 4096 * 2 {
            buf.push_back(left);
            buf.push_back(right);
        }
    }
}

/// Opens the SDL audio device and returns the device handle (must be kept
/// alive for the duration of playback), a sink for the scheduler to push
/// samples into, and a fade-out signal for clean shutdown.
pub fn init(sdl_audio: &sdl2::AudioSubsystem) -> (AudioDevice<AudioPlayer>, AudioQueue, FadeOut) {
    let buffer: Arc<Mutex<VecDeque<i16>>> = Arc::new(Mutex::new(VecDeque::with_capacity(4096 * 2)));
    let fade_out: FadeOut = Arc::new(AtomicBool::new(false));

    let desired_spec = AudioSpecDesired {
        freq: Some(SPU_HOST_RATE),
        channels: Some(2),
        samples: Some(1024),
    };

    let device = sdl_audio
        .open_playback(None, &desired_spec, |_spec| AudioPlayer {
            buffer: Arc::clone(&buffer),
            fade_in_pos: 0,
            fading_out: Arc::clone(&fade_out),
            fade_out_pos: 0,
        })
        .expect("Failed to open SDL audio device");

    (device, AudioQueue { buffer }, fade_out)
}

pub fn fade_out_duration() -> std::time::Duration {
    std::time::Duration::from_millis(15)
}
