//! Interleaves CPU steps with peripheral ticks at the ratios given in
//! `SPEC_FULL.md` §4.13, grounded on the teacher's `frontend/src/emulator.rs`
//! main-loop shape (poll host input, advance one slice of emulation, present
//! a frame, repeat) with the single per-frame `machine.run_frame()` call
//! expanded into this SoC's five independent instruction-count cadences plus
//! a wall-clock-derived 32 kHz tick and SPU host-sample accumulator.
//!
//! Game-pad key mapping and the IR/RF gamepad protocol itself are out of
//! scope; `InputSource` is the narrow hook the scheduler polls in their
//! place, mirroring `CameraSource`'s boundary. Likewise `HostSignals` and
//! `AudioSink` keep file I/O, UI hotkeys, and the audio device out of this
//! crate, per the host-I/O boundary the rest of the core already follows.

use crate::camera::CameraSource;
use crate::system::System;
use std::io::{Read, Seek, Write as IoWrite};
use std::time::Duration;

/// Nominal main-CPU clock used only to pace how many instructions a given
/// wall-clock slice should run; emulation is not cycle-exact (see
/// `SPEC_FULL.md`'s explicit non-goal), so this is a reasonable approximation
/// rather than a grounded silicon figure.
const NOMINAL_HZ: f64 = 27_000_000.0;

const TIMER_TICK_INSTRS: u64 = 4;
const SPU_TICK_INSTRS: u64 = 200;
const INPUT_TICK_INSTRS: u64 = 320;
const VIDEO_TICK_INSTRS: u64 = 2000;
const VIDEO_PPU_OFFSET: u64 = 1000;
/// No surviving cadence for the camera interface; placed opposite the PPU
/// offset within the same 2000-instruction group since nothing in the
/// pack constrains it further.
const VIDEO_CAMERA_OFFSET: u64 = 1750;
const WALLCLOCK_CHECK_INSTRS: u64 = 100;

const HZ_32768_PERIOD: Duration = Duration::from_nanos(30_517);

/// `1 / 48000` and `1 / 281250` expressed as the gain/loss of the SPU's
/// host-rate accumulator described in §4.9.
const SPU_HOST_SAMPLE_GAIN: f64 = 1.0 / 48_000.0;
const SPU_ENGINE_TICK_COST: f64 = 1.0 / 281_250.0;

/// Host-provided gamepad/RF sample. Key-to-bit mapping lives in the
/// frontend; the scheduler only threads the resulting bitmask onto GPIO
/// port A, which is as far as this crate models "game-pad input".
pub trait InputSource {
    fn poll_buttons(&mut self) -> u32;
}

/// Host audio device. Receives one interleaved stereo frame per SPU host
/// sample; resampling to the device's own buffer lives in the frontend.
pub trait AudioSink {
    fn push_sample(&mut self, left: i16, right: i16);
}

/// Host-owned request flags: soft reset, shutdown, and save/load slot
/// numbers, typically driven by UI hotkeys. Polled at the same cadence as
/// wall-clock input, per §4.13.
pub trait HostSignals {
    fn take_soft_reset(&mut self) -> bool;
    fn take_shutdown(&mut self) -> bool;
    fn take_save_request(&mut self) -> Option<u8>;
    fn take_load_request(&mut self) -> Option<u8>;
}

/// What the caller should do after an `advance()` slice, for requests the
/// scheduler itself cannot service without host file I/O.
pub enum SchedulerEvent {
    None,
    Shutdown,
    SaveRequested(u8),
    LoadRequested(u8),
}

pub struct Scheduler {
    instr_count: u64,
    wall_accum: Duration,
    spu_rate_conv: f64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            instr_count: 0,
            wall_accum: Duration::ZERO,
            spu_rate_conv: 0.0,
        }
    }

    /// Runs roughly `dt` worth of emulated time against `system`, honouring
    /// every cadence in §4.13. Returns at most one event for the caller to
    /// act on; a save/load/shutdown request found mid-slice stops the slice
    /// early rather than queuing, since each of those is itself a "go do
    /// host I/O and come back" point.
    pub fn advance<S: Read + IoWrite + Seek>(
        &mut self,
        system: &mut System<S>,
        input: &mut impl InputSource,
        camera_source: &mut impl CameraSource,
        audio: &mut impl AudioSink,
        signals: &mut impl HostSignals,
        dt: Duration,
    ) -> SchedulerEvent {
        let instrs = (NOMINAL_HZ * dt.as_secs_f64()).round() as u64;
        for _ in 0..instrs {
            system.step_cpu();
            self.instr_count = self.instr_count.wrapping_add(1);

            if self.instr_count % TIMER_TICK_INSTRS == 0 {
                system.tick_timers(false);
            }
            if self.instr_count % SPU_TICK_INSTRS == 0 {
                self.tick_spu_host_sample(system, audio);
            }
            if self.instr_count % INPUT_TICK_INSTRS == 0 {
                self.tick_input(system, input);
            }
            if self.instr_count % VIDEO_TICK_INSTRS == VIDEO_PPU_OFFSET {
                system.tick_ppu();
            }
            if self.instr_count % VIDEO_TICK_INSTRS == VIDEO_CAMERA_OFFSET {
                system.tick_camera(camera_source);
            }
            if self.instr_count % WALLCLOCK_CHECK_INSTRS == 0 {
                if let Some(event) = self.wallclock_checkpoint(system, signals, dt, instrs) {
                    return event;
                }
            }
        }
        SchedulerEvent::None
    }

    fn tick_input<S: Read + IoWrite + Seek>(&mut self, system: &mut System<S>, input: &mut impl InputSource) {
        let buttons = input.poll_buttons();
        for pin in 0..32u8 {
            let pressed = (buttons >> pin) & 1 != 0;
            system.gpio.set_input(crate::gpio::Port::A, pin, pressed);
        }
    }

    fn tick_spu_host_sample<S: Read + IoWrite + Seek>(
        &mut self,
        system: &mut System<S>,
        audio: &mut impl AudioSink,
    ) {
        self.spu_rate_conv += SPU_HOST_SAMPLE_GAIN;
        while self.spu_rate_conv > 0.0 {
            system.tick_spu_engine();
            self.spu_rate_conv -= SPU_ENGINE_TICK_COST;
        }
        let (l, r) = system.mix_spu_sample();
        audio.push_sample(l, r);
    }

    /// The "every 100th" duty: batched 32 kHz timer ticks, plus polling for
    /// soft reset / shutdown / save / load requests. `dt`/`instrs` let the
    /// per-checkpoint wall-clock slice be apportioned evenly across the
    /// instructions run in this `advance()` call, since the caller only
    /// hands us one slice's elapsed time up front rather than a clock we can
    /// sample ourselves.
    fn wallclock_checkpoint<S: Read + IoWrite + Seek>(
        &mut self,
        system: &mut System<S>,
        signals: &mut impl HostSignals,
        dt: Duration,
        instrs: u64,
    ) -> Option<SchedulerEvent> {
        if instrs > 0 {
            let slice = dt / instrs as u32 * WALLCLOCK_CHECK_INSTRS as u32;
            self.wall_accum += slice;
        }
        while self.wall_accum >= HZ_32768_PERIOD {
            system.tick_timers(true);
            self.wall_accum -= HZ_32768_PERIOD;
        }

        if signals.take_soft_reset() {
            system.soft_reset();
        }
        if signals.take_shutdown() {
            return Some(SchedulerEvent::Shutdown);
        }
        if let Some(slot) = signals.take_save_request() {
            return Some(SchedulerEvent::SaveRequested(slot));
        }
        if let Some(slot) = signals.take_load_request() {
            return Some(SchedulerEvent::LoadRequested(slot));
        }
        let _ = std::io::stdout().flush();
        None
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
