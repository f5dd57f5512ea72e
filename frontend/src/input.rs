//! Keyboard-to-gamepad mapping. Button-to-bit assignment here is this
//! frontend's own invention — the IR gamepad/RF protocol itself is out of
//! scope (`SPEC_FULL.md` §1) — so it only needs to be internally consistent,
//! not grounded in a real controller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use sdl2::keyboard::Scancode;
use spg293_core::scheduler::InputSource;

pub const BTN_UP: u8 = 0;
pub const BTN_DOWN: u8 = 1;
pub const BTN_LEFT: u8 = 2;
pub const BTN_RIGHT: u8 = 3;
pub const BTN_A: u8 = 4;
pub const BTN_B: u8 = 5;
pub const BTN_START: u8 = 6;
pub const BTN_SELECT: u8 = 7;

pub struct KeyMap {
    map: HashMap<Scancode, u8>,
}

impl KeyMap {
    pub fn default_bindings() -> Self {
        let mut map = HashMap::new();
        map.insert(Scancode::Up, BTN_UP);
        map.insert(Scancode::Down, BTN_DOWN);
        map.insert(Scancode::Left, BTN_LEFT);
        map.insert(Scancode::Right, BTN_RIGHT);
        map.insert(Scancode::Z, BTN_A);
        map.insert(Scancode::X, BTN_B);
        map.insert(Scancode::Return, BTN_START);
        map.insert(Scancode::RShift, BTN_SELECT);
        Self { map }
    }

    pub fn bit_for(&self, scancode: Scancode) -> Option<u8> {
        self.map.get(&scancode).copied()
    }
}

/// Shared button bitmask, written by the SDL event loop on key up/down and
/// read by the scheduler thread via `InputSource::poll_buttons`.
#[derive(Clone)]
pub struct GamepadState {
    bits: Arc<AtomicU32>,
}

impl GamepadState {
    pub fn new() -> Self {
        Self {
            bits: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn set(&self, bit: u8, pressed: bool) {
        if pressed {
            self.bits.fetch_or(1 << bit, Ordering::Relaxed);
        } else {
            self.bits.fetch_and(!(1 << bit), Ordering::Relaxed);
        }
    }
}

impl InputSource for GamepadState {
    fn poll_buttons(&mut self) -> u32 {
        self.bits.load(Ordering::Relaxed)
    }
}
