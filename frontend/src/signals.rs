//! Soft reset / shutdown / save-load hotkey state, polled by the scheduler's
//! `HostSignals` hook once per "every 100th instruction" checkpoint.

use spg293_core::scheduler::HostSignals;

pub struct Hotkeys {
    soft_reset: bool,
    shutdown: bool,
    save_slot: Option<u8>,
    load_slot: Option<u8>,
}

impl Hotkeys {
    pub fn new() -> Self {
        Self {
            soft_reset: false,
            shutdown: false,
            save_slot: None,
            load_slot: None,
        }
    }

    pub fn request_soft_reset(&mut self) {
        self.soft_reset = true;
    }

    pub fn request_shutdown(&mut self) {
        self.shutdown = true;
    }

    pub fn request_save(&mut self, slot: u8) {
        self.save_slot = Some(slot);
    }

    pub fn request_load(&mut self, slot: u8) {
        self.load_slot = Some(slot);
    }
}

impl HostSignals for Hotkeys {
    fn take_soft_reset(&mut self) -> bool {
        std::mem::take(&mut self.soft_reset)
    }

    fn take_shutdown(&mut self) -> bool {
        std::mem::take(&mut self.shutdown)
    }

    fn take_save_request(&mut self) -> Option<u8> {
        self.save_slot.take()
    }

    fn take_load_request(&mut self) -> Option<u8> {
        self.load_slot.take()
    }
}
