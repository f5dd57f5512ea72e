//! SD/MMC host controller peripheral register face. Grounded verbatim in
//! the original device's `sdperiph.cpp`: eight 32-bit word registers,
//! command-word bit layout, status-word bit positions, and reset values.
//!
//! # Register map (32-bit words)
//!
//! | Word | Name |
//! |------|------|
//! | 0 | DATA-Tx FIFO |
//! | 1 | DATA-Rx FIFO |
//! | 2 | COMMAND |
//! | 3 | ARGUMENT |
//! | 4 | RESPONSE (one of four words, selected by an internal read pointer) |
//! | 5 | STATUS |
//! | 6 | CONTROL |
//! | 7 | INTEN |

use super::SdCard;
use crate::irq::IrqController;
use std::io::{Read, Seek, Write};

const REG_DATA_TX: u16 = 0;
const REG_DATA_RX: u16 = 1;
const REG_COMMAND: u16 = 2;
const REG_ARGUMENT: u16 = 3;
const REG_RESPONSE: u16 = 4;
const REG_STATUS: u16 = 5;
const REG_CONTROL: u16 = 6;
const REG_INTEN: u16 = 7;

const RESET_STATUS: u32 = 0x0000_100C;
const RESET_CONTROL: u32 = 0x0200_0954;

const STATUS_CMD_DONE: u32 = 0;
const STATUS_DATA_DONE: u32 = 1;

pub const SD_IRQ_LINE: u8 = 27;

pub struct SdHostController<S> {
    card: Option<SdCard<S>>,
    argument: u32,
    status: u32,
    control: u32,
    inten: u32,
}

impl<S: Read + Write + Seek> SdHostController<S> {
    pub fn new() -> Self {
        Self {
            card: None,
            argument: 0,
            status: RESET_STATUS,
            control: RESET_CONTROL,
            inten: 0,
        }
    }

    pub fn insert_card(&mut self, card: SdCard<S>) {
        self.card = Some(card);
    }

    pub fn eject_card(&mut self) {
        self.card = None;
    }

    pub fn reset(&mut self) {
        self.status = RESET_STATUS;
        self.control = RESET_CONTROL;
        self.argument = 0;
        if let Some(card) = &mut self.card {
            card.reset();
        }
    }

    pub fn read(&mut self, offset: u16) -> u32 {
        let word = offset / 4;
        match word {
            w if w == REG_DATA_RX => {
                let mut b = [0u8; 4];
                if let Some(card) = &mut self.card {
                    card.read_data(&mut b);
                }
                u32::from_le_bytes(b)
            }
            w if w == REG_ARGUMENT => self.argument,
            w if w == REG_RESPONSE => self.card.as_mut().map(|c| c.read_response()).unwrap_or(0),
            w if w == REG_STATUS => self.status,
            w if w == REG_CONTROL => self.control,
            w if w == REG_INTEN => self.inten,
            _ => 0,
        }
    }

    pub fn write(&mut self, offset: u16, val: u32, irq: &mut IrqController) {
        let word = offset / 4;
        match word {
            w if w == REG_DATA_TX => {
                if let Some(card) = &mut self.card {
                    card.write_data(&val.to_le_bytes());
                }
                self.status |= 1 << STATUS_DATA_DONE;
            }
            w if w == REG_COMMAND => {
                let command = (val & 0x3F) as u8;
                if let Some(card) = &mut self.card {
                    card.command(command, self.argument);
                }
                self.status |= 1 << STATUS_CMD_DONE;
                if self.inten & (1 << STATUS_CMD_DONE) != 0 {
                    irq.set_line(SD_IRQ_LINE, true);
                }
            }
            w if w == REG_ARGUMENT => self.argument = val,
            w if w == REG_STATUS => {
                self.status &= !val;
                if self.status == 0 {
                    irq.set_line(SD_IRQ_LINE, false);
                }
            }
            w if w == REG_CONTROL => self.control = val,
            w if w == REG_INTEN => self.inten = val,
            _ => crate::diag!("SDHOST", "write out of range: 0x{offset:04x}"),
        }
    }

    pub fn save_state(&self, w: &mut crate::savestate::SaveWriter<impl Write>) -> std::io::Result<()> {
        w.tag("SDHOST")?;
        w.u32(self.argument)?;
        w.u32(self.status)?;
        w.u32(self.control)?;
        w.u32(self.inten)?;
        Ok(())
    }

    pub fn load_state(
        &mut self,
        r: &mut crate::savestate::SaveReader<impl Read>,
    ) -> Result<(), crate::error::SaveStateError> {
        use crate::error::SaveStateError::UnexpectedEof;
        r.tag("SDHOST")?;
        self.argument = r.u32().map_err(|_| UnexpectedEof)?;
        self.status = r.u32().map_err(|_| UnexpectedEof)?;
        self.control = r.u32().map_err(|_| UnexpectedEof)?;
        self.inten = r.u32().map_err(|_| UnexpectedEof)?;
        Ok(())
    }
}

impl<S: Read + Write + Seek> Default for SdHostController<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdcard::cmd;
    use std::io::Cursor;

    fn insert_blank_card(host: &mut SdHostController<Cursor<Vec<u8>>>, size: usize) {
        host.insert_card(SdCard::new(Cursor::new(vec![0u8; size]), size as u64));
    }

    #[test]
    fn command_write_issues_to_card_and_sets_status() {
        let mut host = SdHostController::new();
        let mut irq = IrqController::new();
        insert_blank_card(&mut host, 512 * 512);
        host.write(REG_ARGUMENT * 4, 0, &mut irq);
        host.write(REG_COMMAND * 4, cmd::GO_IDLE_STATE as u32, &mut irq);
        assert_ne!(host.read(REG_STATUS * 4) & (1 << STATUS_CMD_DONE), 0);
    }

    #[test]
    fn status_write_clears_bits_and_deasserts_irq() {
        let mut host = SdHostController::new();
        let mut irq = IrqController::new();
        host.write(REG_INTEN * 4, 1, &mut irq);
        insert_blank_card(&mut host, 512 * 512);
        host.write(REG_COMMAND * 4, cmd::GO_IDLE_STATE as u32, &mut irq);
        assert_eq!(irq.dispatch(), Some(SD_IRQ_LINE));
        host.write(REG_STATUS * 4, 1 << STATUS_CMD_DONE, &mut irq);
        assert_eq!(host.read(REG_STATUS * 4) & (1 << STATUS_CMD_DONE), 0);
    }

    #[test]
    fn reset_resets_status_and_control_to_hardware_defaults() {
        let mut host: SdHostController<Cursor<Vec<u8>>> = SdHostController::new();
        assert_eq!(host.read(REG_STATUS * 4), RESET_STATUS);
        assert_eq!(host.read(REG_CONTROL * 4), RESET_CONTROL);
    }
}
