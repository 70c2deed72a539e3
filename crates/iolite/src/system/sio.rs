//! Serial I/O port: controller pads and memory cards.
//!
//! Both device families hang off the same full-duplex byte port. The first byte of a
//! transaction selects the device (0x01 pad, 0x81 card), every following write exchanges
//! one byte with the selected device's state machine, and dropping the port's DTR line
//! ends the transaction.
//!
//! Card storage is flash-like: writes can only clear bits, so the port ANDs new data into
//! the existing page content and logs any attempt to set a bit that erase didn't clear.

use crate::system::{System, intc::Interrupt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Card page size in bytes.
pub const PAGE_LEN: u32 = 512;
/// Pages per erase block.
pub const ERASE_BLOCK_PAGES: u32 = 16;

/// Every card reply sequence ends with this marker followed by the terminator byte.
const REPLY_END: u8 = 0x2B;
const DEFAULT_TERMINATOR: u8 = 0x55;

const CTRL_DTR: u16 = 0x0002;
const CTRL_RESET: u16 = 0x0040;
const CTRL_ACK_IRQ: u16 = 0x1000;

const STAT_TX_READY: u16 = 0x0005;
const STAT_RX_AVAILABLE: u16 = 0x0002;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
enum Device {
    #[default]
    None,
    Pad,
    Card,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
enum CardPhase {
    /// Awaiting a command byte.
    #[default]
    Command,
    /// Collecting a four byte page address plus its XOR checksum.
    Address { cmd: u8, buf: [u8; 4], got: u8 },
    /// Awaiting the length byte of a write.
    WriteLen,
    /// Collecting write payload, then its checksum.
    WriteData { remaining: u8 },
    WriteChecksum,
    /// Awaiting the length byte of a read.
    ReadLen,
    /// Awaiting the new terminator byte.
    SetTerminator,
    /// Replies are prebuilt; incoming bytes just clock them out.
    Scripted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
enum PadPhase {
    #[default]
    Command,
    Ack,
    ButtonsLow,
    ButtonsHigh,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interface {
    pub mode: u16,
    pub ctrl: u16,
    pub baud: u16,

    device: Device,
    rx: VecDeque<u8>,

    pad_phase: PadPhase,
    pad_buttons: u16,

    card_phase: CardPhase,
    card_absent: bool,
    /// Prebuilt replies clocked out one per incoming byte.
    replies: VecDeque<u8>,
    terminator: u8,
    read_addr: u32,
    write_addr: u32,
    erase_addr: u32,
    write_buf: Vec<u8>,
    checksum: u8,
}

impl Default for Interface {
    fn default() -> Self {
        Self {
            mode: 0,
            ctrl: 0,
            baud: 0,
            device: Device::None,
            rx: VecDeque::new(),
            pad_phase: PadPhase::Command,
            pad_buttons: 0xFFFF,
            card_phase: CardPhase::Command,
            card_absent: false,
            replies: VecDeque::new(),
            terminator: DEFAULT_TERMINATOR,
            read_addr: 0,
            write_addr: 0,
            erase_addr: 0,
            write_buf: Vec::new(),
            checksum: 0,
        }
    }
}

impl Interface {
    fn end_transaction(&mut self) {
        self.device = Device::None;
        self.pad_phase = PadPhase::Command;
        self.card_phase = CardPhase::Command;
        self.replies.clear();
        self.write_buf.clear();
    }

    fn reset(&mut self) {
        self.end_transaction();
        self.rx.clear();
        self.terminator = DEFAULT_TERMINATOR;
    }
}

pub fn read_data(sys: &mut System) -> u8 {
    sys.sio.rx.pop_front().unwrap_or(0xFF)
}

pub fn read_stat(sys: &System) -> u16 {
    let mut stat = STAT_TX_READY;
    if !sys.sio.rx.is_empty() {
        stat |= STAT_RX_AVAILABLE;
    }
    stat
}

pub fn write_ctrl(sys: &mut System, value: u16) {
    if value & CTRL_RESET != 0 {
        sys.sio.reset();
    }
    if value & CTRL_DTR == 0 {
        sys.sio.end_transaction();
    }
    sys.sio.ctrl = value & !CTRL_RESET;
}

pub fn write_data(sys: &mut System, value: u8) {
    let response = match sys.sio.device {
        Device::None => select_device(sys, value),
        Device::Pad => pad_exchange(sys, value),
        Device::Card => card_exchange(sys, value),
    };
    sys.sio.rx.push_back(response);

    if sys.sio.ctrl & CTRL_ACK_IRQ != 0 {
        sys.raise_interrupt(Interrupt::Sio0);
    }
}

fn select_device(sys: &mut System, value: u8) -> u8 {
    match value {
        0x01 => {
            sys.sio.device = Device::Pad;
            sys.sio.pad_phase = PadPhase::Command;
        }
        0x81 => {
            sys.sio.device = Device::Card;
            sys.sio.card_phase = CardPhase::Command;
            sys.sio.card_absent = !sys.modules.card.present();
        }
        _ => {
            tracing::warn!(target: "iolite::sio", value, "unknown device select");
        }
    }
    0xFF
}

fn pad_exchange(sys: &mut System, value: u8) -> u8 {
    let sio = &mut sys.sio;
    match sio.pad_phase {
        PadPhase::Command => {
            if value != 0x42 {
                tracing::debug!(target: "iolite::sio", value, "unsupported pad command");
                sio.pad_phase = PadPhase::Done;
                return 0xFF;
            }
            sio.pad_buttons = sys.modules.input.buttons();
            sio.pad_phase = PadPhase::Ack;
            // digital pad id
            0x41
        }
        PadPhase::Ack => {
            sio.pad_phase = PadPhase::ButtonsLow;
            0x5A
        }
        PadPhase::ButtonsLow => {
            sio.pad_phase = PadPhase::ButtonsHigh;
            (sio.pad_buttons & 0xFF) as u8
        }
        PadPhase::ButtonsHigh => {
            sio.pad_phase = PadPhase::Done;
            (sio.pad_buttons >> 8) as u8
        }
        PadPhase::Done => 0xFF,
    }
}

fn card_exchange(sys: &mut System, value: u8) -> u8 {
    if sys.sio.card_absent {
        return 0xFF;
    }

    match sys.sio.card_phase.clone() {
        CardPhase::Command => card_command(sys, value),

        CardPhase::Address { cmd, mut buf, got } => {
            if (got as usize) < buf.len() {
                buf[got as usize] = value;
                sys.sio.card_phase = CardPhase::Address { cmd, buf, got: got + 1 };
                return 0xFF;
            }

            let expected = buf.iter().fold(0, |acc, b| acc ^ b);
            if value != expected {
                tracing::warn!(
                    target: "iolite::sio",
                    cmd,
                    value,
                    expected,
                    "bad address checksum"
                );
            }

            let page = u32::from_le_bytes(buf);
            let addr = page * PAGE_LEN;
            match cmd {
                0x21 => sys.sio.erase_addr = addr,
                0x22 => sys.sio.write_addr = addr,
                _ => sys.sio.read_addr = addr,
            }

            script_tail(&mut sys.sio);
            0xFF
        }

        CardPhase::WriteLen => {
            sys.sio.write_buf.clear();
            sys.sio.checksum = 0;
            if value == 0 {
                script_tail(&mut sys.sio);
            } else {
                sys.sio.card_phase = CardPhase::WriteData { remaining: value };
            }
            0xFF
        }

        CardPhase::WriteData { remaining } => {
            sys.sio.write_buf.push(value);
            sys.sio.checksum ^= value;
            if remaining > 1 {
                sys.sio.card_phase = CardPhase::WriteData { remaining: remaining - 1 };
            } else {
                sys.sio.card_phase = CardPhase::WriteChecksum;
            }
            0xFF
        }

        CardPhase::WriteChecksum => {
            if value != sys.sio.checksum {
                tracing::warn!(
                    target: "iolite::sio",
                    value,
                    expected = sys.sio.checksum,
                    "bad write checksum"
                );
            }
            commit_write(sys);
            script_tail(&mut sys.sio);
            0xFF
        }

        CardPhase::SetTerminator => {
            sys.sio.terminator = value;
            script_tail(&mut sys.sio);
            0xFF
        }

        CardPhase::ReadLen => {
            let addr = sys.sio.read_addr;
            let mut data = vec![0u8; value as usize];
            sys.modules.card.read(addr, &mut data);
            sys.sio.read_addr += value as u32;

            let checksum = data.iter().fold(0, |acc, b| acc ^ b);
            sys.sio.replies.clear();
            sys.sio.replies.push_back(REPLY_END);
            sys.sio.replies.extend(&data);
            sys.sio.replies.push_back(checksum);
            sys.sio.replies.push_back(sys.sio.terminator);
            sys.sio.card_phase = CardPhase::Scripted;
            0xFF
        }

        CardPhase::Scripted => {
            let reply = sys.sio.replies.pop_front().unwrap_or(0xFF);
            if sys.sio.replies.is_empty() {
                sys.sio.card_phase = CardPhase::Command;
            }
            reply
        }
    }
}

/// Queues the standard end-of-command reply pair.
fn script_tail(sio: &mut Interface) {
    sio.replies.clear();
    sio.replies.push_back(REPLY_END);
    sio.replies.push_back(sio.terminator);
    sio.card_phase = CardPhase::Scripted;
}

fn card_command(sys: &mut System, cmd: u8) -> u8 {
    match cmd {
        // probe / erase wake-up
        0x11 | 0x12 => script_tail(&mut sys.sio),

        0x21 | 0x22 | 0x23 => {
            sys.sio.card_phase = CardPhase::Address { cmd, buf: [0; 4], got: 0 };
        }

        // card specs
        0x26 => {
            let pages = sys.modules.card.pages();
            let mut specs = Vec::with_capacity(8);
            specs.extend((PAGE_LEN as u16).to_le_bytes());
            specs.extend((ERASE_BLOCK_PAGES as u16).to_le_bytes());
            specs.extend(pages.to_le_bytes());
            let checksum = specs.iter().fold(0, |acc, b| acc ^ b);

            sys.sio.replies.clear();
            sys.sio.replies.push_back(REPLY_END);
            sys.sio.replies.extend(&specs);
            sys.sio.replies.push_back(checksum);
            sys.sio.replies.push_back(sys.sio.terminator);
            sys.sio.card_phase = CardPhase::Scripted;
        }

        // set terminator: the next byte is the new value
        0x27 => sys.sio.card_phase = CardPhase::SetTerminator,

        // get terminator
        0x28 => script_tail(&mut sys.sio),

        0x42 => sys.sio.card_phase = CardPhase::WriteLen,
        0x43 => sys.sio.card_phase = CardPhase::ReadLen,

        // erase the block at the erase address
        0x82 => {
            let addr = sys.sio.erase_addr;
            sys.modules.card.erase(addr, ERASE_BLOCK_PAGES * PAGE_LEN);
            script_tail(&mut sys.sio);
        }

        _ => {
            tracing::warn!(target: "iolite::sio", cmd, "unknown card command");
            script_tail(&mut sys.sio);
        }
    }
    0xFF
}

/// Reads the current page content and ANDs the payload in, logging set-bit attempts.
fn commit_write(sys: &mut System) {
    let addr = sys.sio.write_addr;
    let len = sys.sio.write_buf.len();

    let mut current = vec![0u8; len];
    sys.modules.card.read(addr, &mut current);

    let mut set_bits = false;
    let combined: Vec<u8> = current
        .iter()
        .zip(&sys.sio.write_buf)
        .map(|(cur, new)| {
            if new & !cur != 0 {
                set_bits = true;
            }
            cur & new
        })
        .collect();

    if set_bits {
        tracing::warn!(
            target: "iolite::sio",
            addr,
            len,
            "write tries to set bits that were not erased"
        );
    }

    sys.modules.card.write(addr, &combined);
    sys.sio.write_addr += len as u32;
}
