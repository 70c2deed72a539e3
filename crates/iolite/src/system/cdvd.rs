//! Disc controller.
//!
//! A command state machine over two byte-stream register groups: N commands (seek, read,
//! standby, stop, break) complete asynchronously through scheduled events and raise the
//! disc INTC cause, while S commands (mechacon queries, clock, configuration) answer
//! synchronously through a small result FIFO.
//!
//! Seek and read latencies are approximated, not derived from datasheets. The constants
//! below were tuned against real software and are load-bearing: do not round them off.

use crate::{
    modules::disc::{DiscType, DualLayer},
    system::{System, dma, intc::Interrupt},
};
use r3000::{Cycles, FREQUENCY};
use serde::{Deserialize, Serialize};
use strum::FromRepr;

/// Raw frame length handed over by the disc backend. Every block size is sliced out of this.
pub const RAW_FRAME_LEN: usize = 2352;

/// Bytes per second at 1x for the CD format class.
const CD_BYTES_PER_SECOND: u64 = 153_600;
/// Bytes per second at 1x for the DVD format class. Deliberately faster than the real
/// 1350KB/s: software cares about seek delays far more than streaming rate.
const DVD_BYTES_PER_SECOND: u64 = 1_382_400 + 256_000;

/// Seeks within this many sectors are served by reading through, not by moving the head.
const CONTIGUOUS_SEEK_SECTORS: u32 = 9;
/// Head settle dominates seek time, so distance does not factor in. 40ms.
const AVERAGE_SEEK_CYCLES: u64 = (FREQUENCY * 40) / 1000;
/// Motor spin-up from a stopped disc. 333ms.
const SPIN_UP_CYCLES: u64 = FREQUENCY / 3;
/// Stop command delay. 166ms.
const STOP_CYCLES: u64 = FREQUENCY / 6;
const BREAK_ACK_CYCLES: u64 = 64;

const STATUS_NONE: u8 = 0x00;
const STATUS_SEEK_COMPLETE: u8 = 0x0A;

const READY_IDLE: u8 = 0x4E;
const READY_DONE: u8 = 0x40;

/// Result FIFO empty flag in the S channel status byte.
const S_STATUS_EMPTY: u8 = 0x40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum NCommand {
    Sync = 0x00,
    Nop = 0x01,
    Standby = 0x02,
    Stop = 0x03,
    Pause = 0x04,
    Seek = 0x05,
    Read = 0x06,
    ReadCdda = 0x07,
    ReadDvd = 0x08,
    GetToc = 0x09,
    ReadKey = 0x0C,
    ReadXCdda = 0x0E,
    ChangeSpindleControl = 0x0F,
}

/// Bit positions in the interrupt reason register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IrqCause {
    DataReady = 0,
    CommandComplete = 1,
    Acknowledge = 2,
    EndOfData = 3,
    Error = 4,
    NotReady = 5,
}

/// Pending transition consumed by [`action_complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Seek,
    Standby,
    Stop,
    Break,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaClass {
    Cd,
    Dvd,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Rtc {
    pub second: u8,
    pub minute: u8,
    pub hour: u8,
    pub day: u8,
    pub month: u8,
    pub year: u8,
    pub vsyncs: u8,
}

impl Default for Rtc {
    fn default() -> Self {
        // any valid date works
        Self {
            second: 0,
            minute: 0,
            hour: 1,
            day: 25,
            month: 5,
            year: 7,
            vsyncs: 0,
        }
    }
}

const DAYS_PER_MONTH: [u8; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interface {
    pub ncmd: u8,
    pub status: u8,
    pub error: u8,
    /// Pending interrupt reasons, one bit per [`IrqCause`].
    pub intr_stat: u8,
    pub ready: u8,

    pub sector: u32,
    pub seek_to: u32,
    pub remaining: u32,
    pub block_size: u32,
    pub speed: u32,
    pub read_time: u64,

    pub spinning: bool,
    /// The pending seek has landed; reads now pace sector by sector.
    pub seeked: bool,
    /// A frame request is outstanding at the backend.
    pub fetching: bool,
    pub fetch_ok: bool,
    pub retries: u16,
    pub retry_limit: u16,
    pub action: Option<Action>,

    pub params: [u8; 32],
    pub param_idx: usize,
    pub result: [u8; 32],
    pub result_len: usize,
    pub result_idx: usize,
    pub s_cmd: u8,
    pub s_status: u8,
    pub how_to: u8,

    pub key: [u8; 16],
    pub key_xor: u8,
    pub dec_set: u8,

    pub rtc: Rtc,

    /// Last fetched raw frame, held until the DMA channel can take it. Re-requested from
    /// the backend after a savestate load instead of being persisted.
    #[serde(skip)]
    pub frame: Option<Vec<u8>>,
}

impl Default for Interface {
    fn default() -> Self {
        let mut iface = Self {
            ncmd: 0,
            status: STATUS_NONE,
            error: 0,
            intr_stat: 0,
            ready: READY_IDLE,
            sector: 0,
            seek_to: 0,
            remaining: 0,
            block_size: 2064,
            speed: 4,
            read_time: 0,
            spinning: false,
            seeked: false,
            fetching: false,
            fetch_ok: false,
            retries: 0,
            retry_limit: 0x100,
            action: None,
            params: [0; 32],
            param_idx: 0,
            result: [0; 32],
            result_len: 0,
            result_idx: 0,
            s_cmd: 0,
            s_status: S_STATUS_EMPTY,
            how_to: 0,
            key: [0; 16],
            key_xor: 0,
            dec_set: 0,
            rtc: Rtc::default(),
            frame: None,
        };
        iface.read_time = iface.block_read_time(MediaClass::Dvd);
        iface
    }
}

impl Interface {
    fn block_read_time(&self, class: MediaClass) -> u64 {
        let rate = match class {
            MediaClass::Cd => CD_BYTES_PER_SECOND,
            MediaClass::Dvd => DVD_BYTES_PER_SECOND,
        };
        (FREQUENCY * self.block_size as u64) / (rate * self.speed as u64)
    }

    /// Computes the delay until the pending operation lands and primes the seek state.
    ///
    /// Three regimes: spin-up when the motor is off, a fixed average seek beyond the
    /// contiguous threshold, and read-through for nearby sectors. A zero-distance request
    /// skips the two-phase seek entirely and paces the first sector directly.
    fn start_seek(&mut self, to: u32) -> u64 {
        self.seek_to = to;
        let delta = to.abs_diff(self.sector);

        self.ready = 0;
        self.fetching = false;
        self.seeked = false;
        self.status = STATUS_NONE;

        let mut cycles = 0;
        if !self.spinning {
            tracing::debug!(target: "iolite::cdvd", to, "spinning up");
            self.spinning = true;
            cycles += SPIN_UP_CYCLES;
        }

        if delta >= CONTIGUOUS_SEEK_SECTORS {
            tracing::debug!(target: "iolite::cdvd", from = self.sector, to, delta, "full seek");
            cycles += AVERAGE_SEEK_CYCLES;
        } else if delta == 0 {
            tracing::debug!(target: "iolite::cdvd", to, "reading in place");
            self.status = STATUS_SEEK_COMPLETE;
            self.seeked = true;
            self.retries = 0;
            cycles += self.read_time;
        } else {
            tracing::debug!(target: "iolite::cdvd", from = self.sector, to, delta, "contiguous read-through");
            cycles += delta as u64 * self.read_time;
        }

        cycles
    }

    fn set_result(&mut self, bytes: &[u8]) {
        self.result[..bytes.len()].copy_from_slice(bytes);
        self.result_len = bytes.len();
        self.result_idx = 0;
        self.s_status &= !S_STATUS_EMPTY;
    }

    fn param_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.params[offset],
            self.params[offset + 1],
            self.params[offset + 2],
            self.params[offset + 3],
        ])
    }

    fn push_param(&mut self, value: u8) {
        if self.param_idx < self.params.len() {
            self.params[self.param_idx] = value;
            self.param_idx += 1;
        }
    }
}

fn to_bcd(value: u8) -> u8 {
    (value / 10) * 16 + value % 10
}

fn from_bcd(value: u8) -> u8 {
    (value / 16) * 10 + value % 16
}

fn set_irq(sys: &mut System, cause: IrqCause) {
    sys.cdvd.intr_stat |= 1 << cause as u8;
    sys.raise_interrupt(Interrupt::Cdvd);
}

/// XOR/rotate payload cipher keyed by the session key. Parameters come from the decrypt
/// setup byte written by the mechacon handshake.
fn decrypt(block: &mut [u8], key: u8, dec_set: u8) {
    let shift = u32::from(dec_set >> 4) & 7;
    let do_xor = dec_set & 1 != 0;
    let do_shift = dec_set & 2 != 0;

    for byte in block {
        if do_xor {
            *byte ^= key;
        }
        if do_shift {
            *byte = byte.rotate_right(shift);
        }
    }
}

/// Lays out the raw frame (plus synthesized headers where needed) for the active block
/// size, ready for DMA delivery.
fn compose_block(sys: &mut System) -> Vec<u8> {
    let mut raw = sys.cdvd.frame.clone().unwrap_or_else(|| vec![0; RAW_FRAME_LEN]);
    if raw.len() < RAW_FRAME_LEN {
        tracing::warn!(
            target: "iolite::cdvd",
            len = raw.len(),
            "short frame from the disc backend, padding with zeroes"
        );
        raw.resize(RAW_FRAME_LEN, 0);
    }
    let mut block = match sys.cdvd.block_size {
        2048 => raw[24..2072].to_vec(),
        2328 => raw[24..2352].to_vec(),
        2340 => raw[12..2352].to_vec(),
        2368 => {
            let mut block = raw.clone();
            block.resize(2368, 0);
            block
        }
        2064 => {
            // raw DVD reads want the 12 byte sector header, so fill in the blanks: the
            // physical sector number is offset by 0x30000 and folded by the layer layout
            let mut lsn = sys.cdvd.sector;
            let layer = match sys.modules.disc.dual_layer() {
                DualLayer::Parallel { layer1_start } if lsn >= layer1_start => {
                    lsn = lsn - layer1_start + 0x30000;
                    1
                }
                DualLayer::Opposite { layer1_start } if lsn >= layer1_start => {
                    lsn = !(layer1_start + 0x30000 - 1);
                    1
                }
                _ => {
                    lsn += 0x30000;
                    0
                }
            };

            let mut block = vec![0u8; 2064];
            block[0] = 0x20 | layer;
            block[1] = (lsn >> 16) as u8;
            block[2] = (lsn >> 8) as u8;
            block[3] = lsn as u8;
            // IED and CPR_MAI left zero, EDC trailer too
            block[12..2060].copy_from_slice(&raw[24..2072]);
            block
        }
        _ => raw.clone(),
    };

    if sys.cdvd.dec_set != 0 {
        decrypt(&mut block, sys.cdvd.key[4], sys.cdvd.dec_set);
    }

    block
}

/// Completion event for seek, standby, stop and break.
pub fn action_complete(sys: &mut System) {
    match sys.cdvd.action.take() {
        Some(Action::Seek | Action::Standby) => {
            sys.cdvd.spinning = true;
            sys.cdvd.ready = READY_DONE;
            sys.cdvd.sector = sys.cdvd.seek_to;
            sys.cdvd.status = STATUS_SEEK_COMPLETE;
        }
        Some(Action::Stop) => {
            sys.cdvd.spinning = false;
            sys.cdvd.ready = READY_DONE;
            sys.cdvd.sector = 0;
            sys.cdvd.status = STATUS_NONE;
        }
        Some(Action::Break) => {
            sys.cdvd.fetching = false;
            sys.cdvd.seeked = false;
            sys.cdvd.ready = READY_IDLE;
            sys.cdvd.status = STATUS_NONE;
            sys.cdvd.fetch_ok = false;
            sys.cdvd.ncmd = 0;
        }
        None => {}
    }

    set_irq(sys, IrqCause::CommandComplete);
}

/// Per-sector read pacing event.
///
/// The first firing after a seek lands the head and reschedules one block time out. After
/// that, each firing fetches the frame (retrying on backend failure), hands it to the disc
/// DMA channel, and either paces the next sector or finishes the request.
pub fn read_sector(sys: &mut System) {
    sys.cdvd.ready = 0;

    if !sys.cdvd.seeked {
        sys.cdvd.spinning = true;
        sys.cdvd.retries = 0;
        sys.cdvd.seeked = true;
        sys.cdvd.status = STATUS_SEEK_COMPLETE;
        sys.cdvd.sector = sys.cdvd.seek_to;

        tracing::debug!(
            target: "iolite::cdvd",
            sector = sys.cdvd.sector,
            read_time = sys.cdvd.read_time,
            "seek landed, pacing first block"
        );

        let delay = sys.cdvd.read_time;
        sys.scheduler.schedule(Cycles(delay), read_sector);
        return;
    }

    if sys.cdvd.fetching {
        let frame = if sys.cdvd.fetch_ok {
            sys.modules.disc.frame()
        } else {
            None
        };

        match frame {
            Some(frame) => {
                sys.cdvd.frame = Some(frame);
                sys.cdvd.fetching = false;
            }
            None => {
                sys.cdvd.retries += 1;
                tracing::warn!(
                    target: "iolite::cdvd",
                    sector = sys.cdvd.sector,
                    retries = sys.cdvd.retries,
                    "read failed"
                );

                if sys.cdvd.retries <= sys.cdvd.retry_limit {
                    sys.cdvd.fetch_ok = sys.modules.disc.start_read(sys.cdvd.sector);
                    let delay = sys.cdvd.read_time;
                    sys.scheduler.schedule(Cycles(delay), read_sector);
                    return;
                }

                // out of retries: distinguish this from a normal completion
                sys.cdvd.fetching = false;
                sys.cdvd.error = 0x01;
                sys.cdvd.ready = READY_IDLE;
                set_irq(sys, IrqCause::Error);
                sys.dma.channels[dma::CHANNEL_CDVD].chcr.set_busy(false);
                dma::complete(sys, dma::CHANNEL_CDVD);
                return;
            }
        }
    }

    let block = compose_block(sys);
    if !dma::cdvd_deliver(sys, &block) {
        // destination not armed yet, try again next block time
        let delay = sys.cdvd.read_time;
        sys.scheduler.schedule(Cycles(delay), read_sector);
        return;
    }
    sys.cdvd.frame = None;

    sys.cdvd.sector += 1;
    sys.cdvd.remaining = sys.cdvd.remaining.saturating_sub(1);

    if sys.cdvd.remaining == 0 {
        set_irq(sys, IrqCause::CommandComplete);
        sys.dma.channels[dma::CHANNEL_CDVD].chcr.set_busy(false);
        dma::complete(sys, dma::CHANNEL_CDVD);
        sys.cdvd.ready = READY_IDLE;
        return;
    }

    sys.cdvd.retries = 0;
    sys.cdvd.fetching = true;
    let sector = sys.cdvd.sector;
    sys.cdvd.fetch_ok = sys.modules.disc.start_read(sector);
    let delay = sys.cdvd.read_time;
    sys.scheduler.schedule(Cycles(delay), read_sector);
}

fn start_read_command(sys: &mut System, class: MediaClass) {
    let cdvd = &mut sys.cdvd;
    cdvd.read_time = cdvd.block_read_time(class);
    let target = cdvd.seek_to;
    let delay = cdvd.start_seek(target);
    sys.scheduler.schedule(Cycles(delay), read_sector);

    // request the first frame right away so it is ready when pacing starts
    let sector = sys.cdvd.seek_to;
    sys.cdvd.fetch_ok = sys.modules.disc.start_read(sector);
    sys.cdvd.fetching = true;
}

fn write_ncmd(sys: &mut System, value: u8) {
    sys.cdvd.ncmd = value;
    sys.cdvd.status = STATUS_NONE;
    sys.cdvd.intr_stat = 0;

    match NCommand::from_repr(value) {
        Some(NCommand::Sync | NCommand::Nop | NCommand::Pause) => {
            set_irq(sys, IrqCause::CommandComplete);
        }

        Some(NCommand::Standby) => {
            sys.cdvd.action = Some(Action::Standby);
            sys.cdvd.read_time = sys.cdvd.block_read_time(MediaClass::Dvd);
            let delay = sys.cdvd.start_seek(0);
            sys.scheduler.schedule(Cycles(delay), action_complete);
        }

        Some(NCommand::Stop) => {
            sys.cdvd.action = Some(Action::Stop);
            sys.scheduler.schedule(Cycles(STOP_CYCLES), action_complete);
        }

        Some(NCommand::Seek) => {
            sys.cdvd.action = Some(Action::Seek);
            sys.cdvd.read_time = sys.cdvd.block_read_time(MediaClass::Dvd);
            let target = sys.cdvd.param_u32(0);
            let delay = sys.cdvd.start_seek(target);
            sys.scheduler.schedule(Cycles(delay), action_complete);
        }

        Some(NCommand::Read) => {
            let cdvd = &mut sys.cdvd;
            cdvd.seek_to = cdvd.param_u32(0);
            cdvd.remaining = cdvd.param_u32(4);
            cdvd.retry_limit = if cdvd.params[8] == 0 {
                sys.config.read_retry_limit
            } else {
                cdvd.params[8] as u16
            };
            cdvd.speed = 24;
            cdvd.block_size = match cdvd.params[10] {
                2 => 2340,
                1 => 2328,
                _ => 2048,
            };

            tracing::debug!(
                target: "iolite::cdvd",
                sector = cdvd.seek_to,
                count = cdvd.remaining,
                block = cdvd.block_size,
                "cd read"
            );
            start_read_command(sys, MediaClass::Cd);
        }

        Some(NCommand::ReadCdda | NCommand::ReadXCdda) => {
            let cdvd = &mut sys.cdvd;
            cdvd.seek_to = cdvd.param_u32(0);
            cdvd.remaining = cdvd.param_u32(4);
            cdvd.retry_limit = if cdvd.params[8] == 0 {
                sys.config.read_retry_limit
            } else {
                cdvd.params[8] as u16
            };
            cdvd.speed = match cdvd.params[9] {
                0x01 => 1,
                0x02 => 2,
                0x03 => 4,
                0x04 => 12,
                _ => 24,
            };
            cdvd.block_size = match cdvd.params[10] {
                1 => 2368,
                _ => 2352,
            };

            tracing::debug!(
                target: "iolite::cdvd",
                sector = cdvd.seek_to,
                count = cdvd.remaining,
                block = cdvd.block_size,
                speed = cdvd.speed,
                "cdda read"
            );
            start_read_command(sys, MediaClass::Cd);
        }

        Some(NCommand::ReadDvd) => {
            let cdvd = &mut sys.cdvd;
            cdvd.seek_to = cdvd.param_u32(0);
            cdvd.remaining = cdvd.param_u32(4);
            cdvd.retry_limit = if cdvd.params[8] == 0 {
                sys.config.read_retry_limit
            } else {
                cdvd.params[8] as u16
            };
            cdvd.speed = 4;
            cdvd.block_size = 2064;

            tracing::debug!(
                target: "iolite::cdvd",
                sector = cdvd.seek_to,
                count = cdvd.remaining,
                "dvd read"
            );
            start_read_command(sys, MediaClass::Dvd);
        }

        Some(NCommand::GetToc) => {
            let mut toc = vec![0u8; 2064];
            if !sys.modules.disc.toc(&mut toc) {
                tracing::warn!(target: "iolite::cdvd", "toc request with no disc");
            }
            let madr = sys.dma.channels[dma::CHANNEL_CDVD].madr;
            sys.dma_write(madr, &toc);
            set_irq(sys, IrqCause::CommandComplete);
            sys.dma.channels[dma::CHANNEL_CDVD].chcr.set_busy(false);
            dma::complete(sys, dma::CHANNEL_CDVD);
        }

        Some(NCommand::ReadKey) => {
            let op = sys.cdvd.params[0];
            let pos = u16::from_le_bytes([sys.cdvd.params[1], sys.cdvd.params[2]]);
            let sector = sys.cdvd.param_u32(3);
            sys.cdvd.key = sys.modules.keys.read_key(op, pos, sector);
            sys.cdvd.key_xor = 0;
            set_irq(sys, IrqCause::CommandComplete);
        }

        Some(NCommand::ChangeSpindleControl) => {
            tracing::debug!(target: "iolite::cdvd", mode = sys.cdvd.params[0], "spindle control");
            set_irq(sys, IrqCause::CommandComplete);
        }

        None => {
            tracing::warn!(target: "iolite::cdvd", value, "unknown n command");
            set_irq(sys, IrqCause::CommandComplete);
        }
    }

    sys.cdvd.param_idx = 0;
}

fn write_break(sys: &mut System) {
    // nothing to abort while idle, and a break in progress stays a break
    if sys.cdvd.ready != 0 || sys.cdvd.action == Some(Action::Break) {
        return;
    }

    tracing::debug!(target: "iolite::cdvd", "break");

    sys.scheduler.cancel(action_complete);
    sys.scheduler.cancel(read_sector);

    sys.cdvd.action = Some(Action::Break);
    sys.scheduler.schedule(Cycles(BREAK_ACK_CYCLES), action_complete);

    sys.cdvd.seeked = false;
    sys.cdvd.fetching = false;
    sys.cdvd.status = STATUS_NONE;
}

fn write_scmd(sys: &mut System, value: u8) {
    sys.cdvd.s_cmd = value;
    let cdvd = &mut sys.cdvd;

    match value {
        // mechacon subcommands
        0x03 => match cdvd.params[0] {
            0x00 => cdvd.set_result(&[0x03, 0x06, 0x02, 0x00]),
            // renewal date, BCD
            0xFD => cdvd.set_result(&[0x00, 0x04, 0x12, 0x10, 0x01, 0x30]),
            sub => {
                tracing::warn!(target: "iolite::cdvd", sub, "unknown mechacon subcommand");
                cdvd.set_result(&[0x80]);
            }
        },

        // tray state: never open
        0x05 => cdvd.set_result(&[0x00]),

        // read clock, BCD with the stock timezone skew
        0x08 => {
            let hour = to_bcd((cdvd.rtc.hour + 8) % 24);
            let mut day = to_bcd(cdvd.rtc.day);
            if hour <= 7 {
                day += 1;
            }
            let result = [
                0x00,
                to_bcd(cdvd.rtc.second),
                to_bcd(cdvd.rtc.minute),
                hour,
                0x00,
                day,
                to_bcd(cdvd.rtc.month) + 0x80,
                to_bcd(cdvd.rtc.year),
            ];
            cdvd.set_result(&result);
        }

        // write clock, inverse of the read skew
        0x09 => {
            let p = cdvd.param_idx;
            if p >= 7 {
                cdvd.rtc.second = from_bcd(cdvd.params[p - 7]);
                cdvd.rtc.minute = from_bcd(cdvd.params[p - 6]) % 60;
                cdvd.rtc.hour = (from_bcd(cdvd.params[p - 5]) + 16) % 24;
                cdvd.rtc.day = from_bcd(cdvd.params[p - 3]);
                if cdvd.params[p - 5] <= 7 {
                    cdvd.rtc.day = cdvd.rtc.day.saturating_sub(1);
                }
                cdvd.rtc.month = from_bcd(cdvd.params[p - 2].wrapping_sub(0x80));
                cdvd.rtc.year = from_bcd(cdvd.params[p - 1]);
            }
            cdvd.set_result(&[0x00]);
        }

        // forbid DVD playback
        0x15 => cdvd.set_result(&[0x05]),

        _ => {
            tracing::warn!(target: "iolite::cdvd", value, "unknown s command");
            cdvd.set_result(&[0x80]);
        }
    }

    sys.cdvd.param_idx = 0;
}

fn read_s_data(cdvd: &mut Interface) -> u8 {
    if cdvd.s_status & S_STATUS_EMPTY != 0 {
        return 0;
    }

    let mut value = 0;
    if cdvd.result_idx < cdvd.result_len {
        value = cdvd.result[cdvd.result_idx];
        cdvd.result_idx += 1;
        if cdvd.result_idx >= cdvd.result_len {
            cdvd.s_status |= S_STATUS_EMPTY;
        }
    }
    value
}

/// Byte register reads at `0x1f40_2000 + offset`.
pub fn read(sys: &mut System, offset: u8) -> u8 {
    let cdvd = &mut sys.cdvd;
    match offset {
        0x04 => cdvd.ncmd,
        0x05 => cdvd.ready,
        0x06 => cdvd.error,
        0x07 => 0,
        0x08 => cdvd.intr_stat,
        0x0A => cdvd.status,
        // tray state: closed
        0x0B => 0,
        // current head position as a BCD minute/second/frame triple
        0x0C => to_bcd((cdvd.sector / (60 * 75)) as u8),
        0x0D => to_bcd(((cdvd.sector / 75) % 60) as u8 + 2),
        0x0E => to_bcd((cdvd.sector % 75) as u8),
        0x0F => sys.modules.disc.disc_type() as u8,
        0x13 => 4,
        0x15 => 0x01,
        0x16 => cdvd.s_cmd,
        0x17 => cdvd.s_status,
        0x18 => read_s_data(cdvd),
        0x20..=0x24 => cdvd.key[(offset - 0x20) as usize],
        0x28..=0x2C => cdvd.key[(offset - 0x28) as usize + 5],
        0x30..=0x34 => cdvd.key[(offset - 0x30) as usize + 10],
        0x38 => cdvd.key[15],
        0x39 => cdvd.key_xor,
        0x3A => cdvd.dec_set,
        _ => {
            tracing::warn!(target: "iolite::cdvd", offset, "unknown register read");
            0
        }
    }
}

/// Byte register writes at `0x1f40_2000 + offset`.
pub fn write(sys: &mut System, offset: u8, value: u8) {
    match offset {
        0x04 => write_ncmd(sys, value),
        0x05 | 0x17 => sys.cdvd.push_param(value),
        0x06 => sys.cdvd.how_to = value,
        0x07 => write_break(sys),
        // interrupt reason acknowledge
        0x08 => sys.cdvd.intr_stat &= !value,
        0x0A => {}
        0x16 => write_scmd(sys, value),
        0x3A => sys.cdvd.dec_set = value,
        _ => {
            tracing::warn!(target: "iolite::cdvd", offset, value, "unknown register write");
        }
    }
}

/// RTC tick, driven once per vertical blank.
pub fn vsync(sys: &mut System) {
    let rtc = &mut sys.cdvd.rtc;

    rtc.vsyncs += 1;
    if rtc.vsyncs < 60 {
        return;
    }
    rtc.vsyncs = 0;

    rtc.second += 1;
    if rtc.second < 60 {
        return;
    }
    rtc.second = 0;

    rtc.minute += 1;
    if rtc.minute < 60 {
        return;
    }
    rtc.minute = 0;

    rtc.hour += 1;
    if rtc.hour < 24 {
        return;
    }
    rtc.hour = 0;

    rtc.day += 1;
    if rtc.day <= DAYS_PER_MONTH[(rtc.month - 1) as usize] {
        return;
    }
    rtc.day = 1;

    rtc.month += 1;
    if rtc.month <= 12 {
        return;
    }
    rtc.month = 1;

    rtc.year += 1;
    if rtc.year >= 100 {
        rtc.year = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        modules::disc::DiscModule,
        system::{Config, Modules, System, dma::BlockControl},
    };
    use r3000::Address;

    /// Backend serving a deterministic pattern for every sector.
    struct PatternDisc;

    impl DiscModule for PatternDisc {
        fn disc_type(&mut self) -> DiscType {
            DiscType::Ps2Cd
        }

        fn start_read(&mut self, _: u32) -> bool {
            true
        }

        fn frame(&mut self) -> Option<Vec<u8>> {
            Some((0..RAW_FRAME_LEN).map(|i| i as u8).collect())
        }

        fn toc(&mut self, out: &mut [u8]) -> bool {
            out.fill(0);
            true
        }
    }

    /// Backend answering with frames shorter than a raw sector.
    struct TruncatedDisc;

    impl DiscModule for TruncatedDisc {
        fn disc_type(&mut self) -> DiscType {
            DiscType::Ps2Cd
        }

        fn start_read(&mut self, _: u32) -> bool {
            true
        }

        fn frame(&mut self) -> Option<Vec<u8>> {
            Some(vec![0x5A; 100])
        }

        fn toc(&mut self, out: &mut [u8]) -> bool {
            out.fill(0);
            true
        }
    }

    struct BrokenDisc;

    impl DiscModule for BrokenDisc {
        fn disc_type(&mut self) -> DiscType {
            DiscType::Ps2Cd
        }

        fn start_read(&mut self, _: u32) -> bool {
            true
        }

        fn frame(&mut self) -> Option<Vec<u8>> {
            None
        }

        fn toc(&mut self, _: &mut [u8]) -> bool {
            false
        }
    }

    fn system_with(disc: Box<dyn DiscModule>) -> System {
        let mut modules = Modules::default();
        modules.disc = disc;
        System::new(modules, Config::default())
    }

    fn run(sys: &mut System, cycles: u64) {
        sys.scheduler.advance(Cycles(cycles));
        sys.process_events();
    }

    fn arm_dma3(sys: &mut System, madr: u32, size: u16, count: u16) {
        sys.dma.channels[dma::CHANNEL_CDVD].madr = Address(madr);
        sys.dma.channels[dma::CHANNEL_CDVD].bcr = BlockControl::default()
            .with_block_size(size)
            .with_block_count(count);
        dma::write_chcr(sys, dma::CHANNEL_CDVD, 0x0100_0000);
    }

    fn issue_read(sys: &mut System, sector: u32, count: u32) {
        for byte in sector.to_le_bytes() {
            write(sys, 0x05, byte);
        }
        for byte in count.to_le_bytes() {
            write(sys, 0x05, byte);
        }
        write(sys, 0x05, 2); // retry limit
        write(sys, 0x05, 0); // spindle
        write(sys, 0x05, 0); // 2048 byte blocks
        write(sys, 0x04, NCommand::Read as u8);
    }

    // (PSXCLK * 2048) / (153600 * 24)
    const CD_READ_TIME: u64 = 20_480;

    #[test]
    fn read_in_place_skips_the_seek() {
        let mut sys = system_with(Box::new(PatternDisc));
        sys.cdvd.spinning = true;
        sys.cdvd.sector = 500;

        arm_dma3(&mut sys, 0x1000, 512, 1);
        issue_read(&mut sys, 500, 1);

        assert!(sys.scheduler.is_scheduled(read_sector));
        assert!(sys.cdvd.seeked);

        run(&mut sys, CD_READ_TIME);
        assert_ne!(sys.cdvd.intr_stat & (1 << IrqCause::CommandComplete as u8), 0);
        assert!(sys.intc.stat.cdvd());
        assert_eq!(sys.cdvd.sector, 501);
        assert_eq!(sys.mem.read_u8(Address(0x1000)), 24);
    }

    #[test]
    fn cold_read_spins_up_then_seeks_then_paces_sectors() {
        let mut sys = system_with(Box::new(PatternDisc));
        arm_dma3(&mut sys, 0x2000, 512, 2);
        issue_read(&mut sys, 1000, 2);

        // motor off and delta past the contiguous threshold: spin-up plus average seek
        run(&mut sys, SPIN_UP_CYCLES + AVERAGE_SEEK_CYCLES);
        assert!(sys.cdvd.seeked);
        assert_eq!(sys.cdvd.status, STATUS_SEEK_COMPLETE);
        assert_eq!(sys.cdvd.intr_stat, 0);

        // one block time per sector, completion only after the last
        run(&mut sys, CD_READ_TIME);
        assert_eq!(sys.cdvd.sector, 1001);
        assert_eq!(sys.cdvd.intr_stat, 0);

        run(&mut sys, CD_READ_TIME);
        assert_eq!(sys.cdvd.sector, 1002);
        assert_ne!(sys.cdvd.intr_stat & (1 << IrqCause::CommandComplete as u8), 0);
        assert!(!sys.dma.channels[dma::CHANNEL_CDVD].chcr.busy());
        assert_eq!(sys.dma.channels[dma::CHANNEL_CDVD].madr, Address(0x2000 + 4096));
    }

    #[test]
    fn short_frames_are_padded_not_fatal() {
        let mut sys = system_with(Box::new(TruncatedDisc));
        sys.cdvd.spinning = true;
        sys.cdvd.sector = 500;

        arm_dma3(&mut sys, 0x1000, 512, 1);
        issue_read(&mut sys, 500, 1);
        run(&mut sys, CD_READ_TIME);

        assert_ne!(sys.cdvd.intr_stat & (1 << IrqCause::CommandComplete as u8), 0);
        // payload bytes inside the short frame survive, the rest reads back zero
        assert_eq!(sys.mem.read_u8(Address(0x1000)), 0x5A);
        assert_eq!(sys.mem.read_u8(Address(0x1000 + 76)), 0);
    }

    #[test]
    fn exhausted_retries_surface_an_error() {
        let mut sys = system_with(Box::new(BrokenDisc));
        sys.cdvd.spinning = true;
        arm_dma3(&mut sys, 0x1000, 512, 1);
        issue_read(&mut sys, 0, 1);
        assert_eq!(sys.cdvd.retry_limit, 2);

        // initial pace plus one block time per retry
        for _ in 0..4 {
            run(&mut sys, CD_READ_TIME);
        }

        assert_ne!(sys.cdvd.intr_stat & (1 << IrqCause::Error as u8), 0);
        assert_eq!(sys.cdvd.intr_stat & (1 << IrqCause::CommandComplete as u8), 0);
        assert_ne!(sys.cdvd.error, 0);
        assert!(!sys.dma.channels[dma::CHANNEL_CDVD].chcr.busy());
    }

    #[test]
    fn break_cancels_a_pending_read() {
        let mut sys = system_with(Box::new(PatternDisc));
        arm_dma3(&mut sys, 0x1000, 512, 1);
        issue_read(&mut sys, 1000, 1);
        assert!(sys.scheduler.is_scheduled(read_sector));

        write(&mut sys, 0x07, 0);
        assert!(!sys.scheduler.is_scheduled(read_sector));
        assert_eq!(sys.cdvd.action, Some(Action::Break));

        run(&mut sys, BREAK_ACK_CYCLES);
        assert_eq!(sys.cdvd.ready, READY_IDLE);
        assert_ne!(sys.cdvd.intr_stat & (1 << IrqCause::CommandComplete as u8), 0);
    }

    #[test]
    fn stale_read_never_fires_after_break() {
        let mut sys = system_with(Box::new(PatternDisc));
        arm_dma3(&mut sys, 0x1000, 512, 1);
        issue_read(&mut sys, 1000, 1);
        write(&mut sys, 0x07, 0);

        run(&mut sys, SPIN_UP_CYCLES + AVERAGE_SEEK_CYCLES + 10 * CD_READ_TIME);
        assert_eq!(sys.cdvd.sector, 0);
        assert_eq!(sys.cdvd.remaining, 1);
    }

    #[test]
    fn dvd_raw_blocks_carry_a_synthesized_header() {
        let mut sys = system_with(Box::new(PatternDisc));
        sys.cdvd.spinning = true;
        sys.cdvd.sector = 16;

        arm_dma3(&mut sys, 0x3000, 516, 1);
        for byte in 16u32.to_le_bytes() {
            write(&mut sys, 0x05, byte);
        }
        for byte in 1u32.to_le_bytes() {
            write(&mut sys, 0x05, byte);
        }
        write(&mut sys, 0x05, 0);
        write(&mut sys, 0x05, 0);
        write(&mut sys, 0x05, 0);
        write(&mut sys, 0x04, NCommand::ReadDvd as u8);

        // (PSXCLK * 2064) / (1638400 * 4)
        let read_time = sys.cdvd.read_time;
        run(&mut sys, read_time);

        assert_eq!(sys.mem.read_u8(Address(0x3000)), 0x20);
        let lsn = 16 + 0x30000u32;
        assert_eq!(sys.mem.read_u8(Address(0x3001)), (lsn >> 16) as u8);
        assert_eq!(sys.mem.read_u8(Address(0x3002)), (lsn >> 8) as u8);
        assert_eq!(sys.mem.read_u8(Address(0x3003)), lsn as u8);
        // payload starts after the 12 byte header, frame data starts at raw offset 24
        assert_eq!(sys.mem.read_u8(Address(0x300C)), 24);
    }

    #[test]
    fn decrypt_applies_xor_and_rotate() {
        let mut block = [0b1010_0000u8];
        decrypt(&mut block, 0xFF, 0b0010_0011);
        // xor with 0xFF then rotate right by 2
        assert_eq!(block[0], (0b0101_1111u8).rotate_right(2));
    }

    #[test]
    fn s_command_results_drain_through_the_fifo() {
        let mut sys = system_with(Box::new(PatternDisc));

        write(&mut sys, 0x16, 0x15);
        assert_eq!(read(&mut sys, 0x17) & S_STATUS_EMPTY, 0);
        assert_eq!(read(&mut sys, 0x18), 0x05);
        assert_ne!(read(&mut sys, 0x17) & S_STATUS_EMPTY, 0);

        // unknown commands answer inert instead of wedging the fifo
        write(&mut sys, 0x16, 0x77);
        assert_eq!(read(&mut sys, 0x18), 0x80);
    }

    #[test]
    fn rtc_ticks_once_a_second() {
        let mut sys = system_with(Box::new(PatternDisc));
        let start = sys.cdvd.rtc.second;
        for _ in 0..60 {
            vsync(&mut sys);
        }
        assert_eq!(sys.cdvd.rtc.second, (start + 1) % 60);
    }
}
