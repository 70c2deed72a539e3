//! IOP DMA channels.
//!
//! Channels live in two register banks: 0-6 at `0x1f80_1080` and 7-13 at `0x1f80_1500`, each
//! bank with its own priority (DPCR) and interrupt control (DICR) register. Completion
//! interrupts are layered: a finished channel sets its flag in the bank's DICR, and only
//! enabled flags assert the single INTC DMA cause.

use crate::system::{System, cdvd, counters, intc::Interrupt, sif};
use bitos::{
    bitos,
    integer::{u2, u7},
};
use r3000::Address;

pub const CHANNEL_COUNT: usize = 14;

pub const CHANNEL_CDVD: usize = 3;
pub const CHANNEL_SPU0: usize = 4;
pub const CHANNEL_SPU1: usize = 7;
pub const CHANNEL_DEV9: usize = 8;
pub const CHANNEL_SIF0: usize = 9;
pub const CHANNEL_SIF1: usize = 10;

/// Cycles per transferred word used to reschedule the audio pump after an SPU transfer.
const SPU_CYCLES_PER_WORD: u64 = 4;

#[bitos(1)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    ToRam = 0,
    FromRam = 1,
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelControl {
    #[bits(0)]
    pub direction: Direction,
    #[bits(1)]
    pub decrement: bool,
    #[bits(9..11)]
    pub sync_mode: u2,
    /// Transfer in progress. Software sets it to start, the engine clears it on completion.
    #[bits(24)]
    pub busy: bool,
    #[bits(28)]
    pub trigger: bool,
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockControl {
    #[bits(0..16)]
    pub block_size: u16,
    #[bits(16..32)]
    pub block_count: u16,
}

impl BlockControl {
    /// Total transfer length in 32 bit words.
    pub fn words(&self) -> u32 {
        self.block_size() as u32 * (self.block_count() as u32).max(1)
    }

    /// Total transfer length in bytes, the way the disc engine checks its destination.
    pub fn bytes(&self) -> u32 {
        self.block_size() as u32 * self.block_count() as u32 * 4
    }
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterruptControl {
    #[bits(15)]
    pub force: bool,
    #[bits(16..23)]
    pub enable: u7,
    #[bits(23)]
    pub master_enable: bool,
    #[bits(24..31)]
    pub flags: u7,
    #[bits(31)]
    pub master_flag: bool,
}

impl InterruptControl {
    /// Register write semantics: flag bits written as 1 are acknowledged, everything else is
    /// taken as-is. The master flag is derived, never written.
    pub fn write(&mut self, value: u32) {
        let new = Self::from_bits(value);
        let flags = self.flags().value() & !new.flags().value();
        *self = new.with_flags(u7::new(flags)).with_master_flag(false);
        self.refresh_master_flag();
    }

    pub fn refresh_master_flag(&mut self) {
        let any_enabled = self.enable().value() & self.flags().value() != 0;
        self.set_master_flag(self.force() || (self.master_enable() && any_enabled));
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DmaChannel {
    pub madr: Address,
    pub bcr: BlockControl,
    pub chcr: ChannelControl,
}

pub struct Interface {
    pub channels: [DmaChannel; CHANNEL_COUNT],
    pub dpcr: u32,
    pub dpcr2: u32,
    pub dicr: InterruptControl,
    pub dicr2: InterruptControl,
}

impl Default for Interface {
    fn default() -> Self {
        Self {
            channels: [DmaChannel::default(); CHANNEL_COUNT],
            // all channels enabled at default priority
            dpcr: 0x0765_4321,
            dpcr2: 0x0765_4321,
            dicr: InterruptControl::default(),
            dicr2: InterruptControl::default(),
        }
    }
}

/// Arms a channel. A write with the busy bit set starts the transfer.
pub fn write_chcr(sys: &mut System, channel: usize, value: u32) {
    let chcr = ChannelControl::from_bits(value);
    sys.dma.channels[channel].chcr = chcr;

    if !chcr.busy() {
        return;
    }

    tracing::debug!(
        target: "iolite::dma",
        channel,
        madr = ?sys.dma.channels[channel].madr,
        words = sys.dma.channels[channel].bcr.words(),
        ?chcr,
        "starting transfer"
    );

    match channel {
        // the disc engine paces itself: sector payloads land on this channel from the read
        // cascade, so arming it is all that happens here
        CHANNEL_CDVD => {
            if sys.dma.channels[channel].chcr.direction() != Direction::ToRam {
                tracing::warn!(target: "iolite::dma", value, "unrecognized disc transfer, ignoring");
            }
        }
        CHANNEL_SPU0 => spu_transfer(sys, channel, 0),
        CHANNEL_SPU1 => spu_transfer(sys, channel, 1),
        CHANNEL_DEV9 => {
            // no expansion device model: answer with an empty completed transfer
            tracing::debug!(target: "iolite::dma", "dev9 transfer with no device attached");
            complete(sys, channel);
        }
        CHANNEL_SIF0 => sif::sif0_offer_local(sys),
        CHANNEL_SIF1 => sif::sif1_offer_local(sys),
        _ => {
            tracing::warn!(
                target: "iolite::dma",
                channel,
                value,
                "transfer on an unhandled channel, ignoring"
            );
        }
    }
}

fn spu_transfer(sys: &mut System, channel: usize, core: usize) {
    let now = sys.scheduler.elapsed();
    let words = sys.dma.channels[channel].bcr.words();
    let madr = sys.dma.channels[channel].madr;

    // flush the audio device up to now, then push its next service call out in proportion to
    // the transfer length
    let pump = &mut sys.counters.audio_pump;
    let since = now.value().saturating_sub(pump.anchor.value());
    pump.anchor = now;
    pump.next_delay = words as u64 * SPU_CYCLES_PER_WORD;
    sys.modules.audio.pump(since);

    let mut bytes = vec![0u8; words as usize * 4];
    match sys.dma.channels[channel].chcr.direction() {
        Direction::FromRam => {
            sys.mem.read_slice(madr, &mut bytes);
            let halves: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect();
            sys.modules.audio.write_dma(core, &halves);
        }
        Direction::ToRam => {
            let mut halves = vec![0u16; words as usize * 2];
            sys.modules.audio.read_dma(core, &mut halves);
            for (chunk, half) in bytes.chunks_exact_mut(2).zip(&halves) {
                chunk.copy_from_slice(&half.to_le_bytes());
            }
            sys.dma_write(madr, &bytes);
        }
    }

    complete(sys, channel);
    counters::predict_next_event(sys);
}

/// Delivers one disc sector payload to the armed disc channel. Returns false if the channel
/// cannot take it, matching the hardware's stall-until-armed behavior.
pub fn cdvd_deliver(sys: &mut System, block: &[u8]) -> bool {
    let ch = &sys.dma.channels[CHANNEL_CDVD];
    if ch.bcr.bytes() < block.len() as u32 {
        tracing::debug!(
            target: "iolite::dma",
            bytes = ch.bcr.bytes(),
            needed = block.len(),
            "disc channel too small for a sector"
        );
        if ch.chcr.busy() {
            complete(sys, CHANNEL_CDVD);
        }
        return false;
    }

    if !ch.chcr.busy() {
        return false;
    }

    let madr = ch.madr;
    sys.dma_write(madr, block);

    let ch = &mut sys.dma.channels[CHANNEL_CDVD];
    ch.madr += block.len() as u32;
    let consumed = (block.len() as u32 / (ch.bcr.block_size() as u32 * 4).max(1)) as u16;
    ch.bcr.set_block_count(ch.bcr.block_count().saturating_sub(consumed));
    true
}

/// Finishes a transfer: clears the busy bit and raises the layered completion interrupt
/// exactly once.
pub fn complete(sys: &mut System, channel: usize) {
    sys.dma.channels[channel].chcr.set_busy(false);

    let (dicr, bit) = if channel < 7 {
        (&mut sys.dma.dicr, channel)
    } else {
        (&mut sys.dma.dicr2, channel - 7)
    };

    if dicr.enable().value() & (1 << bit) == 0 {
        return;
    }

    dicr.set_flags(u7::new(dicr.flags().value() | (1 << bit)));
    dicr.refresh_master_flag();
    let raise = dicr.master_flag();

    tracing::trace!(target: "iolite::dma", channel, raise, "transfer complete");
    if raise {
        sys.raise_interrupt(Interrupt::Dma);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        modules::audio::AudioModule,
        system::{Config, Modules, System},
    };
    use std::sync::{Arc, Mutex};

    /// An audio device whose DMA reads return whatever was last written, for loopback tests.
    #[derive(Default)]
    struct EchoAudio {
        ram: Arc<Mutex<Vec<u16>>>,
    }

    impl AudioModule for EchoAudio {
        fn pump(&mut self, _: u64) {}

        fn write_dma(&mut self, _: usize, data: &[u16]) {
            *self.ram.lock().unwrap() = data.to_vec();
        }

        fn read_dma(&mut self, _: usize, data: &mut [u16]) {
            let ram = self.ram.lock().unwrap();
            for (out, value) in data.iter_mut().zip(ram.iter()) {
                *out = *value;
            }
        }
    }

    fn system_with_echo() -> (System, Arc<Mutex<Vec<u16>>>) {
        let ram = Arc::new(Mutex::new(Vec::new()));
        let mut modules = Modules::default();
        modules.audio = Box::new(EchoAudio { ram: Arc::clone(&ram) });
        (System::new(modules, Config::default()), ram)
    }

    fn arm(sys: &mut System, channel: usize, madr: u32, size: u16, count: u16, chcr: u32) {
        sys.dma.channels[channel].madr = Address(madr);
        sys.dma.channels[channel].bcr = BlockControl::default()
            .with_block_size(size)
            .with_block_count(count);
        write_chcr(sys, channel, chcr);
    }

    #[test]
    fn spu_round_trip() {
        let (mut sys, _) = system_with_echo();
        let pattern: Vec<u8> = (0..64u8).collect();
        sys.mem.write_slice(Address(0x2000), &pattern);

        // memory -> peripheral, then peripheral -> memory elsewhere
        arm(&mut sys, CHANNEL_SPU0, 0x2000, 16, 1, 0x0100_0001);
        assert!(!sys.dma.channels[CHANNEL_SPU0].chcr.busy());

        arm(&mut sys, CHANNEL_SPU0, 0x3000, 16, 1, 0x0100_0000);
        let mut read_back = vec![0u8; 64];
        sys.mem.read_slice(Address(0x3000), &mut read_back);
        assert_eq!(read_back, pattern);
    }

    #[test]
    fn spu_transfer_reschedules_pump() {
        let (mut sys, _) = system_with_echo();
        arm(&mut sys, CHANNEL_SPU1, 0x2000, 32, 2, 0x0100_0001);
        assert_eq!(sys.counters.audio_pump.next_delay, 64 * SPU_CYCLES_PER_WORD);
    }

    #[test]
    fn completion_interrupt_is_layered() {
        let (mut sys, _) = system_with_echo();

        // disabled in DICR: no flag, no INTC cause
        arm(&mut sys, CHANNEL_SPU0, 0x1000, 4, 1, 0x0100_0001);
        assert_eq!(sys.dma.dicr.flags().value(), 0);
        assert!(!sys.intc.stat.dma());

        // enabled: flag + master flag + INTC cause
        sys.dma.dicr.write(0x0080_0000 | (1 << (16 + CHANNEL_SPU0)));
        arm(&mut sys, CHANNEL_SPU0, 0x1000, 4, 1, 0x0100_0001);
        assert_ne!(sys.dma.dicr.flags().value() & (1 << CHANNEL_SPU0), 0);
        assert!(sys.dma.dicr.master_flag());
        assert!(sys.intc.stat.dma());

        // writing the flag back acknowledges it
        let ack = (sys.dma.dicr.flags().value() as u32) << 24;
        let keep = sys.dma.dicr.to_bits() & 0x00FF_FFFF;
        sys.dma.dicr.write(keep | ack);
        assert_eq!(sys.dma.dicr.flags().value(), 0);
        assert!(!sys.dma.dicr.master_flag());
    }

    #[test]
    fn unhandled_channel_is_inert() {
        let (mut sys, _) = system_with_echo();
        arm(&mut sys, 0, 0x1000, 4, 1, 0x0100_0001);
        // transfer neither runs nor completes
        assert!(sys.dma.channels[0].chcr.busy());
        assert!(!sys.intc.stat.dma());
    }
}
