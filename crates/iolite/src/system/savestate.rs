//! Savestates.
//!
//! A state is a CBOR stream of two items: the format version, then the snapshot payload.
//! Scheduled events are not persisted; loading rebuilds the event queue from the restored
//! peripheral state, and an in-flight disc read is re-requested from the disc module.

use crate::system::{
    System,
    cdvd::{self, Action, Rtc},
    counters::{self, CounterMode, Rate},
    dma,
    intc::Causes,
    sio,
};
use easyerr::{Error, ResultExt};
use r3000::{Address, Cycles};
use serde::{Deserialize, Serialize};

/// Current savestate format version.
pub const VERSION: u32 = 2;

/// Oldest format version [`load`] can still restore.
pub const MIN_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SavestateError {
    #[error("unsupported savestate version {version}")]
    Unsupported { version: u32 },
    #[error(transparent)]
    Encode {
        source: ciborium::ser::Error<std::io::Error>,
    },
    #[error(transparent)]
    Decode {
        source: ciborium::de::Error<std::io::Error>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CounterState {
    count: u64,
    mode: u32,
    target: u64,
    target_future: bool,
    rate: Rate,
    anchor: Cycles,
    stopped: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PumpState {
    anchor: Cycles,
    next_delay: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct DmaChannelState {
    madr: u32,
    bcr: u32,
    chcr: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DmaState {
    channels: [DmaChannelState; dma::CHANNEL_COUNT],
    dpcr: u32,
    dpcr2: u32,
    dicr: u32,
    dicr2: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IntcState {
    stat: u32,
    mask: u32,
    enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Snapshot {
    elapsed: Cycles,
    counters: [CounterState; counters::COUNTER_COUNT],
    audio_pump: PumpState,
    net_pump: PumpState,
    intc: IntcState,
    dma: DmaState,
    cdvd: cdvd::Interface,
    sio: sio::Interface,
}

/// The version 1 disc controller payload, from before reads were paced through the
/// two-phase seek. Missing fields are synthesized on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CdvdV1 {
    ncmd: u8,
    status: u8,
    error: u8,
    intr_stat: u8,
    ready: u8,
    sector: u32,
    remaining: u32,
    block_size: u32,
    speed: u32,
    params: [u8; 32],
    param_idx: usize,
    result: [u8; 32],
    result_len: usize,
    result_idx: usize,
    s_cmd: u8,
    s_status: u8,
    how_to: u8,
    key: [u8; 16],
    key_xor: u8,
    dec_set: u8,
    rtc: Rtc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotV1 {
    elapsed: Cycles,
    counters: [CounterState; counters::COUNTER_COUNT],
    audio_pump: PumpState,
    net_pump: PumpState,
    intc: IntcState,
    dma: DmaState,
    cdvd: CdvdV1,
    sio: sio::Interface,
}

impl From<SnapshotV1> for Snapshot {
    fn from(v1: SnapshotV1) -> Self {
        // version 1 never saved mid-seek, so a restored read resumes at the current
        // sector with the motor already spinning
        let disc = cdvd::Interface {
            ncmd: v1.cdvd.ncmd,
            status: v1.cdvd.status,
            error: v1.cdvd.error,
            intr_stat: v1.cdvd.intr_stat,
            ready: v1.cdvd.ready,
            sector: v1.cdvd.sector,
            seek_to: v1.cdvd.sector,
            remaining: v1.cdvd.remaining,
            block_size: v1.cdvd.block_size,
            speed: v1.cdvd.speed,
            spinning: true,
            seeked: v1.cdvd.remaining > 0,
            params: v1.cdvd.params,
            param_idx: v1.cdvd.param_idx,
            result: v1.cdvd.result,
            result_len: v1.cdvd.result_len,
            result_idx: v1.cdvd.result_idx,
            s_cmd: v1.cdvd.s_cmd,
            s_status: v1.cdvd.s_status,
            how_to: v1.cdvd.how_to,
            key: v1.cdvd.key,
            key_xor: v1.cdvd.key_xor,
            dec_set: v1.cdvd.dec_set,
            rtc: v1.cdvd.rtc,
            ..Default::default()
        };

        Self {
            elapsed: v1.elapsed,
            counters: v1.counters,
            audio_pump: v1.audio_pump,
            net_pump: v1.net_pump,
            intc: v1.intc,
            dma: v1.dma,
            cdvd: disc,
            sio: v1.sio,
        }
    }
}

fn snapshot(sys: &System) -> Snapshot {
    Snapshot {
        elapsed: sys.scheduler.elapsed(),
        counters: std::array::from_fn(|i| {
            let c = &sys.counters.counters[i];
            CounterState {
                count: c.count,
                mode: c.mode.to_bits(),
                target: c.target,
                target_future: c.target_future,
                rate: c.rate,
                anchor: c.anchor,
                stopped: c.stopped,
            }
        }),
        audio_pump: PumpState {
            anchor: sys.counters.audio_pump.anchor,
            next_delay: sys.counters.audio_pump.next_delay,
        },
        net_pump: PumpState {
            anchor: sys.counters.net_pump.anchor,
            next_delay: sys.counters.net_pump.next_delay,
        },
        intc: IntcState {
            stat: sys.intc.stat.to_bits(),
            mask: sys.intc.mask.to_bits(),
            enabled: sys.intc.enabled,
        },
        dma: DmaState {
            channels: std::array::from_fn(|i| {
                let ch = &sys.dma.channels[i];
                DmaChannelState {
                    madr: ch.madr.value(),
                    bcr: ch.bcr.to_bits(),
                    chcr: ch.chcr.to_bits(),
                }
            }),
            dpcr: sys.dma.dpcr,
            dpcr2: sys.dma.dpcr2,
            dicr: sys.dma.dicr.to_bits(),
            dicr2: sys.dma.dicr2.to_bits(),
        },
        cdvd: sys.cdvd.clone(),
        sio: sys.sio.clone(),
    }
}

fn apply(sys: &mut System, snapshot: Snapshot) {
    sys.scheduler = Default::default();
    sys.scheduler.advance(snapshot.elapsed);

    for (counter, state) in sys.counters.counters.iter_mut().zip(snapshot.counters) {
        counter.count = state.count;
        counter.mode = CounterMode::from_bits(state.mode);
        counter.target = state.target;
        counter.target_future = state.target_future;
        counter.rate = state.rate;
        counter.anchor = state.anchor;
        counter.stopped = state.stopped;
    }
    sys.counters.audio_pump.anchor = snapshot.audio_pump.anchor;
    sys.counters.audio_pump.next_delay = snapshot.audio_pump.next_delay;
    sys.counters.net_pump.anchor = snapshot.net_pump.anchor;
    sys.counters.net_pump.next_delay = snapshot.net_pump.next_delay;

    sys.intc.stat = Causes::from_bits(snapshot.intc.stat);
    sys.intc.mask = Causes::from_bits(snapshot.intc.mask);
    sys.intc.enabled = snapshot.intc.enabled;

    for (channel, state) in sys.dma.channels.iter_mut().zip(snapshot.dma.channels) {
        channel.madr = Address(state.madr);
        channel.bcr = dma::BlockControl::from_bits(state.bcr);
        channel.chcr = dma::ChannelControl::from_bits(state.chcr);
    }
    sys.dma.dpcr = snapshot.dma.dpcr;
    sys.dma.dpcr2 = snapshot.dma.dpcr2;
    sys.dma.dicr = dma::InterruptControl::from_bits(snapshot.dma.dicr);
    sys.dma.dicr2 = dma::InterruptControl::from_bits(snapshot.dma.dicr2);

    sys.cdvd = snapshot.cdvd;
    sys.sio = snapshot.sio;

    // the event queue is rebuilt rather than restored. pending drive transitions land
    // immediately, and an in-flight read is re-requested from the attached disc module
    // before its delivery event is re-armed
    if sys.cdvd.action.is_some() {
        sys.scheduler.schedule_now(cdvd::action_complete);
    }
    if sys.cdvd.remaining > 0 {
        if sys.cdvd.fetching {
            let target = if sys.cdvd.seeked {
                sys.cdvd.sector
            } else {
                sys.cdvd.seek_to
            };
            sys.cdvd.fetch_ok = sys.modules.disc.start_read(target);
        }
        let delay = sys.cdvd.read_time.max(1);
        sys.scheduler.schedule(Cycles(delay), cdvd::read_sector);
    }

    counters::predict_next_event(sys);
    sys.check_interrupts();
}

/// Serializes the peripheral state of `sys`.
pub fn save(sys: &System, mut writer: impl std::io::Write) -> Result<(), SavestateError> {
    ciborium::into_writer(&VERSION, &mut writer).context(SavestateCtx::Encode)?;
    ciborium::into_writer(&snapshot(sys), &mut writer).context(SavestateCtx::Encode)
}

/// Restores the peripheral state of `sys` from a previously saved stream.
pub fn load(sys: &mut System, mut reader: impl std::io::Read) -> Result<(), SavestateError> {
    let version: u32 = ciborium::from_reader(&mut reader).context(SavestateCtx::Decode)?;
    let snapshot = match version {
        1 => {
            tracing::info!(target: "iolite::savestate", "migrating a version 1 savestate");
            let v1: SnapshotV1 = ciborium::from_reader(&mut reader).context(SavestateCtx::Decode)?;
            v1.into()
        }
        VERSION => ciborium::from_reader(&mut reader).context(SavestateCtx::Decode)?,
        _ => return Err(SavestateError::Unsupported { version }),
    };

    apply(sys, snapshot);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::modules::disc::{DiscModule, DiscType};
    use crate::system::{Config, Modules, System, cdvd::NCommand, intc::Interrupt};
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    fn system() -> System {
        System::new(Modules::default(), Config::default())
    }

    struct CountingDisc {
        reads: Arc<AtomicU32>,
    }

    impl DiscModule for CountingDisc {
        fn disc_type(&mut self) -> DiscType {
            DiscType::Ps2Dvd
        }

        fn start_read(&mut self, _sector: u32) -> bool {
            self.reads.fetch_add(1, Ordering::Relaxed);
            true
        }

        fn frame(&mut self) -> Option<Vec<u8>> {
            Some(vec![0xAB; crate::system::cdvd::RAW_FRAME_LEN])
        }

        fn toc(&mut self, _out: &mut [u8]) -> bool {
            false
        }
    }

    #[test]
    fn round_trip_restores_peripheral_state() {
        let mut sys = system();
        counters::write_mode(&mut sys, 4, 0x0008);
        counters::write_target(&mut sys, 4, 1234);
        sys.intc.enabled = true;
        sys.raise_interrupt(Interrupt::Spu);
        sys.dma.dpcr = 0x1234_5678;
        sys.dma.channels[4].madr = Address(0x0004_0000);
        sys.cdvd.sector = 777;
        sys.cdvd.rtc.day = 3;

        let mut state = Vec::new();
        save(&sys, &mut state).unwrap();

        let mut restored = system();
        load(&mut restored, state.as_slice()).unwrap();

        assert_eq!(restored.counters.counters[4].target, 1234);
        assert_eq!(counters::peek_mode(&restored, 4), 0x0408);
        assert!(restored.intc.enabled);
        assert!(restored.intc.stat.spu());
        assert_eq!(restored.dma.dpcr, 0x1234_5678);
        assert_eq!(restored.dma.channels[4].madr, Address(0x0004_0000));
        assert_eq!(restored.cdvd.sector, 777);
        assert_eq!(restored.cdvd.rtc.day, 3);
        assert_eq!(restored.scheduler.elapsed(), sys.scheduler.elapsed());
    }

    #[test]
    fn in_flight_read_is_rerequested() {
        let reads = Arc::new(AtomicU32::new(0));
        let mut modules = Modules::default();
        modules.disc = Box::new(CountingDisc {
            reads: Arc::clone(&reads),
        });
        let mut sys = System::new(modules, Config::default());

        for byte in 16u32.to_le_bytes() {
            cdvd::write(&mut sys, 0x05, byte);
        }
        for byte in 4u32.to_le_bytes() {
            cdvd::write(&mut sys, 0x05, byte);
        }
        cdvd::write(&mut sys, 0x05, 0);
        cdvd::write(&mut sys, 0x05, 0);
        cdvd::write(&mut sys, 0x05, 0);
        cdvd::write(&mut sys, 0x04, NCommand::ReadDvd as u8);

        // issuing the command requests the first frame, so a fetch is outstanding
        assert!(sys.cdvd.fetching);
        let issued = reads.load(Ordering::Relaxed);
        assert!(issued > 0);

        let mut state = Vec::new();
        save(&sys, &mut state).unwrap();

        let mut modules = Modules::default();
        modules.disc = Box::new(CountingDisc {
            reads: Arc::clone(&reads),
        });
        let mut restored = System::new(modules, Config::default());
        load(&mut restored, state.as_slice()).unwrap();

        assert_eq!(reads.load(Ordering::Relaxed), issued + 1);
        assert!(restored.scheduler.is_scheduled(cdvd::read_sector));
        assert_eq!(restored.cdvd.remaining, sys.cdvd.remaining);
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut state = Vec::new();
        ciborium::into_writer(&99u32, &mut state).unwrap();
        ciborium::into_writer(&0u8, &mut state).unwrap();

        let mut sys = system();
        let err = load(&mut sys, state.as_slice()).unwrap_err();
        assert!(matches!(
            err,
            SavestateError::Unsupported { version: 99 }
        ));
    }
}
