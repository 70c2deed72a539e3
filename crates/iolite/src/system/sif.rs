//! Subsystem interface (SIF) bridge.
//!
//! Two unidirectional DMA paths connect this side to the host processor: SIF0 carries data
//! out, SIF1 carries data in. A transfer only moves once both sides have posted their half
//! of the handshake, in either order.

use crate::system::{System, dma};
use r3000::Address;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy)]
pub struct LocalSide {
    pub madr: Address,
    pub words: u32,
}

#[derive(Debug, Default)]
pub struct SifChannel {
    pub local: Option<LocalSide>,
    pub remote: bool,
}

#[derive(Debug, Default)]
pub struct Interface {
    pub sif0: SifChannel,
    pub sif1: SifChannel,
    /// Words already pushed across SIF0, waiting for the other side to drain them.
    pub sif0_out: VecDeque<u32>,
    /// Words the other side pushed across SIF1, waiting for a receiving transfer.
    pub sif1_in: VecDeque<u32>,
}

fn local_side(sys: &System, channel: usize) -> LocalSide {
    let ch = &sys.dma.channels[channel];
    LocalSide {
        madr: ch.madr,
        words: ch.bcr.words(),
    }
}

/// Posts this side's half of an outgoing SIF0 transfer. Called when DMA channel 9 is armed.
pub fn sif0_offer_local(sys: &mut System) {
    sys.sif.sif0.local = Some(local_side(sys, dma::CHANNEL_SIF0));
    try_complete_sif0(sys);
}

/// Posts this side's half of an incoming SIF1 transfer. Called when DMA channel 10 is armed.
pub fn sif1_offer_local(sys: &mut System) {
    sys.sif.sif1.local = Some(local_side(sys, dma::CHANNEL_SIF1));
    try_complete_sif1(sys);
}

fn try_complete_sif0(sys: &mut System) {
    if !sys.sif.sif0.remote {
        return;
    }
    let Some(local) = sys.sif.sif0.local.take() else {
        return;
    };

    tracing::debug!(
        target: "iolite::sif",
        madr = ?local.madr,
        words = local.words,
        "sif0 transfer out"
    );

    let mut bytes = vec![0u8; local.words as usize * 4];
    sys.mem.read_slice(local.madr, &mut bytes);
    sys.sif.sif0_out.extend(
        bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])),
    );

    sys.sif.sif0.remote = false;
    dma::complete(sys, dma::CHANNEL_SIF0);
}

fn try_complete_sif1(sys: &mut System) {
    let Some(local) = sys.sif.sif1.local else {
        return;
    };
    if !sys.sif.sif1.remote || (sys.sif.sif1_in.len() as u32) < local.words {
        return;
    }
    sys.sif.sif1.local = None;

    tracing::debug!(
        target: "iolite::sif",
        madr = ?local.madr,
        words = local.words,
        "sif1 transfer in"
    );

    let mut bytes = Vec::with_capacity(local.words as usize * 4);
    for _ in 0..local.words {
        let word = sys.sif.sif1_in.pop_front().unwrap_or(0);
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    sys.dma_write(local.madr, &bytes);

    if sys.sif.sif1_in.is_empty() {
        sys.sif.sif1.remote = false;
    }
    dma::complete(sys, dma::CHANNEL_SIF1);
}

impl System {
    /// The other side announces it is ready to receive over SIF0.
    pub fn sif0_offer_remote(&mut self) {
        self.sif.sif0.remote = true;
        try_complete_sif0(self);
    }

    /// Takes everything SIF0 has produced so far.
    pub fn sif0_drain(&mut self) -> Vec<u32> {
        self.sif.sif0_out.drain(..).collect()
    }

    /// The other side deposits data to be received over SIF1.
    pub fn sif1_offer_remote(&mut self, data: &[u32]) {
        self.sif.sif1_in.extend(data);
        self.sif.sif1.remote = true;
        try_complete_sif1(self);
    }
}
