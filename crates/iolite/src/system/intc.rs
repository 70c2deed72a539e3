//! IOP interrupt controller (INTC).

use crate::system::System;
use bitos::bitos;
use r3000::Exception;
use serde::{Deserialize, Serialize};

/// A named interrupt cause. The discriminant is the cause's bit in [`Causes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Interrupt {
    VBlankStart = 0,
    Gpu = 1,
    Cdvd = 2,
    Dma = 3,
    Timer0 = 4,
    Timer1 = 5,
    Timer2 = 6,
    Sio0 = 7,
    Sio1 = 8,
    Spu = 9,
    Pio = 10,
    VBlankEnd = 11,
    Dvd = 12,
    Dev9 = 13,
    Timer3 = 14,
    Timer4 = 15,
    Timer5 = 16,
    Sio2 = 17,
    HtrTx0 = 18,
    HtrRx0 = 19,
    HtrTx1 = 20,
    HtrRx1 = 21,
    Usb = 22,
    External = 23,
    FireWire = 24,
    FireWireDma = 25,
}

/// The pending/masked cause bitmask layout shared by I_STAT and I_MASK.
#[bitos(32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Causes {
    #[bits(0)]
    pub vblank_start: bool,
    #[bits(1)]
    pub gpu: bool,
    #[bits(2)]
    pub cdvd: bool,
    #[bits(3)]
    pub dma: bool,
    #[bits(4)]
    pub timer0: bool,
    #[bits(5)]
    pub timer1: bool,
    #[bits(6)]
    pub timer2: bool,
    #[bits(7)]
    pub sio0: bool,
    #[bits(8)]
    pub sio1: bool,
    #[bits(9)]
    pub spu: bool,
    #[bits(10)]
    pub pio: bool,
    #[bits(11)]
    pub vblank_end: bool,
    #[bits(12)]
    pub dvd: bool,
    #[bits(13)]
    pub dev9: bool,
    #[bits(14)]
    pub timer3: bool,
    #[bits(15)]
    pub timer4: bool,
    #[bits(16)]
    pub timer5: bool,
    #[bits(17)]
    pub sio2: bool,
    #[bits(18)]
    pub htr_tx0: bool,
    #[bits(19)]
    pub htr_rx0: bool,
    #[bits(20)]
    pub htr_tx1: bool,
    #[bits(21)]
    pub htr_rx1: bool,
    #[bits(22)]
    pub usb: bool,
    #[bits(23)]
    pub external: bool,
    #[bits(24)]
    pub firewire: bool,
    #[bits(25)]
    pub firewire_dma: bool,
}

/// Interrupt controller state.
#[derive(Debug, Default)]
pub struct Interface {
    pub stat: Causes,
    pub mask: Causes,
    /// Master enable, I_CTRL bit 0.
    pub enabled: bool,
}

impl Interface {
    pub fn allowed(&self) -> u32 {
        self.stat.to_bits() & self.mask.to_bits()
    }

    /// Latches a cause into I_STAT.
    pub fn raise(&mut self, interrupt: Interrupt) {
        self.stat = Causes::from_bits(self.stat.to_bits() | (1 << interrupt as u32));
    }

    /// Writing I_STAT acknowledges: only bits written as 1 stay pending.
    pub fn write_stat(&mut self, value: u32) {
        self.stat = Causes::from_bits(self.stat.to_bits() & value);
    }
}

impl System {
    /// Raises an interrupt cause and runs the branch test side effect.
    pub fn raise_interrupt(&mut self, interrupt: Interrupt) {
        tracing::trace!(target: "iolite::intc", ?interrupt, "raising interrupt");
        self.intc.raise(interrupt);
        self.check_interrupts();
    }

    /// Re-derives the INTC output line and, when deliverable, records the interrupt exception
    /// for the execution loop. Harmless to call redundantly.
    pub fn check_interrupts(&mut self) {
        let asserted = self.intc.enabled && self.intc.allowed() != 0;
        self.cpu.set_interrupt_line(asserted);

        if asserted && self.cpu.interrupts_enabled() {
            self.cpu.raise_exception(Exception::Interrupt);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::system::{Config, Modules, System};

    fn system() -> System {
        let mut sys = System::new(Modules::default(), Config::default());
        sys.cpu.status.set_interrupt_enable(true);
        sys.cpu.status.set_interrupt_mask(1 << r3000::INTC_INTERRUPT_LINE);
        sys.intc.enabled = true;
        sys
    }

    #[test]
    fn masked_cause_does_not_branch() {
        let mut sys = system();
        sys.raise_interrupt(Interrupt::Cdvd);
        assert!(sys.intc.stat.cdvd());
        assert_eq!(sys.cpu.pending_exception, None);
    }

    #[test]
    fn unmasked_cause_branches() {
        let mut sys = system();
        sys.intc.mask.set_cdvd(true);
        sys.raise_interrupt(Interrupt::Cdvd);
        assert_eq!(sys.cpu.pending_exception, Some(r3000::Exception::Interrupt));
    }

    #[test]
    fn stat_write_acks() {
        let mut sys = system();
        sys.raise_interrupt(Interrupt::Timer3);
        sys.raise_interrupt(Interrupt::Dma);
        sys.intc.write_stat(!(1 << Interrupt::Dma as u32));
        assert!(sys.intc.stat.timer3());
        assert!(!sys.intc.stat.dma());
    }
}
