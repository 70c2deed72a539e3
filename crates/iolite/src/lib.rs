//! Cycle-approximate core for the IOP's peripheral timing and interrupt coordination:
//! the hardware counter bank, the DMA channel set with its SIF rendezvous, the disc
//! controller and the serial I/O port, all sequenced by a single event scheduler.

pub mod modules;
pub mod system;

use crate::system::{Modules, System};

pub use r3000::{self, Address, Cycles};

/// The IOP peripheral core.
pub struct Iolite {
    /// System state.
    pub system: System,
}

impl Iolite {
    pub fn new(modules: Modules, config: system::Config) -> Self {
        Self {
            system: System::new(modules, config),
        }
    }

    /// Advances emulation by the specified number of cycles, stopping at every scheduled
    /// event on the way so no peripheral deadline is overshot.
    pub fn exec(&mut self, cycles: Cycles) {
        let mut executed = Cycles(0);
        while executed < cycles {
            let remaining = cycles - executed;
            let step = self
                .system
                .scheduler
                .until_next()
                .unwrap_or(remaining)
                .min(remaining)
                .max(Cycles(1));

            self.system.scheduler.advance(step);
            self.system.process_events();
            executed += step;
        }
    }
}
