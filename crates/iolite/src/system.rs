//! System state.

pub mod bus;
pub mod cdvd;
pub mod counters;
pub mod dma;
pub mod gates;
pub mod intc;
pub mod mem;
pub mod savestate;
pub mod scheduler;
pub mod sif;
pub mod sio;

use crate::modules::{
    audio::{AudioModule, NopAudioModule},
    card::{CardModule, NopCardModule},
    code::{CodeModule, NopCodeModule},
    disc::{DiscModule, NopDiscModule},
    input::{InputModule, NopInputModule},
    keys::{KeyModule, NopKeyModule},
    net::{NetModule, NopNetModule},
};
use r3000::{Address, Cpu};
use scheduler::Scheduler;

/// System configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Disc read retry bound used when a read command does not specify one.
    pub read_retry_limit: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            read_retry_limit: 0x100,
        }
    }
}

/// Modules attached to the system.
pub struct Modules {
    pub audio: Box<dyn AudioModule>,
    pub card: Box<dyn CardModule>,
    pub code: Box<dyn CodeModule>,
    pub disc: Box<dyn DiscModule>,
    pub input: Box<dyn InputModule>,
    pub keys: Box<dyn KeyModule>,
    pub net: Box<dyn NetModule>,
}

impl Default for Modules {
    fn default() -> Self {
        Self {
            audio: Box::new(NopAudioModule),
            card: Box::new(NopCardModule),
            code: Box::new(NopCodeModule),
            disc: Box::new(NopDiscModule),
            input: Box::new(NopInputModule),
            keys: Box::new(NopKeyModule),
            net: Box::new(NopNetModule),
        }
    }
}

/// The state of the system.
pub struct System {
    /// System configuration.
    pub config: Config,
    /// Scheduler for events.
    pub scheduler: Scheduler,
    /// The CPU state this core coordinates interrupts with.
    pub cpu: Cpu,
    /// Main memory.
    pub mem: mem::Memory,
    /// Interrupt controller.
    pub intc: intc::Interface,
    /// Counter bank and async device pumps.
    pub counters: counters::Interface,
    /// DMA channels.
    pub dma: dma::Interface,
    /// Inter-processor DMA rendezvous.
    pub sif: sif::Interface,
    /// Disc controller.
    pub cdvd: cdvd::Interface,
    /// Serial I/O port.
    pub sio: sio::Interface,
    /// Attached modules.
    pub modules: Modules,
}

impl System {
    pub fn new(modules: Modules, config: Config) -> Self {
        let mut system = Self {
            config,
            scheduler: Scheduler::default(),
            cpu: Cpu::default(),
            mem: mem::Memory::default(),
            intc: intc::Interface::default(),
            counters: counters::Interface::default(),
            dma: dma::Interface::default(),
            sif: sif::Interface::default(),
            cdvd: cdvd::Interface::default(),
            sio: sio::Interface::default(),
            modules,
        };

        system.scheduler.schedule_now(counters::update);
        system.process_events();

        system
    }

    /// Processes all events which are ready to execute.
    pub fn process_events(&mut self) {
        while let Some(handler) = self.scheduler.pop() {
            handler(self);
        }
    }

    /// Writes DMA data into main memory, dropping any cached code translations that
    /// overlap the written range.
    pub fn dma_write(&mut self, addr: Address, data: &[u8]) {
        self.mem.write_slice(addr, data);
        self.modules.code.invalidate(addr, data.len() as u32);
    }

    /// Resets everything except configuration and attached modules.
    pub fn reset(&mut self) {
        self.scheduler = Scheduler::default();
        self.cpu = Cpu::default();
        self.mem = mem::Memory::default();
        self.intc = intc::Interface::default();
        self.counters = counters::Interface::default();
        self.dma = dma::Interface::default();
        self.sif = sif::Interface::default();
        self.cdvd = cdvd::Interface::default();
        self.sio = sio::Interface::default();

        self.scheduler.schedule_now(counters::update);
        self.process_events();
    }
}
