//! Bus dispatch for the hardware register page.
//!
//! RAM accesses fall through to [`mem::Memory`], registers decode into their owning
//! peripheral, and everything else logs and answers inert. Counter indices map onto two
//! register groups: 0-2 at `0x1f80_1100` and 3-5 at `0x1f80_1480`, each counter with
//! count/mode/target words 16 bytes apart.

use crate::system::{System, cdvd, counters, dma, intc::Causes, sio};
use r3000::Address;

const RAM_END: u32 = 0x0080_0000;

const HW_BASE: u32 = 0x1f80_1000;
const HW_END: u32 = 0x1f80_2000;

const CDVD_BASE: u32 = 0x1f40_2000;
const CDVD_END: u32 = 0x1f40_2040;

/// Decodes a hardware page offset into a counter index, or None if the offset is not a
/// counter register.
fn counter_index(offset: u32) -> Option<usize> {
    match offset {
        0x100..=0x12F => Some(((offset - 0x100) / 0x10) as usize),
        0x480..=0x4AF => Some(3 + ((offset - 0x480) / 0x10) as usize),
        _ => None,
    }
}

/// Decodes a hardware page offset into a DMA channel, or None if the offset is not a
/// channel register.
fn dma_channel(offset: u32) -> Option<usize> {
    match offset {
        0x080..=0x0EF => Some(((offset - 0x080) / 0x10) as usize),
        0x500..=0x56F => Some(7 + ((offset - 0x500) / 0x10) as usize),
        _ => None,
    }
}

impl System {
    pub fn read_u8(&mut self, addr: Address) -> u8 {
        let phys = addr.physical().value();
        match phys {
            0..RAM_END => self.mem.read_u8(addr),
            CDVD_BASE..CDVD_END => cdvd::read(self, (phys - CDVD_BASE) as u8),
            _ if phys == HW_BASE + 0x040 => sio::read_data(self),
            _ => {
                tracing::warn!(target: "iolite::bus", %addr, "unknown u8 read");
                0
            }
        }
    }

    pub fn write_u8(&mut self, addr: Address, value: u8) {
        let phys = addr.physical().value();
        match phys {
            0..RAM_END => self.mem.write_u8(addr, value),
            CDVD_BASE..CDVD_END => cdvd::write(self, (phys - CDVD_BASE) as u8, value),
            _ if phys == HW_BASE + 0x040 => sio::write_data(self, value),
            _ => {
                tracing::warn!(target: "iolite::bus", %addr, value, "unknown u8 write");
            }
        }
    }

    pub fn read_u16(&mut self, addr: Address) -> u16 {
        let phys = addr.physical().value();
        if phys < RAM_END {
            return self.mem.read_u16(addr);
        }
        if !(HW_BASE..HW_END).contains(&phys) {
            tracing::warn!(target: "iolite::bus", %addr, "unknown u16 read");
            return 0;
        }

        let offset = phys - HW_BASE;
        if let Some(index) = counter_index(offset) {
            return match offset & 0xF {
                0x0 => counters::read_count(self, index) as u16,
                0x4 => counters::read_mode(self, index) as u16,
                0x8 => counters::read_target(self, index) as u16,
                _ => 0,
            };
        }

        match offset {
            0x044 => sio::read_stat(self),
            0x048 => self.sio.mode,
            0x04A => self.sio.ctrl,
            0x04E => self.sio.baud,
            0x070 => self.intc.stat.to_bits() as u16,
            0x074 => self.intc.mask.to_bits() as u16,
            _ => {
                tracing::warn!(target: "iolite::bus", %addr, "unknown u16 read");
                0
            }
        }
    }

    pub fn write_u16(&mut self, addr: Address, value: u16) {
        let phys = addr.physical().value();
        if phys < RAM_END {
            self.mem.write_u16(addr, value);
            return;
        }
        if !(HW_BASE..HW_END).contains(&phys) {
            tracing::warn!(target: "iolite::bus", %addr, value, "unknown u16 write");
            return;
        }

        let offset = phys - HW_BASE;
        if let Some(index) = counter_index(offset) {
            match offset & 0xF {
                0x0 => counters::write_count(self, index, value as u32),
                0x4 => counters::write_mode(self, index, value as u32),
                0x8 => counters::write_target(self, index, value as u32),
                _ => {}
            }
            return;
        }

        match offset {
            0x048 => self.sio.mode = value,
            0x04A => sio::write_ctrl(self, value),
            0x04E => self.sio.baud = value,
            0x070 => {
                self.intc.write_stat(value as u32);
                self.check_interrupts();
            }
            0x074 => {
                self.intc.mask = Causes::from_bits(value as u32);
                self.check_interrupts();
            }
            _ => {
                tracing::warn!(target: "iolite::bus", %addr, value, "unknown u16 write");
            }
        }
    }

    pub fn read_u32(&mut self, addr: Address) -> u32 {
        let phys = addr.physical().value();
        if phys < RAM_END {
            return self.mem.read_u32(addr);
        }
        if !(HW_BASE..HW_END).contains(&phys) {
            tracing::warn!(target: "iolite::bus", %addr, "unknown u32 read");
            return 0;
        }

        let offset = phys - HW_BASE;
        if let Some(index) = counter_index(offset) {
            return match offset & 0xF {
                0x0 => counters::read_count(self, index),
                0x4 => counters::peek_mode(self, index),
                0x8 => counters::read_target(self, index),
                _ => 0,
            };
        }
        if let Some(channel) = dma_channel(offset) {
            let ch = &self.dma.channels[channel];
            return match offset & 0xF {
                0x0 => ch.madr.value(),
                0x4 => ch.bcr.to_bits(),
                0x8 => ch.chcr.to_bits(),
                _ => 0,
            };
        }

        match offset {
            0x070 => self.intc.stat.to_bits(),
            0x074 => self.intc.mask.to_bits(),
            0x078 => {
                // reading the master enable clears it
                let enabled = self.intc.enabled as u32;
                self.intc.enabled = false;
                self.check_interrupts();
                enabled
            }
            0x0F0 => self.dma.dpcr,
            0x0F4 => self.dma.dicr.to_bits(),
            0x570 => self.dma.dpcr2,
            0x574 => self.dma.dicr2.to_bits(),
            _ => {
                tracing::warn!(target: "iolite::bus", %addr, "unknown u32 read");
                0
            }
        }
    }

    pub fn write_u32(&mut self, addr: Address, value: u32) {
        let phys = addr.physical().value();
        if phys < RAM_END {
            self.mem.write_u32(addr, value);
            return;
        }
        if !(HW_BASE..HW_END).contains(&phys) {
            tracing::warn!(target: "iolite::bus", %addr, value, "unknown u32 write");
            return;
        }

        let offset = phys - HW_BASE;
        if let Some(index) = counter_index(offset) {
            match offset & 0xF {
                0x0 => counters::write_count(self, index, value),
                0x4 => counters::write_mode(self, index, value),
                0x8 => counters::write_target(self, index, value),
                _ => {}
            }
            return;
        }
        if let Some(channel) = dma_channel(offset) {
            match offset & 0xF {
                0x0 => self.dma.channels[channel].madr = Address(value),
                0x4 => self.dma.channels[channel].bcr = dma::BlockControl::from_bits(value),
                0x8 => dma::write_chcr(self, channel, value),
                _ => {}
            }
            return;
        }

        match offset {
            0x070 => {
                self.intc.write_stat(value);
                self.check_interrupts();
            }
            0x074 => {
                self.intc.mask = Causes::from_bits(value);
                self.check_interrupts();
            }
            0x078 => {
                self.intc.enabled = value & 1 != 0;
                self.check_interrupts();
            }
            0x0F0 => self.dma.dpcr = value,
            0x0F4 => {
                self.dma.dicr.write(value);
            }
            0x570 => self.dma.dpcr2 = value,
            0x574 => {
                self.dma.dicr2.write(value);
            }
            _ => {
                tracing::warn!(target: "iolite::bus", %addr, value, "unknown u32 write");
            }
        }
    }
}
