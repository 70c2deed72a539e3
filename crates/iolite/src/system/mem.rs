//! Memory of the IOP.

use r3000::Address;

pub const RAM_LEN: usize = 2 * bytesize::MIB as usize;

const RAM_MASK: u32 = RAM_LEN as u32 - 1;

/// The IOP main RAM.
pub struct Memory {
    ram: Box<[u8; RAM_LEN]>,
}

impl Default for Memory {
    fn default() -> Self {
        Self {
            ram: util::boxed_array(0),
        }
    }
}

impl Memory {
    #[inline(always)]
    fn offset(addr: Address) -> usize {
        (addr.physical().value() & RAM_MASK) as usize
    }

    pub fn ram(&self) -> &[u8] {
        &*self.ram
    }

    pub fn read_u8(&self, addr: Address) -> u8 {
        self.ram[Self::offset(addr)]
    }

    pub fn read_u16(&self, addr: Address) -> u16 {
        let offset = Self::offset(addr) & !1;
        u16::from_le_bytes([self.ram[offset], self.ram[offset + 1]])
    }

    pub fn read_u32(&self, addr: Address) -> u32 {
        let offset = Self::offset(addr) & !3;
        u32::from_le_bytes([
            self.ram[offset],
            self.ram[offset + 1],
            self.ram[offset + 2],
            self.ram[offset + 3],
        ])
    }

    pub fn write_u8(&mut self, addr: Address, value: u8) {
        self.ram[Self::offset(addr)] = value;
    }

    pub fn write_u16(&mut self, addr: Address, value: u16) {
        let offset = Self::offset(addr) & !1;
        self.ram[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, addr: Address, value: u32) {
        let offset = Self::offset(addr) & !3;
        self.ram[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Copies `buf.len()` bytes starting at `addr` into `buf`, wrapping at the end of RAM.
    pub fn read_slice(&self, addr: Address, buf: &mut [u8]) {
        let offset = Self::offset(addr);
        if offset + buf.len() <= RAM_LEN {
            buf.copy_from_slice(&self.ram[offset..offset + buf.len()]);
        } else {
            for (i, byte) in buf.iter_mut().enumerate() {
                *byte = self.ram[(offset + i) & RAM_MASK as usize];
            }
        }
    }

    /// Copies `data` into RAM starting at `addr`, wrapping at the end of RAM.
    pub fn write_slice(&mut self, addr: Address, data: &[u8]) {
        let offset = Self::offset(addr);
        if offset + data.len() <= RAM_LEN {
            self.ram[offset..offset + data.len()].copy_from_slice(data);
        } else {
            for (i, byte) in data.iter().copied().enumerate() {
                self.ram[(offset + i) & RAM_MASK as usize] = byte;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn word_access_round_trip() {
        let mut mem = Memory::default();
        mem.write_u32(Address(0x1000), 0xDEAD_BEEF);
        assert_eq!(mem.read_u32(Address(0x1000)), 0xDEAD_BEEF);
        assert_eq!(mem.read_u16(Address(0x1000)), 0xBEEF);
        assert_eq!(mem.read_u8(Address(0x1003)), 0xDE);
    }

    #[test]
    fn kseg_mirrors() {
        let mut mem = Memory::default();
        mem.write_u32(Address(0x8000_2000), 0x1234_5678);
        assert_eq!(mem.read_u32(Address(0xA000_2000)), 0x1234_5678);
        assert_eq!(mem.read_u32(Address(0x0000_2000)), 0x1234_5678);
    }
}
