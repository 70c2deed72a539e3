/// Trait for memory card storage backends.
///
/// Addresses are plain byte offsets into the card image. The serial port layer owns the
/// protocol and the AND-write semantics; backends just move bytes. A missing card file
/// should be surfaced as [`CardModule::present`] returning false, never as an error.
pub trait CardModule: Send {
    /// Whether a card is inserted.
    fn present(&mut self) -> bool;

    /// Card capacity in 512 byte pages.
    fn pages(&mut self) -> u32;

    fn read(&mut self, addr: u32, buf: &mut [u8]);

    fn write(&mut self, addr: u32, data: &[u8]);

    /// Fills `len` bytes starting at `addr` with 0xFF.
    fn erase(&mut self, addr: u32, len: u32);
}

/// An implementation of [`CardModule`] with no card inserted.
#[derive(Debug, Clone, Copy)]
pub struct NopCardModule;

impl CardModule for NopCardModule {
    fn present(&mut self) -> bool {
        false
    }

    fn pages(&mut self) -> u32 {
        0
    }

    fn read(&mut self, _: u32, buf: &mut [u8]) {
        buf.fill(0xFF);
    }

    fn write(&mut self, _: u32, _: &[u8]) {}

    fn erase(&mut self, _: u32, _: u32) {}
}
