/// Trait for audio backends covering both SPU cores.
///
/// The core keeps the backend in sync with emulated time through [`AudioModule::pump`],
/// and moves sample memory with the DMA functions. Samples are 16 bit halfwords, the unit
/// the SPU's own address space uses.
pub trait AudioModule: Send {
    /// Advances the backend by the given number of IOP cycles.
    fn pump(&mut self, cycles: u64);

    /// Writes halfwords into the given core's sample memory at its current transfer
    /// address.
    fn write_dma(&mut self, core: usize, data: &[u16]);

    /// Reads halfwords from the given core's sample memory at its current transfer
    /// address.
    fn read_dma(&mut self, core: usize, data: &mut [u16]);
}

/// An implementation of [`AudioModule`] which does nothing.
#[derive(Debug, Clone, Copy)]
pub struct NopAudioModule;

impl AudioModule for NopAudioModule {
    fn pump(&mut self, _: u64) {}

    fn write_dma(&mut self, _: usize, _: &[u16]) {}

    fn read_dma(&mut self, _: usize, data: &mut [u16]) {
        data.fill(0);
    }
}
