/// Trait for content protection key providers.
///
/// The key derivation math is scheme-specific and varies per title, so it lives outside
/// the disc controller. The controller only ever consumes the resulting key block.
pub trait KeyModule: Send {
    /// Derives the session key block for a read key command.
    fn read_key(&mut self, op: u8, position: u16, sector: u32) -> [u8; 16];
}

/// An implementation of [`KeyModule`] which knows no keys.
#[derive(Debug, Clone, Copy)]
pub struct NopKeyModule;

impl KeyModule for NopKeyModule {
    fn read_key(&mut self, _: u8, _: u16, _: u32) -> [u8; 16] {
        [0; 16]
    }
}
