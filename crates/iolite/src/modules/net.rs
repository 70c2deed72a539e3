/// Trait for network device backends (DEV9).
///
/// The core only guarantees a periodic service call; everything else is up to the
/// backend.
pub trait NetModule: Send {
    /// Advances the backend by the given number of IOP cycles.
    fn pump(&mut self, cycles: u64);
}

/// An implementation of [`NetModule`] which does nothing.
#[derive(Debug, Clone, Copy)]
pub struct NopNetModule;

impl NetModule for NopNetModule {
    fn pump(&mut self, _: u64) {}
}
