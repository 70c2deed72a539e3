use r3000::Address;

/// Trait for recompiled-code caches.
///
/// DMA writes land in RAM behind the CPU's back, so any cached translation overlapping
/// the written range must be dropped.
pub trait CodeModule: Send {
    fn invalidate(&mut self, addr: Address, len: u32);
}

/// An implementation of [`CodeModule`] for a system with no code cache.
#[derive(Debug, Clone, Copy)]
pub struct NopCodeModule;

impl CodeModule for NopCodeModule {
    fn invalidate(&mut self, _: Address, _: u32) {}
}
