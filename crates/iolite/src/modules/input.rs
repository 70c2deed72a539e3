/// Trait for controller modules.
///
/// Button state is reported the way the pad protocol carries it: one bit per button,
/// active low, 0xFFFF meaning nothing pressed.
pub trait InputModule: Send {
    fn buttons(&mut self) -> u16;
}

/// An implementation of [`InputModule`] which does nothing: no button is ever pressed.
#[derive(Debug, Clone, Copy)]
pub struct NopInputModule;

impl InputModule for NopInputModule {
    fn buttons(&mut self) -> u16 {
        0xFFFF
    }
}
