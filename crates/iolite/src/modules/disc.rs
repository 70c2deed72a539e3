/// Disc media kind as reported through the disc type register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DiscType {
    #[default]
    NoDisc = 0x00,
    Detecting = 0x01,
    Ps2Cd = 0x12,
    Ps2Cdda = 0x13,
    Ps2Dvd = 0x14,
    Cdda = 0xFD,
    Illegal = 0xFF,
}

/// Physical layer layout of a DVD, used for raw sector header synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DualLayer {
    #[default]
    Single,
    /// Parallel track path: layer 1 continues in the same direction.
    Parallel { layer1_start: u32 },
    /// Opposite track path: layer 1 runs back towards the hub.
    Opposite { layer1_start: u32 },
}

/// Trait for disc backends.
///
/// The controller requests one raw frame at a time: [`DiscModule::start_read`] begins
/// fetching a sector and [`DiscModule::frame`] collects it one block time later. A `None`
/// frame is a media read failure and makes the controller retry.
pub trait DiscModule: Send {
    /// The kind of the inserted media.
    fn disc_type(&mut self) -> DiscType;

    /// Layer layout of the inserted media.
    fn dual_layer(&mut self) -> DualLayer {
        DualLayer::Single
    }

    /// Begins fetching the raw frame for a sector. Returns false if the request cannot be
    /// issued at all.
    fn start_read(&mut self, sector: u32) -> bool;

    /// Collects the frame requested by the last [`DiscModule::start_read`]. Must be
    /// [`crate::system::cdvd::RAW_FRAME_LEN`] bytes long.
    fn frame(&mut self) -> Option<Vec<u8>>;

    /// Copies the table of contents into `out`. Returns false with no disc.
    fn toc(&mut self, out: &mut [u8]) -> bool;
}

/// An implementation of [`DiscModule`] which never has a disc.
#[derive(Debug, Clone, Copy)]
pub struct NopDiscModule;

impl DiscModule for NopDiscModule {
    fn disc_type(&mut self) -> DiscType {
        DiscType::NoDisc
    }

    fn start_read(&mut self, _: u32) -> bool {
        false
    }

    fn frame(&mut self) -> Option<Vec<u8>> {
        None
    }

    fn toc(&mut self, _: &mut [u8]) -> bool {
        false
    }
}
