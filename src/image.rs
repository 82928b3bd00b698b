bitflags::bitflags! {
    /// Flags attached to a captured image.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ImageFlags: u32 {
        const V_FLIPPED = 1 << 0;
        const H_FLIPPED = 1 << 1;
        const COLORS_INVERTED = 1 << 2;
    }
}

/// The minimal image container the host library contract exposes
/// (`fpi_img_new`): a width-tagged byte buffer plus orientation flags.
#[derive(Debug, Clone)]
pub struct Image {
    width: usize,
    height: usize,
    data: Vec<u8>,
    flags: ImageFlags,
}

impl Image {
    /// `fpi_img_new(size)` — allocates a zeroed buffer of `size` bytes.
    /// The width/height are supplied separately once known (press devices
    /// know both up front; swipe devices only know height after capture).
    pub fn new(width: usize, height: usize) -> Self {
        Image {
            width,
            height,
            data: vec![0u8; width * height],
            flags: ImageFlags::empty(),
        }
    }

    pub fn from_bytes(width: usize, height: usize, data: Vec<u8>, flags: ImageFlags) -> Self {
        debug_assert_eq!(data.len(), width * height);
        Image {
            width,
            height,
            data,
            flags,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn flags(&self) -> ImageFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: ImageFlags) {
        self.flags = flags;
    }
}
