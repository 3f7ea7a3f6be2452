//! Texture and background entry payloads
//!
//! # Texture entry
//! ```text
//! 0x00: frame count u8
//! 0x01: mip levels u8
//! 0x02: field count u8 (1 = progressive, 2 = interlaced)
//! 0x03: bits per pixel u8 (4, 8 or 16)
//! 0x04: FrameDescriptor × (frames × mips × fields), frame-major
//! ```
//!
//! # Background entry
//! ```text
//! 0x00: x u16, y u16, width u16, height u16
//! 0x08: 15-bit pixels, row-major (even field first when interlaced)
//! ```

use super::PAGE_WIDTH;

/// Frame descriptor flag bits
pub mod frame_flags {
    /// Colour depth (0 = 4bpp, 1 = 8bpp, 2 = 16bpp)
    pub const DEPTH_MASK: u32 = 0b0000_0011;
    /// Interlace field (0 = progressive, 1 = even rows, 2 = odd rows)
    pub const FIELD_MASK: u32 = 0b0000_1100;
    pub const FIELD_EVEN: u32 = 0b0000_0100;
    pub const FIELD_ODD: u32 = 0b0000_1000;
    /// Margins must be applied when drawing
    pub const MARGIN: u32 = 0b0001_0000;
    /// Image is stored flipped
    pub const FLIP: u32 = 0b0010_0000;
}

/// Pixel depth of a texture image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PixelDepth {
    Four,
    Eight,
    Sixteen,
}

impl PixelDepth {
    /// Parse a bits-per-pixel value
    pub fn from_bpp(bpp: u8) -> Option<Self> {
        match bpp {
            4 => Some(PixelDepth::Four),
            8 => Some(PixelDepth::Eight),
            15 | 16 => Some(PixelDepth::Sixteen),
            _ => None,
        }
    }

    pub const fn bpp(self) -> u8 {
        match self {
            PixelDepth::Four => 4,
            PixelDepth::Eight => 8,
            PixelDepth::Sixteen => 16,
        }
    }

    /// Texels per 16-bit VRAM word
    pub const fn scale(self) -> usize {
        16 / self.bpp() as usize
    }

    /// Width in VRAM words of a row of `width` texels
    pub const fn units(self, width: usize) -> usize {
        width.div_ceil(self.scale())
    }

    /// Pages one image may span horizontally
    pub const fn max_page_span(self) -> usize {
        match self {
            PixelDepth::Four => 1,
            PixelDepth::Eight => 2,
            PixelDepth::Sixteen => 4,
        }
    }

    /// Palette entries (0 for direct colour)
    pub const fn palette_len(self) -> usize {
        match self {
            PixelDepth::Four => 16,
            PixelDepth::Eight => 256,
            PixelDepth::Sixteen => 0,
        }
    }

    /// Depth bits of [`frame_flags`]
    pub const fn flag(self) -> u32 {
        match self {
            PixelDepth::Four => 0,
            PixelDepth::Eight => 1,
            PixelDepth::Sixteen => 2,
        }
    }

    /// Whether an image at `x` (in words) with `width` words obeys the page
    /// crossing rule for this depth
    pub const fn fits_span(self, x: usize, width: usize) -> bool {
        if width == 0 {
            return true;
        }
        let first = x / PAGE_WIDTH;
        let last = (x + width - 1) / PAGE_WIDTH;
        last - first < self.max_page_span()
    }
}

/// Packed palette position within its page
///
/// `px` and `py` are the palette's position in its atlas, in words.
pub const fn palette_offset(px: usize, py: usize) -> u16 {
    (((px % PAGE_WIDTH) / 16) | (py << 6)) as u16
}

/// Texture entry header (4 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureHeader {
    pub frame_count: u8,
    pub mip_levels: u8,
    pub field_count: u8,
    pub bpp: u8,
}

impl TextureHeader {
    pub const SIZE: usize = 4;

    pub fn new(frame_count: u8, mip_levels: u8, field_count: u8, bpp: u8) -> Self {
        Self {
            frame_count,
            mip_levels,
            field_count,
            bpp,
        }
    }

    /// Number of frame descriptors following the header
    pub fn descriptor_count(&self) -> usize {
        self.frame_count as usize * self.mip_levels as usize * self.field_count as usize
    }

    /// Index of a descriptor (frame-major, then mip level, then field)
    pub fn descriptor_index(&self, frame: usize, mip: usize, field: usize) -> usize {
        (frame * self.mip_levels as usize + mip) * self.field_count as usize + field
    }

    /// Write header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        [self.frame_count, self.mip_levels, self.field_count, self.bpp]
    }

    /// Read header from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            frame_count: bytes[0],
            mip_levels: bytes[1],
            field_count: bytes[2],
            bpp: bytes[3],
        })
    }
}

/// Frame descriptor (16 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameDescriptor {
    /// Absolute page of the image within the VRAM section
    pub image_page: u16,
    /// Absolute page of the palette (0 for 16bpp)
    pub palette_page: u16,
    /// Position within the image page, in texels
    pub x: u8,
    pub y: u8,
    pub margin_left: u8,
    pub margin_top: u8,
    pub width: u8,
    pub height: u8,
    /// See [`palette_offset`]
    pub palette_offset: u16,
    pub flags: u32,
}

impl FrameDescriptor {
    pub const SIZE: usize = 16;

    pub fn depth(&self) -> Option<PixelDepth> {
        match self.flags & frame_flags::DEPTH_MASK {
            0 => Some(PixelDepth::Four),
            1 => Some(PixelDepth::Eight),
            2 => Some(PixelDepth::Sixteen),
            _ => None,
        }
    }

    pub fn has_margin(&self) -> bool {
        self.flags & frame_flags::MARGIN != 0
    }

    pub fn is_flipped(&self) -> bool {
        self.flags & frame_flags::FLIP != 0
    }

    /// Write descriptor to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..2].copy_from_slice(&self.image_page.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.palette_page.to_le_bytes());
        bytes[4] = self.x;
        bytes[5] = self.y;
        bytes[6] = self.margin_left;
        bytes[7] = self.margin_top;
        bytes[8] = self.width;
        bytes[9] = self.height;
        bytes[10..12].copy_from_slice(&self.palette_offset.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.flags.to_le_bytes());
        bytes
    }

    /// Read descriptor from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            image_page: u16::from_le_bytes([bytes[0], bytes[1]]),
            palette_page: u16::from_le_bytes([bytes[2], bytes[3]]),
            x: bytes[4],
            y: bytes[5],
            margin_left: bytes[6],
            margin_top: bytes[7],
            width: bytes[8],
            height: bytes[9],
            palette_offset: u16::from_le_bytes([bytes[10], bytes[11]]),
            flags: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        })
    }
}

/// Background entry header (8 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackgroundHeader {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

impl BackgroundHeader {
    pub const SIZE: usize = 8;

    pub fn new(x: u16, y: u16, width: u16, height: u16) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Size of the pixel data following the header
    pub fn pixel_data_size(&self) -> usize {
        self.width as usize * self.height as usize * 2
    }

    /// Write header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..2].copy_from_slice(&self.x.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.y.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.width.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.height.to_le_bytes());
        bytes
    }

    /// Read header from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            x: u16::from_le_bytes([bytes[0], bytes[1]]),
            y: u16::from_le_bytes([bytes[2], bytes[3]]),
            width: u16::from_le_bytes([bytes[4], bytes[5]]),
            height: u16::from_le_bytes([bytes[6], bytes[7]]),
        })
    }
}

/// Frame descriptors of a serialized texture entry
pub fn read_frames(payload: &[u8]) -> Option<(TextureHeader, Vec<FrameDescriptor>)> {
    let header = TextureHeader::from_bytes(payload)?;
    let frames = (0..header.descriptor_count())
        .map(|i| {
            let start = TextureHeader::SIZE + i * FrameDescriptor::SIZE;
            FrameDescriptor::from_bytes(payload.get(start..)?)
        })
        .collect::<Option<Vec<_>>>()?;

    Some((header, frames))
}
