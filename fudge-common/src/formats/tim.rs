//! Standalone TIM image files (`tim` command)
//!
//! # Layout
//! ```text
//! 0x00: TimHeader (version, flags)
//!       TimSection + CLUT words    (4/8bpp only)
//!       TimSection + image words
//! ```
//! A section's length includes its own 12-byte header. Section width is in
//! 16-bit VRAM words, so a 4bpp image 32 pixels wide is 8 words wide.

use super::PixelDepth;

/// Value of [`TimHeader::version`]
pub const TIM_VERSION: u32 = 0x10;

/// Flags bit 3: a CLUT section follows the header
pub const TIM_HAS_CLUT: u32 = 0x08;

/// Depth mode of the flags word (bits 0-1)
pub const fn tim_mode(depth: PixelDepth) -> u32 {
    match depth {
        PixelDepth::Four => 0,
        PixelDepth::Eight => 1,
        PixelDepth::Sixteen => 2,
    }
}

/// File header (8 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimHeader {
    pub version: u32,
    pub flags: u32,
}

impl TimHeader {
    pub const SIZE: usize = 8;

    /// Header for an image of `depth` (indexed depths carry a CLUT)
    pub fn new(depth: PixelDepth) -> Self {
        let clut = if depth == PixelDepth::Sixteen { 0 } else { TIM_HAS_CLUT };
        Self {
            version: TIM_VERSION,
            flags: tim_mode(depth) | clut,
        }
    }

    pub fn has_clut(&self) -> bool {
        self.flags & TIM_HAS_CLUT != 0
    }

    /// Write header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.version.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.flags.to_le_bytes());
        bytes
    }

    /// Read header from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            version: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            flags: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }
}

/// CLUT or image section header (12 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimSection {
    /// Header plus data, in bytes
    pub length: u32,
    pub x: u16,
    pub y: u16,
    /// In VRAM words
    pub width: u16,
    pub height: u16,
}

impl TimSection {
    pub const SIZE: usize = 12;

    /// Section for a `width` x `height` word rectangle at `(x, y)`
    pub fn new(x: u16, y: u16, width: u16, height: u16) -> Self {
        let data = width as u32 * height as u32 * 2;
        Self {
            length: Self::SIZE as u32 + data,
            x,
            y,
            width,
            height,
        }
    }

    /// Size of the data following the header
    pub fn data_size(&self) -> usize {
        (self.length as usize).saturating_sub(Self::SIZE)
    }

    /// Write header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.x.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.y.to_le_bytes());
        bytes[8..10].copy_from_slice(&self.width.to_le_bytes());
        bytes[10..12].copy_from_slice(&self.height.to_le_bytes());
        bytes
    }

    /// Read header from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            length: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            x: u16::from_le_bytes([bytes[4], bytes[5]]),
            y: u16::from_le_bytes([bytes[6], bytes[7]]),
            width: u16::from_le_bytes([bytes[8], bytes[9]]),
            height: u16::from_le_bytes([bytes[10], bytes[11]]),
        })
    }
}

/// Header, optional CLUT section and image section of a TIM file
pub type TimParts<'a> = (TimHeader, Option<(TimSection, &'a [u8])>, (TimSection, &'a [u8]));

fn read_section(bytes: &[u8], offset: usize) -> Option<(TimSection, &[u8], usize)> {
    let section = TimSection::from_bytes(bytes.get(offset..)?)?;
    let start = offset + TimSection::SIZE;
    let data = bytes.get(start..start + section.data_size())?;
    Some((section, data, offset + section.length as usize))
}

/// Split a TIM file into its sections
pub fn read_tim(bytes: &[u8]) -> Option<TimParts<'_>> {
    let header = TimHeader::from_bytes(bytes)?;
    if header.version != TIM_VERSION {
        return None;
    }

    let mut offset = TimHeader::SIZE;
    let clut = if header.has_clut() {
        let (clut, data, next) = read_section(bytes, offset)?;
        offset = next;
        Some((clut, data))
    } else {
        None
    };
    let (image, data, _) = read_section(bytes, offset)?;
    Some((header, clut, (image, data)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_flags() {
        assert_eq!(TimHeader::new(PixelDepth::Four).flags, 0x08);
        assert_eq!(TimHeader::new(PixelDepth::Eight).flags, 0x09);
        assert_eq!(TimHeader::new(PixelDepth::Sixteen).flags, 0x02);
        assert!(!TimHeader::new(PixelDepth::Sixteen).has_clut());
    }

    #[test]
    fn test_section_length() {
        // 16-entry CLUT: 12 + 32 bytes
        let clut = TimSection::new(0, 480, 16, 1);
        assert_eq!(clut.length, 44);
        assert_eq!(clut.data_size(), 32);
        assert_eq!(TimSection::from_bytes(&clut.to_bytes()), Some(clut));
    }

    #[test]
    fn test_read_tim() {
        let mut bytes = TimHeader::new(PixelDepth::Four).to_bytes().to_vec();
        bytes.extend_from_slice(&TimSection::new(16, 480, 16, 1).to_bytes());
        bytes.extend_from_slice(&[0xaa; 32]);
        bytes.extend_from_slice(&TimSection::new(640, 0, 2, 2).to_bytes());
        bytes.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);

        let (header, clut, (image, pixels)) = read_tim(&bytes).unwrap();
        assert!(header.has_clut());
        let (clut, colors) = clut.unwrap();
        assert_eq!((clut.x, clut.y, colors.len()), (16, 480, 32));
        assert_eq!((image.x, image.width, image.height), (640, 2, 2));
        assert_eq!(pixels, &[1, 2, 3, 4, 5, 6, 7, 8]);

        // truncated image data
        assert!(read_tim(&bytes[..bytes.len() - 1]).is_none());
    }
}
