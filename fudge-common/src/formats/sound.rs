//! Sound entry payload
//!
//! The ADPCM blocks live in the SPU section; the main RAM entry only holds
//! where to find them.
//!
//! # Layout
//! ```text
//! 0x00: left channel offset u16 (8-byte units into the SPU section)
//! 0x02: right channel offset u16 (8-byte units, 0 = mono)
//! 0x04: channel length u16 (8-byte units)
//! 0x06: sample rate u16 (0x1000 = 44100 Hz)
//! ```

/// Granularity of SPU offsets and lengths
pub const SPU_UNIT: usize = 8;

/// Hardware pitch value for `rate` Hz, rounded to nearest
pub fn spu_sample_rate(rate: u32) -> u16 {
    ((rate as f64 * 4096.0 / 44100.0).round() as u32).min(u16::MAX as u32) as u16
}

/// Sound descriptor (8 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoundDescriptor {
    pub left_offset: u16,
    pub right_offset: u16,
    pub length: u16,
    pub sample_rate: u16,
}

impl SoundDescriptor {
    pub const SIZE: usize = 8;

    /// Build a descriptor from byte offsets into the SPU section
    ///
    /// Returns `None` when a value is not a multiple of [`SPU_UNIT`] or does
    /// not fit its field.
    pub fn from_byte_offsets(
        left: usize,
        right: Option<usize>,
        length: usize,
        rate: u32,
    ) -> Option<Self> {
        let to_units = |bytes: usize| -> Option<u16> {
            if bytes % SPU_UNIT != 0 {
                return None;
            }
            u16::try_from(bytes / SPU_UNIT).ok()
        };

        Some(Self {
            left_offset: to_units(left)?,
            right_offset: to_units(right.unwrap_or(0))?,
            length: to_units(length)?,
            sample_rate: spu_sample_rate(rate),
        })
    }

    pub fn is_stereo(&self) -> bool {
        self.right_offset != 0
    }

    /// Length of one channel in bytes
    pub fn byte_length(&self) -> usize {
        self.length as usize * SPU_UNIT
    }

    /// Write descriptor to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..2].copy_from_slice(&self.left_offset.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.right_offset.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.length.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.sample_rate.to_le_bytes());
        bytes
    }

    /// Read descriptor from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            left_offset: u16::from_le_bytes([bytes[0], bytes[1]]),
            right_offset: u16::from_le_bytes([bytes[2], bytes[3]]),
            length: u16::from_le_bytes([bytes[4], bytes[5]]),
            sample_rate: u16::from_le_bytes([bytes[6], bytes[7]]),
        })
    }
}
