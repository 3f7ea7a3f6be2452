//! Fudge bundle binary formats
//!
//! A bundle is four sections, each padded to [`SECTOR_SIZE`]:
//!
//! ```text
//! index   - BundleHeader + HashSlot table
//! vram    - texture pages, largest atlases first
//! spu     - ADPCM sample data
//! data    - main RAM entry payloads
//! ```
//!
//! All fields are little-endian. Fixed-size structures implement the
//! [`BinarySerializable`] trait for consistent serialization/deserialization.

pub mod bundle;
mod serialization;
pub mod sound;
pub mod string_table;
pub mod texture;
pub mod tim;

pub use bundle::*;
pub use serialization::BinarySerializable;
pub use sound::*;
pub use string_table::*;
pub use texture::*;
pub use tim::*;

use thiserror::Error;

/// Alignment of every bundle section
pub const SECTOR_SIZE: usize = 0x800;

/// Main RAM available for the data section
pub const DATA_CAPACITY: usize = 0x180000;

/// SPU RAM available for sample data
pub const SPU_CAPACITY: usize = 0x7d000;

/// VRAM pages available for textures (the rest holds framebuffers)
pub const VRAM_PAGES: usize = 20;

/// Page width in 16-bit VRAM words
pub const PAGE_WIDTH: usize = 64;

/// Page height in rows
pub const PAGE_HEIGHT: usize = 256;

/// Bytes in one page
pub const PAGE_SIZE: usize = PAGE_WIDTH * PAGE_HEIGHT * 2;

/// Default alignment of main RAM payloads
pub const DATA_ALIGN: usize = 4;

/// Alignment of executable payloads
pub const EXECUTABLE_ALIGN: usize = 16;

/// Errors raised when a value does not fit the format
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("{field} is {value}, the format allows at most {max}")]
    FieldOverflow {
        field: &'static str,
        value: usize,
        max: usize,
    },

    #[error("bucket count {0} is not a power of two")]
    NotPowerOfTwo(usize),
}

impl FormatError {
    /// Check that `value` fits in `max`
    pub fn check(field: &'static str, value: usize, max: usize) -> Result<(), FormatError> {
        if value > max {
            Err(FormatError::FieldOverflow { field, value, max })
        } else {
            Ok(())
        }
    }
}

/// Round `value` up to a multiple of `align` (which must be non-zero)
pub const fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}
