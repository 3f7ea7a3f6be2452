//! Typed errors for contract and capacity violations
//!
//! Orchestration code wraps these in `anyhow` with the entry name and path.

use fudge_adpcm::AdpcmError;
use fudge_common::{FormatError, IndexError};
use thiserror::Error;

use crate::atlas::PackError;
use crate::quantize::QuantizeError;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("entry name {0:?} must be non-empty ASCII")]
    InvalidName(String),

    #[error("entry {name:?} has the same hash ({hash:#010x}) as entry {existing:?}")]
    DuplicateName {
        name: String,
        existing: String,
        hash: u32,
    },

    #[error("unknown entry type {0:?}")]
    UnknownType(String),

    #[error("type id {0:#x} is outside the custom range 0x8000-0xffff")]
    ReservedType(i64),

    #[error("{name}: image is {width}x{height}, textures must be 255x255 or smaller")]
    TextureTooLarge {
        name: String,
        width: usize,
        height: usize,
    },

    #[error("{name}: {bpp}bpp image packs to {width}x{height} words, page span is {limit}x256")]
    TextureExceedsPage {
        name: String,
        bpp: u8,
        width: usize,
        height: usize,
        limit: usize,
    },

    #[error("{name}: texture with margins is {width}x{height}, at most 765x765 is allowed")]
    MarginTooLarge {
        name: String,
        width: usize,
        height: usize,
    },

    #[error("{name}: background is {width}x{height}, dimensions must fit in 16 bits")]
    BackgroundTooLarge {
        name: String,
        width: usize,
        height: usize,
    },

    #[error("{name}: unsupported color depth {bpp}")]
    InvalidDepth { name: String, bpp: u8 },

    #[error("{name}: {reason}")]
    InvalidProperty { name: String, reason: String },

    #[error("{name}: string {key:?} cannot be encoded as {encoding}")]
    InvalidString {
        name: String,
        key: String,
        encoding: &'static str,
    },

    #[error("line {line}: expected key=value, got {text:?}")]
    MalformedLine { line: usize, text: String },

    #[error("{section} data is {size} bytes, capacity is {capacity} bytes")]
    CapacityExceeded {
        section: &'static str,
        size: usize,
        capacity: usize,
    },

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Adpcm(#[from] AdpcmError),

    #[error(transparent)]
    Quantize(#[from] QuantizeError),

    #[error(transparent)]
    Pack(#[from] PackError),

    #[error("{name}: {source}")]
    Unplaceable {
        name: String,
        #[source]
        source: PackError,
    },
}

/// Check that `size` bytes fit a section of `capacity` bytes
pub fn check_capacity(
    section: &'static str,
    size: usize,
    capacity: usize,
) -> Result<(), ExportError> {
    if size > capacity {
        return Err(ExportError::CapacityExceeded {
            section,
            size,
            capacity,
        });
    }
    Ok(())
}
