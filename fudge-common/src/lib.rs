//! Shared formats and utilities for fudge bundles
//!
//! This crate provides everything both sides of a bundle agree on:
//! - `fudge-export` (asset pipeline) writes bundles with it
//! - loaders and tests read them back with the `from_bytes` readers
//!
//! # Modules
//!
//! - [`index`] - sdbm name hash and the bucket/chain hash table builder
//! - [`formats`] - bundle header, hash slots and entry payload formats

pub mod formats;
pub mod index;

// Re-export the hashing entry points
pub use index::{HashTable, IndexError, TableSlot, build_table, bucket_count, hash32, hash_str};

// Re-export commonly used format items
pub use formats::{
    // Constants
    BUNDLE_MAGIC,
    ATLAS_WIDTHS,
    BUNDLE_VERSION,
    DATA_ALIGN,
    DATA_CAPACITY,
    EXECUTABLE_ALIGN,
    PAGE_HEIGHT,
    PAGE_SIZE,
    PAGE_WIDTH,
    SECTOR_SIZE,
    SPU_CAPACITY,
    VRAM_PAGES,
    // Traits and errors
    BinarySerializable,
    FormatError,
    // Bundle types
    BundleHeader,
    HashSlot,
    // Entry payload types
    BackgroundHeader,
    FrameDescriptor,
    PixelDepth,
    SoundDescriptor,
    StringSlot,
    StringTableHeader,
    TextureHeader,
    TimHeader,
    TimSection,
    align_up,
    entry_data,
    entry_type,
    find_entry,
    frame_flags,
    lookup_string,
    palette_offset,
    read_frames,
    read_slot,
    read_tim,
    spu_sample_rate,
};
