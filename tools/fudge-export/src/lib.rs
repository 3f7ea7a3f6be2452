//! fudge-export library
//!
//! Converts textures, backgrounds, sounds, string tables and raw files into a
//! single bundle file: an sdbm-hashed index, VRAM texture pages, SPU ADPCM
//! data and main RAM payloads. Also writes standalone audio streams and TIM
//! images. Used by the `fudge-export` binary and by tests.

pub mod atlas;
pub mod audio;
pub mod bundle;
pub mod error;
pub mod inspect;
pub mod manifest;
pub mod pack;
pub mod quantize;
pub mod stream;
pub mod string_table;
pub mod texture;
pub mod tim;

// Re-export the main entry points
pub use bundle::{Bundle, BundleBuilder};
pub use error::ExportError;
pub use manifest::{EntryKind, EntrySpec, Manifest, load_manifest, validate};
pub use pack::{BundleOptions, build_bundle, run_bundle};
pub use quantize::{ExactQuantizer, ImageQuantizer, Quantizer};
