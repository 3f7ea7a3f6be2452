//! fudge-adpcm: SPU ADPCM encoder
//!
//! **This is a pure codec** - it turns 16-bit PCM into the 16-byte blocks
//! consumed by the sound processing unit. Where the blocks end up (SPU RAM
//! offsets, sample rate fields) is handled by the caller (fudge-common's
//! `SoundDescriptor`).
//!
//! # Block Format
//!
//! ```text
//! 0x00: shift (low nibble) | filter id (high nibble)
//! 0x01: loop flags (see [`loop_flags`])
//! 0x02: 14 bytes of 4-bit residuals, even sample in the low nibble
//! ```
//!
//! Every block decodes to exactly 28 samples. Each block picks one of five
//! fixed 2-tap predictors and a shift; the encoder searches the
//! (filter, shift) pair with the lowest squared reconstruction error.
//!
//! # Usage
//!
//! ```
//! use fudge_adpcm::{encode_sound, BLOCK_SAMPLES, BLOCK_SIZE};
//!
//! let samples = vec![0i16; BLOCK_SAMPLES * 10];
//! let blocks = encode_sound(&samples, None).unwrap();
//! assert_eq!(blocks.len(), BLOCK_SIZE * 10);
//! ```

mod encode;
mod filter;

pub use encode::{
    EncodedBlock, base_shift, candidate_error, encode_block, encode_sound, encode_stream,
};
pub use filter::{FilterState, advance, predict, quantize, reconstruct};

// =============================================================================
// Constants
// =============================================================================

/// Samples decoded from one block
pub const BLOCK_SAMPLES: usize = 28;

/// Size of one SPU block (header + flags + data)
pub const BLOCK_SIZE: usize = 16;

/// Data bytes in one SPU block (28 × 4-bit residuals)
pub const BLOCK_DATA_SIZE: usize = 14;

/// Number of predictors in the filter bank
pub const FILTER_COUNT: usize = 5;

/// Predictor coefficients `(k1, k2)` in 1/64 units, applied to the last two
/// decoded samples. Filter 0 is the null predictor.
pub const FILTER_TAB: [(i32, i32); FILTER_COUNT] =
    [(0, 0), (60, 0), (115, -52), (98, -55), (122, -60)];

/// Loop flags stored in the second byte of a block
pub mod loop_flags {
    /// Jump to the loop address after this block
    pub const LOOP_END: u8 = 0b0000_0001;
    /// Keep the voice playing after the jump (otherwise it is released)
    pub const SUSTAIN: u8 = 0b0000_0010;
    /// Latch this block's address as the loop address
    pub const LOOP_START: u8 = 0b0000_0100;
}

/// Residual width
///
/// SPU blocks always use 4-bit residuals. 8-bit residuals produce 28 data
/// bytes per block and are only meaningful for containers that store them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleDepth {
    #[default]
    Four,
    Eight,
}

impl SampleDepth {
    /// Bits per encoded residual
    pub const fn bits(self) -> u32 {
        match self {
            SampleDepth::Four => 4,
            SampleDepth::Eight => 8,
        }
    }

    /// Largest shift the header can express for this depth (16 - bits)
    pub const fn max_shift(self) -> u32 {
        16 - self.bits()
    }

    /// Data bytes needed for one block of residuals
    pub const fn data_len(self) -> usize {
        BLOCK_SAMPLES * self.bits() as usize / 8
    }

    /// Smallest encodable residual
    pub const fn min_code(self) -> i32 {
        -0x8000 >> self.max_shift()
    }

    /// Largest encodable residual
    pub const fn max_code(self) -> i32 {
        0x7fff >> self.max_shift()
    }
}

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur while encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdpcmError {
    /// Sample count is not a multiple of [`BLOCK_SAMPLES`]
    UnalignedLength(usize),
}

impl core::fmt::Display for AdpcmError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AdpcmError::UnalignedLength(len) => write!(
                f,
                "sample count {len} is not a multiple of {BLOCK_SAMPLES}"
            ),
        }
    }
}

impl std::error::Error for AdpcmError {}

// =============================================================================
// Helper Functions
// =============================================================================

/// Clamp value to 16-bit signed range
#[inline]
pub(crate) fn clamp_i16(v: i32) -> i32 {
    v.clamp(-32768, 32767)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn generate_sine(freq: f32, sample_rate: u32, blocks: usize) -> Vec<i16> {
        (0..blocks * BLOCK_SAMPLES)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                (f32::sin(t * freq * std::f32::consts::TAU) * 16000.0) as i16
            })
            .collect()
    }

    /// Decode blocks back to PCM using the same reconstruction as the encoder
    fn decode(blocks: &[u8]) -> Vec<i16> {
        let mut state = FilterState::default();
        let mut output = Vec::new();

        for block in blocks.chunks_exact(BLOCK_SIZE) {
            let shift = (block[0] & 0x0f) as u32;
            let filter = (block[0] >> 4) as usize;

            for i in 0..BLOCK_SAMPLES {
                let byte = block[2 + i / 2];
                let nibble = if i % 2 == 0 { byte & 0x0f } else { byte >> 4 };
                let code = ((nibble as i8) << 4 >> 4) as i32;

                let sample = reconstruct(code, shift, predict(state, filter), SampleDepth::Four);
                state = advance(state, sample);
                output.push(sample as i16);
            }
        }

        output
    }

    #[test]
    fn test_depth_limits() {
        assert_eq!(SampleDepth::Four.max_shift(), 12);
        assert_eq!(SampleDepth::Four.min_code(), -8);
        assert_eq!(SampleDepth::Four.max_code(), 7);
        assert_eq!(SampleDepth::Four.data_len(), BLOCK_DATA_SIZE);

        assert_eq!(SampleDepth::Eight.max_shift(), 8);
        assert_eq!(SampleDepth::Eight.min_code(), -128);
        assert_eq!(SampleDepth::Eight.max_code(), 127);
        assert_eq!(SampleDepth::Eight.data_len(), 28);
    }

    #[test]
    fn test_roundtrip_silence() {
        let original = vec![0i16; BLOCK_SAMPLES * 50];
        let encoded = encode_sound(&original, None).unwrap();
        let decoded = decode(&encoded);

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_roundtrip_sine_error() {
        let original = generate_sine(440.0, 22050, 200);
        let encoded = encode_sound(&original, None).unwrap();
        let decoded = decode(&encoded);

        assert_eq!(decoded.len(), original.len());

        let max_error = original
            .iter()
            .zip(&decoded)
            .map(|(&a, &b)| (a as i32 - b as i32).abs())
            .max()
            .unwrap_or(0);
        assert!(max_error < 600, "Sine max error too high: {}", max_error);
    }

    #[test]
    fn test_compression_ratio() {
        let original = generate_sine(440.0, 22050, 1000);
        let encoded = encode_sound(&original, None).unwrap();

        // 28 samples × 2 bytes → 16 bytes
        assert_eq!(encoded.len(), original.len() / BLOCK_SAMPLES * BLOCK_SIZE);
    }

    #[test]
    fn test_error_display() {
        let message = AdpcmError::UnalignedLength(30).to_string();
        assert!(message.contains("30"));
        assert!(message.contains("28"));
    }
}
