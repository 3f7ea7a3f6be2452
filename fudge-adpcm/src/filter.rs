//! Predictor state and the per-sample quantize/reconstruct steps
//!
//! Everything here is a pure function of its inputs; the encoder threads a
//! [`FilterState`] value from sample to sample and block to block.

use crate::{FILTER_TAB, SampleDepth, clamp_i16};

/// Two most recent decoded samples of one channel
///
/// `s1` is the last sample, `s2` the one before it. A new channel starts
/// from silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilterState {
    pub s1: i32,
    pub s2: i32,
}

impl FilterState {
    pub const fn new(s1: i32, s2: i32) -> Self {
        Self { s1, s2 }
    }
}

/// Predicted next sample for `filter`, rounded to nearest
#[inline]
pub fn predict(state: FilterState, filter: usize) -> i32 {
    let (k1, k2) = FILTER_TAB[filter];
    (k1 * state.s1 + k2 * state.s2 + 32) >> 6
}

/// Quantize a prediction residual to a `depth`-bit code at `shift`
#[inline]
pub fn quantize(residual: i32, shift: u32, depth: SampleDepth) -> i32 {
    let max_shift = depth.max_shift();
    let code = ((residual << shift) + (1 << (max_shift - 1))) >> max_shift;
    code.clamp(depth.min_code(), depth.max_code())
}

/// Reconstruct the sample a decoder will see for `code`
///
/// The code is placed in the top bits of an i16 first, so the result is
/// bit-exact with the hardware decoder.
#[inline]
pub fn reconstruct(code: i32, shift: u32, prediction: i32, depth: SampleDepth) -> i32 {
    let scaled = (code << depth.max_shift()) as i16 as i32;
    clamp_i16((scaled >> shift) + prediction)
}

/// Push a decoded sample into the history
#[inline]
pub const fn advance(state: FilterState, sample: i32) -> FilterState {
    FilterState {
        s1: sample,
        s2: state.s1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_predictor() {
        let state = FilterState::new(1000, -1000);
        assert_eq!(predict(state, 0), 0);
    }

    #[test]
    fn test_predict_rounding() {
        // 60 * 16 / 64 = 15
        assert_eq!(predict(FilterState::new(16, 0), 1), 15);
        // (115 * 100 - 52 * 50 + 32) >> 6 = 139
        assert_eq!(predict(FilterState::new(100, 50), 2), 139);
        // Negative values round towards negative infinity after the bias
        assert_eq!(predict(FilterState::new(-16, 0), 1), -15);
    }

    #[test]
    fn test_quantize_clips_to_depth() {
        let depth = SampleDepth::Four;
        assert_eq!(quantize(1_000_000, 0, depth), 7);
        assert_eq!(quantize(-1_000_000, 0, depth), -8);
        assert_eq!(quantize(0, 12, depth), 0);

        let depth = SampleDepth::Eight;
        assert_eq!(quantize(1_000_000, 0, depth), 127);
        assert_eq!(quantize(-1_000_000, 0, depth), -128);
    }

    #[test]
    fn test_quantize_reconstruct_exact_at_full_shift() {
        // With shift 12 a 4-bit code maps to residuals -8..=7 exactly
        let depth = SampleDepth::Four;
        for residual in -8..=7 {
            let code = quantize(residual, 12, depth);
            assert_eq!(code, residual);
            assert_eq!(reconstruct(code, 12, 100, depth), 100 + residual);
        }
    }

    #[test]
    fn test_reconstruct_saturates() {
        let depth = SampleDepth::Four;
        assert_eq!(reconstruct(7, 0, 32000, depth), 32767);
        assert_eq!(reconstruct(-8, 0, -32000, depth), -32768);
    }

    #[test]
    fn test_advance() {
        let state = advance(FilterState::new(5, 3), 9);
        assert_eq!(state, FilterState::new(9, 5));
    }
}
