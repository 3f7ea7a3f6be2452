//! SPU ADPCM encoder implementation
//!
//! Each 28-sample block is encoded with every predictor and a small window
//! of shifts around the estimated optimum; the pair with the lowest squared
//! reconstruction error wins. Loop flags are written by the stream encoder,
//! not by the block encoder.

use crate::{
    AdpcmError, BLOCK_DATA_SIZE, BLOCK_SAMPLES, BLOCK_SIZE, FILTER_COUNT, FilterState,
    SampleDepth, advance, loop_flags, predict, quantize, reconstruct,
};

/// One encoded block before flags are attached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedBlock {
    pub filter: u8,
    pub shift: u8,
    pub depth: SampleDepth,
    /// Quantized residuals, one per sample
    pub codes: [i8; BLOCK_SAMPLES],
    /// Summed squared error between input and reconstruction
    pub error: u64,
}

impl EncodedBlock {
    /// Header byte: shift in the low nibble, filter in the high nibble
    pub const fn header(&self) -> u8 {
        self.shift | (self.filter << 4)
    }

    /// Packed residuals (14 bytes for 4-bit, 28 bytes for 8-bit)
    pub fn data(&self) -> Vec<u8> {
        match self.depth {
            SampleDepth::Four => self
                .codes
                .chunks_exact(2)
                .map(|pair| (pair[0] as u8 & 0x0f) | ((pair[1] as u8 & 0x0f) << 4))
                .collect(),
            SampleDepth::Eight => self.codes.iter().map(|&code| code as u8).collect(),
        }
    }

    /// Full 16-byte SPU block. Only meaningful for 4-bit blocks.
    pub fn to_spu_bytes(&self, flags: u8) -> [u8; BLOCK_SIZE] {
        let mut block = [0u8; BLOCK_SIZE];
        block[0] = self.header();
        block[1] = flags;

        for (i, pair) in self.codes.chunks_exact(2).enumerate().take(BLOCK_DATA_SIZE) {
            block[2 + i] = (pair[0] as u8 & 0x0f) | ((pair[1] as u8 & 0x0f) << 4);
        }

        block
    }
}

/// Estimate the shift for `filter` from the peak residuals of the block
///
/// The estimate predicts from the raw input rather than the reconstruction,
/// so it can be off by one in either direction.
pub fn base_shift(samples: &[i16], state: FilterState, filter: usize, depth: SampleDepth) -> u32 {
    let mut state = state;
    let mut min = 0i32;
    let mut max = 0i32;

    for &sample in samples {
        let residual = sample as i32 - predict(state, filter);
        min = min.min(residual);
        max = max.max(residual);
        state = advance(state, sample as i32);
    }

    let max_shift = depth.max_shift();
    let mut right_shift = 0;

    while right_shift < max_shift && (max >> right_shift) > depth.max_code() {
        right_shift += 1;
    }
    while right_shift < max_shift && (min >> right_shift) < depth.min_code() {
        right_shift += 1;
    }

    max_shift - right_shift
}

/// Encode one block with a fixed (filter, shift) pair
///
/// Returns the block (with its error) and the filter state a decoder would
/// have after playing it.
pub fn candidate_error(
    samples: &[i16; BLOCK_SAMPLES],
    state: FilterState,
    filter: usize,
    shift: u32,
    depth: SampleDepth,
) -> (EncodedBlock, FilterState) {
    let mut state = state;
    let mut codes = [0i8; BLOCK_SAMPLES];
    let mut error = 0u64;

    for (code_out, &sample) in codes.iter_mut().zip(samples) {
        let sample = sample as i32;
        let prediction = predict(state, filter);

        let code = quantize(sample - prediction, shift, depth);
        let decoded = reconstruct(code, shift, prediction, depth);

        let diff = (decoded - sample) as i64;
        error += (diff * diff) as u64;

        *code_out = code as i8;
        state = advance(state, decoded);
    }

    let block = EncodedBlock {
        filter: filter as u8,
        shift: shift as u8,
        depth,
        codes,
        error,
    };
    (block, state)
}

/// Encode one block, searching every filter and shifts around its estimate
///
/// # Returns
/// The lowest-error block and the updated filter state. On ties the lower
/// filter, then the lower shift, wins.
pub fn encode_block(
    samples: &[i16; BLOCK_SAMPLES],
    state: FilterState,
    depth: SampleDepth,
) -> (EncodedBlock, FilterState) {
    let max_shift = depth.max_shift();
    let mut best = (0usize, 0u32);
    let mut best_error = u64::MAX;

    for filter in 0..FILTER_COUNT {
        let base = base_shift(samples, state, filter, depth);
        let low = base.saturating_sub(1);
        let high = (base + 1).min(max_shift);

        for shift in low..=high {
            let (block, _) = candidate_error(samples, state, filter, shift, depth);
            if block.error < best_error {
                best_error = block.error;
                best = (filter, shift);
            }
        }
    }

    // Commit the winner against the real state
    candidate_error(samples, state, best.0, best.1, depth)
}

/// Encode a channel into 16-byte SPU blocks
///
/// # Arguments
/// * `samples` - PCM samples, length must be a multiple of 28
/// * `state` - Filter state carried over from the previous call
/// * `end_flags` - Loop flags for the final block
/// * `loop_point` - Sample index (relative to `samples`) whose block gets
///   [`loop_flags::LOOP_START`]
///
/// # Returns
/// The encoded blocks and the filter state to carry into the next call
pub fn encode_stream(
    samples: &[i16],
    state: FilterState,
    end_flags: u8,
    loop_point: Option<usize>,
) -> Result<(Vec<u8>, FilterState), AdpcmError> {
    if samples.len() % BLOCK_SAMPLES != 0 {
        return Err(AdpcmError::UnalignedLength(samples.len()));
    }

    let block_count = samples.len() / BLOCK_SAMPLES;
    let loop_block = loop_point.map(|point| point / BLOCK_SAMPLES);

    let mut output = Vec::with_capacity(block_count * BLOCK_SIZE);
    let mut state = state;

    for (index, chunk) in samples.chunks_exact(BLOCK_SAMPLES).enumerate() {
        let mut block_samples = [0i16; BLOCK_SAMPLES];
        block_samples.copy_from_slice(chunk);

        let (block, next) = encode_block(&block_samples, state, SampleDepth::Four);
        state = next;

        let mut flags = 0;
        if loop_block == Some(index) {
            flags |= loop_flags::LOOP_START;
        }
        if index + 1 == block_count {
            flags |= end_flags;
        }

        output.extend_from_slice(&block.to_spu_bytes(flags));
    }

    Ok((output, state))
}

/// Encode a complete one-shot or looping sound for one channel
///
/// With a loop offset the final block jumps back to the block holding that
/// sample and keeps playing. Without one the final block loops onto itself
/// and the voice is released.
pub fn encode_sound(samples: &[i16], loop_offset: Option<usize>) -> Result<Vec<u8>, AdpcmError> {
    let end_flags = match loop_offset {
        Some(_) => loop_flags::LOOP_END | loop_flags::SUSTAIN,
        None => loop_flags::LOOP_END | loop_flags::LOOP_START,
    };

    let (data, _) = encode_stream(samples, FilterState::default(), end_flags, loop_offset)?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noisy_block(seed: u32) -> [i16; BLOCK_SAMPLES] {
        let mut value = seed;
        let mut block = [0i16; BLOCK_SAMPLES];
        for (i, sample) in block.iter_mut().enumerate() {
            value = value.wrapping_mul(1_103_515_245).wrapping_add(12345);
            let noise = ((value >> 16) as i32 & 0x3ff) - 0x200;
            let wave = (f32::sin(i as f32 * 0.4) * 12000.0) as i32;
            *sample = (wave + noise) as i16;
        }
        block
    }

    #[test]
    fn test_header_byte() {
        let (block, _) = candidate_error(
            &[0; BLOCK_SAMPLES],
            FilterState::default(),
            3,
            9,
            SampleDepth::Four,
        );
        assert_eq!(block.header(), 0x39);
    }

    #[test]
    fn test_base_shift_silence() {
        let samples = [0i16; BLOCK_SAMPLES];
        for filter in 0..FILTER_COUNT {
            assert_eq!(base_shift(&samples, FilterState::default(), filter, SampleDepth::Four), 12);
        }
    }

    #[test]
    fn test_base_shift_full_scale() {
        let mut samples = [0i16; BLOCK_SAMPLES];
        samples[0] = i16::MAX;
        samples[1] = i16::MIN;
        assert_eq!(base_shift(&samples, FilterState::default(), 0, SampleDepth::Four), 0);
    }

    #[test]
    fn test_chosen_pair_is_optimal_among_candidates() {
        for depth in [SampleDepth::Four, SampleDepth::Eight] {
            for seed in 0..8 {
                let samples = noisy_block(seed);
                let state = FilterState::new(-300, 200);
                let (chosen, _) = encode_block(&samples, state, depth);

                for filter in 0..FILTER_COUNT {
                    let base = base_shift(&samples, state, filter, depth);
                    let low = base.saturating_sub(1);
                    let high = (base + 1).min(depth.max_shift());
                    for shift in low..=high {
                        let (other, _) = candidate_error(&samples, state, filter, shift, depth);
                        assert!(
                            chosen.error <= other.error,
                            "filter {filter} shift {shift} beats the chosen pair"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_reported_error_matches_reconstruction() {
        let samples = noisy_block(42);
        let (block, end_state) = encode_block(&samples, FilterState::default(), SampleDepth::Four);

        let mut state = FilterState::default();
        let mut error = 0u64;
        for (&code, &sample) in block.codes.iter().zip(&samples) {
            let prediction = predict(state, block.filter as usize);
            let decoded =
                reconstruct(code as i32, block.shift as u32, prediction, SampleDepth::Four);
            let diff = (decoded - sample as i32) as i64;
            error += (diff * diff) as u64;
            state = advance(state, decoded);
        }

        assert_eq!(error, block.error);
        assert_eq!(state, end_state);
    }

    #[test]
    fn test_data_packing() {
        let mut block = EncodedBlock {
            filter: 0,
            shift: 0,
            depth: SampleDepth::Four,
            codes: [0; BLOCK_SAMPLES],
            error: 0,
        };
        block.codes[0] = 1;
        block.codes[1] = -1;

        let data = block.data();
        assert_eq!(data.len(), BLOCK_DATA_SIZE);
        assert_eq!(data[0], 0xf1);
        assert_eq!(&block.to_spu_bytes(0)[2..], &data[..]);

        block.depth = SampleDepth::Eight;
        let data = block.data();
        assert_eq!(data.len(), BLOCK_SAMPLES);
        assert_eq!(&data[..2], &[0x01, 0xff]);
    }

    #[test]
    fn test_unaligned_length_rejected() {
        let samples = vec![0i16; 30];
        let err = encode_stream(&samples, FilterState::default(), 0, None).unwrap_err();
        assert_eq!(err, AdpcmError::UnalignedLength(30));
        assert!(encode_sound(&samples, None).is_err());
    }

    #[test]
    fn test_end_flags_only_on_final_block() {
        let samples: Vec<i16> = (0..BLOCK_SAMPLES * 6).map(|i| (i as i16) * 50).collect();
        let flags = loop_flags::LOOP_END | loop_flags::SUSTAIN;
        let (data, _) = encode_stream(&samples, FilterState::default(), flags, None).unwrap();

        let blocks: Vec<_> = data.chunks_exact(BLOCK_SIZE).collect();
        assert_eq!(blocks.len(), 6);
        for block in &blocks[..5] {
            assert_eq!(block[1], 0);
        }
        assert_eq!(blocks[5][1], flags);
    }

    #[test]
    fn test_loop_point_block() {
        let samples = vec![0i16; BLOCK_SAMPLES * 4];
        // Sample 60 lives in block 2
        let data = encode_sound(&samples, Some(60)).unwrap();
        let flags: Vec<u8> = data.chunks_exact(BLOCK_SIZE).map(|b| b[1]).collect();

        assert_eq!(
            flags,
            vec![
                0,
                0,
                loop_flags::LOOP_START,
                loop_flags::LOOP_END | loop_flags::SUSTAIN
            ]
        );
    }

    #[test]
    fn test_one_shot_end_flags() {
        let samples = vec![0i16; BLOCK_SAMPLES * 2];
        let data = encode_sound(&samples, None).unwrap();
        assert_eq!(data[1], 0);
        assert_eq!(data[BLOCK_SIZE + 1], loop_flags::LOOP_END | loop_flags::LOOP_START);
    }

    #[test]
    fn test_state_carries_between_calls() {
        let samples: Vec<i16> = (0..BLOCK_SAMPLES * 4)
            .map(|i| (f32::sin(i as f32 * 0.1) * 8000.0) as i16)
            .collect();

        let (whole, _) = encode_stream(&samples, FilterState::default(), 0, None).unwrap();

        let half = samples.len() / 2;
        let (first, state) =
            encode_stream(&samples[..half], FilterState::default(), 0, None).unwrap();
        let (second, _) = encode_stream(&samples[half..], state, 0, None).unwrap();

        assert_eq!([first, second].concat(), whole);
    }

    #[test]
    fn test_encode_empty() {
        let encoded = encode_sound(&[], None).unwrap();
        assert!(encoded.is_empty());
    }
}
