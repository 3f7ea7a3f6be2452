//! Streamed audio (`stream` command)
//!
//! A stream is a sequence of chunks, each holding `chunk_length` bytes of
//! ADPCM per channel (left region, then right region) padded to a sector.
//! Every chunk ends with `LOOP_END | SUSTAIN` so the voice keeps running
//! while the player swaps in the next chunk. Encoder state carries across
//! chunk boundaries.

use fudge_adpcm::{BLOCK_SAMPLES, BLOCK_SIZE, FilterState, encode_stream, loop_flags};
use fudge_common::{SECTOR_SIZE, align_up};
use serde::Deserialize;
use tracing::debug;

use crate::audio::{Pcm, check_pcm, loop_sample, prepare_channels, remix};
use crate::error::ExportError;

/// Default bytes of ADPCM per channel and chunk
pub const DEFAULT_CHUNK_LENGTH: usize = 0x6800;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct StreamOptions {
    /// Bytes per channel and chunk, a multiple of 16
    pub chunk_length: usize,
    /// Output rate in Hz, 0 keeps the source rate
    pub sample_rate: u32,
    pub channels: usize,
    /// Loop point in seconds, negative for none
    pub loop_offset: f64,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            chunk_length: DEFAULT_CHUNK_LENGTH,
            sample_rate: 44100,
            channels: 2,
            loop_offset: -1.0,
        }
    }
}

impl StreamOptions {
    /// Samples per channel and chunk
    pub fn chunk_samples(&self) -> usize {
        self.chunk_length / BLOCK_SIZE * BLOCK_SAMPLES
    }

    /// Bytes per chunk on disc
    pub fn chunk_size(&self, channels: usize) -> usize {
        align_up(self.chunk_length * channels, SECTOR_SIZE)
    }
}

/// Encode `pcm` into interleaved stream chunks
pub fn build_stream(name: &str, pcm: Pcm, options: &StreamOptions) -> Result<Vec<u8>, ExportError> {
    if options.chunk_length == 0 || options.chunk_length % BLOCK_SIZE != 0 {
        return Err(ExportError::InvalidProperty {
            name: name.to_string(),
            reason: format!(
                "chunk length must be a non-zero multiple of {BLOCK_SIZE}, got {}",
                options.chunk_length
            ),
        });
    }

    let source_rate = pcm.sample_rate;
    let sample_rate = check_pcm(name, &pcm, options.sample_rate)?;
    let mut pcm = remix(name, pcm, options.channels)?;
    prepare_channels(name, &mut pcm, source_rate, sample_rate)?;

    let total = pcm.len();
    let loop_point = loop_sample(options.loop_offset, sample_rate);
    if loop_point.is_some_and(|point| point >= total) {
        return Err(ExportError::InvalidProperty {
            name: name.to_string(),
            reason: format!("loop offset {}s is past the end of the stream", options.loop_offset),
        });
    }

    let chunk_samples = options.chunk_samples();
    let chunk_count = total.div_ceil(chunk_samples);
    let chunk_size = options.chunk_size(pcm.channels.len());
    let end_flags = loop_flags::LOOP_END | loop_flags::SUSTAIN;

    let mut states = vec![FilterState::default(); pcm.channels.len()];
    let mut output = Vec::with_capacity(chunk_count * chunk_size);

    for chunk in 0..chunk_count {
        let start = chunk * chunk_samples;
        let end = (start + chunk_samples).min(total);
        let chunk_loop = loop_point
            .filter(|&point| (start..end).contains(&point))
            .map(|point| point - start);

        let chunk_start = output.len();
        for (channel, state) in pcm.channels.iter().zip(&mut states) {
            let region = output.len();
            let (data, next) = encode_stream(&channel[start..end], *state, end_flags, chunk_loop)?;
            *state = next;
            output.extend_from_slice(&data);
            output.resize(region + options.chunk_length, 0);
        }
        output.resize(chunk_start + chunk_size, 0);
    }

    debug!(
        "({name}) {chunk_count} chunks of {chunk_size} bytes, {} channel(s), loop {:?}",
        pcm.channels.len(),
        loop_point
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(channels: usize, samples: usize, rate: u32) -> Pcm {
        Pcm {
            channels: vec![(0..samples).map(|i| ((i % 200) as i16 - 100) * 50).collect(); channels],
            sample_rate: rate,
        }
    }

    fn small_chunks() -> StreamOptions {
        StreamOptions {
            chunk_length: BLOCK_SIZE * 4,
            sample_rate: 44100,
            channels: 2,
            loop_offset: -1.0,
        }
    }

    #[test]
    fn test_chunk_sizes() {
        let options = StreamOptions::default();
        assert_eq!(options.chunk_samples(), 0x6800 / 16 * 28);
        assert_eq!(options.chunk_size(2), 0xd000);
        assert_eq!(options.chunk_size(1), 0x6800);
    }

    #[test]
    fn test_chunk_layout() {
        // 10 blocks of audio in chunks of 4 blocks -> 3 chunks
        let data =
            build_stream("music", pcm(2, BLOCK_SAMPLES * 10, 44100), &small_chunks()).unwrap();
        assert_eq!(data.len(), 3 * SECTOR_SIZE);

        for chunk in data.chunks(SECTOR_SIZE).take(2) {
            for region in 0..2 {
                let last = region * BLOCK_SIZE * 4 + BLOCK_SIZE * 3;
                assert_eq!(chunk[last + 1], loop_flags::LOOP_END | loop_flags::SUSTAIN);
            }
            assert!(chunk[BLOCK_SIZE * 8..].iter().all(|&b| b == 0));
        }

        // Final chunk holds 2 blocks per channel, zero-filled to the region size
        let last = &data[2 * SECTOR_SIZE..];
        assert_eq!(last[BLOCK_SIZE + 1], loop_flags::LOOP_END | loop_flags::SUSTAIN);
        assert!(last[BLOCK_SIZE * 2..BLOCK_SIZE * 4].iter().all(|&b| b == 0));
        assert_eq!(last[BLOCK_SIZE * 5 + 1], loop_flags::LOOP_END | loop_flags::SUSTAIN);
    }

    #[test]
    fn test_state_carries_across_chunks() {
        let options = small_chunks();
        let source = pcm(1, BLOCK_SAMPLES * 8, 44100);
        let data = build_stream("s", source.clone(), &options).unwrap();

        let (whole, _) =
            encode_stream(&source.channels[0], FilterState::default(), 0, None).unwrap();
        // Second chunk, first block: same payload as a continuous encode
        let second = &data[SECTOR_SIZE..SECTOR_SIZE + BLOCK_SIZE];
        let expected = &whole[BLOCK_SIZE * 4..BLOCK_SIZE * 5];
        assert_eq!(second[0], expected[0]);
        assert_eq!(second[2..], expected[2..]);
    }

    #[test]
    fn test_loop_point_flags_one_chunk() {
        let options = StreamOptions {
            loop_offset: (BLOCK_SAMPLES * 5) as f64 / 44100.0,
            ..small_chunks()
        };
        let data = build_stream("s", pcm(2, BLOCK_SAMPLES * 8, 44100), &options).unwrap();

        // Sample 140 is block 1 of chunk 1
        let second = &data[SECTOR_SIZE..];
        assert_eq!(second[BLOCK_SIZE + 1], loop_flags::LOOP_START);
        assert_eq!(second[BLOCK_SIZE * 5 + 1], loop_flags::LOOP_START);
        assert_eq!(data[BLOCK_SIZE + 1], 0);
    }

    #[test]
    fn test_invalid_chunk_length() {
        let options = StreamOptions {
            chunk_length: 100,
            ..StreamOptions::default()
        };
        assert!(matches!(
            build_stream("s", pcm(1, 28, 44100), &options),
            Err(ExportError::InvalidProperty { .. })
        ));
    }

    #[test]
    fn test_degenerate_input() {
        let options = small_chunks();
        assert!(matches!(
            build_stream("s", pcm(2, 56, 0), &options),
            Err(ExportError::InvalidProperty { .. })
        ));
        assert!(matches!(
            build_stream("s", pcm(2, 0, 44100), &options),
            Err(ExportError::InvalidProperty { .. })
        ));
    }

    #[test]
    fn test_mono_stream() {
        let options = StreamOptions {
            channels: 1,
            ..small_chunks()
        };
        let data = build_stream("s", pcm(2, BLOCK_SAMPLES * 4, 44100), &options).unwrap();
        assert_eq!(data.len(), SECTOR_SIZE);
        assert_eq!(data[BLOCK_SIZE * 3 + 1], loop_flags::LOOP_END | loop_flags::SUSTAIN);
        assert!(data[BLOCK_SIZE * 4..].iter().all(|&b| b == 0));
    }
}
