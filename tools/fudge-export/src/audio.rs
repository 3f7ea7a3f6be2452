//! Sound conversion (WAV -> SPU ADPCM)

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, bail};
use fudge_adpcm::{BLOCK_SAMPLES, encode_sound};
use serde::Deserialize;
use tracing::debug;

use crate::error::ExportError;

/// Sound conversion settings
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SoundOptions {
    /// Output rate in Hz, 0 keeps the source rate
    pub sample_rate: u32,
    pub channels: usize,
    /// Loop point in seconds, negative for one-shot sounds
    pub loop_offset: f64,
}

impl Default for SoundOptions {
    fn default() -> Self {
        Self {
            sample_rate: 0,
            channels: 1,
            loop_offset: -1.0,
        }
    }
}

/// Decoded PCM audio, one sample buffer per channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pcm {
    pub channels: Vec<Vec<i16>>,
    pub sample_rate: u32,
}

impl Pcm {
    /// Samples per channel
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Load a WAV file
pub fn load_wav(path: &Path) -> Result<Pcm> {
    let reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to load WAV: {}", path.display()))?;
    read_wav(reader).with_context(|| format!("Failed to decode WAV: {}", path.display()))
}

/// Decode every sample of an opened WAV stream to 16 bits
pub fn read_wav<R: Read>(mut reader: hound::WavReader<R>) -> Result<Pcm> {
    let spec = reader.spec();

    let samples: Vec<i16> = match spec.sample_format {
        hound::SampleFormat::Int => match spec.bits_per_sample {
            16 => reader.samples::<i16>().collect::<Result<_, _>>()?,
            8 => reader
                .samples::<i8>()
                .map(|s| s.map(|s| (s as i16) << 8))
                .collect::<Result<_, _>>()?,
            24 | 32 => reader
                .samples::<i32>()
                .map(|s| s.map(|s| (s >> (spec.bits_per_sample - 16)) as i16))
                .collect::<Result<_, _>>()?,
            bits => bail!("Unsupported bit depth: {bits}"),
        },
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|s| (s.clamp(-1.0, 1.0) * 32767.0) as i16))
            .collect::<Result<_, _>>()?,
    };

    let count = spec.channels as usize;
    if count == 0 {
        bail!("WAV file has no channels");
    }

    let channels = (0..count)
        .map(|channel| samples.iter().skip(channel).step_by(count).copied().collect())
        .collect();

    Ok(Pcm {
        channels,
        sample_rate: spec.sample_rate,
    })
}

/// Simple linear resampling
pub fn resample(samples: &[i16], src_rate: u32, dst_rate: u32) -> Vec<i16> {
    if src_rate == dst_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = src_rate as f64 / dst_rate as f64;
    let output_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_pos = i as f64 * ratio;
        let src_idx = src_pos as usize;
        let frac = src_pos - src_idx as f64;

        let sample = if src_idx + 1 < samples.len() {
            let a = samples[src_idx] as f64;
            let b = samples[src_idx + 1] as f64;
            (a + (b - a) * frac).round() as i16
        } else {
            samples[src_idx.min(samples.len() - 1)]
        };

        output.push(sample);
    }

    output
}

/// Bring `pcm` to `channels` channels (1 or 2)
///
/// Mono output averages every source channel, stereo output duplicates a
/// mono source and keeps the first two channels of anything wider.
pub fn remix(name: &str, pcm: Pcm, channels: usize) -> Result<Pcm, ExportError> {
    let sample_rate = pcm.sample_rate;
    let source = pcm.channels;

    let mixed = match (channels, source.len()) {
        (1, 1) | (2, 2) => source,
        (1, count) => {
            let len = source[0].len();
            let mono = (0..len)
                .map(|i| {
                    let sum: i32 = source.iter().map(|c| c[i] as i32).sum();
                    (sum / count as i32) as i16
                })
                .collect();
            vec![mono]
        }
        (2, 1) => vec![source[0].clone(), source[0].clone()],
        (2, _) => source.into_iter().take(2).collect(),
        _ => {
            return Err(ExportError::InvalidProperty {
                name: name.to_string(),
                reason: format!("sounds must be mono or stereo, got channels = {channels}"),
            });
        }
    };

    Ok(Pcm {
        channels: mixed,
        sample_rate,
    })
}

/// Pad with silence to a whole number of ADPCM blocks
pub fn pad_to_blocks(samples: &mut Vec<i16>) {
    samples.resize(samples.len().next_multiple_of(BLOCK_SAMPLES), 0);
}

/// Loop point in samples, `None` for a negative offset
pub fn loop_sample(loop_offset: f64, sample_rate: u32) -> Option<usize> {
    let sample = (loop_offset * sample_rate as f64).round();
    (sample >= 0.0).then_some(sample as usize)
}

/// An encoded sound, one ADPCM buffer per channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedSound {
    pub channels: Vec<Vec<u8>>,
    pub sample_rate: u32,
}

impl ConvertedSound {
    /// Bytes per channel
    pub fn length(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_stereo(&self) -> bool {
        self.channels.len() == 2
    }
}

/// Reject PCM that cannot be resampled or encoded
///
/// Returns the output rate (`target`, or the source rate when 0).
pub fn check_pcm(name: &str, pcm: &Pcm, target: u32) -> Result<u32, ExportError> {
    let invalid = |reason: String| ExportError::InvalidProperty {
        name: name.to_string(),
        reason,
    };

    if pcm.sample_rate == 0 {
        return Err(invalid("source sample rate is 0 Hz".to_string()));
    }
    if pcm.is_empty() {
        return Err(invalid("sound has no samples".to_string()));
    }

    Ok(if target == 0 { pcm.sample_rate } else { target })
}

/// Resample every channel of `pcm` and pad it to whole blocks
pub fn prepare_channels(
    name: &str,
    pcm: &mut Pcm,
    source_rate: u32,
    sample_rate: u32,
) -> Result<(), ExportError> {
    for channel in &mut pcm.channels {
        *channel = resample(channel, source_rate, sample_rate);
    }
    if pcm.is_empty() {
        return Err(ExportError::InvalidProperty {
            name: name.to_string(),
            reason: format!("no samples left after resampling to {sample_rate} Hz"),
        });
    }
    for channel in &mut pcm.channels {
        pad_to_blocks(channel);
    }
    Ok(())
}

/// Resample, remix and encode `pcm`
pub fn convert_sound(
    name: &str,
    pcm: Pcm,
    options: &SoundOptions,
) -> Result<ConvertedSound, ExportError> {
    let source_rate = pcm.sample_rate;
    let sample_rate = check_pcm(name, &pcm, options.sample_rate)?;

    let mut pcm = remix(name, pcm, options.channels)?;
    prepare_channels(name, &mut pcm, source_rate, sample_rate)?;

    let samples = pcm.len();
    let loop_point = loop_sample(options.loop_offset, sample_rate);
    if loop_point.is_some_and(|point| point >= samples) {
        return Err(ExportError::InvalidProperty {
            name: name.to_string(),
            reason: format!("loop offset {}s is past the end of the sound", options.loop_offset),
        });
    }

    let channels = pcm
        .channels
        .iter()
        .map(|channel| encode_sound(channel, loop_point))
        .collect::<Result<Vec<_>, _>>()?;

    debug!(
        "({name}) {} channel(s), {samples} samples at {sample_rate} Hz, loop {:?}",
        channels.len(),
        loop_point
    );

    Ok(ConvertedSound {
        channels,
        sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fudge_adpcm::{BLOCK_SIZE, loop_flags};
    use std::io::Cursor;

    fn wav_bytes(channels: u16, rate: u32, samples: &[i16]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    fn mono(samples: Vec<i16>, rate: u32) -> Pcm {
        Pcm {
            channels: vec![samples],
            sample_rate: rate,
        }
    }

    #[test]
    fn test_read_wav_deinterleaves() {
        let bytes = wav_bytes(2, 22050, &[1, -1, 2, -2, 3, -3]);
        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        let pcm = read_wav(reader).unwrap();

        assert_eq!(pcm.sample_rate, 22050);
        assert_eq!(pcm.channels, vec![vec![1, 2, 3], vec![-1, -2, -3]]);
        assert_eq!(pcm.len(), 3);
    }

    #[test]
    fn test_resample_halves_length() {
        let samples: Vec<i16> = (0..100).map(|i| i * 10).collect();
        let out = resample(&samples, 44100, 22050);
        assert_eq!(out.len(), 50);
        assert_eq!(out[1], 20);
        assert_eq!(resample(&samples, 44100, 44100), samples);
    }

    #[test]
    fn test_remix() {
        let stereo = Pcm {
            channels: vec![vec![100, 0], vec![300, 0]],
            sample_rate: 44100,
        };
        let down = remix("s", stereo, 1).unwrap();
        assert_eq!(down.channels, vec![vec![200, 0]]);

        let up = remix("s", mono(vec![5, 6], 44100), 2).unwrap();
        assert_eq!(up.channels, vec![vec![5, 6], vec![5, 6]]);

        assert!(matches!(
            remix("s", mono(vec![0], 44100), 3),
            Err(ExportError::InvalidProperty { .. })
        ));
    }

    #[test]
    fn test_loop_sample() {
        assert_eq!(loop_sample(-1.0, 44100), None);
        assert_eq!(loop_sample(0.0, 44100), Some(0));
        assert_eq!(loop_sample(0.5, 22050), Some(11025));
    }

    #[test]
    fn test_convert_pads_to_blocks() {
        let sound =
            convert_sound("beep", mono(vec![1000; 4410], 22050), &SoundOptions::default()).unwrap();

        // 4410 samples -> 158 blocks (4424 samples)
        assert_eq!(sound.length(), 158 * BLOCK_SIZE);
        assert_eq!(sound.sample_rate, 22050);
        assert!(!sound.is_stereo());

        let last = &sound.channels[0][sound.length() - BLOCK_SIZE..];
        assert_eq!(last[1], loop_flags::LOOP_END | loop_flags::LOOP_START);
    }

    #[test]
    fn test_convert_looping_stereo() {
        let options = SoundOptions {
            sample_rate: 0,
            channels: 2,
            loop_offset: 0.01,
        };
        let sound = convert_sound("loop", mono(vec![0; 2800], 28000), &options).unwrap();

        assert!(sound.is_stereo());
        assert_eq!(sound.channels[0], sound.channels[1]);

        // loop point 280 -> block 10
        let data = &sound.channels[0];
        assert_eq!(data[10 * BLOCK_SIZE + 1], loop_flags::LOOP_START);
        assert_eq!(data[99 * BLOCK_SIZE + 1], loop_flags::LOOP_END | loop_flags::SUSTAIN);
    }

    #[test]
    fn test_convert_resamples() {
        let options = SoundOptions {
            sample_rate: 22050,
            ..SoundOptions::default()
        };
        let sound = convert_sound("r", mono(vec![0; 2800], 44100), &options).unwrap();
        assert_eq!(sound.sample_rate, 22050);
        assert_eq!(sound.length(), 50 * BLOCK_SIZE);
    }

    #[test]
    fn test_zero_rate_rejected() {
        let options = SoundOptions {
            sample_rate: 22050,
            ..SoundOptions::default()
        };
        assert!(matches!(
            convert_sound("s", mono(vec![0; 56], 0), &options),
            Err(ExportError::InvalidProperty { .. })
        ));
    }

    #[test]
    fn test_empty_sound_rejected() {
        let stereo = Pcm {
            channels: vec![Vec::new(), Vec::new()],
            sample_rate: 44100,
        };
        let options = SoundOptions {
            channels: 2,
            ..SoundOptions::default()
        };
        assert!(matches!(
            convert_sound("silence", stereo, &options),
            Err(ExportError::InvalidProperty { .. })
        ));

        // A single sample resampled to a much lower rate vanishes
        let options = SoundOptions {
            sample_rate: 1000,
            ..SoundOptions::default()
        };
        assert!(convert_sound("tiny", mono(vec![5], 44100), &options).is_err());
    }

    #[test]
    fn test_loop_past_end() {
        let options = SoundOptions {
            loop_offset: 2.0,
            ..SoundOptions::default()
        };
        assert!(matches!(
            convert_sound("late", mono(vec![0; 28], 44100), &options),
            Err(ExportError::InvalidProperty { .. })
        ));
    }
}
