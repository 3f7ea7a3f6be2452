//! Colour quantization seam
//!
//! Indexed textures are produced by a [`Quantizer`]: given RGBA pixels, a
//! colour budget and optionally a fixed palette, it returns a palette and one
//! index per pixel. The exporter only depends on this contract, so a
//! different quantizer (or a test stub) can be plugged in.
//!
//! [`ImageQuantizer`] (libimagequant) is what the command line uses;
//! [`ExactQuantizer`] keeps colours as they are and is deterministic enough
//! for tests.

use hashbrown::HashMap;
use thiserror::Error;

pub type Rgba = [u8; 4];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QuantizeError {
    #[error("image needs {colors} colors, at most {max} are allowed")]
    TooManyColors { colors: usize, max: usize },

    #[error("fixed palette has {entries} entries, at most {max} are allowed")]
    PaletteTooLarge { entries: usize, max: usize },

    #[error("fixed palette is empty")]
    EmptyPalette,

    #[error("pixel buffer is {actual} bytes, expected {expected} for the image size")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("libimagequant: {0}")]
    Backend(String),
}

impl From<imagequant::Error> for QuantizeError {
    fn from(error: imagequant::Error) -> Self {
        QuantizeError::Backend(error.to_string())
    }
}

/// Input of a quantization call
#[derive(Debug, Clone, Copy)]
pub struct QuantizeRequest<'a> {
    /// RGBA8 pixels, row-major
    pub pixels: &'a [u8],
    pub width: usize,
    pub height: usize,
    pub max_colors: usize,
    /// Palette the output must use, if any
    pub fixed_palette: Option<&'a [Rgba]>,
    /// Significant bits per colour channel of the target
    pub channel_bits: u32,
    pub dither: f32,
}

impl QuantizeRequest<'_> {
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    fn check_size(&self) -> Result<(), QuantizeError> {
        let expected = self.pixel_count() * 4;
        if self.pixels.len() != expected {
            return Err(QuantizeError::SizeMismatch {
                expected,
                actual: self.pixels.len(),
            });
        }
        Ok(())
    }
}

/// Output of a quantization call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quantized {
    /// At most `max_colors` entries
    pub palette: Vec<Rgba>,
    /// One palette index per pixel
    pub indices: Vec<u8>,
}

/// Palette generation capability
pub trait Quantizer: Send + Sync {
    fn quantize(&self, request: &QuantizeRequest) -> Result<Quantized, QuantizeError>;
}

/// Lossless quantizer
///
/// Colours are reduced to the requested channel depth and kept as-is; an
/// image needing more colours than allowed is rejected rather than degraded.
/// With a fixed palette every pixel maps to its nearest entry. Dithering is
/// not applied.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExactQuantizer;

impl Quantizer for ExactQuantizer {
    fn quantize(&self, request: &QuantizeRequest) -> Result<Quantized, QuantizeError> {
        request.check_size()?;

        if let Some(palette) = request.fixed_palette {
            return map_to_palette(request, palette);
        }

        let mask = channel_mask(request.channel_bits);
        let mut palette: Vec<Rgba> = Vec::new();
        let mut lookup: HashMap<Rgba, u8> = HashMap::new();
        let mut indices = Vec::with_capacity(request.pixel_count());

        for pixel in request.pixels.chunks_exact(4) {
            let color = if pixel[3] == 0 {
                [0; 4]
            } else {
                [pixel[0] & mask, pixel[1] & mask, pixel[2] & mask, pixel[3]]
            };

            let index = match lookup.get(&color) {
                Some(&index) => index,
                None => {
                    if palette.len() >= request.max_colors.min(256) {
                        return Err(QuantizeError::TooManyColors {
                            colors: count_colors(request.pixels, mask),
                            max: request.max_colors,
                        });
                    }
                    let index = palette.len() as u8;
                    palette.push(color);
                    lookup.insert(color, index);
                    index
                }
            };
            indices.push(index);
        }

        Ok(Quantized { palette, indices })
    }
}

/// libimagequant palette generation with optional dithering
///
/// Fixed palettes skip palette generation and map every pixel to its
/// nearest entry, the same way [`ExactQuantizer`] does.
#[derive(Debug, Clone, Copy)]
pub struct ImageQuantizer {
    /// 1 (slowest, best) to 10 (fastest)
    pub speed: i32,
}

impl Default for ImageQuantizer {
    fn default() -> Self {
        Self { speed: 4 }
    }
}

impl Quantizer for ImageQuantizer {
    fn quantize(&self, request: &QuantizeRequest) -> Result<Quantized, QuantizeError> {
        request.check_size()?;

        if let Some(palette) = request.fixed_palette {
            return map_to_palette(request, palette);
        }

        let max_colors = request.max_colors.clamp(2, 256);
        let mut attributes = imagequant::new();
        attributes.set_speed(self.speed)?;
        attributes.set_max_colors(max_colors as u32)?;
        attributes.set_min_posterization((8 - request.channel_bits.clamp(1, 8)) as u8)?;

        let pixels: Vec<imagequant::RGBA> = request
            .pixels
            .chunks_exact(4)
            .map(|p| imagequant::RGBA::new(p[0], p[1], p[2], p[3]))
            .collect();
        let mut image = attributes.new_image(pixels, request.width, request.height, 0.0)?;

        let mut result = attributes.quantize(&mut image)?;
        result.set_dithering_level(request.dither.clamp(0.0, 1.0))?;
        let (palette, indices) = result.remapped(&mut image)?;

        Ok(Quantized {
            palette: palette.iter().map(|c| [c.r, c.g, c.b, c.a]).collect(),
            indices,
        })
    }
}

fn channel_mask(bits: u32) -> u8 {
    let bits = bits.clamp(1, 8);
    !((1u16 << (8 - bits)) - 1) as u8
}

fn count_colors(pixels: &[u8], mask: u8) -> usize {
    let mut seen = hashbrown::HashSet::new();
    for pixel in pixels.chunks_exact(4) {
        if pixel[3] == 0 {
            seen.insert([0; 4]);
        } else {
            seen.insert([pixel[0] & mask, pixel[1] & mask, pixel[2] & mask, pixel[3]]);
        }
    }
    seen.len()
}

fn map_to_palette(request: &QuantizeRequest, palette: &[Rgba]) -> Result<Quantized, QuantizeError> {
    if palette.is_empty() {
        return Err(QuantizeError::EmptyPalette);
    }
    if palette.len() > request.max_colors {
        return Err(QuantizeError::PaletteTooLarge {
            entries: palette.len(),
            max: request.max_colors,
        });
    }

    let mut cache: HashMap<Rgba, u8> = HashMap::new();
    let indices = request
        .pixels
        .chunks_exact(4)
        .map(|pixel| {
            let color = [pixel[0], pixel[1], pixel[2], pixel[3]];
            *cache
                .entry(color)
                .or_insert_with(|| nearest_color(palette, color))
        })
        .collect();

    Ok(Quantized {
        palette: palette.to_vec(),
        indices,
    })
}

fn nearest_color(palette: &[Rgba], color: Rgba) -> u8 {
    let distance = |entry: &Rgba| -> u32 {
        entry
            .iter()
            .zip(&color)
            .map(|(&a, &b)| {
                let d = a as i32 - b as i32;
                (d * d) as u32
            })
            .sum()
    };

    let mut best = 0;
    let mut best_distance = u32::MAX;
    for (index, entry) in palette.iter().enumerate() {
        let d = distance(entry);
        if d < best_distance {
            best = index;
            best_distance = d;
        }
    }
    best as u8
}

// =============================================================================
// Built-in palettes
// =============================================================================

/// Fixed palette selection for indexed images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PaletteMode {
    #[default]
    Auto,
    Mono4,
    MonoAlpha4,
    Mono8,
    MonoAlpha8,
}

impl PaletteMode {
    /// The fixed palette for this mode, `None` for [`PaletteMode::Auto`]
    pub fn palette(self) -> Option<Vec<Rgba>> {
        match self {
            PaletteMode::Auto => None,
            PaletteMode::Mono4 => Some(mono_palette(15, 0)),
            PaletteMode::MonoAlpha4 => Some(mono_palette(8, 7)),
            PaletteMode::Mono8 => Some(mono_palette(255, 0)),
            PaletteMode::MonoAlpha8 => Some(mono_palette(128, 127)),
        }
    }
}

/// Grey ramp of `solid` opaque shades, then `alpha` half-transparent
/// shades, then one fully transparent entry
pub fn mono_palette(solid: usize, alpha: usize) -> Vec<Rgba> {
    fn ramp(count: usize, alpha: u8) -> impl Iterator<Item = Rgba> {
        (0..count).map(move |i| {
            let level = if count > 1 { (i * 255 / (count - 1)) as u8 } else { 0 };
            [level, level, level, alpha]
        })
    }

    ramp(solid, 0xff)
        .chain(ramp(alpha, 0x80))
        .chain(std::iter::once([0; 4]))
        .collect()
}
