//! Image conversion (RGBA -> 15-bit colour, 4/8bpp indexed or direct)
//!
//! Produces [`ConvertedImage`]s ready for the atlas packer: one per mip level
//! (and per interlace field for interlaced textures).

use fudge_common::{FormatError, FrameDescriptor, PAGE_HEIGHT, PAGE_WIDTH, PixelDepth, frame_flags};
use image::{RgbaImage, imageops};
use serde::Deserialize;
use tracing::{debug, warn};
use xxhash_rust::xxh3::Xxh3;

use crate::atlas::ImageSlot;
use crate::error::ExportError;
use crate::quantize::{PaletteMode, QuantizeError, QuantizeRequest, Quantizer, Rgba};

/// Largest texture side (without margins)
pub const MAX_TEXTURE_SIZE: usize = 255;

/// Largest texture side including margins
pub const MAX_MARGIN_SIZE: usize = 3 * MAX_TEXTURE_SIZE;

/// Significant bits per channel of the 15-bit colour format
const CHANNEL_BITS: u32 = 5;

/// Convert an RGBA colour to 15-bit colour
///
/// Alpha below `alpha_range[0]` gives the transparent value 0, alpha above
/// `alpha_range[1]` an opaque colour, anything in between sets the
/// semi-transparency bit. Opaque black would read as transparent, so it is
/// replaced by `black`.
pub fn pack_rgb15(color: Rgba, alpha_range: [u8; 2], black: u16) -> u16 {
    let [r, g, b, a] = color;
    let (low, high) = (alpha_range[0].min(alpha_range[1]), alpha_range[0].max(alpha_range[1]));

    if a < low {
        return 0;
    }

    let value = (r >> 3) as u16 | ((g >> 3) as u16) << 5 | ((b >> 3) as u16) << 10;
    if a <= high {
        value | 0x8000
    } else if value == 0 {
        black
    } else {
        value
    }
}

/// Pack the `black_value` property (5-bit channels plus the STP bit)
pub fn pack_black_value(value: [u8; 4]) -> u16 {
    (value[0] & 31) as u16
        | ((value[1] & 31) as u16) << 5
        | ((value[2] & 31) as u16) << 10
        | ((value[3] & 1) as u16) << 15
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CropMode {
    #[default]
    None,
    /// Trim transparent borders and record them as margins
    PreserveMargin,
    /// Trim transparent borders
    RemoveMargin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FlipMode {
    #[default]
    None,
    Flip,
    PreferUnflipped,
    PreferFlipped,
}

impl FlipMode {
    /// Orientations the packer tries, in order
    pub const fn orientations(self) -> &'static [bool] {
        match self {
            FlipMode::None => &[false],
            FlipMode::Flip => &[true],
            FlipMode::PreferUnflipped => &[false, true],
            FlipMode::PreferFlipped => &[true, false],
        }
    }
}

/// Image conversion settings
#[derive(Debug, Clone, PartialEq)]
pub struct ImageOptions {
    pub depth: PixelDepth,
    pub palette: PaletteMode,
    pub dither: f32,
    /// Source rectangle `[x, y, width, height]`, clamped to the image
    pub crop: Option<[u32; 4]>,
    pub crop_mode: CropMode,
    pub padding: usize,
    pub flip_mode: FlipMode,
    pub alpha_range: [u8; 2],
    pub black_value: [u8; 4],
    pub mip_levels: usize,
    pub mip_scale: f32,
    pub scale: f32,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            depth: PixelDepth::Four,
            palette: PaletteMode::Auto,
            dither: 0.0,
            crop: None,
            crop_mode: CropMode::None,
            padding: 0,
            flip_mode: FlipMode::None,
            alpha_range: [0x20, 0xe0],
            black_value: [1, 1, 1, 0],
            mip_levels: 1,
            mip_scale: 0.5,
            scale: 1.0,
        }
    }
}

impl ImageOptions {
    /// Drop margin and flip requests the target loader cannot handle
    pub fn restrict(&mut self, name: &str, allow_margins: bool, allow_flip: bool) {
        if !allow_margins && self.crop_mode == CropMode::PreserveMargin {
            warn!("({name}) margins are disabled, trimming borders without recording them");
            self.crop_mode = CropMode::RemoveMargin;
        }
        if !allow_flip && self.flip_mode != FlipMode::None {
            warn!("({name}) flipping is disabled, ignoring flip_mode");
            self.flip_mode = FlipMode::None;
        }
    }
}

/// A quantized image waiting to be placed
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedImage {
    pub depth: PixelDepth,
    /// Size of the stored pixels (without margins)
    pub width: usize,
    pub height: usize,
    /// Palette indices, or 15-bit colours for direct colour images
    pub pixels: Vec<u16>,
    /// 15-bit palette, 16 or 256 entries (empty for direct colour)
    pub palette: Vec<u16>,
    /// Trimmed borders: left, top, right, bottom
    pub margin: [usize; 4],
    pub padding: usize,
    pub flip_modes: &'static [bool],
    /// Interlace field (0 = even rows, 1 = odd rows)
    pub field: Option<u8>,
}

impl ConvertedImage {
    pub fn full_width(&self) -> usize {
        self.margin[0] + self.width + self.margin[2]
    }

    pub fn full_height(&self) -> usize {
        self.margin[1] + self.height + self.margin[3]
    }

    pub fn has_margin(&self) -> bool {
        self.full_width() > self.width || self.full_height() > self.height
    }

    /// Size in VRAM words and rows, padding included
    pub fn packed_size(&self, flip: bool) -> (usize, usize) {
        let scale = self.depth.scale();
        let padded_w = self.width + self.padding * 2;
        let padded_h = self.height + self.padding * 2;

        if flip {
            (padded_h.div_ceil(scale), padded_w)
        } else {
            (padded_w.div_ceil(scale), padded_h)
        }
    }

    /// Widest packed size over the allowed orientations
    pub fn packed_max_width(&self) -> usize {
        self.flip_modes
            .iter()
            .map(|&flip| self.packed_size(flip).0)
            .max()
            .unwrap_or_else(|| self.packed_size(false).0)
    }

    /// Sort key favouring large, elongated images
    pub fn pathological(&self) -> f64 {
        let (w, h) = (self.width as f64, self.height as f64);
        (w * h) * w.max(h) / w.min(h).max(1.0)
    }

    /// Hash of everything that affects the packed bytes
    pub fn content_hash(&self) -> u64 {
        let mut hasher = Xxh3::new();
        hasher.update(&[self.depth.bpp()]);
        hasher.update(&(self.width as u32).to_le_bytes());
        hasher.update(&(self.height as u32).to_le_bytes());
        hasher.update(&(self.padding as u32).to_le_bytes());
        for &flip in self.flip_modes {
            hasher.update(&[flip as u8]);
        }
        for pixel in &self.pixels {
            hasher.update(&pixel.to_le_bytes());
        }
        hasher.digest()
    }

    /// Palette hash used to share palette slots
    ///
    /// Unless `preserve` is set the low bit of each channel is ignored, so
    /// near-identical palettes share a slot.
    pub fn palette_hash(&self, preserve: bool) -> u64 {
        let mask = if preserve { 0xffff } else { 0xfbde };
        let mut hasher = Xxh3::new();
        for color in &self.palette {
            hasher.update(&(color & mask).to_le_bytes());
        }
        hasher.digest()
    }

    fn pixel(&self, x: usize, y: usize) -> u16 {
        self.pixels[y * self.width + x]
    }

    fn is_transparent(&self, value: u16) -> bool {
        match self.depth {
            PixelDepth::Sixteen => value == 0,
            _ => self.palette.get(value as usize).is_none_or(|&color| color == 0),
        }
    }

    /// Rows of packed VRAM bytes, left padding included
    ///
    /// Flipped images are rotated a quarter turn counter-clockwise.
    pub fn packed_rows(&self, flip: bool) -> Vec<Vec<u8>> {
        let (w, h) = if flip {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        };

        (0..h)
            .map(|row| {
                let texels = std::iter::repeat_n(0u16, self.padding).chain((0..w).map(|col| {
                    if flip {
                        self.pixel(self.width - 1 - row, col)
                    } else {
                        self.pixel(col, row)
                    }
                }));
                encode_row(self.depth, texels)
            })
            .collect()
    }

    /// Palette as little-endian bytes
    pub fn palette_bytes(&self) -> Vec<u8> {
        self.palette.iter().flat_map(|c| c.to_le_bytes()).collect()
    }

    /// One interlace field (every other row starting at `field`)
    pub fn interlaced_field(&self, field: u8) -> Option<ConvertedImage> {
        let rows: Vec<usize> = (field as usize..self.height).step_by(2).collect();
        if rows.is_empty() {
            return None;
        }

        let pixels = rows
            .iter()
            .flat_map(|&y| self.pixels[y * self.width..(y + 1) * self.width].iter().copied())
            .collect();

        Some(ConvertedImage {
            height: rows.len(),
            pixels,
            margin: [self.margin[0], self.margin[1], 0, 0],
            field: Some(field),
            ..self.clone()
        })
    }

    /// Frame descriptor flags
    pub fn flags(&self, flip: bool) -> u32 {
        let mut flags = self.depth.flag();
        match self.field {
            Some(0) => flags |= frame_flags::FIELD_EVEN,
            Some(_) => flags |= frame_flags::FIELD_ODD,
            None => {}
        }
        if self.has_margin() {
            flags |= frame_flags::MARGIN;
        }
        if flip {
            flags |= frame_flags::FLIP;
        }
        flags
    }

    /// Frame descriptor for this image at its placed slot
    pub fn descriptor(&self, slot: &ImageSlot) -> Result<FrameDescriptor, FormatError> {
        let image_x = slot.x * self.depth.scale() + self.padding;
        let image_y = slot.y + self.padding;
        FormatError::check("image x", image_x, u8::MAX as usize)?;
        FormatError::check("image y", image_y, u8::MAX as usize)?;
        FormatError::check("image page", slot.page, u16::MAX as usize)?;
        FormatError::check("left margin", self.margin[0], u8::MAX as usize)?;
        FormatError::check("top margin", self.margin[1], u8::MAX as usize)?;
        FormatError::check("image width", self.width, u8::MAX as usize)?;
        FormatError::check("image height", self.height, u8::MAX as usize)?;

        let (palette_page, palette_offset) = match slot.palette {
            Some(palette) => {
                FormatError::check("palette page", palette.page, u16::MAX as usize)?;
                (palette.page as u16, palette.offset)
            }
            None => (0, 0),
        };

        Ok(FrameDescriptor {
            image_page: slot.page as u16,
            palette_page,
            x: image_x as u8,
            y: image_y as u8,
            margin_left: self.margin[0] as u8,
            margin_top: self.margin[1] as u8,
            width: self.width as u8,
            height: self.height as u8,
            palette_offset,
            flags: self.flags(slot.flip),
        })
    }

    /// Trim transparent borders, recording them as margins if `keep`
    ///
    /// A fully transparent image keeps its top-left pixel.
    fn trim(&mut self, keep: bool) {
        let opaque = |x: usize, y: usize| !self.is_transparent(self.pixel(x, y));

        let rows: Vec<usize> = (0..self.height)
            .filter(|&y| (0..self.width).any(|x| opaque(x, y)))
            .collect();
        let cols: Vec<usize> = (0..self.width)
            .filter(|&x| (0..self.height).any(|y| opaque(x, y)))
            .collect();

        let bounds = (rows.first(), rows.last(), cols.first(), cols.last());
        let (left, top, right, bottom) = match bounds {
            (Some(&top), Some(&bottom), Some(&left), Some(&right)) => (left, top, right, bottom),
            _ => (0, 0, 0, 0),
        };

        let width = right - left + 1;
        let height = bottom - top + 1;
        let pixels = (top..=bottom)
            .flat_map(|y| (left..=right).map(move |x| (x, y)))
            .map(|(x, y)| self.pixel(x, y))
            .collect();

        self.margin = if keep {
            [left, top, self.width - 1 - right, self.height - 1 - bottom]
        } else {
            [0; 4]
        };
        self.pixels = pixels;
        self.width = width;
        self.height = height;
    }
}

fn encode_row(depth: PixelDepth, texels: impl Iterator<Item = u16>) -> Vec<u8> {
    match depth {
        PixelDepth::Four => {
            let mut values: Vec<u8> = texels.map(|t| (t & 0xf) as u8).collect();
            values.resize(values.len().next_multiple_of(4), 0);
            values.chunks_exact(2).map(|pair| pair[0] | (pair[1] << 4)).collect()
        }
        PixelDepth::Eight => {
            let mut values: Vec<u8> = texels.map(|t| t as u8).collect();
            values.resize(values.len().next_multiple_of(2), 0);
            values
        }
        PixelDepth::Sixteen => texels.flat_map(|t| t.to_le_bytes()).collect(),
    }
}

fn crop_source(image: &RgbaImage, crop: Option<[u32; 4]>) -> RgbaImage {
    match crop {
        Some([x, y, w, h]) => {
            let x = x.min(image.width());
            let y = y.min(image.height());
            let w = w.min(image.width() - x);
            let h = h.min(image.height() - y);
            imageops::crop_imm(image, x, y, w, h).to_image()
        }
        None => image.clone(),
    }
}

fn rescale(image: &RgbaImage, scale: f32) -> RgbaImage {
    if scale == 1.0 {
        return image.clone();
    }
    let width = ((image.width() as f32 * scale) as u32).max(1);
    let height = ((image.height() as f32 * scale) as u32).max(1);
    imageops::resize(image, width, height, imageops::FilterType::Lanczos3)
}

fn to_rgb15(image: &RgbaImage, options: &ImageOptions) -> Vec<u16> {
    let black = pack_black_value(options.black_value);
    image
        .pixels()
        .map(|p| pack_rgb15(p.0, options.alpha_range, black))
        .collect()
}

/// Quantize, pad the palette to the full size and sort it by colour
///
/// Sorting makes identical images produce identical index data, which the
/// packer relies on for deduplication.
fn quantize_indexed(
    image: &RgbaImage,
    options: &ImageOptions,
    quantizer: &dyn Quantizer,
) -> Result<(Vec<u16>, Vec<u16>), QuantizeError> {
    let max_colors = options.depth.palette_len();
    let fixed = options.palette.palette();

    let request = QuantizeRequest {
        pixels: image.as_raw(),
        width: image.width() as usize,
        height: image.height() as usize,
        max_colors,
        fixed_palette: fixed.as_deref(),
        channel_bits: CHANNEL_BITS,
        dither: options.dither,
    };
    let result = quantizer.quantize(&request)?;

    if result.palette.len() > max_colors {
        return Err(QuantizeError::TooManyColors {
            colors: result.palette.len(),
            max: max_colors,
        });
    }
    if result.indices.len() != request.pixel_count() {
        return Err(QuantizeError::SizeMismatch {
            expected: request.pixel_count(),
            actual: result.indices.len(),
        });
    }

    let used = result.palette.len();
    let black = pack_black_value(options.black_value);
    let mut packed: Vec<u16> = result
        .palette
        .iter()
        .map(|&color| pack_rgb15(color, options.alpha_range, black))
        .collect();
    packed.resize(max_colors, 0);

    // Sort by the stored value so equal palettes hash and pack the same
    let mut order: Vec<usize> = (0..max_colors).collect();
    order.sort_by_key(|&i| packed[i]);

    let mut remap = vec![0u16; max_colors];
    for (new, &old) in order.iter().enumerate() {
        remap[old] = new as u16;
    }

    let mut pixels = Vec::with_capacity(result.indices.len());
    for &index in &result.indices {
        if index as usize >= used {
            return Err(QuantizeError::TooManyColors {
                colors: index as usize + 1,
                max: used,
            });
        }
        pixels.push(remap[index as usize]);
    }

    let palette = order.iter().map(|&i| packed[i]).collect();

    Ok((pixels, palette))
}

/// Convert an image into one [`ConvertedImage`] per mip level
pub fn convert_image(
    name: &str,
    image: &RgbaImage,
    options: &ImageOptions,
    quantizer: &dyn Quantizer,
) -> Result<Vec<ConvertedImage>, ExportError> {
    let source = crop_source(image, options.crop);
    if source.width() == 0 || source.height() == 0 {
        return Err(ExportError::InvalidProperty {
            name: name.to_string(),
            reason: "crop rectangle is empty".to_string(),
        });
    }

    let mut scale = options.scale;
    let mut levels = Vec::with_capacity(options.mip_levels);

    for level in 0..options.mip_levels.max(1) {
        let scaled = rescale(&source, scale);

        let (pixels, palette) = match options.depth {
            PixelDepth::Sixteen => (to_rgb15(&scaled, options), Vec::new()),
            _ => quantize_indexed(&scaled, options, quantizer)?,
        };

        let mut converted = ConvertedImage {
            depth: options.depth,
            width: scaled.width() as usize,
            height: scaled.height() as usize,
            pixels,
            palette,
            margin: [0; 4],
            padding: options.padding,
            flip_modes: options.flip_mode.orientations(),
            field: None,
        };

        match options.crop_mode {
            CropMode::None => {}
            CropMode::PreserveMargin => converted.trim(true),
            CropMode::RemoveMargin => converted.trim(false),
        }

        check_texture_size(name, &converted)?;
        debug!(
            "({name}) mip {level}: {}x{} at {}bpp, margins {:?}",
            converted.width,
            converted.height,
            converted.depth.bpp(),
            converted.margin
        );

        levels.push(converted);
        scale *= options.mip_scale;
    }

    Ok(levels)
}

fn check_texture_size(name: &str, image: &ConvertedImage) -> Result<(), ExportError> {
    if image.width > MAX_TEXTURE_SIZE || image.height > MAX_TEXTURE_SIZE {
        return Err(ExportError::TextureTooLarge {
            name: name.to_string(),
            width: image.width,
            height: image.height,
        });
    }

    // the packer never lets an image cross its texture page span
    let limit = image.depth.max_page_span() * PAGE_WIDTH;
    let fits = |flip: bool| {
        let (w, h) = image.packed_size(flip);
        w <= limit && h <= PAGE_HEIGHT
    };
    if !image.flip_modes.iter().any(|&flip| fits(flip)) {
        let (width, height) = image.packed_size(image.flip_modes.first().copied().unwrap_or(false));
        return Err(ExportError::TextureExceedsPage {
            name: name.to_string(),
            bpp: image.depth.bpp(),
            width,
            height,
            limit,
        });
    }

    let (full_w, full_h) = (image.full_width(), image.full_height());
    if image.margin.iter().any(|&m| m > MAX_TEXTURE_SIZE)
        || full_w > MAX_MARGIN_SIZE
        || full_h > MAX_MARGIN_SIZE
    {
        return Err(ExportError::MarginTooLarge {
            name: name.to_string(),
            width: full_w,
            height: full_h,
        });
    }
    Ok(())
}

/// A direct colour background stored in main RAM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedBackground {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u16>,
}

impl ConvertedBackground {
    /// Entry payload: header, then pixels (even rows first if interlaced)
    pub fn payload(&self, position: [u16; 2], interlaced: bool) -> Vec<u8> {
        let header = fudge_common::BackgroundHeader::new(
            position[0],
            position[1],
            self.width as u16,
            self.height as u16,
        );

        let rows: Vec<usize> = if interlaced {
            (0..self.height).step_by(2).chain((1..self.height).step_by(2)).collect()
        } else {
            (0..self.height).collect()
        };

        let mut data =
            Vec::with_capacity(fudge_common::BackgroundHeader::SIZE + self.pixels.len() * 2);
        data.extend_from_slice(&header.to_bytes());
        for y in rows {
            for pixel in &self.pixels[y * self.width..(y + 1) * self.width] {
                data.extend_from_slice(&pixel.to_le_bytes());
            }
        }
        data
    }
}

/// Convert a background image to 15-bit colour
pub fn convert_background(
    name: &str,
    image: &RgbaImage,
    options: &ImageOptions,
) -> Result<ConvertedBackground, ExportError> {
    let scaled = rescale(&crop_source(image, options.crop), options.scale);
    let (width, height) = (scaled.width() as usize, scaled.height() as usize);

    if width == 0 || height == 0 || width > u16::MAX as usize || height > u16::MAX as usize {
        return Err(ExportError::BackgroundTooLarge {
            name: name.to_string(),
            width,
            height,
        });
    }

    Ok(ConvertedBackground {
        width,
        height,
        pixels: to_rgb15(&scaled, options),
    })
}
