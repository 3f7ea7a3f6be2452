//! TIM export (`tim` command)
//!
//! Converts standalone images into TIM files for loaders that upload their
//! own textures. Image properties are the same as for bundle textures;
//! `position` and `palette_position` set the VRAM coordinates stored in the
//! file. Margins, flipping, padding and mip levels have no TIM equivalent
//! and are dropped.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use fudge_common::{FormatError, TimHeader, TimSection};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::ExportError;
use crate::manifest::{Properties, parse_properties};
use crate::pack::load_image;
use crate::quantize::{ExactQuantizer, ImageQuantizer, Quantizer};
use crate::texture::{ConvertedImage, convert_image};

/// Placeholder replaced by the input file stem in output paths
pub const NAME_PLACEHOLDER: &str = "{name}";

/// Serialize a converted image as a TIM file
pub fn build_tim(
    name: &str,
    image: &ConvertedImage,
    position: [u16; 2],
    palette_position: [u16; 2],
) -> Result<Vec<u8>, ExportError> {
    let image = ConvertedImage {
        padding: 0,
        ..image.clone()
    };
    let (width, height) = image.packed_size(false);
    FormatError::check("TIM image width", width, u16::MAX as usize)?;
    FormatError::check("TIM image height", height, u16::MAX as usize)?;

    let header = TimHeader::new(image.depth);
    let mut data = header.to_bytes().to_vec();

    if header.has_clut() {
        if palette_position[0] % 16 != 0 {
            warn!("({name}) palette X offset {} is not aligned to 16 pixels", palette_position[0]);
        }
        let palette = image.palette_bytes();
        let clut = TimSection::new(
            palette_position[0],
            palette_position[1],
            image.palette.len() as u16,
            1,
        );
        data.extend_from_slice(&clut.to_bytes());
        data.extend_from_slice(&palette);
    }

    let section = TimSection::new(position[0], position[1], width as u16, height as u16);
    data.extend_from_slice(&section.to_bytes());
    for mut row in image.packed_rows(false) {
        row.resize(width * 2, 0);
        data.extend_from_slice(&row);
    }

    Ok(data)
}

/// Convert one image into TIM file contents
pub fn convert_tim(
    name: &str,
    source: &image::RgbaImage,
    properties: &Properties,
    quantizer: &dyn Quantizer,
) -> Result<Vec<u8>> {
    let mut options = properties.image_options(name)?;
    options.restrict(name, false, false);
    options.padding = 0;
    if options.mip_levels > 1 {
        warn!(
            "({name}) TIM files hold a single image, ignoring mip_levels = {}",
            options.mip_levels
        );
        options.mip_levels = 1;
    }

    let levels = convert_image(name, source, &options, quantizer)?;
    let Some(image) = levels.first() else {
        bail!("({name}) Image conversion produced nothing");
    };
    Ok(build_tim(name, image, properties.position, properties.palette_position)?)
}

/// Options of the `tim` command
#[derive(Debug, Clone, Default)]
pub struct TimOptions {
    /// Output path, may contain `{name}`; defaults to the input with a .tim extension
    pub output: Option<String>,
    /// `key=value` image properties
    pub properties: Vec<String>,
    pub exact_colors: bool,
}

/// Output path of `input` for an optional path template
pub fn output_path(input: &Path, template: Option<&str>) -> PathBuf {
    match template {
        Some(template) => {
            let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("image");
            PathBuf::from(template.replace(NAME_PLACEHOLDER, stem))
        }
        None => input.with_extension("tim"),
    }
}

/// Convert every input and write one TIM file each
///
/// Returns the written paths, in input order.
pub fn run_tim(inputs: &[PathBuf], options: &TimOptions) -> Result<Vec<PathBuf>> {
    if inputs.len() > 1
        && options
            .output
            .as_deref()
            .is_some_and(|template| !template.contains(NAME_PLACEHOLDER))
    {
        bail!("More than one image to convert, the output path needs a {NAME_PLACEHOLDER}");
    }

    let table = parse_properties(&options.properties)?;
    let properties =
        Properties::deserialize(toml::Value::Table(table)).context("Invalid image properties")?;

    let image_quantizer = ImageQuantizer::default();
    let quantizer: &dyn Quantizer = if options.exact_colors {
        &ExactQuantizer
    } else {
        &image_quantizer
    };

    let mut written = Vec::with_capacity(inputs.len());
    for input in inputs {
        let name = input.file_stem().and_then(|s| s.to_str()).unwrap_or("image");
        let source = load_image(input)?;
        let data = convert_tim(name, &source, &properties, quantizer)
            .with_context(|| format!("({name}) Failed to convert {}", input.display()))?;

        let output = output_path(input, options.output.as_deref());
        std::fs::write(&output, &data)
            .with_context(|| format!("Failed to write TIM file: {}", output.display()))?;
        info!("Wrote {} ({} bytes)", output.display(), data.len());
        written.push(output);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fudge_common::{PixelDepth, read_tim};
    use image::Rgba;

    fn two_colors(width: u32, height: u32) -> image::RgbaImage {
        image::RgbaImage::from_fn(width, height, |x, _| {
            if x % 2 == 0 {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([255, 0, 0, 255])
            }
        })
    }

    #[test]
    fn test_4bpp_tim_layout() {
        let properties = Properties {
            position: [640, 0],
            palette_position: [0, 480],
            ..Properties::default()
        };
        let data = convert_tim("font", &two_colors(6, 2), &properties, &ExactQuantizer).unwrap();

        let (header, clut, (image, pixels)) = read_tim(&data).unwrap();
        assert_eq!(header.flags, 0x08);

        let (clut, colors) = clut.unwrap();
        assert_eq!((clut.x, clut.y, clut.width, clut.height), (0, 480, 16, 1));
        assert_eq!(colors.len(), 32);
        // white sorts after red
        assert_eq!(&colors[28..32], &[0x1f, 0x00, 0xff, 0x7f]);

        // 6 pixels -> 2 words per row
        assert_eq!((image.x, image.y, image.width, image.height), (640, 0, 2, 2));
        assert_eq!(pixels.len(), 8);
        // white (15), red (14) packed low nibble first
        assert_eq!(pixels[0], 0xef);
        assert_eq!(data.len(), TimHeader::SIZE + clut.length as usize + image.length as usize);
    }

    #[test]
    fn test_16bpp_has_no_clut() {
        let properties = Properties {
            bpp: 16,
            ..Properties::default()
        };
        let data = convert_tim("bg", &two_colors(3, 1), &properties, &ExactQuantizer).unwrap();

        let (header, clut, (image, pixels)) = read_tim(&data).unwrap();
        assert_eq!(header.flags, 0x02);
        assert!(clut.is_none());
        assert_eq!((image.width, image.height), (3, 1));
        assert_eq!(pixels, &[0xff, 0x7f, 0x1f, 0x00, 0xff, 0x7f]);
    }

    #[test]
    fn test_padding_and_mips_dropped() {
        let properties = Properties {
            bpp: 8,
            padding: 4,
            mip_levels: 3,
            ..Properties::default()
        };
        let data = convert_tim("sprite", &two_colors(8, 8), &properties, &ExactQuantizer).unwrap();
        let (_, clut, (image, _)) = read_tim(&data).unwrap();
        assert_eq!(clut.unwrap().0.width, 256);
        assert_eq!((image.width, image.height), (4, 8));
    }

    #[test]
    fn test_build_pads_short_rows() {
        let image = ConvertedImage {
            depth: PixelDepth::Four,
            width: 5,
            height: 1,
            pixels: vec![1; 5],
            palette: vec![0; 16],
            margin: [0; 4],
            padding: 2,
            flip_modes: &[false],
            field: None,
        };
        let data = build_tim("x", &image, [0, 0], [16, 0]).unwrap();
        let (_, _, (section, pixels)) = read_tim(&data).unwrap();
        assert_eq!(section.width, 2);
        assert_eq!(pixels, &[0x11, 0x11, 0x01, 0x00]);
    }

    #[test]
    fn test_output_path() {
        assert_eq!(output_path(Path::new("art/logo.png"), None), PathBuf::from("art/logo.tim"));
        assert_eq!(
            output_path(Path::new("art/logo.png"), Some("out/{name}.tim")),
            PathBuf::from("out/logo.tim")
        );
    }

    #[test]
    fn test_run_tim_requires_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = [dir.path().join("a.png"), dir.path().join("b.png")];
        let options = TimOptions {
            output: Some(dir.path().join("out.tim").display().to_string()),
            ..TimOptions::default()
        };
        assert!(run_tim(&inputs, &options).is_err());
    }

    #[test]
    fn test_run_tim_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("icon.png");
        two_colors(16, 16).save(&input).unwrap();

        let options = TimOptions {
            properties: vec!["bpp=8".to_string(), "position=[320, 256]".to_string()],
            ..TimOptions::default()
        };
        let written = run_tim(std::slice::from_ref(&input), &options).unwrap();
        assert_eq!(written, vec![dir.path().join("icon.tim")]);

        let data = std::fs::read(&written[0]).unwrap();
        let (header, _, (image, _)) = read_tim(&data).unwrap();
        assert_eq!(header.flags, 0x09);
        assert_eq!((image.x, image.y, image.width, image.height), (320, 256, 8, 16));
    }
}
