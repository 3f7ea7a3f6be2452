//! Manifest -> bundle orchestration
//!
//! Entries are converted in parallel, then fed to the [`BundleBuilder`] in
//! manifest order so the output is deterministic.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::audio::{ConvertedSound, convert_sound, load_wav};
use crate::bundle::{Bundle, BundleBuilder};
use crate::manifest::{
    EntryKind, EntrySpec, PackerSection, Properties, load_manifest, parse_properties, validate,
};
use crate::quantize::{ExactQuantizer, ImageQuantizer, Quantizer};
use crate::string_table::{StringEncoding, StringEntries, parse_key_value};
use crate::texture::{ConvertedBackground, ConvertedImage, convert_background, convert_image};

/// An entry after conversion, ready to be added to the bundle
#[derive(Debug, Clone)]
pub enum ConvertedEntry {
    Raw { type_id: u16, data: Vec<u8> },
    Executable(Vec<u8>),
    Texture {
        frames: Vec<Vec<ConvertedImage>>,
        interlaced: bool,
    },
    Background {
        background: ConvertedBackground,
        position: [u16; 2],
        interlaced: bool,
    },
    Sound(ConvertedSound),
    Strings {
        entries: StringEntries,
        encoding: StringEncoding,
        align: usize,
    },
}

pub(crate) fn load_image(path: &Path) -> Result<image::RgbaImage> {
    let image = image::open(path)
        .with_context(|| format!("Failed to load image: {}", path.display()))?;
    Ok(image.to_rgba8())
}

/// Convert a single manifest entry
pub fn convert_entry(
    spec: &EntrySpec,
    packer: &PackerSection,
    quantizer: &dyn Quantizer,
) -> Result<ConvertedEntry> {
    let name = spec.name.as_str();
    let props = &spec.properties;

    let converted = match spec.kind {
        EntryKind::File | EntryKind::Custom(_) => {
            let path = spec.single_source()?;
            let data = std::fs::read(path)
                .with_context(|| format!("Failed to read: {}", path.display()))?;
            ConvertedEntry::Raw {
                type_id: spec.kind.type_id(),
                data,
            }
        }

        EntryKind::Executable => {
            let path = spec.single_source()?;
            let data = std::fs::read(path)
                .with_context(|| format!("Failed to read: {}", path.display()))?;
            ConvertedEntry::Executable(data)
        }

        EntryKind::Texture { interlaced } => {
            let mut options = props.image_options(name)?;
            options.restrict(name, packer.allow_margins, packer.allow_flip);

            if spec.sources.is_empty() {
                bail!("({name}) No source path ('from') given");
            }
            let frames = spec
                .sources
                .iter()
                .map(|path| {
                    let image = load_image(path)?;
                    convert_image(name, &image, &options, quantizer)
                        .with_context(|| format!("({name}) Failed to convert {}", path.display()))
                })
                .collect::<Result<Vec<_>>>()?;

            ConvertedEntry::Texture { frames, interlaced }
        }

        EntryKind::Background { interlaced } => {
            if props.bpp != 16 {
                warn!("({name}) backgrounds are always 16bpp, ignoring bpp = {}", props.bpp);
            }
            let options = Properties {
                bpp: 16,
                ..props.clone()
            }
            .image_options(name)?;

            let path = spec.single_source()?;
            let image = load_image(path)?;
            let background = convert_background(name, &image, &options)?;
            ConvertedEntry::Background {
                background,
                position: props.position,
                interlaced,
            }
        }

        EntryKind::Sound => {
            let path = spec.single_source()?;
            let pcm = load_wav(path)?;
            let sound = convert_sound(name, pcm, &props.sound_options())
                .with_context(|| format!("({name}) Failed to convert {}", path.display()))?;
            ConvertedEntry::Sound(sound)
        }

        EntryKind::StringTable => {
            let mut entries = StringEntries::new();
            for path in &spec.sources {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read string file: {}", path.display()))?;
                let pairs =
                    parse_key_value(&text).with_context(|| format!("In {}", path.display()))?;
                entries.extend(pairs);
            }
            entries.extend(props.inline_strings());

            ConvertedEntry::Strings {
                entries,
                encoding: props.encoding,
                align: props.align,
            }
        }
    };

    Ok(converted)
}

/// Add a converted entry to the builder
pub fn add_entry(builder: &mut BundleBuilder, name: &str, entry: ConvertedEntry) -> Result<()> {
    match entry {
        ConvertedEntry::Raw { type_id, data } => builder.add_entry(name, type_id, &data)?,
        ConvertedEntry::Executable(data) => builder.add_executable(name, &data)?,
        ConvertedEntry::Texture { frames, interlaced } => {
            builder.add_texture(name, frames, interlaced)?
        }
        ConvertedEntry::Background {
            background,
            position,
            interlaced,
        } => builder.add_background(name, &background, position, interlaced)?,
        ConvertedEntry::Sound(sound) => builder.add_sound(name, &sound)?,
        ConvertedEntry::Strings {
            entries,
            encoding,
            align,
        } => builder.add_string_table(name, &entries, encoding, align)?,
    }
    Ok(())
}

/// Convert every entry and assemble the bundle in memory
pub fn build_bundle(
    specs: &[EntrySpec],
    packer: &PackerSection,
    quantizer: &dyn Quantizer,
) -> Result<Bundle> {
    info!("Converting {} entries", specs.len());

    let converted: Result<Vec<_>> = specs
        .par_iter()
        .map(|spec| {
            convert_entry(spec, packer, quantizer)
                .with_context(|| format!("Failed to convert entry '{}'", spec.name))
        })
        .collect();
    let converted = converted?;

    let mut builder = BundleBuilder::new();
    for (spec, entry) in specs.iter().zip(converted) {
        add_entry(&mut builder, &spec.name, entry)
            .with_context(|| format!("Failed to add entry '{}'", spec.name))?;
    }

    let bundle = builder.build(&packer.pack_options())?;
    Ok(bundle)
}

/// Options of the `bundle` command
#[derive(Debug, Clone, Default)]
pub struct BundleOptions {
    /// Output path, overrides the manifest
    pub output: Option<PathBuf>,
    /// Directory for atlas debug images
    pub atlas_debug: Option<PathBuf>,
    /// `key=value` defaults added to `[defaults]`
    pub defaults: Vec<String>,
    /// `key=value` properties forced on every entry
    pub forced: Vec<String>,
    /// Keep source colours instead of generating palettes with libimagequant
    pub exact_colors: bool,
}

/// Load a manifest, build the bundle and write it
///
/// Returns the output path. Nothing is written unless assembly succeeded.
pub fn run_bundle(manifest_path: &Path, options: &BundleOptions) -> Result<PathBuf> {
    let mut manifest = load_manifest(manifest_path)?;
    manifest.set_defaults(parse_properties(&options.defaults)?);
    let forced = parse_properties(&options.forced)?;

    let output = options
        .output
        .clone()
        .or_else(|| manifest.bundle.output.as_ref().map(|path| manifest.root.join(path)))
        .unwrap_or_else(|| manifest_path.with_extension("bnd"));

    let specs = validate(&manifest, &forced)?;
    let image_quantizer = ImageQuantizer::default();
    let quantizer: &dyn Quantizer = if options.exact_colors {
        &ExactQuantizer
    } else {
        &image_quantizer
    };
    let bundle = build_bundle(&specs, &manifest.packer, quantizer)?;

    if let Some(dir) = &options.atlas_debug {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        for (index, atlas) in bundle.vram.atlases.iter().enumerate() {
            atlas.write_debug_png(&dir.join(format!("{index:02}_{}.png", atlas.width)))?;
        }
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    std::fs::write(&output, &bundle.bytes)
        .with_context(|| format!("Failed to write bundle: {}", output.display()))?;

    info!("Wrote {} ({} bytes)", output.display(), bundle.bytes.len());
    Ok(output)
}
