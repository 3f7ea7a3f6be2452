//! fudge.toml manifest parsing
//!
//! ```toml
//! [bundle]
//! output = "build/data.bnd"
//!
//! [packer]
//! discard_step = 4
//! allow_margins = true
//!
//! [defaults]
//! bpp = 8
//!
//! [[entries]]
//! name = "player"
//! type = "texture"
//! from = ["player_0.png", "player_1.png"]
//! crop_mode = "preserveMargin"
//! ```
//!
//! Entry properties are resolved from three layers: forced properties (CLI
//! `--force`), then the entry itself, then `[defaults]` (plus CLI `--set`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use fudge_common::{PixelDepth, entry_type, hash_str};
use hashbrown::HashMap;
use serde::Deserialize;

use crate::atlas::PackOptions;
use crate::audio::SoundOptions;
use crate::error::ExportError;
use crate::quantize::PaletteMode;
use crate::string_table::StringEncoding;
use crate::texture::{CropMode, FlipMode, ImageOptions};

/// Default manifest file name
pub const DEFAULT_MANIFEST: &str = "fudge.toml";

/// Root manifest structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub bundle: BundleSection,
    #[serde(default)]
    pub packer: PackerSection,
    #[serde(default)]
    pub defaults: toml::Table,
    #[serde(default)]
    pub entries: Vec<toml::Table>,
    /// Directory entry paths are relative to
    #[serde(skip)]
    pub root: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BundleSection {
    pub output: Option<PathBuf>,
}

/// Packer settings and target loader capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PackerSection {
    pub discard_step: usize,
    pub try_splits: bool,
    pub preserve_palettes: bool,
    /// The loader understands the margin flag
    pub allow_margins: bool,
    /// The loader understands the flip flag
    pub allow_flip: bool,
}

impl Default for PackerSection {
    fn default() -> Self {
        Self {
            discard_step: 1,
            try_splits: false,
            preserve_palettes: false,
            allow_margins: false,
            allow_flip: false,
        }
    }
}

impl PackerSection {
    pub fn pack_options(&self) -> PackOptions {
        PackOptions {
            discard_step: self.discard_step,
            try_splits: self.try_splits,
            preserve_palettes: self.preserve_palettes,
        }
    }
}

/// What an entry is converted into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Texture { interlaced: bool },
    Background { interlaced: bool },
    Sound,
    StringTable,
    Executable,
    Custom(u16),
}

impl EntryKind {
    /// Parse a `type` value: a type name or a custom id (0x8000-0xffff)
    pub fn parse(value: &toml::Value) -> Result<Self, ExportError> {
        match value {
            toml::Value::Integer(id) => Self::custom(*id),
            toml::Value::String(name) => {
                let name = name.trim().to_lowercase();
                match name.as_str() {
                    "file" => Ok(EntryKind::File),
                    "texture" => Ok(EntryKind::Texture { interlaced: false }),
                    "itexture" => Ok(EntryKind::Texture { interlaced: true }),
                    "bg" => Ok(EntryKind::Background { interlaced: false }),
                    "ibg" => Ok(EntryKind::Background { interlaced: true }),
                    "sound" => Ok(EntryKind::Sound),
                    "stringtable" => Ok(EntryKind::StringTable),
                    "executable" => Ok(EntryKind::Executable),
                    _ => parse_int(&name)
                        .ok_or_else(|| ExportError::UnknownType(name.clone()))
                        .and_then(Self::custom),
                }
            }
            other => Err(ExportError::UnknownType(other.to_string())),
        }
    }

    fn custom(id: i64) -> Result<Self, ExportError> {
        match u16::try_from(id) {
            Ok(id) if id >= entry_type::CUSTOM => Ok(EntryKind::Custom(id)),
            _ => Err(ExportError::ReservedType(id)),
        }
    }

    pub fn type_id(self) -> u16 {
        match self {
            EntryKind::File => entry_type::FILE,
            EntryKind::Texture { interlaced: false } => entry_type::TEXTURE,
            EntryKind::Texture { interlaced: true } => entry_type::INTERLACED_TEXTURE,
            EntryKind::Background { interlaced: false } => entry_type::BACKGROUND,
            EntryKind::Background { interlaced: true } => entry_type::INTERLACED_BACKGROUND,
            EntryKind::Sound => entry_type::SOUND,
            EntryKind::StringTable => entry_type::STRING_TABLE,
            EntryKind::Executable => entry_type::EXECUTABLE,
            EntryKind::Custom(id) => id,
        }
    }
}

fn parse_int(text: &str) -> Option<i64> {
    match text.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Every per-entry property, with its default
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Properties {
    // Images
    pub bpp: u8,
    pub palette: PaletteMode,
    pub dither: f32,
    pub crop: Option<[u32; 4]>,
    pub crop_mode: CropMode,
    pub padding: usize,
    pub flip_mode: FlipMode,
    pub alpha_range: [u8; 2],
    pub black_value: [u8; 4],
    pub mip_levels: usize,
    pub mip_scale: f32,
    pub scale: f32,
    /// Background position, or TIM image position in VRAM
    pub position: [u16; 2],
    /// TIM palette position in VRAM
    pub palette_position: [u16; 2],

    // Sounds
    pub sample_rate: u32,
    pub channels: usize,
    pub loop_offset: f64,

    // String tables
    pub strings: toml::Table,
    pub encoding: StringEncoding,
    pub align: usize,
}

impl Default for Properties {
    fn default() -> Self {
        let image = ImageOptions::default();
        let sound = SoundOptions::default();
        Self {
            bpp: image.depth.bpp(),
            palette: image.palette,
            dither: image.dither,
            crop: image.crop,
            crop_mode: image.crop_mode,
            padding: image.padding,
            flip_mode: image.flip_mode,
            alpha_range: image.alpha_range,
            black_value: image.black_value,
            mip_levels: image.mip_levels,
            mip_scale: image.mip_scale,
            scale: image.scale,
            position: [0, 0],
            palette_position: [0, 0],
            sample_rate: sound.sample_rate,
            channels: sound.channels,
            loop_offset: sound.loop_offset,
            strings: toml::Table::new(),
            encoding: StringEncoding::Ascii,
            align: 4,
        }
    }
}

impl Properties {
    pub fn image_options(&self, name: &str) -> Result<ImageOptions, ExportError> {
        let depth = PixelDepth::from_bpp(self.bpp).ok_or_else(|| ExportError::InvalidDepth {
            name: name.to_string(),
            bpp: self.bpp,
        })?;

        if self.mip_levels == 0 || self.scale <= 0.0 || self.mip_scale <= 0.0 {
            return Err(ExportError::InvalidProperty {
                name: name.to_string(),
                reason: "mip_levels, scale and mip_scale must be positive".to_string(),
            });
        }

        Ok(ImageOptions {
            depth,
            palette: self.palette,
            dither: self.dither,
            crop: self.crop,
            crop_mode: self.crop_mode,
            padding: self.padding,
            flip_mode: self.flip_mode,
            alpha_range: self.alpha_range,
            black_value: self.black_value,
            mip_levels: self.mip_levels,
            mip_scale: self.mip_scale,
            scale: self.scale,
        })
    }

    pub fn sound_options(&self) -> SoundOptions {
        SoundOptions {
            sample_rate: self.sample_rate,
            channels: self.channels,
            loop_offset: self.loop_offset,
        }
    }

    /// Inline strings, non-string values in their TOML form
    pub fn inline_strings(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.strings.iter().map(|(key, value)| {
            let value = match value {
                toml::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
    }
}

/// A fully resolved manifest entry
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySpec {
    pub name: String,
    pub kind: EntryKind,
    /// Source paths, already joined to the manifest directory
    pub sources: Vec<PathBuf>,
    pub properties: Properties,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Sources {
    One(PathBuf),
    Many(Vec<PathBuf>),
}

impl EntrySpec {
    /// Resolve one `[[entries]]` table against defaults and forced properties
    pub fn resolve(
        entry: &toml::Table,
        defaults: &toml::Table,
        forced: &toml::Table,
        root: &Path,
    ) -> Result<Self> {
        let mut merged = defaults.clone();
        merged.extend(entry.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged.extend(forced.iter().map(|(k, v)| (k.clone(), v.clone())));

        let name = match merged.remove("name") {
            Some(toml::Value::String(name)) => name.trim().to_string(),
            Some(other) => bail!("Entry name must be a string, got {other}"),
            None => bail!("Entry has no name"),
        };

        let kind = match merged.remove("type") {
            Some(value) => EntryKind::parse(&value)?,
            None => EntryKind::File,
        };

        let sources = match merged.remove("from") {
            Some(value) => match Sources::deserialize(value) {
                Ok(Sources::One(path)) => vec![path],
                Ok(Sources::Many(paths)) => paths,
                Err(e) => bail!("({name}) 'from' must be a path or a list of paths: {e}"),
            },
            None => Vec::new(),
        };
        let sources = sources.into_iter().map(|path| root.join(path)).collect();

        let properties = Properties::deserialize(toml::Value::Table(merged))
            .with_context(|| format!("({name}) Invalid entry properties"))?;

        Ok(Self {
            name,
            kind,
            sources,
            properties,
        })
    }

    /// First source path, warning when more were given
    pub fn single_source(&self) -> Result<&Path> {
        if self.sources.len() > 1 {
            tracing::warn!("({}) more than one path specified, using only first path", self.name);
        }
        match self.sources.first() {
            Some(path) => Ok(path),
            None => bail!("({}) No source path ('from') given", self.name),
        }
    }

    /// Check that every source exists and the entry has something to read
    pub fn check_sources(&self) -> Result<()> {
        if self.sources.is_empty()
            && !(self.kind == EntryKind::StringTable && !self.properties.strings.is_empty())
        {
            bail!("({}) No source path ('from') given", self.name);
        }
        for path in &self.sources {
            if !path.exists() {
                bail!("({}) Source not found: {}", self.name, path.display());
            }
        }
        Ok(())
    }
}

/// Parse a `key=value` CLI property; values use TOML syntax, bare words are
/// taken as strings
pub fn parse_property(text: &str) -> Result<(String, toml::Value)> {
    let Some((key, value)) = text.split_once('=') else {
        bail!("Expected key=value, got {text:?}");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("Missing property name in {text:?}");
    }

    let value = value.trim();
    let parsed = toml::from_str::<toml::Table>(&format!("v = {value}"))
        .ok()
        .and_then(|mut table| table.remove("v"))
        .unwrap_or_else(|| toml::Value::String(value.to_string()));

    Ok((key.to_string(), parsed))
}

/// Collect CLI properties into a table (later ones win)
pub fn parse_properties(items: &[String]) -> Result<toml::Table> {
    let mut table = toml::Table::new();
    for item in items {
        let (key, value) = parse_property(item)?;
        table.insert(key, value);
    }
    Ok(table)
}

/// Load and parse a manifest file
pub fn load_manifest(path: &Path) -> Result<Manifest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
    let mut manifest: Manifest = toml::from_str(&content)
        .with_context(|| format!("Failed to parse manifest: {}", path.display()))?;
    manifest.root = path.parent().map(Path::to_path_buf).unwrap_or_default();
    Ok(manifest)
}

impl Manifest {
    /// Resolve every entry, in manifest order
    pub fn resolve_entries(&self, forced: &toml::Table) -> Result<Vec<EntrySpec>> {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                EntrySpec::resolve(entry, &self.defaults, forced, &self.root)
                    .with_context(|| format!("Invalid entry #{}", index + 1))
            })
            .collect()
    }

    /// Add CLI defaults on top of `[defaults]`
    pub fn set_defaults(&mut self, defaults: toml::Table) {
        self.defaults.extend(defaults);
    }
}

/// Validate a manifest without converting anything
///
/// Checks entry types, properties, source paths and name uniqueness.
pub fn validate(manifest: &Manifest, forced: &toml::Table) -> Result<Vec<EntrySpec>> {
    let specs = manifest.resolve_entries(forced)?;
    let mut names: HashMap<u32, String> = HashMap::new();

    for spec in &specs {
        if spec.name.is_empty() || !spec.name.is_ascii() {
            return Err(ExportError::InvalidName(spec.name.clone()).into());
        }
        let hash = hash_str(&spec.name);
        if let Some(existing) = names.insert(hash, spec.name.clone()) {
            return Err(ExportError::DuplicateName {
                name: spec.name.clone(),
                existing,
                hash,
            }
            .into());
        }

        spec.check_sources()?;
        if matches!(spec.kind, EntryKind::Texture { .. } | EntryKind::Background { .. }) {
            spec.properties.image_options(&spec.name)?;
        }
    }

    Ok(specs)
}
