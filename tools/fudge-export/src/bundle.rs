//! Bundle assembly
//!
//! [`BundleBuilder`] collects entries in the order they are added. Main RAM
//! payloads and SPU data are appended immediately; texture images are kept
//! aside until [`BundleBuilder::build`] packs them all at once, after which
//! the frame descriptors reserved in each texture payload are filled in and
//! the index is built.
//!
//! # File layout
//! ```text
//! index section:  BundleHeader, HashSlot × (buckets + chained)
//! vram section:   64x256 pages, widest atlas class first
//! spu section:    ADPCM blocks
//! data section:   entry payloads, each aligned to 4 bytes (16 for executables)
//! ```
//! Every section is padded to 2048 bytes.

use fudge_common::{
    BinarySerializable, BundleHeader, DATA_ALIGN, DATA_CAPACITY, EXECUTABLE_ALIGN, FormatError,
    FrameDescriptor, HashSlot, PAGE_SIZE, SPU_CAPACITY, SoundDescriptor, TextureHeader, VRAM_PAGES,
    align_up, build_table, entry_type, hash_str,
};
use hashbrown::HashMap;
use tracing::{debug, info};

use crate::atlas::{PackError, PackOptions, VramLayout, build_vram};
use crate::audio::ConvertedSound;
use crate::error::{ExportError, check_capacity};
use crate::string_table::{StringEncoding, StringEntries, build_string_table};
use crate::texture::{ConvertedBackground, ConvertedImage};

#[derive(Debug, Clone)]
struct PendingEntry {
    name: String,
    hash: u32,
    type_id: u16,
    offset: usize,
    length: usize,
}

/// Frame descriptors waiting for their images to be placed
#[derive(Debug, Clone)]
struct PendingTexture {
    name: String,
    /// Data section offset of the first descriptor
    offset: usize,
    /// Image indices in descriptor order
    images: Vec<usize>,
}

/// In-memory bundle builder
#[derive(Debug, Default)]
pub struct BundleBuilder {
    entries: Vec<PendingEntry>,
    names: HashMap<u32, usize>,
    data: Vec<u8>,
    spu: Vec<u8>,
    images: Vec<ConvertedImage>,
    textures: Vec<PendingTexture>,
}

/// A serialized bundle
#[derive(Debug, Clone)]
pub struct Bundle {
    pub header: BundleHeader,
    pub bytes: Vec<u8>,
    pub vram: VramLayout,
}

impl BundleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries added so far
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check the name and reserve its hash
    fn register(&mut self, name: &str) -> Result<u32, ExportError> {
        if name.is_empty() || !name.is_ascii() {
            return Err(ExportError::InvalidName(name.to_string()));
        }

        let hash = hash_str(name);
        if let Some(&existing) = self.names.get(&hash) {
            return Err(ExportError::DuplicateName {
                name: name.to_string(),
                existing: self.entries[existing].name.clone(),
                hash,
            });
        }
        Ok(hash)
    }

    fn push_entry(
        &mut self,
        name: &str,
        type_id: u16,
        payload: &[u8],
        align: usize,
    ) -> Result<usize, ExportError> {
        let hash = self.register(name)?;

        let offset = align_up(self.data.len(), align);
        check_capacity("main RAM", offset + payload.len(), DATA_CAPACITY)?;

        self.data.resize(offset, 0);
        self.data.extend_from_slice(payload);
        self.data.resize(align_up(self.data.len(), align), 0);

        debug!(
            "({name}) type={:#06x} ({}), offset={offset:#x}, length={}",
            type_id,
            entry_type::name(type_id),
            payload.len()
        );

        self.names.insert(hash, self.entries.len());
        self.entries.push(PendingEntry {
            name: name.to_string(),
            hash,
            type_id,
            offset,
            length: payload.len(),
        });
        Ok(offset)
    }

    /// Add a raw main RAM entry
    pub fn add_entry(
        &mut self,
        name: &str,
        type_id: u16,
        payload: &[u8],
    ) -> Result<(), ExportError> {
        self.push_entry(name, type_id, payload, DATA_ALIGN)?;
        Ok(())
    }

    /// Add executable code, aligned to 16 bytes
    pub fn add_executable(&mut self, name: &str, payload: &[u8]) -> Result<(), ExportError> {
        self.push_entry(name, entry_type::EXECUTABLE, payload, EXECUTABLE_ALIGN)?;
        Ok(())
    }

    /// Add an animated texture
    ///
    /// `frames[frame][mip]` are the converted images. Interlaced textures
    /// store both fields of every image.
    pub fn add_texture(
        &mut self,
        name: &str,
        frames: Vec<Vec<ConvertedImage>>,
        interlaced: bool,
    ) -> Result<(), ExportError> {
        let invalid = |reason: &str| ExportError::InvalidProperty {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let first = frames
            .first()
            .and_then(|levels| levels.first())
            .ok_or_else(|| invalid("texture has no frames"))?;
        let depth = first.depth;
        let mip_levels = frames[0].len();

        if frames
            .iter()
            .any(|levels| levels.len() != mip_levels || levels.iter().any(|i| i.depth != depth))
        {
            return Err(invalid("all frames must share the same depth and mip levels"));
        }

        let field_count: usize = if interlaced { 2 } else { 1 };
        FormatError::check("frame count", frames.len(), u8::MAX as usize)?;
        FormatError::check("mip levels", mip_levels, u8::MAX as usize)?;

        let mut images = Vec::with_capacity(frames.len() * mip_levels * field_count);
        for image in frames.into_iter().flatten() {
            if interlaced {
                for field in 0..2 {
                    let half = image
                        .interlaced_field(field)
                        .ok_or_else(|| invalid("image is too short to interlace"))?;
                    images.push(half);
                }
            } else {
                images.push(image);
            }
        }

        let header = TextureHeader::new(
            (images.len() / mip_levels / field_count) as u8,
            mip_levels as u8,
            field_count as u8,
            depth.bpp(),
        );
        let mut payload = header.serialize();
        payload.resize(TextureHeader::SIZE + images.len() * FrameDescriptor::SIZE, 0);

        let type_id = if interlaced {
            entry_type::INTERLACED_TEXTURE
        } else {
            entry_type::TEXTURE
        };
        let offset = self.push_entry(name, type_id, &payload, DATA_ALIGN)?;

        let first_image = self.images.len();
        self.textures.push(PendingTexture {
            name: name.to_string(),
            offset: offset + TextureHeader::SIZE,
            images: (first_image..first_image + images.len()).collect(),
        });
        self.images.extend(images);
        Ok(())
    }

    /// Add a background image (stored in main RAM)
    pub fn add_background(
        &mut self,
        name: &str,
        background: &ConvertedBackground,
        position: [u16; 2],
        interlaced: bool,
    ) -> Result<(), ExportError> {
        let type_id = if interlaced {
            entry_type::INTERLACED_BACKGROUND
        } else {
            entry_type::BACKGROUND
        };
        self.add_entry(name, type_id, &background.payload(position, interlaced))
    }

    /// Add a sound: the descriptor goes to main RAM, the blocks to SPU RAM
    ///
    /// Stereo channels are stored back to back, left first.
    pub fn add_sound(&mut self, name: &str, sound: &ConvertedSound) -> Result<(), ExportError> {
        if sound.channels.is_empty() || sound.channels.len() > 2 {
            return Err(ExportError::InvalidProperty {
                name: name.to_string(),
                reason: "sounds must be mono or stereo".to_string(),
            });
        }
        let length = sound.length();
        if length == 0 || sound.channels.iter().any(|channel| channel.len() != length) {
            return Err(ExportError::InvalidProperty {
                name: name.to_string(),
                reason: "sound channels must be non-empty and of equal length".to_string(),
            });
        }

        let left = self.spu.len();
        let right = sound.is_stereo().then_some(left + length);
        let end = left + length * sound.channels.len();
        check_capacity("SPU RAM", end, SPU_CAPACITY)?;

        let descriptor = SoundDescriptor::from_byte_offsets(left, right, length, sound.sample_rate)
            .ok_or(ExportError::CapacityExceeded {
                section: "SPU RAM",
                size: end,
                capacity: SPU_CAPACITY,
            })?;

        self.add_entry(name, entry_type::SOUND, &descriptor.serialize())?;
        for channel in &sound.channels {
            self.spu.extend_from_slice(channel);
        }
        Ok(())
    }

    /// Add a string table
    pub fn add_string_table(
        &mut self,
        name: &str,
        entries: &StringEntries,
        encoding: StringEncoding,
        align: usize,
    ) -> Result<(), ExportError> {
        let payload = build_string_table(name, entries, encoding, align)?;
        self.add_entry(name, entry_type::STRING_TABLE, &payload)
    }

    /// Attach the name of the texture owning the failed image
    fn pack_error(&self, source: PackError) -> ExportError {
        let image = source.image();
        match self.textures.iter().find(|texture| texture.images.contains(&image)) {
            Some(texture) => ExportError::Unplaceable {
                name: texture.name.clone(),
                source,
            },
            None => source.into(),
        }
    }

    /// Pack textures, build the index and serialize everything
    pub fn build(mut self, options: &PackOptions) -> Result<Bundle, ExportError> {
        info!("{} entries, {} texture images", self.entries.len(), self.images.len());

        let vram = build_vram(&self.images, options)
            .map_err(|source| self.pack_error(source))?;
        let page_count = vram.page_count();
        if page_count > VRAM_PAGES {
            return Err(ExportError::CapacityExceeded {
                section: "VRAM",
                size: vram.pages.len(),
                capacity: VRAM_PAGES * PAGE_SIZE,
            });
        }

        for texture in &self.textures {
            for (index, &image) in texture.images.iter().enumerate() {
                let descriptor = self.images[image].descriptor(&vram.slots[image])?;
                let start = texture.offset + index * FrameDescriptor::SIZE;
                self.data[start..start + FrameDescriptor::SIZE]
                    .copy_from_slice(&descriptor.to_bytes());
            }
        }

        let table = build_table(self.entries.iter().map(|e| (e.hash, e)))?;
        let slots: Vec<HashSlot> = table
            .slots()
            .iter()
            .map(|slot| match slot.value {
                Some(entry) => HashSlot {
                    hash: slot.hash,
                    offset: entry.offset as u32,
                    length: entry.length as u32,
                    type_id: entry.type_id,
                    chain: slot.chain,
                },
                None => HashSlot::default(),
            })
            .collect();

        debug!(
            "hash table usage: {:.1}% + {} chained",
            100.0 * table.used_buckets() as f64 / table.buckets() as f64,
            table.chained()
        );

        let index_length = BundleHeader::SIZE + slots.len() * HashSlot::SIZE;
        let header = BundleHeader::new(
            [index_length, vram.pages.len(), self.spu.len(), self.data.len()],
            vram.atlas_counts,
            table.buckets(),
            table.chained(),
        )?;

        info!("section sizes:");
        info!("  index:     {:7} bytes", index_length);
        info!(
            "  VRAM data: {:7} bytes ({:4.1}%)",
            header.vram_length,
            100.0 * header.vram_length as f64 / (VRAM_PAGES * PAGE_SIZE) as f64
        );
        info!(
            "  SPU data:  {:7} bytes ({:4.1}%)",
            header.spu_length,
            100.0 * header.spu_length as f64 / SPU_CAPACITY as f64
        );
        info!(
            "  main data: {:7} bytes ({:4.1}%)",
            header.data_length,
            100.0 * header.data_length as f64 / DATA_CAPACITY as f64
        );

        let mut bytes = Vec::with_capacity(header.total_length());
        bytes.extend_from_slice(&header.to_bytes());
        bytes.extend(HashSlot::serialize_all(&slots));
        bytes.resize(header.vram_offset(), 0);
        bytes.extend_from_slice(&vram.pages);
        bytes.resize(header.spu_offset(), 0);
        bytes.extend_from_slice(&self.spu);
        bytes.resize(header.data_offset(), 0);
        bytes.extend_from_slice(&self.data);
        bytes.resize(header.total_length(), 0);

        Ok(Bundle { header, bytes, vram })
    }
}
