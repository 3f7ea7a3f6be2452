//! Texture atlas builder
//!
//! Packs converted images and their palettes into atlases 64, 128, 192 or
//! 256 VRAM words wide and 256 rows tall, then cuts the atlases into 64-word
//! pages. Pages are emitted widest atlas class first, so frame descriptors
//! refer to absolute page indices in that order.
//!
//! Within an atlas, palettes are packed along the bottom rows first (256-entry
//! palettes, then 16-entry ones) and images fill the remaining height using
//! [`packer::pack_images`].

mod packer;


use std::path::Path;

use anyhow::{Context, Result};
use fudge_common::{ATLAS_WIDTHS, PAGE_HEIGHT, PAGE_SIZE, PAGE_WIDTH, PixelDepth, palette_offset};
use hashbrown::HashMap;
use thiserror::Error;
use tracing::info;

pub use packer::{
    Attempt, PackItem, Placement, SearchOptions, SortOrder, attempt_packing, pack_images,
};

use crate::texture::ConvertedImage;

/// Narrowest atlas, one page
pub const ATLAS_MIN_WIDTH: usize = PAGE_WIDTH;

/// Widest atlas, four pages
pub const ATLAS_MAX_WIDTH: usize = 4 * PAGE_WIDTH;

pub const ATLAS_HEIGHT: usize = PAGE_HEIGHT;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PackError {
    #[error(
        "packing failed: no image or palette fits in a new atlas \
         ({images} images, {palettes} palettes left, first is image {first})"
    )]
    EmptyAtlas {
        images: usize,
        palettes: usize,
        /// Lowest pending image index (or palette owner when no image is left)
        first: usize,
    },

    #[error("image {0} was never placed")]
    Unplaced(usize),
}

impl PackError {
    /// Index of the image the error is about
    pub fn image(&self) -> usize {
        match *self {
            PackError::EmptyAtlas { first, .. } => first,
            PackError::Unplaced(index) => index,
        }
    }
}

/// Packer settings from the `[packer]` manifest section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackOptions {
    pub discard_step: usize,
    pub try_splits: bool,
    /// Only share palette slots between exactly equal palettes
    pub preserve_palettes: bool,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            discard_step: 1,
            try_splits: false,
            preserve_palettes: false,
        }
    }
}

impl PackOptions {
    fn search(&self) -> SearchOptions {
        SearchOptions {
            discard_step: self.discard_step,
            try_splits: self.try_splits,
        }
    }
}

/// Palette location, ready for a frame descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaletteSlot {
    /// Absolute page index
    pub page: usize,
    /// Packed position within the page
    pub offset: u16,
}

/// Final location of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSlot {
    /// Absolute index of the page holding the image's left edge
    pub page: usize,
    /// Position within that page, in VRAM words
    pub x: usize,
    pub y: usize,
    pub flip: bool,
    pub palette: Option<PaletteSlot>,
}

/// One packed atlas (raw VRAM words as little-endian bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atlas {
    /// Width in VRAM words
    pub width: usize,
    pub data: Vec<u8>,
}

impl Atlas {
    fn new(width: usize) -> Self {
        Self {
            width,
            data: vec![0; width * 2 * ATLAS_HEIGHT],
        }
    }

    pub fn page_count(&self) -> usize {
        self.width / PAGE_WIDTH
    }

    /// Index into [`ATLAS_WIDTHS`]
    pub fn class(&self) -> usize {
        ATLAS_WIDTHS.len() - self.width / PAGE_WIDTH
    }

    fn stride(&self) -> usize {
        self.width * 2
    }

    /// Copy rows of bytes to word position `(x, y)`, clipping at the edges
    fn blit(&mut self, rows: &[Vec<u8>], x: usize, y: usize) {
        let stride = self.stride();
        for (row_index, row) in rows.iter().enumerate() {
            let dest_y = y + row_index;
            if dest_y >= ATLAS_HEIGHT {
                break;
            }
            let start = dest_y * stride + x * 2;
            let end = (start + row.len()).min((dest_y + 1) * stride);
            if start < end {
                self.data[start..end].copy_from_slice(&row[..end - start]);
            }
        }
    }

    /// The atlas cut into page-sized pieces, left to right
    pub fn pages(&self) -> impl Iterator<Item = Vec<u8>> + '_ {
        let page_stride = PAGE_WIDTH * 2;
        (0..self.page_count()).map(move |page| {
            let mut data = Vec::with_capacity(PAGE_SIZE);
            for row in self.data.chunks_exact(self.stride()) {
                data.extend_from_slice(&row[page * page_stride..(page + 1) * page_stride]);
            }
            data
        })
    }

    /// Greyscale PNG with every nibble expanded to one pixel
    pub fn write_debug_png(&self, path: &Path) -> Result<()> {
        let stride = self.stride();
        let image = image::GrayImage::from_fn((stride * 2) as u32, ATLAS_HEIGHT as u32, |x, y| {
            let byte = self.data[y as usize * stride + x as usize / 2];
            let nibble = if x % 2 == 0 { byte & 0xf } else { byte >> 4 };
            image::Luma([nibble << 4])
        });
        image
            .save(path)
            .with_context(|| format!("Failed to write atlas image: {}", path.display()))
    }
}

/// Result of packing every image of a bundle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VramLayout {
    /// Page data in emission order
    pub pages: Vec<u8>,
    /// Atlases per width class (256, 192, 128, 64 words)
    pub atlas_counts: [usize; 4],
    /// Slot of each input image
    pub slots: Vec<ImageSlot>,
    /// Atlases in the order they were built
    pub atlases: Vec<Atlas>,
}

impl VramLayout {
    pub fn page_count(&self) -> usize {
        self.pages.len() / PAGE_SIZE
    }
}

fn pack_item(image: &ConvertedImage) -> PackItem {
    PackItem {
        hash: image.content_hash(),
        depth: image.depth,
        width: image.width,
        height: image.height,
        orientations: image
            .flip_modes
            .iter()
            .map(|&flip| {
                let (w, h) = image.packed_size(flip);
                (flip, w, h)
            })
            .collect(),
    }
}

/// Width for the next atlas
///
/// 256-entry palettes need a full-width row; otherwise the atlas grows by
/// one page at a time until the widest pending image fits.
fn atlas_width(images: &[&ConvertedImage], palettes: &[&ConvertedImage]) -> usize {
    if palettes.iter().any(|p| p.depth == PixelDepth::Eight) {
        return ATLAS_MAX_WIDTH;
    }

    let widest = images.iter().map(|i| i.packed_max_width()).max().unwrap_or(0);
    let mut width = ATLAS_MIN_WIDTH;
    while width < widest && width < ATLAS_MAX_WIDTH {
        width += ATLAS_MIN_WIDTH;
    }
    width
}

/// Pack palettes along the bottom rows, left to right then upwards
///
/// Returns the palette position of each input (in words) and the number of
/// rows left free above them.
fn pack_palettes(
    palettes: &[&ConvertedImage],
    width: usize,
    preserve: bool,
) -> (Vec<Option<(usize, usize)>>, usize) {
    let mut positions = vec![None; palettes.len()];
    let mut shared: HashMap<u64, (usize, usize)> = HashMap::new();
    let mut px = 0usize;
    let mut py = ATLAS_HEIGHT as isize - 1;

    let mut order: Vec<usize> = (0..palettes.len()).collect();
    order.sort_by_key(|&i| std::cmp::Reverse(palettes[i].depth.bpp()));

    for index in order {
        let palette = palettes[index];
        let entries = palette.depth.palette_len();
        if entries > width {
            continue;
        }

        let hash = palette.palette_hash(preserve);
        if let Some(&position) = shared.get(&hash) {
            positions[index] = Some(position);
            continue;
        }

        let position = (px, py as usize);
        positions[index] = Some(position);
        shared.insert(hash, position);

        px += entries;
        py -= (px / width) as isize;
        px %= width;

        if py < 0 {
            break;
        }
    }

    let free = (py + if px == 0 { 1 } else { 0 }).max(0) as usize;
    (positions, free)
}

/// Pack every image into atlases and cut them into pages
///
/// Images that share packed bytes share a placement and palettes that hash
/// equal share a palette slot. Fails when an atlas would end up empty (some
/// image can never fit).
pub fn build_vram(
    images: &[ConvertedImage],
    options: &PackOptions,
) -> Result<VramLayout, PackError> {
    let items: Vec<PackItem> = images.iter().map(pack_item).collect();

    let mut pending_images: Vec<usize> = (0..images.len()).collect();
    let mut pending_palettes: Vec<usize> = (0..images.len())
        .filter(|&i| images[i].depth != PixelDepth::Sixteen)
        .collect();

    // (atlas, x, y, flip) and (atlas, px, py), atlas-relative
    let mut image_spots: Vec<Option<(usize, Placement)>> = vec![None; images.len()];
    let mut palette_spots: Vec<Option<(usize, usize, usize)>> = vec![None; images.len()];
    let mut atlases: Vec<Atlas> = Vec::new();

    while !pending_images.is_empty() || !pending_palettes.is_empty() {
        let index = atlases.len();
        let image_refs: Vec<&ConvertedImage> = pending_images.iter().map(|&i| &images[i]).collect();
        let palette_refs: Vec<&ConvertedImage> =
            pending_palettes.iter().map(|&i| &images[i]).collect();

        let width = atlas_width(&image_refs, &palette_refs);
        let (palette_positions, free_height) =
            pack_palettes(&palette_refs, width, options.preserve_palettes);

        let subset: Vec<PackItem> = pending_images.iter().map(|&i| items[i].clone()).collect();
        let attempt = pack_images(&subset, width, free_height, options.search());

        let packed_palettes = palette_positions.iter().flatten().count();
        if attempt.packed == 0 && packed_palettes == 0 {
            return Err(PackError::EmptyAtlas {
                images: pending_images.len(),
                palettes: pending_palettes.len(),
                first: pending_images
                    .first()
                    .or(pending_palettes.first())
                    .copied()
                    .unwrap_or(0),
            });
        }

        let mut atlas = Atlas::new(width);

        for (&image_index, position) in pending_palettes.iter().zip(&palette_positions) {
            if let Some((px, py)) = *position {
                atlas.blit(&[images[image_index].palette_bytes()], px, py);
                palette_spots[image_index] = Some((index, px, py));
            }
        }
        for (&image_index, placement) in pending_images.iter().zip(&attempt.placements) {
            if let Some(placement) = *placement {
                let image = &images[image_index];
                atlas.blit(
                    &image.packed_rows(placement.flip),
                    placement.x,
                    placement.y + image.padding,
                );
                image_spots[image_index] = Some((index, placement));
            }
        }

        let ratio = if free_height > 0 {
            100.0 * attempt.area as f64 / (width * free_height) as f64
        } else {
            0.0
        };
        info!(
            "atlas {}: {}x{}, {:4.1}% packing ratio, {}/{} images, {}/{} palettes",
            index + 1,
            width,
            ATLAS_HEIGHT,
            ratio,
            attempt.packed,
            pending_images.len(),
            packed_palettes,
            pending_palettes.len()
        );

        pending_images.retain(|&i| image_spots[i].is_none());
        pending_palettes.retain(|&i| palette_spots[i].is_none());
        atlases.push(atlas);
    }

    assemble_pages(images, atlases, &image_spots, &palette_spots)
}

/// Order pages by atlas class and resolve absolute page indices
fn assemble_pages(
    images: &[ConvertedImage],
    atlases: Vec<Atlas>,
    image_spots: &[Option<(usize, Placement)>],
    palette_spots: &[Option<(usize, usize, usize)>],
) -> Result<VramLayout, PackError> {
    let mut atlas_counts = [0usize; 4];
    let mut class_pages = [0usize; 4];
    // (class, first page within class) of each atlas
    let mut atlas_origin = Vec::with_capacity(atlases.len());

    for atlas in &atlases {
        let class = atlas.class();
        atlas_origin.push((class, class_pages[class]));
        atlas_counts[class] += 1;
        class_pages[class] += atlas.page_count();
    }

    let mut class_offsets = [0usize; 4];
    for class in 1..4 {
        class_offsets[class] = class_offsets[class - 1] + class_pages[class - 1];
    }
    let first_page = |atlas: usize| {
        let (class, offset) = atlas_origin[atlas];
        class_offsets[class] + offset
    };

    let mut pages = Vec::with_capacity(class_pages.iter().sum::<usize>() * PAGE_SIZE);
    for class in 0..4 {
        for atlas in atlases.iter().filter(|a| a.class() == class) {
            for page in atlas.pages() {
                pages.extend_from_slice(&page);
            }
        }
    }

    let slots = (0..images.len())
        .map(|i| {
            let (atlas, placement) = image_spots[i].ok_or(PackError::Unplaced(i))?;
            let palette = palette_spots[i].map(|(palette_atlas, px, py)| PaletteSlot {
                page: first_page(palette_atlas) + px / PAGE_WIDTH,
                offset: palette_offset(px, py),
            });

            Ok(ImageSlot {
                page: first_page(atlas) + placement.x / PAGE_WIDTH,
                x: placement.x % PAGE_WIDTH,
                y: placement.y,
                flip: placement.flip,
                palette,
            })
        })
        .collect::<Result<Vec<_>, PackError>>()?;

    Ok(VramLayout {
        pages,
        atlas_counts,
        slots,
        atlases,
    })
}
