//! Guillotine rectangle packer
//!
//! Places rectangles in an atlas by repeatedly picking the free space that
//! leaves the least area unused and splitting the remainder into two new free
//! spaces. The outer search tries several sort orders and shrinks the
//! candidate atlas size to find the tightest layout.

use fudge_common::PixelDepth;
use hashbrown::HashMap;
use tracing::debug;

/// A rectangle to be packed
#[derive(Debug, Clone, PartialEq)]
pub struct PackItem {
    /// Items with equal hashes share one placement
    pub hash: u64,
    pub depth: PixelDepth,
    /// Unpadded texel size, used for sorting
    pub width: usize,
    pub height: usize,
    /// `(flip, packed width, packed height)` in preference order
    pub orientations: Vec<(bool, usize, usize)>,
}

impl PackItem {
    fn pathological(&self) -> f64 {
        let (w, h) = (self.width as f64, self.height as f64);
        (w * h) * w.max(h) / w.min(h).max(1.0)
    }
}

/// Position of a packed item, in VRAM words and rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub x: usize,
    pub y: usize,
    pub flip: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Space {
    x: usize,
    y: usize,
    width: usize,
    height: usize,
}

/// Result of one packing pass
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    /// Packed area, duplicates not counted
    pub area: usize,
    /// Number of items placed, duplicates included
    pub packed: usize,
    /// Placement of each item, in input order
    pub placements: Vec<Option<Placement>>,
}

impl Attempt {
    fn score(&self) -> (usize, usize) {
        (self.area, self.packed)
    }
}

/// Pack `items` (visited in `order`) into a `width` x `height` atlas
///
/// `alt_split` flips the rule choosing along which side leftover space is
/// split.
pub fn attempt_packing(
    items: &[PackItem],
    order: &[usize],
    width: usize,
    height: usize,
    alt_split: bool,
) -> Attempt {
    let mut spaces = vec![Space {
        x: 0,
        y: 0,
        width,
        height,
    }];
    let mut placements: Vec<Option<Placement>> = vec![None; items.len()];
    let mut placed_hashes: HashMap<u64, Placement> = HashMap::new();
    let mut area = 0;
    let mut packed = 0;

    for &index in order {
        let item = &items[index];

        if let Some(&placement) = placed_hashes.get(&item.hash) {
            placements[index] = Some(placement);
            packed += 1;
            continue;
        }

        for &(flip, w, h) in &item.orientations {
            let Some((space_index, (offset_x, offset_y))) = best_space(&spaces, item.depth, w, h)
            else {
                continue;
            };

            let space = spaces.remove(space_index);
            split_space(&mut spaces, space_index, space, w, h, offset_x, offset_y, alt_split);

            let placement = Placement {
                x: space.x + offset_x,
                y: space.y + offset_y,
                flip,
            };
            placements[index] = Some(placement);
            placed_hashes.insert(item.hash, placement);
            area += w * h;
            packed += 1;
            break;
        }
    }

    Attempt {
        area,
        packed,
        placements,
    }
}

/// Free space wasting the least area, with the corner to anchor at
///
/// Corners are tried in order until one keeps the rectangle within its
/// page span. Ties keep the earliest space.
fn best_space(
    spaces: &[Space],
    depth: PixelDepth,
    w: usize,
    h: usize,
) -> Option<(usize, (usize, usize))> {
    let mut best = None;
    let mut best_waste = usize::MAX;

    for (index, space) in spaces.iter().enumerate() {
        if w > space.width || h > space.height {
            continue;
        }

        let margin_x = space.width - w;
        let margin_y = space.height - h;
        let offset = [(0, 0), (margin_x, 0), (0, margin_y), (margin_x, margin_y)]
            .into_iter()
            .find(|&(ox, _)| depth.fits_span(space.x + ox, w));

        let Some(offset) = offset else {
            continue;
        };

        let waste = space.width * space.height - w * h;
        if waste < best_waste {
            best = Some((index, offset));
            best_waste = waste;
        }
    }

    best
}

/// Insert the leftovers of `space` after placing a `w` x `h` rectangle
#[allow(clippy::too_many_arguments)]
fn split_space(
    spaces: &mut Vec<Space>,
    at: usize,
    space: Space,
    w: usize,
    h: usize,
    offset_x: usize,
    offset_y: usize,
    alt_split: bool,
) {
    let margin_x = space.width - w;
    let margin_y = space.height - h;
    let pad_left = if offset_x != 0 { 0 } else { w };
    let pad_top = if offset_y != 0 { 0 } else { h };

    if alt_split != (space.width * margin_y < space.height * margin_x) {
        // full-width strip below (or above), remainder beside the rectangle
        if margin_y != 0 {
            spaces.insert(
                at,
                Space {
                    x: space.x,
                    y: space.y + pad_top,
                    width: space.width,
                    height: margin_y,
                },
            );
        }
        if margin_x != 0 {
            spaces.insert(
                at,
                Space {
                    x: space.x + pad_left,
                    y: space.y + offset_y,
                    width: margin_x,
                    height: h,
                },
            );
        }
    } else {
        // full-height strip beside, remainder below (or above) the rectangle
        if margin_x != 0 {
            spaces.insert(
                at,
                Space {
                    x: space.x + pad_left,
                    y: space.y,
                    width: margin_x,
                    height: space.height,
                },
            );
        }
        if margin_y != 0 {
            spaces.insert(
                at,
                Space {
                    x: space.x + offset_x,
                    y: space.y + pad_top,
                    width: w,
                    height: margin_y,
                },
            );
        }
    }
}

/// Sort criteria tried by [`pack_images`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Area,
    Perimeter,
    LongestSide,
    Width,
    Height,
    Pathological,
}

impl SortOrder {
    pub const ALL: [SortOrder; 6] = [
        SortOrder::Area,
        SortOrder::Perimeter,
        SortOrder::LongestSide,
        SortOrder::Width,
        SortOrder::Height,
        SortOrder::Pathological,
    ];

    fn key(self, item: &PackItem) -> f64 {
        let (w, h) = (item.width, item.height);
        match self {
            SortOrder::Area => (w * h) as f64,
            SortOrder::Perimeter => ((w + h) * 2) as f64,
            SortOrder::LongestSide => w.max(h) as f64,
            SortOrder::Width => w as f64,
            SortOrder::Height => h as f64,
            SortOrder::Pathological => item.pathological(),
        }
    }

    /// Stable sort of item indices, equal keys keep input order
    pub fn sorted(self, items: &[PackItem], reverse: bool) -> Vec<usize> {
        let mut order: Vec<usize> = (0..items.len()).collect();
        order.sort_by(|&a, &b| {
            let (ka, kb) = (self.key(&items[a]), self.key(&items[b]));
            if reverse { kb.total_cmp(&ka) } else { ka.total_cmp(&kb) }
        });
        order
    }
}

/// Search settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    /// Smallest size step tried when shrinking the atlas
    pub discard_step: usize,
    /// Also try the alternative split rule
    pub try_splits: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            discard_step: 1,
            try_splits: false,
        }
    }
}

/// Pack as much of `items` as possible into a `width` x `height` atlas
///
/// Every sort order is tried in both directions. For each, the atlas size is
/// shrunk (or grown back) by a halving step until the step drops below
/// `discard_step`, following whichever of the four candidate sizes packs the
/// most area. The layout with the largest packed area wins; the search stops
/// early once a layout places everything.
pub fn pack_images(
    items: &[PackItem],
    width: usize,
    height: usize,
    options: SearchOptions,
) -> Attempt {
    let split_modes: &[bool] = if options.try_splits {
        &[false, true]
    } else {
        &[false]
    };
    let discard_step = options.discard_step.max(1);

    let mut best: Option<(Vec<usize>, usize, usize, bool)> = None;
    let mut best_area = 0;

    'search: for reverse in [true, false] {
        for sort in SortOrder::ALL {
            let order = sort.sorted(items, reverse);

            let (mut new_w, mut new_h) = (width, height);
            let mut step = width.min(height) / 2;
            let mut alt = false;

            let mut result = if step < discard_step {
                attempt_packing(items, &order, new_w, new_h, false).score()
            } else {
                (0, 0)
            };

            while step >= discard_step {
                let alt_w = new_w.saturating_sub(step);
                let alt_h = new_h.saturating_sub(step);
                let candidates = [(alt_w, alt_h), (alt_w, new_h), (new_w, alt_h), (new_w, new_h)];

                let mut winner = 0;
                let mut winner_score = None;
                for (i, (split, (w, h))) in split_modes
                    .iter()
                    .flat_map(|&s| candidates.iter().map(move |&c| (s, c)))
                    .enumerate()
                {
                    let score = attempt_packing(items, &order, w, h, split).score();
                    if winner_score.is_none_or(|best| score > best) {
                        winner = i;
                        winner_score = Some(score);
                    }
                }

                result = winner_score.unwrap_or((0, 0));
                let candidate = winner % 4;
                alt = split_modes[winner / 4];

                if candidate == 3 {
                    if result.1 == items.len() {
                        debug!("{sort:?}{}: all images packed", if reverse { " rev" } else { "" });
                        break;
                    }
                    if new_w + step > width || new_h + step > height {
                        debug!("{sort:?}{}: can't extend atlas", if reverse { " rev" } else { "" });
                        break;
                    }
                    new_w += step;
                    new_h += step;
                } else {
                    (new_w, new_h) = candidates[candidate];
                }

                step /= 2;
            }

            let (area, packed) = result;
            debug!(
                "{sort:?}{}: {new_w}x{new_h}, {packed} images packed",
                if reverse { " rev" } else { "" }
            );

            if area > best_area {
                best_area = area;
                best = Some((order, new_w, new_h, alt));

                if packed == items.len() {
                    break 'search;
                }
            }
        }
    }

    match best {
        Some((order, w, h, alt)) => attempt_packing(items, &order, w, h, alt),
        None => Attempt {
            area: 0,
            packed: 0,
            placements: vec![None; items.len()],
        },
    }
}
