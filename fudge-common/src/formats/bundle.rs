//! Bundle header and index slots
//!
//! # Layout
//! ```text
//! 0x00: magic "fudgebn" (7 bytes)
//! 0x07: version u8
//! 0x08: index section length u32
//! 0x0c: vram section length u32
//! 0x10: spu section length u32
//! 0x14: data section length u32
//! 0x18: atlas counts u8 × 4 (256, 192, 128, 64 words wide)
//! 0x1c: bucket count u16
//! 0x1e: chained slot count u16
//! 0x20: HashSlot × (buckets + chained)
//! ```
//!
//! Section lengths are the padded lengths, so each section starts right
//! after the previous one. Slot offsets are relative to the data section.

use super::{FormatError, SECTOR_SIZE};
use crate::index::{hash_str, walk_chain};

/// Bundle magic bytes
pub const BUNDLE_MAGIC: [u8; 7] = *b"fudgebn";

/// Current bundle format version
pub const BUNDLE_VERSION: u8 = 2;

/// Atlas widths in VRAM words, in emission order
pub const ATLAS_WIDTHS: [usize; 4] = [256, 192, 128, 64];

/// Entry type identifiers
///
/// Ids below [`CUSTOM`](entry_type::CUSTOM) are reserved, the rest are free
/// for game-specific payloads.
pub mod entry_type {
    pub const FILE: u16 = 0x0000;
    pub const TEXTURE: u16 = 0x0001;
    pub const BACKGROUND: u16 = 0x0002;
    pub const SOUND: u16 = 0x0003;
    pub const STRING_TABLE: u16 = 0x0004;
    pub const INTERLACED_TEXTURE: u16 = 0x0005;
    pub const INTERLACED_BACKGROUND: u16 = 0x0006;
    pub const EXECUTABLE: u16 = 0x0007;
    /// First custom type id
    pub const CUSTOM: u16 = 0x8000;

    /// Human readable name, for logs and listings
    pub fn name(type_id: u16) -> &'static str {
        match type_id {
            FILE => "file",
            TEXTURE => "texture",
            BACKGROUND => "bg",
            SOUND => "sound",
            STRING_TABLE => "stringtable",
            INTERLACED_TEXTURE => "itexture",
            INTERLACED_BACKGROUND => "ibg",
            EXECUTABLE => "executable",
            id if id >= CUSTOM => "custom",
            _ => "reserved",
        }
    }
}

/// Bundle header (32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleHeader {
    pub version: u8,
    pub index_length: u32,
    pub vram_length: u32,
    pub spu_length: u32,
    pub data_length: u32,
    /// Number of atlases of each width in [`ATLAS_WIDTHS`]
    pub atlas_counts: [u8; 4],
    pub buckets: u16,
    pub chained: u16,
}

impl BundleHeader {
    pub const SIZE: usize = 32;

    /// Create a header, checking every value against its field width
    ///
    /// `sections` are the index/vram/spu/data lengths before padding.
    pub fn new(
        sections: [usize; 4],
        atlas_counts: [usize; 4],
        buckets: usize,
        chained: usize,
    ) -> Result<Self, FormatError> {
        if !buckets.is_power_of_two() {
            return Err(FormatError::NotPowerOfTwo(buckets));
        }
        FormatError::check("bucket count", buckets, u16::MAX as usize)?;
        FormatError::check("chained slot count", chained, u16::MAX as usize)?;

        let mut lengths = [0u32; 4];
        for ((length, &section), field) in lengths
            .iter_mut()
            .zip(&sections)
            .zip(["index length", "vram length", "spu length", "data length"])
        {
            let padded = super::align_up(section, SECTOR_SIZE);
            FormatError::check(field, padded, u32::MAX as usize)?;
            *length = padded as u32;
        }

        let mut counts = [0u8; 4];
        for (count, &value) in counts.iter_mut().zip(&atlas_counts) {
            FormatError::check("atlas count", value, u8::MAX as usize)?;
            *count = value as u8;
        }

        Ok(Self {
            version: BUNDLE_VERSION,
            index_length: lengths[0],
            vram_length: lengths[1],
            spu_length: lengths[2],
            data_length: lengths[3],
            atlas_counts: counts,
            buckets: buckets as u16,
            chained: chained as u16,
        })
    }

    /// Total number of slots in the index
    pub fn slot_count(&self) -> usize {
        self.buckets as usize + self.chained as usize
    }

    /// Total number of VRAM pages across all atlases
    pub fn page_count(&self) -> usize {
        ATLAS_WIDTHS
            .iter()
            .zip(&self.atlas_counts)
            .map(|(&width, &count)| width / super::PAGE_WIDTH * count as usize)
            .sum()
    }

    pub fn vram_offset(&self) -> usize {
        self.index_length as usize
    }

    pub fn spu_offset(&self) -> usize {
        self.vram_offset() + self.vram_length as usize
    }

    pub fn data_offset(&self) -> usize {
        self.spu_offset() + self.spu_length as usize
    }

    /// Length of the whole bundle file
    pub fn total_length(&self) -> usize {
        self.data_offset() + self.data_length as usize
    }

    /// Write header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..7].copy_from_slice(&BUNDLE_MAGIC);
        bytes[7] = self.version;
        bytes[8..12].copy_from_slice(&self.index_length.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.vram_length.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.spu_length.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.data_length.to_le_bytes());
        bytes[24..28].copy_from_slice(&self.atlas_counts);
        bytes[28..30].copy_from_slice(&self.buckets.to_le_bytes());
        bytes[30..32].copy_from_slice(&self.chained.to_le_bytes());
        bytes
    }

    /// Read header from bytes
    ///
    /// Returns `None` if the slice is too short or the magic does not match.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE || bytes[0..7] != BUNDLE_MAGIC {
            return None;
        }
        Some(Self {
            version: bytes[7],
            index_length: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            vram_length: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
            spu_length: u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]),
            data_length: u32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]),
            atlas_counts: [bytes[24], bytes[25], bytes[26], bytes[27]],
            buckets: u16::from_le_bytes([bytes[28], bytes[29]]),
            chained: u16::from_le_bytes([bytes[30], bytes[31]]),
        })
    }
}

/// Index slot (16 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HashSlot {
    pub hash: u32,
    /// Payload offset from the start of the data section
    pub offset: u32,
    /// Payload length before alignment padding
    pub length: u32,
    pub type_id: u16,
    /// Next slot with the same short hash, 0 = end
    pub chain: u16,
}

impl HashSlot {
    pub const SIZE: usize = 16;

    /// Write slot to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.hash.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.offset.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.length.to_le_bytes());
        bytes[12..14].copy_from_slice(&self.type_id.to_le_bytes());
        bytes[14..16].copy_from_slice(&self.chain.to_le_bytes());
        bytes
    }

    /// Read slot from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            hash: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            offset: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            length: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            type_id: u16::from_le_bytes([bytes[12], bytes[13]]),
            chain: u16::from_le_bytes([bytes[14], bytes[15]]),
        })
    }
}

/// Read the index slot at `index` from a bundle
pub fn read_slot(bundle: &[u8], header: &BundleHeader, index: usize) -> Option<HashSlot> {
    if index >= header.slot_count() {
        return None;
    }
    let start = BundleHeader::SIZE + index * HashSlot::SIZE;
    HashSlot::from_bytes(bundle.get(start..start + HashSlot::SIZE)?)
}

/// Look up an entry by name in a serialized bundle
pub fn find_entry(bundle: &[u8], name: &str) -> Option<HashSlot> {
    let header = BundleHeader::from_bytes(bundle)?;
    let hash = hash_str(name);

    let index = walk_chain(header.buckets as usize, hash, |index| {
        let slot = read_slot(bundle, &header, index)?;
        Some((slot.hash, slot.chain))
    })?;

    read_slot(bundle, &header, index)
}

/// Payload bytes of an entry found with [`find_entry`]
pub fn entry_data<'a>(bundle: &'a [u8], slot: &HashSlot) -> Option<&'a [u8]> {
    let header = BundleHeader::from_bytes(bundle)?;
    let start = header.data_offset() + slot.offset as usize;
    bundle.get(start..start + slot.length as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_size() {
        assert_eq!(BundleHeader::SIZE, 32);
        assert_eq!(HashSlot::SIZE, 16);
    }

    #[test]
    fn test_header_pads_sections() {
        let header = BundleHeader::new([48, 0, 16, 2049], [0, 0, 1, 2], 2, 1).unwrap();
        assert_eq!(header.index_length, 2048);
        assert_eq!(header.vram_length, 0);
        assert_eq!(header.spu_length, 2048);
        assert_eq!(header.data_length, 4096);
        assert_eq!(header.total_length(), 8192);
        assert_eq!(header.page_count(), 2 + 2);
    }

    #[test]
    fn test_header_layout() {
        let header = BundleHeader::new([2048, 0x10000, 0x800, 0x1000], [1, 0, 0, 3], 4, 2).unwrap();
        let bytes = header.to_bytes();

        assert_eq!(&bytes[0..7], b"fudgebn");
        assert_eq!(bytes[7], BUNDLE_VERSION);
        assert_eq!(&bytes[8..12], &[0x00, 0x08, 0x00, 0x00]);
        assert_eq!(&bytes[12..16], &[0x00, 0x00, 0x01, 0x00]);
        assert_eq!(&bytes[24..28], &[1, 0, 0, 3]);
        assert_eq!(&bytes[28..30], &[4, 0]);
        assert_eq!(&bytes[30..32], &[2, 0]);
    }

    #[test]
    fn test_header_roundtrip() {
        let header = BundleHeader::new([100, 32768 * 4, 4096, 10], [1, 0, 0, 0], 8, 3).unwrap();
        let parsed = BundleHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.page_count(), 4);
    }

    #[test]
    fn test_header_bad_magic() {
        let mut bytes = BundleHeader::new([0; 4], [0; 4], 1, 0).unwrap().to_bytes();
        bytes[0] = b'x';
        assert!(BundleHeader::from_bytes(&bytes).is_none());
        assert!(BundleHeader::from_bytes(&bytes[..8]).is_none());
    }

    #[test]
    fn test_header_rejects_bad_buckets() {
        assert_eq!(
            BundleHeader::new([0; 4], [0; 4], 3, 0).unwrap_err(),
            FormatError::NotPowerOfTwo(3)
        );
        assert!(BundleHeader::new([0; 4], [0; 4], 0x10000, 0).is_err());
        assert!(BundleHeader::new([0; 4], [0; 4], 1, 0x10000).is_err());
        assert!(BundleHeader::new([0; 4], [256, 0, 0, 0], 1, 0).is_err());
    }

    #[test]
    fn test_slot_roundtrip() {
        let slot = HashSlot {
            hash: 0xdeadbeef,
            offset: 0x40,
            length: 123,
            type_id: entry_type::SOUND,
            chain: 5,
        };
        let bytes = slot.to_bytes();
        assert_eq!(&bytes[0..4], &[0xef, 0xbe, 0xad, 0xde]);
        assert_eq!(HashSlot::from_bytes(&bytes).unwrap(), slot);
    }

    #[test]
    fn test_entry_type_names() {
        assert_eq!(entry_type::name(entry_type::TEXTURE), "texture");
        assert_eq!(entry_type::name(0x8123), "custom");
        assert_eq!(entry_type::name(0x0100), "reserved");
    }

    #[test]
    fn test_find_entry() {
        // Two buckets, "a" and a chained entry sharing its bucket
        let a = hash_str("a");
        let b = (0..).map(|i| format!("b{i}")).find(|name| hash_str(name) % 2 == a % 2).unwrap();

        let header =
            BundleHeader::new([BundleHeader::SIZE + 3 * 16, 0, 0, 8], [0; 4], 2, 1).unwrap();
        let mut bundle = header.to_bytes().to_vec();

        let mut slots = [HashSlot::default(); 3];
        slots[a as usize % 2] = HashSlot {
            hash: a,
            offset: 0,
            length: 4,
            type_id: entry_type::FILE,
            chain: 2,
        };
        slots[2] = HashSlot {
            hash: hash_str(&b),
            offset: 4,
            length: 4,
            type_id: 0x8001,
            chain: 0,
        };
        for slot in &slots {
            bundle.extend_from_slice(&slot.to_bytes());
        }
        bundle.resize(header.data_offset(), 0);
        bundle.extend_from_slice(b"AAAABBBB");
        bundle.resize(header.total_length(), 0);

        let found = find_entry(&bundle, "a").unwrap();
        assert_eq!(entry_data(&bundle, &found).unwrap(), b"AAAA");

        let found = find_entry(&bundle, &b).unwrap();
        assert_eq!(found.type_id, 0x8001);
        assert_eq!(entry_data(&bundle, &found).unwrap(), b"BBBB");

        assert!(find_entry(&bundle, "missing").is_none());
    }
}
