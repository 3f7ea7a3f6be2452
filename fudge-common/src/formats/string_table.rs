//! String table entry payload
//!
//! A small hash table embedded in a main RAM entry, mapping key hashes to
//! null-terminated strings.
//!
//! # Layout
//! ```text
//! 0x00: bucket count u16
//! 0x02: chained slot count u16
//! 0x04: StringSlot × (buckets + chained)
//! ....: string blob (null-terminated strings)
//! ```
//!
//! Slot offsets are relative to the start of the table, so the blob can be
//! read without knowing where the slots end.

use crate::index::{hash32, walk_chain};

/// String table header (4 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringTableHeader {
    pub buckets: u16,
    pub chained: u16,
}

impl StringTableHeader {
    pub const SIZE: usize = 4;

    pub fn new(buckets: u16, chained: u16) -> Self {
        Self { buckets, chained }
    }

    pub fn slot_count(&self) -> usize {
        self.buckets as usize + self.chained as usize
    }

    /// Offset of the first byte after the slots
    pub fn blob_offset(&self) -> usize {
        Self::SIZE + self.slot_count() * StringSlot::SIZE
    }

    /// Write header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..2].copy_from_slice(&self.buckets.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.chained.to_le_bytes());
        bytes
    }

    /// Read header from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            buckets: u16::from_le_bytes([bytes[0], bytes[1]]),
            chained: u16::from_le_bytes([bytes[2], bytes[3]]),
        })
    }
}

/// String table slot (8 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StringSlot {
    pub hash: u32,
    /// Offset of the string from the start of the table
    pub offset: u16,
    pub chain: u16,
}

impl StringSlot {
    pub const SIZE: usize = 8;

    /// Write slot to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.hash.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.offset.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.chain.to_le_bytes());
        bytes
    }

    /// Read slot from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            hash: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            offset: u16::from_le_bytes([bytes[4], bytes[5]]),
            chain: u16::from_le_bytes([bytes[6], bytes[7]]),
        })
    }
}

fn read_string_slot(table: &[u8], header: &StringTableHeader, index: usize) -> Option<StringSlot> {
    if index >= header.slot_count() {
        return None;
    }
    let start = StringTableHeader::SIZE + index * StringSlot::SIZE;
    StringSlot::from_bytes(table.get(start..)?)
}

/// Look up `key` in a serialized string table
///
/// Returns the string bytes without the terminator.
pub fn lookup_string<'a>(table: &'a [u8], key: &str) -> Option<&'a [u8]> {
    let header = StringTableHeader::from_bytes(table)?;
    let hash = hash32(key.as_bytes());

    let index = walk_chain(header.buckets as usize, hash, |index| {
        let slot = read_string_slot(table, &header, index)?;
        Some((slot.hash, slot.chain))
    })?;

    let slot = read_string_slot(table, &header, index)?;
    let string = table.get(slot.offset as usize..)?;
    let end = string.iter().position(|&byte| byte == 0)?;
    Some(&string[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(StringTableHeader::SIZE, 4);
        assert_eq!(StringSlot::SIZE, 8);
    }

    #[test]
    fn test_slot_layout() {
        let slot = StringSlot {
            hash: 0x01020304,
            offset: 0x0506,
            chain: 0x0708,
        };
        assert_eq!(slot.to_bytes(), [4, 3, 2, 1, 6, 5, 8, 7]);
        assert_eq!(StringSlot::from_bytes(&slot.to_bytes()).unwrap(), slot);
    }

    #[test]
    fn test_lookup_single_bucket() {
        let header = StringTableHeader::new(1, 0);
        let mut table = header.to_bytes().to_vec();
        table.extend_from_slice(
            &StringSlot {
                hash: hash32(b"title"),
                offset: header.blob_offset() as u16,
                chain: 0,
            }
            .to_bytes(),
        );
        table.extend_from_slice(b"Hello\0");

        assert_eq!(lookup_string(&table, "title").unwrap(), b"Hello");
        assert!(lookup_string(&table, "other").is_none());
    }

    #[test]
    fn test_lookup_truncated_table() {
        assert!(lookup_string(&[], "x").is_none());
        assert!(lookup_string(&[1, 0, 0, 0], "x").is_none());
    }
}
