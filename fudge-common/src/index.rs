//! Name hashing and bucket/chain hash tables
//!
//! Bundles never store entry names. Both the top-level index and embedded
//! string tables are looked up by the sdbm hash of the name:
//!
//! ```text
//! slot = hash % buckets
//! while slots[slot].hash != hash:
//!     slot = slots[slot].chain   (0 = not found)
//! ```
//!
//! The first `buckets` slots sit at their short hash; colliding entries are
//! appended after them and linked through `chain`. A bucket with no entry
//! has hash 0, so a real name hashing to 0 placed in an otherwise empty
//! bucket reads as empty. That is an accepted limitation of the format.
//!
//! When several entries share a short hash, the first one added takes the
//! bucket and the rest are chained in insertion order.

use hashbrown::HashSet;
use thiserror::Error;

/// Maximum number of bucket slots (bucket count is stored as u16)
pub const MAX_BUCKETS: usize = 0x8000;

/// Maximum number of slots, so chain indices fit in a u16
pub const MAX_SLOTS: usize = 0x10000;

/// Errors raised while building a hash table
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("entry {index} has the same hash ({hash:#010x}) as an earlier entry")]
    DuplicateHash { hash: u32, index: usize },

    #[error("{0} entries need more than {MAX_BUCKETS} buckets")]
    TooManyBuckets(usize),

    #[error("hash table needs {0} slots, at most {MAX_SLOTS} are addressable")]
    TooManySlots(usize),
}

/// sdbm hash of a byte string
///
/// `value = byte + (value << 6) + (value << 16) - value` with wrapping u32
/// arithmetic, i.e. `value * 65599 + byte`. Being a `const fn`, it can also
/// produce compile-time constants in loader code.
pub const fn hash32(name: &[u8]) -> u32 {
    let mut value = 0u32;
    let mut i = 0;

    while i < name.len() {
        value = (name[i] as u32)
            .wrapping_add(value << 6)
            .wrapping_add(value << 16)
            .wrapping_sub(value);
        i += 1;
    }

    value
}

/// sdbm hash of a string's bytes
pub const fn hash_str(name: &str) -> u32 {
    hash32(name.as_bytes())
}

/// Bucket count for `entries` entries: the next power of two, at least 1
pub fn bucket_count(entries: usize) -> usize {
    entries.max(1).next_power_of_two()
}

/// One slot of a built table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSlot<T> {
    pub hash: u32,
    /// `None` for empty buckets
    pub value: Option<T>,
    /// Index of the next slot in this bucket's list, 0 = end
    pub chain: u16,
}

impl<T> TableSlot<T> {
    fn empty() -> Self {
        Self {
            hash: 0,
            value: None,
            chain: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }
}

/// Bucket/chain table ready to be serialized slot by slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashTable<T> {
    buckets: usize,
    slots: Vec<TableSlot<T>>,
}

impl<T> HashTable<T> {
    /// Number of bucket slots (always a power of two)
    pub fn buckets(&self) -> usize {
        self.buckets
    }

    /// Number of chained slots after the buckets
    pub fn chained(&self) -> usize {
        self.slots.len() - self.buckets
    }

    /// Number of non-empty buckets
    pub fn used_buckets(&self) -> usize {
        self.slots[..self.buckets]
            .iter()
            .filter(|slot| !slot.is_empty())
            .count()
    }

    /// All slots, buckets first
    pub fn slots(&self) -> &[TableSlot<T>] {
        &self.slots
    }

    /// Walk the chain for `hash`, returning the slot index and its value
    pub fn lookup(&self, hash: u32) -> Option<(usize, &T)> {
        let index = walk_chain(self.buckets, hash, |index| {
            let slot = self.slots.get(index)?;
            Some((slot.hash, slot.chain))
        })?;

        self.slots[index].value.as_ref().map(|value| (index, value))
    }
}

/// Build a table from `(hash, value)` pairs in insertion order
///
/// # Errors
/// Duplicate hashes, or more entries than the u16 fields can address.
pub fn build_table<T>(
    entries: impl IntoIterator<Item = (u32, T)>,
) -> Result<HashTable<T>, IndexError> {
    let entries: Vec<(u32, T)> = entries.into_iter().collect();

    let buckets = bucket_count(entries.len());
    if buckets > MAX_BUCKETS {
        return Err(IndexError::TooManyBuckets(entries.len()));
    }

    let mut seen = HashSet::with_capacity(entries.len());
    let mut slots: Vec<TableSlot<T>> = (0..buckets).map(|_| TableSlot::empty()).collect();

    for (index, (hash, value)) in entries.into_iter().enumerate() {
        if !seen.insert(hash) {
            return Err(IndexError::DuplicateHash { hash, index });
        }

        let bucket = hash as usize % buckets;
        if slots[bucket].is_empty() {
            slots[bucket] = TableSlot {
                hash,
                value: Some(value),
                chain: 0,
            };
            continue;
        }

        let new_index = slots.len();
        if new_index >= MAX_SLOTS {
            return Err(IndexError::TooManySlots(new_index + 1));
        }

        let mut tail = bucket;
        while slots[tail].chain != 0 {
            tail = slots[tail].chain as usize;
        }

        slots[tail].chain = new_index as u16;
        slots.push(TableSlot {
            hash,
            value: Some(value),
            chain: 0,
        });
    }

    Ok(HashTable { buckets, slots })
}

/// Walk a serialized table
///
/// `slot_at` returns the `(hash, chain)` pair of a slot, or `None` when the
/// index is out of range. Returns the index of the slot holding `hash`.
/// The walk is bounded by the table size so a corrupt chain cannot loop.
pub fn walk_chain(
    buckets: usize,
    hash: u32,
    slot_at: impl Fn(usize) -> Option<(u32, u16)>,
) -> Option<usize> {
    if buckets == 0 {
        return None;
    }

    let mut index = hash as usize % buckets;
    for _ in 0..MAX_SLOTS {
        let (slot_hash, chain) = slot_at(index)?;
        if slot_hash == hash {
            return Some(index);
        }
        if chain == 0 {
            return None;
        }
        index = chain as usize;
    }

    None
}
