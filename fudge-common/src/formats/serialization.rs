//! Binary serialization trait for format structures.
//!
//! Every fixed-size bundle structure implements `BinarySerializable` so
//! generic code (table writers, tests) can handle them uniformly, while each
//! type keeps its own `to_bytes()` returning a fixed-size array.

/// Trait for binary-serializable format structures.
///
/// The trait uses `Vec<u8>` for the return type because associated const
/// generics in return types (`[u8; Self::SIZE]`) are not yet stable in Rust.
///
/// # Example
///
/// ```
/// use fudge_common::formats::{BinarySerializable, SoundDescriptor};
///
/// let descriptor = SoundDescriptor::from_byte_offsets(0, None, 32, 22050).unwrap();
///
/// // Using the trait (returns Vec<u8>)
/// let bytes = descriptor.serialize();
/// let parsed = SoundDescriptor::deserialize(&bytes).unwrap();
///
/// // Using the type-specific method (returns [u8; 8])
/// let bytes_array = descriptor.to_bytes();
/// ```
pub trait BinarySerializable: Sized {
    /// Size of the serialized structure in bytes.
    const SIZE: usize;

    /// Serialize to bytes.
    fn serialize(&self) -> Vec<u8>;

    /// Deserialize from bytes.
    ///
    /// Returns `None` if the byte slice is too short or contains invalid data.
    fn deserialize(bytes: &[u8]) -> Option<Self>;

    /// Serialize a sequence of structures back to back.
    fn serialize_all<'a>(items: impl IntoIterator<Item = &'a Self>) -> Vec<u8>
    where
        Self: 'a,
    {
        items.into_iter().flat_map(|item| item.serialize()).collect()
    }
}

macro_rules! impl_binary_serializable {
    ($($ty:ty),* $(,)?) => {
        $(
            impl BinarySerializable for $ty {
                const SIZE: usize = Self::SIZE;

                fn serialize(&self) -> Vec<u8> {
                    self.to_bytes().to_vec()
                }

                fn deserialize(bytes: &[u8]) -> Option<Self> {
                    Self::from_bytes(bytes)
                }
            }
        )*
    };
}

impl_binary_serializable!(
    super::BundleHeader,
    super::HashSlot,
    super::TextureHeader,
    super::FrameDescriptor,
    super::BackgroundHeader,
    super::SoundDescriptor,
    super::StringTableHeader,
    super::StringSlot,
    super::TimHeader,
    super::TimSection,
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{
        BundleHeader, FrameDescriptor, HashSlot, SoundDescriptor, StringSlot, StringTableHeader,
        TextureHeader,
    };

    #[test]
    fn test_trait_sizes() {
        assert_eq!(<BundleHeader as BinarySerializable>::SIZE, 32);
        assert_eq!(<HashSlot as BinarySerializable>::SIZE, 16);
        assert_eq!(<FrameDescriptor as BinarySerializable>::SIZE, 16);
        assert_eq!(<SoundDescriptor as BinarySerializable>::SIZE, 8);
        assert_eq!(<StringSlot as BinarySerializable>::SIZE, 8);
        assert_eq!(<StringTableHeader as BinarySerializable>::SIZE, 4);
        assert_eq!(<TextureHeader as BinarySerializable>::SIZE, 4);
    }

    #[test]
    fn test_serialize_all() {
        let slots = [
            HashSlot {
                hash: 1,
                ..Default::default()
            },
            HashSlot {
                hash: 2,
                chain: 1,
                ..Default::default()
            },
        ];
        let bytes = HashSlot::serialize_all(&slots);
        assert_eq!(bytes.len(), 32);
        assert_eq!(HashSlot::deserialize(&bytes[16..]).unwrap(), slots[1]);
    }

    #[test]
    fn test_trait_matches_to_bytes() {
        let header = TextureHeader::new(1, 2, 1, 8);
        assert_eq!(header.serialize(), header.to_bytes().to_vec());
        assert_eq!(TextureHeader::deserialize(&header.serialize()), Some(header));
    }
}
