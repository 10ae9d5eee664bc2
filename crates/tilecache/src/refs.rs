//! Salted slot references
//!
//! A reference packs `(salt << index_bits) | index`. The index width is the
//! number of bits needed for the slot count, the salt fills the rest of the
//! 32 bits (capped at 31). Salts start at 1 and skip 0 on wrap-around, so a
//! valid reference is never 0.

use tilecache_common::{slot_index_bits, Error, Result};

/// Fewest salt bits accepted for a slot table
pub const MIN_SALT_BITS: u32 = 10;

/// Reference to a compressed tile slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct CompressedTileRef(pub u32);

/// Reference to an obstacle slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct ObstacleRef(pub u32);

impl CompressedTileRef {
    pub const NULL: Self = Self(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl ObstacleRef {
    pub const NULL: Self = Self(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

/// Bit layout of references into one slot table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefCodec {
    index_bits: u32,
    salt_bits: u32,
}

impl RefCodec {
    /// Computes the layout for a table of `max_slots` slots
    pub fn new(max_slots: u32) -> Result<Self> {
        if max_slots == 0 {
            return Err(Error::InvalidParam("slot table must hold at least one slot".into()));
        }
        let index_bits = slot_index_bits(max_slots);
        let salt_bits = (32 - index_bits).min(31);
        if salt_bits < MIN_SALT_BITS {
            return Err(Error::InvalidParam(format!(
                "{} slots leave only {} salt bits (need {})",
                max_slots, salt_bits, MIN_SALT_BITS
            )));
        }
        Ok(Self { index_bits, salt_bits })
    }

    pub fn index_bits(&self) -> u32 {
        self.index_bits
    }

    pub fn salt_bits(&self) -> u32 {
        self.salt_bits
    }

    #[inline]
    fn salt_mask(&self) -> u32 {
        (1u32 << self.salt_bits) - 1
    }

    #[inline]
    fn index_mask(&self) -> u32 {
        // index_bits is at most 22 because salt_bits >= 10.
        (1u32 << self.index_bits) - 1
    }

    #[inline]
    pub fn encode(&self, salt: u32, index: usize) -> u32 {
        ((salt & self.salt_mask()) << self.index_bits) | (index as u32 & self.index_mask())
    }

    #[inline]
    pub fn decode_salt(&self, r: u32) -> u32 {
        (r >> self.index_bits) & self.salt_mask()
    }

    #[inline]
    pub fn decode_index(&self, r: u32) -> usize {
        (r & self.index_mask()) as usize
    }

    /// Next salt for a slot being recycled; never 0
    #[inline]
    pub fn next_salt(&self, salt: u32) -> u32 {
        match (salt + 1) & self.salt_mask() {
            0 => 1,
            s => s,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_layout() {
        let codec = RefCodec::new(128).unwrap();
        assert_eq!(codec.index_bits(), 7);
        assert_eq!(codec.salt_bits(), 25);

        let codec = RefCodec::new(100).unwrap();
        assert_eq!(codec.index_bits(), 7);

        // A single slot needs no index bits; the salt is capped at 31 bits.
        let codec = RefCodec::new(1).unwrap();
        assert_eq!(codec.index_bits(), 0);
        assert_eq!(codec.salt_bits(), 31);
    }

    #[test]
    fn test_encode_decode() {
        let codec = RefCodec::new(64).unwrap();
        let r = codec.encode(5, 17);
        assert_eq!(codec.decode_salt(r), 5);
        assert_eq!(codec.decode_index(r), 17);
        assert_ne!(r, 0);
    }

    #[test]
    fn test_salt_wraps_to_one() {
        let codec = RefCodec::new(1 << 22).unwrap();
        assert_eq!(codec.salt_bits(), 10);
        assert_eq!(codec.next_salt(1), 2);
        assert_eq!(codec.next_salt(1023), 1);
    }

    #[test]
    fn test_too_few_salt_bits() {
        assert!(matches!(RefCodec::new(1 << 23), Err(Error::InvalidParam(_))));
        assert!(matches!(RefCodec::new(0), Err(Error::InvalidParam(_))));
        assert!(matches!(RefCodec::new(u32::MAX), Err(Error::InvalidParam(_))));
    }
}
