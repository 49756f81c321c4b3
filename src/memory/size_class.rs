//! Size classes for sector slots
//!
//! Sectors hand out slots in a small set of fixed sizes. A request rounds
//! up to the smallest class that fits; anything above the largest class
//! is stored as a chain of [`BLOB_SIZE`] links plus a header.

use crate::error::{Error, Result};

/// Slot sizes a sector offers, smallest first.
pub const ALLOC_SIZES: [usize; 7] = [64, 128, 256, 512, 1024, 2048, 4096];

/// Number of size classes.
pub const NUM_CLASSES: usize = ALLOC_SIZES.len();

/// Largest single-slot payload; larger records become blob chains.
pub const BLOB_SIZE: usize = 4096;

/// Slots per tag block: one bitmap word per block.
pub const BLOCK_SLOTS: usize = 32;

/// Bytes consumed when a sector seeds one block of every class.
pub const SEED_BYTES: usize = {
    let mut total = 0;
    let mut i = 0;
    while i < NUM_CLASSES {
        total += ALLOC_SIZES[i] * BLOCK_SLOTS;
        i += 1;
    }
    total
};

/// Smallest class that fits `len` bytes. Rounds up, never down; a
/// zero-length request takes the smallest class.
pub fn tag_for(len: usize) -> Result<u8> {
    ALLOC_SIZES
        .iter()
        .position(|&size| len <= size)
        .map(|tag| tag as u8)
        .ok_or_else(|| {
            Error::InvalidArgument(format!(
                "Size {} exceeds the largest slot class {}",
                len, BLOB_SIZE
            ))
        })
}

/// Slot capacity of a class.
pub fn slot_size(tag: u8) -> usize {
    ALLOC_SIZES[tag as usize]
}

/// Number of links a blob of `len` bytes needs (excluding the header).
pub fn blob_link_count(len: usize) -> usize {
    (len + BLOB_SIZE - 1) / BLOB_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_rounds_up() {
        assert_eq!(tag_for(0).unwrap(), 0);
        assert_eq!(tag_for(1).unwrap(), 0);
        assert_eq!(tag_for(64).unwrap(), 0);
        assert_eq!(tag_for(65).unwrap(), 1);
        assert_eq!(tag_for(100).unwrap(), 1);
        assert_eq!(tag_for(2049).unwrap(), 6);
        assert_eq!(tag_for(4096).unwrap(), 6);
        assert!(tag_for(4097).is_err());
    }

    #[test]
    fn test_slot_capacity_covers_request() {
        for len in 0..=BLOB_SIZE {
            let tag = tag_for(len).unwrap();
            assert!(slot_size(tag) >= len);
            if tag > 0 {
                // smallest class that fits
                assert!(slot_size(tag - 1) < len);
            }
        }
    }

    #[test]
    fn test_blob_link_count() {
        assert_eq!(blob_link_count(BLOB_SIZE), 1);
        assert_eq!(blob_link_count(BLOB_SIZE + 1), 2);
        assert_eq!(blob_link_count(3 * BLOB_SIZE), 3);
        assert_eq!(blob_link_count(3 * BLOB_SIZE + 7), 4);
    }

    #[test]
    fn test_seed_bytes() {
        assert_eq!(SEED_BYTES, 8128 * 32);
    }
}
