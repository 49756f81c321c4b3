//! Allocation addresses
//!
//! An [`Addr`] packs the 32-bit sector address (sector index + slot bit,
//! stored negated so that 0 is never a live address) into the high half
//! and the payload length into the low half. The sector half is bijective
//! over the full signed 16-bit sector range and unsigned 16-bit bit range.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::size_class::BLOB_SIZE;

const SECTOR_OFFSET_BITS: u32 = 16;
const SECTOR_OFFSET_MASK: u32 = (1 << SECTOR_OFFSET_BITS) - 1;

/// The 32-bit (sector index, slot bit) half of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SlotAddr(pub(crate) i32);

impl SlotAddr {
    /// Encode a sector index and slot bit. Wrapping arithmetic keeps the
    /// mapping bijective across the whole 16-bit ranges.
    pub(crate) fn encode(sector: i16, bit: u16) -> Self {
        let hi = (sector as i32).wrapping_add(1) as u32;
        let packed = (hi << SECTOR_OFFSET_BITS) | bit as u32;
        SlotAddr(packed.wrapping_neg() as i32)
    }

    pub(crate) fn sector(self) -> i16 {
        let packed = (self.0 as u32).wrapping_neg();
        ((packed >> SECTOR_OFFSET_BITS) as u16).wrapping_sub(1) as i16
    }

    pub(crate) fn bit(self) -> u16 {
        ((self.0 as u32).wrapping_neg() & SECTOR_OFFSET_MASK) as u16
    }
}

/// Opaque address of one live allocation (or blob head).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Addr(u64);

impl Addr {
    pub(crate) fn new(slot: SlotAddr, len: u32) -> Self {
        Addr(((slot.0 as u32 as u64) << 32) | len as u64)
    }

    pub(crate) fn slot(self) -> SlotAddr {
        SlotAddr((self.0 >> 32) as u32 as i32)
    }

    /// Sector index this address resolves into.
    pub fn sector(self) -> i16 {
        self.slot().sector()
    }

    /// Slot bit within the sector's bitmap. For blobs this is the header
    /// slot; the chain links are recorded inside the header payload.
    pub fn slot_bit(self) -> u16 {
        self.slot().bit()
    }

    /// Length of the payload in bytes, as requested at allocation time.
    pub fn len(self) -> usize {
        (self.0 & 0xFFFF_FFFF) as usize
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// Whether the record spans more than one slot.
    pub(crate) fn is_blob(self) -> bool {
        self.len() > BLOB_SIZE
    }

    pub fn to_raw(self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        Addr(raw)
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Addr(sector={}, slot={}, len={})",
            self.sector(),
            self.slot_bit(),
            self.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_slot_addr_roundtrip_edges() {
        for &sector in &[-32768i16, -1, 0, 1, 255, 32766, 32767] {
            for &bit in &[0u16, 1, 255, 32767, 65535] {
                let slot = SlotAddr::encode(sector, bit);
                assert_eq!(slot.sector(), sector, "sector for ({}, {})", sector, bit);
                assert_eq!(slot.bit(), bit, "bit for ({}, {})", sector, bit);
            }
        }
    }

    #[test]
    fn test_slot_addr_roundtrip_random() {
        let mut rng = rand::thread_rng();
        for _ in 0..1_000_000 {
            let sector: i16 = rng.gen();
            let bit: u16 = rng.gen();
            let slot = SlotAddr::encode(sector, bit);
            assert_eq!((slot.sector(), slot.bit()), (sector, bit));
        }
    }

    #[test]
    fn test_zero_is_never_live() {
        // Sector indices handed out by the manager start at 0, so the
        // encoded slot half is always non-zero.
        for bit in 0..=u16::MAX {
            assert_ne!(SlotAddr::encode(0, bit).0, 0);
        }
    }

    #[test]
    fn test_addr_packing() {
        let slot = SlotAddr::encode(3, 17);
        let addr = Addr::new(slot, 5000);
        assert_eq!(addr.sector(), 3);
        assert_eq!(addr.slot_bit(), 17);
        assert_eq!(addr.len(), 5000);
        assert!(addr.is_blob());
        assert_eq!(Addr::from_raw(addr.to_raw()), addr);

        let small = Addr::new(slot, 4096);
        assert!(!small.is_blob());
    }

    #[test]
    fn test_addr_display() {
        let addr = Addr::new(SlotAddr::encode(1, 2), 3);
        assert_eq!(format!("{}", addr), "Addr(sector=1, slot=2, len=3)");
    }
}
