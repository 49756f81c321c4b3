//! Per-sector bitmap allocator
//!
//! One `SectorAllocator` owns one fixed-size backing buffer and partitions
//! it into 32-slot blocks, each block bound to a single size class and
//! tracked by one bitmap word. Two bitmaps are kept: `live` holds the
//! currently-allocated bits, `session` holds `live` plus bits that were
//! freed under session protection and must not be handed out again until
//! their context detaches. Allocation scans `session`, so held slots are
//! never reused early.
//!
//! On creation a sector seeds one block of every class; further blocks
//! are committed on demand while buffer capacity remains.

use tracing::trace;

use super::size_class::{slot_size, ALLOC_SIZES, BLOCK_SLOTS, NUM_CLASSES, SEED_BYTES};

/// Hard cap on blocks per sector: slot bits must fit in 16 bits.
const MAX_BLOCKS: usize = (1 << 16) / BLOCK_SLOTS;

pub struct SectorAllocator {
    index: i16,
    buffer: Option<Box<[u8]>>,
    capacity: usize,
    /// Size-class tag of each committed block.
    tags: Vec<u8>,
    /// Byte offset of each committed block within the buffer.
    block_offsets: Vec<u32>,
    /// Currently-allocated bits, one word per block.
    live: Vec<u32>,
    /// `live` plus session-held bits.
    session: Vec<u32>,
    free: [u32; NUM_CLASSES],
    total_blocks: [u32; NUM_CLASSES],
    allocations: [u64; NUM_CLASSES],
    recycles: [u64; NUM_CLASSES],
    /// Bytes committed to blocks so far.
    reserved: usize,
    live_slots: u32,
    held_slots: u32,
    retired: bool,
}

impl SectorAllocator {
    /// Requires `buffer.len() >= SEED_BYTES` (checked by the manager).
    pub(crate) fn new(index: i16, buffer: Box<[u8]>) -> Self {
        debug_assert!(buffer.len() >= SEED_BYTES);
        let capacity = buffer.len();
        let mut sector = Self {
            index,
            buffer: Some(buffer),
            capacity,
            tags: Vec::new(),
            block_offsets: Vec::new(),
            live: Vec::new(),
            session: Vec::new(),
            free: [0; NUM_CLASSES],
            total_blocks: [0; NUM_CLASSES],
            allocations: [0; NUM_CLASSES],
            recycles: [0; NUM_CLASSES],
            reserved: 0,
            live_slots: 0,
            held_slots: 0,
            retired: false,
        };
        for tag in 0..NUM_CLASSES as u8 {
            sector.add_block(tag);
        }
        sector
    }

    fn add_block(&mut self, tag: u8) -> bool {
        let block_bytes = slot_size(tag) * BLOCK_SLOTS;
        if self.retired
            || self.tags.len() == MAX_BLOCKS
            || self.reserved + block_bytes > self.capacity
        {
            return false;
        }
        self.tags.push(tag);
        self.block_offsets.push(self.reserved as u32);
        self.live.push(0);
        self.session.push(0);
        self.reserved += block_bytes;
        self.free[tag as usize] += BLOCK_SLOTS as u32;
        self.total_blocks[tag as usize] += 1;
        trace!(
            sector = self.index,
            class = ALLOC_SIZES[tag as usize],
            "Committed block"
        );
        true
    }

    /// First free slot of the class, or `None` when this sector cannot
    /// serve it. Marks the bit used in both bitmaps.
    pub(crate) fn alloc(&mut self, tag: u8) -> Option<u16> {
        if self.retired {
            return None;
        }
        if self.free[tag as usize] == 0 && !self.add_block(tag) {
            return None;
        }
        for block in 0..self.tags.len() {
            if self.tags[block] != tag {
                continue;
            }
            let word = self.session[block];
            if word == u32::MAX {
                continue;
            }
            let offset = (!word).trailing_zeros();
            let bit = (block * BLOCK_SLOTS) as u16 + offset as u16;
            self.live[block] |= 1 << offset;
            self.session[block] |= 1 << offset;
            self.free[tag as usize] -= 1;
            self.live_slots += 1;
            self.allocations[tag as usize] += 1;
            // Keep a block of this class in reserve where possible, as a
            // cheap sector-fullness signal for the manager.
            if self.free[tag as usize] == 0 {
                self.add_block(tag);
            }
            trace!(sector = self.index, bit, "Set bit");
            return Some(bit);
        }
        None
    }

    /// Clear a live bit. With `session_protected` the slot stays out of
    /// circulation (its `session` bit remains set) until
    /// [`release_session`](Self::release_session). Returns the slot
    /// capacity, or `None` when the bit is not live.
    pub(crate) fn free(&mut self, bit: u16, session_protected: bool) -> Option<usize> {
        let (block, mask) = self.locate(bit)?;
        if self.live[block] & mask == 0 {
            return None;
        }
        self.live[block] &= !mask;
        self.live_slots -= 1;
        let tag = self.tags[block] as usize;
        if session_protected {
            self.held_slots += 1;
        } else {
            self.session[block] &= !mask;
            self.free[tag] += 1;
            self.recycles[tag] += 1;
        }
        trace!(
            sector = self.index,
            bit,
            session_protected,
            "Cleared bit"
        );
        Some(ALLOC_SIZES[tag])
    }

    /// Return one session-held slot to the free pool. Returns `false` if
    /// the bit is not currently held.
    pub(crate) fn release_session(&mut self, bit: u16) -> bool {
        let Some((block, mask)) = self.locate(bit) else {
            return false;
        };
        if self.live[block] & mask != 0 || self.session[block] & mask == 0 {
            return false;
        }
        self.session[block] &= !mask;
        self.held_slots -= 1;
        let tag = self.tags[block] as usize;
        self.free[tag] += 1;
        self.recycles[tag] += 1;
        true
    }

    fn locate(&self, bit: u16) -> Option<(usize, u32)> {
        let block = bit as usize / BLOCK_SLOTS;
        if block >= self.tags.len() {
            return None;
        }
        Some((block, 1 << (bit as usize % BLOCK_SLOTS)))
    }

    pub(crate) fn is_live(&self, bit: u16) -> bool {
        self.locate(bit)
            .map(|(block, mask)| self.live[block] & mask != 0)
            .unwrap_or(false)
    }

    /// Committed capacity of a live slot.
    pub(crate) fn live_slot_size(&self, bit: u16) -> Option<usize> {
        if !self.is_live(bit) {
            return None;
        }
        let block = bit as usize / BLOCK_SLOTS;
        Some(ALLOC_SIZES[self.tags[block] as usize])
    }

    fn byte_offset(&self, bit: u16) -> usize {
        let block = bit as usize / BLOCK_SLOTS;
        let within = bit as usize % BLOCK_SLOTS;
        self.block_offsets[block] as usize + within * ALLOC_SIZES[self.tags[block] as usize]
    }

    /// Copy payload bytes into a just-allocated slot. The caller holds the
    /// sector lock across `alloc` and `write`, so the slot cannot retire
    /// in between.
    pub(crate) fn write(&mut self, bit: u16, data: &[u8]) {
        debug_assert!(self.is_live(bit));
        debug_assert!(data.len() <= self.live_slot_size(bit).unwrap_or(0));
        let offset = self.byte_offset(bit);
        if let Some(buffer) = self.buffer.as_mut() {
            buffer[offset..offset + data.len()].copy_from_slice(data);
        }
    }

    /// Borrow `len` payload bytes of a live slot.
    pub(crate) fn read(&self, bit: u16, len: usize) -> Option<&[u8]> {
        let size = self.live_slot_size(bit)?;
        if len > size {
            return None;
        }
        let offset = self.byte_offset(bit);
        self.buffer.as_ref().map(|b| &b[offset..offset + len])
    }

    /// Whether this sector can serve one more slot of the class.
    pub(crate) fn has_free(&self, tag: u8) -> bool {
        if self.retired {
            return false;
        }
        self.free[tag as usize] > 0
            || (self.tags.len() < MAX_BLOCKS
                && self.reserved + slot_size(tag) * BLOCK_SLOTS <= self.capacity)
    }

    /// No live allocations and no session-held slots.
    pub(crate) fn is_empty(&self) -> bool {
        self.live_slots == 0 && self.held_slots == 0
    }

    /// Detach the backing buffer and refuse all further allocation.
    pub(crate) fn retire(&mut self) -> Option<Box<[u8]>> {
        self.retired = true;
        self.buffer.take()
    }

    pub(crate) fn index(&self) -> i16 {
        self.index
    }

    pub(crate) fn live_slots(&self) -> u32 {
        self.live_slots
    }

    pub(crate) fn held_slots(&self) -> u32 {
        self.held_slots
    }

    pub(crate) fn reserved_bytes(&self) -> usize {
        self.reserved
    }

    pub(crate) fn allocation_count(&self) -> u64 {
        self.allocations.iter().sum()
    }

    pub(crate) fn recycle_count(&self) -> u64 {
        self.recycles.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::size_class::{tag_for, BLOB_SIZE};

    fn sector(capacity: usize) -> SectorAllocator {
        SectorAllocator::new(0, vec![0u8; capacity].into_boxed_slice())
    }

    #[test]
    fn test_seeds_every_class() {
        let s = sector(SEED_BYTES);
        for tag in 0..NUM_CLASSES as u8 {
            assert!(s.has_free(tag));
        }
        assert!(s.is_empty());
        assert_eq!(s.reserved_bytes(), SEED_BYTES);
    }

    #[test]
    fn test_alloc_free_roundtrip() {
        let mut s = sector(SEED_BYTES);
        let bit = s.alloc(tag_for(100).unwrap()).unwrap();
        assert!(s.is_live(bit));
        assert_eq!(s.live_slot_size(bit), Some(128));
        assert!(!s.is_empty());

        s.write(bit, b"hello sector");
        assert_eq!(s.read(bit, 12).unwrap(), b"hello sector");

        assert_eq!(s.free(bit, false), Some(128));
        assert!(!s.is_live(bit));
        assert!(s.read(bit, 12).is_none());
        assert!(s.is_empty());
    }

    #[test]
    fn test_free_bit_is_reused() {
        let mut s = sector(SEED_BYTES);
        let tag = tag_for(64).unwrap();
        let a = s.alloc(tag).unwrap();
        let b = s.alloc(tag).unwrap();
        assert_ne!(a, b);
        s.free(a, false).unwrap();
        assert_eq!(s.alloc(tag), Some(a));
    }

    #[test]
    fn test_double_free_fails() {
        let mut s = sector(SEED_BYTES);
        let bit = s.alloc(0).unwrap();
        assert!(s.free(bit, false).is_some());
        assert!(s.free(bit, false).is_none());
        assert!(s.free(9999, false).is_none());
    }

    #[test]
    fn test_session_protection_defers_reuse() {
        let mut s = sector(SEED_BYTES);
        let tag = tag_for(200).unwrap();
        let bit = s.alloc(tag).unwrap();
        s.free(bit, true).unwrap();

        // Held: not live, not reusable, sector not empty.
        assert!(!s.is_live(bit));
        assert_ne!(s.alloc(tag), Some(bit));
        assert!(!s.is_empty());
        assert_eq!(s.held_slots(), 1);

        assert!(s.release_session(bit));
        assert!(!s.release_session(bit));
        assert_eq!(s.alloc(tag), Some(bit));
    }

    #[test]
    fn test_grows_blocks_on_demand() {
        // Room for the seed plus two extra 64B blocks.
        let mut s = sector(SEED_BYTES + 2 * 64 * BLOCK_SLOTS);
        let mut bits = Vec::new();
        for _ in 0..3 * BLOCK_SLOTS {
            bits.push(s.alloc(0).unwrap());
        }
        // Seed block plus the two on-demand blocks are exhausted.
        assert!(!s.has_free(0));
        assert!(s.alloc(0).is_none());
        // Larger classes were not disturbed.
        assert!(s.has_free(tag_for(BLOB_SIZE).unwrap()));
        for bit in bits {
            s.free(bit, false).unwrap();
        }
        assert!(s.is_empty());
    }

    #[test]
    fn test_retired_sector_refuses_allocation() {
        let mut s = sector(SEED_BYTES);
        let buf = s.retire().unwrap();
        assert_eq!(buf.len(), SEED_BYTES);
        assert!(s.alloc(0).is_none());
        assert!(!s.has_free(0));
        assert!(s.retire().is_none());
    }

    #[test]
    fn test_slot_payloads_do_not_overlap() {
        let mut s = sector(SEED_BYTES);
        let tag = tag_for(1024).unwrap();
        let a = s.alloc(tag).unwrap();
        let b = s.alloc(tag).unwrap();
        s.write(a, &[0xAA; 1024]);
        s.write(b, &[0xBB; 1024]);
        assert!(s.read(a, 1024).unwrap().iter().all(|&x| x == 0xAA));
        assert!(s.read(b, 1024).unwrap().iter().all(|&x| x == 0xBB));
    }
}
