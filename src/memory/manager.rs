//! Memory manager
//!
//! Presents a single logical address space over a growable set of
//! sectors. Small records take one slot; records above [`BLOB_SIZE`]
//! become a chain of links plus a header slot listing the link
//! addresses (big-endian `u32` count, then one `i32` per link), so a
//! chain is reconstructable from bytes alone. A header that outgrows a
//! single slot recurses into a chain of its own.
//!
//! Sector bitmaps sit behind per-sector locks; the sector list, sector
//! creation/retirement and the blocking-allocation condition share one
//! manager-level lock with a generation counter, re-checked in a loop so
//! no wakeup is lost.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use super::address::{Addr, SlotAddr};
use super::context::AllocationContext;
use super::pool::BufferPool;
use super::sector::SectorAllocator;
use super::size_class::{
    blob_link_count, slot_size, tag_for, ALLOC_SIZES, BLOB_SIZE, BLOCK_SLOTS, SEED_BYTES,
};
use super::stream::{MemoryInputStream, MemoryOutputStream};
use crate::error::{Error, Result};

/// Largest sector index the address encoding can carry.
const MAX_SECTOR_INDEX: usize = i16::MAX as usize;

/// Slab-based byte store over pooled fixed-size sectors.
///
/// Cheap to clone; clones share the same sectors and accounting.
#[derive(Clone)]
pub struct MemoryManager {
    inner: Arc<ManagerInner>,
}

pub(crate) struct ManagerInner {
    pool: Arc<BufferPool>,
    sector_size: usize,
    max_sectors: usize,
    state: Mutex<ManagerState>,
    /// Signalled whenever capacity is returned (free, session release,
    /// clear); waiters re-check via the generation counter.
    capacity_freed: Condvar,
    slot_bytes: AtomicU64,
    user_bytes: AtomicU64,
    allocation_count: AtomicU64,
}

struct ManagerState {
    /// Index-stable sector table; retired slots are `None` and reused.
    sectors: Vec<Option<Arc<SectorHandle>>>,
    /// Bumped on every free/retire/clear; lets allocators detect
    /// capacity changes between their scan and their wait.
    generation: u64,
}

struct SectorHandle {
    allocator: Mutex<SectorAllocator>,
}

impl MemoryManager {
    /// Create a manager drawing sector buffers from `pool`, bounded to
    /// `max_sectors` concurrent sectors.
    pub fn new(pool: Arc<BufferPool>, max_sectors: usize) -> Result<Self> {
        if pool.buffer_size() < SEED_BYTES {
            return Err(Error::InvalidArgument(format!(
                "Sector size {} cannot seed one block per class ({} bytes required)",
                pool.buffer_size(),
                SEED_BYTES
            )));
        }
        if max_sectors == 0 || max_sectors > MAX_SECTOR_INDEX + 1 {
            return Err(Error::InvalidArgument(format!(
                "max_sectors must be in 1..={}",
                MAX_SECTOR_INDEX + 1
            )));
        }
        info!(
            sector_size = pool.buffer_size(),
            max_sectors, "Creating memory manager"
        );
        Ok(Self {
            inner: Arc::new(ManagerInner {
                sector_size: pool.buffer_size(),
                pool,
                max_sectors,
                state: Mutex::new(ManagerState {
                    sectors: Vec::new(),
                    generation: 0,
                }),
                capacity_freed: Condvar::new(),
                slot_bytes: AtomicU64::new(0),
                user_bytes: AtomicU64::new(0),
                allocation_count: AtomicU64::new(0),
            }),
        })
    }

    /// Allocate a copy of `data`, blocking until capacity is available.
    /// Zero-length payloads are valid and round-trip.
    pub fn allocate(&self, data: &[u8]) -> Result<Addr> {
        self.inner.allocate_data(data, true)
    }

    /// Allocate with explicit blocking behavior. With `blocking = false`
    /// a temporarily-full manager fails with
    /// [`Error::ResourceExhausted`] instead of waiting.
    pub fn allocate_opts(&self, data: &[u8], blocking: bool) -> Result<Addr> {
        self.inner.allocate_data(data, blocking)
    }

    /// Free a live allocation, walking and freeing every blob link.
    pub fn free(&self, addr: Addr) -> Result<()> {
        self.inner.free_addr(addr, None)
    }

    /// Owned copy of the record's payload, chain links concatenated in
    /// order.
    pub fn read(&self, addr: Addr) -> Result<Vec<u8>> {
        self.inner.read(addr)
    }

    /// One read-only view per underlying slot/link, for incremental
    /// consumption.
    pub fn get(&self, addr: Addr) -> Result<Vec<Bytes>> {
        self.inner.get(addr)
    }

    /// Committed slot capacity of the record (links plus header chain);
    /// always `>=` the requested length.
    pub fn allocation_size(&self, addr: Addr) -> Result<usize> {
        self.inner.committed_bytes(addr.slot(), addr.len(), addr)
    }

    /// Slot capacity currently committed to live allocations. Returns to
    /// 0 once everything is freed and every context detached.
    pub fn slot_bytes(&self) -> u64 {
        self.inner.slot_bytes.load(Ordering::SeqCst)
    }

    /// Application bytes across live allocations.
    pub fn user_bytes(&self) -> u64 {
        self.inner.user_bytes.load(Ordering::SeqCst)
    }

    /// Number of live logical records.
    pub fn allocation_count(&self) -> u64 {
        self.inner.allocation_count.load(Ordering::SeqCst)
    }

    pub fn sector_size(&self) -> usize {
        self.inner.sector_size
    }

    /// Sectors currently backed by a pooled buffer.
    pub fn sector_count(&self) -> usize {
        self.inner.state.lock().sectors.iter().flatten().count()
    }

    pub fn max_sectors(&self) -> usize {
        self.inner.max_sectors
    }

    /// Free every live allocation, retire all sectors to the pool and
    /// reset accounting. Outstanding addresses and contexts become
    /// invalid.
    pub fn clear(&self) {
        self.inner.clear()
    }

    /// Plain nested scope: tracks allocations for bulk release, no
    /// session protection.
    pub fn create_allocation_context(&self) -> AllocationContext {
        AllocationContext::new(self.clone(), false)
    }

    /// Scope with optional session protection: with `isolated = true`,
    /// slots freed through the context stay out of circulation until the
    /// context is detached.
    pub fn new_allocation_context(&self, isolated: bool) -> AllocationContext {
        AllocationContext::new(self.clone(), isolated)
    }

    /// Release the context's session-held slots back to the general
    /// pool. Does not free addresses that are still live.
    pub fn detach_context(&self, context: &AllocationContext) {
        context.detach();
    }

    /// Appendable sink for a record of unknown length; `commit()` yields
    /// the address.
    pub fn output_stream(&self) -> MemoryOutputStream {
        MemoryOutputStream::new(self.clone(), None)
    }

    /// Readable source walking the blob chain transparently.
    pub fn input_stream(&self, addr: Addr) -> Result<MemoryInputStream> {
        Ok(MemoryInputStream::new(self.get(addr)?))
    }

    /// Point-in-time usage report.
    pub fn stats(&self) -> MemoryStats {
        self.inner.stats()
    }

    pub(crate) fn inner(&self) -> &ManagerInner {
        &self.inner
    }
}

impl ManagerInner {
    pub(crate) fn allocate_data(&self, data: &[u8], blocking: bool) -> Result<Addr> {
        if data.len() > u32::MAX as usize {
            return Err(Error::InvalidArgument(format!(
                "Payload of {} bytes exceeds the addressable record length",
                data.len()
            )));
        }
        self.check_capacity(data.len())?;
        let slot = self.alloc_raw(data, blocking)?;
        let addr = Addr::new(slot, data.len() as u32);
        self.user_bytes.fetch_add(data.len() as u64, Ordering::SeqCst);
        self.allocation_count.fetch_add(1, Ordering::SeqCst);
        debug!(%addr, "Allocated");
        Ok(addr)
    }

    /// A request is a permanent out-of-memory when its committed slot
    /// bytes exceed what `max_sectors` empty sectors could ever provide.
    /// Single-slot requests always fit an empty sector.
    fn check_capacity(&self, len: usize) -> Result<()> {
        if len <= BLOB_SIZE {
            return Ok(());
        }
        let extra_blocks = (self.sector_size - SEED_BYTES) / (BLOB_SIZE * BLOCK_SLOTS);
        let per_sector = ((1 + extra_blocks) * BLOCK_SLOTS * BLOB_SIZE) as u64;
        if required_slot_bytes(len) > per_sector * self.max_sectors as u64 {
            return Err(Error::OutOfMemory(format!(
                "{} bytes exceed the total capacity of {} sectors of {} bytes",
                len, self.max_sectors, self.sector_size
            )));
        }
        Ok(())
    }

    fn alloc_raw(&self, data: &[u8], blocking: bool) -> Result<SlotAddr> {
        if data.len() <= BLOB_SIZE {
            let tag = tag_for(data.len())?;
            self.allocate_slot(tag, data, blocking)
        } else {
            self.alloc_blob(data, blocking)
        }
    }

    /// Chains never park while holding partial state: two blocked blobs
    /// could each hold links the other needs and neither would ever
    /// free. Each attempt is non-blocking and releases everything it
    /// committed before the thread waits.
    fn alloc_blob(&self, data: &[u8], blocking: bool) -> Result<SlotAddr> {
        loop {
            let generation = self.state.lock().generation;
            let (result, releases) = self.try_alloc_blob(data);
            match result {
                Err(Error::ResourceExhausted(_)) if blocking => {
                    let mut state = self.state.lock();
                    // Our own unwind bumped the generation once per
                    // released link; any further bump means another
                    // thread changed capacity, so rescan instead of
                    // waiting. The timeout bounds the one race this
                    // cannot see (a sector created without a free).
                    if state.generation == generation + releases {
                        let _ = self
                            .capacity_freed
                            .wait_for(&mut state, Duration::from_millis(10));
                    }
                }
                result => return result,
            }
        }
    }

    /// One non-blocking pass over the whole chain. On failure every
    /// committed link is released; the second value is how many
    /// capacity signals that raised.
    fn try_alloc_blob(&self, data: &[u8]) -> (Result<SlotAddr>, u64) {
        let mut links = Vec::with_capacity(blob_link_count(data.len()));
        let result = (|| {
            for chunk in data.chunks(BLOB_SIZE) {
                let tag = tag_for(chunk.len())?;
                links.push(self.allocate_slot(tag, chunk, false)?);
            }
            self.alloc_header(&links, false)
        })();
        match result {
            Ok(head) => (Ok(head), 0),
            Err(err) => {
                let mut releases = 0;
                for link in &links {
                    if self.free_slot(*link, None).is_ok() {
                        releases += 1;
                    }
                }
                (Err(err), releases)
            }
        }
    }

    /// Blob header: `u32` link count, then each link's `i32` sector
    /// address, big-endian. Recurses when the header itself outgrows a
    /// slot.
    fn alloc_header(&self, links: &[SlotAddr], blocking: bool) -> Result<SlotAddr> {
        let mut header = Vec::with_capacity(4 * (links.len() + 1));
        header.extend_from_slice(&(links.len() as u32).to_be_bytes());
        for link in links {
            header.extend_from_slice(&link.0.to_be_bytes());
        }
        self.alloc_raw(&header, blocking)
    }

    /// Commit a blob whose links were already written (stream path).
    pub(crate) fn commit_blob(&self, links: &[SlotAddr], total_len: usize) -> Result<Addr> {
        debug_assert!(total_len > BLOB_SIZE);
        let head = self.alloc_header(links, true)?;
        let addr = Addr::new(head, total_len as u32);
        self.user_bytes.fetch_add(total_len as u64, Ordering::SeqCst);
        self.allocation_count.fetch_add(1, Ordering::SeqCst);
        debug!(%addr, "Committed stream blob");
        Ok(addr)
    }

    /// Allocate one link slot and copy `chunk` into it (stream path).
    pub(crate) fn alloc_link(&self, chunk: &[u8]) -> Result<SlotAddr> {
        let tag = tag_for(chunk.len())?;
        self.allocate_slot(tag, chunk, true)
    }

    /// Free link slots that never became part of a committed record
    /// (abandoned stream).
    pub(crate) fn release_links(&self, links: &[SlotAddr]) {
        for link in links {
            let _ = self.free_slot(*link, None);
        }
    }

    /// First-fit over sectors in ascending index order; creates a sector
    /// when none has room, waits (blocking mode) when the sector budget
    /// and pool are exhausted.
    fn allocate_slot(&self, tag: u8, data: &[u8], blocking: bool) -> Result<SlotAddr> {
        loop {
            let (sectors, generation) = {
                let state = self.state.lock();
                (
                    state
                        .sectors
                        .iter()
                        .flatten()
                        .cloned()
                        .collect::<Vec<_>>(),
                    state.generation,
                )
            };

            for handle in &sectors {
                let mut allocator = handle.allocator.lock();
                if let Some(bit) = allocator.alloc(tag) {
                    allocator.write(bit, data);
                    let slot = SlotAddr::encode(allocator.index(), bit);
                    drop(allocator);
                    self.slot_bytes
                        .fetch_add(slot_size(tag) as u64, Ordering::SeqCst);
                    return Ok(slot);
                }
            }

            let mut state = self.state.lock();
            let active = state.sectors.iter().flatten().count();
            if state.generation != generation || active != sectors.len() {
                // Capacity changed while scanning (a free, or a sector
                // created by another thread); rescan before deciding to
                // create, fail or wait.
                continue;
            }

            if active < self.max_sectors {
                if let Some(buffer) = self.pool.lease() {
                    let index = state
                        .sectors
                        .iter()
                        .position(Option::is_none)
                        .unwrap_or_else(|| {
                            state.sectors.push(None);
                            state.sectors.len() - 1
                        });
                    let mut allocator = SectorAllocator::new(index as i16, buffer);
                    // Fresh sectors seed every class, so this cannot miss.
                    let Some(bit) = allocator.alloc(tag) else {
                        if let Some(buffer) = allocator.retire() {
                            self.pool.release(buffer);
                        }
                        return Err(Error::ResourceExhausted(
                            "Fresh sector refused allocation".to_string(),
                        ));
                    };
                    allocator.write(bit, data);
                    let slot = SlotAddr::encode(index as i16, bit);
                    state.sectors[index] = Some(Arc::new(SectorHandle {
                        allocator: Mutex::new(allocator),
                    }));
                    debug!(sector = index, "Created sector");
                    self.slot_bytes
                        .fetch_add(slot_size(tag) as u64, Ordering::SeqCst);
                    return Ok(slot);
                }
            }

            if !blocking {
                return Err(Error::ResourceExhausted(format!(
                    "No sector can serve a {} byte slot",
                    slot_size(tag)
                )));
            }
            self.capacity_freed.wait(&mut state);
        }
    }

    fn handle(&self, slot: SlotAddr, err_addr: Addr) -> Result<Arc<SectorHandle>> {
        let sector = slot.sector();
        if sector < 0 {
            return Err(Error::InvalidAddress(err_addr));
        }
        self.state
            .lock()
            .sectors
            .get(sector as usize)
            .and_then(Clone::clone)
            .ok_or(Error::InvalidAddress(err_addr))
    }

    /// Clear one slot. With a `held` sink the slot stays session-held
    /// and is recorded for the owning context instead of returning to
    /// the free pool.
    fn free_slot(&self, slot: SlotAddr, held: Option<&mut Vec<SlotAddr>>) -> Result<usize> {
        let err_addr = Addr::new(slot, 0);
        let handle = self.handle(slot, err_addr)?;
        let mut allocator = handle.allocator.lock();
        let protected = held.is_some();
        let size = allocator
            .free(slot.bit(), protected)
            .ok_or(Error::InvalidAddress(err_addr))?;
        let maybe_empty = allocator.is_empty();
        drop(allocator);
        if let Some(held) = held {
            held.push(slot);
        }
        self.slot_bytes.fetch_sub(size as u64, Ordering::SeqCst);
        self.signal_capacity(slot.sector(), maybe_empty);
        Ok(size)
    }

    /// Bump the generation, retire the sector if it went empty, wake
    /// blocked allocators.
    fn signal_capacity(&self, sector: i16, maybe_empty: bool) {
        let mut state = self.state.lock();
        state.generation += 1;
        if maybe_empty {
            self.retire_if_empty(&mut state, sector);
        }
        self.capacity_freed.notify_all();
    }

    /// Re-checks emptiness under both locks: a racing allocator may have
    /// taken a slot since the caller observed the sector empty.
    fn retire_if_empty(&self, state: &mut ManagerState, sector: i16) {
        let index = sector as usize;
        let Some(handle) = state.sectors.get(index).and_then(Clone::clone) else {
            return;
        };
        let mut allocator = handle.allocator.lock();
        if allocator.is_empty() {
            if let Some(buffer) = allocator.retire() {
                state.sectors[index] = None;
                self.pool.release(buffer);
                debug!(sector = index, "Retired empty sector");
            }
        }
    }

    pub(crate) fn free_addr(&self, addr: Addr, mut held: Option<&mut Vec<SlotAddr>>) -> Result<()> {
        let mut slots = Vec::new();
        self.collect_slots(addr.slot(), addr.len(), &mut slots, addr)?;
        for slot in slots {
            self.free_slot(slot, held.as_deref_mut())?;
        }
        self.user_bytes
            .fetch_sub(addr.len() as u64, Ordering::SeqCst);
        self.allocation_count.fetch_sub(1, Ordering::SeqCst);
        debug!(%addr, "Freed");
        Ok(())
    }

    /// Every physical slot of a record: chain links in order, then the
    /// header chain. Validates liveness before anything is touched.
    fn collect_slots(
        &self,
        slot: SlotAddr,
        len: usize,
        out: &mut Vec<SlotAddr>,
        err_addr: Addr,
    ) -> Result<()> {
        if len <= BLOB_SIZE {
            self.validate_leaf(slot, len, err_addr)?;
            out.push(slot);
            return Ok(());
        }
        let header_len = header_len_for(len);
        let header = self.read_raw(slot, header_len, err_addr)?;
        for (link, link_len) in parse_header(&header, len, err_addr)? {
            self.collect_slots(link, link_len, out, err_addr)?;
        }
        self.collect_slots(slot, header_len, out, err_addr)
    }

    fn validate_leaf(&self, slot: SlotAddr, len: usize, err_addr: Addr) -> Result<()> {
        let handle = self.handle(slot, err_addr)?;
        let allocator = handle.allocator.lock();
        match allocator.live_slot_size(slot.bit()) {
            Some(size) if size >= len => Ok(()),
            _ => Err(Error::InvalidAddress(err_addr)),
        }
    }

    /// Leaf slots of a (possibly chained) region, in payload order.
    fn resolve_chain(
        &self,
        slot: SlotAddr,
        len: usize,
        out: &mut Vec<(SlotAddr, usize)>,
        err_addr: Addr,
    ) -> Result<()> {
        if len <= BLOB_SIZE {
            self.validate_leaf(slot, len, err_addr)?;
            out.push((slot, len));
            return Ok(());
        }
        let header = self.read_raw(slot, header_len_for(len), err_addr)?;
        for (link, link_len) in parse_header(&header, len, err_addr)? {
            self.resolve_chain(link, link_len, out, err_addr)?;
        }
        Ok(())
    }

    fn copy_leaves(&self, leaves: &[(SlotAddr, usize)], err_addr: Addr) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(leaves.iter().map(|(_, len)| len).sum());
        for &(slot, len) in leaves {
            let handle = self.handle(slot, err_addr)?;
            let allocator = handle.allocator.lock();
            let bytes = allocator
                .read(slot.bit(), len)
                .ok_or(Error::InvalidAddress(err_addr))?;
            out.extend_from_slice(bytes);
        }
        Ok(out)
    }

    fn read_raw(&self, slot: SlotAddr, len: usize, err_addr: Addr) -> Result<Vec<u8>> {
        let mut leaves = Vec::new();
        self.resolve_chain(slot, len, &mut leaves, err_addr)?;
        self.copy_leaves(&leaves, err_addr)
    }

    pub(crate) fn read(&self, addr: Addr) -> Result<Vec<u8>> {
        self.read_raw(addr.slot(), addr.len(), addr)
    }

    pub(crate) fn get(&self, addr: Addr) -> Result<Vec<Bytes>> {
        let mut leaves = Vec::new();
        self.resolve_chain(addr.slot(), addr.len(), &mut leaves, addr)?;
        let mut views = Vec::with_capacity(leaves.len());
        for (slot, len) in leaves {
            let handle = self.handle(slot, addr)?;
            let allocator = handle.allocator.lock();
            let bytes = allocator
                .read(slot.bit(), len)
                .ok_or(Error::InvalidAddress(addr))?;
            views.push(Bytes::copy_from_slice(bytes));
        }
        Ok(views)
    }

    /// Committed capacity: leaf slot sizes plus the header chain's own
    /// slots.
    pub(crate) fn committed_bytes(&self, slot: SlotAddr, len: usize, err_addr: Addr) -> Result<usize> {
        if len <= BLOB_SIZE {
            let handle = self.handle(slot, err_addr)?;
            let allocator = handle.allocator.lock();
            return allocator
                .live_slot_size(slot.bit())
                .ok_or(Error::InvalidAddress(err_addr));
        }
        let header_len = header_len_for(len);
        let header = self.read_raw(slot, header_len, err_addr)?;
        let mut total = self.committed_bytes(slot, header_len, err_addr)?;
        for (link, link_len) in parse_header(&header, len, err_addr)? {
            total += self.committed_bytes(link, link_len, err_addr)?;
        }
        Ok(total)
    }

    /// Return session-held slots to the free pool (context detach or
    /// clear). Slots whose sector is already gone (manager cleared) are
    /// skipped.
    pub(crate) fn release_sessions(&self, slots: &[SlotAddr]) {
        let mut touched = Vec::new();
        for &slot in slots {
            let Ok(handle) = self.handle(slot, Addr::new(slot, 0)) else {
                continue;
            };
            let mut allocator = handle.allocator.lock();
            if allocator.release_session(slot.bit()) && allocator.is_empty() {
                touched.push(slot.sector());
            }
        }
        let mut state = self.state.lock();
        state.generation += 1;
        for sector in touched {
            self.retire_if_empty(&mut state, sector);
        }
        self.capacity_freed.notify_all();
    }

    pub(crate) fn clear(&self) {
        let mut state = self.state.lock();
        for entry in state.sectors.iter_mut() {
            if let Some(handle) = entry.take() {
                let mut allocator = handle.allocator.lock();
                if let Some(buffer) = allocator.retire() {
                    self.pool.release(buffer);
                }
            }
        }
        self.slot_bytes.store(0, Ordering::SeqCst);
        self.user_bytes.store(0, Ordering::SeqCst);
        self.allocation_count.store(0, Ordering::SeqCst);
        state.generation += 1;
        self.capacity_freed.notify_all();
        info!("Cleared memory manager");
    }

    fn stats(&self) -> MemoryStats {
        let handles: Vec<_> = self.state.lock().sectors.iter().flatten().cloned().collect();
        let sectors = handles
            .iter()
            .map(|handle| {
                let allocator = handle.allocator.lock();
                SectorStats {
                    index: allocator.index(),
                    live_slots: allocator.live_slots(),
                    held_slots: allocator.held_slots(),
                    reserved_bytes: allocator.reserved_bytes(),
                    allocations: allocator.allocation_count(),
                    recycles: allocator.recycle_count(),
                }
            })
            .collect::<Vec<_>>();
        MemoryStats {
            slot_bytes: self.slot_bytes.load(Ordering::SeqCst),
            user_bytes: self.user_bytes.load(Ordering::SeqCst),
            allocation_count: self.allocation_count.load(Ordering::SeqCst),
            sector_count: sectors.len(),
            max_sectors: self.max_sectors,
            sector_size: self.sector_size,
            sectors,
        }
    }
}

fn header_len_for(len: usize) -> usize {
    4 * (blob_link_count(len) + 1)
}

/// Decode a blob header into `(link, link_len)` pairs in payload order.
fn parse_header(header: &[u8], len: usize, err_addr: Addr) -> Result<Vec<(SlotAddr, usize)>> {
    let expected = blob_link_count(len);
    if header.len() != 4 * (expected + 1) {
        return Err(Error::InvalidAddress(err_addr));
    }
    let count = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if count != expected {
        return Err(Error::InvalidAddress(err_addr));
    }
    let mut links = Vec::with_capacity(count);
    let mut remaining = len;
    for i in 0..count {
        let base = 4 + 4 * i;
        let raw = i32::from_be_bytes([
            header[base],
            header[base + 1],
            header[base + 2],
            header[base + 3],
        ]);
        let link_len = remaining.min(BLOB_SIZE);
        remaining -= link_len;
        links.push((SlotAddr(raw), link_len));
    }
    Ok(links)
}

/// Slot bytes a request of `len` commits once allocated.
fn required_slot_bytes(len: usize) -> u64 {
    if len <= BLOB_SIZE {
        return ALLOC_SIZES
            .iter()
            .find(|&&size| len <= size)
            .copied()
            .unwrap_or(BLOB_SIZE) as u64;
    }
    let links = blob_link_count(len);
    let tail = len - (links - 1) * BLOB_SIZE;
    ((links - 1) * BLOB_SIZE) as u64
        + required_slot_bytes(tail)
        + required_slot_bytes(4 * (links + 1))
}

/// Point-in-time usage report for the whole manager.
#[derive(Debug)]
pub struct MemoryStats {
    pub slot_bytes: u64,
    pub user_bytes: u64,
    pub allocation_count: u64,
    pub sector_count: usize,
    pub max_sectors: usize,
    pub sector_size: usize,
    pub sectors: Vec<SectorStats>,
}

#[derive(Debug, Clone, Copy)]
pub struct SectorStats {
    pub index: i16,
    pub live_slots: u32,
    pub held_slots: u32,
    pub reserved_bytes: usize,
    pub allocations: u64,
    pub recycles: u64,
}
