//! Allocation contexts
//!
//! A context is a scoped view over one manager: it remembers what it
//! allocated so the whole scope can be released at once, and in isolated
//! mode it session-protects freed slots so their storage is not recycled
//! until the context detaches. Readers holding old addresses therefore
//! never observe another context's data through a reused slot.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use super::address::{Addr, SlotAddr};
use super::manager::MemoryManager;
use super::stream::{MemoryInputStream, MemoryOutputStream};
use crate::error::Result;

/// Scoped allocation view over a [`MemoryManager`].
///
/// Detaches on drop; explicit [`detach`](Self::detach) is idempotent.
pub struct AllocationContext {
    inner: Arc<ContextInner>,
}

pub(crate) struct ContextInner {
    manager: MemoryManager,
    isolated: bool,
    state: Mutex<ContextState>,
}

struct ContextState {
    /// Addresses allocated through this context and still live.
    tracked: Vec<Addr>,
    /// Slots freed under session protection, pending detach.
    held: Vec<SlotAddr>,
    /// Nested contexts created from this one; a parent's `clear`
    /// spans them while they remain attached.
    children: Vec<Weak<ContextInner>>,
    detached: bool,
}

impl AllocationContext {
    pub(crate) fn new(manager: MemoryManager, isolated: bool) -> Self {
        debug!(isolated, "Creating allocation context");
        Self {
            inner: Arc::new(ContextInner {
                manager,
                isolated,
                state: Mutex::new(ContextState {
                    tracked: Vec::new(),
                    held: Vec::new(),
                    children: Vec::new(),
                    detached: false,
                }),
            }),
        }
    }

    /// Whether frees through this context are session-protected.
    pub fn isolated(&self) -> bool {
        self.inner.isolated
    }

    /// Allocate through this context, blocking until capacity is
    /// available.
    pub fn allocate(&self, data: &[u8]) -> Result<Addr> {
        self.allocate_opts(data, true)
    }

    /// Allocate with explicit blocking behavior.
    pub fn allocate_opts(&self, data: &[u8], blocking: bool) -> Result<Addr> {
        let addr = self.inner.manager.inner().allocate_data(data, blocking)?;
        self.inner.track(addr);
        Ok(addr)
    }

    /// Free an allocation. In isolated mode the slots stay out of
    /// circulation until the context detaches, so the address cannot be
    /// handed out again while this context lives.
    pub fn free(&self, addr: Addr) -> Result<()> {
        let mut state = self.inner.state.lock();
        if self.inner.isolated && !state.detached {
            let state = &mut *state;
            self.inner
                .manager
                .inner()
                .free_addr(addr, Some(&mut state.held))?;
            state.tracked.retain(|a| *a != addr);
        } else {
            self.inner.manager.inner().free_addr(addr, None)?;
            state.tracked.retain(|a| *a != addr);
        }
        Ok(())
    }

    pub fn read(&self, addr: Addr) -> Result<Vec<u8>> {
        self.inner.manager.read(addr)
    }

    pub fn get(&self, addr: Addr) -> Result<Vec<Bytes>> {
        self.inner.manager.get(addr)
    }

    pub fn allocation_size(&self, addr: Addr) -> Result<usize> {
        self.inner.manager.allocation_size(addr)
    }

    /// Number of live allocations made through this context.
    pub fn allocation_count(&self) -> usize {
        self.inner.state.lock().tracked.len()
    }

    /// Free every allocation made through this context and release any
    /// session-held slots. The scope spans its nested contexts: any
    /// still-attached child is cleared as well.
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// End the context's session: held slots return to the free pool and
    /// become reusable. Allocations made through the context stay live.
    pub fn detach(&self) {
        let held = {
            let mut state = self.inner.state.lock();
            if state.detached {
                return;
            }
            state.detached = true;
            std::mem::take(&mut state.held)
        };
        if !held.is_empty() {
            self.inner.manager.inner().release_sessions(&held);
        }
        debug!(isolated = self.inner.isolated, "Detached allocation context");
    }

    /// Nested context over the same manager, inheriting the isolation
    /// mode. The parent keeps a weak link so its `clear` spans the
    /// child while the child remains attached.
    pub fn create_allocation_context(&self) -> AllocationContext {
        let child = AllocationContext::new(self.inner.manager.clone(), self.inner.isolated);
        self.inner.state.lock().children.push(Arc::downgrade(&child.inner));
        child
    }

    /// Appendable sink whose committed record is tracked by this
    /// context.
    pub fn output_stream(&self) -> MemoryOutputStream {
        MemoryOutputStream::new(self.inner.manager.clone(), Some(self.inner.clone()))
    }

    pub fn input_stream(&self, addr: Addr) -> Result<MemoryInputStream> {
        self.inner.manager.input_stream(addr)
    }
}

impl ContextInner {
    pub(crate) fn track(&self, addr: Addr) {
        self.state.lock().tracked.push(addr);
    }

    fn clear(&self) {
        let (tracked, held, children) = {
            let mut state = self.state.lock();
            state.children.retain(|child| child.upgrade().is_some());
            (
                std::mem::take(&mut state.tracked),
                std::mem::take(&mut state.held),
                state.children.clone(),
            )
        };
        for addr in tracked {
            // An address may have been freed directly through the
            // manager; stale entries are not an error here.
            let _ = self.manager.free(addr);
        }
        if !held.is_empty() {
            self.manager.inner().release_sessions(&held);
        }
        for child in children {
            if let Some(child) = child.upgrade() {
                if !child.state.lock().detached {
                    child.clear();
                }
            }
        }
        debug!("Cleared allocation context");
    }
}

impl Drop for AllocationContext {
    fn drop(&mut self) {
        self.detach();
    }
}
