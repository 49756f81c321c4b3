//! Bounded source of sector backing buffers
//!
//! Sector buffers are leased from an explicit pool handed to the manager
//! at construction time, never from a process-wide singleton. The pool
//! bounds how many buffers may be outstanding at once and caches returned
//! buffers for reuse.

use parking_lot::Mutex;
use tracing::{debug, info};

/// Bounded lease/return pool of fixed-size buffers.
pub struct BufferPool {
    buffer_size: usize,
    capacity: usize,
    state: Mutex<PoolState>,
}

struct PoolState {
    cached: Vec<Box<[u8]>>,
    leased: usize,
}

impl BufferPool {
    /// Create a pool of up to `capacity` buffers of `buffer_size` bytes.
    pub fn new(buffer_size: usize, capacity: usize) -> Self {
        info!(buffer_size, capacity, "Creating buffer pool");
        Self {
            buffer_size,
            capacity,
            state: Mutex::new(PoolState {
                cached: Vec::new(),
                leased: 0,
            }),
        }
    }

    /// Lease one buffer, or `None` when `capacity` buffers are already
    /// outstanding.
    pub fn lease(&self) -> Option<Box<[u8]>> {
        let mut state = self.state.lock();
        if state.leased == self.capacity {
            debug!(capacity = self.capacity, "Buffer pool exhausted");
            return None;
        }
        state.leased += 1;
        let buf = state
            .cached
            .pop()
            .unwrap_or_else(|| vec![0u8; self.buffer_size].into_boxed_slice());
        Some(buf)
    }

    /// Return a previously leased buffer to the pool.
    pub fn release(&self, buf: Box<[u8]>) {
        debug_assert_eq!(buf.len(), self.buffer_size);
        let mut state = self.state.lock();
        debug_assert!(state.leased > 0);
        state.leased -= 1;
        state.cached.push(buf);
    }

    /// Size of each buffer in bytes.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Maximum number of buffers that may be outstanding.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffers currently leased out.
    pub fn leased(&self) -> usize {
        self.state.lock().leased
    }

    /// Buffers still available for lease.
    pub fn available(&self) -> usize {
        self.capacity - self.leased()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_bounds() {
        let pool = BufferPool::new(1024, 2);
        let a = pool.lease().unwrap();
        let b = pool.lease().unwrap();
        assert!(pool.lease().is_none());
        assert_eq!(pool.leased(), 2);
        assert_eq!(pool.available(), 0);

        pool.release(a);
        assert_eq!(pool.available(), 1);
        let c = pool.lease().unwrap();
        assert_eq!(c.len(), 1024);
        pool.release(b);
        pool.release(c);
        assert_eq!(pool.leased(), 0);
    }

    #[test]
    fn test_pool_reuses_buffers() {
        let pool = BufferPool::new(64, 1);
        let buf = pool.lease().unwrap();
        let ptr = buf.as_ptr();
        pool.release(buf);
        let again = pool.lease().unwrap();
        assert_eq!(again.as_ptr(), ptr);
    }
}
