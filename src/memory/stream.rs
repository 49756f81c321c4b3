//! Stream adapters over the memory manager
//!
//! [`MemoryOutputStream`] accumulates bytes of unknown final length,
//! spilling full [`BLOB_SIZE`] links as it goes; `commit()` seals the
//! record and returns its address. A record of exactly one link's worth
//! of bytes stays a single slot, because a full buffer is only spilled
//! when another byte actually arrives.
//!
//! [`MemoryInputStream`] reads a committed record back through the
//! standard `io::Read` trait, walking the chain links transparently.
//!
//! Both implement the std `io` traits so they compose with the usual
//! adapters (buffered readers, compression encoders, and the like).

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use super::address::{Addr, SlotAddr};
use super::context::ContextInner;
use super::manager::MemoryManager;
use super::size_class::BLOB_SIZE;
use crate::error::Result;

/// Appendable sink; `commit()` yields the record's [`Addr`].
///
/// Dropping an uncommitted stream frees any links already written.
pub struct MemoryOutputStream {
    manager: MemoryManager,
    context: Option<Arc<ContextInner>>,
    buf: Vec<u8>,
    links: Vec<SlotAddr>,
    committed: bool,
}

impl MemoryOutputStream {
    pub(crate) fn new(manager: MemoryManager, context: Option<Arc<ContextInner>>) -> Self {
        Self {
            manager,
            context,
            buf: Vec::with_capacity(BLOB_SIZE),
            links: Vec::new(),
            committed: false,
        }
    }

    /// Bytes written so far.
    pub fn bytes_written(&self) -> usize {
        self.links.len() * BLOB_SIZE + self.buf.len()
    }

    fn spill_link(&mut self) -> Result<()> {
        let link = self.manager.inner().alloc_link(&self.buf)?;
        self.links.push(link);
        self.buf.clear();
        Ok(())
    }

    /// Seal the record and return its address. Single-link payloads
    /// (including empty ones) commit as a plain slot allocation; longer
    /// ones get a chain header.
    pub fn commit(mut self) -> Result<Addr> {
        let addr = if self.links.is_empty() {
            self.manager.inner().allocate_data(&self.buf, true)?
        } else {
            let total = self.bytes_written();
            self.spill_link()?;
            self.manager.inner().commit_blob(&self.links, total)?
        };
        self.committed = true;
        if let Some(context) = &self.context {
            context.track(addr);
        }
        debug!(%addr, "Committed output stream");
        Ok(addr)
    }
}

impl io::Write for MemoryOutputStream {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut rest = data;
        while !rest.is_empty() {
            if self.buf.len() == BLOB_SIZE {
                self.spill_link().map_err(io::Error::from)?;
            }
            let take = rest.len().min(BLOB_SIZE - self.buf.len());
            self.buf.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // Nothing to push downstream; the record only exists at commit.
        Ok(())
    }
}

impl Drop for MemoryOutputStream {
    fn drop(&mut self) {
        if !self.committed && !self.links.is_empty() {
            debug!(links = self.links.len(), "Dropping uncommitted output stream");
            self.manager.inner().release_links(&self.links);
        }
    }
}

/// Readable view of one committed record.
pub struct MemoryInputStream {
    segments: Vec<Bytes>,
    index: usize,
    offset: usize,
}

impl MemoryInputStream {
    pub(crate) fn new(segments: Vec<Bytes>) -> Self {
        Self {
            segments,
            index: 0,
            offset: 0,
        }
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        let mut total = 0;
        for (i, segment) in self.segments.iter().enumerate().skip(self.index) {
            total += segment.len();
            if i == self.index {
                total -= self.offset;
            }
        }
        total
    }
}

impl io::Read for MemoryInputStream {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < out.len() && self.index < self.segments.len() {
            let segment = &self.segments[self.index];
            let available = segment.len() - self.offset;
            if available == 0 {
                self.index += 1;
                self.offset = 0;
                continue;
            }
            let take = available.min(out.len() - filled);
            out[filled..filled + take]
                .copy_from_slice(&segment[self.offset..self.offset + take]);
            self.offset += take;
            filled += take;
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::pool::BufferPool;
    use crate::memory::size_class::SEED_BYTES;
    use std::io::{Read, Write};

    fn manager() -> MemoryManager {
        let pool = Arc::new(BufferPool::new(SEED_BYTES, 2));
        MemoryManager::new(pool, 2).unwrap()
    }

    #[test]
    fn test_small_record_roundtrip() {
        let mm = manager();
        let mut out = mm.output_stream();
        out.write_all(b"streamed bytes").unwrap();
        let addr = out.commit().unwrap();
        assert_eq!(addr.len(), 14);
        assert_eq!(mm.read(addr).unwrap(), b"streamed bytes");
        mm.free(addr).unwrap();
    }

    #[test]
    fn test_exact_link_size_stays_single_slot() {
        let mm = manager();
        let payload = vec![5u8; BLOB_SIZE];
        let mut out = mm.output_stream();
        out.write_all(&payload).unwrap();
        let addr = out.commit().unwrap();
        assert_eq!(mm.get(addr).unwrap().len(), 1);
        assert_eq!(mm.read(addr).unwrap(), payload);
        mm.free(addr).unwrap();
    }

    #[test]
    fn test_chained_record_matches_direct_allocation() {
        let mm = manager();
        let payload: Vec<u8> = (0..3 * BLOB_SIZE + 33).map(|i| (i % 256) as u8).collect();

        let mut out = mm.output_stream();
        // Dribble the bytes in to exercise the internal buffering.
        for chunk in payload.chunks(1000) {
            out.write_all(chunk).unwrap();
        }
        assert_eq!(out.bytes_written(), payload.len());
        let streamed = out.commit().unwrap();

        let direct = mm.allocate(&payload).unwrap();
        assert_eq!(mm.read(streamed).unwrap(), mm.read(direct).unwrap());
        assert_eq!(
            mm.allocation_size(streamed).unwrap(),
            mm.allocation_size(direct).unwrap()
        );

        mm.free(streamed).unwrap();
        mm.free(direct).unwrap();
        assert_eq!(mm.slot_bytes(), 0);
    }

    #[test]
    fn test_empty_stream_commits_empty_record() {
        let mm = manager();
        let addr = mm.output_stream().commit().unwrap();
        assert!(addr.is_empty());
        assert_eq!(mm.read(addr).unwrap(), Vec::<u8>::new());
        mm.free(addr).unwrap();
    }

    #[test]
    fn test_abandoned_stream_frees_links() {
        let mm = manager();
        {
            let mut out = mm.output_stream();
            out.write_all(&vec![1u8; 2 * BLOB_SIZE + 1]).unwrap();
            // Dropped without commit.
        }
        assert_eq!(mm.slot_bytes(), 0);
        assert_eq!(mm.sector_count(), 0);
    }

    #[test]
    fn test_input_stream_walks_links() {
        let mm = manager();
        let payload: Vec<u8> = (0..2 * BLOB_SIZE + 77).map(|i| (i % 251) as u8).collect();
        let addr = mm.allocate(&payload).unwrap();

        let mut input = mm.input_stream(addr).unwrap();
        assert_eq!(input.remaining(), payload.len());
        let mut back = Vec::new();
        let mut chunk = [0u8; 513];
        loop {
            let n = input.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            back.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(back, payload);
        assert_eq!(input.remaining(), 0);
        mm.free(addr).unwrap();
    }

    #[test]
    fn test_context_stream_is_tracked() {
        let mm = manager();
        let ctx = mm.create_allocation_context();
        let mut out = ctx.output_stream();
        out.write_all(b"tracked").unwrap();
        let addr = out.commit().unwrap();
        assert_eq!(ctx.allocation_count(), 1);
        assert_eq!(ctx.read(addr).unwrap(), b"tracked");
        ctx.clear();
        assert_eq!(mm.allocation_count(), 0);
    }
}
