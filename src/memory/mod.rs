//! Slab-based memory manager
//!
//! Manages byte records in fixed-size in-memory sectors. Each sector is
//! subdivided into 32-slot blocks bound to one of a small set of size
//! classes, tracked by a bitmap. Records larger than one slot are chained
//! across slots ("blobs"); allocation contexts scope groups of records
//! for bulk release and session-protected recycling.
//!
//! # Architecture
//!
//! ```text
//! MemoryManager
//!   ├─→ Sector #0 ─→ SectorAllocator (bitmap per 32-slot block)
//!   │                  ├─→ block[64B]   bits: 0b0011...
//!   │                  ├─→ block[128B]  bits: 0b0000...
//!   │                  └─→ block[4096B] bits: 0b1111...
//!   ├─→ Sector #1 ...
//!   └─→ BufferPool (bounded lease/return of sector buffers)
//!
//! AllocationContext (nested, optional isolation)
//!   └─→ tracked addrs, session-held slots
//!
//! MemoryOutputStream / MemoryInputStream
//!   └─→ chunked writes → blob chain → contiguous reads
//! ```
//!
//! Addresses encode (sector index, slot bit, payload length) and remain
//! opaque to callers; a blob address points at a header slot listing the
//! chain links.

pub mod address;
pub mod context;
pub mod manager;
pub mod pool;
pub mod sector;
pub mod size_class;
pub mod stream;

pub use address::Addr;
pub use context::AllocationContext;
pub use manager::{MemoryManager, MemoryStats, SectorStats};
pub use pool::BufferPool;
pub use size_class::{ALLOC_SIZES, BLOB_SIZE};
pub use stream::{MemoryInputStream, MemoryOutputStream};
