// slabmem - Slab-based in-memory byte store
// An off-heap style allocator: fixed-size sectors, size-classed slots,
// blob chaining, allocation contexts and stream adapters.

#![warn(rust_2018_idioms)]

pub mod memory;

// Re-exports for convenience
pub use memory::{
    Addr, AllocationContext, BufferPool, MemoryInputStream, MemoryManager, MemoryOutputStream,
};

/// slabmem error types
pub mod error {
    use thiserror::Error;

    use crate::memory::Addr;

    #[derive(Error, Debug)]
    pub enum Error {
        /// The request can never be satisfied, even with every sector empty.
        #[error("Out of memory: {0}")]
        OutOfMemory(String),

        /// Capacity is temporarily exhausted; only the non-blocking
        /// allocation path raises this. Retryable.
        #[error("Resource exhausted: {0}")]
        ResourceExhausted(String),

        /// The address does not name a live allocation.
        #[error("Invalid address: {0}")]
        InvalidAddress(Addr),

        #[error("Invalid argument: {0}")]
        InvalidArgument(String),
    }

    pub type Result<T> = std::result::Result<T, Error>;

    impl From<Error> for std::io::Error {
        fn from(err: Error) -> Self {
            let kind = match &err {
                Error::OutOfMemory(_) => std::io::ErrorKind::OutOfMemory,
                Error::ResourceExhausted(_) => std::io::ErrorKind::WouldBlock,
                Error::InvalidAddress(_) | Error::InvalidArgument(_) => {
                    std::io::ErrorKind::InvalidInput
                }
            };
            std::io::Error::new(kind, err.to_string())
        }
    }
}
