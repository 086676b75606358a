//! IPv4 pool allocator for NexusPointWG.
//!
//! The allocator is stateless: every operation re-reads the pool and its
//! allocations from the store, so mutations made between operations (by
//! other workers or by the synchronizer) are observed. A single operation
//! is not atomic on its own; callers serialize through the config file
//! lock.

mod allocator;
pub mod error;

pub use allocator::PoolAllocator;
pub use error::AllocError;
