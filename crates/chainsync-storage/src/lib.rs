//! chainsync-storage: sync store backends for ChainSync.
//!
//! Backends:
//! - [`memory`]: in-memory (tests and dev runs, nothing persisted)

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::MemorySyncStore;
