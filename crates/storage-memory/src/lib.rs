//! In-memory data source for the vmap virtual merkle map.
//!
//! Used for tests and deterministic simulation. Chunks are stored under
//! their compact chunk IDs, exactly as a disk-backed chunk store would index
//! them, so the chunk-ID bijection is exercised on every load.

mod source;

pub use source::MemoryDataSource;
