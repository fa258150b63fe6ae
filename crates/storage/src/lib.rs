//! Storage boundary for the vmap virtual merkle map.
//!
//! This crate defines the persistence abstraction the virtual map is built
//! against, along with listener glue that batches hashing output toward a
//! storage backend.
//!
//! # Design
//!
//! Storage is an implementation detail of the surrounding node, not of the
//! hashing engine. The hasher only sees a chunk-reader function; everything
//! else — leaf lookups, batch commits, snapshots, compaction — goes through
//! [`VirtualDataSource`], implemented by concrete backends such as the
//! in-memory source used for tests and simulation.

#![warn(missing_docs)]

mod buffered;
mod source;

pub use buffered::BufferedHashListener;
pub use source::{DataSourceError, RecordBatch, VirtualDataSource};
