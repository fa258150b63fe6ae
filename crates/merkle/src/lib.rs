//! Chunked merkle hashing engine for the vmap virtual map.
//!
//! A virtual map is an implicit, densely-numbered complete binary tree: leaves
//! hold key/value records, internal nodes hold hashes, and no node objects
//! exist — every node is addressed by an integer [`Path`]. Internal-node
//! hashes are stored in fixed-capacity [`HashChunk`]s so a storage layer can
//! persist them compactly, indexed by a sequential chunk ID instead of sparse
//! tree paths.
//!
//! The [`VirtualHasher`] recomputes the root hash after a batch of leaf
//! mutations without rehashing untouched subtrees:
//!
//! ```text
//! sorted dirty leaves ──► VirtualHasher ──► root hash
//!                            │    ▲
//!            finalized chunks│    │unchanged sibling hashes
//!                            ▼    │
//!                     HashListener chunk reader
//! ```
//!
//! Hashing is deterministic: for a fixed leaf range, dirty set, and storage
//! state, every invocation produces the same root hash.

#![warn(missing_docs)]

mod chunk;
mod combine;
mod config;
mod hasher;
mod leaf;
mod listener;
mod path;

pub use chunk::{
    chunk_id_to_chunk_path, chunk_path_to_chunk_id, min_chunk_id_for_paths, path_to_chunk_id,
    path_to_chunk_path, ChunkError, HashChunk,
};
pub use combine::{
    empty_root_hash, hash_internal, hash_leaf, LEAF_MARKER, ONE_CHILD_MARKER,
    TWO_CHILDREN_MARKER,
};
pub use config::{ConfigError, VirtualMapConfig, MAX_CHUNK_HEIGHT};
pub use hasher::{HashError, VirtualHasher};
pub use leaf::{LeafRecord, ValueCodec, ValueDecodeError};
pub use listener::{HashListener, NoopHashListener};
pub use path::{Path, INVALID_PATH, ROOT_PATH};

pub use vmap_types::Hash;
