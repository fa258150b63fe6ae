//! Hash chunks.
//!
//! A hash chunk is a dense group of internal-node hashes from a small
//! sub-tree. A chunk is identified by its path — the parent of its two
//! top-most hashes — and a height: the number of ranks it spans. A chunk of
//! height `h` owns `2^h` hash slots, one per node at its bottom rank, laid
//! out left to right in a single flat buffer.
//!
//! Chunk roots sit on a grid of ranks that are multiples of the configured
//! default height. All chunks span the full default height except those
//! truncated by the leaf boundary, which are shorter but still carry a full
//! `2^height` buffer. Paths at interior chunk ranks alias to the slot of
//! their leftmost descendant at the bottom rank; this is how a boundary chunk
//! stores hashes for leaves whose children do not exist.
//!
//! Storing chunks indexed by chunk path would leave enormous gaps, so every
//! chunk also has a compact sequential ID assigned by breadth-first traversal
//! over the tree of chunks: the root chunk has ID 0, its `2^defaultHeight`
//! child chunks have IDs 1.., and so on. [`path_to_chunk_id`] and
//! [`chunk_id_to_chunk_path`] are mutual inverses.

use vmap_types::Hash;

use crate::combine::hash_internal;
use crate::path::{Path, ROOT_PATH};

/// Errors from hash chunk construction and slot access.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    /// Chunk height outside `[1, default_height]`.
    #[error("invalid chunk height {height} (default height {default_height})")]
    InvalidHeight {
        /// The offending height.
        height: u32,
        /// The configured default chunk height.
        default_height: u32,
    },

    /// Chunk path rank not aligned to the chunk grid.
    #[error("chunk path {path} at rank {rank} is not aligned to default height {default_height}")]
    MisalignedPath {
        /// The offending chunk path.
        path: Path,
        /// The rank of that path.
        rank: u32,
        /// The configured default chunk height.
        default_height: u32,
    },

    /// Hash data buffer length does not match the declared height.
    #[error("hash data length {actual} does not match expected {expected}")]
    InvalidDataLength {
        /// Provided buffer length.
        actual: usize,
        /// Required buffer length for the height.
        expected: usize,
    },

    /// A path was requested from a chunk that does not own it.
    #[error("path {path} is not stored in chunk {chunk_path} of height {height}")]
    PathNotInChunk {
        /// The requested path.
        path: Path,
        /// The chunk's path.
        chunk_path: Path,
        /// The chunk's height.
        height: u32,
    },

    /// A slot index outside the chunk's valid range.
    #[error("hash index {index} out of range for chunk with {size} slots")]
    IndexOutOfRange {
        /// The requested index.
        index: usize,
        /// The number of slots in the chunk.
        size: usize,
    },
}

/// A fixed-capacity group of sibling-adjacent hashes spanning `height` ranks
/// below `path`.
#[derive(Clone, PartialEq, Eq)]
pub struct HashChunk {
    path: Path,
    height: u32,
    default_height: u32,
    data: Vec<u8>,
}

impl HashChunk {
    /// Create an empty chunk with zero-filled hash slots.
    pub fn new(path: Path, height: u32, default_height: u32) -> Result<Self, ChunkError> {
        Self::validate_geometry(path, height, default_height)?;
        let data = vec![0u8; Self::slot_count(height) * Hash::BYTES];
        Self::from_hash_data(path, height, default_height, data)
    }

    /// Create a chunk over an existing hash buffer.
    ///
    /// The buffer must hold exactly `2^height` hash slots even for partial
    /// chunks at the leaf boundary.
    pub fn from_hash_data(
        path: Path,
        height: u32,
        default_height: u32,
        data: Vec<u8>,
    ) -> Result<Self, ChunkError> {
        Self::validate_geometry(path, height, default_height)?;
        let expected = Self::slot_count(height) * Hash::BYTES;
        if data.len() != expected {
            return Err(ChunkError::InvalidDataLength {
                actual: data.len(),
                expected,
            });
        }
        Ok(Self {
            path,
            height,
            default_height,
            data,
        })
    }

    fn validate_geometry(path: Path, height: u32, default_height: u32) -> Result<(), ChunkError> {
        if height == 0 || height > default_height || default_height > crate::config::MAX_CHUNK_HEIGHT
        {
            return Err(ChunkError::InvalidHeight {
                height,
                default_height,
            });
        }
        let rank = path.rank();
        if rank % default_height != 0 {
            return Err(ChunkError::MisalignedPath {
                path,
                rank,
                default_height,
            });
        }
        Ok(())
    }

    /// Number of hash slots in a chunk of the given height.
    pub const fn slot_count(height: u32) -> usize {
        1 << height
    }

    /// The chunk's path: the parent of its two top-most hashes.
    pub fn path(&self) -> Path {
        self.path
    }

    /// The number of ranks this chunk spans.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// The configured default chunk height this chunk was created under.
    pub fn default_height(&self) -> u32 {
        self.default_height
    }

    /// The number of hash slots in this chunk.
    pub fn size(&self) -> usize {
        Self::slot_count(self.height)
    }

    /// The compact sequential ID of this chunk.
    pub fn chunk_id(&self) -> u64 {
        chunk_path_to_chunk_id(self.path, self.default_height)
    }

    /// The slot index a path occupies in this chunk.
    ///
    /// Paths at the chunk's bottom rank map directly; paths at interior chunk
    /// ranks alias to the slot of their leftmost bottom-rank descendant.
    /// Fails if the path lies outside the ranks or the horizontal span this
    /// chunk owns.
    pub fn path_index(&self, path: Path) -> Result<usize, ChunkError> {
        path_index_in_chunk(path, self.path, self.height)
    }

    /// The bottom-rank path stored at the given slot index.
    pub fn path_at_index(&self, index: usize) -> Result<Path, ChunkError> {
        if index >= self.size() {
            return Err(ChunkError::IndexOutOfRange {
                index,
                size: self.size(),
            });
        }
        Ok(self.path.left_grand_child(self.height) + index as i64)
    }

    /// Whether the given bottom-rank path has a slot in this chunk.
    pub fn contains_path(&self, path: Path) -> bool {
        let first = self.path.left_grand_child(self.height);
        path >= first && path < first + self.size() as i64
    }

    /// Read the hash stored for the given path.
    pub fn hash_at_path(&self, path: Path) -> Result<Hash, ChunkError> {
        let index = self.path_index(path)?;
        Ok(self.read_slot(index))
    }

    /// Store a hash for the given path.
    ///
    /// Interior-rank paths alias to their bottom-rank slot, see
    /// [`path_index`](Self::path_index).
    pub fn set_hash_at_path(&mut self, path: Path, hash: &Hash) -> Result<(), ChunkError> {
        let index = self.path_index(path)?;
        self.write_slot(index, hash);
        Ok(())
    }

    /// Read the hash stored at the given slot index.
    pub fn hash_at_index(&self, index: usize) -> Result<Hash, ChunkError> {
        if index >= self.size() {
            return Err(ChunkError::IndexOutOfRange {
                index,
                size: self.size(),
            });
        }
        Ok(self.read_slot(index))
    }

    /// Store a hash at the given slot index.
    pub fn set_hash_at_index(&mut self, index: usize, hash: &Hash) -> Result<(), ChunkError> {
        if index >= self.size() {
            return Err(ChunkError::IndexOutOfRange {
                index,
                size: self.size(),
            });
        }
        self.write_slot(index, hash);
        Ok(())
    }

    /// Compute the hash at any path within this chunk's ranks from the stored
    /// bottom-rank slots.
    ///
    /// Hashes are stored at the bottom rank only, so interior-rank hashes are
    /// recombined on the fly. The leaf range matters: paths at or below the
    /// first leaf rank read their slot directly (leaves have no children),
    /// and a right child beyond `last_leaf_path` yields the one-child form.
    /// The chunk's own path is allowed; that hash belongs to the parent
    /// chunk.
    pub fn calc_hash(
        &self,
        path: Path,
        first_leaf_path: Path,
        last_leaf_path: Path,
    ) -> Result<Hash, ChunkError> {
        let chunk_rank = self.path.rank();
        let path_rank = path.rank();
        if path_rank < chunk_rank || path_rank > chunk_rank + self.height {
            return Err(ChunkError::PathNotInChunk {
                path,
                chunk_path: self.path,
                height: self.height,
            });
        }
        let levels = chunk_rank + self.height - path_rank;
        self.calc_hash_inner(levels, path, first_leaf_path, last_leaf_path)
    }

    /// Compute the hash at the chunk's own path from its stored slots.
    pub fn chunk_root_hash(
        &self,
        first_leaf_path: Path,
        last_leaf_path: Path,
    ) -> Result<Hash, ChunkError> {
        self.calc_hash(self.path, first_leaf_path, last_leaf_path)
    }

    fn calc_hash_inner(
        &self,
        levels: u32,
        path: Path,
        first_leaf_path: Path,
        last_leaf_path: Path,
    ) -> Result<Hash, ChunkError> {
        if levels == 0 || path >= first_leaf_path {
            return self.hash_at_path(path);
        }
        let left = self.calc_hash_inner(levels - 1, path.left_child(), first_leaf_path, last_leaf_path)?;
        let right_path = path.right_child();
        let right = if right_path > last_leaf_path {
            None
        } else {
            Some(self.calc_hash_inner(levels - 1, right_path, first_leaf_path, last_leaf_path)?)
        };
        Ok(hash_internal(&left, right.as_ref()))
    }

    fn read_slot(&self, index: usize) -> Hash {
        let pos = index * Hash::BYTES;
        Hash::from_hash_bytes(&self.data[pos..pos + Hash::BYTES])
    }

    fn write_slot(&mut self, index: usize, hash: &Hash) {
        let pos = index * Hash::BYTES;
        self.data[pos..pos + Hash::BYTES].copy_from_slice(hash.as_bytes());
    }
}

impl std::fmt::Debug for HashChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashChunk")
            .field("path", &self.path)
            .field("height", &self.height)
            .field("chunk_id", &self.chunk_id())
            .finish()
    }
}

/// The path of the chunk that stores the hash for the given tree path.
pub fn path_to_chunk_path(path: Path, chunk_height: u32) -> Path {
    debug_assert!(path.value() > 0, "the root hash belongs to no chunk");
    debug_assert!(chunk_height > 0);
    let rank_diff = path.rank() % chunk_height;
    path.grand_parent(if rank_diff == 0 { chunk_height } else { rank_diff })
}

/// The ID of the chunk that stores the hash for the given tree path.
///
/// Closed-form arithmetic: the chunk root's horizontal position within its
/// rank is the path's ancestor index, and the number of chunks on all ranks
/// above is a geometric series over the `2^chunkHeight`-ary tree of chunks.
pub fn path_to_chunk_id(path: Path, chunk_height: u32) -> u64 {
    debug_assert!(path.value() > 0, "the root hash belongs to no chunk");
    debug_assert!(chunk_height > 0);
    let pp = (path.value() + 1) as u64;
    let rank = 63 - pp.leading_zeros();
    let depth_in_chunk = (rank - 1) % chunk_height + 1;
    let chunk_root_bit = 1u64 << (rank - depth_in_chunk);
    let index_in_rank = (pp >> depth_in_chunk) ^ chunk_root_bit;
    let chunks_above = (chunk_root_bit - 1) / ((1u64 << chunk_height) - 1);
    index_in_rank + chunks_above
}

/// The ID of the chunk rooted at the given chunk path.
pub fn chunk_path_to_chunk_id(chunk_path: Path, chunk_height: u32) -> u64 {
    path_to_chunk_id(chunk_path.left_child(), chunk_height)
}

/// The path of the chunk with the given ID.
///
/// Inverse of [`chunk_path_to_chunk_id`]: walks the breadth-first enumeration
/// of the tree of chunks rank by rank.
pub fn chunk_id_to_chunk_path(chunk_id: u64, chunk_height: u32) -> Path {
    debug_assert!(chunk_height > 0);
    if chunk_id == 0 {
        return ROOT_PATH;
    }
    let child_count = 1u64 << chunk_height;
    let mut chunk_rank = 0u32;
    let mut chunks_at_rank = 1u64;
    let mut ids_through_rank = 0u64;
    while ids_through_rank < chunk_id {
        chunks_at_rank *= child_count;
        ids_through_rank += chunks_at_rank;
        chunk_rank += chunk_height;
    }
    ROOT_PATH.left_grand_child(chunk_rank)
        + (chunk_id + chunks_at_rank - 1 - ids_through_rank) as i64
}

/// The smallest chunk ID such that chunks `0..=id` cover every hash needed to
/// reconstruct all ancestors of every leaf path up to `max_path`.
///
/// The rank above `max_path` may extend further right than `max_path` itself
/// when the tree is not perfect at the boundary, so both ranks are checked.
pub fn min_chunk_id_for_paths(max_path: Path, chunk_height: u32) -> u64 {
    debug_assert!(max_path.value() > 0);
    let max_path_chunk_id = path_to_chunk_id(max_path, chunk_height);
    let prev_rank = std::cmp::max(1, max_path.rank().saturating_sub(1));
    let last_path_in_prev_rank = Path::last_at_rank(prev_rank);
    std::cmp::max(
        path_to_chunk_id(last_path_in_prev_rank, chunk_height),
        max_path_chunk_id,
    )
}

/// The slot index a path occupies in a chunk rooted at `chunk_path` spanning
/// `height` ranks. See [`HashChunk::path_index`].
pub fn path_index_in_chunk(path: Path, chunk_path: Path, height: u32) -> Result<usize, ChunkError> {
    let chunk_rank = chunk_path.rank();
    let path_rank = path.rank();
    if path_rank <= chunk_rank || path_rank > chunk_rank + height {
        return Err(ChunkError::PathNotInChunk {
            path,
            chunk_path,
            height,
        });
    }
    let aligned = path.left_grand_child(chunk_rank + height - path_rank);
    let first = chunk_path.left_grand_child(height);
    if aligned < first || aligned >= first + HashChunk::slot_count(height) as i64 {
        return Err(ChunkError::PathNotInChunk {
            path,
            chunk_path,
            height,
        });
    }
    Ok((aligned.value() - first.value()) as usize)
}
