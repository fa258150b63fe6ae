//! The virtual hasher.
//!
//! Recomputes the root hash of a virtual tree from a batch of dirty leaves,
//! pulling unchanged sibling hashes from hash chunks supplied by the caller
//! and reporting recomputed chunks to a listener.
//!
//! # Work decomposition
//!
//! The tree is carved into chunk regions (see [`HashChunk`]) and hashing runs
//! one fork/join task per chunk whose subtree contains a dirty leaf. A task
//! gathers its `2^height` bottom-rank input hashes — recursing into child
//! chunk tasks for dirty subtrees, hashing dirty leaves directly, and leaving
//! clean inputs to be read from the chunk's stored slots — then reduces rank
//! by rank up to the chunk's own path. Recomputed hashes are written into the
//! chunk in place and the finalized chunk is handed to the listener exactly
//! once. The task's top hash becomes one bottom-rank input of the parent
//! task.
//!
//! Since every chunk is owned by exactly one task, no two workers ever write
//! the same hash slot. Disjoint subtrees hash concurrently on a rayon pool;
//! a task's only synchronization point is joining its child tasks.
//!
//! A chunk is loaded through the reader only when at least one node it covers
//! is clean. A pass whose dirty set covers an entire region — such as the
//! freshly grown region after the tree doubles — therefore never touches
//! storage for that region's paths.

use std::sync::OnceLock;

use rayon::prelude::*;

use vmap_types::Hash;

use crate::chunk::{ChunkError, HashChunk};
use crate::combine::{hash_internal, hash_leaf};
use crate::config::{VirtualMapConfig, MAX_CHUNK_HEIGHT};
use crate::leaf::{LeafRecord, ValueCodec};
use crate::listener::HashListener;
use crate::path::{Path, ROOT_PATH};

/// Errors from a hashing pass.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashError {
    /// The chunk height is zero or beyond [`MAX_CHUNK_HEIGHT`].
    #[error("invalid hash chunk height: {0}")]
    InvalidChunkHeight(u32),

    /// Dirty leaves were supplied for a tree with an empty leaf path range.
    #[error("dirty leaves stream is not empty, but leaf path range [{first_leaf_path}, {last_leaf_path}] is empty")]
    InvalidLeafRange {
        /// The first leaf path passed to `hash`.
        first_leaf_path: Path,
        /// The last leaf path passed to `hash`.
        last_leaf_path: Path,
    },

    /// The chunk reader returned no chunk for a path that must exist.
    ///
    /// This indicates a bug in the caller's storage layer or leaf-range
    /// bookkeeping, not a recoverable condition.
    #[error("failed to load hash chunk for path {0}")]
    MissingChunk(Path),

    /// The chunk reader returned a chunk that does not own the requested
    /// path, or one with the wrong geometry for the current leaf range.
    #[error("chunk reader returned chunk {actual} of height {actual_height} for requested path {requested} of height {expected_height}")]
    ChunkMismatch {
        /// The chunk path requested from the reader.
        requested: Path,
        /// The height the chunk must span under the current leaf range.
        expected_height: u32,
        /// The path of the chunk actually returned.
        actual: Path,
        /// The height of the chunk actually returned.
        actual_height: u32,
    },

    /// The hashing thread pool could not be built.
    #[error("failed to build hashing thread pool: {0}")]
    ThreadPool(String),

    /// A chunk operation failed mid-pass.
    #[error(transparent)]
    Chunk(#[from] ChunkError),
}

/// Hashes virtual merkle trees.
///
/// One hasher should be shared across all copies of a virtual map family; it
/// holds no per-pass state, so concurrent [`hash`](Self::hash) calls for
/// different trees are fine. The worker pool is built from the configuration
/// passed to the first `hash` call and reused afterwards.
pub struct VirtualHasher {
    pool: OnceLock<rayon::ThreadPool>,
}

impl VirtualHasher {
    /// Create a hasher. The worker pool is built lazily on first use.
    pub fn new() -> Self {
        Self {
            pool: OnceLock::new(),
        }
    }

    /// Hash the given dirty leaves and the minimal subset of the tree
    /// necessary to produce the root hash.
    ///
    /// `sorted_dirty_leaves` must be sorted in ascending path order with no
    /// duplicate paths, and every path must fall inside
    /// `[first_leaf_path, last_leaf_path]`.
    ///
    /// Returns `Ok(None)` if there are no dirty leaves to process. If dirty
    /// leaves are supplied while either bound of the leaf range is invalid
    /// (`< 1`), fails with [`HashError::InvalidLeafRange`].
    ///
    /// `chunk_reader` resolves a chunk path to the stored chunk, or `None` if
    /// no such chunk exists yet. It is only consulted for chunks that hold at
    /// least one unchanged hash, and may be called concurrently from multiple
    /// worker threads for different chunk paths. A missing or mismatched
    /// chunk aborts the pass with an error.
    ///
    /// The listener sees `on_hashing_started`, then `on_chunk_hashed` for
    /// every recomputed chunk, then — unless the pass failed —
    /// `on_hashing_completed`.
    pub fn hash<V, F, I>(
        &self,
        chunk_height: u32,
        chunk_reader: F,
        sorted_dirty_leaves: I,
        first_leaf_path: Path,
        last_leaf_path: Path,
        listener: &dyn HashListener,
        config: &VirtualMapConfig,
    ) -> Result<Option<Hash>, HashError>
    where
        V: ValueCodec + Send + Sync,
        F: Fn(Path) -> Option<HashChunk> + Sync,
        I: IntoIterator<Item = LeafRecord<V>>,
    {
        if chunk_height == 0 || chunk_height > MAX_CHUNK_HEIGHT {
            return Err(HashError::InvalidChunkHeight(chunk_height));
        }

        listener.on_hashing_started(first_leaf_path, last_leaf_path);

        let dirty: Vec<LeafRecord<V>> = sorted_dirty_leaves.into_iter().collect();
        if dirty.is_empty() {
            // Nothing to hash. This also covers the empty tree, where the
            // leaf range is allowed to be invalid.
            listener.on_hashing_completed();
            return Ok(None);
        }
        if first_leaf_path < Path::new(1) || last_leaf_path < Path::new(1) {
            return Err(HashError::InvalidLeafRange {
                first_leaf_path,
                last_leaf_path,
            });
        }

        debug_assert!(
            dirty.windows(2).all(|w| w[0].path() < w[1].path()),
            "dirty leaves must be sorted ascending by path without duplicates"
        );
        debug_assert!(dirty[0].path() >= first_leaf_path);
        debug_assert!(dirty[dirty.len() - 1].path() <= last_leaf_path);
        debug_assert!(
            last_leaf_path == Path::new(1)
                || last_leaf_path.value() == 2 * first_leaf_path.value(),
            "leaf range does not describe a valid virtual tree"
        );

        let ctx = HashContext {
            first_leaf_path,
            last_leaf_path,
            first_leaf_rank: first_leaf_path.rank(),
            last_leaf_rank: last_leaf_path.rank(),
            chunk_height,
            dirty: &dirty,
            chunk_reader: &chunk_reader,
            listener,
        };

        tracing::debug!(
            first_leaf_path = %first_leaf_path,
            last_leaf_path = %last_leaf_path,
            dirty_leaves = dirty.len(),
            chunk_height,
            "hashing pass started"
        );

        let pool = self.pool(config)?;
        let root_hash = pool.install(|| hash_chunk(&ctx, ROOT_PATH))?;

        listener.on_hashing_completed();
        tracing::debug!(root_hash = %root_hash, "hashing pass completed");
        Ok(Some(root_hash))
    }

    /// The worker pool, built from the given configuration on first call and
    /// reused by subsequent calls.
    fn pool(&self, config: &VirtualMapConfig) -> Result<&rayon::ThreadPool, HashError> {
        if let Some(pool) = self.pool.get() {
            return Ok(pool);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.resolved_hashing_threads())
            .thread_name(|i| format!("vmap-hash-{i}"))
            .build()
            .map_err(|e| HashError::ThreadPool(e.to_string()))?;
        Ok(self.pool.get_or_init(|| pool))
    }
}

impl Default for VirtualHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable per-pass state shared by all chunk tasks.
struct HashContext<'a, V, F> {
    first_leaf_path: Path,
    last_leaf_path: Path,
    first_leaf_rank: u32,
    last_leaf_rank: u32,
    chunk_height: u32,
    dirty: &'a [LeafRecord<V>],
    chunk_reader: &'a F,
    listener: &'a dyn HashListener,
}

impl<V, F> HashContext<'_, V, F> {
    /// Height of the chunk rooted at the given rank: the configured default,
    /// truncated where the chunk would span past the last leaf rank.
    fn chunk_height_at(&self, rank: u32) -> u32 {
        self.chunk_height.min(self.last_leaf_rank - rank)
    }

    fn dirty_index(&self, path: Path) -> Option<usize> {
        self.dirty.binary_search_by_key(&path, |leaf| leaf.path()).ok()
    }

    fn any_dirty_between(&self, lo: Path, hi: Path) -> bool {
        if lo > hi {
            return false;
        }
        let start = self.dirty.partition_point(|leaf| leaf.path() < lo);
        start < self.dirty.len() && self.dirty[start].path() <= hi
    }

    /// Whether the subtree rooted at the given internal path contains any
    /// dirty leaf. Leaves live on at most two ranks, giving at most two
    /// contiguous path intervals to probe.
    fn subtree_has_dirty(&self, path: Path) -> bool {
        debug_assert!(path < self.first_leaf_path);
        let to_first = self.first_leaf_rank - path.rank();
        let lo = path.left_grand_child(to_first).max(self.first_leaf_path);
        let hi = path.right_grand_child(to_first);
        if self.any_dirty_between(lo, hi) {
            return true;
        }
        if self.last_leaf_rank > self.first_leaf_rank {
            let lo = path.left_grand_child(to_first + 1);
            let hi = path.right_grand_child(to_first + 1).min(self.last_leaf_path);
            if self.any_dirty_between(lo, hi) {
                return true;
            }
        }
        false
    }
}

/// Classification of one bottom-rank input of a chunk task.
#[derive(Clone, Copy)]
enum Slot {
    /// A dirty leaf at the bottom rank; the payload indexes the dirty set.
    DirtyLeaf(usize),
    /// An internal node whose subtree holds dirty leaves; a child chunk task
    /// computes this hash.
    DirtySubtree,
    /// An unchanged node; its hash is read from the chunk's stored slots if
    /// needed.
    Clean,
    /// A path beyond the last leaf. The leaf one rank up owns the aliased
    /// slot.
    Absent,
}

/// Hash the chunk region rooted at `chunk_path` and return the recomputed
/// hash at `chunk_path` itself.
fn hash_chunk<V, F>(ctx: &HashContext<'_, V, F>, chunk_path: Path) -> Result<Hash, HashError>
where
    V: ValueCodec + Send + Sync,
    F: Fn(Path) -> Option<HashChunk> + Sync,
{
    let chunk_rank = chunk_path.rank();
    let height = ctx.chunk_height_at(chunk_rank);
    let bottom_rank = chunk_rank + height;
    let slots = HashChunk::slot_count(height);
    let first_bottom = chunk_path.left_grand_child(height);

    // Classify the bottom-rank inputs. The chunk itself must be loaded from
    // storage as soon as any node it covers is unchanged; if everything below
    // is dirty the stored state is irrelevant and a fresh chunk suffices.
    let mut states = Vec::with_capacity(slots);
    let mut needs_load = false;
    for i in 0..slots {
        let path = first_bottom + i as i64;
        if path > ctx.last_leaf_path {
            let parent = path.parent();
            if parent >= ctx.first_leaf_path {
                if ctx.dirty_index(parent).is_none() {
                    needs_load = true;
                }
            } else {
                // Only the root of a single-leaf tree has a child with no
                // node and no aliasing leaf above it.
                debug_assert!(path == Path::new(2));
            }
            states.push(Slot::Absent);
        } else if path >= ctx.first_leaf_path {
            match ctx.dirty_index(path) {
                Some(index) => states.push(Slot::DirtyLeaf(index)),
                None => {
                    needs_load = true;
                    states.push(Slot::Clean);
                }
            }
        } else if ctx.subtree_has_dirty(path) {
            states.push(Slot::DirtySubtree);
        } else {
            needs_load = true;
            states.push(Slot::Clean);
        }
    }

    let mut chunk = if needs_load {
        let loaded = match (ctx.chunk_reader)(chunk_path) {
            Some(chunk) => chunk,
            None => {
                tracing::error!(chunk_path = %chunk_path, "hash chunk missing from storage");
                return Err(HashError::MissingChunk(chunk_path));
            }
        };
        if loaded.path() != chunk_path || loaded.height() != height {
            tracing::error!(
                requested = %chunk_path,
                expected_height = height,
                actual = %loaded.path(),
                actual_height = loaded.height(),
                "chunk reader returned a mismatched chunk"
            );
            return Err(HashError::ChunkMismatch {
                requested: chunk_path,
                expected_height: height,
                actual: loaded.path(),
                actual_height: loaded.height(),
            });
        }
        loaded
    } else {
        HashChunk::new(chunk_path, height, ctx.chunk_height)?
    };

    // Compute the dirty inputs, recursing into child chunk tasks in parallel.
    let inputs: Vec<Option<Hash>> = states
        .par_iter()
        .enumerate()
        .map(|(i, state)| match state {
            Slot::DirtyLeaf(index) => Ok(Some(hash_leaf(&ctx.dirty[*index]))),
            Slot::DirtySubtree => hash_chunk(ctx, first_bottom + i as i64).map(Some),
            Slot::Clean | Slot::Absent => Ok(None),
        })
        .collect::<Result<_, HashError>>()?;

    for (i, input) in inputs.iter().enumerate() {
        if let Some(hash) = input {
            chunk.set_hash_at_index(i, hash)?;
        }
    }

    // Reduce rank by rank toward the chunk path. `Some` marks a recomputed
    // hash; `None` marks clean or absent positions, whose hashes are fetched
    // from the chunk's stored slots only when a dirty sibling needs them.
    let mut level = inputs;
    let mut rank = bottom_rank;
    while level.len() > 1 {
        let parent_first = chunk_path.left_grand_child(rank - 1 - chunk_rank);
        let mut next = Vec::with_capacity(level.len() / 2);
        for j in 0..level.len() / 2 {
            let parent = parent_first + j as i64;
            if parent >= ctx.first_leaf_path {
                // A leaf one rank above the bottom: its children do not
                // exist, and it owns the slot its left child would occupy.
                match ctx.dirty_index(parent) {
                    Some(index) => {
                        let hash = hash_leaf(&ctx.dirty[index]);
                        chunk.set_hash_at_path(parent, &hash)?;
                        next.push(Some(hash));
                    }
                    None => next.push(None),
                }
                continue;
            }
            let (left_new, right_new) = (level[2 * j], level[2 * j + 1]);
            if left_new.is_none() && right_new.is_none() {
                next.push(None);
                continue;
            }
            let left = match left_new {
                Some(hash) => hash,
                None => clean_hash(ctx, &chunk, parent.left_child(), rank, bottom_rank)?,
            };
            let right_path = parent.right_child();
            let right = if right_path > ctx.last_leaf_path {
                None
            } else {
                match right_new {
                    Some(hash) => Some(hash),
                    None => Some(clean_hash(ctx, &chunk, right_path, rank, bottom_rank)?),
                }
            };
            next.push(Some(hash_internal(&left, right.as_ref())));
        }
        level = next;
        rank -= 1;
    }

    let top = level
        .into_iter()
        .next()
        .flatten()
        .expect("chunk tasks are only created for subtrees containing dirty leaves");

    // All slots this pass will touch are final now.
    ctx.listener.on_chunk_hashed(chunk);

    Ok(top)
}

/// The hash of an unchanged node, read from the chunk's stored slots:
/// directly for bottom-rank paths (and leaves, through their aliased slots),
/// recombined on the fly for interior ranks.
fn clean_hash<V, F>(
    ctx: &HashContext<'_, V, F>,
    chunk: &HashChunk,
    path: Path,
    rank: u32,
    bottom_rank: u32,
) -> Result<Hash, HashError> {
    let hash = if rank == bottom_rank {
        chunk.hash_at_path(path)?
    } else {
        chunk.calc_hash(path, ctx.first_leaf_path, ctx.last_leaf_path)?
    };
    Ok(hash)
}
