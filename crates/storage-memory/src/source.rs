//! In-memory data source.

use std::collections::{BTreeMap, HashMap};
use std::path::Path as FsPath;

use bytes::Bytes;
use parking_lot::RwLock;

use vmap_merkle::{
    chunk_path_to_chunk_id, HashChunk, LeafRecord, Path, ValueCodec, INVALID_PATH,
};
use vmap_storage::{DataSourceError, RecordBatch, VirtualDataSource};

/// Inner state behind a single lock, so batch commits are atomic with
/// respect to readers.
struct Inner<V> {
    first_leaf_path: Path,
    last_leaf_path: Path,
    /// Hash chunks keyed by compact chunk ID.
    chunks: HashMap<u64, HashChunk>,
    /// Leaf records keyed by path.
    leaves: BTreeMap<i64, LeafRecord<V>>,
    /// Key bytes to leaf path index.
    key_to_path: HashMap<Bytes, Path>,
    compaction_enabled: bool,
}

/// A [`VirtualDataSource`] holding everything in memory.
///
/// Chunks are indexed by their compact chunk ID, the same scheme a
/// disk-backed chunk store uses, so every `load_hash_chunk` round-trips
/// through the chunk-ID bijection.
pub struct MemoryDataSource<V> {
    chunk_height: u32,
    inner: RwLock<Inner<V>>,
}

impl<V: ValueCodec + Clone + Send + Sync> MemoryDataSource<V> {
    /// Create an empty source for chunks of the given default height.
    pub fn new(chunk_height: u32) -> Self {
        Self {
            chunk_height,
            inner: RwLock::new(Inner {
                first_leaf_path: INVALID_PATH,
                last_leaf_path: INVALID_PATH,
                chunks: HashMap::new(),
                leaves: BTreeMap::new(),
                key_to_path: HashMap::new(),
                compaction_enabled: false,
            }),
        }
    }

    /// The default chunk height this source stores chunks under.
    pub fn chunk_height(&self) -> u32 {
        self.chunk_height
    }

    /// The stored leaf path range.
    pub fn leaf_range(&self) -> (Path, Path) {
        let inner = self.inner.read();
        (inner.first_leaf_path, inner.last_leaf_path)
    }

    /// Store a single chunk under its chunk ID, outside a batch commit.
    pub fn put_hash_chunk(&self, chunk: HashChunk) {
        let id = chunk_path_to_chunk_id(chunk.path(), self.chunk_height);
        self.inner.write().chunks.insert(id, chunk);
    }

    /// Number of chunks currently stored.
    pub fn chunk_count(&self) -> usize {
        self.inner.read().chunks.len()
    }

    /// Number of leaves currently stored.
    pub fn leaf_count(&self) -> usize {
        self.inner.read().leaves.len()
    }

    /// Whether background compaction is currently allowed.
    pub fn is_compaction_enabled(&self) -> bool {
        self.inner.read().compaction_enabled
    }
}

impl<V: ValueCodec + Clone + Send + Sync> VirtualDataSource for MemoryDataSource<V> {
    type Value = V;

    fn load_hash_chunk(&self, chunk_path: Path) -> Result<Option<HashChunk>, DataSourceError> {
        let id = chunk_path_to_chunk_id(chunk_path, self.chunk_height);
        let inner = self.inner.read();
        match inner.chunks.get(&id) {
            Some(chunk) if chunk.path() != chunk_path => Err(DataSourceError::Corrupt(format!(
                "chunk stored under id {id} has path {}, expected {chunk_path}",
                chunk.path()
            ))),
            Some(chunk) => Ok(Some(chunk.clone())),
            None => Ok(None),
        }
    }

    fn load_leaf_by_key(&self, key: &[u8]) -> Result<Option<LeafRecord<V>>, DataSourceError> {
        let inner = self.inner.read();
        let Some(path) = inner.key_to_path.get(key) else {
            return Ok(None);
        };
        Ok(inner.leaves.get(&path.value()).cloned())
    }

    fn load_leaf_by_path(&self, path: Path) -> Result<Option<LeafRecord<V>>, DataSourceError> {
        Ok(self.inner.read().leaves.get(&path.value()).cloned())
    }

    fn find_key(&self, key: &[u8]) -> Result<Path, DataSourceError> {
        Ok(self
            .inner
            .read()
            .key_to_path
            .get(key)
            .copied()
            .unwrap_or(INVALID_PATH))
    }

    fn save_records(&self, batch: RecordBatch<V>) -> Result<(), DataSourceError> {
        let mut inner = self.inner.write();
        inner.first_leaf_path = batch.first_leaf_path;
        inner.last_leaf_path = batch.last_leaf_path;

        for leaf in batch.deleted_leaves {
            inner.key_to_path.remove(leaf.key_bytes());
            inner.leaves.remove(&leaf.path().value());
        }
        for leaf in batch.upserted_leaves {
            inner
                .key_to_path
                .insert(leaf.key_bytes().clone(), leaf.path());
            inner.leaves.insert(leaf.path().value(), leaf);
        }
        let dirty_chunks = batch.dirty_chunks.len();
        for chunk in batch.dirty_chunks {
            let id = chunk_path_to_chunk_id(chunk.path(), self.chunk_height);
            inner.chunks.insert(id, chunk);
        }

        tracing::debug!(
            first_leaf_path = %batch.first_leaf_path,
            last_leaf_path = %batch.last_leaf_path,
            dirty_chunks,
            is_reconnect = batch.is_reconnect,
            "batch commit applied"
        );
        Ok(())
    }

    fn snapshot(&self, directory: &FsPath) -> Result<(), DataSourceError> {
        // Nothing is persisted; snapshots only matter for disk-backed
        // sources.
        tracing::debug!(directory = %directory.display(), "snapshot ignored by in-memory source");
        Ok(())
    }

    fn enable_background_compaction(&self) {
        self.inner.write().compaction_enabled = true;
        tracing::debug!("background compaction enabled");
    }

    fn stop_and_disable_background_compaction(&self) {
        self.inner.write().compaction_enabled = false;
        tracing::debug!("background compaction disabled");
    }
}
