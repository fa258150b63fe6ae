//! The virtual data source trait.

use std::path::Path as FsPath;

use vmap_merkle::{HashChunk, LeafRecord, Path, ValueCodec};

/// Errors from data source operations.
#[derive(Debug, thiserror::Error)]
pub enum DataSourceError {
    /// An I/O failure in the backing store.
    #[error("data source I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// The backing store returned data that fails validation.
    #[error("corrupt data source state: {0}")]
    Corrupt(String),
}

/// One batch commit produced by a hashing pass.
///
/// Bundles the new leaf range, the chunks reported through the hash listener,
/// and the leaves that were hashed, so a backend can apply everything
/// atomically.
#[derive(Debug)]
pub struct RecordBatch<V: ValueCodec> {
    /// First leaf path of the committed tree.
    pub first_leaf_path: Path,
    /// Last leaf path of the committed tree.
    pub last_leaf_path: Path,
    /// Hash chunks finalized during the pass.
    pub dirty_chunks: Vec<HashChunk>,
    /// Leaf records created or updated during the pass.
    pub upserted_leaves: Vec<LeafRecord<V>>,
    /// Leaf records removed during the pass.
    pub deleted_leaves: Vec<LeafRecord<V>>,
    /// Whether this batch stems from a reconnect rather than normal commits.
    pub is_reconnect: bool,
}

/// Persistence boundary of a virtual map.
///
/// The surrounding map component reads leaves and writes batch commits
/// through this trait; the hasher reads chunks through
/// [`load_hash_chunk`](Self::load_hash_chunk), typically wrapped in a
/// closure. Implementations must support concurrent reads — the hasher calls
/// into the source from multiple worker threads at once.
pub trait VirtualDataSource: Send + Sync {
    /// The leaf value type stored by this source.
    type Value: ValueCodec + Clone + Send + Sync;

    /// Load the hash chunk rooted at the given chunk path, or `None` if no
    /// such chunk has been stored yet.
    ///
    /// The returned chunk's `path()` must equal `chunk_path`.
    fn load_hash_chunk(&self, chunk_path: Path) -> Result<Option<HashChunk>, DataSourceError>;

    /// Load the leaf record for the given key, or `None` if absent.
    fn load_leaf_by_key(
        &self,
        key: &[u8],
    ) -> Result<Option<LeafRecord<Self::Value>>, DataSourceError>;

    /// Load the leaf record at the given path, or `None` if absent.
    fn load_leaf_by_path(
        &self,
        path: Path,
    ) -> Result<Option<LeafRecord<Self::Value>>, DataSourceError>;

    /// The leaf path for the given key, or [`vmap_merkle::INVALID_PATH`] if
    /// the key is not present.
    fn find_key(&self, key: &[u8]) -> Result<Path, DataSourceError>;

    /// Atomically apply one batch commit.
    fn save_records(&self, batch: RecordBatch<Self::Value>) -> Result<(), DataSourceError>;

    /// Write a snapshot of the source into the given directory.
    fn snapshot(&self, directory: &FsPath) -> Result<(), DataSourceError>;

    /// Allow background compaction of the backing store.
    fn enable_background_compaction(&self);

    /// Stop any running compaction and prevent new ones from starting.
    fn stop_and_disable_background_compaction(&self);
}
