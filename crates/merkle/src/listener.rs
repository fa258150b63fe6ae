//! Hashing lifecycle callbacks.

use crate::chunk::HashChunk;
use crate::path::Path;

/// Receives lifecycle and per-chunk notifications from a hashing pass so a
/// persistence layer can flush incrementally.
///
/// For every [`hash`](crate::VirtualHasher::hash) call the hasher invokes
/// exactly one `on_hashing_started`, then any number of `on_chunk_hashed`
/// calls, then exactly one `on_hashing_completed`. No callback is invoked
/// after `on_hashing_completed` until a subsequent pass begins. If a pass
/// fails, `on_hashing_completed` is not invoked.
///
/// `on_chunk_hashed` may be invoked concurrently from multiple worker threads
/// for different chunks; implementations are responsible for their own
/// synchronization.
pub trait HashListener: Sync {
    /// A hashing pass over the given leaf range has begun.
    fn on_hashing_started(&self, first_leaf_path: Path, last_leaf_path: Path) {
        let _ = (first_leaf_path, last_leaf_path);
    }

    /// Every hash slot of `chunk` has been finalized for this pass.
    ///
    /// Called exactly once per recomputed chunk; ownership of the chunk
    /// passes to the listener.
    fn on_chunk_hashed(&self, chunk: HashChunk) {
        let _ = chunk;
    }

    /// The hashing pass finished and the root hash is about to be returned.
    fn on_hashing_completed(&self) {}
}

/// A listener that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHashListener;

impl HashListener for NoopHashListener {}
