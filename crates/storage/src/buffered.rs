//! Chunk-batching hash listener.

use parking_lot::Mutex;

use vmap_merkle::{HashChunk, HashListener, Path};

/// A [`HashListener`] that buffers finalized chunks and flushes them to a
/// sink in batches.
///
/// The sink is invoked whenever the buffer reaches `batch_size` chunks, and
/// once more from `on_hashing_completed` with whatever remains — so every
/// chunk of a pass has been flushed by the time the pass ends, even if the
/// batch boundary was never reached.
pub struct BufferedHashListener<F> {
    batch_size: usize,
    buffer: Mutex<Vec<HashChunk>>,
    flush: F,
}

impl<F> BufferedHashListener<F>
where
    F: Fn(Vec<HashChunk>) + Sync,
{
    /// Create a listener flushing batches of `batch_size` chunks to `flush`.
    ///
    /// A batch size of zero is treated as one.
    pub fn new(batch_size: usize, flush: F) -> Self {
        Self {
            batch_size: batch_size.max(1),
            buffer: Mutex::new(Vec::new()),
            flush,
        }
    }

    fn flush_buffer(&self) {
        let chunks = std::mem::take(&mut *self.buffer.lock());
        if !chunks.is_empty() {
            (self.flush)(chunks);
        }
    }
}

impl<F> HashListener for BufferedHashListener<F>
where
    F: Fn(Vec<HashChunk>) + Sync,
{
    fn on_hashing_started(&self, _first_leaf_path: Path, _last_leaf_path: Path) {
        self.buffer.lock().clear();
    }

    fn on_chunk_hashed(&self, chunk: HashChunk) {
        let full = {
            let mut buffer = self.buffer.lock();
            buffer.push(chunk);
            buffer.len() >= self.batch_size
        };
        if full {
            self.flush_buffer();
        }
    }

    fn on_hashing_completed(&self) {
        self.flush_buffer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmap_merkle::ROOT_PATH;

    fn chunk(id_rank: u32) -> HashChunk {
        HashChunk::new(ROOT_PATH.left_grand_child(id_rank), 1, 1).unwrap()
    }

    #[test]
    fn test_flushes_full_batches() {
        let flushed = Mutex::new(Vec::new());
        let listener = BufferedHashListener::new(2, |chunks: Vec<HashChunk>| {
            flushed.lock().push(chunks.len());
        });

        listener.on_hashing_started(Path::new(1), Path::new(2));
        listener.on_chunk_hashed(chunk(0));
        assert!(flushed.lock().is_empty());
        listener.on_chunk_hashed(chunk(1));
        assert_eq!(*flushed.lock(), vec![2]);
    }

    #[test]
    fn test_completion_flushes_partial_batch() {
        let flushed = Mutex::new(Vec::new());
        let listener = BufferedHashListener::new(10, |chunks: Vec<HashChunk>| {
            flushed.lock().push(chunks.len());
        });

        listener.on_hashing_started(Path::new(1), Path::new(2));
        listener.on_chunk_hashed(chunk(0));
        listener.on_chunk_hashed(chunk(1));
        listener.on_chunk_hashed(chunk(2));
        assert!(flushed.lock().is_empty());
        listener.on_hashing_completed();
        assert_eq!(*flushed.lock(), vec![3]);
    }

    #[test]
    fn test_completion_with_empty_buffer_is_quiet() {
        let flushed = Mutex::new(0usize);
        let listener = BufferedHashListener::new(1, |_chunks: Vec<HashChunk>| {
            *flushed.lock() += 1;
        });
        listener.on_hashing_started(Path::new(1), Path::new(2));
        listener.on_hashing_completed();
        assert_eq!(*flushed.lock(), 0);
    }
}
