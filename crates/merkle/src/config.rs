//! Virtual map configuration.

use std::num::NonZeroUsize;

/// Largest allowed hash chunk height. A chunk of this height holds
/// `2^16` hash slots (2 MiB of hash data).
pub const MAX_CHUNK_HEIGHT: u32 = 16;

/// Configuration for the virtual map hashing engine.
///
/// Threaded explicitly into the calls that need it — there is no process-wide
/// configuration state, so multiple maps with different settings can coexist
/// in one process.
#[derive(Debug, Clone)]
pub struct VirtualMapConfig {
    /// Number of ranks spanned by a full hash chunk. Chunks truncated by the
    /// leaf boundary may be shorter.
    pub hash_chunk_height: u32,

    /// Number of worker threads for the hashing pool. Zero means
    /// auto-detect from available parallelism.
    pub hashing_threads: usize,
}

impl Default for VirtualMapConfig {
    fn default() -> Self {
        Self {
            hash_chunk_height: 6,
            hashing_threads: 0,
        }
    }
}

impl VirtualMapConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hash_chunk_height == 0 || self.hash_chunk_height > MAX_CHUNK_HEIGHT {
            return Err(ConfigError::InvalidChunkHeight(self.hash_chunk_height));
        }
        Ok(())
    }

    /// The number of hashing threads to spawn, resolving auto-detection.
    pub fn resolved_hashing_threads(&self) -> usize {
        if self.hashing_threads > 0 {
            return self.hashing_threads;
        }
        std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(4)
    }
}

/// Errors from configuration validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Chunk height outside `[1, MAX_CHUNK_HEIGHT]`.
    #[error("hash chunk height {0} is outside [1, {MAX_CHUNK_HEIGHT}]")]
    InvalidChunkHeight(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        VirtualMapConfig::default().validate().unwrap();
    }

    #[test]
    fn test_invalid_chunk_height() {
        let config = VirtualMapConfig {
            hash_chunk_height: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = VirtualMapConfig {
            hash_chunk_height: MAX_CHUNK_HEIGHT + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolved_threads() {
        let config = VirtualMapConfig {
            hashing_threads: 3,
            ..Default::default()
        };
        assert_eq!(config.resolved_hashing_threads(), 3);

        let auto = VirtualMapConfig::default();
        assert!(auto.resolved_hashing_threads() >= 1);
    }
}
