use crate::storage::{ReadBlockStorage, ReadBlockStorageExt, StorageError};
use mini_moka::sync::{Cache, CacheBuilder};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Keeps recently read blocks in a small LRU cache. Used on hash-tree
/// levels, where the same upper-level blocks cover many data reads.
pub struct BlockCacheStorage<S> {
    storage: S,
    cache: Cache<u64, Arc<Vec<u8>>>,
}

impl<S: ReadBlockStorage> BlockCacheStorage<S> {
    pub fn new(storage: S, blocks_in_cache: u64, time_to_idle: Duration) -> Self {
        let cache = CacheBuilder::new(blocks_in_cache)
            .time_to_idle(time_to_idle)
            .build();

        Self { storage, cache }
    }
}

impl<S: ReadBlockStorage> ReadBlockStorage for BlockCacheStorage<S> {
    fn block_len(&self) -> u64 {
        self.storage.block_len()
    }

    fn read_block(&self, block_index: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        let block_len = self.nth_block_len(block_index) as usize;
        let copy_len = std::cmp::min(block_len, buf.len());

        match self.cache.get(&block_index) {
            Some(content) => {
                buf[..copy_len].copy_from_slice(&content.as_slice()[..copy_len]);
                Ok(())
            }
            None => {
                let mut content = vec![0; block_len];
                self.storage.read_block(block_index, &mut content)?;
                buf[..copy_len].copy_from_slice(&content[..copy_len]);
                self.cache.insert(block_index, Arc::new(content));
                Ok(())
            }
        }
    }

    fn size(&self) -> u64 {
        self.storage.size()
    }
}

impl<S: fmt::Debug> fmt::Debug for BlockCacheStorage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockCacheStorage")
            .field("storage", &self.storage)
            .finish()
    }
}
