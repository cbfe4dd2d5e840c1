use crate::storage::{ReadBlockStorage, ReadStorage, StorageError};

/// Presents a byte-granular storage as fixed-size blocks.
#[derive(Debug)]
pub struct BlockedStorage<S: ReadStorage> {
    storage: S,
    block_len: u64,
}

impl<S: ReadStorage> BlockedStorage<S> {
    pub fn new(storage: S, block_len: u64) -> Self {
        Self { storage, block_len }
    }
}

impl<S: ReadStorage> ReadBlockStorage for BlockedStorage<S> {
    fn block_len(&self) -> u64 {
        self.block_len
    }

    fn read_block(&self, block_index: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        assert!(
            buf.len() as u64 <= self.block_len,
            "Block reads must not span blocks"
        );
        self.storage.read_at(block_index * self.block_len, buf)
    }

    fn size(&self) -> u64 {
        self.storage.size()
    }

    fn read_blocks(&self, block_index: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        self.storage.read_at(block_index * self.block_len, buf)
    }
}
