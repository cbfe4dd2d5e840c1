use crate::formats::nca::verification_storage::{
    IntegrityCheckLevel, IntegrityStorageType, DIGEST_SIZE,
};
use crate::storage::{
    ReadBlockStorage, ReadBlockStorageExt, ReadStorage, StorageError,
};
use digest::Digest;
use sha2::Sha256;
use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum BlockStatus {
    Unchecked,
    Invalid,
    Valid,
}

/// Verifies each block of the wrapped storage against the hash table read
/// from `H` (which is itself usually another verified level). Blocks are
/// checked lazily on first read and the verdict is remembered, so
/// re-reading a block never re-hashes it.
#[derive(Debug)]
pub struct HashLevelStorage<S: ReadBlockStorage, H: ReadStorage> {
    storage: S,
    hash_storage: H,
    check_level: IntegrityCheckLevel,
    ty: IntegrityStorageType,
    /// Which IVFC level this storage verifies (level 0 being the master
    /// hash); reported in integrity errors.
    level_index: u32,
    block_statuses: Mutex<Vec<BlockStatus>>,
}

impl<S: ReadBlockStorage, H: ReadStorage> HashLevelStorage<S, H> {
    pub fn new(
        storage: S,
        hash_storage: H,
        check_level: IntegrityCheckLevel,
        ty: IntegrityStorageType,
        level_index: u32,
    ) -> Self {
        let block_count = storage.block_count();
        let block_statuses = vec![BlockStatus::Unchecked; block_count.try_into().unwrap()];

        Self {
            storage,
            hash_storage,
            check_level,
            ty,
            level_index,
            block_statuses: Mutex::new(block_statuses),
        }
    }
}

enum BlockBuffer<'a> {
    Borrowed(&'a mut [u8]),
    Owned(Vec<u8>),
}

impl Deref for BlockBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        match self {
            BlockBuffer::Borrowed(buf) => buf,
            BlockBuffer::Owned(buf) => buf,
        }
    }
}

impl DerefMut for BlockBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            BlockBuffer::Borrowed(buf) => buf,
            BlockBuffer::Owned(buf) => buf,
        }
    }
}

impl<S: ReadBlockStorage, H: ReadStorage> ReadBlockStorage for HashLevelStorage<S, H> {
    fn block_len(&self) -> u64 {
        self.storage.block_len()
    }

    fn read_block(&self, block_index: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        let block_len = self.storage.block_len();

        // the trailing block may be shorter than the block size
        let current_block_len = self.nth_block_len(block_index);

        // a hash always covers the whole block, so partial reads verify
        // through a scratch buffer
        let mut block_buf = if buf.len() as u64 == block_len {
            BlockBuffer::Borrowed(buf)
        } else {
            BlockBuffer::Owned(vec![0; block_len as usize])
        };

        self.storage
            .read_block(block_index, &mut block_buf[..current_block_len as usize])?;

        if self.check_level == IntegrityCheckLevel::None {
            if let BlockBuffer::Owned(block_buf) = block_buf {
                buf.copy_from_slice(&block_buf[..buf.len()]);
            }
            return Ok(());
        }

        let mut block_statuses = self.block_statuses.lock().unwrap();
        let block_status = &mut block_statuses[block_index as usize];

        if *block_status == BlockStatus::Unchecked {
            let bytes_to_hash = match self.ty {
                IntegrityStorageType::Sha256 => {
                    // hierarchical SHA-256 does not pad the last block
                    current_block_len
                }
                IntegrityStorageType::Ivfc => {
                    // IVFC hashes every block at full size, zero-padded
                    block_buf[current_block_len as usize..].fill(0);
                    block_buf.len() as u64
                }
            };

            let hash = Sha256::digest(&block_buf[..bytes_to_hash as usize]);
            let mut expected_hash = [0; DIGEST_SIZE];
            self.hash_storage
                .read_at(block_index * DIGEST_SIZE as u64, &mut expected_hash)?;

            *block_status = if hash.as_slice() == expected_hash {
                BlockStatus::Valid
            } else {
                BlockStatus::Invalid
            };
        }

        if *block_status == BlockStatus::Invalid && self.check_level == IntegrityCheckLevel::Full {
            return Err(StorageError::Integrity {
                level: self.level_index,
                offset: block_index * block_len,
            });
        }

        if let BlockBuffer::Owned(block_buf) = block_buf {
            let len = buf.len();
            buf.copy_from_slice(&block_buf[..len]);
        }
        Ok(())
    }

    fn size(&self) -> u64 {
        self.storage.size()
    }
}
