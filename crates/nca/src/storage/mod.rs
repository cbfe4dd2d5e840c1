use num_integer::Integer;
use snafu::Snafu;
use std::io::BufReader;

mod blocked_storage;
mod cache_storage;
mod cancel_storage;
mod file_storage;
mod linear_storage;
mod shared_storage;
mod slice_storage;
mod storage_io;
mod transform_storage;
mod vec_storage;

pub use blocked_storage::BlockedStorage;
pub use cache_storage::BlockCacheStorage;
pub use cancel_storage::CancelStorage;
pub use file_storage::FileStorage;
pub use linear_storage::LinearStorage;
pub use shared_storage::SharedStorage;
pub use slice_storage::{SliceError, SliceStorage};
pub use storage_io::StorageIo;
pub use transform_storage::{BlockTransform, CtrStorage, CtrTransform, TransformStorage, XtsStorage, XtsTransform};
pub use vec_storage::VecStorage;

/// Random-access byte source. Everything the decoder reads from (the raw
/// NCA, decrypted sections, verified sections, the BKTR overlay) comes
/// through this seam, so the layers stack freely.
pub trait ReadStorage: Send + Sync {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError>;
    fn size(&self) -> u64;
}

/// Block-granular byte source. Ciphers and hash verification operate on
/// whole blocks; [`LinearStorage`] adapts back to byte granularity.
pub trait ReadBlockStorage: Send + Sync {
    fn block_len(&self) -> u64;

    /// Reads the block at the given index. The final block of a storage
    /// may be shorter than `block_len`, and may be read partially.
    fn read_block(&self, block_index: u64, buf: &mut [u8]) -> Result<(), StorageError>;

    /// Size in bytes; not necessarily a multiple of the block size.
    fn size(&self) -> u64;

    fn read_blocks(&self, block_index: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        let block_len = self.block_len();
        let block_count = Integer::div_ceil(&(buf.len() as u64), &block_len);
        for i in 0..block_count {
            let buf = &mut buf[(i * block_len) as usize..];
            let read_len = std::cmp::min(block_len, buf.len() as u64);
            self.read_block(block_index + i, &mut buf[..read_len as usize])?;
        }
        Ok(())
    }
}

pub trait ReadStorageExt: ReadStorage {
    fn slice(self, offset: u64, size: u64) -> Result<SliceStorage<Self>, SliceError>
    where
        Self: Sized,
    {
        SliceStorage::new(self, offset, size)
    }

    fn shared(self) -> SharedStorage<Self>
    where
        Self: Sized,
    {
        SharedStorage::new(self)
    }

    fn io(self) -> StorageIo<Self>
    where
        Self: Sized,
    {
        StorageIo::new(self)
    }

    fn buf_read(self) -> BufReader<StorageIo<Self>>
    where
        Self: Sized,
    {
        BufReader::new(self.io())
    }

    fn read_all(&self) -> Result<Vec<u8>, StorageError> {
        self.read_vec(0, self.size())
    }

    fn read_vec(&self, offset: u64, size: u64) -> Result<Vec<u8>, StorageError> {
        let mut buf = vec![0; size as usize];
        self.read_at(offset, &mut buf)?;
        Ok(buf)
    }
}

pub trait ReadBlockStorageExt: ReadBlockStorage {
    fn block_count(&self) -> u64 {
        Integer::div_ceil(&self.size(), &self.block_len())
    }

    /// Length of the block at the given index; only the last one may be short.
    fn nth_block_len(&self, block_index: u64) -> u64 {
        assert!(block_index < self.block_count());
        if block_index == self.block_count() - 1 {
            ((self.size() - 1) % self.block_len()) + 1
        } else {
            self.block_len()
        }
    }
}

impl<T: ReadStorage> ReadStorageExt for T {}
impl<T: ReadBlockStorage> ReadBlockStorageExt for T {}

#[derive(Snafu, Debug)]
pub enum StorageError {
    #[snafu(display("IO error during {}: {}", operation, source))]
    Io {
        source: std::io::Error,
        operation: &'static str,
    },
    #[snafu(display(
        "Out-of-bounds access: offset {:#x} + length {:#x} exceeds storage size {:#x}",
        offset,
        len,
        size
    ))]
    OutOfBounds { offset: u64, len: u64, size: u64 },
    #[snafu(display(
        "Integrity check failed at hash level {}, offset {:#x}",
        level,
        offset
    ))]
    Integrity { level: u32, offset: u64 },
    #[snafu(display("Operation cancelled"))]
    Cancelled,
}

impl StorageError {
    pub(crate) fn out_of_bounds(offset: u64, len: usize, size: u64) -> Self {
        StorageError::OutOfBounds {
            offset,
            len: len as u64,
            size,
        }
    }
}
