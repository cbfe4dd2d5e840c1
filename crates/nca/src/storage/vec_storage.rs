use crate::storage::{ReadStorage, StorageError};
use std::fmt::Debug;

/// In-memory storage over an owned byte buffer.
pub struct VecStorage {
    data: Vec<u8>,
}

impl Debug for VecStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VecStorage")
            .field("len", &self.data.len())
            .finish()
    }
}

impl VecStorage {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl ReadStorage for VecStorage {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        let size = self.data.len() as u64;
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or(StorageError::out_of_bounds(offset, buf.len(), size))?;
        if end > size {
            return Err(StorageError::out_of_bounds(offset, buf.len(), size));
        }
        buf.copy_from_slice(&self.data[offset as usize..end as usize]);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}
