use crate::storage::{ReadStorage, StorageError};
use std::io::{ErrorKind, Read};

/// Adapts a [`ReadStorage`] to [`std::io::Read`] + [`Seek`] so binrw and
/// friends can parse straight out of it.
///
/// [`Seek`]: std::io::Seek
pub struct StorageIo<S: ReadStorage> {
    storage: S,
    position: u64,
}

impl<S: ReadStorage> StorageIo<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            position: 0,
        }
    }

    pub fn into_inner(self) -> S {
        self.storage
    }
}

fn map_storage_error_to_std(error: StorageError) -> std::io::Error {
    let kind = match &error {
        StorageError::Io { source, .. } => source.kind(),
        StorageError::OutOfBounds { .. } => ErrorKind::UnexpectedEof,
        StorageError::Integrity { .. } => ErrorKind::InvalidData,
        StorageError::Cancelled => ErrorKind::Interrupted,
    };
    std::io::Error::new(kind, error)
}

impl<S: ReadStorage> Read for StorageIo<S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = self.storage.size().saturating_sub(self.position);
        let read = std::cmp::min(buf.len() as u64, remaining);
        self.storage
            .read_at(self.position, &mut buf[..read as usize])
            .map_err(map_storage_error_to_std)?;
        self.position += read;
        Ok(read as usize)
    }
}

impl<S: ReadStorage> std::io::Seek for StorageIo<S> {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        let new_position = match pos {
            std::io::SeekFrom::Start(offset) => offset as i64,
            std::io::SeekFrom::End(offset) => self.storage.size() as i64 + offset,
            std::io::SeekFrom::Current(offset) => self.position as i64 + offset,
        };
        if new_position < 0 {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "Attempt to seek before the beginning of the storage",
            ));
        }
        if new_position > self.storage.size() as i64 {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "Attempt to seek after the end of the storage",
            ));
        }
        self.position = new_position as u64;
        Ok(self.position)
    }

    fn stream_position(&mut self) -> std::io::Result<u64> {
        Ok(self.position)
    }
}
