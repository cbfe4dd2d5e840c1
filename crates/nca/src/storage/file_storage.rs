use snafu::ResultExt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

use super::{IoSnafu, ReadStorage, StorageError};

/// Read-only storage over any seekable reader (most commonly a [`File`]).
#[derive(Debug)]
pub struct FileStorage<Io: Read + Seek + Send = File> {
    io: Mutex<Io>,
    size: u64,
}

impl<Io: Read + Seek + Send> FileStorage<Io> {
    pub fn new(mut io: Io) -> Result<Self, StorageError> {
        let size = io
            .seek(SeekFrom::End(0))
            .context(IoSnafu { operation: "seek" })?;
        io.seek(SeekFrom::Start(0))
            .context(IoSnafu { operation: "seek" })?;
        Ok(Self {
            io: Mutex::new(io),
            size,
        })
    }
}

impl FileStorage<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let io = File::open(path).context(IoSnafu { operation: "open" })?;
        Self::new(io)
    }
}

impl<Io: Read + Seek + Send> ReadStorage for FileStorage<Io> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        if offset + buf.len() as u64 > self.size {
            return Err(StorageError::out_of_bounds(offset, buf.len(), self.size));
        }
        let mut io = self.io.lock().unwrap();
        io.seek(SeekFrom::Start(offset))
            .context(IoSnafu { operation: "seek" })?;
        io.read_exact(buf).context(IoSnafu { operation: "read" })?;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }
}
