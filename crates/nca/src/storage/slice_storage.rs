use crate::storage::{ReadStorage, StorageError};
use snafu::Snafu;

/// A bounds-checked window into another storage.
#[derive(Debug)]
pub struct SliceStorage<S> {
    storage: S,
    offset: u64,
    size: u64,
}

#[derive(Snafu, Debug)]
pub enum SliceError {
    #[snafu(display("Slice offset {:#x} is outside the storage of size {:#x}", offset, bounds))]
    OffsetOutOfBounds { offset: u64, bounds: u64 },
    #[snafu(display(
        "Slice at {:#x} of size {:#x} overruns the storage of size {:#x}",
        offset,
        size,
        bounds
    ))]
    SizeOutOfBounds { offset: u64, size: u64, bounds: u64 },
}

impl<S: ReadStorage> SliceStorage<S> {
    pub fn new(storage: S, offset: u64, size: u64) -> Result<Self, SliceError> {
        let bounds = storage.size();
        if offset > bounds {
            return Err(SliceError::OffsetOutOfBounds { offset, bounds });
        }
        if offset.checked_add(size).map_or(true, |end| end > bounds) {
            return Err(SliceError::SizeOutOfBounds {
                offset,
                size,
                bounds,
            });
        }

        Ok(Self {
            storage,
            offset,
            size,
        })
    }
}

impl<S: ReadStorage> ReadStorage for SliceStorage<S> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        if offset + buf.len() as u64 > self.size {
            return Err(StorageError::out_of_bounds(offset, buf.len(), self.size));
        }
        self.storage.read_at(self.offset + offset, buf)
    }

    fn size(&self) -> u64 {
        self.size
    }
}
