use crate::storage::{ReadStorage, StorageError};
use std::ops::Deref;
use std::sync::Arc;

/// Cheaply clonable read-only handle to a storage. This is what lets the
/// archive own a single NCA body while sections, hash levels and the BKTR
/// overlay all read from it without back-pointers.
#[derive(Debug)]
pub struct SharedStorage<S: ReadStorage> {
    storage: Arc<S>,
}

impl<S: ReadStorage> SharedStorage<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage: Arc::new(storage),
        }
    }
}

impl<S: ReadStorage> Deref for SharedStorage<S> {
    type Target = S;

    fn deref(&self) -> &Self::Target {
        &self.storage
    }
}

impl<S: ReadStorage> Clone for SharedStorage<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
        }
    }
}

impl<S: ReadStorage> ReadStorage for SharedStorage<S> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        self.storage.read_at(offset, buf)
    }

    fn size(&self) -> u64 {
        self.storage.size()
    }
}
