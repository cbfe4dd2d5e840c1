use crate::cancel::CancellationToken;
use crate::storage::{ReadStorage, StorageError};

/// Checks a [`CancellationToken`] before every read. Wrapping the NCA body
/// in this storage makes all decoding operations cancellable: every
/// sector-sized unit of work funnels into a read on the body.
#[derive(Debug)]
pub struct CancelStorage<S> {
    storage: S,
    token: CancellationToken,
}

impl<S: ReadStorage> CancelStorage<S> {
    pub fn new(storage: S, token: CancellationToken) -> Self {
        Self { storage, token }
    }
}

impl<S: ReadStorage> ReadStorage for CancelStorage<S> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        if self.token.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        self.storage.read_at(offset, buf)
    }

    fn size(&self) -> u64 {
        self.storage.size()
    }
}

#[cfg(test)]
mod tests {
    use super::CancelStorage;
    use crate::cancel::CancellationToken;
    use crate::storage::{ReadStorage, StorageError, VecStorage};

    #[test]
    fn cancellation_fails_reads_but_keeps_the_storage_usable() {
        let token = CancellationToken::new();
        let storage = CancelStorage::new(VecStorage::new(vec![7; 0x10]), token.clone());

        let mut buf = [0; 4];
        storage.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [7; 4]);

        token.cancel();
        assert!(matches!(
            storage.read_at(0, &mut buf),
            Err(StorageError::Cancelled)
        ));
        assert_eq!(storage.size(), 0x10);
    }
}
