use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between an issuing thread and
/// long-running reads. Polled between block-sized units of work; a
/// cancelled operation fails with [`StorageError::Cancelled`] and leaves
/// parsed state untouched.
///
/// [`StorageError::Cancelled`]: crate::storage::StorageError::Cancelled
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}
