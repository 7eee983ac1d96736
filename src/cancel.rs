use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{StoreError, StoreResult};

/// Caller-owned cancellation flag shared with an in-flight operation.
///
/// The store checks it before opening a transaction, between cleanup steps,
/// and immediately before commit. Once commit has been issued the flag is no
/// longer consulted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> StoreResult<()> {
        if self.is_cancelled() {
            Err(StoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}
