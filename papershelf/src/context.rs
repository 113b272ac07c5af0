use crate::error::{Result, ShelfError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cancellation token passed to every store operation.
///
/// Clones share the same flag, so a handle kept by the caller can cancel work
/// queued elsewhere. Operations check the flag before touching the database.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    cancelled: Arc<AtomicBool>,
}

impl OpContext {
    /// A context that is never cancelled unless `cancel` is called on it.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(ShelfError::Cancelled);
        }
        Ok(())
    }
}
