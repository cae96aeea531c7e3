use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::domain::error::PublishedError;

/// Cooperative cancellation for long-running cache work (rebuild, collect).
///
/// Clones share the same flag. Work checks it between discrete units and
/// stops with [`PublishedError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn check(&self, operation: &'static str) -> Result<(), PublishedError> {
        if self.is_cancelled() {
            Err(PublishedError::cancelled(operation))
        } else {
            Ok(())
        }
    }
}
