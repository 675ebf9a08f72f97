//! Cooperative cancellation
//!
//! Long-running operations (index passes, slice builds) accept a token and
//! check it at suspension points. Store writes need no compensation on
//! cancel: the whole pass lives in one transaction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::models::{CoreError, Result};

/// Shared cancellation flag
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

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Error out if canceled; call this at every suspension point.
    pub fn checkpoint(&self, what: &str) -> Result<()> {
        if self.is_canceled() {
            Err(CoreError::canceled(format!("{what} canceled")))
        } else {
            Ok(())
        }
    }
}
