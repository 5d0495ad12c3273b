//! Cooperative cancellation for long-running kernels.
//!
//! [`CancelToken`] is a cloneable flag passed by reference into every
//! analytics kernel. Kernels poll it at loop boundaries (every power
//! iteration, every local-move pass, every N nodes of a traversal) and
//! return promptly once it fires. There is no ambient-context mechanism;
//! the token is always an explicit argument.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::AnalyticsError;

/// A cloneable cancellation flag.
///
/// All clones observe the same flag; `cancel()` on any clone is visible to
/// every holder. Cancellation is one-way and sticky.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    fired: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token that has not fired.
    pub fn new() -> Self {
        CancelToken::default()
    }

    /// Fires the token. Idempotent.
    pub fn cancel(&self) {
        self.fired.store(true, Ordering::Release);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called on any
    /// clone of this token.
    pub fn is_cancelled(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Poll helper for kernels: `Err(Cancelled)` once the token has fired.
    pub fn checkpoint(&self) -> Result<(), AnalyticsError> {
        if self.is_cancelled() {
            Err(AnalyticsError::Cancelled)
        } else {
            Ok(())
        }
    }
}
