//! Error types shared by the graph store and every analytics kernel.
//!
//! Uses `thiserror` for structured, matchable error variants. Each public
//! entry point returns `Result<T, AnalyticsError>`; callers use the variant
//! to distinguish "no answer" (hard failure) from "degraded answer"
//! (a partial result flagged not-converged alongside `Cancelled`).

use thiserror::Error;

/// Errors produced by graph construction and the analytics kernels.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// Caller-supplied input was rejected (empty id, absent node, invalid
    /// range, bad aggregation, ...).
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    /// A structure was queried before it was built.
    #[error("not initialized: {what}")]
    NotInitialized { what: String },

    /// The cancellation token fired before the kernel completed.
    #[error("operation cancelled")]
    Cancelled,

    /// An iterative kernel hit its safety cap without converging.
    #[error("{algorithm} exceeded iteration cap ({iterations})")]
    ConvergenceExceeded {
        algorithm: &'static str,
        iterations: usize,
    },

    /// A computed value violated an internal invariant. Fatal for the
    /// current kernel; no partial result is returned.
    #[error("consistency violation: {reason}")]
    Consistency { reason: String },

    /// Post-dominator analysis was invoked on a graph where every node has
    /// outgoing edges.
    #[error("no exit nodes found")]
    NoExit,

    /// A kernel panicked and the panic was recovered at the facade boundary.
    /// The original panic message is preserved.
    #[error("internal panic: {message}")]
    Internal { message: String },
}

impl AnalyticsError {
    /// Shorthand for an [`AnalyticsError::InvalidInput`].
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        AnalyticsError::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Shorthand for an [`AnalyticsError::Consistency`].
    pub fn consistency(reason: impl Into<String>) -> Self {
        AnalyticsError::Consistency {
            reason: reason.into(),
        }
    }

    /// Returns `true` for the cancellation variant.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AnalyticsError::Cancelled)
    }
}
