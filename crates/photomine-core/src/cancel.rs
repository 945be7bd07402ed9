//! Cancellation shared by discovery and crawl operations.
//!
//! The token is `tokio_util`'s: it can be polled (`is_cancelled`) inside loops,
//! or awaited (`cancelled`) to race a pending remote call in `tokio::select!`.
//! [`CancelCheck`] adds the `?`-friendly check used between steps.

pub use tokio_util::sync::CancellationToken;

/// Error returned when an operation is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelledError;

impl std::fmt::Display for CancelledError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Operation was cancelled")
    }
}

impl std::error::Error for CancelledError {}

impl From<CancelledError> for crate::error::MinerError {
    fn from(_: CancelledError) -> Self {
        crate::error::MinerError::Cancelled
    }
}

/// Early-exit check for a [`CancellationToken`].
///
/// # Example
///
/// ```
/// use photomine_core::cancel::{CancelCheck, CancellationToken, CancelledError};
///
/// let token = CancellationToken::new();
/// assert!(token.check().is_ok());
///
/// token.clone().cancel();
/// assert_eq!(token.check(), Err(CancelledError));
/// ```
pub trait CancelCheck {
    /// Return an error if cancellation has been requested.
    fn check(&self) -> Result<(), CancelledError>;
}

impl CancelCheck for CancellationToken {
    fn check(&self) -> Result<(), CancelledError> {
        if self.is_cancelled() {
            Err(CancelledError)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_follows_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());

        clone.cancel();
        assert_eq!(token.check(), Err(CancelledError));
    }

    #[test]
    fn test_cancelled_error_converts() {
        let err: crate::error::MinerError = CancelledError.into();
        assert!(err.is_cancelled());
    }
}
