//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the Steward runtime.
#[derive(Error, Debug)]
pub enum Error {
    /// Resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Create collided with an existing resource of the same address.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic write carried a stale version.
    #[error("version conflict: {0}")]
    VersionConflict(String),

    /// Writer is not allowed to mutate this part of the resource.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Invalid phase for the requested operation (e.g. destroy while finalizers held).
    #[error("phase conflict: {0}")]
    PhaseConflict(String),

    /// Transient failure reported by a controller's reconciliation pass.
    #[error("reconcile error: {0}")]
    Reconcile(String),

    /// A controller reconciliation panicked; isolated to that controller.
    #[error("reconcile panic: {0}")]
    ReconcilePanic(String),

    /// Requested watch bookmark has aged out of the retention buffer.
    #[error("stale bookmark: {0}")]
    StaleBookmark(String),

    /// Validation errors (malformed identifiers, selectors, registrations).
    #[error("validation error: {0}")]
    Validation(String),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),

    /// Timeout (reconcile deadline, poll deadline).
    #[error("timeout: {0}")]
    Timeout(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors (snapshot persistence).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// Convenience constructors
impl Error {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    pub fn version_conflict(msg: impl Into<String>) -> Self {
        Self::VersionConflict(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn phase_conflict(msg: impl Into<String>) -> Self {
        Self::PhaseConflict(msg.into())
    }

    pub fn reconcile(msg: impl Into<String>) -> Self {
        Self::Reconcile(msg.into())
    }

    pub fn stale_bookmark(msg: impl Into<String>) -> Self {
        Self::StaleBookmark(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }
}

impl Error {
    /// True for errors a caller can resolve by re-reading and retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::VersionConflict(_) | Error::Reconcile(_) | Error::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_carry_message() {
        let err = Error::not_found("files/EtcFileSpec/hosts");
        assert_eq!(err.to_string(), "not found: files/EtcFileSpec/hosts");

        let err = Error::version_conflict("expected 3, current 5");
        assert!(err.to_string().contains("expected 3"));
    }

    #[test]
    fn retryable_classification() {
        assert!(Error::version_conflict("stale").is_retryable());
        assert!(Error::reconcile("transient").is_retryable());
        assert!(!Error::forbidden("not owner").is_retryable());
        assert!(!Error::already_exists("dup").is_retryable());
    }
}
