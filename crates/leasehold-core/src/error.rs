//! Error types for leasehold with categorization:
//!
//! - **Contract violations**: illegal state, unsupported operations and worker-only
//!   calls made off a worker thread. These indicate a bug in the calling code.
//! - **Execution failures**: the failure of a unit of work, carried unchanged to
//!   whoever awaits its result.
//! - **Configuration errors**: invalid values and unreadable configuration files.
//!
//! Lock contention is never an error. It is resolved by waiting inside the
//! coordination service.

use std::{fmt, sync::Arc};

use thiserror::Error;

/// Core error type for leasehold operations
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A programming-contract violation, e.g. releasing a lease that still has children
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// An operation the current implementation does not support
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A worker-only operation was invoked off a worker thread
    #[error("No worker lease: {0}")]
    NoWorkerLease(String),

    /// Configuration failed validation or could not be parsed
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reading configuration failed
    #[error("IO error: {0}")]
    Io(String),

    /// The awaited execution was cancelled before it produced a result
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// A unit of work panicked on the thread running it
    #[error("Execution panicked: {0}")]
    Panicked(String),

    /// The original failure of a unit of work
    #[error(transparent)]
    Failure(ExecutionFailure),
}

/// Result type alias for leasehold operations
pub type Result<T> = std::result::Result<T, Error>;

// Convenience constructors
impl Error {
    /// Create an illegal-state error.
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }

    /// Create an unsupported-operation error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedOperation(msg.into())
    }

    /// Create an error for a worker-only call made off a worker thread.
    pub fn no_worker_lease(msg: impl Into<String>) -> Self {
        Self::NoWorkerLease(msg.into())
    }

    /// Create a configuration error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an IO error.
    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// Create a cancellation error.
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Wrap the failure of a unit of work.
    pub fn failure(err: impl Into<anyhow::Error>) -> Self {
        Self::Failure(ExecutionFailure::new(err.into()))
    }

    /// Build a `Panicked` error from a panic payload.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::Panicked(msg)
    }

    /// Returns true for the errors that indicate a bug in the calling code.
    pub const fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::IllegalState(_) | Self::UnsupportedOperation(_) | Self::NoWorkerLease(_)
        )
    }

    /// Recover the original failure type of a unit of work.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        match self {
            Self::Failure(failure) => failure.downcast_ref::<E>(),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::io_error(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::invalid_config(format!("Failed to parse config: {err}"))
    }
}

/// The failure of a unit of work, shared between every thread awaiting it.
///
/// Displays exactly like the original error so callers see the original message.
#[derive(Clone)]
pub struct ExecutionFailure(Arc<anyhow::Error>);

impl ExecutionFailure {
    /// Wrap an error.
    #[must_use]
    pub fn new(err: anyhow::Error) -> Self {
        Self(Arc::new(err))
    }

    /// Access the wrapped error.
    #[must_use]
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }

    /// Recover the original error type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }
}

impl fmt::Debug for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl std::error::Error for ExecutionFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error, PartialEq, Eq)]
    #[error("compile failed: {0}")]
    struct CompileFailed(&'static str);

    #[test]
    fn test_illegal_state_display() {
        let err = Error::illegal_state("lease still has children");
        assert_eq!(err.to_string(), "Illegal state: lease still has children");
    }

    #[test]
    fn test_failure_displays_original_message() {
        let err = Error::failure(CompileFailed("Main.java"));
        assert_eq!(err.to_string(), "compile failed: Main.java");
    }

    #[test]
    fn test_failure_downcasts_to_original_type() {
        let err = Error::failure(CompileFailed("Main.java"));
        let cloned = err.clone();
        assert_eq!(
            cloned.downcast_ref::<CompileFailed>(),
            Some(&CompileFailed("Main.java"))
        );
    }

    #[test]
    fn test_downcast_of_non_failure_is_none() {
        let err = Error::cancelled("stopped");
        assert!(err.downcast_ref::<CompileFailed>().is_none());
    }

    #[test]
    fn test_contract_violations() {
        assert!(Error::illegal_state("x").is_contract_violation());
        assert!(Error::unsupported("x").is_contract_violation());
        assert!(Error::no_worker_lease("x").is_contract_violation());
        assert!(!Error::cancelled("x").is_contract_violation());
        assert!(!Error::invalid_config("x").is_contract_violation());
    }

    #[test]
    fn test_from_panic_payloads() {
        let static_payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        let owned_payload: Box<dyn std::any::Any + Send> = Box::new("bang".to_string());
        let other_payload: Box<dyn std::any::Any + Send> = Box::new(42_u8);

        assert_eq!(
            Error::from_panic(static_payload.as_ref()).to_string(),
            "Execution panicked: boom"
        );
        assert_eq!(
            Error::from_panic(owned_payload.as_ref()).to_string(),
            "Execution panicked: bang"
        );
        assert!(matches!(
            Error::from_panic(other_payload.as_ref()),
            Error::Panicked(_)
        ));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
