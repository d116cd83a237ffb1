//! Error types for orokb.
//!
//! All errors are strongly typed using thiserror. A safe-mode assertion that
//! would break consistency is *not* an error: it is reported as `Ok(false)`
//! by the coordinator.

use thiserror::Error;

use crate::storage::StorageError;

/// Validation errors raised before the store is touched.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A statement that does not parse into a triple.
    #[error("Malformed fact '{input}': {reason}")]
    MalformedFact {
        /// The offending text.
        input: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A watch or query pattern that does not compile.
    #[error("Pattern compilation failed for {pattern:?}: {reason}")]
    PatternCompilation {
        /// The patterns as given.
        pattern: Vec<String>,
        /// What is wrong with them.
        reason: String,
    },

    /// A configuration value out of range.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Which value, and why.
        reason: String,
    },
}

/// Execution errors raised while an operation runs against the store.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A class, agent or resource that does not exist.
    #[error("{what} not found: {id}")]
    NotFound {
        /// Kind of the missing thing.
        what: &'static str,
        /// Its id.
        id: String,
    },

    /// The backend failed. Retrying may succeed.
    #[error("Store unavailable: {message}")]
    StoreUnavailable {
        /// Backend message.
        message: String,
    },

    /// Tracked state disagrees with the store.
    #[error("Internal inconsistency: {message}")]
    InternalInconsistency {
        /// What disagrees.
        message: String,
    },
}

/// Top-level error type for orokb.
#[derive(Debug, Error)]
pub enum KbError {
    /// Input rejected before the store was touched.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Failure while running against the store.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Poisoned lock or similar bug.
    #[error("Internal error: {message}")]
    Internal {
        /// Description.
        message: String,
    },
}

impl KbError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a malformed-fact validation error.
    #[must_use]
    pub fn malformed(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation(ValidationError::MalformedFact {
            input: input.into(),
            reason: reason.into(),
        })
    }

    /// Creates a not-found execution error.
    #[must_use]
    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::NotFound { what, id: id.into() })
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if a requested resource does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::NotFound { .. }))
    }

    /// Returns true if the store was unreachable for this request.
    #[must_use]
    pub const fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::StoreUnavailable { .. }))
    }

    /// Returns true if this error is retryable.
    ///
    /// The core never retries on its own; retry policy belongs to the caller.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.is_store_unavailable()
    }
}

impl From<StorageError> for KbError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Unknown { what, id } => Self::Execution(ExecutionError::NotFound { what, id }),
            other => Self::Execution(ExecutionError::StoreUnavailable {
                message: other.to_string(),
            }),
        }
    }
}

/// Result type alias for orokb operations.
pub type KbResult<T> = Result<T, KbError>;
