//! Store error taxonomy

use crate::record::ValidationErrors;
use std::fmt;

#[derive(Debug)]
pub enum StoreError {
    /// Input rejected before anything was written. Not retried.
    Validation(ValidationErrors),
    /// A single attempt lost a lock race. Retried internally.
    Contention(String),
    /// Contention outlasted the retry budget. Nothing was applied.
    Unavailable { attempts: u32 },
    /// Any other storage failure.
    Backend(String),
    /// The store was used after `close`.
    Closed,
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Contention(_))
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Validation(errors) => write!(f, "validation failed: {}", errors),
            StoreError::Contention(detail) => write!(f, "store contended: {}", detail),
            StoreError::Unavailable { attempts } => {
                write!(f, "store unavailable after {} attempts", attempts)
            }
            StoreError::Backend(detail) => write!(f, "store error: {}", detail),
            StoreError::Closed => write!(f, "store is closed"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<ValidationErrors> for StoreError {
    fn from(errors: ValidationErrors) -> Self {
        StoreError::Validation(errors)
    }
}
