//! Unified error types for the takt workspace.
//!
//! Two hard categories exist, mirroring how failures propagate during a
//! planning run:
//!
//! - [`CoreError::Data`]: invalid or inconsistent input. Aborts only the
//!   entity or request being processed; the run continues.
//! - [`CoreError::Logic`]: a broken internal invariant (state stack
//!   underflow, corrupted ownership chain). Aborts the current cluster;
//!   other clusters keep planning.
//!
//! Transient planning shortfalls (no material, no capacity, lead time
//! too short) are *not* errors. They travel back through the ask/reply
//! protocol as a zero quantity plus a next-feasible date, and surface as
//! problem records on the demand being planned.

use thiserror::Error;

/// Unified error type for model and solver operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Invalid input data; the affected entity or request is skipped.
    #[error("data error: {0}")]
    Data(String),

    /// Broken internal invariant; fatal to the current cluster.
    #[error("logic error: {0}")]
    Logic(String),

    /// Resource limit exceeded (state stack depth, allocation).
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Convenience alias for Results using [`CoreError`].
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// True when the error only invalidates a single entity or request.
    pub fn is_data(&self) -> bool {
        matches!(self, CoreError::Data(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_category() {
        let err = CoreError::Data("negative quantity".into());
        assert!(err.to_string().contains("data error"));
        assert!(err.is_data());
        assert!(!CoreError::Logic("stack underflow".into()).is_data());
    }
}
