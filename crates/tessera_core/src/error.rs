//! Common error types for TESSERA.
//!
//! The taxonomy follows propagation behavior: usage errors bubble up to the
//! submitting caller, invariant violations and fabric failures are internal
//! bugs or fatal conditions, timing errors are transient arrival-order
//! races resolved by bounded retry.

use crate::id::BufferId;
use std::fmt;

/// Common result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Common error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Caller misused the API; aborts the current submission
    Usage {
        /// What was wrong with the call
        reason: String,
    },

    /// Range mapper or cast dimensionality mismatch
    DimensionMismatch {
        /// Expected dimensionality
        expected: usize,
        /// Actual dimensionality
        actual: usize,
    },

    /// Internal invariant broken; indicates a bug
    InvariantViolation {
        /// Buffer involved, if any
        buffer: Option<BufferId>,
        /// Diagnostic detail, including the region involved
        detail: String,
    },

    /// Message fabric failure; fatal
    Fabric {
        /// What the fabric reported
        reason: String,
    },

    /// Inbound frame references an id not yet known locally
    Timing {
        /// Kind of resource ("buffer" or "reduction")
        resource: String,
        /// Raw id of the resource
        id: u64,
    },

    /// Not found
    NotFound {
        /// Kind of entity
        kind: String,
        /// Entity id
        id: String,
    },

    /// Already exists
    AlreadyExists {
        /// Kind of entity
        kind: String,
        /// Entity id
        id: String,
    },
}

impl CoreError {
    /// Shorthand for a usage error
    #[must_use]
    pub fn usage(reason: impl Into<String>) -> Self {
        Self::Usage { reason: reason.into() }
    }

    /// Shorthand for an invariant violation
    #[must_use]
    pub fn invariant(buffer: Option<BufferId>, detail: impl Into<String>) -> Self {
        Self::InvariantViolation {
            buffer,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usage { reason } => write!(f, "Usage error: {}", reason),
            Self::DimensionMismatch { expected, actual } => {
                write!(f, "Dimension mismatch: expected {}, got {}", expected, actual)
            }
            Self::InvariantViolation { buffer, detail } => match buffer {
                Some(bid) => write!(f, "Invariant violation on {}: {}", bid, detail),
                None => write!(f, "Invariant violation: {}", detail),
            },
            Self::Fabric { reason } => write!(f, "Fabric failure: {}", reason),
            Self::Timing { resource, id } => {
                write!(f, "{} {} not yet known locally", resource, id)
            }
            Self::NotFound { kind, id } => write!(f, "{} not found: {}", kind, id),
            Self::AlreadyExists { kind, id } => write!(f, "{} already exists: {}", kind, id),
        }
    }
}

impl std::error::Error for CoreError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::usage("mapper on wrong handler kind");
        assert_eq!(
            format!("{}", err),
            "Usage error: mapper on wrong handler kind"
        );

        let err = CoreError::NotFound {
            kind: "Buffer".to_string(),
            id: "buf_3".to_string(),
        };
        assert_eq!(format!("{}", err), "Buffer not found: buf_3");
    }

    #[test]
    fn test_invariant_cites_buffer() {
        let err = CoreError::invariant(Some(BufferId::from_raw(2)), "uncovered remainder");
        let s = format!("{}", err);
        assert!(s.contains("buf_2"));
        assert!(s.contains("uncovered remainder"));
    }

    #[test]
    fn test_dimension_mismatch_display() {
        let err = CoreError::DimensionMismatch {
            expected: 2,
            actual: 3,
        };
        let s = format!("{}", err);
        assert!(s.contains('2'));
        assert!(s.contains('3'));
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(CoreError::usage("x"), CoreError::usage("x"));
        assert_ne!(CoreError::usage("x"), CoreError::usage("y"));
    }
}
