//! Core error types for Cadence.
//!
//! Two classes of failure exist in the engine. Configuration errors are
//! graph-definition bugs: they are returned from builder functions and are
//! never retried. Runtime transfer failures are soft and never surface as a
//! `CoreError`; they are reported by the transport layer and the cycle moves
//! on without the data.

use std::fmt;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Channel rate mismatch between two connected ports
    RateMismatch { source: u64, dest: u64 },

    /// Type tag mismatch between two connected ports
    TypeMismatch { source: String, dest: String },

    /// Duplicate port name in a lookup map
    DuplicatePort { name: String },

    /// Port index outside the holder's fixed arity
    PortOutOfRange { index: usize, count: usize },

    /// Arity not preserved by a factory clone
    ArityMismatch {
        expected_inputs: usize,
        expected_outputs: usize,
        actual_inputs: usize,
        actual_outputs: usize,
    },

    /// Destination port already has a source wired in
    AlreadyConnected { port: String },

    /// Leaf input without a source, or output without a target
    Unconnected { port: String },

    /// Source and destination live in different composites
    CrossComposite { source: String, dest: String },

    /// Source defined after its destination within one composite
    OrderViolation { source_seq: usize, dest_seq: usize },

    /// Composite structure is malformed
    MalformedComposite { reason: String },

    /// Identifier not assigned yet
    UnassignedId { what: String },

    /// Not found
    NotFound { kind: String, name: String },

    /// Already exists
    AlreadyExists { kind: String, name: String },

    /// Internal error (for unexpected states)
    Internal {
        /// Error message
        message: String,
    },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateMismatch { source, dest } => {
                write!(f, "Rate mismatch: source rate {}, dest rate {}", source, dest)
            }
            Self::TypeMismatch { source, dest } => {
                write!(f, "Type mismatch: source '{}', dest '{}'", source, dest)
            }
            Self::DuplicatePort { name } => write!(f, "Duplicate port name: {}", name),
            Self::PortOutOfRange { index, count } => {
                write!(f, "Port index {} out of range (arity {})", index, count)
            }
            Self::ArityMismatch {
                expected_inputs,
                expected_outputs,
                actual_inputs,
                actual_outputs,
            } => write!(
                f,
                "Arity mismatch: expected {}in/{}out, got {}in/{}out",
                expected_inputs, expected_outputs, actual_inputs, actual_outputs
            ),
            Self::AlreadyConnected { port } => write!(f, "Port already connected: {}", port),
            Self::Unconnected { port } => write!(f, "Port not connected: {}", port),
            Self::CrossComposite { source, dest } => {
                write!(
                    f,
                    "Cross-composite connection from '{}' to '{}' without boundary forwarding",
                    source, dest
                )
            }
            Self::OrderViolation { source_seq, dest_seq } => {
                write!(
                    f,
                    "Definition order violation: source sequence {} not before dest sequence {}",
                    source_seq, dest_seq
                )
            }
            Self::MalformedComposite { reason } => write!(f, "Malformed composite: {}", reason),
            Self::UnassignedId { what } => write!(f, "Identifier not assigned: {}", what),
            Self::NotFound { kind, name } => write!(f, "{} not found: {}", kind, name),
            Self::AlreadyExists { kind, name } => write!(f, "{} already exists: {}", kind, name),
            Self::Internal { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for CoreError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::RateMismatch { source: 1, dest: 50 };
        assert_eq!(format!("{}", err), "Rate mismatch: source rate 1, dest rate 50");

        let err = CoreError::NotFound {
            kind: "Work".to_string(),
            name: "Correlator".to_string(),
        };
        assert_eq!(format!("{}", err), "Work not found: Correlator");
    }

    #[test]
    fn test_type_mismatch_error() {
        let err = CoreError::TypeMismatch {
            source: "Samples".to_string(),
            dest: "Visibilities".to_string(),
        };
        let s = format!("{}", err);
        assert!(s.contains("Samples"));
        assert!(s.contains("Visibilities"));
    }

    #[test]
    fn test_order_violation_error() {
        let err = CoreError::OrderViolation {
            source_seq: 3,
            dest_seq: 1,
        };
        let s = format!("{}", err);
        assert!(s.contains('3'));
        assert!(s.contains('1'));
    }

    #[test]
    fn test_error_equality() {
        let err1 = CoreError::DuplicatePort { name: "in0".to_string() };
        let err2 = CoreError::DuplicatePort { name: "in0".to_string() };
        assert_eq!(err1, err2);

        let err3 = CoreError::Unconnected { port: "in0".to_string() };
        assert_ne!(err1, err3);
    }
}
