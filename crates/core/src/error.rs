//! # Error Types
//!
//! Shape errors are first-class: wiring a vector into a port that expects a
//! matrix is an undefined composition, not a crash.

use thiserror::Error;

use crate::shape::Shape;

/// Core errors shared by the shape layer and the diagram model.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// Declared and actual shapes disagree.
    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    /// Shapes above rank two have no scalar, vector or matrix reading.
    #[error("Unsupported rank {rank}: only scalars, vectors and matrices are allowed")]
    UnsupportedRank { rank: usize },

    /// Attempted to connect ports that don't exist.
    #[error("Invalid port index: {index} (node has {count} ports)")]
    InvalidPort { index: usize, count: usize },

    /// Diagram validation failed.
    #[error("Diagram validation failed: {reason}")]
    ValidationError { reason: String },
}
