//! # Shapes - Extents of Expressions
//!
//! Every expression has a shape: a scalar, a vector of `n` elements or a
//! matrix of `r × c` elements. Operators are only defined when the shapes of
//! their operands line up, and container literals carry a declared shape
//! that is compared with their materialized contents.
//!
//! ## Design Choices
//!
//! We use runtime shape checking (`Vec<usize>`) rather than compile-time
//! (const generics / typenum) so that the inner extent of a matrix product
//! can be carried as plain data through differentiation.
//! See `StaticShape` for the hook used by compile-time checking layers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The level of an expression: how many axes its shape has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Scalar,
    Vector,
    Matrix,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Scalar => write!(f, "scalar"),
            Level::Vector => write!(f, "vector"),
            Level::Matrix => write!(f, "matrix"),
        }
    }
}

/// A shape describes the extents of an expression.
///
/// `dims` is empty for a scalar, `[n]` for a vector and `[rows, cols]`
/// for a matrix. Higher ranks are not produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Shape {
    /// Dimension sizes (empty = scalar, [n] = vector, [m,n] = matrix)
    pub dims: Vec<usize>,
}

impl Shape {
    /// Create a shape from raw dimensions.
    pub fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    /// Create a scalar shape (0-dimensional).
    pub fn scalar() -> Self {
        Self { dims: vec![] }
    }

    /// Create a vector shape (1-dimensional).
    pub fn vector(len: usize) -> Self {
        Self { dims: vec![len] }
    }

    /// Create a matrix shape (2-dimensional).
    pub fn matrix(rows: usize, cols: usize) -> Self {
        Self {
            dims: vec![rows, cols],
        }
    }

    /// The runtime shape named by a compile-time marker type.
    pub fn of<S: StaticShape>() -> Self {
        S::to_shape()
    }

    /// Fails for shapes above rank two.
    pub fn check_rank(&self) -> Result<(), CoreError> {
        if self.rank() > 2 {
            return Err(CoreError::UnsupportedRank { rank: self.rank() });
        }
        Ok(())
    }

    /// Number of dimensions (rank).
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    /// Scalar, vector or matrix.
    ///
    /// Anything of rank two or more is treated as a matrix; callers that
    /// accept arbitrary dimensions reject the rest with [`Shape::check_rank`].
    pub fn level(&self) -> Level {
        match self.dims.len() {
            0 => Level::Scalar,
            1 => Level::Vector,
            _ => Level::Matrix,
        }
    }

    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// Number of rows for a matrix, length for a vector, 1 for a scalar.
    pub fn rows(&self) -> usize {
        self.dims.first().copied().unwrap_or(1)
    }

    /// Number of columns for a matrix, 1 otherwise.
    pub fn cols(&self) -> usize {
        self.dims.get(1).copied().unwrap_or(1)
    }

    /// Shape with the two axes swapped. Scalars and vectors are unchanged.
    pub fn transposed(&self) -> Shape {
        match self.dims.as_slice() {
            [r, c] => Shape::matrix(*c, *r),
            _ => self.clone(),
        }
    }

    /// Shape of one element along the leading axis: a matrix row is a
    /// vector, a vector element is a scalar.
    pub fn element(&self) -> Shape {
        Shape::new(self.dims.iter().skip(1).copied().collect())
    }

    /// Check if this shape is compatible with another for composition.
    pub fn is_compatible(&self, other: &Shape) -> bool {
        self == other
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "f64[{}]",
            self.dims
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

// ============================================================================
// Shape Validation
// ============================================================================

/// Confirms that a container's declared extents match what it actually holds.
///
/// Validators are consulted when an expression is materialized. The engine
/// only needs the verdict; alternative validators (for instance one backed by
/// a compile-time checking layer) can be swapped in.
pub trait ShapeValidator {
    fn validate(&self, declared: &Shape, actual: &Shape) -> Result<(), CoreError>;
}

/// Default validator: declared and actual shapes must be equal.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeShapeValidator;

impl ShapeValidator for RuntimeShapeValidator {
    fn validate(&self, declared: &Shape, actual: &Shape) -> Result<(), CoreError> {
        if declared.is_compatible(actual) {
            Ok(())
        } else {
            Err(CoreError::ShapeMismatch {
                expected: declared.clone(),
                got: actual.clone(),
            })
        }
    }
}

// ============================================================================
// Type-Level Shapes
// ============================================================================

/// Marker trait for compile-time shape checking.
///
/// A checking layer names its dimensions with marker types; the engine only
/// sees the runtime `Shape` they convert to.
pub trait StaticShape {
    /// The dimensions as a compile-time constant
    const DIMS: &'static [usize];

    /// Convert to a runtime Shape
    fn to_shape() -> Shape {
        Shape::new(Self::DIMS.to_vec())
    }
}

/// A 3x3 matrix known at compile time.
pub struct Mat3x3;

impl StaticShape for Mat3x3 {
    const DIMS: &'static [usize] = &[3, 3];
}

/// A 3-element vector known at compile time.
pub struct Vec3;

impl StaticShape for Vec3 {
    const DIMS: &'static [usize] = &[3];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_shape() {
        let s = Shape::scalar();
        assert_eq!(s.rank(), 0);
        assert_eq!(s.numel(), 1);
        assert_eq!(s.level(), Level::Scalar);
        assert_eq!(s.to_string(), "f64[]");
    }

    #[test]
    fn test_matrix_shape() {
        let m = Shape::matrix(3, 4);
        assert_eq!(m.rank(), 2);
        assert_eq!(m.numel(), 12);
        assert_eq!(m.rows(), 3);
        assert_eq!(m.cols(), 4);
        assert_eq!(m.to_string(), "f64[3, 4]");
        assert_eq!(m.transposed(), Shape::matrix(4, 3));
        assert_eq!(m.element(), Shape::vector(4));
    }

    #[test]
    fn test_rank_above_two_is_rejected() {
        assert!(Shape::matrix(2, 2).check_rank().is_ok());
        assert!(Shape::scalar().check_rank().is_ok());
        assert_eq!(
            Shape::new(vec![2, 2, 2]).check_rank(),
            Err(CoreError::UnsupportedRank { rank: 3 })
        );
    }

    #[test]
    fn test_runtime_validator() {
        let v = RuntimeShapeValidator;
        assert!(v.validate(&Shape::vector(3), &Shape::vector(3)).is_ok());
        assert_eq!(
            v.validate(&Shape::vector(3), &Shape::vector(2)),
            Err(CoreError::ShapeMismatch {
                expected: Shape::vector(3),
                got: Shape::vector(2),
            })
        );
    }

    #[test]
    fn test_static_shape() {
        let s = Shape::of::<Mat3x3>();
        assert_eq!(s.dims, vec![3, 3]);
        assert_eq!(Mat3x3::DIMS, &[3, 3]);
        assert_eq!(Shape::of::<Vec3>().level(), Level::Vector);
    }
}
