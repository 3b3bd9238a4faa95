//! # Shape Tests
//!
//! Tests for the shape system:
//! - Constructors (scalar, vector, matrix)
//! - Levels and axis helpers
//! - Validation of declared against actual extents
//! - Static shape conversion

use symbolic_core::shape::{Level, Mat3x3, RuntimeShapeValidator, Shape, ShapeValidator, StaticShape, Vec3};
use symbolic_core::CoreError;

// ============================================================================
// Constructor Tests
// ============================================================================

#[test]
fn test_scalar_constructor() {
    let s = Shape::scalar();
    assert_eq!(s.dims, Vec::<usize>::new());
    assert_eq!(s.rank(), 0);
    assert_eq!(s.numel(), 1); // scalar has 1 element
    assert_eq!(s.level(), Level::Scalar);
}

#[test]
fn test_vector_constructor() {
    let v = Shape::vector(128);
    assert_eq!(v.dims, vec![128]);
    assert_eq!(v.rank(), 1);
    assert_eq!(v.numel(), 128);
    assert_eq!(v.rows(), 128);
    assert_eq!(v.cols(), 1);
}

#[test]
fn test_matrix_constructor() {
    let m = Shape::matrix(64, 128);
    assert_eq!(m.dims, vec![64, 128]);
    assert_eq!(m.rank(), 2);
    assert_eq!(m.numel(), 64 * 128);
    assert_eq!(m.level(), Level::Matrix);
}

#[test]
fn test_empty_matrix_has_no_elements() {
    assert_eq!(Shape::matrix(0, 3).numel(), 0);
    assert_eq!(Shape::vector(0).numel(), 0);
}

// ============================================================================
// Display Tests
// ============================================================================

#[test]
fn test_shape_display() {
    assert_eq!(Shape::scalar().to_string(), "f64[]");
    assert_eq!(Shape::vector(10).to_string(), "f64[10]");
    assert_eq!(Shape::matrix(3, 4).to_string(), "f64[3, 4]");
    assert_eq!(Level::Vector.to_string(), "vector");
}

// ============================================================================
// Axis Helpers
// ============================================================================

#[test]
fn test_transpose_and_element() {
    let m = Shape::matrix(2, 5);
    assert_eq!(m.transposed(), Shape::matrix(5, 2));
    assert_eq!(m.transposed().transposed(), m);
    assert_eq!(m.element(), Shape::vector(5));
    assert_eq!(Shape::vector(5).element(), Shape::scalar());
    assert_eq!(Shape::vector(5).transposed(), Shape::vector(5));
}

// ============================================================================
// Validation Tests
// ============================================================================

#[test]
fn test_validator_accepts_equal_shapes() {
    let v = RuntimeShapeValidator;
    assert!(v.validate(&Shape::matrix(2, 2), &Shape::matrix(2, 2)).is_ok());
}

#[test]
fn test_validator_reports_mismatch() {
    let v = RuntimeShapeValidator;
    let result = v.validate(&Shape::vector(3), &Shape::vector(2));
    match result {
        Err(CoreError::ShapeMismatch { expected, got }) => {
            assert_eq!(expected, Shape::vector(3));
            assert_eq!(got, Shape::vector(2));
        }
        _ => panic!("Expected ShapeMismatch error"),
    }
}

#[test]
fn test_mismatch_message() {
    let err = CoreError::ShapeMismatch {
        expected: Shape::vector(3),
        got: Shape::matrix(3, 1),
    };
    assert_eq!(err.to_string(), "Shape mismatch: expected f64[3], got f64[3, 1]");
}

// ============================================================================
// Static Shape Tests
// ============================================================================

#[test]
fn test_static_shapes() {
    assert_eq!(Mat3x3::to_shape(), Shape::matrix(3, 3));
    assert_eq!(Shape::of::<Vec3>(), Shape::vector(3));
}

struct Embedding16;

impl StaticShape for Embedding16 {
    const DIMS: &'static [usize] = &[16];
}

#[test]
fn test_custom_static_shape() {
    let s = Shape::of::<Embedding16>();
    assert_eq!(s.level(), Level::Vector);
    assert_eq!(s.numel(), 16);
}

#[test]
fn test_serde_round_trip() {
    let m = Shape::matrix(2, 3);
    let json = serde_json::to_string(&m).unwrap();
    assert_eq!(json, r#"{"dims":[2,3]}"#);
    let back: Shape = serde_json::from_str(&json).unwrap();
    assert_eq!(back, m);
}
