//! # Core - Shapes and Diagrams for Symbolic Expressions
//!
//! This crate provides the foundation the expression engine builds upon:
//!
//! - **Shapes**: Runtime extents of scalars, vectors and matrices
//! - **Validation**: The `ShapeValidator` collaborator consulted at materialization
//! - **Errors**: First-class shape and wiring failures
//! - **Diagrams**: A graph data model that expression graphs are exported to
//!
//! ## Design Philosophy
//!
//! Expressions are first-class values. Before anything is computed they can
//! be inspected, drawn as a diagram and checked for shape consistency.

pub mod diagram;
pub mod error;
pub mod shape;

// Re-export key types at crate root for convenience
pub use diagram::{Diagram, Edge, Node, Port};
pub use error::CoreError;
pub use shape::{Level, RuntimeShapeValidator, Shape, ShapeValidator, StaticShape};
