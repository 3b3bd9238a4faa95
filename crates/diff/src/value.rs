//! # Values - Fully Evaluated Results
//!
//! A [`Value`] is what an expression becomes once nothing symbolic is
//! left: a scalar, a vector, or a row-major matrix of `f64`.
//!
//! [`Expr::materialize`] is the strict boundary between the two worlds.
//! It reduces the expression, checks every container literal against its
//! declared shape, and converts the result, failing with
//! `UnboundVariable` if free variables remain.
//!
//! ```text
//!   Expr ──reduce──▶ Expr (residual) ──validate──▶ Value
//!                         │
//!                         └── free vars? ──▶ UnboundVariable
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use symbolic_core::{Level, RuntimeShapeValidator, Shape, ShapeValidator};

use crate::env::Environment;
use crate::error::{ExprError, Result};
use crate::eval::reduce;
use crate::expr::{Expr, Node};

/// A concrete scalar, vector or matrix.
///
/// Deserialization goes through [`Value::from_data`], so a stored value
/// whose data does not fill its shape is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawValue")]
pub struct Value {
    shape: Shape,
    data: Vec<f64>,
}

#[derive(Deserialize)]
struct RawValue {
    shape: Shape,
    data: Vec<f64>,
}

impl TryFrom<RawValue> for Value {
    type Error = ExprError;

    fn try_from(raw: RawValue) -> Result<Self> {
        Value::from_data(raw.shape, raw.data)
    }
}

impl Value {
    pub fn scalar(value: f64) -> Self {
        Self {
            shape: Shape::scalar(),
            data: vec![value],
        }
    }

    pub fn vector(data: Vec<f64>) -> Self {
        Self {
            shape: Shape::vector(data.len()),
            data,
        }
    }

    /// A matrix from its rows, which must all have the same length.
    pub fn matrix(rows: Vec<Vec<f64>>) -> Result<Self> {
        let cols = rows.first().map(Vec::len).ok_or(ExprError::EmptyContainer)?;
        let shape = Shape::matrix(rows.len(), cols);
        let mut data = Vec::with_capacity(shape.numel());
        for row in rows {
            if row.len() != cols {
                return Err(ExprError::ShapeMismatch {
                    expected: Shape::vector(cols),
                    got: Shape::vector(row.len()),
                });
            }
            data.extend(row);
        }
        Ok(Self { shape, data })
    }

    /// Row-major data with an explicit shape of rank two at most.
    pub fn from_data(shape: Shape, data: Vec<f64>) -> Result<Self> {
        shape.check_rank()?;
        if shape.numel() != data.len() {
            return Err(ExprError::ShapeMismatch {
                expected: shape,
                got: Shape::vector(data.len()),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: Shape) -> Self {
        Self::full(shape, 0.0)
    }

    pub fn full(shape: Shape, value: f64) -> Self {
        let data = vec![value; shape.numel()];
        Self { shape, data }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn level(&self) -> Level {
        self.shape.level()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self.shape.level() {
            Level::Scalar => self.data.first().copied(),
            _ => None,
        }
    }

    /// Element at `index`: `[]` for a scalar, `[i]` for a vector and
    /// `[i, j]` for a matrix.
    pub fn get(&self, index: &[usize]) -> Option<f64> {
        let offset = match (self.shape.level(), index) {
            (Level::Scalar, []) => 0,
            (Level::Vector, [i]) if *i < self.shape.rows() => *i,
            (Level::Matrix, [i, j]) if *i < self.shape.rows() && *j < self.shape.cols() => {
                i * self.shape.cols() + j
            }
            _ => return None,
        };
        self.data.get(offset).copied()
    }

    /// Rows of a matrix; a scalar or vector is one row.
    pub fn rows(&self) -> Vec<&[f64]> {
        match self.level() {
            Level::Matrix => self.data.chunks(self.shape.cols().max(1)).collect(),
            _ => vec![self.data.as_slice()],
        }
    }

    // ========================================================================
    // Arithmetic
    // ========================================================================

    fn zip_with(&self, other: &Value, op: &'static str, f: fn(f64, f64) -> f64) -> Result<Value> {
        if self.shape != other.shape {
            return Err(ExprError::IncompatibleOperands {
                op,
                left: self.shape.clone(),
                right: other.shape.clone(),
            });
        }
        let data = self.data.iter().zip(&other.data).map(|(a, b)| f(*a, *b)).collect();
        Ok(Value {
            shape: self.shape.clone(),
            data,
        })
    }

    pub fn add(&self, other: &Value) -> Result<Value> {
        self.zip_with(other, "sum", |a, b| a + b)
    }

    pub fn sub(&self, other: &Value) -> Result<Value> {
        self.zip_with(other, "difference", |a, b| a - b)
    }

    pub fn hadamard(&self, other: &Value) -> Result<Value> {
        self.zip_with(other, "hadamard", |a, b| a * b)
    }

    pub fn scale(&self, factor: f64) -> Value {
        self.map(|x| x * factor)
    }

    pub fn neg(&self) -> Value {
        self.map(|x| -x)
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Value {
        Value {
            shape: self.shape.clone(),
            data: self.data.iter().map(|x| f(*x)).collect(),
        }
    }

    /// Matrix-matrix or matrix-vector product.
    pub fn matmul(&self, other: &Value) -> Result<Value> {
        let incompatible = || ExprError::IncompatibleOperands {
            op: "matmul",
            left: self.shape.clone(),
            right: other.shape.clone(),
        };
        if self.level() != Level::Matrix || other.level() == Level::Scalar {
            return Err(incompatible());
        }
        let (m, n) = (self.shape.rows(), self.shape.cols());
        if other.shape.rows() != n {
            return Err(incompatible());
        }
        let p = other.shape.cols();

        let mut data = vec![0.0; m * p];
        for i in 0..m {
            for j in 0..p {
                let mut sum = 0.0;
                for k in 0..n {
                    sum += self.data[i * n + k] * other.data[k * p + j];
                }
                data[i * p + j] = sum;
            }
        }
        let shape = match other.level() {
            Level::Vector => Shape::vector(m),
            _ => Shape::matrix(m, p),
        };
        Ok(Value { shape, data })
    }

    pub fn transpose(&self) -> Value {
        if self.level() != Level::Matrix {
            return self.clone();
        }
        let (m, n) = (self.shape.rows(), self.shape.cols());
        let mut data = vec![0.0; m * n];
        for i in 0..m {
            for j in 0..n {
                data[j * m + i] = self.data[i * n + j];
            }
        }
        Value {
            shape: self.shape.transposed(),
            data,
        }
    }

    pub fn sum_all(&self) -> f64 {
        self.data.iter().sum()
    }

    /// Euclidean norm over every element.
    pub fn norm(&self) -> f64 {
        self.data.iter().map(|x| x * x).sum::<f64>().sqrt()
    }

    /// Same shape, and every element within `tolerance`.
    pub fn approx_eq(&self, other: &Value, tolerance: f64) -> bool {
        self.shape == other.shape
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(a, b)| (a - b).abs() <= tolerance)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level() {
            Level::Scalar => write!(f, "{}", self.data[0]),
            Level::Vector => write_row(f, &self.data),
            Level::Matrix => {
                write!(f, "[")?;
                for (i, row) in self.rows().into_iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write_row(f, row)?;
                }
                write!(f, "]")
            }
        }
    }
}

fn write_row(f: &mut fmt::Formatter<'_>, items: &[f64]) -> fmt::Result {
    write!(f, "[")?;
    for (i, x) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", x)?;
    }
    write!(f, "]")
}

impl From<&Value> for Expr {
    fn from(value: &Value) -> Self {
        match value.level() {
            Level::Scalar => Expr::constant(value.data[0]),
            Level::Vector => Expr::from(value.data.as_slice()),
            Level::Matrix => {
                let rows = value.rows().into_iter().map(Expr::from).collect();
                Expr::build(Node::Matrix(rows), value.shape.clone())
            }
        }
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::from(&value)
    }
}

// ============================================================================
// Materialization
// ============================================================================

impl Expr {
    /// Reduce to a concrete [`Value`] with the default shape validator.
    pub fn materialize(&self) -> Result<Value> {
        self.materialize_with(&RuntimeShapeValidator)
    }

    /// Reduce to a concrete [`Value`], checking every container literal
    /// against its declared shape with `validator`.
    pub fn materialize_with(&self, validator: &dyn ShapeValidator) -> Result<Value> {
        let reduced = reduce(self, &Environment::new())?;
        validate_literals(&reduced, validator)?;

        if !reduced.free_vars().is_empty() {
            return Err(ExprError::UnboundVariable {
                vars: reduced.free_vars().iter().cloned().collect(),
            });
        }
        to_value(&reduced)
    }
}

fn validate_literals(root: &Expr, validator: &dyn ShapeValidator) -> Result<()> {
    let mut stack = vec![root];
    while let Some(expr) = stack.pop() {
        let declared = expr.shape();
        match expr.node() {
            Node::Vector(items) => {
                validator.validate(declared, &Shape::vector(items.len()))?;
            }
            Node::Matrix(rows) => {
                validator.validate(declared, &Shape::matrix(rows.len(), declared.cols()))?;
                let row_shape = Shape::vector(declared.cols());
                for row in rows {
                    validator.validate(&row_shape, row.shape())?;
                }
            }
            _ => {}
        }
        stack.extend(expr.children());
    }
    Ok(())
}

fn to_value(expr: &Expr) -> Result<Value> {
    let not_reduced = || ExprError::UndefinedRule {
        kind: expr.kind(),
        reason: format!("{} did not reduce to a value", expr),
    };
    match expr.level() {
        Level::Scalar => expr.as_const().map(Value::scalar).ok_or_else(not_reduced),
        Level::Vector => {
            let items = expr.literal_items().ok_or_else(not_reduced)?;
            let data = items
                .iter()
                .map(|e| e.as_const().ok_or_else(not_reduced))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::vector(data))
        }
        Level::Matrix => {
            let grid = expr.literal_grid().ok_or_else(not_reduced)?;
            let mut data = Vec::with_capacity(expr.shape().numel());
            for row in grid {
                for e in row {
                    data.push(e.as_const().ok_or_else(not_reduced)?);
                }
            }
            Value::from_data(expr.shape().clone(), data)
        }
    }
}
