//! # Expression Algebra - Folding Smart Constructors
//!
//! Every operator node is built through a constructor that simplifies
//! locally before allocating anything:
//!
//! | Input | Result |
//! |-------|--------|
//! | `c1 + c2`, `c1 * c2`, `c1 ^ c2` | one constant |
//! | `x + 0`, `x * 1`, `x ^ 1` | `x` |
//! | `x * 0` | zero of the product's shape |
//! | `x - x` | zero of `x`'s shape |
//! | `x + x` | `2 * x` |
//! | `-(-x)` | `x` |
//! | `x ^ 0`, `1 ^ x` | one |
//! | `sin(c)`, `log(c1, c2)`, ... | one constant |
//!
//! Constants follow IEEE-754: `ln(0)` is `-inf`, `1 / 0` is `inf`, and
//! `ln(-1)` is NaN. Nothing intercepts them.
//!
//! The `std::ops` operators are thin wrappers over the named constructors
//! and panic on a shape error; the named constructors return it.

use std::ops::{Add, Div, Mul, Neg, Sub};

use symbolic_core::{Level, Shape};

use crate::error::{ExprError, Result};
use crate::expr::{Expr, Node};

pub(crate) fn incompatible(op: &'static str, left: &Expr, right: &Expr) -> ExprError {
    ExprError::IncompatibleOperands {
        op,
        left: left.shape().clone(),
        right: right.shape().clone(),
    }
}

fn require_scalar(op: &'static str, left: &Expr, right: &Expr) -> Result<()> {
    if left.level() == Level::Scalar && right.level() == Level::Scalar {
        Ok(())
    } else {
        Err(incompatible(op, left, right))
    }
}

fn fold_unary(op: &'static str, a: &Expr, f: fn(f64) -> f64, node: fn(Expr) -> Node) -> Result<Expr> {
    if a.level() != Level::Scalar {
        return Err(incompatible(op, a, a));
    }
    Ok(match a.as_const() {
        Some(c) => Expr::constant(f(c)),
        None => Expr::build(node(a.clone()), Shape::scalar()),
    })
}

impl Expr {
    /// `a + b` for operands of equal shape.
    pub fn sum(a: &Expr, b: &Expr) -> Result<Expr> {
        if a.shape() != b.shape() {
            return Err(incompatible("sum", a, b));
        }
        if let (Some(x), Some(y)) = (a.as_const(), b.as_const()) {
            return Ok(Expr::constant(x + y));
        }
        if a.is_zero() {
            return Ok(b.clone());
        }
        if b.is_zero() {
            return Ok(a.clone());
        }
        if cancels(a, b) {
            return Ok(Expr::zeros(a.shape()));
        }
        if a == b {
            return Expr::product(&Expr::two(), a);
        }
        if let Some(folded) = Expr::zip_literals(a, b, Expr::sum)? {
            return Ok(folded);
        }
        Ok(Expr::build(Node::Sum(a.clone(), b.clone()), a.shape().clone()))
    }

    /// `a - b`, built as `a + (-b)`.
    pub fn difference(a: &Expr, b: &Expr) -> Result<Expr> {
        Expr::sum(a, &Expr::negate(b)?)
    }

    pub fn negate(a: &Expr) -> Result<Expr> {
        if let Some(c) = a.as_const() {
            return Ok(Expr::constant(-c));
        }
        if let Node::Neg(inner) = a.node() {
            return Ok(inner.clone());
        }
        if a.is_zero() {
            return Ok(a.clone());
        }
        if let Some(folded) = Expr::map_literal(a, Expr::negate)? {
            return Ok(folded);
        }
        Ok(Expr::build(Node::Neg(a.clone()), a.shape().clone()))
    }

    /// `a * b`.
    ///
    /// Two scalars multiply; a scalar scales a container from either side;
    /// two containers contract as a matrix product.
    pub fn product(a: &Expr, b: &Expr) -> Result<Expr> {
        match (a.level(), b.level()) {
            (Level::Scalar, Level::Scalar) => {
                if let (Some(x), Some(y)) = (a.as_const(), b.as_const()) {
                    return Ok(Expr::constant(x * y));
                }
                if a.is_zero() || b.is_zero() {
                    return Ok(Expr::zero());
                }
                if a.is_one() {
                    return Ok(b.clone());
                }
                if b.is_one() {
                    return Ok(a.clone());
                }
                Ok(Expr::build(Node::Prod(a.clone(), b.clone()), Shape::scalar()))
            }
            (Level::Scalar, _) => Expr::scale(a, b),
            (_, Level::Scalar) => Expr::scale(b, a),
            _ => Expr::matrix_product(a, b),
        }
    }

    /// `a / b` for a scalar divisor, built as `a * b^-1`.
    pub fn quotient(a: &Expr, b: &Expr) -> Result<Expr> {
        if b.level() != Level::Scalar {
            return Err(incompatible("quotient", a, b));
        }
        if let (Some(x), Some(y)) = (a.as_const(), b.as_const()) {
            return Ok(Expr::constant(x / y));
        }
        if a.is_zero() {
            return Ok(a.clone());
        }
        Expr::product(a, &Expr::power(b, &Expr::constant(-1.0))?)
    }

    pub fn power(base: &Expr, exponent: &Expr) -> Result<Expr> {
        require_scalar("pow", base, exponent)?;
        if let (Some(b), Some(e)) = (base.as_const(), exponent.as_const()) {
            return Ok(Expr::constant(b.powf(e)));
        }
        if exponent.is_zero() || base.is_one() {
            return Ok(Expr::one());
        }
        if exponent.is_one() {
            return Ok(base.clone());
        }
        Ok(Expr::build(
            Node::Pow(base.clone(), exponent.clone()),
            Shape::scalar(),
        ))
    }

    /// `log_base(arg)`.
    pub fn logarithm(arg: &Expr, base: &Expr) -> Result<Expr> {
        require_scalar("log", arg, base)?;
        if let (Some(a), Some(b)) = (arg.as_const(), base.as_const()) {
            return Ok(Expr::constant(a.ln() / b.ln()));
        }
        if arg.is_one() {
            return Ok(Expr::zero());
        }
        if arg == base {
            return Ok(Expr::one());
        }
        Ok(Expr::build(
            Node::Log {
                arg: arg.clone(),
                base: base.clone(),
            },
            Shape::scalar(),
        ))
    }

    pub fn sine(a: &Expr) -> Result<Expr> {
        fold_unary("sin", a, f64::sin, Node::Sin)
    }

    pub fn cosine(a: &Expr) -> Result<Expr> {
        fold_unary("cos", a, f64::cos, Node::Cos)
    }

    pub fn tangent(a: &Expr) -> Result<Expr> {
        fold_unary("tan", a, f64::tan, Node::Tan)
    }

    // ------------------------------------------------------------------
    // Method forms
    // ------------------------------------------------------------------

    pub fn pow(&self, exponent: impl Into<Expr>) -> Result<Expr> {
        Expr::power(self, &exponent.into())
    }

    /// Natural logarithm.
    pub fn ln(&self) -> Result<Expr> {
        Expr::logarithm(self, &Expr::e())
    }

    pub fn log(&self, base: impl Into<Expr>) -> Result<Expr> {
        Expr::logarithm(self, &base.into())
    }

    /// `e^self`.
    pub fn exp(&self) -> Result<Expr> {
        Expr::power(&Expr::e(), self)
    }

    /// `self^(1/2)`.
    pub fn sqrt(&self) -> Result<Expr> {
        Expr::power(self, &Expr::constant(0.5))
    }

    pub fn sin(&self) -> Result<Expr> {
        Expr::sine(self)
    }

    pub fn cos(&self) -> Result<Expr> {
        Expr::cosine(self)
    }

    pub fn tan(&self) -> Result<Expr> {
        Expr::tangent(self)
    }
}

/// `a + b` where one side is the negation of the other.
fn cancels(a: &Expr, b: &Expr) -> bool {
    match (a.node(), b.node()) {
        (_, Node::Neg(inner)) if inner == a => true,
        (Node::Neg(inner), _) if inner == b => true,
        _ => false,
    }
}

// ============================================================================
// Operators
// ============================================================================

fn operator(result: Result<Expr>) -> Expr {
    match result {
        Ok(expr) => expr,
        Err(err) => panic!("{}", err),
    }
}

macro_rules! binary_operator {
    ($trait:ident, $method:ident, $builder:path) => {
        /// # Panics
        ///
        /// Panics if the operand shapes are incompatible.
        impl $trait<Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                operator($builder(&self, &rhs))
            }
        }

        impl $trait<&Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                operator($builder(&self, rhs))
            }
        }

        impl $trait<Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                operator($builder(self, &rhs))
            }
        }

        impl $trait<&Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                operator($builder(self, rhs))
            }
        }

        impl $trait<f64> for Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                operator($builder(&self, &Expr::constant(rhs)))
            }
        }

        impl $trait<f64> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                operator($builder(self, &Expr::constant(rhs)))
            }
        }

        impl $trait<Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                operator($builder(&Expr::constant(self), &rhs))
            }
        }

        impl $trait<&Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                operator($builder(&Expr::constant(self), rhs))
            }
        }
    };
}

binary_operator!(Add, add, Expr::sum);
binary_operator!(Sub, sub, Expr::difference);
binary_operator!(Mul, mul, Expr::product);
binary_operator!(Div, div, Expr::quotient);

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        operator(Expr::negate(&self))
    }
}

impl Neg for &Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        operator(Expr::negate(self))
    }
}
