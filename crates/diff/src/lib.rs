//! # Diff - Symbolic Expressions with Exact Derivatives
//!
//! This crate builds algebraic expressions over scalars, vectors and
//! matrices, evaluates them under variable bindings, and differentiates
//! them symbolically. Derivatives are new expressions, not numbers.
//!
//! ## Core Concepts
//!
//! - **Expressions are immutable graphs**: smart constructors fold constants
//!   and identities as the graph is built, and subgraphs are shared
//! - **Environments are substitutions**: applying one is a single memoized
//!   pass that may leave a symbolic residual
//! - **Derivatives are rewrites**: one rule per operator kind, with the
//!   chain rule threaded through maps and matrix products
//! - **Laziness is a value**: an [`Evaluator`] carries its [`EvalMode`]
//!
//! ## Modules
//!
//! - [`expr`] - The expression graph and its node kinds
//! - [`algebra`] - Scalar builders and operator overloads
//! - [`container`] - Vector and matrix literals, products and maps
//! - [`env`] - Bindings from variables to expressions
//! - [`eval`] - Reduction and the [`Evaluator`]
//! - [`derive`] - The differentiation rules
//! - [`value`] - Concrete results and materialization
//! - [`export`] - Expression graphs as diagrams
//!
//! ## Example
//!
//! ```rust
//! use symbolic_diff::{Environment, Evaluator, Var};
//!
//! let x = Var::scalar("x");
//! let f = x.expr().pow(3.0)?;
//!
//! let df = Evaluator::eager().differentiate(&f, &x)?;
//! let env = Environment::new().with(&x, 2.0)?;
//! let value = symbolic_diff::evaluate_strict(&df, &env)?;
//! assert_eq!(value.as_scalar(), Some(12.0));
//! # Ok::<(), symbolic_diff::ExprError>(())
//! ```

pub mod algebra;
pub mod config;
pub mod constant;
pub mod container;
pub mod derive;
pub mod env;
pub mod error;
pub mod eval;
pub mod export;
pub mod expr;
mod task;
pub mod value;
pub mod var;

use std::collections::BTreeMap;

// Re-export key types
pub use config::{EvalConfig, EvalMode, ParseModeError, MODE_ENV_VAR};
pub use constant::Constant;
pub use env::Environment;
pub use error::{ExprError, Result};
pub use eval::Evaluator;
pub use export::{to_diagram, ExportNode};
pub use expr::{Composition, Expr, Node, NodeKind};
pub use symbolic_core::{Level, Shape, ShapeValidator};
pub use value::Value;
pub use var::{Var, VarId};

/// Reduce `expr` under `env`, returning whatever residual remains.
pub fn evaluate(expr: &Expr, env: &Environment) -> Result<Expr> {
    Evaluator::default().evaluate(expr, env)
}

/// Reduce `expr` under `env` to a concrete [`Value`].
pub fn evaluate_strict(expr: &Expr, env: &Environment) -> Result<Value> {
    Evaluator::default().evaluate_strict(expr, env)
}

/// `∂expr/∂var` as a pending derivative; see [`Evaluator::differentiate`].
pub fn differentiate(expr: &Expr, var: &Var) -> Result<Expr> {
    Evaluator::default().differentiate(expr, var)
}

/// Partial derivatives of a scalar expression, one per free variable.
pub fn gradient(expr: &Expr) -> Result<BTreeMap<Var, Expr>> {
    Evaluator::default().gradient(expr)
}

/// Jacobian of a vector expression with respect to a vector variable.
pub fn jacobian(expr: &Expr, var: &Var) -> Result<Expr> {
    Evaluator::default().jacobian(expr, var)
}
