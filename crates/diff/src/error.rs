//! # Expression Errors
//!
//! Every failure of construction, evaluation or differentiation is a value
//! of [`ExprError`]. Nothing is retried; callers see the error as-is.

use symbolic_core::{CoreError, Shape};
use thiserror::Error;

use crate::env::Environment;
use crate::expr::{Expr, NodeKind};
use crate::var::Var;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprError {
    /// A container's declared extent disagrees with what it holds, or a
    /// binding's value has the wrong shape for its variable.
    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    /// An operator was applied to operands whose shapes it cannot combine.
    #[error("Cannot apply {op} to {left} and {right}")]
    IncompatibleOperands {
        op: &'static str,
        left: Shape,
        right: Shape,
    },

    /// A matrix literal needs at least one row to know its width.
    #[error("Matrix literal has no rows")]
    EmptyContainer,

    /// Positional application got the wrong number of arguments.
    #[error("Expected {expected} arguments, got {got}")]
    ArgumentCount { expected: usize, got: usize },

    /// A concrete value was requested but some variables are still free.
    #[error("Unbound variables: {}", format_vars(.vars))]
    UnboundVariable { vars: Vec<Var> },

    /// A variable the environment had already bound re-appeared in the
    /// result of a reduction step.
    #[error(
        "Variables {} escaped substitution\n  before: {before}\n  after: {after}\n  env: {env}",
        format_vars(.escaped)
    )]
    CapturedVariableEscape {
        escaped: Vec<Var>,
        before: Expr,
        after: Expr,
        env: Environment,
    },

    /// No differentiation rule applies.
    #[error("No differentiation rule for {kind}: {reason}")]
    UndefinedRule { kind: NodeKind, reason: String },

    /// Wiring failure while exporting a diagram.
    #[error(transparent)]
    Core(CoreError),
}

impl From<CoreError> for ExprError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ShapeMismatch { expected, got } => ExprError::ShapeMismatch { expected, got },
            other => ExprError::Core(other),
        }
    }
}

fn format_vars(vars: &[Var]) -> String {
    vars.iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, ExprError>;
