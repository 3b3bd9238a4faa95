//! # Expressions - Immutable Algebraic Graphs
//!
//! An [`Expr`] is a shared, immutable node: a variable, a constant, or an
//! operator over child expressions. Sub-expressions are freely shared, so a
//! graph built by differentiation is a DAG rather than a tree.
//!
//! ## Key Concepts
//!
//! - **Node**: closed enum of node kinds; every consumer matches exhaustively
//! - **Shape**: computed once at construction from the operands
//! - **Free variables**: computed once at construction, shared between
//!   parents and children where nothing changes
//! - **Markers**: `Derivative` and `Composition` nodes stand for work that
//!   has not been done yet; the evaluator expands them
//!
//! Dropping, comparing and printing expressions never recurse, so graphs of
//! any depth are safe to build, log and discard.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, OnceLock};

use symbolic_core::{Level, Shape};

use crate::constant::Constant;
use crate::env::Environment;
use crate::error::{ExprError, Result};
use crate::var::Var;

/// The kind of an expression node, without its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Var,
    Const,
    Neg,
    Log,
    Sin,
    Cos,
    Tan,
    Transpose,
    SumAll,
    SumRows,
    Sum,
    Prod,
    Hadamard,
    MatMul,
    Pow,
    Dot,
    Map,
    Vector,
    Matrix,
    Derivative,
    Composition,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Var => "var",
            NodeKind::Const => "const",
            NodeKind::Neg => "neg",
            NodeKind::Log => "log",
            NodeKind::Sin => "sin",
            NodeKind::Cos => "cos",
            NodeKind::Tan => "tan",
            NodeKind::Transpose => "transpose",
            NodeKind::SumAll => "sum_all",
            NodeKind::SumRows => "sum_rows",
            NodeKind::Sum => "sum",
            NodeKind::Prod => "prod",
            NodeKind::Hadamard => "hadamard",
            NodeKind::MatMul => "matmul",
            NodeKind::Pow => "pow",
            NodeKind::Dot => "dot",
            NodeKind::Map => "map",
            NodeKind::Vector => "vector",
            NodeKind::Matrix => "matrix",
            NodeKind::Derivative => "derivative",
            NodeKind::Composition => "composition",
        };
        write!(f, "{}", name)
    }
}

/// A node of the expression graph.
///
/// Binary nodes keep their operands in order. `Prod` always has its scalar
/// factor on the left. `Vector` and `Matrix` literals carry a declared shape
/// on the owning [`Expr`] which may disagree with their contents until
/// materialization checks it.
#[derive(Debug)]
pub enum Node {
    Var(Var),
    Const(Constant),
    Neg(Expr),
    /// `log_base(arg)`; the natural log has base `e`.
    Log { arg: Expr, base: Expr },
    Sin(Expr),
    Cos(Expr),
    Tan(Expr),
    Transpose(Expr),
    /// Sum of every element of a container.
    SumAll(Expr),
    /// Row sums of a matrix, as a vector.
    SumRows(Expr),
    Sum(Expr, Expr),
    Prod(Expr, Expr),
    Hadamard(Expr, Expr),
    /// Contraction over `inner`, the shared extent of the operands.
    MatMul { left: Expr, right: Expr, inner: usize },
    Pow(Expr, Expr),
    Dot(Expr, Expr),
    /// `body` evaluated at every scalar element of `input`, with `param`
    /// standing for that element. `param` never escapes the node.
    Map { input: Expr, body: Expr, param: Var },
    Vector(Vec<Expr>),
    /// Rows are vector expressions.
    Matrix(Vec<Expr>),
    Derivative { target: Expr, var: Var },
    Composition(Composition),
}

/// A pending application of an environment to an expression.
///
/// The result of reducing `target` under `env` alone is computed at most
/// once and then shared by every reader.
#[derive(Debug)]
pub struct Composition {
    pub(crate) target: Expr,
    pub(crate) env: Environment,
    pub(crate) memo: OnceLock<Expr>,
}

impl Composition {
    pub fn target(&self) -> &Expr {
        &self.target
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// The memoized reduction, if it has been computed.
    pub fn memoized(&self) -> Option<&Expr> {
        self.memo.get()
    }
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Var(_) => NodeKind::Var,
            Node::Const(_) => NodeKind::Const,
            Node::Neg(_) => NodeKind::Neg,
            Node::Log { .. } => NodeKind::Log,
            Node::Sin(_) => NodeKind::Sin,
            Node::Cos(_) => NodeKind::Cos,
            Node::Tan(_) => NodeKind::Tan,
            Node::Transpose(_) => NodeKind::Transpose,
            Node::SumAll(_) => NodeKind::SumAll,
            Node::SumRows(_) => NodeKind::SumRows,
            Node::Sum(..) => NodeKind::Sum,
            Node::Prod(..) => NodeKind::Prod,
            Node::Hadamard(..) => NodeKind::Hadamard,
            Node::MatMul { .. } => NodeKind::MatMul,
            Node::Pow(..) => NodeKind::Pow,
            Node::Dot(..) => NodeKind::Dot,
            Node::Map { .. } => NodeKind::Map,
            Node::Vector(_) => NodeKind::Vector,
            Node::Matrix(_) => NodeKind::Matrix,
            Node::Derivative { .. } => NodeKind::Derivative,
            Node::Composition(_) => NodeKind::Composition,
        }
    }

    /// Child expressions in a fixed order.
    ///
    /// A map yields `[input, body]`; a composition yields its target
    /// followed by its binding values in variable order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Node::Var(_) | Node::Const(_) => Vec::new(),
            Node::Neg(a)
            | Node::Sin(a)
            | Node::Cos(a)
            | Node::Tan(a)
            | Node::Transpose(a)
            | Node::SumAll(a)
            | Node::SumRows(a) => vec![a],
            Node::Log { arg, base } => vec![arg, base],
            Node::Sum(a, b)
            | Node::Prod(a, b)
            | Node::Hadamard(a, b)
            | Node::Pow(a, b)
            | Node::Dot(a, b) => vec![a, b],
            Node::MatMul { left, right, .. } => vec![left, right],
            Node::Map { input, body, .. } => vec![input, body],
            Node::Vector(items) | Node::Matrix(items) => items.iter().collect(),
            Node::Derivative { target, .. } => vec![target],
            Node::Composition(c) => {
                let mut out = vec![&c.target];
                out.extend(c.env.values());
                out
            }
        }
    }

    /// Move every child out, leaving a constant behind.
    fn take_children(&mut self) -> Vec<Expr> {
        match std::mem::replace(self, Node::Const(Constant::Zero)) {
            Node::Var(_) | Node::Const(_) => Vec::new(),
            Node::Neg(a)
            | Node::Sin(a)
            | Node::Cos(a)
            | Node::Tan(a)
            | Node::Transpose(a)
            | Node::SumAll(a)
            | Node::SumRows(a) => vec![a],
            Node::Log { arg, base } => vec![arg, base],
            Node::Sum(a, b)
            | Node::Prod(a, b)
            | Node::Hadamard(a, b)
            | Node::Pow(a, b)
            | Node::Dot(a, b) => vec![a, b],
            Node::MatMul { left, right, .. } => vec![left, right],
            Node::Map { input, body, .. } => vec![input, body],
            Node::Vector(items) | Node::Matrix(items) => items,
            Node::Derivative { target, .. } => vec![target],
            Node::Composition(mut c) => {
                let mut out = vec![c.target];
                out.extend(c.env.into_values());
                out.extend(c.memo.take());
                out
            }
        }
    }
}

struct ExprInner {
    node: Node,
    shape: Shape,
    free: Arc<BTreeSet<Var>>,
    has_markers: bool,
}

impl Drop for ExprInner {
    fn drop(&mut self) {
        let mut stack = self.node.take_children();
        while let Some(expr) = stack.pop() {
            if let Ok(mut inner) = Arc::try_unwrap(expr.0) {
                stack.extend(inner.node.take_children());
            }
        }
    }
}

/// A shared, immutable expression.
#[derive(Clone)]
pub struct Expr(Arc<ExprInner>);

impl Expr {
    /// Wrap a node whose shape has already been checked.
    pub(crate) fn build(node: Node, shape: Shape) -> Expr {
        let free = match &node {
            Node::Var(v) => Arc::new(BTreeSet::from([v.clone()])),
            Node::Map { input, body, param } => {
                let mut body_free = body.free_vars().clone();
                if body_free.remove(param) {
                    union([input.free_arc(), &Arc::new(body_free)])
                } else {
                    union([input.free_arc(), body.free_arc()])
                }
            }
            Node::Composition(c) => Arc::new(c.env.resolve_free(c.target.free_vars())),
            other => union(other.children().into_iter().map(Expr::free_arc)),
        };
        let has_markers = matches!(node, Node::Derivative { .. } | Node::Composition(_))
            || node.children().iter().any(|c| c.has_markers());
        Expr(Arc::new(ExprInner {
            node,
            shape,
            free,
            has_markers,
        }))
    }

    pub fn constant(value: f64) -> Expr {
        Expr::from(Constant::new(value))
    }

    pub fn zero() -> Expr {
        Expr::from(Constant::Zero)
    }

    pub fn one() -> Expr {
        Expr::from(Constant::One)
    }

    pub fn two() -> Expr {
        Expr::from(Constant::Two)
    }

    /// Euler's number.
    pub fn e() -> Expr {
        Expr::from(Constant::E)
    }

    /// A pending derivative of `target` with respect to `var`.
    ///
    /// The marker already has the shape of the derivative it stands for:
    /// the target's shape for a scalar variable, the variable's shape for a
    /// scalar target, and `m × n` for a vector of `m` against a vector
    /// variable of `n`.
    pub fn derivative(target: Expr, var: &Var) -> Result<Expr> {
        let shape = derivative_shape(&target, var)?;
        Ok(Expr::build(
            Node::Derivative {
                target,
                var: var.clone(),
            },
            shape,
        ))
    }

    /// A pending application of `env` to `target`.
    pub fn composition(target: Expr, env: Environment) -> Expr {
        let shape = target.shape().clone();
        Expr::build(
            Node::Composition(Composition {
                target,
                env,
                memo: OnceLock::new(),
            }),
            shape,
        )
    }

    pub fn node(&self) -> &Node {
        &self.0.node
    }

    pub fn kind(&self) -> NodeKind {
        self.0.node.kind()
    }

    pub fn children(&self) -> Vec<&Expr> {
        self.0.node.children()
    }

    pub fn shape(&self) -> &Shape {
        &self.0.shape
    }

    pub fn level(&self) -> Level {
        self.0.shape.level()
    }

    /// Variables this expression still depends on.
    pub fn free_vars(&self) -> &BTreeSet<Var> {
        &self.0.free
    }

    fn free_arc(&self) -> &Arc<BTreeSet<Var>> {
        &self.0.free
    }

    /// True if the graph contains a derivative or composition marker.
    pub fn has_markers(&self) -> bool {
        self.0.has_markers
    }

    /// True if the value of this expression can change with `var`.
    pub fn depends_on(&self, var: &Var) -> bool {
        self.free_vars().iter().any(|v| var.is_within(v) || v.is_within(var))
    }

    pub fn ptr_eq(&self, other: &Expr) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Identity of the shared node, stable while the expression is alive.
    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub fn as_const(&self) -> Option<f64> {
        match &self.0.node {
            Node::Const(c) => Some(c.value()),
            _ => None,
        }
    }

    pub fn as_var(&self) -> Option<&Var> {
        match &self.0.node {
            Node::Var(v) => Some(v),
            _ => None,
        }
    }

    /// Elements of a vector literal or rows of a matrix literal whose
    /// contents agree with the declared shape.
    pub fn literal_items(&self) -> Option<&[Expr]> {
        match &self.0.node {
            Node::Vector(items) if items.len() == self.0.shape.rows() => Some(items),
            Node::Matrix(rows)
                if rows.len() == self.0.shape.rows()
                    && rows.iter().all(|r| r.shape().rows() == self.0.shape.cols()) =>
            {
                Some(rows)
            }
            _ => None,
        }
    }

    /// Entries of a literal matrix whose rows are literals too.
    pub(crate) fn literal_grid(&self) -> Option<Vec<&[Expr]>> {
        match &self.0.node {
            Node::Matrix(_) => self
                .literal_items()?
                .iter()
                .map(|row| row.literal_items())
                .collect(),
            _ => None,
        }
    }

    /// The additive identity of its shape: zero, or a literal of zeros.
    pub fn is_zero(&self) -> bool {
        match &self.0.node {
            Node::Const(c) => c.is_zero(),
            Node::Vector(_) => self
                .literal_items()
                .is_some_and(|items| items.iter().all(|e| e.as_const() == Some(0.0))),
            Node::Matrix(_) => self.literal_grid().is_some_and(|rows| {
                rows.iter()
                    .all(|row| row.iter().all(|e| e.as_const() == Some(0.0)))
            }),
            _ => false,
        }
    }

    pub fn is_one(&self) -> bool {
        matches!(&self.0.node, Node::Const(c) if c.is_one())
    }

    /// Fully reduced: a constant, or a literal made only of constants.
    pub fn is_constant(&self) -> bool {
        match &self.0.node {
            Node::Const(_) => true,
            Node::Vector(items) => items.iter().all(|e| e.as_const().is_some()),
            Node::Matrix(rows) => rows.iter().all(|row| match row.node() {
                Node::Vector(items) => items.iter().all(|e| e.as_const().is_some()),
                _ => false,
            }),
            _ => false,
        }
    }
}

fn union<'a>(sets: impl IntoIterator<Item = &'a Arc<BTreeSet<Var>>>) -> Arc<BTreeSet<Var>> {
    let mut non_empty: Vec<&Arc<BTreeSet<Var>>> =
        sets.into_iter().filter(|s| !s.is_empty()).collect();
    match non_empty.len() {
        0 => Arc::new(BTreeSet::new()),
        1 => non_empty[0].clone(),
        _ => {
            non_empty.sort_by_key(|s| std::cmp::Reverse(s.len()));
            if non_empty[1..]
                .iter()
                .all(|s| s.is_subset(non_empty[0]))
            {
                return non_empty[0].clone();
            }
            let mut merged = (**non_empty[0]).clone();
            for set in &non_empty[1..] {
                merged.extend(set.iter().cloned());
            }
            Arc::new(merged)
        }
    }
}

pub(crate) fn derivative_shape(target: &Expr, var: &Var) -> Result<Shape> {
    match (target.level(), var.level()) {
        (_, Level::Scalar) => Ok(target.shape().clone()),
        (Level::Scalar, _) => Ok(var.shape().clone()),
        (Level::Vector, Level::Vector) => {
            Ok(Shape::matrix(target.shape().rows(), var.shape().rows()))
        }
        (target_level, var_level) => Err(ExprError::UndefinedRule {
            kind: target.kind(),
            reason: format!("derivative of a {} with respect to a {}", target_level, var_level),
        }),
    }
}

impl From<Constant> for Expr {
    fn from(c: Constant) -> Self {
        Expr::build(Node::Const(c), Shape::scalar())
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::constant(value)
    }
}

impl From<&Var> for Expr {
    fn from(var: &Var) -> Self {
        Expr::build(Node::Var(var.clone()), var.shape().clone())
    }
}

impl From<Var> for Expr {
    fn from(var: Var) -> Self {
        Expr::from(&var)
    }
}

impl From<&Expr> for Expr {
    fn from(expr: &Expr) -> Self {
        expr.clone()
    }
}

fn same_head(a: &Expr, b: &Expr) -> bool {
    if a.shape() != b.shape() {
        return false;
    }
    match (a.node(), b.node()) {
        (Node::Var(x), Node::Var(y)) => x == y,
        (Node::Const(x), Node::Const(y)) => x == y,
        (Node::MatMul { inner: i, .. }, Node::MatMul { inner: j, .. }) => i == j,
        (Node::Map { param: p, .. }, Node::Map { param: q, .. }) => p == q,
        (Node::Derivative { var: v, .. }, Node::Derivative { var: w, .. }) => v == w,
        (Node::Composition(c), Node::Composition(d)) => c.env.vars().eq(d.env.vars()),
        (x, y) => x.kind() == y.kind(),
    }
}

impl PartialEq for Expr {
    /// Structural equality; variables compare by identity.
    fn eq(&self, other: &Self) -> bool {
        let mut pending = vec![(self, other)];
        while let Some((a, b)) = pending.pop() {
            if a.ptr_eq(b) {
                continue;
            }
            if !same_head(a, b) {
                return false;
            }
            let (xs, ys) = (a.children(), b.children());
            if xs.len() != ys.len() {
                return false;
            }
            pending.extend(xs.into_iter().zip(ys));
        }
        true
    }
}

/// One piece of printed output, laid out in order.
enum Piece<'a> {
    Expr(&'a Expr),
    Var(&'a Var),
    Const(&'a Constant),
    Text(&'static str),
}

fn infix<'a>(a: &'a Expr, op: &'static str, b: &'a Expr) -> Vec<Piece<'a>> {
    vec![Piece::Text("("), Piece::Expr(a), Piece::Text(op), Piece::Expr(b), Piece::Text(")")]
}

fn call<'a>(name: &'static str, a: &'a Expr) -> Vec<Piece<'a>> {
    vec![Piece::Text(name), Piece::Expr(a), Piece::Text(")")]
}

impl Expr {
    /// The pieces this node prints as; children stay unexpanded.
    fn layout(&self) -> Vec<Piece<'_>> {
        use Piece::{Expr as E, Text as T};

        match self.node() {
            Node::Var(v) => vec![Piece::Var(v)],
            Node::Const(c) => vec![Piece::Const(c)],
            Node::Neg(a) => vec![T("-"), E(a)],
            Node::Log { arg, base } => match base.as_const() {
                Some(b) if b == std::f64::consts::E => call("ln(", arg),
                _ => vec![T("log("), E(arg), T(", "), E(base), T(")")],
            },
            Node::Sin(a) => call("sin(", a),
            Node::Cos(a) => call("cos(", a),
            Node::Tan(a) => call("tan(", a),
            Node::Transpose(a) => vec![E(a), T("ᵀ")],
            Node::SumAll(a) => call("sum(", a),
            Node::SumRows(a) => call("sum_rows(", a),
            Node::Sum(a, b) => infix(a, " + ", b),
            Node::Prod(a, b) => infix(a, " * ", b),
            Node::Hadamard(a, b) => infix(a, " ⊙ ", b),
            Node::MatMul { left, right, .. } => infix(left, " @ ", right),
            Node::Pow(a, b) => infix(a, " ^ ", b),
            Node::Dot(a, b) => infix(a, " · ", b),
            Node::Map { input, body, param } => vec![
                T("map("),
                E(input),
                T(", "),
                Piece::Var(param),
                T(" -> "),
                E(body),
                T(")"),
            ],
            Node::Vector(items) | Node::Matrix(items) => {
                let mut out = vec![T("[")];
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(T(", "));
                    }
                    out.push(E(item));
                }
                out.push(T("]"));
                out
            }
            Node::Derivative { target, var } => {
                vec![T("d("), E(target), T(")/d("), Piece::Var(var), T(")")]
            }
            Node::Composition(c) => {
                let mut out = vec![T("("), E(&c.target), T("){")];
                let entries = c.env.iter().filter(|(k, _)| k.owner().is_none());
                for (i, (var, value)) in entries.enumerate() {
                    if i > 0 {
                        out.push(T(", "));
                    }
                    out.extend([Piece::Var(var), T(" = "), E(value)]);
                }
                out.push(T("}"));
                out
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pending = vec![Piece::Expr(self)];
        while let Some(piece) = pending.pop() {
            match piece {
                Piece::Text(text) => f.write_str(text)?,
                Piece::Var(v) => write!(f, "{}", v)?,
                Piece::Const(c) => write!(f, "{}", c)?,
                Piece::Expr(e) => pending.extend(e.layout().into_iter().rev()),
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self, self.shape())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_equality_is_by_name() {
        let a = Expr::from(Var::scalar("x"));
        let b = Expr::from(Var::scalar("x"));
        assert_eq!(a, b);
        assert!(!a.ptr_eq(&b));
    }

    #[test]
    fn test_free_vars_of_leaf() {
        let x = Var::scalar("x");
        assert_eq!(x.expr().free_vars(), &BTreeSet::from([x]));
        assert!(Expr::constant(3.0).free_vars().is_empty());
    }

    #[test]
    fn test_constructed_constants_are_canonical() {
        assert!(Expr::constant(0.0).is_zero());
        assert!(Expr::constant(1.0).is_one());
        assert_eq!(Expr::constant(2.0), Expr::two());
    }

    #[test]
    fn test_derivative_marker_shape() {
        let v = Var::vector("v", 3);
        let x = Var::scalar("x");
        let m = Var::matrix("m", 2, 2);

        let d = Expr::derivative(v.expr(), &x).unwrap();
        assert_eq!(d.shape(), &Shape::vector(3));
        assert!(d.has_markers());

        let j = Expr::derivative(v.expr(), &v).unwrap();
        assert_eq!(j.shape(), &Shape::matrix(3, 3));

        let bad = Expr::derivative(m.expr(), &v);
        assert!(matches!(bad, Err(ExprError::UndefinedRule { .. })));
    }

    #[test]
    fn test_deep_graph_drops_and_compares_without_overflow() {
        let x = Var::scalar("x");
        let mut a = x.expr();
        let mut b = x.expr();
        for _ in 0..200_000 {
            a = Expr::build(Node::Sin(a), Shape::scalar());
            b = Expr::build(Node::Sin(b), Shape::scalar());
        }
        assert_eq!(a, b);
        drop(a);
        drop(b);
    }

    #[test]
    fn test_deep_graph_prints_without_overflow() {
        let printed = std::thread::Builder::new()
            .stack_size(2 << 20)
            .spawn(|| {
                let mut e = Var::scalar("x").expr();
                for _ in 0..100_000 {
                    e = Expr::build(Node::Sin(e), Shape::scalar());
                }
                e.to_string()
            })
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(printed.len(), 100_000 * "sin()".len() + 1);
        assert!(printed.starts_with("sin(sin("));
        assert!(printed.ends_with("(x))"));
    }

    #[test]
    fn test_display_forms() {
        let x = Var::scalar("x");
        let v = Var::vector("v", 2);
        let sum = Expr::build(Node::Sum(x.expr(), Expr::two()), Shape::scalar());
        assert_eq!(sum.to_string(), "(x + 2)");
        let ln = Expr::build(
            Node::Log { arg: x.expr(), base: Expr::from(Constant::E) },
            Shape::scalar(),
        );
        assert_eq!(ln.to_string(), "ln(x)");
        let lit = Expr::build(Node::Vector(vec![x.expr(), Expr::one()]), Shape::vector(2));
        assert_eq!(lit.to_string(), "[x, 1]");
        let d = Expr::derivative(v.expr(), &x).unwrap();
        assert_eq!(d.to_string(), "d(v)/d(x)");
        let env = Environment::new().with(&x, 3.0).unwrap();
        let pending = Expr::composition(sum, env);
        assert_eq!(pending.to_string(), "((x + 2)){x = 3}");
    }
}
