//! # Evaluation - Reducing Expressions under an Environment
//!
//! [`reduce`] walks an expression with an explicit work stack, substituting
//! bound variables, expanding derivative markers, evaluating compositions
//! and rebuilding every operator through its folding constructor.
//!
//! ## Algorithm
//!
//! For each `(expr, env)`:
//!
//! 1. A variable with a replacement reduces to that replacement, reduced
//!    under the environment without the variable.
//! 2. A component whose container is bound reduces to the matching part of
//!    the container's reduced value.
//! 3. A derivative marker is expanded by the differentiator and reduced.
//! 4. A composition is evaluated on its own first: its target reduced under
//!    its captured environment, memoized on the node. That residual is then
//!    reduced under the current environment.
//! 5. Every other node reduces its children and is rebuilt, so constants
//!    fold as soon as they appear.
//!
//! After each step the environment's consistency check runs on the result.
//! Results are cached per call by node and environment identity, so shared
//! sub-graphs are reduced once.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use symbolic_core::Level;
use tracing::{debug, trace};

use crate::config::{EvalConfig, EvalMode};
use crate::derive::derive;
use crate::env::Environment;
use crate::error::{ExprError, Result};
use crate::expr::{Expr, Node};
use crate::task::{drive, Answers, Poll, Request, Task};
use crate::value::Value;
use crate::var::Var;

/// Reduce `expr` under `env`, returning the residual expression.
pub fn reduce(expr: &Expr, env: &Environment) -> Result<Expr> {
    drive(Task::reduce(expr, env))
}

enum Frame {
    Visit(Expr, Arc<Environment>),
    Rebuild {
        expr: Expr,
        env: Arc<Environment>,
        arity: usize,
    },
    Finish {
        expr: Expr,
        env: Arc<Environment>,
    },
    Project(Vec<usize>),
    Memoize(Expr),
    /// Reduce the result on top of the stack under `env`.
    Resume(Arc<Environment>),
}

struct Cached {
    _expr: Expr,
    _env: Arc<Environment>,
    result: Expr,
}

/// Reduction of one expression, resumable whenever it waits on a derivative.
pub(crate) struct Reducer {
    root: Expr,
    frames: Vec<Frame>,
    results: Vec<Expr>,
    empty: Arc<Environment>,
    cache: HashMap<(usize, usize), Cached>,
    scopes: HashMap<(usize, Var), (Arc<Environment>, Arc<Environment>)>,
}

impl Reducer {
    pub(crate) fn new(root: &Expr, env: Arc<Environment>) -> Self {
        Self {
            root: root.clone(),
            frames: vec![Frame::Visit(root.clone(), env)],
            results: Vec::new(),
            empty: Arc::new(Environment::new()),
            cache: HashMap::new(),
            scopes: HashMap::new(),
        }
    }

    pub(crate) fn poll(&mut self, answers: &Answers) -> Result<Poll> {
        while let Some(frame) = self.frames.pop() {
            match frame {
                Frame::Visit(expr, env) => {
                    if let Some(request) = self.visit(expr, env, answers)? {
                        return Ok(Poll::Pending(request));
                    }
                }
                Frame::Rebuild { expr, env, arity } => {
                    let children = self.results.split_off(self.results.len() - arity);
                    let rebuilt = rebuild(&expr, children)?;
                    self.finish(&expr, &env, &rebuilt)?;
                    self.results.push(rebuilt);
                }
                Frame::Finish { expr, env } => {
                    if let Some(result) = self.results.last() {
                        let result = result.clone();
                        self.finish(&expr, &env, &result)?;
                    }
                }
                Frame::Project(path) => {
                    if let Some(mut value) = self.results.pop() {
                        for index in path {
                            value = value.component(index)?;
                        }
                        self.results.push(value);
                    }
                }
                Frame::Memoize(expr) => {
                    if let (Node::Composition(c), Some(result)) = (expr.node(), self.results.pop()) {
                        c.env.check_propagated(&expr, &result)?;
                        self.results.push(c.memo.get_or_init(|| result).clone());
                    }
                }
                Frame::Resume(env) => {
                    if let Some(result) = self.results.pop() {
                        self.frames.push(Frame::Visit(result, env));
                    }
                }
            }
        }

        Ok(Poll::Ready(
            self.results.pop().unwrap_or_else(|| self.root.clone()),
        ))
    }

    /// Schedule the reduction of `expr`, or name the derivative it waits on.
    fn visit(
        &mut self,
        expr: Expr,
        env: Arc<Environment>,
        answers: &Answers,
    ) -> Result<Option<Request>> {
        let key = (expr.addr(), Arc::as_ptr(&env) as usize);
        if let Some(hit) = self.cache.get(&key) {
            self.results.push(hit.result.clone());
            return Ok(None);
        }
        if !expr.has_markers() && !env.touches(expr.free_vars()) {
            self.results.push(expr);
            return Ok(None);
        }
        trace!(kind = %expr.kind(), "reduce");

        match expr.node() {
            Node::Const(_) => self.results.push(expr.clone()),
            Node::Var(v) => {
                if let Some(value) = env.get(v) {
                    let value = value.clone();
                    let scope = self.scope(&env, v);
                    self.frames.push(Frame::Finish {
                        expr: expr.clone(),
                        env,
                    });
                    self.frames.push(Frame::Visit(value, scope));
                } else if let Some((owner, value)) = env.binding_above(v) {
                    let path = v.path_from(owner).unwrap_or_default();
                    let value = value.clone();
                    let owner = owner.clone();
                    let scope = self.scope(&env, &owner);
                    self.frames.push(Frame::Finish {
                        expr: expr.clone(),
                        env,
                    });
                    self.frames.push(Frame::Project(path));
                    self.frames.push(Frame::Visit(value, scope));
                } else if v.level() != Level::Scalar {
                    let literal = expand(v)?;
                    self.frames.push(Frame::Finish {
                        expr: expr.clone(),
                        env: env.clone(),
                    });
                    self.frames.push(Frame::Visit(literal, env));
                } else {
                    self.results.push(expr.clone());
                }
            }
            Node::Derivative { target, var } => match answers.derivative(target, var) {
                Some(derived) => {
                    debug!(expr = %target, var = %var, "expanding derivative");
                    let derived = derived.clone();
                    self.frames.push(Frame::Finish {
                        expr: expr.clone(),
                        env: env.clone(),
                    });
                    self.frames.push(Frame::Visit(derived, env));
                }
                None => {
                    let request = Request::Derive(target.clone(), var.clone());
                    self.frames.push(Frame::Visit(expr.clone(), env));
                    return Ok(Some(request));
                }
            },
            Node::Composition(c) => {
                if env.is_empty() {
                    if let Some(memo) = c.memoized() {
                        self.results.push(memo.clone());
                        return Ok(None);
                    }
                    debug!(expr = %c.target, env = %c.env, "evaluating composition");
                    self.frames.push(Frame::Memoize(expr.clone()));
                    self.frames
                        .push(Frame::Visit(c.target.clone(), Arc::new(c.env.clone())));
                } else {
                    self.frames.push(Frame::Finish {
                        expr: expr.clone(),
                        env: env.clone(),
                    });
                    self.frames.push(Frame::Resume(env));
                    self.frames.push(Frame::Visit(expr.clone(), self.empty.clone()));
                }
            }
            Node::Map { input, body, param } => {
                let scope = self.scope(&env, param);
                self.frames.push(Frame::Rebuild {
                    expr: expr.clone(),
                    env: env.clone(),
                    arity: 2,
                });
                self.frames.push(Frame::Visit(body.clone(), scope));
                self.frames.push(Frame::Visit(input.clone(), env));
            }
            node => {
                let children = node.children();
                self.frames.push(Frame::Rebuild {
                    expr: expr.clone(),
                    env: env.clone(),
                    arity: children.len(),
                });
                for child in children.into_iter().rev() {
                    self.frames.push(Frame::Visit(child.clone(), env.clone()));
                }
            }
        }
        Ok(None)
    }

    /// `env` without `var`, shared between every lookup of `var`.
    fn scope(&mut self, env: &Arc<Environment>, var: &Var) -> Arc<Environment> {
        let key = (Arc::as_ptr(env) as usize, var.clone());
        self.scopes
            .entry(key)
            .or_insert_with(|| (env.clone(), Arc::new(env.remove(var))))
            .1
            .clone()
    }

    fn finish(&mut self, expr: &Expr, env: &Arc<Environment>, result: &Expr) -> Result<()> {
        env.check_propagated(expr, result)?;
        self.cache.insert(
            (expr.addr(), Arc::as_ptr(env) as usize),
            Cached {
                _expr: expr.clone(),
                _env: env.clone(),
                result: result.clone(),
            },
        );
        Ok(())
    }
}

/// A container variable as a literal of its components.
fn expand(var: &Var) -> Result<Expr> {
    let items: Vec<Expr> = var.components().into_iter().map(Expr::from).collect();
    match var.level() {
        Level::Matrix => {
            Expr::matrix_with_shape(var.shape().rows(), var.shape().cols(), items)
        }
        _ => Expr::vector_with_len(var.shape().rows(), items),
    }
}

/// Rebuild `expr` from reduced children through the folding constructors.
fn rebuild(expr: &Expr, children: Vec<Expr>) -> Result<Expr> {
    let unchanged = expr
        .children()
        .iter()
        .zip(&children)
        .all(|(old, new)| old.ptr_eq(new));
    if unchanged {
        return Ok(expr.clone());
    }
    let c = &children;
    match expr.node() {
        Node::Neg(_) => Expr::negate(&c[0]),
        Node::Log { .. } => Expr::logarithm(&c[0], &c[1]),
        Node::Sin(_) => Expr::sine(&c[0]),
        Node::Cos(_) => Expr::cosine(&c[0]),
        Node::Tan(_) => Expr::tangent(&c[0]),
        Node::Transpose(_) => Expr::transposed(&c[0]),
        Node::SumAll(_) => c[0].sum_all(),
        Node::SumRows(_) => c[0].sum_rows(),
        Node::Sum(..) => Expr::sum(&c[0], &c[1]),
        Node::Prod(..) => Expr::product(&c[0], &c[1]),
        Node::Hadamard(..) => Expr::hadamard_product(&c[0], &c[1]),
        Node::MatMul { inner, .. } => Expr::matmul_with_inner(&c[0], &c[1], *inner),
        Node::Pow(..) => Expr::power(&c[0], &c[1]),
        Node::Dot(..) => Expr::dot_product(&c[0], &c[1]),
        Node::Map { param, .. } => Expr::elementwise_map(&c[0], &c[1], param),
        Node::Vector(_) => Expr::vector_with_len(expr.shape().rows(), children),
        Node::Matrix(_) => {
            Expr::matrix_with_shape(expr.shape().rows(), expr.shape().cols(), children)
        }
        Node::Derivative { var, .. } => Expr::derivative(c[0].clone(), var),
        Node::Var(_) | Node::Const(_) | Node::Composition(_) => Ok(expr.clone()),
    }
}

// ============================================================================
// Evaluator
// ============================================================================

/// Entry point for evaluation and differentiation under a fixed mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Evaluator {
    config: EvalConfig,
}

impl Evaluator {
    pub fn new(config: EvalConfig) -> Self {
        Self { config }
    }

    pub fn eager() -> Self {
        Self::new(EvalConfig::eager())
    }

    pub fn lazy() -> Self {
        Self::new(EvalConfig::lazy())
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    pub fn mode(&self) -> EvalMode {
        self.config.mode
    }

    /// Apply `env` to `expr`.
    ///
    /// Reduces right away in eager mode, or when `env` is complete or ready
    /// to bind; otherwise returns a pending composition.
    pub fn apply(&self, expr: &Expr, env: &Environment) -> Result<Expr> {
        if self.config.mode == EvalMode::Eager || env.is_complete() || env.is_ready_to_bind() {
            reduce(expr, env)
        } else {
            Ok(Expr::composition(expr.clone(), env.clone()))
        }
    }

    /// Apply scalar arguments positionally to the free variables of `expr`
    /// in name order.
    pub fn invoke<V: Into<Expr>>(
        &self,
        expr: &Expr,
        args: impl IntoIterator<Item = V>,
    ) -> Result<Expr> {
        let vars: Vec<Var> = expr.free_vars().iter().cloned().collect();
        let env = Environment::zip(&vars, args)?;
        self.apply(expr, &env)
    }

    /// Reduce regardless of mode, returning whatever residual remains.
    pub fn evaluate(&self, expr: &Expr, env: &Environment) -> Result<Expr> {
        reduce(expr, env)
    }

    /// Reduce and materialize, failing with `UnboundVariable` if anything
    /// symbolic remains.
    pub fn evaluate_strict(&self, expr: &Expr, env: &Environment) -> Result<Value> {
        self.evaluate(expr, env)?.materialize()
    }

    /// Expand every pending marker in `expr`.
    pub fn force(&self, expr: &Expr) -> Result<Expr> {
        reduce(expr, &Environment::new())
    }

    /// `∂expr/∂var`: expanded in eager mode, a marker in lazy mode.
    pub fn differentiate(&self, expr: &Expr, var: &Var) -> Result<Expr> {
        match self.config.mode {
            EvalMode::Eager => derive(expr, var),
            EvalMode::Lazy => Expr::derivative(expr.clone(), var),
        }
    }

    /// Partial derivatives of a scalar expression, one per free variable.
    pub fn gradient(&self, expr: &Expr) -> Result<BTreeMap<Var, Expr>> {
        if expr.level() != Level::Scalar {
            return Err(ExprError::UndefinedRule {
                kind: expr.kind(),
                reason: format!("gradient of a {} expression", expr.level()),
            });
        }
        expr.free_vars()
            .iter()
            .map(|v| Ok((v.clone(), self.differentiate(expr, v)?)))
            .collect()
    }

    /// Matrix of partials `J[i][j] = ∂expr[i]/∂var[j]`.
    pub fn jacobian(&self, expr: &Expr, var: &Var) -> Result<Expr> {
        if expr.level() != Level::Vector || var.level() != Level::Vector {
            return Err(ExprError::UndefinedRule {
                kind: expr.kind(),
                reason: format!(
                    "jacobian of a {} with respect to a {}",
                    expr.level(),
                    var.level()
                ),
            });
        }
        self.differentiate(expr, var)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::NodeKind;

    fn xyz() -> (Var, Var, Var) {
        (Var::scalar("x"), Var::scalar("y"), Var::scalar("z"))
    }

    #[test]
    fn test_substitution_folds() {
        let (x, y, _) = xyz();
        let expr = x.expr() * y.expr() + 1.0;
        let env = Environment::new().with(&x, 2.0).unwrap().with(&y, 3.0).unwrap();
        assert_eq!(reduce(&expr, &env).unwrap().as_const(), Some(7.0));
    }

    #[test]
    fn test_partial_substitution_leaves_residual() {
        let (x, y, _) = xyz();
        let expr = x.expr() * y.expr();
        let env = Environment::new().with(&x, 2.0).unwrap();
        let residual = reduce(&expr, &env).unwrap();
        assert_eq!(residual, 2.0 * y.expr());
        assert!(!residual.free_vars().contains(&x));
    }

    #[test]
    fn test_chained_bindings_resolve() {
        let (x, y, _) = xyz();
        let env = Environment::new()
            .with(&x, y.expr() + 1.0)
            .unwrap()
            .with(&y, 2.0)
            .unwrap();
        assert_eq!(reduce(&x.expr(), &env).unwrap().as_const(), Some(3.0));
    }

    #[test]
    fn test_self_reference_does_not_loop() {
        let (x, _, _) = xyz();
        let env = Environment::new().with(&x, x.expr() + 1.0).unwrap();
        assert_eq!(reduce(&x.expr(), &env).unwrap(), x.expr() + 1.0);
    }

    #[test]
    fn test_lazy_apply_defers_until_bound() {
        let (x, y, _) = xyz();
        let expr = x.expr() + y.expr();
        let symbolic = Environment::new().with(&x, y.expr()).unwrap();

        let pending = Evaluator::lazy().apply(&expr, &symbolic).unwrap();
        assert_eq!(pending.kind(), NodeKind::Composition);
        assert_eq!(pending.free_vars().iter().collect::<Vec<_>>(), vec![&y]);

        let eager = Evaluator::eager().apply(&expr, &symbolic).unwrap();
        assert_eq!(eager, 2.0 * y.expr());
    }

    #[test]
    fn test_composition_is_memoized() {
        let (x, _, _) = xyz();
        let env = Environment::new().with(&x, x.expr()).unwrap();
        let pending = Expr::composition(x.expr().sin().unwrap(), env);
        let Node::Composition(c) = pending.node() else {
            panic!("expected a composition");
        };
        assert!(c.memoized().is_none());
        let first = Evaluator::default().force(&pending).unwrap();
        let memo = c.memoized().cloned().unwrap();
        assert!(memo.ptr_eq(&first));
        let second = Evaluator::default().force(&pending).unwrap();
        assert!(second.ptr_eq(&first));
    }

    #[test]
    fn test_vector_components_substitute() {
        let v = Var::vector("v", 2);
        let expr = v.expr().dot(&v.expr()).unwrap();
        let env = Environment::new().with(&v, vec![3.0, 4.0]).unwrap();
        assert_eq!(reduce(&expr, &env).unwrap().as_const(), Some(25.0));

        let first = &v.components()[0];
        let partial = Environment::new().with(first, 1.0).unwrap();
        let residual = reduce(&v.expr(), &partial).unwrap();
        assert_eq!(residual.kind(), NodeKind::Vector);
        assert_eq!(residual.literal_items().unwrap()[0].as_const(), Some(1.0));
    }

    #[test]
    fn test_component_of_bound_container() {
        let m = Var::matrix("m", 2, 2);
        let entry = m.scalar_components()[3].clone();
        let value = Expr::matrix_from_rows(vec![
            vec![Expr::constant(1.0), Expr::constant(2.0)],
            vec![Expr::constant(3.0), Expr::constant(4.0)],
        ])
        .unwrap();
        let w = Var::matrix("w", 2, 2);
        let env = Environment::new()
            .with(&m, w.expr())
            .unwrap()
            .with(&w, value)
            .unwrap();
        assert_eq!(reduce(&entry.expr(), &env).unwrap().as_const(), Some(4.0));
    }

    #[test]
    fn test_invoke_binds_in_name_order() {
        let (x, y, _) = xyz();
        let expr = y.expr() / 2.0 + x.expr();
        let result = Evaluator::default().invoke(&expr, [1.0, 2.0]).unwrap();
        assert_eq!(result.as_const(), Some(2.0));

        let err = Evaluator::default().invoke(&expr, [1.0]).unwrap_err();
        assert_eq!(err, ExprError::ArgumentCount { expected: 2, got: 1 });
    }

    #[test]
    fn test_gradient_requires_scalar() {
        let v = Var::vector("v", 2);
        assert!(matches!(
            Evaluator::default().gradient(&v.expr()),
            Err(ExprError::UndefinedRule { .. })
        ));
    }

    #[test]
    fn test_deep_chain_reduces_without_overflow() {
        let (x, _, _) = xyz();
        let mut expr = x.expr();
        for i in 0..50_000 {
            expr = expr + Var::scalar(format!("y{}", i % 7)).expr();
        }
        let mut env = Environment::new().with(&x, 1.0).unwrap();
        for i in 0..7 {
            env = env.with(&Var::scalar(format!("y{}", i)), 0.0).unwrap();
        }
        assert_eq!(reduce(&expr, &env).unwrap().as_const(), Some(1.0));
    }

    #[test]
    fn test_nested_derivative_markers_reduce_without_overflow() {
        let (x, _, _) = xyz();
        let lazy = Evaluator::lazy();
        let cube = x.expr().pow(3.0).unwrap();

        let mut third = cube.clone();
        for _ in 0..3 {
            third = lazy.differentiate(&third, &x).unwrap();
        }
        let env = Environment::new().with(&x, 2.0).unwrap();
        assert_eq!(reduce(&third, &env).unwrap().as_const(), Some(6.0));

        let mut deep = cube;
        for _ in 0..5_000 {
            deep = lazy.differentiate(&deep, &x).unwrap();
        }
        assert!(deep.has_markers());
        assert!(reduce(&deep, &Environment::new()).unwrap().is_zero());
        assert!(Evaluator::eager().differentiate(&deep, &x).unwrap().is_zero());
    }

    #[test]
    fn test_marker_inside_composition_inside_marker() {
        // d/dx (d/dx (x^2 y))[y ↦ x] = d/dx 2x^2 = 4x
        let (x, y, _) = xyz();
        let lazy = Evaluator::lazy();
        let inner = lazy
            .differentiate(&Expr::product(&x.expr().pow(2.0).unwrap(), &y.expr()).unwrap(), &x)
            .unwrap();
        let curried = lazy
            .apply(&inner, &Environment::new().with(&y, x.expr()).unwrap())
            .unwrap();
        assert_eq!(curried.kind(), NodeKind::Composition);
        let outer = lazy.differentiate(&curried, &x).unwrap();
        let env = Environment::new().with(&x, 1.5).unwrap();
        assert_eq!(reduce(&outer, &env).unwrap().as_const(), Some(6.0));
    }
}
