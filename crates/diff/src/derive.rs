//! # Differentiation - Symbolic Derivative Rules
//!
//! [`derive`] produces a new expression for the exact derivative of an
//! expression with respect to a variable. Scalar variables go through the
//! rule table below; container variables are handled by differentiating
//! once per scalar component and assembling the results.
//!
//! ## Rules
//!
//! | Node | Derivative |
//! |------|------------|
//! | `f + g` | `f' + g'` |
//! | `f * g`, `f ⊙ g`, `f · g`, `F @ G` | `f' g + f g'` with the same operator |
//! | `f ^ g` | `g f^(g-1) f'` if `g' = 0`, else `f^g (f' g / f + g' ln f)` |
//! | `log_b f` | `f' / (f ln b)` if `b' = 0`, else the quotient rule on `ln f / ln b` |
//! | `sin f`, `cos f`, `tan f` | `cos f f'`, `-sin f f'`, `cos(f)^-2 f'` |
//! | `fᵀ`, `sum(f)`, `sum_rows(f)` | `f'ᵀ`, `sum(f')`, `sum_rows(f')` |
//! | `map(v, p -> f)` | `v' ⊙ map(v, p -> ∂f/∂p) + map(v, p -> ∂f/∂x)` |
//!
//! Markers are expanded before their result is differentiated. Any node
//! that does not depend on the variable differentiates to zero without
//! being visited. Nested markers, compositions and map bodies are handed
//! to the task driver as requests, so repeated differentiation never
//! deepens the call stack.

use std::collections::HashMap;

use symbolic_core::Level;

use crate::error::{ExprError, Result};
use crate::expr::{Expr, Node};
use crate::task::{drive, Answers, Poll, Request, Task};
use crate::var::Var;

/// `∂expr/∂var`.
///
/// The result has the shape reported by [`Expr::derivative`]: a scalar
/// target against a container variable gives the gradient container; a
/// vector target against a vector variable gives the Jacobian.
pub fn derive(expr: &Expr, var: &Var) -> Result<Expr> {
    drive(Task::derive(expr, var)?)
}

/// Derivative with respect to a container variable, assembled from the
/// derivatives with respect to each of its scalar components.
pub(crate) struct Assembly {
    expr: Expr,
    var: Var,
    components: Vec<Var>,
}

impl Assembly {
    pub(crate) fn new(expr: &Expr, var: &Var) -> Self {
        let components = match (expr.level(), var.level()) {
            (Level::Scalar, Level::Matrix) => var.scalar_components(),
            _ => var.components(),
        };
        Self {
            expr: expr.clone(),
            var: var.clone(),
            components,
        }
    }

    pub(crate) fn poll(&mut self, answers: &Answers) -> Result<Poll> {
        let mut parts = Vec::with_capacity(self.components.len());
        for c in &self.components {
            match answers.derivative(&self.expr, c) {
                Some(d) => parts.push(d.clone()),
                None => return Ok(Poll::Pending(Request::Derive(self.expr.clone(), c.clone()))),
            }
        }
        let (rows, cols) = (self.var.shape().rows(), self.var.shape().cols());
        let assembled = match self.expr.level() {
            Level::Scalar if self.var.level() == Level::Matrix => {
                let grid = parts
                    .chunks(cols)
                    .map(|row| Expr::vector(row.to_vec()))
                    .collect::<Result<Vec<_>>>()?;
                Expr::matrix_with_shape(rows, cols, grid)?
            }
            Level::Scalar => Expr::vector(parts)?,
            // Column j is ∂expr/∂var[j]; stacked as rows they form Jᵀ.
            _ => Expr::matrix_with_shape(rows, self.expr.shape().rows(), parts)?.t()?,
        };
        Ok(Poll::Ready(assembled))
    }
}

enum Step {
    Enter(Expr),
    Exit(Expr),
    /// Record the result on top of the stack as the derivative of a marker.
    Alias(Expr),
}

/// Derivative with respect to one scalar variable, walked bottom-up.
pub(crate) struct Differentiator {
    root: Expr,
    var: Var,
    memo: HashMap<usize, (Expr, Expr)>,
    steps: Vec<Step>,
    results: Vec<Expr>,
}

impl Differentiator {
    pub(crate) fn new(root: &Expr, var: &Var) -> Self {
        Self {
            root: root.clone(),
            var: var.clone(),
            memo: HashMap::new(),
            steps: vec![Step::Enter(root.clone())],
            results: Vec::new(),
        }
    }

    pub(crate) fn poll(&mut self, answers: &Answers) -> Result<Poll> {
        while let Some(step) = self.steps.pop() {
            match step {
                Step::Enter(expr) => {
                    if let Some((_, d)) = self.memo.get(&expr.addr()) {
                        self.results.push(d.clone());
                        continue;
                    }
                    if !expr.has_markers() && !expr.depends_on(&self.var) {
                        self.results.push(Expr::zeros(expr.shape()));
                        continue;
                    }
                    match expr.node() {
                        Node::Var(v) => {
                            let d = self.leaf(v);
                            self.results.push(d);
                        }
                        Node::Const(_) => self.results.push(Expr::zeros(expr.shape())),
                        Node::Derivative { target, var } => {
                            match answers.derivative(target, var) {
                                Some(expanded) => {
                                    let expanded = expanded.clone();
                                    self.steps.push(Step::Alias(expr.clone()));
                                    self.steps.push(Step::Enter(expanded));
                                }
                                None => {
                                    let request = Request::Derive(target.clone(), var.clone());
                                    self.steps.push(Step::Enter(expr.clone()));
                                    return Ok(Poll::Pending(request));
                                }
                            }
                        }
                        Node::Composition(_) => match answers.reduction(&expr) {
                            Some(reduced) => {
                                let reduced = reduced.clone();
                                self.steps.push(Step::Alias(expr.clone()));
                                self.steps.push(Step::Enter(reduced));
                            }
                            None => {
                                self.steps.push(Step::Enter(expr.clone()));
                                return Ok(Poll::Pending(Request::Reduce(expr.clone())));
                            }
                        },
                        node => {
                            self.steps.push(Step::Exit(expr.clone()));
                            for child in node.children().into_iter().rev() {
                                self.steps.push(Step::Enter(child.clone()));
                            }
                        }
                    }
                }
                Step::Exit(expr) => {
                    // A map needs its body differentiated by its own parameter first.
                    let body_partial = match expr.node() {
                        Node::Map { body, param, .. } => match answers.derivative(body, param) {
                            Some(d) => Some(d.clone()),
                            None => {
                                let request = Request::Derive(body.clone(), param.clone());
                                self.steps.push(Step::Exit(expr.clone()));
                                return Ok(Poll::Pending(request));
                            }
                        },
                        _ => None,
                    };
                    let arity = expr.children().len();
                    let partials = self.results.split_off(self.results.len() - arity);
                    let d = self.rule(&expr, &partials, body_partial.as_ref())?;
                    self.memo.insert(expr.addr(), (expr, d.clone()));
                    self.results.push(d);
                }
                Step::Alias(expr) => {
                    if let Some(d) = self.results.last() {
                        self.memo.insert(expr.addr(), (expr, d.clone()));
                    }
                }
            }
        }

        Ok(Poll::Ready(
            self.results
                .pop()
                .unwrap_or_else(|| Expr::zeros(self.root.shape())),
        ))
    }

    /// Derivative of a variable leaf: one for the variable itself, a unit
    /// container for a container holding it, zero otherwise.
    fn leaf(&self, v: &Var) -> Expr {
        if v == &self.var {
            return Expr::one();
        }
        match self.var.path_from(v) {
            Some(path) => Expr::unit(v.shape(), &path),
            None => Expr::zeros(v.shape()),
        }
    }

    fn rule(&self, expr: &Expr, d: &[Expr], body_partial: Option<&Expr>) -> Result<Expr> {
        match expr.node() {
            Node::Neg(_) => Expr::negate(&d[0]),
            Node::Sum(..) => Expr::sum(&d[0], &d[1]),
            Node::Prod(f, g) => Expr::sum(
                &Expr::product(&d[0], g)?,
                &Expr::product(f, &d[1])?,
            ),
            Node::Hadamard(f, g) => Expr::sum(
                &Expr::hadamard_product(&d[0], g)?,
                &Expr::hadamard_product(f, &d[1])?,
            ),
            Node::MatMul { left, right, inner } => Expr::sum(
                &Expr::matmul_with_inner(&d[0], right, *inner)?,
                &Expr::matmul_with_inner(left, &d[1], *inner)?,
            ),
            Node::Dot(u, v) => Expr::sum(
                &Expr::dot_product(&d[0], v)?,
                &Expr::dot_product(u, &d[1])?,
            ),
            Node::Transpose(_) => d[0].t(),
            Node::SumAll(_) => d[0].sum_all(),
            Node::SumRows(_) => d[0].sum_rows(),
            Node::Sin(f) => Expr::product(&f.cos()?, &d[0]),
            Node::Cos(f) => Expr::product(&Expr::negate(&f.sin()?)?, &d[0]),
            Node::Tan(f) => Expr::product(&f.cos()?.pow(-2.0)?, &d[0]),
            Node::Log { arg, base } => {
                if d[1].is_zero() {
                    Expr::quotient(&d[0], &Expr::product(arg, &base.ln()?)?)
                } else {
                    let (ln_f, ln_b) = (arg.ln()?, base.ln()?);
                    let numerator = Expr::difference(
                        &Expr::product(&Expr::quotient(&d[0], arg)?, &ln_b)?,
                        &Expr::product(&ln_f, &Expr::quotient(&d[1], base)?)?,
                    )?;
                    Expr::quotient(&numerator, &ln_b.pow(2.0)?)
                }
            }
            Node::Pow(f, g) => {
                if d[1].is_zero() {
                    let lowered = f.pow(Expr::sum(g, &Expr::constant(-1.0))?)?;
                    Expr::product(&Expr::product(g, &lowered)?, &d[0])
                } else {
                    let inner = Expr::sum(
                        &Expr::product(&d[0], &Expr::quotient(g, f)?)?,
                        &Expr::product(&d[1], &f.ln()?)?,
                    )?;
                    Expr::product(expr, &inner)
                }
            }
            Node::Map { input, param, .. } => {
                let d_body_param = body_partial.ok_or_else(|| ExprError::UndefinedRule {
                    kind: expr.kind(),
                    reason: "map body was not differentiated".to_string(),
                })?;
                let along_input =
                    Expr::hadamard_product(&d[0], &Expr::elementwise_map(input, d_body_param, param)?)?;
                let direct = Expr::elementwise_map(input, &d[1], param)?;
                Expr::sum(&along_input, &direct)
            }
            Node::Vector(_) => Expr::vector_with_len(expr.shape().rows(), d.to_vec()),
            Node::Matrix(_) => {
                Expr::matrix_with_shape(expr.shape().rows(), expr.shape().cols(), d.to_vec())
            }
            Node::Var(_) | Node::Const(_) | Node::Derivative { .. } | Node::Composition(_) => {
                Err(ExprError::UndefinedRule {
                    kind: expr.kind(),
                    reason: "leaves and markers are resolved before the rule table".to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Environment;
    use crate::eval::reduce;
    use crate::expr::NodeKind;

    fn at(expr: &Expr, bindings: &[(&Var, f64)]) -> f64 {
        let mut env = Environment::new();
        for (var, value) in bindings {
            env.insert(var, *value).unwrap();
        }
        reduce(expr, &env).unwrap().as_const().unwrap()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_variable_and_constant() {
        let x = Var::scalar("x");
        let y = Var::scalar("y");
        assert!(derive(&x.expr(), &x).unwrap().is_one());
        assert!(derive(&y.expr(), &x).unwrap().is_zero());
        assert!(derive(&Expr::constant(4.0), &x).unwrap().is_zero());
    }

    #[test]
    fn test_power_rule() {
        let x = Var::scalar("x");
        let d = derive(&x.expr().pow(3.0).unwrap(), &x).unwrap();
        assert!(close(at(&d, &[(&x, 2.0)]), 12.0));
    }

    #[test]
    fn test_generalized_power_rule() {
        // d/dx x^x = x^x (ln x + 1)
        let x = Var::scalar("x");
        let d = derive(&x.expr().pow(x.expr()).unwrap(), &x).unwrap();
        let a: f64 = 1.7;
        assert!(close(at(&d, &[(&x, a)]), a.powf(a) * (a.ln() + 1.0)));
    }

    #[test]
    fn test_exp_and_log() {
        let x = Var::scalar("x");
        let d = derive(&x.expr().exp().unwrap(), &x).unwrap();
        assert!(close(at(&d, &[(&x, 0.5)]), 0.5f64.exp()));

        let d = derive(&x.expr().ln().unwrap(), &x).unwrap();
        assert!(close(at(&d, &[(&x, 4.0)]), 0.25));

        let d = derive(&x.expr().log(10.0).unwrap(), &x).unwrap();
        assert!(close(at(&d, &[(&x, 3.0)]), 1.0 / (3.0 * 10f64.ln())));
    }

    #[test]
    fn test_variable_base_logarithm() {
        // d/dx log_x(2) = -ln 2 / (x (ln x)^2)
        let x = Var::scalar("x");
        let d = derive(&Expr::two().log(x.expr()).unwrap(), &x).unwrap();
        let a: f64 = 3.0;
        let expected = -(2f64.ln()) / (a * a.ln().powi(2));
        assert!(close(at(&d, &[(&x, a)]), expected));
    }

    #[test]
    fn test_trigonometry() {
        let x = Var::scalar("x");
        let a = 0.3;
        let d = derive(&x.expr().sin().unwrap(), &x).unwrap();
        assert!(close(at(&d, &[(&x, a)]), a.cos()));
        let d = derive(&x.expr().cos().unwrap(), &x).unwrap();
        assert!(close(at(&d, &[(&x, a)]), -a.sin()));
        let d = derive(&x.expr().tan().unwrap(), &x).unwrap();
        assert!(close(at(&d, &[(&x, a)]), 1.0 / a.cos().powi(2)));
    }

    #[test]
    fn test_gradient_of_dot_with_vector_variable() {
        let v = Var::vector("v", 3);
        let f = v.expr().dot(&v.expr()).unwrap();
        let grad = derive(&f, &v).unwrap();
        assert_eq!(grad.shape(), v.shape());

        let env = Environment::new().with(&v, vec![1.0, 2.0, 3.0]).unwrap();
        let value = reduce(&grad, &env).unwrap();
        let items: Vec<f64> = value
            .literal_items()
            .unwrap()
            .iter()
            .map(|e| e.as_const().unwrap())
            .collect();
        assert_eq!(items, vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_jacobian_of_elementwise_square() {
        let v = Var::vector("v", 2);
        let f = v.expr().map(|p| p.pow(2.0)).unwrap();
        let j = derive(&f, &v).unwrap();
        assert_eq!(j.shape(), &symbolic_core::Shape::matrix(2, 2));

        let env = Environment::new().with(&v, vec![3.0, 5.0]).unwrap();
        let value = reduce(&j, &env).unwrap();
        let expected = Expr::matrix_from_rows(vec![
            vec![Expr::constant(6.0), Expr::zero()],
            vec![Expr::zero(), Expr::constant(10.0)],
        ])
        .unwrap();
        assert_eq!(value, expected);
    }

    #[test]
    fn test_map_derivative_keeps_placeholder_bound() {
        let x = Var::scalar("x");
        let v = Var::vector("v", 2);
        let f = v.expr().map(|p| Expr::product(p, &x.expr())).unwrap();
        let d = derive(&f, &x).unwrap();
        assert!(d.free_vars().iter().all(|var| !var.is_placeholder()));
        assert!(d.free_vars().contains(&v));
    }

    #[test]
    fn test_matrix_by_vector_is_undefined() {
        let m = Var::matrix("m", 2, 2);
        let v = Var::vector("v", 2);
        let err = derive(&m.expr(), &v).unwrap_err();
        assert!(matches!(
            err,
            ExprError::UndefinedRule {
                kind: NodeKind::Var,
                ..
            }
        ));
    }

    #[test]
    fn test_derivative_of_marker_expands_first() {
        let x = Var::scalar("x");
        let marker = Expr::derivative(x.expr().pow(3.0).unwrap(), &x).unwrap();
        let d = derive(&marker, &x).unwrap();
        assert!(!d.has_markers());
        assert!(close(at(&d, &[(&x, 2.0)]), 12.0));
    }
}
