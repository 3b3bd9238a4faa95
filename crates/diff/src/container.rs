//! # Containers - Vectors and Matrices of Expressions
//!
//! A vector literal is an ordered list of scalar expressions; a matrix
//! literal is an ordered list of row vectors. Operations on literals fold
//! into new literals element by element; operations on anything else build
//! a node that the evaluator folds once the operands become literals.
//!
//! ## Operations
//!
//! | Op | Operands | Result |
//! |----|----------|--------|
//! | `hadamard` | same shape | same shape |
//! | `dot` | `[n]`, `[n]` | scalar |
//! | `matmul` | `[m,k] [k,n]`, `[m,k] [k]`, `[k] [k,n]` | `[m,n]`, `[m]`, `[n]` |
//! | `t` | `[r,c]` | `[c,r]` |
//! | `sum_all` | any container | scalar |
//! | `sum_rows` | `[r,c]` | `[r]` |
//! | `map` | any container, scalar body | same shape |
//!
//! The inner extent of a matrix product is stored on the node and checked
//! against both operands every time the product is rebuilt.

use symbolic_core::{Level, Shape};

use crate::algebra::incompatible;
use crate::env::Environment;
use crate::error::{ExprError, Result};
use crate::eval::reduce;
use crate::expr::{Expr, Node};
use crate::var::Var;

type Binary = fn(&Expr, &Expr) -> Result<Expr>;

impl Expr {
    /// A vector literal of scalar expressions.
    pub fn vector(items: Vec<Expr>) -> Result<Expr> {
        let len = items.len();
        Expr::vector_with_len(len, items)
    }

    /// A vector literal with a declared length. A length that disagrees
    /// with `items` is reported when the expression is materialized.
    pub fn vector_with_len(len: usize, items: Vec<Expr>) -> Result<Expr> {
        if let Some(bad) = items.iter().find(|e| e.level() != Level::Scalar) {
            return Err(ExprError::IncompatibleOperands {
                op: "vector",
                left: Shape::scalar(),
                right: bad.shape().clone(),
            });
        }
        Ok(Expr::build(Node::Vector(items), Shape::vector(len)))
    }

    /// A matrix literal from equal-length row vectors.
    pub fn matrix(rows: Vec<Expr>) -> Result<Expr> {
        let first = rows.first().ok_or(ExprError::EmptyContainer)?;
        let cols = first.shape().rows();
        for row in &rows {
            if row.shape() != &Shape::vector(cols) {
                return Err(ExprError::IncompatibleOperands {
                    op: "matrix",
                    left: Shape::vector(cols),
                    right: row.shape().clone(),
                });
            }
        }
        let count = rows.len();
        Ok(Expr::build(Node::Matrix(rows), Shape::matrix(count, cols)))
    }

    /// A matrix literal with a declared shape. Row counts and row lengths
    /// that disagree with it are reported when the expression is
    /// materialized.
    pub fn matrix_with_shape(rows: usize, cols: usize, items: Vec<Expr>) -> Result<Expr> {
        if let Some(bad) = items.iter().find(|e| e.level() != Level::Vector) {
            return Err(ExprError::IncompatibleOperands {
                op: "matrix",
                left: Shape::vector(cols),
                right: bad.shape().clone(),
            });
        }
        Ok(Expr::build(Node::Matrix(items), Shape::matrix(rows, cols)))
    }

    /// A matrix literal from rows of scalar expressions.
    pub fn matrix_from_rows(rows: Vec<Vec<Expr>>) -> Result<Expr> {
        let rows = rows
            .into_iter()
            .map(Expr::vector)
            .collect::<Result<Vec<_>>>()?;
        Expr::matrix(rows)
    }

    /// The additive identity of `shape`.
    pub fn zeros(shape: &Shape) -> Expr {
        Expr::filled(shape, &Expr::zero())
    }

    /// A literal of `shape` with every element equal to `value`.
    pub fn filled(shape: &Shape, value: &Expr) -> Expr {
        match shape.level() {
            Level::Scalar => value.clone(),
            Level::Vector => Expr::build(
                Node::Vector(vec![value.clone(); shape.rows()]),
                shape.clone(),
            ),
            Level::Matrix => {
                let row = Expr::filled(&shape.element(), value);
                Expr::build(Node::Matrix(vec![row; shape.rows()]), shape.clone())
            }
        }
    }

    /// Zeros everywhere except a one at `path` (outermost index first).
    pub fn unit(shape: &Shape, path: &[usize]) -> Expr {
        match (shape.level(), path.split_first()) {
            (Level::Scalar, _) | (_, None) => Expr::one(),
            (_, Some((&index, rest))) => {
                let element = shape.element();
                let items = (0..shape.rows())
                    .map(|i| {
                        if i == index {
                            Expr::unit(&element, rest)
                        } else {
                            Expr::zeros(&element)
                        }
                    })
                    .collect();
                let node = match shape.level() {
                    Level::Vector => Node::Vector(items),
                    _ => Node::Matrix(items),
                };
                Expr::build(node, shape.clone())
            }
        }
    }

    /// Rebuild a consistent literal with `f` applied to each item.
    pub(crate) fn map_literal(
        a: &Expr,
        f: impl Fn(&Expr) -> Result<Expr>,
    ) -> Result<Option<Expr>> {
        let Some(items) = a.literal_items() else {
            return Ok(None);
        };
        let items = items.iter().map(f).collect::<Result<Vec<_>>>()?;
        Ok(Some(Expr::relabel(a, items)))
    }

    /// Rebuild two consistent literals of equal shape item by item.
    pub(crate) fn zip_literals(a: &Expr, b: &Expr, f: Binary) -> Result<Option<Expr>> {
        let (Some(xs), Some(ys)) = (a.literal_items(), b.literal_items()) else {
            return Ok(None);
        };
        if a.shape() != b.shape() {
            return Err(incompatible("elementwise", a, b));
        }
        let items = xs
            .iter()
            .zip(ys)
            .map(|(x, y)| f(x, y))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(Expr::relabel(a, items)))
    }

    /// A literal of the same kind and declared shape as `like`.
    fn relabel(like: &Expr, items: Vec<Expr>) -> Expr {
        let node = match like.level() {
            Level::Matrix => Node::Matrix(items),
            _ => Node::Vector(items),
        };
        Expr::build(node, like.shape().clone())
    }

    /// `s * c` for a scalar `s` and a container `c`.
    pub(crate) fn scale(s: &Expr, c: &Expr) -> Result<Expr> {
        if s.is_zero() || c.is_zero() {
            return Ok(Expr::zeros(c.shape()));
        }
        if s.is_one() {
            return Ok(c.clone());
        }
        if let Some(folded) = Expr::map_literal(c, |item| Expr::product(s, item))? {
            return Ok(folded);
        }
        Ok(Expr::build(Node::Prod(s.clone(), c.clone()), c.shape().clone()))
    }

    /// Elementwise product of two containers of equal shape.
    pub fn hadamard_product(a: &Expr, b: &Expr) -> Result<Expr> {
        if a.shape() != b.shape() {
            return Err(incompatible("hadamard", a, b));
        }
        if a.level() == Level::Scalar {
            return Expr::product(a, b);
        }
        if a.is_zero() || b.is_zero() {
            return Ok(Expr::zeros(a.shape()));
        }
        if let Some(folded) = Expr::zip_literals(a, b, Expr::hadamard_product)? {
            return Ok(folded);
        }
        Ok(Expr::build(Node::Hadamard(a.clone(), b.clone()), a.shape().clone()))
    }

    pub fn dot_product(a: &Expr, b: &Expr) -> Result<Expr> {
        if a.level() != Level::Vector || a.shape() != b.shape() {
            return Err(incompatible("dot", a, b));
        }
        if a.is_zero() || b.is_zero() {
            return Ok(Expr::zero());
        }
        if let (Some(xs), Some(ys)) = (a.literal_items(), b.literal_items()) {
            let mut total = Expr::zero();
            for (x, y) in xs.iter().zip(ys) {
                total = Expr::sum(&total, &Expr::product(x, y)?)?;
            }
            return Ok(total);
        }
        Ok(Expr::build(Node::Dot(a.clone(), b.clone()), Shape::scalar()))
    }

    /// Matrix product; the inner extent is read from the operand shapes.
    pub fn matrix_product(a: &Expr, b: &Expr) -> Result<Expr> {
        let inner = match (a.shape().dims.as_slice(), b.shape().dims.as_slice()) {
            ([_, k], [k2, _]) | ([_, k], [k2]) | ([k], [k2, _]) if k == k2 => *k,
            _ => return Err(incompatible("matmul", a, b)),
        };
        Expr::matmul_with_inner(a, b, inner)
    }

    /// Matrix product over an explicit inner extent, which both operands
    /// must agree with.
    pub fn matmul_with_inner(a: &Expr, b: &Expr, inner: usize) -> Result<Expr> {
        let (left_inner, right_inner) = match (a.level(), b.level()) {
            (Level::Matrix, Level::Matrix) | (Level::Matrix, Level::Vector) => {
                (a.shape().cols(), b.shape().rows())
            }
            (Level::Vector, Level::Matrix) => (a.shape().rows(), b.shape().rows()),
            _ => return Err(incompatible("matmul", a, b)),
        };
        if left_inner != inner || right_inner != inner {
            return Err(incompatible("matmul", a, b));
        }
        let shape = match (a.level(), b.level()) {
            (Level::Matrix, Level::Matrix) => Shape::matrix(a.shape().rows(), b.shape().cols()),
            (Level::Matrix, _) => Shape::vector(a.shape().rows()),
            _ => Shape::vector(b.shape().cols()),
        };

        if a.is_zero() || b.is_zero() {
            return Ok(Expr::zeros(&shape));
        }
        if let Some(folded) = contract(a, b, inner)? {
            return Ok(folded);
        }
        Ok(Expr::build(
            Node::MatMul {
                left: a.clone(),
                right: b.clone(),
                inner,
            },
            shape,
        ))
    }

    /// Swap the axes of a matrix. Scalars and vectors are their own
    /// transpose.
    pub fn transposed(a: &Expr) -> Result<Expr> {
        if a.level() != Level::Matrix {
            return Ok(a.clone());
        }
        let shape = a.shape().transposed();
        if let Node::Transpose(inner) = a.node() {
            return Ok(inner.clone());
        }
        if a.is_zero() {
            return Ok(Expr::zeros(&shape));
        }
        if let Some(grid) = a.literal_grid() {
            let rows = (0..shape.rows())
                .map(|j| Expr::vector(grid.iter().map(|row| row[j].clone()).collect()))
                .collect::<Result<Vec<_>>>()?;
            return Expr::matrix_with_shape(shape.rows(), shape.cols(), rows);
        }
        Ok(Expr::build(Node::Transpose(a.clone()), shape))
    }

    /// Sum of every element.
    pub fn sum_all(&self) -> Result<Expr> {
        let a = self;
        if a.level() == Level::Scalar {
            return Ok(a.clone());
        }
        if a.is_zero() {
            return Ok(Expr::zero());
        }
        if let Some(items) = a.literal_items() {
            let mut total = Expr::zero();
            for item in items {
                total = Expr::sum(&total, &Expr::sum_all(item)?)?;
            }
            return Ok(total);
        }
        Ok(Expr::build(Node::SumAll(a.clone()), Shape::scalar()))
    }

    /// The vector of row sums of a matrix.
    pub fn sum_rows(&self) -> Result<Expr> {
        let a = self;
        if a.level() != Level::Matrix {
            return Err(incompatible("sum_rows", a, a));
        }
        if let Some(rows) = a.literal_items() {
            let sums = rows.iter().map(Expr::sum_all).collect::<Result<Vec<_>>>()?;
            return Expr::vector(sums);
        }
        Ok(Expr::build(
            Node::SumRows(a.clone()),
            Shape::vector(a.shape().rows()),
        ))
    }

    /// `body` applied to every scalar element of `input`, with `param`
    /// standing for the element.
    pub fn elementwise_map(input: &Expr, body: &Expr, param: &Var) -> Result<Expr> {
        if body.level() != Level::Scalar || param.level() != Level::Scalar {
            return Err(incompatible("map", input, body));
        }
        if !body.free_vars().contains(param) && !body.has_markers() {
            return Ok(Expr::filled(input.shape(), body));
        }
        match input.level() {
            Level::Scalar => substitute(body, param, input),
            Level::Vector => match input.literal_items() {
                Some(items) => {
                    let items = items
                        .iter()
                        .map(|item| substitute(body, param, item))
                        .collect::<Result<Vec<_>>>()?;
                    Ok(Expr::relabel(input, items))
                }
                None => Ok(Expr::build(
                    Node::Map {
                        input: input.clone(),
                        body: body.clone(),
                        param: param.clone(),
                    },
                    input.shape().clone(),
                )),
            },
            Level::Matrix => match input.literal_items() {
                Some(rows) => {
                    let rows = rows
                        .iter()
                        .map(|row| Expr::elementwise_map(row, body, param))
                        .collect::<Result<Vec<_>>>()?;
                    Ok(Expr::relabel(input, rows))
                }
                None => Ok(Expr::build(
                    Node::Map {
                        input: input.clone(),
                        body: body.clone(),
                        param: param.clone(),
                    },
                    input.shape().clone(),
                )),
            },
        }
    }

    /// Element `index` along the leading axis of a container expression.
    pub(crate) fn component(&self, index: usize) -> Result<Expr> {
        if let Some(items) = self.literal_items() {
            if let Some(item) = items.get(index) {
                return Ok(item.clone());
            }
        }
        if let Some(var) = self.as_var().and_then(|v| v.component(index)) {
            return Ok(Expr::from(var));
        }
        match self.level() {
            Level::Scalar => Ok(self.clone()),
            Level::Vector => {
                Expr::dot_product(self, &Expr::unit(self.shape(), &[index]))
            }
            Level::Matrix => {
                let selector = Expr::unit(&Shape::vector(self.shape().rows()), &[index]);
                Expr::matrix_product(&selector, self)
            }
        }
    }

    // ------------------------------------------------------------------
    // Method forms
    // ------------------------------------------------------------------

    pub fn dot(&self, other: &Expr) -> Result<Expr> {
        Expr::dot_product(self, other)
    }

    pub fn hadamard(&self, other: &Expr) -> Result<Expr> {
        Expr::hadamard_product(self, other)
    }

    pub fn matmul(&self, other: &Expr) -> Result<Expr> {
        Expr::matrix_product(self, other)
    }

    /// Transpose.
    pub fn t(&self) -> Result<Expr> {
        Expr::transposed(self)
    }

    /// Apply `f` to every scalar element.
    ///
    /// `f` receives a placeholder expression standing for the element; the
    /// placeholder is private to the resulting map node.
    pub fn map(&self, f: impl FnOnce(&Expr) -> Result<Expr>) -> Result<Expr> {
        let param = Var::placeholder();
        let body = f(&param.expr())?;
        Expr::elementwise_map(self, &body, &param)
    }

    /// Euclidean norm, `sqrt(sum(self ⊙ self))`.
    pub fn magnitude(&self) -> Result<Expr> {
        Expr::sum_all(&self.hadamard(self)?)?.sqrt()
    }
}

fn substitute(body: &Expr, param: &Var, value: &Expr) -> Result<Expr> {
    reduce(body, &Environment::new().with(param, value.clone())?)
}

/// Fold a product of two literals with the classic triple loop.
///
/// Every row of the left operand and every column of the right operand is
/// checked against `inner` before it is contracted.
fn contract(a: &Expr, b: &Expr, inner: usize) -> Result<Option<Expr>> {
    let left: Vec<&[Expr]> = match a.level() {
        Level::Vector => match a.literal_items() {
            Some(items) => vec![items],
            None => return Ok(None),
        },
        _ => match a.literal_grid() {
            Some(grid) => grid,
            None => return Ok(None),
        },
    };
    let right: Vec<Vec<&Expr>> = match b.level() {
        Level::Vector => match b.literal_items() {
            Some(items) => items.iter().map(|x| vec![x]).collect(),
            None => return Ok(None),
        },
        _ => match b.literal_grid() {
            Some(grid) => grid.into_iter().map(|row| row.iter().collect()).collect(),
            None => return Ok(None),
        },
    };
    if right.len() != inner {
        return Err(incompatible("matmul", a, b));
    }
    let width = right.first().map_or(0, |row| row.len());

    let mut out = Vec::with_capacity(left.len());
    for row in &left {
        if row.len() != inner {
            return Err(incompatible("matmul", a, b));
        }
        let mut cells = Vec::with_capacity(width);
        for j in 0..width {
            let mut total = Expr::zero();
            for (k, x) in row.iter().enumerate() {
                let y = right[k].get(j).ok_or_else(|| incompatible("matmul", a, b))?;
                total = Expr::sum(&total, &Expr::product(x, y)?)?;
            }
            cells.push(total);
        }
        out.push(cells);
    }

    let folded = match (a.level(), b.level()) {
        (Level::Matrix, Level::Matrix) => Expr::matrix_from_rows(out)?,
        (Level::Matrix, _) => Expr::vector(out.into_iter().flatten().collect())?,
        _ => Expr::vector(out.into_iter().flatten().collect())?,
    };
    Ok(Some(folded))
}

impl From<Vec<f64>> for Expr {
    fn from(values: Vec<f64>) -> Self {
        let len = values.len();
        Expr::build(
            Node::Vector(values.into_iter().map(Expr::constant).collect()),
            Shape::vector(len),
        )
    }
}

impl From<&[f64]> for Expr {
    fn from(values: &[f64]) -> Self {
        Expr::from(values.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: &[&[f64]]) -> Expr {
        Expr::matrix_from_rows(
            rows.iter()
                .map(|r| r.iter().map(|&x| Expr::constant(x)).collect())
                .collect(),
        )
        .unwrap()
    }

    fn consts(e: &Expr) -> Vec<f64> {
        e.literal_items()
            .unwrap()
            .iter()
            .map(|x| x.as_const().unwrap())
            .collect()
    }

    #[test]
    fn test_elementwise_fold() {
        let a = Expr::from(vec![1.0, 2.0]);
        let b = Expr::from(vec![3.0, 4.0]);
        assert_eq!(consts(&(&a + &b)), vec![4.0, 6.0]);
        assert_eq!(consts(&a.hadamard(&b).unwrap()), vec![3.0, 8.0]);
        assert_eq!(consts(&(2.0 * &a)), vec![2.0, 4.0]);
        assert_eq!(a.dot(&b).unwrap().as_const(), Some(11.0));
        assert_eq!(a.sum_all().unwrap().as_const(), Some(3.0));
        assert!((&a - &a).is_zero());
    }

    #[test]
    fn test_matrix_products_fold() {
        let a = grid(&[&[1.0, 2.0], &[3.0, 4.0]]);
        let b = grid(&[&[5.0, 6.0], &[7.0, 8.0]]);
        assert_eq!(a.matmul(&b).unwrap(), grid(&[&[19.0, 22.0], &[43.0, 50.0]]));

        let v = Expr::from(vec![1.0, 1.0]);
        assert_eq!(consts(&a.matmul(&v).unwrap()), vec![3.0, 7.0]);
        assert_eq!(consts(&v.matmul(&a).unwrap()), vec![4.0, 6.0]);
        assert_eq!(consts(&(&a * &v)), vec![3.0, 7.0]);
    }

    #[test]
    fn test_matmul_inner_mismatch_is_an_error() {
        let a = grid(&[&[1.0, 2.0, 3.0]]);
        let b = grid(&[&[1.0, 2.0], &[3.0, 4.0]]);
        assert!(matches!(
            a.matmul(&b),
            Err(ExprError::IncompatibleOperands { op: "matmul", .. })
        ));
        assert!(Expr::matmul_with_inner(&b, &b, 3).is_err());
    }

    #[test]
    fn test_transpose_and_row_sums() {
        let a = grid(&[&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]]);
        let t = a.t().unwrap();
        assert_eq!(t.shape(), &Shape::matrix(3, 2));
        assert_eq!(t, grid(&[&[1.0, 4.0], &[2.0, 5.0], &[3.0, 6.0]]));
        assert_eq!(consts(&a.sum_rows().unwrap()), vec![6.0, 15.0]);

        let m = Var::matrix("m", 2, 3).expr();
        assert_eq!(m.t().unwrap().t().unwrap(), m);
    }

    #[test]
    fn test_map_over_literal_substitutes_elements() {
        let v = Expr::from(vec![1.0, 2.0, 3.0]);
        let squared = v.map(|p| p.pow(2.0)).unwrap();
        assert_eq!(consts(&squared), vec![1.0, 4.0, 9.0]);
        assert!(squared.free_vars().is_empty());
    }

    #[test]
    fn test_map_over_symbolic_input_keeps_placeholder_private() {
        let v = Var::vector("v", 3);
        let mapped = v.expr().map(|p| p.sin()).unwrap();
        assert_eq!(mapped.kind(), crate::expr::NodeKind::Map);
        assert_eq!(mapped.free_vars().iter().collect::<Vec<_>>(), vec![&v]);
    }

    #[test]
    fn test_constant_body_fills() {
        let v = Var::vector("v", 2).expr();
        let filled = v.map(|_| Ok(Expr::constant(7.0))).unwrap();
        assert_eq!(consts(&filled), vec![7.0, 7.0]);
    }

    #[test]
    fn test_matrix_rows_must_agree() {
        let rows = vec![Expr::from(vec![1.0]), Expr::from(vec![1.0, 2.0])];
        assert!(matches!(
            Expr::matrix(rows),
            Err(ExprError::IncompatibleOperands { op: "matrix", .. })
        ));
        assert_eq!(Expr::matrix(vec![]), Err(ExprError::EmptyContainer));
    }

    #[test]
    fn test_unit_and_component() {
        let u = Expr::unit(&Shape::matrix(2, 2), &[1, 0]);
        assert_eq!(u, grid(&[&[0.0, 0.0], &[1.0, 0.0]]));

        let v = Var::vector("v", 3);
        assert_eq!(v.expr().component(1).unwrap(), Expr::from(&v.components()[1]));
        let lit = Expr::from(vec![4.0, 5.0]);
        assert_eq!(lit.component(1).unwrap().as_const(), Some(5.0));
    }
}
