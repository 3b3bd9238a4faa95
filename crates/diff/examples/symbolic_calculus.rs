//! Symbolic Calculus Walkthrough
//!
//! Run with: cargo run -p symbolic-diff --example symbolic_calculus
//!
//! This example demonstrates:
//! - Building expressions with folding constructors and operators
//! - Partial evaluation leaving a symbolic residual
//! - Lazy versus eager differentiation
//! - Gradients, Jacobians and the matrix product rule
//! - Exporting an expression graph to DOT

use symbolic_diff::export::to_dot;
use symbolic_diff::{
    evaluate, evaluate_strict, gradient, jacobian, Environment, EvalConfig, Evaluator, Expr,
    ExprError, Value, Var,
};

fn main() -> Result<(), ExprError> {
    println!("=== Symbolic Calculus ===\n");

    // -------------------------------------------------------------------------
    // 1. Construction folds as it goes
    // -------------------------------------------------------------------------
    println!("1. Construction");
    println!("---------------");

    let x = Var::scalar("x");
    let y = Var::scalar("y");
    let f = x.expr() * y.expr() + x.expr().pow(2.0)?.sin()?;
    println!("f          = {}", f);
    println!("2 + 3      = {}", Expr::two() + 3.0);
    println!("x - x      = {}", x.expr() - x.expr());
    println!("-(-x)      = {}", -(-x.expr()));
    println!();

    // -------------------------------------------------------------------------
    // 2. Partial evaluation
    // -------------------------------------------------------------------------
    println!("2. Evaluation");
    println!("-------------");

    let only_x = Environment::new().with(&x, 2.0)?;
    println!("f{}   = {}", only_x, evaluate(&f, &only_x)?);

    let both = only_x.bind(&y, 0.5)?;
    println!("f{} = {}", both, evaluate_strict(&f, &both)?);
    println!();

    // -------------------------------------------------------------------------
    // 3. Differentiation
    // -------------------------------------------------------------------------
    println!("3. Differentiation");
    println!("------------------");

    let config = EvalConfig::from_env().unwrap_or_default();
    println!("mode from environment: {}", config.mode);

    let lazy = Evaluator::lazy().differentiate(&f, &x)?;
    let eager = Evaluator::eager().differentiate(&f, &x)?;
    println!("lazy  ∂f/∂x = {}", lazy);
    println!("eager ∂f/∂x = {}", eager);
    println!("at x=2, y=0.5: {}", evaluate_strict(&lazy, &both)?);

    for (var, partial) in gradient(&f)? {
        println!("  ∂f/∂{} = {}", var, Evaluator::default().force(&partial)?);
    }
    println!();

    // -------------------------------------------------------------------------
    // 4. Containers
    // -------------------------------------------------------------------------
    println!("4. Containers");
    println!("-------------");

    let v = Var::vector("v", 3);
    let w = Var::matrix("w", 2, 3);
    let activation = w.expr().matmul(&v.expr())?.map(|p| p.tan())?;
    println!("g = {}", activation);

    let j = jacobian(&activation, &v)?;
    let env = Environment::new()
        .with(&v, vec![0.1, 0.2, 0.3])?
        .with(&w, &Value::matrix(vec![vec![1.0, 0.0, 1.0], vec![0.0, 1.0, 0.0]])?)?;
    println!("g(v, w)     = {}", evaluate_strict(&activation, &env)?);
    println!("∂g/∂v(v, w) = {}", evaluate_strict(&j, &env)?);
    println!();

    // -------------------------------------------------------------------------
    // 5. Export
    // -------------------------------------------------------------------------
    println!("5. Graphviz");
    println!("-----------");
    print!("{}", to_dot(&eager)?);

    Ok(())
}
