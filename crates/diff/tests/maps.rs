//! # Elementwise Map Tests
//!
//! Maps bind a private placeholder. It must never show up among the free
//! variables of anything built from the map.

use std::collections::BTreeSet;

use symbolic_diff::{
    evaluate, evaluate_strict, jacobian, Environment, Evaluator, Expr, Shape, Value, Var,
};

const EPS: f64 = 1e-9;

fn placeholders(expr: &Expr) -> BTreeSet<Var> {
    expr.free_vars()
        .iter()
        .filter(|v| v.is_placeholder())
        .cloned()
        .collect()
}

#[test]
fn test_placeholder_is_not_free_in_the_map() {
    let v = Var::vector("v", 3);
    let f = v.expr().map(|p| p.sin()).unwrap();
    assert!(placeholders(&f).is_empty());
    assert_eq!(f.free_vars().iter().collect::<Vec<_>>(), vec![&v]);
}

#[test]
fn test_no_leak_after_differentiating() {
    let x = Var::scalar("x");
    let v = Var::vector("v", 3);
    let f = v
        .expr()
        .map(|p| Expr::product(&p.pow(2.0)?, &x.expr().sin()?))
        .unwrap()
        .sum_all()
        .unwrap();

    let d = Evaluator::eager().differentiate(&f, &x).unwrap();
    assert!(placeholders(&d).is_empty(), "{}", d);
    let grad = Evaluator::eager().differentiate(&f, &v).unwrap();
    assert!(placeholders(&grad).is_empty(), "{}", grad);
}

#[test]
fn test_no_leak_after_evaluating() {
    let x = Var::scalar("x");
    let v = Var::vector("v", 2);
    let f = v.expr().map(|p| Expr::product(p, &x.expr())).unwrap();

    let partial = evaluate(&f, &Environment::new().with(&x, 2.0).unwrap()).unwrap();
    assert!(placeholders(&partial).is_empty(), "{}", partial);

    let other = evaluate(&f, &Environment::new().with(&v, vec![1.0, 3.0]).unwrap()).unwrap();
    assert!(placeholders(&other).is_empty(), "{}", other);
    assert_eq!(other.free_vars().iter().collect::<Vec<_>>(), vec![&x]);
}

#[test]
fn test_user_variable_named_like_a_placeholder_is_distinct() {
    let p = Var::scalar("_0");
    let v = Var::vector("v", 2);
    let f = v.expr().map(|q| Expr::sum(q, &p.expr())).unwrap();
    let env = Environment::new()
        .with(&p, 10.0)
        .unwrap()
        .with(&v, vec![1.0, 2.0])
        .unwrap();
    assert_eq!(evaluate_strict(&f, &env).unwrap(), Value::vector(vec![11.0, 12.0]));
}

#[test]
fn test_map_chain_rule() {
    // d/dx map(v, p -> sin(p x)) = map(v, p -> p cos(p x))
    let x = Var::scalar("x");
    let v = Var::vector("v", 3);
    let f = v
        .expr()
        .map(|p| Expr::product(p, &x.expr())?.sin())
        .unwrap();
    let df = Evaluator::eager().differentiate(&f, &x).unwrap();
    assert_eq!(df.shape(), &Shape::vector(3));

    let (a, items) = (0.7, [1.0, -2.0, 0.5]);
    let env = Environment::new()
        .with(&x, a)
        .unwrap()
        .with(&v, items.to_vec())
        .unwrap();
    let got = evaluate_strict(&df, &env).unwrap();
    let expected = Value::vector(items.iter().map(|p| p * (p * a).cos()).collect());
    assert!(got.approx_eq(&expected, EPS), "{} vs {}", got, expected);
}

#[test]
fn test_map_over_matrix() {
    let m = Var::matrix("m", 2, 2);
    let f = m.expr().map(|p| p.exp()).unwrap();
    assert_eq!(f.shape(), &Shape::matrix(2, 2));

    let at = Value::matrix(vec![vec![0.0, 1.0], vec![2.0, -1.0]]).unwrap();
    let env = Environment::new().with(&m, &at).unwrap();
    let got = evaluate_strict(&f, &env).unwrap();
    assert!(got.approx_eq(&at.map(f64::exp), EPS));
}

#[test]
fn test_jacobian_of_nonlinear_map() {
    let v = Var::vector("v", 3);
    let f = v.expr().map(|p| p.sin()).unwrap();
    let j = jacobian(&f, &v).unwrap();
    assert_eq!(j.shape(), &Shape::matrix(3, 3));

    let items = [0.1, 0.2, 0.3];
    let env = Environment::new().with(&v, items.to_vec()).unwrap();
    let got = evaluate_strict(&j, &env).unwrap();
    for i in 0..3 {
        for k in 0..3 {
            let expected = if i == k { f64::cos(items[i]) } else { 0.0 };
            assert!((got.get(&[i, k]).unwrap() - expected).abs() < EPS);
        }
    }
}
