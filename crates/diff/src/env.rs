//! # Environments - Substitution with Bookkeeping
//!
//! An [`Environment`] maps variables to replacement expressions. A
//! replacement that is already a fully reduced constant makes its variable
//! *bound*; anything else leaves it *free*.
//!
//! ## Key Concepts
//!
//! - **Complete**: no free entries remain
//! - **Ready to bind**: at least one entry is bound
//! - **Merge**: right-biased union; free entries are re-resolved through
//!   the merged mapping so `x ↦ y + 1` picks up a later `y ↦ 2`
//! - **Consistency check**: a reduction result must not mention any
//!   variable the environment had bound
//!
//! Binding a container variable to a literal also binds its components,
//! so `v ↦ [1, 2]` gives `v[0] ↦ 1` and `v[1] ↦ 2`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

use symbolic_core::Level;
use tracing::error;

use crate::error::{ExprError, Result};
use crate::eval::reduce;
use crate::expr::Expr;
use crate::var::Var;

#[derive(Debug, Clone, Default)]
pub struct Environment {
    entries: BTreeMap<Var, Expr>,
    bound: OnceLock<Arc<BTreeSet<Var>>>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    fn from_entries(entries: BTreeMap<Var, Expr>) -> Self {
        Self {
            entries,
            bound: OnceLock::new(),
        }
    }

    /// Build from `(variable, value)` pairs, checking every shape.
    pub fn from_pairs<V: Into<Expr>>(pairs: impl IntoIterator<Item = (Var, V)>) -> Result<Self> {
        let mut env = Self::new();
        for (var, value) in pairs {
            env.insert(&var, value)?;
        }
        Ok(env)
    }

    /// Bind `vars[i]` to `values[i]`.
    pub fn zip<V: Into<Expr>>(vars: &[Var], values: impl IntoIterator<Item = V>) -> Result<Self> {
        let values: Vec<Expr> = values.into_iter().map(Into::into).collect();
        if values.len() != vars.len() {
            return Err(ExprError::ArgumentCount {
                expected: vars.len(),
                got: values.len(),
            });
        }
        Self::from_pairs(vars.iter().cloned().zip(values))
    }

    /// Builder form of [`Environment::insert`].
    pub fn with(mut self, var: &Var, value: impl Into<Expr>) -> Result<Self> {
        self.insert(var, value)?;
        Ok(self)
    }

    /// A copy of this environment with `var` bound to `value`.
    pub fn bind(&self, var: &Var, value: impl Into<Expr>) -> Result<Self> {
        self.clone().with(var, value)
    }

    /// Bind `var` to `value`, replacing any previous binding of it or its
    /// components.
    pub fn insert(&mut self, var: &Var, value: impl Into<Expr>) -> Result<()> {
        let value = value.into();
        if var.shape() != value.shape() {
            return Err(ExprError::ShapeMismatch {
                expected: var.shape().clone(),
                got: value.shape().clone(),
            });
        }
        self.bound = OnceLock::new();
        self.entries.retain(|k, _| !k.is_within(var));

        let mut pending = vec![(var.clone(), value)];
        while let Some((var, value)) = pending.pop() {
            if var.level() != Level::Scalar {
                if let Some(items) = value.literal_items() {
                    pending.extend(
                        items
                            .iter()
                            .enumerate()
                            .filter_map(|(i, item)| var.component(i).map(|c| (c, item.clone()))),
                    );
                }
            }
            self.entries.insert(var, value);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Var, &Expr)> {
        self.entries.iter()
    }

    pub fn vars(&self) -> impl Iterator<Item = &Var> {
        self.entries.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &Expr> {
        self.entries.values()
    }

    pub(crate) fn into_values(self) -> impl Iterator<Item = Expr> {
        self.entries.into_values()
    }

    pub fn get(&self, var: &Var) -> Option<&Expr> {
        self.entries.get(var)
    }

    /// The replacement for a variable leaf, if there is one.
    pub fn lookup(&self, expr: &Expr) -> Option<&Expr> {
        expr.as_var().and_then(|v| self.get(v))
    }

    /// The environment without `var` and its components.
    pub fn remove(&self, var: &Var) -> Environment {
        Self::from_entries(
            self.entries
                .iter()
                .filter(|(k, _)| !k.is_within(var))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Right-biased union. Free entries of the result are reduced under
    /// the merged mapping without themselves.
    pub fn merge(&self, other: &Environment) -> Result<Environment> {
        if other.is_empty() {
            return Ok(self.clone());
        }
        if self.is_empty() {
            return Ok(other.clone());
        }
        let mut entries: BTreeMap<Var, Expr> = self
            .entries
            .iter()
            .filter(|(k, _)| !other.vars().any(|o| k.is_within(o)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.extend(other.iter().map(|(k, v)| (k.clone(), v.clone())));
        let merged = Self::from_entries(entries);

        let mut resolved = BTreeMap::new();
        for (var, value) in merged.iter() {
            let value = if value.is_constant() {
                value.clone()
            } else {
                reduce(value, &merged.remove(var))?
            };
            resolved.insert(var.clone(), value);
        }
        Ok(Self::from_entries(resolved))
    }

    pub fn scalars(&self) -> impl Iterator<Item = (&Var, &Expr)> {
        self.at_level(Level::Scalar)
    }

    pub fn vectors(&self) -> impl Iterator<Item = (&Var, &Expr)> {
        self.at_level(Level::Vector)
    }

    pub fn matrices(&self) -> impl Iterator<Item = (&Var, &Expr)> {
        self.at_level(Level::Matrix)
    }

    fn at_level(&self, level: Level) -> impl Iterator<Item = (&Var, &Expr)> {
        self.entries.iter().filter(move |(k, _)| k.level() == level)
    }

    /// Variables whose replacement is not yet a constant.
    pub fn free_vars(&self) -> BTreeSet<Var> {
        self.entries
            .iter()
            .filter(|(_, v)| !v.is_constant())
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Variables whose replacement is a constant.
    pub fn bound_vars(&self) -> &BTreeSet<Var> {
        self.bound.get_or_init(|| {
            Arc::new(
                self.entries
                    .iter()
                    .filter(|(_, v)| v.is_constant())
                    .map(|(k, _)| k.clone())
                    .collect(),
            )
        })
    }

    pub fn is_complete(&self) -> bool {
        self.entries.values().all(Expr::is_constant)
    }

    pub fn is_ready_to_bind(&self) -> bool {
        !self.bound_vars().is_empty()
    }

    /// True if applying this environment leaves `expr` with no free variables.
    pub fn fully_determines(&self, expr: &Expr) -> bool {
        self.resolve_free(expr.free_vars()).is_empty()
    }

    /// Free variables left after substituting through this environment.
    pub(crate) fn resolve_free(&self, free: &BTreeSet<Var>) -> BTreeSet<Var> {
        if self.is_empty() {
            return free.clone();
        }
        let mut out = BTreeSet::new();
        let mut visited = BTreeSet::new();
        let mut stack: Vec<Var> = free.iter().cloned().collect();
        while let Some(var) = stack.pop() {
            if !visited.insert(var.clone()) {
                continue;
            }
            if let Some(value) = self.get(&var) {
                for w in value.free_vars() {
                    if w == &var {
                        out.insert(var.clone());
                    } else {
                        stack.push(w.clone());
                    }
                }
            } else if let Some((owner, _)) = self.binding_above(&var) {
                stack.push(owner.clone());
            } else if self.has_entry_within(&var) {
                stack.extend(var.components());
            } else {
                out.insert(var);
            }
        }
        out
    }

    /// True if substituting through this environment can change an
    /// expression with the given free variables.
    pub(crate) fn touches(&self, free: &BTreeSet<Var>) -> bool {
        !self.is_empty()
            && free.iter().any(|v| {
                self.entries.contains_key(v)
                    || self.binding_above(v).is_some()
                    || self.has_entry_within(v)
            })
    }

    /// The nearest container owning `var` that has an entry.
    pub(crate) fn binding_above(&self, var: &Var) -> Option<(&Var, &Expr)> {
        let mut current = var.owner();
        while let Some(owner) = current {
            if let Some((k, v)) = self.entries.get_key_value(owner) {
                return Some((k, v));
            }
            current = owner.owner();
        }
        None
    }

    fn has_entry_within(&self, var: &Var) -> bool {
        var.level() != Level::Scalar
            && self.entries.keys().any(|k| k != var && k.is_within(var))
    }

    /// Fails if `after` still depends on a variable this environment binds.
    pub fn check_propagated(&self, before: &Expr, after: &Expr) -> Result<()> {
        let bound = self.bound_vars();
        if bound.is_empty() {
            return Ok(());
        }
        let escaped: Vec<Var> = after
            .free_vars()
            .iter()
            .filter(|v| bound.contains(*v))
            .cloned()
            .collect();
        if escaped.is_empty() {
            return Ok(());
        }
        error!(
            before = %before,
            after = %after,
            env = %self,
            escaped = ?escaped,
            "bound variables escaped substitution"
        );
        Err(ExprError::CapturedVariableEscape {
            escaped,
            before: before.clone(),
            after: after.clone(),
            env: self.clone(),
        })
    }
}

impl PartialEq for Environment {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (var, value)) in self.entries.iter().filter(|(k, _)| k.owner().is_none()).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} = {}", var, value)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use symbolic_core::Shape;

    fn xy() -> (Var, Var) {
        (Var::scalar("x"), Var::scalar("y"))
    }

    #[test]
    fn test_bound_and_free_entries() {
        let (x, y) = xy();
        let env = Environment::new()
            .with(&x, 1.0)
            .unwrap()
            .with(&y, x.expr() + 1.0)
            .unwrap();
        assert_eq!(env.bound_vars(), &BTreeSet::from([x.clone()]));
        assert_eq!(env.free_vars(), BTreeSet::from([y]));
        assert!(!env.is_complete());
        assert!(env.is_ready_to_bind());
        assert_eq!(env.lookup(&x.expr()), Some(&Expr::one()));
    }

    #[test]
    fn test_empty_environment_is_complete_but_not_ready() {
        let env = Environment::new();
        assert!(env.is_complete());
        assert!(!env.is_ready_to_bind());
    }

    #[test]
    fn test_insert_checks_shape() {
        let v = Var::vector("v", 2);
        let err = Environment::new().with(&v, 1.0).unwrap_err();
        assert_eq!(
            err,
            ExprError::ShapeMismatch {
                expected: Shape::vector(2),
                got: Shape::scalar(),
            }
        );
    }

    #[test]
    fn test_vector_binding_binds_components() {
        let v = Var::vector("v", 2);
        let env = Environment::new().with(&v, vec![3.0, 4.0]).unwrap();
        let comps = v.components();
        assert_eq!(env.get(&comps[1]), Some(&Expr::constant(4.0)));
        assert_eq!(env.vectors().count(), 1);
        assert_eq!(env.scalars().count(), 2);

        let removed = env.remove(&v);
        assert!(removed.is_empty());
    }

    #[test]
    fn test_merge_resolves_free_entries() {
        let (x, y) = xy();
        let left = Environment::new().with(&x, y.expr() + 1.0).unwrap();
        let right = Environment::new().with(&y, 2.0).unwrap();
        let merged = left.merge(&right).unwrap();
        assert_eq!(merged.get(&x), Some(&Expr::constant(3.0)));
        assert!(merged.is_complete());
    }

    #[test]
    fn test_merge_is_right_biased() {
        let (x, _) = xy();
        let left = Environment::new().with(&x, 1.0).unwrap();
        let right = Environment::new().with(&x, 5.0).unwrap();
        assert_eq!(left.merge(&right).unwrap().get(&x), Some(&Expr::constant(5.0)));
    }

    #[test]
    fn test_fully_determines_follows_chains() {
        let (x, y) = xy();
        let expr = x.expr() * y.expr();
        let env = Environment::new()
            .with(&x, y.expr())
            .unwrap()
            .with(&y, 2.0)
            .unwrap();
        assert!(env.fully_determines(&expr));
        let partial = Environment::new().with(&x, 2.0).unwrap();
        assert!(!partial.fully_determines(&expr));
    }

    #[test]
    fn test_check_propagated_reports_escape() {
        let (x, _) = xy();
        let env = Environment::new().with(&x, 1.0).unwrap();
        let leaked = x.expr() + 1.0;
        let err = env.check_propagated(&x.expr(), &leaked).unwrap_err();
        assert!(matches!(
            err,
            ExprError::CapturedVariableEscape { ref escaped, .. } if escaped == &vec![x.clone()]
        ));
        assert!(env.check_propagated(&x.expr(), &Expr::one()).is_ok());
    }
}
