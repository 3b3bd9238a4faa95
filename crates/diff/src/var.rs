//! # Variables
//!
//! A variable is identified by its [`VarId`]; its shape travels with it.
//!
//! ## Key Concepts
//!
//! - **Named**: user variables, equal whenever their names are equal
//! - **Component**: `v[i]` of a vector variable, or row `m[i]` and entry
//!   `m[i][j]` of a matrix variable. Identity is (owner, index), so a
//!   component never collides with a user name that happens to read `v[0]`.
//! - **Bound**: placeholders of elementwise maps. Each one is unique and
//!   only meaningful inside the map node that introduced it.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use symbolic_core::{Level, Shape, StaticShape};

use crate::error::Result;
use crate::expr::Expr;

static NEXT_PLACEHOLDER: AtomicU64 = AtomicU64::new(0);

/// What makes two variables the same variable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VarId {
    Named(Arc<str>),
    Component(Var, usize),
    Bound(u64),
}

#[derive(Debug)]
struct VarData {
    id: VarId,
    shape: Shape,
}

/// A symbolic variable of scalar, vector or matrix shape.
#[derive(Clone)]
pub struct Var(Arc<VarData>);

impl Var {
    /// A named variable of any supported shape. Ranks above two are rejected.
    pub fn new(name: impl Into<Arc<str>>, shape: Shape) -> Result<Self> {
        shape.check_rank()?;
        Ok(Self::named(name, shape))
    }

    fn named(name: impl Into<Arc<str>>, shape: Shape) -> Self {
        Self::with_id(VarId::Named(name.into()), shape)
    }

    fn with_id(id: VarId, shape: Shape) -> Self {
        Var(Arc::new(VarData { id, shape }))
    }

    pub fn scalar(name: impl Into<Arc<str>>) -> Self {
        Self::named(name, Shape::scalar())
    }

    pub fn vector(name: impl Into<Arc<str>>, len: usize) -> Self {
        Self::named(name, Shape::vector(len))
    }

    pub fn matrix(name: impl Into<Arc<str>>, rows: usize, cols: usize) -> Self {
        Self::named(name, Shape::matrix(rows, cols))
    }

    /// A variable whose shape is named by a compile-time marker type.
    pub fn with_static_shape<S: StaticShape>(name: impl Into<Arc<str>>) -> Result<Self> {
        Self::new(name, Shape::of::<S>())
    }

    /// A fresh scalar placeholder, distinct from every other variable.
    pub fn placeholder() -> Self {
        let id = NEXT_PLACEHOLDER.fetch_add(1, AtomicOrdering::Relaxed);
        Self::with_id(VarId::Bound(id), Shape::scalar())
    }

    pub fn id(&self) -> &VarId {
        &self.0.id
    }

    pub fn shape(&self) -> &Shape {
        &self.0.shape
    }

    pub fn level(&self) -> Level {
        self.0.shape.level()
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.0.id, VarId::Bound(_))
    }

    /// The variable as an expression leaf.
    pub fn expr(&self) -> Expr {
        Expr::from(self)
    }

    /// Element `index` along the leading axis: a scalar for a vector
    /// variable, a row vector for a matrix variable.
    pub fn component(&self, index: usize) -> Option<Var> {
        if self.0.shape.is_scalar() || index >= self.0.shape.rows() {
            return None;
        }
        Some(Self::with_id(
            VarId::Component(self.clone(), index),
            self.0.shape.element(),
        ))
    }

    /// All elements along the leading axis.
    pub fn components(&self) -> Vec<Var> {
        if self.0.shape.is_scalar() {
            return Vec::new();
        }
        (0..self.0.shape.rows())
            .filter_map(|i| self.component(i))
            .collect()
    }

    /// Every scalar inside this variable, row-major.
    pub fn scalar_components(&self) -> Vec<Var> {
        match self.level() {
            Level::Scalar => vec![self.clone()],
            Level::Vector => self.components(),
            Level::Matrix => self
                .components()
                .iter()
                .flat_map(|row| row.components())
                .collect(),
        }
    }

    /// The container this variable is a component of.
    pub fn owner(&self) -> Option<&Var> {
        match &self.0.id {
            VarId::Component(owner, _) => Some(owner),
            _ => None,
        }
    }

    /// Index within the owner, if this is a component.
    pub fn index(&self) -> Option<usize> {
        match &self.0.id {
            VarId::Component(_, i) => Some(*i),
            _ => None,
        }
    }

    /// The outermost owner; the variable itself if it is not a component.
    pub fn root(&self) -> &Var {
        let mut current = self;
        while let Some(owner) = current.owner() {
            current = owner;
        }
        current
    }

    /// True if `self` is `other` or one of its components at any depth.
    pub fn is_within(&self, other: &Var) -> bool {
        let mut current = Some(self);
        while let Some(v) = current {
            if v == other {
                return true;
            }
            current = v.owner();
        }
        false
    }

    /// Indices leading from `ancestor` down to `self`, outermost first.
    pub fn path_from(&self, ancestor: &Var) -> Option<Vec<usize>> {
        let mut path = Vec::new();
        let mut current = self;
        loop {
            if current == ancestor {
                path.reverse();
                return Some(path);
            }
            match &current.0.id {
                VarId::Component(owner, i) => {
                    path.push(*i);
                    current = owner;
                }
                _ => return None,
            }
        }
    }
}

impl PartialEq for Var {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.id == other.0.id
    }
}

impl Eq for Var {}

impl PartialOrd for Var {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Var {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.id.cmp(&other.0.id)
    }
}

impl Hash for Var {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.id {
            VarId::Named(name) => write!(f, "{}", name),
            VarId::Component(owner, i) => write!(f, "{}[{}]", owner, i),
            VarId::Bound(n) => write!(f, "_{}", n),
        }
    }
}

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self, self.0.shape)
    }
}
