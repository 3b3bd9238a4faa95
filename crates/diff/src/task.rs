//! # Tasks - One Work Stack for Reduction and Differentiation
//!
//! Reducing an expression can need a derivative (a marker), and taking a
//! derivative can need a reduction (a composition) or another derivative
//! (a nested marker, or the body of a map). The reducer and the
//! differentiator never call each other. Each runs as a [`Task`]; a task
//! that is missing a result returns [`Poll::Pending`] with a [`Request`],
//! the driver runs that request as a new task, records the answer and polls
//! the waiting task again.
//!
//! ```text
//!   reduce(d(d(f)/dx)/dx)
//!     Reduce ──Derive(d(f)/dx, x)──▶ Differentiate ──Derive(f, x)──▶ Differentiate
//!       ▲                                 ▲                              │
//!       └────────── answer ───────────────┴────────── answer ────────────┘
//! ```
//!
//! Waiting tasks live on a heap-allocated stack, so nesting depth is bounded
//! by memory rather than by the thread's call stack.

use std::collections::HashMap;
use std::sync::Arc;

use symbolic_core::Level;
use tracing::debug;

use crate::derive::{Assembly, Differentiator};
use crate::env::Environment;
use crate::error::Result;
use crate::eval::Reducer;
use crate::expr::{derivative_shape, Expr};
use crate::var::Var;

/// Work one task needs from another before it can continue.
#[derive(Debug, Clone)]
pub(crate) enum Request {
    /// `∂expr/∂var`.
    Derive(Expr, Var),
    /// A composition reduced under the empty environment.
    Reduce(Expr),
}

impl Request {
    fn key(&self) -> (usize, Option<Var>) {
        match self {
            Request::Derive(expr, var) => (expr.addr(), Some(var.clone())),
            Request::Reduce(expr) => (expr.addr(), None),
        }
    }

    fn subject(&self) -> &Expr {
        match self {
            Request::Derive(expr, _) | Request::Reduce(expr) => expr,
        }
    }
}

pub(crate) enum Poll {
    Ready(Expr),
    Pending(Request),
}

/// Results of finished requests, shared by every task of one run.
#[derive(Default)]
pub(crate) struct Answers {
    /// The subject is kept alive so its address stays unique.
    done: HashMap<(usize, Option<Var>), (Expr, Expr)>,
}

impl Answers {
    pub(crate) fn derivative(&self, expr: &Expr, var: &Var) -> Option<&Expr> {
        self.done
            .get(&(expr.addr(), Some(var.clone())))
            .map(|(_, answer)| answer)
    }

    pub(crate) fn reduction(&self, expr: &Expr) -> Option<&Expr> {
        self.done.get(&(expr.addr(), None)).map(|(_, answer)| answer)
    }

    fn record(&mut self, request: Request, answer: Expr) {
        let key = request.key();
        self.done.insert(key, (request.subject().clone(), answer));
    }
}

pub(crate) enum Task {
    Reduce(Reducer),
    /// Derivative with respect to a scalar variable.
    Differentiate(Differentiator),
    /// Derivative with respect to a container variable, one component at a time.
    Assemble(Assembly),
}

impl Task {
    pub(crate) fn reduce(expr: &Expr, env: &Environment) -> Task {
        Task::Reduce(Reducer::new(expr, Arc::new(env.clone())))
    }

    pub(crate) fn derive(expr: &Expr, var: &Var) -> Result<Task> {
        derivative_shape(expr, var)?;
        debug!(expr = %expr, var = %var, "differentiating");
        Ok(match var.level() {
            Level::Scalar => Task::Differentiate(Differentiator::new(expr, var)),
            _ => Task::Assemble(Assembly::new(expr, var)),
        })
    }

    fn for_request(request: &Request) -> Result<Task> {
        match request {
            Request::Derive(expr, var) => Task::derive(expr, var),
            Request::Reduce(expr) => Ok(Task::reduce(expr, &Environment::new())),
        }
    }

    fn poll(&mut self, answers: &Answers) -> Result<Poll> {
        match self {
            Task::Reduce(reducer) => reducer.poll(answers),
            Task::Differentiate(differentiator) => differentiator.poll(answers),
            Task::Assemble(assembly) => assembly.poll(answers),
        }
    }
}

/// Run `root` to completion, along with everything it asks for.
pub(crate) fn drive(root: Task) -> Result<Expr> {
    let mut answers = Answers::default();
    let mut waiting: Vec<(Request, Task)> = Vec::new();
    let mut current = root;
    loop {
        match current.poll(&answers)? {
            Poll::Pending(request) => {
                let next = Task::for_request(&request)?;
                waiting.push((request, std::mem::replace(&mut current, next)));
            }
            Poll::Ready(result) => match waiting.pop() {
                Some((request, parent)) => {
                    answers.record(request, result);
                    current = parent;
                }
                None => return Ok(result),
            },
        }
    }
}
