//! Composable units of reconciliation work
//!
//! Every step of a reconcile pass is an [`Action`]: finalizer bookkeeping, child
//! reconcilers, status resolvers and user closures alike. Actions produce an
//! [`Outcome`] and outcomes merge, so a pass can be assembled from small pieces
//! with [`Composite`] and decorated with [`Wrap`].

mod composite;
mod context;
mod wrap;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ActionError, Error};

pub use composite::Composite;
pub use context::Context;
pub(crate) use context::cancellable;
pub use wrap::{Around, Wrap};

/// Scheduling hints produced by one action
///
/// `requeue_after` of `None` means "no preference". `halt` stops the remaining
/// members of the enclosing [`Composite`] and never travels past it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Ask the host to run the pass again right away
    pub requeue: bool,
    /// Ask the host to run the pass again after this long
    pub requeue_after: Option<Duration>,
    /// Stop the enclosing composite
    pub halt: bool,
}

impl Outcome {
    /// Outcome requesting an immediate requeue
    pub fn requeue_now() -> Self {
        Self {
            requeue: true,
            ..Default::default()
        }
    }

    /// Outcome requesting a delayed requeue; a zero delay is treated as unset
    pub fn after(delay: Duration) -> Self {
        Self {
            requeue_after: non_zero(Some(delay)),
            ..Default::default()
        }
    }

    /// Outcome that stops the enclosing composite
    pub fn halted() -> Self {
        Self {
            halt: true,
            ..Default::default()
        }
    }

    /// Copy of this outcome with `halt` replaced
    pub fn with_halt(self, halt: bool) -> Self {
        Self { halt, ..self }
    }

    /// Combine two outcomes
    ///
    /// Flags are OR-ed and the shortest non-zero delay wins.
    pub fn merge(self, other: Outcome) -> Outcome {
        let requeue_after = match (non_zero(self.requeue_after), non_zero(other.requeue_after)) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Outcome {
            requeue: self.requeue || other.requeue,
            requeue_after,
            halt: self.halt || other.halt,
        }
    }
}

fn non_zero(delay: Option<Duration>) -> Option<Duration> {
    delay.filter(|d| !d.is_zero())
}

/// A step of a reconcile pass
///
/// Implementations read and mutate the request-scoped [`Context`]. A failing action
/// returns an [`ActionError`] carrying whatever outcome it had gathered.
#[async_trait]
pub trait Action<P: Send + Sync>: Send + Sync {
    /// Run the action against the current pass
    async fn run(&self, ctx: &mut Context<P>) -> Result<Outcome, ActionError>;
}

#[async_trait]
impl<P, A> Action<P> for Arc<A>
where
    P: Send + Sync,
    A: Action<P> + ?Sized,
{
    async fn run(&self, ctx: &mut Context<P>) -> Result<Outcome, ActionError> {
        self.as_ref().run(ctx).await
    }
}

/// Action backed by a synchronous closure
pub struct FnAction<F>(F);

/// Turn a closure into an [`Action`]
pub fn from_fn<P, F>(f: F) -> FnAction<F>
where
    P: Send + Sync,
    F: Fn(&mut Context<P>) -> Result<Outcome, Error> + Send + Sync,
{
    FnAction(f)
}

#[async_trait]
impl<P, F> Action<P> for FnAction<F>
where
    P: Send + Sync,
    F: Fn(&mut Context<P>) -> Result<Outcome, Error> + Send + Sync,
{
    async fn run(&self, ctx: &mut Context<P>) -> Result<Outcome, ActionError> {
        (self.0)(ctx).map_err(ActionError::from)
    }
}
