use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::action::{Action, Context, Outcome};
use crate::client::ObjectStore;
use crate::error::{ActionError, Error};
use crate::object::{add_finalizer, has_finalizer, remove_finalizer, Object};

/// Result of one [`Finalizer::finalize`] call
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Finalization {
    /// Cleanup is complete
    pub done: bool,
    /// Scheduling hints, e.g. when to check again
    pub outcome: Outcome,
}

impl Finalization {
    /// Cleanup complete
    pub fn done() -> Self {
        Self {
            done: true,
            outcome: Outcome::default(),
        }
    }

    /// Cleanup still running; come back according to `outcome`
    pub fn pending(outcome: Outcome) -> Self {
        Self {
            done: false,
            outcome,
        }
    }
}

/// Cleanup that must finish before a parent may be removed
#[async_trait]
pub trait Finalizer<P: Send + Sync>: Send + Sync {
    /// Whether this finalizer applies to the parent right now
    async fn enabled(&self, _ctx: &Context<P>) -> Result<bool, Error> {
        Ok(true)
    }

    /// Make progress on cleanup for a deleting parent
    async fn finalize(&self, ctx: &mut Context<P>) -> Result<Finalization, Error>;
}

type EnabledFn<P> = Box<dyn Fn(&P) -> Result<bool, Error> + Send + Sync>;
type FinalizeFn<P> = Box<dyn Fn(&mut Context<P>) -> Result<Finalization, Error> + Send + Sync>;

/// Finalizer built from closures
pub struct SimpleFinalizer<P> {
    enabled: Option<EnabledFn<P>>,
    finalize: FinalizeFn<P>,
}

impl<P: Send + Sync> SimpleFinalizer<P> {
    /// Always-enabled finalizer running `finalize`
    pub fn new<F>(finalize: F) -> Self
    where
        F: Fn(&mut Context<P>) -> Result<Finalization, Error> + Send + Sync + 'static,
    {
        Self {
            enabled: None,
            finalize: Box::new(finalize),
        }
    }

    /// Only apply while `enabled` returns true
    pub fn enabled_when<F>(mut self, enabled: F) -> Self
    where
        F: Fn(&P) -> Result<bool, Error> + Send + Sync + 'static,
    {
        self.enabled = Some(Box::new(enabled));
        self
    }
}

#[async_trait]
impl<P: Object> Finalizer<P> for SimpleFinalizer<P> {
    async fn enabled(&self, ctx: &Context<P>) -> Result<bool, Error> {
        match &self.enabled {
            Some(enabled) => enabled(ctx.resource()),
            None => Ok(true),
        }
    }

    async fn finalize(&self, ctx: &mut Context<P>) -> Result<Finalization, Error> {
        (self.finalize)(ctx)
    }
}

/// Coordinates every finalizer of a controller behind one marker
///
/// The marker is added to `metadata.finalizers` as soon as any finalizer is
/// enabled and removed once all enabled finalizers report done on a deleting
/// parent (or once none is enabled anymore). Completion is never persisted per
/// finalizer; it is recomputed on every pass.
pub struct FinalizerSet<P> {
    store: Arc<dyn ObjectStore<P>>,
    marker: String,
    finalizers: Vec<Arc<dyn Finalizer<P>>>,
}

impl<P: Object> FinalizerSet<P> {
    /// Create a set writing `marker` through `store`
    pub fn new(store: Arc<dyn ObjectStore<P>>, marker: impl Into<String>) -> Self {
        Self {
            store,
            marker: marker.into(),
            finalizers: Vec::new(),
        }
    }

    /// Add a finalizer
    pub fn push(&mut self, finalizer: Arc<dyn Finalizer<P>>) {
        self.finalizers.push(finalizer);
    }

    /// Add a finalizer, builder style
    pub fn with(mut self, finalizer: impl Finalizer<P> + 'static) -> Self {
        self.push(Arc::new(finalizer));
        self
    }

    /// The registration marker
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Number of declared finalizers
    pub fn len(&self) -> usize {
        self.finalizers.len()
    }

    /// Whether no finalizer is declared
    pub fn is_empty(&self) -> bool {
        self.finalizers.is_empty()
    }

    async fn persist(&self, ctx: &mut Context<P>, operation: &str) -> Result<(), Error> {
        let updated = ctx.io(operation, self.store.update(ctx.resource())).await?;
        ctx.replace_resource(updated);
        Ok(())
    }

    async fn unregister(&self, ctx: &mut Context<P>) -> Result<(), Error> {
        remove_finalizer(ctx.resource_mut(), &self.marker);
        self.persist(ctx, "remove finalizer").await?;
        info!(finalizer = %self.marker, "finalizer removed");
        Ok(())
    }
}

#[async_trait]
impl<P: Object> Action<P> for FinalizerSet<P> {
    async fn run(&self, ctx: &mut Context<P>) -> Result<Outcome, ActionError> {
        let mut enabled = Vec::new();
        for finalizer in &self.finalizers {
            if finalizer.enabled(ctx).await? {
                enabled.push(finalizer);
            }
        }

        let registered = has_finalizer(ctx.resource(), &self.marker);
        let deleting = ctx.is_deleting();

        if enabled.is_empty() {
            if registered {
                debug!(finalizer = %self.marker, "no finalizer enabled, dropping stale marker");
                self.unregister(ctx).await?;
            }
            return Ok(Outcome::default());
        }

        match (deleting, registered) {
            (false, false) => {
                add_finalizer(ctx.resource_mut(), &self.marker);
                self.persist(ctx, "add finalizer").await?;
                info!(finalizer = %self.marker, "finalizer added");
                Ok(Outcome::halted())
            }
            (true, true) => {
                let mut outcome = Outcome::default();
                let mut done = true;
                for finalizer in enabled {
                    match finalizer.finalize(ctx).await {
                        Ok(step) => {
                            outcome = outcome.merge(step.outcome);
                            done &= step.done;
                        }
                        Err(error) => {
                            warn!(error = %error, "finalizer failed");
                            return Err(ActionError::new(outcome.with_halt(true), error));
                        }
                    }
                }
                if !done {
                    debug!(finalizer = %self.marker, "finalization in progress");
                    return Ok(outcome.with_halt(true));
                }
                self.unregister(ctx)
                    .await
                    .map_err(|error| ActionError::new(outcome, error))?;
                Ok(outcome.with_halt(false))
            }
            _ => Ok(Outcome::default()),
        }
    }
}
