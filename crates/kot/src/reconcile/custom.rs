use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{Finalizer, Reconciler};
use crate::action::{Action, Context, Outcome};
use crate::error::ActionError;
use crate::object::Object;

/// A named reconciler wrapping an arbitrary action
///
/// Skipped while the parent is being deleted, like the child reconcilers.
pub struct Custom<P> {
    name: String,
    action: Box<dyn Action<P>>,
    finalizer: Option<Arc<dyn Finalizer<P>>>,
}

impl<P: Object> Custom<P> {
    /// Wrap `action` under `name`
    pub fn new(name: impl Into<String>, action: impl Action<P> + 'static) -> Self {
        Self {
            name: name.into(),
            action: Box::new(action),
            finalizer: None,
        }
    }

    /// Attach a finalizer to the controller's finalizer set
    pub fn with_finalizer(mut self, finalizer: impl Finalizer<P> + 'static) -> Self {
        self.finalizer = Some(Arc::new(finalizer));
        self
    }
}

#[async_trait]
impl<P: Object> Action<P> for Custom<P> {
    async fn run(&self, ctx: &mut Context<P>) -> Result<Outcome, ActionError> {
        if ctx.is_deleting() {
            return Ok(Outcome::default());
        }
        debug!(reconciler = %self.name, "running custom reconciler");
        self.action.run(ctx).await
    }
}

impl<P: Object> Reconciler<P> for Custom<P> {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn finalizer(&self) -> Option<Arc<dyn Finalizer<P>>> {
        self.finalizer.clone()
    }
}
