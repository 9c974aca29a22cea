use std::sync::Arc;

use async_trait::async_trait;
use kube::core::object::HasStatus;
use tracing::{debug, info};

use crate::action::{Action, Composite, Context, Outcome};
use crate::client::{reload, ObjectStore};
use crate::error::ActionError;
use crate::object::Object;

type StatusChanged<P> = fn(&P, &P) -> bool;

fn status_changed<P>(before: &P, after: &P) -> bool
where
    P: HasStatus,
    P::Status: PartialEq,
{
    before.status() != after.status()
}

/// Derives the parent's status and persists it only when it changed
///
/// Runs after the reconcilers. The parent is reloaded first so the resolvers see
/// what the reconcilers and the finalizer set wrote.
pub struct StatusUpdater<P> {
    store: Arc<dyn ObjectStore<P>>,
    resolvers: Composite<P>,
    changed: StatusChanged<P>,
}

impl<P> StatusUpdater<P>
where
    P: Object + HasStatus,
    P::Status: PartialEq,
{
    /// Create an updater without resolvers
    pub fn new(store: Arc<dyn ObjectStore<P>>) -> Self {
        Self::from_parts(store, status_changed::<P>)
    }
}

impl<P: Object> StatusUpdater<P> {
    pub(crate) fn from_parts(store: Arc<dyn ObjectStore<P>>, changed: StatusChanged<P>) -> Self {
        Self {
            store,
            resolvers: Composite::default(),
            changed,
        }
    }

    /// Add a resolver; resolvers run in registration order
    pub fn push(&mut self, resolver: impl Action<P> + 'static) {
        self.resolvers.push(resolver);
    }

    /// Add a resolver, builder style
    pub fn with(mut self, resolver: impl Action<P> + 'static) -> Self {
        self.push(resolver);
        self
    }

    /// Whether no resolver is declared
    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

#[async_trait]
impl<P: Object> Action<P> for StatusUpdater<P> {
    async fn run(&self, ctx: &mut Context<P>) -> Result<Outcome, ActionError> {
        let current = match ctx
            .io("reload parent", reload(self.store.as_ref(), ctx.resource()))
            .await
        {
            Ok(current) => current,
            Err(error) if error.is_not_found() => {
                debug!("parent is gone, skipping status");
                return Ok(Outcome::default());
            }
            Err(error) => return Err(error.into()),
        };
        ctx.replace_resource(current);
        let snapshot = ctx.resource().clone();

        let outcome = self.resolvers.run(ctx).await?;

        if !(self.changed)(&snapshot, ctx.resource()) {
            debug!("status unchanged");
            return Ok(outcome);
        }
        let written = ctx
            .io("update status", self.store.update_status(ctx.resource()))
            .await
            .map_err(|error| ActionError::new(outcome, error))?;
        ctx.replace_resource(written);
        info!("status updated");
        Ok(outcome)
    }
}
