use std::sync::Arc;

use async_trait::async_trait;
use kube::api::Api;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::Client;
use tracing::{debug, info};

use super::{ChildReconcile, Finalizer, Reconciler};
use crate::action::{Action, Context, Outcome};
use crate::client::ObjectStore;
use crate::error::{ActionError, Error};
use crate::indexing::OwnershipIndex;
use crate::object::{has_identity, is_deleting, set_controller_reference, Object, TypeKey};
use crate::runtime::KubeController;

type Presence<P> = Box<dyn Fn(&P) -> Result<bool, Error> + Send + Sync>;

/// Keeps at most one child of kind `C` under each parent
///
/// The child is looked up through the ownership index. A missing child starts
/// from `C::default()` and is created once the callback gives it a name; an
/// unchanged child is never written. More than one child is an error that is
/// left for an operator to resolve.
pub struct One<P, C> {
    store: Arc<dyn ObjectStore<C>>,
    reconcile: Box<dyn ChildReconcile<P, C>>,
    when: Option<Presence<P>>,
    finalizer: Option<Arc<dyn Finalizer<P>>>,
}

impl<P: Object, C: Object + Default> One<P, C> {
    /// Reconcile the child with a closure
    pub fn new<F>(store: Arc<dyn ObjectStore<C>>, reconcile: F) -> Self
    where
        F: Fn(&P, &mut C) -> Result<Outcome, Error> + Send + Sync + 'static,
    {
        Self::with_reconciler(store, reconcile)
    }

    /// Reconcile the child with any [`ChildReconcile`] implementation
    pub fn with_reconciler(
        store: Arc<dyn ObjectStore<C>>,
        reconcile: impl ChildReconcile<P, C> + 'static,
    ) -> Self {
        Self {
            store,
            reconcile: Box::new(reconcile),
            when: None,
            finalizer: None,
        }
    }

    /// Only keep the child while `desired` returns true; otherwise delete it
    pub fn when<F>(mut self, desired: F) -> Self
    where
        F: Fn(&P) -> Result<bool, Error> + Send + Sync + 'static,
    {
        self.when = Some(Box::new(desired));
        self
    }

    /// Attach a finalizer to the controller's finalizer set
    pub fn with_finalizer(mut self, finalizer: impl Finalizer<P> + 'static) -> Self {
        self.finalizer = Some(Arc::new(finalizer));
        self
    }

    fn desired(&self, parent: &P) -> Result<bool, Error> {
        match &self.when {
            Some(when) => when(parent),
            None => Ok(true),
        }
    }
}

#[async_trait]
impl<P: Object, C: Object + Default> Action<P> for One<P, C> {
    async fn run(&self, ctx: &mut Context<P>) -> Result<Outcome, ActionError> {
        if ctx.is_deleting() {
            return Ok(Outcome::default());
        }

        let kind = C::kind(&());
        debug!(owned_kind = %kind, "reconciling one");

        let children = ctx
            .io(
                &format!("list {kind} children"),
                self.store.list(&OwnershipIndex::children_of(ctx.resource())),
            )
            .await?;
        if children.len() > 1 {
            return Err(Error::TooManyChildren {
                kind: kind.into_owned(),
                count: children.len(),
            }
            .into());
        }
        let observed = children.into_iter().next().unwrap_or_default();

        if is_deleting(&observed) {
            debug!(owned_kind = %kind, "child is being deleted, skipping");
            return Ok(Outcome::default());
        }

        if !self.desired(ctx.resource())? {
            if has_identity(&observed) {
                info!(owned_kind = %kind, child = ?observed.meta().name, "deleting unwanted child");
                ctx.io(&format!("delete {kind}"), self.store.delete(&observed))
                    .await?;
            }
            return Ok(Outcome::default());
        }

        let mut child = observed.clone();
        let outcome = self.reconcile.reconcile(ctx.resource(), &mut child).await?;
        set_controller_reference(ctx.resource(), &mut child)
            .map_err(|error| ActionError::new(outcome, error))?;

        if child == observed {
            debug!(owned_kind = %kind, "child unchanged");
            return Ok(outcome);
        }

        let written = if has_identity(&observed) {
            info!(owned_kind = %kind, child = ?child.meta().name, "updating child");
            ctx.io(&format!("update {kind}"), self.store.update(&child))
                .await
        } else {
            info!(owned_kind = %kind, child = ?child.meta().name, "creating child");
            ctx.io(&format!("create {kind}"), self.store.create(&child))
                .await
        };
        written.map_err(|error| ActionError::new(outcome, error))?;
        Ok(outcome)
    }
}

impl<P: Object, C: Object + Default> Reconciler<P> for One<P, C> {
    fn name(&self) -> String {
        format!("one:{}", C::kind(&()))
    }

    fn finalizer(&self) -> Option<Arc<dyn Finalizer<P>>> {
        self.finalizer.clone()
    }

    fn owned_kind(&self) -> Option<TypeKey> {
        Some(TypeKey::of::<C>())
    }

    fn register_index(&self, index: &Arc<OwnershipIndex>) -> Result<(), Error> {
        index.register_children::<C, _>(self.store.as_ref())
    }

    fn watch_owned(
        &self,
        controller: KubeController<P>,
        client: &Client,
        config: &WatcherConfig,
    ) -> KubeController<P> {
        controller.owns(Api::<C>::all(client.clone()), config.clone())
    }
}
