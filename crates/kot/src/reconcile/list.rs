use std::sync::Arc;

use async_trait::async_trait;
use kube::api::Api;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::Client;
use tracing::{debug, info};

use super::{Finalizer, ListReconcile, Reconciler};
use crate::action::{Action, Context, Outcome};
use crate::client::{sync_list, ObjectStore};
use crate::error::{ActionError, Error};
use crate::indexing::OwnershipIndex;
use crate::object::{set_controller_reference, Object, TypeKey};
use crate::runtime::KubeController;

/// Keeps a collection of children of kind `C` under each parent
///
/// The callback receives a copy of every observed child and edits it into the
/// desired collection: new items without a UID are created, changed items are
/// updated and items it dropped are deleted.
pub struct List<P, C> {
    store: Arc<dyn ObjectStore<C>>,
    reconcile: Box<dyn ListReconcile<P, C>>,
    finalizer: Option<Arc<dyn Finalizer<P>>>,
}

impl<P: Object, C: Object> List<P, C> {
    /// Reconcile the collection with a closure
    pub fn new<F>(store: Arc<dyn ObjectStore<C>>, reconcile: F) -> Self
    where
        F: Fn(&P, &mut Vec<C>) -> Result<Outcome, Error> + Send + Sync + 'static,
    {
        Self::with_reconciler(store, reconcile)
    }

    /// Reconcile the collection with any [`ListReconcile`] implementation
    pub fn with_reconciler(
        store: Arc<dyn ObjectStore<C>>,
        reconcile: impl ListReconcile<P, C> + 'static,
    ) -> Self {
        Self {
            store,
            reconcile: Box::new(reconcile),
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
impl<P: Object, C: Object> Action<P> for List<P, C> {
    async fn run(&self, ctx: &mut Context<P>) -> Result<Outcome, ActionError> {
        if ctx.is_deleting() {
            return Ok(Outcome::default());
        }

        let kind = C::kind(&());
        debug!(owned_kind = %kind, "reconciling list");

        let before = ctx
            .io(
                &format!("list {kind} children"),
                self.store.list(&OwnershipIndex::children_of(ctx.resource())),
            )
            .await?;
        let mut after = before.clone();
        let outcome = self.reconcile.reconcile(ctx.resource(), &mut after).await?;

        let parent = ctx.resource();
        let stats = sync_list(ctx, self.store.as_ref(), &before, after, |child: &mut C| {
            set_controller_reference(parent, child)
        })
        .await
        .map_err(|error| ActionError::new(outcome, error))?;

        if stats.changed() {
            info!(
                owned_kind = %kind,
                created = stats.created,
                updated = stats.updated,
                deleted = stats.deleted,
                "synchronized children"
            );
        }
        Ok(outcome)
    }
}

impl<P: Object, C: Object> Reconciler<P> for List<P, C> {
    fn name(&self) -> String {
        format!("list:{}", C::kind(&()))
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
