//! Controller assembly and the per-key reconcile pass
//!
//! A [`Controller`] runs every pass as
//!
//! 1. the finalizer set, then every reconciler (reconciler errors are collected,
//!    not short-circuited)
//! 2. the status updater, skipped when step 1 failed
//!
//! and maps the merged outcome to a [`Schedule`] for the host runtime.

use std::sync::Arc;
use std::time::Duration;

use kube::core::object::HasStatus;
use kube::runtime::controller::Action as RuntimeAction;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::action::{cancellable, Action, Composite, Context, Outcome};
use crate::client::ObjectStore;
use crate::error::{ActionError, Error};
use crate::indexing::OwnershipIndex;
use crate::object::{Object, ObjectKey, TypeKey};
use crate::reconcile::{Finalizer, FinalizerSet, Reconciler, StatusUpdater, Watcher};
use crate::runtime::KubeController;

/// Finalizer marker used when the builder is not given one
pub const DEFAULT_FINALIZER: &str = "kot.dev/finalizer";

/// When the runtime should look at a resource again
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Schedule {
    /// Reconcile again as soon as possible
    pub requeue: bool,
    /// Reconcile again after this delay
    pub requeue_after: Option<Duration>,
}

impl From<Outcome> for Schedule {
    fn from(outcome: Outcome) -> Self {
        Self {
            requeue: outcome.requeue,
            requeue_after: outcome.requeue_after,
        }
    }
}

impl Schedule {
    /// Translate to a kube runtime action; `immediate` is the delay used for `requeue`
    pub fn into_action(self, immediate: Duration) -> RuntimeAction {
        match (self.requeue_after, self.requeue) {
            (Some(delay), _) => RuntimeAction::requeue(delay),
            (None, true) => RuntimeAction::requeue(immediate),
            (None, false) => RuntimeAction::await_change(),
        }
    }
}

/// Builder for [`Controller`]
pub struct ControllerBuilder<P: Object> {
    name: Option<String>,
    store: Arc<dyn ObjectStore<P>>,
    marker: String,
    index: Option<Arc<OwnershipIndex>>,
    reconcilers: Vec<Arc<dyn Reconciler<P>>>,
    finalizers: Vec<Arc<dyn Finalizer<P>>>,
    watchers: Vec<Box<dyn Watcher<P>>>,
    status: Option<StatusUpdater<P>>,
}

impl<P: Object> ControllerBuilder<P> {
    fn new(store: Arc<dyn ObjectStore<P>>) -> Self {
        Self {
            name: None,
            store,
            marker: DEFAULT_FINALIZER.to_string(),
            index: None,
            reconcilers: Vec::new(),
            finalizers: Vec::new(),
            watchers: Vec::new(),
            status: None,
        }
    }

    /// Name used in logs; defaults to the lowercased parent kind
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Finalizer marker written to `metadata.finalizers`
    pub fn finalizer_name(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    /// Use `index` instead of the process-wide [`OwnershipIndex::shared`]
    ///
    /// Controllers whose children live in the same store must use the same index.
    pub fn ownership_index(mut self, index: Arc<OwnershipIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Add a reconciler; reconcilers run in registration order
    pub fn reconciler(mut self, reconciler: impl Reconciler<P> + 'static) -> Self {
        self.reconcilers.push(Arc::new(reconciler));
        self
    }

    /// Add a controller-level finalizer
    pub fn finalizer(mut self, finalizer: impl Finalizer<P> + 'static) -> Self {
        self.finalizers.push(Arc::new(finalizer));
        self
    }

    /// Watch another kind and map its events to parent requests
    pub fn watcher(mut self, watcher: impl Watcher<P> + 'static) -> Self {
        self.watchers.push(Box::new(watcher));
        self
    }

    /// Validate the configuration and register indexes
    pub fn build(self) -> Result<Controller<P>, Error> {
        if self.marker.trim().is_empty() {
            return Err(Error::Config("finalizer name must not be empty".to_string()));
        }
        let name = self
            .name
            .unwrap_or_else(|| P::kind(&()).to_lowercase());

        let index = self.index.unwrap_or_else(OwnershipIndex::shared);
        index.register_parent::<P>();
        for reconciler in &self.reconcilers {
            reconciler.register_index(&index)?;
        }

        let mut finalizers = FinalizerSet::new(Arc::clone(&self.store), self.marker);
        for finalizer in self
            .finalizers
            .into_iter()
            .chain(self.reconcilers.iter().filter_map(|r| r.finalizer()))
        {
            finalizers.push(finalizer);
        }

        let reconcile_all = Composite::new(
            self.reconcilers
                .iter()
                .map(|r| Box::new(Arc::clone(r)) as Box<dyn Action<P>>)
                .collect(),
        )
        .allow_errors();
        let converge = Composite::default().with(finalizers).with(reconcile_all);
        let mut pass = Composite::default().with(converge);
        if let Some(status) = self.status.filter(|status| !status.is_empty()) {
            pass.push(status);
        }

        info!(
            controller = %name,
            reconcilers = self.reconcilers.len(),
            watchers = self.watchers.len(),
            "controller built"
        );
        Ok(Controller {
            name,
            store: self.store,
            pass,
            reconcilers: self.reconcilers,
            watchers: self.watchers,
        })
    }
}

impl<P> ControllerBuilder<P>
where
    P: Object + HasStatus,
    P::Status: PartialEq,
{
    /// Add a status resolver; the status is written once after all resolvers ran
    pub fn status_resolver(mut self, resolver: impl Action<P> + 'static) -> Self {
        let store = Arc::clone(&self.store);
        self.status
            .get_or_insert_with(|| StatusUpdater::new(store))
            .push(resolver);
        self
    }
}

/// Reconciles parents of kind `P` by key
pub struct Controller<P: Object> {
    name: String,
    store: Arc<dyn ObjectStore<P>>,
    pass: Composite<P>,
    reconcilers: Vec<Arc<dyn Reconciler<P>>>,
    watchers: Vec<Box<dyn Watcher<P>>>,
}

impl<P: Object> Controller<P> {
    /// Start building a controller reading parents from `store`
    pub fn builder(store: Arc<dyn ObjectStore<P>>) -> ControllerBuilder<P> {
        ControllerBuilder::new(store)
    }

    /// Name used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of the reconcilers, in execution order
    pub fn reconciler_names(&self) -> Vec<String> {
        self.reconcilers.iter().map(|r| r.name()).collect()
    }

    /// Kinds of the children owned by this controller
    pub fn owned_kinds(&self) -> Vec<TypeKey> {
        self.reconcilers
            .iter()
            .filter_map(|r| r.owned_kind())
            .collect()
    }

    /// Add the owned-kind and related-kind watches to a kube runtime controller
    pub fn attach_watches(
        &self,
        mut controller: KubeController<P>,
        client: &Client,
        config: &WatcherConfig,
    ) -> KubeController<P> {
        for reconciler in &self.reconcilers {
            controller = reconciler.watch_owned(controller, client, config);
        }
        for watcher in &self.watchers {
            controller = watcher.attach(controller, client, config);
        }
        controller
    }

    /// Run one pass for the parent at `key`
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Schedule, ActionError> {
        self.reconcile_with(key, CancellationToken::new()).await
    }

    /// Run one pass, giving up on store calls once `cancel` fires
    #[instrument(skip(self, cancel), fields(controller = %self.name, resource = %key))]
    pub async fn reconcile_with(
        &self,
        key: &ObjectKey,
        cancel: CancellationToken,
    ) -> Result<Schedule, ActionError> {
        let operation = format!("get {}", P::kind(&()));
        let parent = match cancellable(&cancel, &operation, self.store.get(key)).await {
            Ok(parent) => parent,
            Err(error) if error.is_not_found() => {
                debug!("resource not found, nothing to do");
                return Ok(Schedule::default());
            }
            Err(error) => return Err(error.into()),
        };

        let mut ctx = Context::new(parent).with_cancellation(cancel);
        match self.pass.run(&mut ctx).await {
            Ok(outcome) => {
                let schedule = Schedule::from(outcome);
                debug!(?schedule, "reconcile pass finished");
                Ok(schedule)
            }
            Err(error) => {
                warn!(error = %error, "reconcile pass failed");
                Err(error)
            }
        }
    }
}
