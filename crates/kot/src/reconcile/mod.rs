//! Reconcilers for owned children, finalizers, status and watches
//!
//! A controller is assembled from:
//! - [`One`]: keeps exactly zero or one child of a kind in the desired state
//! - [`List`]: keeps a collection of children in sync with a desired list
//! - [`Custom`]: any named action that should not run while the parent is deleted
//! - [`FinalizerSet`]: registers one finalizer marker and drives cleanup on deletion
//! - [`StatusUpdater`]: derives status and writes it only when it changed
//! - [`ResourceWatcher`]: maps events on related objects to reconcile requests

mod custom;
mod finalizer;
mod list;
mod one;
mod status;
mod watcher;

use std::sync::Arc;

use async_trait::async_trait;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::Client;

use crate::action::{Action, Outcome};
use crate::error::Error;
use crate::indexing::OwnershipIndex;
use crate::object::{Object, TypeKey};
use crate::runtime::KubeController;

pub use custom::Custom;
pub use finalizer::{Finalization, Finalizer, FinalizerSet, SimpleFinalizer};
pub use list::List;
pub use one::One;
pub use status::StatusUpdater;
pub use watcher::{ResourceWatcher, Watcher};

/// An action that manages one concern of a parent `P`
pub trait Reconciler<P: Object>: Action<P> {
    /// Name used in logs
    fn name(&self) -> String;

    /// Finalizer to register with the controller's finalizer set
    fn finalizer(&self) -> Option<Arc<dyn Finalizer<P>>> {
        None
    }

    /// Kind of the children this reconciler owns
    fn owned_kind(&self) -> Option<TypeKey> {
        None
    }

    /// Register the ownership index on the child store
    fn register_index(&self, _index: &Arc<OwnershipIndex>) -> Result<(), Error> {
        Ok(())
    }

    /// Add a watch on the owned kind to the kube runtime controller
    fn watch_owned(
        &self,
        controller: KubeController<P>,
        _client: &Client,
        _config: &WatcherConfig,
    ) -> KubeController<P> {
        controller
    }
}

/// Moves a single child toward its desired state
#[async_trait]
pub trait ChildReconcile<P, C>: Send + Sync
where
    P: Send + Sync,
    C: Send,
{
    /// Mutate `child` (a copy of the observed or a fresh object) in place
    async fn reconcile(&self, parent: &P, child: &mut C) -> Result<Outcome, Error>;
}

#[async_trait]
impl<P, C, F> ChildReconcile<P, C> for F
where
    P: Send + Sync,
    C: Send,
    F: Fn(&P, &mut C) -> Result<Outcome, Error> + Send + Sync,
{
    async fn reconcile(&self, parent: &P, child: &mut C) -> Result<Outcome, Error> {
        self(parent, child)
    }
}

/// Moves a collection of children toward its desired state
#[async_trait]
pub trait ListReconcile<P, C>: Send + Sync
where
    P: Send + Sync,
    C: Send,
{
    /// Append, edit or remove items of `children` (a copy of the observed list)
    async fn reconcile(&self, parent: &P, children: &mut Vec<C>) -> Result<Outcome, Error>;
}

#[async_trait]
impl<P, C, F> ListReconcile<P, C> for F
where
    P: Send + Sync,
    C: Send,
    F: Fn(&P, &mut Vec<C>) -> Result<Outcome, Error> + Send + Sync,
{
    async fn reconcile(&self, parent: &P, children: &mut Vec<C>) -> Result<Outcome, Error> {
        self(parent, children)
    }
}
