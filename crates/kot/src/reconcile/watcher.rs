use std::sync::Arc;

use kube::api::Api;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::Client;
use tracing::{debug, warn};

use crate::error::Error;
use crate::object::{Object, ObjectKey};
use crate::runtime::{object_ref, KubeController};

/// Hooks an extra watch into the kube runtime controller for parent `P`
pub trait Watcher<P: Object>: Send + Sync {
    /// Add the watch to `controller`
    fn attach(
        &self,
        controller: KubeController<P>,
        client: &Client,
        config: &WatcherConfig,
    ) -> KubeController<P>;
}

type EnqueueFn<W> = Arc<dyn Fn(&W) -> Result<Vec<ObjectKey>, Error> + Send + Sync>;
type PredicateFn<W> = Arc<dyn Fn(&W) -> bool + Send + Sync>;

/// Maps events on objects of kind `W` to parent reconcile requests
///
/// Events rejected by the `when` predicate are dropped. Requests produced for one
/// event are de-duplicated.
pub struct ResourceWatcher<W> {
    enqueue: EnqueueFn<W>,
    when: Option<PredicateFn<W>>,
}

impl<W> Clone for ResourceWatcher<W> {
    fn clone(&self) -> Self {
        Self {
            enqueue: Arc::clone(&self.enqueue),
            when: self.when.clone(),
        }
    }
}

impl<W: Object> ResourceWatcher<W> {
    /// Request the parents returned by `enqueue` for every event on `W`
    pub fn new<F>(enqueue: F) -> Self
    where
        F: Fn(&W) -> Result<Vec<ObjectKey>, Error> + Send + Sync + 'static,
    {
        Self {
            enqueue: Arc::new(enqueue),
            when: None,
        }
    }

    /// Only react to objects matching `predicate`
    pub fn when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&W) -> bool + Send + Sync + 'static,
    {
        self.when = Some(Arc::new(predicate));
        self
    }

    /// Parent keys to reconcile for an event on `object`
    pub fn requests(&self, object: &W) -> Vec<ObjectKey> {
        if let Some(when) = &self.when {
            if !when(object) {
                return Vec::new();
            }
        }
        match (self.enqueue)(object) {
            Ok(mut keys) => {
                keys.sort();
                keys.dedup();
                keys
            }
            Err(error) => {
                warn!(
                    kind = %W::kind(&()),
                    object = %ObjectKey::from_resource(object),
                    error = %error,
                    "failed to map watch event"
                );
                Vec::new()
            }
        }
    }
}

impl<P: Object, W: Object> Watcher<P> for ResourceWatcher<W> {
    fn attach(
        &self,
        controller: KubeController<P>,
        client: &Client,
        config: &WatcherConfig,
    ) -> KubeController<P> {
        debug!(kind = %W::kind(&()), "watching related kind");
        let watcher = self.clone();
        controller.watches(
            Api::<W>::all(client.clone()),
            config.clone(),
            move |object: W| {
                watcher
                    .requests(&object)
                    .iter()
                    .map(object_ref::<P>)
                    .collect::<Vec<_>>()
            },
        )
    }
}
