//! Object store abstraction
//!
//! Reconcilers never talk to the API server directly. They go through
//! [`ObjectStore`], which [`KubeStore`](crate::store::KubeStore) implements on top
//! of `kube::Api` and tests implement with mocks or an in-memory store.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::action::Context;
use crate::error::{Error, StoreError};
use crate::object::{is_deleting, uid, Object, ObjectKey};

/// Extracts the values an object is indexed under for one field
pub type IndexFn<K> = Arc<dyn Fn(&K) -> Vec<String> + Send + Sync>;

/// Filters for [`ObjectStore::list`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Restrict to one namespace
    pub namespace: Option<String>,
    /// Indexed field equality filters
    pub fields: BTreeMap<String, String>,
    /// Label equality filters
    pub labels: BTreeMap<String, String>,
}

impl ListOptions {
    /// List within a namespace
    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    /// Require an indexed field to equal `value`
    pub fn matching_field(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Require label `name` to equal `value`
    pub fn labeled(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    /// Require every given label
    pub fn with_labels<I, N, V>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        self.labels
            .extend(labels.into_iter().map(|(n, v)| (n.into(), v.into())));
        self
    }

    /// Whether `object` passes the namespace and label filters
    pub fn admits<K: Resource>(&self, object: &K) -> bool {
        let namespace_ok = match &self.namespace {
            Some(ns) => object.meta().namespace.as_ref() == Some(ns),
            None => true,
        };
        namespace_ok
            && self
                .labels
                .iter()
                .all(|(name, value)| object.labels().get(name) == Some(value))
    }

    /// Label filters rendered as an API label selector
    pub fn label_selector(&self) -> Option<String> {
        if self.labels.is_empty() {
            return None;
        }
        Some(
            self.labels
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

/// Typed access to objects of kind `K`
///
/// Writes return the object as persisted (new resourceVersion, UID, timestamps).
/// Stale writes fail with [`StoreError::Conflict`]; nothing here retries.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore<K: Object>: Send + Sync {
    /// Fetch one object
    async fn get(&self, key: &ObjectKey) -> Result<K, StoreError>;

    /// List objects matching `options`
    ///
    /// Field filters must name a field registered with [`ObjectStore::index_field`].
    async fn list(&self, options: &ListOptions) -> Result<Vec<K>, StoreError>;

    /// Create a new object
    async fn create(&self, object: &K) -> Result<K, StoreError>;

    /// Replace an existing object
    async fn update(&self, object: &K) -> Result<K, StoreError>;

    /// Write only the status sub-document
    async fn update_status(&self, object: &K) -> Result<K, StoreError>;

    /// Delete an object; objects with finalizers only get a deletion timestamp
    async fn delete(&self, object: &K) -> Result<(), StoreError>;

    /// Register an index for `field`; registering the same field again is a no-op
    fn index_field(&self, field: &str, index: IndexFn<K>) -> Result<(), StoreError>;
}

/// Read the current state of `object` from the store
pub async fn reload<K, S>(store: &S, object: &K) -> Result<K, StoreError>
where
    K: Object,
    S: ObjectStore<K> + ?Sized,
{
    store.get(&ObjectKey::from_resource(object)).await
}

/// Writes counted by [`SyncPlan::apply`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Objects created
    pub created: usize,
    /// Objects updated
    pub updated: usize,
    /// Objects deleted
    pub deleted: usize,
}

impl SyncStats {
    /// Whether any write happened
    pub fn changed(&self) -> bool {
        self.created + self.updated + self.deleted > 0
    }
}

/// Writes needed to turn an observed list into a desired one
#[derive(Debug)]
pub struct SyncPlan<K> {
    /// Objects without a UID
    pub create: Vec<K>,
    /// Changed objects, and objects with a UID the observed list did not contain
    pub update: Vec<K>,
    /// Observed objects missing from the desired list
    pub delete: Vec<K>,
}

impl<K: Object> SyncPlan<K> {
    /// Diff `before` against `after` by UID
    ///
    /// `prepare` runs on every desired object before it is classified. Desired
    /// objects that are already being deleted are left to the store.
    pub fn diff<F>(before: &[K], after: Vec<K>, mut prepare: F) -> Result<Self, Error>
    where
        F: FnMut(&mut K) -> Result<(), Error>,
    {
        let observed: HashMap<&str, &K> = before
            .iter()
            .filter_map(|object| uid(object).map(|id| (id, object)))
            .collect();
        let mut kept: HashSet<String> = HashSet::new();
        let mut plan = Self {
            create: Vec::new(),
            update: Vec::new(),
            delete: Vec::new(),
        };

        for mut object in after {
            prepare(&mut object)?;

            let Some(id) = uid(&object).map(str::to_string) else {
                plan.create.push(object);
                continue;
            };
            let Some(previous) = observed.get(id.as_str()) else {
                plan.update.push(object);
                continue;
            };
            kept.insert(id);
            if !is_deleting(&object) && **previous != object {
                plan.update.push(object);
            }
        }

        plan.delete = before
            .iter()
            .filter(|object| uid(*object).is_some_and(|id| !kept.contains(id)))
            .cloned()
            .collect();
        Ok(plan)
    }

    /// Whether the plan has no writes
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }

    /// Execute creates, then updates, then deletes; the first failure stops the rest
    pub async fn apply<P, S>(self, ctx: &Context<P>, store: &S) -> Result<SyncStats, Error>
    where
        P: Resource + Send + Sync,
        S: ObjectStore<K> + ?Sized,
    {
        let kind = K::kind(&());
        let mut stats = SyncStats::default();

        for object in &self.create {
            debug!(kind = %kind, name = ?object.meta().name, "creating child");
            ctx.io(&format!("create {kind}"), store.create(object)).await?;
            stats.created += 1;
        }
        for object in &self.update {
            debug!(kind = %kind, name = ?object.meta().name, "updating child");
            ctx.io(&format!("update {kind}"), store.update(object)).await?;
            stats.updated += 1;
        }
        for object in &self.delete {
            debug!(kind = %kind, name = ?object.meta().name, "deleting child");
            ctx.io(&format!("delete {kind}"), store.delete(object)).await?;
            stats.deleted += 1;
        }
        Ok(stats)
    }
}

/// Synchronize the observed list `before` with the desired list `after`
pub async fn sync_list<P, K, S, F>(
    ctx: &Context<P>,
    store: &S,
    before: &[K],
    after: Vec<K>,
    prepare: F,
) -> Result<SyncStats, Error>
where
    P: Resource + Send + Sync,
    K: Object,
    S: ObjectStore<K> + ?Sized,
    F: FnMut(&mut K) -> Result<(), Error> + Send,
{
    SyncPlan::diff(before, after, prepare)?.apply(ctx, store).await
}
