//! Ownership and custom field indexes
//!
//! Children are found through the `.metadata.controller` field index rather than
//! labels or names. The index only reports a controller UID when the controller's
//! apiVersion/kind belongs to a registered parent type, so objects controlled by
//! anything else stay invisible to child lookups.

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use kube::Resource;
use parking_lot::RwLock;
use tracing::debug;

use crate::client::{IndexFn, ListOptions, ObjectStore};
use crate::error::Error;
use crate::object::{controller_ref, uid, Object, TypeKey};

/// Field name of the ownership index
pub const CONTROLLER_INDEX_FIELD: &str = ".metadata.controller";

static SHARED: LazyLock<Arc<OwnershipIndex>> = LazyLock::new(OwnershipIndex::new);

/// Registry of parent types backing the ownership index
///
/// A child store keeps the first ownership index registered on it, so every
/// controller owning children in the same store must use the same registry.
/// Controllers use [`OwnershipIndex::shared`] unless given another one.
#[derive(Debug, Default)]
pub struct OwnershipIndex {
    parents: RwLock<BTreeSet<TypeKey>>,
}

impl OwnershipIndex {
    /// Create an empty, shareable registry
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The process-wide registry
    pub fn shared() -> Arc<Self> {
        Arc::clone(&SHARED)
    }

    /// Register `P` as a parent type; returns false if it already was
    pub fn register_parent<P: Resource<DynamicType = ()>>(&self) -> bool {
        let kind = TypeKey::of::<P>();
        let added = self.parents.write().insert(kind.clone());
        if added {
            debug!(parent = %kind, "registered parent kind");
        }
        added
    }

    /// Whether `kind` is a registered parent type
    pub fn is_parent(&self, kind: &TypeKey) -> bool {
        self.parents.read().contains(kind)
    }

    /// UID of the object's controller, if that controller is a registered parent
    pub fn controller_of<K: Resource>(&self, object: &K) -> Option<String> {
        let owner = controller_ref(object)?;
        self.is_parent(&TypeKey::of_owner(owner)).then(|| owner.uid.clone())
    }

    /// Index function for the ownership field
    pub fn index_fn<K: Object>(self: &Arc<Self>) -> IndexFn<K> {
        let index = Arc::clone(self);
        Arc::new(move |object: &K| index.controller_of(object).into_iter().collect())
    }

    /// Register the ownership index on a child store
    pub fn register_children<K, S>(self: &Arc<Self>, store: &S) -> Result<(), Error>
    where
        K: Object,
        S: ObjectStore<K> + ?Sized,
    {
        let operation = format!("index {} by controller", K::kind(&()));
        store
            .index_field(CONTROLLER_INDEX_FIELD, self.index_fn())
            .map_err(|source| Error::store(operation, source))
    }

    /// List options selecting the children controlled by `owner`
    pub fn children_of<P: Resource>(owner: &P) -> ListOptions {
        let options = ListOptions {
            namespace: owner.meta().namespace.clone(),
            ..Default::default()
        };
        options.matching_field(CONTROLLER_INDEX_FIELD, uid(owner).unwrap_or_default())
    }
}

/// A custom field index for objects of kind `K`
pub struct Indexer<K> {
    field: String,
    index: IndexFn<K>,
}

impl<K: Object> Indexer<K> {
    /// Index `field` using `index`
    pub fn new<F>(field: impl Into<String>, index: F) -> Self
    where
        F: Fn(&K) -> Vec<String> + Send + Sync + 'static,
    {
        Self {
            field: field.into(),
            index: Arc::new(index),
        }
    }

    /// Field name served by this indexer
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Register on a store
    pub fn register<S: ObjectStore<K> + ?Sized>(&self, store: &S) -> Result<(), Error> {
        store
            .index_field(&self.field, Arc::clone(&self.index))
            .map_err(|source| {
                Error::store(format!("index {} by {}", K::kind(&()), self.field), source)
            })
    }
}

/// Register every indexer on a store, stopping at the first failure
pub fn index_all<K, S, I>(store: &S, indexers: I) -> Result<(), Error>
where
    I: IntoIterator<Item = Indexer<K>>,
    K: Object,
    S: ObjectStore<K> + ?Sized,
{
    indexers
        .into_iter()
        .try_for_each(|indexer| indexer.register(store))
}
