//! In-memory [`ObjectStore`] with API-server-like write semantics
//!
//! - optimistic concurrency on `metadata.resourceVersion`
//! - server-assigned UID, resourceVersion, creationTimestamp and generateName suffixes
//! - finalizer-aware deletion: objects with finalizers only get a deletion timestamp
//!   and disappear once the last finalizer is removed
//! - an optional status sub-resource: `update` keeps the stored status and
//!   `update_status` writes nothing else
//! - per-operation call counters and one-shot failure injection

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kot::client::{IndexFn, ListOptions, ObjectStore};
use kot::{Object, ObjectKey, StoreError};
use parking_lot::Mutex;
use tracing::trace;

/// Store operations, for call counting and failure injection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Op {
    /// [`ObjectStore::get`]
    Get,
    /// [`ObjectStore::list`]
    List,
    /// [`ObjectStore::create`]
    Create,
    /// [`ObjectStore::update`]
    Update,
    /// [`ObjectStore::update_status`]
    UpdateStatus,
    /// [`ObjectStore::delete`]
    Delete,
}

impl Op {
    fn is_write(self) -> bool {
        !matches!(self, Op::Get | Op::List)
    }
}

struct State<K> {
    objects: BTreeMap<ObjectKey, K>,
    indexes: HashMap<String, IndexFn<K>>,
    resource_version: u64,
    calls: HashMap<Op, usize>,
    failures: HashMap<Op, StoreError>,
}

impl<K: Object> State<K> {
    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    /// Count the call and hand out an injected failure, if any
    fn enter(&mut self, op: Op) -> Result<(), StoreError> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.remove(&op) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn stored(&self, key: &ObjectKey) -> Result<&K, StoreError> {
        self.objects.get(key).ok_or_else(|| not_found::<K>(key))
    }
}

fn kind<K: Object>() -> String {
    K::kind(&()).into_owned()
}

fn not_found<K: Object>(key: &ObjectKey) -> StoreError {
    StoreError::NotFound {
        kind: kind::<K>(),
        key: key.to_string(),
    }
}

fn check_version<K: Object>(stored: &K, incoming: &K) -> Result<(), StoreError> {
    match &incoming.meta().resource_version {
        Some(version) if stored.meta().resource_version.as_ref() != Some(version) => {
            Err(StoreError::Conflict {
                kind: kind::<K>(),
                key: ObjectKey::from_resource(incoming).to_string(),
                message: format!(
                    "resourceVersion {version} is stale, current is {}",
                    stored.meta().resource_version.as_deref().unwrap_or_default()
                ),
            })
        }
        _ => Ok(()),
    }
}

fn status_of<K: Object>(object: &K) -> Result<Option<serde_json::Value>, StoreError> {
    Ok(serde_json::to_value(object)?.get("status").cloned())
}

/// `target` with its `status` field replaced
fn with_status<K: Object>(target: &K, status: Option<serde_json::Value>) -> Result<K, StoreError> {
    let mut value = serde_json::to_value(target)?;
    if let Some(fields) = value.as_object_mut() {
        match status {
            Some(status) => fields.insert("status".to_string(), status),
            None => fields.remove("status"),
        };
    }
    Ok(serde_json::from_value(value)?)
}

/// `ObjectStore` keeping objects of kind `K` in memory
pub struct MemoryStore<K> {
    state: Mutex<State<K>>,
    status_subresource: bool,
}

impl<K: Object> Default for MemoryStore<K> {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                objects: BTreeMap::new(),
                indexes: HashMap::new(),
                resource_version: 0,
                calls: HashMap::new(),
                failures: HashMap::new(),
            }),
            status_subresource: false,
        }
    }
}

impl<K: Object> MemoryStore<K> {
    /// Empty store without a status sub-resource
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat `status` as a sub-resource, like a CRD with `subresources.status`
    pub fn with_status_subresource(mut self) -> Self {
        self.status_subresource = true;
        self
    }

    /// Seed an object, filling in the server-managed fields it lacks
    ///
    /// Not counted and not subject to injected failures. Replaces any object
    /// stored under the same key.
    pub fn insert(&self, object: K) -> K {
        let mut state = self.state.lock();
        let mut object = object;
        let meta = object.meta_mut();
        if meta.uid.is_none() {
            meta.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        if meta.creation_timestamp.is_none() {
            meta.creation_timestamp = Some(Time(Utc::now()));
        }
        meta.resource_version = Some(state.next_version());
        state
            .objects
            .insert(ObjectKey::from_resource(&object), object.clone());
        object
    }

    /// The stored object at `key`, without counting a call
    pub fn peek(&self, key: &ObjectKey) -> Option<K> {
        self.state.lock().objects.get(key).cloned()
    }

    /// Every stored object, ordered by key
    pub fn objects(&self) -> Vec<K> {
        self.state.lock().objects.values().cloned().collect()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// Whether the store holds no object
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many times `op` was called
    pub fn calls(&self, op: Op) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or_default()
    }

    /// Total number of write calls (create, update, update_status, delete)
    pub fn writes(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(op, _)| op.is_write())
            .map(|(_, count)| count)
            .sum()
    }

    /// Forget all call counts
    pub fn reset_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Make the next call of `op` fail with `error`
    pub fn fail_next(&self, op: Op, error: StoreError) {
        self.state.lock().failures.insert(op, error);
    }
}

#[async_trait]
impl<K: Object> ObjectStore<K> for MemoryStore<K> {
    async fn get(&self, key: &ObjectKey) -> Result<K, StoreError> {
        let mut state = self.state.lock();
        state.enter(Op::Get)?;
        state.stored(key).cloned()
    }

    async fn list(&self, options: &ListOptions) -> Result<Vec<K>, StoreError> {
        let mut state = self.state.lock();
        state.enter(Op::List)?;

        let mut filters = Vec::with_capacity(options.fields.len());
        for (field, value) in &options.fields {
            let index = state
                .indexes
                .get(field)
                .ok_or_else(|| StoreError::UnknownIndex {
                    field: field.clone(),
                })?;
            filters.push((index, value));
        }

        Ok(state
            .objects
            .values()
            .filter(|object| options.admits(*object))
            .filter(|object| {
                filters
                    .iter()
                    .all(|(index, value)| index(*object).iter().any(|v| v == *value))
            })
            .cloned()
            .collect())
    }

    async fn create(&self, object: &K) -> Result<K, StoreError> {
        let mut state = self.state.lock();
        state.enter(Op::Create)?;

        let mut created = object.clone();
        let meta = created.meta_mut();
        if meta.name.as_deref().unwrap_or_default().is_empty() {
            let Some(prefix) = meta.generate_name.clone().filter(|p| !p.is_empty()) else {
                return Err(StoreError::Unsupported(format!(
                    "{} needs a name or generateName",
                    kind::<K>()
                )));
            };
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            meta.name = Some(format!("{prefix}{}", &suffix[..5]));
        }
        if meta.resource_version.is_some() {
            return Err(StoreError::Unsupported(
                "resourceVersion must not be set on create".to_string(),
            ));
        }

        let key = ObjectKey::from_resource(&created);
        if state.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: kind::<K>(),
                key: key.to_string(),
            });
        }

        let meta = created.meta_mut();
        meta.uid = Some(uuid::Uuid::new_v4().to_string());
        meta.creation_timestamp = Some(Time(Utc::now()));
        meta.deletion_timestamp = None;
        meta.resource_version = Some(state.next_version());
        if self.status_subresource {
            created = with_status(&created, None)?;
        }

        trace!(kind = %kind::<K>(), %key, "created");
        state.objects.insert(key, created.clone());
        Ok(created)
    }

    async fn update(&self, object: &K) -> Result<K, StoreError> {
        let mut state = self.state.lock();
        state.enter(Op::Update)?;

        let key = ObjectKey::from_resource(object);
        let stored = state.stored(&key)?.clone();
        check_version(&stored, object)?;

        let mut updated = if self.status_subresource {
            with_status(object, status_of(&stored)?)?
        } else {
            object.clone()
        };
        let meta = updated.meta_mut();
        meta.uid = stored.meta().uid.clone();
        meta.creation_timestamp = stored.meta().creation_timestamp.clone();
        meta.deletion_timestamp = stored.meta().deletion_timestamp.clone();
        meta.resource_version = stored.meta().resource_version.clone();

        if updated == stored {
            return Ok(stored);
        }

        let deleting = updated.meta().deletion_timestamp.is_some();
        let finalized = updated
            .meta()
            .finalizers
            .as_ref()
            .map_or(true, Vec::is_empty);
        if deleting && finalized {
            trace!(kind = %kind::<K>(), %key, "last finalizer removed, object gone");
            state.objects.remove(&key);
            return Ok(updated);
        }

        updated.meta_mut().resource_version = Some(state.next_version());
        trace!(kind = %kind::<K>(), %key, "updated");
        state.objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn update_status(&self, object: &K) -> Result<K, StoreError> {
        let mut state = self.state.lock();
        state.enter(Op::UpdateStatus)?;

        let key = ObjectKey::from_resource(object);
        let stored = state.stored(&key)?.clone();
        check_version(&stored, object)?;

        let mut updated = with_status(&stored, status_of(object)?)?;
        if updated == stored {
            return Ok(stored);
        }
        updated.meta_mut().resource_version = Some(state.next_version());
        trace!(kind = %kind::<K>(), %key, "status updated");
        state.objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, object: &K) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.enter(Op::Delete)?;

        let key = ObjectKey::from_resource(object);
        let Some(stored) = state.objects.get(&key).cloned() else {
            return Ok(());
        };
        let has_finalizers = stored
            .meta()
            .finalizers
            .as_ref()
            .is_some_and(|finalizers| !finalizers.is_empty());
        if !has_finalizers {
            trace!(kind = %kind::<K>(), %key, "deleted");
            state.objects.remove(&key);
            return Ok(());
        }
        if stored.meta().deletion_timestamp.is_some() {
            return Ok(());
        }

        let mut marked = stored;
        marked.meta_mut().deletion_timestamp = Some(Time(Utc::now()));
        marked.meta_mut().resource_version = Some(state.next_version());
        trace!(kind = %kind::<K>(), %key, "marked for deletion");
        state.objects.insert(key, marked);
        Ok(())
    }

    fn index_field(&self, field: &str, index: IndexFn<K>) -> Result<(), StoreError> {
        self.state
            .lock()
            .indexes
            .entry(field.to_string())
            .or_insert(index);
        Ok(())
    }
}
