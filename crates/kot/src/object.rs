//! Object identity and metadata helpers
//!
//! Everything here works on any `kube::Resource`, so the same helpers serve parents
//! (custom resources) and children (built-in kinds like ConfigMap or Secret).

use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Error;

/// Annotation kubectl uses for client-side apply bookkeeping; never copied
pub const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Bounds every object handled by kot satisfies
///
/// Statically typed resources only: `Clone` is the deep copy, `PartialEq` the
/// structural comparison used for change detection.
pub trait Object:
    Resource<DynamicType = ()>
    + Clone
    + PartialEq
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<T> Object for T where
    T: Resource<DynamicType = ()>
        + Clone
        + PartialEq
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Namespace and name identifying an object of a known kind
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Namespace, `None` for cluster-scoped objects
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Key for a cluster-scoped object
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Key for a namespaced object
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Key of an existing object
    pub fn from_resource<K: Resource>(object: &K) -> Self {
        let meta = object.meta();
        Self {
            namespace: meta.namespace.clone(),
            name: meta.name.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// apiVersion and kind of a resource type
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeKey {
    /// e.g. `v1` or `kot.dev/v1alpha1`
    pub api_version: String,
    /// e.g. `ConfigMap`
    pub kind: String,
}

impl TypeKey {
    /// Create a type key from its parts
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
        }
    }

    /// Type key of a statically typed resource
    pub fn of<K: Resource<DynamicType = ()>>() -> Self {
        Self::new(K::api_version(&()), K::kind(&()))
    }

    /// Type key an owner reference points at
    pub fn of_owner(owner: &OwnerReference) -> Self {
        Self::new(owner.api_version.clone(), owner.kind.clone())
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.api_version)
    }
}

/// The object's UID, if the store has assigned one
pub fn uid<K: Resource>(object: &K) -> Option<&str> {
    object.meta().uid.as_deref().filter(|uid| !uid.is_empty())
}

/// Whether the object has been persisted (has a UID)
pub fn has_identity<K: Resource>(object: &K) -> bool {
    uid(object).is_some()
}

/// Whether the object has a deletion timestamp
pub fn is_deleting<K: Resource>(object: &K) -> bool {
    object.meta().deletion_timestamp.is_some()
}

/// The owner reference flagged as controller, if any
pub fn controller_ref<K: Resource>(object: &K) -> Option<&OwnerReference> {
    object
        .meta()
        .owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|owner| owner.controller == Some(true))
}

/// Build a controller owner reference pointing at `owner`
pub fn owner_reference<P>(owner: &P) -> Result<OwnerReference, Error>
where
    P: Resource<DynamicType = ()>,
{
    let meta = owner.meta();
    let uid = uid(owner).ok_or_else(|| {
        Error::owner_reference(format!(
            "{} {} has no uid",
            P::kind(&()),
            ObjectKey::from_resource(owner)
        ))
    })?;
    Ok(OwnerReference {
        api_version: P::api_version(&()).into_owned(),
        kind: P::kind(&()).into_owned(),
        name: meta.name.clone().unwrap_or_default(),
        uid: uid.to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// Make `owner` the controller of `object`
///
/// Namespaced owners may only control objects in the same namespace, and an object
/// already controlled by someone else is left alone with an error. An existing
/// reference to the same owner is replaced in place.
pub fn set_controller_reference<P, K>(owner: &P, object: &mut K) -> Result<(), Error>
where
    P: Resource<DynamicType = ()>,
    K: Resource,
{
    let reference = owner_reference(owner)?;

    if let Some(owner_ns) = owner.meta().namespace.as_deref() {
        let object_ns = object.meta().namespace.as_deref().unwrap_or_default();
        if owner_ns != object_ns {
            return Err(Error::owner_reference(format!(
                "cross-namespace owner references are disallowed: owner {} is in '{}', object {} is in '{}'",
                reference.name,
                owner_ns,
                ObjectKey::from_resource(object),
                object_ns
            )));
        }
    }

    if let Some(existing) = controller_ref(object) {
        if existing.uid != reference.uid {
            return Err(Error::owner_reference(format!(
                "{} is already controlled by {} {}",
                ObjectKey::from_resource(object),
                existing.kind,
                existing.name
            )));
        }
    }

    let owners = object.meta_mut().owner_references.get_or_insert_with(Vec::new);
    match owners.iter_mut().find(|o| o.uid == reference.uid) {
        Some(slot) => *slot = reference,
        None => owners.push(reference),
    }
    Ok(())
}

/// Whether `name` is in the object's finalizer list
pub fn has_finalizer<K: Resource>(object: &K, name: &str) -> bool {
    object.finalizers().iter().any(|f| f == name)
}

/// Add `name` to the finalizer list, returning whether anything changed
pub fn add_finalizer<K: Resource>(object: &mut K, name: &str) -> bool {
    if has_finalizer(object, name) {
        return false;
    }
    object.finalizers_mut().push(name.to_string());
    true
}

/// Remove `name` from the finalizer list, returning whether anything changed
pub fn remove_finalizer<K: Resource>(object: &mut K, name: &str) -> bool {
    if !has_finalizer(object, name) {
        return false;
    }
    object.finalizers_mut().retain(|f| f != name);
    true
}

/// Whether the object carries a non-empty annotation `name`
pub fn has_annotation<K: Resource>(object: &K, name: &str) -> bool {
    annotation(object, name).is_some_and(|value| !value.is_empty())
}

/// Value of annotation `name`
pub fn annotation<'a, K: Resource>(object: &'a K, name: &str) -> Option<&'a str> {
    object.annotations().get(name).map(String::as_str)
}

/// Copy every label of `src` onto `dest`, overwriting clashes
pub fn copy_labels<S: Resource, D: Resource>(src: &S, dest: &mut D) {
    if src.labels().is_empty() {
        return;
    }
    dest.labels_mut()
        .extend(src.labels().iter().map(|(k, v)| (k.clone(), v.clone())));
}

/// Copy annotations of `src` onto `dest`, except kubectl's last-applied configuration
pub fn copy_annotations<S: Resource, D: Resource>(src: &S, dest: &mut D) {
    if src.annotations().is_empty() {
        return;
    }
    dest.annotations_mut().extend(
        src.annotations()
            .iter()
            .filter(|(k, _)| k.as_str() != LAST_APPLIED_ANNOTATION)
            .map(|(k, v)| (k.clone(), v.clone())),
    );
}

/// Sort objects newest first by creation timestamp
pub fn sort_by_age<K: Resource>(objects: &mut [K]) {
    objects.sort_by(|a, b| {
        let created = |o: &K| o.meta().creation_timestamp.as_ref().map(|t| t.0);
        created(b).cmp(&created(a))
    });
}
