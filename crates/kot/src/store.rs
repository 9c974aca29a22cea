//! [`ObjectStore`] backed by the Kubernetes API
//!
//! Reads go straight to the API server. Namespace and label filters are sent with
//! the list request, but field indexes are evaluated client side: a child lookup
//! through the ownership index lists every object of the kind in the parent's
//! namespace and keeps the matches.
//!
//! TODO: serve indexed lookups from a `kube::runtime::reflector` store so child
//! lookups stop scanning the namespace.

use std::collections::HashMap;

use async_trait::async_trait;
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::client::{IndexFn, ListOptions, ObjectStore};
use crate::error::StoreError;
use crate::object::{Object, ObjectKey};

/// How to build an `Api` for a resource scope
pub trait ApiScope {
    /// Api for objects of kind `K` in `namespace`, or across all namespaces
    fn api<K>(client: Client, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = Self, DynamicType = ()>;
}

impl ApiScope for NamespaceResourceScope {
    fn api<K>(client: Client, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = Self, DynamicType = ()>,
    {
        match namespace {
            Some(namespace) => Api::namespaced(client, namespace),
            None => Api::all(client),
        }
    }
}

impl ApiScope for ClusterResourceScope {
    fn api<K>(client: Client, _namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = Self, DynamicType = ()>,
    {
        Api::all(client)
    }
}

/// Store for objects of kind `K` talking to the API server through `kube::Api`
pub struct KubeStore<K> {
    client: Client,
    indexes: RwLock<HashMap<String, IndexFn<K>>>,
}

impl<K> KubeStore<K>
where
    K: Object,
    K::Scope: ApiScope,
{
    /// Create a store using `client`
    pub fn new(client: Client) -> Self {
        Self {
            client,
            indexes: RwLock::new(HashMap::new()),
        }
    }

    fn api(&self, namespace: Option<&str>) -> Api<K> {
        <K::Scope as ApiScope>::api(self.client.clone(), namespace)
    }

    fn api_for(&self, object: &K) -> Api<K> {
        self.api(object.meta().namespace.as_deref())
    }

    fn index_filters(
        &self,
        options: &ListOptions,
    ) -> Result<Vec<(IndexFn<K>, String)>, StoreError> {
        let indexes = self.indexes.read();
        options
            .fields
            .iter()
            .map(|(field, value)| {
                indexes
                    .get(field)
                    .map(|index| (index.clone(), value.clone()))
                    .ok_or_else(|| StoreError::UnknownIndex {
                        field: field.clone(),
                    })
            })
            .collect()
    }
}

fn kind<K: Object>() -> String {
    K::kind(&()).into_owned()
}

fn name_of<K: Object>(object: &K) -> Result<&str, StoreError> {
    object
        .meta()
        .name
        .as_deref()
        .ok_or_else(|| StoreError::Unsupported(format!("{} without a name", kind::<K>())))
}

/// Translate API errors into store errors for `key`
fn map_api_error<K: Object>(key: &ObjectKey, error: kube::Error) -> StoreError {
    match error {
        kube::Error::Api(response) if response.code == 404 => StoreError::NotFound {
            kind: kind::<K>(),
            key: key.to_string(),
        },
        kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => {
            StoreError::AlreadyExists {
                kind: kind::<K>(),
                key: key.to_string(),
            }
        }
        kube::Error::Api(response) if response.code == 409 => StoreError::Conflict {
            kind: kind::<K>(),
            key: key.to_string(),
            message: response.message,
        },
        other => StoreError::Kube(other),
    }
}

/// Server-side part of `options`; field filters are applied after listing
fn list_params(options: &ListOptions) -> ListParams {
    let params = ListParams::default();
    match options.label_selector() {
        Some(selector) => params.labels(&selector),
        None => params,
    }
}

/// Merge patch carrying only the status and the resourceVersion precondition
fn status_patch<K: Object>(object: &K) -> Result<serde_json::Value, StoreError> {
    let mut value = serde_json::to_value(object)?;
    let status = value
        .get_mut("status")
        .map(serde_json::Value::take)
        .unwrap_or(serde_json::Value::Null);
    Ok(serde_json::json!({
        "metadata": { "resourceVersion": object.meta().resource_version },
        "status": status,
    }))
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Object,
    K::Scope: ApiScope,
{
    async fn get(&self, key: &ObjectKey) -> Result<K, StoreError> {
        trace!(kind = %kind::<K>(), %key, "get");
        self.api(key.namespace.as_deref())
            .get_opt(&key.name)
            .await
            .map_err(|e| map_api_error::<K>(key, e))?
            .ok_or_else(|| StoreError::NotFound {
                kind: kind::<K>(),
                key: key.to_string(),
            })
    }

    async fn list(&self, options: &ListOptions) -> Result<Vec<K>, StoreError> {
        let filters = self.index_filters(options)?;
        let listed = self
            .api(options.namespace.as_deref())
            .list(&list_params(options))
            .await?
            .items;
        let total = listed.len();
        let matched: Vec<K> = listed
            .into_iter()
            .filter(|object| options.admits(object))
            .filter(|object| {
                filters
                    .iter()
                    .all(|(index, value)| index(object).iter().any(|v| v == value))
            })
            .collect();
        debug!(kind = %kind::<K>(), total, matched = matched.len(), "listed objects");
        Ok(matched)
    }

    async fn create(&self, object: &K) -> Result<K, StoreError> {
        let key = ObjectKey::from_resource(object);
        self.api_for(object)
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| map_api_error::<K>(&key, e))
    }

    async fn update(&self, object: &K) -> Result<K, StoreError> {
        let key = ObjectKey::from_resource(object);
        self.api_for(object)
            .replace(name_of(object)?, &PostParams::default(), object)
            .await
            .map_err(|e| map_api_error::<K>(&key, e))
    }

    async fn update_status(&self, object: &K) -> Result<K, StoreError> {
        let key = ObjectKey::from_resource(object);
        let patch = status_patch(object)?;
        self.api_for(object)
            .patch_status(name_of(object)?, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_api_error::<K>(&key, e))
    }

    async fn delete(&self, object: &K) -> Result<(), StoreError> {
        let key = ObjectKey::from_resource(object);
        match self
            .api_for(object)
            .delete(name_of(object)?, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => {
                debug!(kind = %kind::<K>(), %key, "already deleted");
                Ok(())
            }
            Err(e) => Err(map_api_error::<K>(&key, e)),
        }
    }

    fn index_field(&self, field: &str, index: IndexFn<K>) -> Result<(), StoreError> {
        let mut indexes = self.indexes.write();
        if !indexes.contains_key(field) {
            indexes.insert(field.to_string(), index);
            debug!(kind = %kind::<K>(), field, "registered field index");
        }
        Ok(())
    }
}
