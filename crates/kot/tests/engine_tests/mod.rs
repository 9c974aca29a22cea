//! Engine integration tests
//!
//! Every test drives the `SimpleCrd` controller defined here through explicit
//! reconcile passes. The controller mirrors a typical operator:
//!
//! - a ConfigMap mirroring `spec.configMapValue` (`"boom"` fails)
//! - a ServiceAccount, unless `spec.configMapValue` is `"skip-sa"`
//! - two generated Secrets, added one per pass
//! - a `count-changes` custom reconciler counting unseen spec values
//! - a finalizer holding deletion for the number of seconds in the `delay` annotation
//! - a status resolver reporting spec values and the namespace's `misc` annotation
//! - a namespace watcher requesting every `SimpleCrd` in the namespace
//!
//! # Test Organization
//!
//! - `one`: singleton children
//! - `list`: collections of children
//! - `finalizer`: finalizer registration and deletion
//! - `status`: status derivation and conditional writes
//! - `controller`: whole passes, error isolation and scheduling
//! - `indexing`: ownership and custom field indexes
//! - `watcher`: mapping related objects to requests

mod controller;
mod finalizer;
mod list;
mod status;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, ServiceAccount};
use k8s_openapi::chrono::Utc;
use kot::action::from_fn;
use kot::object::{annotation, has_annotation};
use kot::reconcile::{Custom, Finalization, List, One, ResourceWatcher, SimpleFinalizer};
use kot::{
    Action, ActionError, Context, Controller, Error, Object, ObjectKey, ObjectStore, Outcome,
    OwnershipIndex, Schedule,
};
use kot_testing::{namespace, simple_crd, MemoryStore, SimpleCrd, SimpleCrdStatus};

pub const NAMESPACE: &str = "default";
pub const STATIC_VALUE: &str = "0123456789";

// =============================================================================
// Test Controller
// =============================================================================

fn reconcile_config_map(parent: &SimpleCrd, cm: &mut ConfigMap) -> Result<Outcome, Error> {
    cm.metadata.name = parent.metadata.name.clone();
    cm.metadata.namespace = parent.metadata.namespace.clone();

    if let Some(value) = &parent.spec.config_map_value {
        match value.as_str() {
            "boom" => return Err(Error::message("boom!!!!")),
            _ => cm.data = Some([("value".to_string(), value.clone())].into()),
        }
    }
    Ok(Outcome::default())
}

fn reconcile_service_account(parent: &SimpleCrd, sa: &mut ServiceAccount) -> Result<Outcome, Error> {
    sa.metadata.name = parent.metadata.name.clone();
    sa.metadata.namespace = parent.metadata.namespace.clone();
    Ok(Outcome::default())
}

fn wants_service_account(parent: &SimpleCrd) -> Result<bool, Error> {
    Ok(parent.spec.config_map_value.as_deref() != Some("skip-sa"))
}

fn reconcile_secrets(parent: &SimpleCrd, secrets: &mut Vec<Secret>) -> Result<Outcome, Error> {
    if secrets.len() >= 2 {
        return Ok(Outcome::default());
    }
    let mut secret = Secret::default();
    secret.metadata.generate_name = Some(format!(
        "{}-",
        parent.metadata.name.as_deref().unwrap_or_default()
    ));
    secret.metadata.namespace = parent.metadata.namespace.clone();
    secrets.push(secret);
    Ok(Outcome::default())
}

fn count_changes(changes: Arc<AtomicUsize>) -> Custom<SimpleCrd> {
    Custom::new(
        "count-changes",
        from_fn(move |ctx: &mut Context<SimpleCrd>| {
            let parent = ctx.resource();
            let Some(value) = &parent.spec.config_map_value else {
                return Ok(Outcome::default());
            };
            let known = parent
                .status
                .as_ref()
                .and_then(|status| status.known_config_map_value.as_ref());
            if known != Some(value) {
                changes.fetch_add(1, Ordering::SeqCst);
            }
            Ok(Outcome::default())
        }),
    )
}

/// Holds deletion for `delay` seconds after the deletion timestamp
fn delay_finalizer() -> SimpleFinalizer<SimpleCrd> {
    SimpleFinalizer::new(|ctx: &mut Context<SimpleCrd>| {
        let parent = ctx.resource();
        let delay: i64 = annotation(parent, "delay")
            .unwrap_or_default()
            .parse()
            .map_err(|e| Error::message(format!("invalid delay: {e}")))?;
        let deleted_at = parent
            .metadata
            .deletion_timestamp
            .as_ref()
            .map(|t| t.0)
            .unwrap_or_else(Utc::now);

        let remaining = deleted_at + k8s_openapi::chrono::Duration::seconds(delay) - Utc::now();
        if remaining <= k8s_openapi::chrono::Duration::zero() {
            return Ok(Finalization::done());
        }
        let wait = remaining.to_std().unwrap_or_default() + Duration::from_secs(1);
        Ok(Finalization::pending(Outcome::after(wait)))
    })
    .enabled_when(|parent: &SimpleCrd| Ok(has_annotation(parent, "delay")))
}

struct StatusResolver {
    namespaces: Arc<MemoryStore<Namespace>>,
}

#[async_trait]
impl Action<SimpleCrd> for StatusResolver {
    async fn run(&self, ctx: &mut Context<SimpleCrd>) -> Result<Outcome, ActionError> {
        let ns_key = ObjectKey::new(ctx.resource().metadata.namespace.clone().unwrap_or_default());
        let ns = ctx.io("get namespace", self.namespaces.get(&ns_key)).await?;

        let parent = ctx.resource_mut();
        let status = parent.status.get_or_insert_with(SimpleCrdStatus::default);
        status.finalizing = parent.metadata.deletion_timestamp.is_some();
        status.static_value = Some(STATIC_VALUE.to_string());
        status.known_config_map_value = parent.spec.config_map_value.clone();
        status.known_secret_value = parent.spec.secret_value.clone();
        status.namespace_annotation = annotation(&ns, "misc").unwrap_or_default().to_string();
        Ok(Outcome::default())
    }
}

fn namespace_watcher(parents: Arc<MemoryStore<SimpleCrd>>) -> ResourceWatcher<Namespace> {
    ResourceWatcher::new(move |ns: &Namespace| {
        Ok(parents
            .objects()
            .iter()
            .filter(|parent| parent.metadata.namespace == ns.metadata.name)
            .map(ObjectKey::from_resource)
            .collect())
    })
}

fn dyn_store<K: Object>(store: &Arc<MemoryStore<K>>) -> Arc<dyn ObjectStore<K>> {
    store.clone()
}

// =============================================================================
// Test Environment
// =============================================================================

/// Stores, counters and the controller under test
pub struct Env {
    pub parents: Arc<MemoryStore<SimpleCrd>>,
    pub config_maps: Arc<MemoryStore<ConfigMap>>,
    pub accounts: Arc<MemoryStore<ServiceAccount>>,
    pub secrets: Arc<MemoryStore<Secret>>,
    pub namespaces: Arc<MemoryStore<Namespace>>,
    pub changes: Arc<AtomicUsize>,
    pub index: Arc<OwnershipIndex>,
    pub controller: Controller<SimpleCrd>,
}

impl Env {
    pub fn new() -> Self {
        let parents = Arc::new(MemoryStore::new().with_status_subresource());
        let config_maps = Arc::new(MemoryStore::new());
        let accounts = Arc::new(MemoryStore::new());
        let secrets = Arc::new(MemoryStore::new());
        let namespaces = Arc::new(MemoryStore::new());
        let changes = Arc::new(AtomicUsize::new(0));
        let index = OwnershipIndex::new();

        namespaces.insert(namespace(NAMESPACE));

        let controller = Controller::builder(dyn_store(&parents))
            .name("simple-crd")
            .ownership_index(Arc::clone(&index))
            .watcher(namespace_watcher(Arc::clone(&parents)))
            .reconciler(One::new(dyn_store(&config_maps), reconcile_config_map))
            .reconciler(
                One::new(dyn_store(&accounts), reconcile_service_account)
                    .when(wants_service_account),
            )
            .reconciler(List::new(dyn_store(&secrets), reconcile_secrets))
            .reconciler(count_changes(Arc::clone(&changes)))
            .status_resolver(StatusResolver {
                namespaces: Arc::clone(&namespaces),
            })
            .finalizer(delay_finalizer())
            .build()
            .expect("test controller is valid");

        Self {
            parents,
            config_maps,
            accounts,
            secrets,
            namespaces,
            changes,
            index,
            controller,
        }
    }

    /// Seed a parent in the default namespace
    pub fn create_parent(&self, name: &str, config_map_value: Option<&str>) -> SimpleCrd {
        self.parents
            .insert(simple_crd(NAMESPACE, name, config_map_value))
    }

    /// Seed a parent carrying a `delay` annotation
    pub fn create_delayed_parent(&self, name: &str, delay_secs: u64) -> SimpleCrd {
        let mut parent = simple_crd(NAMESPACE, name, Some("cm-value"));
        parent.metadata.annotations =
            Some([("delay".to_string(), delay_secs.to_string())].into());
        self.parents.insert(parent)
    }

    /// The stored parent, if it still exists
    pub fn parent(&self, name: &str) -> Option<SimpleCrd> {
        self.parents.peek(&key(name))
    }

    /// Edit the stored parent the way a user would, through an update
    pub async fn edit_parent<F: FnOnce(&mut SimpleCrd)>(&self, name: &str, edit: F) {
        let mut parent = self.parent(name).expect("parent exists");
        edit(&mut parent);
        self.parents.update(&parent).await.expect("parent update");
    }

    /// Run one pass for the parent called `name`
    pub async fn reconcile(&self, name: &str) -> Result<Schedule, ActionError> {
        self.controller.reconcile(&key(name)).await
    }

    /// Run passes until one asks for nothing more and writes nothing
    pub async fn settle(&self, name: &str) -> Schedule {
        for _ in 0..10 {
            let before = self.writes();
            let schedule = self.reconcile(name).await.expect("pass succeeds");
            if self.writes() == before {
                return schedule;
            }
        }
        panic!("controller did not settle for {name}");
    }

    /// Write calls across every store
    pub fn writes(&self) -> usize {
        self.parents.writes()
            + self.config_maps.writes()
            + self.accounts.writes()
            + self.secrets.writes()
    }

    /// Children of `parent` in `store`, as found through the ownership index
    pub async fn children<C: Object>(&self, store: &MemoryStore<C>, parent: &SimpleCrd) -> Vec<C> {
        store
            .list(&OwnershipIndex::children_of(parent))
            .await
            .expect("children list")
    }
}

pub fn key(name: &str) -> ObjectKey {
    ObjectKey::namespaced(NAMESPACE, name)
}
