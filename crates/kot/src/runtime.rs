//! Binding to the kube-rs controller runtime
//!
//! kube-rs owns watching, queueing and the one-pass-per-key guarantee; this module
//! only feeds its requests into [`Controller::reconcile`] and maps the resulting
//! [`Schedule`](crate::Schedule) back to a runtime action.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::Api;
use kube::runtime::controller::{Action as RuntimeAction, Config as ControllerConfig};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::Client;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::controller::Controller;
use crate::error::ActionError;
use crate::object::{Object, ObjectKey};

/// The kube-rs controller type reconcilers attach their watches to
pub type KubeController<P> = kube::runtime::Controller<P>;

/// Environment variable names read by [`RunnerConfig::from_env`]
pub mod env {
    /// Watch request timeout in seconds
    pub const WATCH_TIMEOUT_SECS: &str = "KOT_WATCH_TIMEOUT_SECS";
    /// Delay for `requeue` without an explicit `requeue_after`, in milliseconds
    pub const REQUEUE_DELAY_MS: &str = "KOT_REQUEUE_DELAY_MS";
    /// Requeue delay after a failed pass, in seconds
    pub const ERROR_REQUEUE_SECS: &str = "KOT_ERROR_REQUEUE_SECS";
    /// Maximum concurrent passes (0 = unbounded)
    pub const CONCURRENCY: &str = "KOT_CONCURRENCY";
}

/// Errors in runner configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable could not be parsed
    #[error("invalid value {value:?} for {name}: {reason}")]
    Invalid {
        /// Variable name
        name: String,
        /// Raw value
        value: String,
        /// What was wrong with it
        reason: String,
    },

    /// The watch timeout is outside what the API server accepts
    #[error("watch timeout must be between 1 and 294 seconds, got {0}")]
    WatchTimeout(u32),
}

/// Settings for [`run`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Server-side watch timeout
    pub watch_timeout_secs: u32,
    /// Delay used for an immediate requeue
    pub requeue_delay: Duration,
    /// Delay used after a failed pass that did not ask for one
    pub error_requeue: Duration,
    /// Maximum concurrent passes across keys (0 = unbounded)
    pub concurrency: u16,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            watch_timeout_secs: 25,
            requeue_delay: Duration::from_millis(500),
            error_requeue: Duration::from_secs(5),
            concurrency: 0,
        }
    }
}

impl RunnerConfig {
    /// Defaults overridden by `KOT_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(secs) = parse(&lookup, env::WATCH_TIMEOUT_SECS)? {
            config.watch_timeout_secs = secs;
        }
        if let Some(ms) = parse(&lookup, env::REQUEUE_DELAY_MS)? {
            config.requeue_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = parse(&lookup, env::ERROR_REQUEUE_SECS)? {
            config.error_requeue = Duration::from_secs(secs);
        }
        if let Some(limit) = parse(&lookup, env::CONCURRENCY)? {
            config.concurrency = limit;
        }
        config.validate()?;
        Ok(config)
    }

    /// Check values the runtime would otherwise reject or panic on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watch_timeout_secs == 0 || self.watch_timeout_secs >= 295 {
            return Err(ConfigError::WatchTimeout(self.watch_timeout_secs));
        }
        Ok(())
    }

    fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig::default().timeout(self.watch_timeout_secs)
    }
}

fn parse<T, F>(lookup: &F, name: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(name) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::Invalid {
            name: name.to_string(),
            value: value.clone(),
            reason: e.to_string(),
        })
}

/// Runtime request for the parent at `key`
pub fn object_ref<P: Object>(key: &ObjectKey) -> ObjectRef<P> {
    let reference = ObjectRef::new(&key.name);
    match &key.namespace {
        Some(namespace) => reference.within(namespace),
        None => reference,
    }
}

struct RunState<P: Object> {
    controller: Arc<Controller<P>>,
    config: RunnerConfig,
}

async fn reconcile<P: Object>(
    parent: Arc<P>,
    state: Arc<RunState<P>>,
) -> Result<RuntimeAction, ActionError> {
    let key = ObjectKey::from_resource(parent.as_ref());
    let schedule = state.controller.reconcile(&key).await?;
    Ok(schedule.into_action(state.config.requeue_delay))
}

fn error_policy<P: Object>(
    parent: Arc<P>,
    error: &ActionError,
    state: Arc<RunState<P>>,
) -> RuntimeAction {
    error!(
        error = %error,
        resource = %ObjectKey::from_resource(parent.as_ref()),
        controller = %state.controller.name(),
        "reconciliation failed"
    );
    RuntimeAction::requeue(
        error
            .outcome
            .requeue_after
            .unwrap_or(state.config.error_requeue),
    )
}

/// Drive `controller` from kube-rs watches until a shutdown signal arrives
///
/// Watches the parent kind cluster-wide, every kind owned by the controller's
/// reconcilers and every kind registered through a watcher.
pub async fn run<P: Object>(
    controller: Arc<Controller<P>>,
    client: Client,
    config: RunnerConfig,
) -> Result<(), ConfigError> {
    config.validate()?;
    let watcher_config = config.watcher_config();
    let name = controller.name().to_string();

    let runtime = KubeController::new(Api::<P>::all(client.clone()), watcher_config.clone());
    let runtime = controller
        .attach_watches(runtime, &client, &watcher_config)
        .with_config(ControllerConfig::default().concurrency(config.concurrency));

    info!(controller = %name, "starting controller");
    let state = Arc::new(RunState { controller, config });
    runtime
        .shutdown_on_signal()
        .run(reconcile::<P>, error_policy::<P>, state)
        .for_each(|result| {
            let name = name.clone();
            async move {
                match result {
                    Ok((object, action)) => {
                        debug!(controller = %name, %object, ?action, "reconciliation completed");
                    }
                    Err(e) => {
                        error!(controller = %name, error = ?e, "reconciliation error");
                    }
                }
            }
        })
        .await;
    info!(controller = %name, "controller stopped");
    Ok(())
}
