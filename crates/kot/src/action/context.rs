use std::future::Future;

use kube::Resource;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, StoreError};
use crate::object::ObjectKey;

/// Request-scoped state for one reconcile pass
///
/// Holds the parent resource as last observed or written during the pass, the key
/// that triggered the pass and the cancellation signal checked around store calls.
#[derive(Debug)]
pub struct Context<P> {
    resource: P,
    key: ObjectKey,
    cancel: CancellationToken,
}

impl<P: Resource> Context<P> {
    /// Start a pass for the given parent
    pub fn new(resource: P) -> Self {
        let key = ObjectKey::from_resource(&resource);
        Self {
            resource,
            key,
            cancel: CancellationToken::new(),
        }
    }

    /// Use the given cancellation token for store calls
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The parent resource
    pub fn resource(&self) -> &P {
        &self.resource
    }

    /// Mutable access to the parent resource
    pub fn resource_mut(&mut self) -> &mut P {
        &mut self.resource
    }

    /// Swap in a freshly read or written copy of the parent, returning the old one
    pub fn replace_resource(&mut self, resource: P) -> P {
        std::mem::replace(&mut self.resource, resource)
    }

    /// Consume the context, returning the parent
    pub fn into_resource(self) -> P {
        self.resource
    }

    /// Key of the parent being reconciled
    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    /// Whether the parent has a deletion timestamp
    pub fn is_deleting(&self) -> bool {
        self.resource.meta().deletion_timestamp.is_some()
    }

    /// The cancellation signal for this pass
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Await a store call, giving up when the pass is cancelled
    ///
    /// Store failures are wrapped with `operation` so the surfaced error says which
    /// step failed.
    pub async fn io<T, F>(&self, operation: &str, call: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        cancellable(&self.cancel, operation, call).await
    }
}

/// Await `call` unless `cancel` fires first; also used before a [`Context`] exists
pub(crate) async fn cancellable<T, F>(
    cancel: &CancellationToken,
    operation: &str,
    call: F,
) -> Result<T, Error>
where
    F: Future<Output = Result<T, StoreError>>,
{
    if cancel.is_cancelled() {
        return Err(Error::Cancelled {
            operation: operation.to_string(),
        });
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled {
            operation: operation.to_string(),
        }),
        result = call => result.map_err(|source| Error::store(operation, source)),
    }
}
