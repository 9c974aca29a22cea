//! Error types for kot controllers
//!
//! [`StoreError`] is what an [`ObjectStore`](crate::client::ObjectStore) reports,
//! [`Error`] is what actions and reconcilers report, and [`ActionError`] carries an
//! [`Error`] together with the outcome that was accumulated before the failure.

use thiserror::Error;

use crate::action::Outcome;

/// Errors reported by an object store
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested object does not exist
    #[error("{kind} {key} not found")]
    NotFound {
        /// Kind of the missing object
        kind: String,
        /// Namespace/name of the missing object
        key: String,
    },

    /// Optimistic-concurrency check failed
    #[error("conflict writing {kind} {key}: {message}")]
    Conflict {
        /// Kind of the object being written
        kind: String,
        /// Namespace/name of the object being written
        key: String,
        /// Server-provided detail
        message: String,
    },

    /// Create was attempted for an object that already exists
    #[error("{kind} {key} already exists")]
    AlreadyExists {
        /// Kind of the object being created
        kind: String,
        /// Namespace/name of the object being created
        key: String,
    },

    /// A list query used a field nobody registered an index for
    #[error("no index registered for field {field}")]
    UnknownIndex {
        /// The field selector that was requested
        field: String,
    },

    /// The store cannot perform the requested operation for this kind
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Object could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether this error means the object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this error is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Main error type for reconciliation passes
#[derive(Debug, Error)]
pub enum Error {
    /// An object store call failed
    #[error("failed to {operation}: {source}")]
    Store {
        /// The operation that failed (e.g. "create child ConfigMap")
        operation: String,
        /// The underlying store error
        #[source]
        source: StoreError,
    },

    /// A singleton child reconciler found more than one child
    #[error("resource has {count} '{kind}' children, expected at most one")]
    TooManyChildren {
        /// Kind of the duplicated child
        kind: String,
        /// How many children were observed
        count: usize,
    },

    /// An owner reference could not be computed or applied
    #[error("owner reference error: {message}")]
    OwnerReference {
        /// Description of what failed
        message: String,
    },

    /// The request-scoped cancellation token fired before a store call finished
    #[error("{operation} cancelled")]
    Cancelled {
        /// The operation that was interrupted
        operation: String,
    },

    /// Several independent reconcilers failed in the same pass
    #[error("one or more errors occurred: [{}]", quoted(.0))]
    Aggregate(Vec<String>),

    /// Invalid controller configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Error raised by user callbacks
    #[error("{0}")]
    Message(String),
}

fn quoted(messages: &[String]) -> String {
    messages
        .iter()
        .map(|m| format!("\"{m}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    /// Create a plain error with the given message
    pub fn message(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }

    /// Wrap a store error with the name of the failing operation
    pub fn store(operation: impl Into<String>, source: StoreError) -> Self {
        Self::Store {
            operation: operation.into(),
            source,
        }
    }

    /// Create an owner reference error
    pub fn owner_reference(msg: impl Into<String>) -> Self {
        Self::OwnerReference {
            message: msg.into(),
        }
    }

    /// Whether this error wraps a store "not found"
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store { source, .. } if source.is_not_found())
    }
}

/// An [`Error`] plus the outcome collected before it happened
///
/// Composites keep merging outcomes when members fail, so a failed pass can still
/// carry a requeue request back to the caller.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ActionError {
    /// Outcome accumulated up to the failure
    pub outcome: Outcome,
    /// The failure itself
    pub error: Error,
}

impl ActionError {
    /// Pair an error with a partial outcome
    pub fn new(outcome: Outcome, error: Error) -> Self {
        Self { outcome, error }
    }

    /// Drop the partial outcome
    pub fn into_error(self) -> Error {
        self.error
    }
}

impl From<Error> for ActionError {
    fn from(error: Error) -> Self {
        Self::new(Outcome::default(), error)
    }
}
