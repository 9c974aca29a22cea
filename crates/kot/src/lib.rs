//! kot - declarative child-object reconciliation for kube-rs controllers
//!
//! A controller is described as a parent kind plus a list of reconcilers, each of
//! which owns one concern of the parent: a singleton child, a collection of
//! children, a custom action, a finalizer or part of the status. Every pass reads
//! the parent, converges the children, derives the status and reports when the
//! runtime should come back.
//!
//! # Modules
//!
//! - [`action`] - the `Action` unit of work, outcomes, composition and decoration
//! - [`reconcile`] - `One`, `List`, `Custom`, finalizers, status and watchers
//! - [`controller`] - controller assembly and the per-key reconcile pass
//! - [`client`] - the `ObjectStore` abstraction and list synchronization
//! - [`store`] - `ObjectStore` over the Kubernetes API
//! - [`indexing`] - ownership and custom field indexes
//! - [`object`] - object keys and metadata helpers
//! - [`runtime`] - binding to the kube-rs controller runtime
//! - [`telemetry`] - tracing subscriber setup
//! - [`error`] - error types

#![deny(missing_docs)]

pub mod action;
pub mod client;
pub mod controller;
pub mod error;
pub mod indexing;
pub mod object;
pub mod reconcile;
pub mod runtime;
pub mod store;
pub mod telemetry;

pub use action::{Action, Composite, Context, Outcome, Wrap};
pub use client::{ListOptions, ObjectStore};
pub use controller::{Controller, ControllerBuilder, Schedule};
pub use error::{ActionError, Error, StoreError};
pub use indexing::OwnershipIndex;
pub use object::{Object, ObjectKey, TypeKey};
pub use store::KubeStore;
