//! Test resources
//!
//! `SimpleCrd` keeps to primitive spec and status fields so tests can build and
//! compare instances by hand.

use k8s_openapi::api::core::v1::Namespace;
use kube::api::ObjectMeta;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Spec of the test resource
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "testing.kot.dev",
    version = "v1",
    kind = "SimpleCrd",
    namespaced,
    status = "SimpleCrdStatus",
    derive = "PartialEq",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct SimpleCrdSpec {
    /// Value copied into the child ConfigMap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_value: Option<String>,
    /// Value reported back through the status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_value: Option<String>,
}

/// Status of the test resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SimpleCrdStatus {
    /// Constant written by the status resolver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_value: Option<String>,
    /// Last seen `spec.configMapValue`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_config_map_value: Option<String>,
    /// Last seen `spec.secretValue`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_secret_value: Option<String>,
    /// The `misc` annotation of the resource's namespace
    #[serde(default)]
    pub namespace_annotation: String,
    /// Whether the resource was being deleted when the status was derived
    #[serde(default)]
    pub finalizing: bool,
}

/// A `SimpleCrd` named `name` in `namespace`
pub fn simple_crd(namespace: &str, name: &str, config_map_value: Option<&str>) -> SimpleCrd {
    SimpleCrd {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: SimpleCrdSpec {
            config_map_value: config_map_value.map(str::to_string),
            secret_value: None,
        },
        status: None,
    }
}

/// A namespace named `name`
pub fn namespace(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}
