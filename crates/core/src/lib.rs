//! Skyjet core types: resource identity, desired/observed configuration,
//! field paths and the shared error taxonomy.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod config;
pub mod error;
pub mod fieldpath;
pub mod json;
pub mod telemetry;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use fieldpath::{FieldPath, Segment};

pub type Uid = [u8; 16];

/// Generic attribute tree keyed by attribute name (insertion ordered).
pub type AttributeMap = serde_json::Map<String, serde_json::Value>;

/// Connection details payload, keyed by secret key.
pub type ConnectionDetails = BTreeMap<String, Vec<u8>>;

/// Annotation holding the provider-facing name of a managed resource.
pub const ANNOTATION_EXTERNAL_NAME: &str = "crossplane.io/external-name";
/// Annotation holding the provider's private state blob (base64).
pub const ANNOTATION_PRIVATE_RAW: &str = "skyjet.io/private-raw";

pub fn parse_uid(uid_str: &str) -> anyhow::Result<Uid> {
    use anyhow::Context;
    let u = Uuid::parse_str(uid_str).context("parsing metadata.uid as uuid")?;
    Ok(*u.as_bytes())
}

pub fn format_uid(uid: &Uid) -> String {
    Uuid::from_bytes(*uid).hyphenated().to_string()
}

/// Mutating operation kinds tracked per resource.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable internal identity plus the provider-facing external name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceIdentity {
    pub uid: Uid,
    pub name: String,
    pub namespace: Option<String>,
    /// Absent until computed from observed state (or set by the user).
    pub external_name: Option<String>,
}

impl ResourceIdentity {
    pub fn new(uid: Uid, name: impl Into<String>) -> Self {
        Self { uid, name: name.into(), namespace: None, external_name: None }
    }

    pub fn uid_string(&self) -> String { format_uid(&self.uid) }
}

/// Spec-owned configuration. Only read by the engine, except for
/// late-initialization which reports changes back to the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DesiredConfiguration {
    pub parameters: AttributeMap,
    /// Seed values applied where `parameters` leaves a field unset.
    pub init_parameters: AttributeMap,
}

impl DesiredConfiguration {
    /// Parameters with init-parameters filling unset fields.
    pub fn merged_parameters(&self) -> AttributeMap {
        let mut out = self.parameters.clone();
        json::merge_missing(&mut out, &self.init_parameters);
        out
    }

    /// Top-level keys that are set only through init-parameters.
    pub fn init_only_keys(&self) -> Vec<String> {
        self.init_parameters
            .iter()
            .filter(|(k, v)| !v.is_null() && self.parameters.get(*k).map(|p| p.is_null()).unwrap_or(true))
            .map(|(k, _)| k.clone())
            .collect()
    }
}

/// Engine-owned view of the provider's last Read/Apply response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ObservedState {
    pub attributes: AttributeMap,
    pub annotations: BTreeMap<String, String>,
}

/// Reference to one key of a secret.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecretKeySelector {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub key: String,
}

/// Reference to a whole secret.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecretReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// The declarative record driven by the external reconciler.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ManagedResource {
    pub identity: ResourceIdentity,
    /// Kind of the managed resource (e.g. `Bucket`).
    pub kind: String,
    pub desired: DesiredConfiguration,
    pub observed: ObservedState,
    /// Set once the object carries a deletion timestamp.
    pub deleting: bool,
    pub connection_secret: Option<SecretReference>,
}

impl Default for ResourceIdentity {
    fn default() -> Self { Self::new([0u8; 16], "") }
}

impl ManagedResource {
    pub fn new(identity: ResourceIdentity, kind: impl Into<String>) -> Self {
        Self { identity, kind: kind.into(), ..Default::default() }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        if let serde_json::Value::Object(m) = parameters { self.desired.parameters = m; }
        self
    }

    pub fn with_init_parameters(mut self, init: serde_json::Value) -> Self {
        if let serde_json::Value::Object(m) = init { self.desired.init_parameters = m; }
        self
    }

    pub fn external_name(&self) -> Option<&str> { self.identity.external_name.as_deref() }

    pub fn set_external_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.observed.annotations.insert(ANNOTATION_EXTERNAL_NAME.to_string(), name.clone());
        self.identity.external_name = Some(name);
    }
}

/// Condition surfaced on the managed resource status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

pub mod prelude {
    pub use super::{
        AttributeMap, Condition, ConnectionDetails, DesiredConfiguration, Error, FieldPath, ManagedResource,
        ObservedState, OperationType, ResourceIdentity, Result, SecretKeySelector, SecretReference, Uid,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merged_parameters_fill_only_unset_fields() {
        let mr = ManagedResource::default()
            .with_parameters(json!({"name": "x", "tags": {"a": "1"}, "size": null}))
            .with_init_parameters(json!({"name": "y", "tags": {"b": "2"}, "size": 3, "region": "eu"}));
        let merged = mr.desired.merged_parameters();
        assert_eq!(merged["name"], json!("x"));
        assert_eq!(merged["tags"], json!({"a": "1", "b": "2"}));
        assert_eq!(merged["size"], json!(3));
        assert_eq!(merged["region"], json!("eu"));
    }

    #[test]
    fn init_only_keys_skip_fields_owned_by_parameters() {
        let mr = ManagedResource::default()
            .with_parameters(json!({"name": "x"}))
            .with_init_parameters(json!({"name": "y", "region": "eu"}));
        assert_eq!(mr.desired.init_only_keys(), vec!["region".to_string()]);
    }

    #[test]
    fn uid_round_trips_through_text() {
        let uid = parse_uid("3f2b1c7e-8d4a-4e3b-9a55-0c1d2e3f4a5b").unwrap();
        assert_eq!(format_uid(&uid), "3f2b1c7e-8d4a-4e3b-9a55-0c1d2e3f4a5b");
        assert!(parse_uid("not-a-uid").is_err());
    }
}
