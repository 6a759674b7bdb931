//! Provider bridges.
//!
//! A [`ProviderBridge`] issues Read/Plan/Apply for one resource type against
//! a provider. Two transports implement it: [`server::ServerBridge`] talks to
//! a long-lived provider RPC server, [`cli::CliBridge`] drives the provider
//! CLI in a per-resource working directory. Both hand back provider state in
//! the same wire form so the layers above stay transport agnostic.

#![forbid(unsafe_code)]

pub mod cli;
pub mod diagnostics;
pub mod memory;
pub mod server;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use skyjet_core::{AttributeMap, Result, Uid};
use skyjet_value::{AttributePath, ProviderState, ResourceSchema, SchemaType, TypedValue};

pub use diagnostics::{Diagnostic, Diagnostics, Severity};

/// Resolved provider configuration for one managed resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSetup {
    /// Provider source address, e.g. `hashicorp/aws`.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Provider configuration block, credentials included.
    #[serde(default)]
    pub configuration: AttributeMap,
    /// Extra environment for provider processes.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ProviderSetup {
    pub fn new(source: impl Into<String>) -> Self { Self { source: source.into(), ..Default::default() } }

    pub fn with_configuration(mut self, cfg: serde_json::Value) -> Self {
        if let serde_json::Value::Object(m) = cfg { self.configuration = m; }
        self
    }
}

/// Planned state together with the provider's planned private blob.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Planned {
    pub state: TypedValue,
    pub private: Vec<u8>,
}

impl Planned {
    /// A null planned state, which is how deletion is requested.
    pub fn destroy() -> Self { Self::default() }

    pub fn is_destroy(&self) -> bool { self.state.is_null() }
}

#[derive(Debug, Clone, Default)]
pub struct ReadResponse {
    pub new_state: ProviderState,
    pub diagnostics: Diagnostics,
}

#[derive(Debug, Clone, Default)]
pub struct PlanResponse {
    pub planned: Planned,
    pub requires_replace: Vec<AttributePath>,
    pub diagnostics: Diagnostics,
}

#[derive(Debug, Clone, Default)]
pub struct ApplyResponse {
    /// Possibly partial state; present even when diagnostics report failure.
    pub new_state: ProviderState,
    pub diagnostics: Diagnostics,
}

/// Read/Plan/Apply for one resource type.
///
/// `Err` means the call itself could not be made; provider-side failures
/// come back as error diagnostics in the response.
#[async_trait]
pub trait ProviderBridge: Send + Sync {
    fn type_name(&self) -> &str;

    fn schema(&self) -> &ResourceSchema;

    fn value_type(&self) -> SchemaType { self.schema().implied_type() }

    async fn read(&self, prior: &ProviderState) -> Result<ReadResponse>;

    async fn plan(&self, prior: &ProviderState, config: &TypedValue) -> Result<PlanResponse>;

    async fn apply(&self, prior: &ProviderState, planned: &Planned, config: &TypedValue) -> Result<ApplyResponse>;
}

/// Produces a configured bridge for one resource.
#[async_trait]
pub trait BridgeConnector: Send + Sync {
    /// Configure the provider and fetch the schema of `type_name`. Fails with
    /// a setup error when the provider rejects its configuration.
    async fn connect(&self, type_name: &str, setup: &ProviderSetup, uid: &Uid) -> Result<Arc<dyn ProviderBridge>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn setup_deserializes_with_defaults() {
        let s: ProviderSetup = serde_json::from_value(json!({"source": "hashicorp/aws"})).unwrap();
        assert_eq!(s, ProviderSetup::new("hashicorp/aws"));
        let s = ProviderSetup::new("x/y").with_configuration(json!({"region": "eu-west-1"}));
        assert_eq!(s.configuration["region"], json!("eu-west-1"));
        assert!(Planned::destroy().is_destroy());
    }
}
