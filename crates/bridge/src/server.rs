//! Bridge over a persistent provider RPC server.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info};

use skyjet_core::{format_uid, AttributeMap, Error, Result, Uid};
use skyjet_value::{proposed_new_state, AttributePath, DynamicValue, ProviderState, ResourceSchema, SchemaType, TypedValue};

use crate::{ApplyResponse, BridgeConnector, Diagnostics, PlanResponse, Planned, ProviderBridge, ProviderSetup, ReadResponse};

#[derive(Debug, Clone)]
pub struct ReadResourceRequest {
    pub type_name: String,
    pub current_state: DynamicValue,
    pub private: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct ReadResourceResponse {
    pub new_state: DynamicValue,
    pub private: Vec<u8>,
    pub diagnostics: Diagnostics,
}

#[derive(Debug, Clone)]
pub struct PlanResourceChangeRequest {
    pub type_name: String,
    pub prior_state: DynamicValue,
    pub proposed_new_state: DynamicValue,
    pub config: DynamicValue,
    pub prior_private: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct PlanResourceChangeResponse {
    pub planned_state: DynamicValue,
    pub requires_replace: Vec<AttributePath>,
    pub planned_private: Vec<u8>,
    pub diagnostics: Diagnostics,
}

#[derive(Debug, Clone)]
pub struct ApplyResourceChangeRequest {
    pub type_name: String,
    pub prior_state: DynamicValue,
    pub planned_state: DynamicValue,
    pub config: DynamicValue,
    pub planned_private: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct ApplyResourceChangeResponse {
    pub new_state: DynamicValue,
    pub private: Vec<u8>,
    pub diagnostics: Diagnostics,
}

/// The provider RPC surface.
#[async_trait]
pub trait ProviderServer: Send + Sync {
    async fn configure_provider(&self, config: &AttributeMap) -> Result<Diagnostics>;
    async fn get_resource_schema(&self, type_name: &str) -> Result<ResourceSchema>;
    async fn read_resource(&self, req: ReadResourceRequest) -> Result<ReadResourceResponse>;
    async fn plan_resource_change(&self, req: PlanResourceChangeRequest) -> Result<PlanResourceChangeResponse>;
    async fn apply_resource_change(&self, req: ApplyResourceChangeRequest) -> Result<ApplyResourceChangeResponse>;
}

pub struct ServerBridge {
    type_name: String,
    schema: ResourceSchema,
    ty: SchemaType,
    server: Arc<dyn ProviderServer>,
}

impl ServerBridge {
    pub fn new(server: Arc<dyn ProviderServer>, type_name: impl Into<String>, schema: ResourceSchema) -> Self {
        let ty = schema.implied_type();
        Self { type_name: type_name.into(), schema, ty, server }
    }
}

#[async_trait]
impl ProviderBridge for ServerBridge {
    fn type_name(&self) -> &str { &self.type_name }
    fn schema(&self) -> &ResourceSchema { &self.schema }
    fn value_type(&self) -> SchemaType { self.ty.clone() }

    async fn read(&self, prior: &ProviderState) -> Result<ReadResponse> {
        let t0 = Instant::now();
        let resp = self
            .server
            .read_resource(ReadResourceRequest {
                type_name: self.type_name.clone(),
                current_state: prior.value.clone(),
                private: prior.private.clone(),
            })
            .await?;
        metrics::histogram!("skyjet_provider_rpc_ms", t0.elapsed().as_secs_f64() * 1000.0, "rpc" => "read");
        debug!(type_name = %self.type_name, took_ms = %t0.elapsed().as_millis(), "server: read");
        Ok(ReadResponse { new_state: ProviderState::new(resp.new_state, resp.private), diagnostics: resp.diagnostics })
    }

    async fn plan(&self, prior: &ProviderState, config: &TypedValue) -> Result<PlanResponse> {
        let t0 = Instant::now();
        let prior_value = prior.value.decode(&self.ty)?;
        let proposed = proposed_new_state(&self.schema.block, &prior_value, config);
        let resp = self
            .server
            .plan_resource_change(PlanResourceChangeRequest {
                type_name: self.type_name.clone(),
                prior_state: prior.value.clone(),
                proposed_new_state: DynamicValue::encode(&proposed, &self.ty)?,
                config: DynamicValue::encode(config, &self.ty)?,
                prior_private: prior.private.clone(),
            })
            .await?;
        metrics::histogram!("skyjet_provider_rpc_ms", t0.elapsed().as_secs_f64() * 1000.0, "rpc" => "plan");
        let state = if resp.diagnostics.has_errors() { TypedValue::Null } else { resp.planned_state.decode(&self.ty)? };
        Ok(PlanResponse {
            planned: Planned { state, private: resp.planned_private },
            requires_replace: resp.requires_replace,
            diagnostics: resp.diagnostics,
        })
    }

    async fn apply(&self, prior: &ProviderState, planned: &Planned, config: &TypedValue) -> Result<ApplyResponse> {
        let t0 = Instant::now();
        let resp = self
            .server
            .apply_resource_change(ApplyResourceChangeRequest {
                type_name: self.type_name.clone(),
                prior_state: prior.value.clone(),
                planned_state: DynamicValue::encode(&planned.state, &self.ty)?,
                config: DynamicValue::encode(config, &self.ty)?,
                planned_private: planned.private.clone(),
            })
            .await?;
        let ms = t0.elapsed().as_secs_f64() * 1000.0;
        metrics::histogram!("skyjet_provider_rpc_ms", ms, "rpc" => "apply");
        info!(type_name = %self.type_name, destroy = planned.is_destroy(), took_ms = %t0.elapsed().as_millis(), "server: apply");
        Ok(ApplyResponse { new_state: ProviderState::new(resp.new_state, resp.private), diagnostics: resp.diagnostics })
    }
}

/// Configures a shared provider server per connect and hands out bridges.
pub struct ServerConnector {
    server: Arc<dyn ProviderServer>,
}

impl ServerConnector {
    pub fn new(server: Arc<dyn ProviderServer>) -> Self { Self { server } }
}

#[async_trait]
impl BridgeConnector for ServerConnector {
    async fn connect(&self, type_name: &str, setup: &ProviderSetup, uid: &Uid) -> Result<Arc<dyn ProviderBridge>> {
        let diags = self.server.configure_provider(&setup.configuration).await.map_err(|e| Error::Setup(e.to_string()))?;
        if diags.has_errors() {
            return Err(Error::Setup(diags.summary()));
        }
        let schema = self.server.get_resource_schema(type_name).await.map_err(|e| Error::Setup(e.to_string()))?;
        debug!(uid = %format_uid(uid), type_name, "server: connected");
        Ok(Arc::new(ServerBridge::new(Arc::clone(&self.server), type_name, schema)))
    }
}
