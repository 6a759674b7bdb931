use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info};

use skyjet_bridge::{BridgeConnector, ProviderSetup};
use skyjet_core::{AttributeMap, EngineConfig, Error, ManagedResource, Result, SecretKeySelector};
use skyjet_secrets::{FillMode, SecretClient, SensitiveValueBridge};
use skyjet_tracker::TrackerRegistry;

use crate::async_client::{AsyncExternalClient, CallbackProvider};
use crate::client::ExternalClient;
use crate::config::ResourceConfig;
use crate::reconstruct::StateReconstructor;

/// Resolves the provider setup, credentials included, for a managed resource.
#[async_trait]
pub trait ProviderSetupResolver: Send + Sync {
    async fn resolve(&self, mr: &ManagedResource) -> Result<ProviderSetup>;
}

/// The same setup for every resource.
#[derive(Debug, Clone)]
pub struct StaticSetup(pub ProviderSetup);

#[async_trait]
impl ProviderSetupResolver for StaticSetup {
    async fn resolve(&self, _mr: &ManagedResource) -> Result<ProviderSetup> { Ok(self.0.clone()) }
}

/// Merges a JSON credentials document stored in a secret into the provider
/// configuration.
pub struct SecretCredentialsSetup {
    base: ProviderSetup,
    credentials: SecretKeySelector,
    secrets: Arc<dyn SecretClient>,
}

impl SecretCredentialsSetup {
    pub fn new(base: ProviderSetup, credentials: SecretKeySelector, secrets: Arc<dyn SecretClient>) -> Self {
        Self { base, credentials, secrets }
    }
}

#[async_trait]
impl ProviderSetupResolver for SecretCredentialsSetup {
    async fn resolve(&self, _mr: &ManagedResource) -> Result<ProviderSetup> {
        let raw = self.secrets.get_secret_value(&self.credentials).await.map_err(|e| Error::Setup(e.to_string()))?;
        let creds: AttributeMap = serde_json::from_slice(&raw)
            .map_err(|e| Error::Setup(format!("credentials in secret {} are not a JSON object: {e}", self.credentials.name)))?;
        let mut setup = self.base.clone();
        for (k, v) in creds {
            setup.configuration.insert(k, v);
        }
        Ok(setup)
    }
}

/// Builds external clients: resolves the provider setup, connects a bridge,
/// prepares the extended parameters and seeds the tracker's state.
pub struct Connector {
    bridges: Arc<dyn BridgeConnector>,
    registry: Arc<TrackerRegistry>,
    secrets: Arc<dyn SecretClient>,
    setup: Arc<dyn ProviderSetupResolver>,
    resource: Arc<ResourceConfig>,
    engine: EngineConfig,
}

impl Connector {
    pub fn new(
        bridges: Arc<dyn BridgeConnector>,
        registry: Arc<TrackerRegistry>,
        secrets: Arc<dyn SecretClient>,
        setup: Arc<dyn ProviderSetupResolver>,
        resource: ResourceConfig,
    ) -> Self {
        Self { bridges, registry, secrets, setup, resource: Arc::new(resource), engine: EngineConfig::from_env() }
    }

    /// Replace the `SKYJET_*` environment settings picked up by [`Connector::new`].
    pub fn with_engine_config(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn registry(&self) -> &Arc<TrackerRegistry> { &self.registry }

    pub fn engine_config(&self) -> &EngineConfig { &self.engine }

    /// Parameters sent to the provider: spec parameters merged over
    /// init-parameters, secret references resolved, identifier injected.
    pub async fn extended_parameters(&self, mr: &ManagedResource) -> Result<AttributeMap> {
        let mut params = mr.desired.merged_parameters();
        let mapping = &self.resource.sensitive;
        if !mapping.is_empty() {
            let bridge = SensitiveValueBridge::new(self.secrets.as_ref(), mr.identity.namespace.as_deref());
            bridge.fetch_into_parameters(&mr.desired.parameters, &mut params, mapping, FillMode::Overwrite).await?;
            bridge.fetch_into_parameters(&mr.desired.init_parameters, &mut params, mapping, FillMode::OnlyUnset).await?;
        }
        self.resource.namer.set_identifier(&mut params, mr.external_name());
        if let Some(inject) = &self.resource.injector {
            inject(&mut params, mr)?;
        }
        Ok(params)
    }

    pub async fn connect(&self, mr: &ManagedResource) -> Result<ExternalClient> {
        let t0 = Instant::now();
        let uid = mr.identity.uid;
        let setup = self.setup.resolve(mr).await?;
        let bridge = self.bridges.connect(&self.resource.type_name, &setup, &uid).await?;
        let params = self.extended_parameters(mr).await?;
        let tracker = self.registry.tracker(uid);

        if !tracker.has_state() {
            let ty = bridge.value_type();
            let state = StateReconstructor::new(&self.resource, self.secrets.as_ref(), &ty).reconstruct(mr, &params).await?;
            debug!(uid = %mr.identity.uid_string(), "connect: reconstructed provider state");
            tracker.set_state(state);
        }

        let init_only = mr.desired.init_only_keys();
        info!(
            uid = %mr.identity.uid_string(),
            type_name = %self.resource.type_name,
            params = params.len(),
            took_ms = %t0.elapsed().as_millis(),
            "connect: ok"
        );
        metrics::counter!("skyjet_connect_total", 1u64);
        Ok(ExternalClient::new(bridge, tracker, Arc::clone(&self.resource), params, init_only, self.engine.observe_timeout))
    }

    /// Like [`Connector::connect`], with create/update/delete run as
    /// supervised background tasks.
    pub async fn connect_async(&self, mr: &ManagedResource, callback: Arc<dyn CallbackProvider>) -> Result<AsyncExternalClient> {
        let client = self.connect(mr).await?;
        Ok(AsyncExternalClient::new(client, callback, self.engine.async_timeout))
    }
}
