//! Drives one managed resource through observe, create and observe against
//! the in-memory provider. Settings come from `SKYJET_*` variables, e.g.
//! `SKYJET_LOG=debug SKYJET_METRICS_ADDR=127.0.0.1:9184`.

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tracing::info;

use skyjet_bridge::memory::MemoryProvider;
use skyjet_bridge::server::ServerConnector;
use skyjet_bridge::ProviderSetup;
use skyjet_core::{telemetry, EngineConfig, ManagedResource, ResourceIdentity};
use skyjet_external::{Connector, ResourceConfig, StaticSetup};
use skyjet_secrets::MemorySecretClient;
use skyjet_tracker::TrackerRegistry;
use skyjet_value::{Attribute, Block, ResourceSchema, SchemaType};

const TYPE: &str = "mem_bucket";

#[tokio::main]
async fn main() -> Result<()> {
    let engine = EngineConfig::from_env();
    telemetry::init(&engine)?;

    let schema = ResourceSchema::new(
        Block::new()
            .with_attribute("id", Attribute::computed(SchemaType::String))
            .with_attribute("name", Attribute::required(SchemaType::String))
            .with_attribute("region", Attribute::optional_computed(SchemaType::String)),
    );
    let provider = Arc::new(MemoryProvider::new().with_resource(TYPE, schema));
    let connector = Connector::new(
        Arc::new(ServerConnector::new(provider.clone())),
        Arc::new(TrackerRegistry::new()),
        Arc::new(MemorySecretClient::new()),
        Arc::new(StaticSetup(ProviderSetup::new("skyjet/memory"))),
        ResourceConfig::new(TYPE),
    )
    .with_engine_config(engine);

    let mut mr = ManagedResource::new(ResourceIdentity::new([1u8; 16], "logs"), "Bucket")
        .with_parameters(json!({"name": "logs"}));
    let client = connector.connect(&mr).await?;

    let obs = client.observe(&mut mr).await?;
    info!(exists = obs.exists, "before create");
    let applied = client.create(&mut mr).await?;
    info!(external_name = ?applied.external_name, "created");
    let obs = client.observe(&mut mr).await?;
    info!(exists = obs.exists, up_to_date = obs.up_to_date, late_initialized = obs.late_initialized, "after create");

    println!("{}", serde_json::to_string_pretty(&mr.observed.attributes)?);
    Ok(())
}
