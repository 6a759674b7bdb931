#![forbid(unsafe_code)]

use std::sync::Arc;

use serde_json::json;

use skyjet_bridge::memory::{ApplyFailure, MemoryProvider, MEMORY_PRIVATE};
use skyjet_bridge::server::ServerConnector;
use skyjet_bridge::{BridgeConnector, Planned, ProviderSetup};
use skyjet_core::Error;
use skyjet_value::{from_generic, Attribute, Block, ProviderState, ResourceSchema, SchemaType, TypedValue};

fn schema() -> ResourceSchema {
    ResourceSchema::new(
        Block::new()
            .with_attribute("id", Attribute::computed(SchemaType::String))
            .with_attribute("arn", Attribute::computed(SchemaType::String))
            .with_attribute("name", Attribute::required(SchemaType::String))
            .with_attribute("size", Attribute::optional(SchemaType::Number)),
    )
}

fn provider() -> Arc<MemoryProvider> {
    Arc::new(MemoryProvider::new().with_resource("mem_disk", schema()).with_force_new("mem_disk", "name"))
}

#[tokio::test]
async fn plan_and_apply_round_trip() {
    let mem = provider();
    let connector = ServerConnector::new(mem.clone());
    let bridge = connector.connect("mem_disk", &ProviderSetup::new("skyjet/memory"), &[1u8; 16]).await.unwrap();
    let ty = bridge.value_type();
    let config = from_generic(&json!({"name": "data", "size": 20}), &ty).unwrap();

    let plan = bridge.plan(&ProviderState::null(), &config).await.unwrap();
    assert!(plan.requires_replace.is_empty());
    assert!(plan.planned.state.attribute("id").unwrap().is_unknown());

    let created = bridge.apply(&ProviderState::null(), &plan.planned, &config).await.unwrap();
    assert!(!created.diagnostics.has_errors());
    assert_eq!(created.new_state.private, MEMORY_PRIVATE.to_vec());
    let value = created.new_state.value.decode(&ty).unwrap();
    assert_eq!(value.attribute("id"), Some(&TypedValue::string("mem-1")));
    assert_eq!(value.attribute("arn"), Some(&TypedValue::string("arn-mem-1")));
    assert_eq!(mem.object("mem_disk", "mem-1"), Some(value.clone()));

    // force-new attributes are reported for every existing object
    let plan = bridge.plan(&created.new_state, &config).await.unwrap();
    assert_eq!(plan.requires_replace.len(), 1);
    assert_eq!(plan.planned.state.attribute("id"), Some(&TypedValue::string("mem-1")));

    let read = bridge.read(&created.new_state).await.unwrap();
    assert_eq!(read.new_state.value.decode(&ty).unwrap(), value);

    let gone = bridge.apply(&created.new_state, &Planned::destroy(), &TypedValue::Null).await.unwrap();
    assert!(gone.new_state.is_null());
    assert_eq!(mem.object_count(), 0);
    assert!(bridge.read(&created.new_state).await.unwrap().new_state.is_null());
    assert_eq!(mem.apply_count(), 2);
}

#[tokio::test]
async fn injected_failures_surface_as_diagnostics() {
    let mem = provider();
    let bridge = ServerConnector::new(mem.clone()).connect("mem_disk", &ProviderSetup::new("skyjet/memory"), &[2u8; 16]).await.unwrap();
    let ty = bridge.value_type();
    let config = from_generic(&json!({"name": "data"}), &ty).unwrap();
    let plan = bridge.plan(&ProviderState::null(), &config).await.unwrap();

    mem.fail_next_apply(ApplyFailure::Error("quota exceeded".into()));
    let resp = bridge.apply(&ProviderState::null(), &plan.planned, &config).await.unwrap();
    assert_eq!(resp.diagnostics.summary(), "quota exceeded");
    assert!(resp.new_state.is_null());
    assert_eq!(mem.object_count(), 0);

    mem.fail_next_apply(ApplyFailure::Partial("tagging failed".into()));
    let resp = bridge.apply(&ProviderState::null(), &plan.planned, &config).await.unwrap();
    assert!(resp.diagnostics.has_errors());
    assert!(!resp.new_state.is_null());
    assert_eq!(mem.object_count(), 1);
}

#[tokio::test]
async fn rejected_configuration_is_a_setup_error() {
    let mem = provider();
    mem.reject_configuration("missing credentials");
    let err = ServerConnector::new(mem).connect("mem_disk", &ProviderSetup::new("skyjet/memory"), &[3u8; 16]).await.err().unwrap();
    assert!(matches!(err, Error::Setup(ref m) if m.contains("missing credentials")));
}
