#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use skyjet_bridge::memory::MemoryProvider;
use skyjet_bridge::server::ServerConnector;
use skyjet_bridge::{ApplyResponse, BridgeConnector, PlanResponse, Planned, ProviderBridge, ProviderSetup, ReadResponse};
use skyjet_core::{EngineConfig, Error, ManagedResource, OperationType, ResourceIdentity, Result};
use skyjet_external::{AsyncExternalClient, ChannelCallback, CompletionEvent, Connector, ExternalClient, Observation, ResourceConfig, StaticSetup};
use skyjet_secrets::MemorySecretClient;
use skyjet_tracker::{TrackerRegistry, REASON_APPLY_FAILURE};
use skyjet_value::{Attribute, Block, ProviderState, ResourceSchema, SchemaType, TypedValue};
use tokio::sync::mpsc;

const TYPE: &str = "mem_queue";

fn schema() -> ResourceSchema {
    ResourceSchema::new(
        Block::new()
            .with_attribute("id", Attribute::computed(SchemaType::String))
            .with_attribute("name", Attribute::required(SchemaType::String)),
    )
}

fn connector(mem: &Arc<MemoryProvider>, timeout: Duration) -> Connector {
    Connector::new(
        Arc::new(ServerConnector::new(mem.clone())),
        Arc::new(TrackerRegistry::new()),
        Arc::new(MemorySecretClient::new()),
        Arc::new(StaticSetup(ProviderSetup::new("skyjet/memory"))),
        ResourceConfig::new(TYPE),
    )
    .with_engine_config(EngineConfig { async_timeout: timeout, ..Default::default() })
}

fn queue(uid: u8) -> ManagedResource {
    ManagedResource::new(ResourceIdentity::new([uid; 16], "jobs"), "Queue").with_parameters(json!({"name": "jobs"}))
}

async fn next(rx: &mut mpsc::Receiver<CompletionEvent>) -> CompletionEvent {
    tokio::time::timeout(Duration::from_secs(10), rx.recv()).await.expect("completion in time").expect("channel open")
}

#[tokio::test]
async fn create_completes_in_background() {
    let mem = Arc::new(MemoryProvider::new().with_resource(TYPE, schema()));
    let (cb, mut rx) = ChannelCallback::channel(4);
    let mut mr = queue(1);
    let client = connector(&mem, Duration::from_secs(30)).connect_async(&mr, Arc::new(cb)).await.unwrap();

    assert!(!client.observe(&mut mr).await.unwrap().exists);
    client.create(&mr).await.unwrap();
    let ev = next(&mut rx).await;
    assert_eq!(ev.op, OperationType::Create);
    assert!(ev.error.is_none());
    assert_eq!(ev.uid, mr.identity.uid);
    assert_eq!(ev.resource.external_name(), Some("mem-1"));

    let tracker = client.inner().tracker();
    assert!(!tracker.is_running());
    let cond = tracker.last_async_operation().unwrap();
    assert_eq!(cond.status, "True");

    let mut mr = ev.resource;
    let obs = client.observe(&mut mr).await.unwrap();
    assert!(obs.exists && obs.up_to_date);
}

#[tokio::test]
async fn running_operation_blocks_others_until_timeout() {
    let mem = Arc::new(MemoryProvider::new().with_resource(TYPE, schema()));
    mem.set_apply_delay(Some(Duration::from_secs(5)));
    let (cb, mut rx) = ChannelCallback::channel(4);
    let mut mr = queue(2);
    let client = connector(&mem, Duration::from_millis(100)).connect_async(&mr, Arc::new(cb)).await.unwrap();

    client.observe(&mut mr).await.unwrap();
    client.create(&mr).await.unwrap();
    let tracker = client.inner().tracker().clone();
    assert!(tracker.is_running());
    let started = tracker.last_operation().started.unwrap();

    match client.create(&mr).await {
        Err(Error::OperationRunning { op, started: s, .. }) => {
            assert_eq!(op, OperationType::Create);
            assert_eq!(s, started);
        }
        other => panic!("expected running operation error, got {other:?}"),
    }
    // no provider read while the operation runs
    let reads = mem.read_count();
    assert_eq!(client.observe(&mut mr).await.unwrap(), Observation::placeholder());
    assert_eq!(mem.read_count(), reads);

    let ev = next(&mut rx).await;
    assert!(matches!(ev.error.as_deref(), Some(Error::TaskTimeout { op: OperationType::Create, .. })), "{:?}", ev.error);
    assert!(!tracker.is_running());
    let rec = tracker.last_operation();
    assert!(matches!(rec.error.as_deref(), Some(Error::TaskTimeout { .. })));
    assert_eq!(tracker.last_async_operation().unwrap().reason, REASON_APPLY_FAILURE);

    // a new operation may start once the deadline has passed
    client.create(&mr).await.unwrap();
    let ev = next(&mut rx).await;
    assert!(matches!(ev.error.as_deref(), Some(Error::ObserveRequired(OperationType::Create))));
}

#[tokio::test]
async fn repeated_delete_is_accepted() {
    let mem = Arc::new(MemoryProvider::new().with_resource(TYPE, schema()));
    let (cb, mut rx) = ChannelCallback::channel(4);
    let mut mr = queue(3);
    let client = connector(&mem, Duration::from_secs(30)).connect_async(&mr, Arc::new(cb)).await.unwrap();
    client.observe(&mut mr).await.unwrap();
    client.create(&mr).await.unwrap();
    let mr = next(&mut rx).await.resource;

    mem.set_apply_delay(Some(Duration::from_millis(300)));
    client.delete(&mr).await.unwrap();
    client.delete(&mr).await.unwrap();
    assert!(matches!(client.update(&mr).await, Err(Error::OperationRunning { op: OperationType::Delete, .. })));

    let ev = next(&mut rx).await;
    assert_eq!(ev.op, OperationType::Delete);
    assert!(ev.error.is_none());
    assert!(client.inner().tracker().is_deleted());
    assert_eq!(mem.object_count(), 0);
}

struct PanicOnApply(Arc<dyn ProviderBridge>);

#[async_trait]
impl ProviderBridge for PanicOnApply {
    fn type_name(&self) -> &str { self.0.type_name() }

    fn schema(&self) -> &ResourceSchema { self.0.schema() }

    async fn read(&self, prior: &ProviderState) -> Result<ReadResponse> { self.0.read(prior).await }

    async fn plan(&self, prior: &ProviderState, config: &TypedValue) -> Result<PlanResponse> { self.0.plan(prior, config).await }

    async fn apply(&self, _prior: &ProviderState, _planned: &Planned, _config: &TypedValue) -> Result<ApplyResponse> {
        panic!("provider crashed")
    }
}

#[tokio::test]
async fn panicking_task_is_reported_as_failure() {
    let mem = Arc::new(MemoryProvider::new().with_resource(TYPE, schema()));
    let inner = ServerConnector::new(mem.clone()).connect(TYPE, &ProviderSetup::new("skyjet/memory"), &[4u8; 16]).await.unwrap();
    let registry = TrackerRegistry::new();
    let mut mr = queue(4);
    let tracker = registry.tracker(mr.identity.uid);
    tracker.set_state(ProviderState::null());
    let params = mr.desired.parameters.clone();
    let client = ExternalClient::new(Arc::new(PanicOnApply(inner)), tracker.clone(), Arc::new(ResourceConfig::new(TYPE)), params, Vec::new(), None);

    let (cb, mut rx) = ChannelCallback::channel(4);
    let client = AsyncExternalClient::new(client, Arc::new(cb), Duration::from_secs(30));
    client.observe(&mut mr).await.unwrap();
    client.create(&mr).await.unwrap();

    let ev = next(&mut rx).await;
    match ev.error.as_deref() {
        Some(Error::TaskPanicked { op, message }) => {
            assert_eq!(*op, OperationType::Create);
            assert_eq!(message, "provider crashed");
        }
        other => panic!("expected panic report, got {other:?}"),
    }
    assert!(!tracker.is_running());
    assert_eq!(mem.object_count(), 0);
}

#[tokio::test]
async fn mutation_waits_for_an_observe_in_flight() {
    let mem = Arc::new(MemoryProvider::new().with_resource(TYPE, schema()));
    mem.set_read_delay(Some(Duration::from_millis(300)));
    let (cb, mut rx) = ChannelCallback::channel(4);
    let mr = queue(5);
    let client = connector(&mem, Duration::from_secs(30)).connect_async(&mr, Arc::new(cb)).await.unwrap();

    let reads = mem.read_count();
    let observer = client.clone();
    let mut seen = mr.clone();
    let reading = tokio::spawn(async move { observer.observe(&mut seen).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(mem.read_count(), reads + 1);

    // starts only once the read and plan are done, so the plan is there
    client.create(&mr).await.unwrap();
    let obs = reading.await.unwrap().unwrap();
    assert!(!obs.exists);
    let ev = next(&mut rx).await;
    assert!(ev.error.is_none(), "{:?}", ev.error);
    assert_eq!(mem.object_count(), 1);
}
