//! Create/update/delete as supervised background tasks.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use skyjet_core::{Error, ManagedResource, OperationType, Result, Uid};

use crate::client::{ExternalClient, Observation};

/// Notified when a background operation finishes, successfully or not.
#[async_trait]
pub trait CallbackProvider: Send + Sync {
    async fn on_complete(&self, op: OperationType, mr: &ManagedResource, err: Option<Arc<Error>>) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallback;

#[async_trait]
impl CallbackProvider for NoopCallback {
    async fn on_complete(&self, _op: OperationType, _mr: &ManagedResource, _err: Option<Arc<Error>>) -> Result<()> { Ok(()) }
}

/// A finished background operation.
#[derive(Debug, Clone)]
pub struct CompletionEvent {
    pub op: OperationType,
    pub uid: Uid,
    /// The resource as the task left it: observation and external name updated.
    pub resource: ManagedResource,
    pub error: Option<Arc<Error>>,
}

/// Forwards completions to a channel, typically drained by the reconciler to
/// requeue the resource.
#[derive(Debug, Clone)]
pub struct ChannelCallback {
    tx: mpsc::Sender<CompletionEvent>,
}

impl ChannelCallback {
    pub fn new(tx: mpsc::Sender<CompletionEvent>) -> Self { Self { tx } }

    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<CompletionEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl CallbackProvider for ChannelCallback {
    async fn on_complete(&self, op: OperationType, mr: &ManagedResource, err: Option<Arc<Error>>) -> Result<()> {
        let ev = CompletionEvent { op, uid: mr.identity.uid, resource: mr.clone(), error: err };
        self.tx.send(ev).await.map_err(|_| Error::Other(anyhow::anyhow!("completion receiver dropped")))
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Wraps an [`ExternalClient`] so that mutating calls return as soon as the
/// operation is started. At most one operation runs per resource; its outcome
/// is recorded on the tracker and handed to the callback.
#[derive(Clone)]
pub struct AsyncExternalClient {
    inner: ExternalClient,
    callback: Arc<dyn CallbackProvider>,
    timeout: Duration,
}

impl AsyncExternalClient {
    pub fn new(inner: ExternalClient, callback: Arc<dyn CallbackProvider>, timeout: Duration) -> Self { Self { inner, callback, timeout } }

    pub fn inner(&self) -> &ExternalClient { &self.inner }

    /// While an operation runs the resource is reported as existing and up
    /// to date, so the reconciler does not start another one. Operations
    /// requested during the read wait for it to finish.
    pub async fn observe(&self, mr: &mut ManagedResource) -> Result<Observation> {
        let _gate = self.inner.tracker().gate().await;
        if self.inner.tracker().is_running() {
            debug!(uid = %mr.identity.uid_string(), "observe: operation in progress");
            return Ok(Observation::placeholder());
        }
        self.inner.observe(mr).await
    }

    pub async fn create(&self, mr: &ManagedResource) -> Result<()> {
        self.start(OperationType::Create, mr, |client, mut mr| async move {
            let res = client.create(&mut mr).await.map(|_| ());
            (mr, res)
        })
        .await
    }

    pub async fn update(&self, mr: &ManagedResource) -> Result<()> {
        self.start(OperationType::Update, mr, |client, mut mr| async move {
            let res = client.update(&mut mr).await.map(|_| ());
            (mr, res)
        })
        .await
    }

    /// A delete requested while a delete is already running succeeds.
    pub async fn delete(&self, mr: &ManagedResource) -> Result<()> {
        let res = self.start(OperationType::Delete, mr, |client, mut mr| async move {
            let res = client.delete(&mut mr).await;
            (mr, res)
        })
        .await;
        match res {
            Err(Error::OperationRunning { op: OperationType::Delete, .. }) => {
                debug!(uid = %mr.identity.uid_string(), "delete: already in progress");
                Ok(())
            }
            other => other,
        }
    }

    async fn start<F, Fut>(&self, op: OperationType, mr: &ManagedResource, work: F) -> Result<()>
    where
        F: FnOnce(ExternalClient, ManagedResource) -> Fut,
        Fut: Future<Output = (ManagedResource, Result<()>)> + Send + 'static,
    {
        let tracker = Arc::clone(self.inner.tracker());
        {
            let _gate = tracker.gate().await;
            if !tracker.mark_start(op) {
                let running = tracker.last_operation().running_error();
                return Err(running.unwrap_or_else(|| Error::Other(anyhow::anyhow!("{op} could not be started"))));
            }
        }

        let uid = mr.identity.uid_string();
        let resource = mr.clone();
        let fut = work(self.inner.clone(), mr.clone());
        let callback = Arc::clone(&self.callback);
        let timeout = self.timeout;
        info!(uid = %uid, op = %op, timeout_s = timeout.as_secs(), "async: started");

        tokio::spawn(async move {
            let t0 = std::time::Instant::now();
            let deadline = tokio::time::Instant::now() + timeout;
            let (mr, err) = match tokio::time::timeout_at(deadline, AssertUnwindSafe(fut).catch_unwind()).await {
                Ok(Ok((mr, Ok(())))) => (mr, None),
                Ok(Ok((mr, Err(e)))) => (mr, Some(e)),
                Ok(Err(payload)) => (resource, Some(Error::TaskPanicked { op, message: panic_message(payload) })),
                Err(_) => (resource, Some(Error::TaskTimeout { op, timeout })),
            };
            let err = err.map(Arc::new);
            let outcome = match err.as_deref() {
                None => "ok",
                Some(Error::TaskPanicked { .. }) => "panic",
                Some(Error::TaskTimeout { .. }) => "timeout",
                Some(_) => "error",
            };
            tracker.set_error(err.clone());
            tracker.mark_end();

            counter!("skyjet_async_ops_total", 1u64, "op" => op.as_str(), "outcome" => outcome);
            histogram!("skyjet_async_op_ms", t0.elapsed().as_secs_f64() * 1000.0, "op" => op.as_str());
            match &err {
                None => info!(uid = %uid, op = %op, took_ms = %t0.elapsed().as_millis(), "async: done"),
                Some(e) => warn!(uid = %uid, op = %op, outcome, error = %e, took_ms = %t0.elapsed().as_millis(), "async: failed"),
            }

            match AssertUnwindSafe(callback.on_complete(op, &mr, err)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(uid = %uid, op = %op, error = %e, "async: callback failed"),
                Err(payload) => error!(uid = %uid, op = %op, panic = %panic_message(payload), "async: callback panicked"),
            }
        });
        Ok(())
    }
}
