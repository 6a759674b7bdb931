use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use skyjet_core::{ManagedResource, Result};

use crate::TrackerRegistry;

/// Adds and removes the deletion finalizer of a managed resource.
#[async_trait]
pub trait Finalizer: Send + Sync {
    async fn add_finalizer(&self, mr: &ManagedResource) -> Result<()>;
    async fn remove_finalizer(&self, mr: &ManagedResource) -> Result<()>;
}

/// Finalizer that does nothing; for resources without one.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopFinalizer;

#[async_trait]
impl Finalizer for NopFinalizer {
    async fn add_finalizer(&self, _mr: &ManagedResource) -> Result<()> { Ok(()) }
    async fn remove_finalizer(&self, _mr: &ManagedResource) -> Result<()> { Ok(()) }
}

/// Wraps a finalizer so that removing it also drops the resource's tracker.
/// This is the only way trackers leave the registry.
pub struct TrackerFinalizer<F> {
    registry: Arc<TrackerRegistry>,
    inner: F,
}

impl<F: Finalizer> TrackerFinalizer<F> {
    pub fn new(registry: Arc<TrackerRegistry>, inner: F) -> Self { Self { registry, inner } }
}

#[async_trait]
impl<F: Finalizer> Finalizer for TrackerFinalizer<F> {
    async fn add_finalizer(&self, mr: &ManagedResource) -> Result<()> { self.inner.add_finalizer(mr).await }

    async fn remove_finalizer(&self, mr: &ManagedResource) -> Result<()> {
        if self.registry.remove(&mr.identity.uid).is_some() {
            info!(uid = %mr.identity.uid_string(), name = %mr.identity.name, "finalizer: tracker released");
        }
        self.inner.remove_finalizer(mr).await
    }
}
