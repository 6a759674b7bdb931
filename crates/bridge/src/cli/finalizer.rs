use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use skyjet_core::{ManagedResource, Result};
use skyjet_tracker::Finalizer;

use super::workspace::WorkspaceStore;

/// Wraps a finalizer so that removing it first deletes the resource's CLI
/// workspace. A failed delete keeps the inner finalizer in place.
pub struct WorkspaceFinalizer<F> {
    store: Arc<WorkspaceStore>,
    inner: F,
}

impl<F: Finalizer> WorkspaceFinalizer<F> {
    pub fn new(store: Arc<WorkspaceStore>, inner: F) -> Self { Self { store, inner } }
}

#[async_trait]
impl<F: Finalizer> Finalizer for WorkspaceFinalizer<F> {
    async fn add_finalizer(&self, mr: &ManagedResource) -> Result<()> { self.inner.add_finalizer(mr).await }

    async fn remove_finalizer(&self, mr: &ManagedResource) -> Result<()> {
        self.store.remove(&mr.identity.uid).await?;
        info!(uid = %mr.identity.uid_string(), "finalizer: workspace removed");
        self.inner.remove_finalizer(mr).await
    }
}
