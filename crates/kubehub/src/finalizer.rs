use anyhow::Context;
use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::core::DynamicObject;
use serde_json::json;
use tracing::info;

use skyjet_core::{ManagedResource, Result};
use skyjet_tracker::Finalizer;

pub const DEFAULT_FINALIZER: &str = "finalizer.managedresource.crossplane.io";

/// Finalizer kept in `metadata.finalizers`, written with a merge patch
/// guarded by the observed resource version.
pub struct KubeFinalizer {
    api: Api<DynamicObject>,
    name: String,
}

impl KubeFinalizer {
    pub fn new(api: Api<DynamicObject>) -> Self { Self { api, name: DEFAULT_FINALIZER.to_string() } }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    async fn update(&self, mr: &ManagedResource, add: bool) -> Result<()> {
        let name = &mr.identity.name;
        let Some(obj) = self.api.get_opt(name).await.with_context(|| format!("getting {name}"))? else {
            return Ok(());
        };
        let current = obj.metadata.finalizers.clone().unwrap_or_default();
        let next = edit_finalizers(&current, &self.name, add);
        if next == current {
            return Ok(());
        }
        let patch = json!({
            "metadata": {
                "finalizers": next,
                "resourceVersion": obj.metadata.resource_version,
            }
        });
        self.api
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("patching finalizers of {name}"))?;
        info!(name = %name, finalizer = %self.name, add, "kube: finalizers updated");
        Ok(())
    }
}

/// Finalizer list with `finalizer` added or removed, order preserved.
pub fn edit_finalizers(current: &[String], finalizer: &str, add: bool) -> Vec<String> {
    let mut out: Vec<String> = current.iter().filter(|f| f.as_str() != finalizer).cloned().collect();
    if add {
        // keep the original position when already present
        if current.iter().any(|f| f == finalizer) {
            return current.to_vec();
        }
        out.push(finalizer.to_string());
    }
    out
}

#[async_trait]
impl Finalizer for KubeFinalizer {
    async fn add_finalizer(&self, mr: &ManagedResource) -> Result<()> { self.update(mr, true).await }

    async fn remove_finalizer(&self, mr: &ManagedResource) -> Result<()> { self.update(mr, false).await }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalizer_edits_are_idempotent() {
        let cur = vec!["other".to_string()];
        let added = edit_finalizers(&cur, DEFAULT_FINALIZER, true);
        assert_eq!(added, vec!["other".to_string(), DEFAULT_FINALIZER.to_string()]);
        assert_eq!(edit_finalizers(&added, DEFAULT_FINALIZER, true), added);
        assert_eq!(edit_finalizers(&added, DEFAULT_FINALIZER, false), cur);
        assert_eq!(edit_finalizers(&cur, DEFAULT_FINALIZER, false), cur);
    }
}
