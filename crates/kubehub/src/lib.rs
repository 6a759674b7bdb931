//! Skyjet kubehub: the Kubernetes side of managed resources.
//!
//! Maps managed resource objects to and from [`ManagedResource`], reads
//! Kubernetes secrets for the sensitive value bridge, and maintains the
//! deletion finalizer.

#![forbid(unsafe_code)]

pub mod finalizer;
pub mod mapping;
pub mod secret;

use std::time::Instant;

use anyhow::{Context, Result as AnyResult};
use kube::{
    api::{Api, Patch, PatchParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    Client,
};
use metrics::{counter, histogram};
use once_cell::sync::OnceCell;
use tracing::{debug, info};

use skyjet_core::{Condition, ManagedResource, Result};

pub use finalizer::KubeFinalizer;
pub use mapping::{managed_from_dynamic, metadata_patch, spec_patch, status_patch};
pub use secret::KubeSecretClient;

static CLIENT: OnceCell<Client> = OnceCell::new();

/// Shared client built from the default kubeconfig or in-cluster config.
pub async fn get_kube_client() -> AnyResult<Client> {
    if let Some(c) = CLIENT.get() {
        return Ok(c.clone());
    }
    let c = Client::try_default().await.context("building kube client")?;
    // a concurrent caller may have won; either client is fine
    let _ = CLIENT.set(c.clone());
    info!("kube client ready");
    Ok(CLIENT.get().cloned().unwrap_or(c))
}

/// Group/version/kind of a managed resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl ManagedKind {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), kind: kind.into() }
    }

    pub fn api_resource(&self) -> ApiResource {
        ApiResource::from_gvk(&GroupVersionKind::gvk(&self.group, &self.version, &self.kind))
    }
}

/// Typed access to managed resource objects of one kind.
#[derive(Clone)]
pub struct ManagedApi {
    api: Api<DynamicObject>,
}

impl ManagedApi {
    pub fn new(client: Client, kind: &ManagedKind, namespace: Option<&str>) -> Self {
        let ar = kind.api_resource();
        let api = match namespace {
            Some(ns) => Api::namespaced_with(client, ns, &ar),
            None => Api::all_with(client, &ar),
        };
        Self { api }
    }

    pub fn raw(&self) -> &Api<DynamicObject> { &self.api }

    pub async fn get(&self, name: &str) -> Result<Option<ManagedResource>> {
        let obj = self.api.get_opt(name).await.with_context(|| format!("getting {name}"))?;
        obj.as_ref().map(managed_from_dynamic).transpose()
    }

    /// Write observed attributes and conditions to the status subresource.
    pub async fn patch_status(&self, mr: &ManagedResource, conditions: &[Condition]) -> Result<()> {
        let t0 = Instant::now();
        let patch = status_patch(mr, conditions);
        self.api
            .patch_status(&mr.identity.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("patching status of {}", mr.identity.name))?;
        histogram!("skyjet_kube_patch_ms", t0.elapsed().as_secs_f64() * 1000.0);
        counter!("skyjet_kube_patches_total", 1u64, "target" => "status");
        debug!(name = %mr.identity.name, conditions = conditions.len(), "kube: status patched");
        Ok(())
    }

    /// Write late-initialized parameters and annotations back to the object.
    pub async fn patch_spec(&self, mr: &ManagedResource) -> Result<()> {
        let mut patch = spec_patch(mr);
        if let (Some(p), Some(m)) = (patch.as_object_mut(), metadata_patch(mr).get("metadata")) {
            p.insert("metadata".to_string(), m.clone());
        }
        self.api
            .patch(&mr.identity.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("patching spec of {}", mr.identity.name))?;
        counter!("skyjet_kube_patches_total", 1u64, "target" => "spec");
        debug!(name = %mr.identity.name, "kube: spec patched");
        Ok(())
    }
}
