use anyhow::Context;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{api::Api, Client};
use tracing::debug;

use skyjet_core::{ConnectionDetails, Error, Result, SecretKeySelector, SecretReference};
use skyjet_secrets::SecretClient;

/// [`SecretClient`] over Kubernetes `Secret` objects.
#[derive(Clone)]
pub struct KubeSecretClient {
    client: Client,
    default_namespace: String,
}

impl KubeSecretClient {
    pub fn new(client: Client, default_namespace: impl Into<String>) -> Self {
        Self { client, default_namespace: default_namespace.into() }
    }

    async fn fetch(&self, namespace: Option<&str>, name: &str) -> Result<Option<ConnectionDetails>> {
        let ns = namespace.unwrap_or(&self.default_namespace);
        let api: Api<Secret> = Api::namespaced(self.client.clone(), ns);
        let secret = api.get_opt(name).await.with_context(|| format!("reading secret {ns}/{name}"))?;
        debug!(ns, name, found = secret.is_some(), "kube: secret read");
        Ok(secret.map(|s| s.data.unwrap_or_default().into_iter().map(|(k, v)| (k, v.0)).collect()))
    }
}

#[async_trait]
impl SecretClient for KubeSecretClient {
    async fn get_secret_value(&self, selector: &SecretKeySelector) -> Result<Vec<u8>> {
        let describe = || format!("{}/{}", selector.namespace.as_deref().unwrap_or(&self.default_namespace), selector.name);
        let data = self
            .fetch(selector.namespace.as_deref(), &selector.name)
            .await?
            .ok_or_else(|| Error::Secret { reference: describe(), reason: "not found".into() })?;
        data.get(&selector.key)
            .cloned()
            .ok_or_else(|| Error::Secret { reference: describe(), reason: format!("key {:?} not found", selector.key) })
    }

    async fn get_secret_data(&self, reference: &SecretReference) -> Result<Option<ConnectionDetails>> {
        self.fetch(reference.namespace.as_deref(), &reference.name).await
    }
}
