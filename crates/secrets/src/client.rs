use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use skyjet_core::{ConnectionDetails, Error, Result, SecretKeySelector, SecretReference};

/// Read access to a secret store.
#[async_trait]
pub trait SecretClient: Send + Sync {
    /// Value of one key; a missing secret or key is an error.
    async fn get_secret_value(&self, selector: &SecretKeySelector) -> Result<Vec<u8>>;

    /// Every key of a secret, or `None` when the secret does not exist.
    async fn get_secret_data(&self, reference: &SecretReference) -> Result<Option<ConnectionDetails>>;
}

pub(crate) fn describe(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{ns}/{name}"),
        None => name.to_string(),
    }
}

/// In-memory secret store for tests and local runs.
#[derive(Debug, Default)]
pub struct MemorySecretClient {
    secrets: RwLock<BTreeMap<(String, String), ConnectionDetails>>,
}

impl MemorySecretClient {
    pub fn new() -> Self { Self::default() }

    pub async fn insert(&self, namespace: &str, name: &str, data: ConnectionDetails) {
        self.secrets.write().await.insert((namespace.to_string(), name.to_string()), data);
    }

    pub async fn insert_value(&self, namespace: &str, name: &str, key: &str, value: impl Into<Vec<u8>>) {
        let mut g = self.secrets.write().await;
        g.entry((namespace.to_string(), name.to_string())).or_default().insert(key.to_string(), value.into());
    }

    /// Snapshot of a stored secret.
    pub async fn get(&self, namespace: &str, name: &str) -> Option<ConnectionDetails> {
        self.secrets.read().await.get(&(namespace.to_string(), name.to_string())).cloned()
    }
}

#[async_trait]
impl SecretClient for MemorySecretClient {
    async fn get_secret_value(&self, selector: &SecretKeySelector) -> Result<Vec<u8>> {
        let ns = selector.namespace.clone().unwrap_or_default();
        let g = self.secrets.read().await;
        let data = g.get(&(ns, selector.name.clone())).ok_or_else(|| Error::Secret {
            reference: describe(selector.namespace.as_deref(), &selector.name),
            reason: "not found".into(),
        })?;
        data.get(&selector.key).cloned().ok_or_else(|| Error::Secret {
            reference: describe(selector.namespace.as_deref(), &selector.name),
            reason: format!("key {:?} not found", selector.key),
        })
    }

    async fn get_secret_data(&self, reference: &SecretReference) -> Result<Option<ConnectionDetails>> {
        let ns = reference.namespace.clone().unwrap_or_default();
        Ok(self.secrets.read().await.get(&(ns, reference.name.clone())).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_client_reports_missing_keys() {
        let c = MemorySecretClient::new();
        c.insert_value("ns", "db", "password", "s3cret").await;
        let sel = |key: &str| SecretKeySelector { name: "db".into(), namespace: Some("ns".into()), key: key.into() };
        assert_eq!(c.get_secret_value(&sel("password")).await.unwrap(), b"s3cret".to_vec());
        let err = c.get_secret_value(&sel("user")).await.unwrap_err();
        assert!(err.to_string().contains("ns/db"), "{err}");
        let missing = SecretReference { name: "nope".into(), namespace: Some("ns".into()) };
        assert!(c.get_secret_data(&missing).await.unwrap().is_none());
    }
}
