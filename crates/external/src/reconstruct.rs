//! Provider state synthesized for resources without a cached state.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde_json::Value as Json;
use tracing::{debug, warn};

use skyjet_core::{json, AttributeMap, ManagedResource, Result, ANNOTATION_PRIVATE_RAW};
use skyjet_secrets::{SecretClient, SensitiveValueBridge};
use skyjet_value::{from_generic, DynamicValue, ProviderState, SchemaType};

use crate::config::{ResourceConfig, ID_ATTRIBUTE};

/// Builds the prior state a provider needs to read a resource the engine has
/// no cached state for: after a restart, on first reconcile, or on import.
pub struct StateReconstructor<'a> {
    config: &'a ResourceConfig,
    secrets: &'a dyn SecretClient,
    ty: &'a SchemaType,
}

impl<'a> StateReconstructor<'a> {
    pub fn new(config: &'a ResourceConfig, secrets: &'a dyn SecretClient, ty: &'a SchemaType) -> Self { Self { config, secrets, ty } }

    /// `params` are the extended parameters, secrets already resolved.
    ///
    /// The parameters seed the state and the last observation is layered on
    /// top; the provider id derived from the external name and any sensitive
    /// outputs kept in the connection secret follow. Attributes the schema
    /// does not define are dropped.
    pub async fn reconstruct(&self, mr: &ManagedResource, params: &AttributeMap) -> Result<ProviderState> {
        // observed values win; parameters fill what was never observed
        let mut attrs = mr.observed.attributes.clone();
        json::merge_missing(&mut attrs, params);

        if let Some(name) = mr.external_name() {
            match self.config.namer.provider_id(name, params) {
                Some(id) => {
                    attrs.insert(ID_ATTRIBUTE.to_string(), Json::String(id));
                }
                None => warn!(uid = %mr.identity.uid_string(), external_name = name, "cannot derive provider id"),
            }
        }

        if let Some(secret) = &mr.connection_secret {
            let bridge = SensitiveValueBridge::new(self.secrets, mr.identity.namespace.as_deref());
            let restored = bridge.fetch_into_observation(secret, &mut attrs).await?;
            if restored > 0 {
                debug!(uid = %mr.identity.uid_string(), restored, "restored sensitive outputs");
            }
        }

        let value = from_generic(&Json::Object(attrs), self.ty)?;
        let private = private_from_annotations(mr)?;
        Ok(ProviderState::new(DynamicValue::encode(&value, self.ty)?, private))
    }
}

/// Private blob stored base64-encoded in the managed resource annotations.
pub fn private_from_annotations(mr: &ManagedResource) -> Result<Vec<u8>> {
    match mr.observed.annotations.get(ANNOTATION_PRIVATE_RAW) {
        Some(raw) if !raw.is_empty() => {
            B64.decode(raw).map_err(|e| skyjet_core::Error::conversion(ANNOTATION_PRIVATE_RAW, format!("invalid base64: {e}")))
        }
        _ => Ok(Vec::new()),
    }
}

pub fn store_private(mr: &mut ManagedResource, private: &[u8]) {
    if private.is_empty() {
        mr.observed.annotations.remove(ANNOTATION_PRIVATE_RAW);
    } else {
        mr.observed.annotations.insert(ANNOTATION_PRIVATE_RAW.to_string(), B64.encode(private));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use skyjet_core::{ResourceIdentity, SecretReference};
    use skyjet_secrets::MemorySecretClient;
    use skyjet_value::{Attribute, Block, SchemaType, TypedValue};

    fn ty() -> SchemaType {
        Block::new()
            .with_attribute("id", Attribute::computed(SchemaType::String))
            .with_attribute("name", Attribute::required(SchemaType::String))
            .with_attribute("arn", Attribute::computed(SchemaType::String))
            .with_attribute("password", Attribute::optional(SchemaType::String).sensitive())
            .implied_type()
    }

    #[tokio::test]
    async fn cold_start_uses_parameters_only() {
        let secrets = MemorySecretClient::new();
        let cfg = ResourceConfig::new("mem_disk");
        let ty = ty();
        let mr = ManagedResource::new(ResourceIdentity::new([1u8; 16], "disk"), "Disk").with_parameters(json!({"name": "x", "bogus": 1}));
        let state = StateReconstructor::new(&cfg, &secrets, &ty).reconstruct(&mr, &mr.desired.parameters).await.unwrap();
        let v = state.value.decode(&ty).unwrap();
        assert_eq!(v.attribute("name"), Some(&TypedValue::string("x")));
        assert_eq!(v.attribute("id"), Some(&TypedValue::Null));
        assert!(v.attribute("bogus").is_none());
        assert!(state.private.is_empty());
    }

    #[tokio::test]
    async fn observation_id_and_secret_outputs_are_layered() {
        let secrets = MemorySecretClient::new();
        secrets.insert_value("team-a", "disk-conn", "attribute.password", "s3cr3t").await;
        let cfg = ResourceConfig::new("mem_disk");
        let ty = ty();
        let mut mr = ManagedResource::new(ResourceIdentity::new([1u8; 16], "disk"), "Disk").with_parameters(json!({"name": "x"}));
        mr.identity.namespace = Some("team-a".into());
        mr.connection_secret = Some(SecretReference { name: "disk-conn".into(), namespace: None });
        mr.observed.attributes = json!({"name": "y", "arn": "arn:disk"}).as_object().cloned().unwrap();
        mr.set_external_name("mem-7");
        store_private(&mut mr, b"opaque");

        let state = StateReconstructor::new(&cfg, &secrets, &ty).reconstruct(&mr, &mr.desired.parameters).await.unwrap();
        let v = state.value.decode(&ty).unwrap();
        assert_eq!(v.attribute("name"), Some(&TypedValue::string("y")));
        assert_eq!(v.attribute("id"), Some(&TypedValue::string("mem-7")));
        assert_eq!(v.attribute("arn"), Some(&TypedValue::string("arn:disk")));
        assert_eq!(v.attribute("password"), Some(&TypedValue::string("s3cr3t")));
        assert_eq!(state.private, b"opaque".to_vec());
    }

    #[tokio::test]
    async fn observed_values_win_and_parameters_fill_gaps() {
        let secrets = MemorySecretClient::new();
        let cfg = ResourceConfig::new("mem_disk");
        let ty = Block::new()
            .with_attribute("name", Attribute::required(SchemaType::String))
            .with_attribute("size", Attribute::optional(SchemaType::Number))
            .with_attribute("zone", Attribute::optional(SchemaType::String))
            .with_attribute("tags", Attribute::optional(SchemaType::map(SchemaType::String)))
            .implied_type();
        let mut mr = ManagedResource::new(ResourceIdentity::new([2u8; 16], "disk"), "Disk")
            .with_parameters(json!({"name": "wanted", "size": 20, "zone": "z-1", "tags": {"env": "dev", "team": "core"}}));
        mr.observed.attributes = json!({"name": "actual", "size": 10, "zone": null, "tags": {"env": "prod"}}).as_object().cloned().unwrap();

        let state = StateReconstructor::new(&cfg, &secrets, &ty).reconstruct(&mr, &mr.desired.parameters).await.unwrap();
        let v = state.value.decode(&ty).unwrap();
        assert_eq!(v.attribute("name"), Some(&TypedValue::string("actual")));
        assert_eq!(v.attribute("size"), Some(&TypedValue::number(10)));
        assert_eq!(v.attribute("zone"), Some(&TypedValue::string("z-1")));
        let tags = v.attribute("tags").unwrap();
        assert_eq!(skyjet_value::to_generic(tags).unwrap(), json!({"env": "prod", "team": "core"}));
    }
}
