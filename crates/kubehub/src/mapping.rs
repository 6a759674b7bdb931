//! Managed resource objects as seen by the engine.
//!
//! Desired state lives in `spec.forProvider` and `spec.initProvider`, the
//! last observation in `status.atProvider`, and the external name plus the
//! provider's private blob in annotations.

use std::collections::BTreeMap;

use anyhow::{anyhow, Context};
use kube::core::DynamicObject;
use serde_json::{json, Value as Json};

use skyjet_core::{
    parse_uid, AttributeMap, Condition, ManagedResource, ResourceIdentity, Result, SecretReference, ANNOTATION_EXTERNAL_NAME,
};

fn object_at(v: &Json, path: &[&str]) -> AttributeMap {
    let mut cur = v;
    for p in path {
        match cur.get(*p) {
            Some(next) => cur = next,
            None => return AttributeMap::new(),
        }
    }
    cur.as_object().cloned().unwrap_or_default()
}

pub fn managed_from_dynamic(obj: &DynamicObject) -> Result<ManagedResource> {
    let meta = &obj.metadata;
    let name = meta.name.clone().ok_or_else(|| anyhow!("object missing metadata.name"))?;
    let uid_str = meta.uid.as_deref().ok_or_else(|| anyhow!("object {name} missing metadata.uid"))?;
    let uid = parse_uid(uid_str).with_context(|| format!("object {name}"))?;

    let mut identity = ResourceIdentity::new(uid, name);
    identity.namespace = meta.namespace.clone();
    let annotations: BTreeMap<String, String> = meta.annotations.clone().unwrap_or_default();
    identity.external_name = annotations.get(ANNOTATION_EXTERNAL_NAME).filter(|s| !s.is_empty()).cloned();

    let kind = obj.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default();
    let mut mr = ManagedResource::new(identity, kind);
    mr.desired.parameters = object_at(&obj.data, &["spec", "forProvider"]);
    mr.desired.init_parameters = object_at(&obj.data, &["spec", "initProvider"]);
    mr.observed.attributes = object_at(&obj.data, &["status", "atProvider"]);
    mr.observed.annotations = annotations;
    mr.deleting = meta.deletion_timestamp.is_some();

    let secret_ref = object_at(&obj.data, &["spec", "writeConnectionSecretToRef"]);
    if let Some(name) = secret_ref.get("name").and_then(Json::as_str) {
        let namespace = secret_ref.get("namespace").and_then(Json::as_str).map(str::to_string).or_else(|| meta.namespace.clone());
        mr.connection_secret = Some(SecretReference { name: name.to_string(), namespace });
    }
    Ok(mr)
}

/// Merge patch for the status subresource.
pub fn status_patch(mr: &ManagedResource, conditions: &[Condition]) -> Json {
    json!({
        "status": {
            "atProvider": Json::Object(mr.observed.attributes.clone()),
            "conditions": conditions,
        }
    })
}

/// Merge patch writing the desired parameters back, as after late-init.
pub fn spec_patch(mr: &ManagedResource) -> Json {
    json!({ "spec": { "forProvider": Json::Object(mr.desired.parameters.clone()) } })
}

/// Merge patch for the annotations, external name included.
pub fn metadata_patch(mr: &ManagedResource) -> Json {
    let mut annotations = mr.observed.annotations.clone();
    if let Some(n) = mr.external_name() {
        annotations.insert(ANNOTATION_EXTERNAL_NAME.to_string(), n.to_string());
    }
    json!({ "metadata": { "annotations": annotations } })
}
