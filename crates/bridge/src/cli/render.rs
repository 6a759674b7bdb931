//! Rendering of the configuration and state documents a CLI workspace holds.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde_json::{json, Value as Json};

use skyjet_core::{AttributeMap, Error, Result, Uid};

use crate::ProviderSetup;

/// Name of the single resource block in every workspace.
pub const RESOURCE_NAME: &str = "resource";

const DEFAULT_REGISTRY: &str = "registry.terraform.io";

/// Provider local name: the resource type up to its first `_`.
pub fn provider_local_name(type_name: &str) -> &str { type_name.split('_').next().unwrap_or(type_name) }

/// Fully qualified provider address; bare `namespace/name` sources live on
/// the default registry.
pub fn provider_address(source: &str) -> String {
    if source.split('/').count() >= 3 { source.to_string() } else { format!("{DEFAULT_REGISTRY}/{source}") }
}

/// `main.tf.json` for one resource. Without `config` only the provider is
/// declared, which is enough for `init` and schema queries.
pub fn render_main(type_name: &str, setup: &ProviderSetup, config: Option<&AttributeMap>) -> Json {
    let local = provider_local_name(type_name);
    let mut requirement = json!({ "source": setup.source });
    if let Some(v) = &setup.version {
        requirement["version"] = json!(v);
    }
    let mut doc = json!({
        "terraform": { "required_providers": { local: requirement } },
        "provider": { local: Json::Object(setup.configuration.clone()) },
    });
    if let Some(cfg) = config {
        let body: AttributeMap = cfg.iter().filter(|(_, v)| !v.is_null()).map(|(k, v)| (k.clone(), v.clone())).collect();
        doc["resource"] = json!({ type_name: { RESOURCE_NAME: Json::Object(body) } });
    }
    doc
}

/// Version 4 state document holding at most one resource instance.
pub fn render_state(
    type_name: &str,
    setup: &ProviderSetup,
    uid: &Uid,
    serial: u64,
    schema_version: i64,
    attributes: Option<&AttributeMap>,
    private: &[u8],
) -> Json {
    let resources = match attributes {
        None => Vec::new(),
        Some(attrs) => {
            let mut instance = json!({
                "schema_version": schema_version,
                "attributes": Json::Object(attrs.clone()),
                "sensitive_attributes": [],
            });
            if !private.is_empty() {
                instance["private"] = json!(B64.encode(private));
            }
            vec![json!({
                "mode": "managed",
                "type": type_name,
                "name": RESOURCE_NAME,
                "provider": format!("provider[\"{}\"]", provider_address(&setup.source)),
                "instances": [instance],
            })]
        }
    };
    json!({
        "version": 4,
        "serial": serial,
        "lineage": uuid::Uuid::from_bytes(*uid).to_string(),
        "outputs": {},
        "resources": resources,
    })
}

/// Attributes and private blob of the managed instance of `type_name`, or
/// `None` when the state holds no such instance.
pub fn parse_state(doc: &Json, type_name: &str) -> Result<Option<(AttributeMap, Vec<u8>)>> {
    let Some(resources) = doc.get("resources").and_then(Json::as_array) else { return Ok(None) };
    let found = resources.iter().find(|r| {
        r.get("mode").and_then(Json::as_str) == Some("managed")
            && r.get("type").and_then(Json::as_str) == Some(type_name)
            && r.get("name").and_then(Json::as_str) == Some(RESOURCE_NAME)
    });
    let Some(instance) = found.and_then(|r| r.get("instances")).and_then(Json::as_array).and_then(|xs| xs.first()) else {
        return Ok(None);
    };
    let attrs = match instance.get("attributes") {
        Some(Json::Object(m)) => m.clone(),
        _ => return Ok(None),
    };
    let private = match instance.get("private").and_then(Json::as_str) {
        Some(s) => B64.decode(s).map_err(|e| Error::conversion("private", format!("invalid base64: {e}")))?,
        None => Vec::new(),
    };
    Ok(Some((attrs, private)))
}

/// Serial of an existing state document, 0 when absent.
pub fn state_serial(doc: Option<&Json>) -> u64 { doc.and_then(|d| d.get("serial")).and_then(Json::as_u64).unwrap_or(0) }
