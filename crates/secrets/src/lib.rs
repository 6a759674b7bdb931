//! Sensitive values: moving secret-backed fields between a secret store and
//! provider call parameters or observations.
//!
//! A [`FieldMapping`] pairs a provider attribute path with the spec path
//! holding the secret reference for it. Either side may carry wildcard
//! segments, which expand against the live shape of the tree at call time
//! and are bound pairwise (`users[*].password` ← `databaseUsers[*].passwordSecretRef`).

#![forbid(unsafe_code)]

mod client;

use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info};

use skyjet_core::{
    AttributeMap, ConnectionDetails, Error, FieldPath, Result, SecretKeySelector, SecretReference, Segment,
};

pub use client::{MemorySecretClient, SecretClient};

/// Prefix of connection secret keys that carry sensitive attributes.
pub const ATTRIBUTE_KEY_PREFIX: &str = "attribute.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    /// Location in the provider's attribute tree.
    pub provider_path: FieldPath,
    /// Location of the secret reference in the spec parameters.
    pub spec_path: FieldPath,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMapping {
    entries: Vec<MappingEntry>,
}

impl FieldMapping {
    pub fn new() -> Self { Self::default() }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self> {
        let mut m = Self::new();
        for (p, s) in pairs { m = m.with(p, s)?; }
        Ok(m)
    }

    pub fn with(mut self, provider_path: &str, spec_path: &str) -> Result<Self> {
        let provider_path = FieldPath::parse(provider_path)?;
        let spec_path = FieldPath::parse(spec_path)?;
        let count = |p: &FieldPath| p.segments().iter().filter(|s| matches!(s, Segment::Wildcard)).count();
        if count(&provider_path) != count(&spec_path) {
            return Err(Error::field_path(&provider_path, format!("wildcards do not line up with {spec_path}")));
        }
        self.entries.push(MappingEntry { provider_path, spec_path });
        Ok(self)
    }

    pub fn entries(&self) -> &[MappingEntry] { &self.entries }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

/// Whether secret values may replace values already present in the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    Overwrite,
    OnlyUnset,
}

/// Resolves secret references for one managed resource.
pub struct SensitiveValueBridge<'a> {
    client: &'a dyn SecretClient,
    /// Namespace applied to references that do not name one.
    default_namespace: Option<&'a str>,
}

impl<'a> SensitiveValueBridge<'a> {
    pub fn new(client: &'a dyn SecretClient, default_namespace: Option<&'a str>) -> Self { Self { client, default_namespace } }

    /// Resolve every secret reference named by `mapping` in `source` and set
    /// the values at the matching provider paths of `target`. Returns the
    /// number of values written.
    pub async fn fetch_into_parameters(
        &self,
        source: &AttributeMap,
        target: &mut AttributeMap,
        mapping: &FieldMapping,
        mode: FillMode,
    ) -> Result<usize> {
        let t0 = Instant::now();
        let source = Value::Object(source.clone());
        let mut tree = Value::Object(std::mem::take(target));
        let mut written = 0usize;
        let outcome = async {
            for entry in mapping.entries() {
                for concrete in entry.spec_path.expand_wildcards(&source) {
                    let Some(reference) = concrete.get(&source).filter(|v| !v.is_null()) else { continue };
                    let bindings = FieldPath::wildcard_bindings(&entry.spec_path, &concrete);
                    let dest = entry.provider_path.bind_wildcards(&bindings)?;
                    if mode == FillMode::OnlyUnset && dest.get(&tree).map(|v| !v.is_null()).unwrap_or(false) {
                        continue;
                    }
                    let value = self.resolve(&concrete, reference).await?;
                    dest.set(&mut tree, value)?;
                    written += 1;
                }
            }
            Ok::<_, Error>(())
        }
        .await;
        if let Value::Object(m) = tree { *target = m; }
        outcome?;
        if written > 0 {
            info!(count = written, took_ms = %t0.elapsed().as_millis(), "secrets: fetched into parameters");
        }
        Ok(written)
    }

    async fn resolve(&self, at: &FieldPath, reference: &Value) -> Result<Value> {
        let ns = |explicit: Option<String>| explicit.or_else(|| self.default_namespace.map(str::to_string));
        let bad = |reason: String| Error::Secret { reference: at.to_string(), reason };
        if reference.get("key").is_some() {
            let mut sel: SecretKeySelector =
                serde_json::from_value(reference.clone()).map_err(|e| bad(format!("malformed secret key selector: {e}")))?;
            sel.namespace = ns(sel.namespace);
            let raw = self.client.get_secret_value(&sel).await?;
            metrics::counter!("skyjet_secret_reads_total", 1u64);
            let text = String::from_utf8(raw).map_err(|_| bad("secret value is not valid UTF-8".into()))?;
            return Ok(Value::String(text));
        }
        let mut r: SecretReference =
            serde_json::from_value(reference.clone()).map_err(|e| bad(format!("malformed secret reference: {e}")))?;
        r.namespace = ns(r.namespace);
        let data = self
            .client
            .get_secret_data(&r)
            .await?
            .ok_or_else(|| bad(format!("secret {} not found", r.name)))?;
        metrics::counter!("skyjet_secret_reads_total", 1u64);
        let mut out = AttributeMap::new();
        for (k, v) in data {
            out.insert(k, Value::String(String::from_utf8_lossy(&v).into_owned()));
        }
        Ok(Value::Object(out))
    }

    /// Restore sensitive attributes stored in a connection secret into
    /// `target`. Keys are encoded field paths under [`ATTRIBUTE_KEY_PREFIX`];
    /// other keys are ignored. A missing secret restores nothing.
    pub async fn fetch_into_observation(&self, secret: &SecretReference, target: &mut AttributeMap) -> Result<usize> {
        let mut r = secret.clone();
        if r.namespace.is_none() { r.namespace = self.default_namespace.map(str::to_string); }
        let Some(data) = self.client.get_secret_data(&r).await? else {
            debug!(secret = %r.name, "connection secret not found; nothing to restore");
            return Ok(0);
        };
        let mut tree = Value::Object(std::mem::take(target));
        let mut restored = 0usize;
        let outcome = (|| {
            let mut decoded = Vec::new();
            for (key, raw) in data.iter() {
                let Some(encoded) = key.strip_prefix(ATTRIBUTE_KEY_PREFIX) else { continue };
                decoded.push((FieldPath::from_secret_key(encoded)?, raw));
            }
            // numeric order, so "users.10" lands after "users.2"
            decoded.sort_by(|a, b| a.0.cmp(&b.0));
            for (path, raw) in decoded {
                path.set(&mut tree, Value::String(String::from_utf8_lossy(raw).into_owned()))?;
                restored += 1;
            }
            Ok::<_, Error>(())
        })();
        if let Value::Object(m) = tree { *target = m; }
        outcome?;
        Ok(restored)
    }
}

/// Read sensitive values out of `observed` as connection details, keyed by
/// [`ATTRIBUTE_KEY_PREFIX`] plus the encoded attribute path. Map values
/// expand into one key per entry.
pub fn extract_connection_details(observed: &AttributeMap, mapping: &FieldMapping) -> ConnectionDetails {
    let tree = Value::Object(observed.clone());
    let mut out = ConnectionDetails::new();
    for entry in mapping.entries() {
        for concrete in entry.provider_path.expand_wildcards(&tree) {
            let Some(v) = concrete.get(&tree) else { continue };
            match v {
                Value::Null => {}
                Value::Object(m) => {
                    for (k, x) in m.iter() {
                        if let Some(bytes) = scalar_bytes(x) {
                            out.insert(secret_key(&concrete.child_field(k.clone())), bytes);
                        }
                    }
                }
                x => {
                    if let Some(bytes) = scalar_bytes(x) { out.insert(secret_key(&concrete), bytes); }
                }
            }
        }
    }
    out
}

/// Remove every sensitive attribute named by `mapping` from `observed`.
pub fn strip_sensitive(observed: &mut AttributeMap, mapping: &FieldMapping) {
    let mut tree = Value::Object(std::mem::take(observed));
    for entry in mapping.entries() {
        for concrete in entry.provider_path.expand_wildcards(&tree) { concrete.remove(&mut tree); }
    }
    if let Value::Object(m) = tree { *observed = m; }
}

fn secret_key(path: &FieldPath) -> String { format!("{ATTRIBUTE_KEY_PREFIX}{}", path.to_secret_key()) }

fn scalar_bytes(v: &Value) -> Option<Vec<u8>> {
    match v {
        Value::String(s) => Some(s.as_bytes().to_vec()),
        Value::Number(n) => Some(n.to_string().into_bytes()),
        Value::Bool(b) => Some(b.to_string().into_bytes()),
        _ => None,
    }
}
