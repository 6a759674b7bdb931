//! Per-resource-type inputs to the external client.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as Json;

use skyjet_bridge::Diagnostics;
use skyjet_core::{AttributeMap, ConnectionDetails, FieldPath, ManagedResource, Result};
use skyjet_lateinit::{LateInitializer, NameFilter, ZeroValueFilter};
use skyjet_secrets::FieldMapping;
use skyjet_value::ResourceSchema;

/// Provider attribute holding the provider-side identifier.
pub const ID_ATTRIBUTE: &str = "id";

/// Maps between the external name of a resource and its provider identity.
pub trait ExternalNamer: Send + Sync {
    /// External name derived from observed attributes.
    fn external_name(&self, observed: &AttributeMap) -> Option<String>;

    /// Provider identifier for an external name.
    fn provider_id(&self, external_name: &str, params: &AttributeMap) -> Option<String>;

    /// Write identifying fields into the parameters sent to the provider.
    fn set_identifier(&self, _params: &mut AttributeMap, _external_name: Option<&str>) {}
}

fn id_of(observed: &AttributeMap) -> Option<String> {
    observed.get(ID_ATTRIBUTE).and_then(Json::as_str).filter(|s| !s.is_empty()).map(str::to_string)
}

/// The provider assigns the identifier; the external name is the `id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentifierFromProvider;

impl ExternalNamer for IdentifierFromProvider {
    fn external_name(&self, observed: &AttributeMap) -> Option<String> { id_of(observed) }

    fn provider_id(&self, external_name: &str, _params: &AttributeMap) -> Option<String> { Some(external_name.to_string()) }
}

/// The external name is written into a name argument and doubles as the id.
#[derive(Debug, Clone)]
pub struct NameAsIdentifier {
    pub field: String,
}

impl NameAsIdentifier {
    pub fn new(field: impl Into<String>) -> Self { Self { field: field.into() } }
}

impl ExternalNamer for NameAsIdentifier {
    fn external_name(&self, observed: &AttributeMap) -> Option<String> {
        observed.get(&self.field).and_then(Json::as_str).filter(|s| !s.is_empty()).map(str::to_string).or_else(|| id_of(observed))
    }

    fn provider_id(&self, external_name: &str, _params: &AttributeMap) -> Option<String> { Some(external_name.to_string()) }

    fn set_identifier(&self, params: &mut AttributeMap, external_name: Option<&str>) {
        if let Some(name) = external_name {
            params.insert(self.field.clone(), Json::String(name.to_string()));
        }
    }
}

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*\.([A-Za-z_][A-Za-z0-9_]*)(?:\.([A-Za-z_][A-Za-z0-9_]*))?\s*\}\}").expect("placeholder pattern")
});

/// The provider id is rendered from a template such as
/// `{{ .parameters.region }}/{{ .external_name }}`; the external name is the
/// last `/` segment of the id.
#[derive(Debug, Clone)]
pub struct TemplatedIdentifier {
    pub template: String,
}

impl TemplatedIdentifier {
    pub fn new(template: impl Into<String>) -> Self { Self { template: template.into() } }

    /// `None` when a referenced parameter is missing or not a scalar.
    pub fn render(&self, external_name: &str, params: &AttributeMap) -> Option<String> {
        let mut missing = false;
        let out = PLACEHOLDER.replace_all(&self.template, |c: &regex::Captures<'_>| {
            let value = match (&c[1], c.get(2).map(|m| m.as_str())) {
                ("external_name", None) => Some(external_name.to_string()),
                ("parameters", Some(field)) => match params.get(field) {
                    Some(Json::String(s)) => Some(s.clone()),
                    Some(Json::Number(n)) => Some(n.to_string()),
                    Some(Json::Bool(b)) => Some(b.to_string()),
                    _ => None,
                },
                _ => None,
            };
            value.unwrap_or_else(|| {
                missing = true;
                String::new()
            })
        });
        if missing { None } else { Some(out.into_owned()) }
    }
}

impl ExternalNamer for TemplatedIdentifier {
    fn external_name(&self, observed: &AttributeMap) -> Option<String> {
        id_of(observed).and_then(|id| id.rsplit('/').next().map(str::to_string))
    }

    fn provider_id(&self, external_name: &str, params: &AttributeMap) -> Option<String> { self.render(external_name, params) }
}

/// Decides whether error diagnostics of a read mean the resource is gone.
pub trait NotFoundPredicate: Send + Sync {
    fn is_not_found(&self, diags: &Diagnostics) -> bool;
}

/// Every error diagnostic is a real failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverNotFound;

impl NotFoundPredicate for NeverNotFound {
    fn is_not_found(&self, _diags: &Diagnostics) -> bool { false }
}

/// Not found when every error diagnostic mentions one of the patterns,
/// case-insensitively, in its summary or detail.
#[derive(Debug, Clone, Default)]
pub struct MessageNotFound {
    patterns: Vec<String>,
}

impl MessageNotFound {
    pub fn new<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Self {
        Self { patterns: patterns.into_iter().map(str::to_ascii_lowercase).collect() }
    }
}

impl NotFoundPredicate for MessageNotFound {
    fn is_not_found(&self, diags: &Diagnostics) -> bool {
        let mut errors = diags.errors().peekable();
        if errors.peek().is_none() { return false; }
        errors.all(|d| {
            let text = format!("{} {}", d.summary, d.detail).to_ascii_lowercase();
            self.patterns.iter().any(|p| text.contains(p.as_str()))
        })
    }
}

/// Adjusts the parameters sent to the provider after secrets and
/// identifiers are merged in.
pub type ConfigInjector = Arc<dyn Fn(&mut AttributeMap, &ManagedResource) -> Result<()> + Send + Sync>;

/// Extra connection details derived from observed attributes.
pub type ConnectionDetailsFn = Arc<dyn Fn(&AttributeMap) -> Result<ConnectionDetails> + Send + Sync>;

/// Everything the engine needs to know about one resource type beyond its
/// provider schema.
#[derive(Clone)]
pub struct ResourceConfig {
    pub type_name: String,
    pub namer: Arc<dyn ExternalNamer>,
    /// Provider attribute path to spec path, for secret-backed fields.
    pub sensitive: FieldMapping,
    /// Fields never late-initialized.
    pub late_init_ignore: Vec<FieldPath>,
    /// Fields whose zero values are not late-initialized.
    pub omit_empty: Vec<FieldPath>,
    pub not_found: Arc<dyn NotFoundPredicate>,
    pub injector: Option<ConfigInjector>,
    pub additional_connection_details: Option<ConnectionDetailsFn>,
}

impl fmt::Debug for ResourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceConfig")
            .field("type_name", &self.type_name)
            .field("sensitive", &self.sensitive)
            .field("late_init_ignore", &self.late_init_ignore)
            .field("omit_empty", &self.omit_empty)
            .field("injector", &self.injector.is_some())
            .finish_non_exhaustive()
    }
}

impl ResourceConfig {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            namer: Arc::new(IdentifierFromProvider),
            sensitive: FieldMapping::new(),
            late_init_ignore: Vec::new(),
            omit_empty: Vec::new(),
            not_found: Arc::new(NeverNotFound),
            injector: None,
            additional_connection_details: None,
        }
    }

    pub fn with_namer(mut self, namer: impl ExternalNamer + 'static) -> Self {
        self.namer = Arc::new(namer);
        self
    }

    pub fn with_sensitive(mut self, mapping: FieldMapping) -> Self {
        self.sensitive = mapping;
        self
    }

    pub fn with_not_found(mut self, p: impl NotFoundPredicate + 'static) -> Self {
        self.not_found = Arc::new(p);
        self
    }

    pub fn ignore_late_init(mut self, path: FieldPath) -> Self {
        self.late_init_ignore.push(path);
        self
    }

    pub fn omit_empty(mut self, path: FieldPath) -> Self {
        self.omit_empty.push(path);
        self
    }

    pub fn with_injector(mut self, f: impl Fn(&mut AttributeMap, &ManagedResource) -> Result<()> + Send + Sync + 'static) -> Self {
        self.injector = Some(Arc::new(f));
        self
    }

    pub fn with_connection_details(mut self, f: impl Fn(&AttributeMap) -> Result<ConnectionDetails> + Send + Sync + 'static) -> Self {
        self.additional_connection_details = Some(Arc::new(f));
        self
    }

    /// Late-initializer for this type. Provider-computed attributes,
    /// attributes set through init-parameters, sensitive attributes and the
    /// configured ignores are never copied into the spec.
    pub fn late_initializer(&self, schema: &ResourceSchema, init_only: &[String]) -> LateInitializer {
        let mut skip: Vec<FieldPath> = schema.block.computed_only_attributes().into_iter().map(|a| FieldPath::root().child_field(a)).collect();
        skip.extend(init_only.iter().map(|k| FieldPath::root().child_field(k.clone())));
        skip.extend(self.sensitive.entries().iter().map(|e| e.provider_path.clone()));
        skip.extend(self.late_init_ignore.iter().cloned());
        let mut li = LateInitializer::new().with_filter(NameFilter::new(skip));
        if !self.omit_empty.is_empty() {
            li = li.with_filter(ZeroValueFilter::for_paths(self.omit_empty.iter().cloned()));
        }
        li
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use skyjet_bridge::Diagnostic;

    fn map(v: Json) -> AttributeMap { v.as_object().cloned().unwrap() }

    #[test]
    fn namers_derive_names_and_ids() {
        let observed = map(json!({"id": "vpc-123", "name": "main"}));
        assert_eq!(IdentifierFromProvider.external_name(&observed).as_deref(), Some("vpc-123"));
        assert_eq!(NameAsIdentifier::new("name").external_name(&observed).as_deref(), Some("main"));

        let mut params = map(json!({"region": "eu-west-1"}));
        NameAsIdentifier::new("bucket").set_identifier(&mut params, Some("logs"));
        assert_eq!(params["bucket"], json!("logs"));
    }

    #[test]
    fn templated_identifier_renders_parameters() {
        let t = TemplatedIdentifier::new("projects/{{ .parameters.project }}/zones/{{.external_name}}");
        let params = map(json!({"project": "p1"}));
        assert_eq!(t.provider_id("zone-a", &params).as_deref(), Some("projects/p1/zones/zone-a"));
        assert_eq!(t.provider_id("zone-a", &AttributeMap::new()), None);
        assert_eq!(t.external_name(&map(json!({"id": "projects/p1/zones/zone-a"}))).as_deref(), Some("zone-a"));
    }

    #[test]
    fn not_found_needs_matching_error_diagnostics() {
        let p = MessageNotFound::new(["not found", "NoSuchBucket"]);
        assert!(!p.is_not_found(&Diagnostics::new()));
        let mut d = Diagnostics::new();
        d.push(Diagnostic::warning("something"));
        assert!(!p.is_not_found(&d));
        d.push(Diagnostic::error("reading bucket").with_detail("NoSuchBucket: gone"));
        assert!(p.is_not_found(&d));
        d.push(Diagnostic::error("AccessDenied"));
        assert!(!p.is_not_found(&d));
        assert!(!NeverNotFound.is_not_found(&d));
    }
}
