//! In-memory provider server for tests and local experiments.
//!
//! Objects live in a map keyed by type name and `id`. The provider fills
//! computed attributes on create, honours force-new attributes during plan
//! and supports injected apply delays and failures.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use skyjet_core::{AttributeMap, Error, Result};
use skyjet_value::{AttributePath, DynamicValue, ResourceSchema, SchemaType, TypedValue};

use crate::server::{
    ApplyResourceChangeRequest, ApplyResourceChangeResponse, PlanResourceChangeRequest, PlanResourceChangeResponse,
    ProviderServer, ReadResourceRequest, ReadResourceResponse,
};
use crate::{Diagnostic, Diagnostics};

/// Private blob handed out with every state.
pub const MEMORY_PRIVATE: &[u8] = b"{\"memory\":1}";

/// Injected outcome of the next apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyFailure {
    /// Fail without creating or changing anything.
    Error(String),
    /// Perform the change, then report an error alongside the new state.
    Partial(String),
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<(String, String), TypedValue>,
    fail_next_apply: Option<ApplyFailure>,
    apply_delay: Option<Duration>,
    read_delay: Option<Duration>,
    configure_error: Option<String>,
}

#[derive(Default)]
pub struct MemoryProvider {
    schemas: BTreeMap<String, ResourceSchema>,
    force_new: BTreeMap<String, BTreeSet<String>>,
    not_found_as_error: bool,
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    applies: AtomicUsize,
    reads: AtomicUsize,
    plans: AtomicUsize,
}

impl MemoryProvider {
    pub fn new() -> Self { Self::default() }

    pub fn with_resource(mut self, type_name: impl Into<String>, schema: ResourceSchema) -> Self {
        self.schemas.insert(type_name.into(), schema);
        self
    }

    /// Changing `attribute` forces replacement. The provider reports the
    /// attribute on every plan of an existing object, changed or not.
    pub fn with_force_new(mut self, type_name: &str, attribute: &str) -> Self {
        self.force_new.entry(type_name.to_string()).or_default().insert(attribute.to_string());
        self
    }

    /// Report reads of missing objects as an error diagnostic instead of a
    /// null state.
    pub fn with_not_found_errors(mut self) -> Self {
        self.not_found_as_error = true;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> { self.inner.lock().unwrap_or_else(|e| e.into_inner()) }

    pub fn set_apply_delay(&self, delay: Option<Duration>) { self.lock().apply_delay = delay; }

    pub fn set_read_delay(&self, delay: Option<Duration>) { self.lock().read_delay = delay; }

    pub fn fail_next_apply(&self, failure: ApplyFailure) { self.lock().fail_next_apply = Some(failure); }

    pub fn reject_configuration(&self, reason: impl Into<String>) { self.lock().configure_error = Some(reason.into()); }

    pub fn insert_object(&self, type_name: &str, id: &str, value: TypedValue) {
        self.lock().objects.insert((type_name.to_string(), id.to_string()), value);
    }

    /// Remove an object behind the engine's back.
    pub fn remove_object(&self, type_name: &str, id: &str) -> Option<TypedValue> {
        self.lock().objects.remove(&(type_name.to_string(), id.to_string()))
    }

    pub fn object(&self, type_name: &str, id: &str) -> Option<TypedValue> {
        self.lock().objects.get(&(type_name.to_string(), id.to_string())).cloned()
    }

    pub fn object_count(&self) -> usize { self.lock().objects.len() }

    pub fn apply_count(&self) -> usize { self.applies.load(Ordering::SeqCst) }
    pub fn read_count(&self) -> usize { self.reads.load(Ordering::SeqCst) }
    pub fn plan_count(&self) -> usize { self.plans.load(Ordering::SeqCst) }

    fn schema(&self, type_name: &str) -> Result<(&ResourceSchema, SchemaType)> {
        let s = self
            .schemas
            .get(type_name)
            .ok_or_else(|| Error::Other(anyhow::anyhow!("unknown resource type {type_name}")))?;
        Ok((s, s.implied_type()))
    }

    /// Replace unknown computed values with provider-assigned ones.
    fn settle(&self, schema: &ResourceSchema, planned: &TypedValue, id: &str) -> TypedValue {
        let Some(attrs) = planned.attributes() else { return planned.clone() };
        let mut out = attrs.clone();
        for (name, v) in out.iter_mut() {
            if !v.is_unknown() { continue; }
            *v = match schema.block.attributes.get(name).map(|a| a.value_type()) {
                _ if name == "id" => TypedValue::string(id),
                Some(SchemaType::Number) => TypedValue::number(0),
                Some(SchemaType::Bool) => TypedValue::Bool(false),
                _ => TypedValue::string(format!("{name}-{id}")),
            };
        }
        TypedValue::Object(out)
    }
}

fn id_of(v: &TypedValue) -> Option<String> { v.attribute("id").and_then(|x| x.as_str()).map(str::to_string) }

#[async_trait]
impl ProviderServer for MemoryProvider {
    async fn configure_provider(&self, _config: &AttributeMap) -> Result<Diagnostics> {
        let mut d = Diagnostics::new();
        if let Some(reason) = self.lock().configure_error.clone() {
            d.push(Diagnostic::error("invalid provider configuration").with_detail(reason));
        }
        Ok(d)
    }

    async fn get_resource_schema(&self, type_name: &str) -> Result<ResourceSchema> {
        self.schema(type_name).map(|(s, _)| s.clone())
    }

    async fn read_resource(&self, req: ReadResourceRequest) -> Result<ReadResourceResponse> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let delay = self.lock().read_delay;
        if let Some(d) = delay { tokio::time::sleep(d).await; }
        let (_, ty) = self.schema(&req.type_name)?;
        let current = req.current_state.decode(&ty)?;
        let Some(id) = id_of(&current) else {
            return Ok(ReadResourceResponse::default());
        };
        let found = self.object(&req.type_name, &id);
        match found {
            Some(obj) => Ok(ReadResourceResponse {
                new_state: DynamicValue::encode(&obj, &ty)?,
                private: MEMORY_PRIVATE.to_vec(),
                diagnostics: Diagnostics::new(),
            }),
            None if self.not_found_as_error => {
                let mut d = Diagnostics::new();
                d.push(Diagnostic::error("resource not found").with_detail(format!("{} {id} does not exist", req.type_name)));
                Ok(ReadResourceResponse { diagnostics: d, ..Default::default() })
            }
            None => Ok(ReadResourceResponse::default()),
        }
    }

    async fn plan_resource_change(&self, req: PlanResourceChangeRequest) -> Result<PlanResourceChangeResponse> {
        self.plans.fetch_add(1, Ordering::SeqCst);
        let (schema, ty) = self.schema(&req.type_name)?;
        let prior = req.prior_state.decode(&ty)?;
        let proposed = req.proposed_new_state.decode(&ty)?;
        if proposed.is_null() {
            return Ok(PlanResourceChangeResponse::default());
        }
        let Some(attrs) = proposed.attributes() else {
            return Err(Error::conversion("", "proposed state is not an object"));
        };
        let mut planned = attrs.clone();
        for (name, a) in schema.block.attributes.iter() {
            if a.computed && planned.get(name).map(TypedValue::is_null).unwrap_or(true) {
                planned.insert(name.clone(), TypedValue::Unknown);
            }
        }
        let mut requires_replace = Vec::new();
        if !prior.is_null() {
            for attr in self.force_new.get(&req.type_name).into_iter().flatten() {
                requires_replace.push(AttributePath::root().attribute(attr.clone()));
            }
        }
        let planned = TypedValue::Object(planned);
        Ok(PlanResourceChangeResponse {
            planned_state: DynamicValue::encode(&planned, &ty)?,
            requires_replace,
            planned_private: req.prior_private,
            diagnostics: Diagnostics::new(),
        })
    }

    async fn apply_resource_change(&self, req: ApplyResourceChangeRequest) -> Result<ApplyResourceChangeResponse> {
        self.applies.fetch_add(1, Ordering::SeqCst);
        let (delay, failure) = {
            let mut g = self.lock();
            (g.apply_delay, g.fail_next_apply.take())
        };
        if let Some(d) = delay { tokio::time::sleep(d).await; }
        let (schema, ty) = self.schema(&req.type_name)?;
        let prior = req.prior_state.decode(&ty)?;
        let planned = req.planned_state.decode(&ty)?;

        if let Some(ApplyFailure::Error(msg)) = &failure {
            let mut d = Diagnostics::new();
            d.push(Diagnostic::error(msg.clone()));
            return Ok(ApplyResourceChangeResponse { new_state: req.prior_state, private: req.planned_private, diagnostics: d });
        }

        let mut diagnostics = Diagnostics::new();
        if let Some(ApplyFailure::Partial(msg)) = failure {
            diagnostics.push(Diagnostic::error(msg));
        }
        if planned.is_null() {
            if let Some(id) = id_of(&prior) {
                self.remove_object(&req.type_name, &id);
                debug!(type_name = %req.type_name, id = %id, "memory: deleted");
            }
            return Ok(ApplyResourceChangeResponse { new_state: DynamicValue::null(), private: Vec::new(), diagnostics });
        }
        let id = id_of(&prior)
            .or_else(|| id_of(&planned))
            .unwrap_or_else(|| format!("mem-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1));
        let settled = self.settle(schema, &planned, &id);
        self.insert_object(&req.type_name, &id, settled.clone());
        debug!(type_name = %req.type_name, id = %id, "memory: applied");
        Ok(ApplyResourceChangeResponse {
            new_state: DynamicValue::encode(&settled, &ty)?,
            private: MEMORY_PRIVATE.to_vec(),
            diagnostics,
        })
    }
}
