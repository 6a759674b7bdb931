//! Observe/Create/Update/Delete against one managed resource.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use metrics::{counter, histogram};
use tracing::{debug, info, warn};

use skyjet_bridge::{Planned, ProviderBridge};
use skyjet_core::{AttributeMap, ConnectionDetails, Error, ManagedResource, OperationType, Result, Uid};
use skyjet_diff::{evaluate, DiffResult};
use skyjet_secrets::{extract_connection_details, strip_sensitive};
use skyjet_tracker::OperationTracker;
use skyjet_value::{map_to_typed, typed_to_map, ProviderState, TypedValue};

use crate::config::ResourceConfig;
use crate::reconstruct::store_private;

/// Outcome of an observe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observation {
    pub exists: bool,
    pub up_to_date: bool,
    /// The spec changed (late-initialized fields or a new external name)
    /// and must be persisted before the next operation.
    pub late_initialized: bool,
    pub connection_details: ConnectionDetails,
    pub diff: DiffResult,
}

impl Observation {
    pub fn absent() -> Self { Self::default() }

    /// Reported while an operation is running, without asking the provider.
    pub fn placeholder() -> Self { Self { exists: true, up_to_date: true, ..Default::default() } }
}

/// Outcome of a successful create or update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Applied {
    pub connection_details: ConnectionDetails,
    pub external_name: Option<String>,
}

/// Plan computed by the last observe, consumed by create/update.
#[derive(Debug, Clone)]
struct RetainedPlan {
    planned: Planned,
    diff: DiffResult,
}

/// Client for one managed resource, built per reconcile by the connector.
/// Clones share the retained plan and the tracker.
#[derive(Clone)]
pub struct ExternalClient {
    bridge: Arc<dyn ProviderBridge>,
    tracker: Arc<OperationTracker>,
    resource: Arc<ResourceConfig>,
    params: Arc<AttributeMap>,
    init_only: Arc<Vec<String>>,
    observe_timeout: Option<Duration>,
    retained: Arc<Mutex<Option<RetainedPlan>>>,
}

impl ExternalClient {
    pub fn new(
        bridge: Arc<dyn ProviderBridge>,
        tracker: Arc<OperationTracker>,
        resource: Arc<ResourceConfig>,
        params: AttributeMap,
        init_only: Vec<String>,
        observe_timeout: Option<Duration>,
    ) -> Self {
        Self {
            bridge,
            tracker,
            resource,
            params: Arc::new(params),
            init_only: Arc::new(init_only),
            observe_timeout,
            retained: Arc::new(Mutex::new(None)),
        }
    }

    pub fn tracker(&self) -> &Arc<OperationTracker> { &self.tracker }

    pub fn uid(&self) -> Uid { self.tracker.uid() }

    /// Extended parameters sent as configuration.
    pub fn parameters(&self) -> &AttributeMap { &self.params }

    fn retained(&self) -> MutexGuard<'_, Option<RetainedPlan>> { self.retained.lock().unwrap_or_else(|e| e.into_inner()) }

    fn prior_state(&self) -> ProviderState { self.tracker.state().map(|s| s.as_ref().clone()).unwrap_or_default() }

    fn config_value(&self) -> Result<TypedValue> { map_to_typed(&self.params, &self.bridge.value_type()) }

    async fn bounded<T>(&self, what: &str, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        match self.observe_timeout {
            None => fut.await,
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| Error::Other(anyhow!("{what} did not finish within {limit:?}")))?,
        }
    }

    pub async fn observe(&self, mr: &mut ManagedResource) -> Result<Observation> {
        let t0 = Instant::now();
        let uid = mr.identity.uid_string();
        if mr.deleting && self.tracker.is_deleted() {
            debug!(uid = %uid, "observe: already deleted");
            return Ok(Observation::absent());
        }

        let prior = self.prior_state();
        let read = self.bounded("read", self.bridge.read(&prior)).await?;
        let ty = self.bridge.value_type();
        let state = if read.diagnostics.has_errors() {
            if !self.resource.not_found.is_not_found(&read.diagnostics) {
                counter!("skyjet_observe_errors_total", 1u64);
                read.diagnostics.into_result("read")?;
            }
            debug!(uid = %uid, "observe: provider reports resource not found");
            self.tracker.reset_state();
            ProviderState::null()
        } else {
            self.tracker.set_state(read.new_state.clone());
            read.new_state
        };
        if !self.tracker.is_running() {
            self.tracker.clear(true);
        }

        let value = state.value.decode(&ty)?;
        let exists = !value.is_null();
        let mut obs = Observation { exists, ..Default::default() };
        if exists {
            let (details, renamed) = self.absorb(mr, &value, &state.private)?;
            obs.connection_details = details;
            obs.late_initialized = renamed;
        }

        if mr.deleting {
            // only existence matters while deleting
            obs.up_to_date = true;
            obs.diff = DiffResult { exists, up_to_date: true, ..Default::default() };
            return Ok(obs);
        }

        let config = self.config_value()?;
        let plan = self.bounded("plan", self.bridge.plan(&state, &config)).await?;
        plan.diagnostics.into_result("plan")?;
        let diff = evaluate(&value, &plan.planned.state, &plan.requires_replace, &self.init_only);
        *self.retained() = Some(RetainedPlan { planned: plan.planned, diff: diff.clone() });

        if exists {
            let li = self.resource.late_initializer(self.bridge.schema(), &self.init_only);
            if li.merge(&mut mr.desired.parameters, &mr.observed.attributes) {
                obs.late_initialized = true;
            }
            obs.up_to_date = diff.up_to_date;
        }
        obs.diff = diff;

        counter!("skyjet_observe_total", 1u64);
        histogram!("skyjet_observe_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(
            uid = %uid,
            exists,
            up_to_date = obs.up_to_date,
            late_initialized = obs.late_initialized,
            replace = obs.diff.requires_replace.len(),
            took_ms = %t0.elapsed().as_millis(),
            "observe: ok"
        );
        Ok(obs)
    }

    /// Record a provider value as the observation: external name, connection
    /// details, private blob and sensitive-free attributes. Returns the
    /// connection details and whether the external name changed.
    fn absorb(&self, mr: &mut ManagedResource, value: &TypedValue, private: &[u8]) -> Result<(ConnectionDetails, bool)> {
        let mut attrs = typed_to_map(value)?;
        let mut renamed = false;
        if let Some(name) = self.resource.namer.external_name(&attrs) {
            if mr.external_name() != Some(name.as_str()) {
                debug!(uid = %mr.identity.uid_string(), external_name = %name, "external name changed");
                mr.set_external_name(name);
                renamed = true;
            }
        }
        let mut details = extract_connection_details(&attrs, &self.resource.sensitive);
        if let Some(extra) = &self.resource.additional_connection_details {
            details.extend(extra(&attrs)?);
        }
        strip_sensitive(&mut attrs, &self.resource.sensitive);
        mr.observed.attributes = attrs;
        store_private(mr, private);
        Ok((details, renamed))
    }

    fn take_plan(&self, op: OperationType) -> Result<RetainedPlan> { self.retained().take().ok_or(Error::ObserveRequired(op)) }

    /// Apply `planned` and cache whatever state the provider returns, even
    /// when it reports failure.
    async fn apply(&self, op: OperationType, mr: &mut ManagedResource, planned: &Planned) -> Result<(TypedValue, ConnectionDetails)> {
        let t0 = Instant::now();
        let prior = self.prior_state();
        let config = self.config_value()?;
        let resp = self.bridge.apply(&prior, planned, &config).await?;
        histogram!("skyjet_apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        let failed = resp.diagnostics.has_errors();
        counter!("skyjet_apply_total", 1u64, "op" => op.as_str(), "outcome" => if failed { "error" } else { "ok" });

        let ty = self.bridge.value_type();
        if failed && resp.new_state.is_null() {
            warn!(uid = %mr.identity.uid_string(), op = %op, "apply failed without returning state; keeping prior");
            return resp.diagnostics.into_result(op.as_str()).and(Err(Error::EmptyState(op)));
        }
        self.tracker.set_state(resp.new_state.clone());
        let value = resp.new_state.value.decode(&ty)?;
        let mut details = ConnectionDetails::new();
        if !value.is_null() {
            details = self.absorb(mr, &value, &resp.new_state.private)?.0;
        }
        if failed {
            warn!(uid = %mr.identity.uid_string(), op = %op, partial = !value.is_null(), "apply reported errors");
        }
        resp.diagnostics.into_result(op.as_str())?;
        info!(uid = %mr.identity.uid_string(), op = %op, took_ms = %t0.elapsed().as_millis(), "apply: ok");
        Ok((value, details))
    }

    pub async fn create(&self, mr: &mut ManagedResource) -> Result<Applied> {
        let plan = self.take_plan(OperationType::Create)?;
        let (value, connection_details) = self.apply(OperationType::Create, mr, &plan.planned).await?;
        if value.is_null() {
            return Err(Error::EmptyState(OperationType::Create));
        }
        Ok(Applied { connection_details, external_name: mr.external_name().map(str::to_string) })
    }

    /// Fails with [`Error::ReplaceRequired`], without calling the provider,
    /// when the retained plan would replace the resource.
    pub async fn update(&self, mr: &mut ManagedResource) -> Result<Applied> {
        let plan = self.take_plan(OperationType::Update)?;
        if plan.diff.needs_replace() {
            warn!(uid = %mr.identity.uid_string(), paths = ?plan.diff.requires_replace, "update: refusing replacement");
            counter!("skyjet_replace_refused_total", 1u64);
            return Err(Error::ReplaceRequired { paths: plan.diff.requires_replace });
        }
        let (value, connection_details) = self.apply(OperationType::Update, mr, &plan.planned).await?;
        if value.is_null() {
            return Err(Error::EmptyState(OperationType::Update));
        }
        Ok(Applied { connection_details, external_name: mr.external_name().map(str::to_string) })
    }

    /// Apply a null planned state. A state that collapses to null marks the
    /// resource deleted, even if the provider only reset it.
    pub async fn delete(&self, mr: &mut ManagedResource) -> Result<()> {
        let (value, _) = self.apply(OperationType::Delete, mr, &Planned::destroy()).await?;
        self.retained().take();
        if value.is_null() {
            self.tracker.set_deleted(true);
            debug!(uid = %mr.identity.uid_string(), "delete: state collapsed, marked deleted");
        }
        Ok(())
    }
}
