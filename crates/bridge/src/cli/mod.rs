//! Bridge that drives the provider CLI as a subprocess.
//!
//! Every managed resource gets its own working directory holding a
//! `main.tf.json` with the provider and resource blocks and a version 4
//! state file. Each call rewrites both from the engine's view, runs one CLI
//! command and reads the state back.

pub mod finalizer;
pub mod output;
pub mod render;
pub mod workspace;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value as Json;
use tracing::{debug, info};

use skyjet_core::{format_uid, AttributeMap, Result, Uid};
use skyjet_value::{from_generic, typed_to_map, DynamicValue, ProviderState, ResourceSchema, SchemaType, TypedValue};

use crate::{ApplyResponse, BridgeConnector, Diagnostics, PlanResponse, Planned, ProviderBridge, ProviderSetup, ReadResponse};
use output::{diagnostics_of, parse_plan, parse_schema};
use render::{parse_state, render_main, render_state, state_serial};
use workspace::{Workspace, WorkspaceState, WorkspaceStore, MAIN_FILE, PLAN_FILE, STATE_FILE};

pub use finalizer::WorkspaceFinalizer;
pub use workspace::{CommandOutput, CommandRunner, ProcessRunner};

pub struct CliBridge {
    uid: Uid,
    type_name: String,
    schema: ResourceSchema,
    ty: SchemaType,
    setup: ProviderSetup,
    workspace: Arc<Workspace>,
}

impl CliBridge {
    pub fn new(uid: Uid, type_name: impl Into<String>, schema: ResourceSchema, setup: ProviderSetup, workspace: Arc<Workspace>) -> Self {
        let ty = schema.implied_type();
        Self { uid, type_name: type_name.into(), schema, ty, setup, workspace }
    }

    fn state_attributes(&self, state: &ProviderState) -> Result<Option<AttributeMap>> {
        if state.is_null() { return Ok(None); }
        typed_to_map(&state.value.decode(&self.ty)?).map(Some)
    }

    /// Resource configuration recovered from a state: the arguments the
    /// user can set, without provider-computed attributes.
    fn config_from_state(&self, attrs: &AttributeMap) -> AttributeMap {
        attrs
            .iter()
            .filter(|(k, v)| {
                !v.is_null()
                    && (self.schema.block.block_types.contains_key(k.as_str())
                        || self.schema.block.attributes.get(k.as_str()).map(|a| !a.is_computed_only()).unwrap_or(false))
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn args<'a>(&self, base: &[&'a str], parallelism: &'a str) -> Vec<&'a str> {
        let mut args = base.to_vec();
        if self.workspace.parallelism().is_some() { args.push(parallelism); }
        args
    }

    /// Write configuration and prior state into the workspace, initializing
    /// it first when needed.
    async fn prepare(&self, st: &mut WorkspaceState, config: &AttributeMap, prior: &ProviderState) -> Result<()> {
        let ws = &self.workspace;
        ws.write_json(MAIN_FILE, &render_main(&self.type_name, &self.setup, Some(config))).await?;
        ws.ensure_init(st, &self.setup.env).await?;
        let existing = ws.read_json(STATE_FILE).await?;
        st.serial = st.serial.max(state_serial(existing.as_ref())) + 1;
        let attrs = self.state_attributes(prior)?;
        let doc = render_state(&self.type_name, &self.setup, &self.uid, st.serial, self.schema.version, attrs.as_ref(), &prior.private);
        ws.write_json(STATE_FILE, &doc).await
    }

    async fn load_state(&self) -> Result<ProviderState> {
        let doc = self.workspace.read_json(STATE_FILE).await?;
        let Some((attrs, private)) = doc.as_ref().map(|d| parse_state(d, &self.type_name)).transpose()?.flatten() else {
            return Ok(ProviderState::null());
        };
        let value = from_generic(&Json::Object(attrs), &self.ty)?;
        Ok(ProviderState::new(DynamicValue::encode(&value, &self.ty)?, private))
    }
}

#[async_trait]
impl ProviderBridge for CliBridge {
    fn type_name(&self) -> &str { &self.type_name }
    fn schema(&self) -> &ResourceSchema { &self.schema }
    fn value_type(&self) -> SchemaType { self.ty.clone() }

    async fn read(&self, prior: &ProviderState) -> Result<ReadResponse> {
        let Some(attrs) = self.state_attributes(prior)? else { return Ok(ReadResponse::default()) };
        let t0 = Instant::now();
        let mut st = self.workspace.lock().await;
        self.prepare(&mut st, &self.config_from_state(&attrs), prior).await?;
        let out = self
            .workspace
            .run(&["apply", "-refresh-only", "-auto-approve", "-input=false", "-lock=false", "-json", "-no-color"], &self.setup.env)
            .await?;
        let diagnostics = diagnostics_of(&out);
        if diagnostics.has_errors() {
            return Ok(ReadResponse { new_state: prior.clone(), diagnostics });
        }
        let new_state = self.load_state().await?;
        debug!(uid = %format_uid(&self.uid), exists = !new_state.is_null(), took_ms = %t0.elapsed().as_millis(), "cli: refresh");
        Ok(ReadResponse { new_state, diagnostics })
    }

    async fn plan(&self, prior: &ProviderState, config: &TypedValue) -> Result<PlanResponse> {
        let t0 = Instant::now();
        let cfg = typed_to_map(config)?;
        let mut st = self.workspace.lock().await;
        self.prepare(&mut st, &cfg, prior).await?;
        let out_flag = format!("-out={PLAN_FILE}");
        let out = self
            .workspace
            .run(&["plan", "-refresh=false", "-input=false", "-lock=false", "-json", "-no-color", &out_flag], &self.setup.env)
            .await?;
        let mut diagnostics = diagnostics_of(&out);
        if diagnostics.has_errors() {
            return Ok(PlanResponse { diagnostics, ..Default::default() });
        }
        let shown = self.workspace.run(&["show", "-json", "-no-color", PLAN_FILE], &self.setup.env).await?;
        if !shown.success {
            diagnostics.0.extend(diagnostics_of(&shown).0);
            return Ok(PlanResponse { diagnostics, ..Default::default() });
        }
        let doc: Json = serde_json::from_str(shown.stdout.trim())
            .map_err(|e| skyjet_core::Error::conversion(PLAN_FILE, format!("malformed plan document: {e}")))?;
        let change = parse_plan(&doc, &self.type_name)?;
        let state = from_generic(&change.after, &self.ty)?;
        debug!(
            uid = %format_uid(&self.uid),
            actions = ?change.actions,
            replace = change.replace_paths.len(),
            took_ms = %t0.elapsed().as_millis(),
            "cli: plan"
        );
        Ok(PlanResponse {
            planned: Planned { state, private: prior.private.clone() },
            requires_replace: change.replace_paths,
            diagnostics,
        })
    }

    async fn apply(&self, prior: &ProviderState, planned: &Planned, config: &TypedValue) -> Result<ApplyResponse> {
        let t0 = Instant::now();
        let destroy = planned.is_destroy();
        let cfg = if destroy {
            self.state_attributes(prior)?.map(|a| self.config_from_state(&a)).unwrap_or_default()
        } else {
            typed_to_map(config)?
        };
        let mut st = self.workspace.lock().await;
        self.prepare(&mut st, &cfg, prior).await?;
        let parallelism = format!("-parallelism={}", self.workspace.parallelism().unwrap_or_default());
        let command = if destroy { "destroy" } else { "apply" };
        let args = self.args(&[command, "-auto-approve", "-input=false", "-lock=false", "-json", "-no-color"], &parallelism);
        let out = self.workspace.run(&args, &self.setup.env).await?;
        let diagnostics: Diagnostics = diagnostics_of(&out);
        // partial state is kept even when the command failed
        let new_state = self.load_state().await?;
        info!(
            uid = %format_uid(&self.uid),
            command,
            ok = !diagnostics.has_errors(),
            took_ms = %t0.elapsed().as_millis(),
            "cli: apply"
        );
        Ok(ApplyResponse { new_state, diagnostics })
    }
}

/// Hands out [`CliBridge`]s backed by a shared [`WorkspaceStore`].
pub struct CliConnector {
    store: Arc<WorkspaceStore>,
}

impl CliConnector {
    pub fn new(store: Arc<WorkspaceStore>) -> Self { Self { store } }

    pub fn store(&self) -> &Arc<WorkspaceStore> { &self.store }

    async fn fetch_schema(&self, ws: &Workspace, type_name: &str, setup: &ProviderSetup) -> Result<ResourceSchema> {
        if let Some(s) = self.store.cached_schema(&setup.source, type_name) {
            return Ok(s);
        }
        let t0 = Instant::now();
        let mut st = ws.lock().await;
        ws.write_json(MAIN_FILE, &render_main(type_name, setup, None)).await?;
        ws.ensure_init(&mut st, &setup.env).await?;
        let out = ws.run(&["providers", "schema", "-json"], &setup.env).await?;
        if !out.success {
            return Err(skyjet_core::Error::Setup(format!("schema query failed: {}", out.stderr.trim())));
        }
        let doc: Json = serde_json::from_str(out.stdout.trim())
            .map_err(|e| skyjet_core::Error::Setup(format!("malformed schema output: {e}")))?;
        let schema = parse_schema(&doc, &setup.source, type_name)?;
        info!(source = %setup.source, type_name, took_ms = %t0.elapsed().as_millis(), "cli: schema loaded");
        self.store.cache_schema(&setup.source, type_name, schema.clone());
        Ok(schema)
    }
}

#[async_trait]
impl BridgeConnector for CliConnector {
    async fn connect(&self, type_name: &str, setup: &ProviderSetup, uid: &Uid) -> Result<Arc<dyn ProviderBridge>> {
        let ws = self.store.workspace(uid);
        let schema = self.fetch_schema(&ws, type_name, setup).await?;
        Ok(Arc::new(CliBridge::new(*uid, type_name, schema, setup.clone(), ws)))
    }
}
