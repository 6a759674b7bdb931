//! Parsing of CLI machine-readable output.

use serde_json::{Map, Value as Json};
use tracing::debug;

use skyjet_core::{Error, Result};
use skyjet_value::{AttributePath, ResourceSchema, UNKNOWN_MARKER};

use super::render::RESOURCE_NAME;
use super::workspace::CommandOutput;
use crate::{Diagnostic, Diagnostics};

/// Diagnostics streamed as JSON lines by `-json` commands. A failed command
/// without any error diagnostic yields one carrying its stderr.
pub fn diagnostics_of(out: &CommandOutput) -> Diagnostics {
    let mut diags = Diagnostics::new();
    for line in out.stdout.lines() {
        let Ok(msg) = serde_json::from_str::<Json>(line) else { continue };
        if msg.get("type").and_then(Json::as_str) != Some("diagnostic") {
            continue;
        }
        match msg.get("diagnostic").cloned().map(serde_json::from_value::<Diagnostic>) {
            Some(Ok(d)) => diags.push(d),
            Some(Err(e)) => debug!(error = %e, "cli: skipping malformed diagnostic"),
            None => {}
        }
    }
    if !out.success && !diags.has_errors() {
        let stderr = out.stderr.trim();
        let detail = if stderr.is_empty() { format!("exit code {:?}", out.code) } else { stderr.to_string() };
        diags.push(Diagnostic::error("provider command failed").with_detail(detail));
    }
    diags
}

/// The single resource change in a `show -json` plan document.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedChange {
    pub actions: Vec<String>,
    /// Planned value with unknown positions replaced by unknown markers.
    pub after: Json,
    pub replace_paths: Vec<AttributePath>,
}

pub fn parse_plan(doc: &Json, type_name: &str) -> Result<PlannedChange> {
    let change = doc
        .get("resource_changes")
        .and_then(Json::as_array)
        .and_then(|xs| {
            xs.iter().find(|c| {
                c.get("type").and_then(Json::as_str) == Some(type_name) && c.get("name").and_then(Json::as_str) == Some(RESOURCE_NAME)
            })
        })
        .and_then(|c| c.get("change"))
        .ok_or_else(|| Error::conversion("resource_changes", format!("no planned change for {type_name}")))?;
    let actions = change
        .get("actions")
        .and_then(Json::as_array)
        .map(|xs| xs.iter().filter_map(Json::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    let after = change.get("after").cloned().unwrap_or(Json::Null);
    let after = match change.get("after_unknown") {
        Some(unknown) => mark_unknown(&after, unknown),
        None => after,
    };
    let replace_paths = change
        .get("replace_paths")
        .and_then(Json::as_array)
        .map(|xs| xs.iter().filter_map(AttributePath::from_json_steps).collect())
        .unwrap_or_default();
    Ok(PlannedChange { actions, after, replace_paths })
}

fn unknown_marker() -> Json {
    let mut m = Map::new();
    m.insert(UNKNOWN_MARKER.to_string(), Json::Bool(true));
    Json::Object(m)
}

/// Overlay an `after_unknown` mask on a planned value.
fn mark_unknown(after: &Json, unknown: &Json) -> Json {
    match unknown {
        Json::Bool(true) => unknown_marker(),
        Json::Object(mask) => {
            let mut out = after.as_object().cloned().unwrap_or_default();
            for (k, m) in mask.iter() {
                let v = out.get(k).cloned().unwrap_or(Json::Null);
                let marked = mark_unknown(&v, m);
                if !marked.is_null() || out.contains_key(k) {
                    out.insert(k.clone(), marked);
                }
            }
            if after.is_null() && out.is_empty() { Json::Null } else { Json::Object(out) }
        }
        Json::Array(mask) => {
            let mut out = after.as_array().cloned().unwrap_or_default();
            for (i, m) in mask.iter().enumerate() {
                if i < out.len() {
                    out[i] = mark_unknown(&out[i], m);
                } else if m == &Json::Bool(true) {
                    out.push(unknown_marker());
                }
            }
            Json::Array(out)
        }
        _ => after.clone(),
    }
}

/// Resource schema of `type_name` from `providers schema -json` output.
pub fn parse_schema(doc: &Json, source: &str, type_name: &str) -> Result<ResourceSchema> {
    let wanted = source.to_ascii_lowercase();
    let provider = doc
        .get("provider_schemas")
        .and_then(Json::as_object)
        .and_then(|m| {
            m.iter()
                .find(|(addr, _)| {
                    let addr = addr.to_ascii_lowercase();
                    addr == wanted || addr.ends_with(&format!("/{wanted}"))
                })
                .map(|(_, v)| v)
        })
        .ok_or_else(|| Error::Setup(format!("provider {source} not found in schema output")))?;
    let raw = provider
        .get("resource_schemas")
        .and_then(|m| m.get(type_name))
        .ok_or_else(|| Error::Setup(format!("provider {source} has no resource type {type_name}")))?;
    serde_json::from_value(raw.clone()).map_err(|e| Error::Setup(format!("malformed schema for {type_name}: {e}")))
}
