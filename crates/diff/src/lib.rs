//! Plan evaluation.
//!
//! Compares the prior provider state with the state a plan call proposes and
//! decides whether the resource is up to date. Entries whose planned value
//! is unknown (computed during apply) or null (left unset) are noise and
//! never mark a resource as out of date; neither do attributes that are set
//! only through init-parameters.

#![forbid(unsafe_code)]

use serde::Serialize;
use tracing::debug;

use skyjet_value::{AttributePath, TypedValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Add,
    Update,
    Remove,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiffEntry {
    pub path: AttributePath,
    pub kind: ChangeKind,
    pub prior: TypedValue,
    pub planned: TypedValue,
}

impl DiffEntry {
    /// Unknown or null planned values carry no intent to change.
    pub fn is_noise(&self) -> bool { self.planned.is_null() || self.planned.is_unknown() }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub adds: usize,
    pub updates: usize,
    pub removes: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffResult {
    pub exists: bool,
    pub up_to_date: bool,
    /// Paths whose change forces the provider to destroy and recreate.
    pub requires_replace: Vec<String>,
    pub changed_paths: Vec<String>,
    pub summary: DiffSummary,
}

impl DiffResult {
    /// Result for a resource the provider does not know about.
    pub fn absent() -> Self { Self::default() }

    pub fn needs_replace(&self) -> bool { !self.requires_replace.is_empty() }
}

/// Structural differences between `prior` and `planned`, finest grained
/// where both sides share a shape. Sets differ as a whole.
pub fn diff_entries(prior: &TypedValue, planned: &TypedValue) -> Vec<DiffEntry> {
    fn walk(old: &TypedValue, new: &TypedValue, at: AttributePath, out: &mut Vec<DiffEntry>) {
        if old.semantic_eq(new) { return; }
        match (old, new) {
            (TypedValue::Object(a), TypedValue::Object(b)) => {
                for (k, nv) in b.iter() { walk(a.get(k).unwrap_or(&TypedValue::Null), nv, at.attribute(k.clone()), out); }
                for (k, ov) in a.iter().filter(|(k, _)| !b.contains_key(*k)) {
                    walk(ov, &TypedValue::Null, at.attribute(k.clone()), out);
                }
            }
            // a new object is compared attribute by attribute so computed
            // attributes stay recognisable as noise
            (TypedValue::Null, TypedValue::Object(b)) if !at.is_root() => {
                for (k, nv) in b.iter() { walk(&TypedValue::Null, nv, at.attribute(k.clone()), out); }
            }
            (TypedValue::Map(a), TypedValue::Map(b)) => {
                for (k, nv) in b.iter() { walk(a.get(k).unwrap_or(&TypedValue::Null), nv, at.key(k.clone()), out); }
                for (k, ov) in a.iter().filter(|(k, _)| !b.contains_key(*k)) {
                    walk(ov, &TypedValue::Null, at.key(k.clone()), out);
                }
            }
            (TypedValue::List(a), TypedValue::List(b)) | (TypedValue::Tuple(a), TypedValue::Tuple(b)) if a.len() == b.len() => {
                for (i, (ov, nv)) in a.iter().zip(b.iter()).enumerate() { walk(ov, nv, at.index(i), out); }
            }
            _ => {
                let kind = match (old.is_null(), new.is_null()) {
                    (true, false) => ChangeKind::Add,
                    (false, true) => ChangeKind::Remove,
                    _ => ChangeKind::Update,
                };
                out.push(DiffEntry { path: at, kind, prior: old.clone(), planned: new.clone() });
            }
        }
    }
    let mut out = Vec::new();
    walk(prior, planned, AttributePath::root(), &mut out);
    out
}

/// Keep only replace paths whose value actually changes between prior and planned.
pub fn effective_replace_paths(prior: &TypedValue, planned: &TypedValue, paths: &[AttributePath]) -> Vec<AttributePath> {
    paths
        .iter()
        .filter(|p| {
            let before = prior.get(p).unwrap_or(&TypedValue::Null);
            let after = planned.get(p).unwrap_or(&TypedValue::Null);
            let differs = !before.semantic_eq(after);
            if !differs { debug!(path = %p, "ignoring replace flag on unchanged attribute"); }
            differs
        })
        .cloned()
        .collect()
}

/// Evaluate a plan response against the prior state.
///
/// `init_only` lists top-level attributes set only through init-parameters;
/// differences beneath them are ignored.
pub fn evaluate(prior: &TypedValue, planned: &TypedValue, requires_replace: &[AttributePath], init_only: &[String]) -> DiffResult {
    if prior.is_null() { return DiffResult::absent(); }
    let mut summary = DiffSummary::default();
    let mut changed = Vec::new();
    for e in diff_entries(prior, planned) {
        if e.is_noise() { continue; }
        if e.path.top_level().map(|t| init_only.iter().any(|k| k == t)).unwrap_or(false) {
            debug!(path = %e.path, "ignoring diff on init-only attribute");
            continue;
        }
        match e.kind {
            ChangeKind::Add => summary.adds += 1,
            ChangeKind::Update => summary.updates += 1,
            ChangeKind::Remove => summary.removes += 1,
        }
        changed.push(e.path.to_string());
    }
    let replace: Vec<String> =
        effective_replace_paths(prior, planned, requires_replace).iter().map(|p| p.to_string()).collect();
    if !changed.is_empty() {
        metrics::counter!("skyjet_diff_changed_total", 1u64);
    }
    DiffResult { exists: true, up_to_date: changed.is_empty(), requires_replace: replace, changed_paths: changed, summary }
}
