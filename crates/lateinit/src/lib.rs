//! Late-initialization: copy observed values into desired fields the user
//! left unset.
//!
//! The merge walks both trees together. Objects recurse per key, lists per
//! index (allocated only when the desired list is unset), and any field a
//! filter rejects is left alone together with everything beneath it.

#![forbid(unsafe_code)]

use serde_json::Value;
use tracing::debug;

use skyjet_core::{json, AttributeMap, FieldPath};

/// Suppresses late-initialization of a single field.
pub trait LateInitFilter: Send + Sync {
    fn skip(&self, path: &FieldPath, observed: &Value) -> bool;
}

/// Skips fields by path; wildcard segments match any index or key.
#[derive(Debug, Clone, Default)]
pub struct NameFilter {
    patterns: Vec<FieldPath>,
}

impl NameFilter {
    pub fn new(patterns: impl IntoIterator<Item = FieldPath>) -> Self { Self { patterns: patterns.into_iter().collect() } }

    /// Parse dotted/indexed path strings; malformed entries are an error.
    pub fn parse<'a>(paths: impl IntoIterator<Item = &'a str>) -> skyjet_core::Result<Self> {
        Ok(Self::new(paths.into_iter().map(FieldPath::parse).collect::<skyjet_core::Result<Vec<_>>>()?))
    }
}

impl LateInitFilter for NameFilter {
    fn skip(&self, path: &FieldPath, _observed: &Value) -> bool { self.patterns.iter().any(|p| p.matches(path)) }
}

/// Skips zero observed values (null, false, 0, "", empty collections) on
/// fields marked omit-if-empty, or on every field.
#[derive(Debug, Clone, Default)]
pub struct ZeroValueFilter {
    omit_empty: Option<Vec<FieldPath>>,
}

impl ZeroValueFilter {
    pub fn all() -> Self { Self { omit_empty: None } }

    pub fn for_paths(paths: impl IntoIterator<Item = FieldPath>) -> Self { Self { omit_empty: Some(paths.into_iter().collect()) } }
}

impl LateInitFilter for ZeroValueFilter {
    fn skip(&self, path: &FieldPath, observed: &Value) -> bool {
        if !json::is_zero(observed) { return false; }
        match &self.omit_empty {
            None => true,
            Some(paths) => paths.iter().any(|p| p.matches(path)),
        }
    }
}

#[derive(Default)]
pub struct LateInitializer {
    filters: Vec<Box<dyn LateInitFilter>>,
}

impl LateInitializer {
    pub fn new() -> Self { Self::default() }

    pub fn with_filter(mut self, f: impl LateInitFilter + 'static) -> Self {
        self.filters.push(Box::new(f));
        self
    }

    /// Fill unset fields of `desired` from `observed`; true if anything changed.
    pub fn merge(&self, desired: &mut AttributeMap, observed: &AttributeMap) -> bool {
        let mut changed = false;
        for (k, ov) in observed.iter() {
            let path = FieldPath::root().child_field(k.clone());
            let existed = desired.contains_key(k);
            let slot = desired.entry(k.clone()).or_insert(Value::Null);
            changed |= self.merge_value(&path, slot, ov);
            // leave no placeholder behind for fields nothing was copied into
            if !existed && slot.is_null() { desired.remove(k); }
        }
        changed
    }

    fn merge_value(&self, path: &FieldPath, desired: &mut Value, observed: &Value) -> bool {
        if observed.is_null() || self.filters.iter().any(|f| f.skip(path, observed)) { return false; }
        match (desired, observed) {
            (d @ Value::Null, Value::Object(om)) => {
                let mut fresh = AttributeMap::new();
                let mut changed = false;
                for (k, ov) in om.iter() {
                    let mut slot = Value::Null;
                    if self.merge_value(&path.child_field(k.clone()), &mut slot, ov) {
                        fresh.insert(k.clone(), slot);
                        changed = true;
                    }
                }
                if changed { *d = Value::Object(fresh); }
                changed
            }
            (d @ Value::Null, Value::Array(oa)) => {
                let mut fresh = Vec::with_capacity(oa.len());
                let mut changed = false;
                for (i, ov) in oa.iter().enumerate() {
                    let mut slot = Value::Null;
                    changed |= self.merge_value(&path.child_index(i), &mut slot, ov);
                    fresh.push(slot);
                }
                if changed { *d = Value::Array(fresh); }
                changed
            }
            (d @ Value::Null, ov) => {
                debug!(path = %path, "late-initializing field");
                *d = ov.clone();
                true
            }
            (Value::Object(dm), Value::Object(om)) => {
                let mut changed = false;
                for (k, ov) in om.iter() {
                    let existed = dm.contains_key(k);
                    let slot = dm.entry(k.clone()).or_insert(Value::Null);
                    changed |= self.merge_value(&path.child_field(k.clone()), slot, ov);
                    if !existed && slot.is_null() { dm.remove(k); }
                }
                changed
            }
            (Value::Array(da), Value::Array(oa)) if da.len() == oa.len() => {
                let mut changed = false;
                for (i, (dv, ov)) in da.iter_mut().zip(oa.iter()).enumerate() {
                    changed |= self.merge_value(&path.child_index(i), dv, ov);
                }
                changed
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> AttributeMap { v.as_object().cloned().unwrap() }

    #[test]
    fn copies_only_unset_fields() {
        let mut desired = map(json!({"name": "x", "size": null, "tags": {"a": "1"}}));
        let observed = map(json!({"name": "y", "size": 10, "tags": {"a": "2", "b": "3"}, "zone": "eu"}));
        assert!(LateInitializer::new().merge(&mut desired, &observed));
        assert_eq!(Value::Object(desired), json!({"name": "x", "size": 10, "tags": {"a": "1", "b": "3"}, "zone": "eu"}));
    }

    #[test]
    fn reports_no_change_when_everything_is_set() {
        let mut desired = map(json!({"name": "x"}));
        let before = desired.clone();
        assert!(!LateInitializer::new().merge(&mut desired, &map(json!({"name": "y", "gone": null}))));
        assert_eq!(desired, before);
    }

    #[test]
    fn lists_are_allocated_or_merged_by_index() {
        let mut desired = map(json!({"rules": [{"port": 80, "proto": null}], "zones": null}));
        let observed = map(json!({"rules": [{"port": 81, "proto": "tcp"}], "zones": ["a", "b"]}));
        assert!(LateInitializer::new().merge(&mut desired, &observed));
        assert_eq!(Value::Object(desired), json!({"rules": [{"port": 80, "proto": "tcp"}], "zones": ["a", "b"]}));

        let mut desired = map(json!({"zones": ["a"]}));
        assert!(!LateInitializer::new().merge(&mut desired, &map(json!({"zones": ["a", "b"]}))));
    }

    #[test]
    fn name_filter_skips_matching_subtrees() {
        let li = LateInitializer::new().with_filter(NameFilter::parse(["id", "rules[*].arn"]).unwrap());
        let mut desired = map(json!({"rules": [{"port": 80}]}));
        let observed = map(json!({"id": "i-1", "rules": [{"port": 80, "arn": "x", "proto": "tcp"}]}));
        assert!(li.merge(&mut desired, &observed));
        assert_eq!(Value::Object(desired), json!({"rules": [{"port": 80, "proto": "tcp"}]}));
    }

    #[test]
    fn zero_value_filter_honours_omit_empty_fields() {
        let li = LateInitializer::new().with_filter(ZeroValueFilter::for_paths([FieldPath::parse("count").unwrap()]));
        let mut desired = AttributeMap::new();
        assert!(li.merge(&mut desired, &map(json!({"count": 0, "enabled": false}))));
        assert_eq!(Value::Object(desired), json!({"enabled": false}));

        let li = LateInitializer::new().with_filter(ZeroValueFilter::all());
        let mut desired = AttributeMap::new();
        assert!(!li.merge(&mut desired, &map(json!({"count": 0, "tags": {}}))));
        assert!(desired.is_empty());
    }
}
