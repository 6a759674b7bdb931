//! Small helpers over generic JSON attribute trees.

use serde_json::Value;

use crate::AttributeMap;

/// Deep-merge `source` into `target`, filling only absent or null fields.
pub fn merge_missing(target: &mut AttributeMap, source: &AttributeMap) {
    for (k, sv) in source.iter() {
        match target.get_mut(k) {
            None => {
                target.insert(k.clone(), sv.clone());
            }
            Some(tv) if tv.is_null() => *tv = sv.clone(),
            Some(Value::Object(tm)) => {
                if let Value::Object(sm) = sv { merge_missing(tm, sm); }
            }
            Some(_) => {}
        }
    }
}

/// Zero value in the Go sense: null, false, 0, "", [] or {}.
pub fn is_zero(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64().map(|f| f == 0.0).unwrap_or(false),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(m) => m.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> AttributeMap { v.as_object().cloned().unwrap() }

    #[test]
    fn merge_missing_fills_only_gaps() {
        let mut t = map(json!({"a": 1, "n": null, "o": {"x": 1}}));
        merge_missing(&mut t, &map(json!({"a": 2, "n": 5, "o": {"x": 9, "y": 3}, "b": true})));
        assert_eq!(Value::Object(t), json!({"a": 1, "n": 5, "o": {"x": 1, "y": 3}, "b": true}));
    }

    #[test]
    fn zero_values() {
        for v in [json!(null), json!(false), json!(0), json!(0.0), json!(""), json!([]), json!({})] {
            assert!(is_zero(&v), "{v}");
        }
        assert!(!is_zero(&json!("x")));
        assert!(!is_zero(&json!([0])));
    }
}
