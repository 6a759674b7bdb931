//! Conversion between typed values and generic attribute trees.

use std::collections::BTreeMap;

use serde_json::Value as Json;
use tracing::debug;

use skyjet_core::{AttributeMap, Error, Result};

use crate::number::BigNumber;
use crate::path::AttributePath;
use crate::schema::SchemaType;
use crate::value::TypedValue;

/// Convert a generic tree into a typed value shaped by `ty`.
///
/// Object attributes missing from `ty` are dropped. Strings holding numbers
/// or booleans are accepted where the type asks for those primitives, and
/// `{"$unknown": true}` markers become unknown values.
pub fn from_generic(v: &Json, ty: &SchemaType) -> Result<TypedValue> { from_generic_at(v, ty, &AttributePath::root()) }

fn from_generic_at(v: &Json, ty: &SchemaType, at: &AttributePath) -> Result<TypedValue> {
    if v.is_null() { return Ok(TypedValue::Null); }
    if is_unknown_marker(v) { return Ok(TypedValue::Unknown); }
    let mismatch = |want: &str| Error::conversion(at, format!("expected {want}, found {}", json_kind(v)));
    match ty {
        SchemaType::Dynamic => infer(v, at),
        SchemaType::Bool => match v {
            Json::Bool(b) => Ok(TypedValue::Bool(*b)),
            Json::String(s) if s == "true" || s == "false" => Ok(TypedValue::Bool(s == "true")),
            _ => Err(mismatch("bool")),
        },
        SchemaType::Number => match v {
            Json::Number(n) => BigNumber::from_json_number(n).map(TypedValue::Number).map_err(|e| located(e, at)),
            Json::String(s) => BigNumber::parse(s).map(TypedValue::Number).map_err(|e| match e {
                Error::Conversion { .. } => mismatch("number"),
                e => located(e, at),
            }),
            _ => Err(mismatch("number")),
        },
        SchemaType::String => match v {
            Json::String(s) => Ok(TypedValue::String(s.clone())),
            Json::Number(n) => Ok(TypedValue::String(n.to_string())),
            Json::Bool(b) => Ok(TypedValue::String(b.to_string())),
            _ => Err(mismatch("string")),
        },
        SchemaType::List(et) | SchemaType::Set(et) => {
            let xs = v.as_array().ok_or_else(|| mismatch("list"))?;
            let out = xs
                .iter()
                .enumerate()
                .map(|(i, x)| from_generic_at(x, et, &at.index(i)))
                .collect::<Result<Vec<_>>>()?;
            Ok(if matches!(ty, SchemaType::Set(_)) { TypedValue::Set(out) } else { TypedValue::List(out) })
        }
        SchemaType::Tuple(ets) => {
            let xs = v.as_array().ok_or_else(|| mismatch("tuple"))?;
            if xs.len() != ets.len() {
                return Err(Error::conversion(at, format!("tuple needs {} elements, found {}", ets.len(), xs.len())));
            }
            let out = xs
                .iter()
                .zip(ets.iter())
                .enumerate()
                .map(|(i, (x, et))| from_generic_at(x, et, &at.index(i)))
                .collect::<Result<Vec<_>>>()?;
            Ok(TypedValue::Tuple(out))
        }
        SchemaType::Map(et) => {
            let m = v.as_object().ok_or_else(|| mismatch("map"))?;
            let mut out = BTreeMap::new();
            for (k, x) in m.iter() { out.insert(k.clone(), from_generic_at(x, et, &at.key(k.clone()))?); }
            Ok(TypedValue::Map(out))
        }
        SchemaType::Object(attrs) => {
            let m = v.as_object().ok_or_else(|| mismatch("object"))?;
            let mut out = BTreeMap::new();
            for (k, x) in m.iter() {
                match attrs.get(k) {
                    Some(at_ty) => {
                        out.insert(k.clone(), from_generic_at(x, at_ty, &at.attribute(k.clone()))?);
                    }
                    None => debug!(path = %at.attribute(k.clone()), "dropping attribute not defined in schema"),
                }
            }
            // objects always carry every attribute of their type
            for k in attrs.keys() { out.entry(k.clone()).or_insert(TypedValue::Null); }
            Ok(TypedValue::Object(out))
        }
    }
}

fn infer(v: &Json, at: &AttributePath) -> Result<TypedValue> {
    Ok(match v {
        Json::Null => TypedValue::Null,
        Json::Bool(b) => TypedValue::Bool(*b),
        Json::Number(n) => TypedValue::Number(BigNumber::from_json_number(n).map_err(|e| located(e, at))?),
        Json::String(s) => TypedValue::String(s.clone()),
        Json::Array(xs) => {
            TypedValue::Tuple(xs.iter().enumerate().map(|(i, x)| infer(x, &at.index(i))).collect::<Result<_>>()?)
        }
        Json::Object(m) => TypedValue::Object(
            m.iter().map(|(k, x)| Ok::<_, Error>((k.clone(), infer(x, &at.attribute(k.clone()))?))).collect::<Result<_>>()?,
        ),
    })
}

/// Number errors carry the attribute path they were found at.
fn located(e: Error, at: &AttributePath) -> Error {
    match e {
        Error::NumberOverflow { value, .. } => Error::NumberOverflow { path: at.to_string(), value },
        Error::NumberUnderflow { value, .. } => Error::NumberUnderflow { path: at.to_string(), value },
        Error::Conversion { reason, .. } => Error::conversion(at, reason),
        e => e,
    }
}

fn json_kind(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "list",
        Json::Object(_) => "object",
    }
}

/// Convert a typed value into a generic tree. Unknown values are an error.
pub fn to_generic(v: &TypedValue) -> Result<Json> { to_generic_at(v, &AttributePath::root()) }

fn to_generic_at(v: &TypedValue, at: &AttributePath) -> Result<Json> {
    Ok(match v {
        TypedValue::Null => Json::Null,
        TypedValue::Unknown => return Err(Error::UnknownValue { path: at.to_string() }),
        TypedValue::Bool(b) => Json::Bool(*b),
        TypedValue::Number(n) => Json::Number(n.to_json_number(&at.to_string())?),
        TypedValue::String(s) => Json::String(s.clone()),
        TypedValue::List(xs) | TypedValue::Set(xs) | TypedValue::Tuple(xs) => {
            Json::Array(xs.iter().enumerate().map(|(i, x)| to_generic_at(x, &at.index(i))).collect::<Result<_>>()?)
        }
        TypedValue::Object(m) => {
            let mut out = AttributeMap::new();
            for (k, x) in m.iter() { out.insert(k.clone(), to_generic_at(x, &at.attribute(k.clone()))?); }
            Json::Object(out)
        }
        TypedValue::Map(m) => {
            let mut out = AttributeMap::new();
            for (k, x) in m.iter() { out.insert(k.clone(), to_generic_at(x, &at.key(k.clone()))?); }
            Json::Object(out)
        }
    })
}

/// Marker object standing in for unknown values on the diff path.
pub const UNKNOWN_MARKER: &str = "$unknown";

/// Like [`to_generic`], but unknown values become `{"$unknown": true}`.
pub fn to_generic_marking_unknown(v: &TypedValue) -> Result<Json> {
    Ok(match v {
        TypedValue::Unknown => {
            let mut marker = AttributeMap::new();
            marker.insert(UNKNOWN_MARKER.to_string(), Json::Bool(true));
            Json::Object(marker)
        }
        TypedValue::List(xs) | TypedValue::Set(xs) | TypedValue::Tuple(xs) => {
            Json::Array(xs.iter().map(to_generic_marking_unknown).collect::<Result<_>>()?)
        }
        TypedValue::Object(m) | TypedValue::Map(m) => {
            let mut out = AttributeMap::new();
            for (k, x) in m.iter() { out.insert(k.clone(), to_generic_marking_unknown(x)?); }
            Json::Object(out)
        }
        other => to_generic(other)?,
    })
}

pub fn is_unknown_marker(v: &Json) -> bool {
    v.as_object().map(|m| m.len() == 1 && m.get(UNKNOWN_MARKER) == Some(&Json::Bool(true))).unwrap_or(false)
}

/// Typed object from an attribute map.
pub fn map_to_typed(m: &AttributeMap, ty: &SchemaType) -> Result<TypedValue> {
    from_generic(&Json::Object(m.clone()), ty)
}

/// Attribute map from a typed object; null converts to an empty map.
pub fn typed_to_map(v: &TypedValue) -> Result<AttributeMap> {
    match to_generic(v)? {
        Json::Object(m) => Ok(m),
        Json::Null => Ok(AttributeMap::new()),
        other => Err(Error::conversion("", format!("expected an object, found {}", json_kind(&other)))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ty() -> SchemaType {
        SchemaType::object([
            ("name", SchemaType::String),
            ("size", SchemaType::Number),
            ("ratio", SchemaType::Number),
            ("enabled", SchemaType::Bool),
            ("zones", SchemaType::list(SchemaType::String)),
            ("tags", SchemaType::map(SchemaType::String)),
            ("nested", SchemaType::object([("x", SchemaType::Number)])),
            ("gone", SchemaType::String),
        ])
    }

    #[test]
    fn supported_shapes_round_trip() {
        let v = json!({
            "name": "db",
            "size": 20,
            "ratio": 0.5,
            "enabled": true,
            "zones": ["a", "b"],
            "tags": {"team": "core"},
            "nested": {"x": -3},
            "gone": null
        });
        let typed = from_generic(&v, &ty()).unwrap();
        assert_eq!(to_generic(&typed).unwrap(), v);
    }

    #[test]
    fn undefined_attributes_are_dropped_and_missing_ones_nulled() {
        let typed = from_generic(&json!({"name": "db", "extra": 1}), &ty()).unwrap();
        assert_eq!(typed.attribute("extra"), None);
        assert_eq!(typed.attribute("size"), Some(&TypedValue::Null));
    }

    #[test]
    fn type_mismatches_name_the_path() {
        let err = from_generic(&json!({"zones": ["a", {"b": 1}]}), &ty()).unwrap_err();
        assert!(err.to_string().contains("zones[1]"), "{err}");
        assert!(from_generic(&json!({"size": "12"}), &ty()).is_ok());
        assert!(from_generic(&json!({"size": "twelve"}), &ty()).is_err());
    }

    #[test]
    fn number_range_errors_name_the_path() {
        let err = from_generic(&json!({"nested": {"x": "1e99999999999999999999"}}), &ty()).unwrap_err();
        assert!(matches!(err, Error::NumberOverflow { ref path, .. } if path == "nested.x"), "{err}");
        let err = from_generic(&json!({"size": "1.5e-9223372036854775808"}), &ty()).unwrap_err();
        assert!(matches!(err, Error::NumberUnderflow { ref path, .. } if path == "size"), "{err}");
    }

    #[test]
    fn dynamic_values_keep_their_numbers() {
        let v = json!({"limits": [1, 2.5, {"n": -7}]});
        let typed = from_generic(&v, &SchemaType::Dynamic).unwrap();
        let limits = typed.attribute("limits").unwrap();
        assert!(matches!(limits, TypedValue::Tuple(xs) if xs[0] == TypedValue::number(1)));
        assert_eq!(to_generic(&typed).unwrap(), v);
    }

    #[test]
    fn unknown_values_refuse_plain_conversion() {
        let v = TypedValue::object([("id", TypedValue::Unknown)]);
        assert!(matches!(to_generic(&v), Err(Error::UnknownValue { ref path }) if path == "id"));
        let marked = to_generic_marking_unknown(&v).unwrap();
        assert!(is_unknown_marker(&marked["id"]));
        assert!(!is_unknown_marker(&json!({"$unknown": false})));
    }

    #[test]
    fn null_object_is_an_empty_map() {
        assert!(typed_to_map(&TypedValue::Null).unwrap().is_empty());
        assert!(typed_to_map(&TypedValue::string("x")).is_err());
    }
}
