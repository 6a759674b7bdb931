//! Wire encoding of typed values.
//!
//! Values travel as JSON documents decoded against a schema type. Numbers
//! are written as decimal strings so no precision is lost, unknown values
//! as `{"$unknown": true}`, and values at `dynamic` positions as
//! `{"type": <type>, "value": <value>}`.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value as Json};
use tracing::debug;

use skyjet_core::{Error, Result};

use crate::convert::{is_unknown_marker, UNKNOWN_MARKER};
use crate::number::BigNumber;
use crate::path::AttributePath;
use crate::schema::SchemaType;
use crate::value::TypedValue;

/// Opaque encoded value as exchanged with a provider.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DynamicValue(Vec<u8>);

impl DynamicValue {
    pub fn null() -> Self { Self(b"null".to_vec()) }

    pub fn from_bytes(bytes: Vec<u8>) -> Self { Self(bytes) }
    pub fn as_bytes(&self) -> &[u8] { &self.0 }

    pub fn is_null(&self) -> bool { self.0.is_empty() || self.0.as_slice() == b"null" }

    pub fn encode(v: &TypedValue, ty: &SchemaType) -> Result<Self> {
        let doc = encode_value(v, ty, &AttributePath::root())?;
        serde_json::to_vec(&doc).map(Self).map_err(|e| Error::conversion("", e))
    }

    pub fn decode(&self, ty: &SchemaType) -> Result<TypedValue> {
        if self.is_null() { return Ok(TypedValue::Null); }
        let doc: Json = serde_json::from_slice(&self.0).map_err(|e| Error::conversion("", format!("malformed dynamic value: {e}")))?;
        decode_value(&doc, ty, &AttributePath::root())
    }
}

impl fmt::Debug for DynamicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DynamicValue({})", String::from_utf8_lossy(&self.0))
    }
}

impl Default for DynamicValue {
    fn default() -> Self { Self::null() }
}

/// Provider state for one resource: the encoded value plus the provider's
/// private blob, which must be handed back unchanged on the next call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderState {
    pub value: DynamicValue,
    pub private: Vec<u8>,
}

impl ProviderState {
    pub fn new(value: DynamicValue, private: Vec<u8>) -> Self { Self { value, private } }
    pub fn null() -> Self { Self::default() }
    pub fn is_null(&self) -> bool { self.value.is_null() }
}

fn encode_value(v: &TypedValue, ty: &SchemaType, at: &AttributePath) -> Result<Json> {
    if let SchemaType::Dynamic = ty {
        if v.is_null() || v.is_unknown() { return encode_value(v, &SchemaType::String, at); }
        let concrete = implied_type(v);
        let mut m = Map::new();
        m.insert("type".into(), concrete.to_json());
        m.insert("value".into(), encode_value(v, &concrete, at)?);
        return Ok(Json::Object(m));
    }
    Ok(match v {
        TypedValue::Null => Json::Null,
        TypedValue::Unknown => {
            let mut m = Map::new();
            m.insert(UNKNOWN_MARKER.into(), Json::Bool(true));
            Json::Object(m)
        }
        TypedValue::Bool(b) => Json::Bool(*b),
        TypedValue::Number(n) => Json::String(n.to_string()),
        TypedValue::String(s) => Json::String(s.clone()),
        TypedValue::List(xs) | TypedValue::Set(xs) => {
            let et = match ty {
                SchemaType::List(t) | SchemaType::Set(t) => t.as_ref().clone(),
                _ => SchemaType::Dynamic,
            };
            Json::Array(xs.iter().enumerate().map(|(i, x)| encode_value(x, &et, &at.index(i))).collect::<Result<_>>()?)
        }
        TypedValue::Tuple(xs) => {
            let ets: Vec<SchemaType> = match ty {
                SchemaType::Tuple(ts) => ts.clone(),
                _ => vec![SchemaType::Dynamic; xs.len()],
            };
            check_tuple_len(ets.len(), xs.len(), at)?;
            Json::Array(
                xs.iter()
                    .zip(ets.iter())
                    .enumerate()
                    .map(|(i, (x, t))| encode_value(x, t, &at.index(i)))
                    .collect::<Result<_>>()?,
            )
        }
        TypedValue::Map(m) => {
            let et = match ty {
                SchemaType::Map(t) => t.as_ref().clone(),
                _ => SchemaType::Dynamic,
            };
            let mut out = Map::new();
            for (k, x) in m.iter() { out.insert(k.clone(), encode_value(x, &et, &at.key(k.clone()))?); }
            Json::Object(out)
        }
        TypedValue::Object(m) => {
            let attrs = match ty {
                SchemaType::Object(a) => Some(a),
                _ => None,
            };
            let mut out = Map::new();
            for (k, x) in m.iter() {
                let t = attrs.and_then(|a| a.get(k)).cloned().unwrap_or(SchemaType::Dynamic);
                out.insert(k.clone(), encode_value(x, &t, &at.attribute(k.clone()))?);
            }
            Json::Object(out)
        }
    })
}

fn check_tuple_len(want: usize, found: usize, at: &AttributePath) -> Result<()> {
    if want == found { return Ok(()); }
    Err(Error::conversion(at, format!("tuple needs {want} elements, found {found}")))
}

/// Most specific type describing `v`.
pub fn implied_type(v: &TypedValue) -> SchemaType {
    match v {
        TypedValue::Null | TypedValue::Unknown => SchemaType::Dynamic,
        TypedValue::Bool(_) => SchemaType::Bool,
        TypedValue::Number(_) => SchemaType::Number,
        TypedValue::String(_) => SchemaType::String,
        TypedValue::List(xs) => SchemaType::list(xs.first().map(implied_type).unwrap_or(SchemaType::Dynamic)),
        TypedValue::Set(xs) => SchemaType::set(xs.first().map(implied_type).unwrap_or(SchemaType::Dynamic)),
        TypedValue::Tuple(xs) => SchemaType::Tuple(xs.iter().map(implied_type).collect()),
        TypedValue::Map(m) => SchemaType::map(m.values().next().map(implied_type).unwrap_or(SchemaType::Dynamic)),
        TypedValue::Object(m) => SchemaType::Object(m.iter().map(|(k, x)| (k.clone(), implied_type(x))).collect()),
    }
}

fn decode_value(doc: &Json, ty: &SchemaType, at: &AttributePath) -> Result<TypedValue> {
    if doc.is_null() { return Ok(TypedValue::Null); }
    if is_unknown_marker(doc) { return Ok(TypedValue::Unknown); }
    let bad = |want: &str| Error::conversion(at, format!("expected encoded {want}"));
    match ty {
        SchemaType::Dynamic => {
            let m = doc.as_object().ok_or_else(|| bad("dynamic wrapper"))?;
            let concrete = SchemaType::from_json(m.get("type").ok_or_else(|| bad("dynamic type"))?)?;
            decode_value(m.get("value").unwrap_or(&Json::Null), &concrete, at)
        }
        SchemaType::Bool => doc.as_bool().map(TypedValue::Bool).ok_or_else(|| bad("bool")),
        SchemaType::Number => match doc {
            Json::String(s) => BigNumber::parse(s).map(TypedValue::Number),
            Json::Number(n) => BigNumber::from_json_number(n).map(TypedValue::Number),
            _ => Err(bad("number")),
        },
        SchemaType::String => doc.as_str().map(TypedValue::string).ok_or_else(|| bad("string")),
        SchemaType::List(et) | SchemaType::Set(et) => {
            let xs = doc.as_array().ok_or_else(|| bad("list"))?;
            let out = xs
                .iter()
                .enumerate()
                .map(|(i, x)| decode_value(x, et, &at.index(i)))
                .collect::<Result<Vec<_>>>()?;
            Ok(if matches!(ty, SchemaType::Set(_)) { TypedValue::Set(out) } else { TypedValue::List(out) })
        }
        SchemaType::Tuple(ets) => {
            let xs = doc.as_array().ok_or_else(|| bad("tuple"))?;
            check_tuple_len(ets.len(), xs.len(), at)?;
            let out = xs
                .iter()
                .zip(ets.iter())
                .enumerate()
                .map(|(i, (x, et))| decode_value(x, et, &at.index(i)))
                .collect::<Result<Vec<_>>>()?;
            Ok(TypedValue::Tuple(out))
        }
        SchemaType::Map(et) => {
            let m = doc.as_object().ok_or_else(|| bad("map"))?;
            let mut out = BTreeMap::new();
            for (k, x) in m.iter() { out.insert(k.clone(), decode_value(x, et, &at.key(k.clone()))?); }
            Ok(TypedValue::Map(out))
        }
        SchemaType::Object(attrs) => {
            let m = doc.as_object().ok_or_else(|| bad("object"))?;
            let mut out = BTreeMap::new();
            for (k, t) in attrs.iter() {
                let x = m.get(k).unwrap_or(&Json::Null);
                out.insert(k.clone(), decode_value(x, t, &at.attribute(k.clone()))?);
            }
            for k in m.keys().filter(|k| !attrs.contains_key(*k)) {
                debug!(path = %at.attribute(k.clone()), "ignoring attribute unknown to schema");
            }
            Ok(TypedValue::Object(out))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty() -> SchemaType {
        SchemaType::object([
            ("id", SchemaType::String),
            ("size", SchemaType::Number),
            ("labels", SchemaType::map(SchemaType::String)),
            ("extra", SchemaType::Dynamic),
        ])
    }

    #[test]
    fn encoded_values_decode_to_the_same_value() {
        let v = TypedValue::object([
            ("id", TypedValue::Unknown),
            ("size", TypedValue::Number(BigNumber::parse("123456789012345678901234567890").unwrap())),
            ("labels", TypedValue::Map(BTreeMap::from([("a".to_string(), TypedValue::string("b"))]))),
            ("extra", TypedValue::Tuple(vec![TypedValue::Bool(true), TypedValue::number(2)])),
        ]);
        let dv = DynamicValue::encode(&v, &ty()).unwrap();
        assert_eq!(dv.decode(&ty()).unwrap(), v);
    }

    #[test]
    fn null_and_empty_bytes_are_null() {
        assert!(DynamicValue::null().is_null());
        assert!(DynamicValue::from_bytes(Vec::new()).is_null());
        assert_eq!(DynamicValue::null().decode(&ty()).unwrap(), TypedValue::Null);
        assert!(ProviderState::null().is_null());
    }

    #[test]
    fn malformed_documents_are_rejected() {
        assert!(DynamicValue::from_bytes(b"{".to_vec()).decode(&ty()).is_err());
        assert!(DynamicValue::from_bytes(br#"{"size": true}"#.to_vec()).decode(&ty()).is_err());
    }

    #[test]
    fn tuple_lengths_must_match_the_type() {
        let pair = SchemaType::object([("range", SchemaType::Tuple(vec![SchemaType::Number, SchemaType::Number]))]);
        let short = TypedValue::object([("range", TypedValue::Tuple(vec![TypedValue::number(1)]))]);
        let err = DynamicValue::encode(&short, &pair).unwrap_err();
        assert!(err.to_string().contains("tuple needs 2 elements, found 1"), "{err}");

        let long = DynamicValue::from_bytes(br#"{"range": ["1", "2", "3"]}"#.to_vec());
        let err = long.decode(&pair).unwrap_err();
        assert!(matches!(err, Error::Conversion { ref path, .. } if path == "range"), "{err}");
        let ok = DynamicValue::from_bytes(br#"{"range": ["1", "2"]}"#.to_vec()).decode(&pair).unwrap();
        assert_eq!(ok.attribute("range"), Some(&TypedValue::Tuple(vec![TypedValue::number(1), TypedValue::number(2)])));
    }
}
