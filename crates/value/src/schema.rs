//! Resource schemas as reported by providers.
//!
//! Types use the provider protocol's JSON type notation: `"string"`,
//! `"number"`, `"bool"`, `"dynamic"`, `["list", T]`, `["set", T]`,
//! `["map", T]`, `["object", {..}]` and `["tuple", [..]]`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};

use skyjet_core::{Error, FieldPath, Result, Segment};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Json", into = "Json")]
pub enum SchemaType {
    Bool,
    Number,
    String,
    /// Any type; the concrete shape is taken from the value itself.
    Dynamic,
    List(Box<SchemaType>),
    Set(Box<SchemaType>),
    Map(Box<SchemaType>),
    Object(BTreeMap<String, SchemaType>),
    Tuple(Vec<SchemaType>),
}

impl SchemaType {
    pub fn list(t: SchemaType) -> Self { SchemaType::List(Box::new(t)) }
    pub fn set(t: SchemaType) -> Self { SchemaType::Set(Box::new(t)) }
    pub fn map(t: SchemaType) -> Self { SchemaType::Map(Box::new(t)) }

    pub fn object<I, K>(attrs: I) -> Self
    where
        I: IntoIterator<Item = (K, SchemaType)>,
        K: Into<String>,
    {
        SchemaType::Object(attrs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn from_json(v: &Json) -> Result<Self> {
        match v {
            Json::String(s) => match s.as_str() {
                "bool" => Ok(SchemaType::Bool),
                "number" => Ok(SchemaType::Number),
                "string" => Ok(SchemaType::String),
                "dynamic" => Ok(SchemaType::Dynamic),
                other => Err(Error::conversion("type", format!("unknown primitive type {other:?}"))),
            },
            Json::Array(parts) => {
                let kind = parts.first().and_then(|k| k.as_str()).ok_or_else(|| Error::conversion("type", "missing collection kind"))?;
                let arg = parts.get(1).ok_or_else(|| Error::conversion("type", format!("{kind} is missing its element type")))?;
                match kind {
                    "list" => Ok(SchemaType::list(Self::from_json(arg)?)),
                    "set" => Ok(SchemaType::set(Self::from_json(arg)?)),
                    "map" => Ok(SchemaType::map(Self::from_json(arg)?)),
                    "object" => {
                        let attrs = arg.as_object().ok_or_else(|| Error::conversion("type", "object attributes must be a map"))?;
                        let mut out = BTreeMap::new();
                        for (k, t) in attrs.iter() { out.insert(k.clone(), Self::from_json(t)?); }
                        Ok(SchemaType::Object(out))
                    }
                    "tuple" => {
                        let elems = arg.as_array().ok_or_else(|| Error::conversion("type", "tuple elements must be a list"))?;
                        Ok(SchemaType::Tuple(elems.iter().map(Self::from_json).collect::<Result<_>>()?))
                    }
                    other => Err(Error::conversion("type", format!("unknown collection kind {other:?}"))),
                }
            }
            _ => Err(Error::conversion("type", format!("unsupported type notation {v}"))),
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            SchemaType::Bool => json!("bool"),
            SchemaType::Number => json!("number"),
            SchemaType::String => json!("string"),
            SchemaType::Dynamic => json!("dynamic"),
            SchemaType::List(t) => json!(["list", t.to_json()]),
            SchemaType::Set(t) => json!(["set", t.to_json()]),
            SchemaType::Map(t) => json!(["map", t.to_json()]),
            SchemaType::Object(attrs) => {
                let m: serde_json::Map<String, Json> = attrs.iter().map(|(k, t)| (k.clone(), t.to_json())).collect();
                json!(["object", m])
            }
            SchemaType::Tuple(elems) => json!(["tuple", elems.iter().map(|t| t.to_json()).collect::<Vec<_>>()]),
        }
    }

    /// Type of the value found by following `path` (indices/keys step into elements).
    pub fn at_path(&self, path: &FieldPath) -> Option<&SchemaType> {
        let mut cur = self;
        for seg in path.segments() {
            cur = match (cur, seg) {
                (SchemaType::Object(attrs), Segment::Field(f)) => attrs.get(f)?,
                (SchemaType::Map(t), Segment::Field(_) | Segment::Wildcard) => t,
                (SchemaType::List(t) | SchemaType::Set(t), Segment::Index(_) | Segment::Wildcard) => t,
                (SchemaType::Tuple(ts), Segment::Index(i)) => ts.get(*i)?,
                (SchemaType::Dynamic, _) => return Some(cur),
                _ => return None,
            };
        }
        Some(cur)
    }
}

impl TryFrom<Json> for SchemaType {
    type Error = Error;
    fn try_from(v: Json) -> Result<Self> { SchemaType::from_json(&v) }
}

impl From<SchemaType> for Json {
    fn from(t: SchemaType) -> Self { t.to_json() }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(rename = "type")]
    pub type_: Option<SchemaType>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub computed: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sensitive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Attribute {
    pub fn required(t: SchemaType) -> Self { Self { type_: Some(t), required: true, ..Default::default() } }
    pub fn optional(t: SchemaType) -> Self { Self { type_: Some(t), optional: true, ..Default::default() } }
    pub fn computed(t: SchemaType) -> Self { Self { type_: Some(t), computed: true, ..Default::default() } }
    pub fn optional_computed(t: SchemaType) -> Self { Self { type_: Some(t), optional: true, computed: true, ..Default::default() } }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Set only by the provider; never part of user configuration.
    pub fn is_computed_only(&self) -> bool { self.computed && !self.optional && !self.required }

    pub fn value_type(&self) -> SchemaType { self.type_.clone().unwrap_or(SchemaType::Dynamic) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NestingMode {
    Single,
    Group,
    List,
    Set,
    Map,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedBlock {
    pub nesting_mode: NestingMode,
    pub block: Block,
    #[serde(default)]
    pub min_items: u64,
    #[serde(default)]
    pub max_items: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    #[serde(default)]
    pub attributes: BTreeMap<String, Attribute>,
    #[serde(default)]
    pub block_types: BTreeMap<String, NestedBlock>,
}

impl Block {
    pub fn new() -> Self { Self::default() }

    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    pub fn with_block(mut self, name: impl Into<String>, mode: NestingMode, block: Block) -> Self {
        self.block_types.insert(name.into(), NestedBlock { nesting_mode: mode, block, min_items: 0, max_items: 0 });
        self
    }

    /// Object type describing values that conform to this block.
    pub fn implied_type(&self) -> SchemaType {
        let mut attrs = BTreeMap::new();
        for (name, a) in self.attributes.iter() { attrs.insert(name.clone(), a.value_type()); }
        for (name, nb) in self.block_types.iter() {
            let inner = nb.block.implied_type();
            let t = match nb.nesting_mode {
                NestingMode::Single | NestingMode::Group => inner,
                NestingMode::List => SchemaType::list(inner),
                NestingMode::Set => SchemaType::set(inner),
                NestingMode::Map => SchemaType::map(inner),
            };
            attrs.insert(name.clone(), t);
        }
        SchemaType::Object(attrs)
    }

    /// Attribute addressed by a field path; list indices, map keys and wildcards
    /// step through nested blocks.
    pub fn attribute_at(&self, path: &FieldPath) -> Option<&Attribute> {
        let segs = path.segments();
        let mut block = self;
        let mut i = 0usize;
        while i < segs.len() {
            let Segment::Field(name) = &segs[i] else { return None };
            if i + 1 == segs.len() || !block.block_types.contains_key(name) {
                return block.attributes.get(name);
            }
            let nb = block.block_types.get(name)?;
            block = &nb.block;
            i += 1;
            if !matches!(nb.nesting_mode, NestingMode::Single | NestingMode::Group) {
                // skip the element selector
                if i < segs.len() && !matches!(segs[i], Segment::Field(_)) || nb.nesting_mode == NestingMode::Map {
                    i += 1;
                }
            }
        }
        None
    }

    /// Names of top-level attributes set only by the provider.
    pub fn computed_only_attributes(&self) -> Vec<&str> {
        self.attributes.iter().filter(|(_, a)| a.is_computed_only()).map(|(k, _)| k.as_str()).collect()
    }

    /// Paths of every sensitive attribute, with wildcards for repeated blocks.
    pub fn sensitive_paths(&self) -> Vec<FieldPath> {
        fn walk(b: &Block, prefix: FieldPath, out: &mut Vec<FieldPath>) {
            for (name, a) in b.attributes.iter() {
                if a.sensitive { out.push(prefix.child_field(name.clone())); }
            }
            for (name, nb) in b.block_types.iter() {
                let mut p = prefix.child_field(name.clone());
                if !matches!(nb.nesting_mode, NestingMode::Single | NestingMode::Group) {
                    p = p.child_wildcard();
                }
                walk(&nb.block, p, out);
            }
        }
        let mut out = Vec::new();
        walk(self, FieldPath::root(), &mut out);
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSchema {
    #[serde(default)]
    pub version: i64,
    pub block: Block,
}

impl ResourceSchema {
    pub fn new(block: Block) -> Self { Self { version: 0, block } }
    pub fn implied_type(&self) -> SchemaType { self.block.implied_type() }
}
