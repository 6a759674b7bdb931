use std::fmt;

use serde_json::Value as Json;
use smallvec::SmallVec;

use skyjet_core::{FieldPath, Segment};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathStep {
    Attribute(String),
    Key(String),
    Index(usize),
}

/// Location inside a typed value, as reported by providers (e.g. in
/// requires-replace lists).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AttributePath(SmallVec<[PathStep; 6]>);

impl AttributePath {
    pub fn root() -> Self { Self::default() }

    pub fn new(steps: impl IntoIterator<Item = PathStep>) -> Self { Self(steps.into_iter().collect()) }

    pub fn steps(&self) -> &[PathStep] { &self.0 }
    pub fn is_root(&self) -> bool { self.0.is_empty() }

    pub fn attribute(&self, name: impl Into<String>) -> Self { self.push(PathStep::Attribute(name.into())) }
    pub fn key(&self, key: impl Into<String>) -> Self { self.push(PathStep::Key(key.into())) }
    pub fn index(&self, i: usize) -> Self { self.push(PathStep::Index(i)) }

    fn push(&self, step: PathStep) -> Self {
        let mut p = self.clone();
        p.0.push(step);
        p
    }

    /// First attribute name, i.e. the top-level field this path lives under.
    pub fn top_level(&self) -> Option<&str> {
        match self.0.first() {
            Some(PathStep::Attribute(a)) => Some(a),
            _ => None,
        }
    }

    pub fn to_field_path(&self) -> FieldPath {
        let mut p = FieldPath::root();
        for s in self.0.iter() {
            p = match s {
                PathStep::Attribute(a) | PathStep::Key(a) => p.child_field(a.clone()),
                PathStep::Index(i) => p.child_index(*i),
            };
        }
        p
    }

    /// Attribute steps for fields, index steps for list positions; wildcards
    /// have no counterpart and yield `None`.
    pub fn from_field_path(fp: &FieldPath) -> Option<Self> {
        let mut out = Self::root();
        for seg in fp.segments() {
            out = match seg {
                Segment::Field(f) => out.attribute(f.clone()),
                Segment::Index(i) => out.index(*i),
                Segment::Wildcard => return None,
            };
        }
        Some(out)
    }

    /// Parse the JSON step list used in plan documents: `["rule", 0, "name"]`.
    pub fn from_json_steps(v: &Json) -> Option<Self> {
        let steps = v.as_array()?;
        let mut out = Self::root();
        for s in steps.iter() {
            out = match s {
                // map keys and attributes are not distinguished in this form
                Json::String(a) => out.attribute(a.clone()),
                Json::Number(n) => out.index(n.as_u64()? as usize),
                _ => return None,
            };
        }
        Some(out)
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, s) in self.0.iter().enumerate() {
            match s {
                PathStep::Attribute(a) => {
                    if i > 0 { f.write_str(".")?; }
                    f.write_str(a)?;
                }
                PathStep::Key(k) => write!(f, "[{k:?}]")?,
                PathStep::Index(n) => write!(f, "[{n}]")?,
            }
        }
        Ok(())
    }
}
