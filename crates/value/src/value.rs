use std::collections::BTreeMap;

use crate::number::BigNumber;
use crate::path::{AttributePath, PathStep};

/// Schema-typed dynamic value exchanged with providers.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TypedValue {
    #[default]
    Null,
    /// Not yet known; filled in by the provider during apply.
    Unknown,
    Bool(bool),
    Number(BigNumber),
    String(String),
    List(Vec<TypedValue>),
    Set(Vec<TypedValue>),
    Tuple(Vec<TypedValue>),
    Map(BTreeMap<String, TypedValue>),
    Object(BTreeMap<String, TypedValue>),
}

impl TypedValue {
    pub fn string(s: impl Into<String>) -> Self { TypedValue::String(s.into()) }
    pub fn number(v: i64) -> Self { TypedValue::Number(BigNumber::from_i64(v)) }

    pub fn object<I, K>(attrs: I) -> Self
    where
        I: IntoIterator<Item = (K, TypedValue)>,
        K: Into<String>,
    {
        TypedValue::Object(attrs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_null(&self) -> bool { matches!(self, TypedValue::Null) }
    pub fn is_unknown(&self) -> bool { matches!(self, TypedValue::Unknown) }

    /// True when neither this value nor anything nested in it is unknown.
    pub fn is_wholly_known(&self) -> bool {
        match self {
            TypedValue::Unknown => false,
            TypedValue::List(xs) | TypedValue::Set(xs) | TypedValue::Tuple(xs) => xs.iter().all(Self::is_wholly_known),
            TypedValue::Map(m) | TypedValue::Object(m) => m.values().all(Self::is_wholly_known),
            _ => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn attributes(&self) -> Option<&BTreeMap<String, TypedValue>> {
        match self {
            TypedValue::Object(m) | TypedValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&TypedValue> { self.attributes()?.get(name) }

    pub fn elements(&self) -> Option<&[TypedValue]> {
        match self {
            TypedValue::List(xs) | TypedValue::Set(xs) | TypedValue::Tuple(xs) => Some(xs),
            _ => None,
        }
    }

    pub fn step(&self, step: &PathStep) -> Option<&TypedValue> {
        match (self, step) {
            (TypedValue::Object(m), PathStep::Attribute(k)) | (TypedValue::Map(m), PathStep::Key(k)) => m.get(k),
            // map keys are often addressed as attributes by providers
            (TypedValue::Map(m), PathStep::Attribute(k)) => m.get(k),
            (TypedValue::List(xs) | TypedValue::Tuple(xs) | TypedValue::Set(xs), PathStep::Index(i)) => xs.get(*i),
            _ => None,
        }
    }

    pub fn get(&self, path: &AttributePath) -> Option<&TypedValue> {
        path.steps().iter().try_fold(self, |cur, s| cur.step(s))
    }

    /// Equality where set elements compare without regard to order.
    pub fn semantic_eq(&self, other: &TypedValue) -> bool {
        match (self, other) {
            (TypedValue::Set(a), TypedValue::Set(b)) => {
                if a.len() != b.len() { return false; }
                let mut used = vec![false; b.len()];
                a.iter().all(|x| {
                    let hit = b.iter().enumerate().find(|(i, y)| !used[*i] && x.semantic_eq(y)).map(|(i, _)| i);
                    match hit {
                        Some(i) => {
                            used[i] = true;
                            true
                        }
                        None => false,
                    }
                })
            }
            (TypedValue::List(a), TypedValue::List(b)) | (TypedValue::Tuple(a), TypedValue::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.semantic_eq(y))
            }
            (TypedValue::Map(a), TypedValue::Map(b)) | (TypedValue::Object(a), TypedValue::Object(b)) => {
                a.len() == b.len() && a.iter().all(|(k, x)| b.get(k).map(|y| x.semantic_eq(y)).unwrap_or(false))
            }
            (a, b) => a == b,
        }
    }

    /// Paths of every unknown value nested in this one.
    pub fn unknown_paths(&self) -> Vec<AttributePath> {
        fn walk(v: &TypedValue, at: AttributePath, out: &mut Vec<AttributePath>) {
            match v {
                TypedValue::Unknown => out.push(at),
                TypedValue::List(xs) | TypedValue::Set(xs) | TypedValue::Tuple(xs) => {
                    for (i, x) in xs.iter().enumerate() { walk(x, at.index(i), out); }
                }
                TypedValue::Object(m) => {
                    for (k, x) in m.iter() { walk(x, at.attribute(k.clone()), out); }
                }
                TypedValue::Map(m) => {
                    for (k, x) in m.iter() { walk(x, at.key(k.clone()), out); }
                }
                _ => {}
            }
        }
        let mut out = Vec::new();
        walk(self, AttributePath::root(), &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sets_compare_without_order() {
        let a = TypedValue::Set(vec![TypedValue::string("x"), TypedValue::string("y")]);
        let b = TypedValue::Set(vec![TypedValue::string("y"), TypedValue::string("x")]);
        assert!(a.semantic_eq(&b));
        assert_ne!(a, b);
        let l1 = TypedValue::List(vec![TypedValue::string("x"), TypedValue::string("y")]);
        let l2 = TypedValue::List(vec![TypedValue::string("y"), TypedValue::string("x")]);
        assert!(!l1.semantic_eq(&l2));
        let dup = TypedValue::Set(vec![TypedValue::string("x"), TypedValue::string("x")]);
        assert!(!a.semantic_eq(&dup));
    }

    #[test]
    fn unknown_paths_are_reported() {
        let v = TypedValue::object([
            ("id", TypedValue::Unknown),
            ("name", TypedValue::string("a")),
            ("rules", TypedValue::List(vec![TypedValue::object([("arn", TypedValue::Unknown)])])),
        ]);
        let got: Vec<String> = v.unknown_paths().iter().map(|p| p.to_string()).collect();
        assert_eq!(got, vec!["id", "rules[0].arn"]);
        assert!(!v.is_wholly_known());
        assert_eq!(v.get(&AttributePath::root().attribute("name")), Some(&TypedValue::string("a")));
    }
}
