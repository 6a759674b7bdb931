//! Field paths over generic attribute trees.
//!
//! Accepted syntax: `a.b[0].c`, `a[*].b`, `a.*.b`, `tags["x.y"]`. A leading
//! dot is ignored. Wildcards expand against the live shape of a tree
//! (array indices or object keys).

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde_json::Value;
use smallvec::SmallVec;

use crate::{Error, Result};

/// A list index may grow a list by at most this many elements.
pub const MAX_LIST_GROWTH: usize = 1024;

/// Marks an escaped field in a secret key; the rest is URL-safe base64.
const ESCAPED_FIELD: char = '-';

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Segment {
    Field(String),
    Index(usize),
    Wildcard,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldPath(SmallVec<[Segment; 6]>);

impl FieldPath {
    pub fn root() -> Self { Self(SmallVec::new()) }

    pub fn parse(s: &str) -> Result<Self> {
        let s = s.strip_prefix('.').unwrap_or(s);
        let mut segs: SmallVec<[Segment; 6]> = SmallVec::new();
        let bytes = s.as_bytes();
        let mut cur = String::new();
        let mut i = 0usize;
        // true right after a closing bracket, where a bare '.' or '[' may follow
        let mut after_bracket = false;
        while i < bytes.len() {
            let c = bytes[i] as char;
            match c {
                '.' => {
                    if cur.is_empty() && !after_bracket {
                        return Err(Error::field_path(s, "empty segment"));
                    }
                    if !cur.is_empty() { segs.push(field_or_wildcard(std::mem::take(&mut cur))); }
                    after_bracket = false;
                    if i + 1 == bytes.len() { return Err(Error::field_path(s, "trailing dot")); }
                    i += 1;
                }
                '[' => {
                    if !cur.is_empty() { segs.push(field_or_wildcard(std::mem::take(&mut cur))); }
                    let close = find_close(s, i + 1).ok_or_else(|| Error::field_path(s, "unclosed bracket"))?;
                    let inner = &s[i + 1..close];
                    segs.push(bracket_segment(s, inner)?);
                    after_bracket = true;
                    i = close + 1;
                }
                ']' => return Err(Error::field_path(s, "unexpected closing bracket")),
                _ => {
                    if after_bracket { return Err(Error::field_path(s, "expected '.' or '[' after ']'")); }
                    let ch_len = s[i..].chars().next().map(|c| c.len_utf8()).unwrap_or(1);
                    cur.push_str(&s[i..i + ch_len]);
                    i += ch_len;
                }
            }
        }
        if !cur.is_empty() { segs.push(field_or_wildcard(cur)); }
        Ok(Self(segs))
    }

    pub fn segments(&self) -> &[Segment] { &self.0 }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn child_field(&self, name: impl Into<String>) -> Self {
        let mut p = self.clone();
        p.0.push(Segment::Field(name.into()));
        p
    }

    pub fn child_index(&self, idx: usize) -> Self {
        let mut p = self.clone();
        p.0.push(Segment::Index(idx));
        p
    }

    pub fn child_wildcard(&self) -> Self {
        let mut p = self.clone();
        p.0.push(Segment::Wildcard);
        p
    }

    pub fn has_wildcard(&self) -> bool { self.0.iter().any(|s| matches!(s, Segment::Wildcard)) }

    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        prefix.0.len() <= self.0.len() && self.0.iter().zip(prefix.0.iter()).all(|(a, b)| a == b)
    }

    /// Pattern match where wildcard segments of `self` match any index or key.
    pub fn matches(&self, concrete: &FieldPath) -> bool {
        self.0.len() == concrete.0.len()
            && self.0.iter().zip(concrete.0.iter()).all(|(p, c)| match (p, c) {
                (Segment::Wildcard, Segment::Field(_) | Segment::Index(_)) => true,
                (a, b) => a == b,
            })
    }

    pub fn get<'a>(&self, v: &'a Value) -> Option<&'a Value> {
        let mut cur = v;
        for seg in self.0.iter() {
            cur = match seg {
                Segment::Field(f) => cur.as_object()?.get(f)?,
                Segment::Index(i) => cur.as_array()?.get(*i)?,
                Segment::Wildcard => return None,
            };
        }
        Some(cur)
    }

    /// Set `new` at this path, allocating intermediate objects and arrays.
    /// Lists are padded with nulls up to the index, at most
    /// [`MAX_LIST_GROWTH`] elements past their current end.
    pub fn set(&self, root: &mut Value, new: Value) -> Result<()> {
        if self.0.is_empty() {
            *root = new;
            return Ok(());
        }
        let mut cur = root;
        for (i, seg) in self.0.iter().enumerate() {
            let last = i + 1 == self.0.len();
            let next_is_index = matches!(self.0.get(i + 1), Some(Segment::Index(_)));
            let empty_child = || if next_is_index { Value::Array(Vec::new()) } else { Value::Object(Default::default()) };
            match seg {
                Segment::Field(f) => {
                    if cur.is_null() { *cur = Value::Object(Default::default()); }
                    let obj = cur
                        .as_object_mut()
                        .ok_or_else(|| Error::field_path(self, format!("segment {f:?} does not address an object")))?;
                    if last {
                        obj.insert(f.clone(), new);
                        return Ok(());
                    }
                    let slot = obj.entry(f.clone()).or_insert_with(empty_child);
                    if slot.is_null() { *slot = empty_child(); }
                    cur = slot;
                }
                Segment::Index(idx) => {
                    if cur.is_null() { *cur = Value::Array(Vec::new()); }
                    let arr = cur
                        .as_array_mut()
                        .ok_or_else(|| Error::field_path(self, format!("index {idx} does not address an array")))?;
                    if *idx > arr.len() + MAX_LIST_GROWTH {
                        return Err(Error::conversion(self, format!("index {idx} is far past the list end ({})", arr.len())));
                    }
                    while arr.len() <= *idx { arr.push(Value::Null); }
                    if last {
                        arr[*idx] = new;
                        return Ok(());
                    }
                    if arr[*idx].is_null() { arr[*idx] = empty_child(); }
                    cur = &mut arr[*idx];
                }
                Segment::Wildcard => return Err(Error::field_path(self, "cannot set through a wildcard")),
            }
        }
        Ok(())
    }

    /// Remove the value at this path, returning it when present.
    pub fn remove(&self, root: &mut Value) -> Option<Value> {
        let (last, parent) = self.0.split_last()?;
        let mut cur = root;
        for seg in parent {
            cur = match seg {
                Segment::Field(f) => cur.as_object_mut()?.get_mut(f)?,
                Segment::Index(i) => cur.as_array_mut()?.get_mut(*i)?,
                Segment::Wildcard => return None,
            };
        }
        match last {
            Segment::Field(f) => cur.as_object_mut()?.remove(f),
            // keep sibling indices stable; a removed element becomes null
            Segment::Index(i) => cur.as_array_mut()?.get_mut(*i).map(|v| std::mem::replace(v, Value::Null)),
            Segment::Wildcard => None,
        }
    }

    /// Expand wildcard segments against `v`; only paths that exist are returned.
    pub fn expand_wildcards(&self, v: &Value) -> Vec<FieldPath> {
        fn walk(segs: &[Segment], v: &Value, prefix: FieldPath, out: &mut Vec<FieldPath>) {
            let Some((seg, rest)) = segs.split_first() else {
                out.push(prefix);
                return;
            };
            match seg {
                Segment::Field(f) => {
                    if let Some(n) = v.as_object().and_then(|m| m.get(f)) { walk(rest, n, prefix.child_field(f.clone()), out); }
                }
                Segment::Index(i) => {
                    if let Some(n) = v.as_array().and_then(|a| a.get(*i)) { walk(rest, n, prefix.child_index(*i), out); }
                }
                Segment::Wildcard => match v {
                    Value::Array(a) => {
                        for (i, n) in a.iter().enumerate() { walk(rest, n, prefix.child_index(i), out); }
                    }
                    Value::Object(m) => {
                        for (k, n) in m.iter() { walk(rest, n, prefix.child_field(k.clone()), out); }
                    }
                    _ => {}
                },
            }
        }
        let mut out = Vec::new();
        walk(&self.0, v, FieldPath::root(), &mut out);
        out
    }

    /// Concrete segments found at the wildcard positions of `pattern`.
    pub fn wildcard_bindings(pattern: &FieldPath, concrete: &FieldPath) -> Vec<Segment> {
        pattern
            .0
            .iter()
            .zip(concrete.0.iter())
            .filter(|(p, _)| matches!(p, Segment::Wildcard))
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Replace wildcards, in order, with `bindings`.
    pub fn bind_wildcards(&self, bindings: &[Segment]) -> Result<FieldPath> {
        let mut it = bindings.iter();
        let mut out = FieldPath::root();
        for seg in self.0.iter() {
            match seg {
                Segment::Wildcard => {
                    let b = it
                        .next()
                        .ok_or_else(|| Error::field_path(self, "more wildcards than bound segments"))?;
                    out.0.push(b.clone());
                }
                s => out.0.push(s.clone()),
            }
        }
        Ok(out)
    }

    /// Encode as a secret key: dot separated, list indices as plain numbers.
    ///
    /// Secret keys only allow `[-._a-zA-Z0-9]`, so a field that is not a
    /// plain name (contains a dot, is all digits, starts with `-`) is written
    /// as `-` followed by its URL-safe base64 form.
    pub fn to_secret_key(&self) -> String {
        self.0
            .iter()
            .map(|s| match s {
                Segment::Field(f) if is_plain_key_field(f) => f.clone(),
                Segment::Field(f) => format!("{ESCAPED_FIELD}{}", URL_SAFE_NO_PAD.encode(f)),
                Segment::Index(i) => i.to_string(),
                Segment::Wildcard => "*".to_string(),
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Decode a secret key produced by [`FieldPath::to_secret_key`].
    ///
    /// A key holding brackets (`users[0].password`, `auth["a.b"]`) is read
    /// with the regular path syntax, where only bracketed integers are
    /// indices.
    pub fn from_secret_key(key: &str) -> Result<FieldPath> {
        if key.contains('[') { return FieldPath::parse(key); }
        let key = key.strip_prefix('.').unwrap_or(key);
        let mut segs: SmallVec<[Segment; 6]> = SmallVec::new();
        for part in key.split('.') {
            let seg = if part.is_empty() {
                return Err(Error::field_path(key, "empty segment"));
            } else if let Some(escaped) = part.strip_prefix(ESCAPED_FIELD) {
                let raw = URL_SAFE_NO_PAD.decode(escaped).map_err(|e| Error::field_path(key, e))?;
                Segment::Field(String::from_utf8(raw).map_err(|e| Error::field_path(key, e))?)
            } else if part.bytes().all(|b| b.is_ascii_digit()) {
                Segment::Index(part.parse().map_err(|e| Error::field_path(key, e))?)
            } else {
                field_or_wildcard(part.to_string())
            };
            segs.push(seg);
        }
        Ok(FieldPath(segs))
    }
}

fn field_or_wildcard(s: String) -> Segment {
    if s == "*" { Segment::Wildcard } else { Segment::Field(s) }
}

fn find_close(s: &str, from: usize) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = from;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b']' => return Some(i),
            None => {}
        }
        i += 1;
    }
    None
}

fn bracket_segment(path: &str, inner: &str) -> Result<Segment> {
    if inner.is_empty() { return Err(Error::field_path(path, "empty brackets")); }
    if inner == "*" { return Ok(Segment::Wildcard); }
    if inner.bytes().all(|b| b.is_ascii_digit()) {
        return inner.parse::<usize>().map(Segment::Index).map_err(|e| Error::field_path(path, e));
    }
    let unquoted = inner
        .strip_prefix('"')
        .and_then(|x| x.strip_suffix('"'))
        .or_else(|| inner.strip_prefix('\'').and_then(|x| x.strip_suffix('\'')))
        .unwrap_or(inner);
    Ok(Segment::Field(unquoted.to_string()))
}

fn is_plain_field(f: &str) -> bool {
    !f.is_empty() && f != "*" && f.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

fn is_plain_key_field(f: &str) -> bool {
    is_plain_field(f) && !f.starts_with(ESCAPED_FIELD) && !f.bytes().all(|b| b.is_ascii_digit())
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            match seg {
                Segment::Field(name) if is_plain_field(name) => {
                    if i > 0 { f.write_str(".")?; }
                    f.write_str(name)?;
                }
                Segment::Field(name) => write!(f, "[{name:?}]")?,
                Segment::Index(idx) => write!(f, "[{idx}]")?,
                Segment::Wildcard => f.write_str("[*]")?,
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for FieldPath {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> { FieldPath::parse(s) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn p(s: &str) -> FieldPath { FieldPath::parse(s).unwrap() }

    #[test]
    fn parse_and_display_are_stable() {
        for s in ["a", "a.b[0].c", "users[*].password", "tags[\"x.y\"]", "a[0][1]"] {
            assert_eq!(p(s).to_string(), s);
        }
        assert_eq!(p(".spec.x").to_string(), "spec.x");
        assert_eq!(p("a.*.b"), p("a[*].b"));
        assert_eq!(p("a['k']").segments(), &[Segment::Field("a".into()), Segment::Field("k".into())]);
    }

    #[test]
    fn parse_rejects_malformed_paths() {
        for s in ["a..b", "a.", "a[0", "a]", "a[]", "a[0]b"] {
            assert!(FieldPath::parse(s).is_err(), "{s} should fail");
        }
    }

    #[test]
    fn set_allocates_intermediate_nodes() {
        let mut v = json!({});
        p("a.b[2].c").set(&mut v, json!(1)).unwrap();
        assert_eq!(v, json!({"a": {"b": [null, null, {"c": 1}]}}));
        p("a.b[0]").set(&mut v, json!("x")).unwrap();
        assert_eq!(p("a.b[0]").get(&v), Some(&json!("x")));
        assert!(p("a.b.c").set(&mut v, json!(1)).is_err());
    }

    #[test]
    fn set_refuses_runaway_list_growth() {
        let mut v = json!({"list": [1]});
        let err = FieldPath::from_secret_key("list.99999999999").unwrap().set(&mut v, json!("x")).unwrap_err();
        assert!(matches!(err, Error::Conversion { .. }), "{err}");
        assert_eq!(v, json!({"list": [1]}));
        p("list[3]").set(&mut v, json!(4)).unwrap();
        assert_eq!(v, json!({"list": [1, null, null, 4]}));
    }

    #[test]
    fn expand_wildcards_follows_live_shape() {
        let v = json!({"users": [{"p": 1}, {"q": 2}, {"p": 3}], "m": {"x": {"p": 4}}});
        let got: Vec<String> = p("users[*].p").expand_wildcards(&v).iter().map(|x| x.to_string()).collect();
        assert_eq!(got, vec!["users[0].p", "users[2].p"]);
        let got: Vec<String> = p("m.*.p").expand_wildcards(&v).iter().map(|x| x.to_string()).collect();
        assert_eq!(got, vec!["m.x.p"]);
        assert!(p("missing[*]").expand_wildcards(&v).is_empty());
    }

    #[test]
    fn bindings_move_indices_between_patterns() {
        let from = p("databaseUsers[*].passwordSecretRef");
        let to = p("users[*].password");
        let concrete = p("databaseUsers[1].passwordSecretRef");
        let b = FieldPath::wildcard_bindings(&from, &concrete);
        assert_eq!(to.bind_wildcards(&b).unwrap().to_string(), "users[1].password");
        assert!(p("a[*][*]").bind_wildcards(&b).is_err());
    }

    #[test]
    fn secret_keys_round_trip() {
        let path = p("users[0].password");
        assert_eq!(path.to_secret_key(), "users.0.password");
        assert_eq!(FieldPath::from_secret_key("users.0.password").unwrap(), path);
        assert_eq!(FieldPath::from_secret_key("users[0].password").unwrap(), path);
    }

    #[test]
    fn secret_keys_keep_map_keys_apart_from_indices() {
        let dotted = p("auth").child_field("a.b");
        let digits = p("auth").child_field("0");
        let dashed = p("auth").child_field("-x");
        for path in [&dotted, &digits, &dashed, &p("tags[\"kubernetes.io/name\"]"), &p("my-db.user_name")] {
            let key = path.to_secret_key();
            assert!(key.bytes().all(|b| b.is_ascii_alphanumeric() || b"-._".contains(&b)), "{key}");
            assert_eq!(&FieldPath::from_secret_key(&key).unwrap(), path, "{key}");
        }
        assert_eq!(digits.to_secret_key(), "auth.-MA");
        assert_eq!(FieldPath::from_secret_key("auth[\"0\"]").unwrap(), digits);
        assert_eq!(FieldPath::from_secret_key("auth.0").unwrap(), p("auth[0]"));
        assert!(FieldPath::from_secret_key("auth..x").is_err());
    }

    #[test]
    fn wildcard_patterns_match_concrete_paths() {
        assert!(p("rule[*].name").matches(&p("rule[3].name")));
        assert!(!p("rule[*].name").matches(&p("rule[3].id")));
        assert!(p("a.b[0]").starts_with(&p("a")));
    }

    #[test]
    fn remove_keeps_list_positions() {
        let mut v = json!({"a": [1, 2], "b": {"c": true}});
        assert_eq!(p("a[0]").remove(&mut v), Some(json!(1)));
        assert_eq!(p("b.c").remove(&mut v), Some(json!(true)));
        assert_eq!(v, json!({"a": [null, 2], "b": {}}));
    }
}
