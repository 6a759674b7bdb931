use std::collections::BTreeMap;

use crate::schema::{Block, NestingMode};
use crate::value::TypedValue;

/// Proposed new state handed to a plan call: configuration values win, but
/// computed attributes left null in configuration keep their prior value.
pub fn proposed_new_state(block: &Block, prior: &TypedValue, config: &TypedValue) -> TypedValue {
    if config.is_null() || config.is_unknown() { return config.clone(); }
    let empty = BTreeMap::new();
    let prior_attrs = prior.attributes().unwrap_or(&empty);
    let Some(config_attrs) = config.attributes() else { return config.clone() };

    let mut out = BTreeMap::new();
    for (name, attr) in block.attributes.iter() {
        let cv = config_attrs.get(name).cloned().unwrap_or_default();
        let pv = prior_attrs.get(name).cloned().unwrap_or_default();
        let v = if attr.computed && cv.is_null() { pv } else { cv };
        out.insert(name.clone(), v);
    }
    for (name, nb) in block.block_types.iter() {
        let cv = config_attrs.get(name).cloned().unwrap_or_default();
        let pv = prior_attrs.get(name).cloned().unwrap_or_default();
        let v = match nb.nesting_mode {
            NestingMode::Single | NestingMode::Group => proposed_new_state(&nb.block, &pv, &cv),
            NestingMode::List => match (&cv, pv.elements()) {
                (TypedValue::List(cs), Some(ps)) => TypedValue::List(
                    cs.iter()
                        .enumerate()
                        .map(|(i, c)| proposed_new_state(&nb.block, ps.get(i).unwrap_or(&TypedValue::Null), c))
                        .collect(),
                ),
                _ => cv,
            },
            NestingMode::Map => match (&cv, &pv) {
                (TypedValue::Map(cs), TypedValue::Map(ps)) => TypedValue::Map(
                    cs.iter()
                        .map(|(k, c)| (k.clone(), proposed_new_state(&nb.block, ps.get(k).unwrap_or(&TypedValue::Null), c)))
                        .collect(),
                ),
                _ => cv,
            },
            // set elements have no identity to pair them with prior elements
            NestingMode::Set => cv,
        };
        out.insert(name.clone(), v);
    }
    TypedValue::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, SchemaType};

    fn block() -> Block {
        Block::new()
            .with_attribute("id", Attribute::computed(SchemaType::String))
            .with_attribute("name", Attribute::required(SchemaType::String))
            .with_attribute("zone", Attribute::optional_computed(SchemaType::String))
            .with_attribute("note", Attribute::optional(SchemaType::String))
            .with_block(
                "settings",
                NestingMode::Single,
                Block::new().with_attribute("tier", Attribute::optional_computed(SchemaType::String)),
            )
    }

    #[test]
    fn computed_attributes_keep_prior_values() {
        let prior = TypedValue::object([
            ("id", TypedValue::string("i-1")),
            ("name", TypedValue::string("old")),
            ("zone", TypedValue::string("eu-1")),
            ("note", TypedValue::string("keep?")),
            ("settings", TypedValue::object([("tier", TypedValue::string("gold"))])),
        ]);
        let config = TypedValue::object([
            ("name", TypedValue::string("new")),
            ("settings", TypedValue::object([("tier", TypedValue::Null)])),
        ]);
        let got = proposed_new_state(&block(), &prior, &config);
        assert_eq!(got.attribute("id"), Some(&TypedValue::string("i-1")));
        assert_eq!(got.attribute("name"), Some(&TypedValue::string("new")));
        assert_eq!(got.attribute("zone"), Some(&TypedValue::string("eu-1")));
        assert_eq!(got.attribute("note"), Some(&TypedValue::Null));
        assert_eq!(got.attribute("settings").and_then(|s| s.attribute("tier")), Some(&TypedValue::string("gold")));
    }

    #[test]
    fn null_config_proposes_destroy() {
        let prior = TypedValue::object([("id", TypedValue::string("i-1"))]);
        assert!(proposed_new_state(&block(), &prior, &TypedValue::Null).is_null());
    }
}
