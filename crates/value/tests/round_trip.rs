#![forbid(unsafe_code)]

use serde_json::json;
use skyjet_value::{from_generic, to_generic, Attribute, Block, DynamicValue, NestingMode, SchemaType};

fn schema() -> Block {
    Block::new()
        .with_attribute("id", Attribute::computed(SchemaType::String))
        .with_attribute("name", Attribute::required(SchemaType::String))
        .with_attribute("count", Attribute::optional(SchemaType::Number))
        .with_attribute("weight", Attribute::optional(SchemaType::Number))
        .with_attribute("public", Attribute::optional(SchemaType::Bool))
        .with_attribute("tags", Attribute::optional(SchemaType::map(SchemaType::String)))
        .with_attribute("cidrs", Attribute::optional(SchemaType::list(SchemaType::String)))
        .with_block(
            "rule",
            NestingMode::List,
            Block::new()
                .with_attribute("port", Attribute::required(SchemaType::Number))
                .with_attribute("desc", Attribute::optional(SchemaType::String)),
        )
}

#[test]
fn generic_trees_survive_a_typed_round_trip() {
    let ty = schema().implied_type();
    let cases = vec![
        json!({"id": null, "name": "a", "count": null, "weight": null, "public": null, "tags": null, "cidrs": null, "rule": null}),
        json!({
            "id": "i-123",
            "name": "b",
            "count": -7,
            "weight": 1.25,
            "public": false,
            "tags": {"env": "prod", "team": "infra"},
            "cidrs": ["10.0.0.0/8", "192.168.0.0/16"],
            "rule": [{"port": 443, "desc": "tls"}, {"port": 80, "desc": null}]
        }),
    ];
    for v in cases {
        let typed = from_generic(&v, &ty).unwrap();
        assert_eq!(to_generic(&typed).unwrap(), v);
        // and through the wire encoding as well
        let wire = DynamicValue::encode(&typed, &ty).unwrap();
        assert_eq!(to_generic(&wire.decode(&ty).unwrap()).unwrap(), v);
    }
}

#[test]
fn numbers_beyond_i64_are_rejected_on_the_way_out() {
    let ty = SchemaType::object([("n", SchemaType::Number)]);
    let typed = from_generic(&json!({"n": "123456789012345678901234567890"}), &ty).unwrap();
    let err = to_generic(&typed).unwrap_err();
    assert!(err.to_string().contains("cannot be represented"), "{err}");
}
