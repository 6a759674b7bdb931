#![forbid(unsafe_code)]

use serde_json::{json, Value};
use skyjet_core::{AttributeMap, SecretReference};
use skyjet_secrets::{extract_connection_details, FieldMapping, MemorySecretClient, SensitiveValueBridge};

fn map(v: Value) -> AttributeMap { v.as_object().cloned().unwrap() }

fn conn() -> SecretReference { SecretReference { name: "conn".into(), namespace: None } }

/// Store the sensitive part of `observed` in a connection secret, then
/// restore it into an observation that lacks it.
async fn restore(observed: Value, mapping: &FieldMapping) -> AttributeMap {
    let details = extract_connection_details(&map(observed), mapping);
    let client = MemorySecretClient::new();
    client.insert("team-a", "conn", details).await;
    let bridge = SensitiveValueBridge::new(&client, Some("team-a"));
    let mut target = AttributeMap::new();
    bridge.fetch_into_observation(&conn(), &mut target).await.unwrap();
    target
}

#[tokio::test]
async fn map_keys_with_dots_or_digits_keep_their_shape() {
    let mapping = FieldMapping::from_pairs([("auth", "authSecretRef")]).unwrap();
    for observed in [json!({"auth": {"a.b": "t"}}), json!({"auth": {"0": "t"}}), json!({"auth": {"0": "x", "a.b": "y", "plain": "z"}})] {
        let restored = restore(observed.clone(), &mapping).await;
        assert_eq!(Value::Object(restored), observed);
    }
}

#[tokio::test]
async fn list_indices_restore_in_numeric_order() {
    let mapping = FieldMapping::from_pairs([("users[*].password", "usersSecretRef[*]")]).unwrap();
    let users: Vec<Value> = (0..12).map(|i| json!({"password": format!("p{i}")})).collect();
    let observed = json!({ "users": users });
    let restored = restore(observed.clone(), &mapping).await;
    assert_eq!(Value::Object(restored), observed);
}

#[tokio::test]
async fn huge_indices_are_refused() {
    let client = MemorySecretClient::new();
    client.insert_value("team-a", "conn", "attribute.list.99999999999", "x").await;
    let bridge = SensitiveValueBridge::new(&client, Some("team-a"));
    let mut target = map(json!({"name": "db"}));
    assert!(bridge.fetch_into_observation(&conn(), &mut target).await.is_err());
    assert_eq!(target["name"], json!("db"));
}
