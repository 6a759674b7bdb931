#![forbid(unsafe_code)]

use skyjet_diff::evaluate;
use skyjet_value::{AttributePath, TypedValue};

fn s(v: &str) -> TypedValue { TypedValue::string(v) }

fn prior() -> TypedValue {
    TypedValue::object([
        ("id", s("i-1")),
        ("name", s("web")),
        ("arn", s("arn:1")),
        ("zone", s("eu-1")),
        ("rules", TypedValue::List(vec![TypedValue::object([("port", TypedValue::number(80)), ("cidr", s("0.0.0.0/0"))])])),
    ])
}

#[test]
fn unknown_and_null_planned_values_are_never_actionable() {
    let planned = TypedValue::object([
        ("id", s("i-1")),
        ("name", s("web")),
        ("arn", TypedValue::Unknown),
        ("zone", TypedValue::Null),
        ("rules", TypedValue::List(vec![TypedValue::object([("port", TypedValue::number(80)), ("cidr", TypedValue::Unknown)])])),
    ]);
    let r = evaluate(&prior(), &planned, &[], &[]);
    assert!(r.exists);
    assert!(r.up_to_date, "{:?}", r.changed_paths);
    assert!(r.changed_paths.is_empty());
}

#[test]
fn a_real_change_is_reported_alongside_noise() {
    let mut planned = prior();
    if let TypedValue::Object(m) = &mut planned {
        m.insert("name".into(), s("api"));
        m.insert("arn".into(), TypedValue::Unknown);
    }
    let r = evaluate(&prior(), &planned, &[], &[]);
    assert!(!r.up_to_date);
    assert_eq!(r.changed_paths, vec!["name"]);
}

#[test]
fn init_only_attributes_do_not_drive_updates() {
    let mut planned = prior();
    if let TypedValue::Object(m) = &mut planned {
        m.insert("zone".into(), s("eu-2"));
    }
    assert!(evaluate(&prior(), &planned, &[], &["zone".to_string()]).up_to_date);
    assert!(!evaluate(&prior(), &planned, &[], &[]).up_to_date);
}

#[test]
fn replace_flags_on_unchanged_paths_are_false_positives() {
    let zone = AttributePath::root().attribute("zone");
    let port = AttributePath::root().attribute("rules").index(0).attribute("port");
    let r = evaluate(&prior(), &prior(), &[zone.clone(), port.clone()], &[]);
    assert!(r.requires_replace.is_empty());
    assert!(!r.needs_replace());

    let mut planned = prior();
    if let TypedValue::Object(m) = &mut planned {
        m.insert("zone".into(), s("eu-2"));
    }
    let r = evaluate(&prior(), &planned, &[zone, port], &[]);
    assert_eq!(r.requires_replace, vec!["zone"]);
}
