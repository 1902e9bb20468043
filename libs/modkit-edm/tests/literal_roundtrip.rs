#![allow(clippy::unwrap_used, clippy::expect_used)]

use modkit_edm::literal::{format_json, format_uri_literal, parse_json};
use modkit_edm::{EdmPrimitive, FormatError};
use serde_json::{Value, json};

fn round_trip(ty: EdmPrimitive, client: &Value) -> Value {
    let wire = format_json(ty, client).unwrap();
    parse_json(ty, &wire).unwrap()
}

#[test]
fn every_primitive_survives_a_wire_round_trip() {
    let cases = [
        (EdmPrimitive::Binary, json!("AQID")),
        (EdmPrimitive::Boolean, json!(true)),
        (EdmPrimitive::Byte, json!(255)),
        (EdmPrimitive::SByte, json!(-128)),
        (EdmPrimitive::Int16, json!(-32768)),
        (EdmPrimitive::Int32, json!(2_147_483_647)),
        (EdmPrimitive::Int64, json!(9_007_199_254_740_993_i64)),
        (EdmPrimitive::Single, json!(1.5)),
        (EdmPrimitive::Double, json!(-0.25)),
        (EdmPrimitive::Decimal, json!(12.75)),
        (EdmPrimitive::String, json!("O'Neil")),
        (EdmPrimitive::Guid, json!("0f8fad5b-d9cb-469f-a165-70867728950e")),
        (EdmPrimitive::DateTimeOffset, json!("2024-02-29T23:59:59.123Z")),
        (EdmPrimitive::DateTime, json!("2024-02-29T23:59:59.123Z")),
        (EdmPrimitive::Date, json!("2024-02-29")),
        (EdmPrimitive::TimeOfDay, json!("13:45:00")),
        (EdmPrimitive::Time, json!("PT1H30M")),
        (EdmPrimitive::Duration, json!("P1DT2H")),
    ];

    for (ty, value) in cases {
        assert_eq!(round_trip(ty, &value), value, "{ty}");
    }
}

#[test]
fn malformed_guid_and_duration_are_rejected_whole() {
    let err = format_json(EdmPrimitive::Guid, &json!("not-a-guid")).unwrap_err();
    assert_eq!(
        err,
        FormatError {
            edm_type: EdmPrimitive::Guid,
            value: "not-a-guid".to_owned(),
            expected: "guid",
        }
    );
    assert_eq!(err.to_string(), "'not-a-guid' is not a valid guid");

    let err = format_json(EdmPrimitive::Duration, &json!("1 hour")).unwrap_err();
    assert_eq!(err.expected, "ISO 8601 duration");

    let err = format_uri_literal(EdmPrimitive::Duration, &json!("PT")).unwrap_err();
    assert_eq!(err.edm_type, EdmPrimitive::Duration);
}

#[test]
fn blank_values_become_null_for_textual_types() {
    for ty in [
        EdmPrimitive::Guid,
        EdmPrimitive::Duration,
        EdmPrimitive::Date,
        EdmPrimitive::DateTimeOffset,
    ] {
        assert_eq!(format_json(ty, &json!("")).unwrap(), Value::Null, "{ty}");
    }
}

#[test]
fn uri_literals() {
    assert_eq!(
        format_uri_literal(EdmPrimitive::String, &json!("O'Neil & Co")).unwrap(),
        "'O''Neil%20%26%20Co'"
    );
    assert_eq!(
        format_uri_literal(EdmPrimitive::Int64, &json!("42")).unwrap(),
        "42"
    );
    assert_eq!(
        format_uri_literal(EdmPrimitive::Duration, &json!("PT5M")).unwrap(),
        "duration'PT5M'"
    );
    assert_eq!(
        format_uri_literal(EdmPrimitive::Guid, &Value::Null).unwrap(),
        "null"
    );
}
