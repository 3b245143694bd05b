//! Wire format tests: encoding, decoding and passthrough of unknown parts.

use insta::assert_snapshot;
use quarry::compile::{Compiler, TargetKind};
use quarry::model::serialize::{self, WireError};
use quarry::model::{Expression, Maintainer, OrderTarget, StructuredQuery, TableId};
use quarry::sample;
use serde_json::{json, Value};

/// Net revenue per month, largest first.
fn monthly_revenue() -> StructuredQuery {
    let catalog = sample::catalog();
    let compiler = Compiler::new(&catalog);
    let mut query = sample::orders_query();
    for (source, target, name) in [
        ("[Total] - [Tax]", TargetKind::CustomColumn, Some("Net")),
        ("[Net] > 100", TargetKind::Filter, None),
        ("Sum([Total])", TargetKind::Aggregation, Some("Revenue")),
    ] {
        query = compiler
            .add_to_query(&query, source, target, name, None)
            .unwrap();
    }
    let query = serialize::from_value(&{
        let mut value = serialize::to_value(&query).unwrap();
        value["breakout"] = json!([["datetime-field", ["field-id", 106], "month"]]);
        value["order-by"] = json!([["desc", ["aggregation", 0]]]);
        value["limit"] = json!(10);
        value
    })
    .unwrap();
    Maintainer::new(&catalog).validate(&query).unwrap();
    query
}

#[test]
fn test_encoding_snapshot() {
    let json = serde_json::to_string(&serialize::to_value(&monthly_revenue()).unwrap()).unwrap();
    assert_snapshot!(json, @r#"{"source-table":1,"expressions":{"Net":["-",["field-id",104],["field-id",103]]},"filters":[[">",["expression","Net"],100]],"aggregation":[["aggregation-options",["sum",["field-id",104]],{"display-name":"Revenue"}]],"breakout":[["datetime-field",["field-id",106],"month"]],"order-by":[["desc",["aggregation",0]]],"limit":10}"#);
}

#[test]
fn test_round_trip_through_text() {
    let query = monthly_revenue();
    let text = serialize::to_string_pretty(&query).unwrap();
    let decoded = serialize::from_str(&text).unwrap();
    assert_eq!(decoded, query);
    assert_eq!(decoded.revision(), 0);
}

#[test]
fn test_serde_impls_match_functions() {
    let query = monthly_revenue();
    let via_serde = serde_json::to_value(&query).unwrap();
    assert_eq!(via_serde, serialize::to_value(&query).unwrap());
    let back: StructuredQuery = serde_json::from_value(via_serde).unwrap();
    assert_eq!(back, query);
}

#[test]
fn test_breakout_sort_decodes_to_breakout_target() {
    let query = serialize::from_value(&json!({
        "source-table": 1,
        "aggregation": [["count"]],
        "breakout": [["datetime-field", ["field-id", 106], "quarter"]],
        "order-by": [["asc", ["datetime-field", ["field-id", 106], "quarter"]]]
    }))
    .unwrap();
    assert_eq!(query.order_by()[0].target, OrderTarget::Breakout(0));

    let encoded = serialize::to_value(&query).unwrap();
    assert_eq!(
        encoded["order-by"],
        json!([["asc", ["datetime-field", ["field-id", 106], "quarter"]]])
    );
}

#[test]
fn test_unknown_keys_and_tags_pass_through() {
    let input = json!({
        "source-table": 1,
        "joins": [{"source-table": 3, "alias": "Reviews"}],
        "filters": [["time-interval", ["field-id", 106], -30, "day"]],
        "aggregation": [["count"]]
    });
    let query = serialize::from_value(&input).unwrap();

    assert_eq!(query.extra()["joins"], input["joins"]);
    assert!(matches!(query.filters()[0].predicate, Expression::Opaque(_)));

    let output = serialize::to_value(&query).unwrap();
    assert_eq!(output, input);
}

#[test]
fn test_nested_source_query() {
    let inner = monthly_revenue();
    let outer = StructuredQuery::over(inner.clone());
    let value = serialize::to_value(&outer).unwrap();
    assert_eq!(value["source-query"], serialize::to_value(&inner).unwrap());
    assert_eq!(serialize::from_value(&value).unwrap().root_table(), TableId(1));
}

#[test]
fn test_malformed_input_names_the_path() {
    let err = serialize::from_value(&json!({
        "source-table": 1,
        "aggregation": [["count"], ["sum"]]
    }))
    .unwrap_err();
    assert!(matches!(err, WireError::Malformed { ref path, .. } if path == "aggregation[1]"));

    let err = serialize::from_str("{\"source-table\": ").unwrap_err();
    assert!(matches!(err, WireError::Json(_)));

    let err = serialize::from_value(&json!({
        "source-table": 1,
        "breakout": [["datetime-field", ["field-id", 106], "fortnight"]]
    }))
    .unwrap_err();
    assert!(err.to_string().contains("fortnight"));
}

#[test]
fn test_fingerprint_tracks_content_and_revision() {
    let catalog = sample::catalog();
    let m = Maintainer::new(&catalog);
    let query = monthly_revenue();

    let same: Value = serialize::to_value(&query).unwrap();
    let reparsed = serialize::from_value(&same).unwrap();
    assert_eq!(query.fingerprint().unwrap(), reparsed.fingerprint().unwrap());

    let limited = m.set_limit(&query, Some(5)).unwrap();
    let a = query.fingerprint().unwrap();
    let b = limited.fingerprint().unwrap();
    assert_ne!(a.digest, b.digest);
    assert_eq!(b.revision, a.revision + 1);
}
