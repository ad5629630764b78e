use pretty_assertions::assert_eq;
use regie_model::{
    apply_list_query, Filters, ListQuery, OrderBy, Predicate, QueryMode, QuerySignature, Record,
};
use regie_types::RecordId;
use serde_json::json;

fn venues() -> Vec<Record> {
    vec![
        Record::from_value("v1", json!({"name": "Olympia", "capacity": 2000})),
        Record::from_value("v2", json!({"name": "Bataclan", "capacity": 1500})),
        Record::from_value("v3", json!({"name": "Cigale"})),
        Record::from_value("v4", json!({"name": "Zenith", "capacity": 6000})),
    ]
}

fn ids(records: &[Record]) -> Vec<&str> {
    records.iter().map(|r| r.id.as_str()).collect()
}

// ── apply_list_query ─────────────────────────────────────────────

#[test]
fn sorts_with_missing_values_first() {
    let q = ListQuery::new().order_by(OrderBy::asc("capacity"));
    assert_eq!(ids(&apply_list_query(&venues(), &q)), vec!["v3", "v2", "v1", "v4"]);
    let q = ListQuery::new().order_by(OrderBy::desc("capacity"));
    assert_eq!(ids(&apply_list_query(&venues(), &q)), vec!["v4", "v1", "v2", "v3"]);
}

#[test]
fn filters_then_limits() {
    let q = ListQuery::new()
        .filter(Predicate::new("capacity", regie_model::FilterOp::Gt, json!(1000)))
        .order_by(OrderBy::asc("name"))
        .limit(2);
    assert_eq!(ids(&apply_list_query(&venues(), &q)), vec!["v2", "v1"]);
}

#[test]
fn offset_and_cursor() {
    let q = ListQuery::new().order_by(OrderBy::asc("name")).offset(1).limit(2);
    assert_eq!(ids(&apply_list_query(&venues(), &q)), vec!["v3", "v1"]);

    let q = ListQuery::new()
        .order_by(OrderBy::asc("name"))
        .start_after(RecordId::from("v3"));
    assert_eq!(ids(&apply_list_query(&venues(), &q)), vec!["v1", "v4"]);
}

// ── QuerySignature ───────────────────────────────────────────────

#[test]
fn equal_queries_share_a_key() {
    let a = QuerySignature::collection("venues", Filters::new().with("city", json!("Paris")))
        .with_order(Some(OrderBy::asc("name")))
        .with_limit(Some(10));
    let b = QuerySignature::collection("venues", Filters::new().with("city", json!("Paris")))
        .with_order(Some(OrderBy::asc("name")))
        .with_limit(Some(10));
    assert_eq!(a.key(), b.key());
}

#[test]
fn differing_queries_have_distinct_keys() {
    let base = QuerySignature::collection("venues", Filters::new());
    let limited = base.clone().with_limit(Some(5));
    let sorted = base.clone().with_order(Some(OrderBy::desc("name")));
    let single = QuerySignature::single("venues", Some(RecordId::from("v1")));
    assert_ne!(base.key(), limited.key());
    assert_ne!(base.key(), sorted.key());
    assert_ne!(base.key(), single.key());
    assert!(single.key().starts_with("venues:single:v1"));
    assert_eq!(single.mode, QueryMode::Single);
}

#[test]
fn explicit_key_wins() {
    let sig = QuerySignature::collection("venues", Filters::new())
        .with_explicit_key(Some("all-venues".into()));
    assert_eq!(sig.key(), "all-venues");
}

#[test]
fn empty_filters_do_not_change_the_key() {
    let plain = QuerySignature::collection("venues", Filters::new());
    let emptied = QuerySignature::collection("venues", Filters::new().with("city", json!("")));
    assert_eq!(plain.key(), emptied.key());
}
