use pretty_assertions::assert_eq;
use proptest::prelude::*;
use regie_model::{FilterOp, FilterValue, Filters, Predicate, RangeBounds, Record};
use serde_json::{json, Value};

fn record(value: Value) -> Record {
    Record::from_value("r", value)
}

// ── Predicate matching ───────────────────────────────────────────

#[test]
fn equality_and_inequality() {
    let r = record(json!({"status": "active", "capacity": 200}));
    assert!(Predicate::eq("status", json!("active")).matches(&r));
    assert!(Predicate::eq("capacity", json!(200.0)).matches(&r));
    assert!(Predicate::new("status", FilterOp::Ne, json!("archived")).matches(&r));
}

#[test]
fn comparisons() {
    let r = record(json!({"capacity": 200}));
    assert!(Predicate::new("capacity", FilterOp::Gte, json!(200)).matches(&r));
    assert!(Predicate::new("capacity", FilterOp::Gt, json!(100)).matches(&r));
    assert!(!Predicate::new("capacity", FilterOp::Lt, json!(200)).matches(&r));
    assert!(Predicate::new("capacity", FilterOp::Lte, json!(200)).matches(&r));
}

#[test]
fn comparisons_across_kinds_never_match() {
    let r = record(json!({"capacity": "200"}));
    assert!(!Predicate::new("capacity", FilterOp::Gt, json!(100)).matches(&r));
}

#[test]
fn membership() {
    let r = record(json!({"genre": "jazz", "tags": ["live", "festival"]}));
    assert!(Predicate::new("genre", FilterOp::In, json!(["jazz", "soul"])).matches(&r));
    assert!(!Predicate::new("genre", FilterOp::NotIn, json!(["jazz"])).matches(&r));
    assert!(Predicate::new("tags", FilterOp::ArrayContains, json!("live")).matches(&r));
    assert!(
        Predicate::new("tags", FilterOp::ArrayContainsAny, json!(["x", "festival"])).matches(&r)
    );
}

#[test]
fn missing_field_only_matches_negations() {
    let r = record(json!({}));
    assert!(!Predicate::eq("city", json!("Paris")).matches(&r));
    assert!(Predicate::new("city", FilterOp::Ne, json!("Paris")).matches(&r));
}

#[test]
fn contains_is_case_insensitive_substring() {
    let r = record(json!({"name": "Blue Note Club", "tags": ["Jazz", "late"]}));
    assert!(Predicate::new("name", FilterOp::Contains, json!("note")).matches(&r));
    assert!(Predicate::new("tags", FilterOp::Contains, json!("JAZ")).matches(&r));
    assert!(!Predicate::new("name", FilterOp::Contains, json!("opera")).matches(&r));
    assert!(!Predicate::new("missing", FilterOp::Contains, json!("a")).matches(&r));
}

// ── FilterValue shapes ───────────────────────────────────────────

#[test]
fn filter_value_from_json_shapes() {
    assert_eq!(FilterValue::from(json!("a")), FilterValue::Equals(json!("a")));
    assert_eq!(
        FilterValue::from(json!(["a", "b"])),
        FilterValue::OneOf(vec![json!("a"), json!("b")])
    );
    assert_eq!(
        FilterValue::from(json!({"operator": ">", "value": 3})),
        FilterValue::Compare { operator: FilterOp::Gt, value: json!(3) }
    );
    // Objects without an operator are plain equality.
    assert_eq!(
        FilterValue::from(json!({"lat": 1})),
        FilterValue::Equals(json!({"lat": 1}))
    );
}

#[test]
fn filter_value_deserializes_untagged() {
    let v: FilterValue = serde_json::from_value(json!({"operator": "in", "value": [1]})).unwrap();
    assert_eq!(v, FilterValue::Compare { operator: FilterOp::In, value: json!([1]) });
    let v: FilterValue = serde_json::from_value(json!([1, 2])).unwrap();
    assert_eq!(v, FilterValue::OneOf(vec![json!(1), json!(2)]));
}

#[test]
fn range_shapes() {
    assert_eq!(
        FilterValue::from(json!({"min": 100, "max": 500})),
        FilterValue::Range(RangeBounds::new(Some(json!(100)), Some(json!(500))))
    );
    assert_eq!(
        FilterValue::from(json!({"start": "2024-01-01", "end": "2024-12-31"})),
        FilterValue::Range(RangeBounds::new(Some(json!("2024-01-01")), Some(json!("2024-12-31"))))
    );
    let v: FilterValue = serde_json::from_value(json!({"start": "2024-01-01"})).unwrap();
    assert_eq!(v, FilterValue::Range(RangeBounds::new(Some(json!("2024-01-01")), None)));
}

#[test]
fn two_element_array_deserializes_as_a_list() {
    let v: FilterValue = serde_json::from_value(json!(["jazz", "pop"])).unwrap();
    assert_eq!(v, FilterValue::OneOf(vec![json!("jazz"), json!("pop")]));
}

#[test]
fn range_compiles_to_one_predicate_per_bound() {
    let filters = Filters::new().with("capacity", json!({"min": 100, "max": 500}));
    assert_eq!(
        filters.to_predicates(),
        vec![
            Predicate::new("capacity", FilterOp::Gte, json!(100)),
            Predicate::new("capacity", FilterOp::Lte, json!(500)),
        ]
    );
    assert!(filters.matches(&record(json!({"capacity": 500}))));
    assert!(!filters.matches(&record(json!({"capacity": 501}))));

    let open = Filters::new().with("capacity", json!({"max": 50}));
    assert_eq!(open.to_predicates().len(), 1);
}

#[test]
fn range_without_bounds_is_dropped() {
    let mut filters = Filters::new();
    assert!(!filters.set("capacity", json!({"min": null, "max": ""})));
    assert!(filters.is_empty());
}

// ── Filters map ──────────────────────────────────────────────────

#[test]
fn empty_values_remove_the_filter() {
    let mut filters = Filters::new().with("status", json!("active"));
    assert!(filters.contains("status"));
    assert!(!filters.set("status", json!("")));
    assert!(!filters.contains("status"));
    filters.set("city", json!("Lyon"));
    filters.set("city", Value::Null);
    assert!(filters.is_empty());
    filters.set("genre", json!([]));
    assert!(filters.is_empty());
}

#[test]
fn predicates_in_key_order() {
    let filters = Filters::new()
        .with("status", json!("active"))
        .with("capacity", json!({"operator": ">=", "value": 100}));
    let preds = filters.to_predicates();
    assert_eq!(preds.len(), 2);
    assert_eq!(preds[0].field, "capacity");
    assert_eq!(preds[0].op, FilterOp::Gte);
    assert_eq!(preds[1], Predicate::eq("status", json!("active")));
}

#[test]
fn merged_prefers_right_hand_side() {
    let base = Filters::new().with("a", json!(1)).with("b", json!(2));
    let top = Filters::new().with("b", json!(3));
    let merged = base.merged(&top);
    assert_eq!(merged.get("b"), Some(&FilterValue::Equals(json!(3))));
    assert_eq!(merged.len(), 2);
}

#[test]
fn filters_match_records() {
    let filters = Filters::new().with("genre", json!(["jazz", "soul"]));
    assert!(filters.matches(&record(json!({"genre": "soul"}))));
    assert!(!filters.matches(&record(json!({"genre": "rock"}))));
}

proptest! {
    /// Setting a key to an empty value is the same as never having set it.
    #[test]
    fn empty_filter_is_never_sent(
        key in "[a-z]{1,8}",
        other in "[A-Z]{1,8}",
        value in "[a-z0-9]{1,8}",
        empty in prop_oneof![Just(json!("")), Just(Value::Null), Just(json!([]))],
    ) {
        let baseline = Filters::new().with(other.clone(), json!(value.clone()));
        let mut filters = baseline.clone();
        filters.set(key.clone(), json!(value));
        filters.set(key.clone(), empty);
        prop_assert_eq!(filters.to_predicates(), baseline.to_predicates());
        prop_assert!(filters.to_predicates().iter().all(|p| p.field != key));
    }
}
