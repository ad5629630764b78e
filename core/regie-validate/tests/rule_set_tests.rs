use regie_model::Fields;
use regie_validate::{FieldRule, RuleSet, ValidateError, Validator};
use serde_json::json;

#[test]
fn insert_replaces_existing_rule_in_place() {
    let mut set = RuleSet::new()
        .field("a", FieldRule::new())
        .field("b", FieldRule::new());
    set.insert("a", FieldRule::required_field());
    assert_eq!(set.field_names().collect::<Vec<_>>(), vec!["a", "b"]);
    assert!(set.get("a").unwrap().is_required());
}

#[test]
fn subset_keeps_declaration_order() {
    let set = RuleSet::new()
        .field("x", FieldRule::new())
        .field("y", FieldRule::new())
        .field("z", FieldRule::new());
    let sub = set.subset(&["z", "x"]);
    assert_eq!(sub.field_names().collect::<Vec<_>>(), vec!["x", "z"]);
}

#[tokio::test]
async fn from_json_builds_working_rules() {
    let set = RuleSet::from_json(json!({
        "email": {"required": true, "type": "email"},
        "code": {"pattern": "^[0-9]{5}$", "messages": {"pattern": "Code postal invalide"}},
        "confirm": {"match": "email"}
    }))
    .unwrap();
    assert_eq!(set.len(), 3);

    let v = Validator::new(set);
    let data: Fields = json!({"email": "a@b.fr", "code": "75A", "confirm": "a@c.fr"})
        .as_object()
        .cloned()
        .unwrap();
    let result = v.validate_form(&data).await;
    assert_eq!(result.errors.get("code"), Some("Code postal invalide"));
    assert_eq!(result.errors.get("confirm"), Some("Must match email"));
    assert!(!result.errors.contains("email"));
}

#[test]
fn from_json_rejects_bad_pattern() {
    let err = RuleSet::from_json(json!({"code": {"pattern": "(["}})).unwrap_err();
    assert!(matches!(err, ValidateError::InvalidPattern { ref field, .. } if field == "code"));
}

#[test]
fn from_json_rejects_inverted_lengths() {
    let err = RuleSet::from_json(json!({"name": {"minLength": 5, "maxLength": 2}})).unwrap_err();
    assert!(matches!(err, ValidateError::InvalidRule { .. }));
}

#[test]
fn from_json_rejects_non_object() {
    assert!(RuleSet::from_json(json!([1, 2])).is_err());
}
