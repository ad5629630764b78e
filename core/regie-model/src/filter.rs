//! Filter predicates.
//!
//! Callers describe filters as a field → [`FilterValue`] map, in one of four
//! shapes: equality (`{"status": "active"}`), membership
//! (`{"genre": ["jazz", "soul"]}`), comparison
//! (`{"capacity": {"operator": ">=", "value": 200}}`) or an inclusive range
//! (`{"capacity": {"min": 100, "max": 500}}`, `start`/`end` for dates). A filter whose value is
//! `null`, `""` or an empty list is dropped as soon as it is set, so it can
//! never reach the store as an "equals empty" condition.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::Record;

/// Comparison operator understood by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not-in")]
    NotIn,
    #[serde(rename = "array-contains")]
    ArrayContains,
    #[serde(rename = "array-contains-any")]
    ArrayContainsAny,
    /// Case-insensitive substring match on strings or string arrays.
    #[serde(rename = "contains")]
    Contains,
}

/// A single store-level condition on one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Predicate {
    pub fn new(field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    /// Convenience: create an equality predicate.
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    /// Check whether a record satisfies this predicate.
    ///
    /// A missing field only satisfies `!=` and `not-in`.
    pub fn matches(&self, record: &Record) -> bool {
        let actual = record.get_path(&self.field).unwrap_or(&Value::Null);
        match self.op {
            FilterOp::Eq => values_equal(actual, &self.value),
            FilterOp::Ne => !values_equal(actual, &self.value),
            FilterOp::Lt => compare_values(actual, &self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::Gt => compare_values(actual, &self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::In => as_list(&self.value).iter().any(|v| values_equal(actual, v)),
            FilterOp::NotIn => !as_list(&self.value).iter().any(|v| values_equal(actual, v)),
            FilterOp::ArrayContains => actual
                .as_array()
                .is_some_and(|items| items.iter().any(|v| values_equal(v, &self.value))),
            FilterOp::ArrayContainsAny => actual.as_array().is_some_and(|items| {
                as_list(&self.value)
                    .iter()
                    .any(|wanted| items.iter().any(|v| values_equal(v, wanted)))
            }),
            FilterOp::Contains => {
                let Some(needle) = self.value.as_str().map(str::to_lowercase) else {
                    return false;
                };
                as_list(actual)
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|s| s.to_lowercase().contains(&needle))
            }
        }
    }
}

/// Inclusive bounds of a range filter. Either side may be open.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeBounds {
    #[serde(default, alias = "start", skip_serializing_if = "Option::is_none")]
    pub min: Option<Value>,
    #[serde(default, alias = "end", skip_serializing_if = "Option::is_none")]
    pub max: Option<Value>,
}

impl RangeBounds {
    pub fn new(min: Option<Value>, max: Option<Value>) -> Self {
        Self { min, max }
    }

    fn min_value(&self) -> Option<&Value> {
        self.min.as_ref().filter(|v| !is_empty_value(v))
    }

    fn max_value(&self) -> Option<&Value> {
        self.max.as_ref().filter(|v| !is_empty_value(v))
    }
}

/// The value side of a caller filter.
///
/// Deserialization tries a list first (arrays would otherwise fill struct
/// variants positionally), then the comparison object, then range bounds,
/// and falls back to plain equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    OneOf(Vec<Value>),
    Compare { operator: FilterOp, value: Value },
    Range(RangeBounds),
    Equals(Value),
}

impl FilterValue {
    /// True when the filter carries nothing to compare against.
    pub fn is_empty(&self) -> bool {
        match self {
            FilterValue::Equals(v) => is_empty_value(v),
            FilterValue::OneOf(values) => values.is_empty(),
            FilterValue::Compare { value, .. } => is_empty_value(value),
            FilterValue::Range(bounds) => bounds.min_value().is_none() && bounds.max_value().is_none(),
        }
    }

    /// Compiles this filter into store predicates on `field`. Ranges yield
    /// one predicate per bound.
    pub fn to_predicates(&self, field: &str) -> Vec<Predicate> {
        match self {
            FilterValue::Equals(v) => vec![Predicate::new(field, FilterOp::Eq, v.clone())],
            FilterValue::OneOf(values) => {
                vec![Predicate::new(field, FilterOp::In, Value::Array(values.clone()))]
            }
            FilterValue::Compare { operator, value } => {
                vec![Predicate::new(field, *operator, value.clone())]
            }
            FilterValue::Range(bounds) => {
                let mut out = Vec::with_capacity(2);
                if let Some(min) = bounds.min_value() {
                    out.push(Predicate::new(field, FilterOp::Gte, min.clone()));
                }
                if let Some(max) = bounds.max_value() {
                    out.push(Predicate::new(field, FilterOp::Lte, max.clone()));
                }
                out
            }
        }
    }
}

impl From<Value> for FilterValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(values) => FilterValue::OneOf(values),
            Value::Object(ref map) => {
                let operator = map
                    .get("operator")
                    .and_then(|op| serde_json::from_value::<FilterOp>(op.clone()).ok());
                let bounds_only = !map.is_empty()
                    && map.keys().all(|k| matches!(k.as_str(), "min" | "max" | "start" | "end"));
                match (operator, map.get("value")) {
                    (Some(operator), Some(inner)) => FilterValue::Compare {
                        operator,
                        value: inner.clone(),
                    },
                    _ if bounds_only => FilterValue::Range(RangeBounds {
                        min: map.get("min").or_else(|| map.get("start")).cloned(),
                        max: map.get("max").or_else(|| map.get("end")).cloned(),
                    }),
                    _ => FilterValue::Equals(value),
                }
            }
            other => FilterValue::Equals(other),
        }
    }
}

/// Active filters keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filters(BTreeMap<String, FilterValue>);

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a filter. Empty values remove the key instead.
    ///
    /// Returns `true` if the filter is now active.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<FilterValue>) -> bool {
        let field = field.into();
        let value = value.into();
        if value.is_empty() {
            self.0.remove(&field);
            false
        } else {
            self.0.insert(field, value);
            true
        }
    }

    /// Builder form of [`Filters::set`].
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.set(field, value);
        self
    }

    pub fn remove(&mut self, field: &str) -> Option<FilterValue> {
        self.0.remove(field)
    }

    pub fn get(&self, field: &str) -> Option<&FilterValue> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FilterValue)> {
        self.0.iter()
    }

    /// Merges `other` on top of `self`; keys in `other` win.
    pub fn merged(&self, other: &Filters) -> Filters {
        let mut out = self.clone();
        for (k, v) in other.iter() {
            out.set(k.clone(), v.clone());
        }
        out
    }

    /// Compiles every active filter into store predicates, in key order.
    ///
    /// Entries that became empty (e.g. deserialized from a blob) are skipped.
    pub fn to_predicates(&self) -> Vec<Predicate> {
        self.0
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .flat_map(|(k, v)| v.to_predicates(k))
            .collect()
    }

    /// Check whether a record satisfies every active filter.
    pub fn matches(&self, record: &Record) -> bool {
        self.to_predicates().iter().all(|p| p.matches(record))
    }
}

impl FromIterator<(String, FilterValue)> for Filters {
    fn from_iter<I: IntoIterator<Item = (String, FilterValue)>>(iter: I) -> Self {
        let mut filters = Filters::new();
        for (k, v) in iter {
            filters.set(k, v);
        }
        filters
    }
}

/// `null`, `""` and `[]` count as "no value".
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Orders two JSON scalars of the same kind. Mixed kinds are unordered.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn as_list(value: &Value) -> &[Value] {
    match value {
        Value::Array(items) => items,
        other => std::slice::from_ref(other),
    }
}
