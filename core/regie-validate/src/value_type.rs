use chrono::{DateTime, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

static EMAIL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok());
static URL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^https?://[^\s/$.?#][^\s]*$").ok());
static PHONE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9][0-9 .\-()]{5,19}$").ok());

/// The expected shape of a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    Number,
    Integer,
    Boolean,
    Email,
    Url,
    Phone,
    Date,
    Array,
    Object,
}

impl ValueType {
    /// Check whether `value` has this shape.
    ///
    /// Numbers typed into text inputs arrive as strings, so `number` and
    /// `integer` also accept numeric strings.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ValueType::String => value.is_string(),
            ValueType::Number => as_number(value).is_some(),
            ValueType::Integer => as_number(value).is_some_and(|n| n.fract() == 0.0),
            ValueType::Boolean => value.is_boolean(),
            ValueType::Email => matches_regex(&EMAIL, value),
            ValueType::Url => matches_regex(&URL, value),
            ValueType::Phone => matches_regex(&PHONE, value),
            ValueType::Date => value.as_str().is_some_and(|s| {
                DateTime::parse_from_rfc3339(s).is_ok()
                    || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
            }),
            ValueType::Array => value.is_array(),
            ValueType::Object => value.is_object(),
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            ValueType::String => "text",
            ValueType::Number => "a number",
            ValueType::Integer => "a whole number",
            ValueType::Boolean => "true or false",
            ValueType::Email => "a valid email address",
            ValueType::Url => "a valid URL",
            ValueType::Phone => "a valid phone number",
            ValueType::Date => "a valid date",
            ValueType::Array => "a list",
            ValueType::Object => "an object",
        }
    }
}

/// Reads a number from a JSON number or a numeric string.
pub(crate) fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn matches_regex(re: &LazyLock<Option<Regex>>, value: &Value) -> bool {
    let re: &Option<Regex> = re;
    match (re, value.as_str()) {
        (Some(re), Some(s)) => re.is_match(s),
        _ => false,
    }
}
