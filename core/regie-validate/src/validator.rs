//! Rule evaluation.

use futures::future::join_all;
use regie_model::{is_empty_value, Fields};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::rule::{FieldRule, RuleKind};
use crate::rule_set::RuleSet;
use crate::value_type::as_number;

/// Per-field error messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, String>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.insert(field.into(), message.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<String> {
        self.0.remove(field)
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Overlays `other` on top of these errors.
    pub fn merge(&mut self, other: ValidationErrors) {
        self.0.extend(other.0);
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (field, message) in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{field}: {message}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromIterator<(String, String)> for ValidationErrors {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Outcome of validating a whole record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: ValidationErrors,
}

impl ValidationResult {
    pub fn from_errors(errors: ValidationErrors) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

/// Evaluates a [`RuleSet`] against record data.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    rules: RuleSet,
}

impl Validator {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Validates one field. `None` means the value passes.
    ///
    /// Fields without a rule always pass.
    pub async fn validate_field(&self, field: &str, value: &Value, data: &Fields) -> Option<String> {
        let rule = self.rules.get(field)?;
        if !rule.applies_to(data) {
            return None;
        }
        if let Some(message) = check_sync(field, rule, value, data) {
            return Some(message);
        }
        if is_blank(value) {
            return None;
        }
        let check = rule.custom_async.as_ref()?;
        let message = check(value.clone(), data.clone()).await;
        if let Some(message) = &message {
            debug!(field, message = %message, "async validation failed");
        }
        message
    }

    /// Validates one field without running async validators.
    pub fn validate_field_sync(&self, field: &str, value: &Value, data: &Fields) -> Option<String> {
        let rule = self.rules.get(field)?;
        if !rule.applies_to(data) {
            return None;
        }
        check_sync(field, rule, value, data)
    }

    /// Validates every configured field. Async checks run concurrently.
    pub async fn validate_form(&self, data: &Fields) -> ValidationResult {
        let fields: Vec<&str> = self.rules.field_names().collect();
        self.validate_fields(&fields, data).await
    }

    /// Validates only the listed fields (those without a rule pass).
    pub async fn validate_fields<S: AsRef<str>>(&self, fields: &[S], data: &Fields) -> ValidationResult {
        let checks = fields.iter().map(|field| {
            let field = field.as_ref();
            let value = data.get(field).cloned().unwrap_or(Value::Null);
            async move {
                self.validate_field(field, &value, data)
                    .await
                    .map(|message| (field.to_string(), message))
            }
        });
        let errors: ValidationErrors = join_all(checks).await.into_iter().flatten().collect();
        ValidationResult::from_errors(errors)
    }

    /// Synchronous counterpart of [`Validator::validate_form`].
    pub fn validate_form_sync(&self, data: &Fields) -> ValidationResult {
        let errors: ValidationErrors = self
            .rules
            .field_names()
            .filter_map(|field| {
                let value = data.get(field).unwrap_or(&Value::Null);
                self.validate_field_sync(field, value, data)
                    .map(|message| (field.to_string(), message))
            })
            .collect();
        ValidationResult::from_errors(errors)
    }
}

/// Runs every synchronous check in order; first failure wins.
fn check_sync(field: &str, rule: &FieldRule, value: &Value, data: &Fields) -> Option<String> {
    let empty = is_blank(value);
    if rule.required && empty {
        return Some(rule.message_for(RuleKind::Required, || "This field is required".into()));
    }
    if empty {
        return None;
    }

    if let Some(value_type) = rule.value_type
        && !value_type.matches(value)
    {
        return Some(rule.message_for(RuleKind::Type, || {
            format!("Must be {}", value_type.describe())
        }));
    }

    if let Some(len) = length_of(value) {
        if let Some(min) = rule.min_length
            && len < min
        {
            return Some(rule.message_for(RuleKind::MinLength, || {
                format!("Must be at least {min} characters")
            }));
        }
        if let Some(max) = rule.max_length
            && len > max
        {
            return Some(rule.message_for(RuleKind::MaxLength, || {
                format!("Must be at most {max} characters")
            }));
        }
    }

    if rule.min.is_some() || rule.max.is_some() {
        match as_number(value) {
            Some(n) => {
                if let Some(min) = rule.min
                    && n < min
                {
                    return Some(rule.message_for(RuleKind::Min, || format!("Must be at least {min}")));
                }
                if let Some(max) = rule.max
                    && n > max
                {
                    return Some(rule.message_for(RuleKind::Max, || format!("Must be at most {max}")));
                }
            }
            None => {
                return Some(rule.message_for(RuleKind::Type, || "Must be a number".into()));
            }
        }
    }

    if let Some(pattern) = &rule.pattern {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if !pattern.is_match(&text) {
            return Some(rule.message_for(RuleKind::Pattern, || "Invalid format".into()));
        }
    }

    if let Some(other) = &rule.match_field {
        let expected = data.get(other).unwrap_or(&Value::Null);
        if expected != value {
            return Some(rule.message_for(RuleKind::Match, || format!("Must match {other}")));
        }
    }

    if let Some(allowed) = &rule.one_of
        && !allowed.contains(value)
    {
        return Some(rule.message_for(RuleKind::OneOf, || "Value is not allowed".into()));
    }

    if let Some(file) = &rule.file {
        let size = value.get("size").and_then(Value::as_u64).unwrap_or(0);
        if let Some(max) = file.max_size
            && size > max
        {
            return Some(rule.message_for(RuleKind::FileSize, || {
                format!("File must be at most {max} bytes")
            }));
        }
        let name = value.get("name").and_then(Value::as_str).unwrap_or("");
        let mime = value.get("type").and_then(Value::as_str).unwrap_or("");
        if !file.accepts(name, mime) {
            return Some(rule.message_for(RuleKind::FileType, || "File type is not accepted".into()));
        }
    }

    if let Some(check) = &rule.custom
        && let Some(message) = check(value, data)
    {
        debug!(field, message = %message, "custom validation failed");
        return Some(message);
    }

    None
}

/// Required-ness treats whitespace-only text as empty.
fn is_blank(value: &Value) -> bool {
    match value {
        Value::String(s) => s.trim().is_empty(),
        other => is_empty_value(other),
    }
}

fn length_of(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}
