//! Per-field rules.

use futures::future::BoxFuture;
use regex::Regex;
use regie_model::Fields;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{ValidateError, ValidateResult};
use crate::value_type::ValueType;

/// Synchronous custom check. Returns an error message on failure.
pub type SyncValidator = Arc<dyn Fn(&Value, &Fields) -> Option<String> + Send + Sync>;

/// Asynchronous custom check (e.g. a uniqueness lookup against the store).
pub type AsyncValidator =
    Arc<dyn Fn(Value, Fields) -> BoxFuture<'static, Option<String>> + Send + Sync>;

/// Gate deciding whether a rule applies to the current data.
pub type Condition = Arc<dyn Fn(&Fields) -> bool + Send + Sync>;

/// The individual checks a rule can fail, used to override messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleKind {
    Required,
    Type,
    MinLength,
    MaxLength,
    Min,
    Max,
    Pattern,
    Match,
    OneOf,
    FileSize,
    FileType,
}

/// Constraints on an uploaded file value `{name, size, type}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileRule {
    /// Maximum size in bytes.
    pub max_size: Option<u64>,
    /// Accepted MIME types (`image/png`, `image/*`) or extensions (`.pdf`).
    pub accept: Vec<String>,
}

impl FileRule {
    pub(crate) fn accepts(&self, name: &str, mime: &str) -> bool {
        if self.accept.is_empty() {
            return true;
        }
        let name = name.to_lowercase();
        let mime = mime.to_lowercase();
        self.accept.iter().any(|accepted| {
            let accepted = accepted.trim().to_lowercase();
            if accepted.starts_with('.') {
                name.ends_with(&accepted)
            } else if let Some(family) = accepted.strip_suffix("/*") {
                mime.split('/').next() == Some(family)
            } else {
                mime == accepted
            }
        })
    }
}

/// Every constraint that applies to one field.
#[derive(Clone, Default)]
pub struct FieldRule {
    pub(crate) required: bool,
    pub(crate) value_type: Option<ValueType>,
    pub(crate) min_length: Option<usize>,
    pub(crate) max_length: Option<usize>,
    pub(crate) min: Option<f64>,
    pub(crate) max: Option<f64>,
    pub(crate) pattern: Option<Regex>,
    pub(crate) match_field: Option<String>,
    pub(crate) one_of: Option<Vec<Value>>,
    pub(crate) file: Option<FileRule>,
    pub(crate) custom: Option<SyncValidator>,
    pub(crate) custom_async: Option<AsyncValidator>,
    pub(crate) when: Option<Condition>,
    pub(crate) messages: HashMap<RuleKind, String>,
}

impl FieldRule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for `FieldRule::new().required()`.
    pub fn required_field() -> Self {
        Self::new().required()
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn of_type(mut self, value_type: ValueType) -> Self {
        self.value_type = Some(value_type);
        self
    }

    pub fn min_length(mut self, len: usize) -> Self {
        self.min_length = Some(len);
        self
    }

    pub fn max_length(mut self, len: usize) -> Self {
        self.max_length = Some(len);
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Compiles `pattern` and sets it. `field` is only used in the error.
    pub fn try_pattern(self, field: &str, pattern: &str) -> ValidateResult<Self> {
        let re = Regex::new(pattern).map_err(|source| ValidateError::InvalidPattern {
            field: field.to_string(),
            source,
        })?;
        Ok(self.pattern(re))
    }

    /// The value must equal the value of `other` in the same record.
    pub fn matches_field(mut self, other: impl Into<String>) -> Self {
        self.match_field = Some(other.into());
        self
    }

    pub fn one_of(mut self, values: Vec<Value>) -> Self {
        self.one_of = Some(values);
        self
    }

    pub fn file(mut self, rule: FileRule) -> Self {
        self.file = Some(rule);
        self
    }

    pub fn custom<F>(mut self, check: F) -> Self
    where
        F: Fn(&Value, &Fields) -> Option<String> + Send + Sync + 'static,
    {
        self.custom = Some(Arc::new(check));
        self
    }

    pub fn custom_async<F>(mut self, check: F) -> Self
    where
        F: Fn(Value, Fields) -> BoxFuture<'static, Option<String>> + Send + Sync + 'static,
    {
        self.custom_async = Some(Arc::new(check));
        self
    }

    /// Only apply this rule when `condition` holds for the record.
    pub fn when<F>(mut self, condition: F) -> Self
    where
        F: Fn(&Fields) -> bool + Send + Sync + 'static,
    {
        self.when = Some(Arc::new(condition));
        self
    }

    /// Overrides the message reported when `kind` fails.
    pub fn message(mut self, kind: RuleKind, text: impl Into<String>) -> Self {
        self.messages.insert(kind, text.into());
        self
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn has_async(&self) -> bool {
        self.custom_async.is_some()
    }

    /// Whether the rule applies to `data`.
    pub fn applies_to(&self, data: &Fields) -> bool {
        self.when.as_ref().is_none_or(|when| when(data))
    }

    pub(crate) fn message_for(&self, kind: RuleKind, default: impl FnOnce() -> String) -> String {
        self.messages.get(&kind).cloned().unwrap_or_else(default)
    }
}

impl fmt::Debug for FieldRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldRule")
            .field("required", &self.required)
            .field("value_type", &self.value_type)
            .field("min_length", &self.min_length)
            .field("max_length", &self.max_length)
            .field("min", &self.min)
            .field("max", &self.max)
            .field("pattern", &self.pattern.as_ref().map(Regex::as_str))
            .field("match_field", &self.match_field)
            .field("one_of", &self.one_of)
            .field("file", &self.file)
            .field("custom", &self.custom.is_some())
            .field("custom_async", &self.custom_async.is_some())
            .field("when", &self.when.is_some())
            .finish()
    }
}
