use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{ValidateError, ValidateResult};
use crate::rule::{FieldRule, FileRule, RuleKind};
use crate::value_type::ValueType;

/// Rules keyed by field name, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<(String, FieldRule)>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the rule for `field`.
    pub fn insert(&mut self, field: impl Into<String>, rule: FieldRule) {
        let field = field.into();
        match self.rules.iter_mut().find(|(name, _)| *name == field) {
            Some((_, existing)) => *existing = rule,
            None => self.rules.push((field, rule)),
        }
    }

    /// Builder form of [`RuleSet::insert`].
    pub fn field(mut self, field: impl Into<String>, rule: FieldRule) -> Self {
        self.insert(field, rule);
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldRule> {
        self.rules.iter().find(|(name, _)| name == field).map(|(_, r)| r)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldRule)> {
        self.rules.iter().map(|(name, rule)| (name.as_str(), rule))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns the rules for the listed fields only, in this set's order.
    pub fn subset<S: AsRef<str>>(&self, fields: &[S]) -> RuleSet {
        RuleSet {
            rules: self
                .rules
                .iter()
                .filter(|(name, _)| fields.iter().any(|f| f.as_ref() == name))
                .cloned()
                .collect(),
        }
    }

    /// Appends `other`'s rules; fields already present are replaced.
    pub fn extend(&mut self, other: RuleSet) {
        for (field, rule) in other.rules {
            self.insert(field, rule);
        }
    }

    /// Builds a rule set from a declarative JSON description:
    ///
    /// ```json
    /// { "email": { "required": true, "type": "email" },
    ///   "fee":   { "type": "number", "min": 0 } }
    /// ```
    pub fn from_json(value: Value) -> ValidateResult<Self> {
        let specs: Vec<(String, RuleSpec)> = match value {
            Value::Object(map) => map
                .into_iter()
                .map(|(field, spec)| Ok((field, serde_json::from_value(spec)?)))
                .collect::<Result<_, serde_json::Error>>()?,
            other => {
                return Err(ValidateError::InvalidRule {
                    field: String::new(),
                    reason: format!("expected an object of field rules, got {other}"),
                });
            }
        };
        let mut set = RuleSet::new();
        for (field, spec) in specs {
            let rule = spec.into_rule(&field)?;
            set.insert(field, rule);
        }
        Ok(set)
    }
}

/// Serializable description of a [`FieldRule`] (everything but closures).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuleSpec {
    pub required: bool,
    #[serde(rename = "type")]
    pub value_type: Option<ValueType>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub pattern: Option<String>,
    #[serde(rename = "match")]
    pub match_field: Option<String>,
    pub one_of: Option<Vec<Value>>,
    pub file: Option<FileRule>,
    pub messages: HashMap<RuleKind, String>,
}

impl RuleSpec {
    pub fn into_rule(self, field: &str) -> ValidateResult<FieldRule> {
        if let (Some(min), Some(max)) = (self.min_length, self.max_length)
            && min > max
        {
            return Err(ValidateError::InvalidRule {
                field: field.to_string(),
                reason: format!("minLength {min} exceeds maxLength {max}"),
            });
        }
        let mut rule = FieldRule::new();
        rule.required = self.required;
        rule.value_type = self.value_type;
        rule.min_length = self.min_length;
        rule.max_length = self.max_length;
        rule.min = self.min;
        rule.max = self.max;
        rule.match_field = self.match_field;
        rule.one_of = self.one_of;
        rule.file = self.file;
        rule.messages = self.messages;
        match self.pattern {
            Some(pattern) => rule.try_pattern(field, &pattern),
            None => Ok(rule),
        }
    }
}
