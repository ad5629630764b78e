//! Validation engine for the Regie data layer.
//!
//! Rules are declared per field ([`FieldRule`]) and grouped into a
//! [`RuleSet`]. A [`Validator`] evaluates them against a record's fields:
//!
//! 1. `when(data)` gates the whole rule; a false gate means no error and no async call
//! 2. `required` → `type` → length → numeric range → `pattern` → `match` → `oneOf`
//!    → file → custom sync → custom async
//! 3. the first failing check wins; later checks for that field never run
//!
//! Rule sets can be built in code or loaded from a JSON description with
//! [`RuleSet::from_json`].

mod error;
mod rule;
mod rule_set;
mod validator;
mod value_type;

pub use error::{ValidateError, ValidateResult};
pub use rule::{AsyncValidator, Condition, FieldRule, FileRule, RuleKind, SyncValidator};
pub use rule_set::{RuleSet, RuleSpec};
pub use validator::{ValidationErrors, ValidationResult, Validator};
pub use value_type::ValueType;
