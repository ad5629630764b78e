//! Form controllers for the Regie data layer.
//!
//! - [`EntityForm`] edits one record: loads it in update mode, tracks dirty
//!   and touched fields, validates on change/blur/submit, and writes through
//!   an [`regie_query::ActionExecutor`]. Optional debounced auto-save.
//! - [`FormWizard`] splits data entry into steps whose visibility depends on
//!   the data entered so far, validating each step before moving on and
//!   optionally persisting progress to a key/value backend.

mod error;
mod form;
mod wizard;

pub use error::{FormError, FormResult};
pub use form::{
    AutoSaveStatus, BeforeSubmit, CustomValidator, EntityForm, FormConfig, FormMode, FormState,
    SubmitOutcome, SubmitTransform,
};
pub use wizard::{
    FormWizard, StepCondition, StepDirection, WizardConfig, WizardProgress, WizardState,
    WizardStep,
};
