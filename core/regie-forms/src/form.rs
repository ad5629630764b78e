//! Single-record create/edit forms.

use regie_cache::Cache;
use regie_model::Fields;
use regie_query::{ActionExecutor, QueryError, TaskSlot};
use regie_storage::{StoreAdapter, StoreError};
use regie_types::{RecordId, SharedClock, SystemClock, Timestamp};
use regie_validate::{RuleSet, ValidationErrors, ValidationResult, Validator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{FormError, FormResult};

/// Replaces the rule-based validation. Returns one message per failing field.
pub type CustomValidator = Arc<dyn Fn(&Fields) -> ValidationErrors + Send + Sync>;

/// Rewrites validated data right before it is written.
pub type SubmitTransform = Arc<dyn Fn(Fields) -> Fields + Send + Sync>;

/// Last chance to veto a submit. Returning `false` aborts it.
pub type BeforeSubmit = Arc<dyn Fn(&Fields) -> bool + Send + Sync>;

type SuccessCallback = Arc<dyn Fn(&SubmitOutcome) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&FormError) + Send + Sync>;
type Navigator = Arc<dyn Fn(&str) + Send + Sync>;

/// Configuration for an [`EntityForm`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FormConfig {
    pub validate_on_change: bool,
    pub validate_on_blur: bool,
    /// Saves edits of an existing record after `autoSaveDelay` of inactivity.
    pub enable_auto_save: bool,
    #[serde(with = "regie_types::duration_ms")]
    pub auto_save_delay: Duration,
    pub reset_on_success: bool,
    /// Route handed to the navigator after a successful submit. `{id}` is
    /// replaced with the record id.
    pub redirect_on_success: Option<String>,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            validate_on_change: false,
            validate_on_blur: true,
            enable_auto_save: false,
            auto_save_delay: Duration::from_millis(2000),
            reset_on_success: false,
            redirect_on_success: None,
        }
    }
}

impl FormConfig {
    pub fn from_json(value: Value) -> FormResult<Self> {
        let config: Self = serde_json::from_value(value)
            .map_err(|e| FormError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FormResult<()> {
        if self.enable_auto_save && self.auto_save_delay.is_zero() {
            return Err(FormError::Configuration(
                "autoSaveDelay must be positive when auto-save is enabled".into(),
            ));
        }
        Ok(())
    }
}

/// Whether submitting creates a record or updates the bound one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormMode {
    #[default]
    Create,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoSaveStatus {
    #[default]
    Idle,
    Saving,
    Saved,
    Error,
}

/// What a successful submit wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Created(RecordId),
    Updated(RecordId),
}

impl SubmitOutcome {
    pub fn id(&self) -> &RecordId {
        match self {
            SubmitOutcome::Created(id) | SubmitOutcome::Updated(id) => id,
        }
    }
}

/// Observable state of an [`EntityForm`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormState {
    pub mode: FormMode,
    pub entity_id: Option<RecordId>,
    pub form_data: Fields,
    /// Set until the bound record has been loaded.
    pub is_loading: bool,
    pub is_dirty: bool,
    pub is_submitting: bool,
    pub touched_fields: BTreeSet<String>,
    pub validation_errors: ValidationErrors,
    pub auto_save_status: AutoSaveStatus,
    pub last_saved: Option<Timestamp>,
    /// Message of the last load or write failure.
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    state: FormState,
    /// Data `handle_reset` returns to: the caller's initial data, or the
    /// record as last loaded or saved.
    snapshot: Fields,
}

struct Shared {
    inner: RwLock<Inner>,
    load_generation: AtomicU64,
    save_generation: AtomicU64,
    disposed: AtomicBool,
    auto_save: TaskSlot,
}

/// Create or edit form over one record of a collection.
///
/// A form built with [`EntityForm::edit`] is bound to a record and starts
/// loading; call [`EntityForm::load`] to fill it. A form built with
/// [`EntityForm::create`] starts from the caller's data and binds to the new
/// record after its first successful submit (unless `resetOnSuccess`).
///
/// Results of a load or auto-save that finish after [`EntityForm::dispose`]
/// are dropped.
///
/// Cheap to clone; clones share state. Attach hooks before cloning.
#[derive(Clone)]
pub struct EntityForm {
    store: Arc<dyn StoreAdapter>,
    collection: String,
    actions: Arc<ActionExecutor>,
    cache: Option<Arc<Cache>>,
    clock: SharedClock,
    config: FormConfig,
    validator: Validator,
    custom_validator: Option<CustomValidator>,
    transform: Option<SubmitTransform>,
    before_submit: Option<BeforeSubmit>,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
    navigator: Option<Navigator>,
    shared: Arc<Shared>,
}

impl EntityForm {
    /// A form that creates a new record, starting from `initial_data`.
    pub fn create(
        store: Arc<dyn StoreAdapter>,
        collection: impl Into<String>,
        initial_data: Fields,
        config: FormConfig,
    ) -> FormResult<Self> {
        Self::build(store, collection.into(), None, initial_data, config)
    }

    /// A form bound to an existing record. Its data stays empty until [`EntityForm::load`].
    pub fn edit(
        store: Arc<dyn StoreAdapter>,
        collection: impl Into<String>,
        id: RecordId,
        config: FormConfig,
    ) -> FormResult<Self> {
        Self::build(store, collection.into(), Some(id), Fields::new(), config)
    }

    fn build(
        store: Arc<dyn StoreAdapter>,
        collection: String,
        entity_id: Option<RecordId>,
        data: Fields,
        config: FormConfig,
    ) -> FormResult<Self> {
        config.validate()?;
        let state = FormState {
            mode: if entity_id.is_some() {
                FormMode::Update
            } else {
                FormMode::Create
            },
            is_loading: entity_id.is_some(),
            entity_id,
            form_data: data.clone(),
            ..FormState::default()
        };
        Ok(Self {
            actions: Arc::new(ActionExecutor::new(store.clone(), collection.clone())),
            store,
            collection,
            cache: None,
            clock: Arc::new(SystemClock),
            config,
            validator: Validator::default(),
            custom_validator: None,
            transform: None,
            before_submit: None,
            on_success: None,
            on_error: None,
            navigator: None,
            shared: Arc::new(Shared {
                inner: RwLock::new(Inner {
                    state,
                    snapshot: data,
                }),
                load_generation: AtomicU64::new(0),
                save_generation: AtomicU64::new(0),
                disposed: AtomicBool::new(false),
                auto_save: TaskSlot::new(),
            }),
        })
    }

    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.validator = Validator::new(rules);
        self
    }

    /// Validates with `f` instead of the rules.
    pub fn with_validator(
        mut self,
        f: impl Fn(&Fields) -> ValidationErrors + Send + Sync + 'static,
    ) -> Self {
        self.custom_validator = Some(Arc::new(f));
        self
    }

    pub fn with_transform(mut self, f: impl Fn(Fields) -> Fields + Send + Sync + 'static) -> Self {
        self.transform = Some(Arc::new(f));
        self
    }

    pub fn with_before_submit(mut self, f: impl Fn(&Fields) -> bool + Send + Sync + 'static) -> Self {
        self.before_submit = Some(Arc::new(f));
        self
    }

    pub fn on_success(mut self, f: impl Fn(&SubmitOutcome) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&FormError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Receives `redirectOnSuccess` after a successful submit.
    pub fn with_navigator(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.navigator = Some(Arc::new(f));
        self
    }

    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = Some(cache);
        self.rebuild_actions();
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self.rebuild_actions();
        self
    }

    fn rebuild_actions(&mut self) {
        let mut actions = ActionExecutor::new(self.store.clone(), self.collection.clone())
            .with_clock(self.clock.clone());
        if let Some(cache) = &self.cache {
            actions = actions.with_cache(cache.clone());
        }
        self.actions = Arc::new(actions);
    }

    pub fn config(&self) -> &FormConfig {
        &self.config
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub async fn state(&self) -> FormState {
        self.shared.inner.read().await.state.clone()
    }

    pub async fn form_data(&self) -> Fields {
        self.shared.inner.read().await.state.form_data.clone()
    }

    pub async fn validation_errors(&self) -> ValidationErrors {
        self.shared.inner.read().await.state.validation_errors.clone()
    }

    pub async fn is_dirty(&self) -> bool {
        self.shared.inner.read().await.state.is_dirty
    }

    pub async fn entity_id(&self) -> Option<RecordId> {
        self.shared.inner.read().await.state.entity_id.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }

    // ── Loading ──────────────────────────────────────────────────

    /// Loads the bound record into the form. A no-op for unbound forms.
    ///
    /// A load superseded by a newer one, or finishing after `dispose`,
    /// resolves to a cancelled error and leaves state alone.
    pub async fn load(&self) -> FormResult<Fields> {
        self.ensure_live()?;
        let Some(id) = self.entity_id().await else {
            return Ok(self.form_data().await);
        };
        let generation = self.shared.load_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.inner.write().await.state.is_loading = true;

        let result = self.actions.get_by_id(&id).await;

        let mut inner = self.shared.inner.write().await;
        if !self.is_current_load(generation) {
            debug!(collection = %self.collection, id = %id, "discarding stale form load");
            return Err(QueryError::Cancelled.into());
        }
        inner.state.is_loading = false;
        let error = match result {
            Ok(Some(record)) => {
                inner.snapshot = record.fields.clone();
                inner.state.form_data = record.fields.clone();
                inner.state.is_dirty = false;
                inner.state.touched_fields.clear();
                inner.state.validation_errors.clear();
                inner.state.error = None;
                debug!(collection = %self.collection, id = %id, "form loaded");
                return Ok(record.fields);
            }
            Ok(None) => FormError::from(QueryError::from(StoreError::not_found(
                self.collection.clone(),
                &id,
            ))),
            Err(e) => FormError::from(e),
        };
        inner.state.error = Some(error.to_string());
        drop(inner);
        self.report(&error);
        Err(error)
    }

    // ── Editing ──────────────────────────────────────────────────

    /// Sets one field, marking it touched and the form dirty.
    pub async fn handle_field_change(&self, field: &str, value: Value) -> FormResult<()> {
        self.ensure_live()?;
        let (data, can_auto_save) = {
            let mut inner = self.shared.inner.write().await;
            inner.state.form_data.insert(field.to_string(), value);
            inner.state.is_dirty = true;
            inner.state.touched_fields.insert(field.to_string());
            if !self.config.validate_on_change {
                inner.state.validation_errors.remove(field);
            }
            (
                inner.state.form_data.clone(),
                self.config.enable_auto_save && inner.state.entity_id.is_some(),
            )
        };
        if self.config.validate_on_change {
            self.validate_one(field, &data).await;
        }
        if can_auto_save {
            self.schedule_auto_save();
        }
        Ok(())
    }

    pub async fn handle_field_blur(&self, field: &str) -> FormResult<()> {
        self.ensure_live()?;
        let data = {
            let mut inner = self.shared.inner.write().await;
            inner.state.touched_fields.insert(field.to_string());
            inner.state.form_data.clone()
        };
        if self.config.validate_on_blur {
            self.validate_one(field, &data).await;
        }
        Ok(())
    }

    /// Replaces all form data and marks the form dirty.
    pub async fn set_form_data(&self, data: Fields) -> FormResult<()> {
        self.ensure_live()?;
        let mut inner = self.shared.inner.write().await;
        inner.state.form_data = data;
        inner.state.is_dirty = true;
        Ok(())
    }

    /// Validates the whole form and records the errors.
    pub async fn validate(&self) -> ValidationResult {
        let data = self.form_data().await;
        let result = self.run_validation(&data).await;
        self.shared.inner.write().await.state.validation_errors = result.errors.clone();
        result
    }

    // ── Submitting ───────────────────────────────────────────────

    /// Validates and writes the form. Resolves to `false` when validation
    /// fails, the before-submit hook vetoes, or a submit is already running.
    pub async fn handle_submit(&self) -> FormResult<bool> {
        match self.submit().await {
            Ok(outcome) => Ok(outcome.is_some()),
            Err(FormError::ValidationFailed(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Like [`EntityForm::handle_submit`], reporting what happened.
    ///
    /// Invalid data fails with [`FormError::ValidationFailed`] without
    /// touching the store; a veto or an overlapping submit yields `Ok(None)`.
    pub async fn submit(&self) -> FormResult<Option<SubmitOutcome>> {
        self.ensure_live()?;
        let data = {
            let mut inner = self.shared.inner.write().await;
            if inner.state.is_submitting {
                debug!(collection = %self.collection, "submit already in progress");
                return Ok(None);
            }
            inner.state.is_submitting = true;
            for field in self.validator.rules().field_names() {
                inner.state.touched_fields.insert(field.to_string());
            }
            inner.state.form_data.clone()
        };
        self.cancel_auto_save();

        let validation = self.run_validation(&data).await;
        if !validation.is_valid {
            debug!(
                collection = %self.collection,
                fields = validation.errors.len(),
                "submit blocked by validation"
            );
            let mut inner = self.shared.inner.write().await;
            inner.state.validation_errors = validation.errors.clone();
            inner.state.is_submitting = false;
            return Err(FormError::ValidationFailed(validation.errors));
        }

        let payload = match &self.transform {
            Some(transform) => transform(data.clone()),
            None => data.clone(),
        };
        if let Some(check) = &self.before_submit
            && !check(&payload)
        {
            debug!(collection = %self.collection, "submit vetoed by before-submit hook");
            self.shared.inner.write().await.state.is_submitting = false;
            return Ok(None);
        }

        let entity_id = self.entity_id().await;
        let written = match &entity_id {
            Some(id) => self
                .actions
                .update(id, payload)
                .await
                .map(|()| SubmitOutcome::Updated(id.clone())),
            None => self.actions.create(payload).await.map(SubmitOutcome::Created),
        };
        if self.is_disposed() {
            debug!(collection = %self.collection, "discarding submit result of disposed form");
            return Err(FormError::Disposed);
        }

        match written {
            Ok(outcome) => {
                {
                    let mut inner = self.shared.inner.write().await;
                    inner.state.is_submitting = false;
                    inner.state.is_dirty = false;
                    inner.state.validation_errors.clear();
                    inner.state.error = None;
                    if self.config.reset_on_success {
                        inner.state.form_data = inner.snapshot.clone();
                        inner.state.touched_fields.clear();
                    } else {
                        inner.snapshot = data;
                        inner.state.entity_id = Some(outcome.id().clone());
                        inner.state.mode = FormMode::Update;
                    }
                }
                info!(collection = %self.collection, id = %outcome.id(), "form submitted");
                if let Some(cb) = &self.on_success {
                    cb(&outcome);
                }
                if let (Some(navigate), Some(route)) =
                    (&self.navigator, &self.config.redirect_on_success)
                {
                    navigate(&route.replace("{id}", outcome.id().as_str()));
                }
                Ok(Some(outcome))
            }
            Err(e) => {
                let error = FormError::from(e);
                {
                    let mut inner = self.shared.inner.write().await;
                    inner.state.is_submitting = false;
                    inner.state.error = Some(error.to_string());
                }
                self.report(&error);
                Err(error)
            }
        }
    }

    /// Restores the last loaded (or initial) data and forgets edits,
    /// touched fields, errors and any pending auto-save.
    pub async fn handle_reset(&self) {
        self.cancel_auto_save();
        let mut inner = self.shared.inner.write().await;
        inner.state.form_data = inner.snapshot.clone();
        inner.state.touched_fields.clear();
        inner.state.validation_errors.clear();
        inner.state.is_dirty = false;
        inner.state.error = None;
        inner.state.auto_save_status = AutoSaveStatus::Idle;
    }

    /// Cancels pending work. Later calls fail with [`FormError::Disposed`].
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_auto_save();
        self.shared.load_generation.fetch_add(1, Ordering::SeqCst);
        debug!(collection = %self.collection, "entity form disposed");
    }

    // ── Internals ────────────────────────────────────────────────

    fn ensure_live(&self) -> FormResult<()> {
        if self.is_disposed() {
            Err(FormError::Disposed)
        } else {
            Ok(())
        }
    }

    fn is_current_load(&self, generation: u64) -> bool {
        !self.is_disposed() && self.shared.load_generation.load(Ordering::SeqCst) == generation
    }

    fn is_current_save(&self, generation: u64) -> bool {
        !self.is_disposed() && self.shared.save_generation.load(Ordering::SeqCst) == generation
    }

    fn report(&self, error: &FormError) {
        if error.is_cancelled() {
            return;
        }
        if let Some(cb) = &self.on_error {
            cb(error);
        }
    }

    async fn run_validation(&self, data: &Fields) -> ValidationResult {
        match &self.custom_validator {
            Some(validate) => ValidationResult::from_errors(validate(data)),
            None => self.validator.validate_form(data).await,
        }
    }

    async fn validate_one(&self, field: &str, data: &Fields) {
        let message = match &self.custom_validator {
            Some(validate) => validate(data).get(field).map(str::to_string),
            None => {
                let value = data.get(field).cloned().unwrap_or(Value::Null);
                self.validator.validate_field(field, &value, data).await
            }
        };
        let mut inner = self.shared.inner.write().await;
        match message {
            Some(message) => inner.state.validation_errors.insert(field, message),
            None => {
                inner.state.validation_errors.remove(field);
            }
        }
    }

    /// Restarts the auto-save timer. A save already running is left to finish.
    fn schedule_auto_save(&self) {
        let generation = self.shared.save_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let this = self.clone();
        let delay = self.config.auto_save_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if this.is_current_save(generation) {
                this.auto_save().await;
            }
        });
        self.shared.auto_save.set(handle);
    }

    fn cancel_auto_save(&self) {
        self.shared.save_generation.fetch_add(1, Ordering::SeqCst);
        self.shared.auto_save.abort();
    }

    async fn auto_save(&self) {
        let (id, data) = {
            let inner = self.shared.inner.read().await;
            match &inner.state.entity_id {
                Some(id) => (id.clone(), inner.state.form_data.clone()),
                None => return,
            }
        };
        if !self.run_validation(&data).await.is_valid {
            debug!(collection = %self.collection, id = %id, "auto-save skipped, form has errors");
            return;
        }
        {
            let mut inner = self.shared.inner.write().await;
            if self.is_disposed() {
                return;
            }
            inner.state.auto_save_status = AutoSaveStatus::Saving;
        }
        let payload = match &self.transform {
            Some(transform) => transform(data.clone()),
            None => data.clone(),
        };
        let written = self.actions.update(&id, payload).await;

        let mut inner = self.shared.inner.write().await;
        if self.is_disposed() {
            debug!(collection = %self.collection, id = %id, "discarding auto-save of disposed form");
            return;
        }
        match written {
            Ok(()) => {
                inner.state.auto_save_status = AutoSaveStatus::Saved;
                inner.state.last_saved = Some(self.clock.now());
                if inner.state.form_data == data {
                    inner.state.is_dirty = false;
                }
                inner.snapshot = data;
                debug!(collection = %self.collection, id = %id, "auto-saved");
            }
            Err(e) => {
                warn!(collection = %self.collection, id = %id, error = %e, "auto-save failed");
                inner.state.auto_save_status = AutoSaveStatus::Error;
                inner.state.error = Some(e.to_string());
                drop(inner);
                self.report(&FormError::from(e));
            }
        }
    }
}

impl std::fmt::Debug for EntityForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityForm")
            .field("collection", &self.collection)
            .field("config", &self.config)
            .finish()
    }
}
