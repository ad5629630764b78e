//! Multi-step forms with conditionally visible steps.
//!
//! Step indices always refer to positions in the *visible* step list, which
//! is recomputed from the form data on every change. Completion marks and
//! step errors are keyed by step id so they survive steps appearing and
//! disappearing.

use regie_model::Fields;
use regie_storage::KvBackend;
use regie_validate::{RuleSet, ValidationErrors, ValidationResult, Validator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{FormError, FormResult};

/// Decides from the form data whether a step is shown.
pub type StepCondition = Arc<dyn Fn(&Fields) -> bool + Send + Sync>;

type StepChangeCallback = Arc<dyn Fn(usize, &WizardStep, StepDirection) + Send + Sync>;
type CompleteCallback = Arc<dyn Fn(&Fields, &WizardState) + Send + Sync>;

/// One step of a [`FormWizard`].
#[derive(Clone)]
pub struct WizardStep {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    /// Fields validated when leaving this step. Empty means every field the
    /// step's rules name.
    pub fields: Vec<String>,
    validator: Validator,
    condition: Option<StepCondition>,
}

impl WizardStep {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            description: None,
            fields: Vec::new(),
            validator: Validator::default(),
            condition: None,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn rules(mut self, rules: RuleSet) -> Self {
        self.validator = Validator::new(rules);
        self
    }

    /// Shows the step only while `condition` holds for the form data.
    pub fn condition(mut self, condition: impl Fn(&Fields) -> bool + Send + Sync + 'static) -> Self {
        self.condition = Some(Arc::new(condition));
        self
    }

    pub fn is_visible(&self, data: &Fields) -> bool {
        self.condition.as_ref().is_none_or(|condition| condition(data))
    }

    pub async fn validate(&self, data: &Fields) -> ValidationResult {
        if self.fields.is_empty() {
            self.validator.validate_form(data).await
        } else {
            self.validator.validate_fields(&self.fields, data).await
        }
    }
}

impl std::fmt::Debug for WizardStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WizardStep")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("fields", &self.fields)
            .field("conditional", &self.condition.is_some())
            .finish()
    }
}

/// Configuration for a [`FormWizard`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WizardConfig {
    pub validate_on_step_change: bool,
    pub allow_skip_steps: bool,
    pub enable_persistence: bool,
    /// Progress is stored under `wizard_{persistenceKey}`.
    pub persistence_key: Option<String>,
}

impl Default for WizardConfig {
    fn default() -> Self {
        Self {
            validate_on_step_change: true,
            allow_skip_steps: false,
            enable_persistence: false,
            persistence_key: None,
        }
    }
}

impl WizardConfig {
    pub fn from_json(value: Value) -> FormResult<Self> {
        let config: Self = serde_json::from_value(value)
            .map_err(|e| FormError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FormResult<()> {
        if self.enable_persistence
            && self.persistence_key.as_deref().is_none_or(str::is_empty)
        {
            return Err(FormError::Configuration(
                "persistenceKey is required when persistence is enabled".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepDirection {
    Next,
    Prev,
    Jump,
}

/// Observable state of a [`FormWizard`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WizardState {
    /// Position in the visible step list.
    pub current_step: usize,
    pub form_data: Fields,
    /// Ids of completed steps.
    pub completed_steps: BTreeSet<String>,
    /// Errors of the last failed validation, by step id.
    pub step_errors: BTreeMap<String, ValidationErrors>,
    pub is_completed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WizardProgress {
    /// One-based position of the active step.
    pub current: usize,
    pub total: usize,
    pub completed: usize,
    /// Share of visible steps completed, 0 to 100.
    pub percentage: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedProgress {
    step: usize,
    data: Fields,
    completed: Vec<String>,
}

struct Shared {
    state: Mutex<WizardState>,
    disposed: AtomicBool,
}

/// Sequences data entry across ordered, conditionally visible steps.
///
/// Navigation calls are serialized. Callbacks run after the state lock is
/// released. Cheap to clone; clones share state. Attach hooks before cloning.
#[derive(Clone)]
pub struct FormWizard {
    steps: Arc<Vec<WizardStep>>,
    config: WizardConfig,
    initial_data: Fields,
    persistence: Option<Arc<dyn KvBackend>>,
    on_step_change: Option<StepChangeCallback>,
    on_complete: Option<CompleteCallback>,
    shared: Arc<Shared>,
}

impl FormWizard {
    pub fn new(steps: Vec<WizardStep>, config: WizardConfig) -> FormResult<Self> {
        config.validate()?;
        if steps.is_empty() {
            return Err(FormError::Configuration("a wizard needs at least one step".into()));
        }
        let mut seen = HashSet::new();
        if let Some(step) = steps.iter().find(|step| !seen.insert(step.id.as_str())) {
            return Err(FormError::Configuration(format!("duplicate step id {:?}", step.id)));
        }
        Ok(Self {
            steps: Arc::new(steps),
            config,
            initial_data: Fields::new(),
            persistence: None,
            on_step_change: None,
            on_complete: None,
            shared: Arc::new(Shared {
                state: Mutex::new(WizardState::default()),
                disposed: AtomicBool::new(false),
            }),
        })
    }

    /// Starts (and resets) the wizard from `data`.
    pub fn with_initial_data(mut self, data: Fields) -> Self {
        self.shared = Arc::new(Shared {
            state: Mutex::new(WizardState {
                form_data: data.clone(),
                ..WizardState::default()
            }),
            disposed: AtomicBool::new(false),
        });
        self.initial_data = data;
        self
    }

    /// Backend for saved progress. Only used when `enablePersistence` is set.
    pub fn with_persistence(mut self, backend: Arc<dyn KvBackend>) -> Self {
        self.persistence = Some(backend);
        self
    }

    pub fn on_step_change(
        mut self,
        f: impl Fn(usize, &WizardStep, StepDirection) + Send + Sync + 'static,
    ) -> Self {
        self.on_step_change = Some(Arc::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn(&Fields, &WizardState) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(f));
        self
    }

    pub fn config(&self) -> &WizardConfig {
        &self.config
    }

    /// Every configured step, visible or not.
    pub fn steps(&self) -> &[WizardStep] {
        &self.steps
    }

    pub async fn state(&self) -> WizardState {
        self.shared.state.lock().await.clone()
    }

    pub async fn form_data(&self) -> Fields {
        self.shared.state.lock().await.form_data.clone()
    }

    pub async fn current_index(&self) -> usize {
        self.shared.state.lock().await.current_step
    }

    pub async fn visible_steps(&self) -> Vec<WizardStep> {
        let state = self.shared.state.lock().await;
        self.visible(&state.form_data)
            .into_iter()
            .map(|raw| self.steps[raw].clone())
            .collect()
    }

    /// The active step, `None` when no step is visible.
    pub async fn current_step(&self) -> Option<WizardStep> {
        let state = self.shared.state.lock().await;
        self.visible(&state.form_data)
            .get(state.current_step)
            .map(|&raw| self.steps[raw].clone())
    }

    /// Errors recorded for the visible step at `index`.
    pub async fn step_errors(&self, index: usize) -> Option<ValidationErrors> {
        let state = self.shared.state.lock().await;
        let raw = *self.visible(&state.form_data).get(index)?;
        state.step_errors.get(&self.steps[raw].id).cloned()
    }

    pub async fn is_step_completed(&self, index: usize) -> bool {
        let state = self.shared.state.lock().await;
        self.visible(&state.form_data)
            .get(index)
            .is_some_and(|&raw| state.completed_steps.contains(&self.steps[raw].id))
    }

    pub async fn is_first_step(&self) -> bool {
        self.shared.state.lock().await.current_step == 0
    }

    pub async fn is_last_step(&self) -> bool {
        let state = self.shared.state.lock().await;
        state.current_step + 1 >= self.visible(&state.form_data).len()
    }

    pub async fn progress(&self) -> WizardProgress {
        let state = self.shared.state.lock().await;
        let visible = self.visible(&state.form_data);
        let completed = visible
            .iter()
            .filter(|&&raw| state.completed_steps.contains(&self.steps[raw].id))
            .count();
        let percentage = if visible.is_empty() {
            0.0
        } else {
            (completed as f64 / visible.len() as f64 * 100.0).round()
        };
        WizardProgress {
            current: (state.current_step + 1).min(visible.len()),
            total: visible.len(),
            completed,
            percentage,
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }

    // ── Data ─────────────────────────────────────────────────────

    pub async fn update_field(&self, field: &str, value: Value) -> FormResult<()> {
        self.ensure_live()?;
        let mut state = self.shared.state.lock().await;
        let active = self.active_raw(&state);
        state.form_data.insert(field.to_string(), value);
        for errors in state.step_errors.values_mut() {
            errors.remove(field);
        }
        state.step_errors.retain(|_, errors| !errors.is_empty());
        self.follow_active(&mut state, active);
        self.persist(&state).await;
        Ok(())
    }

    /// Merges `data` into the form data.
    pub async fn update_data(&self, data: Fields) -> FormResult<()> {
        self.ensure_live()?;
        let mut state = self.shared.state.lock().await;
        let active = self.active_raw(&state);
        for (field, value) in data {
            for errors in state.step_errors.values_mut() {
                errors.remove(&field);
            }
            state.form_data.insert(field, value);
        }
        state.step_errors.retain(|_, errors| !errors.is_empty());
        self.follow_active(&mut state, active);
        self.persist(&state).await;
        Ok(())
    }

    // ── Navigation ───────────────────────────────────────────────

    /// Validates the active step and moves to the next visible one.
    /// Resolves to `false` when validation fails or there is no next step.
    pub async fn next_step(&self) -> FormResult<bool> {
        self.ensure_live()?;
        let (index, step) = {
            let mut state = self.shared.state.lock().await;
            let visible = self.visible(&state.form_data);
            let Some(&raw) = visible.get(state.current_step) else {
                warn!(index = state.current_step, "no active wizard step");
                return Ok(false);
            };
            if state.current_step + 1 >= visible.len() {
                debug!(step = %self.steps[raw].id, "already on the last wizard step");
                return Ok(false);
            }
            if self.config.validate_on_step_change
                && !self.check_step(&mut state, raw).await
            {
                return Ok(false);
            }
            state.completed_steps.insert(self.steps[raw].id.clone());
            state.current_step += 1;
            self.persist(&state).await;
            (state.current_step, self.steps[visible[state.current_step]].clone())
        };
        self.notify(index, &step, StepDirection::Next);
        Ok(true)
    }

    pub async fn prev_step(&self) -> FormResult<bool> {
        self.ensure_live()?;
        let (index, step) = {
            let mut state = self.shared.state.lock().await;
            if state.current_step == 0 {
                return Ok(false);
            }
            let visible = self.visible(&state.form_data);
            let Some(&raw) = visible.get(state.current_step - 1) else {
                warn!(index = state.current_step, "no wizard step before the active one");
                return Ok(false);
            };
            state.current_step -= 1;
            self.persist(&state).await;
            (state.current_step, self.steps[raw].clone())
        };
        self.notify(index, &step, StepDirection::Prev);
        Ok(true)
    }

    /// Jumps to the visible step at `index`.
    ///
    /// Unless skipping is allowed, a forward jump validates and completes
    /// every step in between, in order. The first failing step records its
    /// errors and the active step stays where it was.
    pub async fn go_to_step(&self, index: usize) -> FormResult<bool> {
        self.ensure_live()?;
        let step = {
            let mut state = self.shared.state.lock().await;
            let visible = self.visible(&state.form_data);
            let Some(&target) = visible.get(index) else {
                warn!(index, steps = visible.len(), "ignoring jump to unknown wizard step");
                return Ok(false);
            };
            if index == state.current_step {
                return Ok(true);
            }
            if index > state.current_step && !self.config.allow_skip_steps {
                for &raw in &visible[state.current_step..index] {
                    if !self.check_step(&mut state, raw).await {
                        self.persist(&state).await;
                        return Ok(false);
                    }
                    state.completed_steps.insert(self.steps[raw].id.clone());
                }
            }
            state.current_step = index;
            self.persist(&state).await;
            self.steps[target].clone()
        };
        self.notify(index, &step, StepDirection::Jump);
        Ok(true)
    }

    /// Validates every visible step and, if all pass, marks the wizard
    /// complete, clears saved progress and calls `on_complete`.
    ///
    /// Stops at the first failing step; only its errors are recorded.
    pub async fn complete_wizard(&self) -> FormResult<bool> {
        self.ensure_live()?;
        let snapshot = {
            let mut state = self.shared.state.lock().await;
            let visible = self.visible(&state.form_data);
            if self.config.validate_on_step_change {
                for &raw in &visible {
                    if !self.check_step(&mut state, raw).await {
                        return Ok(false);
                    }
                }
            }
            for &raw in &visible {
                state.completed_steps.insert(self.steps[raw].id.clone());
            }
            state.is_completed = true;
            self.clear_persisted().await;
            state.clone()
        };
        info!(steps = snapshot.completed_steps.len(), "wizard completed");
        if let Some(cb) = &self.on_complete {
            cb(&snapshot.form_data, &snapshot);
        }
        Ok(true)
    }

    /// Back to the first step with the initial data. Saved progress is removed.
    pub async fn reset_wizard(&self) -> FormResult<()> {
        self.ensure_live()?;
        let mut state = self.shared.state.lock().await;
        *state = WizardState {
            form_data: self.initial_data.clone(),
            ..WizardState::default()
        };
        self.clear_persisted().await;
        debug!("wizard reset");
        Ok(())
    }

    /// Loads saved progress, if any. Unreadable progress is removed.
    pub async fn restore(&self) -> FormResult<bool> {
        self.ensure_live()?;
        let (Some(backend), Some(key)) = (self.backend(), self.storage_key()) else {
            return Ok(false);
        };
        let Some(raw) = backend.get(&key).await? else {
            return Ok(false);
        };
        let saved: SavedProgress = match serde_json::from_str(&raw) {
            Ok(saved) => saved,
            Err(e) => {
                warn!(key = %key, error = %e, "discarding unreadable wizard progress");
                backend.remove(&key).await?;
                return Ok(false);
            }
        };
        let mut state = self.shared.state.lock().await;
        state.form_data = saved.data;
        state.completed_steps = saved.completed.into_iter().collect();
        state.step_errors.clear();
        state.is_completed = false;
        let visible = self.visible(&state.form_data).len();
        state.current_step = saved.step.min(visible.saturating_sub(1));
        debug!(key = %key, step = state.current_step, "wizard progress restored");
        Ok(true)
    }

    /// Later calls fail with [`FormError::Disposed`].
    pub fn dispose(&self) {
        if !self.shared.disposed.swap(true, Ordering::SeqCst) {
            debug!("wizard disposed");
        }
    }

    // ── Internals ────────────────────────────────────────────────

    fn ensure_live(&self) -> FormResult<()> {
        if self.is_disposed() {
            Err(FormError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Configured indices of the steps visible for `data`.
    fn visible(&self, data: &Fields) -> Vec<usize> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, step)| step.is_visible(data))
            .map(|(raw, _)| raw)
            .collect()
    }

    fn active_raw(&self, state: &WizardState) -> Option<usize> {
        self.visible(&state.form_data).get(state.current_step).copied()
    }

    /// Keeps the active step pointing at the same configured step after the
    /// visible list changed. A step that went hidden hands over to the
    /// closest visible step before it, or the first one.
    fn follow_active(&self, state: &mut WizardState, active: Option<usize>) {
        let visible = self.visible(&state.form_data);
        let Some(active) = active else {
            state.current_step = state.current_step.min(visible.len().saturating_sub(1));
            return;
        };
        if let Some(position) = visible.iter().position(|&raw| raw == active) {
            state.current_step = position;
            return;
        }
        let position = visible.iter().rposition(|&raw| raw < active).unwrap_or(0);
        warn!(
            hidden = %self.steps[active].id,
            now = ?visible.get(position).map(|&raw| &self.steps[raw].id),
            "active wizard step hidden by a data change"
        );
        state.current_step = position;
    }

    /// Validates one step, recording or clearing its errors.
    async fn check_step(&self, state: &mut WizardState, raw: usize) -> bool {
        let step = &self.steps[raw];
        let result = step.validate(&state.form_data).await;
        if result.is_valid {
            state.step_errors.remove(&step.id);
            true
        } else {
            debug!(step = %step.id, fields = result.errors.len(), "wizard step failed validation");
            state.step_errors.insert(step.id.clone(), result.errors);
            false
        }
    }

    fn notify(&self, index: usize, step: &WizardStep, direction: StepDirection) {
        debug!(index, step = %step.id, ?direction, "wizard step changed");
        if let Some(cb) = &self.on_step_change {
            cb(index, step, direction);
        }
    }

    fn backend(&self) -> Option<&Arc<dyn KvBackend>> {
        if self.config.enable_persistence {
            self.persistence.as_ref()
        } else {
            None
        }
    }

    fn storage_key(&self) -> Option<String> {
        self.config
            .persistence_key
            .as_ref()
            .map(|key| format!("wizard_{key}"))
    }

    async fn persist(&self, state: &WizardState) {
        let (Some(backend), Some(key)) = (self.backend(), self.storage_key()) else {
            return;
        };
        let saved = SavedProgress {
            step: state.current_step,
            data: state.form_data.clone(),
            completed: state.completed_steps.iter().cloned().collect(),
        };
        let result = match serde_json::to_string(&saved) {
            Ok(raw) => backend.set(&key, raw).await.map_err(FormError::from),
            Err(e) => Err(FormError::from(e)),
        };
        if let Err(e) = result {
            warn!(key = %key, backend = backend.backend_name(), error = %e, "failed to save wizard progress");
        }
    }

    async fn clear_persisted(&self) {
        let (Some(backend), Some(key)) = (self.backend(), self.storage_key()) else {
            return;
        };
        if let Err(e) = backend.remove(&key).await {
            warn!(key = %key, error = %e, "failed to remove wizard progress");
        }
    }
}

impl std::fmt::Debug for FormWizard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormWizard")
            .field("steps", &self.steps)
            .field("config", &self.config)
            .finish()
    }
}
