//! Framework-agnostic glue for UI components bound to a form.
//!
//! Each binding owns the mount/unmount and interaction sequence of one kind
//! of component: mutate the tree, then broadcast, so every other binding can
//! decide whether to refresh.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;

use super::controller::{FormResult, ValidationMode};
use super::events::{FormEvent, FormSignal, Subscription};
use super::handle::{FieldHandle, ListScopeHandle, ScopeHandle};
use super::validation::{AsyncFieldValidator, FieldValidator, run_field_validators};
use super::watch::ErrorDisclosure;

pub type ValueFormatter = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

#[derive(Clone)]
struct AsyncValidatorEntry {
    debounce: Duration,
    validator: Arc<dyn AsyncFieldValidator>,
}

/// Per-field behavior: validators, value formatting and error disclosure.
#[derive(Clone, Default)]
pub struct FieldConfig {
    validators: Vec<Arc<dyn FieldValidator>>,
    async_validator: Option<AsyncValidatorEntry>,
    format_input: Option<ValueFormatter>,
    format_output: Option<ValueFormatter>,
    always_show_error: bool,
}

impl FieldConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validator(mut self, validator: impl FieldValidator + 'static) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    pub fn async_validator(self, validator: impl AsyncFieldValidator + 'static) -> Self {
        self.async_validator_with_debounce(0, validator)
    }

    pub fn async_validator_with_debounce(
        mut self,
        debounce_ms: u64,
        validator: impl AsyncFieldValidator + 'static,
    ) -> Self {
        self.async_validator = Some(AsyncValidatorEntry {
            debounce: Duration::from_millis(debounce_ms),
            validator: Arc::new(validator),
        });
        self
    }

    /// Applied to raw input before it is stored.
    pub fn format_input(mut self, f: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        self.format_input = Some(Arc::new(f));
        self
    }

    /// Applied to the stored value before it is displayed.
    pub fn format_output(mut self, f: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        self.format_output = Some(Arc::new(f));
        self
    }

    pub fn always_show_error(mut self, always_show: bool) -> Self {
        self.always_show_error = always_show;
        self
    }
}

/// An input component bound to one field of a scope.
pub struct FieldBinding {
    field: FieldHandle,
    config: FieldConfig,
}

impl FieldBinding {
    /// Claims the field, announces it with `FieldCreated` and runs the
    /// validators once without marking the field touched.
    pub fn mount(scope: &ScopeHandle, name: &str, config: FieldConfig) -> FormResult<Self> {
        let field = scope.field(name)?;
        field.broadcast(FormSignal::FieldCreated);
        let binding = Self { field, config };
        binding.validate(false)?;
        Ok(binding)
    }

    pub fn field(&self) -> &FieldHandle {
        &self.field
    }

    pub fn name(&self) -> &str {
        self.field.name()
    }

    pub fn change(&self, raw: Value) -> FormResult<()> {
        let value = match &self.config.format_input {
            Some(format) => format(&raw),
            None => raw,
        };
        self.field.set_value(value)?;
        if self.validate_mode() == ValidationMode::OnChange {
            self.apply_sync_validation(false)?;
        }
        self.field.broadcast(FormSignal::FieldUpdate);
        Ok(())
    }

    /// Marks the field touched, validating first unless validation is
    /// deferred to submit.
    pub fn blur(&self) -> FormResult<()> {
        if self.validate_mode() != ValidationMode::OnSubmit {
            self.apply_sync_validation(true)?;
        }
        self.field.set_touched(true)?;
        self.field.broadcast(FormSignal::FieldUpdate);
        Ok(())
    }

    /// [`blur`](Self::blur), then the async validator if one is configured.
    /// Returns whether the async result was applied.
    pub async fn blur_async(&self) -> FormResult<bool> {
        self.blur()?;
        let Some(entry) = self.config.async_validator.clone() else {
            return Ok(false);
        };
        if self.validate_mode() == ValidationMode::OnSubmit || !self.field.valid()? {
            return Ok(false);
        }
        self.field
            .validate_async_with(entry.validator.as_ref(), entry.debounce, true)
            .await
    }

    /// Runs the sync validators and broadcasts the result.
    pub fn validate(&self, touch: bool) -> FormResult<bool> {
        let ticket = self.field.begin_validation()?;
        let error = self.run_validators()?;
        self.field.finish_validation(ticket, error, touch)
    }

    fn apply_sync_validation(&self, touch: bool) -> FormResult<()> {
        let error = self.run_validators()?;
        self.field.update(|field| {
            field.next_ticket();
            field.error = error;
            if touch {
                field.touched = true;
            }
        })
    }

    fn run_validators(&self) -> FormResult<Option<String>> {
        if self.config.validators.is_empty() {
            return Ok(None);
        }
        let values = self.field.scope().value()?;
        Ok(run_field_validators(
            &self.config.validators,
            self.field.name(),
            &values,
            self.field.form().options().validate_first_error_only,
        ))
    }

    pub fn display_value(&self) -> FormResult<Value> {
        let value = self.field.value()?;
        Ok(match &self.config.format_output {
            Some(format) => format(&value),
            None => value,
        })
    }

    pub fn visible_error(&self) -> FormResult<Option<String>> {
        let form = self.field.form();
        let disclosure = ErrorDisclosure::new()
            .always_show(self.config.always_show_error)
            .reveal_after_submit(form.options().reveal_errors_after_submit);
        let submit_count = form.submit_count()?;
        let field = self.field.snapshot()?;
        Ok(disclosure
            .visible_error(&field, submit_count)
            .map(str::to_owned))
    }

    /// True for events from this field's own scope that name this field or
    /// no field at all.
    pub fn is_relevant(&self, event: &FormEvent) -> bool {
        event.signal != FormSignal::SubmitForm
            && event.scope == self.field.scope_id()
            && event.concerns(self.field.name())
    }

    pub fn listen(&self, f: impl Fn(&FormEvent) + Send + Sync + 'static) -> Subscription {
        let scope = self.field.scope_id();
        let name = self.field.name().to_owned();
        self.field.form().events().subscribe(move |event| {
            if event.signal != FormSignal::SubmitForm
                && event.scope == scope
                && event.concerns(&name)
            {
                f(event);
            }
        })
    }

    /// Releases the field. Unmounting after the owning scope was removed, or
    /// after another binding remounted the name, is a no-op.
    pub fn unmount(self) -> FormResult<()> {
        let released = self
            .field
            .scope()
            .release_child(self.field.name(), self.field.id())?;
        if released {
            self.field.broadcast(FormSignal::FieldDestroyed);
        }
        Ok(())
    }

    fn validate_mode(&self) -> ValidationMode {
        self.field.form().options().validate_mode
    }
}

/// A nested object scope component.
pub struct ScopeBinding {
    parent: ScopeHandle,
    name: String,
    scope: ScopeHandle,
}

impl ScopeBinding {
    pub fn mount(parent: &ScopeHandle, name: &str) -> FormResult<Self> {
        let scope = parent.scope(name)?;
        parent.broadcast(FormSignal::ScopeUpdate, Some(name));
        Ok(Self {
            parent: parent.clone(),
            name: name.to_owned(),
            scope,
        })
    }

    pub fn scope(&self) -> &ScopeHandle {
        &self.scope
    }

    pub fn unmount(self) -> FormResult<()> {
        if self.parent.release_child(&self.name, self.scope.id())? {
            self.parent
                .broadcast(FormSignal::ScopeUpdate, Some(&self.name));
        }
        Ok(())
    }
}

/// A collection of sub-forms rendered from a list scope.
///
/// Every structural change concerning the list bumps the key offset, so item
/// keys built with [`item_key`](Self::item_key) never survive a removal that
/// shifted indices.
pub struct CollectionBinding {
    list: ListScopeHandle,
    key_offset: Arc<AtomicU64>,
    _watch: Subscription,
}

impl CollectionBinding {
    pub fn mount(scope: &ScopeHandle, name: &str) -> FormResult<Self> {
        Self::mount_with(scope, name, |_| {})
    }

    /// Like [`mount`](Self::mount), calling `on_change` after each structural
    /// change.
    pub fn mount_with(
        scope: &ScopeHandle,
        name: &str,
        on_change: impl Fn(&FormEvent) + Send + Sync + 'static,
    ) -> FormResult<Self> {
        let list = scope.list_scope(name)?;
        let key_offset = Arc::new(AtomicU64::new(0));
        let watch = {
            let key_offset = key_offset.clone();
            scope.watch_structure(Some(name), move |event| {
                key_offset.fetch_add(1, Ordering::SeqCst);
                on_change(event);
            })
        };
        Ok(Self {
            list,
            key_offset,
            _watch: watch,
        })
    }

    pub fn list(&self) -> &ListScopeHandle {
        &self.list
    }

    pub fn key_offset(&self) -> u64 {
        self.key_offset.load(Ordering::SeqCst)
    }

    pub fn item_key(&self, index: usize) -> String {
        format!("{}-{index}", self.key_offset())
    }

    pub fn items(&self) -> FormResult<Vec<(String, ScopeHandle)>> {
        Ok(self
            .list
            .items()?
            .into_iter()
            .enumerate()
            .map(|(index, item)| (self.item_key(index), item))
            .collect())
    }

    pub fn add_item(&self, values: Value) -> FormResult<ScopeHandle> {
        let item = self.list.add_child_scope(values)?;
        self.list.broadcast(FormSignal::ScopeUpdate);
        Ok(item)
    }

    /// Out-of-range indices are ignored.
    pub fn remove_item(&self, index: usize) -> FormResult<bool> {
        let removed = self.list.remove_child_scope(index)?;
        if removed {
            self.list.broadcast(FormSignal::ScopeUpdate);
        }
        Ok(removed)
    }

    pub fn unmount(self) -> FormResult<()> {
        let scope = self.list.scope();
        if scope.release_child(self.list.name(), self.list.id())? {
            self.list.broadcast(FormSignal::ScopeUpdate);
        }
        Ok(())
    }
}

/// Fields a gate condition looks at.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum FieldSelection {
    #[default]
    Never,
    Any,
    Fields(Vec<String>),
}

/// Enabled policy of a form action button.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ActionGate {
    pub disabled: bool,
    pub disabled_on_error: FieldSelection,
    pub disabled_until_changed: FieldSelection,
    pub disabled_when_empty: bool,
}

impl ActionGate {
    pub fn submit() -> Self {
        Self {
            disabled_on_error: FieldSelection::Any,
            disabled_until_changed: FieldSelection::Any,
            ..Self::default()
        }
    }

    pub fn reset() -> Self {
        Self::submit()
    }

    pub fn clear() -> Self {
        Self {
            disabled_when_empty: true,
            ..Self::default()
        }
    }

    pub fn is_disabled(&self, scope: &ScopeHandle) -> FormResult<bool> {
        if self.disabled {
            return Ok(true);
        }

        let has_errors = match &self.disabled_on_error {
            FieldSelection::Never => false,
            FieldSelection::Any => !scope.valid()?,
            FieldSelection::Fields(fields) => scope.get_errors(fields)?.is_some(),
        };
        if has_errors {
            return Ok(true);
        }

        let unchanged = match &self.disabled_until_changed {
            FieldSelection::Never => false,
            FieldSelection::Any => !scope.changed()?,
            FieldSelection::Fields(fields) => !scope.has_changes(fields)?,
        };
        if unchanged {
            return Ok(true);
        }

        if self.disabled_when_empty {
            let empty = match scope.value()? {
                Value::Object(values) => values.is_empty(),
                Value::Null => true,
                _ => false,
            };
            return Ok(empty);
        }
        Ok(false)
    }
}

/// Submit, reset and clear actions on a scope, each behind its gate.
#[derive(Clone)]
pub struct FormActions {
    scope: ScopeHandle,
    submit_gate: ActionGate,
    reset_gate: ActionGate,
    clear_gate: ActionGate,
}

impl FormActions {
    pub fn new(scope: ScopeHandle) -> Self {
        Self {
            scope,
            submit_gate: ActionGate::submit(),
            reset_gate: ActionGate::reset(),
            clear_gate: ActionGate::clear(),
        }
    }

    pub fn submit_gate(mut self, gate: ActionGate) -> Self {
        self.submit_gate = gate;
        self
    }

    pub fn reset_gate(mut self, gate: ActionGate) -> Self {
        self.reset_gate = gate;
        self
    }

    pub fn clear_gate(mut self, gate: ActionGate) -> Self {
        self.clear_gate = gate;
        self
    }

    pub fn can_submit(&self) -> FormResult<bool> {
        Ok(!self.submit_gate.is_disabled(&self.scope)?)
    }

    pub fn can_reset(&self) -> FormResult<bool> {
        Ok(!self.reset_gate.is_disabled(&self.scope)?)
    }

    pub fn can_clear(&self) -> FormResult<bool> {
        Ok(!self.clear_gate.is_disabled(&self.scope)?)
    }

    /// Returns false without broadcasting when the gate is closed.
    pub fn submit(&self) -> FormResult<bool> {
        if !self.can_submit()? {
            return Ok(false);
        }
        self.scope.submit();
        Ok(true)
    }

    pub fn reset(&self) -> FormResult<bool> {
        if !self.can_reset()? {
            return Ok(false);
        }
        self.scope.reset()?;
        self.scope.broadcast(FormSignal::ScopeUpdate, None);
        Ok(true)
    }

    pub fn clear(&self) -> FormResult<bool> {
        if !self.can_clear()? {
            return Ok(false);
        }
        self.scope.clear()?;
        self.scope.broadcast(FormSignal::ScopeUpdate, None);
        Ok(true)
    }
}
