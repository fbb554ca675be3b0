use std::fmt::{Display, Formatter};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use serde::Deserialize;
use serde_json::Value;

use super::events::{EventBus, FormEvent, FormSignal, WeakEventBus};
use super::handle::ScopeHandle;
use super::scope::ChildKind;
use super::tree::{NodeId, ScopeTree};
use super::validation::{AsyncFormValidatorFn, FormValidatorFn};

static FORM_ID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FormId(pub u64);

impl FormId {
    pub fn next() -> Self {
        Self(FORM_ID_ALLOCATOR.fetch_add(1, Ordering::SeqCst))
    }
}

impl Display for FormId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmitState {
    Idle,
    Validating,
    Submitting,
    Succeeded,
    Failed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    OnChange,
    OnBlur,
    OnSubmit,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct FormOptions {
    pub validate_mode: ValidationMode,
    pub merge_initial_state_on_submit: bool,
    pub reveal_errors_after_submit: bool,
    pub validate_first_error_only: bool,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            validate_mode: ValidationMode::OnBlur,
            merge_initial_state_on_submit: false,
            reveal_errors_after_submit: true,
            validate_first_error_only: false,
        }
    }
}

/// Misuse of the scope hierarchy. These are programming errors and are
/// always reported, never papered over with stand-in nodes.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ScopeStructureError {
    #[error("`{name}` is a {found}, not a field")]
    NotAField { name: String, found: ChildKind },
    #[error("`{name}` is a {found}, not an object scope")]
    NotAScope { name: String, found: ChildKind },
    #[error("`{name}` is a {found}, not a list scope")]
    NotAList { name: String, found: ChildKind },
    #[error("`{name}` is neither an array field nor a list scope")]
    NotACollection { name: String },
    #[error("{context} must be an object")]
    NotAnObject { context: String },
    #[error("{context} must be an array")]
    NotAnArray { context: String },
    #[error("node {id} is a {found}, expected a {expected}")]
    WrongKind {
        id: NodeId,
        expected: ChildKind,
        found: ChildKind,
    },
    #[error("node {child} was not created for scope {scope}")]
    ForeignChild { scope: NodeId, child: NodeId },
    #[error("node {0} is already registered with its scope")]
    AlreadyAttached(NodeId),
}

#[derive(Debug, thiserror::Error)]
pub enum FormError {
    #[error(transparent)]
    Structure(#[from] ScopeStructureError),
    #[error("node {0} is no longer mounted")]
    StaleNode(NodeId),
    #[error("no node at path `{0}`")]
    UnknownPath(String),
    #[error("form state lock poisoned while {0}")]
    StatePoisoned(&'static str),
    #[error("invalid submit state transition: {from:?} -> {to:?}")]
    InvalidStateTransition { from: SubmitState, to: SubmitState },
    #[error("form submit is already in progress")]
    AlreadySubmitting,
    #[error("submit handler panicked")]
    SubmitHandlerPanicked,
    #[error("form value does not match the model: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type FormResult<T> = Result<T, FormError>;

pub(super) type SubmitHandler = Arc<dyn Fn(Value, &FormController) -> FormResult<()> + Send + Sync>;
pub(super) type EventHook = Arc<dyn Fn(&FormEvent, &FormController) + Send + Sync>;

pub(super) struct SubmitStatus {
    pub(super) state: SubmitState,
    pub(super) count: u32,
}

pub(super) struct FormShared {
    pub(super) tree: RwLock<ScopeTree>,
    pub(super) submit: RwLock<SubmitStatus>,
    pub(super) submit_handler: RwLock<Option<SubmitHandler>>,
    pub(super) event_hook: RwLock<Option<EventHook>>,
    pub(super) form_validator: RwLock<Option<FormValidatorFn>>,
    pub(super) async_form_validator: RwLock<Option<AsyncFormValidatorFn>>,
}

/// Shared handle to one form: its scope tree, event bus and submit cycle.
///
/// Cloning is cheap and every clone drives the same form. A top-level form
/// listener is registered on construction; it turns `SubmitForm` broadcasts
/// into a submit attempt and hands every other event to the
/// [`on_event`](FormController::on_event) hook.
#[derive(Clone)]
pub struct FormController {
    pub(super) options: FormOptions,
    pub(super) shared: Arc<FormShared>,
    pub(super) events: EventBus,
    pub(super) id: FormId,
    pub(super) root: NodeId,
}

impl FormController {
    pub fn new(initial_values: Value, options: FormOptions) -> FormResult<Self> {
        let tree = ScopeTree::new(initial_values)?;
        let controller = Self {
            options,
            events: tree.events().clone(),
            id: tree.id(),
            root: tree.root(),
            shared: Arc::new(FormShared {
                tree: RwLock::new(tree),
                submit: RwLock::new(SubmitStatus {
                    state: SubmitState::Idle,
                    count: 0,
                }),
                submit_handler: RwLock::new(None),
                event_hook: RwLock::new(None),
                form_validator: RwLock::new(None),
                async_form_validator: RwLock::new(None),
            }),
        };
        controller.install_form_listener();
        tracing::debug!(form = %controller.id, "created form");
        Ok(controller)
    }

    fn install_form_listener(&self) {
        let shared = Arc::downgrade(&self.shared);
        let options = self.options;
        let events = self.events.downgrade();
        let (id, root) = (self.id, self.root);
        self.events
            .subscribe(move |event| {
                let Some(controller) = FormController::upgrade(&shared, options, &events, id, root)
                else {
                    return;
                };
                controller.handle_event(event);
            })
            .detach();
    }

    fn upgrade(
        shared: &Weak<FormShared>,
        options: FormOptions,
        events: &WeakEventBus,
        id: FormId,
        root: NodeId,
    ) -> Option<Self> {
        Some(Self {
            options,
            shared: shared.upgrade()?,
            events: events.upgrade()?,
            id,
            root,
        })
    }

    fn handle_event(&self, event: &FormEvent) {
        if event.signal == FormSignal::SubmitForm {
            if let Err(error) = self.run_submit() {
                tracing::warn!(form = %self.id, error = %error, "submit attempt rejected");
            }
            return;
        }

        let hook = match read_lock(&self.shared.event_hook, "reading event hook") {
            Ok(hook) => hook.clone(),
            Err(error) => {
                tracing::error!(form = %self.id, error = %error, "dropping form event");
                return;
            }
        };
        if let Some(hook) = hook {
            hook(event, self);
        }
    }

    pub fn id(&self) -> FormId {
        self.id
    }

    pub fn options(&self) -> FormOptions {
        self.options
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn root(&self) -> ScopeHandle {
        ScopeHandle::new(self.clone(), self.root)
    }

    pub fn value(&self) -> FormResult<Value> {
        self.read_tree("reading form value")?.value(self.root)
    }

    pub fn valid(&self) -> FormResult<bool> {
        self.read_tree("reading form validity")?.valid(self.root)
    }

    pub fn changed(&self) -> FormResult<bool> {
        self.read_tree("reading form change state")?
            .changed(self.root)
    }

    pub fn on_submit(
        &self,
        handler: impl Fn(Value, &FormController) -> FormResult<()> + Send + Sync + 'static,
    ) -> FormResult<()> {
        *write_lock(&self.shared.submit_handler, "registering submit handler")? =
            Some(Arc::new(handler));
        Ok(())
    }

    pub fn on_event(
        &self,
        hook: impl Fn(&FormEvent, &FormController) + Send + Sync + 'static,
    ) -> FormResult<()> {
        *write_lock(&self.shared.event_hook, "registering event hook")? = Some(Arc::new(hook));
        Ok(())
    }

    pub fn submit_state(&self) -> FormResult<SubmitState> {
        Ok(read_lock(&self.shared.submit, "reading submit state")?.state)
    }

    pub fn submit_count(&self) -> FormResult<u32> {
        Ok(read_lock(&self.shared.submit, "reading submit count")?.count)
    }

    /// Broadcasts `SubmitForm` from the root and reports where the attempt
    /// ended.
    pub fn submit(&self) -> FormResult<SubmitState> {
        self.root().submit();
        self.submit_state()
    }

    /// Submit attempt that also awaits the async form-level validator.
    pub async fn submit_async(&self) -> FormResult<SubmitState> {
        self.begin_submit()?;
        let is_valid = self.validate_form_async().await?;
        self.finish_submit(is_valid)?;
        self.submit_state()
    }

    fn run_submit(&self) -> FormResult<()> {
        self.begin_submit()?;
        let is_valid = self.validate_form()?;
        self.finish_submit(is_valid)
    }

    fn begin_submit(&self) -> FormResult<()> {
        let mut status = write_lock(&self.shared.submit, "preparing submit")?;
        if status.state == SubmitState::Submitting {
            return Err(FormError::AlreadySubmitting);
        }
        transition_submit_state(&mut status, SubmitState::Validating)?;
        status.count = status.count.saturating_add(1);
        tracing::debug!(form = %self.id, attempt = status.count, "validating submit");
        Ok(())
    }

    fn finish_submit(&self, is_valid: bool) -> FormResult<()> {
        let result = if is_valid {
            self.call_submit_handler()
        } else {
            let mut status = write_lock(&self.shared.submit, "handling submit validation failure")?;
            transition_submit_state(&mut status, SubmitState::Failed)?;
            tracing::debug!(form = %self.id, "submit blocked by validation errors");
            Ok(())
        };
        self.root()
            .broadcast(FormSignal::ScopeUpdate, None);
        result
    }

    fn call_submit_handler(&self) -> FormResult<()> {
        {
            let mut status = write_lock(&self.shared.submit, "moving submit state to submitting")?;
            transition_submit_state(&mut status, SubmitState::Submitting)?;
        }
        let values = self.submitted_values()?;
        let handler = read_lock(&self.shared.submit_handler, "reading submit handler")?.clone();
        let submit_result = match handler {
            Some(handler) => catch_unwind(AssertUnwindSafe(|| handler(values, self)))
                .unwrap_or_else(|_| {
                    tracing::error!(form = %self.id, "submit handler panicked");
                    Err(FormError::SubmitHandlerPanicked)
                }),
            None => Ok(()),
        };

        let mut status = write_lock(&self.shared.submit, "completing submit")?;
        let next = if submit_result.is_ok() {
            SubmitState::Succeeded
        } else {
            SubmitState::Failed
        };
        transition_submit_state(&mut status, next)?;
        tracing::debug!(form = %self.id, state = ?next, "submit finished");
        submit_result
    }

    fn submitted_values(&self) -> FormResult<Value> {
        let tree = self.read_tree("collecting submitted values")?;
        let current = tree.value(self.root)?;
        if !self.options.merge_initial_state_on_submit {
            return Ok(current);
        }
        let mut merged = tree.scope_node(self.root)?.initial_values().clone();
        if let Value::Object(current) = current {
            merged.extend(current);
        }
        Ok(Value::Object(merged))
    }

    /// Restores every field to its initial value, drops errors and touched
    /// flags, returns the submit cycle to `Idle` and notifies every watcher.
    pub fn reset_all(&self) -> FormResult<()> {
        self.write_tree("resetting form")?.restore(self.root)?;
        {
            let mut status = write_lock(&self.shared.submit, "resetting submit state")?;
            transition_submit_state(&mut status, SubmitState::Idle)?;
            status.count = 0;
        }
        self.root().broadcast(FormSignal::ScopeUpdate, None);
        Ok(())
    }

    pub(super) fn read_tree(
        &self,
        context: &'static str,
    ) -> FormResult<RwLockReadGuard<'_, ScopeTree>> {
        read_lock(&self.shared.tree, context)
    }

    pub(super) fn write_tree(
        &self,
        context: &'static str,
    ) -> FormResult<RwLockWriteGuard<'_, ScopeTree>> {
        write_lock(&self.shared.tree, context)
    }
}

pub(super) fn transition_submit_state(
    status: &mut SubmitStatus,
    next: SubmitState,
) -> FormResult<()> {
    let current = status.state;
    if current == next {
        return Ok(());
    }

    let allowed = matches!(
        (current, next),
        (SubmitState::Idle, SubmitState::Validating)
            | (SubmitState::Validating, SubmitState::Submitting)
            | (SubmitState::Validating, SubmitState::Failed)
            | (SubmitState::Submitting, SubmitState::Succeeded)
            | (SubmitState::Submitting, SubmitState::Failed)
            | (SubmitState::Succeeded, SubmitState::Validating)
            | (SubmitState::Failed, SubmitState::Validating)
            | (_, SubmitState::Idle)
    );
    if !allowed {
        return Err(FormError::InvalidStateTransition {
            from: current,
            to: next,
        });
    }
    status.state = next;
    Ok(())
}

pub(super) fn read_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockReadGuard<'a, T>> {
    lock.read().map_err(|_| FormError::StatePoisoned(context))
}

pub(super) fn write_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| FormError::StatePoisoned(context))
}
