use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_timer::Delay;
use serde_json::Value;

use super::controller::{FormController, FormResult, read_lock, write_lock};
use super::events::FormSignal;
use super::handle::FieldHandle;

/// Validation messages keyed by value path (`"friends.0.name"`).
pub type FieldErrors = BTreeMap<String, String>;

pub const GENERIC_VALIDATION_MESSAGE: &str = "validation failed";

/// Monotonic per-field generation. Only the result of the latest issued
/// ticket is ever applied.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ValidationTicket(pub u64);

pub type BoxedValidationFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

pub trait FieldValidator: Send + Sync {
    /// `values` is the value of the scope that owns the field.
    fn validate(&self, name: &str, values: &Value) -> Option<String>;
}

impl<F> FieldValidator for F
where
    F: Fn(&str, &Value) -> Option<String> + Send + Sync,
{
    fn validate(&self, name: &str, values: &Value) -> Option<String> {
        (self)(name, values)
    }
}

/// An async validator gave up without producing a validation message.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ValidatorRejection {
    message: Option<String>,
}

impl ValidatorRejection {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }

    pub fn without_message() -> Self {
        Self::default()
    }

    /// The rejection's message, or the generic fallback.
    pub fn message(&self) -> &str {
        self.message
            .as_deref()
            .filter(|message| !message.is_empty())
            .unwrap_or(GENERIC_VALIDATION_MESSAGE)
    }
}

pub type AsyncValidationOutcome = Result<Option<String>, ValidatorRejection>;

pub trait AsyncFieldValidator: Send + Sync {
    fn validate(&self, name: String, values: Value) -> BoxedValidationFuture<AsyncValidationOutcome>;
}

impl<F, Fut> AsyncFieldValidator for F
where
    F: Fn(String, Value) -> Fut + Send + Sync,
    Fut: Future<Output = AsyncValidationOutcome> + Send + 'static,
{
    fn validate(&self, name: String, values: Value) -> BoxedValidationFuture<AsyncValidationOutcome> {
        Box::pin((self)(name, values))
    }
}

/// Schema-style validation of the whole value tree.
pub trait FormValidator: Send + Sync {
    fn validate(&self, values: &Value) -> Option<FieldErrors>;
}

impl<F> FormValidator for F
where
    F: Fn(&Value) -> Option<FieldErrors> + Send + Sync,
{
    fn validate(&self, values: &Value) -> Option<FieldErrors> {
        (self)(values)
    }
}

pub trait AsyncFormValidator: Send + Sync {
    fn validate(&self, values: Value) -> BoxedValidationFuture<Option<FieldErrors>>;
}

impl<F, Fut> AsyncFormValidator for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Option<FieldErrors>> + Send + 'static,
{
    fn validate(&self, values: Value) -> BoxedValidationFuture<Option<FieldErrors>> {
        Box::pin((self)(values))
    }
}

pub(super) type FormValidatorFn = Arc<dyn FormValidator>;
pub(super) type AsyncFormValidatorFn = Arc<dyn AsyncFormValidator>;

/// Runs `validators` in order against one field. With `first_error_only`
/// the first message wins; otherwise all messages are joined.
pub(super) fn run_field_validators(
    validators: &[Arc<dyn FieldValidator>],
    name: &str,
    values: &Value,
    first_error_only: bool,
) -> Option<String> {
    let mut messages = Vec::new();
    for validator in validators {
        if let Some(message) = validator.validate(name, values) {
            if message.is_empty() {
                continue;
            }
            messages.push(message);
            if first_error_only {
                break;
            }
        }
    }
    (!messages.is_empty()).then(|| messages.join("; "))
}

impl FormController {
    pub fn register_form_validator<V>(&self, validator: V) -> FormResult<()>
    where
        V: FormValidator + 'static,
    {
        *write_lock(&self.shared.form_validator, "registering form validator")? =
            Some(Arc::new(validator));
        Ok(())
    }

    pub fn register_async_form_validator<V>(&self, validator: V) -> FormResult<()>
    where
        V: AsyncFormValidator + 'static,
    {
        *write_lock(
            &self.shared.async_form_validator,
            "registering async form validator",
        )? = Some(Arc::new(validator));
        Ok(())
    }

    /// Runs the form-level validator, if any, and reports root validity.
    pub fn validate_form(&self) -> FormResult<bool> {
        let validator = read_lock(&self.shared.form_validator, "reading form validator")?.clone();
        if let Some(validator) = validator {
            let values = self.value()?;
            self.apply_form_errors(validator.validate(&values))?;
        }
        self.valid()
    }

    /// Runs the sync validator, then awaits the async one.
    pub async fn validate_form_async(&self) -> FormResult<bool> {
        let _ = self.validate_form()?;
        let validator = read_lock(
            &self.shared.async_form_validator,
            "reading async form validator",
        )?
        .clone();
        if let Some(validator) = validator {
            let values = self.value()?;
            let errors = validator.validate(values).await;
            self.apply_form_errors(errors)?;
        }
        self.valid()
    }

    /// Sets the error of every field in the tree from `errors`: the message at
    /// its path, or none. Pending field validations are superseded.
    pub fn apply_form_errors(&self, errors: Option<FieldErrors>) -> FormResult<()> {
        let mut errors = errors.unwrap_or_default();
        {
            let mut tree = self.write_tree("applying form validation result")?;
            for (path, id) in tree.fields(self.root)? {
                let field = tree.field_node_mut(id)?;
                field.error = errors.remove(&path);
                field.next_ticket();
            }
        }
        for path in errors.keys() {
            tracing::debug!(form = %self.id, path = %path, "form validation error for unmounted field");
        }
        self.root().broadcast(FormSignal::ScopeUpdate, None);
        Ok(())
    }
}

impl FieldHandle {
    /// Issues a new ticket, superseding any validation still in flight.
    pub fn begin_validation(&self) -> FormResult<ValidationTicket> {
        let mut tree = self.form().write_tree("starting field validation")?;
        Ok(tree.field_node_mut(self.id())?.next_ticket())
    }

    /// Applies a validation result if `ticket` is still the latest and the
    /// field is still mounted, then broadcasts `FieldUpdate`. Returns whether
    /// the result was applied.
    pub fn finish_validation(
        &self,
        ticket: ValidationTicket,
        error: Option<String>,
        touch: bool,
    ) -> FormResult<bool> {
        {
            let mut tree = self.form().write_tree("finishing field validation")?;
            let Ok(field) = tree.field_node_mut(self.id()) else {
                tracing::debug!(field = %self.name(), "discarded validation for unmounted field");
                return Ok(false);
            };
            if field.ticket() != ticket {
                tracing::debug!(
                    field = %self.name(),
                    ticket = ticket.0,
                    latest = field.ticket().0,
                    "discarded stale validation result"
                );
                return Ok(false);
            }
            field.error = error;
            if touch {
                field.touched = true;
            }
        }
        self.broadcast(FormSignal::FieldUpdate);
        Ok(true)
    }

    pub fn is_latest_ticket(&self, ticket: ValidationTicket) -> FormResult<bool> {
        let tree = self.form().read_tree("checking latest validation ticket")?;
        Ok(tree
            .field_node(self.id())
            .is_ok_and(|field| field.ticket() == ticket))
    }

    /// Runs `validator` synchronously against the owning scope's value.
    pub fn validate_with<V>(&self, validator: &V, touch: bool) -> FormResult<bool>
    where
        V: FieldValidator + ?Sized,
    {
        let ticket = self.begin_validation()?;
        let values = self.scope().value()?;
        let error = validator.validate(self.name(), &values);
        self.finish_validation(ticket, error, touch)
    }

    /// Runs `validator` after an optional debounce. The result is applied
    /// only if no newer validation started meanwhile and the field is still
    /// mounted. Returns whether it was applied.
    pub async fn validate_async_with<V>(
        &self,
        validator: &V,
        debounce: Duration,
        touch: bool,
    ) -> FormResult<bool>
    where
        V: AsyncFieldValidator + ?Sized,
    {
        let ticket = self.begin_validation()?;
        if !debounce.is_zero() {
            Delay::new(debounce).await;
            if !self.is_latest_ticket(ticket)? {
                tracing::debug!(field = %self.name(), ticket = ticket.0, "skipped debounced validation");
                return Ok(false);
            }
        }

        let values = self.scope().value()?;
        let error = match validator.validate(self.name().to_owned(), values).await {
            Ok(error) => error,
            Err(rejection) => {
                if rejection.message.is_none() {
                    tracing::warn!(
                        field = %self.name(),
                        "async validator rejected without a message"
                    );
                }
                Some(rejection.message().to_owned())
            }
        };
        self.finish_validation(ticket, error, touch)
    }
}
