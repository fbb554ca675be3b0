//! Relevance filters for form event subscribers.
//!
//! The bus delivers every event of a form to every subscriber. Subscribers
//! decide locally whether an event concerns them, either by field name
//! ([`FieldWatch`]) or by where in the tree it was broadcast from
//! ([`ScopeWatch`]).

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use super::controller::FormController;
use super::events::{FormEvent, FormSignal};
use super::field::FieldNode;
use super::tree::NodeId;

pub type FieldPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Field names a field-level subscriber reacts to. Events without a field
/// name always match.
#[derive(Clone)]
pub enum FieldWatch {
    Field(String),
    Fields(BTreeSet<String>),
    Predicate(FieldPredicate),
}

impl FieldWatch {
    pub fn field(name: impl Into<String>) -> Self {
        Self::Field(name.into())
    }

    pub fn fields<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Fields(names.into_iter().map(Into::into).collect())
    }

    pub fn predicate(f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate(Arc::new(f))
    }

    pub fn watches(&self, name: &str) -> bool {
        match self {
            FieldWatch::Field(field) => field == name,
            FieldWatch::Fields(fields) => fields.contains(name),
            FieldWatch::Predicate(predicate) => predicate(name),
        }
    }

    /// `SubmitForm` never matches; only the form listener acts on it.
    pub fn matches(&self, event: &FormEvent) -> bool {
        if event.signal == FormSignal::SubmitForm {
            return false;
        }
        event.field.as_deref().is_none_or(|name| self.watches(name))
    }
}

impl fmt::Debug for FieldWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldWatch::Field(name) => f.debug_tuple("Field").field(name).finish(),
            FieldWatch::Fields(names) => f.debug_tuple("Fields").field(names).finish(),
            FieldWatch::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Scope-level relevance: the event was broadcast from `scope` or one of its
/// ancestors, and its field is absent or equal to the watched name.
///
/// A list scope's structural changes are broadcast from the scope that owns
/// the list, so a collection watching its own name in its parent scope sees
/// them, while edits inside its items do not match.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScopeWatch {
    scope: NodeId,
    field: Option<String>,
}

impl ScopeWatch {
    pub fn new(scope: NodeId, field: Option<&str>) -> Self {
        Self {
            scope,
            field: field.map(str::to_owned),
        }
    }

    pub fn scope(&self) -> NodeId {
        self.scope
    }

    pub fn matches(&self, form: &FormController, event: &FormEvent) -> bool {
        if event.signal == FormSignal::SubmitForm {
            return false;
        }
        if let (Some(watched), Some(field)) = (&self.field, &event.field) {
            if watched != field {
                return false;
            }
        }
        if event.scope == self.scope {
            return true;
        }
        match form.read_tree("checking event ancestry") {
            Ok(tree) => tree
                .is_ancestor_of(event.scope, self.scope)
                .unwrap_or(false),
            Err(error) => {
                tracing::error!(error = %error, "cannot check event relevance");
                false
            }
        }
    }
}

/// When a field's validation message is shown to the user.
///
/// Errors stay hidden until the field is touched, unless `always_show` is set
/// or, with `reveal_after_submit`, a submit has been attempted.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ErrorDisclosure {
    pub always_show: bool,
    pub reveal_after_submit: bool,
}

impl ErrorDisclosure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn always_show(mut self, always_show: bool) -> Self {
        self.always_show = always_show;
        self
    }

    pub fn reveal_after_submit(mut self, reveal: bool) -> Self {
        self.reveal_after_submit = reveal;
        self
    }

    pub fn visible_error<'a>(&self, field: &'a FieldNode, submit_count: u32) -> Option<&'a str> {
        let message = field.error_message()?;
        let revealed = field.touched
            || self.always_show
            || (self.reveal_after_submit && submit_count > 0);
        revealed.then_some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::FormOptions;
    use serde_json::json;

    fn form() -> FormController {
        FormController::new(
            json!({"user": {"name": "Fry"}, "tags": []}),
            FormOptions::default(),
        )
        .expect("object root")
    }

    #[test]
    fn field_watch_matches_names_sets_and_predicates() {
        let root = form().root().id();
        let event = |field: Option<&str>| FormEvent::new(FormSignal::FieldUpdate, root, field);

        let single = FieldWatch::field("email");
        assert!(single.matches(&event(Some("email"))));
        assert!(!single.matches(&event(Some("password"))));
        assert!(single.matches(&event(None)));

        let set = FieldWatch::fields(["email", "password"]);
        assert!(set.matches(&event(Some("password"))));
        assert!(!set.matches(&event(Some("username"))));

        let prefixed = FieldWatch::predicate(|name| name.starts_with("address_"));
        assert!(prefixed.matches(&event(Some("address_city"))));
        assert!(!prefixed.matches(&event(Some("city"))));
    }

    #[test]
    fn submit_signal_is_never_relevant_to_watchers() {
        let form = form();
        let root = form.root().id();
        let submit = FormEvent::new(FormSignal::SubmitForm, root, None);
        assert!(!FieldWatch::field("email").matches(&submit));
        assert!(!ScopeWatch::new(root, None).matches(&form, &submit));
    }

    #[test]
    fn scope_watch_accepts_self_and_ancestors_only() {
        let form = form();
        let root = form.root();
        let user = root.scope("user").expect("user scope");
        let watch = ScopeWatch::new(user.id(), Some("name"));

        let from_user = FormEvent::new(FormSignal::ScopeUpdate, user.id(), Some("name"));
        let from_root = FormEvent::new(FormSignal::ScopeUpdate, root.id(), None);
        let other_name = FormEvent::new(FormSignal::ScopeUpdate, user.id(), Some("age"));
        assert!(watch.matches(&form, &from_user));
        assert!(watch.matches(&form, &from_root));
        assert!(!watch.matches(&form, &other_name));

        let root_watch = ScopeWatch::new(root.id(), None);
        let from_child = FormEvent::new(FormSignal::FieldUpdate, user.id(), Some("name"));
        assert!(!root_watch.matches(&form, &from_child));
    }

    #[test]
    fn disclosure_waits_for_touch_unless_forced() {
        let mut field = FieldNode::new(json!(""));
        field.error = Some("required".into());

        let policy = ErrorDisclosure::new();
        assert_eq!(policy.visible_error(&field, 0), None);
        assert_eq!(policy.always_show(true).visible_error(&field, 0), Some("required"));

        let after_submit = ErrorDisclosure::new().reveal_after_submit(true);
        assert_eq!(after_submit.visible_error(&field, 0), None);
        assert_eq!(after_submit.visible_error(&field, 1), Some("required"));

        field.touched = true;
        assert_eq!(policy.visible_error(&field, 0), Some("required"));
    }
}
