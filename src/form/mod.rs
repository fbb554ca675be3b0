mod arena;
mod binding;
mod controller;
mod events;
mod field;
mod handle;
mod lens;
mod scope;
mod tree;
mod validation;
mod watch;


pub use arena::{Arena, Idx};
pub use binding::{
    ActionGate, CollectionBinding, FieldBinding, FieldConfig, FieldSelection, FormActions,
    ScopeBinding, ValueFormatter,
};
pub use calmform_derive::FormModel;
pub use controller::{
    FormController, FormError, FormId, FormOptions, FormResult, ScopeStructureError, SubmitState,
    ValidationMode,
};
pub use events::{EventBus, FormEvent, FormSignal, Subscriber, Subscription, WeakEventBus};
pub use field::FieldNode;
pub use handle::{ChildHandle, FieldHandle, ListScopeHandle, ScopeHandle};
pub use lens::{FieldKey, FieldLens, FormModel};
pub use scope::{ChildKind, ListScopeNode, Node, NodeKind, ScopeNode};
pub use tree::{NodeId, PATH_SEPARATOR, ScopeTree};
pub use validation::{
    AsyncFieldValidator, AsyncFormValidator, AsyncValidationOutcome, BoxedValidationFuture,
    FieldErrors, FieldValidator, FormValidator, GENERIC_VALIDATION_MESSAGE, ValidationTicket,
    ValidatorRejection,
};
pub use watch::{ErrorDisclosure, FieldPredicate, FieldWatch, ScopeWatch};
