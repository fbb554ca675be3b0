pub use crate::form::{
    ActionGate, CollectionBinding, FieldBinding, FieldConfig, FieldErrors, FieldHandle, FieldLens,
    FieldWatch, FormActions, FormController, FormError, FormEvent, FormModel, FormOptions,
    FormResult, FormSignal, ListScopeHandle, ScopeBinding, ScopeHandle, SubmitState,
    ValidationMode,
};
