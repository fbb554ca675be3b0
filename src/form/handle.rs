use serde_json::Value;

use super::controller::{FormController, FormResult};
use super::events::{FormEvent, FormSignal, Subscriber, Subscription};
use super::field::FieldNode;
use super::scope::ChildKind;
use super::tree::{NodeId, PATH_SEPARATOR};
use super::validation::FieldErrors;
use super::watch::{FieldWatch, ScopeWatch};

/// A node of a form's tree, typed by kind.
#[derive(Clone)]
pub enum ChildHandle {
    Field(FieldHandle),
    Scope(ScopeHandle),
    List(ListScopeHandle),
}

impl ChildHandle {
    pub fn id(&self) -> NodeId {
        match self {
            ChildHandle::Field(field) => field.id(),
            ChildHandle::Scope(scope) => scope.id(),
            ChildHandle::List(list) => list.id(),
        }
    }

    pub fn kind(&self) -> ChildKind {
        match self {
            ChildHandle::Field(_) => ChildKind::Field,
            ChildHandle::Scope(_) => ChildKind::Scope,
            ChildHandle::List(_) => ChildKind::List,
        }
    }

    pub fn value(&self) -> FormResult<Value> {
        match self {
            ChildHandle::Field(field) => field.value(),
            ChildHandle::Scope(scope) => scope.value(),
            ChildHandle::List(list) => list.value(),
        }
    }
}

/// Object scope of a form. Reads always rebuild from the tree; mutators
/// change state only and leave broadcasting to the caller.
#[derive(Clone)]
pub struct ScopeHandle {
    form: FormController,
    id: NodeId,
}

impl ScopeHandle {
    pub(super) fn new(form: FormController, id: NodeId) -> Self {
        Self { form, id }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn form(&self) -> &FormController {
        &self.form
    }

    pub fn path(&self) -> FormResult<String> {
        Ok(self.form.read_tree("reading scope path")?.path(self.id)?.to_owned())
    }

    pub fn is_root(&self) -> bool {
        self.id == self.form.root
    }

    pub fn parent(&self) -> FormResult<Option<NodeId>> {
        self.form.read_tree("reading scope parent")?.parent(self.id)
    }

    pub fn is_ancestor_of(&self, other: NodeId) -> FormResult<bool> {
        self.form
            .read_tree("checking scope ancestry")?
            .is_ancestor_of(self.id, other)
    }

    pub fn is_descendant_of(&self, other: NodeId) -> FormResult<bool> {
        self.form
            .read_tree("checking scope ancestry")?
            .is_descendant_of(self.id, other)
    }

    pub fn initial_values(&self) -> FormResult<Value> {
        let tree = self.form.read_tree("reading scope initial values")?;
        Ok(Value::Object(tree.scope_node(self.id)?.initial_values().clone()))
    }

    pub fn initial_value(&self, name: &str) -> FormResult<Value> {
        let tree = self.form.read_tree("reading scope initial value")?;
        Ok(tree.scope_node(self.id)?.initial_value(name))
    }

    /// Names of the registered children.
    pub fn names(&self) -> FormResult<Vec<String>> {
        let tree = self.form.read_tree("listing scope children")?;
        Ok(tree
            .scope_node(self.id)?
            .children()
            .map(|(name, _)| name.to_owned())
            .collect())
    }

    pub fn field(&self, name: &str) -> FormResult<FieldHandle> {
        let id = self.form.write_tree("mounting field")?.field(self.id, name)?;
        Ok(self.field_handle(id, name))
    }

    pub fn scope(&self, name: &str) -> FormResult<ScopeHandle> {
        let id = self.form.write_tree("mounting scope")?.scope(self.id, name)?;
        Ok(ScopeHandle::new(self.form.clone(), id))
    }

    pub fn list_scope(&self, name: &str) -> FormResult<ListScopeHandle> {
        let id = self
            .form
            .write_tree("mounting list scope")?
            .list_scope(self.id, name)?;
        Ok(ListScopeHandle {
            form: self.form.clone(),
            id,
            scope: self.id,
            name: name.to_owned(),
        })
    }

    pub fn get_child(&self, name: &str) -> FormResult<Option<ChildHandle>> {
        let tree = self.form.read_tree("reading scope child")?;
        let Some(id) = tree.get_child(self.id, name)? else {
            return Ok(None);
        };
        let kind = tree.kind(id)?;
        drop(tree);
        Ok(Some(self.child_handle(id, kind, name)))
    }

    /// Creates a detached field seeded with `initial_value`.
    pub fn create_field(&self, initial_value: Value) -> FormResult<NodeId> {
        self.form
            .write_tree("creating field")?
            .create_field(self.id, initial_value)
    }

    pub fn create_scope(&self, initial_values: Value) -> FormResult<NodeId> {
        self.form
            .write_tree("creating scope")?
            .create_scope(self.id, initial_values)
    }

    pub fn create_list(&self, initial_values: Value) -> FormResult<NodeId> {
        self.form
            .write_tree("creating list scope")?
            .create_list(self.id, initial_values)
    }

    pub fn set_child(&self, name: &str, child: NodeId) -> FormResult<ChildHandle> {
        let kind = {
            let mut tree = self.form.write_tree("registering scope child")?;
            tree.set_child(self.id, name, child)?;
            tree.kind(child)?
        };
        Ok(self.child_handle(child, kind, name))
    }

    pub fn clear_child(&self, name: &str) -> FormResult<bool> {
        self.form
            .write_tree("unmounting scope child")?
            .clear_child(self.id, name)
    }

    /// Like [`clear_child`](Self::clear_child), but leaves a node that was
    /// remounted under `name` alone. Returns false once this scope is gone.
    pub fn release_child(&self, name: &str, child: NodeId) -> FormResult<bool> {
        self.form
            .write_tree("releasing scope child")?
            .release_child(self.id, name, child)
    }

    pub fn discard(&self, child: NodeId) -> FormResult<()> {
        self.form.write_tree("discarding node")?.discard(child)
    }

    pub fn resolve(&self, path: &str) -> FormResult<ChildHandle> {
        let tree = self.form.read_tree("resolving path")?;
        let id = tree.resolve(self.id, path)?;
        let kind = tree.kind(id)?;
        let parent = tree.parent(id)?.unwrap_or(self.id);
        drop(tree);

        let name = path.rsplit(PATH_SEPARATOR).next().unwrap_or(path);
        Ok(match kind {
            ChildKind::Field => ChildHandle::Field(FieldHandle {
                form: self.form.clone(),
                id,
                scope: parent,
                name: name.to_owned(),
            }),
            ChildKind::Scope => ChildHandle::Scope(ScopeHandle::new(self.form.clone(), id)),
            ChildKind::List => ChildHandle::List(ListScopeHandle {
                form: self.form.clone(),
                id,
                scope: parent,
                name: name.to_owned(),
            }),
        })
    }

    pub fn value(&self) -> FormResult<Value> {
        self.form.read_tree("reading scope value")?.value(self.id)
    }

    pub fn valid(&self) -> FormResult<bool> {
        self.form.read_tree("reading scope validity")?.valid(self.id)
    }

    pub fn changed(&self) -> FormResult<bool> {
        self.form
            .read_tree("reading scope change state")?
            .changed(self.id)
    }

    pub fn reset(&self) -> FormResult<()> {
        self.form.write_tree("resetting scope")?.reset(self.id)
    }

    pub fn clear(&self) -> FormResult<()> {
        self.form.write_tree("clearing scope")?.clear(self.id)
    }

    pub fn errors(&self) -> FormResult<FieldErrors> {
        self.form.read_tree("reading scope errors")?.errors(self.id)
    }

    /// Errors of the named fields; `None` when none of them has one.
    pub fn get_errors<S: AsRef<str>>(&self, fields: &[S]) -> FormResult<Option<FieldErrors>> {
        self.form
            .read_tree("reading field errors")?
            .get_errors(self.id, fields)
    }

    pub fn has_changes<S: AsRef<str>>(&self, fields: &[S]) -> FormResult<bool> {
        self.form
            .read_tree("reading field changes")?
            .has_changes(self.id, fields)
    }

    pub fn set_values(&self, values: &Value) -> FormResult<()> {
        self.form
            .write_tree("writing scope values")?
            .set_values(self.id, values)
    }

    pub fn add_collection_item(&self, name: &str, values: Value) -> FormResult<()> {
        self.form
            .write_tree("adding collection item")?
            .add_collection_item(self.id, name, values)
    }

    pub fn listen(&self, subscriber: Subscriber) -> Subscription {
        self.form.events.listen(subscriber)
    }

    pub fn subscribe(&self, f: impl Fn(&FormEvent) + Send + Sync + 'static) -> Subscription {
        self.form.events.subscribe(f)
    }

    /// Subscribes `f` to events whose field matches `watch`.
    pub fn watch_fields(
        &self,
        watch: FieldWatch,
        f: impl Fn(&FormEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe(move |event| {
            if watch.matches(event) {
                f(event);
            }
        })
    }

    /// Subscribes `f` to events broadcast from this scope or one of its
    /// ancestors, optionally narrowed to one child name.
    pub fn watch_structure(
        &self,
        field: Option<&str>,
        f: impl Fn(&FormEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let watch = ScopeWatch::new(self.id, field);
        let form = self.form.clone();
        self.subscribe(move |event| {
            if watch.matches(&form, event) {
                f(event);
            }
        })
    }

    pub fn broadcast(&self, signal: FormSignal, field: Option<&str>) {
        self.form
            .events
            .trigger(&FormEvent::new(signal, self.id, field));
    }

    pub fn submit(&self) {
        self.broadcast(FormSignal::SubmitForm, None);
    }

    fn field_handle(&self, id: NodeId, name: &str) -> FieldHandle {
        FieldHandle {
            form: self.form.clone(),
            id,
            scope: self.id,
            name: name.to_owned(),
        }
    }

    fn child_handle(&self, id: NodeId, kind: ChildKind, name: &str) -> ChildHandle {
        match kind {
            ChildKind::Field => ChildHandle::Field(self.field_handle(id, name)),
            ChildKind::Scope => ChildHandle::Scope(ScopeHandle::new(self.form.clone(), id)),
            ChildKind::List => ChildHandle::List(ListScopeHandle {
                form: self.form.clone(),
                id,
                scope: self.id,
                name: name.to_owned(),
            }),
        }
    }
}

/// List scope registered as `name` in its parent object scope.
#[derive(Clone)]
pub struct ListScopeHandle {
    form: FormController,
    id: NodeId,
    scope: NodeId,
    name: String,
}

impl ListScopeHandle {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn form(&self) -> &FormController {
        &self.form
    }

    pub fn scope(&self) -> ScopeHandle {
        ScopeHandle::new(self.form.clone(), self.scope)
    }

    pub fn len(&self) -> FormResult<usize> {
        Ok(self.form.read_tree("reading list length")?.list_node(self.id)?.len())
    }

    pub fn is_empty(&self) -> FormResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn initial_values(&self) -> FormResult<Vec<Value>> {
        let tree = self.form.read_tree("reading list initial values")?;
        Ok(tree.list_node(self.id)?.initial_values().to_vec())
    }

    pub fn get(&self, index: usize) -> FormResult<Option<ScopeHandle>> {
        let tree = self.form.read_tree("reading list item")?;
        Ok(tree
            .list_node(self.id)?
            .get(index)
            .map(|id| ScopeHandle::new(self.form.clone(), id)))
    }

    /// Child scopes in array order.
    pub fn items(&self) -> FormResult<Vec<ScopeHandle>> {
        let tree = self.form.read_tree("listing list items")?;
        Ok(tree
            .list_node(self.id)?
            .children()
            .iter()
            .map(|id| ScopeHandle::new(self.form.clone(), *id))
            .collect())
    }

    pub fn add_child_scope(&self, values: Value) -> FormResult<ScopeHandle> {
        let id = self
            .form
            .write_tree("adding list item")?
            .add_child_scope(self.id, values)?;
        Ok(ScopeHandle::new(self.form.clone(), id))
    }

    /// Out-of-range indices are ignored and return false.
    pub fn remove_child_scope(&self, index: usize) -> FormResult<bool> {
        self.form
            .write_tree("removing list item")?
            .remove_child_scope(self.id, index)
    }

    pub fn value(&self) -> FormResult<Value> {
        self.form.read_tree("reading list value")?.value(self.id)
    }

    pub fn valid(&self) -> FormResult<bool> {
        self.form.read_tree("reading list validity")?.valid(self.id)
    }

    pub fn changed(&self) -> FormResult<bool> {
        self.form
            .read_tree("reading list change state")?
            .changed(self.id)
    }

    pub fn reset(&self) -> FormResult<()> {
        self.form.write_tree("resetting list")?.reset(self.id)
    }

    pub fn clear(&self) -> FormResult<()> {
        self.form.write_tree("clearing list")?.clear(self.id)
    }

    /// Structural broadcast about this list, sent from its parent scope.
    pub fn broadcast(&self, signal: FormSignal) {
        self.form
            .events
            .trigger(&FormEvent::new(signal, self.scope, Some(&self.name)));
    }
}

/// Field registered as `name` in its parent object scope.
#[derive(Clone)]
pub struct FieldHandle {
    form: FormController,
    id: NodeId,
    scope: NodeId,
    name: String,
}

impl FieldHandle {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn form(&self) -> &FormController {
        &self.form
    }

    pub fn scope_id(&self) -> NodeId {
        self.scope
    }

    pub fn scope(&self) -> ScopeHandle {
        ScopeHandle::new(self.form.clone(), self.scope)
    }

    pub fn is_mounted(&self) -> FormResult<bool> {
        Ok(self.form.read_tree("checking field mount")?.contains(self.id))
    }

    /// A copy of the field's current state.
    pub fn snapshot(&self) -> FormResult<FieldNode> {
        Ok(self
            .form
            .read_tree("reading field")?
            .field_node(self.id)?
            .clone())
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut FieldNode) -> R) -> FormResult<R> {
        let mut tree = self.form.write_tree("updating field")?;
        Ok(f(tree.field_node_mut(self.id)?))
    }

    pub fn value(&self) -> FormResult<Value> {
        Ok(self.form.read_tree("reading field value")?.field_node(self.id)?.value.clone())
    }

    pub fn set_value(&self, value: Value) -> FormResult<()> {
        self.update(|field| field.value = value)
    }

    pub fn initial_value(&self) -> FormResult<Value> {
        let tree = self.form.read_tree("reading field initial value")?;
        Ok(tree.field_node(self.id)?.initial_value().clone())
    }

    pub fn error(&self) -> FormResult<Option<String>> {
        Ok(self.form.read_tree("reading field error")?.field_node(self.id)?.error.clone())
    }

    pub fn set_error(&self, error: Option<String>) -> FormResult<()> {
        self.update(|field| field.error = error)
    }

    pub fn touched(&self) -> FormResult<bool> {
        Ok(self.form.read_tree("reading field touched")?.field_node(self.id)?.touched)
    }

    pub fn set_touched(&self, touched: bool) -> FormResult<()> {
        self.update(|field| field.touched = touched)
    }

    pub fn valid(&self) -> FormResult<bool> {
        Ok(self.form.read_tree("reading field validity")?.field_node(self.id)?.valid())
    }

    pub fn changed(&self) -> FormResult<bool> {
        Ok(self.form.read_tree("reading field change state")?.field_node(self.id)?.changed())
    }

    pub fn reset(&self) -> FormResult<()> {
        self.update(FieldNode::reset)
    }

    pub fn clear(&self) -> FormResult<()> {
        self.update(FieldNode::clear)
    }

    /// Broadcasts `signal` for this field from its parent scope.
    pub fn broadcast(&self, signal: FormSignal) {
        self.form
            .events
            .trigger(&FormEvent::new(signal, self.scope, Some(&self.name)));
    }
}
