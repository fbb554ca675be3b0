use serde_json::{Map, Value};

use super::arena::{Arena, Idx};
use super::controller::{FormError, FormId, FormResult, ScopeStructureError};
use super::events::EventBus;
use super::field::FieldNode;
use super::scope::{ChildKind, ListScopeNode, Node, NodeKind, ScopeNode};
use super::validation::FieldErrors;

pub type NodeId = Idx<Node>;

/// Separator between path segments, both for node paths and value paths.
pub const PATH_SEPARATOR: char = '.';

/// The scope hierarchy of one form.
///
/// Nodes live in an arena owned by the tree and point at their parent;
/// object and list scopes list their children by id. The root is an object
/// scope created together with the form's [`EventBus`], which every node of
/// the tree shares.
///
/// New object scopes materialize one implicit field per seed key, so a scope
/// reports its initial values before any binding mounts. `field`, `scope`
/// and `list_scope` claim those fields (the latter two by replacing them).
pub struct ScopeTree {
    id: FormId,
    nodes: Arena<Node>,
    root: NodeId,
    events: EventBus,
    next_segment: u64,
}

impl ScopeTree {
    pub fn new(initial_values: Value) -> FormResult<Self> {
        let Value::Object(initial_values) = initial_values else {
            return Err(ScopeStructureError::NotAnObject {
                context: "form initial values".to_owned(),
            }
            .into());
        };

        let id = FormId::next();
        let mut nodes = Arena::new();
        let root = nodes.alloc(Node {
            parent: None,
            path: id.0.to_string(),
            attached: true,
            implicit: false,
            kind: NodeKind::Scope(ScopeNode::new(initial_values.clone())),
        });
        let mut tree = Self {
            id,
            nodes,
            root,
            events: EventBus::new(id),
            next_segment: 1,
        };
        tree.materialize(root, &initial_values)?;
        Ok(tree)
    }

    pub fn id(&self) -> FormId {
        self.id
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains(id)
    }

    pub fn live_nodes(&self) -> usize {
        self.nodes.live_count()
    }

    pub fn node(&self, id: NodeId) -> FormResult<&Node> {
        self.nodes.get(id).ok_or(FormError::StaleNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> FormResult<&mut Node> {
        self.nodes.get_mut(id).ok_or(FormError::StaleNode(id))
    }

    pub fn kind(&self, id: NodeId) -> FormResult<ChildKind> {
        Ok(self.node(id)?.kind.kind())
    }

    pub fn parent(&self, id: NodeId) -> FormResult<Option<NodeId>> {
        Ok(self.node(id)?.parent)
    }

    pub fn path(&self, id: NodeId) -> FormResult<&str> {
        Ok(self.node(id)?.path.as_str())
    }

    pub fn field_node(&self, id: NodeId) -> FormResult<&FieldNode> {
        match &self.node(id)?.kind {
            NodeKind::Field(field) => Ok(field),
            other => Err(wrong_kind(id, ChildKind::Field, other)),
        }
    }

    pub fn field_node_mut(&mut self, id: NodeId) -> FormResult<&mut FieldNode> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Field(field) => Ok(field),
            other => Err(wrong_kind(id, ChildKind::Field, other)),
        }
    }

    pub fn scope_node(&self, id: NodeId) -> FormResult<&ScopeNode> {
        match &self.node(id)?.kind {
            NodeKind::Scope(scope) => Ok(scope),
            other => Err(wrong_kind(id, ChildKind::Scope, other)),
        }
    }

    fn scope_node_mut(&mut self, id: NodeId) -> FormResult<&mut ScopeNode> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Scope(scope) => Ok(scope),
            other => Err(wrong_kind(id, ChildKind::Scope, other)),
        }
    }

    pub fn list_node(&self, id: NodeId) -> FormResult<&ListScopeNode> {
        match &self.node(id)?.kind {
            NodeKind::List(list) => Ok(list),
            other => Err(wrong_kind(id, ChildKind::List, other)),
        }
    }

    fn list_node_mut(&mut self, id: NodeId) -> FormResult<&mut ListScopeNode> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::List(list) => Ok(list),
            other => Err(wrong_kind(id, ChildKind::List, other)),
        }
    }

    // Ancestry walks the parent chain; a parent that is no longer mounted
    // ends the chain.

    pub fn root_of(&self, id: NodeId) -> FormResult<NodeId> {
        let mut current = id;
        while let Some(parent) = self.node(current)?.parent {
            if !self.nodes.contains(parent) {
                break;
            }
            current = parent;
        }
        Ok(current)
    }

    /// Strict: a node is not its own ancestor.
    pub fn is_ancestor_of(&self, ancestor: NodeId, descendant: NodeId) -> FormResult<bool> {
        self.node(ancestor)?;
        let mut current = self.node(descendant)?.parent;
        while let Some(id) = current {
            if id == ancestor {
                return Ok(true);
            }
            current = self.nodes.get(id).and_then(Node::parent);
        }
        Ok(false)
    }

    pub fn is_descendant_of(&self, descendant: NodeId, ancestor: NodeId) -> FormResult<bool> {
        self.is_ancestor_of(ancestor, descendant)
    }

    /// Creates a detached field for `scope`; register it with [`set_child`].
    ///
    /// [`set_child`]: ScopeTree::set_child
    pub fn create_field(&mut self, scope: NodeId, initial_value: Value) -> FormResult<NodeId> {
        self.scope_node(scope)?;
        Ok(self.alloc(scope, NodeKind::Field(FieldNode::new(initial_value))))
    }

    /// Creates a detached object scope for `scope`, seeded with `initial_values`
    /// (an object, or `null` for none).
    pub fn create_scope(&mut self, scope: NodeId, initial_values: Value) -> FormResult<NodeId> {
        self.scope_node(scope)?;
        let initial_values = object_seed(initial_values, "scope initial values")?;
        let id = self.alloc(
            scope,
            NodeKind::Scope(ScopeNode::new(initial_values.clone())),
        );
        self.materialize(id, &initial_values)?;
        Ok(id)
    }

    /// Creates a detached list scope for `scope` with one child scope per
    /// element of `initial_values` (an array of objects, or `null`).
    pub fn create_list(&mut self, scope: NodeId, initial_values: Value) -> FormResult<NodeId> {
        self.scope_node(scope)?;
        let items = array_seed(initial_values, "list scope initial values")?;
        for (index, item) in items.iter().enumerate() {
            if !(item.is_object() || item.is_null()) {
                return Err(ScopeStructureError::NotAnObject {
                    context: format!("list item {index}"),
                }
                .into());
            }
        }

        let id = self.alloc(scope, NodeKind::List(ListScopeNode::new(items.clone())));
        for item in items {
            self.push_item(id, item)?;
        }
        Ok(id)
    }

    /// Frees a node that was created but never registered.
    pub fn discard(&mut self, id: NodeId) -> FormResult<()> {
        if self.node(id)?.attached {
            return Err(ScopeStructureError::AlreadyAttached(id).into());
        }
        self.free_subtree(id);
        Ok(())
    }

    pub fn get_child(&self, scope: NodeId, name: &str) -> FormResult<Option<NodeId>> {
        Ok(self.scope_node(scope)?.child(name))
    }

    /// Registers a detached node created for `scope` under `name`. A previous
    /// child under that name is unmounted.
    pub fn set_child(&mut self, scope: NodeId, name: &str, child: NodeId) -> FormResult<()> {
        self.scope_node(scope)?;
        let node = self.node(child)?;
        if node.parent != Some(scope) {
            return Err(ScopeStructureError::ForeignChild { scope, child }.into());
        }
        if node.attached {
            return Err(ScopeStructureError::AlreadyAttached(child).into());
        }

        let previous = self.scope_node_mut(scope)?.insert_child(name, child);
        self.node_mut(child)?.attached = true;
        if let Some(previous) = previous {
            self.free_subtree(previous);
        }
        tracing::debug!(form = %self.id, path = %self.node(child)?.path, name, "mounted scope child");
        Ok(())
    }

    /// Unmounts the child under `name` with its whole subtree. Returns false
    /// when there was nothing to remove.
    pub fn clear_child(&mut self, scope: NodeId, name: &str) -> FormResult<bool> {
        let Some(child) = self.scope_node_mut(scope)?.remove_child(name) else {
            return Ok(false);
        };
        let freed = self.free_subtree(child);
        tracing::debug!(form = %self.id, name, freed, "unmounted scope child");
        Ok(true)
    }

    /// Unmounts `child` only while it is still the node under `name`. A scope
    /// that was already freed has nothing left to unmount.
    pub fn release_child(
        &mut self,
        scope: NodeId,
        name: &str,
        child: NodeId,
    ) -> FormResult<bool> {
        if !self.contains(scope) || self.get_child(scope, name)? != Some(child) {
            return Ok(false);
        }
        self.clear_child(scope, name)
    }

    /// Returns the field registered under `name`, creating it from the
    /// scope's seed when absent.
    pub fn field(&mut self, scope: NodeId, name: &str) -> FormResult<NodeId> {
        if let Some(id) = self.get_child(scope, name)? {
            let node = self.node_mut(id)?;
            return match &node.kind {
                NodeKind::Field(_) => {
                    node.implicit = false;
                    Ok(id)
                }
                other => Err(ScopeStructureError::NotAField {
                    name: name.to_owned(),
                    found: other.kind(),
                }
                .into()),
            };
        }

        let seed = self.scope_node(scope)?.initial_value(name);
        let id = self.create_field(scope, seed)?;
        self.set_child(scope, name, id)?;
        Ok(id)
    }

    /// Returns the object scope registered under `name`, creating it from
    /// the seed when absent or only implicitly materialized.
    pub fn scope(&mut self, scope: NodeId, name: &str) -> FormResult<NodeId> {
        let seed = match self.claimable_seed(scope, name, ChildKind::Scope)? {
            Ok(existing) => return Ok(existing),
            Err(seed) => seed,
        };
        if !(seed.is_object() || seed.is_null()) {
            return Err(ScopeStructureError::NotAnObject {
                context: format!("scope `{name}`"),
            }
            .into());
        }
        let id = self.create_scope(scope, seed)?;
        self.set_child(scope, name, id)?;
        Ok(id)
    }

    /// Returns the list scope registered under `name`, creating it from the
    /// seed when absent or only implicitly materialized.
    pub fn list_scope(&mut self, scope: NodeId, name: &str) -> FormResult<NodeId> {
        let seed = match self.claimable_seed(scope, name, ChildKind::List)? {
            Ok(existing) => return Ok(existing),
            Err(seed) => seed,
        };
        if !(seed.is_array() || seed.is_null()) {
            return Err(ScopeStructureError::NotACollection {
                name: name.to_owned(),
            }
            .into());
        }
        let id = self.create_list(scope, seed)?;
        self.set_child(scope, name, id)?;
        Ok(id)
    }

    /// `Ok(Ok(id))` for an existing child of the wanted kind, `Ok(Err(seed))`
    /// when a new child must be created from `seed`.
    fn claimable_seed(
        &self,
        scope: NodeId,
        name: &str,
        wanted: ChildKind,
    ) -> FormResult<Result<NodeId, Value>> {
        let Some(existing) = self.get_child(scope, name)? else {
            return Ok(Err(self.scope_node(scope)?.initial_value(name)));
        };
        let node = self.node(existing)?;
        match &node.kind {
            kind if kind.kind() == wanted => Ok(Ok(existing)),
            NodeKind::Field(field) if node.implicit => Ok(Err(field.value.clone())),
            other => {
                let name = name.to_owned();
                let found = other.kind();
                Err(match wanted {
                    ChildKind::List => ScopeStructureError::NotAList { name, found },
                    _ => ScopeStructureError::NotAScope { name, found },
                }
                .into())
            }
        }
    }

    /// Appends a child scope seeded with `values` (an object or `null`).
    pub fn add_child_scope(&mut self, list: NodeId, values: Value) -> FormResult<NodeId> {
        self.list_node(list)?;
        if !(values.is_object() || values.is_null()) {
            return Err(ScopeStructureError::NotAnObject {
                context: "list item".to_owned(),
            }
            .into());
        }
        let id = self.push_item(list, values)?;
        tracing::debug!(form = %self.id, path = %self.node(id)?.path, "added list item");
        Ok(id)
    }

    /// Removes the child scope at `index`. Out-of-range indices are a no-op
    /// and return false.
    pub fn remove_child_scope(&mut self, list: NodeId, index: usize) -> FormResult<bool> {
        let Some(removed) = self.list_node_mut(list)?.remove(index) else {
            tracing::debug!(form = %self.id, index, "ignored out-of-range list removal");
            return Ok(false);
        };
        let freed = self.free_subtree(removed);
        tracing::debug!(form = %self.id, index, freed, "removed list item");
        Ok(true)
    }

    /// Adds an item to the collection under `name`: a new child scope for a
    /// list scope, or a new element for an array-valued field.
    pub fn add_collection_item(
        &mut self,
        scope: NodeId,
        name: &str,
        values: Value,
    ) -> FormResult<()> {
        let not_a_collection = || -> FormError {
            ScopeStructureError::NotACollection {
                name: name.to_owned(),
            }
            .into()
        };

        let target = match self.get_child(scope, name)? {
            Some(id) => id,
            None => {
                if !self.scope_node(scope)?.initial_value(name).is_array() {
                    return Err(not_a_collection());
                }
                self.field(scope, name)?
            }
        };

        match self.kind(target)? {
            ChildKind::List => self.add_child_scope(target, values).map(drop),
            ChildKind::Field => match &mut self.field_node_mut(target)?.value {
                Value::Array(items) => {
                    items.push(values);
                    Ok(())
                }
                _ => Err(not_a_collection()),
            },
            ChildKind::Scope => Err(not_a_collection()),
        }
    }

    /// Rebuilds the value of `id` from its children. Nothing is cached.
    pub fn value(&self, id: NodeId) -> FormResult<Value> {
        Ok(match &self.node(id)?.kind {
            NodeKind::Field(field) => field.value.clone(),
            NodeKind::Scope(scope) => {
                let mut values = Map::new();
                for (name, child) in scope.children() {
                    values.insert(name.to_owned(), self.value(child)?);
                }
                Value::Object(values)
            }
            NodeKind::List(list) => Value::Array(
                list.children()
                    .iter()
                    .map(|child| self.value(*child))
                    .collect::<FormResult<Vec<_>>>()?,
            ),
        })
    }

    /// True iff every field below `id` is valid; vacuously true when empty.
    pub fn valid(&self, id: NodeId) -> FormResult<bool> {
        let node = self.node(id)?;
        if let NodeKind::Field(field) = &node.kind {
            return Ok(field.valid());
        }
        for child in node.kind.child_ids() {
            if !self.valid(child)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// True iff any field below `id` changed.
    pub fn changed(&self, id: NodeId) -> FormResult<bool> {
        let node = self.node(id)?;
        if let NodeKind::Field(field) = &node.kind {
            return Ok(field.changed());
        }
        for child in node.kind.child_ids() {
            if self.changed(child)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn reset(&mut self, id: NodeId) -> FormResult<()> {
        self.for_each_field(id, FieldNode::reset)
    }

    pub fn clear(&mut self, id: NodeId) -> FormResult<()> {
        self.for_each_field(id, FieldNode::clear)
    }

    /// Resets values and also drops errors, touched flags and any validation
    /// still in flight.
    pub fn restore(&mut self, id: NodeId) -> FormResult<()> {
        self.for_each_field(id, |field| {
            field.reset();
            field.error = None;
            field.touched = false;
            field.next_ticket();
        })
    }

    fn for_each_field(&mut self, id: NodeId, mut f: impl FnMut(&mut FieldNode)) -> FormResult<()> {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            match &mut self.node_mut(current)?.kind {
                NodeKind::Field(field) => f(field),
                other => stack.extend(other.child_ids()),
            }
        }
        Ok(())
    }

    /// Every field below `id`, keyed by its value path relative to `id`
    /// (`"friends.0.name"`).
    pub fn fields(&self, id: NodeId) -> FormResult<Vec<(String, NodeId)>> {
        let mut out = Vec::new();
        self.collect_fields(id, String::new(), &mut out)?;
        Ok(out)
    }

    fn collect_fields(
        &self,
        id: NodeId,
        prefix: String,
        out: &mut Vec<(String, NodeId)>,
    ) -> FormResult<()> {
        match &self.node(id)?.kind {
            NodeKind::Field(_) => out.push((prefix, id)),
            NodeKind::Scope(scope) => {
                for (name, child) in scope.children() {
                    self.collect_fields(child, join_path(&prefix, name), out)?;
                }
            }
            NodeKind::List(list) => {
                for (index, child) in list.children().iter().enumerate() {
                    self.collect_fields(*child, join_path(&prefix, &index.to_string()), out)?;
                }
            }
        }
        Ok(())
    }

    /// All non-empty field errors below `id`, keyed by relative path.
    pub fn errors(&self, id: NodeId) -> FormResult<FieldErrors> {
        let mut errors = FieldErrors::new();
        for (path, field) in self.fields(id)? {
            if let Some(message) = self.field_node(field)?.error_message() {
                errors.insert(path, message.to_owned());
            }
        }
        Ok(errors)
    }

    /// Errors of the named fields only. `None` when none of them has one.
    pub fn get_errors<S: AsRef<str>>(
        &self,
        scope: NodeId,
        fields: &[S],
    ) -> FormResult<Option<FieldErrors>> {
        let mut errors = FieldErrors::new();
        for name in fields {
            let name = name.as_ref();
            let Ok(id) = self.resolve(scope, name) else {
                continue;
            };
            if let NodeKind::Field(field) = &self.node(id)?.kind {
                if let Some(message) = field.error_message() {
                    errors.insert(name.to_owned(), message.to_owned());
                }
            }
        }
        Ok((!errors.is_empty()).then_some(errors))
    }

    /// True if any of the named children changed.
    pub fn has_changes<S: AsRef<str>>(&self, scope: NodeId, fields: &[S]) -> FormResult<bool> {
        for name in fields {
            let Ok(id) = self.resolve(scope, name.as_ref()) else {
                continue;
            };
            if self.changed(id)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Resolves a value path such as `"friends.0.name"` below `scope`. The
    /// empty path resolves to `scope` itself.
    pub fn resolve(&self, scope: NodeId, path: &str) -> FormResult<NodeId> {
        self.node(scope)?;
        if path.is_empty() {
            return Ok(scope);
        }
        let mut current = scope;
        for segment in path.split(PATH_SEPARATOR) {
            let next = match &self.node(current)?.kind {
                NodeKind::Scope(scope) => scope.child(segment),
                NodeKind::List(list) => segment.parse::<usize>().ok().and_then(|i| list.get(i)),
                NodeKind::Field(_) => None,
            };
            current = next.ok_or_else(|| FormError::UnknownPath(path.to_owned()))?;
        }
        Ok(current)
    }

    /// Writes `values` into the scope: fields take the new value, nested
    /// scopes recurse, list scopes are rebuilt from the given array, and
    /// unknown keys become implicit fields.
    pub fn set_values(&mut self, scope: NodeId, values: &Value) -> FormResult<()> {
        let Value::Object(values) = values else {
            return Err(ScopeStructureError::NotAnObject {
                context: "values".to_owned(),
            }
            .into());
        };

        for (name, value) in values {
            let Some(child) = self.get_child(scope, name)? else {
                let seed = self.scope_node(scope)?.initial_value(name);
                let id = self.create_field(scope, seed)?;
                self.set_child(scope, name, id)?;
                let node = self.node_mut(id)?;
                node.implicit = true;
                if let NodeKind::Field(field) = &mut node.kind {
                    field.value = value.clone();
                }
                continue;
            };

            match self.kind(child)? {
                ChildKind::Field => self.field_node_mut(child)?.value = value.clone(),
                ChildKind::Scope => self.set_values(child, value)?,
                ChildKind::List => self.replace_items(child, value.clone())?,
            }
        }
        Ok(())
    }

    fn replace_items(&mut self, list: NodeId, values: Value) -> FormResult<()> {
        let items = array_seed(values, "list values")?;
        if let Some(index) = items
            .iter()
            .position(|item| !(item.is_object() || item.is_null()))
        {
            return Err(ScopeStructureError::NotAnObject {
                context: format!("list item {index}"),
            }
            .into());
        }

        for old in self.list_node_mut(list)?.take_children() {
            self.free_subtree(old);
        }
        for item in items {
            self.push_item(list, item)?;
        }
        Ok(())
    }

    fn alloc(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let segment = self.next_segment;
        self.next_segment += 1;
        let path = match self.nodes.get(parent) {
            Some(parent) => format!("{}{PATH_SEPARATOR}{segment}", parent.path),
            None => segment.to_string(),
        };
        self.nodes.alloc(Node {
            parent: Some(parent),
            path,
            attached: false,
            implicit: false,
            kind,
        })
    }

    fn push_item(&mut self, list: NodeId, values: Value) -> FormResult<NodeId> {
        let values = object_seed(values, "list item")?;
        let id = self.alloc(list, NodeKind::Scope(ScopeNode::new(values.clone())));
        self.node_mut(id)?.attached = true;
        self.materialize(id, &values)?;
        self.list_node_mut(list)?.push(id);
        Ok(id)
    }

    fn materialize(&mut self, scope: NodeId, values: &Map<String, Value>) -> FormResult<()> {
        for (name, value) in values {
            let id = self.alloc(scope, NodeKind::Field(FieldNode::new(value.clone())));
            let node = self.node_mut(id)?;
            node.attached = true;
            node.implicit = true;
            self.scope_node_mut(scope)?.insert_child(name, id);
        }
        Ok(())
    }

    fn free_subtree(&mut self, id: NodeId) -> usize {
        let mut freed = 0;
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.free(current) {
                freed += 1;
                stack.extend(node.kind.child_ids());
            }
        }
        freed
    }
}

pub(super) fn join_path(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_owned()
    } else {
        format!("{prefix}{PATH_SEPARATOR}{segment}")
    }
}

fn wrong_kind(id: NodeId, expected: ChildKind, found: &NodeKind) -> FormError {
    ScopeStructureError::WrongKind {
        id,
        expected,
        found: found.kind(),
    }
    .into()
}

fn object_seed(value: Value, context: &str) -> FormResult<Map<String, Value>> {
    match value {
        Value::Null => Ok(Map::new()),
        Value::Object(values) => Ok(values),
        _ => Err(ScopeStructureError::NotAnObject {
            context: context.to_owned(),
        }
        .into()),
    }
}

fn array_seed(value: Value, context: &str) -> FormResult<Vec<Value>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items),
        _ => Err(ScopeStructureError::NotAnArray {
            context: context.to_owned(),
        }
        .into()),
    }
}
