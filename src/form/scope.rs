use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde_json::{Map, Value};

use super::field::FieldNode;
use super::tree::NodeId;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ChildKind {
    Field,
    Scope,
    List,
}

impl Display for ChildKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ChildKind::Field => "field",
            ChildKind::Scope => "object scope",
            ChildKind::List => "list scope",
        })
    }
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    Field(FieldNode),
    Scope(ScopeNode),
    List(ListScopeNode),
}

impl NodeKind {
    pub fn kind(&self) -> ChildKind {
        match self {
            NodeKind::Field(_) => ChildKind::Field,
            NodeKind::Scope(_) => ChildKind::Scope,
            NodeKind::List(_) => ChildKind::List,
        }
    }

    /// Direct children in value order.
    pub(super) fn child_ids(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Field(_) => Vec::new(),
            NodeKind::Scope(scope) => scope.children.values().copied().collect(),
            NodeKind::List(list) => list.children.clone(),
        }
    }
}

/// One arena slot of a [`ScopeTree`](super::tree::ScopeTree).
#[derive(Clone, Debug)]
pub struct Node {
    pub(super) parent: Option<NodeId>,
    pub(super) path: String,
    pub(super) attached: bool,
    pub(super) implicit: bool,
    pub(super) kind: NodeKind,
}

impl Node {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// True for fields materialized from seed values that no binding has
    /// claimed yet.
    pub fn is_implicit(&self) -> bool {
        self.implicit
    }
}

/// Object scope: named children seeded from a snapshot of initial values.
#[derive(Clone, Debug, Default)]
pub struct ScopeNode {
    initial_values: Map<String, Value>,
    children: BTreeMap<String, NodeId>,
}

impl ScopeNode {
    pub fn new(initial_values: Map<String, Value>) -> Self {
        Self {
            initial_values,
            children: BTreeMap::new(),
        }
    }

    pub fn initial_values(&self) -> &Map<String, Value> {
        &self.initial_values
    }

    /// Seed for a child named `name`; `null` when absent.
    pub fn initial_value(&self, name: &str) -> Value {
        self.initial_values.get(name).cloned().unwrap_or(Value::Null)
    }

    pub fn child(&self, name: &str) -> Option<NodeId> {
        self.children.get(name).copied()
    }

    pub fn children(&self) -> impl Iterator<Item = (&str, NodeId)> {
        self.children.iter().map(|(name, id)| (name.as_str(), *id))
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub(super) fn insert_child(&mut self, name: &str, id: NodeId) -> Option<NodeId> {
        self.children.insert(name.to_owned(), id)
    }

    pub(super) fn remove_child(&mut self, name: &str) -> Option<NodeId> {
        self.children.remove(name)
    }
}

/// List scope: one object scope per array element, in array order.
#[derive(Clone, Debug, Default)]
pub struct ListScopeNode {
    initial_values: Vec<Value>,
    children: Vec<NodeId>,
}

impl ListScopeNode {
    pub fn new(initial_values: Vec<Value>) -> Self {
        Self {
            initial_values,
            children: Vec::new(),
        }
    }

    pub fn initial_values(&self) -> &[Value] {
        &self.initial_values
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn get(&self, index: usize) -> Option<NodeId> {
        self.children.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn position(&self, id: NodeId) -> Option<usize> {
        self.children.iter().position(|child| *child == id)
    }

    pub(super) fn push(&mut self, id: NodeId) {
        self.children.push(id);
    }

    /// Removes the child at `index`, shifting later children down by one.
    /// Out-of-range indices leave the list untouched.
    pub(super) fn remove(&mut self, index: usize) -> Option<NodeId> {
        (index < self.children.len()).then(|| self.children.remove(index))
    }

    pub(super) fn take_children(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.children)
    }
}
