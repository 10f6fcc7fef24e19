//! The flattened relation graph: one node per row the operation touches.

use crate::markers::{PropRef, RefTemplate};
use crate::path::RelationPath;
use crate::value::Value;

/// Index of a node inside [`RelationGraph::nodes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// What a node stands for.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// A row to insert.
    Insert,
    /// A row that already exists in the database, identified by its key.
    /// Context rows of scoped inserts and `#dbRef` nodes land here.
    Existing(Value),
    /// A many-to-many join row, generated by the planner.
    JoinRow,
}

/// A single property value on a node.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Lit(Value),
    /// The whole value is `#ref{sid.column}`.
    Ref(PropRef),
    /// A string with one or more `#ref{...}` tokens embedded in it.
    Template(RefTemplate),
}

impl PropValue {
    pub fn as_lit(&self) -> Option<&Value> {
        match self {
            Self::Lit(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Ref(_) | Self::Template(_))
    }
}

/// Node-or-symbol, before symbols are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceTarget {
    Node(NodeId),
    /// A `#ref` to a `#id` declared elsewhere in the literal.
    Ref(String),
}

/// A child relation occurrence, in literal order. Used to rebuild the
/// original shape after execution.
#[derive(Debug, Clone)]
pub struct Placement {
    pub relation: String,
    /// Whether the relation's literal value was an array.
    pub many: bool,
    pub target: PlaceTarget,
    /// The generated join row, for many-to-many placements.
    pub join: Option<NodeId>,
}

/// Copies one column value between two nodes once the source is inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fill {
    /// Column written on the dependent node.
    pub column: String,
    /// Column read from the node depended on.
    pub source_column: String,
    /// For template properties: the exact `#ref{...}` token to substitute.
    /// `None` writes the value directly.
    pub token: Option<String>,
}

/// `from` must be inserted after `depends_on`.
#[derive(Debug, Clone)]
pub struct ReferenceEdge {
    pub from: NodeId,
    pub depends_on: NodeId,
    pub fill: Option<Fill>,
}

/// An edge whose ends may still be unresolved symbols.
#[derive(Debug, Clone)]
pub struct PendingEdge {
    pub from: PlaceTarget,
    pub depends_on: PlaceTarget,
    pub fill: Option<Fill>,
}

/// A deferred `UPDATE` against a pre-existing row, keyed by its primary key.
/// Produced for `#dbRef` under has-one / has-many, and for scoped inserts
/// through a belongs-to relation.
#[derive(Debug, Clone)]
pub struct Patch {
    pub table: String,
    pub key_column: String,
    pub key: Value,
    /// Column to set.
    pub column: String,
    /// Node whose generated key provides the value.
    pub source: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Pending,
    Inserted,
}

/// One row the operation touches.
#[derive(Debug, Clone)]
pub struct EntityNode {
    pub table: String,
    /// Scalar properties in literal order. Relations are placements, not
    /// props.
    pub props: Vec<(String, PropValue)>,
    /// Symbolic id from `#id`, if declared.
    pub sid: Option<String>,
    pub kind: NodeKind,
    /// Where in the literal this node sits, for error messages.
    pub path: RelationPath,
    /// Position in the literal walk; breaks ties in batch ordering.
    pub order: usize,
    /// Child relation occurrences, in literal order.
    pub placements: Vec<Placement>,
    /// Relations that appeared in the literal as empty arrays. Kept so the
    /// returned graph reproduces them.
    pub empty_many: Vec<String>,
    pub status: NodeStatus,
}

impl EntityNode {
    pub fn new(table: impl Into<String>, kind: NodeKind, path: RelationPath, order: usize) -> Self {
        Self {
            table: table.into(),
            props: Vec::new(),
            sid: None,
            kind,
            path,
            order,
            placements: Vec::new(),
            empty_many: Vec::new(),
            status: NodeStatus::Pending,
        }
    }

    pub fn prop(&self, name: &str) -> Option<&PropValue> {
        self.props
            .iter()
            .find_map(|(n, v)| (n == name).then_some(v))
    }

    pub fn lit(&self, name: &str) -> Option<&Value> {
        self.prop(name).and_then(PropValue::as_lit)
    }

    /// Set a literal property, replacing in place to keep literal order.
    pub fn set_lit(&mut self, name: &str, value: Value) {
        if let Some(slot) = self
            .props
            .iter_mut()
            .find_map(|(n, v)| (n.as_str() == name).then_some(v))
        {
            *slot = PropValue::Lit(value);
        } else {
            self.props.push((name.to_string(), PropValue::Lit(value)));
        }
    }

    /// Human-readable handle for error messages: the symbolic id when one
    /// was declared, the table name otherwise.
    pub fn label(&self) -> &str {
        self.sid.as_deref().unwrap_or(&self.table)
    }

    pub fn is_insert(&self) -> bool {
        matches!(self.kind, NodeKind::Insert)
    }
}

/// The whole flattened graph plus everything execution needs afterwards.
#[derive(Debug, Clone, Default)]
pub struct RelationGraph {
    pub nodes: Vec<EntityNode>,
    pub edges: Vec<ReferenceEdge>,
    /// Edges waiting for symbol resolution; drained by the resolver.
    pub pending_edges: Vec<PendingEdge>,
    pub patches: Vec<Patch>,
    /// Root nodes, in literal order.
    pub roots: Vec<NodeId>,
    /// The existing parent row of a scoped insert.
    pub context: Option<NodeId>,
    /// Whether the input literal was an array.
    pub root_many: bool,
}

impl RelationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: EntityNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: NodeId) -> &EntityNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut EntityNode {
        &mut self.nodes[id.0]
    }

    pub fn add_edge(&mut self, edge: ReferenceEdge) {
        self.edges.push(edge);
    }

    pub fn add_pending_edge(&mut self, edge: PendingEdge) {
        self.pending_edges.push(edge);
    }

    pub fn add_patch(&mut self, patch: Patch) {
        self.patches.push(patch);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids of all nodes, in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_lit_replaces_in_place() {
        let mut node = EntityNode::new("person", NodeKind::Insert, RelationPath::root(), 0);
        node.props.push(("a".into(), PropValue::Lit(Value::Int(1))));
        node.props.push(("b".into(), PropValue::Lit(Value::Int(2))));

        node.set_lit("a", Value::Int(9));
        node.set_lit("c", Value::Int(3));

        let names: Vec<_> = node.props.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(node.lit("a"), Some(&Value::Int(9)));
    }

    #[test]
    fn label_prefers_symbolic_id() {
        let mut node = EntityNode::new("person", NodeKind::Insert, RelationPath::root(), 0);
        assert_eq!(node.label(), "person");
        node.sid = Some("mother".into());
        assert_eq!(node.label(), "mother");
    }
}
