//! Flattening a nested literal into a [`RelationGraph`].
//!
//! The walk visits objects in literal order, creates one node per row and
//! records the edges each relation nesting implies. Symbolic `#ref` targets
//! stay unresolved here; the resolver binds them afterwards.

use serde_json::Value as JsonValue;
use std::collections::HashMap;

use crate::error::{GraftError, GraftResult};
use crate::markers::{parse_ref_string, split_tags, RefParse};
use crate::path::{RelationExpression, RelationPath};
use crate::plan::graph::{
    EntityNode, Fill, NodeId, NodeKind, Patch, PendingEdge, PlaceTarget, Placement, PropValue,
    RelationGraph,
};
use crate::schema::{ColumnSchema, ColumnType, RelationLink, RelationSchema, SchemaRegistry};
use crate::value::Value;

/// The existing parent row a scoped insert goes through.
#[derive(Debug, Clone)]
pub struct RelatedContext {
    /// Key of the existing parent row.
    pub key: Value,
    /// Relation on the parent's table the new rows attach through.
    pub relation: String,
}

/// Flatten `literal` into a relation graph rooted at `table`.
///
/// With a [`RelatedContext`], `table` names the existing parent's table and
/// the literal's roots are rows of the context relation's target table.
pub fn normalize(
    literal: &JsonValue,
    table: &str,
    context: Option<&RelatedContext>,
    allow: Option<&RelationExpression>,
    registry: &SchemaRegistry,
) -> GraftResult<RelationGraph> {
    let mut normalizer = Normalizer {
        registry,
        allow,
        graph: RelationGraph::new(),
        declared: HashMap::new(),
        order: 0,
    };
    normalizer.run(literal, table, context)?;
    Ok(normalizer.graph)
}

/// What one literal element turned out to be.
enum Walked {
    /// A row to insert. The flag is false when the element repeated an
    /// earlier `#id` declaration and was folded into that node.
    Insert(NodeId, bool),
    /// A `#ref` node: the symbol plus any extra properties.
    Symbol(String, Vec<(String, PropValue)>),
    /// A `#dbRef` node: the pre-existing row plus any extra properties.
    Row(NodeId, Vec<(String, PropValue)>),
}

struct Normalizer<'a> {
    registry: &'a SchemaRegistry,
    allow: Option<&'a RelationExpression>,
    graph: RelationGraph,
    /// First declaration per `#id`: the node plus its raw subtree, used to
    /// fold repeated declarations.
    declared: HashMap<String, (NodeId, JsonValue)>,
    order: usize,
}

impl Normalizer<'_> {
    fn run(
        &mut self,
        literal: &JsonValue,
        table: &str,
        context: Option<&RelatedContext>,
    ) -> GraftResult<()> {
        self.graph.root_many = literal.is_array();
        let elements: Vec<&JsonValue> = match literal {
            JsonValue::Array(items) => items.iter().collect(),
            JsonValue::Object(_) => vec![literal],
            other => {
                return Err(GraftError::input(format!(
                    "graph must be an object or an array of objects, got {}",
                    json_type(other)
                )));
            }
        };

        match context {
            None => {
                self.registry.schema_for(table)?;
                for element in elements {
                    let walked = self.walk_element(element, table, &RelationPath::root())?;
                    let id = match walked {
                        Walked::Insert(id, _) => id,
                        Walked::Symbol(..) => {
                            return Err(GraftError::resolution(
                                "a '#ref' node cannot be a graph root",
                            ));
                        }
                        Walked::Row(..) => {
                            return Err(GraftError::resolution(
                                "a '#dbRef' node cannot be a graph root without a parent relation",
                            ));
                        }
                    };
                    self.graph.roots.push(id);
                }
            }
            Some(ctx) => self.run_related(&elements, table, ctx)?,
        }
        Ok(())
    }

    /// Scoped insert: everything in the literal hangs off an existing row.
    fn run_related(
        &mut self,
        elements: &[&JsonValue],
        table: &str,
        ctx: &RelatedContext,
    ) -> GraftResult<()> {
        let parent = self.registry.schema_for(table)?;
        let rel = parent
            .relation_schema(&ctx.relation)
            .ok_or_else(|| GraftError::UnknownRelation {
                table: table.to_string(),
                relation: ctx.relation.clone(),
            })?;
        let parent_key = parent.key_column.clone();

        if !rel.is_many() && elements.len() > 1 {
            return Err(GraftError::input(format!(
                "relation '{}' of '{table}' takes a single node, got {}",
                rel.name,
                elements.len()
            )));
        }

        let order = self.next_order();
        let ctx_id = self.graph.push(EntityNode::new(
            table,
            NodeKind::Existing(ctx.key.clone()),
            RelationPath::root(),
            order,
        ));
        self.graph.context = Some(ctx_id);

        let many = self.graph.root_many;
        for element in elements {
            let walked = self.walk_element(element, &rel.target, &RelationPath::root())?;
            if let RelationLink::BelongsToOne { fk_column } = &rel.link {
                // The parent row exists, so its foreign key cannot be set at
                // insert time. It is patched once the new row has a key.
                let (root_id, extras) = match walked {
                    Walked::Insert(id, _) => (id, Vec::new()),
                    Walked::Row(id, extras) => (id, extras),
                    Walked::Symbol(..) => {
                        return Err(GraftError::resolution(
                            "a '#ref' node cannot be a graph root",
                        ));
                    }
                };
                reject_extras(&extras, &RelationPath::root().child(&rel.name))?;
                self.graph.add_patch(Patch {
                    table: table.to_string(),
                    key_column: parent_key.clone(),
                    key: ctx.key.clone(),
                    column: fk_column.clone(),
                    source: root_id,
                });
                self.place(ctx_id, rel, many, PlaceTarget::Node(root_id), None);
                self.graph.roots.push(root_id);
            } else {
                let root_id = match &walked {
                    Walked::Insert(id, _) | Walked::Row(id, _) => *id,
                    Walked::Symbol(..) => {
                        return Err(GraftError::resolution(
                            "a '#ref' node cannot be a graph root",
                        ));
                    }
                };
                self.link_child(ctx_id, rel, walked, many, &RelationPath::root())?;
                self.graph.roots.push(root_id);
            }
        }
        Ok(())
    }

    fn walk_element(
        &mut self,
        raw: &JsonValue,
        table: &str,
        path: &RelationPath,
    ) -> GraftResult<Walked> {
        let obj = raw.as_object().ok_or_else(|| {
            GraftError::input(format!(
                "graph nodes must be objects, got {}",
                json_type(raw)
            ))
        })?;
        let tags = split_tags(obj)?;

        if let Some(symbol) = tags.node_ref {
            let extras = convert_extras(&tags.rest);
            return Ok(Walked::Symbol(symbol, extras));
        }

        if let Some(key) = tags.db_ref {
            if let Some(sid) = &tags.sid {
                if let Some(folded) = self.folded_declaration(sid, table, raw)? {
                    return Ok(Walked::Row(folded, convert_extras(&tags.rest)));
                }
            }
            let order = self.next_order();
            let mut node = EntityNode::new(table, NodeKind::Existing(key), path.clone(), order);
            node.sid = tags.sid.clone();
            let id = self.graph.push(node);
            if let Some(sid) = tags.sid {
                self.declared.insert(sid, (id, raw.clone()));
            }
            return Ok(Walked::Row(id, convert_extras(&tags.rest)));
        }

        if let Some(sid) = &tags.sid {
            if let Some(folded) = self.folded_declaration(sid, table, raw)? {
                return Ok(Walked::Insert(folded, false));
            }
        }

        let schema = self.registry.schema_for(table)?;
        let order = self.next_order();
        let mut node = EntityNode::new(table, NodeKind::Insert, path.clone(), order);
        node.sid = tags.sid.clone();
        let id = self.graph.push(node);
        if let Some(sid) = tags.sid {
            self.declared.insert(sid, (id, raw.clone()));
        }

        for (key, value) in &tags.rest {
            if let Some(rel) = schema.relation_schema(key) {
                self.walk_relation(id, rel, value, path)?;
            } else {
                let prop = convert_prop(value, schema.column_schema(key));
                self.graph.node_mut(id).props.push(((*key).clone(), prop));
            }
        }
        Ok(Walked::Insert(id, true))
    }

    fn walk_relation(
        &mut self,
        parent_id: NodeId,
        rel: &RelationSchema,
        value: &JsonValue,
        parent_path: &RelationPath,
    ) -> GraftResult<()> {
        if value.is_null() {
            return Ok(());
        }
        let child_path = parent_path.child(&rel.name);
        if let Some(allow) = self.allow {
            if !allow.covers(&child_path) {
                return Err(GraftError::UnallowedRelation(child_path.to_string()));
            }
        }

        let (elements, many): (Vec<&JsonValue>, bool) = match value {
            JsonValue::Array(items) => (items.iter().collect(), true),
            JsonValue::Object(_) => (vec![value], false),
            other => {
                return Err(GraftError::input(format!(
                    "relation '{child_path}' expects an object or an array, got {}",
                    json_type(other)
                )));
            }
        };
        if !rel.is_many() && elements.len() > 1 {
            return Err(GraftError::input(format!(
                "relation '{child_path}' takes a single node, got {}",
                elements.len()
            )));
        }
        if elements.is_empty() {
            self.graph
                .node_mut(parent_id)
                .empty_many
                .push(rel.name.clone());
            return Ok(());
        }

        for element in elements {
            let walked = self.walk_element(element, &rel.target, &child_path)?;
            self.link_child(parent_id, rel, walked, many, &child_path)?;
        }
        Ok(())
    }

    /// Wire one child occurrence to its parent according to the relation
    /// kind.
    fn link_child(
        &mut self,
        parent_id: NodeId,
        rel: &RelationSchema,
        child: Walked,
        many: bool,
        child_path: &RelationPath,
    ) -> GraftResult<()> {
        let parent_key = self.key_column_of(parent_id)?;
        let target_key = self.registry.schema_for(&rel.target)?.key_column.clone();

        match &rel.link {
            RelationLink::BelongsToOne { fk_column } => {
                let target = match child {
                    Walked::Insert(id, _) => PlaceTarget::Node(id),
                    Walked::Row(id, extras) => {
                        reject_extras(&extras, child_path)?;
                        PlaceTarget::Node(id)
                    }
                    Walked::Symbol(symbol, extras) => {
                        reject_extras(&extras, child_path)?;
                        PlaceTarget::Ref(symbol)
                    }
                };
                self.graph.add_pending_edge(PendingEdge {
                    from: PlaceTarget::Node(parent_id),
                    depends_on: target.clone(),
                    fill: Some(Fill {
                        column: fk_column.clone(),
                        source_column: target_key,
                        token: None,
                    }),
                });
                self.place(parent_id, rel, many, target, None);
            }
            RelationLink::HasOne { fk_column } | RelationLink::HasMany { fk_column } => {
                match child {
                    Walked::Insert(id, _) => {
                        self.graph.add_pending_edge(PendingEdge {
                            from: PlaceTarget::Node(id),
                            depends_on: PlaceTarget::Node(parent_id),
                            fill: Some(Fill {
                                column: fk_column.clone(),
                                source_column: parent_key,
                                token: None,
                            }),
                        });
                        self.place(parent_id, rel, many, PlaceTarget::Node(id), None);
                    }
                    Walked::Row(id, extras) => {
                        reject_extras(&extras, child_path)?;
                        // The row exists, so adopting it means updating its
                        // foreign key after the parent is inserted.
                        let key = self.existing_key(id)?;
                        self.graph.add_patch(Patch {
                            table: rel.target.clone(),
                            key_column: target_key,
                            key,
                            column: fk_column.clone(),
                            source: parent_id,
                        });
                        self.place(parent_id, rel, many, PlaceTarget::Node(id), None);
                    }
                    Walked::Symbol(symbol, extras) => {
                        reject_extras(&extras, child_path)?;
                        self.graph.add_pending_edge(PendingEdge {
                            from: PlaceTarget::Ref(symbol.clone()),
                            depends_on: PlaceTarget::Node(parent_id),
                            fill: Some(Fill {
                                column: fk_column.clone(),
                                source_column: parent_key,
                                token: None,
                            }),
                        });
                        self.place(parent_id, rel, many, PlaceTarget::Ref(symbol), None);
                    }
                }
            }
            RelationLink::ManyToMany {
                join_table,
                owner_column,
                target_column,
                extra_columns,
            } => {
                let (target, extras) = match child {
                    Walked::Insert(id, created) => {
                        let extras = if created {
                            self.extract_extras(id, extra_columns)
                        } else {
                            Vec::new()
                        };
                        (PlaceTarget::Node(id), extras)
                    }
                    Walked::Row(id, extras) => (PlaceTarget::Node(id), extras),
                    Walked::Symbol(symbol, extras) => (PlaceTarget::Ref(symbol), extras),
                };
                for (name, _) in &extras {
                    if !extra_columns.contains(name) {
                        return Err(GraftError::input(format!(
                            "relation '{}' has no extra join column '{name}'",
                            rel.name
                        )));
                    }
                }

                let order = self.next_order();
                let mut join = EntityNode::new(
                    join_table.clone(),
                    NodeKind::JoinRow,
                    child_path.clone(),
                    order,
                );
                join.props = extras;
                let join_id = self.graph.push(join);
                self.graph.add_pending_edge(PendingEdge {
                    from: PlaceTarget::Node(join_id),
                    depends_on: PlaceTarget::Node(parent_id),
                    fill: Some(Fill {
                        column: owner_column.clone(),
                        source_column: parent_key,
                        token: None,
                    }),
                });
                self.graph.add_pending_edge(PendingEdge {
                    from: PlaceTarget::Node(join_id),
                    depends_on: target.clone(),
                    fill: Some(Fill {
                        column: target_column.clone(),
                        source_column: target_key,
                        token: None,
                    }),
                });
                self.place(parent_id, rel, many, target, Some(join_id));
            }
        }
        Ok(())
    }

    /// Returns the earlier node when this subtree repeats an `#id`
    /// declaration verbatim for the same table; errors when the two
    /// declarations disagree.
    fn folded_declaration(
        &self,
        sid: &str,
        table: &str,
        raw: &JsonValue,
    ) -> GraftResult<Option<NodeId>> {
        match self.declared.get(sid) {
            Some((id, first)) => {
                let declared_table = &self.graph.node(*id).table;
                if declared_table != table {
                    return Err(GraftError::resolution(format!(
                        "'#id' '{sid}' is declared more than once, \
                         for tables '{declared_table}' and '{table}'"
                    )));
                }
                if first == raw {
                    Ok(Some(*id))
                } else {
                    Err(GraftError::resolution(format!(
                        "'#id' '{sid}' is declared more than once with different properties"
                    )))
                }
            }
            None => Ok(None),
        }
    }

    /// Extra join columns set directly on a related object move to the join
    /// row.
    fn extract_extras(
        &mut self,
        id: NodeId,
        extra_columns: &[String],
    ) -> Vec<(String, PropValue)> {
        if extra_columns.is_empty() {
            return Vec::new();
        }
        let node = self.graph.node_mut(id);
        let props = std::mem::take(&mut node.props);
        let mut extras = Vec::new();
        let mut kept = Vec::with_capacity(props.len());
        for (name, value) in props {
            if extra_columns.contains(&name) {
                extras.push((name, value));
            } else {
                kept.push((name, value));
            }
        }
        node.props = kept;
        extras
    }

    fn place(
        &mut self,
        parent_id: NodeId,
        rel: &RelationSchema,
        many: bool,
        target: PlaceTarget,
        join: Option<NodeId>,
    ) {
        self.graph.node_mut(parent_id).placements.push(Placement {
            relation: rel.name.clone(),
            many,
            target,
            join,
        });
    }

    fn key_column_of(&self, id: NodeId) -> GraftResult<String> {
        let table = &self.graph.node(id).table;
        Ok(self.registry.schema_for(table)?.key_column.clone())
    }

    fn existing_key(&self, id: NodeId) -> GraftResult<Value> {
        match &self.graph.node(id).kind {
            NodeKind::Existing(key) => Ok(key.clone()),
            _ => Err(GraftError::storage(
                "internal: expected a pre-existing row node",
            )),
        }
    }

    fn next_order(&mut self) -> usize {
        let order = self.order;
        self.order += 1;
        order
    }
}

fn convert_prop(raw: &JsonValue, column: Option<&ColumnSchema>) -> PropValue {
    if let Some(column) = column {
        // Json columns take their literal value wholesale; no reference
        // markers inside.
        if column.ty == ColumnType::Json {
            return PropValue::Lit(Value::Json(raw.clone()));
        }
    }
    match raw.as_str() {
        Some(text) => match parse_ref_string(text) {
            RefParse::Whole(r) => PropValue::Ref(r),
            RefParse::Template(t) => PropValue::Template(t),
            RefParse::Plain => PropValue::Lit(Value::Text(text.to_string())),
        },
        None => PropValue::Lit(Value::from_json(raw)),
    }
}

fn convert_extras(rest: &[(&String, &JsonValue)]) -> Vec<(String, PropValue)> {
    rest.iter()
        .map(|(k, v)| ((*k).clone(), convert_prop(v, None)))
        .collect()
}

fn reject_extras(extras: &[(String, PropValue)], child_path: &RelationPath) -> GraftResult<()> {
    if extras.is_empty() {
        Ok(())
    } else {
        Err(GraftError::resolution(format!(
            "extra properties on a reference node are only allowed under \
             many-to-many relations, found at '{child_path}'"
        )))
    }
}

fn json_type(v: &JsonValue) -> &'static str {
    match v {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSchema, ColumnType, RelationSchema, TableSchema};
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry.register(
            TableSchema::new("person")
                .column(ColumnSchema::new("name", ColumnType::Text).required())
                .column(ColumnSchema::new("age", ColumnType::Int))
                .column(ColumnSchema::new("parent_id", ColumnType::Int))
                .relation(RelationSchema::belongs_to("parent", "person", "parent_id"))
                .relation(RelationSchema::has_many("children", "person", "parent_id"))
                .relation(RelationSchema::has_many("pets", "animal", "owner_id"))
                .relation(
                    RelationSchema::many_to_many(
                        "movies",
                        "movie",
                        "person_movie",
                        "person_id",
                        "movie_id",
                    )
                    .extra("role"),
                ),
        );
        registry.register(
            TableSchema::new("animal")
                .column(ColumnSchema::new("name", ColumnType::Text).required())
                .column(ColumnSchema::new("owner_id", ColumnType::Int)),
        );
        registry.register(
            TableSchema::new("movie")
                .column(ColumnSchema::new("name", ColumnType::Text).required()),
        );
        registry
    }

    #[test]
    fn flattens_nested_literal() {
        let registry = registry();
        let literal = json!({
            "name": "Arnold",
            "children": [
                {"name": "Sylvester", "pets": [{"name": "Fluffy"}]},
                {"name": "Sage"}
            ],
            "movies": [{"name": "Terminator", "role": "T-800"}]
        });

        let graph = normalize(&literal, "person", None, None, &registry).unwrap();

        // root + 2 children + 1 pet + 1 movie + 1 join row
        assert_eq!(graph.len(), 6);
        assert_eq!(graph.roots.len(), 1);
        assert!(!graph.root_many);
        assert_eq!(graph.pending_edges.len(), 5);

        let root = graph.node(graph.roots[0]);
        assert_eq!(root.placements.len(), 3);
        assert_eq!(root.lit("name"), Some(&Value::Text("Arnold".into())));
    }

    #[test]
    fn extra_columns_move_to_the_join_row() {
        let registry = registry();
        let literal = json!({
            "name": "Arnold",
            "movies": [{"name": "Terminator", "role": "T-800"}]
        });

        let graph = normalize(&literal, "person", None, None, &registry).unwrap();

        let join = graph
            .nodes
            .iter()
            .find(|n| n.table == "person_movie")
            .unwrap();
        assert_eq!(join.lit("role"), Some(&Value::Text("T-800".into())));

        let movie = graph.nodes.iter().find(|n| n.table == "movie").unwrap();
        assert!(movie.prop("role").is_none());
        assert_eq!(movie.lit("name"), Some(&Value::Text("Terminator".into())));
    }

    #[test]
    fn repeated_declarations_fold_into_one_node() {
        let registry = registry();
        let literal = json!([
            {"#id": "ma", "name": "Anna"},
            {"name": "Ben", "parent": {"#id": "ma", "name": "Anna"}}
        ]);

        let graph = normalize(&literal, "person", None, None, &registry).unwrap();

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.roots.len(), 2);
        assert!(graph.root_many);
    }

    #[test]
    fn conflicting_declarations_are_rejected() {
        let registry = registry();
        let literal = json!([
            {"#id": "ma", "name": "Anna"},
            {"name": "Ben", "parent": {"#id": "ma", "name": "Mary"}}
        ]);

        let err = normalize(&literal, "person", None, None, &registry).unwrap_err();
        assert!(err.is_resolution());
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn identical_declarations_for_different_tables_are_rejected() {
        let registry = registry();
        // Same '#id', same properties, but one sits under pets (animal) and
        // the other under movies (movie). Folding them would drop a row.
        let literal = json!({
            "name": "Arnold",
            "pets": [{"#id": "twin", "name": "Twin"}],
            "movies": [{"#id": "twin", "name": "Twin"}]
        });

        let err = normalize(&literal, "person", None, None, &registry).unwrap_err();
        assert!(err.is_resolution());
        assert!(err.to_string().contains("more than once"));
        assert!(err.to_string().contains("animal"));
        assert!(err.to_string().contains("movie"));
    }

    #[test]
    fn ref_node_extras_need_many_to_many() {
        let registry = registry();
        let literal = json!({
            "name": "Arnold",
            "children": [{"#ref": "x", "role": "oops"}]
        });

        let err = normalize(&literal, "person", None, None, &registry).unwrap_err();
        assert!(err.is_resolution());
        assert!(err.to_string().contains("many-to-many"));
    }

    #[test]
    fn allow_expression_blocks_other_relations() {
        let registry = registry();
        let allow = RelationExpression::parse("children").unwrap();
        let literal = json!({
            "name": "Arnold",
            "pets": [{"name": "Fluffy"}]
        });

        let err = normalize(&literal, "person", None, Some(&allow), &registry).unwrap_err();
        assert!(matches!(err, GraftError::UnallowedRelation(path) if path == "pets"));
    }

    #[test]
    fn empty_relation_arrays_are_remembered() {
        let registry = registry();
        let literal = json!({"name": "Arnold", "pets": []});

        let graph = normalize(&literal, "person", None, None, &registry).unwrap();

        let root = graph.node(graph.roots[0]);
        assert!(root.placements.is_empty());
        assert_eq!(root.empty_many, ["pets".to_string()]);
    }

    #[test]
    fn to_one_relation_rejects_multiple_nodes() {
        let registry = registry();
        let literal = json!({
            "name": "Ben",
            "parent": [{"name": "Anna"}, {"name": "Mary"}]
        });

        let err = normalize(&literal, "person", None, None, &registry).unwrap_err();
        assert!(err.to_string().contains("single node"));
    }

    #[test]
    fn db_ref_under_has_many_becomes_a_patch() {
        let registry = registry();
        let literal = json!({
            "name": "Arnold",
            "pets": [{"#dbRef": 42}]
        });

        let graph = normalize(&literal, "person", None, None, &registry).unwrap();

        assert_eq!(graph.patches.len(), 1);
        let patch = &graph.patches[0];
        assert_eq!(patch.table, "animal");
        assert_eq!(patch.column, "owner_id");
        assert_eq!(patch.key, Value::Int(42));
        assert!(graph
            .nodes
            .iter()
            .any(|n| matches!(n.kind, NodeKind::Existing(_))));
    }

    #[test]
    fn ref_roots_are_rejected() {
        let registry = registry();
        let literal = json!([{"#ref": "a"}]);

        let err = normalize(&literal, "person", None, None, &registry).unwrap_err();
        assert!(err.is_resolution());
    }

    #[test]
    fn related_belongs_to_patches_the_existing_row() {
        let registry = registry();
        let ctx = RelatedContext {
            key: Value::Int(7),
            relation: "parent".to_string(),
        };
        let literal = json!({"name": "Anna"});

        let graph = normalize(&literal, "person", Some(&ctx), None, &registry).unwrap();

        assert!(graph.context.is_some());
        assert_eq!(graph.roots.len(), 1);
        assert_eq!(graph.patches.len(), 1);
        let patch = &graph.patches[0];
        assert_eq!(patch.table, "person");
        assert_eq!(patch.column, "parent_id");
        assert_eq!(patch.key, Value::Int(7));
    }

    #[test]
    fn related_has_many_fills_from_the_context() {
        let registry = registry();
        let ctx = RelatedContext {
            key: Value::Int(3),
            relation: "pets".to_string(),
        };
        let literal = json!([{"name": "Rex"}, {"name": "Odie"}]);

        let graph = normalize(&literal, "person", Some(&ctx), None, &registry).unwrap();

        assert_eq!(graph.roots.len(), 2);
        assert_eq!(graph.pending_edges.len(), 2);
        for edge in &graph.pending_edges {
            let fill = edge.fill.as_ref().unwrap();
            assert_eq!(fill.column, "owner_id");
        }
    }

    #[test]
    fn unknown_relation_in_context_is_reported() {
        let registry = registry();
        let ctx = RelatedContext {
            key: Value::Int(3),
            relation: "enemies".to_string(),
        };

        let err =
            normalize(&json!({"name": "x"}), "person", Some(&ctx), None, &registry).unwrap_err();
        assert!(matches!(
            err,
            GraftError::UnknownRelation { table, relation }
                if table == "person" && relation == "enemies"
        ));
    }
}
