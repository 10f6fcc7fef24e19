//! Runs an [`InsertPlan`] against a [`GraphStore`], inside one transaction.
//!
//! Each batch goes through the same stages: reference values are copied in
//! from already-inserted rows, `before_insert` hooks run, rows are grouped
//! into multi-row inserts, generated keys are written back, `after_insert`
//! hooks run. Deferred key patches run after the last batch. Any error rolls
//! the whole transaction back.

use serde_json::Value as JsonValue;

use crate::error::{GraftError, GraftResult};
use crate::markers::RefTemplate;
use crate::plan::graph::{
    EntityNode, Fill, NodeId, NodeKind, NodeStatus, PlaceTarget, PropValue, RelationGraph,
};
use crate::plan::InsertPlan;
use crate::schema::{PropMap, RelationLink, SchemaRegistry};
use crate::store::{GraphStore, GraphTransaction};
use crate::value::Value;

/// The inserted graph in its original literal shape, plus what the run did.
#[derive(Debug, Clone)]
pub struct InsertedGraph {
    roots: Vec<JsonValue>,
    root_many: bool,
    affected: u64,
}

impl InsertedGraph {
    /// The root rows, regardless of whether the literal was an array.
    pub fn roots(&self) -> &[JsonValue] {
        &self.roots
    }

    /// Rows written, counting inserts, join rows and key patches.
    pub fn affected(&self) -> u64 {
        self.affected
    }

    /// The graph in the literal's shape: an array if the literal was an
    /// array, otherwise the single root object.
    pub fn into_json(self) -> JsonValue {
        if self.root_many {
            JsonValue::Array(self.roots)
        } else {
            self.roots.into_iter().next().unwrap_or(JsonValue::Null)
        }
    }
}

/// Execute `plan` over `graph` in a single transaction on `store`.
///
/// Commits only if every batch and patch succeeds. On any error the
/// transaction is rolled back and the error propagated unchanged; if the
/// rollback itself fails, both errors are reported together.
#[tracing::instrument(skip_all, fields(batches = plan.batches.len(), rows = plan.row_count()))]
pub async fn run<S: GraphStore>(
    mut graph: RelationGraph,
    plan: &InsertPlan,
    registry: &SchemaRegistry,
    store: &mut S,
) -> GraftResult<InsertedGraph> {
    let mut tx = store.begin().await?;
    match drive(&mut graph, plan, registry, &mut tx).await {
        Ok(affected) => {
            tx.commit().await?;
            tracing::debug!(affected, "graph committed");
            Ok(rehydrate(&graph, registry, affected))
        }
        Err(error) => {
            if let Err(rollback_error) = tx.rollback().await {
                return Err(GraftError::storage(format!(
                    "{error} (rollback failed: {rollback_error})"
                )));
            }
            Err(error)
        }
    }
}

async fn drive<T: GraphTransaction>(
    graph: &mut RelationGraph,
    plan: &InsertPlan,
    registry: &SchemaRegistry,
    tx: &mut T,
) -> GraftResult<u64> {
    let mut affected = 0u64;
    for (index, batch) in plan.batches.iter().enumerate() {
        tracing::debug!(batch = index, rows = batch.len(), "inserting batch");
        insert_batch(graph, batch, registry, tx).await?;
        affected += batch.len() as u64;
    }
    for patch in &graph.patches {
        let value = source_key(graph, registry, patch.source)?;
        tx.update_by_key(
            &patch.table,
            &patch.key_column,
            &patch.key,
            std::slice::from_ref(&patch.column),
            vec![value],
        )
        .await?;
        affected += 1;
    }
    Ok(affected)
}

async fn insert_batch<T: GraphTransaction>(
    graph: &mut RelationGraph,
    batch: &[NodeId],
    registry: &SchemaRegistry,
    tx: &mut T,
) -> GraftResult<()> {
    apply_fills(graph, batch, registry)?;
    run_hooks(graph, batch, registry, HookPhase::Before)?;

    // Rows sharing a table and column shape become one multi-row insert.
    struct Group {
        table: String,
        key_column: Option<String>,
        columns: Vec<String>,
        nodes: Vec<NodeId>,
        rows: Vec<Vec<Value>>,
    }
    let mut groups: Vec<Group> = Vec::new();
    for &id in batch {
        let node = graph.node(id);
        let key_column = match node.kind {
            NodeKind::JoinRow => None,
            _ => Some(registry.schema_for(&node.table)?.key_column.clone()),
        };
        let schema = registry.get(&node.table);
        let mut columns = Vec::new();
        let mut values = Vec::new();
        for (name, prop) in &node.props {
            if schema.is_some_and(|s| s.is_transient(name)) {
                continue;
            }
            let PropValue::Lit(value) = prop else {
                return Err(GraftError::storage(format!(
                    "internal: unresolved reference left in '{}.{name}'",
                    node.label()
                )));
            };
            columns.push(name.clone());
            values.push(value.clone());
        }
        match groups
            .iter_mut()
            .find(|g| g.table == node.table && g.key_column == key_column && g.columns == columns)
        {
            Some(group) => {
                group.nodes.push(id);
                group.rows.push(values);
            }
            None => groups.push(Group {
                table: node.table.clone(),
                key_column,
                columns,
                nodes: vec![id],
                rows: vec![values],
            }),
        }
    }

    for group in groups {
        let keys = tx
            .insert_returning(
                &group.table,
                group.key_column.as_deref(),
                &group.columns,
                group.rows,
            )
            .await?;
        match &group.key_column {
            Some(key_column) => {
                if keys.len() != group.nodes.len() {
                    return Err(GraftError::storage(format!(
                        "insert into '{}' returned {} keys for {} rows",
                        group.table,
                        keys.len(),
                        group.nodes.len()
                    )));
                }
                for (&id, key) in group.nodes.iter().zip(keys) {
                    let node = graph.node_mut(id);
                    node.set_lit(key_column, key);
                    node.status = NodeStatus::Inserted;
                }
            }
            None => {
                for &id in &group.nodes {
                    graph.node_mut(id).status = NodeStatus::Inserted;
                }
            }
        }
    }

    run_hooks(graph, batch, registry, HookPhase::After)
}

/// Copy referenced column values into this batch's rows. All reads happen
/// before any write so fills cannot observe each other.
fn apply_fills(
    graph: &mut RelationGraph,
    batch: &[NodeId],
    registry: &SchemaRegistry,
) -> GraftResult<()> {
    let mut writes: Vec<(NodeId, Fill, Value)> = Vec::new();
    for edge in &graph.edges {
        if !batch.contains(&edge.from) {
            continue;
        }
        let Some(fill) = &edge.fill else { continue };
        let value = read_source(graph, registry, edge.depends_on, &fill.source_column)?;
        writes.push((edge.from, fill.clone(), value));
    }
    for (id, fill, value) in writes {
        match &fill.token {
            None => graph.node_mut(id).set_lit(&fill.column, value),
            Some(token) => interpolate(graph, id, &fill.column, token, &value)?,
        }
    }
    Ok(())
}

fn read_source(
    graph: &RelationGraph,
    registry: &SchemaRegistry,
    id: NodeId,
    column: &str,
) -> GraftResult<Value> {
    let node = graph.node(id);
    match &node.kind {
        NodeKind::Existing(key) => {
            let key_column = &registry.schema_for(&node.table)?.key_column;
            if column == key_column {
                Ok(key.clone())
            } else {
                Err(GraftError::resolution(format!(
                    "only the key of a pre-existing row can be referenced, not '{}.{column}'",
                    node.label()
                )))
            }
        }
        _ => node.lit(column).cloned().ok_or_else(|| {
            GraftError::resolution(format!(
                "node '{}' has no value for referenced column '{column}'",
                node.label()
            ))
        }),
    }
}

/// Substitute one `#ref{...}` token inside a template property. The property
/// becomes a literal once its last token is substituted.
fn interpolate(
    graph: &mut RelationGraph,
    id: NodeId,
    column: &str,
    token: &str,
    value: &Value,
) -> GraftResult<()> {
    let label = graph.node(id).label().to_string();
    let slot = graph
        .node_mut(id)
        .props
        .iter_mut()
        .find_map(|(n, v)| (n.as_str() == column).then_some(v))
        .ok_or_else(|| {
            GraftError::storage(format!("internal: template column '{label}.{column}' is gone"))
        })?;
    let PropValue::Template(template) = slot else {
        return Err(GraftError::storage(format!(
            "internal: column '{label}.{column}' is not a template"
        )));
    };
    let text = template.text.replace(token, &value.to_string());
    let mut refs = std::mem::take(&mut template.refs);
    refs.retain(|r| r.token() != token);
    *slot = if refs.is_empty() {
        PropValue::Lit(Value::Text(text))
    } else {
        PropValue::Template(RefTemplate { text, refs })
    };
    Ok(())
}

#[derive(Clone, Copy)]
enum HookPhase {
    Before,
    After,
}

/// Run lifecycle hooks for every row of the batch that has them. Join rows
/// and pre-existing rows never see hooks.
fn run_hooks(
    graph: &mut RelationGraph,
    batch: &[NodeId],
    registry: &SchemaRegistry,
    phase: HookPhase,
) -> GraftResult<()> {
    for &id in batch {
        let node = graph.node(id);
        if !node.is_insert() {
            continue;
        }
        let Some(hooks) = registry.get(&node.table).and_then(|s| s.hooks.clone()) else {
            continue;
        };
        let mut row = lit_map(graph.node(id))?;
        match phase {
            HookPhase::Before => hooks.before_insert(&mut row)?,
            HookPhase::After => hooks.after_insert(&mut row)?,
        }
        write_back(graph.node_mut(id), row);
    }
    Ok(())
}

fn lit_map(node: &EntityNode) -> GraftResult<PropMap> {
    let mut map = PropMap::new();
    for (name, prop) in &node.props {
        let PropValue::Lit(value) = prop else {
            return Err(GraftError::storage(format!(
                "internal: unresolved reference left in '{}.{name}'",
                node.label()
            )));
        };
        map.insert(name.clone(), value.clone());
    }
    Ok(map)
}

/// Push hook mutations back into the node. Surviving properties keep their
/// literal order, removed ones are dropped, new ones are appended.
fn write_back(node: &mut EntityNode, mut row: PropMap) {
    let old = std::mem::take(&mut node.props);
    let mut rebuilt = Vec::with_capacity(row.len());
    for (name, _) in old {
        if let Some(value) = row.remove(&name) {
            rebuilt.push((name, PropValue::Lit(value)));
        }
    }
    for (name, value) in row {
        rebuilt.push((name, PropValue::Lit(value)));
    }
    node.props = rebuilt;
}

fn source_key(graph: &RelationGraph, registry: &SchemaRegistry, id: NodeId) -> GraftResult<Value> {
    let node = graph.node(id);
    match &node.kind {
        NodeKind::Existing(key) => Ok(key.clone()),
        _ => {
            let key_column = &registry.schema_for(&node.table)?.key_column;
            node.lit(key_column).cloned().ok_or_else(|| {
                GraftError::storage(format!(
                    "internal: key of '{}' not available for update",
                    node.label()
                ))
            })
        }
    }
}

/// Rebuild the literal's shape from the executed graph.
fn rehydrate(graph: &RelationGraph, registry: &SchemaRegistry, affected: u64) -> InsertedGraph {
    let mut stack = Vec::new();
    let roots = graph
        .roots
        .iter()
        .map(|&id| emit_node(graph, registry, id, &mut stack))
        .collect();
    InsertedGraph {
        roots,
        root_many: graph.root_many,
        affected,
    }
}

fn emit_node(
    graph: &RelationGraph,
    registry: &SchemaRegistry,
    id: NodeId,
    stack: &mut Vec<NodeId>,
) -> JsonValue {
    let node = graph.node(id);
    if let NodeKind::Existing(key) = &node.kind {
        // Pre-existing rows echo only their key.
        let key_column = registry
            .get(&node.table)
            .map_or("id", |s| s.key_column.as_str());
        let mut obj = serde_json::Map::new();
        obj.insert(key_column.to_string(), key.to_json());
        return JsonValue::Object(obj);
    }
    if stack.contains(&id) {
        // A reference loop among placements; emit the row without relations
        // the second time around.
        return JsonValue::Object(props_object(node, registry));
    }
    stack.push(id);
    let mut obj = props_object(node, registry);

    // Placements regroup under their relation name, in first-appearance
    // order, so arrays come back as arrays.
    let mut names: Vec<&str> = Vec::new();
    for placement in &node.placements {
        if !names.contains(&placement.relation.as_str()) {
            names.push(&placement.relation);
        }
    }
    for name in names {
        let group: Vec<_> = node
            .placements
            .iter()
            .filter(|p| p.relation == name)
            .collect();
        let many = group[0].many;
        let mut emitted = Vec::with_capacity(group.len());
        for placement in group {
            let PlaceTarget::Node(child_id) = placement.target else {
                continue;
            };
            let mut child = emit_node(graph, registry, child_id, stack);
            if let Some(join_id) = placement.join {
                merge_join_extras(graph, registry, &node.table, name, join_id, &mut child);
            }
            emitted.push(child);
        }
        let value = if many {
            JsonValue::Array(emitted)
        } else {
            emitted.into_iter().next().unwrap_or(JsonValue::Null)
        };
        obj.insert(name.to_string(), value);
    }
    for name in &node.empty_many {
        if !obj.contains_key(name) {
            obj.insert(name.clone(), JsonValue::Array(Vec::new()));
        }
    }
    stack.pop();
    JsonValue::Object(obj)
}

fn props_object(
    node: &EntityNode,
    registry: &SchemaRegistry,
) -> serde_json::Map<String, JsonValue> {
    let schema = registry.get(&node.table);
    let mut obj = serde_json::Map::new();
    for (name, prop) in &node.props {
        if schema.is_some_and(|s| s.is_transient(name)) {
            continue;
        }
        if let PropValue::Lit(value) = prop {
            obj.insert(name.clone(), value.to_json());
        }
    }
    obj
}

/// A many-to-many child carries its join row's extra columns, minus the two
/// foreign keys.
fn merge_join_extras(
    graph: &RelationGraph,
    registry: &SchemaRegistry,
    parent_table: &str,
    relation: &str,
    join_id: NodeId,
    child: &mut JsonValue,
) {
    let Some(child_obj) = child.as_object_mut() else {
        return;
    };
    let link = registry
        .get(parent_table)
        .and_then(|s| s.relation_schema(relation))
        .map(|r| &r.link);
    let (owner_column, target_column) = match link {
        Some(RelationLink::ManyToMany {
            owner_column,
            target_column,
            ..
        }) => (owner_column.as_str(), target_column.as_str()),
        _ => return,
    };
    for (name, prop) in &graph.node(join_id).props {
        if name == owner_column || name == target_column {
            continue;
        }
        if let PropValue::Lit(value) = prop {
            child_obj.insert(name.clone(), value.to_json());
        }
    }
}
