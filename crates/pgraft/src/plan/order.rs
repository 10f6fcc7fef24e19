//! Ordering the graph into insertable batches.

use crate::error::{GraftError, GraftResult};
use crate::plan::graph::{NodeId, NodeKind, RelationGraph};

/// Batches of nodes safe to insert together. Every node lands in a later
/// batch than all nodes it takes values from.
#[derive(Debug, Clone, Default)]
pub struct InsertPlan {
    pub batches: Vec<Vec<NodeId>>,
}

impl InsertPlan {
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Total number of rows the plan inserts.
    pub fn row_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }
}

/// Level-synchronized topological sort over the reference edges.
///
/// Ties inside a batch keep literal order. Pre-existing rows satisfy
/// dependencies immediately and are never emitted. A non-empty remainder
/// after the sort means the references form a cycle.
pub fn plan_batches(graph: &RelationGraph) -> GraftResult<InsertPlan> {
    let n = graph.len();
    let mut indegree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for edge in &graph.edges {
        indegree[edge.from.index()] += 1;
        dependents[edge.depends_on.index()].push(edge.from.index());
    }

    let mut frontier: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut processed = 0usize;
    let mut batches: Vec<Vec<NodeId>> = Vec::new();

    while !frontier.is_empty() {
        frontier.sort_by_key(|&i| graph.nodes[i].order);
        let mut batch = Vec::new();
        let mut next = Vec::new();
        for &i in &frontier {
            processed += 1;
            if !matches!(graph.nodes[i].kind, NodeKind::Existing(_)) {
                batch.push(NodeId(i));
            }
            for &dependent in &dependents[i] {
                indegree[dependent] -= 1;
                if indegree[dependent] == 0 {
                    next.push(dependent);
                }
            }
        }
        if !batch.is_empty() {
            batches.push(batch);
        }
        frontier = next;
    }

    if processed < n {
        let mut stuck: Vec<&str> = graph
            .nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| indegree[*i] > 0)
            .map(|(_, node)| node.label())
            .collect();
        stuck.dedup();
        return Err(GraftError::resolution(format!(
            "the references form a cycle involving: {}",
            stuck.join(", ")
        )));
    }

    Ok(InsertPlan { batches })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::RelationPath;
    use crate::plan::graph::{EntityNode, ReferenceEdge};
    use crate::plan::normalize::normalize;
    use crate::plan::resolve::resolve;
    use crate::schema::{ColumnSchema, ColumnType, RelationSchema, SchemaRegistry, TableSchema};
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry.register(
            TableSchema::new("person")
                .column(ColumnSchema::new("name", ColumnType::Text).required())
                .column(ColumnSchema::new("parent_id", ColumnType::Int))
                .relation(RelationSchema::belongs_to("parent", "person", "parent_id"))
                .relation(RelationSchema::has_many("pets", "animal", "owner_id")),
        );
        registry.register(
            TableSchema::new("animal")
                .column(ColumnSchema::new("name", ColumnType::Text).required())
                .column(ColumnSchema::new("owner_id", ColumnType::Int)),
        );
        registry
    }

    fn planned(literal: serde_json::Value) -> (RelationGraph, InsertPlan) {
        let registry = registry();
        let mut graph = normalize(&literal, "person", None, None, &registry).unwrap();
        resolve(&mut graph).unwrap();
        let plan = plan_batches(&graph).unwrap();
        (graph, plan)
    }

    fn batch_of(plan: &InsertPlan, id: NodeId) -> usize {
        plan.batches
            .iter()
            .position(|b| b.contains(&id))
            .expect("node missing from plan")
    }

    #[test]
    fn dependencies_insert_before_dependents() {
        let (graph, plan) = planned(json!({
            "name": "Ben",
            "parent": {"name": "Anna"},
            "pets": [{"name": "Rex"}]
        }));

        assert_eq!(plan.row_count(), 3);
        for edge in &graph.edges {
            assert!(
                batch_of(&plan, edge.depends_on) < batch_of(&plan, edge.from),
                "edge out of order"
            );
        }
    }

    #[test]
    fn ties_keep_literal_order() {
        let (graph, plan) = planned(json!([
            {"name": "first"},
            {"name": "second"},
            {"name": "third"}
        ]));

        let names: Vec<_> = plan.batches[0]
            .iter()
            .map(|id| graph.node(*id).lit("name").unwrap().to_string())
            .collect();
        assert_eq!(names, ["first", "second", "third"]);
    }

    #[test]
    fn existing_rows_are_never_emitted() {
        let (graph, plan) = planned(json!({
            "name": "Ben",
            "pets": [{"#dbRef": 9}]
        }));

        for batch in &plan.batches {
            for id in batch {
                assert!(!matches!(graph.node(*id).kind, NodeKind::Existing(_)));
            }
        }
        assert_eq!(plan.row_count(), 1);
    }

    #[test]
    fn cycles_are_reported() {
        let mut graph = RelationGraph::new();
        let a = graph.push(EntityNode::new(
            "person",
            NodeKind::Insert,
            RelationPath::root(),
            0,
        ));
        let b = graph.push(EntityNode::new(
            "person",
            NodeKind::Insert,
            RelationPath::root(),
            1,
        ));
        graph.add_edge(ReferenceEdge {
            from: a,
            depends_on: b,
            fill: None,
        });
        graph.add_edge(ReferenceEdge {
            from: b,
            depends_on: a,
            fill: None,
        });

        let err = plan_batches(&graph).unwrap_err();
        assert!(err.is_resolution());
        assert!(err.to_string().contains("cycle"));
    }
}
