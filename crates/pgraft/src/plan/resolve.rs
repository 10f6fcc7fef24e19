//! Binding symbolic references to concrete graph nodes.

use std::collections::HashMap;

use crate::error::{GraftError, GraftResult};
use crate::plan::graph::{Fill, NodeId, PlaceTarget, PropValue, ReferenceEdge, RelationGraph};

/// Bind every `#ref` symbol to its declaring node and turn pending edges
/// into concrete reference edges.
///
/// Afterwards every placement target is a [`PlaceTarget::Node`] and
/// `pending_edges` is empty. Dangling symbols, self-references and
/// contradictory fills are reported here.
pub fn resolve(graph: &mut RelationGraph) -> GraftResult<()> {
    let symbols: HashMap<String, NodeId> = graph
        .nodes
        .iter()
        .enumerate()
        .filter_map(|(i, n)| n.sid.clone().map(|sid| (sid, NodeId(i))))
        .collect();

    for node in &mut graph.nodes {
        for placement in &mut node.placements {
            if let PlaceTarget::Ref(symbol) = &placement.target {
                placement.target = PlaceTarget::Node(lookup(&symbols, symbol)?);
            }
        }
    }

    let mut edges = std::mem::take(&mut graph.edges);
    for edge in std::mem::take(&mut graph.pending_edges) {
        edges.push(ReferenceEdge {
            from: resolve_target(&symbols, &edge.from)?,
            depends_on: resolve_target(&symbols, &edge.depends_on)?,
            fill: edge.fill,
        });
    }

    // Property references become edges with fills; templates get one edge
    // per distinct token.
    for (i, node) in graph.nodes.iter().enumerate() {
        let from = NodeId(i);
        for (column, prop) in &node.props {
            match prop {
                PropValue::Ref(r) => {
                    edges.push(ReferenceEdge {
                        from,
                        depends_on: lookup(&symbols, &r.target)?,
                        fill: Some(Fill {
                            column: column.clone(),
                            source_column: r.column.clone(),
                            token: None,
                        }),
                    });
                }
                PropValue::Template(t) => {
                    for r in &t.refs {
                        edges.push(ReferenceEdge {
                            from,
                            depends_on: lookup(&symbols, &r.target)?,
                            fill: Some(Fill {
                                column: column.clone(),
                                source_column: r.column.clone(),
                                token: Some(r.token()),
                            }),
                        });
                    }
                }
                PropValue::Lit(_) => {}
            }
        }
    }

    // The same target slot fed from two places is fine only when both fills
    // agree completely; those collapse into one edge.
    let mut seen: HashMap<(NodeId, String, Option<String>), (NodeId, String)> = HashMap::new();
    let mut kept: Vec<ReferenceEdge> = Vec::with_capacity(edges.len());
    for edge in edges {
        if edge.from == edge.depends_on {
            return Err(GraftError::resolution(format!(
                "node '{}' references itself",
                graph.node(edge.from).label()
            )));
        }
        let Some(fill) = &edge.fill else {
            kept.push(edge);
            continue;
        };
        let slot = (edge.from, fill.column.clone(), fill.token.clone());
        let source = (edge.depends_on, fill.source_column.clone());
        match seen.get(&slot) {
            Some(existing) if *existing == source => {}
            Some(_) => {
                return Err(GraftError::resolution(format!(
                    "column '{}' of node '{}' would be written from two different references",
                    fill.column,
                    graph.node(edge.from).label()
                )));
            }
            None => {
                if fill.token.is_none() {
                    match graph.node(edge.from).prop(&fill.column) {
                        Some(PropValue::Lit(_)) | Some(PropValue::Template(_)) => {
                            return Err(GraftError::resolution(format!(
                                "column '{}' of node '{}' is already set and cannot be \
                                 filled through a relation",
                                fill.column,
                                graph.node(edge.from).label()
                            )));
                        }
                        _ => {}
                    }
                }
                seen.insert(slot, source);
                kept.push(edge);
            }
        }
    }

    graph.edges = kept;
    Ok(())
}

fn lookup(symbols: &HashMap<String, NodeId>, symbol: &str) -> GraftResult<NodeId> {
    symbols
        .get(symbol)
        .copied()
        .ok_or_else(|| GraftError::resolution(format!("there is no node with '#id' '{symbol}'")))
}

fn resolve_target(symbols: &HashMap<String, NodeId>, target: &PlaceTarget) -> GraftResult<NodeId> {
    match target {
        PlaceTarget::Node(id) => Ok(*id),
        PlaceTarget::Ref(symbol) => lookup(symbols, symbol),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::normalize::normalize;
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
                .column(ColumnSchema::new("bio", ColumnType::Text))
                .column(ColumnSchema::new("owner_id", ColumnType::Int)),
        );
        registry
    }

    fn resolved(literal: serde_json::Value) -> GraftResult<RelationGraph> {
        let registry = registry();
        let mut graph = normalize(&literal, "person", None, None, &registry)?;
        resolve(&mut graph)?;
        Ok(graph)
    }

    #[test]
    fn symbols_bind_and_templates_fan_out() {
        let graph = resolved(json!([
            {"#id": "gina", "name": "Gina"},
            {
                "name": "Ben",
                "parent": {"#ref": "gina"},
                "pets": [{"name": "Rex", "bio": "lives with #ref{gina.name}"}]
            }
        ]))
        .unwrap();

        assert!(graph.pending_edges.is_empty());
        // parent fk fill + pet fk fill + one template fill
        assert_eq!(graph.edges.len(), 3);
        assert!(graph
            .edges
            .iter()
            .any(|e| e.fill.as_ref().is_some_and(|f| f.token.is_some())));
    }

    #[test]
    fn consistent_duplicate_fills_collapse() {
        let graph = resolved(json!({
            "#id": "a",
            "name": "Anna",
            "pets": [{"name": "Rex", "owner_id": "#ref{a.id}"}]
        }))
        .unwrap();

        // The nesting and the explicit reference agree, so one edge remains.
        assert_eq!(graph.edges.len(), 1);
    }

    #[test]
    fn contradictory_fills_are_rejected() {
        let err = resolved(json!([
            {"#id": "a", "name": "Anna"},
            {
                "name": "Ben",
                "pets": [{"name": "Rex", "owner_id": "#ref{a.id}"}]
            }
        ]))
        .unwrap_err();

        assert!(err.is_resolution());
        assert!(err.to_string().contains("two different references"));
    }

    #[test]
    fn dangling_reference_is_reported() {
        let err = resolved(json!({
            "name": "Ben",
            "parent": {"#ref": "nobody"}
        }))
        .unwrap_err();

        assert!(err.is_resolution());
        assert!(err.to_string().contains("nobody"));
    }

    #[test]
    fn self_reference_is_reported() {
        let err = resolved(json!({
            "#id": "me",
            "name": "Ben",
            "parent_id": "#ref{me.id}"
        }))
        .unwrap_err();

        assert!(err.is_resolution());
        assert!(err.to_string().contains("references itself"));
    }

    #[test]
    fn explicit_value_cannot_fight_a_relation_fill() {
        let err = resolved(json!({
            "name": "Anna",
            "pets": [{"name": "Rex", "owner_id": 5}]
        }))
        .unwrap_err();

        assert!(err.is_resolution());
        assert!(err.to_string().contains("already set"));
    }
}
