//! Schema validation of the flattened graph, before anything is written.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, OnceLock};

use crate::error::{GraftError, GraftResult};
use crate::plan::graph::{EntityNode, NodeId, PlaceTarget, PropValue, RelationGraph};
use crate::schema::{ColumnRule, ColumnType, SchemaRegistry, TableSchema};
use crate::value::Value;
use crate::violation::{Violation, ViolationCode, Violations};

/// Validate every to-be-inserted node against its table schema.
///
/// Runs after normalization and before any row is written, so a single bad
/// node stops the whole operation up front. Pre-existing rows and generated
/// join rows are not validated. Properties that take their value from
/// another row are checked once that value exists, which is never here; they
/// do satisfy `required`.
///
/// The first node with problems fails the call, carrying all of that node's
/// violations.
pub fn validate_graph(graph: &RelationGraph, registry: &SchemaRegistry) -> GraftResult<()> {
    for id in graph.ids() {
        let node = graph.node(id);
        if !node.is_insert() {
            continue;
        }
        let schema = registry.schema_for(&node.table)?;
        let filled = fill_targets(graph, id);
        let violations = validate_node(node, schema, &filled);
        if !violations.is_empty() {
            return Err(GraftError::validation(&node.table, violations));
        }
    }
    Ok(())
}

/// Columns of `id` that execution will copy in from another row. A foreign
/// key implied by relation nesting behaves like a reference property: it
/// satisfies `required` even though the literal never spells it out.
fn fill_targets(graph: &RelationGraph, id: NodeId) -> HashSet<&str> {
    let direct = graph
        .edges
        .iter()
        .filter(|e| e.from == id)
        .filter_map(|e| e.fill.as_ref());
    let pending = graph
        .pending_edges
        .iter()
        .filter(|e| matches!(e.from, PlaceTarget::Node(from) if from == id))
        .filter_map(|e| e.fill.as_ref());
    direct
        .chain(pending)
        .filter(|f| f.token.is_none())
        .map(|f| f.column.as_str())
        .collect()
}

fn validate_node(node: &EntityNode, schema: &TableSchema, filled: &HashSet<&str>) -> Violations {
    let mut violations = Violations::default();
    let mut present: HashSet<&str> = HashSet::new();

    for (name, prop) in &node.props {
        present.insert(name.as_str());
        let Some(column) = schema.column_schema(name) else {
            if name != &schema.key_column {
                violations.push(Violation::new(
                    name,
                    ViolationCode::Unknown,
                    "is not a declared column",
                ));
            }
            continue;
        };
        match prop {
            // The value arrives from another row later; nothing to check yet.
            PropValue::Ref(_) | PropValue::Template(_) => {}
            PropValue::Lit(value) => {
                if value.is_null() {
                    if column.required {
                        violations.push(Violation::new(
                            name,
                            ViolationCode::Required,
                            "is a required property",
                        ));
                    }
                    continue;
                }
                if !type_ok(value, column.ty) {
                    violations.push(Violation::new(
                        name,
                        ViolationCode::Type,
                        format!("should be of type {}", column.ty.name()),
                    ));
                    continue;
                }
                check_rules(name, value, &column.rules, &mut violations);
            }
        }
    }

    for column in &schema.columns {
        if column.required
            && !present.contains(column.name.as_str())
            && !filled.contains(column.name.as_str())
        {
            violations.push(Violation::new(
                &column.name,
                ViolationCode::Required,
                "is a required property",
            ));
        }
    }

    violations
}

/// Text values that parse into the column's type are accepted; the storage
/// layer performs the same conversion on write.
fn type_ok(value: &Value, ty: ColumnType) -> bool {
    match ty {
        ColumnType::Json => true,
        ColumnType::Bool => matches!(value, Value::Bool(_)),
        ColumnType::Int => matches!(value, Value::Int(_)),
        ColumnType::Float => matches!(value, Value::Int(_) | Value::Float(_)),
        ColumnType::Text => matches!(value, Value::Text(_)),
        ColumnType::Uuid => match value {
            Value::Uuid(_) => true,
            Value::Text(text) => uuid::Uuid::parse_str(text).is_ok(),
            _ => false,
        },
        ColumnType::Timestamp => match value {
            Value::Timestamp(_) => true,
            Value::Text(text) => chrono::DateTime::parse_from_rfc3339(text).is_ok(),
            _ => false,
        },
        ColumnType::Date => match value {
            Value::Date(_) => true,
            Value::Text(text) => chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok(),
            _ => false,
        },
    }
}

fn check_rules(name: &str, value: &Value, rules: &[ColumnRule], violations: &mut Violations) {
    for rule in rules {
        match rule {
            ColumnRule::Len { min, max } => {
                let Value::Text(text) = value else { continue };
                let len = text.chars().count();
                if let Some(min) = min {
                    if len < *min {
                        violations.push(Violation::new(
                            name,
                            ViolationCode::Len,
                            format!("must be at least {min} characters long"),
                        ));
                    }
                }
                if let Some(max) = max {
                    if len > *max {
                        violations.push(Violation::new(
                            name,
                            ViolationCode::Len,
                            format!("must be at most {max} characters long"),
                        ));
                    }
                }
            }
            ColumnRule::Range { min, max } => {
                let number = match value {
                    Value::Int(i) => *i as f64,
                    Value::Float(f) => *f,
                    _ => continue,
                };
                if let Some(min) = min {
                    if number < *min {
                        violations.push(Violation::new(
                            name,
                            ViolationCode::Range,
                            format!("must be at least {min}"),
                        ));
                    }
                }
                if let Some(max) = max {
                    if number > *max {
                        violations.push(Violation::new(
                            name,
                            ViolationCode::Range,
                            format!("must be at most {max}"),
                        ));
                    }
                }
            }
            ColumnRule::Email => {
                let Value::Text(text) = value else { continue };
                if !is_email(text) {
                    violations.push(Violation::new(
                        name,
                        ViolationCode::Email,
                        "must be a valid email address",
                    ));
                }
            }
            ColumnRule::Url => {
                let Value::Text(text) = value else { continue };
                if url::Url::parse(text).is_err() {
                    violations.push(Violation::new(
                        name,
                        ViolationCode::Url,
                        "must be a valid URL",
                    ));
                }
            }
            ColumnRule::Pattern(pattern) => {
                let Value::Text(text) = value else { continue };
                if !regex_matches(pattern, text) {
                    violations.push(Violation::new(
                        name,
                        ViolationCode::Regex,
                        "does not match the required pattern",
                    ));
                }
            }
            ColumnRule::OneOf(allowed) => {
                if !allowed.contains(value) {
                    let list = allowed
                        .iter()
                        .map(Value::to_string)
                        .collect::<Vec<_>>()
                        .join(", ");
                    violations.push(Violation::new(
                        name,
                        ViolationCode::OneOf,
                        format!("must be one of: {list}"),
                    ));
                }
            }
        }
    }
}

fn is_email(text: &str) -> bool {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        regex::Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("invalid built-in email regex")
    });
    re.is_match(text)
}

/// Match `text` against a schema-supplied pattern, caching compiled
/// regexes. Patterns that fail to compile never match.
fn regex_matches(pattern: &str, text: &str) -> bool {
    static CACHE: OnceLock<Mutex<HashMap<String, regex::Regex>>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut cache = cache.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(re) = cache.get(pattern) {
        return re.is_match(text);
    }
    match regex::Regex::new(pattern) {
        Ok(re) => {
            let hit = re.is_match(text);
            cache.insert(pattern.to_string(), re);
            hit
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::normalize::normalize;
    use crate::schema::{ColumnSchema, RelationSchema, SchemaRegistry, TableSchema};
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry.register(
            TableSchema::new("person")
                .column(
                    ColumnSchema::new("name", ColumnType::Text)
                        .required()
                        .rule(ColumnRule::Len {
                            min: Some(2),
                            max: Some(20),
                        }),
                )
                .column(ColumnSchema::new("age", ColumnType::Int).rule(ColumnRule::Range {
                    min: Some(0.0),
                    max: None,
                }))
                .column(ColumnSchema::new("email", ColumnType::Text).rule(ColumnRule::Email))
                .column(ColumnSchema::new("badge", ColumnType::Uuid))
                .column(ColumnSchema::new("parent_id", ColumnType::Int))
                .relation(RelationSchema::has_many("children", "person", "parent_id"))
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
            TableSchema::new("movie")
                .column(ColumnSchema::new("name", ColumnType::Text).required()),
        );
        registry
    }

    fn check(literal: serde_json::Value) -> GraftResult<()> {
        let registry = registry();
        let graph = normalize(&literal, "person", None, None, &registry)?;
        validate_graph(&graph, &registry)
    }

    #[test]
    fn missing_required_property_is_reported() {
        let err = check(json!({"age": 30})).unwrap_err();
        assert!(err.is_validation());
        let data = err.data().unwrap();
        assert!(data.get("name").is_some());
    }

    #[test]
    fn all_violations_of_a_node_are_collected() {
        let err = check(json!({"name": "x", "age": -4})).unwrap_err();
        let data = err.data().unwrap();
        assert!(data.get("name").is_some(), "len violation expected");
        assert!(data.get("age").is_some(), "range violation expected");
    }

    #[test]
    fn unknown_columns_are_reported() {
        let err = check(json!({"name": "Anna", "shoe_size": 38})).unwrap_err();
        let data = err.data().unwrap();
        assert!(data.get("shoe_size").is_some());
    }

    #[test]
    fn uuid_text_is_coerced_not_rejected() {
        assert!(check(json!({
            "name": "Anna",
            "badge": "67e55044-10b1-426f-9247-bb680e5fe0c8"
        }))
        .is_ok());

        let err = check(json!({"name": "Anna", "badge": "not-a-uuid"})).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn reference_properties_satisfy_required() {
        let literal = json!([
            {"#id": "a", "name": "Anna"},
            {"name": "#ref{a.name}", "age": 1}
        ]);
        assert!(check(literal).is_ok());
    }

    #[test]
    fn relation_filled_columns_satisfy_required() {
        let mut registry = SchemaRegistry::new();
        registry.register(
            TableSchema::new("order")
                .column(ColumnSchema::new("note", ColumnType::Text))
                .relation(RelationSchema::has_many("items", "order_item", "order_id")),
        );
        registry.register(
            TableSchema::new("order_item")
                .column(ColumnSchema::new("sku", ColumnType::Text).required())
                .column(ColumnSchema::new("order_id", ColumnType::Int).required()),
        );
        let graph = normalize(
            &json!({"note": "two items", "items": [{"sku": "A-1"}]}),
            "order",
            None,
            None,
            &registry,
        )
        .unwrap();
        assert!(validate_graph(&graph, &registry).is_ok());
    }

    #[test]
    fn nested_nodes_are_validated_too() {
        let err = check(json!({
            "name": "Anna",
            "children": [{"age": 3}]
        }))
        .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn join_rows_are_not_validated() {
        // person_movie has no registered schema; the generated join row must
        // not be validated against one.
        assert!(check(json!({
            "name": "Anna",
            "movies": [{"name": "Heat", "role": "extra"}]
        }))
        .is_ok());
    }

    #[test]
    fn email_rule_applies() {
        assert!(check(json!({"name": "Anna", "email": "anna@example.com"})).is_ok());
        let err = check(json!({"name": "Anna", "email": "nope"})).unwrap_err();
        assert!(err.is_validation());
    }
}
