//! Table metadata: columns, relations, lifecycle hooks, and the registry.
//!
//! The registry is built explicitly by the caller and handed to
//! [`execute`](crate::qb::GraphInsertQb::execute) alongside the store:
//!
//! ```ignore
//! use pgraft::{ColumnSchema, ColumnType, RelationSchema, SchemaRegistry, TableSchema};
//!
//! let mut registry = SchemaRegistry::new();
//! registry.register(
//!     TableSchema::new("person")
//!         .column(ColumnSchema::new("name", ColumnType::Text).required())
//!         .column(ColumnSchema::new("age", ColumnType::Int))
//!         .column(ColumnSchema::new("parent_id", ColumnType::Int))
//!         .relation(RelationSchema::belongs_to("parent", "person", "parent_id"))
//!         .relation(RelationSchema::has_many("children", "person", "parent_id")),
//! );
//! ```

use crate::value::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::{GraftError, GraftResult};

/// Column type vocabulary understood by the validator and the backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Bool,
    Int,
    Float,
    Text,
    Uuid,
    Timestamp,
    Date,
    Json,
}

impl ColumnType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Text => "text",
            Self::Uuid => "uuid",
            Self::Timestamp => "timestamp",
            Self::Date => "date",
            Self::Json => "json",
        }
    }
}

/// A declarative validation rule for one column.
#[derive(Debug, Clone)]
pub enum ColumnRule {
    /// Text length bounds (in characters).
    Len { min: Option<usize>, max: Option<usize> },
    /// Numeric bounds.
    Range { min: Option<f64>, max: Option<f64> },
    /// Best-effort email shape.
    Email,
    /// Parseable URL.
    Url,
    /// Regex the whole value must match.
    Pattern(String),
    /// Value must be one of the listed values.
    OneOf(Vec<Value>),
}

/// Schema for one column.
#[derive(Debug, Clone)]
pub struct ColumnSchema {
    pub name: String,
    pub ty: ColumnType,
    pub required: bool,
    /// Accepted in input and visible to hooks, but never persisted and
    /// stripped from the returned graph.
    pub transient: bool,
    pub rules: Vec<ColumnRule>,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: false,
            transient: false,
            rules: Vec::new(),
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    #[must_use]
    pub fn rule(mut self, rule: ColumnRule) -> Self {
        self.rules.push(rule);
        self
    }
}

/// The four relation kinds the planner understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    BelongsToOne,
    HasOne,
    HasMany,
    ManyToMany,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BelongsToOne => "belongs_to_one",
            Self::HasOne => "has_one",
            Self::HasMany => "has_many",
            Self::ManyToMany => "many_to_many",
        }
    }
}

/// Kind-specific linkage data for a relation.
#[derive(Debug, Clone)]
pub enum RelationLink {
    /// Foreign key on the owning table, pointing at the target's key.
    BelongsToOne { fk_column: String },
    /// Foreign key on the target table, pointing back at the owner.
    HasOne { fk_column: String },
    /// Foreign key on the target table, pointing back at the owner.
    HasMany { fk_column: String },
    /// Join table with a column for each side, plus optional extra columns
    /// settable from reference-node properties.
    ManyToMany {
        join_table: String,
        owner_column: String,
        target_column: String,
        extra_columns: Vec<String>,
    },
}

/// Schema for one named relation.
#[derive(Debug, Clone)]
pub struct RelationSchema {
    pub name: String,
    /// Target table name.
    pub target: String,
    pub link: RelationLink,
}

impl RelationSchema {
    pub fn belongs_to(
        name: impl Into<String>,
        target: impl Into<String>,
        fk_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            link: RelationLink::BelongsToOne {
                fk_column: fk_column.into(),
            },
        }
    }

    pub fn has_one(
        name: impl Into<String>,
        target: impl Into<String>,
        fk_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            link: RelationLink::HasOne {
                fk_column: fk_column.into(),
            },
        }
    }

    pub fn has_many(
        name: impl Into<String>,
        target: impl Into<String>,
        fk_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            link: RelationLink::HasMany {
                fk_column: fk_column.into(),
            },
        }
    }

    pub fn many_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        join_table: impl Into<String>,
        owner_column: impl Into<String>,
        target_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            link: RelationLink::ManyToMany {
                join_table: join_table.into(),
                owner_column: owner_column.into(),
                target_column: target_column.into(),
                extra_columns: Vec::new(),
            },
        }
    }

    /// Declare an extra join-table column (many-to-many only; ignored for
    /// other kinds).
    #[must_use]
    pub fn extra(mut self, column: impl Into<String>) -> Self {
        if let RelationLink::ManyToMany { extra_columns, .. } = &mut self.link {
            extra_columns.push(column.into());
        }
        self
    }

    pub fn kind(&self) -> RelationKind {
        match self.link {
            RelationLink::BelongsToOne { .. } => RelationKind::BelongsToOne,
            RelationLink::HasOne { .. } => RelationKind::HasOne,
            RelationLink::HasMany { .. } => RelationKind::HasMany,
            RelationLink::ManyToMany { .. } => RelationKind::ManyToMany,
        }
    }

    /// True for kinds whose literal value is an array.
    pub fn is_many(&self) -> bool {
        matches!(
            self.link,
            RelationLink::HasMany { .. } | RelationLink::ManyToMany { .. }
        )
    }
}

/// A node's concrete properties as seen by lifecycle hooks.
pub type PropMap = BTreeMap<String, Value>;

/// Per-table lifecycle hooks, called around each physical insert.
///
/// Both hooks get mutable access to the row: `before_insert` runs after all
/// references are filled and may still see transient columns; `after_insert`
/// runs once the generated key is known. Mutations show up in the returned
/// graph. Returning an error aborts the whole operation and rolls the
/// transaction back.
///
/// Hooks run exactly once per physically inserted row. Deduplicated
/// references, `#dbRef` rows, and join rows never trigger them.
pub trait LifecycleHooks: Send + Sync {
    fn before_insert(&self, row: &mut PropMap) -> GraftResult<()> {
        let _ = row;
        Ok(())
    }

    fn after_insert(&self, row: &mut PropMap) -> GraftResult<()> {
        let _ = row;
        Ok(())
    }
}

/// Schema for one table.
#[derive(Clone)]
pub struct TableSchema {
    pub name: String,
    /// The generated primary key column. Defaults to `id`.
    pub key_column: String,
    pub columns: Vec<ColumnSchema>,
    pub relations: Vec<RelationSchema>,
    pub hooks: Option<Arc<dyn LifecycleHooks>>,
}

impl std::fmt::Debug for TableSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableSchema")
            .field("name", &self.name)
            .field("key_column", &self.key_column)
            .field("columns", &self.columns)
            .field("relations", &self.relations)
            .field("hooks", &self.hooks.is_some())
            .finish()
    }
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_column: "id".to_string(),
            columns: Vec::new(),
            relations: Vec::new(),
            hooks: None,
        }
    }

    /// Override the key column name.
    #[must_use]
    pub fn key(mut self, column: impl Into<String>) -> Self {
        self.key_column = column.into();
        self
    }

    #[must_use]
    pub fn column(mut self, column: ColumnSchema) -> Self {
        self.columns.push(column);
        self
    }

    #[must_use]
    pub fn relation(mut self, relation: RelationSchema) -> Self {
        self.relations.push(relation);
        self
    }

    #[must_use]
    pub fn hooks(mut self, hooks: Arc<dyn LifecycleHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn column_schema(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn relation_schema(&self, name: &str) -> Option<&RelationSchema> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// True for declared columns and the key column.
    pub fn has_column(&self, name: &str) -> bool {
        name == self.key_column || self.column_schema(name).is_some()
    }

    pub fn is_transient(&self, name: &str) -> bool {
        self.column_schema(name).is_some_and(|c| c.transient)
    }
}

/// All table schemas known to one insertion call.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    tables: HashMap<String, TableSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table schema, replacing any previous one with this name.
    pub fn register(&mut self, table: TableSchema) -> &mut Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    pub fn get(&self, table: &str) -> Option<&TableSchema> {
        self.tables.get(table)
    }

    /// Look up a table schema, failing with [`GraftError::UnknownTable`].
    pub fn schema_for(&self, table: &str) -> GraftResult<&TableSchema> {
        self.tables
            .get(table)
            .ok_or_else(|| GraftError::UnknownTable(table.to_string()))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_schema_knows_its_columns() {
        let table = TableSchema::new("person")
            .column(ColumnSchema::new("name", ColumnType::Text).required())
            .column(ColumnSchema::new("secret", ColumnType::Text).transient());

        assert!(table.has_column("id"));
        assert!(table.has_column("name"));
        assert!(!table.has_column("nope"));
        assert!(table.is_transient("secret"));
        assert!(!table.is_transient("name"));
    }

    #[test]
    fn relation_ctors_set_kinds() {
        let rel = RelationSchema::belongs_to("parent", "person", "parent_id");
        assert_eq!(rel.kind(), RelationKind::BelongsToOne);
        assert!(!rel.is_many());

        let rel = RelationSchema::many_to_many("movies", "movie", "person_movie", "person_id", "movie_id")
            .extra("role");
        assert_eq!(rel.kind(), RelationKind::ManyToMany);
        assert!(rel.is_many());
        match &rel.link {
            RelationLink::ManyToMany { extra_columns, .. } => {
                assert_eq!(extra_columns, &["role".to_string()]);
            }
            other => panic!("unexpected link: {other:?}"),
        }
    }

    #[test]
    fn registry_lookup_reports_unknown_table() {
        let mut registry = SchemaRegistry::new();
        registry.register(TableSchema::new("person"));
        assert!(registry.schema_for("person").is_ok());
        let err = registry.schema_for("animal").unwrap_err();
        assert!(matches!(err, GraftError::UnknownTable(t) if t == "animal"));
    }
}
