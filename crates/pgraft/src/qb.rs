//! Builders for graph inserts.
//!
//! [`insert`] starts a plain graph insert, [`insert_related`] one scoped to
//! an existing row's relation. Both return a [`GraphInsertQb`] that runs the
//! whole pipeline on [`execute`](GraphInsertQb::execute).
//!
//! ```ignore
//! let inserted = pgraft::insert("person")
//!     .graph(json!({
//!         "name": "Jennifer",
//!         "pets": [{"name": "Doggo", "species": "dog"}],
//!     }))
//!     .allow("[pets, movies.sequel]")?
//!     .execute(&mut client, &registry)
//!     .await?;
//! ```

use serde_json::Value as JsonValue;

use crate::error::{GraftError, GraftResult};
use crate::exec::{self, InsertedGraph};
use crate::path::RelationExpression;
use crate::plan::{normalize, plan_batches, resolve, RelatedContext};
use crate::schema::SchemaRegistry;
use crate::store::GraphStore;
use crate::validate::validate_graph;
use crate::value::Value;

/// Start an insert of a relation graph rooted at `table`.
pub fn insert(table: impl Into<String>) -> GraphInsertQb {
    GraphInsertQb {
        table: table.into(),
        graph: None,
        allow: None,
        related: None,
    }
}

/// Start an insert through the `relation` of the existing `table` row with
/// primary key `key`. The literal's roots become rows of the relation's
/// target table, already linked to the parent.
pub fn insert_related(
    table: impl Into<String>,
    key: impl Into<Value>,
    relation: impl Into<String>,
) -> GraphInsertQb {
    GraphInsertQb {
        table: table.into(),
        graph: None,
        allow: None,
        related: Some((key.into(), relation.into())),
    }
}

/// A pending graph insert. Nothing touches the store until
/// [`execute`](Self::execute).
#[must_use = "a graph insert does nothing until `execute` is called"]
#[derive(Debug, Clone)]
pub struct GraphInsertQb {
    table: String,
    graph: Option<JsonValue>,
    allow: Option<RelationExpression>,
    related: Option<(Value, String)>,
}

impl GraphInsertQb {
    /// The graph literal to insert.
    #[must_use]
    pub fn graph(mut self, literal: JsonValue) -> Self {
        self.graph = Some(literal);
        self
    }

    /// Restrict which relation paths the literal may populate, as an
    /// expression like `[pets, movies.sequel]`. Parsed eagerly so a bad
    /// expression fails before anything else runs.
    pub fn allow(mut self, expression: &str) -> GraftResult<Self> {
        self.allow = Some(RelationExpression::parse(expression)?);
        Ok(self)
    }

    /// Like [`allow`](Self::allow) with an already-parsed expression.
    #[must_use]
    pub fn allow_expression(mut self, expression: RelationExpression) -> Self {
        self.allow = Some(expression);
        self
    }

    /// Plan and run the insert inside one transaction on `store`.
    #[tracing::instrument(skip_all, fields(table = %self.table))]
    pub async fn execute<S: GraphStore>(
        self,
        store: &mut S,
        registry: &SchemaRegistry,
    ) -> GraftResult<InsertedGraph> {
        let literal = self
            .graph
            .ok_or_else(|| GraftError::input("no graph literal given, call `.graph(...)` first"))?;
        let context = self
            .related
            .map(|(key, relation)| RelatedContext { key, relation });
        let mut graph = normalize(
            &literal,
            &self.table,
            context.as_ref(),
            self.allow.as_ref(),
            registry,
        )?;
        resolve(&mut graph)?;
        validate_graph(&graph, registry)?;
        let plan = plan_batches(&graph)?;
        exec::run(graph, &plan, registry, store).await
    }
}
