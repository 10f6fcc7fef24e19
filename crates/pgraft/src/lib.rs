//! # pgraft
//!
//! Relation-graph inserts for Postgres.
//!
//! ## Features
//!
//! - **Whole graphs in one call**: insert a nested literal of rows and their
//!   relations as one planned operation
//! - **Symbolic references**: `#id` / `#ref` markers wire rows to each other
//!   before any key exists, including `#ref{...}` inside longer strings
//! - **One transaction**: every row and key patch commits together or not at
//!   all
//! - **Validation first**: every row is checked against its table schema
//!   before the first insert is attempted
//! - **Lifecycle hooks**: `before_insert` / `after_insert` run exactly once
//!   per physical row
//! - **Pluggable storage**: runs on `tokio_postgres::Client` or the bundled
//!   in-memory store
//!
//! ## Inserting a graph
//!
//! ```ignore
//! use pgraft::{insert, ColumnSchema, ColumnType, RelationSchema, SchemaRegistry, TableSchema};
//! use serde_json::json;
//!
//! let mut registry = SchemaRegistry::new();
//! registry.register(
//!     TableSchema::new("person")
//!         .column(ColumnSchema::new("name", ColumnType::Text).required())
//!         .relation(RelationSchema::has_many("pets", "animal", "owner_id")),
//! );
//! registry.register(
//!     TableSchema::new("animal")
//!         .column(ColumnSchema::new("name", ColumnType::Text).required())
//!         .column(ColumnSchema::new("owner_id", ColumnType::Int)),
//! );
//!
//! let inserted = insert("person")
//!     .graph(json!({
//!         "name": "Jennifer",
//!         "pets": [{"name": "Doggo"}, {"name": "Cato"}],
//!     }))
//!     .execute(&mut client, &registry)
//!     .await?;
//!
//! // The literal comes back with generated keys filled in.
//! let person = inserted.into_json();
//! assert!(person["pets"][0]["owner_id"] == person["id"]);
//! ```
//!
//! ## References between rows
//!
//! ```ignore
//! insert("person")
//!     .graph(json!([
//!         {
//!             "#id": "jenny",
//!             "name": "Jennifer",
//!             "pets": [{"name": "Doggo"}],
//!         },
//!         {
//!             "name": "Sylvester",
//!             "about": "Jennifer's neighbour, lives at #ref{jenny.id}",
//!             "bestFriendId": "#ref{jenny.id}",
//!         },
//!     ]))
//!     .execute(&mut client, &registry)
//!     .await?;
//! ```

pub mod error;
pub mod exec;
pub mod markers;
pub mod memory;
pub mod path;
pub mod pg;
pub mod plan;
pub mod qb;
pub mod schema;
pub mod store;
pub mod validate;
pub mod value;
pub mod violation;

pub use error::{GraftError, GraftResult};
pub use exec::InsertedGraph;
pub use markers::{PropRef, RefTemplate};
pub use memory::MemoryStore;
pub use path::{RelationExpression, RelationPath};
pub use pg::PgTransaction;
pub use schema::{
    ColumnRule, ColumnSchema, ColumnType, LifecycleHooks, PropMap, RelationKind, RelationLink,
    RelationSchema, SchemaRegistry, TableSchema,
};
pub use store::{GraphStore, GraphTransaction};
pub use value::Value;
pub use violation::{Violation, ViolationCode, Violations};

// Re-export the builders for easy access
pub use qb::{insert, insert_related, GraphInsertQb};
