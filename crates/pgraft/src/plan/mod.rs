//! Turning a nested literal into an executable insertion plan.
//!
//! The pipeline has three stages. [`normalize`](normalize::normalize)
//! flattens the literal into a [`RelationGraph`](graph::RelationGraph) of
//! per-row nodes and the reference edges implied by relation nesting.
//! [`resolve`](resolve::resolve) binds symbolic `#id` / `#ref` markers to
//! concrete nodes. [`plan_batches`](order::plan_batches) orders the nodes so
//! every row is inserted after the rows it takes values from.

pub mod graph;
pub mod normalize;
pub mod order;
pub mod resolve;

pub use graph::{NodeId, NodeKind, RelationGraph};
pub use normalize::{normalize, RelatedContext};
pub use order::{plan_batches, InsertPlan};
pub use resolve::resolve;
