//! Dependency Graph
//!
//! This module defines the pieces of the dependency graph shared by all
//! reactive primitives.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes represent reactive cells (signals) or computations (computeds, effects)
//! - Edges represent dependencies: if A depends on B, there is an edge from B to A
//!
//! There is no central graph object. Edges live on the nodes themselves: each
//! source keeps the subscribers that read it, each subscriber keeps the
//! sources it read during its last evaluation. A write walks the subscriber
//! edges outward, marking computeds dirty and handing effects to the
//! scheduler; nothing is recomputed during that walk.
//!
//! Cycles are never materialized as edges. A computed only subscribes after a
//! successful evaluation, and an evaluation that reads its own node fails
//! before that point.

mod edges;
mod node;

pub use edges::{rebind, unbind, Disposable, Source, SourceSet, Subscriber, SubscriberSet};
pub use node::{NodeId, NodeInfo, NodeKind};
