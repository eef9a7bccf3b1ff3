//! Graph Nodes
//!
//! This module defines the identities shared by every participant in the
//! dependency graph: signals, computeds, effects, and the scopes that own them.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a node in the dependency graph.
///
/// Identifiers are allocated from a process-wide counter, so two nodes never
/// share an ID even when they live on different threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A reactive cell. These are the roots of the graph.
    /// They have no dependencies, only dependents.
    Signal,

    /// A derived value. Has dependencies and may have dependents.
    Computed,

    /// A scheduled side effect. These are leaves of the graph.
    Effect,

    /// An ownership boundary. Not part of the dependency edges, but shares
    /// the ID space so diagnostics can name it.
    Scope,
}

impl NodeKind {
    fn as_str(self) -> &'static str {
        match self {
            NodeKind::Signal => "signal",
            NodeKind::Computed => "computed",
            NodeKind::Effect => "effect",
            NodeKind::Scope => "scope",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity plus a human-readable description of a node.
///
/// Carried by every diagnostic so a failure can be traced back to the
/// computation that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeInfo {
    id: NodeId,
    kind: NodeKind,
    label: Option<String>,
}

impl NodeInfo {
    /// Allocate a fresh identity for a node of the given kind.
    pub fn new(kind: NodeKind, label: Option<String>) -> Self {
        Self {
            id: NodeId::new(),
            kind,
            label,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind, self.id)?;
        if let Some(label) = &self.label {
            write!(f, " '{label}'")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
        assert!(id2.raw() > id1.raw());
    }

    #[test]
    fn node_info_display_includes_label() {
        let info = NodeInfo::new(NodeKind::Effect, Some("render".to_string()));
        let rendered = info.to_string();
        assert!(rendered.starts_with("effect#"));
        assert!(rendered.ends_with("'render'"));

        let anonymous = NodeInfo::new(NodeKind::Computed, None);
        assert_eq!(anonymous.to_string(), format!("computed{}", anonymous.id()));
    }
}
