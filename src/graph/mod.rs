//! Property-graph output seam.
//!
//! The concrete graph database driver is out of scope; the writer talks to
//! [`GraphStore`], whose operations are idempotent upserts keyed by node id
//! and `(source, target, type)` so episode re-runs converge instead of
//! duplicating. [`InMemoryGraphStore`] backs tests and dry runs.

pub mod writer;

use std::sync::RwLock;

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use writer::{GraphWriteInput, GraphWriter, WriteStats};

/// A node to upsert, keyed by `id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl GraphNode {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            properties: Map::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }
}

/// An edge to upsert, keyed by `(source_id, target_id, edge_type)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source_id: String,
    pub target_id: String,
    pub edge_type: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl GraphEdge {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        edge_type: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            edge_type: edge_type.into(),
            properties: Map::new(),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("graph store rejected the write: {message}")]
    #[diagnostic(
        code(podweave::graph::write),
        help("Check graph store connectivity and credentials.")
    )]
    Write { message: String },
}

/// The property-graph driver contract.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn upsert_node(&self, node: GraphNode) -> Result<(), GraphError>;
    async fn upsert_edge(&self, edge: GraphEdge) -> Result<(), GraphError>;
}

/// Process-local graph store for tests and dry runs.
#[derive(Default)]
pub struct InMemoryGraphStore {
    nodes: RwLock<FxHashMap<String, GraphNode>>,
    edges: RwLock<FxHashMap<(String, String, String), GraphEdge>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().expect("graph lock poisoned").len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.read().expect("graph lock poisoned").len()
    }

    pub fn node(&self, id: &str) -> Option<GraphNode> {
        self.nodes
            .read()
            .expect("graph lock poisoned")
            .get(id)
            .cloned()
    }

    pub fn nodes_with_label(&self, label: &str) -> Vec<GraphNode> {
        let mut nodes: Vec<GraphNode> = self
            .nodes
            .read()
            .expect("graph lock poisoned")
            .values()
            .filter(|n| n.label == label)
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    pub fn has_edge(&self, source: &str, target: &str, edge_type: &str) -> bool {
        self.edges.read().expect("graph lock poisoned").contains_key(&(
            source.to_string(),
            target.to_string(),
            edge_type.to_string(),
        ))
    }

    /// Deterministic digest of the whole store, for idempotence assertions.
    pub fn fingerprint(&self) -> String {
        let nodes = self.nodes.read().expect("graph lock poisoned");
        let edges = self.edges.read().expect("graph lock poisoned");
        let mut node_lines: Vec<String> = nodes
            .values()
            .map(|n| format!("{}|{}|{}", n.id, n.label, Value::Object(n.properties.clone())))
            .collect();
        node_lines.sort();
        let mut edge_lines: Vec<String> = edges
            .keys()
            .map(|(s, t, e)| format!("{s}->{t}:{e}"))
            .collect();
        edge_lines.sort();
        format!("{}\n---\n{}", node_lines.join("\n"), edge_lines.join("\n"))
    }
}

/// File-backed store for CLI runs without a linked graph driver: nodes and
/// edges accumulate in memory and [`FileGraphStore::persist`] writes them as
/// JSON under a directory, one array per kind.
pub struct FileGraphStore {
    dir: std::path::PathBuf,
    inner: InMemoryGraphStore,
}

impl FileGraphStore {
    /// Load previously persisted nodes and edges, if any.
    pub async fn load(dir: impl Into<std::path::PathBuf>) -> Self {
        let dir = dir.into();
        let inner = InMemoryGraphStore::new();
        let nodes: Vec<GraphNode> =
            crate::store::paths::read_json_or_default(&dir.join("nodes.json")).await;
        let edges: Vec<GraphEdge> =
            crate::store::paths::read_json_or_default(&dir.join("edges.json")).await;
        for node in nodes {
            let _ = inner.upsert_node(node).await;
        }
        for edge in edges {
            let _ = inner.upsert_edge(edge).await;
        }
        Self { dir, inner }
    }

    pub async fn persist(&self) -> std::io::Result<()> {
        let mut nodes: Vec<GraphNode> = self
            .inner
            .nodes
            .read()
            .expect("graph lock poisoned")
            .values()
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let mut edges: Vec<GraphEdge> = self
            .inner
            .edges
            .read()
            .expect("graph lock poisoned")
            .values()
            .cloned()
            .collect();
        edges.sort_by(|a, b| {
            (&a.source_id, &a.target_id, &a.edge_type)
                .cmp(&(&b.source_id, &b.target_id, &b.edge_type))
        });
        crate::store::paths::write_json_atomic(&self.dir.join("nodes.json"), &nodes).await?;
        crate::store::paths::write_json_atomic(&self.dir.join("edges.json"), &edges).await
    }

    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }
}

#[async_trait]
impl GraphStore for FileGraphStore {
    async fn upsert_node(&self, node: GraphNode) -> Result<(), GraphError> {
        self.inner.upsert_node(node).await
    }

    async fn upsert_edge(&self, edge: GraphEdge) -> Result<(), GraphError> {
        self.inner.upsert_edge(edge).await
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn upsert_node(&self, node: GraphNode) -> Result<(), GraphError> {
        self.nodes
            .write()
            .map_err(|e| GraphError::Write {
                message: format!("lock poisoned: {e}"),
            })?
            .insert(node.id.clone(), node);
        Ok(())
    }

    async fn upsert_edge(&self, edge: GraphEdge) -> Result<(), GraphError> {
        self.edges
            .write()
            .map_err(|e| GraphError::Write {
                message: format!("lock poisoned: {e}"),
            })?
            .insert(
                (
                    edge.source_id.clone(),
                    edge.target_id.clone(),
                    edge.edge_type.clone(),
                ),
                edge,
            );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upserts_are_idempotent() {
        let store = InMemoryGraphStore::new();
        let node = GraphNode::new("n1", "Episode").with("title", "Pilot");
        store.upsert_node(node.clone()).await.unwrap();
        store.upsert_node(node).await.unwrap();
        assert_eq!(store.node_count(), 1);

        let edge = GraphEdge::new("a", "b", "HAS_EPISODE");
        store.upsert_edge(edge.clone()).await.unwrap();
        store.upsert_edge(edge).await.unwrap();
        assert_eq!(store.edge_count(), 1);
        assert!(store.has_edge("a", "b", "HAS_EPISODE"));
    }

    #[tokio::test]
    async fn fingerprint_is_stable_under_rewrites() {
        let store = InMemoryGraphStore::new();
        store
            .upsert_node(GraphNode::new("x", "Theme").with("name", "AI"))
            .await
            .unwrap();
        let before = store.fingerprint();
        store
            .upsert_node(GraphNode::new("x", "Theme").with("name", "AI"))
            .await
            .unwrap();
        assert_eq!(before, store.fingerprint());
    }
}
