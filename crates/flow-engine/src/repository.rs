//! Node repository for resolving instance references
//!
//! Instances inside a composite may refer to their node by id instead of
//! carrying it inline. The repository maps those ids to node definitions,
//! leaf or composite.
//!
//! # Usage
//!
//! ```ignore
//! use flow_engine::{NodeRepository, LeafNode};
//!
//! let mut repository = NodeRepository::new();
//! repository.register(add_node());
//! repository.load_composite(include_str!("wrapper.json"))?;
//! ```

use std::collections::HashMap;

use crate::error::{FlowError, Result};
use crate::types::{CompositeNode, Node};

/// Registry of node definitions keyed by node id
#[derive(Debug, Clone, Default)]
pub struct NodeRepository {
    nodes: HashMap<String, Node>,
}

impl NodeRepository {
    /// Create a new empty repository
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Register a node under its own id, replacing any previous definition
    pub fn register(&mut self, node: impl Into<Node>) {
        let node = node.into();
        log::debug!("Registering node '{}'", node.id());
        self.nodes.insert(node.id().to_string(), node);
    }

    /// Builder form of [`register`](Self::register)
    pub fn with_node(mut self, node: impl Into<Node>) -> Self {
        self.register(node);
        self
    }

    /// Parse a composite definition from JSON and register it
    pub fn load_composite(&mut self, json: &str) -> Result<String> {
        let composite: CompositeNode = serde_json::from_str(json)?;
        let id = composite.id.clone();
        self.register(composite);
        Ok(id)
    }

    /// Look up a node by id
    pub fn get(&self, node_id: &str) -> Result<&Node> {
        self.nodes
            .get(node_id)
            .ok_or_else(|| FlowError::NodeNotFound(node_id.to_string()))
    }

    /// Check if a node id is registered
    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// List all registered node ids
    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Merge another repository into this one
    ///
    /// Entries from `other` override entries in `self` if they share the same id.
    pub fn merge(&mut self, other: NodeRepository) {
        self.nodes.extend(other.nodes);
    }
}
