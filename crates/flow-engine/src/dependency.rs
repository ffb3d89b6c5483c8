//! Start-order dependency graph
//!
//! Children of a composite are started in an order where every instance
//! comes after the instances it depends on. A connection `a.out -> b.in`
//! makes `a` depend on `b`, so consumers are listening before producers get
//! a chance to emit.

use std::collections::{HashMap, HashSet, VecDeque};

/// Dependency graph over instance ids
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Insertion order, used to keep the result stable
    nodes: Vec<String>,
    /// node -> nodes it depends on
    dependencies: HashMap<String, HashSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Adding a node twice is a no-op.
    pub fn add_node(&mut self, id: &str) {
        if !self.dependencies.contains_key(id) {
            self.nodes.push(id.to_string());
            self.dependencies.insert(id.to_string(), HashSet::new());
        }
    }

    /// Record that `node` must start after `dependency`
    pub fn add_dependency(&mut self, node: &str, dependency: &str) {
        if node == dependency {
            return;
        }
        self.add_node(node);
        self.add_node(dependency);
        if let Some(deps) = self.dependencies.get_mut(node) {
            deps.insert(dependency.to_string());
        }
    }

    /// Every node, each after all of its dependencies.
    ///
    /// Uses Kahn's algorithm with insertion order as the tie-break. Nodes
    /// caught in a cycle cannot be ordered and are appended at the end in
    /// insertion order.
    pub fn overall_order(&self) -> Vec<String> {
        let mut remaining: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|id| (id.as_str(), self.dependencies[id].len()))
            .collect();

        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for id in &self.nodes {
            for dep in &self.dependencies[id] {
                dependents.entry(dep.as_str()).or_default().push(id.as_str());
            }
        }

        let mut queue: VecDeque<&str> = self
            .nodes
            .iter()
            .map(String::as_str)
            .filter(|id| remaining[id] == 0)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        let mut placed: HashSet<&str> = HashSet::new();
        while let Some(id) = queue.pop_front() {
            order.push(id.to_string());
            placed.insert(id);

            let mut ready = Vec::new();
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(*dependent);
                    }
                }
            }
            ready.sort_by_key(|id| self.position(id));
            queue.extend(ready);
        }

        if order.len() < self.nodes.len() {
            log::debug!(
                "Dependency cycle among {} instances; starting them in declaration order",
                self.nodes.len() - order.len()
            );
            order.extend(
                self.nodes
                    .iter()
                    .filter(|id| !placed.contains(id.as_str()))
                    .cloned(),
            );
        }

        order
    }

    fn position(&self, id: &str) -> usize {
        self.nodes
            .iter()
            .position(|n| n == id)
            .unwrap_or(usize::MAX)
    }
}
