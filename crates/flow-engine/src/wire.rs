//! Composite graph wiring
//!
//! [`wire`] compiles a [`CompositeNode`] into a [`LeafNode`] with the same
//! external contract. Every activation of the wired node starts a fresh set
//! of child instances:
//!
//! 1. child inputs are created per configuration (queue, sticky, static)
//!    and only for pins that are connected or static
//! 2. internal connections subscribe source outputs to target inputs, and
//!    child outputs wired to the boundary forward to the composite's outputs
//! 3. children start in dependency order, consumers before producers
//! 4. the composite's own input values are spliced into the children
//!
//! The cleanup returned by each activation cancels its children.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::dependency::DependencyGraph;
use crate::error::{FlowError, Result};
use crate::instance::{CancelHandle, RunContext};
use crate::pins::{Emitter, InputSource, InputValues, NodeInputs, NodeOutputs, Outputs};
use crate::repository::NodeRepository;
use crate::types::{
    Cleanup, CompositeNode, Connection, InputPinConfig, LeafNode, Node, NodeRunner, PinId,
    ERROR_OUTPUT_ID,
};
use crate::validation::validate_composite;

/// A resolved instance inside a wired composite
struct Child {
    id: String,
    node: LeafNode,
    input_config: HashMap<PinId, InputPinConfig>,
}

/// Runner of a wired composite
struct CompositeRunner {
    composite_id: String,
    /// Children in start order
    children: Vec<Child>,
    connections: Vec<Connection>,
}

/// Compile a composite into a runnable leaf.
///
/// Child composites are wired recursively. Fails on the first construction
/// problem: unknown node, instance or pin, or a static trigger.
pub fn wire(composite: &CompositeNode, repository: &NodeRepository) -> Result<LeafNode> {
    wire_nested(composite, repository, &mut Vec::new())
}

fn wire_nested(
    composite: &CompositeNode,
    repository: &NodeRepository,
    stack: &mut Vec<String>,
) -> Result<LeafNode> {
    if stack.contains(&composite.id) {
        return Err(FlowError::RecursiveComposite(composite.id.clone()));
    }
    if let Some(error) = validate_composite(composite, repository).into_iter().next() {
        return Err(error.into_flow_error(&composite.id));
    }

    stack.push(composite.id.clone());
    let mut resolved = HashMap::new();
    for instance in &composite.instances {
        let node = match instance.node.resolve(repository)? {
            Node::Leaf(leaf) => leaf,
            Node::Composite(inner) => wire_nested(&inner, repository, stack)?,
        };
        resolved.insert(instance.id.clone(), (node, instance.input_config.clone()));
    }
    stack.pop();

    let order = start_order(composite, &resolved);
    let children = order
        .into_iter()
        .filter_map(|id| {
            resolved.remove(&id).map(|(node, input_config)| Child {
                id,
                node,
                input_config,
            })
        })
        .collect();

    log::debug!(
        "Wired composite '{}' ({} instances, {} connections)",
        composite.id,
        composite.instances.len(),
        composite.connections.len()
    );

    let runner = CompositeRunner {
        composite_id: composite.id.clone(),
        children,
        connections: composite.connections.clone(),
    };
    let mut leaf = LeafNode::with_runner(composite.id.clone(), Arc::new(runner));
    leaf.inputs = composite.inputs.clone();
    leaf.outputs = composite.outputs.clone();
    leaf.completion_outputs = composite.completion_outputs.clone();
    leaf.reactive_inputs = composite.reactive_inputs.clone();
    leaf.description = composite.description.clone();
    Ok(leaf)
}

/// Start order over instance ids.
///
/// Delayed connections and connections leaving a delayed output pin do not
/// constrain the order.
fn start_order(
    composite: &CompositeNode,
    resolved: &HashMap<String, (LeafNode, HashMap<PinId, InputPinConfig>)>,
) -> Vec<String> {
    let mut graph = DependencyGraph::new();
    for instance in &composite.instances {
        graph.add_node(&instance.id);
    }
    for connection in &composite.connections {
        if connection.delayed || connection.from.is_this() || connection.to.is_this() {
            continue;
        }
        let delayed_pin = resolved
            .get(&connection.from.ins_id)
            .and_then(|(node, _)| node.outputs.get(&connection.from.pin_id))
            .is_some_and(|pin| pin.delayed);
        if !delayed_pin {
            graph.add_dependency(&connection.from.ins_id, &connection.to.ins_id);
        }
    }
    graph.overall_order()
}

impl Child {
    /// Input sources for one activation; unconnected dynamic pins are left out
    fn inputs(&self, connections: &[Connection]) -> NodeInputs {
        let connected: HashSet<&str> = connections
            .iter()
            .filter(|c| c.to.ins_id == self.id)
            .map(|c| c.to.pin_id.as_str())
            .collect();

        let mut inputs = NodeInputs::new();
        for pin_id in connected {
            let source = match self.input_config.get(pin_id) {
                Some(InputPinConfig::Sticky) => InputSource::sticky(),
                Some(InputPinConfig::Static { value }) => InputSource::Static(value.clone()),
                Some(InputPinConfig::Queue) | None => InputSource::queue(),
            };
            inputs.insert(pin_id.to_string(), source);
        }
        for (pin_id, config) in &self.input_config {
            if let InputPinConfig::Static { value } = config {
                inputs.insert(pin_id.clone(), InputSource::Static(value.clone()));
            }
        }
        inputs
    }

    /// Output sinks for one activation; the error pin only when connected
    fn outputs(&self, connections: &[Connection]) -> NodeOutputs {
        let mut outputs: NodeOutputs = self
            .node
            .outputs
            .keys()
            .map(|pin_id| (pin_id.clone(), Emitter::new()))
            .collect();
        let error_connected = connections
            .iter()
            .any(|c| c.from.ins_id == self.id && c.from.pin_id == ERROR_OUTPUT_ID);
        if error_connected {
            outputs.insert(ERROR_OUTPUT_ID.to_string(), Emitter::new());
        }
        outputs
    }
}

impl NodeRunner for CompositeRunner {
    fn run(
        &self,
        inputs: InputValues,
        outputs: &Outputs,
        ctx: &RunContext,
    ) -> Result<Option<Cleanup>> {
        let mut child_inputs: HashMap<&str, NodeInputs> = HashMap::new();
        let mut child_outputs: HashMap<&str, NodeOutputs> = HashMap::new();
        for child in &self.children {
            child_inputs.insert(&child.id, child.inputs(&self.connections));
            child_outputs.insert(&child.id, child.outputs(&self.connections));
        }

        let mut subscriptions = Vec::new();
        let mut boundary = Vec::new();
        for connection in &self.connections {
            // Static targets discard connected values
            let target = if connection.to.is_this() {
                outputs.get(&connection.to.pin_id).cloned()
            } else {
                child_inputs
                    .get(connection.to.ins_id.as_str())
                    .and_then(|pins| pins.get(&connection.to.pin_id))
                    .and_then(|source| source.emitter().cloned())
            };
            let Some(target) = target else {
                continue;
            };

            if connection.from.is_this() {
                boundary.push((connection.from.pin_id.as_str(), target));
                continue;
            }
            let source = child_outputs
                .get(connection.from.ins_id.as_str())
                .and_then(|pins| pins.get(&connection.from.pin_id));
            if let Some(source) = source {
                subscriptions.push(source.subscribe(move |value| target.emit(value)));
            }
        }

        let mut handles: Vec<CancelHandle> = Vec::with_capacity(self.children.len());
        for child in &self.children {
            let started = ctx.execute(
                child.node.clone(),
                child_inputs.remove(child.id.as_str()).unwrap_or_default(),
                child_outputs.remove(child.id.as_str()).unwrap_or_default(),
                &child.id,
            );
            match started {
                Ok(handle) => handles.push(handle),
                Err(error) => {
                    handles.iter().for_each(CancelHandle::cancel);
                    subscriptions.into_iter().for_each(|s| s.unsubscribe());
                    return Err(error);
                }
            }
        }

        for (pin_id, target) in &boundary {
            if let Some(value) = inputs.get(*pin_id) {
                target.emit(value.clone());
            }
        }

        let composite_id = self.composite_id.clone();
        Ok(Some(Box::new(move || {
            log::trace!("Stopping children of composite '{}'", composite_id);
            for handle in handles {
                handle.cancel();
            }
            for subscription in subscriptions {
                subscription.unsubscribe();
            }
        })))
    }
}
