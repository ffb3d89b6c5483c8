//! Construction-time validation of composite nodes
//!
//! Checks that every instance resolves to a node, that every connection
//! refers to existing instances and pins, and that no instance configures
//! its trigger pin as static.

use std::collections::HashSet;

use crate::error::FlowError;
use crate::repository::NodeRepository;
use crate::types::{
    CompositeNode, Connection, ConnectionNode, Instance, InstanceNode, Node, TRIGGER_INPUT_ID,
};

/// Validation error with location context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Two instances share the same id
    DuplicateInstance { ins_id: String },
    /// An instance refers to a node id missing from the repository
    UnknownNode { ins_id: String, node_id: String },
    /// A connection references a non-existent instance
    UnknownInstance { connection: String, ins_id: String },
    /// A connection references a pin the node does not declare
    UnknownPin {
        connection: String,
        ins_id: String,
        node_id: String,
        pin_id: String,
    },
    /// An instance configures its trigger pin as static
    StaticTrigger { ins_id: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateInstance { ins_id } => {
                write!(f, "Instance id '{}' is used more than once", ins_id)
            }
            Self::UnknownNode { ins_id, node_id } => {
                write!(f, "Instance '{}' refers to unknown node '{}'", ins_id, node_id)
            }
            Self::UnknownInstance { connection, ins_id } => {
                write!(
                    f,
                    "Connection '{}' references unknown instance '{}'",
                    connection, ins_id
                )
            }
            Self::UnknownPin {
                connection,
                ins_id,
                node_id,
                pin_id,
            } => {
                write!(
                    f,
                    "Connection '{}' references unknown pin '{}' on '{}' (node '{}')",
                    connection, pin_id, ins_id, node_id
                )
            }
            Self::StaticTrigger { ins_id } => {
                write!(f, "Instance '{}' configures its trigger pin as static", ins_id)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl ValidationError {
    /// Map to the runtime error reported when wiring `composite_id` fails
    pub(crate) fn into_flow_error(self, composite_id: &str) -> FlowError {
        match self {
            Self::UnknownNode { node_id, .. } => FlowError::NodeNotFound(node_id),
            Self::UnknownInstance { ins_id, .. } => FlowError::InstanceNotFound {
                node_id: composite_id.to_string(),
                ins_id,
            },
            Self::UnknownPin {
                ins_id,
                node_id,
                pin_id,
                ..
            } => FlowError::PinNotFound {
                ins_id,
                node_id,
                pin_id,
            },
            Self::StaticTrigger { ins_id } => FlowError::StaticTrigger(ins_id),
            other @ Self::DuplicateInstance { .. } => FlowError::Validation(other),
        }
    }
}

/// Validate a composite node
///
/// Returns all validation errors found (not just the first).
pub fn validate_composite(
    composite: &CompositeNode,
    repository: &NodeRepository,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    validate_instances(composite, repository, &mut errors);
    for connection in &composite.connections {
        validate_connection(composite, connection, repository, &mut errors);
    }

    errors
}

/// Node placed by an instance, without cloning it
fn node_of<'a>(instance: &'a Instance, repository: &'a NodeRepository) -> Option<&'a Node> {
    match &instance.node {
        InstanceNode::Ref { node_id } => repository.get(node_id).ok(),
        InstanceNode::Inline(node) => Some(node.as_ref()),
    }
}

/// Check instance ids, node references and trigger configuration
fn validate_instances(
    composite: &CompositeNode,
    repository: &NodeRepository,
    errors: &mut Vec<ValidationError>,
) {
    let mut seen = HashSet::new();
    for instance in &composite.instances {
        if !seen.insert(instance.id.as_str()) {
            errors.push(ValidationError::DuplicateInstance {
                ins_id: instance.id.clone(),
            });
        }
        if let InstanceNode::Ref { node_id } = &instance.node {
            if !repository.contains(node_id) {
                errors.push(ValidationError::UnknownNode {
                    ins_id: instance.id.clone(),
                    node_id: node_id.clone(),
                });
            }
        }
        if instance
            .input_config
            .get(TRIGGER_INPUT_ID)
            .is_some_and(|config| config.is_static())
        {
            errors.push(ValidationError::StaticTrigger {
                ins_id: instance.id.clone(),
            });
        }
    }
}

/// Which side of a connection an endpoint sits on
#[derive(Clone, Copy)]
enum Side {
    Source,
    Target,
}

fn validate_connection(
    composite: &CompositeNode,
    connection: &Connection,
    repository: &NodeRepository,
    errors: &mut Vec<ValidationError>,
) {
    for (end, side) in [(&connection.from, Side::Source), (&connection.to, Side::Target)] {
        if let Some(error) = check_endpoint(composite, connection, end, side, repository) {
            errors.push(error);
        }
    }
}

fn check_endpoint(
    composite: &CompositeNode,
    connection: &Connection,
    end: &ConnectionNode,
    side: Side,
    repository: &NodeRepository,
) -> Option<ValidationError> {
    let unknown_pin = |node_id: &str| ValidationError::UnknownPin {
        connection: connection.to_string(),
        ins_id: end.ins_id.clone(),
        node_id: node_id.to_string(),
        pin_id: end.pin_id.clone(),
    };

    // The boundary reads from its own inputs and writes to its own outputs
    if end.is_this() {
        let known = match side {
            Side::Source => composite.inputs.contains_key(&end.pin_id),
            Side::Target => composite.outputs.contains_key(&end.pin_id),
        };
        return (!known).then(|| unknown_pin(&composite.id));
    }

    let Some(instance) = composite.find_instance(&end.ins_id) else {
        return Some(ValidationError::UnknownInstance {
            connection: connection.to_string(),
            ins_id: end.ins_id.clone(),
        });
    };
    // Unresolvable nodes are reported once by validate_instances
    let node = node_of(instance, repository)?;
    let known = match side {
        Side::Source => node.has_output(&end.pin_id),
        Side::Target => node.has_input(&end.pin_id),
    };
    (!known).then(|| unknown_pin(node.id()))
}
