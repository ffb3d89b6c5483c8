//! Fluent builder for composite nodes
//!
//! Provides a fluent API for constructing composites programmatically
//! instead of writing them out as JSON.

use std::collections::HashMap;

use crate::error::{FlowError, Result};
use crate::types::{
    CompositeNode, Connection, ConnectionNode, InputPin, InputPinConfig, Instance, OutputPin,
};
use crate::validation::validate_composite;
use crate::repository::NodeRepository;

/// Fluent builder for constructing composite nodes
///
/// # Example
///
/// ```ignore
/// let wrapper = CompositeBuilder::new("wrapper")
///     .input("a", InputPin::required())
///     .output("r", OutputPin::new())
///     .instance(Instance::of("add", "add"))
///     .with_input_config("n2", InputPinConfig::static_value(10))
///     .connect_path("__this.a -> add.n1")
///     .connect_path("add.r -> __this.r")
///     .build()?;
/// ```
pub struct CompositeBuilder {
    id: String,
    description: Option<String>,
    inputs: HashMap<String, InputPin>,
    outputs: HashMap<String, OutputPin>,
    instances: Vec<Instance>,
    connections: Vec<Connection>,
    completion_outputs: Option<Vec<String>>,
    reactive_inputs: Option<Vec<String>>,
    error: Option<FlowError>,
}

impl CompositeBuilder {
    /// Create a new composite builder
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            instances: Vec::new(),
            connections: Vec::new(),
            completion_outputs: None,
            reactive_inputs: None,
            error: None,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Declare a boundary input
    pub fn input(mut self, pin_id: impl Into<String>, pin: InputPin) -> Self {
        self.inputs.insert(pin_id.into(), pin);
        self
    }

    /// Declare a boundary output
    pub fn output(mut self, pin_id: impl Into<String>, pin: OutputPin) -> Self {
        self.outputs.insert(pin_id.into(), pin);
        self
    }

    /// Add an instance
    pub fn instance(mut self, instance: Instance) -> Self {
        self.instances.push(instance);
        self
    }

    /// Configure an input of the most recently added instance
    ///
    /// Must be called immediately after `instance`.
    pub fn with_input_config(mut self, pin_id: impl Into<String>, config: InputPinConfig) -> Self {
        if let Some(instance) = self.instances.last_mut() {
            instance.input_config.insert(pin_id.into(), config);
        }
        self
    }

    /// Connect an output pin to an input pin
    pub fn connect(mut self, from: ConnectionNode, to: ConnectionNode) -> Self {
        self.connections.push(Connection::new(from, to));
        self
    }

    /// Connect with a feedback edge that is excluded from start ordering
    pub fn connect_delayed(mut self, from: ConnectionNode, to: ConnectionNode) -> Self {
        self.connections.push(Connection::new(from, to).delayed());
        self
    }

    /// Connect using the `"ins.pin -> ins.pin"` shorthand
    ///
    /// A malformed path is reported by [`build`](Self::build).
    pub fn connect_path(mut self, path: &str) -> Self {
        match Connection::parse(path) {
            Ok(connection) => self.connections.push(connection),
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
        self
    }

    /// Set the completion-output groups (`"a+b"` joins pins)
    pub fn completion_outputs<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.completion_outputs = Some(groups.into_iter().map(Into::into).collect());
        self
    }

    /// Set the inputs that may re-run the composite while it is processing
    pub fn reactive_inputs<I, S>(mut self, pins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reactive_inputs = Some(pins.into_iter().map(Into::into).collect());
        self
    }

    /// Build the composite without validation against a repository
    pub fn build(self) -> Result<CompositeNode> {
        if let Some(e) = self.error {
            return Err(e);
        }
        Ok(CompositeNode {
            id: self.id,
            inputs: self.inputs,
            outputs: self.outputs,
            instances: self.instances,
            connections: self.connections,
            completion_outputs: self.completion_outputs,
            reactive_inputs: self.reactive_inputs,
            description: self.description,
        })
    }

    /// Build and validate the composite against a repository
    ///
    /// Fails with the first validation problem found.
    pub fn build_validated(self, repository: &NodeRepository) -> Result<CompositeNode> {
        let composite = self.build()?;
        match validate_composite(&composite, repository).into_iter().next() {
            Some(error) => Err(FlowError::Validation(error)),
            None => Ok(composite),
        }
    }
}
