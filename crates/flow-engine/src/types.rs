//! Core types for flow graphs
//!
//! These types define nodes, their pins, the instances placed inside a
//! composite node and the connections between them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};
use crate::instance::RunContext;
use crate::pins::{InputValues, Outputs};
use crate::repository::NodeRepository;

/// Values carried by pins
pub type Value = serde_json::Value;

/// Unique identifier for a node definition
pub type NodeId = String;

/// Identifier of an instance inside a composite
pub type InsId = String;

/// Identifier of a pin on a node
pub type PinId = String;

/// Synthetic optional input present on every instance, used to gate activation
pub const TRIGGER_INPUT_ID: &str = "__trigger";

/// Synthetic output receiving errors of an instance when connected
pub const ERROR_OUTPUT_ID: &str = "__error";

/// Sentinel instance id for the composite's own boundary pins
pub const THIS_INS_ID: &str = "__this";

/// Prefix marking a static value as an environment reference
pub const ENV_PREFIX: &str = "$ENV.";

/// Action run when an activation ends or its instance is torn down
pub type Cleanup = Box<dyn FnOnce() + Send>;

/// Eligibility semantics of an input pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputMode {
    /// Must hold a value before the node runs
    #[default]
    Required,
    /// Never blocks the node
    Optional,
    /// Required only when something is wired to it
    RequiredIfConnected,
}

/// Declaration of an input pin
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputPin {
    #[serde(default)]
    pub mode: InputMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl InputPin {
    pub fn required() -> Self {
        Self::default()
    }

    pub fn optional() -> Self {
        Self {
            mode: InputMode::Optional,
            description: None,
        }
    }

    pub fn required_if_connected() -> Self {
        Self {
            mode: InputMode::RequiredIfConnected,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Declaration of an output pin
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputPin {
    /// Emissions feed back later; excluded from start ordering
    #[serde(default)]
    pub delayed: bool,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl OutputPin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delayed(mut self) -> Self {
        self.delayed = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Per-instance delivery configuration of an input pin
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum InputPinConfig {
    #[default]
    Queue,
    Sticky,
    Static { value: Value },
}

impl InputPinConfig {
    /// Static value configuration
    pub fn static_value(value: impl Into<Value>) -> Self {
        Self::Static {
            value: value.into(),
        }
    }

    /// Static configuration referencing `$ENV.<path>`
    pub fn env(path: &str) -> Self {
        Self::Static {
            value: Value::String(format!("{}{}", ENV_PREFIX, path)),
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self, Self::Static { .. })
    }
}

/// One end of a connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionNode {
    pub ins_id: InsId,
    pub pin_id: PinId,
}

impl ConnectionNode {
    pub fn new(ins_id: impl Into<String>, pin_id: impl Into<String>) -> Self {
        Self {
            ins_id: ins_id.into(),
            pin_id: pin_id.into(),
        }
    }

    /// A pin on the enclosing composite's boundary
    pub fn this(pin_id: impl Into<String>) -> Self {
        Self::new(THIS_INS_ID, pin_id)
    }

    pub fn is_this(&self) -> bool {
        self.ins_id == THIS_INS_ID
    }

    fn parse(raw: &str, whole: &str) -> Result<Self> {
        let (ins_id, pin_id) = raw
            .trim()
            .split_once('.')
            .ok_or_else(|| FlowError::MalformedConnection(whole.to_string()))?;
        if ins_id.is_empty() || pin_id.is_empty() || pin_id.contains('.') {
            return Err(FlowError::MalformedConnection(whole.to_string()));
        }
        Ok(Self::new(ins_id, pin_id))
    }
}

impl fmt::Display for ConnectionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.ins_id, self.pin_id)
    }
}

/// A directed edge between an output pin and an input pin
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub from: ConnectionNode,
    pub to: ConnectionNode,
    /// Feedback edge, excluded from start ordering
    #[serde(default)]
    pub delayed: bool,
    /// Presentation-only flag, ignored by execution
    #[serde(default)]
    pub hidden: bool,
}

impl Connection {
    pub fn new(from: ConnectionNode, to: ConnectionNode) -> Self {
        Self {
            from,
            to,
            delayed: false,
            hidden: false,
        }
    }

    pub fn delayed(mut self) -> Self {
        self.delayed = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Parse `"fromIns.fromPin -> toIns.toPin"`
    pub fn parse(path: &str) -> Result<Self> {
        let (from, to) = path
            .split_once("->")
            .ok_or_else(|| FlowError::MalformedConnection(path.to_string()))?;
        Ok(Self::new(
            ConnectionNode::parse(from, path)?,
            ConnectionNode::parse(to, path)?,
        ))
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// The node an instance places inside a composite
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InstanceNode {
    /// Looked up in the repository by id
    #[serde(rename_all = "camelCase")]
    Ref { node_id: NodeId },
    /// Carried inline
    #[serde(skip)]
    Inline(Box<Node>),
}

impl InstanceNode {
    /// Resolve to a node definition
    pub fn resolve(&self, repository: &NodeRepository) -> Result<Node> {
        match self {
            Self::Ref { node_id } => repository.get(node_id).cloned(),
            Self::Inline(node) => Ok((**node).clone()),
        }
    }
}

/// A placed reference to a node inside a composite
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: InsId,
    pub node: InstanceNode,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub input_config: HashMap<PinId, InputPinConfig>,
}

impl Instance {
    /// Instance of a repository node
    pub fn of(id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node: InstanceNode::Ref {
                node_id: node_id.into(),
            },
            input_config: HashMap::new(),
        }
    }

    /// Instance of an inline node
    pub fn inline(id: impl Into<String>, node: impl Into<Node>) -> Self {
        Self {
            id: id.into(),
            node: InstanceNode::Inline(Box::new(node.into())),
            input_config: HashMap::new(),
        }
    }

    pub fn with_input_config(mut self, pin_id: impl Into<String>, config: InputPinConfig) -> Self {
        self.input_config.insert(pin_id.into(), config);
        self
    }
}

/// The callable contract of a leaf node.
///
/// Receives one activation's resolved inputs, the output emitters and the
/// run context. May emit synchronously or keep emitters around to emit
/// later. The returned cleanup runs when the activation cycle ends or the
/// instance is torn down.
pub trait NodeRunner: Send + Sync {
    fn run(&self, inputs: InputValues, outputs: &Outputs, ctx: &RunContext)
        -> Result<Option<Cleanup>>;
}

struct FnRunner<F>(F);

impl<F> NodeRunner for FnRunner<F>
where
    F: Fn(InputValues, &Outputs, &RunContext) -> Result<Option<Cleanup>> + Send + Sync,
{
    fn run(
        &self,
        inputs: InputValues,
        outputs: &Outputs,
        ctx: &RunContext,
    ) -> Result<Option<Cleanup>> {
        (self.0)(inputs, outputs, ctx)
    }
}

/// A node whose behavior is an opaque run function
#[derive(Clone)]
pub struct LeafNode {
    pub id: NodeId,
    pub inputs: HashMap<PinId, InputPin>,
    pub outputs: HashMap<PinId, OutputPin>,
    /// `+`-joined groups of outputs whose emission ends an activation cycle
    pub completion_outputs: Option<Vec<String>>,
    /// Inputs allowed to re-run the node while it is processing
    pub reactive_inputs: Option<Vec<PinId>>,
    pub description: Option<String>,
    runner: Arc<dyn NodeRunner>,
}

impl LeafNode {
    /// Create a leaf node from a closure
    pub fn new<F>(id: impl Into<String>, run: F) -> Self
    where
        F: Fn(InputValues, &Outputs, &RunContext) -> Result<Option<Cleanup>>
            + Send
            + Sync
            + 'static,
    {
        Self::with_runner(id, Arc::new(FnRunner(run)))
    }

    /// Create a leaf node from a shared runner
    pub fn with_runner(id: impl Into<String>, runner: Arc<dyn NodeRunner>) -> Self {
        Self {
            id: id.into(),
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            completion_outputs: None,
            reactive_inputs: None,
            description: None,
            runner,
        }
    }

    pub fn with_input(mut self, pin_id: impl Into<String>, pin: InputPin) -> Self {
        self.inputs.insert(pin_id.into(), pin);
        self
    }

    pub fn with_output(mut self, pin_id: impl Into<String>, pin: OutputPin) -> Self {
        self.outputs.insert(pin_id.into(), pin);
        self
    }

    pub fn with_completion_outputs<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.completion_outputs = Some(groups.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_reactive_inputs<I, S>(mut self, pins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reactive_inputs = Some(pins.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn runner(&self) -> &Arc<dyn NodeRunner> {
        &self.runner
    }
}

impl fmt::Debug for LeafNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeafNode")
            .field("id", &self.id)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("completion_outputs", &self.completion_outputs)
            .field("reactive_inputs", &self.reactive_inputs)
            .finish_non_exhaustive()
    }
}

/// A node built from instances of other nodes and connections between them
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeNode {
    pub id: NodeId,
    #[serde(default)]
    pub inputs: HashMap<PinId, InputPin>,
    #[serde(default)]
    pub outputs: HashMap<PinId, OutputPin>,
    #[serde(default)]
    pub instances: Vec<Instance>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_outputs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reactive_inputs: Option<Vec<PinId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CompositeNode {
    /// Find an instance by id
    pub fn find_instance(&self, ins_id: &str) -> Option<&Instance> {
        self.instances.iter().find(|i| i.id == ins_id)
    }
}

/// Either shape of node
#[derive(Debug, Clone)]
pub enum Node {
    Leaf(LeafNode),
    Composite(CompositeNode),
}

impl Node {
    pub fn id(&self) -> &str {
        match self {
            Self::Leaf(n) => &n.id,
            Self::Composite(n) => &n.id,
        }
    }

    pub fn inputs(&self) -> &HashMap<PinId, InputPin> {
        match self {
            Self::Leaf(n) => &n.inputs,
            Self::Composite(n) => &n.inputs,
        }
    }

    pub fn outputs(&self) -> &HashMap<PinId, OutputPin> {
        match self {
            Self::Leaf(n) => &n.outputs,
            Self::Composite(n) => &n.outputs,
        }
    }

    /// Whether the node accepts the given input (including the trigger pin)
    pub fn has_input(&self, pin_id: &str) -> bool {
        pin_id == TRIGGER_INPUT_ID || self.inputs().contains_key(pin_id)
    }

    /// Whether the node exposes the given output (including the error pin)
    pub fn has_output(&self, pin_id: &str) -> bool {
        pin_id == ERROR_OUTPUT_ID || self.outputs().contains_key(pin_id)
    }

    /// Turn this node into something an instance runtime can drive.
    ///
    /// Leaves are returned as they are; composites are wired.
    pub fn into_runnable(self, repository: &NodeRepository) -> Result<LeafNode> {
        match self {
            Self::Leaf(leaf) => Ok(leaf),
            Self::Composite(composite) => crate::wire::wire(&composite, repository),
        }
    }
}

impl From<LeafNode> for Node {
    fn from(node: LeafNode) -> Self {
        Self::Leaf(node)
    }
}

impl From<CompositeNode> for Node {
    fn from(node: CompositeNode) -> Self {
        Self::Composite(node)
    }
}
