//! Flow Engine - Reactive dataflow execution for node graphs
//!
//! This crate drives values through a graph of nodes wired together by
//! pins. It supports:
//!
//! - Queue, sticky, static and `$ENV.` environment-bound input pins
//! - Required, optional and required-if-connected input semantics
//! - Completion-output groups and reactive inputs
//! - Nested composite nodes with hierarchical state isolation
//! - Error bubbling with per-instance error pins
//! - Debugger hooks that can observe or intercept every pin value
//!
//! # Architecture
//!
//! - `Executor`: entry point; resolves nodes, installs debug mediation
//! - `InstanceRuntime`: the idle/processing state machine of one instance
//! - `wire`: compiles a composite into a runnable leaf node
//! - `ExecutionState`: explicit store of inner and inputs state, keyed by
//!   instance path and reusable across runs
//!
//! # Example
//!
//! ```ignore
//! use flow_engine::{Executor, InputPin, LeafNode, NodeRepository, OutputPin};
//!
//! let add = LeafNode::new("add", |inputs, outputs, _ctx| {
//!     let n1 = inputs["n1"].as_i64().unwrap_or(0);
//!     let n2 = inputs["n2"].as_i64().unwrap_or(0);
//!     outputs.emit("r", n1 + n2);
//!     Ok(None)
//! })
//! .with_input("n1", InputPin::required())
//! .with_input("n2", InputPin::required())
//! .with_output("r", OutputPin::new());
//!
//! let cancel = Executor::new(NodeRepository::new()).execute(add, inputs, outputs)?;
//! ```

pub mod builder;
pub mod completion;
pub mod config;
pub mod debugger;
pub mod dependency;
pub mod error;
pub mod events;
pub mod execute;
pub mod extensions;
pub mod instance;
pub mod pins;
pub mod readiness;
pub mod repository;
pub mod resolver;
pub mod state;
pub mod types;
pub mod validation;
pub mod wire;

// Re-export key types
pub use builder::CompositeBuilder;
pub use config::ExecutorConfig;
pub use debugger::{Debugger, EventSinkDebugger, InterceptCommand, PinEvent};
pub use error::{FlowError, Result};
pub use events::{DebugEvent, EventSink, NullEventSink, VecEventSink};
pub use execute::Executor;
pub use extensions::ContextExtensions;
pub use instance::{CancelHandle, ErrorHandler, RunContext};
pub use pins::{DeliveryMode, Emitter, InputSource, InputValues, NodeInputs, NodeOutputs, Outputs};
pub use repository::NodeRepository;
pub use state::{ExecutionState, NodeStateHandle};
pub use types::{
    CompositeNode, Connection, ConnectionNode, InputMode, InputPin, InputPinConfig, Instance,
    LeafNode, Node, NodeRunner, OutputPin, Value, ERROR_OUTPUT_ID, THIS_INS_ID, TRIGGER_INPUT_ID,
};
pub use validation::{validate_composite, ValidationError};
pub use wire::wire;
