//! Execution façade
//!
//! [`Executor`] is the public entry point: it resolves a node into runnable
//! form, installs debugger mediation on its pins, starts an
//! [`InstanceRuntime`] at the right hierarchical path and returns a single
//! idempotent [`CancelHandle`].
//!
//! # Example
//!
//! ```ignore
//! let executor = Executor::new(repository)
//!     .with_env(json!({"apiKey": "..."}))
//!     .with_error_handler(|e| eprintln!("flow failed: {e}"));
//!
//! let n1 = InputSource::queue();
//! let r = Emitter::new();
//! let cancel = executor.execute(
//!     add_node(),
//!     NodeInputs::from([("n1".into(), n1.clone()), ("n2".into(), InputSource::static_value(10))]),
//!     NodeOutputs::from([("r".into(), r.clone())]),
//! )?;
//! n1.emitter().unwrap().emit(json!(5));
//! cancel.cancel();
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::config::ExecutorConfig;
use crate::debugger::{Debugger, DeliveryLane, PinEvent};
use crate::error::{FlowError, Result};
use crate::extensions::ContextExtensions;
use crate::instance::{CancelHandle, ErrorHandler, InstanceRuntime};
use crate::pins::{Emitter, InputSource, NodeInputs, NodeOutputs, Subscription};
use crate::repository::NodeRepository;
use crate::state::ExecutionState;
use crate::types::{Node, Value};

/// Runs nodes against a repository, environment and state store.
///
/// Cloning is cheap; clones share the same store, debugger and execution id.
#[derive(Clone)]
pub struct Executor {
    repository: Arc<NodeRepository>,
    env: Arc<Value>,
    state: Arc<ExecutionState>,
    debugger: Option<Arc<dyn Debugger>>,
    on_error: ErrorHandler,
    extensions: ContextExtensions,
    config: Arc<ExecutorConfig>,
    execution_id: Arc<str>,
}

impl Executor {
    /// Create an executor with an empty environment and a fresh state store
    pub fn new(repository: impl Into<Arc<NodeRepository>>) -> Self {
        Self {
            repository: repository.into(),
            env: Arc::new(Value::Object(Default::default())),
            state: ExecutionState::new(),
            debugger: None,
            on_error: Arc::new(|error| log::error!("Unhandled flow error: {}", error)),
            extensions: ContextExtensions::new(),
            config: Arc::new(ExecutorConfig::default()),
            execution_id: uuid::Uuid::new_v4().to_string().into(),
        }
    }

    /// Set the environment map used for `$ENV.` static values
    pub fn with_env(mut self, env: Value) -> Self {
        self.env = Arc::new(env);
        self
    }

    /// Reuse an existing state store, e.g. to resume after a hot reload
    pub fn with_state(mut self, state: Arc<ExecutionState>) -> Self {
        self.state = state;
        self
    }

    /// Attach a debugger; every pin then goes through mediation
    pub fn with_debugger(mut self, debugger: Arc<dyn Debugger>) -> Self {
        self.debugger = Some(debugger);
        self
    }

    /// Set the handler receiving errors that bubble out of the root instance
    pub fn with_error_handler(mut self, handler: impl Fn(FlowError) + Send + Sync + 'static) -> Self {
        self.on_error = Arc::new(handler);
        self
    }

    /// Set the host objects available to nodes through `ctx.extensions()`
    pub fn with_extensions(mut self, extensions: ContextExtensions) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn repository(&self) -> &NodeRepository {
        &self.repository
    }

    pub fn env(&self) -> &Value {
        &self.env
    }

    pub fn state(&self) -> &Arc<ExecutionState> {
        &self.state
    }

    pub fn debugger(&self) -> Option<&Arc<dyn Debugger>> {
        self.debugger.as_ref()
    }

    pub fn extensions(&self) -> &ContextExtensions {
        &self.extensions
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Id shared by every debug event of this executor
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Execute a node as the root instance.
    ///
    /// `inputs` and `outputs` only need to contain the pins the caller
    /// actually wires. Construction errors are returned; run-time errors go
    /// to the error handler.
    pub fn execute(
        &self,
        node: impl Into<Node>,
        inputs: NodeInputs,
        outputs: NodeOutputs,
    ) -> Result<CancelHandle> {
        self.execute_at(
            node.into(),
            inputs,
            outputs,
            self.config.root_ins_id.clone(),
            self.on_error.clone(),
        )
    }

    /// Execute a node at an explicit hierarchical path
    pub(crate) fn execute_at(
        &self,
        node: Node,
        inputs: NodeInputs,
        outputs: NodeOutputs,
        path: String,
        on_bubble: ErrorHandler,
    ) -> Result<CancelHandle> {
        let leaf = node.into_runnable(&self.repository)?;

        let (inputs, outputs, mediation) = match &self.debugger {
            Some(debugger) => self.mediate(debugger, &path, inputs, outputs),
            None => (inputs, outputs, Vec::new()),
        };

        let runtime = InstanceRuntime::start(leaf, inputs, outputs, path, self.clone(), on_bubble);
        Ok(CancelHandle::new(move || {
            runtime.teardown();
            for subscription in mediation {
                subscription.unsubscribe();
            }
        }))
    }

    /// Put the debugger between the caller's pins and the runtime's pins
    fn mediate(
        &self,
        debugger: &Arc<dyn Debugger>,
        path: &str,
        inputs: NodeInputs,
        outputs: NodeOutputs,
    ) -> (NodeInputs, NodeOutputs, Vec<Subscription>) {
        let delay = debugger.debug_delay().or_else(|| self.config.debug_delay());
        let mut subscriptions = Vec::new();

        let inputs = inputs
            .into_iter()
            .map(|(pin_id, source)| match source {
                InputSource::Dynamic { emitter, mode } => {
                    let inner = Emitter::new();
                    subscriptions.push(self.mediate_pin(
                        debugger,
                        path,
                        &pin_id,
                        &emitter,
                        &inner,
                        delay,
                        PinSide::Input,
                    ));
                    (pin_id, InputSource::Dynamic { emitter: inner, mode })
                }
                fixed @ InputSource::Static(_) => (pin_id, fixed),
            })
            .collect();

        let outputs = outputs
            .into_iter()
            .map(|(pin_id, sink)| {
                let inner = Emitter::new();
                subscriptions.push(self.mediate_pin(
                    debugger,
                    path,
                    &pin_id,
                    &inner,
                    &sink,
                    delay,
                    PinSide::Output,
                ));
                (pin_id, inner)
            })
            .collect();

        (inputs, outputs, subscriptions)
    }

    #[allow(clippy::too_many_arguments)]
    fn mediate_pin(
        &self,
        debugger: &Arc<dyn Debugger>,
        path: &str,
        pin_id: &str,
        from: &Emitter,
        to: &Emitter,
        delay: Option<Duration>,
        side: PinSide,
    ) -> Subscription {
        let debugger = debugger.clone();
        let execution_id = self.execution_id.clone();
        let ins_id = path.to_string();
        let pin_id = pin_id.to_string();
        let lane = DeliveryLane::new(to.clone());
        from.subscribe(move |value| {
            let event = PinEvent {
                execution_id: execution_id.to_string(),
                ins_id: ins_id.clone(),
                pin_id: pin_id.clone(),
                value,
            };
            let command = match side {
                PinSide::Input => debugger.on_input(&event),
                PinSide::Output => debugger.on_output(&event),
            };
            lane.deliver(event.value, command, delay);
        })
    }
}

#[derive(Clone, Copy)]
enum PinSide {
    Input,
    Output,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debugger::{EventSinkDebugger, InterceptCommand};
    use crate::events::{DebugEvent, VecEventSink};
    use crate::types::{InputPin, LeafNode, OutputPin};
    use parking_lot::Mutex;
    use serde_json::json;

    fn add() -> LeafNode {
        LeafNode::new("add", |inputs, outputs, _| {
            let n1 = inputs.get("n1").and_then(Value::as_i64).unwrap_or(0);
            let n2 = inputs.get("n2").and_then(Value::as_i64).unwrap_or(0);
            outputs.emit("r", n1 + n2);
            Ok(None)
        })
        .with_input("n1", InputPin::required())
        .with_input("n2", InputPin::required())
        .with_output("r", OutputPin::new())
    }

    fn collect(emitter: &Emitter) -> Arc<Mutex<Vec<Value>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _ = emitter.subscribe(move |v| s.lock().push(v));
        seen
    }

    #[test]
    fn test_execute_leaf() {
        let executor = Executor::new(NodeRepository::new());
        let n1 = InputSource::queue();
        let r = Emitter::new();
        let seen = collect(&r);

        let cancel = executor
            .execute(
                add(),
                NodeInputs::from([
                    ("n1".to_string(), n1.clone()),
                    ("n2".to_string(), InputSource::static_value(10)),
                ]),
                NodeOutputs::from([("r".to_string(), r)]),
            )
            .unwrap();

        n1.emitter().unwrap().emit(json!(5));
        assert_eq!(*seen.lock(), vec![json!(15)]);

        cancel.cancel();
        n1.emitter().unwrap().emit(json!(1));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_execute_by_repository_id() {
        let executor = Executor::new(NodeRepository::new().with_node(add()));
        let node = executor.repository().get("add").unwrap().clone();
        assert!(executor
            .execute(node, NodeInputs::new(), NodeOutputs::new())
            .is_ok());
    }

    #[test]
    fn test_debugger_observes_pins() {
        let debugger = Arc::new(EventSinkDebugger::new(VecEventSink::new()));
        let executor = Executor::new(NodeRepository::new()).with_debugger(debugger.clone());
        let n1 = InputSource::queue();
        let r = Emitter::new();
        let seen = collect(&r);

        let _cancel = executor
            .execute(
                add(),
                NodeInputs::from([
                    ("n1".to_string(), n1.clone()),
                    ("n2".to_string(), InputSource::static_value(1)),
                ]),
                NodeOutputs::from([("r".to_string(), r)]),
            )
            .unwrap();
        n1.emitter().unwrap().emit(json!(2));

        assert_eq!(*seen.lock(), vec![json!(3)]);
        let events = debugger.sink().events_for("root");
        assert!(events
            .iter()
            .any(|e| matches!(e, DebugEvent::InputChange { pin_id, .. } if pin_id == "n1")));
        assert!(events
            .iter()
            .any(|e| matches!(e, DebugEvent::OutputChange { value, .. } if *value == json!(3))));
        assert!(events.iter().any(|e| matches!(
            e,
            DebugEvent::InputChange { execution_id, .. } if execution_id == executor.execution_id()
        )));
    }

    struct Doubler;

    impl Debugger for Doubler {
        fn on_output(&self, event: &PinEvent) -> Option<InterceptCommand> {
            let doubled = event.value.as_i64().unwrap_or(0) * 2;
            Some(InterceptCommand::replace(json!(doubled)))
        }
    }

    #[test]
    fn test_ready_intercept_replaces_value() {
        let executor = Executor::new(NodeRepository::new()).with_debugger(Arc::new(Doubler));
        let r = Emitter::new();
        let seen = collect(&r);

        let _cancel = executor
            .execute(
                add(),
                NodeInputs::from([
                    ("n1".to_string(), InputSource::static_value(2)),
                    ("n2".to_string(), InputSource::static_value(3)),
                ]),
                NodeOutputs::from([("r".to_string(), r)]),
            )
            .unwrap();

        assert_eq!(*seen.lock(), vec![json!(10)]);
    }

    #[test]
    fn test_root_error_handler() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let e = errors.clone();
        let executor = Executor::new(NodeRepository::new())
            .with_error_handler(move |err| e.lock().push(err.to_string()));

        let failing = LeafNode::new("fail", |_, _, _| Err(FlowError::failed("nope")));
        let _cancel = executor
            .execute(failing, NodeInputs::new(), NodeOutputs::new())
            .unwrap();

        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("root"));
        assert!(errors[0].contains("nope"));
    }
}
