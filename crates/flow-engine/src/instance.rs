//! Instance runtime: the lifecycle of one executing node instance
//!
//! An [`InstanceRuntime`] buffers values arriving on its input pins and runs
//! the node whenever the readiness predicate allows it. Nodes that declare
//! completion outputs stay *processing* until a completion group fires;
//! nodes without them are fire-and-forget and may run again as soon as the
//! next set of inputs is available.
//!
//! ```text
//!            ready                     completion group fired
//!   idle ───────────▶ processing ───────────────────────────▶ idle
//!    ▲                  │   ▲                                  │
//!    │                  └───┘ reactive input (re-entry)        │
//!    └─────────────── cleanups run, state cleared ◀────────────┘
//! ```
//!
//! Listeners never hold a lock while calling out (into the node, an emitter
//! or a cleanup), so nodes may emit into themselves and re-enter freely.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::json;

use crate::completion::{CompletionGroups, CompletionTracker};
use crate::error::{FlowError, Result};
use crate::execute::Executor;
use crate::extensions::ContextExtensions;
use crate::pins::{DeliveryMode, InputSource, InputValues, NodeInputs, NodeOutputs, Outputs, Subscription};
use crate::readiness;
use crate::resolver;
use crate::state::NodeStateHandle;
use crate::types::{Cleanup, LeafNode, Node, Value, ERROR_OUTPUT_ID};

/// Receiver of errors that an instance did not catch itself
pub type ErrorHandler = Arc<dyn Fn(FlowError) + Send + Sync>;

/// Idempotent cancellation of an execution.
///
/// Cloning shares the underlying action; whichever clone cancels first runs
/// it and every later call is a no-op.
#[derive(Clone)]
pub struct CancelHandle {
    action: Arc<Mutex<Option<Cleanup>>>,
}

impl CancelHandle {
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            action: Arc::new(Mutex::new(Some(Box::new(action)))),
        }
    }

    /// A handle with nothing to cancel
    pub fn noop() -> Self {
        Self {
            action: Arc::new(Mutex::new(None)),
        }
    }

    pub fn cancel(&self) {
        let action = self.action.lock().take();
        if let Some(action) = action {
            action();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.action.lock().is_none()
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// What a running node can reach besides its inputs and outputs
pub struct RunContext {
    runtime: Weak<InstanceRuntime>,
    ins_id: String,
    node_id: String,
    cycle: u64,
    state: NodeStateHandle,
    executor: Executor,
}

impl RunContext {
    /// Hierarchical path of the running instance
    pub fn ins_id(&self) -> &str {
        &self.ins_id
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Inner state of this instance, cleared when the cycle ends
    pub fn state(&self) -> &NodeStateHandle {
        &self.state
    }

    /// Register an action to run when this activation cycle ends.
    ///
    /// Runs immediately if the cycle is already over.
    pub fn on_cleanup(&self, cleanup: impl FnOnce() + Send + 'static) {
        match self.runtime.upgrade() {
            Some(runtime) => runtime.add_cleanup(self.cycle, Box::new(cleanup)),
            None => run_cleanup(&self.ins_id, Box::new(cleanup)),
        }
    }

    /// Report an error without failing the current run
    pub fn report_error(&self, error: FlowError) {
        match self.runtime.upgrade() {
            Some(runtime) => runtime.report_error(error),
            None => log::warn!(
                "Dropping error reported by torn down instance '{}': {}",
                self.ins_id,
                error
            ),
        }
    }

    /// Execute a node nested under this instance.
    ///
    /// The child runs at `<this path>.<ins_id>` with the same state store,
    /// environment, debugger and extensions. Errors it does not catch bubble
    /// into this instance.
    pub fn execute(
        &self,
        node: impl Into<Node>,
        inputs: NodeInputs,
        outputs: NodeOutputs,
        ins_id: &str,
    ) -> Result<CancelHandle> {
        let parent = self.runtime.clone();
        let parent_path = self.ins_id.clone();
        let on_bubble: ErrorHandler = Arc::new(move |error| match parent.upgrade() {
            Some(runtime) => runtime.route_error(error),
            None => log::warn!(
                "Dropping error bubbling into torn down instance '{}': {}",
                parent_path,
                error
            ),
        });
        self.executor.execute_at(
            node.into(),
            inputs,
            outputs,
            format!("{}.{}", self.ins_id, ins_id),
            on_bubble,
        )
    }

    /// Host-provided objects shared by the whole execution
    pub fn extensions(&self) -> &ContextExtensions {
        self.executor.extensions()
    }

    /// Environment used for `$ENV.` references
    pub fn env(&self) -> &Value {
        self.executor.env()
    }

    pub fn execution_id(&self) -> &str {
        self.executor.execution_id()
    }
}

#[derive(Default)]
struct CycleState {
    processing: bool,
    /// Bumped whenever an activation starts or a cycle ends
    cycle: u64,
    /// The run function is executing; further activations wait for it
    invoking: bool,
    /// Reactive pins that received a value during an invocation, in
    /// arrival order
    deferred: Vec<String>,
    last_values: InputValues,
    tracker: Option<CompletionTracker>,
    pending: Vec<Cleanup>,
}

/// One executing node instance
pub struct InstanceRuntime {
    node: LeafNode,
    inputs: NodeInputs,
    outputs: NodeOutputs,
    path: String,
    reactive: HashSet<String>,
    executor: Executor,
    on_bubble: ErrorHandler,
    cycle: Mutex<CycleState>,
    subscriptions: Mutex<Vec<Subscription>>,
    cancelled: AtomicBool,
}

impl InstanceRuntime {
    /// Create the runtime, subscribe to its pins and attempt a first run.
    ///
    /// Listeners hold the runtime alive until [`teardown`](Self::teardown).
    pub(crate) fn start(
        node: LeafNode,
        inputs: NodeInputs,
        outputs: NodeOutputs,
        path: String,
        executor: Executor,
        on_bubble: ErrorHandler,
    ) -> Arc<Self> {
        let tracker = node
            .completion_outputs
            .as_deref()
            .map(CompletionGroups::parse)
            .filter(|groups| !groups.is_empty())
            .map(CompletionTracker::new);
        let reactive = node.reactive_inputs.iter().flatten().cloned().collect();

        let runtime = Arc::new(Self {
            node,
            inputs,
            outputs,
            path,
            reactive,
            executor,
            on_bubble,
            cycle: Mutex::new(CycleState {
                tracker,
                ..Default::default()
            }),
            subscriptions: Mutex::new(Vec::new()),
            cancelled: AtomicBool::new(false),
        });

        let mut subscriptions = Vec::new();
        for (pin_id, source) in &runtime.inputs {
            if let InputSource::Dynamic { emitter, mode } = source {
                let listener = runtime.clone();
                let pin_id = pin_id.clone();
                let mode = *mode;
                subscriptions.push(emitter.subscribe(move |value| listener.receive(&pin_id, value, mode)));
            }
        }
        if runtime.cycle.lock().tracker.is_some() {
            for (pin_id, emitter) in &runtime.outputs {
                let listener = runtime.clone();
                let pin_id = pin_id.clone();
                subscriptions.push(emitter.subscribe(move |_| listener.on_output(&pin_id)));
            }
        }
        *runtime.subscriptions.lock() = subscriptions;

        log::debug!("Started instance '{}' (node '{}')", runtime.path, runtime.node.id);
        runtime.maybe_run(None);
        runtime
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_processing(&self) -> bool {
        self.cycle.lock().processing
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// A value arrived on a dynamic input pin
    fn receive(self: &Arc<Self>, pin_id: &str, value: Value, mode: DeliveryMode) {
        if self.is_cancelled() {
            return;
        }
        log::trace!("'{}' received value on '{}'", self.path, pin_id);
        let store = self.executor.state();
        store.buffer_input(&self.path, pin_id, value, mode);
        if let Some(debugger) = self.executor.debugger() {
            debugger.on_inputs_state_change(
                self.executor.execution_id(),
                &self.path,
                &store.input_counts(&self.path),
            );
        }
        self.maybe_run(Some(pin_id));
    }

    /// Run the node if it may run now
    fn maybe_run(self: &Arc<Self>, trigger: Option<&str>) {
        if self.is_cancelled() {
            return;
        }
        if self.is_processing() {
            // Non-reactive values stay buffered until the cycle ends
            if let Some(pin_id) = trigger.filter(|pin| self.reactive.contains(*pin)) {
                self.reenter(pin_id);
            }
            return;
        }
        self.activate();
    }

    /// Start activation cycles while the node is idle and ready
    fn activate(self: &Arc<Self>) {
        while self.activate_once() {}
    }

    /// Start one activation cycle. Returns whether buffered values remain
    /// that another activation could consume.
    fn activate_once(self: &Arc<Self>) -> bool {
        let store = self.executor.state();
        let (args, cycle, tracked, stale) = {
            let mut state = self.cycle.lock();
            if state.processing || state.invoking || self.is_cancelled() {
                return false;
            }
            let pulled = store.with_inputs(&self.path, |states| {
                if readiness::is_ready(&self.inputs, states, &self.node.inputs) {
                    Some(resolver::pull_many(&self.inputs, states, self.executor.env()))
                } else {
                    log::trace!(
                        "'{}' waiting on {:?}",
                        self.path,
                        readiness::missing_inputs(&self.inputs, states, &self.node.inputs)
                    );
                    None
                }
            });
            let args = match pulled {
                None => return false,
                Some(Ok(args)) => args,
                Some(Err(error)) => {
                    drop(state);
                    self.report_error(error);
                    return self.has_buffered();
                }
            };

            state.cycle += 1;
            state.invoking = true;
            state.last_values = args.clone();
            let tracked = match state.tracker.as_mut() {
                Some(tracker) => {
                    tracker.reset();
                    state.processing = true;
                    true
                }
                None => false,
            };
            (args, state.cycle, tracked, std::mem::take(&mut state.pending))
        };

        if !stale.is_empty() {
            // Previous fire-and-forget activation is over
            run_cleanups(&self.path, stale);
            store.clear_descendants(&self.path);
        }
        if let Some(debugger) = self.executor.debugger() {
            let execution_id = self.executor.execution_id();
            debugger.on_inputs_state_change(execution_id, &self.path, &store.input_counts(&self.path));
            if tracked {
                debugger.on_processing_change(execution_id, &self.path, true);
            }
        }

        log::debug!("Activating '{}' (cycle {})", self.path, cycle);
        self.invoke(args, cycle);

        if !tracked {
            store.clear_node_state(&self.path);
        }
        self.finish_invocation();
        self.has_buffered()
    }

    /// A reactive input arrived while processing: run again with the last
    /// values, overriding only that pin
    fn reenter(self: &Arc<Self>, pin_id: &str) {
        let Some(source) = self.inputs.get(pin_id) else {
            return;
        };
        let (args, cycle) = {
            let mut state = self.cycle.lock();
            if !state.processing {
                return;
            }
            if state.invoking {
                state.deferred.push(pin_id.to_string());
                return;
            }
            let pulled = self.executor.state().with_inputs(&self.path, |states| {
                resolver::pull(pin_id, source, states, self.executor.env())
            });
            match pulled {
                Ok(Some(value)) => {
                    state.last_values.insert(pin_id.to_string(), value);
                }
                Ok(None) => return,
                Err(error) => {
                    drop(state);
                    self.report_error(error);
                    return;
                }
            }
            state.invoking = true;
            (state.last_values.clone(), state.cycle)
        };

        log::debug!("Reactive re-entry of '{}' on '{}'", self.path, pin_id);
        self.invoke(args, cycle);
        self.finish_invocation();
        self.rerun_if_buffered();
    }

    /// The run function returned: replay reactive arrivals that waited on it
    fn finish_invocation(self: &Arc<Self>) {
        let deferred = {
            let mut state = self.cycle.lock();
            state.invoking = false;
            std::mem::take(&mut state.deferred)
        };
        for pin_id in deferred {
            self.maybe_run(Some(&pin_id));
        }
    }

    /// Call the node's run function for `cycle`
    fn invoke(self: &Arc<Self>, args: InputValues, cycle: u64) {
        let ctx = RunContext {
            runtime: Arc::downgrade(self),
            ins_id: self.path.clone(),
            node_id: self.node.id.clone(),
            cycle,
            state: self.executor.state().handle(self.path.clone()),
            executor: self.executor.clone(),
        };
        let outputs = Outputs::new(self.outputs.clone());
        let runner = self.node.runner();

        let result = if self.executor.config().catch_panics {
            panic::catch_unwind(AssertUnwindSafe(|| runner.run(args, &outputs, &ctx)))
                .unwrap_or_else(|payload| Err(FlowError::from_panic(payload)))
        } else {
            runner.run(args, &outputs, &ctx)
        };

        match result {
            Ok(Some(cleanup)) => self.add_cleanup(cycle, cleanup),
            Ok(None) => {}
            Err(error) => {
                self.abort_cycle(cycle);
                self.report_error(error);
            }
        }
    }

    /// Tie a cleanup to `cycle`, or run it now if that cycle is over
    fn add_cleanup(&self, cycle: u64, cleanup: Cleanup) {
        let leftover = {
            let mut state = self.cycle.lock();
            if !self.is_cancelled() && state.cycle == cycle {
                state.pending.push(cleanup);
                None
            } else {
                Some(cleanup)
            }
        };
        if let Some(cleanup) = leftover {
            run_cleanup(&self.path, cleanup);
        }
    }

    /// End a processing cycle whose run failed
    fn abort_cycle(&self, cycle: u64) {
        let pending = {
            let mut state = self.cycle.lock();
            if !state.processing || state.cycle != cycle {
                return;
            }
            state.processing = false;
            state.cycle += 1;
            std::mem::take(&mut state.pending)
        };
        self.notify_processing(false);
        run_cleanups(&self.path, pending);
        self.executor.state().clear_node_state(&self.path);
    }

    /// An output pin emitted; complete the cycle if a group is satisfied
    fn on_output(self: &Arc<Self>, pin_id: &str) {
        let pending = {
            let mut state = self.cycle.lock();
            if !state.processing || self.is_cancelled() {
                return;
            }
            let completed = state
                .tracker
                .as_mut()
                .is_some_and(|tracker| tracker.record(pin_id));
            if !completed {
                return;
            }
            state.processing = false;
            state.cycle += 1;
            std::mem::take(&mut state.pending)
        };

        log::debug!("'{}' completed on '{}'", self.path, pin_id);
        self.notify_processing(false);
        let store = self.executor.state();
        store.clear_node_state(&self.path);
        store.clear_descendants(&self.path);
        run_cleanups(&self.path, pending);
        self.rerun_if_buffered();
    }

    fn has_buffered(&self) -> bool {
        self.executor
            .state()
            .with_inputs(&self.path, |states| resolver::has_significant_values(&self.inputs, states))
    }

    fn rerun_if_buffered(self: &Arc<Self>) {
        if self.has_buffered() {
            self.maybe_run(None);
        }
    }

    fn notify_processing(&self, processing: bool) {
        if let Some(debugger) = self.executor.debugger() {
            debugger.on_processing_change(self.executor.execution_id(), &self.path, processing);
        }
    }

    /// Report an error raised by this instance
    pub(crate) fn report_error(&self, error: FlowError) {
        if let Some(debugger) = self.executor.debugger() {
            debugger.on_error(self.executor.execution_id(), &self.path, &error);
        }
        self.route_error(error);
    }

    /// Emit on the error pin if connected, otherwise bubble to the parent
    pub(crate) fn route_error(&self, error: FlowError) {
        match self.outputs.get(ERROR_OUTPUT_ID) {
            Some(emitter) => {
                log::debug!("'{}' caught error on its error pin: {}", self.path, error);
                emitter.emit(json!({
                    "message": error.to_string(),
                    "insId": error.instance_path().unwrap_or(self.path.as_str()),
                }));
            }
            None => (self.on_bubble)(error.in_instance(&self.path, &self.node.id)),
        }
    }

    /// Stop reacting to inputs, run outstanding cleanups and release every
    /// subscription. Idempotent.
    pub(crate) fn teardown(&self) {
        let (pending, was_processing) = {
            let mut state = self.cycle.lock();
            if self.cancelled.swap(true, Ordering::SeqCst) {
                return;
            }
            let was_processing = std::mem::replace(&mut state.processing, false);
            (std::mem::take(&mut state.pending), was_processing)
        };

        log::debug!("Tearing down instance '{}'", self.path);
        if was_processing {
            self.notify_processing(false);
        }
        run_cleanups(&self.path, pending);
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
    }
}

fn run_cleanups(path: &str, cleanups: Vec<Cleanup>) {
    for cleanup in cleanups {
        run_cleanup(path, cleanup);
    }
}

/// Run a node cleanup. Panics are logged, never propagated.
fn run_cleanup(path: &str, cleanup: Cleanup) {
    if panic::catch_unwind(AssertUnwindSafe(cleanup)).is_err() {
        log::warn!("Cleanup of instance '{}' panicked", path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pins::Emitter;
    use crate::repository::NodeRepository;
    use crate::state::ExecutionState;
    use crate::types::{InputPin, OutputPin};
    use std::sync::atomic::AtomicUsize;

    fn collect(emitter: &Emitter) -> Arc<Mutex<Vec<Value>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        // Listener lives as long as the emitter
        let _ = emitter.subscribe(move |v| s.lock().push(v));
        seen
    }

    fn start(node: LeafNode, inputs: NodeInputs, outputs: NodeOutputs) -> Arc<InstanceRuntime> {
        let executor = Executor::new(NodeRepository::new());
        let on_bubble: ErrorHandler = Arc::new(|e| panic!("unexpected error: {}", e));
        InstanceRuntime::start(node, inputs, outputs, "root".to_string(), executor, on_bubble)
    }

    fn echo() -> LeafNode {
        LeafNode::new("echo", |inputs, outputs, _| {
            outputs.emit("r", inputs.get("v").cloned().unwrap_or_default());
            Ok(None)
        })
        .with_input("v", InputPin::required())
        .with_output("r", OutputPin::new())
    }

    #[test]
    fn test_cancel_handle_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handle = CancelHandle::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let other = handle.clone();

        handle.cancel();
        other.cancel();
        handle.cancel();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(other.is_cancelled());
        assert!(CancelHandle::noop().is_cancelled());
    }

    #[test]
    fn test_fire_and_forget_runs_per_value() {
        let input = InputSource::queue();
        let out = Emitter::new();
        let seen = collect(&out);
        let runtime = start(
            echo(),
            NodeInputs::from([("v".to_string(), input.clone())]),
            NodeOutputs::from([("r".to_string(), out)]),
        );

        let emitter = input.emitter().unwrap();
        emitter.emit(json!(1));
        emitter.emit(json!(2));
        assert_eq!(*seen.lock(), vec![json!(1), json!(2)]);
        assert!(!runtime.is_processing());
        runtime.teardown();
    }

    #[test]
    fn test_completion_holds_buffered_values() {
        let late: Arc<Mutex<Option<Outputs>>> = Arc::new(Mutex::new(None));
        let keep = late.clone();
        let node = LeafNode::new("slow", move |_, outputs, _| {
            *keep.lock() = Some(outputs.clone());
            Ok(None)
        })
        .with_input("v", InputPin::required())
        .with_output("done", OutputPin::new())
        .with_completion_outputs(["done"]);

        let input = InputSource::queue();
        let runtime = start(
            node,
            NodeInputs::from([("v".to_string(), input.clone())]),
            NodeOutputs::from([("done".to_string(), Emitter::new())]),
        );
        let emitter = input.emitter().unwrap();

        emitter.emit(json!(1));
        assert!(runtime.is_processing());
        emitter.emit(json!(2));
        assert_eq!(runtime.executor.state().input_counts("root")["v"], 1);

        // Completing starts the buffered activation straight away
        let outputs = late.lock().take().unwrap();
        outputs.emit("done", true);
        assert!(runtime.is_processing());
        assert!(runtime.executor.state().input_counts("root").is_empty());
        runtime.teardown();
        assert!(!runtime.is_processing());
    }

    #[test]
    fn test_env_failure_consumes_inputs() {
        let errors = Arc::new(AtomicUsize::new(0));
        let e = errors.clone();
        let on_bubble: ErrorHandler = Arc::new(move |error| {
            assert!(matches!(error.root_cause(), FlowError::MissingEnvValue(_)));
            e.fetch_add(1, Ordering::SeqCst);
        });
        let input = InputSource::queue();
        let runtime = InstanceRuntime::start(
            echo().with_input("e", InputPin::required()),
            NodeInputs::from([
                ("v".to_string(), input.clone()),
                ("e".to_string(), InputSource::static_value("$ENV.missing")),
            ]),
            NodeOutputs::new(),
            "root".to_string(),
            Executor::new(NodeRepository::new()),
            on_bubble,
        );

        let emitter = input.emitter().unwrap();
        for i in 0..100 {
            emitter.emit(json!(i));
        }
        assert_eq!(errors.load(Ordering::SeqCst), 100);
        assert!(runtime.executor.state().input_counts("root").is_empty());
        runtime.teardown();
    }

    #[test]
    fn test_self_emission_waits_for_current_run() {
        let input = InputSource::queue();
        let depth = Arc::new(AtomicUsize::new(0));
        let deepest = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (d, m, s) = (depth.clone(), deepest.clone(), seen.clone());
        let node = LeafNode::new("countdown", move |inputs, outputs, _| {
            let now = d.fetch_add(1, Ordering::SeqCst) + 1;
            m.fetch_max(now, Ordering::SeqCst);
            let n = inputs["n"].as_i64().unwrap_or(0);
            if n > 0 {
                outputs.emit("next", n - 1);
            }
            s.lock().push(n);
            d.fetch_sub(1, Ordering::SeqCst);
            Ok(None)
        })
        .with_input("n", InputPin::required())
        .with_output("next", OutputPin::new());

        let emitter = input.emitter().unwrap().clone();
        let runtime = start(
            node,
            NodeInputs::from([("n".to_string(), input.clone())]),
            NodeOutputs::from([("next".to_string(), emitter.clone())]),
        );
        emitter.emit(json!(3));

        assert_eq!(*seen.lock(), vec![3, 2, 1, 0]);
        assert_eq!(deepest.load(Ordering::SeqCst), 1);
        runtime.teardown();
    }

    #[test]
    fn test_cleanup_runs_on_teardown_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let node = LeafNode::new("timer", move |_, _, ctx| {
            let c = c.clone();
            ctx.on_cleanup(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
            Ok(None)
        });

        let runtime = start(node, NodeInputs::new(), NodeOutputs::new());
        runtime.teardown();
        runtime.teardown();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
