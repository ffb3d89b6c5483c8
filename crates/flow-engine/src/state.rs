//! Execution state store
//!
//! Every instance runtime keeps two pieces of state, both keyed by the
//! instance's hierarchical path (`root.wrapper.add`):
//!
//! - **inner state**: the key/value map a node sees as `ctx.state()`
//! - **inputs state**: the buffered values of its dynamic input pins
//!
//! One store is created per top-level execution and handed down the whole
//! call tree. Passing the same store to a later execution keeps the state,
//! which is how hot reload resumes where the previous run left off.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::pins::{buffer_value, DeliveryMode, PinState, PinStates};
use crate::types::Value;

/// Key/value state of one instance
pub type NodeState = HashMap<String, Value>;

/// Shared store of inner and inputs state for every instance of an execution
#[derive(Debug, Default)]
pub struct ExecutionState {
    inner: Mutex<HashMap<String, NodeState>>,
    inputs: Mutex<HashMap<String, PinStates>>,
}

impl ExecutionState {
    /// Create an empty store
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Handle to the inner state of the instance at `path`
    pub fn handle(self: &Arc<Self>, path: impl Into<String>) -> NodeStateHandle {
        NodeStateHandle {
            store: self.clone(),
            path: path.into(),
        }
    }

    /// Buffer a value arriving on a dynamic pin of the instance at `path`
    pub fn buffer_input(&self, path: &str, pin_id: &str, value: Value, mode: DeliveryMode) {
        let mut inputs = self.inputs.lock();
        let states = inputs.entry(path.to_string()).or_default();
        buffer_value(states, pin_id, value, mode);
    }

    /// Run `f` with exclusive access to the inputs state at `path`
    pub fn with_inputs<R>(&self, path: &str, f: impl FnOnce(&mut PinStates) -> R) -> R {
        let mut inputs = self.inputs.lock();
        let states = inputs.entry(path.to_string()).or_default();
        f(states)
    }

    /// Number of buffered values per pin at `path`
    pub fn input_counts(&self, path: &str) -> HashMap<String, usize> {
        self.inputs
            .lock()
            .get(path)
            .map(|states| {
                states
                    .iter()
                    .map(|(pin, state)| (pin.clone(), state.len()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Copy of the inner state at `path`
    pub fn node_state(&self, path: &str) -> NodeState {
        self.inner.lock().get(path).cloned().unwrap_or_default()
    }

    /// Drop the inner state at `path`
    pub fn clear_node_state(&self, path: &str) {
        self.inner.lock().remove(path);
    }

    /// Drop inner and inputs state of every instance nested under `path`.
    ///
    /// The instance at `path` itself is untouched.
    pub fn clear_descendants(&self, path: &str) {
        let prefix = format!("{}.", path);
        self.inner.lock().retain(|key, _| !key.starts_with(&prefix));
        self.inputs.lock().retain(|key, _| !key.starts_with(&prefix));
    }

    /// Drop everything
    pub fn clear(&self) {
        self.inner.lock().clear();
        self.inputs.lock().clear();
    }
}

/// Mutable handle to one instance's inner state
#[derive(Debug, Clone)]
pub struct NodeStateHandle {
    store: Arc<ExecutionState>,
    path: String,
}

impl NodeStateHandle {
    pub fn get(&self, key: &str) -> Option<Value> {
        self.store
            .inner
            .lock()
            .get(&self.path)
            .and_then(|state| state.get(key).cloned())
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.store
            .inner
            .lock()
            .entry(self.path.clone())
            .or_default()
            .insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.store
            .inner
            .lock()
            .get_mut(&self.path)
            .and_then(|state| state.remove(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.store
            .inner
            .lock()
            .get(&self.path)
            .is_some_and(|state| state.contains_key(key))
    }

    /// Update a value in place, inserting `Null` first if absent
    pub fn update<R>(&self, key: &str, f: impl FnOnce(&mut Value) -> R) -> R {
        let mut inner = self.store.inner.lock();
        let slot = inner
            .entry(self.path.clone())
            .or_default()
            .entry(key.to_string())
            .or_insert(Value::Null);
        f(slot)
    }

    pub fn clear(&self) {
        self.store.clear_node_state(&self.path);
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Whether a pin at `path` currently has buffered values
pub(crate) fn pin_has_value(states: &PinStates, pin_id: &str) -> bool {
    states.get(pin_id).is_some_and(PinState::has_value)
}
