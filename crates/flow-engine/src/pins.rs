//! Pin primitives: emitters, input sources and buffered pin state
//!
//! An [`Emitter`] is a small synchronous multicast channel. Emitting a value
//! calls every current listener on the caller's stack, which is what makes
//! the engine push-driven: a value arriving on a pin immediately runs
//! whatever work it makes eligible.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::Value;

type Listener = Arc<dyn Fn(Value) + Send + Sync>;

struct EmitterInner {
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

/// Multicast value channel used for every input and output pin
#[derive(Clone)]
pub struct Emitter {
    inner: Arc<EmitterInner>,
}

impl Emitter {
    /// Create an emitter with no listeners
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EmitterInner {
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Register a listener, called for every value emitted after this point
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        Subscription {
            emitter: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Deliver a value to every listener.
    ///
    /// The listener list is snapshotted first; listeners may subscribe or
    /// unsubscribe (or emit again) while the value is being delivered.
    pub fn emit(&self, value: Value) {
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(value.clone());
        }
    }

    /// Number of active listeners
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Handle to a listener registered on an [`Emitter`]
#[must_use = "a subscription must be kept to be able to unsubscribe"]
pub struct Subscription {
    emitter: Weak<EmitterInner>,
    id: u64,
}

impl Subscription {
    /// Remove the listener. A no-op if the emitter is already gone.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.emitter.upgrade() {
            inner.listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// How values arriving on a dynamic input are buffered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// FIFO buffer, one value consumed per activation
    #[default]
    Queue,
    /// Last value retained and reused until replaced
    Sticky,
}

/// A concrete input handed to an executing node instance
#[derive(Debug, Clone)]
pub enum InputSource {
    /// Values pushed at runtime through an emitter
    Dynamic { emitter: Emitter, mode: DeliveryMode },
    /// A fixed value (possibly an `$ENV.` reference), never consumed
    Static(Value),
}

impl InputSource {
    /// A fresh queue-mode input
    pub fn queue() -> Self {
        Self::Dynamic {
            emitter: Emitter::new(),
            mode: DeliveryMode::Queue,
        }
    }

    /// A fresh sticky-mode input
    pub fn sticky() -> Self {
        Self::Dynamic {
            emitter: Emitter::new(),
            mode: DeliveryMode::Sticky,
        }
    }

    /// A static input
    pub fn static_value(value: impl Into<Value>) -> Self {
        Self::Static(value.into())
    }

    /// The emitter feeding this input, if dynamic
    pub fn emitter(&self) -> Option<&Emitter> {
        match self {
            Self::Dynamic { emitter, .. } => Some(emitter),
            Self::Static(_) => None,
        }
    }

    /// Delivery mode, if dynamic
    pub fn mode(&self) -> Option<DeliveryMode> {
        match self {
            Self::Dynamic { mode, .. } => Some(*mode),
            Self::Static(_) => None,
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self, Self::Static(_))
    }
}

/// Input sources of one instance, keyed by pin id
pub type NodeInputs = HashMap<String, InputSource>;

/// Output sinks of one instance, keyed by pin id
pub type NodeOutputs = HashMap<String, Emitter>;

/// Resolved argument set for one activation
pub type InputValues = HashMap<String, Value>;

/// Output emitters handed to a running node
#[derive(Debug, Clone, Default)]
pub struct Outputs {
    pins: NodeOutputs,
}

impl Outputs {
    pub fn new(pins: NodeOutputs) -> Self {
        Self { pins }
    }

    /// Emit a value on an output pin.
    ///
    /// Pins the caller did not provide a sink for are skipped.
    pub fn emit(&self, pin_id: &str, value: impl Into<Value>) {
        match self.pins.get(pin_id) {
            Some(emitter) => emitter.emit(value.into()),
            None => log::trace!("Dropping emission on unbound output '{}'", pin_id),
        }
    }

    pub fn get(&self, pin_id: &str) -> Option<&Emitter> {
        self.pins.get(pin_id)
    }

    pub fn contains(&self, pin_id: &str) -> bool {
        self.pins.contains_key(pin_id)
    }

    pub fn pin_ids(&self) -> impl Iterator<Item = &str> {
        self.pins.keys().map(|k| k.as_str())
    }
}

/// Buffered state of one dynamic input pin
#[derive(Debug, Clone, PartialEq)]
pub enum PinState {
    /// Values waiting to be consumed, oldest first
    Queue(VecDeque<Value>),
    /// The last value set on a sticky pin
    Sticky(Value),
}

impl PinState {
    /// Whether the pin currently offers a value
    pub fn has_value(&self) -> bool {
        match self {
            Self::Queue(values) => !values.is_empty(),
            Self::Sticky(_) => true,
        }
    }

    /// Number of values available (a sticky pin always has one)
    pub fn len(&self) -> usize {
        match self {
            Self::Queue(values) => values.len(),
            Self::Sticky(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.has_value()
    }
}

/// Buffered state of every dynamic input of one instance
pub type PinStates = HashMap<String, PinState>;

/// Record a value arriving on a dynamic pin
pub fn buffer_value(states: &mut PinStates, pin_id: &str, value: Value, mode: DeliveryMode) {
    match mode {
        DeliveryMode::Sticky => {
            states.insert(pin_id.to_string(), PinState::Sticky(value));
        }
        DeliveryMode::Queue => match states.get_mut(pin_id) {
            Some(PinState::Queue(values)) => values.push_back(value),
            _ => {
                states.insert(pin_id.to_string(), PinState::Queue(VecDeque::from([value])));
            }
        },
    }
}
