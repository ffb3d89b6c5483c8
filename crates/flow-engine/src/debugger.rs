//! Debug hooks and value interception
//!
//! A [`Debugger`] observes every value crossing an instance boundary and
//! may take over delivery of it: returning an [`InterceptCommand`] from
//! `on_input`/`on_output` hands the engine a future whose output is
//! forwarded instead of the original value. This is the single extension
//! point for breakpoints and value overriding; the scheduling algorithm
//! never waits on it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::FlowError;
use crate::events::{DebugEvent, EventSink};
use crate::pins::Emitter;
use crate::types::Value;

/// A value crossing a pin of an instance
#[derive(Debug, Clone, PartialEq)]
pub struct PinEvent {
    pub execution_id: String,
    /// Hierarchical path of the instance
    pub ins_id: String,
    pub pin_id: String,
    pub value: Value,
}

/// Replacement delivery for an intercepted value
pub struct InterceptCommand {
    value: BoxFuture<'static, Value>,
}

impl InterceptCommand {
    /// Forward whatever `future` resolves to
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Value> + Send + 'static,
    {
        Self {
            value: Box::pin(future),
        }
    }

    /// Forward `value` instead of the original
    pub fn replace(value: Value) -> Self {
        Self::new(future::ready(value))
    }

    pub fn into_future(self) -> BoxFuture<'static, Value> {
        self.value
    }
}

impl std::fmt::Debug for InterceptCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("InterceptCommand")
    }
}

/// Observer of an execution. Every hook is optional.
pub trait Debugger: Send + Sync {
    /// A value is about to be delivered to an input pin
    fn on_input(&self, _event: &PinEvent) -> Option<InterceptCommand> {
        None
    }

    /// A value was emitted on an output pin and is about to be forwarded
    fn on_output(&self, _event: &PinEvent) -> Option<InterceptCommand> {
        None
    }

    fn on_processing_change(&self, _execution_id: &str, _ins_id: &str, _processing: bool) {}

    fn on_inputs_state_change(
        &self,
        _execution_id: &str,
        _ins_id: &str,
        _inputs: &HashMap<String, usize>,
    ) {
    }

    /// Called for every error, whether or not an error pin catches it
    fn on_error(&self, _execution_id: &str, _ins_id: &str, _error: &FlowError) {}

    /// Fixed delay applied to values the debugger lets through
    fn debug_delay(&self) -> Option<Duration> {
        None
    }
}

/// Debugger that reports every hook to an [`EventSink`] and never intercepts
pub struct EventSinkDebugger<S: EventSink> {
    sink: S,
    delay: Option<Duration>,
}

impl<S: EventSink> EventSinkDebugger<S> {
    pub fn new(sink: S) -> Self {
        Self { sink, delay: None }
    }

    /// Delay every pass-through value by `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn send(&self, event: DebugEvent) {
        if let Err(e) = self.sink.send(event) {
            log::warn!("Failed to send debug event: {}", e);
        }
    }
}

impl<S: EventSink> Debugger for EventSinkDebugger<S> {
    fn on_input(&self, event: &PinEvent) -> Option<InterceptCommand> {
        self.send(DebugEvent::InputChange {
            execution_id: event.execution_id.clone(),
            ins_id: event.ins_id.clone(),
            pin_id: event.pin_id.clone(),
            value: event.value.clone(),
        });
        None
    }

    fn on_output(&self, event: &PinEvent) -> Option<InterceptCommand> {
        self.send(DebugEvent::OutputChange {
            execution_id: event.execution_id.clone(),
            ins_id: event.ins_id.clone(),
            pin_id: event.pin_id.clone(),
            value: event.value.clone(),
        });
        None
    }

    fn on_processing_change(&self, execution_id: &str, ins_id: &str, processing: bool) {
        self.send(DebugEvent::ProcessingChange {
            execution_id: execution_id.to_string(),
            ins_id: ins_id.to_string(),
            processing,
        });
    }

    fn on_inputs_state_change(
        &self,
        execution_id: &str,
        ins_id: &str,
        inputs: &HashMap<String, usize>,
    ) {
        self.send(DebugEvent::InputsStateChange {
            execution_id: execution_id.to_string(),
            ins_id: ins_id.to_string(),
            inputs: inputs.clone(),
        });
    }

    fn on_error(&self, execution_id: &str, ins_id: &str, error: &FlowError) {
        self.send(DebugEvent::Error {
            execution_id: execution_id.to_string(),
            ins_id: ins_id.to_string(),
            message: error.to_string(),
        });
    }

    fn debug_delay(&self) -> Option<Duration> {
        self.delay
    }
}

/// Ordered delivery of mediated values into one pin.
///
/// Values that are ready (pass-through, or an intercept that has already
/// resolved) go straight to the target while nothing is queued. Anything
/// that has to wait (a pending intercept, a debug delay) is handed to a
/// single forwarding task on the ambient tokio runtime, and every later
/// value queues behind it, so values leave in the order they arrived.
///
/// Without a runtime a pending value cannot wait: the original value is
/// forwarded in its place.
pub(crate) struct DeliveryLane {
    target: Emitter,
    queue: Arc<Mutex<LaneQueue>>,
}

#[derive(Default)]
struct LaneQueue {
    sender: Option<mpsc::UnboundedSender<BoxFuture<'static, Value>>>,
    /// Values handed to the forwarding task and not emitted yet
    queued: usize,
}

enum Next {
    Ready(Value),
    Pending {
        future: BoxFuture<'static, Value>,
        original: Value,
    },
}

impl DeliveryLane {
    pub(crate) fn new(target: Emitter) -> Self {
        Self {
            target,
            queue: Arc::new(Mutex::new(LaneQueue::default())),
        }
    }

    pub(crate) fn deliver(
        &self,
        value: Value,
        command: Option<InterceptCommand>,
        delay: Option<Duration>,
    ) {
        let next = match command {
            Some(command) => {
                let mut intercept = command.into_future();
                match (&mut intercept).now_or_never() {
                    Some(resolved) => Next::Ready(resolved),
                    None => Next::Pending {
                        future: intercept,
                        original: value,
                    },
                }
            }
            None => match delay.filter(|d| !d.is_zero()) {
                Some(delay) => Next::Pending {
                    future: delayed(value.clone(), delay),
                    original: value,
                },
                None => Next::Ready(value),
            },
        };

        let mut queue = self.queue.lock();
        let (pending, fallback) = match next {
            Next::Ready(value) if queue.queued == 0 => {
                drop(queue);
                self.target.emit(value);
                return;
            }
            Next::Ready(value) => (future::ready(value.clone()).boxed(), value),
            Next::Pending { future, original } => (future, original),
        };
        if !self.enqueue(&mut queue, pending) {
            drop(queue);
            log::warn!("No tokio runtime to hold a mediated value; forwarding it unchanged");
            self.target.emit(fallback);
        }
    }

    /// Hand `value` to the forwarding task, starting it if needed
    fn enqueue(&self, queue: &mut LaneQueue, value: BoxFuture<'static, Value>) -> bool {
        if queue.sender.is_none() {
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                return false;
            };
            let (sender, receiver) = mpsc::unbounded_channel();
            runtime.spawn(forward(receiver, self.target.clone(), self.queue.clone()));
            queue.sender = Some(sender);
        }
        let sent = queue
            .sender
            .as_ref()
            .is_some_and(|sender| sender.send(value).is_ok());
        if sent {
            queue.queued += 1;
        } else {
            // Forwarding task is gone with its runtime
            queue.sender = None;
            queue.queued = 0;
        }
        sent
    }
}

fn delayed(value: Value, delay: Duration) -> BoxFuture<'static, Value> {
    async move {
        tokio::time::sleep(delay).await;
        value
    }
    .boxed()
}

async fn forward(
    mut receiver: mpsc::UnboundedReceiver<BoxFuture<'static, Value>>,
    target: Emitter,
    queue: Arc<Mutex<LaneQueue>>,
) {
    while let Some(next) = receiver.recv().await {
        let value = next.await;
        target.emit(value);
        let mut lane = queue.lock();
        lane.queued = lane.queued.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::VecEventSink;
    use serde_json::json;

    fn collector(target: &Emitter) -> (Arc<Mutex<Vec<Value>>>, crate::pins::Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let sub = target.subscribe(move |v| s.lock().push(v));
        (seen, sub)
    }

    fn resolved_after_yield(value: Value) -> InterceptCommand {
        InterceptCommand::new(async move {
            tokio::task::yield_now().await;
            value
        })
    }

    #[test]
    fn test_pass_through_is_synchronous() {
        let target = Emitter::new();
        let (seen, _sub) = collector(&target);
        DeliveryLane::new(target).deliver(json!(1), None, None);
        assert_eq!(*seen.lock(), vec![json!(1)]);
    }

    #[test]
    fn test_replace_resolves_to_value() {
        let command = InterceptCommand::replace(json!({"a": 1}));
        assert_eq!(tokio_test::block_on(command.into_future()), json!({"a": 1}));
    }

    #[test]
    fn test_ready_intercept_without_runtime() {
        let target = Emitter::new();
        let (seen, _sub) = collector(&target);
        let lane = DeliveryLane::new(target);
        lane.deliver(json!(1), Some(InterceptCommand::replace(json!(99))), None);
        assert_eq!(*seen.lock(), vec![json!(99)]);
    }

    #[test]
    fn test_pending_intercept_without_runtime_keeps_original() {
        let target = Emitter::new();
        let (seen, _sub) = collector(&target);
        let lane = DeliveryLane::new(target);

        let never = InterceptCommand::new(future::pending());
        lane.deliver(json!(1), Some(never), None);
        lane.deliver(json!(2), None, Some(Duration::from_secs(5)));
        assert_eq!(*seen.lock(), vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn test_intercept_resolves_later() {
        let target = Emitter::new();
        let (seen, _sub) = collector(&target);
        let lane = DeliveryLane::new(target);
        let (tx, rx) = tokio::sync::oneshot::channel::<Value>();

        let command = InterceptCommand::new(async move { rx.await.unwrap_or(Value::Null) });
        lane.deliver(json!(1), Some(command), None);
        assert!(seen.lock().is_empty());

        tx.send(json!("override")).unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(*seen.lock(), vec![json!("override")]);
    }

    #[tokio::test]
    async fn test_later_values_wait_behind_pending_intercept() {
        let target = Emitter::new();
        let (seen, _sub) = collector(&target);
        let lane = DeliveryLane::new(target);
        let (tx, rx) = tokio::sync::oneshot::channel::<Value>();

        lane.deliver(json!(1), Some(InterceptCommand::new(async move { rx.await.unwrap_or(Value::Null) })), None);
        lane.deliver(json!(2), None, None);
        lane.deliver(json!(3), Some(InterceptCommand::replace(json!(30))), None);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(seen.lock().is_empty());

        tx.send(json!(10)).unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(*seen.lock(), vec![json!(10), json!(2), json!(30)]);

        // Queue drained: pass-through is synchronous again
        lane.deliver(json!(4), None, None);
        assert_eq!(seen.lock().last(), Some(&json!(4)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_defers_delivery() {
        let target = Emitter::new();
        let (seen, _sub) = collector(&target);
        let lane = DeliveryLane::new(target);
        lane.deliver(json!(1), None, Some(Duration::from_millis(50)));
        assert!(seen.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(*seen.lock(), vec![json!(1)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mixed_intercepts_keep_order_across_workers() {
        let target = Emitter::new();
        let (seen, _sub) = collector(&target);
        let lane = DeliveryLane::new(target);

        for i in 0..2000 {
            let command = if i % 3 == 0 {
                resolved_after_yield(json!(i))
            } else {
                InterceptCommand::replace(json!(i))
            };
            lane.deliver(json!(i), Some(command), None);
        }
        for _ in 0..500 {
            if seen.lock().len() == 2000 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let expected: Vec<Value> = (0..2000).map(|i| json!(i)).collect();
        assert_eq!(*seen.lock(), expected);
    }

    #[test]
    fn test_event_sink_debugger_reports() {
        let debugger = EventSinkDebugger::new(VecEventSink::new());
        let event = PinEvent {
            execution_id: "e".to_string(),
            ins_id: "root.add".to_string(),
            pin_id: "n1".to_string(),
            value: json!(5),
        };
        assert!(debugger.on_input(&event).is_none());
        debugger.on_processing_change("e", "root.add", true);
        debugger.on_error("e", "root.add", &FlowError::failed("x"));

        let events = debugger.sink().events();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], DebugEvent::InputChange { ref pin_id, .. } if pin_id == "n1"));
        assert!(matches!(events[2], DebugEvent::Error { .. }));
    }
}
