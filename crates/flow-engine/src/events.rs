//! Debug event types
//!
//! Events describe what the engine is doing (values crossing pins,
//! instances entering or leaving processing, errors) so an external observer
//! can follow an execution. Transport is left to the [`EventSink`].

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::Value;

/// Trait for sending debug events
///
/// This abstracts over the transport mechanism (channel, websocket, log file)
/// so the engine does not depend on any particular observer.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be sent (e.g., channel closed)
    fn send(&self, event: DebugEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted while a flow executes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DebugEvent {
    /// A value arrived on an instance's input pin
    #[serde(rename_all = "camelCase")]
    InputChange {
        execution_id: String,
        ins_id: String,
        pin_id: String,
        value: Value,
    },

    /// An instance emitted a value on an output pin
    #[serde(rename_all = "camelCase")]
    OutputChange {
        execution_id: String,
        ins_id: String,
        pin_id: String,
        value: Value,
    },

    /// An instance entered or left the processing state
    #[serde(rename_all = "camelCase")]
    ProcessingChange {
        execution_id: String,
        ins_id: String,
        processing: bool,
    },

    /// Buffered input counts of an instance changed
    #[serde(rename_all = "camelCase")]
    InputsStateChange {
        execution_id: String,
        ins_id: String,
        inputs: HashMap<String, usize>,
    },

    /// An instance raised an error (caught or not)
    #[serde(rename_all = "camelCase")]
    Error {
        execution_id: String,
        ins_id: String,
        message: String,
    },
}

impl DebugEvent {
    /// Hierarchical path of the instance the event is about
    pub fn ins_id(&self) -> &str {
        match self {
            Self::InputChange { ins_id, .. }
            | Self::OutputChange { ins_id, .. }
            | Self::ProcessingChange { ins_id, .. }
            | Self::InputsStateChange { ins_id, .. }
            | Self::Error { ins_id, .. } => ins_id,
        }
    }
}

/// A no-op event sink that discards all events
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: DebugEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: Mutex<Vec<DebugEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<DebugEvent> {
        self.events.lock().clone()
    }

    /// Collected events about one instance path
    pub fn events_for(&self, ins_id: &str) -> Vec<DebugEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.ins_id() == ins_id)
            .cloned()
            .collect()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: DebugEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_vec_event_sink() {
        let sink = VecEventSink::new();
        sink.send(DebugEvent::ProcessingChange {
            execution_id: "exec1".to_string(),
            ins_id: "root.add".to_string(),
            processing: true,
        })
        .unwrap();
        sink.send(DebugEvent::Error {
            execution_id: "exec1".to_string(),
            ins_id: "root.other".to_string(),
            message: "boom".to_string(),
        })
        .unwrap();

        assert_eq!(sink.events().len(), 2);
        let mine = sink.events_for("root.add");
        assert_eq!(mine.len(), 1);
        match &mine[0] {
            DebugEvent::ProcessingChange { processing, .. } => assert!(*processing),
            _ => panic!("Expected ProcessingChange event"),
        }

        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_event_serialization_shape() {
        let event = DebugEvent::OutputChange {
            execution_id: "e".to_string(),
            ins_id: "root.add".to_string(),
            pin_id: "r".to_string(),
            value: json!(15),
        };
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["type"], "outputChange");
        assert_eq!(v["insId"], "root.add");
        assert_eq!(v["pinId"], "r");

        let back: DebugEvent = serde_json::from_value(v).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_null_event_sink() {
        let sink = NullEventSink;
        sink.send(DebugEvent::Error {
            execution_id: "e".to_string(),
            ins_id: "root".to_string(),
            message: "ignored".to_string(),
        })
        .unwrap();
    }
}
