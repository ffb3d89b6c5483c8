//! Value resolution for input pins
//!
//! `peek` reports what a pin would deliver without consuming it; `pull`
//! consumes it. Only queue pins are ever consumed: sticky pins keep their
//! value and static pins never touch the inputs state at all.

use std::collections::HashMap;

use crate::error::{FlowError, Result};
use crate::pins::{InputSource, InputValues, NodeInputs, PinState, PinStates};
use crate::types::{Value, ENV_PREFIX, TRIGGER_INPUT_ID};

/// Resolve a configured static value against the environment.
///
/// Strings of the form `$ENV.a.b.c` are looked up by dotted path; anything
/// else is returned unchanged.
pub fn resolve_static(value: &Value, env: &Value) -> Result<Value> {
    match value.as_str().and_then(|s| s.strip_prefix(ENV_PREFIX)) {
        Some(path) => lookup_env(env, path)
            .cloned()
            .ok_or_else(|| FlowError::MissingEnvValue(format!("{}{}", ENV_PREFIX, path))),
        None => Ok(value.clone()),
    }
}

/// Look up a dotted path inside a nested environment map
pub fn lookup_env<'a>(env: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(env, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Value a pin offers right now, without consuming it
pub fn peek(
    pin_id: &str,
    source: &InputSource,
    states: &PinStates,
    env: &Value,
) -> Result<Option<Value>> {
    match source {
        InputSource::Static(value) => resolve_static(value, env).map(Some),
        InputSource::Dynamic { .. } => Ok(match states.get(pin_id) {
            Some(PinState::Queue(values)) => values.front().cloned(),
            Some(PinState::Sticky(value)) => Some(value.clone()),
            None => None,
        }),
    }
}

/// Value a pin offers right now, consuming it from a queue
pub fn pull(
    pin_id: &str,
    source: &InputSource,
    states: &mut PinStates,
    env: &Value,
) -> Result<Option<Value>> {
    match source {
        InputSource::Static(value) => resolve_static(value, env).map(Some),
        InputSource::Dynamic { .. } => {
            let (value, drained) = match states.get_mut(pin_id) {
                Some(PinState::Queue(values)) => {
                    let value = values.pop_front();
                    (value, values.is_empty())
                }
                Some(PinState::Sticky(value)) => (Some(value.clone()), false),
                None => (None, false),
            };
            if drained {
                states.remove(pin_id);
            }
            Ok(value)
        }
    }
}

/// Peek every input of a node into one argument set
pub fn peek_many(inputs: &NodeInputs, states: &PinStates, env: &Value) -> Result<InputValues> {
    let mut values = HashMap::new();
    for (pin_id, source) in inputs {
        if let Some(value) = peek(pin_id, source, states, env)? {
            values.insert(pin_id.clone(), value);
        }
    }
    Ok(values)
}

/// Pull every input of a node into one activation's argument set.
///
/// The trigger pin is consumed like any queue pin but is not handed to the
/// node. Dynamic pins are consumed before statics are resolved, so an
/// activation that fails on a missing environment value still takes its
/// share of the buffered values.
pub fn pull_many(inputs: &NodeInputs, states: &mut PinStates, env: &Value) -> Result<InputValues> {
    let mut values = HashMap::new();
    for (pin_id, source) in inputs.iter().filter(|(_, source)| !source.is_static()) {
        let Some(value) = pull(pin_id, source, states, env)? else {
            continue;
        };
        if pin_id != TRIGGER_INPUT_ID {
            values.insert(pin_id.clone(), value);
        }
    }
    for (pin_id, source) in inputs {
        if let InputSource::Static(value) = source {
            values.insert(pin_id.clone(), resolve_static(value, env)?);
        }
    }
    Ok(values)
}

/// Whether any queue pin still has buffered values.
///
/// Used after a cycle ends to decide whether the node should immediately
/// try to run again.
pub fn has_significant_values(inputs: &NodeInputs, states: &PinStates) -> bool {
    inputs.iter().any(|(pin_id, source)| {
        matches!(source, InputSource::Dynamic { .. })
            && matches!(states.get(pin_id), Some(PinState::Queue(values)) if !values.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pins::{buffer_value, DeliveryMode};
    use serde_json::json;

    fn env() -> Value {
        json!({"myObj": {"student": {"name": "Albert"}}, "list": [10, 20]})
    }

    #[test]
    fn test_resolve_env_reference() {
        let v = resolve_static(&json!("$ENV.myObj.student.name"), &env()).unwrap();
        assert_eq!(v, json!("Albert"));

        let v = resolve_static(&json!("$ENV.list.1"), &env()).unwrap();
        assert_eq!(v, json!(20));

        let v = resolve_static(&json!("plain"), &env()).unwrap();
        assert_eq!(v, json!("plain"));
    }

    #[test]
    fn test_missing_env_value() {
        let err = resolve_static(&json!("$ENV.myObj.student.name"), &json!({})).unwrap_err();
        assert!(matches!(err, FlowError::MissingEnvValue(ref p) if p == "$ENV.myObj.student.name"));

        assert!(lookup_env(&env(), "").is_none());
        assert!(lookup_env(&env(), "myObj.nope").is_none());
    }

    #[test]
    fn test_queue_pull_is_fifo() {
        let inputs = NodeInputs::from([("q".to_string(), InputSource::queue())]);
        let mut states = PinStates::new();
        for i in 1..=3 {
            buffer_value(&mut states, "q", json!(i), DeliveryMode::Queue);
        }

        let source = &inputs["q"];
        assert_eq!(peek("q", source, &states, &Value::Null).unwrap(), Some(json!(1)));
        assert_eq!(pull("q", source, &mut states, &Value::Null).unwrap(), Some(json!(1)));
        assert_eq!(pull("q", source, &mut states, &Value::Null).unwrap(), Some(json!(2)));
        assert!(has_significant_values(&inputs, &states));
        assert_eq!(pull("q", source, &mut states, &Value::Null).unwrap(), Some(json!(3)));
        assert_eq!(pull("q", source, &mut states, &Value::Null).unwrap(), None);
        assert!(!has_significant_values(&inputs, &states));
    }

    #[test]
    fn test_sticky_never_empties() {
        let source = InputSource::sticky();
        let mut states = PinStates::new();
        buffer_value(&mut states, "s", json!("v"), DeliveryMode::Sticky);

        for _ in 0..3 {
            assert_eq!(pull("s", &source, &mut states, &Value::Null).unwrap(), Some(json!("v")));
        }
        let inputs = NodeInputs::from([("s".to_string(), source)]);
        assert!(!has_significant_values(&inputs, &states));
    }

    #[test]
    fn test_static_does_not_touch_state() {
        let source = InputSource::static_value(json!(7));
        let mut states = PinStates::new();
        assert_eq!(pull("c", &source, &mut states, &Value::Null).unwrap(), Some(json!(7)));
        assert!(states.is_empty());
    }

    #[test]
    fn test_pull_many_skips_trigger() {
        let inputs = NodeInputs::from([
            ("q".to_string(), InputSource::queue()),
            (TRIGGER_INPUT_ID.to_string(), InputSource::queue()),
            ("e".to_string(), InputSource::static_value("$ENV.present")),
        ]);
        let mut states = PinStates::new();
        buffer_value(&mut states, "q", json!(1), DeliveryMode::Queue);
        buffer_value(&mut states, TRIGGER_INPUT_ID, json!(true), DeliveryMode::Queue);

        let values = pull_many(&inputs, &mut states, &json!({"present": 5})).unwrap();
        assert_eq!(values.get("q"), Some(&json!(1)));
        assert_eq!(values.get("e"), Some(&json!(5)));
        assert!(!values.contains_key(TRIGGER_INPUT_ID));
        assert!(states.is_empty());
    }

    #[test]
    fn test_pull_many_consumes_queues_on_env_error() {
        let inputs = NodeInputs::from([
            ("q".to_string(), InputSource::queue()),
            ("s".to_string(), InputSource::sticky()),
            ("e".to_string(), InputSource::static_value("$ENV.missing")),
        ]);
        let mut states = PinStates::new();
        buffer_value(&mut states, "q", json!(1), DeliveryMode::Queue);
        buffer_value(&mut states, "q", json!(2), DeliveryMode::Queue);
        buffer_value(&mut states, "s", json!("keep"), DeliveryMode::Sticky);

        let err = pull_many(&inputs, &mut states, &json!({})).unwrap_err();
        assert!(matches!(err, FlowError::MissingEnvValue(_)));
        assert_eq!(states["q"].len(), 1);
        assert!(states.contains_key("s"));

        assert!(pull_many(&inputs, &mut states, &json!({})).is_err());
        assert!(!states.contains_key("q"));
    }

    #[test]
    fn test_peek_many_is_non_destructive() {
        let inputs = NodeInputs::from([("q".to_string(), InputSource::queue())]);
        let mut states = PinStates::new();
        buffer_value(&mut states, "q", json!(1), DeliveryMode::Queue);

        let first = peek_many(&inputs, &states, &Value::Null).unwrap();
        let second = peek_many(&inputs, &states, &Value::Null).unwrap();
        assert_eq!(first, second);
        assert_eq!(states["q"].len(), 1);
    }
}
