//! Readiness predicate: may a node instance run right now?

use std::collections::HashMap;

use crate::pins::{InputSource, NodeInputs, PinStates};
use crate::state::pin_has_value;
use crate::types::{InputMode, InputPin, TRIGGER_INPUT_ID};

/// Whether a connected pin has to hold a value before the node may run
fn resolves_to_required(pin_id: &str, declared: &HashMap<String, InputPin>) -> bool {
    if pin_id == TRIGGER_INPUT_ID {
        return true;
    }
    matches!(
        declared.get(pin_id).map(|p| p.mode),
        Some(InputMode::Required | InputMode::RequiredIfConnected)
    )
}

/// Decide whether a node with the `declared` inputs is ready to execute.
///
/// `inputs` holds only the pins that are actually wired (or statically
/// configured); a required pin missing from it can never be satisfied.
pub fn is_ready(inputs: &NodeInputs, states: &PinStates, declared: &HashMap<String, InputPin>) -> bool {
    let unconnected_required = declared
        .iter()
        .any(|(pin_id, pin)| pin.mode == InputMode::Required && !inputs.contains_key(pin_id));
    if unconnected_required {
        return false;
    }

    inputs.iter().all(|(pin_id, source)| match source {
        InputSource::Static(_) => true,
        InputSource::Dynamic { .. } => {
            !resolves_to_required(pin_id, declared) || pin_has_value(states, pin_id)
        }
    })
}

/// Pins that still block the node, for diagnostics
pub fn missing_inputs(
    inputs: &NodeInputs,
    states: &PinStates,
    declared: &HashMap<String, InputPin>,
) -> Vec<String> {
    let mut missing: Vec<String> = declared
        .iter()
        .filter(|(pin_id, pin)| pin.mode == InputMode::Required && !inputs.contains_key(*pin_id))
        .map(|(pin_id, _)| pin_id.clone())
        .chain(
            inputs
                .iter()
                .filter(|(pin_id, source)| {
                    !source.is_static()
                        && resolves_to_required(pin_id, declared)
                        && !pin_has_value(states, pin_id)
                })
                .map(|(pin_id, _)| pin_id.clone()),
        )
        .collect();
    missing.sort();
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pins::{buffer_value, DeliveryMode};
    use serde_json::json;

    fn declared() -> HashMap<String, InputPin> {
        HashMap::from([
            ("n1".to_string(), InputPin::required()),
            ("n2".to_string(), InputPin::required_if_connected()),
            ("opt".to_string(), InputPin::optional()),
        ])
    }

    #[test]
    fn test_unconnected_required_pin_blocks() {
        let inputs = NodeInputs::new();
        assert!(!is_ready(&inputs, &PinStates::new(), &declared()));
        assert_eq!(missing_inputs(&inputs, &PinStates::new(), &declared()), vec!["n1"]);
    }

    #[test]
    fn test_required_if_connected_only_when_wired() {
        let mut states = PinStates::new();
        buffer_value(&mut states, "n1", json!(1), DeliveryMode::Queue);

        let only_n1 = NodeInputs::from([("n1".to_string(), InputSource::queue())]);
        assert!(is_ready(&only_n1, &states, &declared()));

        let with_n2 = NodeInputs::from([
            ("n1".to_string(), InputSource::queue()),
            ("n2".to_string(), InputSource::queue()),
        ]);
        assert!(!is_ready(&with_n2, &states, &declared()));
        assert_eq!(missing_inputs(&with_n2, &states, &declared()), vec!["n2"]);

        buffer_value(&mut states, "n2", json!(2), DeliveryMode::Queue);
        assert!(is_ready(&with_n2, &states, &declared()));
    }

    #[test]
    fn test_optional_and_static_always_satisfied() {
        let inputs = NodeInputs::from([
            ("n1".to_string(), InputSource::static_value(1)),
            ("opt".to_string(), InputSource::queue()),
        ]);
        assert!(is_ready(&inputs, &PinStates::new(), &declared()));
    }

    #[test]
    fn test_wired_trigger_is_required() {
        let inputs = NodeInputs::from([
            ("n1".to_string(), InputSource::static_value(1)),
            (TRIGGER_INPUT_ID.to_string(), InputSource::queue()),
        ]);
        let mut states = PinStates::new();
        assert!(!is_ready(&inputs, &states, &declared()));

        buffer_value(&mut states, TRIGGER_INPUT_ID, json!(true), DeliveryMode::Queue);
        assert!(is_ready(&inputs, &states, &declared()));
    }

    #[test]
    fn test_sticky_counts_as_held() {
        let inputs = NodeInputs::from([("n1".to_string(), InputSource::sticky())]);
        let mut states = PinStates::new();
        buffer_value(&mut states, "n1", json!("held"), DeliveryMode::Sticky);
        assert!(is_ready(&inputs, &states, &declared()));
    }

    #[test]
    fn test_zero_input_node_is_ready() {
        assert!(is_ready(&NodeInputs::new(), &PinStates::new(), &HashMap::new()));
    }
}
