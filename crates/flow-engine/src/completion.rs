//! Completion-output groups
//!
//! A node declares completion outputs as a list of expressions such as
//! `["a+b", "c"]`. Each expression is an AND-group (`+` joins pins that must
//! all fire); the groups are OR'd, so any fully satisfied group ends the
//! activation cycle.

use std::collections::HashSet;

/// Parsed completion groups of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionGroups {
    groups: Vec<Vec<String>>,
}

impl CompletionGroups {
    /// Parse completion expressions. Empty expressions are ignored.
    pub fn parse<S: AsRef<str>>(expressions: &[S]) -> Self {
        let groups = expressions
            .iter()
            .map(|expr| {
                expr.as_ref()
                    .split('+')
                    .map(str::trim)
                    .filter(|pin| !pin.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|group| !group.is_empty())
            .collect();
        Self { groups }
    }

    /// Every pin mentioned by any group
    pub fn pins(&self) -> HashSet<&str> {
        self.groups
            .iter()
            .flat_map(|g| g.iter().map(String::as_str))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Whether any group is fully contained in `fired`
    pub fn is_satisfied(&self, fired: &HashSet<String>) -> bool {
        self.groups
            .iter()
            .any(|group| group.iter().all(|pin| fired.contains(pin)))
    }
}

/// Tracks the first emission per output pin within one activation cycle
#[derive(Debug, Clone)]
pub struct CompletionTracker {
    groups: CompletionGroups,
    fired: HashSet<String>,
}

impl CompletionTracker {
    pub fn new(groups: CompletionGroups) -> Self {
        Self {
            groups,
            fired: HashSet::new(),
        }
    }

    /// Record an emission. Returns `true` only for the emission that
    /// completes the cycle; repeated emissions of a pin are no-ops.
    pub fn record(&mut self, pin_id: &str) -> bool {
        if !self.groups.pins().contains(pin_id) {
            return false;
        }
        if !self.fired.insert(pin_id.to_string()) {
            return false;
        }
        self.groups.is_satisfied(&self.fired)
    }

    /// Start a fresh cycle
    pub fn reset(&mut self) {
        self.fired.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> CompletionTracker {
        CompletionTracker::new(CompletionGroups::parse(&["a+b", "c"]))
    }

    #[test]
    fn test_single_pin_group_completes() {
        let mut t = tracker();
        assert!(t.record("c"));
    }

    #[test]
    fn test_partial_group_does_not_complete() {
        let mut t = tracker();
        assert!(!t.record("a"));
        assert!(!t.record("a"));
    }

    #[test]
    fn test_full_and_group_completes() {
        let mut t = tracker();
        assert!(!t.record("a"));
        assert!(t.record("b"));
    }

    #[test]
    fn test_repeat_after_completion_is_noop() {
        let mut t = tracker();
        assert!(!t.record("a"));
        assert!(t.record("b"));
        assert!(!t.record("b"));
        t.reset();
        assert!(!t.record("b"));
        assert!(t.record("a"));
    }

    #[test]
    fn test_unrelated_pins_ignored() {
        let mut t = tracker();
        assert!(!t.record("zzz"));
    }

    #[test]
    fn test_parse_trims_and_drops_empty() {
        let groups = CompletionGroups::parse(&[" a + b ", "", "+"]);
        assert_eq!(groups.pins(), HashSet::from(["a", "b"]));
        assert!(!CompletionGroups::parse::<&str>(&[]).is_satisfied(&HashSet::new()));
        assert!(CompletionGroups::parse(&[""]).is_empty());
    }
}
