use crate::error::{EvolutionError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

pub type MachineId = String;
pub type StateName = String;

/// Separator used in `transition_conditions` keys, e.g. `"A->B"`.
pub const EDGE_SEPARATOR: &str = "->";

/// A single requirement on event data for an edge to fire.
///
/// Serialized as `"present"` or `{"min": 5.0}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    /// The key must be present (and not null) in the event data.
    Present,
    /// The key must be present, numeric, and `>=` the threshold.
    Min(f64),
}

/// Required event keys for one edge. Every entry must hold.
pub type ConditionSpec = BTreeMap<String, Requirement>;

/// Immutable configuration shared by every entity bound to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMachineDefinition {
    pub id: MachineId,
    pub name: String,
    #[serde(default)]
    pub category: String,
    pub states: Vec<StateName>,
    /// Candidate targets per state. Declaration order is priority order.
    #[serde(default)]
    pub transitions: BTreeMap<StateName, Vec<StateName>>,
    pub initial_state: StateName,
    #[serde(default)]
    pub terminal_states: BTreeSet<StateName>,
    /// Keyed by `"from->to"`. Edges without an entry are unconditional.
    #[serde(default)]
    pub transition_conditions: BTreeMap<String, ConditionSpec>,
    /// Level multiplier applied when entering a state. Missing states use 1.
    #[serde(default)]
    pub state_multipliers: BTreeMap<StateName, Decimal>,
    /// Dimension tags an entity carries while in a state.
    #[serde(default)]
    pub state_dimensions: BTreeMap<StateName, BTreeSet<String>>,
}

pub fn condition_key(from: &str, to: &str) -> String {
    format!("{from}{EDGE_SEPARATOR}{to}")
}

impl StateMachineDefinition {
    /// Checks every structural rule a definition must satisfy before it can be
    /// registered.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(invalid("machine id must not be empty".to_string()));
        }
        if self.states.is_empty() {
            return Err(invalid(format!("machine '{}' declares no states", self.id)));
        }

        let mut seen = HashSet::new();
        for state in &self.states {
            if !seen.insert(state.as_str()) {
                return Err(invalid(format!(
                    "machine '{}' declares state '{}' twice",
                    self.id, state
                )));
            }
        }

        if !self.has_state(&self.initial_state) {
            return Err(invalid(format!(
                "initial state '{}' is not a declared state",
                self.initial_state
            )));
        }

        for (from, targets) in &self.transitions {
            if !self.has_state(from) {
                return Err(invalid(format!(
                    "transition source '{from}' is not a declared state"
                )));
            }
            if let Some(target) = targets.iter().find(|t| !self.has_state(t)) {
                return Err(invalid(format!(
                    "transition target '{target}' (from '{from}') is not a declared state"
                )));
            }
        }

        for terminal in &self.terminal_states {
            if !self.has_state(terminal) {
                return Err(invalid(format!(
                    "terminal state '{terminal}' is not a declared state"
                )));
            }
            if !self.candidates(terminal).is_empty() {
                return Err(invalid(format!(
                    "terminal state '{terminal}' has outgoing transitions"
                )));
            }
        }

        for (key, spec) in &self.transition_conditions {
            let (from, to) = key
                .split_once(EDGE_SEPARATOR)
                .ok_or_else(|| invalid(format!("condition key '{key}' is not of the form 'from->to'")))?;
            if !self.has_edge(from, to) {
                return Err(invalid(format!(
                    "condition '{key}' references an undeclared edge"
                )));
            }
            for (field, requirement) in spec {
                if let Requirement::Min(threshold) = requirement
                    && !threshold.is_finite()
                {
                    return Err(invalid(format!(
                        "condition '{key}' has a non-finite threshold for '{field}'"
                    )));
                }
            }
        }

        for (state, multiplier) in &self.state_multipliers {
            if !self.has_state(state) {
                return Err(invalid(format!(
                    "multiplier declared for unknown state '{state}'"
                )));
            }
            if *multiplier <= Decimal::ZERO {
                return Err(invalid(format!(
                    "multiplier for state '{state}' must be positive"
                )));
            }
        }

        if let Some(state) = self.state_dimensions.keys().find(|s| !self.has_state(s)) {
            return Err(invalid(format!(
                "dimensions declared for unknown state '{state}'"
            )));
        }

        Ok(())
    }

    pub fn has_state(&self, state: &str) -> bool {
        self.states.iter().any(|s| s == state)
    }

    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.candidates(from).iter().any(|t| t == to)
    }

    /// Candidate targets of `state`, in priority order.
    pub fn candidates(&self, state: &str) -> &[StateName] {
        self.transitions
            .get(state)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn is_terminal(&self, state: &str) -> bool {
        self.terminal_states.contains(state)
    }

    pub fn multiplier(&self, state: &str) -> Decimal {
        self.state_multipliers
            .get(state)
            .copied()
            .unwrap_or(Decimal::ONE)
    }

    pub fn dimensions(&self, state: &str) -> BTreeSet<String> {
        self.state_dimensions.get(state).cloned().unwrap_or_default()
    }
}

fn invalid(reason: String) -> EvolutionError {
    EvolutionError::ValidationError(reason)
}
