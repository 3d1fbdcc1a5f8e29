//! Pure transition selection.
//!
//! Candidates are tried in declaration order and the first edge whose
//! condition set holds wins. No match is not an error: the event is absorbed.

use super::event::{EventData, EvolutionEvent};
use super::machine::{ConditionSpec, Requirement, StateMachineDefinition, StateName, condition_key};
use crate::error::{EvolutionError, Result};
use serde_json::Value;

pub fn evaluate(
    definition: &StateMachineDefinition,
    current_state: &str,
    event: &EvolutionEvent,
) -> Result<Option<StateName>> {
    if !definition.has_state(current_state) {
        return Err(EvolutionError::TransitionEvaluation(format!(
            "state '{current_state}' is not declared by machine '{}'",
            definition.id
        )));
    }

    for candidate in definition.candidates(current_state) {
        let key = condition_key(current_state, candidate);
        match definition.transition_conditions.get(&key) {
            None => return Ok(Some(candidate.clone())),
            Some(spec) => {
                if is_satisfied(&key, spec, &event.data)? {
                    return Ok(Some(candidate.clone()));
                }
            }
        }
    }

    Ok(None)
}

fn is_satisfied(edge: &str, spec: &ConditionSpec, data: &EventData) -> Result<bool> {
    for (field, requirement) in spec {
        let value = match data.get(field) {
            None | Some(Value::Null) => return Ok(false),
            Some(value) => value,
        };
        if let Requirement::Min(threshold) = requirement {
            let actual = value.as_f64().ok_or_else(|| {
                EvolutionError::TransitionEvaluation(format!(
                    "condition '{edge}' compares '{field}' against {threshold}, but the event carries {value}"
                ))
            })?;
            if actual < *threshold {
                return Ok(false);
            }
        }
    }
    Ok(true)
}
