#![allow(dead_code)]

use evolvd::application::engine::EvolutionEngine;
use evolvd::domain::event::EventData;
use evolvd::domain::machine::StateMachineDefinition;
use evolvd::infrastructure::in_memory::{
    InMemoryDefinitionStore, InMemoryEntityStore, InMemoryHistoryLog,
};
use serde_json::{Value, json};

/// `A -> B -> C`: `A->B` needs `x >= 5`, `B->C` needs `y`, `C` is terminal.
pub fn abc_machine() -> StateMachineDefinition {
    serde_json::from_value(json!({
        "id": "abc",
        "name": "ABC",
        "category": "test",
        "states": ["A", "B", "C"],
        "transitions": {"A": ["B"], "B": ["C"]},
        "initial_state": "A",
        "terminal_states": ["C"],
        "transition_conditions": {
            "A->B": {"x": {"min": 5}},
            "B->C": {"y": "present"}
        },
        "state_multipliers": {"B": "1.5", "C": "2"},
        "state_dimensions": {"B": ["temporal"], "C": ["temporal", "spatial"]}
    }))
    .expect("valid machine json")
}

/// `dormant -> awake -> synced`, driven by scheduler events only.
pub fn pulse_machine() -> StateMachineDefinition {
    serde_json::from_value(json!({
        "id": "pulse",
        "name": "Pulse",
        "states": ["dormant", "awake", "synced"],
        "transitions": {"dormant": ["awake"], "awake": ["synced"]},
        "initial_state": "dormant",
        "terminal_states": ["synced"],
        "transition_conditions": {
            "dormant->awake": {"elapsed_secs": {"min": 60}},
            "awake->synced": {"sync_cycle": "present"}
        }
    }))
    .expect("valid machine json")
}

pub fn data(value: Value) -> EventData {
    value.as_object().cloned().unwrap_or_default()
}

pub struct Harness {
    pub engine: EvolutionEngine,
    pub entities: InMemoryEntityStore,
    pub history: InMemoryHistoryLog,
}

pub async fn harness() -> Harness {
    let entities = InMemoryEntityStore::new();
    let history = InMemoryHistoryLog::new();
    let engine = EvolutionEngine::new(
        Box::new(InMemoryDefinitionStore::new()),
        Box::new(entities.clone()),
        Box::new(history.clone()),
    )
    .await
    .expect("engine");
    engine.register_machine(abc_machine()).await.expect("abc");
    engine.register_machine(pulse_machine()).await.expect("pulse");
    Harness {
        engine,
        entities,
        history,
    }
}
