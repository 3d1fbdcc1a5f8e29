use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type EventData = Map<String, Value>;

/// An event offered to an entity's machine, either submitted by a caller or
/// synthesized by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionEvent {
    pub event_type: String,
    #[serde(default)]
    pub data: EventData,
    /// Higher values are evaluated first when several events target the same
    /// entity in one scheduler cycle.
    #[serde(default)]
    pub priority: i32,
}

impl EvolutionEvent {
    pub fn new(event_type: impl Into<String>, data: EventData, priority: i32) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            priority,
        }
    }
}
