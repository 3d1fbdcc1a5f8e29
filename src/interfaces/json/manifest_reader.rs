use crate::domain::entity::{EntityId, EntityMetrics};
use crate::domain::event::EvolutionEvent;
use crate::domain::machine::{MachineId, StateMachineDefinition};
use crate::error::Result;
use serde::Deserialize;
use std::io::Read;

/// An entity to create (or reuse, when `id` already exists in the store).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EntitySeed {
    pub alias: String,
    pub machine: MachineId,
    #[serde(default)]
    pub id: Option<EntityId>,
    #[serde(default)]
    pub metrics: EntityMetrics,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventSubmission {
    /// Alias of the target entity.
    pub entity: String,
    #[serde(flatten)]
    pub event: EvolutionEvent,
}

/// Everything a run starts from: machines to register, entities to seed and
/// events to submit, in that order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub machines: Vec<StateMachineDefinition>,
    #[serde(default)]
    pub entities: Vec<EntitySeed>,
    #[serde(default)]
    pub events: Vec<EventSubmission>,
}

/// Reads a [`Manifest`] from any JSON `Read` source (file, stdin).
pub struct ManifestReader<R: Read> {
    source: R,
}

impl<R: Read> ManifestReader<R> {
    pub fn new(source: R) -> Self {
        Self { source }
    }

    pub fn read(self) -> Result<Manifest> {
        Ok(serde_json::from_reader(self.source)?)
    }
}
