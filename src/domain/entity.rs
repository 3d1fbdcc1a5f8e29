use super::evolution;
use super::machine::{MachineId, StateMachineDefinition, StateName};
use crate::error::{EvolutionError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = EvolutionError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| EvolutionError::ValidationError(format!("invalid entity id '{s}': {e}")))
    }
}

/// Progress metrics carried by an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMetrics {
    pub level: Decimal,
    /// Quality score in `[0, 1]`.
    pub coherence: Decimal,
    #[serde(default)]
    pub dimensions: BTreeSet<String>,
}

impl Default for EntityMetrics {
    fn default() -> Self {
        Self {
            level: Decimal::ONE,
            coherence: Decimal::ONE,
            dimensions: BTreeSet::new(),
        }
    }
}

impl EntityMetrics {
    /// Checks seeded metrics: a non-negative level and a coherence in `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        if self.level < Decimal::ZERO {
            return Err(EvolutionError::ValidationError(format!(
                "level must not be negative, got {}",
                self.level
            )));
        }
        if self.coherence < Decimal::ZERO || self.coherence > Decimal::ONE {
            return Err(EvolutionError::ValidationError(format!(
                "coherence must be within [0, 1], got {}",
                self.coherence
            )));
        }
        Ok(())
    }
}

/// Current progress of one entity through its machine.
///
/// Only successful transitions and deactivation mutate it; the store bumps
/// `version` on every save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: EntityId,
    pub machine_id: MachineId,
    pub current_state: StateName,
    pub metrics: EntityMetrics,
    pub created_at: DateTime<Utc>,
    pub last_transition_at: DateTime<Utc>,
    pub evolution_count: u64,
    pub active: bool,
    pub version: u64,
}

impl EntityState {
    /// Seeds a fresh entity in the machine's initial state. An empty dimension
    /// set is filled from the initial state's tags.
    pub fn new(
        entity_id: EntityId,
        definition: &StateMachineDefinition,
        mut metrics: EntityMetrics,
        now: DateTime<Utc>,
    ) -> Self {
        if metrics.dimensions.is_empty() {
            metrics.dimensions = definition.dimensions(&definition.initial_state);
        }
        Self {
            entity_id,
            machine_id: definition.id.clone(),
            current_state: definition.initial_state.clone(),
            metrics,
            created_at: now,
            last_transition_at: now,
            evolution_count: 0,
            active: true,
            version: 0,
        }
    }

    /// Returns the state after moving along `current_state -> target`.
    ///
    /// Fails if the edge is not declared.
    pub fn advance(
        &self,
        definition: &StateMachineDefinition,
        target: &str,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if !definition.has_edge(&self.current_state, target) {
            return Err(EvolutionError::TransitionEvaluation(format!(
                "no edge '{}' -> '{}' in machine '{}'",
                self.current_state, target, definition.id
            )));
        }
        let metrics =
            evolution::evolve_metrics(definition, &self.metrics, target, self.evolution_count)?;
        Ok(Self {
            current_state: target.to_string(),
            metrics,
            last_transition_at: now,
            evolution_count: self.evolution_count + 1,
            ..self.clone()
        })
    }
}
