use super::entity::{EntityId, EntityMetrics};
use super::machine::StateName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable audit entry for one evaluation attempt that reached the
/// evaluator and either committed a transition or failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionRecord {
    pub entity_id: EntityId,
    /// `evolution_count` at the time of the write.
    pub cycle_number: u64,
    pub from_state: StateName,
    /// The committed target, or the attempted one when known on failure.
    pub to_state: Option<StateName>,
    pub trigger_event: String,
    pub metrics_before: EntityMetrics,
    pub metrics_after: EntityMetrics,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}
