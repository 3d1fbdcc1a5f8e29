use super::entity::{EntityId, EntityState};
use super::machine::{StateMachineDefinition, StateName};
use super::record::EvolutionRecord;
use crate::error::Result;
use async_trait::async_trait;

/// Durable home of registered machine definitions.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    async fn store(&self, definition: StateMachineDefinition) -> Result<()>;
    async fn all(&self) -> Result<Vec<StateMachineDefinition>>;
}

/// Current state per entity, guarded by an optimistic version.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Persists a brand-new entity. Fails if the id is already taken.
    async fn insert(&self, state: EntityState) -> Result<()>;
    async fn load(&self, entity_id: EntityId) -> Result<Option<EntityState>>;
    /// Compare-and-swap on `version`: writes `state` with
    /// `expected_version + 1` only if the stored version still equals
    /// `expected_version`, otherwise returns `EvolutionError::Conflict`.
    async fn save(&self, state: EntityState, expected_version: u64) -> Result<EntityState>;
    /// Up to `limit` active entities ordered by id, strictly after `after`.
    async fn list_active(&self, after: Option<EntityId>, limit: usize) -> Result<Vec<EntityState>>;
    async fn all(&self) -> Result<Vec<EntityState>>;
}

/// Append-only audit trail. Records are never updated or deleted.
#[async_trait]
pub trait HistoryLog: Send + Sync {
    async fn append(&self, record: EvolutionRecord) -> Result<()>;
    /// The most recent `limit` records for the entity, newest first.
    async fn query(&self, entity_id: EntityId, limit: usize) -> Result<Vec<EvolutionRecord>>;
}

/// Payload handed to the transition hook after a transition is committed.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionNotice {
    pub entity_id: EntityId,
    pub from_state: StateName,
    pub to_state: StateName,
    pub record: EvolutionRecord,
}

/// Subscriber invoked once per committed transition. Delivery beyond the
/// call itself is the subscriber's concern.
#[async_trait]
pub trait TransitionHook: Send + Sync {
    async fn on_transition(&self, notice: TransitionNotice);
}

pub type DefinitionStoreBox = Box<dyn DefinitionStore>;
pub type EntityStoreBox = Box<dyn EntityStore>;
pub type HistoryLogBox = Box<dyn HistoryLog>;
pub type TransitionHookBox = Box<dyn TransitionHook>;
