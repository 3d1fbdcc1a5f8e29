use crate::domain::entity::{EntityId, EntityState};
use crate::domain::machine::{MachineId, StateMachineDefinition};
use crate::domain::ports::{DefinitionStore, EntityStore, HistoryLog};
use crate::domain::record::EvolutionRecord;
use crate::error::{EvolutionError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory store for machine definitions.
#[derive(Default, Clone)]
pub struct InMemoryDefinitionStore {
    definitions: Arc<RwLock<BTreeMap<MachineId, StateMachineDefinition>>>,
}

impl InMemoryDefinitionStore {
    /// Creates a new, empty in-memory definition store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DefinitionStore for InMemoryDefinitionStore {
    async fn store(&self, definition: StateMachineDefinition) -> Result<()> {
        let mut definitions = self.definitions.write().await;
        definitions.insert(definition.id.clone(), definition);
        Ok(())
    }

    async fn all(&self) -> Result<Vec<StateMachineDefinition>> {
        let definitions = self.definitions.read().await;
        Ok(definitions.values().cloned().collect())
    }
}

/// A thread-safe in-memory store for entity states.
///
/// The version check and the write happen under one write guard, which makes
/// `save` an atomic compare-and-swap.
#[derive(Default, Clone)]
pub struct InMemoryEntityStore {
    entities: Arc<RwLock<BTreeMap<EntityId, EntityState>>>,
}

impl InMemoryEntityStore {
    /// Creates a new, empty in-memory entity store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn insert(&self, state: EntityState) -> Result<()> {
        let mut entities = self.entities.write().await;
        if entities.contains_key(&state.entity_id) {
            return Err(EvolutionError::ValidationError(format!(
                "entity {} already exists",
                state.entity_id
            )));
        }
        entities.insert(state.entity_id, state);
        Ok(())
    }

    async fn load(&self, entity_id: EntityId) -> Result<Option<EntityState>> {
        let entities = self.entities.read().await;
        Ok(entities.get(&entity_id).cloned())
    }

    async fn save(&self, mut state: EntityState, expected_version: u64) -> Result<EntityState> {
        let mut entities = self.entities.write().await;
        let stored = entities
            .get_mut(&state.entity_id)
            .ok_or_else(|| EvolutionError::entity_not_found(state.entity_id))?;
        if stored.version != expected_version {
            return Err(EvolutionError::Conflict {
                entity_id: state.entity_id,
                expected_version,
            });
        }
        state.version = expected_version + 1;
        *stored = state.clone();
        Ok(state)
    }

    async fn list_active(&self, after: Option<EntityId>, limit: usize) -> Result<Vec<EntityState>> {
        let entities = self.entities.read().await;
        let lower = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        Ok(entities
            .range((lower, Bound::Unbounded))
            .map(|(_, state)| state)
            .filter(|state| state.active)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn all(&self) -> Result<Vec<EntityState>> {
        let entities = self.entities.read().await;
        Ok(entities.values().cloned().collect())
    }
}

/// A thread-safe in-memory, append-only history log.
#[derive(Default, Clone)]
pub struct InMemoryHistoryLog {
    records: Arc<RwLock<HashMap<EntityId, Vec<EvolutionRecord>>>>,
}

impl InMemoryHistoryLog {
    /// Creates a new, empty in-memory history log.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryLog for InMemoryHistoryLog {
    async fn append(&self, record: EvolutionRecord) -> Result<()> {
        let mut records = self.records.write().await;
        records.entry(record.entity_id).or_default().push(record);
        Ok(())
    }

    async fn query(&self, entity_id: EntityId, limit: usize) -> Result<Vec<EvolutionRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(&entity_id)
            .map(|entries| entries.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
