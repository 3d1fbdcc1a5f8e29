use crate::domain::machine::{MachineId, StateMachineDefinition};
use crate::domain::ports::DefinitionStoreBox;
use crate::error::{EvolutionError, Result};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;

/// Holds every registered machine definition.
///
/// Definitions are validated and persisted before they become visible and are
/// never mutated afterwards; readers only clone an `Arc`.
pub struct StateMachineRegistry {
    machines: RwLock<HashMap<MachineId, Arc<StateMachineDefinition>>>,
    store: DefinitionStoreBox,
    registration: Mutex<()>,
}

impl StateMachineRegistry {
    /// Builds a registry and rehydrates it from the definitions already
    /// persisted in `store`.
    pub async fn load(store: DefinitionStoreBox) -> Result<Self> {
        let mut machines = HashMap::new();
        for definition in store.all().await? {
            definition.validate()?;
            machines.insert(definition.id.clone(), Arc::new(definition));
        }
        Ok(Self {
            machines: RwLock::new(machines),
            store,
            registration: Mutex::new(()),
        })
    }

    /// Validates and persists a definition. Registering an identical definition
    /// again is a no-op; a different definition under a taken id is rejected.
    pub async fn register(&self, definition: StateMachineDefinition) -> Result<MachineId> {
        definition.validate()?;

        let _guard = self.registration.lock().await;
        if let Ok(existing) = self.get(&definition.id) {
            if *existing == definition {
                return Ok(definition.id);
            }
            return Err(EvolutionError::ValidationError(format!(
                "machine '{}' is already registered with a different definition",
                definition.id
            )));
        }

        self.store.store(definition.clone()).await?;
        let id = definition.id.clone();
        self.machines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), Arc::new(definition));
        tracing::info!(machine_id = %id, "registered state machine");
        Ok(id)
    }

    pub fn get(&self, machine_id: &str) -> Result<Arc<StateMachineDefinition>> {
        self.machines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(machine_id)
            .cloned()
            .ok_or_else(|| EvolutionError::machine_not_found(machine_id))
    }

    /// All definitions, ordered by id.
    pub fn list(&self) -> Vec<Arc<StateMachineDefinition>> {
        let mut machines: Vec<_> = self
            .machines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        machines.sort_by(|a, b| a.id.cmp(&b.id));
        machines
    }
}
