use super::registry::StateMachineRegistry;
use crate::domain::entity::{EntityId, EntityMetrics, EntityState};
use crate::domain::evaluator;
use crate::domain::evolution::METRIC_SCALE;
use crate::domain::event::{EventData, EvolutionEvent};
use crate::domain::machine::{MachineId, StateMachineDefinition, StateName};
use crate::domain::ports::{
    DefinitionStoreBox, EntityStoreBox, HistoryLogBox, TransitionHookBox, TransitionNotice,
};
use crate::domain::record::EvolutionRecord;
use crate::error::{EvolutionError, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Result of offering one event to one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitOutcome {
    pub transitioned: bool,
    pub new_state: Option<StateName>,
}

impl SubmitOutcome {
    fn absorbed() -> Self {
        Self {
            transitioned: false,
            new_state: None,
        }
    }
}

/// Fleet-wide summary over all stored entities.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateMetrics {
    pub active_entities: usize,
    /// Sum of `evolution_count` over every entity, active or not.
    pub total_evolutions: u64,
    /// Mean level of active entities.
    pub average_level: Decimal,
    /// Mean coherence of active entities.
    pub average_coherence: Decimal,
    /// Committed transitions per active entity.
    pub evolution_rate: Decimal,
}

/// The finite-state evolution engine.
///
/// Owns the registry, the entity store and the history log. Every evaluation
/// goes through [`EvolutionEngine::submit`], whether it comes from a caller or
/// from the scheduler, so both paths share the same compare-and-swap retry
/// discipline.
pub struct EvolutionEngine {
    registry: StateMachineRegistry,
    entity_store: EntityStoreBox,
    history: HistoryLogBox,
    hook: Option<TransitionHookBox>,
}

impl EvolutionEngine {
    /// Creates a new `EvolutionEngine`, rehydrating registered machines from
    /// `definition_store`.
    ///
    /// # Arguments
    ///
    /// * `definition_store` - Persisted machine definitions.
    /// * `entity_store` - Current state of every entity.
    /// * `history` - The append-only evolution log.
    pub async fn new(
        definition_store: DefinitionStoreBox,
        entity_store: EntityStoreBox,
        history: HistoryLogBox,
    ) -> Result<Self> {
        Ok(Self {
            registry: StateMachineRegistry::load(definition_store).await?,
            entity_store,
            history,
            hook: None,
        })
    }

    /// Registers the subscriber invoked after every committed transition.
    pub fn with_hook(mut self, hook: TransitionHookBox) -> Self {
        self.hook = Some(hook);
        self
    }

    pub async fn register_machine(&self, definition: StateMachineDefinition) -> Result<MachineId> {
        self.registry.register(definition).await
    }

    pub fn get_machine(&self, machine_id: &str) -> Result<Arc<StateMachineDefinition>> {
        self.registry.get(machine_id)
    }

    pub fn list_machines(&self) -> Vec<Arc<StateMachineDefinition>> {
        self.registry.list()
    }

    pub async fn create_entity(
        &self,
        machine_id: &str,
        initial_metrics: EntityMetrics,
    ) -> Result<EntityId> {
        self.create_entity_with_id(EntityId::new(), machine_id, initial_metrics)
            .await
    }

    /// Same as [`Self::create_entity`] with a caller-chosen id.
    ///
    /// Seeded metrics must have a non-negative level and a coherence in
    /// `[0, 1]`.
    pub async fn create_entity_with_id(
        &self,
        entity_id: EntityId,
        machine_id: &str,
        initial_metrics: EntityMetrics,
    ) -> Result<EntityId> {
        initial_metrics.validate()?;
        let definition = self.registry.get(machine_id)?;
        let state = EntityState::new(entity_id, &definition, initial_metrics, Utc::now());
        self.entity_store.insert(state).await?;
        info!(%entity_id, machine_id, "created entity");
        Ok(entity_id)
    }

    pub async fn get_entity(&self, entity_id: EntityId) -> Result<EntityState> {
        self.entity_store
            .load(entity_id)
            .await?
            .ok_or_else(|| EvolutionError::entity_not_found(entity_id))
    }

    pub async fn list_entities(&self) -> Result<Vec<EntityState>> {
        self.entity_store.all().await
    }

    pub(crate) async fn list_active(
        &self,
        after: Option<EntityId>,
        limit: usize,
    ) -> Result<Vec<EntityState>> {
        self.entity_store.list_active(after, limit).await
    }

    /// Marks an entity inactive. Its history stays linked; it no longer
    /// accepts events and the scheduler skips it.
    pub async fn deactivate_entity(&self, entity_id: EntityId) -> Result<EntityState> {
        let mut retried = false;
        loop {
            let current = self.get_entity(entity_id).await?;
            if !current.active {
                return Ok(current);
            }
            let expected_version = current.version;
            let deactivated = EntityState {
                active: false,
                ..current
            };
            match self.entity_store.save(deactivated, expected_version).await {
                Err(EvolutionError::Conflict { .. }) if !retried => retried = true,
                Ok(saved) => {
                    info!(%entity_id, "deactivated entity");
                    return Ok(saved);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Synchronous evaluation path: offers one event to one entity and
    /// persists the resulting transition, if any.
    pub async fn submit_event(
        &self,
        entity_id: EntityId,
        event_type: &str,
        event_data: EventData,
        priority: i32,
    ) -> Result<SubmitOutcome> {
        self.submit(entity_id, &EvolutionEvent::new(event_type, event_data, priority))
            .await
    }

    /// Evaluates `event` against the entity's current state.
    ///
    /// Unknown and inactive entities are rejected before evaluation and leave
    /// no record. A store conflict triggers one reload and re-evaluation; a
    /// second conflict, like any other failure past this point, is appended to
    /// the history with `success = false` and returned.
    ///
    /// Once the new state is saved the call succeeds, even if appending its
    /// history record fails; that failure is only logged.
    pub async fn submit(&self, entity_id: EntityId, event: &EvolutionEvent) -> Result<SubmitOutcome> {
        let started = Instant::now();
        let mut current = self.get_entity(entity_id).await?;
        let mut retried = false;

        loop {
            if !current.active {
                return Err(EvolutionError::EntityInactive(entity_id));
            }

            let (definition, target) = match self.select_target(&current, event) {
                Ok(Some(selection)) => selection,
                Ok(None) => {
                    debug!(%entity_id, state = %current.current_state, event = %event.event_type, "event absorbed");
                    return Ok(SubmitOutcome::absorbed());
                }
                Err(e) => return Err(self.record_failure(&current, None, event, started, e).await),
            };

            let next = match current.advance(&definition, &target, Utc::now()) {
                Ok(next) => next,
                Err(e) => {
                    return Err(self
                        .record_failure(&current, Some(target), event, started, e)
                        .await);
                }
            };

            match self.entity_store.save(next, current.version).await {
                Ok(saved) => {
                    self.record_success(&current, &saved, event, started).await;
                    return Ok(SubmitOutcome {
                        transitioned: true,
                        new_state: Some(saved.current_state),
                    });
                }
                Err(EvolutionError::Conflict { .. }) if !retried => {
                    debug!(%entity_id, "version conflict, reloading once");
                    retried = true;
                    current = self.get_entity(entity_id).await?;
                }
                Err(e) => {
                    if matches!(e, EvolutionError::Conflict { .. }) {
                        warn!(%entity_id, "second version conflict, giving up this cycle");
                    }
                    return Err(self
                        .record_failure(&current, Some(target), event, started, e)
                        .await);
                }
            }
        }
    }

    fn select_target(
        &self,
        current: &EntityState,
        event: &EvolutionEvent,
    ) -> Result<Option<(Arc<StateMachineDefinition>, StateName)>> {
        let definition = self.registry.get(&current.machine_id)?;
        let target = evaluator::evaluate(&definition, &current.current_state, event)?;
        Ok(target.map(|target| (definition, target)))
    }

    async fn record_success(
        &self,
        before: &EntityState,
        after: &EntityState,
        event: &EvolutionEvent,
        started: Instant,
    ) {
        let record = EvolutionRecord {
            entity_id: after.entity_id,
            cycle_number: after.evolution_count,
            from_state: before.current_state.clone(),
            to_state: Some(after.current_state.clone()),
            trigger_event: event.event_type.clone(),
            metrics_before: before.metrics.clone(),
            metrics_after: after.metrics.clone(),
            duration_ms: elapsed_ms(started),
            success: true,
            error: None,
            timestamp: after.last_transition_at,
        };
        if let Err(append_error) = self.history.append(record.clone()).await {
            error!(entity_id = %after.entity_id, %append_error, "failed to append transition record");
        }
        info!(
            entity_id = %after.entity_id,
            from = %before.current_state,
            to = %after.current_state,
            cycle = after.evolution_count,
            "transition committed"
        );

        if let Some(hook) = &self.hook {
            hook.on_transition(TransitionNotice {
                entity_id: after.entity_id,
                from_state: before.current_state.clone(),
                to_state: after.current_state.clone(),
                record,
            })
            .await;
        }
    }

    /// Appends a failed attempt and hands the error back. A failing append is
    /// logged and the evaluation error is still returned.
    async fn record_failure(
        &self,
        current: &EntityState,
        target: Option<StateName>,
        event: &EvolutionEvent,
        started: Instant,
        error: EvolutionError,
    ) -> EvolutionError {
        let record = EvolutionRecord {
            entity_id: current.entity_id,
            cycle_number: current.evolution_count,
            from_state: current.current_state.clone(),
            to_state: target,
            trigger_event: event.event_type.clone(),
            metrics_before: current.metrics.clone(),
            metrics_after: current.metrics.clone(),
            duration_ms: elapsed_ms(started),
            success: false,
            error: Some(error.to_string()),
            timestamp: Utc::now(),
        };
        warn!(entity_id = %current.entity_id, event = %event.event_type, %error, "evaluation failed");
        if let Err(append_error) = self.history.append(record).await {
            error!(entity_id = %current.entity_id, %append_error, "failed to append failure record");
        }
        error
    }

    pub async fn get_history(&self, entity_id: EntityId, limit: usize) -> Result<Vec<EvolutionRecord>> {
        self.history.query(entity_id, limit).await
    }

    pub async fn aggregate_metrics(&self) -> Result<AggregateMetrics> {
        let entities = self.entity_store.all().await?;
        let total_evolutions: u64 = entities.iter().map(|e| e.evolution_count).sum();
        let active: Vec<&EntityState> = entities.iter().filter(|e| e.active).collect();

        let (average_level, average_coherence, evolution_rate) = if active.is_empty() {
            (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO)
        } else {
            let count = Decimal::from(active.len());
            (
                running_mean(active.iter().map(|e| e.metrics.level), "level")?,
                running_mean(active.iter().map(|e| e.metrics.coherence), "coherence")?,
                (Decimal::from(total_evolutions) / count).round_dp(METRIC_SCALE),
            )
        };

        Ok(AggregateMetrics {
            active_entities: active.len(),
            total_evolutions,
            average_level,
            average_coherence,
            evolution_rate,
        })
    }
}

/// Incremental mean `acc + (x - acc) / n`; never leaves the range of the
/// inputs.
fn running_mean(values: impl Iterator<Item = Decimal>, metric: &str) -> Result<Decimal> {
    let mut mean = Decimal::ZERO;
    for (index, value) in values.enumerate() {
        let n = Decimal::from(index + 1);
        mean = value
            .checked_sub(mean)
            .and_then(|delta| delta.checked_div(n))
            .and_then(|step| mean.checked_add(step))
            .ok_or_else(|| {
                EvolutionError::TransitionEvaluation(format!("{metric} average overflowed"))
            })?;
    }
    Ok(mean.round_dp(METRIC_SCALE))
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
