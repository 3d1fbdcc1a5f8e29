use super::engine::EvolutionEngine;
use crate::config::{OverlapPolicy, SchedulerConfig};
use crate::domain::entity::{EntityId, EntityState};
use crate::domain::event::{EventData, EvolutionEvent};
use crate::error::{EvolutionError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde_json::json;
use std::cmp::Reverse;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use tokio::sync::{Mutex, Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Fired once the time since an entity's last transition reaches
/// `time_progression_secs`. Carries `elapsed_secs`.
pub const TIME_PROGRESSION: &str = "time_progression";
/// Fired for every entity on each `sync_every_ticks`-th cycle. Carries
/// `sync_cycle`.
pub const NETWORK_SYNC: &str = "network_sync";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub cycle: u64,
    pub scanned: usize,
    pub events: usize,
    pub transitions: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Completed(TickReport),
    /// Another tick was still running and the policy is [`OverlapPolicy::Skip`].
    Skipped,
}

#[derive(Debug, Default)]
struct EntityTick {
    transitions: usize,
    failures: usize,
}

/// Periodically synthesizes evolution events for active entities and feeds
/// them through the engine.
///
/// Ticks never run concurrently with each other; see [`OverlapPolicy`].
/// Use [`EvolutionScheduler::tick_at`] to drive it by hand.
pub struct EvolutionScheduler {
    engine: Arc<EvolutionEngine>,
    config: SchedulerConfig,
    running: Mutex<()>,
    cycle: AtomicU64,
    cursor: std::sync::Mutex<Option<EntityId>>,
}

/// Handle to a scheduler started with [`EvolutionScheduler::start`].
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signals the timer loop to stop and waits for it. A tick already in
    /// flight runs to completion first.
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.join
            .await
            .map_err(|e| EvolutionError::InternalError(Box::new(e)))
    }
}

impl EvolutionScheduler {
    pub fn new(engine: Arc<EvolutionEngine>, config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            engine,
            config,
            running: Mutex::new(()),
            cycle: AtomicU64::new(0),
            cursor: std::sync::Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Number of ticks that have run (skipped ticks are not counted).
    pub fn cycles_run(&self) -> u64 {
        self.cycle.load(Ordering::SeqCst)
    }

    pub async fn tick(&self) -> Result<TickOutcome> {
        self.tick_at(Utc::now()).await
    }

    /// Runs one tick as if the clock read `now`.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickOutcome> {
        let _running = match self.config.overlap {
            OverlapPolicy::Skip => match self.running.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    warn!("previous tick still running, skipping this one");
                    return Ok(TickOutcome::Skipped);
                }
            },
            OverlapPolicy::Queue => self.running.lock().await,
        };

        let cycle = self.cycle.fetch_add(1, Ordering::SeqCst) + 1;
        let report = self
            .run_tick(cycle, now)
            .instrument(info_span!("tick", cycle))
            .await?;
        debug!(
            cycle,
            scanned = report.scanned,
            transitions = report.transitions,
            failures = report.failures,
            "tick complete"
        );
        Ok(TickOutcome::Completed(report))
    }

    async fn run_tick(&self, cycle: u64, now: DateTime<Utc>) -> Result<TickReport> {
        let batch = self.next_batch().await?;
        let mut report = TickReport {
            cycle,
            scanned: batch.len(),
            ..TickReport::default()
        };

        let permits = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut tasks = JoinSet::new();
        for entity in batch {
            let events = synthesize_events(&self.config, &entity, cycle, now);
            if events.is_empty() {
                continue;
            }
            report.events += events.len();

            let engine = Arc::clone(&self.engine);
            let permits = Arc::clone(&permits);
            tasks.spawn(
                async move {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return EntityTick::default();
                    };
                    evolve_entity(&engine, entity.entity_id, events).await
                }
                .in_current_span(),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    report.transitions += outcome.transitions;
                    report.failures += outcome.failures;
                }
                Err(e) => {
                    error!(error = %e, "entity task aborted");
                    report.failures += 1;
                }
            }
        }
        Ok(report)
    }

    /// Next slice of active entities, resuming after the previous tick's last
    /// entity and wrapping around to the start.
    async fn next_batch(&self) -> Result<Vec<EntityState>> {
        let limit = self.config.batch_size;
        let after = *self.cursor.lock().unwrap_or_else(PoisonError::into_inner);

        let mut batch = self.engine.list_active(after, limit).await?;
        if let Some(after) = after
            && batch.len() < limit
        {
            let wrapped = self.engine.list_active(None, limit - batch.len()).await?;
            batch.extend(wrapped.into_iter().take_while(|e| e.entity_id <= after));
        }

        let next = if batch.len() == limit {
            batch.last().map(|e| e.entity_id)
        } else {
            None
        };
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner) = next;
        Ok(batch)
    }

    /// Spawns the timer loop. The first tick fires one interval from now.
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let period = self.config.interval();

        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_ms = self.config.interval_ms, "scheduler started");

            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let started = std::time::Instant::now();
                        if let Err(e) = self.tick().await {
                            error!(error = %e, "scheduler tick failed");
                        }
                        if started.elapsed() > period {
                            warn!("tick overran the interval; missed ticks are skipped");
                        }
                    }
                }
            }
            info!("scheduler stopped");
        });

        SchedulerHandle { shutdown, join }
    }
}

/// Events the scheduler offers `entity` on `cycle`, highest priority first.
///
/// Derived only from elapsed time, the cycle number and the entity's own
/// counters.
pub fn synthesize_events(
    config: &SchedulerConfig,
    entity: &EntityState,
    cycle: u64,
    now: DateTime<Utc>,
) -> Vec<EvolutionEvent> {
    let mut base = EventData::new();
    base.insert("evolution_count".into(), json!(entity.evolution_count));
    base.insert(
        "phase".into(),
        json!(entity.evolution_count % config.phase_modulus),
    );
    base.insert(
        "level".into(),
        json!(entity.metrics.level.to_f64().unwrap_or_default()),
    );
    base.insert(
        "coherence".into(),
        json!(entity.metrics.coherence.to_f64().unwrap_or_default()),
    );

    let mut events = Vec::new();
    let elapsed = (now - entity.last_transition_at).num_seconds().max(0);
    if elapsed >= config.time_progression_secs {
        let mut data = base.clone();
        data.insert("elapsed_secs".into(), json!(elapsed));
        events.push(EvolutionEvent::new(TIME_PROGRESSION, data, 1));
    }
    if cycle % config.sync_every_ticks == 0 {
        let mut data = base;
        data.insert("sync_cycle".into(), json!(cycle));
        events.push(EvolutionEvent::new(NETWORK_SYNC, data, 0));
    }
    events.sort_by_key(|event| Reverse(event.priority));
    events
}

async fn evolve_entity(
    engine: &EvolutionEngine,
    entity_id: EntityId,
    events: Vec<EvolutionEvent>,
) -> EntityTick {
    let mut outcome = EntityTick::default();
    for event in events {
        match engine.submit(entity_id, &event).await {
            Ok(submitted) if submitted.transitioned => outcome.transitions += 1,
            Ok(_) => {}
            Err(EvolutionError::EntityInactive(_)) => break,
            Err(e) => {
                warn!(%entity_id, event = %event.event_type, error = %e, "skipping entity for this cycle");
                outcome.failures += 1;
                break;
            }
        }
    }
    outcome
}
