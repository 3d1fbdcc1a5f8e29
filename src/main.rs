use clap::Parser;
use evolvd::application::engine::EvolutionEngine;
use evolvd::application::scheduler::{EvolutionScheduler, TickOutcome};
use evolvd::config::EngineConfig;
use evolvd::domain::entity::{EntityId, EntityState};
use evolvd::domain::event::EvolutionEvent;
use evolvd::domain::ports::{DefinitionStoreBox, EntityStoreBox, HistoryLogBox, TransitionNotice};
use evolvd::infrastructure::in_memory::{
    InMemoryDefinitionStore, InMemoryEntityStore, InMemoryHistoryLog,
};
use evolvd::interfaces::csv::event_reader::EventReader;
use evolvd::interfaces::csv::state_writer::EntityStateWriter;
use evolvd::interfaces::json::manifest_reader::{Manifest, ManifestReader};
use evolvd::telemetry;
use miette::{IntoDiagnostic, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Manifest JSON file with machines, entities and events
    manifest: PathBuf,

    /// Additional events CSV file (entity,event_type,priority,data)
    #[arg(long)]
    events: Option<PathBuf>,

    /// Engine configuration JSON file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Scheduler ticks to run by hand after the manifest is applied
    #[arg(long, default_value_t = 0)]
    ticks: u32,

    /// Keep the timer-driven scheduler running until Ctrl-C
    #[arg(long)]
    run: bool,

    /// Override scheduler.interval_ms
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Override scheduler.batch_size
    #[arg(long)]
    batch_size: Option<usize>,

    /// Write the newest history records of every entity as JSON lines
    #[arg(long)]
    history_out: Option<PathBuf>,
}

type Stores = (DefinitionStoreBox, EntityStoreBox, HistoryLogBox);

fn in_memory_stores() -> Stores {
    (
        Box::new(InMemoryDefinitionStore::new()),
        Box::new(InMemoryEntityStore::new()),
        Box::new(InMemoryHistoryLog::new()),
    )
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    use evolvd::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(path) => {
            let store = RocksDBStore::open(path).into_diagnostic()?;
            Ok((
                Box::new(store.clone()),
                Box::new(store.clone()),
                Box::new(store),
            ))
        }
        None => Ok(in_memory_stores()),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    if db_path.is_some() {
        warn!(
            "persistent storage requested via --db-path, but the 'storage-rocksdb' feature is not enabled; falling back to in-memory storage"
        );
    }
    Ok(in_memory_stores())
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path).into_diagnostic()?,
        None => EngineConfig::default(),
    };
    if let Some(interval_ms) = cli.interval_ms {
        config.scheduler.interval_ms = interval_ms;
    }
    if let Some(batch_size) = cli.batch_size {
        config.scheduler.batch_size = batch_size;
    }
    config.validate().into_diagnostic()?;
    Ok(config)
}

/// Registers machines and seeds entities, returning alias -> id.
async fn apply_manifest(
    engine: &EvolutionEngine,
    manifest: &Manifest,
) -> Result<HashMap<String, EntityId>> {
    for definition in &manifest.machines {
        engine
            .register_machine(definition.clone())
            .await
            .into_diagnostic()?;
    }

    let mut aliases = HashMap::new();
    for seed in &manifest.entities {
        let id = match seed.id {
            Some(id) if engine.get_entity(id).await.is_ok() => {
                info!(alias = %seed.alias, entity_id = %id, "resuming stored entity");
                id
            }
            Some(id) => engine
                .create_entity_with_id(id, &seed.machine, seed.metrics.clone())
                .await
                .into_diagnostic()?,
            None => engine
                .create_entity(&seed.machine, seed.metrics.clone())
                .await
                .into_diagnostic()?,
        };
        aliases.insert(seed.alias.clone(), id);
    }
    Ok(aliases)
}

async fn submit_by_alias(
    engine: &EvolutionEngine,
    aliases: &HashMap<String, EntityId>,
    alias: &str,
    event: &EvolutionEvent,
) {
    let Some(id) = aliases.get(alias) else {
        error!(alias, "Error processing event: unknown entity alias");
        return;
    };
    if let Err(e) = engine.submit(*id, event).await {
        error!(alias, error = %e, "Error processing event");
    }
}

async fn write_history(
    engine: &EvolutionEngine,
    states: &[EntityState],
    limit: usize,
    path: &Path,
) -> Result<()> {
    let mut out = io::BufWriter::new(File::create(path).into_diagnostic()?);
    for state in states {
        for record in engine
            .get_history(state.entity_id, limit)
            .await
            .into_diagnostic()?
        {
            serde_json::to_writer(&mut out, &record).into_diagnostic()?;
            out.write_all(b"\n").into_diagnostic()?;
        }
    }
    out.flush().into_diagnostic()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let (definitions, entities, history) = open_stores(cli.db_path.clone())?;
    let (notices, mut notice_rx) = tokio::sync::mpsc::unbounded_channel::<TransitionNotice>();
    let engine = Arc::new(
        EvolutionEngine::new(definitions, entities, history)
            .await
            .into_diagnostic()?
            .with_hook(Box::new(notices)),
    );
    let subscriber = tokio::spawn(async move {
        while let Some(notice) = notice_rx.recv().await {
            debug!(
                entity_id = %notice.entity_id,
                from = %notice.from_state,
                to = %notice.to_state,
                "transition notice"
            );
        }
    });

    let file = File::open(&cli.manifest).into_diagnostic()?;
    let manifest = ManifestReader::new(file).read().into_diagnostic()?;
    let aliases = apply_manifest(&engine, &manifest).await?;

    for submission in &manifest.events {
        submit_by_alias(&engine, &aliases, &submission.entity, &submission.event).await;
    }

    if let Some(path) = &cli.events {
        let file = File::open(path).into_diagnostic()?;
        for row in EventReader::new(file).events() {
            match row {
                Ok((alias, event)) => submit_by_alias(&engine, &aliases, &alias, &event).await,
                Err(e) => error!(error = %e, "Error reading event"),
            }
        }
    }

    let scheduler = Arc::new(
        EvolutionScheduler::new(Arc::clone(&engine), config.scheduler.clone()).into_diagnostic()?,
    );
    for _ in 0..cli.ticks {
        match scheduler.tick().await.into_diagnostic()? {
            TickOutcome::Completed(report) => info!(
                cycle = report.cycle,
                scanned = report.scanned,
                transitions = report.transitions,
                failures = report.failures,
                "tick finished"
            ),
            TickOutcome::Skipped => warn!("tick skipped"),
        }
    }

    if cli.run {
        let handle = Arc::clone(&scheduler).start();
        tokio::signal::ctrl_c().await.into_diagnostic()?;
        info!("shutdown requested, finishing in-flight tick");
        handle.stop().await.into_diagnostic()?;
    }

    let states = engine.list_entities().await.into_diagnostic()?;
    let labels: HashMap<EntityId, String> = aliases
        .iter()
        .map(|(alias, id)| (*id, alias.clone()))
        .collect();
    let rows: Vec<(String, &EntityState)> = states
        .iter()
        .map(|state| {
            let label = labels
                .get(&state.entity_id)
                .cloned()
                .unwrap_or_else(|| state.entity_id.to_string());
            (label, state)
        })
        .collect();

    let stdout = io::stdout();
    let mut writer = EntityStateWriter::new(stdout.lock());
    writer
        .write_states(rows.iter().map(|(label, state)| (label.as_str(), *state)))
        .into_diagnostic()?;

    if let Some(path) = &cli.history_out {
        write_history(&engine, &states, config.history_limit, path).await?;
    }

    let metrics = engine.aggregate_metrics().await.into_diagnostic()?;
    info!(
        active_entities = metrics.active_entities,
        total_evolutions = metrics.total_evolutions,
        average_level = %metrics.average_level,
        average_coherence = %metrics.average_coherence,
        evolution_rate = %metrics.evolution_rate,
        "aggregate metrics"
    );

    drop(scheduler);
    drop(engine);
    let _ = subscriber.await;
    Ok(())
}
