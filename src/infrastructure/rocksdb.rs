use crate::domain::entity::{EntityId, EntityState};
use crate::domain::machine::StateMachineDefinition;
use crate::domain::ports::{DefinitionStore, EntityStore, HistoryLog};
use crate::domain::record::EvolutionRecord;
use crate::error::{EvolutionError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Column Family for registered machine definitions.
pub const CF_DEFINITIONS: &str = "state_machine_definitions";
/// Column Family for current entity states, keyed by entity id.
pub const CF_ENTITIES: &str = "entity_states";
/// Column Family for the append-only evolution records.
pub const CF_RECORDS: &str = "evolution_records";

/// 16-byte entity id, 8-byte timestamp nanos, 8-byte sequence.
const RECORD_KEY_LEN: usize = 32;

/// A persistent store implementation using RocksDB.
///
/// Definitions, entity states and evolution records live in separate Column
/// Families. Record keys are `entity_id ++ timestamp_nanos ++ sequence`, all
/// big-endian, so an entity's records are contiguous and sorted oldest first.
/// History queries walk that range backwards from its upper bound.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    /// Serializes read-compare-write on entity states.
    write_lock: Arc<Mutex<()>>,
    sequence: Arc<AtomicU64>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating the
    /// three column families if they are missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [CF_DEFINITIONS, CF_ENTITIES, CF_RECORDS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
            sequence: Arc::new(AtomicU64::new(0)),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| EvolutionError::Storage(format!("column family '{name}' not found")))
    }

    fn put_json<T: Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        let bytes = serde_json::to_vec(value)?;
        self.db.put_cf(cf, key, bytes)?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn record_key(&self, record: &EvolutionRecord) -> Vec<u8> {
        let nanos = record
            .timestamp
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .max(0) as u64;
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);

        let mut key = Vec::with_capacity(RECORD_KEY_LEN);
        key.extend_from_slice(record.entity_id.as_bytes());
        key.extend_from_slice(&nanos.to_be_bytes());
        key.extend_from_slice(&sequence.to_be_bytes());
        key
    }
}

#[async_trait]
impl DefinitionStore for RocksDBStore {
    async fn store(&self, definition: StateMachineDefinition) -> Result<()> {
        self.put_json(CF_DEFINITIONS, definition.id.as_bytes(), &definition)
    }

    async fn all(&self) -> Result<Vec<StateMachineDefinition>> {
        let cf = self.cf(CF_DEFINITIONS)?;
        let mut definitions = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            definitions.push(serde_json::from_slice(&value)?);
        }
        Ok(definitions)
    }
}

#[async_trait]
impl EntityStore for RocksDBStore {
    async fn insert(&self, state: EntityState) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let key = state.entity_id.as_bytes();
        if self.get_json::<EntityState>(CF_ENTITIES, key)?.is_some() {
            return Err(EvolutionError::ValidationError(format!(
                "entity {} already exists",
                state.entity_id
            )));
        }
        self.put_json(CF_ENTITIES, key, &state)
    }

    async fn load(&self, entity_id: EntityId) -> Result<Option<EntityState>> {
        self.get_json(CF_ENTITIES, entity_id.as_bytes())
    }

    async fn save(&self, mut state: EntityState, expected_version: u64) -> Result<EntityState> {
        let _guard = self.write_lock.lock().await;
        let key = *state.entity_id.as_bytes();
        let stored: EntityState = self
            .get_json(CF_ENTITIES, &key)?
            .ok_or_else(|| EvolutionError::entity_not_found(state.entity_id))?;
        if stored.version != expected_version {
            return Err(EvolutionError::Conflict {
                entity_id: state.entity_id,
                expected_version,
            });
        }
        state.version = expected_version + 1;
        self.put_json(CF_ENTITIES, &key, &state)?;
        Ok(state)
    }

    async fn list_active(&self, after: Option<EntityId>, limit: usize) -> Result<Vec<EntityState>> {
        let cf = self.cf(CF_ENTITIES)?;
        let start = after.map(|id| *id.as_bytes());
        let mode = match &start {
            Some(key) => IteratorMode::From(&key[..], Direction::Forward),
            None => IteratorMode::Start,
        };

        let mut active = Vec::new();
        for item in self.db.iterator_cf(cf, mode) {
            if active.len() >= limit {
                break;
            }
            let (key, value) = item?;
            if start.as_ref().is_some_and(|s| s[..] == key[..]) {
                continue;
            }
            let state: EntityState = serde_json::from_slice(&value)?;
            if state.active {
                active.push(state);
            }
        }
        Ok(active)
    }

    async fn all(&self) -> Result<Vec<EntityState>> {
        let cf = self.cf(CF_ENTITIES)?;
        let mut entities = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            entities.push(serde_json::from_slice(&value)?);
        }
        Ok(entities)
    }
}

#[async_trait]
impl HistoryLog for RocksDBStore {
    async fn append(&self, record: EvolutionRecord) -> Result<()> {
        let key = self.record_key(&record);
        self.put_json(CF_RECORDS, &key, &record)
    }

    async fn query(&self, entity_id: EntityId, limit: usize) -> Result<Vec<EvolutionRecord>> {
        let cf = self.cf(CF_RECORDS)?;
        let prefix = entity_id.as_bytes();
        let mut upper = Vec::with_capacity(RECORD_KEY_LEN);
        upper.extend_from_slice(&prefix[..]);
        upper.resize(RECORD_KEY_LEN, 0xFF);

        let mut records = Vec::with_capacity(limit.min(64));
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&upper[..], Direction::Reverse))
        {
            if records.len() >= limit {
                break;
            }
            let (key, value) = item?;
            if !key.starts_with(&prefix[..]) {
                break;
            }
            records.push(serde_json::from_slice::<EvolutionRecord>(&value)?);
        }
        Ok(records)
    }
}
