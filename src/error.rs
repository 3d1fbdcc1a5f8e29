use crate::domain::entity::EntityId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvolutionError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("Transition evaluation error: {0}")]
    TransitionEvaluation(String),
    #[error("Version conflict on entity {entity_id}: expected version {expected_version}")]
    Conflict {
        entity_id: EntityId,
        expected_version: u64,
    },
    #[error("Entity {0} is inactive")]
    EntityInactive(EntityId),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl EvolutionError {
    pub fn machine_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "machine",
            id: id.into(),
        }
    }

    pub fn entity_not_found(id: EntityId) -> Self {
        Self::NotFound {
            kind: "entity",
            id: id.to_string(),
        }
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for EvolutionError {
    fn from(e: rocksdb::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EvolutionError>;
