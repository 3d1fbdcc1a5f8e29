use crate::domain::event::{EventData, EvolutionEvent};
use crate::error::{EvolutionError, Result};
use serde::Deserialize;
use std::io::Read;

/// One line of an events file: `entity,event_type,priority,data`, where
/// `data` is an optional JSON object.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct EventRow {
    pub entity: String,
    pub event_type: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub data: String,
}

impl EventRow {
    pub fn into_event(self) -> Result<(String, EvolutionEvent)> {
        let data = if self.data.trim().is_empty() {
            EventData::new()
        } else {
            serde_json::from_str::<EventData>(&self.data).map_err(|e| {
                EvolutionError::ValidationError(format!(
                    "event data for '{}' is not a JSON object: {e}",
                    self.entity
                ))
            })?
        };
        Ok((
            self.entity,
            EvolutionEvent::new(self.event_type, data, self.priority),
        ))
    }
}

/// Reads events from a CSV source.
///
/// This reader wraps `csv::Reader` and provides an iterator over
/// `Result<(alias, EvolutionEvent)>`. It trims whitespace and tolerates
/// missing trailing columns.
pub struct EventReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> EventReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads and decodes events, so large files stream without being
    /// loaded into memory.
    pub fn events(self) -> impl Iterator<Item = Result<(String, EvolutionEvent)>> {
        self.reader
            .into_deserialize::<EventRow>()
            .map(|row| row.map_err(EvolutionError::from).and_then(EventRow::into_event))
    }
}
